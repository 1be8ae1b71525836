//! Client-side request/response driver.
//!
//! A [`Commander`] opens one connection per command, sends the framed
//! request, and reads the reply sequence the server defines for it. Only
//! `issueJob` keeps the connection open past the first reply: the ack is
//! followed (eventually) by an output header, a bulk transfer, and a
//! footer, delivered by whichever worker executed the job.

use tokio::io::AsyncWrite;
use tokio::net::TcpStream;

use crate::error::Result;
use crate::protocol;

/// Outcome of a full `issueJob` exchange.
#[derive(Debug)]
pub struct JobRun {
    /// Submission ack (`JOB <id>, <cmd> SUBMITTED`).
    pub ack: String,
    /// Second framed message: the output header, or an error/abort line.
    pub header: String,
    /// Bulk transfer length, when an output transfer followed the header.
    pub bulk_len: Option<u64>,
    /// Closing footer, when an output transfer followed the header.
    pub footer: Option<String>,
}

pub struct Commander {
    stream: TcpStream,
    /// Print each received framed message, the way an interactive caller
    /// expects; disabled for machine-readable output modes.
    echo: bool,
}

impl Commander {
    pub async fn connect(host: &str, port: u16, echo: bool) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self { stream, echo })
    }

    /// Submit a job and wait for its result.
    ///
    /// The bulk output bytes are streamed into `bulk_out` as they arrive,
    /// without buffering the whole transfer.
    pub async fn issue_job<W>(&mut self, job: &str, bulk_out: &mut W) -> Result<JobRun>
    where
        W: AsyncWrite + Unpin,
    {
        self.send(&format!("issueJob {job}")).await?;

        let ack = self.recv().await?;
        let header = self.recv().await?;

        let mut bulk_len = None;
        let mut footer = None;
        if header.contains("output start") {
            bulk_len = Some(protocol::recv_bulk(&mut self.stream, bulk_out).await?);
            footer = Some(self.recv().await?);
        }

        Ok(JobRun {
            ack,
            header,
            bulk_len,
            footer,
        })
    }

    pub async fn set_concurrency(&mut self, level: i64) -> Result<String> {
        self.send(&format!("setConcurrency {level}")).await?;
        self.recv().await
    }

    pub async fn stop(&mut self, job_id: &str) -> Result<String> {
        self.send(&format!("stop {job_id}")).await?;
        self.recv().await
    }

    /// Fetch the queued-job listing: one `<id>, <cmd>` line per job.
    pub async fn poll(&mut self) -> Result<String> {
        self.send("poll").await?;
        self.recv().await
    }

    pub async fn exit(&mut self) -> Result<String> {
        self.send("exit").await?;
        self.recv().await
    }

    async fn send(&mut self, command: &str) -> Result<()> {
        protocol::send_message(&mut self.stream, command).await
    }

    async fn recv(&mut self) -> Result<String> {
        let response = protocol::recv_message(&mut self.stream).await?;
        if self.echo {
            println!("{response}");
        }
        Ok(response)
    }
}

/// Pull the assigned job id out of a submission ack.
pub fn parse_job_id(ack: &str) -> Option<String> {
    let rest = ack.strip_prefix("JOB ")?;
    let (id, _) = rest.split_once(',')?;
    Some(id.trim().to_string())
}
