//! Worker units that execute jobs and deliver their output.
//!
//! Each worker loops: dequeue through the scheduler's concurrency gate,
//! execute the job via [`JobExecutor`], deliver the captured output to the
//! job's origin connection, and report completion back to the scheduler.
//! Workers exit their loop when the scheduler has shut down.

pub mod executor;

pub use executor::{CapturedOutput, JobExecutor};

use std::sync::Arc;

use tokio::net::TcpStream;

use crate::error::Result;
use crate::protocol;
use crate::scheduler::{Job, Scheduler};

/// One long-lived worker unit out of the fixed pool.
pub async fn run_worker(worker_id: usize, scheduler: Arc<Scheduler>, executor: JobExecutor) {
    while let Some(job) = scheduler.next_job().await {
        process_job(&executor, job).await;
        scheduler.job_finished().await;
    }
    tracing::debug!(worker_id, "worker exiting");
}

/// Execute one job and deliver the result to its origin connection.
///
/// Delivery failures terminate only this job's interaction. If the origin
/// is already gone the job still runs to completion and the result is
/// discarded.
async fn process_job(executor: &JobExecutor, job: Job) {
    let Job {
        id,
        command,
        origin,
    } = job;

    match executor.execute(&id, &command).await {
        Ok(captured) => {
            let Some(mut stream) = origin else {
                tracing::warn!(job_id = %id, "origin connection gone, discarding output");
                return;
            };
            if let Err(e) = deliver(&mut stream, &id, &captured).await {
                tracing::warn!(job_id = %id, error = %e, "failed to deliver job output");
            }
            // dropping the stream closes the origin connection
        }
        Err(e) => {
            tracing::error!(job_id = %id, command = %command, error = %e, "failed to spawn job process");
            if let Some(mut stream) = origin {
                let report = format!("Error: Unable to execute job: {command}\n");
                if let Err(e) = protocol::send_message(&mut stream, &report).await {
                    tracing::warn!(job_id = %id, error = %e, "failed to report spawn failure");
                }
            }
        }
    }
}

/// Frame the captured output as header, bulk transfer, footer.
async fn deliver(stream: &mut TcpStream, job_id: &str, captured: &CapturedOutput) -> Result<()> {
    protocol::send_message(stream, &format!("-----{job_id} output start------\n")).await?;
    let mut artifact = tokio::fs::File::open(captured.path()).await?;
    protocol::send_bulk_file(stream, &mut artifact).await?;
    protocol::send_message(stream, &format!("-----{job_id} output end------\n")).await?;
    Ok(())
}
