//! Connection listener and per-connection request handling.
//!
//! The listener accepts connections and spawns one handler task per
//! connection. A handler reads exactly one framed command, dispatches it,
//! and either replies synchronously and closes, or (for `issueJob`) hands
//! the connection over to the scheduler so the worker that eventually
//! executes the job can deliver the result.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::{RelayError, Result};
use crate::protocol;
use crate::scheduler::Scheduler;
use crate::worker::{self, JobExecutor};

pub struct Server {
    config: ServerConfig,
    scheduler: Arc<Scheduler>,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(config: ServerConfig, shutdown: CancellationToken) -> Self {
        let scheduler = Arc::new(Scheduler::new(config.buffer_size));
        Self {
            config,
            scheduler,
            shutdown,
        }
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    /// Bind the configured port and serve until shutdown.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener (tests bind an ephemeral port).
    ///
    /// Spawns the worker pool, accepts connections until the shutdown token
    /// fires, then stops listening, drains the queue with an abort notice
    /// per still-queued job, and waits for in-flight jobs to finish.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!(
            addr = %local_addr,
            buffer_size = self.config.buffer_size,
            thread_pool_size = self.config.thread_pool_size,
            "server listening"
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.thread_pool_size {
            workers.spawn(worker::run_worker(
                worker_id,
                self.scheduler.clone(),
                JobExecutor::new(),
            ));
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let scheduler = self.scheduler.clone();
                            let shutdown = self.shutdown.clone();
                            tokio::spawn(handle_client(stream, peer, scheduler, shutdown));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to accept connection");
                        }
                    }
                }
                _ = self.shutdown.cancelled() => break,
            }
        }

        // Stop accepting before draining so no submission races the drain.
        drop(listener);

        let aborted = self.scheduler.shutdown().await;
        for mut job in aborted {
            if let Some(stream) = job.origin.as_mut() {
                if let Err(e) =
                    protocol::send_message(stream, "SERVER TERMINATED BEFORE EXECUTION").await
                {
                    tracing::warn!(job_id = %job.id, error = %e, "failed to notify aborted job");
                }
            }
        }

        // Workers observe the stopped scheduler after finishing their
        // current job.
        while workers.join_next().await.is_some() {}

        tracing::info!("SERVER TERMINATED");
        Ok(())
    }
}

/// Read one framed command from the connection and dispatch it.
async fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    scheduler: Arc<Scheduler>,
    shutdown: CancellationToken,
) {
    let command = match protocol::recv_message(&mut stream).await {
        Ok(command) => command,
        Err(e) => {
            tracing::error!(%peer, error = %e, "failed to receive command from client");
            return;
        }
    };

    if let Err(e) = dispatch(stream, &command, scheduler, shutdown).await {
        tracing::error!(%peer, command = %command, error = %e, "request failed");
    }
}

async fn dispatch(
    mut stream: TcpStream,
    command: &str,
    scheduler: Arc<Scheduler>,
    shutdown: CancellationToken,
) -> Result<()> {
    if let Some(job) = command.strip_prefix("issueJob ") {
        // Ownership of the connection moves into the queue; the worker
        // that executes the job delivers the result and closes it. The
        // submission ack is sent by the scheduler once the job is queued.
        match scheduler.submit(job.to_string(), Some(stream)).await {
            // On shutdown the connection was dropped along with the job.
            Ok(_) | Err(RelayError::ServerStopped) => Ok(()),
            Err(e) => Err(e),
        }
    } else if let Some(level) = command.strip_prefix("setConcurrency ") {
        let level: i64 = level
            .trim()
            .parse()
            .map_err(|_| RelayError::InvalidCommand(command.to_string()))?;
        scheduler.set_concurrency(level).await;
        protocol::send_message(&mut stream, &format!("CONCURRENCY SET AT {level}\n")).await
    } else if let Some(job_id) = command.strip_prefix("stop ") {
        let job_id = job_id.trim();
        match scheduler.remove(job_id).await {
            Some(mut job) => {
                let reply = format!("JOB {job_id} REMOVED\n");
                protocol::send_message(&mut stream, &reply).await?;
                // The removed job's origin learns its job will never run,
                // then its connection is closed.
                if let Some(origin) = job.origin.as_mut() {
                    if let Err(e) = protocol::send_message(origin, &reply).await {
                        tracing::warn!(job_id, error = %e, "failed to notify removed job's origin");
                    }
                }
                Ok(())
            }
            None => {
                protocol::send_message(&mut stream, &format!("JOB {job_id} NOT FOUND\n")).await
            }
        }
    } else if command.starts_with("poll") {
        let queued = scheduler.snapshot().await;
        let mut response = String::new();
        for (id, cmd) in &queued {
            response.push_str(&format!("{id}, {cmd}\n"));
        }
        protocol::send_message(&mut stream, &response).await
    } else if command.starts_with("exit") {
        protocol::send_message(&mut stream, "SERVER TERMINATED\n").await?;
        shutdown.cancel();
        Ok(())
    } else {
        Err(RelayError::InvalidCommand(command.to_string()))
    }
}
