//! The concurrent job scheduler.
//!
//! A bounded FIFO queue feeds a fixed pool of workers through a two-tier
//! admission gate: the pool size is a hard ceiling on simultaneous
//! execution, and the runtime-adjustable concurrency level is a soft
//! ceiling beneath it. All mutable scheduler state lives in one aggregate
//! behind a single lock, with two wakeup conditions: "a queue slot was
//! freed" and "work or gate state changed".

pub mod job;

pub use job::Job;

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};

use crate::error::{RelayError, Result};
use crate::protocol;

#[derive(Debug)]
struct SchedulerState {
    queue: VecDeque<Job>,
    /// Jobs past dequeue and not yet finished executing.
    active: usize,
    /// Soft ceiling on `active`. Any integer is accepted; zero or negative
    /// stalls all dequeues until a later increase.
    concurrency_level: i64,
    /// One-shot: flipped false by `shutdown` and never set back.
    running: bool,
}

/// Owns the bounded job queue, the concurrency gate, and admission state.
///
/// All operations take `&self`; the scheduler is shared between connection
/// handlers and workers via `Arc`.
#[derive(Debug)]
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    capacity: usize,
    job_counter: AtomicU64,
    /// Signalled when a queue slot is freed (dequeue, remove, shutdown).
    space_available: Notify,
    /// Signalled when work arrives, a job finishes, the concurrency level
    /// changes, or shutdown begins.
    work_available: Notify,
}

impl Scheduler {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                queue: VecDeque::new(),
                active: 0,
                concurrency_level: 1,
                running: true,
            }),
            capacity,
            job_counter: AtomicU64::new(0),
            space_available: Notify::new(),
            work_available: Notify::new(),
        }
    }

    /// Enqueue a command, blocking while the queue is at capacity.
    ///
    /// The job id is assigned on entry; if the scheduler shuts down while
    /// this call is blocked, the command is discarded, the origin connection
    /// is dropped, and [`RelayError::ServerStopped`] is returned.
    ///
    /// On success the submission ack is sent to the origin before any worker
    /// can observe the job, so the ack always precedes output delivery on
    /// that connection.
    pub async fn submit(&self, command: String, origin: Option<TcpStream>) -> Result<String> {
        let id = format!("job_{}", self.job_counter.fetch_add(1, Ordering::SeqCst));

        let mut space = pin!(self.space_available.notified());
        loop {
            space.as_mut().enable();
            {
                let mut state = self.state.lock().await;
                if !state.running {
                    return Err(RelayError::ServerStopped);
                }
                if state.queue.len() < self.capacity {
                    let ack = format!("JOB {}, {} SUBMITTED\n", id, command);
                    tracing::info!(job_id = %id, command = %command, "job queued");
                    state.queue.push_back(Job::new(id.clone(), command, origin));
                    if let Some(stream) = state.queue.back_mut().and_then(|j| j.origin.as_mut()) {
                        if let Err(e) = protocol::send_message(stream, &ack).await {
                            tracing::warn!(job_id = %id, error = %e, "failed to send submission ack");
                        }
                    }
                    self.work_available.notify_waiters();
                    return Ok(id);
                }
            }
            space.as_mut().await;
            space.set(self.space_available.notified());
        }
    }

    /// Update the concurrency level and wake all blocked workers so they
    /// re-evaluate the gate. Accepts any integer; never fails.
    pub async fn set_concurrency(&self, level: i64) {
        let mut state = self.state.lock().await;
        state.concurrency_level = level;
        self.work_available.notify_waiters();
        tracing::info!(concurrency_level = level, "concurrency level updated");
    }

    /// Remove a still-queued job by id, freeing one unit of queue capacity.
    ///
    /// Returns the removed job (with its origin connection, so the caller
    /// can notify it), or `None` if no queued job has that id. Jobs already
    /// past dequeue are never touched.
    pub async fn remove(&self, job_id: &str) -> Option<Job> {
        let mut state = self.state.lock().await;
        let pos = state.queue.iter().position(|j| j.id == job_id)?;
        let job = state.queue.remove(pos)?;
        self.space_available.notify_waiters();
        tracing::info!(job_id, "job removed from queue");
        Some(job)
    }

    /// Point-in-time copy of the queued jobs, in submission order.
    /// Active jobs are excluded.
    pub async fn snapshot(&self) -> Vec<(String, String)> {
        let state = self.state.lock().await;
        state
            .queue
            .iter()
            .map(|j| (j.id.clone(), j.command.clone()))
            .collect()
    }

    /// Dequeue the head of the queue once the gate admits it: the queue is
    /// non-empty and `active < concurrency_level`. Blocks otherwise.
    ///
    /// Returns `None` once the scheduler has shut down; workers use that to
    /// exit their loop. Callers must pair every returned job with a later
    /// [`Scheduler::job_finished`].
    pub async fn next_job(&self) -> Option<Job> {
        let mut work = pin!(self.work_available.notified());
        loop {
            work.as_mut().enable();
            {
                let mut state = self.state.lock().await;
                if !state.running {
                    return None;
                }
                if !state.queue.is_empty() && (state.active as i64) < state.concurrency_level {
                    let job = state.queue.pop_front()?;
                    state.active += 1;
                    self.space_available.notify_waiters();
                    tracing::debug!(job_id = %job.id, active = state.active, "job dequeued");
                    return Some(job);
                }
            }
            work.as_mut().await;
            work.set(self.work_available.notified());
        }
    }

    /// Mark one dequeued job as finished and re-evaluate the gate for
    /// waiting workers.
    pub async fn job_finished(&self) {
        let mut state = self.state.lock().await;
        state.active -= 1;
        self.work_available.notify_waiters();
    }

    /// One-shot shutdown: stop admissions, wake all blocked submitters and
    /// workers, and drain every still-queued job.
    ///
    /// Returns the drained jobs so the caller can notify each origin that
    /// the server terminated before execution. Jobs already executing are
    /// not interrupted. Idempotent; later calls return an empty vec.
    pub async fn shutdown(&self) -> Vec<Job> {
        let mut state = self.state.lock().await;
        if !state.running {
            return Vec::new();
        }
        state.running = false;
        let drained: Vec<Job> = state.queue.drain(..).collect();
        self.work_available.notify_waiters();
        self.space_available.notify_waiters();
        tracing::info!(aborted = drained.len(), "scheduler shut down");
        drained
    }

    /// Number of jobs currently past dequeue and not yet finished.
    pub async fn active_count(&self) -> usize {
        self.state.lock().await.active
    }

    /// Number of jobs currently queued.
    pub async fn queued_count(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }
}
