//! In-process job queue and worker pool.
//!
//! Stages hand off through the database, never through memory: a job
//! carries only a track id, and each worker owns its own SQLite
//! connection. Any worker can pick up any job, and a job that is
//! delivered twice re-runs its stage harmlessly.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use crate::config::AppConfig;
use crate::db::Database;
use crate::features::DspCapability;

use super::run_job;

/// One unit of pipeline work. The payload is the track id; all real
/// state lives in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Decode(String),
    Extract(String),
    Similarity(String),
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Extract(_) => "extract",
            Self::Similarity(_) => "similarity",
        }
    }

    pub fn track_id(&self) -> &str {
        match self {
            Self::Decode(id) | Self::Extract(id) | Self::Similarity(id) => id,
        }
    }
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    in_flight: usize,
    closed: bool,
}

/// FIFO queue shared between submitters and workers. `in_flight`
/// counts popped-but-unfinished jobs so idleness means "nothing queued
/// and nothing running".
pub struct JobQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl JobQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            cond: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, job: Job) {
        let mut state = self.lock();
        if state.closed {
            log::warn!("Dropping {} job for {}: queue closed", job.name(), job.track_id());
            return;
        }
        state.jobs.push_back(job);
        self.cond.notify_all();
    }

    /// Block until a job is available or the queue is closed and empty.
    /// A returned job counts as in flight until `job_done`.
    pub fn pop(&self) -> Option<Job> {
        let mut state = self.lock();
        loop {
            if let Some(job) = state.jobs.pop_front() {
                state.in_flight += 1;
                return Some(job);
            }
            if state.closed {
                return None;
            }
            state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Must be called once per popped job, after any follow-up jobs
    /// have been pushed.
    pub fn job_done(&self) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        self.cond.notify_all();
    }

    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.jobs.is_empty() && state.in_flight == 0
    }

    /// Block until nothing is queued and nothing is running.
    pub fn wait_idle(&self) {
        let mut state = self.lock();
        while !(state.jobs.is_empty() && state.in_flight == 0) {
            state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Stop accepting jobs and wake blocked workers so they can exit.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.cond.notify_all();
    }
}

/// Fixed-size pool of worker threads draining a shared queue. Each
/// worker opens its own connection to the database file.
pub struct WorkerPool {
    handles: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        queue: Arc<JobQueue>,
        db_path: PathBuf,
        config: Arc<AppConfig>,
        capability: DspCapability,
        workers: usize,
    ) -> Self {
        let handles = (0..workers)
            .map(|n| {
                let queue = Arc::clone(&queue);
                let db_path = db_path.clone();
                let config = Arc::clone(&config);
                thread::spawn(move || {
                    let db = match Database::open(&db_path) {
                        Ok(db) => db,
                        Err(e) => {
                            log::error!("Worker {n} could not open database: {e}");
                            return;
                        }
                    };
                    while let Some(job) = queue.pop() {
                        for next in run_job(&db, &config, capability, job) {
                            queue.push(next);
                        }
                        queue.job_done();
                    }
                })
            })
            .collect();
        Self { handles }
    }

    /// Close the queue and wait for all workers to finish.
    pub fn shutdown(self, queue: &JobQueue) {
        queue.close();
        for handle in self.handles {
            if handle.join().is_err() {
                log::error!("Worker thread panicked");
            }
        }
    }
}
