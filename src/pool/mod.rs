//! Worker pool
//!
//! One thread per executor. Each worker pulls jobs from the shared
//! [`JobQueue`] and posts results on a channel. A worker whose executor
//! fails hands its job back to the front of the queue and retires for
//! good, so a broken backend costs at most one failed attempt.

use crate::core::{EvalResult, Executor, GridPoint, Result};
use crate::queue::{JobQueue, Message};
use log::{debug, warn};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Why a worker thread ended
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerExit {
    /// Saw the stop message
    Stopped,
    /// Gave up after a failure; `job` went back to the queue
    Retired {
        job: Option<GridPoint>,
        reason: String,
    },
}

/// Run one worker until it sees `Stop` or its executor fails
pub fn run_worker<E: Executor + ?Sized>(
    executor: &mut E,
    queue: &JobQueue,
    results: &Sender<EvalResult>,
) -> WorkerExit {
    if let Err(e) = executor.connect() {
        warn!("worker {} could not start: {e}", executor.name());
        return WorkerExit::Retired {
            job: None,
            reason: e.to_string(),
        };
    }

    let exit = loop {
        let point = match queue.pop() {
            Message::Stop => {
                queue.push_front(Message::Stop);
                debug!("worker {} stop.", executor.name());
                break WorkerExit::Stopped;
            }
            Message::Job(point) => point,
        };

        match executor.invoke(point) {
            Ok(rate) => {
                let result = EvalResult::new(executor.name(), point, rate);
                if results.send(result).is_err() {
                    // Nobody is collecting anymore.
                    queue.requeue(point);
                    break WorkerExit::Stopped;
                }
            }
            Err(e) => {
                queue.requeue(point);
                warn!("worker {} quit: {e}", executor.name());
                break WorkerExit::Retired {
                    job: Some(point),
                    reason: e.to_string(),
                };
            }
        }
    };

    executor.shutdown();
    exit
}

/// Running set of worker threads
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handles: Vec<JoinHandle<WorkerExit>>,
}

impl WorkerPool {
    /// Start one thread per executor.
    ///
    /// The returned receiver disconnects once every worker has exited,
    /// which is how pool exhaustion shows up on the consumer side.
    pub fn spawn(
        queue: Arc<JobQueue>,
        executors: Vec<Box<dyn Executor>>,
    ) -> Result<(Self, Receiver<EvalResult>)> {
        let (tx, rx) = channel();
        let mut handles = Vec::with_capacity(executors.len());

        for (i, mut executor) in executors.into_iter().enumerate() {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{i}-{}", executor.name()))
                .spawn(move || run_worker(&mut executor, &queue, &tx))?;
            handles.push(handle);
        }

        Ok((Self { queue, handles }, rx))
    }

    /// Number of worker threads started
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Send the stop message behind the queued work and wait for every worker
    pub fn shutdown(self) -> Vec<WorkerExit> {
        self.queue.stop();
        self.join()
    }

    /// Stop ahead of any queued work and wait for every worker
    pub fn abort(self) -> Vec<WorkerExit> {
        self.queue.push_front(Message::Stop);
        self.join()
    }

    fn join(self) -> Vec<WorkerExit> {
        self.handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| WorkerExit::Retired {
                    job: None,
                    reason: "worker thread panicked".to_string(),
                })
            })
            .collect()
    }
}
