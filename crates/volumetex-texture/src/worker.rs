//! Background build threads.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, error};

use crate::error::{Result, TextureError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Work request sent to the build threads.
enum WorkRequest {
    Run(Job),
    Shutdown,
}

/// Fixed pool of named build threads fed from one queue.
///
/// Dropping the pool lets queued jobs finish, then joins every thread.
pub struct BuildWorkers {
    request_tx: Sender<WorkRequest>,
    threads: Vec<JoinHandle<()>>,
}

impl BuildWorkers {
    /// Spawn `count` threads (at least one).
    pub fn spawn(count: usize) -> Result<Self> {
        let count = count.max(1);
        let (request_tx, request_rx) = channel::unbounded::<WorkRequest>();

        let mut threads = Vec::with_capacity(count);
        for i in 0..count {
            let request_rx = request_rx.clone();
            let thread = thread::Builder::new()
                .name(format!("volumetex-build-{i}"))
                .spawn(move || Self::worker_loop(&request_rx))
                .map_err(|err| {
                    TextureError::Worker(format!("failed to spawn build thread: {err}"))
                })?;
            threads.push(thread);
        }
        debug!("Spawned {count} texture build threads");

        Ok(Self {
            request_tx,
            threads,
        })
    }

    fn worker_loop(request_rx: &Receiver<WorkRequest>) {
        loop {
            match request_rx.recv() {
                Ok(WorkRequest::Run(job)) => {
                    // A panicking job must not take the thread down with it
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("Build job panicked");
                    }
                }
                Ok(WorkRequest::Shutdown) | Err(_) => return,
            }
        }
    }

    /// Queue a job.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.request_tx
            .send(WorkRequest::Run(Box::new(job)))
            .map_err(|_| TextureError::Worker("build threads have shut down".to_string()))
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    fn shutdown(&mut self) {
        for _ in &self.threads {
            let _ = self.request_tx.send(WorkRequest::Shutdown);
        }
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

impl Drop for BuildWorkers {
    fn drop(&mut self) {
        self.shutdown();
    }
}
