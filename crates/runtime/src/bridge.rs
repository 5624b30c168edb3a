//! Dispatch bridge between synchronous callers and the session runtime.
//!
//! Tool server sessions are bound to the tokio runtime that spawned them: the
//! child process, its pipes and the reader task all live on that runtime's
//! reactor. The bridge owns one such runtime on a dedicated background thread
//! for the whole process lifetime, and lets any thread run a future on it and
//! wait for the outcome with a deadline.
//!
//! ```text
//! ┌──────────────────┐    flume channels    ┌──────────────────────┐
//! │  agent worker    │   Job (boxed fut) →  │  myngl-bridge thread │
//! │  (blocking)      │   ← output           │  current_thread rt   │
//! └──────────────────┘                      └──────────────────────┘
//! ```

use std::future::Future;
use std::pin::Pin;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

const THREAD_NAME: &str = "myngl-bridge";

/// Failure to obtain a result through the bridge.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// No result arrived before the deadline. The job keeps running.
    #[error("no result within {0:?}")]
    Timeout(Duration),

    /// The background runtime is gone, or the job died without a result.
    #[error("bridge runtime is not running")]
    Closed,
}

/// Handle to the background session runtime.
pub struct Bridge {
    jobs: flume::Sender<Job>,
}

impl Bridge {
    /// Start the background thread and its single-threaded runtime.
    pub fn new() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (jobs, queue) = flume::unbounded::<Job>();

        thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    while let Ok(job) = queue.recv_async().await {
                        tokio::spawn(job);
                    }
                });
                debug!("bridge runtime stopped");
            })?;

        Ok(Self { jobs })
    }

    /// Run `future` on the session runtime and block until it finishes or
    /// `deadline` passes.
    ///
    /// Must not be called from the bridge thread itself. A future that
    /// outlives the deadline still runs to completion; its output is dropped.
    pub fn call<F, T>(&self, deadline: Duration, future: F) -> Result<T, BridgeError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = flume::bounded(1);
        let job: Job = Box::pin(async move {
            let _ = reply_tx.send(future.await);
        });

        self.jobs.send(job).map_err(|_| BridgeError::Closed)?;

        match reply_rx.recv_timeout(deadline) {
            Ok(output) => Ok(output),
            Err(flume::RecvTimeoutError::Timeout) => {
                warn!(deadline_ms = deadline.as_millis() as u64, "bridge call timed out");
                Err(BridgeError::Timeout(deadline))
            }
            Err(flume::RecvTimeoutError::Disconnected) => Err(BridgeError::Closed),
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("queued", &self.jobs.len())
            .finish()
    }
}
