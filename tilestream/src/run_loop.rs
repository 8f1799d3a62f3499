//! The cooperative event loop that owns network callbacks and cache access.
//!
//! A [`RunLoop`] is a dedicated thread running a current-thread tokio
//! runtime. It executes posted jobs one at a time, in posting order, and
//! drives any futures spawned onto it (network transfers). State that is not
//! safe to touch from several threads, such as the pending request registry
//! and the cache store, is only ever accessed from jobs running here.
//!
//! [`LoopHandle`] is the wake/marshal mechanism: any thread can post a job
//! with [`LoopHandle::invoke`], moving its payload along with it.
//!
//! # Example
//!
//! ```
//! use tilestream::run_loop::RunLoop;
//!
//! let run_loop = RunLoop::start("example-loop").unwrap();
//! let handle = run_loop.handle();
//! let on_loop = handle.call(|| std::thread::current().name().map(str::to_string)).unwrap();
//! assert_eq!(on_loop.as_deref(), Some("example-loop"));
//! run_loop.shutdown();
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A unit of work executed on the loop thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Errors from posting to or starting a loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoopError {
    /// The loop has shut down and no longer accepts jobs.
    #[error("run loop is closed")]
    Closed,

    /// A blocking call was made from the loop thread itself.
    #[error("blocking call issued from the loop thread")]
    Reentrant,

    #[error("failed to spawn loop thread: {0}")]
    Spawn(String),

    #[error("failed to build loop runtime: {0}")]
    Runtime(String),
}

struct LoopShared {
    name: String,
    thread_id: ThreadId,
    jobs: mpsc::UnboundedSender<Job>,
    runtime: tokio::runtime::Handle,
}

/// Cloneable, thread-safe handle to a running loop.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<LoopShared>,
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("name", &self.shared.name)
            .field("thread_id", &self.shared.thread_id)
            .finish()
    }
}

impl LoopHandle {
    /// Name of the loop thread.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Identity of the loop thread.
    pub fn thread_id(&self) -> ThreadId {
        self.shared.thread_id
    }

    /// Returns true when called from the loop thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.shared.thread_id
    }

    /// Posts a job to run on the loop thread.
    ///
    /// Jobs run in posting order. Returns [`LoopError::Closed`] once the loop
    /// has shut down; the job is dropped without running in that case.
    pub fn invoke<F>(&self, job: F) -> Result<(), LoopError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared
            .jobs
            .send(Box::new(job))
            .map_err(|_| LoopError::Closed)
    }

    /// Runs `f` on the loop thread and blocks until it returns.
    ///
    /// Must not be called from the loop thread, which would deadlock.
    pub fn call<F, R>(&self, f: F) -> Result<R, LoopError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Err(LoopError::Reentrant);
        }
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        self.invoke(move || {
            let _ = tx.send(f());
        })?;
        rx.recv().map_err(|_| LoopError::Closed)
    }

    /// Spawns a future onto the loop's runtime.
    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shared.runtime.spawn(future)
    }
}

/// Owner of the loop thread. Dropping it shuts the loop down.
pub struct RunLoop {
    handle: LoopHandle,
    shutdown: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl RunLoop {
    /// Spawns a loop thread with the given name.
    pub fn start(name: impl Into<String>) -> Result<Self, LoopError> {
        let name = name.into();
        let (job_tx, job_rx) = mpsc::unbounded_channel::<Job>();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);
        let shutdown = CancellationToken::new();
        let loop_shutdown = shutdown.clone();
        let loop_name = name.clone();

        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(runtime.handle().clone()));
                runtime.block_on(Self::run(job_rx, loop_shutdown));
                debug!(name = %loop_name, "Run loop stopped");
            })
            .map_err(|e| LoopError::Spawn(e.to_string()))?;

        let runtime = ready_rx
            .recv()
            .map_err(|_| LoopError::Runtime("loop thread exited during startup".to_string()))?
            .map_err(LoopError::Runtime)?;

        info!(name = %name, "Run loop started");

        let handle = LoopHandle {
            shared: Arc::new(LoopShared {
                name,
                thread_id: thread.thread().id(),
                jobs: job_tx,
                runtime,
            }),
        };

        Ok(Self {
            handle,
            shutdown,
            thread: Some(thread),
        })
    }

    /// Returns a handle for posting work to this loop.
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Stops accepting jobs, runs the ones already queued, and joins the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == thread::current().id() {
                return;
            }
            let _ = thread.join();
        }
    }

    async fn run(mut jobs: mpsc::UnboundedReceiver<Job>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                job = jobs.recv() => match job {
                    Some(job) => job(),
                    None => return,
                },
            }
        }

        // Jobs posted before shutdown still run.
        jobs.close();
        while let Ok(job) = jobs.try_recv() {
            job();
        }
    }
}

impl Drop for RunLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
