// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]

//! Wraps a tokio runtime so the rest of the kernel spawns background work through one narrow
//! seam instead of calling `tokio::spawn` directly everywhere.
//!
//! Modeled on `task_executor::Executor`: a "borrowed" `Runtime` wraps whatever tokio runtime is
//! already current (the case in `#[tokio::test]`), while an "owned" one builds and keeps its own
//! multi-thread runtime alive for the lifetime of the process.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle};
use tokio::task::{JoinError, JoinHandle};

/// A handle to a tokio runtime used for spawning the kernel's background work: instructions that
/// wrap a foreign future, timers for `withTimeout`, and the body-driving task a Controller spawns
/// for promise-like bodies.
#[derive(Clone)]
pub struct Runtime {
    // `None` for a borrowed Runtime: there is nothing for this handle to own or shut down.
    owned: Arc<Mutex<Option<tokio::runtime::Runtime>>>,
    handle: Handle,
}

impl Runtime {
    /// Wraps the tokio runtime that is already current (e.g. inside `#[tokio::test]` or
    /// `#[tokio::main]`). Dropping every clone of the returned `Runtime` does not shut down the
    /// underlying runtime; its owner is responsible for that.
    pub fn new() -> Runtime {
        Runtime {
            owned: Arc::new(Mutex::new(None)),
            handle: Handle::current(),
        }
    }

    /// Builds and owns a multi-thread tokio runtime with `worker_threads` workers. Dropping the
    /// last clone (or calling `shutdown`) tears it down.
    pub fn new_owned(worker_threads: usize) -> Result<Runtime, String> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .enable_all()
            .build()
            .map_err(|e| format!("failed to start runtime: {e}"))?;
        let handle = runtime.handle().clone();
        log::debug!("owned executor started with {worker_threads} worker threads");
        Ok(Runtime {
            owned: Arc::new(Mutex::new(Some(runtime))),
            handle,
        })
    }

    /// Runs a future as a new task on this runtime, recovering via `rescue` if the task panics.
    pub fn spawn<O, F>(&self, future: F, rescue: impl FnOnce(JoinError) -> O) -> impl Future<Output = O>
    where
        O: Send + 'static,
        F: Future<Output = O> + Send + 'static,
    {
        self.native_spawn(future).map(|res| match res {
            Ok(o) => o,
            Err(e) => rescue(e),
        })
    }

    /// Runs a future as a new task and returns the raw `JoinHandle`, for callers that need to
    /// race it against something else (e.g. an interrupt signal) with `tokio::select!`.
    pub fn native_spawn<O, F>(&self, future: F) -> JoinHandle<O>
    where
        O: Send + 'static,
        F: Future<Output = O> + Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Drives `future` to completion on this runtime. Only meant to be called from outside of any
    /// other future running on this runtime (i.e. from something resembling a `main` function).
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Shuts down an owned runtime, waiting up to `timeout` for outstanding tasks before leaking
    /// them. A no-op for a borrowed `Runtime`.
    pub fn shutdown(&self, timeout: Duration) {
        let Some(runtime) = self.owned.lock().take() else {
            log::trace!("shutdown called on a borrowed executor, nothing to do");
            return;
        };
        log::debug!("shutting down owned executor, waiting up to {timeout:?}");
        runtime.shutdown_timeout(timeout);
    }
}
