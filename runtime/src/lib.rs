// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default)]

//! The process-level entry point: wires `rt_config`, `rt_executor` and `task` together behind one
//! `Runtime` a binary constructs once and calls `block_on_root` on (§6). Not part of the kernel's
//! instruction protocol itself — the "main method" convenience every consumer of a supervision
//! tree otherwise has to hand-assemble from `TaskContext`/`spawn_root`.

use std::time::Duration;

use task::{IdAllocator, ScopedBody, Task, TaskContext, TaskError, TaskOptions};

pub use combinators::{all, call, race, with_timeout, Callable};
pub use resource::{acquire, Resource};
pub use rt_config::RuntimeConfig;
pub use task::{Event, Scope};

/// Owns an executor and the defaults new root tasks are spawned with. One `Runtime` is meant to
/// live for the lifetime of a process; cloning `TaskContext`s off of it is what every task in a
/// tree shares.
pub struct Runtime {
    executor: rt_executor::Runtime,
    config: RuntimeConfig,
    ids: std::sync::Arc<IdAllocator>,
}

impl Runtime {
    /// Builds an owned multi-thread executor sized from `config.worker_threads`.
    pub fn new(config: RuntimeConfig) -> Result<Runtime, String> {
        let executor = rt_executor::Runtime::new_owned(config.worker_threads)?;
        log::info!("runtime started with {} worker threads", config.worker_threads);
        Ok(Runtime { executor, config, ids: IdAllocator::new() })
    }

    /// Wraps whatever tokio runtime is already current instead of owning one — for embedding a
    /// supervision tree inside a host that already runs its own `#[tokio::main]`/`#[tokio::test]`.
    pub fn from_ambient(config: RuntimeConfig) -> Runtime {
        Runtime {
            executor: rt_executor::Runtime::new(),
            config,
            ids: IdAllocator::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// `TaskOptions` seeded from this runtime's configured policy defaults; a caller overrides
    /// individual fields on top before spawning.
    pub fn default_task_options(&self) -> TaskOptions {
        TaskOptions {
            block_parent: self.config.default_block_parent,
            ignore_child_errors: self.config.default_ignore_child_errors,
            ..TaskOptions::default()
        }
    }

    fn task_context(&self) -> TaskContext {
        TaskContext {
            ids: self.ids.clone(),
            executor: self.executor.clone(),
        }
    }

    /// Spawns `body` as the root of a new supervision tree, using this runtime's default task
    /// options, and blocks the calling thread until it reaches a terminal state.
    pub fn block_on_root<T, B>(&self, body: B) -> Result<T, TaskError>
    where
        T: Send + 'static,
        B: ScopedBody<T>,
    {
        let options = self.default_task_options();
        self.block_on_root_with_options(body, options)
    }

    /// As `block_on_root`, but with explicit `options` for the root task instead of this
    /// runtime's configured defaults.
    pub fn block_on_root_with_options<T, B>(&self, body: B, options: TaskOptions) -> Result<T, TaskError>
    where
        T: Send + 'static,
        B: ScopedBody<T>,
    {
        let task: Task<T> = task::spawn_root(self.task_context(), body, options);
        self.executor.block_on(task)
    }

    /// Shuts down an owned executor, waiting up to `timeout` for outstanding tasks. A no-op for a
    /// `from_ambient` runtime.
    pub fn shutdown(&self, timeout: Duration) {
        self.executor.shutdown(timeout);
    }
}
