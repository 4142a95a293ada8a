// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default)]

//! The evaluator: drives one suspendable body to completion, races it against an interrupt, and
//! drains sub-frames on the way out.
//!
//! The source this runtime is modeled on expresses a body as a generator yielding instructions
//! that the evaluator steps with `next`/`throw`/`return`. Rust has no stable generator, but design
//! notes for this kernel explicitly permit substituting "native coroutines" for that protocol —
//! async/await already performs the suspend/resume transform the generator did, and dropping a
//! `Future` plays the role of `iterator.return()`. A `Frame` here is therefore the thing that
//! polls a boxed `Operation` to completion while racing it against an interrupt signal, modeled on
//! `graph::entry::spawn_node_execution`'s `tokio::select!` between a completion future and an
//! interrupt channel.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Any error raised out of a body. Cheaply cloneable so the same failure can be delivered to a
/// parent's rejection, a trapper, and an external awaiter without forcing callers to pick one
/// owner.
#[derive(Clone)]
pub struct OperationError(Arc<dyn std::error::Error + Send + Sync>);

impl OperationError {
    pub fn new<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        OperationError(Arc::new(err))
    }

    pub fn msg(message: impl Into<String>) -> Self {
        OperationError(Arc::new(Message(message.into())))
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for OperationError {}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

pub type OperationResult<T> = Result<T, OperationError>;

/// A boxed, suspendable body: the Rust stand-in for "an iterator of Instructions".
pub type Operation<T> = Pin<Box<dyn Future<Output = OperationResult<T>> + Send>>;

/// How a frame's run concluded. Mirrors the source's four-way Exit: a settled value, a body
/// failure, an uncaused teardown (`aborted`), or a teardown with a reason (`crashed`).
pub enum Exit<T> {
    Completed(T),
    Failed(OperationError),
    Aborted,
    Crashed(OperationError),
}

impl<T: fmt::Debug> fmt::Debug for Exit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exit::Completed(v) => write!(f, "Exit::Completed({v:?})"),
            Exit::Failed(e) => write!(f, "Exit::Failed({e})"),
            Exit::Aborted => write!(f, "Exit::Aborted"),
            Exit::Crashed(e) => write!(f, "Exit::Crashed({e})"),
        }
    }
}

/// A prototype-chained, scope-local value store: a frame inherits its parent's entries and may
/// shadow them with its own.
struct Context {
    parent: Option<Arc<Frame>>,
    values: Mutex<HashMap<&'static str, Box<dyn Any + Send + Sync>>>,
}

/// The evaluator context that drives one task's body. Frames nest: `resource.init` and the racing
/// combinators run their sub-operations in a child frame so that destroying the parent also tears
/// down work it fanned out internally, without that work becoming a full supervised Task.
pub struct Frame {
    context: Context,
    children: Mutex<Vec<Arc<Frame>>>,
    interrupt: Notify,
    aborted: AtomicBool,
    crash: Mutex<Option<OperationError>>,
}

impl Frame {
    pub fn new() -> Arc<Frame> {
        Arc::new(Frame {
            context: Context {
                parent: None,
                values: Mutex::new(HashMap::new()),
            },
            children: Mutex::new(Vec::new()),
            interrupt: Notify::new(),
            aborted: AtomicBool::new(false),
            crash: Mutex::new(None),
        })
    }

    /// Creates a sub-frame rooted at `self`, registered so that destroying `self` destroys it too.
    pub fn child(self: &Arc<Frame>) -> Arc<Frame> {
        let child = Arc::new(Frame {
            context: Context {
                parent: Some(self.clone()),
                values: Mutex::new(HashMap::new()),
            },
            children: Mutex::new(Vec::new()),
            interrupt: Notify::new(),
            aborted: AtomicBool::new(false),
            crash: Mutex::new(None),
        });
        self.children.lock().push(child.clone());
        child
    }

    pub fn set_context<T: Send + Sync + 'static>(&self, key: &'static str, value: T) {
        self.context.values.lock().insert(key, Box::new(value));
    }

    pub fn get_context<T: Clone + 'static>(&self, key: &'static str) -> Option<T> {
        if let Some(v) = self.context.values.lock().get(key) {
            return v.downcast_ref::<T>().cloned();
        }
        self.context.parent.as_ref()?.get_context(key)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Drives `operation` to completion, racing it against this frame's interrupt. Always drains
    /// sub-frames, spawned by this body's own instructions, before returning — regardless of how
    /// the body settled.
    pub async fn run<T: Send + 'static>(self: &Arc<Frame>, operation: Operation<T>) -> Exit<T> {
        tokio::pin!(operation);
        // Biased so a pending `destroy` always wins a tie against a same-tick completion: once
        // teardown has been requested, a late success should not sneak through.
        let settled = tokio::select! {
            biased;
            _ = self.interrupt.notified() => None,
            res = &mut operation => Some(res),
        };
        self.drain_children().await;

        if self.is_aborted() {
            return match self.take_crash() {
                Some(reason) => Exit::Crashed(reason),
                None => Exit::Aborted,
            };
        }
        match settled {
            Some(Ok(value)) => Exit::Completed(value),
            Some(Err(err)) => Exit::Failed(err),
            // The interrupt fired but nothing ever called `destroy`: treat as an uncaused abort.
            None => Exit::Aborted,
        }
    }

    /// Marks this frame for teardown and recursively destroys its children in reverse insertion
    /// order, the evaluator's "child drain". Idempotent: a frame destroyed twice keeps its first
    /// crash reason.
    pub async fn destroy(self: &Arc<Frame>, reason: Option<OperationError>) {
        if let Some(reason) = reason {
            let mut crash = self.crash.lock();
            if crash.is_none() {
                *crash = Some(reason);
            }
        }
        self.aborted.store(true, Ordering::SeqCst);
        self.interrupt.notify_one();
        log::trace!("frame destroyed, crash = {}", self.crash.lock().is_some());
        self.drain_children().await;
    }

    async fn drain_children(self: &Arc<Frame>) {
        loop {
            let next = self.children.lock().pop();
            let Some(child) = next else { break };
            Box::pin(child.destroy(None)).await;
        }
    }

    fn take_crash(&self) -> Option<OperationError> {
        self.crash.lock().clone()
    }
}
