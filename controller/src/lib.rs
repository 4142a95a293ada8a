// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default)]

//! Adapts a user-supplied body to the evaluator's `Operation` protocol.
//!
//! Three kinds of body are recognized, mirroring the source's generator/promise/plain-value
//! trichotomy. In this runtime all three end up as a boxed future, so the distinction that
//! survives into Rust is about how each kind is expected to behave under halt rather than how it
//! is driven: an `Operation` body is written to cooperate with interruption (it may keep yielding
//! instructions, e.g. `ensure` cleanup, even after abort is observed); a `Promise` body is an
//! opaque foreign future that the evaluator can only drop and hope cancels itself; a `Value` body
//! never suspends at all.

use std::future::Future;
use std::sync::Arc;

use frame::{Exit, Frame, Operation, OperationError};

/// The classified form of a body, after `Controller::classify` has been applied once.
pub enum BodyOutcome<T: Send + 'static> {
    /// Drives the evaluator frame directly; free to yield further instructions after an abort is
    /// observed (e.g. to run `ensure` cleanup) before finally unwinding.
    Operation(Operation<T>),
    /// A single foreign asynchronous value, treated as one opaque `action` instruction: settling
    /// resolves or rejects the task, halting before it settles just drops it.
    Promise(Operation<T>),
    /// Already resolved: settles without ever suspending.
    Value(T),
}

impl<T: Send + 'static> BodyOutcome<T> {
    fn into_operation(self) -> Operation<T> {
        match self {
            BodyOutcome::Operation(op) => op,
            BodyOutcome::Promise(op) => op,
            BodyOutcome::Value(v) => Box::pin(std::future::ready(Ok(v))),
        }
    }
}

/// A user body, dispatched by invoking it once and classifying what comes back (§4.4).
pub trait Body<T: Send + 'static>: Send + 'static {
    fn invoke(self: Box<Self>) -> BodyOutcome<T>;
}

/// Wraps a plain closure producing a classified outcome as a `Body`.
pub struct FnBody<T, F>(F, std::marker::PhantomData<T>)
where
    T: Send + 'static,
    F: FnOnce() -> BodyOutcome<T> + Send + 'static;

impl<T, F> FnBody<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> BodyOutcome<T> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        FnBody(f, std::marker::PhantomData)
    }
}

impl<T, F> Body<T> for FnBody<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> BodyOutcome<T> + Send + 'static,
{
    fn invoke(self: Box<Self>) -> BodyOutcome<T> {
        (self.0)()
    }
}

/// Builds an [`Operation`]-kind outcome from an async block that itself yields further
/// instructions (spawns, ensures, resource inits) via a `TaskHandle`.
pub fn operation<T, F>(fut: F) -> BodyOutcome<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T, OperationError>> + Send + 'static,
{
    BodyOutcome::Operation(Box::pin(fut))
}

/// Builds a [`Promise`](BodyOutcome::Promise)-kind outcome from a foreign future that does not
/// cooperate with interruption.
pub fn promise<T, F>(fut: F) -> BodyOutcome<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T, OperationError>> + Send + 'static,
{
    BodyOutcome::Promise(Box::pin(fut))
}

/// Builds a [`Value`](BodyOutcome::Value)-kind outcome that resolves immediately.
pub fn value<T: Send + 'static>(v: T) -> BodyOutcome<T> {
    BodyOutcome::Value(v)
}

/// Drives a classified body to completion on `frame`.
pub struct Controller;

impl Controller {
    pub async fn run<T: Send + 'static>(frame: &Arc<Frame>, body: Box<dyn Body<T>>) -> Exit<T> {
        let outcome = body.invoke();
        log::trace!(
            "controller dispatching a {} body",
            match &outcome {
                BodyOutcome::Operation(_) => "operation",
                BodyOutcome::Promise(_) => "promise",
                BodyOutcome::Value(_) => "value",
            }
        );
        frame.run(outcome.into_operation()).await
    }
}

#[cfg(test)]
mod tests;
