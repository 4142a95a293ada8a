// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default)]

//! `yield* resource` (§4.5): runs a resource's `init` in a dedicated child frame rooted at an
//! *outer* scope rather than the calling task itself, so cleanup registered with
//! `outer_scope.ensure` outlives a short-lived caller and only fires when the outer scope
//! terminates.

use frame::{Exit, Operation, OperationError};
use task::Scope;

/// An entity that produces a value usable after `init` returns, registering any cleanup on the
/// `scope` it is handed rather than holding it itself.
pub trait Resource<T: Send + 'static>: Send + 'static {
    fn init(self: Box<Self>, scope: Scope) -> Operation<T>;
}

impl<T, F, Fut> Resource<T> for F
where
    T: Send + 'static,
    F: FnOnce(Scope) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<T, OperationError>> + Send + 'static,
{
    fn init(self: Box<Self>, scope: Scope) -> Operation<T> {
        Box::pin((*self)(scope))
    }
}

/// Runs `resource.init` to produce the value a caller sees from `yield* resource`.
///
/// The owning scope is `caller.options().resource_scope`, defaulting to `caller` itself (§4.5
/// "defaulting to the caller"). `init` runs in a new frame that is a child of that owning scope's
/// own evaluator frame: destroying the owner tears down an `init` still in flight, but a caller
/// that simply moves on after `init` returns does not affect it.
pub async fn acquire<T, R>(caller: &Scope, resource: R) -> Result<T, OperationError>
where
    T: Send + 'static,
    R: Resource<T>,
{
    let owner = caller.options().resource_scope.unwrap_or_else(|| caller.clone());
    log::trace!("acquiring resource, owner is caller's own scope: {}", owner.id() == caller.id());
    let frame = owner.child_frame();
    let operation = Box::new(resource).init(owner);
    match frame.run(operation).await {
        Exit::Completed(value) => Ok(value),
        Exit::Failed(err) => Err(err),
        Exit::Aborted => Err(OperationError::msg("resource init aborted")),
        Exit::Crashed(err) => Err(err),
    }
}

#[cfg(test)]
mod tests;
