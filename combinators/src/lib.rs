// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default)]

//! The higher-order combinators of §4.6: `race`, `all`, `withTimeout`, and the `call` adapter.
//! Each spawns its operands as ordinary children of the caller and leans on `Task::halt`/`Scope`
//! rather than any bespoke cancellation machinery — a racing loser is halted exactly the way a
//! parent halts any other non-`blockParent` child.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use frame::{Operation, OperationError};
use task::{Scope, ScopedBody, Task, TaskError, TaskOptions};

fn task_result_into_operation_result<T>(result: Result<T, TaskError>) -> Result<T, OperationError> {
    match result {
        Ok(value) => Ok(value),
        Err(TaskError::Operation(e)) => Err(e),
        Err(TaskError::Halted) => Err(OperationError::msg("task was halted before it settled")),
    }
}

/// Spawns every operand as a child of `caller`; the first to settle (value or error) wins, and
/// every other operand is halted before `race` returns.
pub async fn race<T: Send + 'static>(
    caller: &Scope,
    ops: Vec<Box<dyn ScopedBody<T>>>,
) -> Result<T, OperationError> {
    let tasks: Vec<Task<T>> = ops.into_iter().map(|op| caller.spawn(op, TaskOptions::default())).collect();
    let scopes: Vec<Scope> = tasks.iter().map(Task::scope).collect();

    let indexed: Vec<Pin<Box<dyn Future<Output = (usize, Result<T, TaskError>)> + Send>>> = tasks
        .into_iter()
        .enumerate()
        .map(|(index, task)| Box::pin(async move { (index, task.await) }) as _)
        .collect();

    let ((winner_index, outcome), _, _remaining) = futures::future::select_all(indexed).await;
    log::trace!("race: operand {winner_index} settled first, halting the rest");

    for (index, scope) in scopes.into_iter().enumerate() {
        if index != winner_index {
            scope.halt().await;
        }
    }
    task_result_into_operation_result(outcome)
}

/// Spawns every operand as a child of `caller`; resolves with every result in input order once
/// all have completed, or halts whatever is still outstanding and rejects as soon as any operand
/// errors.
pub async fn all<T: Send + 'static>(caller: &Scope, ops: Vec<Box<dyn ScopedBody<T>>>) -> Result<Vec<T>, OperationError> {
    let tasks: Vec<Task<T>> = ops.into_iter().map(|op| caller.spawn(op, TaskOptions::default())).collect();
    let scopes: Vec<Scope> = tasks.iter().map(Task::scope).collect();

    let mut pending: Vec<Pin<Box<dyn Future<Output = (usize, Result<T, TaskError>)> + Send>>> = tasks
        .into_iter()
        .enumerate()
        .map(|(index, task)| Box::pin(async move { (index, task.await) }) as _)
        .collect();

    let mut results: Vec<Option<T>> = (0..scopes.len()).map(|_| None).collect();
    let mut failure: Option<OperationError> = None;

    while !pending.is_empty() {
        let ((index, outcome), _, remaining) = futures::future::select_all(pending).await;
        pending = remaining;
        match outcome {
            Ok(value) => results[index] = Some(value),
            Err(TaskError::Operation(e)) => {
                failure = Some(e);
                break;
            }
            Err(TaskError::Halted) => {
                failure = Some(OperationError::msg("task was halted before it settled"));
                break;
            }
        }
    }

    if let Some(err) = failure {
        log::debug!("all: an operand failed, halting the remaining outstanding operands");
        for scope in scopes {
            // A no-op for operands that already completed; halts whatever is still running.
            scope.halt().await;
        }
        return Err(err);
    }

    Ok(results
        .into_iter()
        .map(|r| r.expect("every operand settled with a value on the success path"))
        .collect())
}

/// Races `op` against a timer; whichever settles first wins, the other is halted. A timeout is
/// surfaced as an ordinary `OperationError`, the same way a slower racer in `race` is.
pub async fn with_timeout<T: Send + 'static>(
    caller: &Scope,
    duration: Duration,
    op: Box<dyn ScopedBody<T>>,
) -> Result<T, OperationError> {
    let timer: Box<dyn ScopedBody<T>> = Box::new(move |_scope: Scope| {
        controller::operation(async move {
            tokio::time::sleep(duration).await;
            Err(OperationError::msg("operation timed out"))
        })
    });
    race(caller, vec![op, timer]).await
}

/// The three concrete shapes `call(x)` can adapt a foreign asynchronous value from (§6, §8
/// property 8). Rust's static typing makes the source's fourth case — a function returning
/// another function — collapse into `Spawn`: a `ScopedBody` already just produces the operation
/// to run, so there is nothing further to re-enter.
pub enum Callable<T: Send + 'static> {
    /// Already resolved.
    Value(T),
    /// A foreign future, adapted as one opaque instruction.
    Promise(Operation<T>),
    /// A function producing an operation, run to completion in a new child scope of the caller.
    Spawn(Box<dyn ScopedBody<T>>),
}

pub async fn call<T: Send + 'static>(caller: &Scope, callable: Callable<T>) -> Result<T, OperationError> {
    match callable {
        Callable::Value(value) => Ok(value),
        Callable::Promise(future) => future.await,
        Callable::Spawn(body) => {
            let child = caller.spawn(body, TaskOptions::default());
            task_result_into_operation_result(child.await)
        }
    }
}

#[cfg(test)]
mod tests;
