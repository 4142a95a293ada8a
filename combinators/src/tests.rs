use std::time::Duration;

use controller::{operation, value};
use task::{spawn_root, IdAllocator, Scope, Task, TaskContext, TaskOptions};

use super::{all, call, race, with_timeout, Callable};

fn test_ctx() -> TaskContext {
    TaskContext {
        ids: IdAllocator::new(),
        executor: rt_executor::Runtime::new(),
    }
}

fn sleeping_op(millis: u64, result: i32) -> Box<dyn task::ScopedBody<i32>> {
    Box::new(move |_scope: Scope| {
        operation(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(result)
        })
    })
}

#[tokio::test]
async fn race_yields_the_fastest_result_and_halts_the_rest() {
    let root: Task<i32> = spawn_root(
        test_ctx(),
        |scope: Scope| operation(async move { race(&scope, vec![sleeping_op(30, 1), sleeping_op(2, 2)]).await }),
        TaskOptions::default(),
    );
    assert_eq!(root.await.unwrap(), 2);
}

#[tokio::test]
async fn all_resolves_with_every_result_in_input_order() {
    let root: Task<Vec<i32>> = spawn_root(
        test_ctx(),
        |scope: Scope| operation(async move { all(&scope, vec![sleeping_op(10, 1), sleeping_op(1, 2), sleeping_op(5, 3)]).await }),
        TaskOptions::default(),
    );
    assert_eq!(root.await.unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn all_rejects_and_halts_outstanding_operands_on_first_error() {
    let failing: Box<dyn task::ScopedBody<i32>> = Box::new(|_scope: Scope| {
        operation(async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Err(frame::OperationError::msg("boom"))
        })
    });

    let root: Task<Vec<i32>> = spawn_root(
        test_ctx(),
        |scope: Scope| operation(async move { all(&scope, vec![sleeping_op(50, 1), failing]).await }),
        TaskOptions::default(),
    );

    match root.await {
        Err(task::TaskError::Operation(e)) => assert_eq!(e.to_string(), "boom"),
        other => panic!("expected the first error to reject `all`, got {other:?}"),
    }
}

#[tokio::test]
async fn with_timeout_returns_the_operations_value_when_it_finishes_first() {
    let root: Task<i32> = spawn_root(
        test_ctx(),
        |scope: Scope| operation(async move { with_timeout(&scope, Duration::from_millis(50), sleeping_op(1, 7)).await }),
        TaskOptions::default(),
    );
    assert_eq!(root.await.unwrap(), 7);
}

#[tokio::test]
async fn with_timeout_surfaces_a_timeout_error_when_the_operation_is_slower() {
    let root: Task<i32> = spawn_root(
        test_ctx(),
        |scope: Scope| operation(async move { with_timeout(&scope, Duration::from_millis(1), sleeping_op(50, 7)).await }),
        TaskOptions::default(),
    );
    match root.await {
        Err(task::TaskError::Operation(e)) => assert_eq!(e.to_string(), "operation timed out"),
        other => panic!("expected a timeout error, got {other:?}"),
    }
}

#[tokio::test]
async fn call_adapts_a_plain_value() {
    let root: Task<i32> = spawn_root(
        test_ctx(),
        |scope: Scope| operation(async move { call(&scope, Callable::Value(5)).await }),
        TaskOptions::default(),
    );
    assert_eq!(root.await.unwrap(), 5);
}

#[tokio::test]
async fn call_adapts_a_rejecting_promise() {
    let root: Task<i32> = spawn_root(
        test_ctx(),
        |scope: Scope| {
            operation(async move {
                call(
                    &scope,
                    Callable::Promise(Box::pin(async { Err(frame::OperationError::msg("rejected")) })),
                )
                .await
            })
        },
        TaskOptions::default(),
    );
    match root.await {
        Err(task::TaskError::Operation(e)) => assert_eq!(e.to_string(), "rejected"),
        other => panic!("expected the promise's rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn call_runs_a_spawn_variant_in_a_child_scope() {
    let root: Task<i32> = spawn_root(
        test_ctx(),
        |scope: Scope| {
            operation(async move {
                call(&scope, Callable::Spawn(Box::new(|_s: Scope| value(11)))).await
            })
        },
        TaskOptions::default(),
    );
    assert_eq!(root.await.unwrap(), 11);
}
