use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use controller::operation;
use frame::OperationError;
use task::{spawn_root, IdAllocator, Scope, Task, TaskContext, TaskOptions};

use super::acquire;

fn test_ctx() -> TaskContext {
    TaskContext {
        ids: IdAllocator::new(),
        executor: rt_executor::Runtime::new(),
    }
}

#[tokio::test]
async fn cleanup_fires_on_the_owning_scope_not_the_short_lived_caller() {
    let closed = Arc::new(AtomicBool::new(false));
    let closed_in_resource = closed.clone();
    let closed_after_caller = closed.clone();

    let root: Task<i32> = spawn_root(
        test_ctx(),
        move |root_scope: Scope| {
            operation(async move {
                let mut inner_options = TaskOptions::default();
                inner_options.resource_scope = Some(root_scope.clone());

                let inner: Task<i32> = root_scope.spawn(
                    move |caller: Scope| {
                        operation(async move {
                            let value = acquire(&caller, move |owner: Scope| {
                                let closed = closed_in_resource.clone();
                                async move {
                                    owner.ensure(move || closed.store(true, Ordering::SeqCst));
                                    Ok(99)
                                }
                            })
                            .await?;
                            Ok(value)
                        })
                    },
                    inner_options,
                );

                let value = inner.await.map_err(|_| OperationError::msg("inner task failed"))?;
                // The caller (`inner`) has just completed; the owning scope (`root_scope`) has
                // not, so `close` must not have run yet.
                assert!(
                    !closed_after_caller.load(Ordering::SeqCst),
                    "cleanup ran before the owning scope terminated"
                );
                Ok(value)
            })
        },
        TaskOptions::default(),
    );

    assert_eq!(root.await.unwrap(), 99);
    assert!(closed.load(Ordering::SeqCst), "cleanup never ran once the owning scope terminated");
}

#[tokio::test]
async fn init_error_becomes_the_callers_error() {
    let root: Task<()> = spawn_root(
        test_ctx(),
        |scope: Scope| {
            operation(async move {
                let _: i32 = acquire(&scope, |_owner: Scope| async { Err(OperationError::msg("init failed")) }).await?;
                Ok(())
            })
        },
        TaskOptions::default(),
    );

    match root.await {
        Err(task::TaskError::Operation(e)) => assert_eq!(e.to_string(), "init failed"),
        other => panic!("expected the init error to propagate, got {other:?}"),
    }
}
