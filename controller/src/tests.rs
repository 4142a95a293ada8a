use frame::{Exit, Frame, OperationError};

use super::{operation, promise, value, Controller, FnBody};

#[tokio::test]
async fn value_body_settles_immediately() {
    let frame = Frame::new();
    let body = Box::new(FnBody::new(|| value(7)));
    match Controller::run(&frame, body).await {
        Exit::Completed(v) => assert_eq!(v, 7),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn operation_body_runs_async_work() {
    let frame = Frame::new();
    let body = Box::new(FnBody::new(|| {
        operation(async {
            tokio::task::yield_now().await;
            Ok(3 + 4)
        })
    }));
    match Controller::run(&frame, body).await {
        Exit::Completed(v) => assert_eq!(v, 7),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn promise_body_rejection_surfaces_as_failed() {
    let frame = Frame::new();
    let body: Box<dyn super::Body<i32>> =
        Box::new(FnBody::new(|| promise(async { Err(OperationError::msg("nope")) })));
    match Controller::run(&frame, body).await {
        Exit::Failed(e) => assert_eq!(e.to_string(), "nope"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn halting_a_promise_body_drops_it() {
    let frame = Frame::new();
    let body: Box<dyn super::Body<i32>> =
        Box::new(FnBody::new(|| promise(std::future::pending())));

    let frame2 = frame.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        frame2.destroy(None).await;
    });

    match Controller::run(&frame, body).await {
        Exit::Aborted => {}
        other => panic!("unexpected {other:?}"),
    }
}
