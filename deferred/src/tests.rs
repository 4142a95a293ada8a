use super::new;

#[tokio::test]
async fn settle_then_recv() {
    let (sender, receiver) = new::<u32>();
    sender.settle(42);
    assert_eq!(receiver.recv().await, Some(42));
}

#[tokio::test]
async fn recv_then_settle() {
    let (sender, receiver) = new::<u32>();
    let recv_receiver = receiver.clone();
    let handle = tokio::spawn(async move { recv_receiver.recv().await });
    sender.settle(7);
    assert_eq!(handle.await.unwrap(), Some(7));
}

#[tokio::test]
async fn dropped_sender_without_settling_yields_none() {
    let (sender, receiver) = new::<u32>();
    drop(sender);
    assert_eq!(receiver.recv().await, None);
}

#[tokio::test]
async fn multiple_receivers_all_observe_settlement() {
    let (sender, receiver) = new::<&'static str>();
    let a = receiver.clone();
    let b = receiver.clone();
    sender.settle("done");
    assert_eq!(a.recv().await, Some("done"));
    assert_eq!(b.recv().await, Some("done"));
}

#[tokio::test]
async fn peek_is_none_until_settled() {
    let (sender, receiver) = new::<u32>();
    assert_eq!(receiver.peek(), None);
    sender.settle(1);
    assert_eq!(receiver.peek(), Some(1));
}

#[tokio::test]
async fn weak_receiver_upgrades_while_strong_receiver_lives() {
    let (sender, receiver) = new::<u32>();
    let weak = receiver.downgrade();
    assert!(weak.upgrade().is_some());
    sender.settle(5);
    drop(receiver);
    assert!(weak.upgrade().is_none());
}
