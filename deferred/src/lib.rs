// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]

//! A one-shot producer/consumer of a settled result.
//!
//! `Deferred` is the primitive the rest of the kernel uses to hand a value from the code that
//! eventually produces it (a Frame exit, a Controller settle) to the possibly-many places that
//! are waiting to observe it (a consumer `await`ing a Task, a `poll`-style caller). It is built
//! the same way as a cancellable broadcast value: a `tokio::sync::watch` channel carries the
//! settled `Option<T>`, so any number of clones of the receiver can observe the same settlement,
//! and a receiver whose sender was dropped without ever sending sees that as `None` rather than
//! hanging forever.

use std::sync::{Arc, Weak};

use tokio::sync::watch;

/// The producer half of a [`Deferred`]. `settle` consumes it, so a value can only be produced
/// once; the type system rules out a second settlement rather than relying on a runtime check.
pub struct DeferredSender<T: Clone + Send + Sync + 'static> {
    sender: watch::Sender<Option<T>>,
}

impl<T: Clone + Send + Sync + 'static> DeferredSender<T> {
    /// Settle this `Deferred` with a final value. Any outstanding or future receivers observe it.
    pub fn settle(self, value: T) {
        // A `send` error means every receiver was dropped; there is nobody left to notify.
        let _ = self.sender.send(Some(value));
    }

    /// True if every receiver (including the one returned alongside this sender) has been
    /// dropped, meaning nobody can ever observe a settlement.
    pub fn is_abandoned(&self) -> bool {
        self.sender.receiver_count() == 0
    }
}

/// The consumer half of a [`Deferred`]. Cheap to clone; every clone observes the same
/// settlement.
#[derive(Clone)]
pub struct DeferredReceiver<T: Clone + Send + Sync + 'static> {
    receiver: Arc<watch::Receiver<Option<T>>>,
}

impl<T: Clone + Send + Sync + 'static> DeferredReceiver<T> {
    /// Wait for the value to be settled, or `None` if the sender was dropped without settling
    /// (the producer was canceled or panicked before reaching a result).
    pub async fn recv(&self) -> Option<T> {
        let mut receiver = (*self.receiver).clone();
        loop {
            if let Some(value) = receiver.borrow().as_ref() {
                return Some(value.clone());
            }
            if receiver.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Non-blocking: the value if it has already settled.
    pub fn peek(&self) -> Option<T> {
        self.receiver.borrow().clone()
    }

    /// A weak handle that does not keep the channel's receiver count above zero. Used by callers
    /// that want to know whether anybody is still listening without themselves counting as a
    /// listener (e.g. a Task that wants to drop its own bookkeeping handle to its result).
    pub fn downgrade(&self) -> WeakDeferredReceiver<T> {
        WeakDeferredReceiver {
            receiver: Arc::downgrade(&self.receiver),
        }
    }
}

/// A non-owning handle to a [`DeferredReceiver`]; upgrading fails once every strong receiver has
/// been dropped.
pub struct WeakDeferredReceiver<T: Clone + Send + Sync + 'static> {
    receiver: Weak<watch::Receiver<Option<T>>>,
}

impl<T: Clone + Send + Sync + 'static> WeakDeferredReceiver<T> {
    pub fn upgrade(&self) -> Option<DeferredReceiver<T>> {
        self.receiver
            .upgrade()
            .map(|receiver| DeferredReceiver { receiver })
    }
}

/// Creates a new, unsettled `Deferred`, returning its producer and consumer halves.
pub fn new<T: Clone + Send + Sync + 'static>() -> (DeferredSender<T>, DeferredReceiver<T>) {
    let (sender, receiver) = watch::channel(None);
    (
        DeferredSender { sender },
        DeferredReceiver {
            receiver: Arc::new(receiver),
        },
    )
}

#[cfg(test)]
mod tests;
