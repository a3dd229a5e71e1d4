use std::future::Future;
use std::sync::{Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;

type Tail = Shared<BoxFuture<'static, ()>>;

/// FIFO chain of asynchronous operations.
///
/// An operation's slot is taken when [`SerialQueue::enqueue`] is called, not
/// when the returned future is first polled. Each operation starts only after
/// its predecessor has settled. A failed, cancelled or dropped operation
/// releases its slot like a successful one.
pub struct SerialQueue {
    tail: Mutex<Tail>,
}

impl Default for SerialQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialQueue {
    pub fn new() -> Self {
        Self {
            tail: Mutex::new(futures::future::ready(()).boxed().shared()),
        }
    }

    pub fn enqueue<F>(&self, op: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        let (done_tx, done_rx) = oneshot::channel::<()>();

        let previous = {
            let mut tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = tail.clone();
            let chained = previous.clone();
            *tail = async move {
                chained.await;
                // Err means the entry was dropped; the slot is free either way.
                let _ = done_rx.await;
            }
            .boxed()
            .shared();
            previous
        };

        async move {
            previous.await;
            let out = op.await;
            let _ = done_tx.send(());
            out
        }
    }
}
