//! Future adapter over the fake timeout primitive.
//!
//! Replaces the source environment's promisified set-timeout: the scheduler
//! arms an ordinary fake timeout whose callback resolves the future, so the
//! timer obeys the same virtual clock, ordering, and lifecycle rules as any
//! other timeout.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::error::{Error, Result};

/// Resolves with its value when the backing fake timeout fires.
///
/// Created by
/// [`FakeScheduler::timeout_future`](crate::scheduler::FakeScheduler::timeout_future).
/// If the timer is cleared, reset, or disposed before firing, polling yields
/// [`Error::TimeoutDropped`].
#[must_use = "futures do nothing unless polled"]
pub struct TimeoutFuture<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> TimeoutFuture<T> {
    pub(crate) fn new(receiver: oneshot::Receiver<T>) -> Self {
        Self { receiver }
    }
}

impl<T> Future for TimeoutFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(Ok(value)),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(Error::TimeoutDropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}
