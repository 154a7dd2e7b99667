//! Change notifications as a `futures` stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::stream::{FusedStream, Stream, StreamExt};

use crate::error::Error;
use crate::signal::Readable;
use crate::storage::Subscription;

/// Stream of the values a cell takes on, created by [`Readable::changes`].
///
/// Values are buffered in an unbounded channel, so a slow consumer sees every
/// change in order. Dropping the stream unsubscribes from the cell.
pub struct Changes<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    subscription: Subscription,
}

impl<T: Clone + 'static> Changes<T> {
    pub(crate) fn new<R: Readable<T>>(source: &R) -> Result<Self, Error> {
        let (sender, receiver) = mpsc::unbounded::<T>();
        let subscription = source.observe(move |new: &T, _: &T| {
            // Ignore errors - the receiver is only gone once the stream is dropped.
            let _ = sender.unbounded_send(new.clone());
        })?;
        Ok(Self {
            receiver,
            subscription,
        })
    }
}

impl<T> Stream for Changes<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.receiver.poll_next_unpin(cx)
    }
}

impl<T> FusedStream for Changes<T> {
    fn is_terminated(&self) -> bool {
        self.receiver.is_terminated()
    }
}

impl<T> Drop for Changes<T> {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}
