use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use relay_core::{SegmentError, SegmentResult};
use tokio::sync::oneshot;

enum State<T> {
    Ready(Option<SegmentResult<T>>),
    Pending(oneshot::Receiver<SegmentResult<T>>),
}

/// The outcome of a split, merge or release request.
///
/// The request is delivered as soon as the operation is created and is
/// applied by the owning worker at its next safe point, whether or not this
/// future is awaited.
#[must_use = "the result of the segment operation is only observable by awaiting it"]
pub struct SegmentOperation<T> {
    state: State<T>,
}

impl<T> SegmentOperation<T> {
    pub(crate) fn ready(result: SegmentResult<T>) -> Self {
        Self {
            state: State::Ready(Some(result)),
        }
    }

    pub(crate) fn pending(receiver: oneshot::Receiver<SegmentResult<T>>) -> Self {
        Self {
            state: State::Pending(receiver),
        }
    }
}

impl<T: Unpin> Future for SegmentOperation<T> {
    type Output = SegmentResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            State::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(SegmentError::Cancelled)))
            }
            State::Pending(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|result| result.unwrap_or(Err(SegmentError::Cancelled))),
        }
    }
}
