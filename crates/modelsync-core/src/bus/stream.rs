// ── Async message streams ──
//
// Bridge from the callback bus to async consumers: a subscription that
// forwards every matching message into an unbounded channel.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::message::Message;
use super::subscription::SubscriptionHandle;

/// Stream of messages matching one filter.
///
/// Owns its subscription: dropping the stream disposes it.
pub struct MessageStream<M: Message> {
    inner: UnboundedReceiverStream<M>,
    handle: SubscriptionHandle,
}

impl<M: Message> MessageStream<M> {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<M>, handle: SubscriptionHandle) -> Self {
        Self {
            inner: UnboundedReceiverStream::new(receiver),
            handle,
        }
    }

    /// Wait for the next message. Returns `None` once the subscription has
    /// been disposed (e.g. by `MessageBus::clear_all`) and the backlog is
    /// drained.
    pub async fn recv(&mut self) -> Option<M> {
        self.inner.as_mut().recv().await
    }

    /// Take a message if one is already buffered.
    pub fn try_recv(&mut self) -> Option<M> {
        self.inner.as_mut().try_recv().ok()
    }

    pub fn subscription(&self) -> &SubscriptionHandle {
        &self.handle
    }
}

impl<M: Message> Stream for MessageStream<M> {
    type Item = M;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // UnboundedReceiverStream is Unpin.
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
