//! Subscription handles for receiving routed relay frames.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use nostr::{Event, Filter};
use tokio::sync::mpsc;

use crate::error::{ClientError, Result};

/// A frame routed to one subscription, in relay order.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionMessage {
    Event(Event),
    /// Stored events are exhausted; live events may follow.
    Eose,
    /// The relay closed the subscription with this reason.
    Closed(String),
    /// The connection went away.
    ConnectionClosed,
}

/// Receiving end of a subscription opened with
/// [`RelayConnection::subscribe`](crate::RelayConnection::subscribe).
///
/// The channel is unbounded so the routing task never blocks on a slow
/// consumer and no frame is dropped. It ends after a `Closed` or
/// `ConnectionClosed` message, or once the subscription is unsubscribed.
///
/// Dropping the handle closes the subscription: the connection forgets the
/// route and sends `CLOSE` unless it is already gone.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    filters: Vec<Filter>,
    rx: mpsc::UnboundedReceiver<SubscriptionMessage>,
    eose_received: bool,
    on_drop: Option<mpsc::UnboundedSender<String>>,
}

impl Subscription {
    /// `on_drop` receives the id when the handle is dropped.
    pub(crate) fn new(
        id: String,
        filters: Vec<Filter>,
        rx: mpsc::UnboundedReceiver<SubscriptionMessage>,
        on_drop: Option<mpsc::UnboundedSender<String>>,
    ) -> Self {
        Self {
            id,
            filters,
            rx,
            eose_received: false,
            on_drop,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Whether an EOSE has been observed through this handle.
    pub fn has_eose(&self) -> bool {
        self.eose_received
    }

    /// Next routed frame, or `None` once the subscription is gone.
    pub async fn recv(&mut self) -> Option<SubscriptionMessage> {
        let message = self.rx.recv().await;
        if matches!(message, Some(SubscriptionMessage::Eose)) {
            self.eose_received = true;
        }
        message
    }

    /// Next event, skipping EOSE markers.
    ///
    /// A relay `CLOSED` surfaces as [`ClientError::Subscription`] and loss of
    /// the connection as [`ClientError::ConnectionClosed`].
    pub async fn next_event(&mut self) -> Result<Option<Event>> {
        loop {
            match self.recv().await {
                Some(SubscriptionMessage::Event(event)) => return Ok(Some(event)),
                Some(SubscriptionMessage::Eose) => {}
                Some(SubscriptionMessage::Closed(reason)) => {
                    return Err(ClientError::Subscription(reason));
                }
                Some(SubscriptionMessage::ConnectionClosed) => {
                    return Err(ClientError::ConnectionClosed);
                }
                None => return Ok(None),
            }
        }
    }
}

impl Stream for Subscription {
    type Item = SubscriptionMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.rx.poll_recv(cx);
        if let Poll::Ready(Some(SubscriptionMessage::Eose)) = &polled {
            self.eose_received = true;
        }
        polled
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            // The connection may already be torn down.
            let _ = on_drop.send(std::mem::take(&mut self.id));
        }
    }
}
