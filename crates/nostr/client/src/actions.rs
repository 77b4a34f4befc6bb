//! One-shot helpers on top of a connected [`RelayConnection`].

use futures_util::Stream;
use futures_util::stream;
use nostr::{Event, Filter};
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::relay::RelayConnection;
use crate::subscription::{Subscription, SubscriptionMessage};

/// Collect the relay's stored events for `filters`, up to `EOSE`.
///
/// The subscription is closed afterwards whether or not collection succeeded.
pub async fn fetch_events(relay: &RelayConnection, filters: Vec<Filter>) -> Result<Vec<Event>> {
    let mut subscription = relay.subscribe(filters).await?;
    let collected = collect_until_eose(&mut subscription).await;
    close_quietly(relay, subscription.id()).await;
    collected
}

async fn collect_until_eose(subscription: &mut Subscription) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    loop {
        match subscription.recv().await {
            Some(SubscriptionMessage::Event(event)) => events.push(event),
            Some(SubscriptionMessage::Eose) | None => return Ok(events),
            Some(SubscriptionMessage::Closed(reason)) => {
                return Err(ClientError::Subscription(reason));
            }
            Some(SubscriptionMessage::ConnectionClosed) => {
                return Err(ClientError::ConnectionClosed);
            }
        }
    }
}

/// Stream stored and then live events for `filters`.
///
/// The stream ends after yielding an error when the relay closes the
/// subscription or the connection is lost.
/// Dropping the stream closes the subscription.
pub async fn stream_events<'a>(
    relay: &'a RelayConnection,
    filters: Vec<Filter>,
) -> Result<impl Stream<Item = Result<Event>> + 'a> {
    let subscription = relay.subscribe(filters).await?;

    Ok(stream::unfold(Some((relay, subscription)), |state| async move {
        let (relay, mut subscription) = state?;
        match subscription.next_event().await {
            Ok(Some(event)) => Some((Ok(event), Some((relay, subscription)))),
            Ok(None) => None,
            Err(error) => {
                close_quietly(relay, subscription.id()).await;
                Some((Err(error), None))
            }
        }
    }))
}

async fn close_quietly(relay: &RelayConnection, subscription_id: &str) {
    if let Err(error) = relay.unsubscribe(subscription_id).await {
        debug!(relay = %relay.url(), subscription_id, %error, "unsubscribe after fetch failed");
    }
}
