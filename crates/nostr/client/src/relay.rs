//! Single relay connection management.
//!
//! One routing task owns the read half of the transport. It parses every
//! inbound frame once, resolves `OK` acknowledgements against pending
//! publishes, routes `EVENT`/`EOSE`/`CLOSED` to the owning subscription and
//! forwards the frame to the [`Listener`] if one exists. The same task closes
//! subscriptions whose handles were dropped. Writes go through a single lock
//! so frames from concurrent callers never interleave.
//!
//! All per-connection state lives in [`Shared`] and is torn down in one step
//! when the transport is lost or the caller disconnects: pending publishes
//! fail with [`ClientError::ConnectionClosed`], every subscription receives
//! [`SubscriptionMessage::ConnectionClosed`], and the listener ends.

use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, RelayMessage};
use crate::relay_url::RelayUrl;
use crate::subscription::{Subscription, SubscriptionMessage};
use crate::transport::{FrameSink, FrameStream, Transport, WebSocketTransport};
use futures_util::{SinkExt, Stream, StreamExt};
use nostr::{AUTH_KIND, Event, Filter, matches_any, validate_event};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Publish confirmation from a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishConfirmation {
    pub relay_url: String,
    pub event_id: String,
    pub accepted: bool,
    pub message: String,
}

impl PublishConfirmation {
    /// Turn an explicit rejection into [`ClientError::Rejected`].
    pub fn into_result(self) -> Result<Self> {
        if self.accepted {
            Ok(self)
        } else {
            Err(ClientError::Rejected {
                event_id: self.event_id,
                message: self.message,
            })
        }
    }
}

/// Relay connection configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub connect_timeout: Duration,
    /// How long `publish`/`authenticate` wait for the matching `OK`.
    pub publish_timeout: Duration,
    /// Validate inbound events and check them against the subscription filters.
    pub verify_events: bool,
    /// SOCKS5 proxy address, used for `.onion` relays.
    pub proxy: Option<String>,
    /// Send clearnet relays through `proxy` as well.
    pub proxy_all: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(10),
            verify_events: true,
            proxy: None,
            proxy_all: false,
        }
    }
}

type AckSender = oneshot::Sender<PublishConfirmation>;

struct SubscriptionRoute {
    filters: Vec<Filter>,
    tx: mpsc::UnboundedSender<SubscriptionMessage>,
}

/// State owned by one connection and shared with its routing task.
struct Shared {
    relay_url: String,
    verify_events: bool,
    state: RwLock<ConnectionState>,
    writer: Mutex<Option<FrameSink>>,
    pending: Mutex<HashMap<String, Vec<AckSender>>>,
    subscriptions: Mutex<HashMap<String, SubscriptionRoute>>,
    listener: Mutex<Option<mpsc::UnboundedSender<RelayMessage>>>,
    listener_started: AtomicBool,
    auth_challenge: RwLock<Option<String>>,
    /// Handed to every subscription of the current connection; receives the
    /// id of each dropped handle.
    dropped: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl Shared {
    async fn teardown(&self) {
        *self.state.write().await = ConnectionState::Disconnected;
        self.writer.lock().await.take();

        // Dropping the senders fails every waiting publish.
        let pending = std::mem::take(&mut *self.pending.lock().await);
        if !pending.is_empty() {
            debug!(relay = %self.relay_url, count = pending.len(), "failing pending acknowledgements");
        }
        drop(pending);

        let routes = std::mem::take(&mut *self.subscriptions.lock().await);
        for (_, route) in routes {
            let _ = route.tx.send(SubscriptionMessage::ConnectionClosed);
        }

        self.listener.lock().await.take();
        self.auth_challenge.write().await.take();
        self.dropped.lock().await.take();
    }

    /// Forget a route whose handle was dropped and tell the relay. Routes that
    /// were already unsubscribed or closed are left alone.
    async fn close_dropped(&self, subscription_id: &str) {
        if self.subscriptions.lock().await.remove(subscription_id).is_none() {
            return;
        }
        debug!(relay = %self.relay_url, subscription_id, "closing dropped subscription");

        let frame = match (ClientMessage::Close {
            subscription_id: subscription_id.to_string(),
        })
        .to_json()
        {
            Ok(frame) => frame,
            Err(error) => {
                warn!(relay = %self.relay_url, subscription_id, %error, "failed to encode CLOSE");
                return;
            }
        };
        if let Some(sink) = self.writer.lock().await.as_mut()
            && let Err(error) = sink.send(frame).await
        {
            debug!(relay = %self.relay_url, subscription_id, %error, "CLOSE for dropped subscription failed");
        }
    }

    /// Route one inbound frame. Returns the message if it should reach the listener.
    async fn dispatch(&self, text: &str) -> Option<RelayMessage> {
        let message = match RelayMessage::parse(text) {
            Ok(message) => message,
            Err(error) => {
                warn!(relay = %self.relay_url, %error, "dropping unparseable frame");
                return None;
            }
        };

        match &message {
            RelayMessage::Event(subscription_id, event) => {
                let subscriptions = self.subscriptions.lock().await;
                let Some(route) = subscriptions.get(subscription_id) else {
                    debug!(relay = %self.relay_url, subscription_id, "dropping EVENT for unknown subscription");
                    return None;
                };
                if self.verify_events {
                    if let Err(error) = validate_event(event) {
                        warn!(relay = %self.relay_url, subscription_id, %error, "dropping invalid event");
                        return None;
                    }
                    if !matches_any(&route.filters, event) {
                        warn!(relay = %self.relay_url, subscription_id, event_id = %event.id, "dropping event outside subscription filters");
                        return None;
                    }
                }
                // A failed send means the handle is dropped; its drop signal
                // removes the route and sends CLOSE.
                if route
                    .tx
                    .send(SubscriptionMessage::Event(event.clone()))
                    .is_err()
                {
                    debug!(relay = %self.relay_url, subscription_id, "subscription handle dropped");
                }
            }
            RelayMessage::Eose(subscription_id) => {
                let subscriptions = self.subscriptions.lock().await;
                let Some(route) = subscriptions.get(subscription_id) else {
                    debug!(relay = %self.relay_url, subscription_id, "dropping EOSE for unknown subscription");
                    return None;
                };
                let _ = route.tx.send(SubscriptionMessage::Eose);
            }
            RelayMessage::Closed(subscription_id, reason) => {
                let Some(route) = self.subscriptions.lock().await.remove(subscription_id) else {
                    debug!(relay = %self.relay_url, subscription_id, "dropping CLOSED for unknown subscription");
                    return None;
                };
                info!(relay = %self.relay_url, subscription_id, reason, "subscription closed by relay");
                let _ = route.tx.send(SubscriptionMessage::Closed(reason.clone()));
            }
            RelayMessage::Ok(event_id, accepted, ok_message) => {
                let waiters = self.pending.lock().await.remove(event_id);
                match waiters {
                    Some(waiters) => {
                        for waiter in waiters {
                            let _ = waiter.send(PublishConfirmation {
                                relay_url: self.relay_url.clone(),
                                event_id: event_id.clone(),
                                accepted: *accepted,
                                message: ok_message.clone(),
                            });
                        }
                    }
                    None => debug!(relay = %self.relay_url, event_id, "OK for an event nobody is waiting on"),
                }
            }
            RelayMessage::Auth(challenge) => {
                debug!(relay = %self.relay_url, "received AUTH challenge");
                *self.auth_challenge.write().await = Some(challenge.clone());
            }
            RelayMessage::Notice(notice) => {
                info!(relay = %self.relay_url, notice, "relay notice");
            }
            RelayMessage::Unknown(tag) => {
                debug!(relay = %self.relay_url, tag, "dropping frame with unknown tag");
                return None;
            }
        }

        Some(message)
    }

    async fn forward_to_listener(&self, message: RelayMessage) {
        let mut listener = self.listener.lock().await;
        if let Some(tx) = listener.as_ref()
            && tx.send(message).is_err()
        {
            listener.take();
        }
    }
}

async fn route_frames(
    shared: Arc<Shared>,
    mut frames: FrameStream,
    mut dropped: mpsc::UnboundedReceiver<String>,
) {
    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(text)) => {
                    if let Some(message) = shared.dispatch(&text).await {
                        shared.forward_to_listener(message).await;
                    }
                }
                Some(Err(error)) => {
                    warn!(relay = %shared.relay_url, %error, "transport read failed");
                    break;
                }
                None => break,
            },
            Some(subscription_id) = dropped.recv() => {
                shared.close_dropped(&subscription_id).await;
            }
        }
    }

    info!(relay = %shared.relay_url, "connection lost");
    shared.teardown().await;
}

/// Relay connection.
pub struct RelayConnection {
    url: RelayUrl,
    config: RelayConfig,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayConnection {
    /// Create a new relay connection with default config.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, RelayConfig::default())
    }

    /// Create a new relay connection with custom config.
    pub fn with_config(url: &str, config: RelayConfig) -> Result<Self> {
        let transport = match &config.proxy {
            Some(proxy) => WebSocketTransport::with_proxy(proxy.clone(), config.proxy_all),
            None => WebSocketTransport::new(),
        };
        Self::with_transport(url, config, Arc::new(transport))
    }

    /// Create a connection over a caller-supplied transport.
    pub fn with_transport(
        url: &str,
        config: RelayConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let url = RelayUrl::parse(url)?;
        let shared = Arc::new(Shared {
            relay_url: url.to_string(),
            verify_events: config.verify_events,
            state: RwLock::new(ConnectionState::Disconnected),
            writer: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            listener: Mutex::new(None),
            listener_started: AtomicBool::new(false),
            auth_challenge: RwLock::new(None),
            dropped: Mutex::new(None),
        });

        Ok(Self {
            url,
            config,
            transport,
            shared,
            recv_task: Mutex::new(None),
        })
    }

    /// Relay URL as string.
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn relay_url(&self) -> &RelayUrl {
        &self.url
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Most recent NIP-42 challenge sent by the relay on this connection.
    pub async fn auth_challenge(&self) -> Option<String> {
        self.shared.auth_challenge.read().await.clone()
    }

    /// Ids of the subscriptions currently routed on this connection.
    pub async fn active_subscriptions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.subscriptions.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Connect to relay and start the routing task. No retry is attempted.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = self.shared.state.write().await;
            if matches!(
                *state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                return Err(ClientError::AlreadyConnected);
            }
            *state = ConnectionState::Connecting;
        }

        debug!(relay = %self.url, "connecting");
        let (sink, frames) =
            match timeout(self.config.connect_timeout, self.transport.connect(&self.url)).await {
                Ok(Ok(halves)) => halves,
                Ok(Err(error)) => {
                    *self.shared.state.write().await = ConnectionState::Disconnected;
                    warn!(relay = %self.url, %error, "connection failed");
                    return Err(ClientError::Connection(format!("{}: {error}", self.url)));
                }
                Err(_) => {
                    *self.shared.state.write().await = ConnectionState::Disconnected;
                    warn!(relay = %self.url, timeout = ?self.config.connect_timeout, "connection timed out");
                    return Err(ClientError::Connection(format!(
                        "{}: connection timeout after {:?}",
                        self.url, self.config.connect_timeout
                    )));
                }
            };

        let (dropped_tx, dropped_rx) = mpsc::unbounded_channel();
        *self.shared.dropped.lock().await = Some(dropped_tx);
        *self.shared.writer.lock().await = Some(sink);
        *self.shared.state.write().await = ConnectionState::Connected;
        info!(relay = %self.url, "connected");

        let task = tokio::spawn(route_frames(Arc::clone(&self.shared), frames, dropped_rx));
        if let Some(previous) = self.recv_task.lock().await.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// Disconnect from relay and stop the routing task.
    pub async fn disconnect(&self) -> Result<()> {
        *self.shared.state.write().await = ConnectionState::Closing;

        if let Some(mut writer) = self.shared.writer.lock().await.take()
            && let Err(error) = writer.close().await
        {
            debug!(relay = %self.url, %error, "close handshake failed");
        }

        if let Some(task) = self.recv_task.lock().await.take() {
            task.abort();
        }

        self.shared.teardown().await;
        info!(relay = %self.url, "disconnected");
        Ok(())
    }

    /// Publish an event and wait for the relay's `OK`.
    ///
    /// The event is validated before anything is sent. An explicit rejection is
    /// returned as a confirmation with `accepted == false`; no `OK` within
    /// `publish_timeout` is [`ClientError::Publish`].
    pub async fn publish(&self, event: &Event) -> Result<PublishConfirmation> {
        validate_event(event)?;
        let frame = ClientMessage::Event(event.clone()).to_json()?;
        self.send_and_await_ok(&event.id, frame).await
    }

    /// Answer a NIP-42 challenge with a signed kind-22242 event.
    pub async fn authenticate(&self, event: &Event) -> Result<PublishConfirmation> {
        if event.kind != AUTH_KIND {
            return Err(ClientError::InvalidRequest(format!(
                "AUTH event must be kind {AUTH_KIND}, got {}",
                event.kind
            )));
        }
        validate_event(event)?;
        let frame = ClientMessage::Auth(event.clone()).to_json()?;
        self.send_and_await_ok(&event.id, frame).await
    }

    async fn send_and_await_ok(&self, event_id: &str, frame: String) -> Result<PublishConfirmation> {
        // Register before sending so a fast OK cannot be missed.
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .await
            .entry(event_id.to_string())
            .or_default()
            .push(tx);

        if let Err(error) = self.send_frame(frame).await {
            self.forget_closed_waiters(event_id).await;
            return Err(error);
        }

        let acknowledged = timeout(self.config.publish_timeout, rx).await;
        match acknowledged {
            Ok(Ok(confirmation)) => {
                debug!(relay = %self.url, event_id, accepted = confirmation.accepted, "publish acknowledged");
                Ok(confirmation)
            }
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.forget_closed_waiters(event_id).await;
                warn!(relay = %self.url, event_id, "no OK before publish timeout");
                Err(ClientError::Publish(format!(
                    "no OK for {event_id} within {:?}",
                    self.config.publish_timeout
                )))
            }
        }
    }

    async fn forget_closed_waiters(&self, event_id: &str) {
        let mut pending = self.shared.pending.lock().await;
        if let Some(waiters) = pending.get_mut(event_id) {
            waiters.retain(|waiter| !waiter.is_closed());
            if waiters.is_empty() {
                pending.remove(event_id);
            }
        }
    }

    /// Open a subscription. Returns as soon as the `REQ` is written.
    pub async fn subscribe(&self, filters: Vec<Filter>) -> Result<Subscription> {
        if filters.is_empty() {
            return Err(ClientError::InvalidRequest(
                "a subscription needs at least one filter".to_string(),
            ));
        }
        for filter in &filters {
            filter.validate()?;
        }
        let filters: Vec<Filter> = filters.into_iter().map(Filter::normalize).collect();

        let subscription_id = Uuid::new_v4().simple().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.subscriptions.lock().await.insert(
            subscription_id.clone(),
            SubscriptionRoute {
                filters: filters.clone(),
                tx,
            },
        );

        let frame = ClientMessage::Req {
            subscription_id: subscription_id.clone(),
            filters: filters.clone(),
        }
        .to_json()?;
        if let Err(error) = self.send_frame(frame).await {
            self.shared.subscriptions.lock().await.remove(&subscription_id);
            return Err(error);
        }

        debug!(relay = %self.url, subscription_id, "subscribed");
        let on_drop = self.shared.dropped.lock().await.clone();
        Ok(Subscription::new(subscription_id, filters, rx, on_drop))
    }

    /// Close a subscription. Unknown or already-closed ids are a no-op.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        if self
            .shared
            .subscriptions
            .lock()
            .await
            .remove(subscription_id)
            .is_none()
        {
            debug!(relay = %self.url, subscription_id, "unsubscribe for inactive subscription");
            return Ok(());
        }

        let frame = ClientMessage::Close {
            subscription_id: subscription_id.to_string(),
        }
        .to_json()?;
        self.send_frame(frame).await
    }

    /// Stream of every routed inbound frame.
    ///
    /// Can be called once per connection. Frames that arrive before it is called
    /// are not buffered for it. The stream ends when the connection is torn down.
    pub async fn listen(&self) -> Result<Listener> {
        let mut listener = self.shared.listener.lock().await;
        if self.shared.listener_started.swap(true, Ordering::SeqCst) {
            return Err(ClientError::InvalidRequest(
                "listen() can only be called once per connection".to_string(),
            ));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *listener = Some(tx);
        Ok(Listener { rx })
    }

    async fn send_frame(&self, frame: String) -> Result<()> {
        if self.state().await != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let mut writer = self.shared.writer.lock().await;
        let sink = writer.as_mut().ok_or(ClientError::NotConnected)?;
        sink.send(frame).await
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.recv_task.try_lock()
            && let Some(task) = slot.take()
        {
            task.abort();
        }
    }
}

/// Inbound frames of one connection, in arrival order.
#[derive(Debug)]
pub struct Listener {
    rx: mpsc::UnboundedReceiver<RelayMessage>,
}

impl Listener {
    pub async fn recv(&mut self) -> Option<RelayMessage> {
        self.rx.recv().await
    }
}

impl Stream for Listener {
    type Item = RelayMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::sink;
    use nostr::{EventTemplate, finalize_event, generate_secret_key};

    /// Transport backed by in-memory channels.
    struct ChannelTransport {
        outbound: mpsc::UnboundedSender<String>,
        inbound: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Result<String>>>>,
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn connect(&self, _url: &RelayUrl) -> Result<(FrameSink, FrameStream)> {
            let inbound = self
                .inbound
                .lock()
                .map_err(|_| ClientError::Connection("poisoned".into()))?
                .take()
                .ok_or_else(|| ClientError::Connection("already used".into()))?;
            let outbound = self.outbound.clone();
            let sink = sink::unfold(outbound, |outbound, frame: String| async move {
                outbound
                    .send(frame)
                    .map_err(|_| ClientError::ConnectionClosed)?;
                Ok::<_, ClientError>(outbound)
            });
            let frames = futures_util::stream::unfold(inbound, |mut inbound| async move {
                inbound.recv().await.map(|frame| (frame, inbound))
            });
            Ok((Box::pin(sink), Box::pin(frames)))
        }
    }

    struct Harness {
        connection: RelayConnection,
        sent: mpsc::UnboundedReceiver<String>,
        inject: mpsc::UnboundedSender<Result<String>>,
    }

    async fn connected(config: RelayConfig) -> Result<Harness> {
        let (outbound, sent) = mpsc::unbounded_channel();
        let (inject, inbound) = mpsc::unbounded_channel();
        let transport = ChannelTransport {
            outbound,
            inbound: std::sync::Mutex::new(Some(inbound)),
        };
        let connection =
            RelayConnection::with_transport("ws://relay.test", config, Arc::new(transport))?;
        connection.connect().await?;
        Ok(Harness {
            connection,
            sent,
            inject,
        })
    }

    fn note(content: &str) -> Result<Event> {
        signed(1, content)
    }

    fn signed(kind: u16, content: &str) -> Result<Event> {
        let template = EventTemplate {
            created_at: 1_700_000_000,
            kind,
            tags: vec![],
            content: content.to_string(),
        };
        Ok(finalize_event(&template, &generate_secret_key())?)
    }

    fn push(inject: &mpsc::UnboundedSender<Result<String>>, message: &RelayMessage) -> Result<()> {
        inject
            .send(Ok(message.to_json()?))
            .map_err(|_| ClientError::ConnectionClosed)
    }

    #[tokio::test]
    async fn subscribe_sends_req_and_routes_in_order() -> Result<()> {
        let mut harness = connected(RelayConfig::default()).await?;
        let mut subscription = harness.connection.subscribe(vec![Filter::new().kind(1)]).await?;

        let req = harness.sent.recv().await.ok_or(ClientError::ConnectionClosed)?;
        assert_eq!(
            ClientMessage::parse(&req)?,
            ClientMessage::Req {
                subscription_id: subscription.id().to_string(),
                filters: vec![Filter::new().kind(1)],
            }
        );

        let id = subscription.id().to_string();
        let first = note("first")?;
        let second = note("second")?;
        push(&harness.inject, &RelayMessage::Event(id.clone(), first.clone()))?;
        push(&harness.inject, &RelayMessage::Eose(id.clone()))?;
        push(&harness.inject, &RelayMessage::Event(id.clone(), second.clone()))?;

        assert_eq!(subscription.recv().await, Some(SubscriptionMessage::Event(first)));
        assert_eq!(subscription.recv().await, Some(SubscriptionMessage::Eose));
        assert_eq!(subscription.recv().await, Some(SubscriptionMessage::Event(second)));
        Ok(())
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() -> Result<()> {
        let mut harness = connected(RelayConfig::default()).await?;
        let subscription = harness.connection.subscribe(vec![Filter::new().kind(1)]).await?;
        let _req = harness.sent.recv().await;

        harness.connection.unsubscribe(subscription.id()).await?;
        harness.connection.unsubscribe(subscription.id()).await?;
        harness.connection.unsubscribe("never-existed").await?;

        let close = harness.sent.recv().await.ok_or(ClientError::ConnectionClosed)?;
        assert_eq!(close, format!(r#"["CLOSE","{}"]"#, subscription.id()));
        assert!(harness.sent.try_recv().is_err());
        assert!(harness.connection.active_subscriptions().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn dropped_handles_close_their_subscriptions() -> Result<()> {
        let mut harness = connected(RelayConfig::default()).await?;
        let mut handles = Vec::new();
        for _ in 0..3 {
            handles.push(harness.connection.subscribe(vec![Filter::new().kind(1)]).await?);
            let _req = harness.sent.recv().await;
        }
        let mut expected: Vec<String> = handles.iter().map(|h| h.id().to_string()).collect();
        expected.sort();
        assert_eq!(harness.connection.active_subscriptions().await, expected);

        drop(handles);
        let mut closed = Vec::new();
        for _ in 0..3 {
            let frame = timeout(Duration::from_secs(5), harness.sent.recv())
                .await
                .map_err(|_| ClientError::Protocol("no CLOSE after drop".into()))?
                .ok_or(ClientError::ConnectionClosed)?;
            match ClientMessage::parse(&frame)? {
                ClientMessage::Close { subscription_id } => closed.push(subscription_id),
                other => {
                    return Err(ClientError::Protocol(format!("expected CLOSE, got {other:?}")));
                }
            }
        }
        closed.sort();
        assert_eq!(closed, expected);
        assert!(harness.connection.active_subscriptions().await.is_empty());

        // Late frames for a dropped id are ignored.
        push(&harness.inject, &RelayMessage::Event(expected[0].clone(), note("late")?))?;
        assert!(harness.connection.is_connected().await);
        Ok(())
    }

    #[tokio::test]
    async fn dropping_after_unsubscribe_sends_nothing_more() -> Result<()> {
        let mut harness = connected(RelayConfig::default()).await?;
        let subscription = harness.connection.subscribe(vec![Filter::new().kind(1)]).await?;
        let _req = harness.sent.recv().await;

        harness.connection.unsubscribe(subscription.id()).await?;
        let close = harness.sent.recv().await.ok_or(ClientError::ConnectionClosed)?;
        assert_eq!(close, format!(r#"["CLOSE","{}"]"#, subscription.id()));

        drop(subscription);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(harness.sent.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_and_foreign_frames_are_skipped() -> Result<()> {
        let harness = connected(RelayConfig::default()).await?;
        let mut listener = harness.connection.listen().await?;
        let mut subscription = harness.connection.subscribe(vec![Filter::new().kind(1)]).await?;
        let id = subscription.id().to_string();

        for junk in ["not json", "[]", r#"{"EVENT":1}"#, r#"["COUNT","x",{"count":1}]"#] {
            harness
                .inject
                .send(Ok(junk.to_string()))
                .map_err(|_| ClientError::ConnectionClosed)?;
        }
        let mut forged = note("forged")?;
        forged.content = "tampered".to_string();
        push(&harness.inject, &RelayMessage::Event(id.clone(), forged))?;
        push(&harness.inject, &RelayMessage::Event("other-sub".into(), note("stray")?))?;
        let wrong_kind = signed(7, "reaction")?;
        push(&harness.inject, &RelayMessage::Event(id.clone(), wrong_kind))?;

        let good = note("good")?;
        push(&harness.inject, &RelayMessage::Event(id.clone(), good.clone()))?;

        assert_eq!(subscription.next_event().await?, Some(good.clone()));
        assert_eq!(listener.recv().await, Some(RelayMessage::Event(id, good)));
        assert!(harness.connection.is_connected().await);
        Ok(())
    }

    #[tokio::test]
    async fn publish_resolves_on_matching_ok() -> Result<()> {
        let Harness {
            connection,
            mut sent,
            inject,
        } = connected(RelayConfig::default()).await?;
        let event = note("publish me")?;

        let publish = connection.publish(&event);
        let relay = async {
            let frame = sent.recv().await.ok_or(ClientError::ConnectionClosed)?;
            assert_eq!(ClientMessage::parse(&frame)?, ClientMessage::Event(event.clone()));
            push(&inject, &RelayMessage::Ok("unrelated".into(), true, String::new()))?;
            push(&inject, &RelayMessage::Ok(event.id.clone(), false, "blocked: spam".into()))
        };
        let (confirmation, relayed) = tokio::join!(publish, relay);
        relayed?;

        let confirmation = confirmation?;
        assert!(!confirmation.accepted);
        assert_eq!(confirmation.message, "blocked: spam");
        assert!(matches!(
            confirmation.into_result(),
            Err(ClientError::Rejected { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn publish_times_out_without_ok() -> Result<()> {
        let config = RelayConfig {
            publish_timeout: Duration::from_millis(100),
            ..RelayConfig::default()
        };
        let harness = connected(config).await?;
        let result = harness.connection.publish(&note("into the void")?).await;
        assert!(matches!(result, Err(ClientError::Publish(_))));
        assert!(harness.connection.shared.pending.lock().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn publish_rejects_invalid_event_before_sending() -> Result<()> {
        let mut harness = connected(RelayConfig::default()).await?;
        let mut event = note("valid")?;
        event.content = "changed".to_string();

        let result = harness.connection.publish(&event).await;
        assert!(matches!(result, Err(ClientError::Validation(_))));
        assert!(harness.sent.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn connection_loss_fails_everything_pending() -> Result<()> {
        let config = RelayConfig {
            publish_timeout: Duration::from_secs(30),
            ..RelayConfig::default()
        };
        let harness = connected(config).await?;
        let mut listener = harness.connection.listen().await?;
        let mut subscription = harness.connection.subscribe(vec![Filter::new()]).await?;
        let event = note("pending")?;

        let Harness {
            connection,
            inject,
            sent: _sent,
        } = harness;
        let publish = connection.publish(&event);
        let drop_transport = async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(inject);
        };
        let (result, ()) = tokio::join!(publish, drop_transport);

        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
        assert_eq!(subscription.recv().await, Some(SubscriptionMessage::ConnectionClosed));
        assert_eq!(subscription.recv().await, None);
        assert_eq!(listener.recv().await, None);
        assert_eq!(connection.state().await, ConnectionState::Disconnected);
        assert!(matches!(
            connection.publish(&event).await,
            Err(ClientError::NotConnected)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn relay_closed_ends_subscription() -> Result<()> {
        let harness = connected(RelayConfig::default()).await?;
        let mut subscription = harness.connection.subscribe(vec![Filter::new()]).await?;
        let id = subscription.id().to_string();

        push(&harness.inject, &RelayMessage::Closed(id.clone(), "auth-required: sign in".into()))?;
        assert!(matches!(
            subscription.next_event().await,
            Err(ClientError::Subscription(reason)) if reason == "auth-required: sign in"
        ));
        assert!(harness.connection.active_subscriptions().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn auth_challenge_is_retained() -> Result<()> {
        let harness = connected(RelayConfig::default()).await?;
        let mut listener = harness.connection.listen().await?;
        push(&harness.inject, &RelayMessage::Auth("challenge-1".into()))?;

        assert_eq!(listener.recv().await, Some(RelayMessage::Auth("challenge-1".into())));
        assert_eq!(harness.connection.auth_challenge().await.as_deref(), Some("challenge-1"));
        assert!(matches!(
            harness.connection.listen().await,
            Err(ClientError::InvalidRequest(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn second_connect_is_rejected() -> Result<()> {
        let harness = connected(RelayConfig::default()).await?;
        assert!(matches!(
            harness.connection.connect().await,
            Err(ClientError::AlreadyConnected)
        ));
        Ok(())
    }
}
