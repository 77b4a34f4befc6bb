//! In-process relay for tests.
//!
//! [`TestRelay`] speaks NIP-01 over real WebSocket connections on a loopback
//! port. It stores accepted events in memory, answers `REQ` with stored
//! matches followed by `EOSE`, fans new events out to live subscriptions and
//! acknowledges every `EVENT` with `OK`. [`TestRelayOptions`] scripts the
//! misbehaviour a client has to survive.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use nostr::{Event, Filter, matches_any, validate_event};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::Result;
use crate::message::{ClientMessage, RelayMessage};

#[derive(Debug, Clone, Default)]
pub struct TestRelayOptions {
    /// Reject every `EVENT` with `OK false`.
    pub read_only: bool,
    /// Never answer `EVENT` frames.
    pub silent: bool,
    /// Raw frames sent to each client right after the handshake.
    pub greeting: Vec<String>,
    /// Answer every `REQ` with `CLOSED` carrying this reason.
    pub close_subscriptions: Option<String>,
    /// Send `["AUTH", challenge]` on connect.
    pub auth_challenge: Option<String>,
}

enum Outbound {
    Event(Event),
    Drop,
}

struct Inner {
    options: TestRelayOptions,
    events: Mutex<Vec<Event>>,
    frames: Mutex<Vec<String>>,
    peers: Mutex<Vec<mpsc::UnboundedSender<Outbound>>>,
}

pub struct TestRelay {
    addr: SocketAddr,
    inner: Arc<Inner>,
    accept_task: JoinHandle<()>,
}

impl TestRelay {
    pub async fn start() -> Result<Self> {
        Self::start_with(TestRelayOptions::default()).await
    }

    pub async fn start_with(options: TestRelayOptions) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let inner = Arc::new(Inner {
            options,
            events: Mutex::new(Vec::new()),
            frames: Mutex::new(Vec::new()),
            peers: Mutex::new(Vec::new()),
        });

        let accept_inner = Arc::clone(&inner);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "test relay accepted connection");
                        tokio::spawn(serve(Arc::clone(&accept_inner), stream));
                    }
                    Err(error) => {
                        debug!(%error, "test relay stopped accepting");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            addr,
            inner,
            accept_task,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Seed the store without going through a client.
    pub async fn store(&self, event: Event) {
        self.inner.events.lock().await.push(event);
    }

    pub async fn stored_events(&self) -> Vec<Event> {
        self.inner.events.lock().await.clone()
    }

    /// Every text frame received from any client, in arrival order.
    pub async fn received_frames(&self) -> Vec<String> {
        self.inner.frames.lock().await.clone()
    }

    /// Drop every open connection without a closing handshake.
    pub async fn drop_connections(&self) {
        for peer in self.inner.peers.lock().await.drain(..) {
            let _ = peer.send(Outbound::Drop);
        }
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.accept_task.abort();
        if let Ok(mut peers) = self.inner.peers.try_lock() {
            for peer in peers.drain(..) {
                let _ = peer.send(Outbound::Drop);
            }
        }
    }
}

async fn serve(inner: Arc<Inner>, stream: TcpStream) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(error) => {
            debug!(%error, "test relay handshake failed");
            return;
        }
    };
    let (mut outgoing, mut incoming) = ws.split();
    let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();
    inner.peers.lock().await.push(peer_tx);

    let mut opening = inner.options.greeting.clone();
    if let Some(challenge) = &inner.options.auth_challenge {
        opening.extend(RelayMessage::Auth(challenge.clone()).to_json());
    }
    for frame in opening {
        if outgoing.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }

    let mut subscriptions: HashMap<String, Vec<Filter>> = HashMap::new();
    loop {
        let replies = tokio::select! {
            inbound = incoming.next() => match inbound {
                Some(Ok(Message::Text(text))) => inner.handle(&text.to_string(), &mut subscriptions).await,
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
            outbound = peer_rx.recv() => match outbound {
                Some(Outbound::Event(event)) => subscriptions
                    .iter()
                    .filter(|(_, filters)| matches_any(filters, &event))
                    .map(|(id, _)| RelayMessage::Event(id.clone(), event.clone()))
                    .collect(),
                Some(Outbound::Drop) | None => return,
            },
        };

        for reply in replies {
            let Ok(text) = reply.to_json() else {
                continue;
            };
            if outgoing.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
    }
}

impl Inner {
    async fn handle(
        &self,
        text: &str,
        subscriptions: &mut HashMap<String, Vec<Filter>>,
    ) -> Vec<RelayMessage> {
        self.frames.lock().await.push(text.to_string());

        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(error) => return vec![RelayMessage::Notice(format!("error: {error}"))],
        };

        match message {
            ClientMessage::Event(event) => {
                if self.options.silent {
                    return Vec::new();
                }
                if self.options.read_only {
                    return vec![RelayMessage::Ok(
                        event.id,
                        false,
                        "blocked: read-only relay".to_string(),
                    )];
                }
                if let Err(error) = validate_event(&event) {
                    return vec![RelayMessage::Ok(event.id, false, format!("invalid: {error}"))];
                }

                self.events.lock().await.push(event.clone());
                let mut peers = self.peers.lock().await;
                peers.retain(|peer| peer.send(Outbound::Event(event.clone())).is_ok());
                vec![RelayMessage::Ok(event.id, true, String::new())]
            }
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                if let Some(reason) = &self.options.close_subscriptions {
                    return vec![RelayMessage::Closed(subscription_id, reason.clone())];
                }

                let mut stored: Vec<Event> = self
                    .events
                    .lock()
                    .await
                    .iter()
                    .filter(|event| matches_any(&filters, event))
                    .cloned()
                    .collect();
                stored.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                if let Some(limit) = filters.iter().filter_map(|filter| filter.limit).max() {
                    stored.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
                }

                let mut replies: Vec<RelayMessage> = stored
                    .into_iter()
                    .map(|event| RelayMessage::Event(subscription_id.clone(), event))
                    .collect();
                replies.push(RelayMessage::Eose(subscription_id.clone()));
                subscriptions.insert(subscription_id, filters);
                replies
            }
            ClientMessage::Close { subscription_id } => {
                subscriptions.remove(&subscription_id);
                Vec::new()
            }
            ClientMessage::Auth(event) => match validate_event(&event) {
                Ok(()) => vec![RelayMessage::Ok(event.id, true, String::new())],
                Err(error) => vec![RelayMessage::Ok(event.id, false, format!("invalid: {error}"))],
            },
        }
    }
}
