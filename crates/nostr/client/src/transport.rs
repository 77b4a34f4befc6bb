//! Duplex frame transport underneath a relay connection.
//!
//! A transport turns a relay URL into a text-frame sink and stream. The
//! connection only ever deals in whole JSON frames; WebSocket framing, TLS and
//! proxying stay behind this seam.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{WebSocketStream, client_async_tls, connect_async};
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::relay_url::{Network, RelayUrl};

/// Outbound half: accepts serialized frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ClientError> + Send>>;

/// Inbound half: yields text frames until the peer goes away.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &RelayUrl) -> Result<(FrameSink, FrameStream)>;
}

/// WebSocket transport, optionally tunnelled through a SOCKS5 proxy.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    proxy: Option<String>,
    proxy_all: bool,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `.onion` relays (or every relay when `proxy_all`) through `proxy`.
    pub fn with_proxy(proxy: impl Into<String>, proxy_all: bool) -> Self {
        Self {
            proxy: Some(proxy.into()),
            proxy_all,
        }
    }

    fn proxy_for(&self, url: &RelayUrl) -> Result<Option<&str>> {
        match (url.network(), self.proxy.as_deref()) {
            (Network::Tor, None) => Err(ClientError::Connection(format!(
                "{url} is a Tor relay and no SOCKS5 proxy is configured"
            ))),
            (Network::Tor, Some(proxy)) => Ok(Some(proxy)),
            (Network::Clearnet, proxy) if self.proxy_all => Ok(proxy),
            (Network::Clearnet, _) => Ok(None),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &RelayUrl) -> Result<(FrameSink, FrameStream)> {
        let request = url
            .as_str()
            .into_client_request()
            .map_err(|error| ClientError::WebSocket(error.to_string()))?;

        match self.proxy_for(url)? {
            None => {
                let (stream, _response) = connect_async(request)
                    .await
                    .map_err(|error| ClientError::WebSocket(error.to_string()))?;
                Ok(split_frames(stream))
            }
            Some(proxy) => {
                debug!(relay = %url, proxy, "connecting through SOCKS5 proxy");
                let proxy_addr = proxy
                    .trim_start_matches("socks5h://")
                    .trim_start_matches("socks5://");
                let tunnel = Socks5Stream::connect(proxy_addr, (url.host(), url.port()))
                    .await
                    .map_err(|error| ClientError::Connection(format!("SOCKS5 proxy {proxy}: {error}")))?;
                let (stream, _response) = client_async_tls(request, tunnel)
                    .await
                    .map_err(|error| ClientError::WebSocket(error.to_string()))?;
                Ok(split_frames(stream))
            }
        }
    }
}

fn split_frames<S>(stream: WebSocketStream<S>) -> (FrameSink, FrameStream)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (writer, reader) = stream.split();

    let sink = writer
        .sink_map_err(|error| ClientError::WebSocket(error.to_string()))
        .with(|text: String| future::ready(Ok::<_, ClientError>(Message::Text(text.into()))));

    let frames = reader.filter_map(|frame| {
        future::ready(match frame {
            Ok(Message::Text(text)) => Some(Ok(text.to_string())),
            Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {
                None
            }
            Ok(Message::Close(_)) => None,
            Err(error) => Some(Err(ClientError::WebSocket(error.to_string()))),
        })
    });

    (Box::pin(sink), Box::pin(frames))
}
