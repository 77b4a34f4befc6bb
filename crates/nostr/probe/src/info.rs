//! HTTP side of the probe: fetching the NIP-11 relay information document.

use std::time::Duration;

use async_trait::async_trait;
use nostr::{NIP11_ACCEPT, RelayInformation};
use nostr_client::{Network, RelayUrl};
use reqwest::header::ACCEPT;
use tracing::debug;

use crate::error::{ProbeError, Result};

/// Source of relay information documents.
#[async_trait]
pub trait InfoFetcher: Send + Sync {
    async fn fetch(&self, relay: &RelayUrl) -> Result<RelayInformation>;
}

/// [`InfoFetcher`] over `reqwest`, with a separate SOCKS5 client for Tor relays.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    clearnet: reqwest::Client,
    tor: Option<reqwest::Client>,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration, tor_proxy: Option<&str>) -> Result<Self> {
        let clearnet = reqwest::Client::builder().timeout(timeout).build()?;
        let tor = match tor_proxy {
            Some(proxy) => {
                let address = proxy
                    .trim_start_matches("socks5h://")
                    .trim_start_matches("socks5://");
                let proxy = reqwest::Proxy::all(format!("socks5h://{address}"))?;
                Some(
                    reqwest::Client::builder()
                        .timeout(timeout)
                        .proxy(proxy)
                        .build()?,
                )
            }
            None => None,
        };
        Ok(Self { clearnet, tor })
    }

    fn client_for(&self, relay: &RelayUrl) -> Result<&reqwest::Client> {
        match relay.network() {
            Network::Clearnet => Ok(&self.clearnet),
            Network::Tor => self.tor.as_ref().ok_or_else(|| {
                ProbeError::Config(format!("{relay} is a Tor relay and no tor_proxy is set"))
            }),
        }
    }
}

#[async_trait]
impl InfoFetcher for ReqwestFetcher {
    async fn fetch(&self, relay: &RelayUrl) -> Result<RelayInformation> {
        let url = relay.info_url()?;
        debug!(relay = %relay, %url, "fetching relay information document");

        let response = self
            .client_for(relay)?
            .get(url)
            .header(ACCEPT, NIP11_ACCEPT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::HttpStatus(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(RelayInformation::parse(&body)?)
    }
}
