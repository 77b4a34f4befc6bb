use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nostr_client::RelayUrl;
use nostr_probe::{ProbeConfig, ReqwestFetcher, probe_relays};

/// Probe Nostr relays and print one JSON document per relay.
#[derive(Parser, Debug)]
#[command(name = "relay-probe")]
struct Args {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Relays probed at the same time.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Connect timeout in seconds.
    #[arg(long)]
    connect_timeout: Option<f64>,

    /// SOCKS5 proxy for .onion relays, e.g. 127.0.0.1:9050.
    #[arg(long)]
    tor_proxy: Option<String>,

    /// Relay URLs; wss:// is assumed when no scheme is given.
    #[arg(required = true)]
    relays: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ProbeConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => ProbeConfig::default(),
    };
    config.apply_env();
    if let Some(concurrency) = args.concurrency {
        config.max_concurrency = concurrency;
    }
    if let Some(secs) = args.connect_timeout {
        config.connect_timeout =
            Duration::try_from_secs_f64(secs).context("invalid --connect-timeout")?;
    }
    if let Some(proxy) = args.tor_proxy {
        config.tor_proxy = Some(proxy);
    }
    config.validate()?;

    let relays = args
        .relays
        .iter()
        .map(|relay| RelayUrl::parse(relay).with_context(|| format!("invalid relay URL {relay}")))
        .collect::<Result<Vec<_>>>()?;

    let fetcher = ReqwestFetcher::new(config.info_timeout, config.tor_proxy.as_deref())
        .context("build HTTP client")?;
    let results = probe_relays(relays, &config, Arc::new(fetcher)).await?;

    let mut stdout = std::io::stdout().lock();
    for metadata in &results {
        serde_json::to_writer(&mut stdout, metadata)?;
        writeln!(stdout)?;
    }
    Ok(())
}
