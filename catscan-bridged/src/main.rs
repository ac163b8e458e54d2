use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use shared::types::ScanRecord;
use catscan_bridged::api::{self, routes::AppState};
use catscan_bridged::config::Config;
use catscan_bridged::discovery::{DiscoveryHandle, DiscoveryResponder};
use catscan_bridged::logging;
use catscan_bridged::net::addrs::{self, AddressSource, HostnameResolver, StaticAddresses};
use catscan_bridged::push_bridge::{ChannelObserver, PushBridge};

#[tokio::main]
async fn main() -> Result<()> {
    // Config file is optional; every setting has a built-in default.
    // Loaded before tracing because it says where the scan log goes.
    let config_path = std::env::args().nth(1);
    let config = match &config_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => Config::default(),
    };

    let _log_guard = logging::init(&config.logging)?;

    tracing::info!("Starting catscan-bridged");
    if let Some(path) = &config_path {
        tracing::info!("Loaded config from {}", path);
    }

    let addresses: Arc<dyn AddressSource> = match &config.discovery.advertise_addresses {
        Some(list) => Arc::new(StaticAddresses::new(list.clone())),
        None => Arc::new(HostnameResolver),
    };

    report_ingestion_urls(addresses.clone(), &config).await;

    let cancel = CancellationToken::new();

    // Push bridge; this task is its only observer
    let bridge = PushBridge::spawn();
    let (record_tx, record_rx) = flume::unbounded();
    bridge.register(ChannelObserver(record_tx));

    // Ingestion server. A bind failure stops only this component.
    let app = api::routes::router(AppState::new(&config.ingestion, bridge.clone()));
    let listen_addr = config.ingestion.listen_addr();
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        let listener = match api::bind(listen_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!("Ingestion server not started: {}", e);
                return;
            }
        };
        tracing::info!("Ingestion listening on {}", listen_addr);

        if let Err(e) = api::serve(listener, app, server_cancel).await {
            tracing::error!("Ingestion server error: {}", e);
        }
    });

    // Discovery responder
    let discovery = if config.discovery.enabled {
        let responder = DiscoveryResponder::new(&config.discovery, &config.ingestion, addresses);
        Some(DiscoveryHandle::spawn(responder, cancel.clone()))
    } else {
        tracing::info!("Discovery responder disabled by config");
        None
    };

    // Foreground: hand records to the presentation layer until ctrl-c
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("Failed to listen for ctrl-c")?;
                break;
            }
            Ok(record) = record_rx.recv_async() => present(&record),
        }
    }

    tracing::info!("Shutdown signal received");

    cancel.cancel();

    if let Some(discovery) = discovery {
        // Failures were logged by the responder when it stopped
        if let Err(e) = discovery.stop().await {
            tracing::debug!("Discovery had stopped earlier: {}", e);
        }
    }

    if let Err(e) = server_handle.await {
        tracing::error!("Ingestion task failed: {}", e);
    }

    // Requests that finished during graceful shutdown were pushed after the
    // loop above stopped reading; present them before exiting
    match bridge.shutdown_and_drain(&record_rx, present).await {
        Ok(stats) => tracing::info!(
            delivered = stats.delivered,
            dropped = stats.dropped,
            "Push bridge stopped"
        ),
        Err(e) => tracing::error!("Failed to shutdown push bridge: {}", e),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Log every URL a client on the LAN could post to
async fn report_ingestion_urls(addresses: Arc<dyn AddressSource>, config: &Config) {
    let ingestion = config.ingestion.clone();
    let urls = tokio::task::spawn_blocking(move || {
        addrs::ingestion_urls(addresses.as_ref(), &ingestion)
    })
    .await
    .unwrap_or_default();

    if urls.is_empty() {
        tracing::warn!("No non-loopback addresses found; clients will need the address entered by hand");
    }
    for url in urls {
        tracing::info!("Ingestion reachable at {}", url);
    }
}

fn present(record: &ScanRecord) {
    tracing::info!(
        timestamp = record.timestamp().unwrap_or_default(),
        "Scan record: {}",
        serde_json::to_string(record).unwrap_or_default()
    );
}
