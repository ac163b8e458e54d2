use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use catscan_bridged::api::{self, routes::{router, AppState}};
use catscan_bridged::config::{DiscoveryConfig, IngestionConfig};
use catscan_bridged::discovery::{DiscoveryHandle, DiscoveryResponder};
use catscan_bridged::net::addrs::AddressSource;
use catscan_bridged::push_bridge::PushBridge;
use catscan_probe::client::IngestionClient;
use catscan_probe::discover::discover;
use shared::protocol::{DISCOVERY_REQUEST, DISCOVERY_RESPONSE_PREFIX};
use shared::types::{RecordStatus, ScanRecord};

/// Advertises loopback so the whole exchange stays on this machine
struct Loopback;

impl AddressSource for Loopback {
    fn local_addresses(&self) -> Vec<IpAddr> {
        vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]
    }
}

#[tokio::test]
async fn test_discover_probe_and_send() {
    let cancel = CancellationToken::new();

    let bridge = PushBridge::spawn();
    let seen = Arc::new(Mutex::new(Vec::<ScanRecord>::new()));
    let sink = seen.clone();
    bridge.register(move |r: ScanRecord| sink.lock().unwrap().push(r));

    let listener = api::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let ingestion = IngestionConfig {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: listener.local_addr().unwrap().port(),
        ..IngestionConfig::default()
    };
    let app = router(AppState::new(&ingestion, bridge.clone()));
    let server = tokio::spawn(api::serve(listener, app, cancel.clone()));

    let discovery_config = DiscoveryConfig {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        poll_interval_ms: 50,
        ..DiscoveryConfig::default()
    };
    let responder = DiscoveryResponder::new(&discovery_config, &ingestion, Arc::new(Loopback));
    let mut discovery = DiscoveryHandle::spawn(responder, cancel.clone());
    let discovery_addr = discovery.listening().await.expect("discovery listening");

    let servers = discover(
        discovery_addr,
        DISCOVERY_REQUEST,
        DISCOVERY_RESPONSE_PREFIX,
        Duration::from_millis(300),
    )
    .await
    .unwrap();
    assert_eq!(servers.len(), 1);
    let expected_url = format!("http://127.0.0.1:{}/postqrdata", ingestion.port);
    assert_eq!(servers[0].url, expected_url);

    let client = IngestionClient::new(Duration::from_secs(2)).unwrap();
    let live = client
        .first_live(&[servers[0].url.clone()])
        .await
        .expect("ingestion answers the liveness probe");

    let mut extra = Map::new();
    extra.insert("template".to_string(), Value::from("inbound"));
    let record = client.send(&live, "SN-0042", extra).await.unwrap();
    assert_eq!(record.status(), Some(RecordStatus::Received));
    assert_eq!(record.code(), Some(200));
    assert_eq!(record.get("template"), Some(&json!("inbound")));

    bridge.flush().await.unwrap();
    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], record);
    }

    drop(client);
    cancel.cancel();
    discovery.stop().await.unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unreachable_candidates_are_not_live() {
    let client = IngestionClient::new(Duration::from_millis(500)).unwrap();
    // Nothing listens on a port we just released
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    let url = format!("http://127.0.0.1:{}/postqrdata", port);
    assert_eq!(client.first_live(&[url]).await, None);
}
