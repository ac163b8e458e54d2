use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::{Map, Value};
use shared::protocol::{DISCOVERY_PORT, DISCOVERY_REQUEST, DISCOVERY_RESPONSE_PREFIX};
use catscan_probe::client::IngestionClient;
use catscan_probe::discover::discover;

/// Find CatScan desktops on the local network and optionally send a test scan
#[derive(Debug, Parser)]
#[command(name = "catscan-probe", version)]
struct Args {
    /// Where to send the discovery request
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::BROADCAST))]
    target: IpAddr,

    #[arg(long, default_value_t = DISCOVERY_PORT)]
    port: u16,

    /// How long to wait for discovery responses
    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,

    /// Skip discovery and use this ingestion URL directly
    #[arg(long)]
    url: Option<String>,

    /// Post a scan record with this qrdata to the first live desktop
    #[arg(long)]
    send: Option<String>,

    /// Extra record fields as key=value, repeatable
    #[arg(long = "field", value_parser = parse_field)]
    fields: Vec<(String, String)>,
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("catscan_probe=info"))
        )
        .init();

    let args = Args::parse();
    let timeout = Duration::from_millis(args.timeout_ms);

    let candidates = match args.url {
        Some(url) => vec![url],
        None => {
            let target = SocketAddr::new(args.target, args.port);
            let servers = discover(target, DISCOVERY_REQUEST, DISCOVERY_RESPONSE_PREFIX, timeout).await?;
            for server in &servers {
                println!("{}  (from {})", server.url, server.responder.ip());
            }
            servers.into_iter().map(|s| s.url).collect()
        }
    };

    if candidates.is_empty() {
        bail!("No desktop answered the discovery request");
    }

    let client = IngestionClient::new(timeout)?;
    let Some(live) = client.first_live(&candidates).await else {
        bail!("None of the {} advertised URLs answered the liveness probe", candidates.len());
    };
    println!("live: {}", live);

    if let Some(qrdata) = args.send {
        let extra: Map<String, Value> = args
            .fields
            .into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect();
        let record = client.send(&live, &qrdata, extra).await?;
        let rendered = serde_json::to_string_pretty(&record).context("Failed to render response")?;
        println!("{}", rendered);
    }

    Ok(())
}
