use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use shared::protocol::parse_discovery_response;

/// One answer to a discovery broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredServer {
    /// Address the response came from
    pub responder: SocketAddr,
    /// Ingestion URL it advertised
    pub url: String,
}

/// Broadcast `request` to `target` and collect responses until `wait` elapses.
/// URLs are deduplicated, keeping the first responder that reported each.
pub async fn discover(
    target: SocketAddr,
    request: &str,
    response_prefix: &str,
    wait: Duration,
) -> Result<Vec<DiscoveredServer>> {
    let bind_addr: SocketAddr = if target.is_ipv4() {
        "0.0.0.0:0".parse()?
    } else {
        "[::]:0".parse()?
    };
    let socket = UdpSocket::bind(bind_addr)
        .await
        .context("Failed to bind discovery socket")?;
    socket.set_broadcast(target.is_ipv4())?;

    socket
        .send_to(request.as_bytes(), target)
        .await
        .with_context(|| format!("Failed to send discovery request to {}", target))?;
    tracing::debug!("Sent discovery request to {}", target);

    let deadline = Instant::now() + wait;
    let mut seen = HashSet::new();
    let mut servers = Vec::new();
    let mut buf = [0u8; 1024];

    loop {
        let received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await;
        let (len, responder) = match received {
            Err(_) => break,
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                tracing::warn!("Failed to receive discovery response: {}", e);
                continue;
            }
        };

        let text = String::from_utf8_lossy(&buf[..len]);
        let Some(url) = parse_discovery_response(response_prefix, &text) else {
            tracing::debug!("Ignoring unrelated datagram from {}", responder);
            continue;
        };

        if seen.insert(url.to_string()) {
            tracing::debug!("Discovered {} via {}", url, responder);
            servers.push(DiscoveredServer { responder, url: url.to_string() });
        }
    }

    Ok(servers)
}
