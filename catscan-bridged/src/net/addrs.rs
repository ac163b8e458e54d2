use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, ToSocketAddrs};
use shared::protocol::ingestion_url;
use crate::config::IngestionConfig;

/// Source of the local addresses advertised to discovery clients
pub trait AddressSource: Send + Sync + 'static {
    /// Non-loopback addresses in first-seen order. Never fails; an empty list
    /// means nothing could be resolved.
    fn local_addresses(&self) -> Vec<IpAddr>;
}

/// Resolves the machine's host name to its addresses
#[derive(Debug, Clone, Default)]
pub struct HostnameResolver;

impl AddressSource for HostnameResolver {
    fn local_addresses(&self) -> Vec<IpAddr> {
        match resolve_hostname() {
            Ok(addrs) => filter_local(addrs),
            Err(e) => {
                tracing::warn!("Failed to resolve local addresses: {}", e);
                Vec::new()
            }
        }
    }
}

/// A fixed address list, from `discovery.advertise_addresses`
#[derive(Debug, Clone)]
pub struct StaticAddresses(Vec<IpAddr>);

impl StaticAddresses {
    pub fn new(addrs: Vec<IpAddr>) -> Self {
        Self(filter_local(addrs))
    }
}

impl AddressSource for StaticAddresses {
    fn local_addresses(&self) -> Vec<IpAddr> {
        self.0.clone()
    }
}

fn resolve_hostname() -> io::Result<Vec<IpAddr>> {
    let hostname = hostname::get()?.to_string_lossy().to_string();
    let addrs = (hostname.as_str(), 0)
        .to_socket_addrs()?
        .map(|sa| sa.ip())
        .collect();
    Ok(addrs)
}

/// Drop loopback and unspecified addresses, dedupe keeping first-seen order
pub fn filter_local(addrs: impl IntoIterator<Item = IpAddr>) -> Vec<IpAddr> {
    let mut seen = HashSet::new();
    addrs
        .into_iter()
        .filter(|ip| !ip.is_loopback() && !ip.is_unspecified())
        .filter(|ip| seen.insert(*ip))
        .collect()
}

/// Every ingestion URL a client on the LAN could use to reach us
pub fn ingestion_urls(source: &dyn AddressSource, config: &IngestionConfig) -> Vec<String> {
    source
        .local_addresses()
        .into_iter()
        .map(|ip| ingestion_url(ip, config.port, &config.path))
        .collect()
}
