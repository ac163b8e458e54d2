use std::net::{IpAddr, SocketAddr};

/// UDP port the desktop listens on for discovery requests
pub const DISCOVERY_PORT: u16 = 29028;

/// Entire payload of a discovery request datagram
pub const DISCOVERY_REQUEST: &str = "CATSCAN_DISCOVERY_REQUEST";

/// Prefix of every discovery response; the ingestion URL follows directly
pub const DISCOVERY_RESPONSE_PREFIX: &str = "CATSCAN_DISCOVERY_RESPONSE:";

/// HTTP port of the ingestion endpoint
pub const INGESTION_PORT: u16 = 29027;

/// Path of the ingestion resource (POST records, GET liveness)
pub const INGESTION_PATH: &str = "/postqrdata";

/// Field names used in scan records
pub const FIELD_QRDATA: &str = "qrdata";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_CODE: &str = "code";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_MSG: &str = "msg";
pub const FIELD_DATA: &str = "data";

/// Build the ingestion URL advertised for one local address.
/// IPv6 literals come out bracketed.
pub fn ingestion_url(ip: IpAddr, port: u16, path: &str) -> String {
    let path = path.trim_start_matches('/');
    format!("http://{}/{}", SocketAddr::new(ip, port), path)
}

/// Encode a discovery response for the given URL
pub fn discovery_response(prefix: &str, url: &str) -> String {
    format!("{}{}", prefix, url)
}

/// Extract the URL from a discovery response, if it carries the prefix
pub fn parse_discovery_response<'a>(prefix: &str, payload: &'a str) -> Option<&'a str> {
    payload
        .strip_prefix(prefix)
        .map(str::trim)
        .filter(|url| !url.is_empty())
}
