use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use shared::protocol::{discovery_response, ingestion_url};
use crate::config::{DiscoveryConfig, IngestionConfig};
use crate::net::addrs::AddressSource;
use super::bind::{BindDecision, Binder, RetryPolicy, SystemBinder};
use super::{DiscoveryError, ResponderState};

/// Largest request we read; anything longer cannot be the token anyway
const MAX_DATAGRAM_SIZE: usize = 1024;

/// Back-to-back receive errors, with no datagram or idle poll in between,
/// after which the socket is treated as dead
const MAX_CONSECUTIVE_RECV_ERRORS: u32 = 16;

/// Steps of the responder state machine
enum Phase {
    Binding { attempt: u32 },
    Listening(UdpSocket),
    Backoff { next_attempt: u32, delay: Duration },
    Stopped(Result<(), DiscoveryError>),
}

enum ListenExit {
    Cancelled,
    Failed(io::Error),
}

pub struct DiscoveryResponder {
    bind_addr: SocketAddr,
    request_token: Vec<u8>,
    response_prefix: String,
    ingestion_port: u16,
    ingestion_path: String,
    policy: RetryPolicy,
    poll_interval: Duration,
    binder: Arc<dyn Binder>,
    addresses: Arc<dyn AddressSource>,
    state_tx: watch::Sender<ResponderState>,
}

impl DiscoveryResponder {
    pub fn new(
        discovery: &DiscoveryConfig,
        ingestion: &IngestionConfig,
        addresses: Arc<dyn AddressSource>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ResponderState::Stopped);
        Self {
            bind_addr: discovery.bind_addr(),
            request_token: discovery.request_token.clone().into_bytes(),
            response_prefix: discovery.response_prefix.clone(),
            ingestion_port: ingestion.port,
            ingestion_path: ingestion.path.clone(),
            policy: RetryPolicy {
                max_attempts: discovery.bind_attempts,
                delay: discovery.bind_retry_delay(),
            },
            poll_interval: discovery.poll_interval(),
            binder: Arc::new(SystemBinder { reuse_address: discovery.reuse_address }),
            addresses,
            state_tx,
        }
    }

    /// Replace the socket binder
    pub fn with_binder(mut self, binder: Arc<dyn Binder>) -> Self {
        self.binder = binder;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<ResponderState> {
        self.state_tx.subscribe()
    }

    pub(super) fn mark_starting(&self) {
        self.state_tx.send_replace(ResponderState::Binding { attempt: 1 });
    }

    /// Drive the state machine until cancelled or the socket cannot be bound.
    /// The socket is closed when this returns.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DiscoveryError> {
        let mut phase = Phase::Binding { attempt: 1 };

        loop {
            phase = match phase {
                Phase::Binding { attempt } => self.bind(attempt, &cancel),
                Phase::Listening(socket) => {
                    let local_addr = socket.local_addr().unwrap_or(self.bind_addr);
                    self.publish(ResponderState::Listening { local_addr });
                    tracing::info!("Discovery listening on {}", local_addr);

                    match self.listen(&socket, &cancel).await {
                        ListenExit::Cancelled => Phase::Stopped(Ok(())),
                        ListenExit::Failed(e) => {
                            tracing::error!("Discovery socket failed, rebinding: {}", e);
                            Phase::Backoff { next_attempt: 1, delay: self.policy.delay }
                        }
                    }
                }
                Phase::Backoff { next_attempt, delay } => {
                    self.publish(ResponderState::Error);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => Phase::Binding { attempt: next_attempt },
                        _ = cancel.cancelled() => Phase::Stopped(Ok(())),
                    }
                }
                Phase::Stopped(result) => {
                    self.publish(ResponderState::Stopped);
                    match &result {
                        Ok(()) => tracing::info!("Discovery responder stopped"),
                        Err(e) => tracing::error!("Discovery responder stopped: {}", e),
                    }
                    return result;
                }
            };
        }
    }

    fn bind(&self, attempt: u32, cancel: &CancellationToken) -> Phase {
        if cancel.is_cancelled() {
            return Phase::Stopped(Ok(()));
        }
        self.publish(ResponderState::Binding { attempt });

        let err = match self.binder.bind(self.bind_addr) {
            Ok(socket) => return Phase::Listening(socket),
            Err(e) => e,
        };

        match self.policy.after_failure(attempt, &err) {
            BindDecision::RetryAfter(delay) => {
                tracing::warn!(
                    "Discovery port {} in use, attempt {}/{}, retrying in {:?}",
                    self.bind_addr,
                    attempt,
                    self.policy.max_attempts,
                    delay
                );
                Phase::Backoff { next_attempt: attempt + 1, delay }
            }
            BindDecision::GiveUp if err.kind() == io::ErrorKind::AddrInUse => {
                Phase::Stopped(Err(DiscoveryError::AddrInUse {
                    addr: self.bind_addr,
                    attempts: attempt,
                }))
            }
            BindDecision::GiveUp => Phase::Stopped(Err(DiscoveryError::Bind {
                addr: self.bind_addr,
                source: err,
            })),
        }
    }

    async fn listen(&self, socket: &UdpSocket, cancel: &CancellationToken) -> ListenExit {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let mut consecutive_errors = 0u32;

        loop {
            if cancel.is_cancelled() {
                return ListenExit::Cancelled;
            }

            let received = tokio::time::timeout(self.poll_interval, socket.recv_from(&mut buf)).await;
            let (len, peer) = match received {
                // Poll timeout: go round and check for shutdown
                Err(_) => {
                    consecutive_errors = 0;
                    continue;
                }
                Ok(Ok(r)) => r,
                Ok(Err(e)) if is_transient(&e) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_RECV_ERRORS {
                        return ListenExit::Failed(e);
                    }
                    tracing::warn!("Discovery receive error, datagram skipped: {}", e);
                    continue;
                }
                Ok(Err(e)) => return ListenExit::Failed(e),
            };
            consecutive_errors = 0;

            if buf[..len] != self.request_token[..] {
                tracing::trace!("Ignoring {} byte datagram from {}", len, peer);
                continue;
            }

            self.answer(socket, peer).await;
        }
    }

    /// Send one response per local address back to the requester
    async fn answer(&self, socket: &UdpSocket, peer: SocketAddr) {
        let source = self.addresses.clone();
        let addrs = match tokio::task::spawn_blocking(move || source.local_addresses()).await {
            Ok(addrs) => addrs,
            Err(e) => {
                tracing::warn!("Address lookup task failed: {}", e);
                Vec::new()
            }
        };

        if addrs.is_empty() {
            tracing::warn!("Discovery request from {} but no local addresses to advertise", peer);
        }

        for ip in addrs {
            let url = ingestion_url(ip, self.ingestion_port, &self.ingestion_path);
            let response = discovery_response(&self.response_prefix, &url);
            match socket.send_to(response.as_bytes(), peer).await {
                Ok(_) => tracing::info!("Answered discovery request: {} -> {}", peer, url),
                Err(e) => tracing::warn!("Failed to answer {} with {}: {}", peer, url, e),
            }
        }
    }

    fn publish(&self, state: ResponderState) {
        self.state_tx.send_replace(state);
    }
}

/// Whether a receive error concerns a single datagram rather than the socket.
///
/// ICMP port-unreachable echoes of earlier replies, interrupted calls and
/// oversized datagrams (WSAEMSGSIZE on Windows, which has no `ErrorKind`) all
/// leave the socket usable. Only errors that say the socket itself is gone
/// or unusable tear it down.
fn is_transient(err: &io::Error) -> bool {
    !matches!(
        err.kind(),
        io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::Unsupported
    )
}
