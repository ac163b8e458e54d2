//! UDP broadcast discovery.
//!
//! Clients on the same subnet broadcast a fixed request token to the discovery
//! port. The responder answers each request with one datagram per local
//! address, each carrying the ingestion URL reachable through that address.

pub mod bind;
pub mod responder;

use std::io;
use std::net::SocketAddr;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use bind::{Binder, RetryPolicy, SystemBinder};
pub use responder::DiscoveryResponder;

/// Observable lifecycle of the responder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    Stopped,
    Binding { attempt: u32 },
    Listening { local_addr: SocketAddr },
    /// Waiting out the retry delay before the next bind
    Error,
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("discovery port {addr} still in use after {attempts} bind attempts")]
    AddrInUse { addr: SocketAddr, attempts: u32 },

    #[error("failed to open discovery socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// A running responder task
pub struct DiscoveryHandle {
    pub state: watch::Receiver<ResponderState>,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), DiscoveryError>>,
}

impl DiscoveryHandle {
    pub fn spawn(responder: DiscoveryResponder, cancel: CancellationToken) -> Self {
        responder.mark_starting();
        let state = responder.subscribe();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move { responder.run(task_cancel).await });
        Self { state, cancel, task }
    }

    /// Wait until the responder is listening and return its bound address,
    /// or `None` if it stopped first.
    pub async fn listening(&mut self) -> Option<SocketAddr> {
        let state = self
            .state
            .wait_for(|s| matches!(s, ResponderState::Listening { .. } | ResponderState::Stopped))
            .await
            .ok()?;
        match *state {
            ResponderState::Listening { local_addr } => Some(local_addr),
            _ => None,
        }
    }

    /// Close the socket and wait for the task. Returns the reason the
    /// responder stopped on its own, if it did.
    pub async fn stop(self) -> Result<(), DiscoveryError> {
        self.cancel.cancel();
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Discovery task panicked: {}", e);
                Ok(())
            }
        }
    }
}
