pub mod routes;

use std::io;
use std::net::SocketAddr;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("ingestion port {addr} is already in use; close the program holding it and restart")]
    AddrInUse { addr: SocketAddr },

    #[error("failed to bind ingestion server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("ingestion server error: {0}")]
    Serve(#[from] io::Error),
}

/// Bind the ingestion listener, classifying "address in use" separately
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, IngestionError> {
    TcpListener::bind(addr).await.map_err(|source| {
        if source.kind() == io::ErrorKind::AddrInUse {
            IngestionError::AddrInUse { addr }
        } else {
            IngestionError::Bind { addr, source }
        }
    })
}

/// Serve until cancelled, then stop accepting and finish in-flight requests
pub async fn serve(
    listener: TcpListener,
    app: Router,
    cancel: CancellationToken,
) -> Result<(), IngestionError> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
