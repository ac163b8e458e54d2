use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// Opens the discovery socket. A seam so bind failures can be simulated.
pub trait Binder: Send + Sync + 'static {
    fn bind(&self, addr: SocketAddr) -> io::Result<UdpSocket>;
}

/// Binds a real UDP socket with address reuse and broadcast receive enabled
#[derive(Debug, Clone)]
pub struct SystemBinder {
    pub reuse_address: bool,
}

impl Binder for SystemBinder {
    fn bind(&self, addr: SocketAddr) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(self.reuse_address)?;
        if addr.is_ipv4() {
            socket.set_broadcast(true)?;
        }
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;

        UdpSocket::from_std(socket.into())
    }
}

/// What to do after a failed bind attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Bounded, fixed-delay retry for a port held by another process.
/// Any failure other than "address in use" is not retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total bind attempts, including the first
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// `attempt` is 1-based: the attempt that just failed
    pub fn after_failure(&self, attempt: u32, err: &io::Error) -> BindDecision {
        if err.kind() == io::ErrorKind::AddrInUse && attempt < self.max_attempts {
            BindDecision::RetryAfter(self.delay)
        } else {
            BindDecision::GiveUp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy { max_attempts: 3, delay: Duration::from_secs(5) }
    }

    #[test]
    fn test_addr_in_use_is_retried_until_budget_spent() {
        let err = io::Error::from(io::ErrorKind::AddrInUse);
        let policy = policy();

        assert_eq!(policy.after_failure(1, &err), BindDecision::RetryAfter(Duration::from_secs(5)));
        assert_eq!(policy.after_failure(2, &err), BindDecision::RetryAfter(Duration::from_secs(5)));
        assert_eq!(policy.after_failure(3, &err), BindDecision::GiveUp);
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let err = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(policy().after_failure(1, &err), BindDecision::GiveUp);
    }

    #[tokio::test]
    async fn test_system_binder_reports_addr_in_use() {
        // The holder does not set SO_REUSEADDR, so the second bind must fail
        let holder = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = holder.local_addr().unwrap();

        let err = SystemBinder { reuse_address: true }.bind(addr).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }

    #[tokio::test]
    async fn test_system_binder_binds_ephemeral_port() {
        let socket = SystemBinder { reuse_address: true }
            .bind("127.0.0.1:0".parse().unwrap())
            .unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }
}
