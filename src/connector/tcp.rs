//! TCP reachability check for vendors without a native driver.
//!
//! Uses a blocking socket in spawn_blocking so the connect timeout is exact.

use std::io;
use std::net::{IpAddr, Shutdown, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use super::ConnectError;

/// Check that `host:port` accepts a TCP connection within `timeout`.
pub async fn check_reachable(host: &str, port: u16, timeout: Duration) -> Result<(), ConnectError> {
    // Resolve before spawn_blocking (DNS is async)
    let addr = resolve_address(host, port).await?;

    tokio::task::spawn_blocking(move || connect_blocking(addr, timeout))
        .await
        .map_err(|e| ConnectError::Unreachable(format!("spawn_blocking failed: {}", e)))?
}

async fn resolve_address(host: &str, port: u16) -> Result<SocketAddr, ConnectError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(ConnectError::Config("empty host".to_string()));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ConnectError::Unreachable(format!("DNS resolution failed: {}", e)))?;

    addrs
        .next()
        .ok_or_else(|| {
            ConnectError::Unreachable("DNS resolution returned no addresses".to_string())
        })
}

fn connect_blocking(addr: SocketAddr, timeout: Duration) -> Result<(), ConnectError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ConnectError::Unreachable(format!("failed to create socket: {}", e)))?;

    socket.connect_timeout(&addr.into(), timeout).map_err(|e| match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ConnectError::Timeout(timeout),
        _ => ConnectError::Unreachable(e.to_string()),
    })?;

    let _ = socket.shutdown(Shutdown::Both);
    Ok(())
}
