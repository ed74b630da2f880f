//! Upstream dialers: open a TCP connection to the configured upstream proxy
//! and negotiate either an HTTP CONNECT tunnel or a SOCKS5 CONNECT session,
//! producing a byte-transparent stream to the target.

pub mod http;
pub mod socks5;

use crate::config::UpstreamConfig;
use crate::error::{ProxyError, Result};
use tokio::net::TcpStream;

/// Open a tunnel to `target` (`host:port`) through the configured upstream
/// proxy. On success the returned stream is byte-transparent to `target`.
pub async fn dial(upstream: &UpstreamConfig, target: &str) -> Result<TcpStream> {
    match upstream.protocol.as_str() {
        "http" => http::dial(upstream, target).await,
        "socks5" => socks5::dial(upstream, target).await,
        other => Err(ProxyError::UnsupportedProtocol(other.to_string())),
    }
}
