//! Full-duplex byte relay between a client stream and an upstream tunnel.

use crate::error::Result;
use bytes::BytesMut;
use socket2::SockRef;
use std::net::Shutdown;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Copy bytes in both directions between `client` and `upstream` until
/// either direction hits EOF or an error. As soon as one direction finishes,
/// both sockets are force-closed to unblock the other copy task. Upstream
/// proxies don't reliably preserve half-close semantics, so an EOF on either
/// leg is treated as end-of-session for both.
///
/// Returns the first-observed error, if any.
pub async fn relay(client: TcpStream, upstream: TcpStream) -> Result<()> {
    let client = Arc::new(client);
    let upstream = Arc::new(upstream);

    let mut client_to_upstream = tokio::spawn(pump(client.clone(), upstream.clone()));
    let mut upstream_to_client = tokio::spawn(pump(upstream.clone(), client.clone()));

    let first = tokio::select! {
        r = &mut client_to_upstream => r,
        r = &mut upstream_to_client => r,
    };
    shutdown_both(&client, &upstream);

    let (c2u, u2c) = tokio::join!(client_to_upstream, upstream_to_client);
    let _ = first;
    c2u.unwrap_or(Ok(())).and(u2c.unwrap_or(Ok(())))
}

fn shutdown_both(client: &TcpStream, upstream: &TcpStream) {
    let _ = SockRef::from(client).shutdown(Shutdown::Both);
    let _ = SockRef::from(upstream).shutdown(Shutdown::Both);
}

async fn pump(reader: Arc<TcpStream>, writer: Arc<TcpStream>) -> Result<()> {
    let mut buf = BytesMut::zeroed(8192);
    loop {
        let n = (&*reader).read(&mut buf).await?;
        if n == 0 {
            break;
        }
        (&*writer).write_all(&buf[..n]).await?;
    }
    Ok(())
}
