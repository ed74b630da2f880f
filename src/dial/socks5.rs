//! SOCKS5 client: negotiates a CONNECT tunnel through an upstream SOCKS5
//! proxy (RFC 1928), with optional USER/PASS sub-negotiation (RFC 1929).

use crate::config::UpstreamConfig;
use crate::error::{ProxyError, Result};
use crate::util::socks_addr::{
    encode_dst_addr, read_socks_address, ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, AUTH_NOT_ACCEPTABLE,
    AUTH_NO_AUTH, AUTH_USERPASS, REPLY_SUCCEEDED, SOCKS5_VERSION,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Open a TCP connection to `upstream.address` and run the SOCKS5 CONNECT
/// handshake against `target` (`host:port`), authenticating with USER/PASS
/// when credentials are configured. Returns the same socket, now
/// byte-transparent to `target`.
pub async fn dial(upstream: &UpstreamConfig, target: &str) -> Result<TcpStream> {
    let conn = TcpStream::connect(&upstream.address)
        .await
        .map_err(|source| ProxyError::UpstreamDial {
            addr: upstream.address.clone(),
            source,
        })?;

    match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake(conn, upstream, target)).await {
        Ok(result) => result,
        Err(_) => Err(ProxyError::UpstreamHandshake(
            "timed out negotiating SOCKS5 handshake with upstream".to_string(),
        )),
    }
}

async fn handshake(
    mut conn: TcpStream,
    upstream: &UpstreamConfig,
    target: &str,
) -> Result<TcpStream> {
    negotiate_method(&mut conn, upstream).await?;
    send_connect_request(&mut conn, target).await?;
    Ok(conn)
}

async fn negotiate_method(conn: &mut TcpStream, upstream: &UpstreamConfig) -> Result<()> {
    if upstream.has_credentials() {
        conn.write_all(&[SOCKS5_VERSION, 0x02, AUTH_NO_AUTH, AUTH_USERPASS])
            .await?;
    } else {
        conn.write_all(&[SOCKS5_VERSION, 0x01, AUTH_NO_AUTH]).await?;
    }

    let mut reply = [0u8; 2];
    conn.read_exact(&mut reply).await?;
    if reply[0] != SOCKS5_VERSION {
        return Err(ProxyError::UpstreamHandshake(format!(
            "unexpected SOCKS version in method reply: {}",
            reply[0]
        )));
    }
    match reply[1] {
        AUTH_NOT_ACCEPTABLE => return Err(ProxyError::AuthRejected),
        AUTH_USERPASS => user_pass_auth(conn, upstream).await?,
        _ => {}
    }
    Ok(())
}

async fn user_pass_auth(conn: &mut TcpStream, upstream: &UpstreamConfig) -> Result<()> {
    let mut request = vec![0x01u8];
    request.push(upstream.username.len() as u8);
    request.extend_from_slice(upstream.username.as_bytes());
    request.push(upstream.password.len() as u8);
    request.extend_from_slice(upstream.password.as_bytes());
    conn.write_all(&request).await?;

    let mut reply = [0u8; 2];
    conn.read_exact(&mut reply).await?;
    if reply[1] != 0x00 {
        return Err(ProxyError::AuthFailed(reply[1]));
    }
    Ok(())
}

async fn send_connect_request(conn: &mut TcpStream, target: &str) -> Result<()> {
    let (host, port) = split_host_port(target)?;

    let mut request = vec![SOCKS5_VERSION, crate::util::socks_addr::CMD_CONNECT, 0x00];
    request.extend_from_slice(&encode_dst_addr(&host, port)?);
    conn.write_all(&request).await?;

    let mut header = [0u8; 4];
    conn.read_exact(&mut header).await?;
    if header[0] != SOCKS5_VERSION {
        return Err(ProxyError::UpstreamHandshake(format!(
            "unexpected SOCKS version in CONNECT reply: {}",
            header[0]
        )));
    }
    if header[1] != REPLY_SUCCEEDED {
        return Err(ProxyError::UpstreamRefused(header[1]));
    }

    // Discard BND.ADDR/BND.PORT; read_socks_address consumes exactly the
    // number of bytes the ATYP dictates regardless of what we do with them.
    match header[3] {
        ATYP_IPV4 | ATYP_IPV6 | ATYP_DOMAIN => {
            let _ = read_socks_address(conn, header[3]).await?;
        }
        other => {
            return Err(ProxyError::UpstreamHandshake(format!(
                "unsupported BND.ADDR address type: {other}"
            )))
        }
    }

    Ok(())
}

fn split_host_port(target: &str) -> Result<(String, u16)> {
    let idx = target
        .rfind(':')
        .ok_or_else(|| ProxyError::MalformedRequest(format!("missing port in {target}")))?;
    let host = target[..idx].trim_start_matches('[').trim_end_matches(']');
    let port: u16 = target[idx + 1..]
        .parse()
        .map_err(|_| ProxyError::MalformedRequest(format!("invalid port in {target}")))?;
    Ok((host.to_string(), port))
}
