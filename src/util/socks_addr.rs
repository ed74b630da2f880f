//! SOCKS5 address (ATYP) encoding/decoding shared by the downstream front-end
//! (which must parse a client's CONNECT request) and the upstream dialer
//! (which must both encode a CONNECT request and discard the BND.ADDR/BND.PORT
//! that follows the reply). Both directions speak the same ATYP grammar, so
//! this is the one place that knows it.

use crate::error::{ProxyError, Result};
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const SOCKS5_VERSION: u8 = 0x05;

pub const CMD_CONNECT: u8 = 0x01;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

pub const AUTH_NO_AUTH: u8 = 0x00;
pub const AUTH_USERPASS: u8 = 0x02;
pub const AUTH_NOT_ACCEPTABLE: u8 = 0xFF;

pub const REPLY_SUCCEEDED: u8 = 0x00;
pub const REPLY_GENERAL_FAILURE: u8 = 0x01;
pub const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Encode `host:port` as a SOCKS5 `ATYP | DST.ADDR | DST.PORT` sequence,
/// picking IPv4/IPv6/domain the same way for both the upstream CONNECT
/// request and (elsewhere) for building a reply.
pub fn encode_dst_addr(host: &str, port: u16) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Ok(ipv4) = host.parse::<Ipv4Addr>() {
        buf.push(ATYP_IPV4);
        buf.extend_from_slice(&ipv4.octets());
    } else if let Ok(ipv6) = host.parse::<Ipv6Addr>() {
        buf.push(ATYP_IPV6);
        buf.extend_from_slice(&ipv6.octets());
    } else {
        if host.len() > 255 {
            return Err(ProxyError::MalformedRequest(
                "domain name longer than 255 bytes".to_string(),
            ));
        }
        buf.push(ATYP_DOMAIN);
        buf.push(host.len() as u8);
        buf.extend_from_slice(host.as_bytes());
    }
    buf.extend_from_slice(&port.to_be_bytes());
    Ok(buf)
}

/// Read an `ATYP | ADDR | PORT` sequence (the ATYP byte has already been
/// consumed by the caller) and render it as the `host:port` textual form the
/// dialer accepts. Used both to parse a downstream client's CONNECT request
/// and to discard/interpret an upstream's BND.ADDR/BND.PORT.
pub async fn read_socks_address<R: AsyncRead + Unpin>(reader: &mut R, atyp: u8) -> Result<String> {
    match atyp {
        ATYP_IPV4 => {
            let mut buf = [0u8; 6];
            reader.read_exact(&mut buf).await?;
            let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
            let port = u16::from_be_bytes([buf[4], buf[5]]);
            Ok(format!("{ip}:{port}"))
        }
        ATYP_IPV6 => {
            let mut buf = [0u8; 18];
            reader.read_exact(&mut buf).await?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[..16]);
            let ip = Ipv6Addr::from(octets);
            let port = u16::from_be_bytes([buf[16], buf[17]]);
            Ok(format!("[{ip}]:{port}"))
        }
        ATYP_DOMAIN => {
            let mut len_buf = [0u8; 1];
            reader.read_exact(&mut len_buf).await?;
            let len = len_buf[0] as usize;
            let mut domain_and_port = vec![0u8; len + 2];
            reader.read_exact(&mut domain_and_port).await?;
            let domain = String::from_utf8(domain_and_port[..len].to_vec())
                .map_err(|e| ProxyError::MalformedRequest(format!("invalid domain name: {e}")))?;
            let port = u16::from_be_bytes([domain_and_port[len], domain_and_port[len + 1]]);
            Ok(format!("{domain}:{port}"))
        }
        other => Err(ProxyError::MalformedRequest(format!(
            "unsupported address type: {other}"
        ))),
    }
}
