//! SOCKS5 front-end: RFC 1928 CONNECT only, NO-AUTH only toward clients.

use crate::config::{ProxyConfig, UpstreamConfig};
use crate::dial;
use crate::error::{ProxyError, Result};
use crate::frontend::Frontend;
use crate::relay::relay;
use crate::util::configure_tcp_stream;
use crate::util::socks_addr::{
    read_socks_address, ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, AUTH_NO_AUTH, CMD_CONNECT,
    REPLY_ADDRESS_TYPE_NOT_SUPPORTED, REPLY_COMMAND_NOT_SUPPORTED, REPLY_GENERAL_FAILURE,
    REPLY_SUCCEEDED, SOCKS5_VERSION,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Socks5Frontend {
    config: ProxyConfig,
    running: AtomicBool,
    stop_notify: Arc<Notify>,
}

impl Socks5Frontend {
    pub async fn start(config: ProxyConfig) -> Result<Arc<Self>> {
        if config.local.protocol != "socks5" {
            return Err(ProxyError::UnsupportedProtocol(config.local.protocol.clone()));
        }

        let addr = config.local.listen_addr();
        let listener =
            TcpListener::bind(&addr)
                .await
                .map_err(|source| ProxyError::Bind { addr: addr.clone(), source })?;

        tracing::info!("[SOCKS5] listening on {}", addr);

        let frontend = Arc::new(Self {
            config,
            running: AtomicBool::new(true),
            stop_notify: Arc::new(Notify::new()),
        });

        let accept_loop_frontend = frontend.clone();
        tokio::spawn(async move {
            accept_loop_frontend.serve(listener).await;
        });

        Ok(frontend)
    }

    async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.stop_notify.notified() => {
                    tracing::info!("[SOCKS5] {} stopping accept loop", self.config.id);
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!("[SOCKS5] {} accepted connection from {}", self.config.id, peer);
                            configure_tcp_stream(&stream, "socks5-client");
                            let upstream = self.config.upstream.clone();
                            tokio::spawn(async move {
                                if let Err(err) = handle_connection(stream, upstream).await {
                                    tracing::error!("[SOCKS5] connection error: {}", err);
                                }
                            });
                        }
                        Err(err) => {
                            tracing::error!("[SOCKS5] {} accept error: {}", self.config.id, err);
                        }
                    }
                }
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Frontend for Socks5Frontend {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// The 30-second handshake deadline covers the downstream negotiation, the
/// request parse, and the upstream dial/handshake; it is lifted before the
/// connection enters `relay` so long-lived tunnels aren't cut short.
async fn handle_connection(mut client: TcpStream, upstream: UpstreamConfig) -> Result<()> {
    let target = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        authenticate(&mut client).await?;
        read_connect_request(&mut client).await
    })
    .await
    .map_err(|_| ProxyError::UpstreamHandshake("SOCKS5 handshake timed out".to_string()))??;

    let dial_result = tokio::time::timeout(HANDSHAKE_TIMEOUT, dial::dial(&upstream, &target)).await;
    let tunnel = match dial_result {
        Ok(Ok(tunnel)) => tunnel,
        Ok(Err(err)) => {
            let _ = send_reply(&mut client, REPLY_GENERAL_FAILURE).await;
            return Err(err);
        }
        Err(_) => {
            let _ = send_reply(&mut client, REPLY_GENERAL_FAILURE).await;
            return Err(ProxyError::UpstreamHandshake(
                "upstream dial timed out".to_string(),
            ));
        }
    };

    send_reply(&mut client, REPLY_SUCCEEDED).await?;
    relay(client, tunnel).await
}

/// Always replies NO-AUTH regardless of what the client advertised. A
/// strict RFC 1928 server would reply `05 FF` if NO-AUTH wasn't among the
/// offered methods; this one accepts any client method list and approves
/// unconditionally.
async fn authenticate(conn: &mut TcpStream) -> Result<()> {
    let mut header = [0u8; 2];
    conn.read_exact(&mut header).await?;
    if header[0] != SOCKS5_VERSION {
        return Err(ProxyError::MalformedRequest(format!(
            "unsupported SOCKS version: {}",
            header[0]
        )));
    }
    let nmethods = header[1] as usize;
    if nmethods == 0 {
        return Err(ProxyError::MalformedRequest(
            "no authentication methods offered".to_string(),
        ));
    }
    let mut methods = vec![0u8; nmethods];
    conn.read_exact(&mut methods).await?;

    conn.write_all(&[SOCKS5_VERSION, AUTH_NO_AUTH]).await?;
    Ok(())
}

async fn read_connect_request(conn: &mut TcpStream) -> Result<String> {
    let mut header = [0u8; 4];
    conn.read_exact(&mut header).await?;
    if header[0] != SOCKS5_VERSION {
        return Err(ProxyError::MalformedRequest(format!(
            "unsupported SOCKS version: {}",
            header[0]
        )));
    }
    if header[1] != CMD_CONNECT {
        send_reply(conn, REPLY_COMMAND_NOT_SUPPORTED).await?;
        return Err(ProxyError::MalformedRequest(format!(
            "unsupported SOCKS5 command: {}",
            header[1]
        )));
    }

    let atyp = header[3];
    match atyp {
        ATYP_IPV4 | ATYP_IPV6 | ATYP_DOMAIN => read_socks_address(conn, atyp).await,
        _ => {
            send_reply(conn, REPLY_ADDRESS_TYPE_NOT_SUPPORTED).await?;
            Err(ProxyError::MalformedRequest(format!(
                "unsupported address type: {atyp}"
            )))
        }
    }
}

async fn send_reply(conn: &mut TcpStream, code: u8) -> Result<()> {
    conn.write_all(&[SOCKS5_VERSION, code, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await?;
    Ok(())
}
