//! HTTP front-end: a raw HTTP/1.1 listener (no managed server abstraction)
//! that dispatches `CONNECT` to tunnel mode and any other method to
//! forward-proxy mode.

use crate::config::ProxyConfig;
use crate::dial;
use crate::error::{ProxyError, Result};
use crate::frontend::Frontend;
use crate::relay::relay;
use crate::util::configure_tcp_stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

const MAX_HEADER_SIZE: usize = 64 * 1024;
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

pub struct HttpFrontend {
    config: ProxyConfig,
    running: AtomicBool,
    stop_notify: Arc<Notify>,
}

impl HttpFrontend {
    /// Bind the listener and spawn the accept loop. Returns once the bind
    /// has either succeeded or failed. The accept loop itself runs in the
    /// background.
    pub async fn start(config: ProxyConfig) -> Result<Arc<Self>> {
        if config.local.protocol != "http" {
            return Err(ProxyError::UnsupportedProtocol(config.local.protocol.clone()));
        }

        let addr = config.local.listen_addr();
        let listener =
            TcpListener::bind(&addr)
                .await
                .map_err(|source| ProxyError::Bind { addr: addr.clone(), source })?;

        tracing::info!("[HTTP] listening on {}", addr);

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
                    tracing::info!("[HTTP] {} stopping accept loop", self.config.id);
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!("[HTTP] {} accepted connection from {}", self.config.id, peer);
                            configure_tcp_stream(&stream, "http-client");
                            let upstream = self.config.upstream.clone();
                            tokio::spawn(async move {
                                if let Err(err) = handle_connection(stream, upstream).await {
                                    tracing::error!("[HTTP] connection error: {}", err);
                                }
                            });
                        }
                        Err(err) => {
                            tracing::error!("[HTTP] {} accept error: {}", self.config.id, err);
                        }
                    }
                }
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Frontend for HttpFrontend {
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

struct ParsedRequest {
    method: String,
    request_line: String,
    target: String,
    headers: Vec<String>,
    body: Vec<u8>,
}

async fn handle_connection(mut client: TcpStream, upstream: crate::config::UpstreamConfig) -> Result<()> {
    let (header_bytes, remaining) = read_http_header(&mut client).await?;
    let header_str = String::from_utf8(header_bytes)
        .map_err(|e| ProxyError::MalformedRequest(format!("invalid HTTP header encoding: {e}")))?;
    let request = parse_request(&header_str, remaining)?;

    if request.method.eq_ignore_ascii_case("CONNECT") {
        handle_connect(client, &upstream, &request).await
    } else {
        handle_forward(client, &upstream, &request).await
    }
}

async fn handle_connect(
    mut client: TcpStream,
    upstream: &crate::config::UpstreamConfig,
    request: &ParsedRequest,
) -> Result<()> {
    let tunnel = match dial::dial(upstream, &request.target).await {
        Ok(tunnel) => tunnel,
        Err(err) => {
            send_error(&mut client, 502, "Bad Gateway", &err.to_string()).await?;
            return Err(err);
        }
    };

    // "Hijacking" a raw-socket listener is a no-op: we never handed the
    // stream to a higher-level HTTP parser, so it is already ours to relay.
    client
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;

    relay(client, tunnel).await
}

async fn handle_forward(
    mut client: TcpStream,
    upstream: &crate::config::UpstreamConfig,
    request: &ParsedRequest,
) -> Result<()> {
    let target = host_header(request)
        .ok_or_else(|| ProxyError::MalformedRequest("missing Host header".to_string()))?;

    let mut tunnel = match dial::dial(upstream, &target).await {
        Ok(tunnel) => tunnel,
        Err(err) => {
            send_error(&mut client, 502, "Bad Gateway", &err.to_string()).await?;
            return Err(err);
        }
    };

    // Forward the original request line + headers + body verbatim.
    let mut out = Vec::new();
    out.extend_from_slice(request.request_line.as_bytes());
    out.extend_from_slice(b"\r\n");
    for header in &request.headers {
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&request.body);
    tunnel.write_all(&out).await?;

    // Read one HTTP response back and copy it to the client verbatim.
    let (resp_header, mut resp_remaining) = read_http_header(&mut tunnel).await?;
    let content_length = parse_content_length(&resp_header);
    if let Some(len) = content_length {
        while resp_remaining.len() < len {
            let mut buf = [0u8; 8192];
            let n = tunnel.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            resp_remaining.extend_from_slice(&buf[..n]);
        }
    } else {
        // No Content-Length: drain whatever the tunnel still has to offer.
        let mut buf = [0u8; 8192];
        loop {
            match tunnel.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => resp_remaining.extend_from_slice(&buf[..n]),
                Err(_) => break,
            }
        }
    }

    client.write_all(&resp_header).await?;
    client.write_all(&resp_remaining).await?;
    Ok(())
}

async fn send_error(client: &mut TcpStream, code: u16, reason: &str, body: &str) -> Result<()> {
    let response = format!(
        "HTTP/1.1 {code} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    client.write_all(response.as_bytes()).await?;
    Ok(())
}

async fn read_http_header(stream: &mut TcpStream) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut buf = Vec::with_capacity(1024);
    let mut tmp = [0u8; 1024];
    loop {
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            return Err(ProxyError::MalformedRequest(
                "connection closed before HTTP header complete".to_string(),
            ));
        }
        buf.extend_from_slice(&tmp[..n]);
        if buf.len() > MAX_HEADER_SIZE {
            return Err(ProxyError::MalformedRequest("HTTP header too large".to_string()));
        }
        if let Some(end) = find_header_end(&buf) {
            let header = buf[..end].to_vec();
            let remaining = buf[end..].to_vec();
            return Ok((header, remaining));
        }
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
}

fn parse_request(header: &str, body: Vec<u8>) -> Result<ParsedRequest> {
    let mut lines = header.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| ProxyError::MalformedRequest("missing request line".to_string()))?
        .to_string();

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| ProxyError::MalformedRequest("missing method".to_string()))?
        .to_string();
    let target = parts
        .next()
        .ok_or_else(|| ProxyError::MalformedRequest("missing request target".to_string()))?
        .to_string();

    let headers: Vec<String> = lines
        .map(|line| line.to_string())
        .filter(|line| !line.is_empty())
        .collect();

    Ok(ParsedRequest {
        method,
        request_line,
        target,
        headers,
        body,
    })
}

fn host_header(request: &ParsedRequest) -> Option<String> {
    request
        .headers
        .iter()
        .find_map(|header| header.strip_prefix("Host:").or_else(|| header.strip_prefix("host:")))
        .map(|value| value.trim().to_string())
}

fn parse_content_length(header: &[u8]) -> Option<usize> {
    let header = String::from_utf8_lossy(header);
    header.lines().find_map(|line| {
        line.strip_prefix("Content-Length:")
            .or_else(|| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse().ok())
    })
}
