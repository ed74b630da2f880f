//! Common test utilities and helpers

use chainproxy_rs::config::{InMemoryConfigStore, LocalConfig, ProxyConfig, UpstreamConfig};
use chainproxy_rs::manager::ProxyManager;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

/// Reserve an ephemeral local port and hand back the address, unbound.
#[allow(dead_code)]
pub async fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

#[allow(dead_code)]
pub fn proxy_config(
    id: &str,
    local_protocol: &str,
    listen_port: u16,
    upstream_protocol: &str,
    upstream_addr: &str,
    username: &str,
    password: &str,
) -> ProxyConfig {
    ProxyConfig {
        id: id.to_string(),
        name: id.to_string(),
        enabled: true,
        upstream: UpstreamConfig {
            protocol: upstream_protocol.to_string(),
            address: upstream_addr.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            auth_method: "basic".to_string(),
        },
        local: LocalConfig {
            protocol: local_protocol.to_string(),
            listen_ip: "127.0.0.1".to_string(),
            listen_port,
        },
    }
}

#[allow(dead_code)]
pub fn manager_with(configs: Vec<ProxyConfig>) -> Arc<ProxyManager> {
    let store = InMemoryConfigStore::new();
    for config in configs {
        store.put(config);
    }
    Arc::new(ProxyManager::new(Arc::new(store)))
}

/// Wait for a condition to become true (with timeout), polling every 20ms.
#[allow(dead_code)]
pub async fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Poll until a TCP connect to `addr` succeeds, or give up after `timeout`.
#[allow(dead_code)]
pub async fn wait_until_listening(addr: &str, timeout: Duration) {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("nothing listening on {addr} after {timeout:?}");
}

/// Plain TCP echo server, used as the ultimate "target" behind a tunnel.
#[allow(dead_code)]
pub async fn spawn_echo_server() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stream.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });
    (addr, handle)
}

/// A fake upstream HTTP proxy. Accepts exactly one connection, captures the
/// CONNECT request line + headers it receives, replies with `connect_reply`,
/// and, if the reply signals success, echoes any further bytes it
/// receives back to the caller, standing in for the tunneled target.
#[allow(dead_code)]
pub async fn spawn_fake_http_connect_upstream(
    connect_reply: &'static [u8],
) -> (SocketAddr, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_http_header(&mut stream).await;
        stream.write_all(connect_reply).await.unwrap();

        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
        request
    });
    (addr, handle)
}

/// A fake upstream HTTP proxy for forward-proxy mode: accepts the CONNECT
/// tunnel, replies 200, then reads one more HTTP request over that same
/// tunnel (the forwarded client request) and answers it with `http_response`.
#[allow(dead_code)]
pub async fn spawn_fake_http_forward_upstream(
    http_response: &'static [u8],
) -> (SocketAddr, JoinHandle<(String, String)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let connect_request = read_http_header(&mut stream).await;
        stream
            .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
            .await
            .unwrap();

        let forwarded_request = read_http_header(&mut stream).await;
        stream.write_all(http_response).await.unwrap();
        (connect_request, forwarded_request)
    });
    (addr, handle)
}

async fn read_http_header(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    loop {
        let n = stream.read(&mut tmp).await.unwrap();
        buf.extend_from_slice(&tmp[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// A fake upstream SOCKS5 proxy. Accepts one connection, negotiates NO-AUTH
/// or USER/PASS depending on `require_userpass`, parses the CONNECT request,
/// replies success, then echoes further bytes, standing in for the
/// tunneled target.
#[allow(dead_code)]
pub async fn spawn_fake_socks5_upstream(
    require_userpass: bool,
    expected_user: &'static str,
    expected_pass: &'static str,
) -> (SocketAddr, JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut header = [0u8; 2];
        stream.read_exact(&mut header).await.unwrap();
        let mut methods = vec![0u8; header[1] as usize];
        stream.read_exact(&mut methods).await.unwrap();

        if require_userpass {
            stream.write_all(&[0x05, 0x02]).await.unwrap();
            let mut sub_header = [0u8; 2];
            stream.read_exact(&mut sub_header).await.unwrap();
            let mut user = vec![0u8; sub_header[1] as usize];
            stream.read_exact(&mut user).await.unwrap();
            let mut plen = [0u8; 1];
            stream.read_exact(&mut plen).await.unwrap();
            let mut pass = vec![0u8; plen[0] as usize];
            stream.read_exact(&mut pass).await.unwrap();
            let ok = user == expected_user.as_bytes() && pass == expected_pass.as_bytes();
            stream
                .write_all(&[0x01, if ok { 0x00 } else { 0x01 }])
                .await
                .unwrap();
            if !ok {
                return Vec::new();
            }
        } else {
            stream.write_all(&[0x05, 0x00]).await.unwrap();
        }

        let mut connect_header = [0u8; 4];
        stream.read_exact(&mut connect_header).await.unwrap();
        let atyp = connect_header[3];
        let mut request = connect_header.to_vec();
        let addr_bytes = match atyp {
            0x01 => {
                let mut b = [0u8; 6];
                stream.read_exact(&mut b).await.unwrap();
                b.to_vec()
            }
            0x03 => {
                let mut len_buf = [0u8; 1];
                stream.read_exact(&mut len_buf).await.unwrap();
                let mut rest = vec![0u8; len_buf[0] as usize + 2];
                stream.read_exact(&mut rest).await.unwrap();
                let mut all = vec![len_buf[0]];
                all.extend_from_slice(&rest);
                all
            }
            0x04 => {
                let mut b = [0u8; 18];
                stream.read_exact(&mut b).await.unwrap();
                b.to_vec()
            }
            _ => Vec::new(),
        };
        request.extend_from_slice(&addr_bytes);

        stream
            .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();

        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
        request
    });
    (addr, handle)
}
