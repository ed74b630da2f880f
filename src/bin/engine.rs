//! Demo binary: wires a single chained-proxy configuration into an
//! in-memory config store, starts it through the `ProxyManager`, and blocks
//! until Ctrl-C before stopping everything. Illustrative scaffolding around
//! the core engine, not itself specified behavior; a real caller supplies
//! its own `ConfigStore` and owns persistence.

use anyhow::{Context, Result};
use chainproxy_rs::config::{InMemoryConfigStore, LocalConfig, ProxyConfig, UpstreamConfig};
use chainproxy_rs::manager::ProxyManager;
use std::sync::Arc;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_NAME: &str = "chainproxy-engine";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let mut id = "p1".to_string();
    let mut local_protocol = "socks5".to_string();
    let mut listen_ip = "127.0.0.1".to_string();
    let mut listen_port: u16 = 1080;
    let mut upstream_protocol = "http".to_string();
    let mut upstream_addr: Option<String> = None;
    let mut username = String::new();
    let mut password = String::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--id" => {
                id = args.next().context("Expected id after --id")?;
            }
            "-l" | "--listen-protocol" => {
                local_protocol = args
                    .next()
                    .context("Expected protocol after --listen-protocol")?;
            }
            "--listen-ip" => {
                listen_ip = args.next().context("Expected address after --listen-ip")?;
            }
            "-p" | "--listen-port" => {
                let value = args.next().context("Expected port after --listen-port")?;
                listen_port = value
                    .parse()
                    .with_context(|| format!("--listen-port expects a valid port: {value}"))?;
            }
            "-u" | "--upstream-protocol" => {
                upstream_protocol = args
                    .next()
                    .context("Expected protocol after --upstream-protocol")?;
            }
            "-U" | "--upstream" => {
                upstream_addr = Some(args.next().context("Expected address after --upstream")?);
            }
            "--username" => {
                username = args.next().context("Expected value after --username")?;
            }
            "--password" => {
                password = args.next().context("Expected value after --password")?;
            }
            "-V" | "--version" => {
                println!("{APP_NAME} {VERSION}");
                return Ok(());
            }
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            other => {
                error!("Unknown argument: {}", other);
                anyhow::bail!("Unknown argument: {other}");
            }
        }
    }

    let upstream_addr = upstream_addr.context("Upstream address is required (use -U/--upstream)")?;

    let config = ProxyConfig {
        id: id.clone(),
        name: id.clone(),
        enabled: true,
        upstream: UpstreamConfig {
            protocol: upstream_protocol,
            address: upstream_addr,
            username,
            password,
            auth_method: "basic".to_string(),
        },
        local: LocalConfig {
            protocol: local_protocol,
            listen_ip,
            listen_port,
        },
    };

    info!("[Engine] {APP_NAME} v{VERSION}");
    info!(
        "[Engine] {} {} => {} {}",
        config.local.protocol,
        config.local.listen_addr(),
        config.upstream.protocol,
        config.upstream.address
    );

    let store = Arc::new(InMemoryConfigStore::new());
    store.put(config);
    let manager = Arc::new(ProxyManager::new(store));

    for err in manager.start_all_enabled().await {
        error!("[Engine] failed to start a configured proxy: {}", err);
    }

    if manager.list_running().await.is_empty() {
        anyhow::bail!("no proxy started; check the listen/upstream configuration");
    }

    info!("[Engine] running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("[Engine] shutting down");
    for err in manager.stop_all().await {
        error!("[Engine] error while stopping a proxy: {}", err);
    }

    Ok(())
}

fn print_help() {
    println!("Usage: {APP_NAME} [OPTIONS]");
    println!("Options:");
    println!("  --id ID                        Proxy identifier (default: p1)");
    println!("  -l, --listen-protocol PROTO     Local listener protocol: http|socks5 (default: socks5)");
    println!("  --listen-ip ADDR                Local bind address (default: 127.0.0.1)");
    println!("  -p, --listen-port PORT          Local bind port (default: 1080)");
    println!("  -u, --upstream-protocol PROTO   Upstream proxy protocol: http|socks5 (default: http)");
    println!("  -U, --upstream ADDR             Upstream proxy address host:port (required)");
    println!("  --username USER                 Upstream auth username (optional)");
    println!("  --password PASS                 Upstream auth password (optional)");
    println!("  -V, --version                   Show version information");
    println!("  -h, --help                      Show this help message");
}
