//! Proxy configuration data model and the read-only config-store contract.
//!
//! The engine never mutates configuration; it only looks records up through
//! [`ConfigStore`]. Persisting those records (JSON/YAML files, a database,
//! whatever) is a caller concern, not this crate's.

use std::collections::HashMap;
use std::sync::RwLock;

/// Protocol spoken by a local listener or an upstream proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Socks5,
}

impl Protocol {
    /// Parse a protocol name the way the config records spell it.
    ///
    /// Returns `None` for anything other than `http`/`socks5` so callers can
    /// map unknown strings to `ProxyError::UnsupportedProtocol` themselves.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Protocol::Http),
            "socks5" => Some(Protocol::Socks5),
            _ => None,
        }
    }
}

/// Upstream proxy this engine chains through.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub protocol: String,
    pub address: String,
    pub username: String,
    pub password: String,
    /// Advisory hint; only basic/userpass auth is ever actually negotiated.
    pub auth_method: String,
}

impl UpstreamConfig {
    /// `true` iff both username and password are non-empty.
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

/// Local listener this engine binds and accepts client connections on.
#[derive(Debug, Clone)]
pub struct LocalConfig {
    pub protocol: String,
    pub listen_ip: String,
    pub listen_port: u16,
}

impl LocalConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_ip, self.listen_port)
    }
}

/// A single chained-proxy configuration record.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub upstream: UpstreamConfig,
    pub local: LocalConfig,
}

/// Read-only lookup the manager uses to resolve an id to a config record.
///
/// Implementations are free to back this with a file, a database, or (as
/// here) an in-memory map; the manager only ever calls `get`/`list`.
pub trait ConfigStore: Send + Sync {
    fn get(&self, id: &str) -> Option<ProxyConfig>;
    fn list(&self) -> Vec<ProxyConfig>;
}

/// Reference in-memory [`ConfigStore`], primarily useful for the demo binary
/// and tests. Keeps insertion order like the Go config manager's
/// `proxyOrder` slice, without persisting anything to disk.
pub struct InMemoryConfigStore {
    records: RwLock<HashMap<String, ProxyConfig>>,
    order: RwLock<Vec<String>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Insert or replace a config record.
    pub fn put(&self, config: ProxyConfig) {
        let mut records = self.records.write().unwrap();
        let mut order = self.order.write().unwrap();
        if !records.contains_key(&config.id) {
            order.push(config.id.clone());
        }
        records.insert(config.id.clone(), config);
    }

    pub fn remove(&self, id: &str) {
        self.records.write().unwrap().remove(id);
        self.order.write().unwrap().retain(|existing| existing != id);
    }
}

impl Default for InMemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn get(&self, id: &str) -> Option<ProxyConfig> {
        self.records.read().unwrap().get(id).cloned()
    }

    fn list(&self) -> Vec<ProxyConfig> {
        let records = self.records.read().unwrap();
        let order = self.order.read().unwrap();
        order
            .iter()
            .filter_map(|id| records.get(id).cloned())
            .collect()
    }
}
