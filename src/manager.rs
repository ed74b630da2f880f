//! Process-wide registry of live proxies, keyed by id. Owns start/stop
//! lifecycle, concurrency safety, and quiescence on stop.

use crate::config::{ConfigStore, Protocol};
use crate::error::{ProxyError, Result};
use crate::frontend::http::HttpFrontend;
use crate::frontend::socks5::Socks5Frontend;
use crate::frontend::Frontend;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Owns the set of running proxies and dispatches lifecycle operations
/// against a read-only [`ConfigStore`].
///
/// Reads (`is_running`, `list_running`) take the map's read lock; mutations
/// (`start`, `stop`) take the write lock only for the duration of the map
/// update. Binding a listener and running an accept loop both happen
/// outside any lock, so no lock is ever held across I/O.
pub struct ProxyManager {
    config_store: Arc<dyn ConfigStore>,
    proxies: RwLock<HashMap<String, Arc<dyn Frontend>>>,
}

impl ProxyManager {
    pub fn new(config_store: Arc<dyn ConfigStore>) -> Self {
        Self {
            config_store,
            proxies: RwLock::new(HashMap::new()),
        }
    }

    /// Start the proxy identified by `id`. Fails with `AlreadyRunning` if a
    /// live proxy is already registered for `id`, `NotFound` if no config
    /// record exists, or `UnsupportedProtocol` if `local.protocol` isn't
    /// `http`/`socks5`. Any failure leaves the registry unchanged.
    pub async fn start(&self, id: &str) -> Result<()> {
        {
            let proxies = self.proxies.read().await;
            if let Some(existing) = proxies.get(id) {
                if existing.is_running() {
                    return Err(ProxyError::AlreadyRunning(id.to_string()));
                }
            }
        }

        let config = self
            .config_store
            .get(id)
            .ok_or_else(|| ProxyError::NotFound(id.to_string()))?;

        let protocol = Protocol::parse(&config.local.protocol)
            .ok_or_else(|| ProxyError::UnsupportedProtocol(config.local.protocol.clone()))?;

        let frontend: Arc<dyn Frontend> = match protocol {
            Protocol::Http => HttpFrontend::start(config).await?,
            Protocol::Socks5 => Socks5Frontend::start(config).await?,
        };

        let mut proxies = self.proxies.write().await;
        proxies.insert(id.to_string(), frontend);
        Ok(())
    }

    /// Stop the proxy identified by `id`. Returns `NotFound`/`NotRunning`
    /// when the contract doesn't hold. Signals stop and removes the entry
    /// from the registry immediately; in-flight connection handlers drain
    /// asynchronously under their own deadlines.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let mut proxies = self.proxies.write().await;
        let frontend = proxies
            .get(id)
            .ok_or_else(|| ProxyError::NotFound(id.to_string()))?;
        if !frontend.is_running() {
            return Err(ProxyError::NotRunning(id.to_string()));
        }
        frontend.stop();
        proxies.remove(id);
        Ok(())
    }

    pub async fn is_running(&self, id: &str) -> bool {
        self.proxies
            .read()
            .await
            .get(id)
            .map(|frontend| frontend.is_running())
            .unwrap_or(false)
    }

    pub async fn list_running(&self) -> Vec<String> {
        self.proxies
            .read()
            .await
            .iter()
            .filter(|(_, frontend)| frontend.is_running())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Start every enabled config record. Collects and returns all errors;
    /// a single failure doesn't stop the rest from being attempted.
    pub async fn start_all_enabled(&self) -> Vec<ProxyError> {
        let mut errors = Vec::new();
        for config in self.config_store.list() {
            if !config.enabled {
                continue;
            }
            if let Err(err) = self.start(&config.id).await {
                errors.push(err);
            }
        }
        errors
    }

    /// Stop every currently-registered proxy. Enumerates ids under the
    /// read lock, releases it, then stops each individually.
    pub async fn stop_all(&self) -> Vec<ProxyError> {
        let ids: Vec<String> = self.proxies.read().await.keys().cloned().collect();
        let mut errors = Vec::new();
        for id in ids {
            if let Err(err) = self.stop(&id).await {
                errors.push(err);
            }
        }
        errors
    }

    /// Stop-then-start `id` if it is currently running. A no-op if it
    /// isn't. The two operations are sequential from the caller's
    /// viewpoint, not overlapped with other callers of the same id (both
    /// still serialize on the manager's write lock).
    pub async fn refresh(&self, id: &str) -> Result<()> {
        if self.is_running(id).await {
            self.stop(id).await?;
            self.start(id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InMemoryConfigStore, LocalConfig, ProxyConfig, UpstreamConfig};

    fn config(id: &str, local_protocol: &str, port: u16) -> ProxyConfig {
        ProxyConfig {
            id: id.to_string(),
            name: id.to_string(),
            enabled: true,
            upstream: UpstreamConfig {
                protocol: "http".to_string(),
                address: "127.0.0.1:1".to_string(),
                username: String::new(),
                password: String::new(),
                auth_method: String::new(),
            },
            local: LocalConfig {
                protocol: local_protocol.to_string(),
                listen_ip: "127.0.0.1".to_string(),
                listen_port: port,
            },
        }
    }

    fn manager_with(configs: Vec<ProxyConfig>) -> ProxyManager {
        let store = InMemoryConfigStore::new();
        for config in configs {
            store.put(config);
        }
        ProxyManager::new(Arc::new(store))
    }

    #[tokio::test]
    async fn start_unknown_id_is_not_found() {
        let manager = manager_with(vec![]);
        let err = manager.start("missing").await.unwrap_err();
        assert!(matches!(err, ProxyError::NotFound(_)));
    }

    #[tokio::test]
    async fn start_unsupported_protocol_leaves_registry_unchanged() {
        let manager = manager_with(vec![config("px", "quic", 0)]);
        let err = manager.start("px").await.unwrap_err();
        assert!(matches!(err, ProxyError::UnsupportedProtocol(_)));
        assert!(manager.list_running().await.is_empty());
    }

    #[tokio::test]
    async fn double_start_returns_already_running() {
        let manager = manager_with(vec![config("p1", "socks5", 0)]);
        manager.start("p1").await.unwrap();
        let err = manager.start("p1").await.unwrap_err();
        assert!(matches!(err, ProxyError::AlreadyRunning(_)));
        manager.stop("p1").await.unwrap();
    }

    #[tokio::test]
    async fn stop_twice_returns_not_found_second_time() {
        let manager = manager_with(vec![config("p1", "http", 0)]);
        manager.start("p1").await.unwrap();
        manager.stop("p1").await.unwrap();
        let err = manager.stop("p1").await.unwrap_err();
        assert!(matches!(err, ProxyError::NotFound(_)));
    }

    #[tokio::test]
    async fn stop_never_started_is_not_found() {
        let manager = manager_with(vec![config("p1", "http", 0)]);
        let err = manager.stop("p1").await.unwrap_err();
        assert!(matches!(err, ProxyError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_running_reflects_started_ids() {
        let manager = manager_with(vec![config("p1", "http", 0), config("p2", "socks5", 0)]);
        manager.start("p1").await.unwrap();
        manager.start("p2").await.unwrap();
        let mut ids = manager.list_running().await;
        ids.sort();
        assert_eq!(ids, vec!["p1".to_string(), "p2".to_string()]);
        manager.stop_all().await;
        assert!(manager.list_running().await.is_empty());
    }

    #[tokio::test]
    async fn start_all_enabled_skips_disabled() {
        let mut disabled = config("p1", "http", 0);
        disabled.enabled = false;
        let manager = manager_with(vec![disabled, config("p2", "socks5", 0)]);
        let errors = manager.start_all_enabled().await;
        assert!(errors.is_empty());
        assert_eq!(manager.list_running().await, vec!["p2".to_string()]);
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn refresh_restarts_running_proxy_on_same_port() {
        let manager = manager_with(vec![config("p1", "http", 0)]);
        manager.start("p1").await.unwrap();
        assert!(manager.is_running("p1").await);
        manager.refresh("p1").await.unwrap();
        assert!(manager.is_running("p1").await);
        manager.stop("p1").await.unwrap();
    }

    #[tokio::test]
    async fn refresh_is_noop_when_not_running() {
        let manager = manager_with(vec![config("p1", "http", 0)]);
        manager.refresh("p1").await.unwrap();
        assert!(!manager.is_running("p1").await);
    }

    #[tokio::test]
    async fn second_proxy_on_same_port_fails_to_bind() {
        // Bind an ephemeral port first so we know a concrete, already-taken port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let manager = manager_with(vec![config("p1", "http", port), config("p2", "socks5", port)]);
        manager.start("p1").await.unwrap();
        let err = manager.start("p2").await.unwrap_err();
        assert!(matches!(err, ProxyError::Bind { .. }));
        manager.stop("p1").await.unwrap();
    }
}
