use thiserror::Error;

/// Errors produced by the chained proxy engine.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("listener cannot bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("failed to connect to upstream {addr}: {source}")]
    UpstreamDial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream handshake failed: {0}")]
    UpstreamHandshake(String),

    #[error("upstream rejected authentication method negotiation")]
    AuthRejected,

    #[error("upstream user/pass authentication failed (status {0})")]
    AuthFailed(u8),

    #[error("upstream refused CONNECT (reply code {0})")]
    UpstreamRefused(u8),

    #[error("malformed request from downstream: {0}")]
    MalformedRequest(String),

    #[error("proxy '{0}' is already running")]
    AlreadyRunning(String),

    #[error("proxy '{0}' is not running")]
    NotRunning(String),

    #[error("proxy '{0}' not found")]
    NotFound(String),
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, ProxyError>;
