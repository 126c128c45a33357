//! Error taxonomy for the pool service and its clients.
//!
//! One enum crosses every boundary: component → service → RPC status
//! code → client. The short `name()` is what travels on the wire in
//! `{"error": "..."}` bodies, and `from_name` turns it back into the
//! same variant on the client side.

use std::net::Ipv6Addr;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("interface not found: {0}")]
    NoInterface(String),
    #[error("no global IPv6 address on {0}")]
    NoGlobalAddress(String),
    #[error("no prefix installed")]
    NoPrefix,
    #[error("no idle address available")]
    NoAddress,
    #[error("no such mirror: {0}")]
    NoMirror(String),
    #[error("usability check failed for {0}")]
    CheckFailed(Ipv6Addr),
    #[error("NDP proxy restart failed: {0}")]
    ProxyRestart(String),
    #[error("pool still empty after {0} adapt attempts")]
    PoolExhausted(u32),
    #[error("operation timed out")]
    Timeout,
    #[error("resource busy")]
    Busy,
    #[error("cancelled")]
    Cancelled,
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl PoolError {
    /// Stable wire name, used in JSON error bodies.
    pub fn name(&self) -> &'static str {
        match self {
            PoolError::NoInterface(_) => "NoInterface",
            PoolError::NoGlobalAddress(_) => "NoGlobalAddress",
            PoolError::NoPrefix => "NoPrefix",
            PoolError::NoAddress => "NoAddress",
            PoolError::NoMirror(_) => "NoMirror",
            PoolError::CheckFailed(_) => "CheckFailed",
            PoolError::ProxyRestart(_) => "ProxyRestart",
            PoolError::PoolExhausted(_) => "PoolExhausted",
            PoolError::Timeout => "Timeout",
            PoolError::Busy => "Busy",
            PoolError::Cancelled => "Cancelled",
            PoolError::Malformed(_) => "Malformed",
            PoolError::Internal(_) => "Internal",
        }
    }

    /// Rebuild a variant from its wire name. Unknown names collapse to
    /// `Internal` so an old client survives a newer server.
    pub fn from_name(name: &str, detail: &str) -> Self {
        match name {
            "NoInterface" => PoolError::NoInterface(detail.to_string()),
            "NoGlobalAddress" => PoolError::NoGlobalAddress(detail.to_string()),
            "NoPrefix" => PoolError::NoPrefix,
            "NoAddress" => PoolError::NoAddress,
            "NoMirror" => PoolError::NoMirror(detail.to_string()),
            "ProxyRestart" => PoolError::ProxyRestart(detail.to_string()),
            "Timeout" => PoolError::Timeout,
            "Busy" => PoolError::Busy,
            "Cancelled" => PoolError::Cancelled,
            "Malformed" => PoolError::Malformed(detail.to_string()),
            _ => PoolError::Internal(format!("{name}: {detail}")),
        }
    }

    /// Errors a client should answer with a retry instead of surfacing.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::NoAddress | PoolError::Busy)
    }
}
