//! Address-level types shared by the server and its clients.
//!
//! The status vocabulary is deliberately tiny:
//! - idle:   verified usable and not handed out
//! - using:  handed out by a `pick`, not yet reported back
//! - bad:    reported unusable; sticky until an explicit flush
//!
//! `using` only ever appears on the server side — a client report
//! carrying it is rejected as malformed.

use std::net::Ipv6Addr;

use ipnetwork::Ipv6Network;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Status of an address inside a mirror, keyed by the tenant that uses it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddrStatus {
    /// Usable and available for the next pick.
    #[default]
    Idle,
    /// Handed out; no pick may return it until it is reported back.
    Using,
    /// Reported unusable. Survives syncs, cleared only by flush.
    Bad,
}

impl AddrStatus {
    /// Whether a client may report this status. `using` is assigned by
    /// the server alone.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, AddrStatus::Using)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AddrStatus::Idle => "idle",
            AddrStatus::Using => "using",
            AddrStatus::Bad => "bad",
        }
    }
}

impl std::str::FromStr for AddrStatus {
    type Err = PoolError;

    /// Case-sensitive: the wire vocabulary is exactly {idle, using, bad}.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(AddrStatus::Idle),
            "using" => Ok(AddrStatus::Using),
            "bad" => Ok(AddrStatus::Bad),
            other => Err(PoolError::Malformed(format!("unknown status: {other:?}"))),
        }
    }
}

/// A client's verdict on an address it was handed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddrReportInfo {
    pub addr: Ipv6Addr,
    pub status: AddrStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AddrReportInfo {
    pub fn idle(addr: Ipv6Addr) -> Self {
        Self { addr, status: AddrStatus::Idle, reason: None }
    }

    pub fn bad(addr: Ipv6Addr, reason: impl Into<String>) -> Self {
        Self { addr, status: AddrStatus::Bad, reason: Some(reason.into()) }
    }

    /// Reject reports that claim a server-only status.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.status.is_reportable() {
            Ok(())
        } else {
            Err(PoolError::Malformed("status 'using' cannot be reported".into()))
        }
    }
}

/// The IPv6 network currently routed to this host, together with the
/// interface it arrives on.
///
/// Equality is by network and bit length only — the same delegation
/// moving to another interface does not invalidate the pool.
#[derive(Debug, Clone, Eq)]
pub struct Prefix {
    pub iface: String,
    pub net: Ipv6Network,
}

impl PartialEq for Prefix {
    fn eq(&self, other: &Self) -> bool {
        self.net == other.net
    }
}

impl std::fmt::Display for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on {}", self.net, self.iface)
    }
}

impl Prefix {
    /// Normalize an interface address to its containing network.
    pub fn from_addr(iface: &str, addr: Ipv6Addr, bits: u8) -> Result<Self, PoolError> {
        let raw = Ipv6Network::new(addr, bits)
            .map_err(|e| PoolError::Malformed(format!("bad prefix length {bits}: {e}")))?;
        let net = Ipv6Network::new(raw.network(), bits)
            .map_err(|e| PoolError::Internal(format!("prefix normalization: {e}")))?;
        Ok(Self { iface: iface.to_string(), net })
    }

    pub fn contains(&self, addr: Ipv6Addr) -> bool {
        self.net.contains(addr)
    }
}

/// Decompose an address into its 8 hextets.
pub fn addr_to_segs(addr: Ipv6Addr) -> [u16; 8] {
    addr.segments()
}

/// Draw a uniformly random address inside `net`: the prefix bits are
/// kept verbatim, the host bits come from the supplied CSPRNG.
pub fn random_addr_in(net: Ipv6Network, rng: &mut impl RngCore) -> Ipv6Addr {
    let mut raw = [0u8; 16];
    rng.fill_bytes(&mut raw);
    let host = u128::from_be_bytes(raw);

    let mask = u128::from_be_bytes(net.mask().octets());
    let base = u128::from_be_bytes(net.network().octets());
    Ipv6Addr::from((base & mask) | (host & !mask))
}

// ── Stats ─────────────────────────────────────────────────────────────────────

/// Per-mirror totals, as returned by `/stats?dbname=...`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorStats {
    pub total: usize,
    pub idle: usize,
    pub using: usize,
    pub bad: usize,
}

/// Global totals, as returned by `/stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total: usize,
    pub prefix: Option<String>,
}
