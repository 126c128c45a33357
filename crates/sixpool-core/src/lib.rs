pub mod addr;
pub mod config;
pub mod error;

pub use addr::{AddrReportInfo, AddrStatus, GlobalStats, MirrorStats, Prefix};
pub use config::{ClientConfig, ServiceConfig};
pub use error::PoolError;
