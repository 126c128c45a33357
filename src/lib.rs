//! Facade over the sixpool workspace crates.
//!
//! Most consumers want exactly one of these: scrapers take
//! [`client`], deployments run the `sixpoold` binary.

pub use sixpool_api as api;
pub use sixpool_client as client;
pub use sixpool_services as services;

pub use sixpool_core::{
    AddrReportInfo, AddrStatus, ClientConfig, PoolError, Prefix, ServiceConfig,
};
