pub mod client;
pub mod session;

pub use client::PoolClient;
pub use session::{BoundSession, CancelHandle, SourceBinding};
