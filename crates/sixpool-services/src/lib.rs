pub mod checker;
pub mod global_db;
pub mod mirror_db;
pub mod persist;
pub mod pool;
pub mod prefixer;
pub mod route;
pub mod spawner;

pub use checker::{AddrProber, HttpChecker, StaticProber};
pub use global_db::GlobalDb;
pub use mirror_db::MirrorDb;
pub use pool::PoolService;
pub use prefixer::{InterfacePrefixer, PrefixSource, StaticPrefixSource};
pub use route::{NdppdRouteControl, NoopRouteControl, RouteControl, RouteUpdater};
pub use spawner::Spawner;
