//! sixpool integration test harness.
//!
//! Each test builds an in-process pool service with a fixed prefix
//! source and a stub prober, serves the real RPC router on an
//! ephemeral loopback port, and drives it over HTTP like any client
//! would. Nothing here touches the kernel routing table or ndppd —
//! those paths need a routed prefix and real privileges, and are
//! covered by the route module's own tests.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sixpool_api::ApiState;
use sixpool_core::{Prefix, ServiceConfig};
use sixpool_services::{NoopRouteControl, PoolService, StaticPrefixSource, StaticProber};

mod pool;
mod recovery;
mod replenish;

pub const PREFIX_A: &str = "2001:db8::/64";
pub const PREFIX_B: &str = "2001:db8:1::/64";

pub fn prefix(net: &str) -> Prefix {
    Prefix {
        iface: "test0".to_string(),
        net: net.parse().unwrap(),
    }
}

pub fn fresh_root(tag: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("sixpool-it-{}-{}", std::process::id(), tag));
    let _ = std::fs::remove_dir_all(&root);
    root
}

pub struct Harness {
    pub svc: PoolService,
    pub base: String,
    pub prefixes: Arc<StaticPrefixSource>,
    pub prober: Arc<StaticProber>,
    pub db_root: PathBuf,
    server: tokio::task::JoinHandle<()>,
}

impl Harness {
    /// Fresh storage, fixed prefix, always-usable prober, loops running.
    pub async fn start(tag: &str, usable_num: usize) -> Harness {
        Self::start_at(fresh_root(tag), usable_num, true).await
    }

    /// Start over existing (or empty) storage. `usable` seeds the
    /// prober's verdict.
    pub async fn start_at(db_root: PathBuf, usable_num: usize, usable: bool) -> Harness {
        let cfg = ServiceConfig {
            db_root: db_root.clone(),
            usable_num,
            route_check_interval_secs: 1,
            mirror_sync_interval_secs: 1,
            replenish_interval_secs: 1,
            save_interval_secs: 1,
            ..ServiceConfig::default()
        };

        let prefixes = Arc::new(StaticPrefixSource::new(prefix(PREFIX_A)));
        let prober = Arc::new(StaticProber::new(usable));
        let svc = PoolService::new(
            cfg,
            prefixes.clone(),
            prober.clone(),
            Arc::new(NoopRouteControl),
        )
        .await
        .expect("pool service should initialize");

        // Install the prefix before traffic arrives, then let the
        // loops take over.
        svc.route_tick().await.expect("initial route tick");
        svc.start();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let base = format!("http://{}", listener.local_addr().unwrap());
        let state = ApiState { pool: svc.clone() };
        let server = tokio::spawn(async move {
            let _ = sixpool_api::serve(state, listener).await;
        });

        Harness { svc, base, prefixes, prober, db_root, server }
    }

    pub async fn shutdown(self) {
        self.svc.stop().await;
        self.server.abort();
    }

    pub fn cleanup(&self) {
        let _ = std::fs::remove_dir_all(&self.db_root);
    }

    pub async fn get(&self, path_query: &str) -> (reqwest::StatusCode, serde_json::Value) {
        let response = reqwest::get(format!("{}{}", self.base, path_query))
            .await
            .expect("request should reach the in-process server");
        let status = response.status();
        let body = response.json().await.unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    pub async fn post(
        &self,
        path_query: &str,
        body: serde_json::Value,
    ) -> (reqwest::StatusCode, serde_json::Value) {
        let response = reqwest::Client::new()
            .post(format!("{}{}", self.base, path_query))
            .json(&body)
            .send()
            .await
            .expect("request should reach the in-process server");
        let status = response.status();
        let body = response.json().await.unwrap_or(serde_json::Value::Null);
        (status, body)
    }
}

/// Poll a condition until it holds or the deadline passes.
pub async fn wait_for<F, Fut>(deadline: Duration, mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if cond().await {
            return true;
        }
        if start.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// ── Cold start ────────────────────────────────────────────────────────────────

/// From empty storage, the replenisher fills the global pool to the
/// configured target and /stats reflects it.
#[tokio::test(flavor = "multi_thread")]
async fn cold_start_fills_pool_to_target() {
    let h = Harness::start("cold-start", 20).await;

    let filled = wait_for(Duration::from_secs(10), || async {
        let (_, body) = h.get("/stats").await;
        body["global"]["total"].as_u64() == Some(20)
    })
    .await;
    assert!(filled, "pool never reached its target");

    let (_, body) = h.get("/stats").await;
    assert_eq!(body["global"]["prefix"], PREFIX_A);

    h.cleanup();
    h.shutdown().await;
}
