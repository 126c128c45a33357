//! Replenish and route-change behavior, driven through the real
//! client session.

use std::time::Duration;

use sixpool_client::BoundSession;
use sixpool_core::ClientConfig;

use crate::{prefix, wait_for, Harness, PREFIX_B};

/// A session against an empty pool keeps retrying; once the prober
/// comes back to life the replenisher fills the pool, the sync loop
/// populates the mirror, and the next retry binds an address.
#[tokio::test(flavor = "multi_thread")]
async fn empty_pool_wait_then_adapt() {
    // Prober starts dead: replenish ticks produce nothing.
    let h = Harness::start_at(crate::fresh_root("empty-wait"), 3, false).await;

    let cfg = ClientConfig {
        server_url: h.base.clone(),
        dbname: "t2".to_string(),
        adapt_retry_interval_secs: 1,
        adapt_max_retries: 15,
        ..ClientConfig::default()
    };
    let connect = tokio::spawn(async move { BoundSession::connect(cfg).await });

    // Let a few retries fail, then revive the upstream.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!connect.is_finished(), "session should still be waiting");
    h.prober.set_usable(true);

    let mut session = tokio::time::timeout(Duration::from_secs(10), connect)
        .await
        .expect("session should adapt after replenish")
        .unwrap()
        .expect("adapt should succeed");
    assert!(session.current_addr().is_some());

    let (_, stats) = h.get("/stats?dbname=t2").await;
    assert_eq!(stats["using"], 1);

    // Round-trip the release through the session too.
    assert!(session.report(sixpool_core::AddrStatus::Idle).await.unwrap());
    assert!(session.current_addr().is_none());
    let (_, stats) = h.get("/stats?dbname=t2").await;
    assert_eq!(stats["using"], 0);

    h.cleanup();
    h.shutdown().await;
}

/// Exhausting the retry budget surfaces PoolExhausted instead of
/// hanging forever.
#[tokio::test(flavor = "multi_thread")]
async fn adapt_gives_up_eventually() {
    let h = Harness::start_at(crate::fresh_root("adapt-exhaust"), 2, false).await;

    let cfg = ClientConfig {
        server_url: h.base.clone(),
        dbname: "t3".to_string(),
        adapt_retry_interval_secs: 1,
        adapt_max_retries: 2,
        ..ClientConfig::default()
    };
    let result = BoundSession::connect(cfg).await;
    assert!(matches!(
        result,
        Err(sixpool_core::PoolError::PoolExhausted(2))
    ));

    h.cleanup();
    h.shutdown().await;
}

/// A prefix change flushes everything and the pool refills under the
/// new prefix; mirrors come back clean.
#[tokio::test(flavor = "multi_thread")]
async fn prefix_change_flushes_and_refills() {
    let h = Harness::start("prefix-change", 4).await;
    assert!(
        wait_for(Duration::from_secs(5), || async {
            let (_, body) = h.get("/stats").await;
            body["global"]["total"].as_u64() == Some(4)
        })
        .await
    );

    // Dirty a mirror first: one address out, one bad.
    let (_, body) = h.get("/pick?dbname=t1").await;
    let out = body["addr"].as_str().unwrap().to_string();
    let (_, body) = h.get("/pick?dbname=t1").await;
    let bad = body["addr"].as_str().unwrap().to_string();
    h.post(
        "/report",
        serde_json::json!({"dbname": "t1", "addr": bad, "status": "bad"}),
    )
    .await;

    h.prefixes.set(Some(prefix(PREFIX_B)));

    let refilled = wait_for(Duration::from_secs(10), || async {
        let (_, body) = h.get("/stats").await;
        body["global"]["prefix"].as_str() == Some(PREFIX_B)
            && body["global"]["total"].as_u64() == Some(4)
    })
    .await;
    assert!(refilled, "pool never refilled under the new prefix");

    // Mirrors track the new global set with no leftover state.
    let synced = wait_for(Duration::from_secs(5), || async {
        let (_, stats) = h.get("/stats?dbname=t1").await;
        stats["total"].as_u64() == Some(4)
            && stats["bad"].as_u64() == Some(0)
            && stats["using"].as_u64() == Some(0)
    })
    .await;
    assert!(synced, "mirror kept stale state across the prefix change");

    // Everything pickable is under the new prefix; the old addresses
    // are gone.
    let (_, body) = h.get("/picks?dbname=t1&num=4").await;
    let addrs = body["addrs"].as_array().unwrap();
    assert_eq!(addrs.len(), 4);
    let new_net: ipnetwork::Ipv6Network = PREFIX_B.parse().unwrap();
    for addr in addrs {
        let parsed: std::net::Ipv6Addr = addr.as_str().unwrap().parse().unwrap();
        assert!(new_net.contains(parsed));
        assert_ne!(addr.as_str().unwrap(), out);
        assert_ne!(addr.as_str().unwrap(), bad);
    }

    h.cleanup();
    h.shutdown().await;
}
