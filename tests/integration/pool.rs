//! RPC surface behavior: pick/report cycles, status codes, probes.

use std::time::Duration;

use serde_json::json;

use crate::{wait_for, Harness};

#[tokio::test(flavor = "multi_thread")]
async fn pick_report_cycle_over_http() {
    let h = Harness::start("pick-report", 3).await;
    assert!(
        wait_for(Duration::from_secs(5), || async {
            let (_, body) = h.get("/stats").await;
            body["global"]["total"].as_u64() == Some(3)
        })
        .await
    );

    let (status, body) = h.get("/pick?dbname=t1").await;
    assert_eq!(status, 200);
    let addr = body["addr"].as_str().expect("pick returns an addr").to_string();

    let (_, stats) = h.get("/stats?dbname=t1").await;
    assert_eq!(stats["using"], 1);
    assert_eq!(stats["idle"], 2);

    let (status, body) = h
        .post("/report", json!({"dbname": "t1", "addr": addr, "status": "idle"}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);

    let (_, stats) = h.get("/stats?dbname=t1").await;
    assert_eq!(stats["using"], 0);
    assert_eq!(stats["idle"], 3);

    h.cleanup();
    h.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_marking_survives_sync() {
    let h = Harness::start("bad-sticky", 2).await;
    assert!(
        wait_for(Duration::from_secs(5), || async {
            let (_, body) = h.get("/stats").await;
            body["global"]["total"].as_u64() == Some(2)
        })
        .await
    );

    let (_, body) = h.get("/pick?dbname=t1").await;
    let addr = body["addr"].as_str().unwrap().to_string();
    let (_, body) = h
        .post(
            "/report",
            json!({"dbname": "t1", "addr": addr, "status": "bad", "reason": "econnreset"}),
        )
        .await;
    assert_eq!(body["ok"], true);

    // Let several sync cycles pass; the bad mark must hold.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let (_, stats) = h.get("/stats?dbname=t1").await;
    assert_eq!(stats["bad"], 1);

    // The surviving idle address is the other one.
    let (_, body) = h.get("/pick?dbname=t1").await;
    assert_ne!(body["addr"].as_str().unwrap(), addr);

    h.cleanup();
    h.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_dbname_is_404() {
    let h = Harness::start("no-mirror", 1).await;

    let (status, body) = h
        .post(
            "/report",
            json!({"dbname": "ghost", "addr": "2001:db8::1", "status": "idle"}),
        )
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "NoMirror");

    let (status, body) = h.get("/stats?dbname=ghost").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "NoMirror");

    h.cleanup();
    h.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_requests_are_400() {
    let h = Harness::start("malformed", 1).await;

    let (status, body) = h
        .post("/report", json!({"dbname": "t1", "addr": "not-an-addr", "status": "idle"}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Malformed");

    // `using` is server-assigned and cannot be reported.
    let (status, body) = h
        .post("/report", json!({"dbname": "t1", "addr": "2001:db8::1", "status": "using"}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Malformed");

    // Unknown status word.
    let (status, _) = h
        .post("/report", json!({"dbname": "t1", "addr": "2001:db8::1", "status": "unusable"}))
        .await;
    assert_eq!(status, 400);

    let (status, _) = h.post("/check", json!({})).await;
    assert_eq!(status, 400);

    h.cleanup();
    h.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn picks_allows_short_returns() {
    let h = Harness::start("picks-short", 2).await;
    assert!(
        wait_for(Duration::from_secs(5), || async {
            let (_, body) = h.get("/stats").await;
            body["global"]["total"].as_u64() == Some(2)
        })
        .await
    );

    let (status, body) = h.get("/picks?dbname=t1&num=10").await;
    assert_eq!(status, 200);
    assert_eq!(body["addrs"].as_array().unwrap().len(), 2);

    // Nothing left: an empty result is NoAddress, not an empty 200.
    let (status, body) = h.get("/picks?dbname=t1&num=1").await;
    assert_eq!(status, 503);
    assert_eq!(body["error"], "NoAddress");

    let (status, body) = h.get("/pick?dbname=t1").await;
    assert_eq!(status, 503);
    assert_eq!(body["error"], "NoAddress");

    h.cleanup();
    h.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn pick_never_hands_out_using_addresses() {
    let h = Harness::start("pick-unique", 5).await;
    assert!(
        wait_for(Duration::from_secs(5), || async {
            let (_, body) = h.get("/stats").await;
            body["global"]["total"].as_u64() == Some(5)
        })
        .await
    );

    let mut seen = std::collections::HashSet::new();
    for _ in 0..5 {
        let (status, body) = h.get("/pick?dbname=t1").await;
        assert_eq!(status, 200);
        let addr = body["addr"].as_str().unwrap().to_string();
        assert!(seen.insert(addr), "an address was handed out twice");
    }

    h.cleanup();
    h.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn spawn_and_check_endpoints() {
    let h = Harness::start("spawn-check", 1).await;

    let (status, body) = h.get("/spawns?num=3").await;
    assert_eq!(status, 200);
    assert_eq!(body["complete"], true);
    let addrs: Vec<String> = body["addrs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a.as_str().unwrap().to_string())
        .collect();
    assert_eq!(addrs.len(), 3);

    let (status, body) = h
        .post("/checks", json!({"addrs": addrs}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["usables"], json!([true, true, true]));

    // Flip the prober: checks answer false, spawns come back empty
    // and incomplete.
    h.prober.set_usable(false);
    let (status, body) = h.post("/check", json!({"addr": "2001:db8::123"})).await;
    assert_eq!(status, 200);
    assert_eq!(body["usable"], false);

    let (status, body) = h.get("/spawns?num=2").await;
    assert_eq!(status, 200);
    assert_eq!(body["complete"], false);
    assert_eq!(body["addrs"].as_array().unwrap().len(), 0);

    h.cleanup();
    h.shutdown().await;
}
