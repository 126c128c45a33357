//! Persistence behavior: restart recovery and save idempotence.

use std::time::Duration;

use crate::{fresh_root, wait_for, Harness};

/// Kill the service with addresses still checked out; the restarted
/// service must see them as `using`, and a flush must free them.
#[tokio::test(flavor = "multi_thread")]
async fn crash_recovery_preserves_using() {
    let root = fresh_root("crash-recovery");

    let h = Harness::start_at(root.clone(), 10, true).await;
    assert!(
        wait_for(Duration::from_secs(10), || async {
            let (_, body) = h.get("/stats").await;
            body["global"]["total"].as_u64() == Some(10)
        })
        .await
    );

    for _ in 0..10 {
        let (status, _) = h.get("/pick?dbname=t1").await;
        assert_eq!(status, 200);
    }
    // No reports — all ten stay in `using` across the restart.
    h.post("/save", serde_json::json!({})).await;
    h.shutdown().await;

    let h = Harness::start_at(root.clone(), 10, true).await;
    let (_, stats) = h.get("/stats?dbname=t1").await;
    assert_eq!(stats["using"], 10);
    assert_eq!(stats["idle"], 0);

    // Flush clears the wedged mirror; the resync makes everything
    // pickable again.
    let (status, _) = h.post("/flush?dbname=t1", serde_json::json!({})).await;
    assert_eq!(status, 200);
    let (_, stats) = h.get("/stats?dbname=t1").await;
    assert_eq!(stats["using"], 0);
    assert_eq!(stats["idle"], 10);

    let (status, _) = h.get("/pick?dbname=t1").await;
    assert_eq!(status, 200);

    h.cleanup();
    h.shutdown().await;
}

/// Two saves with no mutation in between must produce byte-identical
/// files.
#[tokio::test(flavor = "multi_thread")]
async fn save_is_idempotent_on_disk() {
    let h = Harness::start("save-idempotent", 4).await;
    assert!(
        wait_for(Duration::from_secs(5), || async {
            let (_, body) = h.get("/stats").await;
            body["global"]["total"].as_u64() == Some(4)
        })
        .await
    );
    let (_, _) = h.get("/pick?dbname=t1").await;

    h.post("/save", serde_json::json!({})).await;
    let global_path = h.db_root.join("ipv6_global_addrs.json");
    let mirror_path = h.db_root.join("ipv6_mirrors/t1.json");
    let global_first = std::fs::read(&global_path).unwrap();
    let mirror_first = std::fs::read(&mirror_path).unwrap();

    h.post("/save", serde_json::json!({})).await;
    assert_eq!(global_first, std::fs::read(&global_path).unwrap());
    assert_eq!(mirror_first, std::fs::read(&mirror_path).unwrap());

    h.cleanup();
    h.shutdown().await;
}

/// The on-disk shapes are part of the contract.
#[tokio::test(flavor = "multi_thread")]
async fn on_disk_format_matches_contract() {
    let h = Harness::start("disk-format", 2).await;
    assert!(
        wait_for(Duration::from_secs(5), || async {
            let (_, body) = h.get("/stats").await;
            body["global"]["total"].as_u64() == Some(2)
        })
        .await
    );
    let (_, _) = h.get("/pick?dbname=t1").await;
    h.post("/save", serde_json::json!({})).await;

    let global: serde_json::Value = serde_json::from_slice(
        &std::fs::read(h.db_root.join("ipv6_global_addrs.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(global["prefix"], crate::PREFIX_A);
    assert_eq!(global["addrs"].as_array().unwrap().len(), 2);

    let mirror: serde_json::Value = serde_json::from_slice(
        &std::fs::read(h.db_root.join("ipv6_mirrors/t1.json")).unwrap(),
    )
    .unwrap();
    let addrs = mirror["addrs"].as_object().unwrap();
    assert_eq!(addrs.len(), 2);
    for entry in addrs.values() {
        assert!(entry["status"].is_string());
        assert!(entry["ts"].is_u64());
    }

    h.cleanup();
    h.shutdown().await;
}
