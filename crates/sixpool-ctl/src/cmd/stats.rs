//! Stats display.

use anyhow::Result;
use sixpool_client::PoolClient;

pub async fn run(client: &PoolClient, dbname: Option<&str>) -> Result<()> {
    match dbname {
        None => {
            let stats = client.global_stats().await?;
            println!("═══════════════════════════════════════");
            println!("  Global Pool");
            println!("═══════════════════════════════════════");
            println!("  Prefix    : {}", stats.prefix.as_deref().unwrap_or("(none)"));
            println!("  Addresses : {}", stats.total);
        }
        Some(dbname) => {
            let stats = client.mirror_stats(dbname).await?;
            println!("═══════════════════════════════════════");
            println!("  Mirror [{dbname}]");
            println!("═══════════════════════════════════════");
            println!("  Total : {}", stats.total);
            println!("  Idle  : {}", stats.idle);
            println!("  Using : {}", stats.using);
            println!("  Bad   : {}", stats.bad);
        }
    }
    Ok(())
}
