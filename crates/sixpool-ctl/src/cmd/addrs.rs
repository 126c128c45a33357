//! Address operations: pick, report, spawn, check.

use anyhow::{Context, Result};
use sixpool_client::PoolClient;
use sixpool_core::{AddrReportInfo, AddrStatus};

pub async fn pick(client: &PoolClient) -> Result<()> {
    let addr = client.pick().await?;
    println!("{addr}");
    Ok(())
}

pub async fn picks(client: &PoolClient, num: usize) -> Result<()> {
    let addrs = client.picks(num).await?;
    for addr in &addrs {
        println!("{addr}");
    }
    if addrs.len() < num {
        eprintln!("(only {} of {} available)", addrs.len(), num);
    }
    Ok(())
}

pub async fn report(
    client: &PoolClient,
    addr: &str,
    status: &str,
    reason: Option<String>,
) -> Result<()> {
    let addr = addr.parse().context("invalid IPv6 address")?;
    let status: AddrStatus = status.parse()?;
    let info = AddrReportInfo { addr, status, reason };
    let ok = client.report(&info).await?;
    if ok {
        println!("reported {addr} as {}", status.as_str());
    } else {
        println!("report ignored — {addr} was not in use");
    }
    Ok(())
}

pub async fn spawn(client: &PoolClient) -> Result<()> {
    let addr = client.spawn().await?;
    println!("{addr}");
    Ok(())
}

pub async fn spawns(client: &PoolClient, num: usize) -> Result<()> {
    let (addrs, complete) = client.spawns(num).await?;
    for addr in &addrs {
        println!("{addr}");
    }
    if !complete {
        eprintln!("(incomplete: {} of {} spawned)", addrs.len(), num);
    }
    Ok(())
}

pub async fn check(client: &PoolClient, addr: &str) -> Result<()> {
    let addr = addr.parse().context("invalid IPv6 address")?;
    let usable = client.check(addr).await?;
    println!("{addr} : {}", if usable { "usable" } else { "unusable" });
    Ok(())
}
