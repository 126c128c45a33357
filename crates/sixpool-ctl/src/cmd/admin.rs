//! Administrative commands: save, flush.

use anyhow::Result;
use sixpool_client::PoolClient;

pub async fn save(client: &PoolClient) -> Result<()> {
    client.save().await?;
    println!("saved");
    Ok(())
}

pub async fn flush(client: &PoolClient, dbname: Option<&str>) -> Result<()> {
    client.flush(dbname).await?;
    match dbname {
        Some(dbname) => println!("flushed mirror [{dbname}]"),
        None => println!("flushed global pool and all mirrors"),
    }
    Ok(())
}
