//! sixpool-ctl — command-line interface for the sixpool daemon.

use anyhow::Result;
use clap::{Parser, Subcommand};

use sixpool_client::PoolClient;
use sixpool_core::ClientConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "sixpool-ctl", about = "Inspect and drive a sixpool daemon")]
struct Cli {
    /// Pool service base URL.
    #[arg(long, default_value = "http://localhost:16000")]
    server: String,

    /// Tenant database to operate on.
    #[arg(short = 'd', long, default_value = "default")]
    dbname: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show global stats, or one mirror's stats.
    Stats {
        /// Mirror to inspect; omit for global totals.
        dbname: Option<String>,
    },
    /// Pick one idle address from the mirror.
    Pick,
    /// Pick up to N idle addresses.
    Picks {
        #[arg(default_value_t = 1)]
        num: usize,
    },
    /// Report an address back as idle or bad.
    Report {
        addr: String,
        /// "idle" or "bad".
        status: String,
        /// Optional reason, recorded with bad reports.
        reason: Option<String>,
    },
    /// Mint one verified address into the global pool.
    Spawn,
    /// Mint up to N verified addresses.
    Spawns {
        #[arg(default_value_t = 1)]
        num: usize,
    },
    /// Probe an address for usability.
    Check { addr: String },
    /// Persist all databases now.
    Save,
    /// Flush one mirror, or everything.
    Flush {
        /// Mirror to flush; omit to flush the global DB and all mirrors.
        dbname: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = ClientConfig {
        server_url: cli.server.clone(),
        dbname: cli.dbname.clone(),
        ..ClientConfig::default()
    };
    let client = PoolClient::new(&cfg)?;

    match cli.command {
        Command::Stats { dbname } => cmd::stats::run(&client, dbname.as_deref()).await,
        Command::Pick => cmd::addrs::pick(&client).await,
        Command::Picks { num } => cmd::addrs::picks(&client, num).await,
        Command::Report { addr, status, reason } => {
            cmd::addrs::report(&client, &addr, &status, reason).await
        }
        Command::Spawn => cmd::addrs::spawn(&client).await,
        Command::Spawns { num } => cmd::addrs::spawns(&client, num).await,
        Command::Check { addr } => cmd::addrs::check(&client, &addr).await,
        Command::Save => cmd::admin::save(&client).await,
        Command::Flush { dbname } => cmd::admin::flush(&client, dbname.as_deref()).await,
    }
}
