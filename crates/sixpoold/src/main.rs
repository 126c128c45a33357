//! sixpoold — IPv6 source-address pool daemon.
//!
//! Exit codes: 0 clean shutdown, 1 bind failure, 2 config error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use sixpool_api::ApiState;
use sixpool_core::ServiceConfig;
use sixpool_services::{HttpChecker, InterfacePrefixer, NdppdRouteControl, PoolService};

#[derive(Parser, Debug)]
#[command(name = "sixpoold", about = "IPv6 source-address pool service")]
struct Args {
    /// RPC port.
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Target number of verified addresses to maintain.
    #[arg(short = 'n', long)]
    usable_num: Option<usize>,

    /// Verbose logging.
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Storage directory for the DBs.
    #[arg(long)]
    db_root: Option<PathBuf>,

    /// Interface carrying the routed prefix.
    #[arg(long)]
    iface: Option<String>,

    /// NDP proxy configuration file.
    #[arg(long)]
    ndppd_conf: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose {
        tracing_subscriber::EnvFilter::new("sixpool=debug,sixpoold=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut cfg = match ServiceConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::from(2);
        }
    };
    if let Some(port) = args.port {
        cfg.port = port;
    }
    if let Some(usable_num) = args.usable_num {
        cfg.usable_num = usable_num;
    }
    if let Some(db_root) = args.db_root {
        cfg.db_root = db_root;
    }
    if let Some(iface) = args.iface {
        cfg.iface = iface;
    }
    if let Some(ndppd_conf) = args.ndppd_conf {
        cfg.ndppd_conf = ndppd_conf;
    }

    tracing::info!(
        iface = %cfg.iface,
        port = cfg.port,
        usable_num = cfg.usable_num,
        db_root = %cfg.db_root.display(),
        "sixpoold starting"
    );

    let prefixes = Arc::new(InterfacePrefixer::new(cfg.iface.clone(), cfg.prefix_len));
    let prober = Arc::new(HttpChecker::new(
        cfg.check_url.clone(),
        cfg.check_timeout(),
        cfg.check_parallel,
    ));
    let routes = Arc::new(NdppdRouteControl::new(cfg.ndppd_conf.clone()));

    let port = cfg.port;
    let pool = match PoolService::new(cfg, prefixes, prober, routes).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize pool service");
            return ExitCode::from(2);
        }
    };

    // First reconcile before accepting traffic; a dead interface is
    // not fatal — the route monitor keeps retrying.
    if let Err(e) = pool.route_tick().await {
        tracing::warn!(error = %e, "initial route reconcile failed, will retry");
    }
    pool.start();

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(port, error = %e, "failed to bind RPC port");
            pool.stop().await;
            return ExitCode::from(1);
        }
    };

    let state = ApiState { pool: pool.clone() };
    let exit = tokio::select! {
        result = sixpool_api::serve(state, listener) => {
            match result {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!(error = %e, "RPC server failed");
                    ExitCode::from(1)
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            ExitCode::SUCCESS
        }
    };

    pool.stop().await;
    exit
}
