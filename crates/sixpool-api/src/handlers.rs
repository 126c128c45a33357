//! HTTP handlers — thin JSON shims over the pool service.
//!
//! Status-code contract: 200 success, 400 malformed input, 404 unknown
//! dbname, 409 transient contention, 503 resource unavailable (no
//! address, no prefix), 500 everything unexpected. The error body is
//! always `{"error": <taxonomy name>, "message": <detail>}`.

use std::net::Ipv6Addr;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use sixpool_core::config::DEFAULT_DBNAME;
use sixpool_core::{AddrReportInfo, AddrStatus, GlobalStats, PoolError};
use sixpool_services::PoolService;

#[derive(Clone)]
pub struct ApiState {
    pub pool: PoolService,
}

// ── Error plumbing ────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

type Reject = (StatusCode, Json<ErrorBody>);

fn reject(e: PoolError) -> Reject {
    let status = match &e {
        PoolError::Malformed(_) => StatusCode::BAD_REQUEST,
        PoolError::NoMirror(_) => StatusCode::NOT_FOUND,
        PoolError::Busy => StatusCode::CONFLICT,
        PoolError::NoAddress
        | PoolError::NoPrefix
        | PoolError::NoInterface(_)
        | PoolError::NoGlobalAddress(_)
        | PoolError::CheckFailed(_)
        | PoolError::PoolExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
        PoolError::Timeout
        | PoolError::Cancelled
        | PoolError::ProxyRestart(_)
        | PoolError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %e, "request failed");
    }
    (status, Json(ErrorBody { error: e.name(), message: e.to_string() }))
}

fn parse_addr(text: &str) -> Result<Ipv6Addr, Reject> {
    text.parse::<Ipv6Addr>()
        .map_err(|_| reject(PoolError::Malformed(format!("not an IPv6 address: {text:?}"))))
}

fn parse_status(text: &str) -> Result<AddrStatus, Reject> {
    text.parse::<AddrStatus>().map_err(reject)
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, Reject> {
    value.ok_or_else(|| reject(PoolError::Malformed(format!("missing field: {field}"))))
}

/// Slow handlers (anything that probes the network) run under the
/// server-side deadline.
async fn with_deadline<T>(
    state: &ApiState,
    fut: impl std::future::Future<Output = Result<T, Reject>>,
) -> Result<T, Reject> {
    timeout(state.pool.config().rpc_deadline(), fut)
        .await
        .map_err(|_| reject(PoolError::Timeout))?
}

// ── /stats ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct StatsQuery {
    dbname: Option<String>,
}

#[derive(Serialize)]
struct GlobalStatsResponse {
    global: GlobalStats,
}

pub async fn handle_stats(
    State(state): State<ApiState>,
    Query(query): Query<StatsQuery>,
) -> Result<Response, Reject> {
    match query.dbname {
        Some(dbname) => {
            let stats = state.pool.mirror_stats(&dbname).await.map_err(reject)?;
            Ok(Json(stats).into_response())
        }
        None => {
            let global = state.pool.global_stats().await.map_err(reject)?;
            Ok(Json(GlobalStatsResponse { global }).into_response())
        }
    }
}

// ── /spawn, /spawns ───────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SpawnResponse {
    pub addr: String,
}

pub async fn handle_spawn(State(state): State<ApiState>) -> Result<Json<SpawnResponse>, Reject> {
    let addr = with_deadline(&state, async {
        state.pool.spawn().await.map_err(reject)
    })
    .await?;
    Ok(Json(SpawnResponse { addr: addr.to_string() }))
}

#[derive(Deserialize)]
pub struct SpawnsQuery {
    #[serde(default = "one")]
    num: usize,
}

fn one() -> usize {
    1
}

#[derive(Serialize)]
pub struct SpawnsResponse {
    pub addrs: Vec<String>,
    pub complete: bool,
}

pub async fn handle_spawns(
    State(state): State<ApiState>,
    Query(query): Query<SpawnsQuery>,
) -> Result<Json<SpawnsResponse>, Reject> {
    let (addrs, complete) = with_deadline(&state, async {
        state.pool.spawns(query.num).await.map_err(reject)
    })
    .await?;
    Ok(Json(SpawnsResponse {
        addrs: addrs.iter().map(|a| a.to_string()).collect(),
        complete,
    }))
}

// ── /check, /checks ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CheckRequest {
    addr: Option<String>,
}

#[derive(Serialize)]
pub struct CheckResponse {
    pub usable: bool,
}

pub async fn handle_check(
    State(state): State<ApiState>,
    Json(req): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, Reject> {
    let addr = parse_addr(&required(req.addr, "addr")?)?;
    let usable = with_deadline(&state, async { Ok(state.pool.check(addr).await) }).await?;
    Ok(Json(CheckResponse { usable }))
}

#[derive(Deserialize)]
pub struct ChecksRequest {
    addrs: Option<Vec<String>>,
}

#[derive(Serialize)]
pub struct ChecksResponse {
    pub usables: Vec<bool>,
}

pub async fn handle_checks(
    State(state): State<ApiState>,
    Json(req): Json<ChecksRequest>,
) -> Result<Json<ChecksResponse>, Reject> {
    let addrs = required(req.addrs, "addrs")?
        .iter()
        .map(|a| parse_addr(a))
        .collect::<Result<Vec<_>, _>>()?;
    let usables =
        with_deadline(&state, async { Ok(state.pool.checks(&addrs).await) }).await?;
    Ok(Json(ChecksResponse { usables }))
}

// ── /pick, /picks ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct PickQuery {
    #[serde(default = "default_dbname")]
    dbname: String,
}

fn default_dbname() -> String {
    DEFAULT_DBNAME.to_string()
}

#[derive(Serialize)]
pub struct PickResponse {
    pub addr: String,
}

pub async fn handle_pick(
    State(state): State<ApiState>,
    Query(query): Query<PickQuery>,
) -> Result<Json<PickResponse>, Reject> {
    let addr = state.pool.pick(&query.dbname).await.map_err(reject)?;
    Ok(Json(PickResponse { addr: addr.to_string() }))
}

#[derive(Deserialize)]
pub struct PicksQuery {
    #[serde(default = "default_dbname")]
    dbname: String,
    #[serde(default = "one")]
    num: usize,
}

#[derive(Serialize)]
pub struct PicksResponse {
    pub addrs: Vec<String>,
}

pub async fn handle_picks(
    State(state): State<ApiState>,
    Query(query): Query<PicksQuery>,
) -> Result<Json<PicksResponse>, Reject> {
    let addrs = state
        .pool
        .picks(&query.dbname, query.num)
        .await
        .map_err(reject)?;
    Ok(Json(PicksResponse {
        addrs: addrs.iter().map(|a| a.to_string()).collect(),
    }))
}

// ── /report, /reports ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ReportRequest {
    #[serde(default = "default_dbname")]
    dbname: String,
    addr: Option<String>,
    status: Option<String>,
    reason: Option<String>,
}

#[derive(Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

fn build_report(
    addr: Option<&str>,
    status: Option<&str>,
    reason: Option<String>,
) -> Result<AddrReportInfo, Reject> {
    let addr = parse_addr(required(addr, "addr")?)?;
    let status = parse_status(required(status, "status")?)?;
    let info = AddrReportInfo { addr, status, reason };
    info.validate().map_err(reject)?;
    Ok(info)
}

pub async fn handle_report(
    State(state): State<ApiState>,
    Json(req): Json<ReportRequest>,
) -> Result<Json<OkResponse>, Reject> {
    let info = build_report(req.addr.as_deref(), req.status.as_deref(), req.reason)?;
    let ok = state.pool.report(&req.dbname, &info).await.map_err(reject)?;
    Ok(Json(OkResponse { ok }))
}

#[derive(Deserialize)]
pub struct ReportsRequest {
    #[serde(default = "default_dbname")]
    dbname: String,
    reports: Option<Vec<ReportItem>>,
}

#[derive(Deserialize)]
pub struct ReportItem {
    addr: Option<String>,
    status: Option<String>,
    reason: Option<String>,
}

pub async fn handle_reports(
    State(state): State<ApiState>,
    Json(req): Json<ReportsRequest>,
) -> Result<Json<OkResponse>, Reject> {
    let items = required(req.reports, "reports")?;
    let infos = items
        .into_iter()
        .map(|item| build_report(item.addr.as_deref(), item.status.as_deref(), item.reason))
        .collect::<Result<Vec<_>, _>>()?;
    let ok = state
        .pool
        .reports(&req.dbname, &infos)
        .await
        .map_err(reject)?;
    Ok(Json(OkResponse { ok }))
}

// ── /save, /flush ─────────────────────────────────────────────────────────────

pub async fn handle_save(State(state): State<ApiState>) -> Result<Json<OkResponse>, Reject> {
    state.pool.save().await.map_err(reject)?;
    Ok(Json(OkResponse { ok: true }))
}

#[derive(Deserialize)]
pub struct FlushQuery {
    dbname: Option<String>,
}

pub async fn handle_flush(
    State(state): State<ApiState>,
    Query(query): Query<FlushQuery>,
) -> Result<Json<OkResponse>, Reject> {
    state
        .pool
        .flush(query.dbname.as_deref())
        .await
        .map_err(reject)?;
    Ok(Json(OkResponse { ok: true }))
}
