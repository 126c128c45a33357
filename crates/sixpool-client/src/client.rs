//! Typed client for the pool service's RPC surface.
//!
//! Transport failures collapse to `Internal`; structured error bodies
//! come back as the taxonomy variant the server raised, so callers can
//! match on `NoAddress` and friends without looking at status codes.

use std::net::Ipv6Addr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use sixpool_core::{AddrReportInfo, ClientConfig, GlobalStats, MirrorStats, PoolError};

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Clone)]
pub struct PoolClient {
    base: String,
    dbname: String,
    http: reqwest::Client,
}

impl PoolClient {
    pub fn new(cfg: &ClientConfig) -> Result<Self, PoolError> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .build()
            .map_err(|e| PoolError::Internal(format!("build http client: {e}")))?;
        Ok(Self {
            base: cfg.server_url.trim_end_matches('/').to_string(),
            dbname: cfg.dbname.clone(),
            http,
        })
    }

    pub fn dbname(&self) -> &str {
        &self.dbname
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, PoolError> {
        if response.status().is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| PoolError::Internal(format!("parse response: {e}")));
        }
        let status = response.status();
        match response.json::<ErrorBody>().await {
            Ok(body) => Err(PoolError::from_name(&body.error, &body.message)),
            Err(_) => Err(PoolError::Internal(format!("server answered {status}"))),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path_query: &str) -> Result<T, PoolError> {
        let url = format!("{}{}", self.base, path_query);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| PoolError::Internal(format!("request {url}: {e}")))?;
        Self::decode(response).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, PoolError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| PoolError::Internal(format!("request {url}: {e}")))?;
        Self::decode(response).await
    }

    // ── Pool operations ───────────────────────────────────────────────────────

    pub async fn pick(&self) -> Result<Ipv6Addr, PoolError> {
        #[derive(Deserialize)]
        struct PickResponse {
            addr: String,
        }
        let response: PickResponse = self
            .get_json(&format!("/pick?dbname={}", self.dbname))
            .await?;
        response
            .addr
            .parse()
            .map_err(|_| PoolError::Internal(format!("server sent bad addr: {}", response.addr)))
    }

    pub async fn picks(&self, num: usize) -> Result<Vec<Ipv6Addr>, PoolError> {
        #[derive(Deserialize)]
        struct PicksResponse {
            addrs: Vec<String>,
        }
        let response: PicksResponse = self
            .get_json(&format!("/picks?dbname={}&num={num}", self.dbname))
            .await?;
        Ok(response.addrs.iter().filter_map(|a| a.parse().ok()).collect())
    }

    pub async fn report(&self, info: &AddrReportInfo) -> Result<bool, PoolError> {
        #[derive(Serialize)]
        struct ReportRequest<'a> {
            dbname: &'a str,
            addr: String,
            status: &'static str,
            #[serde(skip_serializing_if = "Option::is_none")]
            reason: Option<&'a str>,
        }
        #[derive(Deserialize)]
        struct OkResponse {
            ok: bool,
        }
        let request = ReportRequest {
            dbname: &self.dbname,
            addr: info.addr.to_string(),
            status: info.status.as_str(),
            reason: info.reason.as_deref(),
        };
        let response: OkResponse = self.post_json("/report", &request).await?;
        Ok(response.ok)
    }

    pub async fn reports(&self, infos: &[AddrReportInfo]) -> Result<bool, PoolError> {
        #[derive(Serialize)]
        struct Item {
            addr: String,
            status: &'static str,
            #[serde(skip_serializing_if = "Option::is_none")]
            reason: Option<String>,
        }
        #[derive(Serialize)]
        struct ReportsRequest<'a> {
            dbname: &'a str,
            reports: Vec<Item>,
        }
        #[derive(Deserialize)]
        struct OkResponse {
            ok: bool,
        }
        let request = ReportsRequest {
            dbname: &self.dbname,
            reports: infos
                .iter()
                .map(|i| Item {
                    addr: i.addr.to_string(),
                    status: i.status.as_str(),
                    reason: i.reason.clone(),
                })
                .collect(),
        };
        let response: OkResponse = self.post_json("/reports", &request).await?;
        Ok(response.ok)
    }

    pub async fn spawn(&self) -> Result<Ipv6Addr, PoolError> {
        #[derive(Deserialize)]
        struct SpawnResponse {
            addr: String,
        }
        let response: SpawnResponse = self.get_json("/spawn").await?;
        response
            .addr
            .parse()
            .map_err(|_| PoolError::Internal(format!("server sent bad addr: {}", response.addr)))
    }

    pub async fn spawns(&self, num: usize) -> Result<(Vec<Ipv6Addr>, bool), PoolError> {
        #[derive(Deserialize)]
        struct SpawnsResponse {
            addrs: Vec<String>,
            complete: bool,
        }
        let response: SpawnsResponse = self.get_json(&format!("/spawns?num={num}")).await?;
        let addrs = response.addrs.iter().filter_map(|a| a.parse().ok()).collect();
        Ok((addrs, response.complete))
    }

    pub async fn check(&self, addr: Ipv6Addr) -> Result<bool, PoolError> {
        #[derive(Serialize)]
        struct CheckRequest {
            addr: String,
        }
        #[derive(Deserialize)]
        struct CheckResponse {
            usable: bool,
        }
        let response: CheckResponse = self
            .post_json("/check", &CheckRequest { addr: addr.to_string() })
            .await?;
        Ok(response.usable)
    }

    pub async fn global_stats(&self) -> Result<GlobalStats, PoolError> {
        #[derive(Deserialize)]
        struct StatsResponse {
            global: GlobalStats,
        }
        let response: StatsResponse = self.get_json("/stats").await?;
        Ok(response.global)
    }

    pub async fn mirror_stats(&self, dbname: &str) -> Result<MirrorStats, PoolError> {
        self.get_json(&format!("/stats?dbname={dbname}")).await
    }

    pub async fn save(&self) -> Result<(), PoolError> {
        #[derive(Deserialize)]
        struct OkResponse {
            #[allow(dead_code)]
            ok: bool,
        }
        let _: OkResponse = self.post_json("/save", &()).await?;
        Ok(())
    }

    pub async fn flush(&self, dbname: Option<&str>) -> Result<(), PoolError> {
        #[derive(Deserialize)]
        struct OkResponse {
            #[allow(dead_code)]
            ok: bool,
        }
        let path = match dbname {
            Some(dbname) => format!("/flush?dbname={dbname}"),
            None => "/flush".to_string(),
        };
        let _: OkResponse = self.post_json(&path, &()).await?;
        Ok(())
    }
}
