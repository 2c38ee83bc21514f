pub mod types;

use std::fmt;
use std::time::{Duration, Instant};

use reqwest::header::{CONTENT_TYPE, REFERER, SET_COOKIE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{CollectorError, Result};
use crate::retry::{Backoff, RetryLimit};

use self::types::{DatasetInfo, WorkloadQuery, WorkloadStat};

pub const USER_AGENT: &str = concat!("ppstats/", env!("CARGO_PKG_VERSION"));

const SESSION_PATH: &str = "/session/1/session";
const CONFIG_PATH: &str = "/platform/1/cluster/config";
const DATASET_PATH: &str = "/platform/10/performance/datasets";
const WORKLOAD_PATH: &str = "/platform/10/statistics/summary/workload";
const EXPORT_PATH: &str = "/platform/1/protocols/nfs/exports";

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 14_400;
const REAUTH_GRACE_SECS: u64 = 60;

const SESSION_COOKIE_NAME: &str = "isisessid";
const CSRF_COOKIE_NAME: &str = "isicsrf";

/// How a worker authenticates against the cluster API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthType {
    /// Credentials on every request.
    BasicAuth,
    /// Session login with cookie + CSRF token, re-authenticated on expiry.
    #[default]
    Session,
}

/// One cluster's API session: connection, authentication, retry.
///
/// Exclusively owned by its worker; all calls are sequential from the
/// worker's perspective.
pub struct Cluster {
    pub hostname: String,
    pub port: u16,
    username: String,
    password: String,
    pub auth_type: AuthType,
    pub verify_ssl: bool,

    /// Resolved from the cluster config endpoint during `connect`.
    pub cluster_name: String,
    pub os_version: String,

    base_url: String,
    client: Option<reqwest::Client>,
    session_cookie: Option<String>,
    csrf_token: Option<String>,
    reauth_deadline: Option<Instant>,
    retry_limit: RetryLimit,
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cluster_name.is_empty() {
            write!(f, "{}", self.hostname)
        } else {
            write!(f, "{}", self.cluster_name)
        }
    }
}

impl Cluster {
    pub fn new(
        hostname: &str,
        port: Option<u16>,
        username: &str,
        password: &str,
        auth_type: AuthType,
        verify_ssl: bool,
        retry_limit: RetryLimit,
    ) -> Result<Self> {
        if hostname.is_empty() {
            return Err(CollectorError::Config("hostname must be set".into()));
        }
        if username.is_empty() {
            return Err(CollectorError::Config("username must be set".into()));
        }
        if password.is_empty() {
            return Err(CollectorError::Config("password must be set".into()));
        }

        let port = port.unwrap_or(DEFAULT_PORT);

        Ok(Self {
            hostname: hostname.to_string(),
            port,
            username: username.to_string(),
            password: password.to_string(),
            auth_type,
            verify_ssl,
            cluster_name: String::new(),
            os_version: String::new(),
            base_url: format!("https://{hostname}:{port}"),
            client: None,
            session_cookie: None,
            csrf_token: None,
            reauth_deadline: None,
            retry_limit,
        })
    }

    /// Point the session client at an explicit base URL instead of the
    /// usual `https://hostname:port`. Lets tests stand in for the
    /// cluster API with a plain-HTTP listener.
    #[doc(hidden)]
    pub fn set_base_url(&mut self, base_url: &str) {
        self.base_url = base_url.trim_end_matches('/').to_string();
    }

    /// Establish the initial connection: build the HTTP client,
    /// authenticate when in session mode, then resolve the real cluster
    /// name and OneFS version from the config endpoint.
    pub async fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            warn!(cluster = %self.hostname, "connect called on an initialized session, skipping");
            return Ok(());
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(!self.verify_ssl)
            .build()
            .map_err(|e| CollectorError::Config(format!("building HTTP client: {e}")))?;
        self.client = Some(client);

        if self.auth_type == AuthType::Session {
            self.authenticate().await?;
        }

        self.fetch_cluster_config().await
    }

    fn client(&self) -> Result<&reqwest::Client> {
        self.client
            .as_ref()
            .ok_or_else(|| CollectorError::Config("session client not connected".into()))
    }

    /// Log in via the session endpoint and capture the session cookie,
    /// CSRF token, and re-authentication deadline.
    ///
    /// Connection-class failures are retried with 1s/x2/1800s backoff
    /// under the configured ceiling; this may be the first contact with
    /// the cluster, and another node may answer where one refused.
    pub async fn authenticate(&mut self) -> Result<()> {
        let client = self.client()?.clone();
        let url = format!("{}{}", self.base_url, SESSION_PATH);
        let body = serde_json::json!({
            "username": self.username,
            "password": self.password,
            "services": ["platform"],
        });

        let mut backoff = Backoff::connect();
        let mut attempt: u64 = 0;

        let resp = loop {
            attempt += 1;
            if !self.retry_limit.allows(attempt) {
                return Err(CollectorError::RetryExhausted(format!(
                    "connect to {}: gave up after {} attempts",
                    self.hostname,
                    attempt - 1
                )));
            }

            match client
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => break resp,
                Err(e) => {
                    let err = CollectorError::from_transport(e);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    let delay = backoff.next_delay();
                    warn!(
                        cluster = %self.hostname,
                        error = %err,
                        retry_in = ?delay,
                        "authentication request failed, retrying",
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        // 201 Created is the only success status for session login.
        if resp.status() != StatusCode::CREATED {
            return Err(CollectorError::Auth(format!(
                "session login to {} rejected with status {}",
                self.hostname,
                resp.status()
            )));
        }

        let mut session_cookie = None;
        let mut csrf_token = None;
        for value in resp.headers().get_all(SET_COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            let Some((name, value)) = parse_set_cookie(raw) else {
                continue;
            };
            match name {
                SESSION_COOKIE_NAME => {
                    session_cookie = Some(format!("{SESSION_COOKIE_NAME}={value}"));
                }
                CSRF_COOKIE_NAME => {
                    debug!(cluster = %self.hostname, "found CSRF cookie");
                    csrf_token = Some(value.to_string());
                }
                _ => {}
            }
        }

        let auth: serde_json::Value = resp.json().await.map_err(|e| {
            CollectorError::Protocol(format!("unable to parse auth response: {e}"))
        })?;

        let timeout = match session_timeout_secs(&auth) {
            Some(secs) => secs,
            None => {
                warn!(
                    cluster = %self.hostname,
                    "authentication API did not return a timeout value, using default",
                );
                DEFAULT_SESSION_TIMEOUT_SECS
            }
        };
        self.reauth_deadline = Some(Instant::now() + Duration::from_secs(apply_grace(timeout)));

        self.session_cookie = session_cookie;
        if csrf_token.is_none() {
            debug!(
                cluster = %self.hostname,
                "no CSRF token in session response, assuming old-style session auth",
            );
        }
        self.csrf_token = csrf_token;

        Ok(())
    }

    fn reauth_due(&self) -> bool {
        self.reauth_deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn build_get(&self, url: &str) -> Result<reqwest::RequestBuilder> {
        let mut req = self
            .client()?
            .get(url)
            .header(CONTENT_TYPE, "application/json");

        if self.auth_type == AuthType::BasicAuth {
            req = req.basic_auth(&self.username, Some(&self.password));
        }
        if let Some(cookie) = &self.session_cookie {
            req = req.header(reqwest::header::COOKIE, cookie);
        }
        if let Some(token) = &self.csrf_token {
            req = req
                .header("X-CSRF-Token", token)
                .header(REFERER, &self.base_url);
        }

        Ok(req)
    }

    /// GET an API path and decode the JSON response.
    ///
    /// Session expiry is handled up front via the reauth timer and again
    /// on a 401 (one re-authentication, then a rebuilt resend; the 401
    /// may just mean we reached a different node). Connection-refused
    /// class errors retry with connect-shaped backoff under the
    /// configured ceiling. Any other non-200 status is an immediate
    /// protocol error.
    async fn get_json<T: DeserializeOwned>(&mut self, path: &str) -> Result<T> {
        if self.auth_type == AuthType::Session && self.reauth_due() {
            info!(cluster = %self, "re-authenticating based on session timer");
            self.authenticate().await?;
        }

        let url = format!("{}{}", self.base_url, path);
        let mut backoff = Backoff::connect();
        let mut attempt: u64 = 0;
        let mut reauthenticated = false;

        loop {
            attempt += 1;
            if !self.retry_limit.allows(attempt) {
                return Err(CollectorError::RetryExhausted(format!(
                    "GET {path} from {}: gave up after {} attempts",
                    self,
                    attempt - 1
                )));
            }

            let resp = match self.build_get(&url)?.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    let err = CollectorError::from_transport(e);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    let delay = backoff.next_delay();
                    warn!(
                        cluster = %self,
                        error = %err,
                        retry_in = ?delay,
                        "connection refused, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let status = resp.status();
            if status == StatusCode::OK {
                return resp.json::<T>().await.map_err(|e| {
                    CollectorError::Protocol(format!("decoding response from {path}: {e}"))
                });
            }

            if status == StatusCode::UNAUTHORIZED {
                if self.auth_type == AuthType::BasicAuth {
                    return Err(CollectorError::Auth(format!(
                        "basic authentication for cluster {self} rejected, check username and password"
                    )));
                }
                if reauthenticated {
                    return Err(CollectorError::Auth(format!(
                        "cluster {self} rejected the session again after re-authentication"
                    )));
                }
                info!(
                    cluster = %self,
                    "session authentication rejected, re-authenticating",
                );
                self.authenticate().await?;
                reauthenticated = true;
                continue;
            }

            return Err(CollectorError::Protocol(format!(
                "cluster {self} returned unexpected HTTP status {status} for {path}"
            )));
        }
    }

    async fn fetch_cluster_config(&mut self) -> Result<()> {
        let cfg: ClusterConfigResponse = self.get_json(CONFIG_PATH).await?;
        self.cluster_name = cfg.name.to_lowercase();
        self.os_version = cfg.onefs_version.version;
        Ok(())
    }

    /// Fetch the current partitioned-performance dataset definitions.
    pub async fn get_dataset_info(&mut self) -> Result<DatasetInfo> {
        let info: DatasetInfo = self.get_json(DATASET_PATH).await?;
        debug!(cluster = %self, total = info.total, "fetched dataset definitions");
        Ok(info)
    }

    /// Fetch one round of workload stats for the named dataset across all
    /// nodes, including degraded ones.
    pub async fn get_pp_stats(&mut self, dataset_name: &str) -> Result<Vec<WorkloadStat>> {
        let path =
            format!("{WORKLOAD_PATH}?degraded=true&nodes=all&dataset={dataset_name}");
        info!(cluster = %self, dataset = dataset_name, "fetching pp stats");
        let query: WorkloadQuery = self.get_json(&path).await?;
        Ok(query.workloads)
    }

    /// Resolve the first path defined for an NFS export id.
    pub async fn get_export_path(&mut self, id: i64) -> Result<String> {
        let path = format!("{EXPORT_PATH}/{id}");
        debug!(cluster = %self, export_id = id, "fetching export info");
        let resp: ExportsResponse = self.get_json(&path).await?;

        resp.exports
            .first()
            .and_then(|export| export.paths.first())
            .cloned()
            .ok_or_else(|| {
                CollectorError::Protocol(format!("no paths found for export id {id}"))
            })
    }
}

#[derive(Deserialize)]
struct ClusterConfigResponse {
    name: String,
    onefs_version: OnefsVersion,
}

#[derive(Deserialize)]
struct OnefsVersion {
    version: String,
}

#[derive(Deserialize)]
struct ExportsResponse {
    #[serde(default)]
    exports: Vec<ExportEntry>,
}

#[derive(Deserialize)]
struct ExportEntry {
    #[serde(default)]
    paths: Vec<String>,
}

/// Extract the name/value of the cookie itself from a Set-Cookie header,
/// ignoring attributes.
fn parse_set_cookie(raw: &str) -> Option<(&str, &str)> {
    let pair = raw.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    if name.is_empty() {
        return None;
    }
    Some((name, value))
}

/// Absolute session timeout reported by the auth endpoint, if present.
fn session_timeout_secs(auth: &serde_json::Value) -> Option<u64> {
    auth.get("timeout_absolute")?.as_f64().map(|t| t as u64)
}

/// Give the reauth timer a minute's grace before the real expiry.
fn apply_grace(timeout_secs: u64) -> u64 {
    if timeout_secs > REAUTH_GRACE_SECS {
        timeout_secs - REAUTH_GRACE_SECS
    } else {
        timeout_secs
    }
}
