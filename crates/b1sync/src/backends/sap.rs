//! # 📡 THE SAP BUSINESS ONE SERVICE LAYER BACKEND
//!
//! 🎬 COLD OPEN. INT. SERVER ROOM, PORT 50000
//!
//! A self-signed certificate glows in the dark. Behind it, the Service Layer waits
//! for a `POST /Login` with a company database, a username, and a password that was
//! definitely never committed to a repository. Definitely.
//!
//! This module does three things:
//! 1. [`SapSession`]: logs in, remembers the `B1SESSION` id, and stamps it on every
//!    request. Clones share the id, so concurrent jobs ride the same login.
//! 2. [`SapSource`]: walks an OData collection page by page, following
//!    `odata.nextLink` until SAP stops offering one.
//! 3. Named SQL queries (`SQLQueries('name')/List`) through the very same pager.
//!
//! ⚠️ No retries here. If page 37 fails, the fetch fails. See `backends::fetch_all`.
//! 🦆

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, trace};

use crate::backends::{FetchError, Source};
use crate::common::SourceRecord;

/// 🔧 Where SAP lives and how to get past the bouncer.
#[derive(Deserialize, Clone)]
pub struct SapConfig {
    /// 📡 Service Layer root, e.g. `https://sap.example:50000/b1s/v1/`.
    /// Trailing slash optional; we add one because `Url::join` is picky.
    pub base_url: String,
    pub company_db: String,
    pub username: String,
    pub password: String,
    /// 🧭 Load-balancer node pinned in the `ROUTEID` cookie.
    #[serde(default = "default_route_id")]
    pub route_id: String,
    /// 🔒 The Service Layer ships with a self-signed cert more often than not.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for SapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🤫 the password stays out of every debug print
        f.debug_struct("SapConfig")
            .field("base_url", &self.base_url)
            .field("company_db", &self.company_db)
            .field("username", &self.username)
            .field("password", &"***")
            .field("route_id", &self.route_id)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

fn default_route_id() -> String {
    ".node4".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(rename = "CompanyDB")]
    company_db: &'a str,
    #[serde(rename = "UserName")]
    username: &'a str,
    #[serde(rename = "Password")]
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(rename = "SessionId", default)]
    session_id: String,
    #[serde(rename = "SessionTimeout", default)]
    session_timeout: Option<u64>,
}

/// 📄 One OData page: `{ "value": [...], "odata.nextLink": "Items?$skip=20" }`.
/// Service Layer v2 spells the cursor `@odata.nextLink`; both are accepted.
#[derive(Deserialize)]
struct ODataPage {
    #[serde(default)]
    value: Vec<SourceRecord>,
    #[serde(rename = "odata.nextLink", alias = "@odata.nextLink", default)]
    next_link: Option<String>,
}

/// 🔑 A logged-in (or about to be) handle on the Service Layer.
///
/// Cheap to clone. Every clone shares the HTTP client and the session id, so a
/// re-login by one job is instantly visible to the others.
#[derive(Debug, Clone)]
pub(crate) struct SapSession {
    client: reqwest::Client,
    base_url: Url,
    config: SapConfig,
    session_id: Arc<RwLock<Option<String>>>,
}

impl SapSession {
    pub(crate) fn new(config: SapConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .with_context(|| format!("💀 '{}' is not a URL SAP could live at", config.base_url))?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .context("💀 The HTTP client refused to be born. The TLS stack wept.")?;

        Ok(Self {
            client,
            base_url,
            config,
            session_id: Arc::new(RwLock::new(None)),
        })
    }

    /// 🧭 Resolve a path (or a next link) against the Service Layer root.
    /// Relative, root-absolute and fully absolute links all land in the right place.
    fn resolve(&self, path: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(path)
            .map_err(|err| FetchError::BadLink {
                link: path.to_string(),
                reason: err.to_string(),
            })
    }

    /// 🚪 Always performs a fresh login and replaces the shared session id.
    pub(crate) async fn login(&self) -> Result<(), FetchError> {
        let url = self.resolve("Login")?;
        let body = LoginRequest {
            company_db: &self.config.company_db,
            username: &self.config.username,
            password: &self.config.password,
        };

        let response = self
            .client
            .post(url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        let text = response.text().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;
        if !status.is_success() {
            return Err(FetchError::Login(format!(
                "{} answered {}: {}",
                url, status, text
            )));
        }

        let login: LoginResponse =
            serde_json::from_str(&text).map_err(|source| FetchError::Unmarshal {
                url: url.to_string(),
                source,
            })?;
        if login.session_id.is_empty() {
            return Err(FetchError::Login(
                "SAP accepted the credentials but handed back no SessionId".to_string(),
            ));
        }

        info!(
            "🔑 logged in to SAP company '{}' (session timeout: {} min)",
            self.config.company_db,
            login.session_timeout.unwrap_or_default()
        );
        *self.session_id.write().await = Some(login.session_id);
        Ok(())
    }

    /// 🔑 Log in only if nobody has yet.
    pub(crate) async fn ensure_login(&self) -> Result<(), FetchError> {
        if self.session_id.read().await.is_some() {
            return Ok(());
        }
        self.login().await
    }

    /// 👋 Best-effort logout. The local session id is dropped regardless of what SAP says.
    pub(crate) async fn logout(&self) {
        let Some(session_id) = self.session_id.write().await.take() else {
            return;
        };
        if let Ok(url) = self.resolve("Logout") {
            let outcome = self
                .client
                .post(url)
                .header("Cookie", self.cookie(&session_id))
                .send()
                .await;
            debug!("👋 SAP logout finished: {:?}", outcome.map(|r| r.status()));
        }
    }

    fn cookie(&self, session_id: &str) -> String {
        format!("B1SESSION={}; ROUTEID={}", session_id, self.config.route_id)
    }

    /// 📡 GET one page, session stamped, optional JSON body (SQL query params).
    async fn get_page(&self, url: Url, body: Option<&Value>) -> Result<ODataPage, FetchError> {
        let session_id = self
            .session_id
            .read()
            .await
            .clone()
            .ok_or_else(|| FetchError::Login("no active SAP session, log in first".to_string()))?;

        trace!("📡 GET {}", url);
        let mut request = self
            .client
            .get(url.clone())
            .header("SessionId", &session_id)
            .header("Cookie", self.cookie(&session_id));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        serde_json::from_slice(&bytes).map_err(|source| FetchError::Unmarshal {
            url: url.to_string(),
            source,
        })
    }
}

/// 🚰 A paginated OData read against one entity set or one named SQL query.
#[derive(Debug)]
pub(crate) struct SapSource {
    session: SapSession,
    /// 🧭 where the next page lives; `None` once the cursor is exhausted
    next: Option<String>,
    body: Option<Value>,
}

impl SapSource {
    /// 📋 e.g. `SapSource::entity(session, "Items?$select=ItemCode,ItemName")`
    pub(crate) fn entity(session: SapSession, query: impl Into<String>) -> Self {
        Self {
            session,
            next: Some(query.into()),
            body: None,
        }
    }

    /// 🧾 `SQLQueries('<name>')/List` with `{"ParamList": params}` on every page.
    /// Parameterless queries (empty `params`) go out without a body.
    pub(crate) fn sql_query(session: SapSession, name: &str, params: impl Into<String>) -> Self {
        let params = params.into();
        Self {
            session,
            next: Some(format!("SQLQueries('{}')/List", name)),
            body: (!params.is_empty()).then(|| serde_json::json!({ "ParamList": params })),
        }
    }
}

#[async_trait]
impl Source for SapSource {
    async fn next_page(&mut self) -> Result<Option<Vec<SourceRecord>>, FetchError> {
        let Some(path) = self.next.take() else {
            return Ok(None);
        };
        let url = self.session.resolve(&path)?;
        let page = self.session.get_page(url, self.body.as_ref()).await?;

        self.next = page.next_link.filter(|link| !link.is_empty());
        if let Some(ref link) = self.next {
            debug!("➡️ SAP offered another page: {}", link);
        }
        Ok(Some(page.value))
    }
}
