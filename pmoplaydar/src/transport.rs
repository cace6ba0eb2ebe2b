//! Remote calls to the Playdar daemon
//!
//! The resolver only needs one primitive: perform a call and hand back the
//! decoded JSON payload. [`Transport`] is that seam; [`HttpTransport`] is the
//! implementation talking to a real daemon over HTTP.
//!
//! # Example
//!
//! ```no_run
//! use pmoplaydar::transport::{ApiCall, HttpTransport, Transport};
//!
//! # async fn example() -> pmoplaydar::Result<()> {
//! let transport = HttpTransport::builder()
//!     .server_port(60210)
//!     .auth_token("secret")
//!     .build()?;
//!
//! let stat = transport.call(ApiCall::stat()).await?;
//! println!("{}", stat);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::models::{Query, QueryId};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Default daemon host
pub const DEFAULT_SERVER_ROOT: &str = "localhost";

/// Default daemon port
pub const DEFAULT_SERVER_PORT: u16 = 60210;

/// Default timeout for HTTP requests (30 seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default User-Agent
pub const DEFAULT_USER_AGENT: &str = "PMOMusic/0.1.0 (pmoplaydar)";

/// Where a call is served on the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A method of the core API (`/api/?method=...`)
    Api { method: String },
    /// A Boffin plugin resource (`/boffin/<path>`)
    Boffin { path: Vec<String> },
    /// An audioscrobbler plugin command (`/audioscrobbler/<method>`)
    Audioscrobbler { method: String },
}

/// One remote call: an endpoint plus its parameters
///
/// The per-call id and the auth token are added by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCall {
    pub endpoint: Endpoint,
    pub params: Vec<(String, String)>,
}

impl ApiCall {
    /// Call a core API method
    pub fn method(method: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::Api {
                method: method.into(),
            },
            params: Vec::new(),
        }
    }

    /// Call a Boffin resource
    pub fn boffin<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoint: Endpoint::Boffin {
                path: path.into_iter().map(Into::into).collect(),
            },
            params: Vec::new(),
        }
    }

    /// Call an audioscrobbler command
    pub fn audioscrobbler(method: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::Audioscrobbler {
                method: method.into(),
            },
            params: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// `resolve` call submitting a query
    pub fn resolve(query: &Query) -> Self {
        let mut call = Self::method("resolve")
            .param("artist", query.artist())
            .param("album", query.album())
            .param("track", query.track())
            .param("url", query.url())
            .param("qid", query.qid().as_str());
        if let Some(mimetypes) = query.mimetypes() {
            call = call.param("mimetypes", mimetypes.join(","));
        }
        call
    }

    /// `get_results` call for poll number `poll`
    pub fn get_results(qid: &QueryId, poll: u32) -> Self {
        Self::method("get_results")
            .param("qid", qid.as_str())
            .param("poll", poll.to_string())
    }

    /// Daemon status probe
    pub fn stat() -> Self {
        Self::method("stat")
    }

    /// Short name for logs: the API method or the Boffin path
    pub fn name(&self) -> String {
        match &self.endpoint {
            Endpoint::Api { method } => method.clone(),
            Endpoint::Boffin { path } => format!("boffin/{}", path.join("/")),
            Endpoint::Audioscrobbler { method } => format!("audioscrobbler/{}", method),
        }
    }

    /// Value of the first parameter named `key`
    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Performs remote calls for the resolver
///
/// Implementations must be cheap to share: the resolver runs each call in
/// its own task.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform `call` and return its decoded JSON payload
    async fn call(&self, call: ApiCall) -> Result<Value>;
}

/// HTTP/JSON transport to a Playdar daemon
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
    next_call_id: AtomicU64,
}

impl HttpTransport {
    /// Create a transport for the default daemon location
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a builder for configuring the transport
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::default()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn is_authed(&self) -> bool {
        self.auth_token.is_some()
    }

    /// URL streaming the source `sid`
    pub fn stream_url(&self, sid: &str) -> Result<Url> {
        self.url_with_path(&["sid", sid])
    }

    fn url_with_path(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::other(format!("Base URL cannot hold a path: {}", self.base_url)))?
            .clear()
            .extend(segments);
        Ok(url)
    }

    /// Full URL of a call, including call id and auth token
    pub fn call_url(&self, call: &ApiCall) -> Result<Url> {
        let mut url = match &call.endpoint {
            // trailing empty segment gives "/api/"
            Endpoint::Api { .. } => self.url_with_path(&["api", ""])?,
            Endpoint::Boffin { path } => {
                let mut segments = vec!["boffin"];
                segments.extend(path.iter().map(String::as_str));
                self.url_with_path(&segments)?
            }
            Endpoint::Audioscrobbler { method } => {
                self.url_with_path(&["audioscrobbler", method.as_str()])?
            }
        };

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut pairs = url.query_pairs_mut();
            if let Endpoint::Api { method } = &call.endpoint {
                pairs.append_pair("method", method);
            }
            for (key, value) in &call.params {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("call_id", &call_id.to_string());
            if let Some(token) = &self.auth_token {
                pairs.append_pair("auth", token);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, call: ApiCall) -> Result<Value> {
        let url = self.call_url(&call)?;

        // the query string carries the auth token, keep it out of the logs
        debug!(call = %call.name(), path = url.path(), "Calling Playdar");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(call = %call.name(), "API error ({}): {}", status, body);
            return Err(Error::api_error(format!("API returned status: {}", status)));
        }

        let text = response.text().await?;
        parse_payload(&text)
    }
}

/// Decode a daemon payload, unwrapping a JSONP callback if one slipped in
fn parse_payload(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    let body = trimmed
        .find('(')
        .zip(trimmed.rfind(')'))
        .filter(|(start, end)| start < end)
        .map(|(start, end)| &trimmed[start + 1..end])
        .ok_or_else(|| Error::invalid_response("payload is neither JSON nor JSONP"))?;
    Ok(serde_json::from_str(body)?)
}

/// Builder for [`HttpTransport`]
#[derive(Debug)]
pub struct HttpTransportBuilder {
    client: Option<Client>,
    server_root: String,
    server_port: u16,
    base_url: Option<String>,
    auth_token: Option<String>,
    timeout: Duration,
    user_agent: String,
}

impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self {
            client: None,
            server_root: DEFAULT_SERVER_ROOT.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            base_url: None,
            auth_token: None,
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpTransportBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a custom HTTP client
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the daemon host
    pub fn server_root(mut self, root: impl Into<String>) -> Self {
        self.server_root = root.into();
        self
    }

    /// Set the daemon port
    pub fn server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    /// Use a full base URL instead of host and port (e.g. a test server)
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Token sent as `auth` on every call
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set a custom User-Agent header
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Build the transport
    pub fn build(self) -> Result<HttpTransport> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .user_agent(&self.user_agent)
                .timeout(self.timeout)
                .build()?,
        };

        let base_url = match self.base_url {
            Some(url) => Url::parse(&url)?,
            None => Url::parse(&format!(
                "http://{}:{}",
                self.server_root, self.server_port
            ))?,
        };

        // Playdar used the wall clock as call id; keep ids increasing from there
        let first_call_id = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);

        Ok(HttpTransport {
            client,
            base_url,
            auth_token: self.auth_token.filter(|token| !token.is_empty()),
            next_call_id: AtomicU64::new(first_call_id),
        })
    }
}
