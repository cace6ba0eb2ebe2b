//! Data models for the Playdar resolution protocol
//!
//! This module contains the query value object submitted by callers and the
//! structures decoded from daemon responses. Response decoding is lenient:
//! a missing or mistyped field falls back to its legacy alias or default
//! rather than failing the whole response.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

// ============================================================================
// Query
// ============================================================================

/// Identifier correlating a query with its responses
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(String);

impl QueryId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier (UUID v4)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueryId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for QueryId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One resolution request
///
/// A query is built once (optionally refined with the `with_*` methods before
/// submission) and never mutated afterwards. All text fields default to the
/// empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    qid: QueryId,
    artist: String,
    album: String,
    track: String,
    url: String,
    mimetypes: Option<Vec<String>>,
}

impl Query {
    /// Create a query for an artist/album/track triple with a generated qid
    pub fn new(
        artist: impl Into<String>,
        album: impl Into<String>,
        track: impl Into<String>,
    ) -> Self {
        Self {
            qid: QueryId::generate(),
            artist: artist.into(),
            album: album.into(),
            track: track.into(),
            url: String::new(),
            mimetypes: None,
        }
    }

    /// Minimal query carrying only an identifier, used to resume polling
    pub fn bare(qid: QueryId) -> Self {
        Self {
            qid,
            artist: String::new(),
            album: String::new(),
            track: String::new(),
            url: String::new(),
            mimetypes: None,
        }
    }

    /// Use a caller-supplied identifier instead of the generated one
    pub fn with_qid(mut self, qid: impl Into<QueryId>) -> Self {
        self.qid = qid.into();
        self
    }

    /// Resolve a URL rather than (or in addition to) metadata
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Restrict results to the given content types, in preference order
    pub fn with_mimetypes<I, S>(mut self, mimetypes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mimetypes = Some(mimetypes.into_iter().map(Into::into).collect());
        self
    }

    pub fn qid(&self) -> &QueryId {
        &self.qid
    }

    pub fn artist(&self) -> &str {
        &self.artist
    }

    pub fn album(&self) -> &str {
        &self.album
    }

    pub fn track(&self) -> &str {
        &self.track
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn mimetypes(&self) -> Option<&[String]> {
        self.mimetypes.as_deref()
    }

    /// True for a query created with [`Query::bare`]
    pub fn is_bare(&self) -> bool {
        self.artist.is_empty()
            && self.album.is_empty()
            && self.track.is_empty()
            && self.url.is_empty()
            && self.mimetypes.is_none()
    }
}

// ============================================================================
// Results
// ============================================================================

/// A playable source found by the daemon
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Source id, turned into a stream URL by the transport
    #[serde(default)]
    pub sid: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub track: Option<String>,
    /// Name of the resolver that produced this result
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    /// Match confidence, 1.0 being a perfect match
    #[serde(default)]
    pub score: Option<f64>,
    /// Duration in seconds
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub bitrate: Option<u64>,
    /// Size in bytes
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub url: Option<String>,
    /// Any other field the daemon attached to the result
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Results of one `get_results` poll
///
/// `poll_interval` already accounts for the legacy `refresh_interval` field:
/// `Some(0)` means the daemon asked the client to stop polling.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub qid: QueryId,
    pub solved: bool,
    pub results: Vec<ResultRecord>,
    /// Delay before the next poll, in milliseconds
    pub poll_interval: Option<u64>,
    /// Maximum number of polls the daemon wants for this query
    pub poll_limit: Option<u32>,
}

impl Response {
    /// Decode a `get_results` payload
    ///
    /// The qid reported by the daemon wins; `requested` is used when the
    /// payload carries none.
    pub fn from_value(value: &Value, requested: &QueryId) -> Self {
        let qid = value
            .get("qid")
            .and_then(Value::as_str)
            .filter(|qid| !qid.is_empty())
            .map(QueryId::from)
            .unwrap_or_else(|| requested.clone());

        let solved = value.get("solved").and_then(Value::as_bool) == Some(true);

        let poll_interval = merge_intervals(
            int_field(value, "poll_interval"),
            int_field(value, "refresh_interval"),
        );

        // A zero or negative limit means "no limit from the daemon"
        let poll_limit = int_field(value, "poll_limit")
            .filter(|limit| *limit > 0)
            .map(|limit| u32::try_from(limit).unwrap_or(u32::MAX));

        let results = match value.get("results") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match ResultRecord::deserialize(item) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(qid = %qid, "Skipping malformed result: {}", e);
                        None
                    }
                })
                .collect(),
            _ => Vec::new(),
        };

        Self {
            qid,
            solved,
            results,
            poll_interval,
            poll_limit,
        }
    }

    /// An unsolved, empty response standing in for a call that never answered
    pub fn unsolved(qid: QueryId) -> Self {
        Self {
            qid,
            solved: false,
            results: Vec::new(),
            poll_interval: None,
            poll_limit: None,
        }
    }

    pub fn has_results(&self) -> bool {
        !self.results.is_empty()
    }

    /// Result with the highest score, if any
    pub fn best_result(&self) -> Option<&ResultRecord> {
        self.results.iter().max_by(|a, b| {
            a.score
                .unwrap_or(0.0)
                .total_cmp(&b.score.unwrap_or(0.0))
        })
    }
}

/// Fold the deprecated `refresh_interval` into `poll_interval`
///
/// Either field being zero or negative is a stop request; otherwise
/// `poll_interval` wins over the legacy field.
fn merge_intervals(poll: Option<i64>, refresh: Option<i64>) -> Option<u64> {
    match (poll, refresh) {
        (Some(p), _) if p <= 0 => Some(0),
        (_, Some(r)) if r <= 0 => Some(0),
        (Some(p), _) => Some(p as u64),
        (None, Some(r)) => Some(r as u64),
        (None, None) => None,
    }
}

/// Read an integer field, accepting floats and numeric strings
fn int_field(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ============================================================================
// Daemon status
// ============================================================================

/// Answer to the `stat` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatResponse {
    /// Daemon name, `"playdar"` for a genuine daemon
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub hostname: Option<String>,
    /// Whether the auth token sent with the call was accepted
    #[serde(default)]
    pub authenticated: bool,
    /// Plugins and features enabled on the daemon (e.g. `audioscrobbler`)
    #[serde(default)]
    pub capabilities: HashMap<String, Value>,
}

impl StatResponse {
    pub fn is_playdar(&self) -> bool {
        self.name == "playdar"
    }

    /// Check whether a capability is present and not explicitly disabled
    pub fn has_capability(&self, name: &str) -> bool {
        match self.capabilities.get(name) {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_defaults() {
        let query = Query::new("Miles Davis", "", "So What");
        assert_eq!(query.artist(), "Miles Davis");
        assert_eq!(query.album(), "");
        assert_eq!(query.url(), "");
        assert!(query.mimetypes().is_none());
        assert!(!query.qid().as_str().is_empty());
        assert!(!query.is_bare());
    }

    #[test]
    fn test_generated_qids_are_unique() {
        let a = Query::new("a", "b", "c");
        let b = Query::new("a", "b", "c");
        assert_ne!(a.qid(), b.qid());
    }

    #[test]
    fn test_query_builder() {
        let query = Query::new("", "", "")
            .with_qid("q1")
            .with_url("http://example.com/song.mp3")
            .with_mimetypes(["audio/mpeg", "audio/mp4"]);
        assert_eq!(query.qid().as_str(), "q1");
        assert_eq!(query.url(), "http://example.com/song.mp3");
        assert_eq!(
            query.mimetypes().unwrap(),
            &["audio/mpeg".to_string(), "audio/mp4".to_string()]
        );
    }

    #[test]
    fn test_bare_query() {
        let query = Query::bare(QueryId::from("x"));
        assert!(query.is_bare());
        assert_eq!(query.qid().to_string(), "x");
    }

    #[test]
    fn test_response_full_payload() {
        let value = json!({
            "qid": "x",
            "solved": true,
            "poll_interval": 500,
            "poll_limit": 6,
            "results": [
                {"sid": "s1", "artist": "Miles Davis", "track": "So What", "score": 0.8, "source": "local", "bitrate": 320},
                {"sid": "s2", "artist": "Miles Davis", "track": "So What", "score": 1.0, "preference": 5}
            ]
        });
        let response = Response::from_value(&value, &QueryId::from("x"));

        assert!(response.solved);
        assert_eq!(response.poll_interval, Some(500));
        assert_eq!(response.poll_limit, Some(6));
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].bitrate, Some(320));
        assert_eq!(response.results[1].extra.get("preference"), Some(&json!(5)));
        assert_eq!(response.best_result().unwrap().sid.as_deref(), Some("s2"));
    }

    #[test]
    fn test_response_partial_payload() {
        let response = Response::from_value(&json!({}), &QueryId::from("req"));
        assert_eq!(response.qid.as_str(), "req");
        assert!(!response.solved);
        assert!(response.results.is_empty());
        assert_eq!(response.poll_interval, None);
        assert_eq!(response.poll_limit, None);
    }

    #[test]
    fn test_solved_must_be_boolean_true() {
        let response = Response::from_value(&json!({"solved": "true"}), &QueryId::from("q"));
        assert!(!response.solved);
    }

    #[test]
    fn test_legacy_refresh_interval() {
        let qid = QueryId::from("q");
        let legacy = Response::from_value(&json!({"refresh_interval": 750}), &qid);
        assert_eq!(legacy.poll_interval, Some(750));

        let both = Response::from_value(&json!({"poll_interval": 300, "refresh_interval": 750}), &qid);
        assert_eq!(both.poll_interval, Some(300));

        let stop = Response::from_value(&json!({"poll_interval": 300, "refresh_interval": 0}), &qid);
        assert_eq!(stop.poll_interval, Some(0));

        let negative = Response::from_value(&json!({"poll_interval": -1}), &qid);
        assert_eq!(negative.poll_interval, Some(0));
    }

    #[test]
    fn test_poll_limit_zero_is_ignored() {
        let response = Response::from_value(&json!({"poll_limit": 0}), &QueryId::from("q"));
        assert_eq!(response.poll_limit, None);
    }

    #[test]
    fn test_malformed_results_are_skipped() {
        let value = json!({"results": [{"sid": "ok"}, {"sid": 42}, "garbage"]});
        let response = Response::from_value(&value, &QueryId::from("q"));
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].sid.as_deref(), Some("ok"));
    }

    #[test]
    fn test_numeric_strings_are_accepted() {
        let response = Response::from_value(&json!({"poll_interval": "250"}), &QueryId::from("q"));
        assert_eq!(response.poll_interval, Some(250));
    }

    #[test]
    fn test_stat_response() {
        let stat: StatResponse = serde_json::from_value(json!({
            "name": "playdar",
            "version": "0.1.0",
            "authenticated": true,
            "capabilities": {"audioscrobbler": {"plugin": "Audioscrobbler"}, "boffin": false}
        }))
        .unwrap();
        assert!(stat.is_playdar());
        assert!(stat.authenticated);
        assert!(stat.has_capability("audioscrobbler"));
        assert!(!stat.has_capability("boffin"));
        assert!(!stat.has_capability("missing"));
    }
}
