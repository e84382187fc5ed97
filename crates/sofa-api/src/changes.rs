//! Types for the `_changes` feed.
//!
//! A feed is either one-shot (`normal`/`longpoll`), where the server answers
//! with a single `{"results": [...], "last_seq": ...}` document, or
//! `continuous`, where every change arrives as one JSON object per line with
//! blank lines as heartbeats.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{CouchError, UnknownFeedType};
use crate::JsonObject;

/// Heartbeat interval requested from the server unless configured otherwise
pub const DEFAULT_HEARTBEAT_MS: u64 = 30_000;

/// Opaque, server-assigned position in a database's change feed.
///
/// CouchDB 1.x uses integers, 2.x and later use strings like
/// `"42-g1AAAAFTeJzLYWBg..."`. Both are kept verbatim so they can be handed
/// back to the server as `since`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seq(Value);

impl Seq {
    /// The "now" marker accepted by CouchDB as `since`
    pub fn now() -> Self {
        Self(Value::String("now".to_string()))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Numeric position of this sequence, when one can be derived.
    ///
    /// Integer seqs are their own ordinal; string seqs use the number before
    /// the first `-`. Opaque tokens without a numeric prefix return `None`.
    pub fn ordinal(&self) -> Option<u64> {
        match &self.0 {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.split('-').next().and_then(|p| p.parse().ok()),
            _ => None,
        }
    }

    /// True when both sequences carry an ordinal and `self` is strictly behind `other`
    pub fn is_before(&self, other: &Seq) -> bool {
        matches!((self.ordinal(), other.ordinal()), (Some(a), Some(b)) if a < b)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

impl From<u64> for Seq {
    fn from(value: u64) -> Self {
        Self(Value::from(value))
    }
}

impl From<&str> for Seq {
    fn from(value: &str) -> Self {
        Self(Value::String(value.to_string()))
    }
}

impl From<String> for Seq {
    fn from(value: String) -> Self {
        Self(Value::String(value))
    }
}

impl From<Value> for Seq {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// One `{"rev": ...}` entry of a change's `changes` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRev {
    pub rev: String,
}

/// A single entry of the change feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub seq: Seq,
    pub id: String,
    #[serde(default)]
    pub changes: Vec<ChangeRev>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    /// Present when the feed was opened with `include_docs=true`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<JsonObject>,
}

impl ChangeEvent {
    pub fn new(seq: impl Into<Seq>, id: impl Into<String>, revs: &[&str]) -> Self {
        Self {
            seq: seq.into(),
            id: id.into(),
            changes: revs
                .iter()
                .map(|rev| ChangeRev {
                    rev: rev.to_string(),
                })
                .collect(),
            deleted: false,
            doc: None,
        }
    }

    /// Revision strings of this change, leaf revisions first as sent by the server
    pub fn revs(&self) -> Vec<&str> {
        self.changes.iter().map(|c| c.rev.as_str()).collect()
    }

    pub fn is_design_doc(&self) -> bool {
        self.id.starts_with("_design/")
    }
}

/// Item produced when reading a change feed
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Change(ChangeEvent),
    /// Trailing marker carrying the feed's final sequence
    Finished { last_seq: Seq, pending: Option<u64> },
}

impl FeedEvent {
    pub fn seq(&self) -> &Seq {
        match self {
            FeedEvent::Change(change) => &change.seq,
            FeedEvent::Finished { last_seq, .. } => last_seq,
        }
    }
}

/// One line of a continuous feed
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FeedLine {
    Change(ChangeEvent),
    Finished {
        last_seq: Seq,
        #[serde(default)]
        pending: Option<u64>,
    },
    Error(CouchError),
}

/// Body of a one-shot (`normal`/`longpoll`) feed
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChangesResponse {
    pub results: Vec<ChangeEvent>,
    pub last_seq: Seq,
    /// Not reported by CouchDB 1.0
    #[serde(default)]
    pub pending: Option<u64>,
}

/// Either a one-shot feed body or the error document the server sent instead
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneShotBody {
    Changes(ChangesResponse),
    Error(CouchError),
}

/// How the server delivers the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    /// Everything up to now in one response
    Normal,
    /// Waits for at least one change, then answers like `Normal`
    Longpoll,
    /// Newline-delimited events until the connection closes
    #[default]
    Continuous,
}

impl FeedType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedType::Normal => "normal",
            FeedType::Longpoll => "longpoll",
            FeedType::Continuous => "continuous",
        }
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self, FeedType::Continuous)
    }
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedType {
    type Err = UnknownFeedType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(FeedType::Normal),
            "longpoll" => Ok(FeedType::Longpoll),
            "continuous" => Ok(FeedType::Continuous),
            other => Err(UnknownFeedType(other.to_string())),
        }
    }
}

/// Options used to open a change feed.
///
/// Unset `since` means "from the database's current update sequence", so a
/// fresh consumer only sees changes made after it started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedOptions {
    pub since: Option<Seq>,
    pub feed: FeedType,
    /// Milliseconds between heartbeat newlines; only sent for `longpoll`/`continuous`
    pub heartbeat: Option<u64>,
    pub limit: Option<u64>,
    pub descending: bool,
    /// Server-side filter function, e.g. `app/important`
    pub filter: Option<String>,
    pub include_docs: bool,
    /// `main_only` or `all_docs`
    pub style: Option<String>,
    pub timeout: Option<u64>,
    pub conflicts: bool,
    /// Extra query parameters handed to the filter function
    pub filter_params: BTreeMap<String, String>,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            since: None,
            feed: FeedType::Continuous,
            heartbeat: Some(DEFAULT_HEARTBEAT_MS),
            limit: None,
            descending: false,
            filter: None,
            include_docs: false,
            style: None,
            timeout: None,
            conflicts: false,
            filter_params: BTreeMap::new(),
        }
    }
}

impl FeedOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_since(mut self, since: impl Into<Seq>) -> Self {
        self.since = Some(since.into());
        self
    }

    pub fn with_feed(mut self, feed: FeedType) -> Self {
        self.feed = feed;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat_ms: Option<u64>) -> Self {
        self.heartbeat = heartbeat_ms;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_filter_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter_params.insert(key.into(), value.into());
        self
    }

    pub fn with_include_docs(mut self, include_docs: bool) -> Self {
        self.include_docs = include_docs;
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn with_conflicts(mut self, conflicts: bool) -> Self {
        self.conflicts = conflicts;
        self
    }

    /// Query parameters for `GET /{db}/_changes`.
    ///
    /// `since` is passed separately because it is usually resolved at open
    /// time rather than taken from the options.
    pub fn query_pairs(&self, since: Option<&Seq>) -> Vec<(String, String)> {
        let mut pairs = vec![("feed".to_string(), self.feed.as_str().to_string())];

        if let Some(since) = since {
            pairs.push(("since".to_string(), since.to_string()));
        }
        if self.feed != FeedType::Normal {
            if let Some(heartbeat) = self.heartbeat {
                pairs.push(("heartbeat".to_string(), heartbeat.to_string()));
            }
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        if self.descending {
            pairs.push(("descending".to_string(), "true".to_string()));
        }
        if let Some(filter) = &self.filter {
            pairs.push(("filter".to_string(), filter.clone()));
        }
        if self.include_docs {
            pairs.push(("include_docs".to_string(), "true".to_string()));
        }
        if let Some(style) = &self.style {
            pairs.push(("style".to_string(), style.clone()));
        }
        if let Some(timeout) = self.timeout {
            pairs.push(("timeout".to_string(), timeout.to_string()));
        }
        if self.conflicts {
            pairs.push(("conflicts".to_string(), "true".to_string()));
        }
        for (key, value) in &self.filter_params {
            pairs.push((key.clone(), value.clone()));
        }

        pairs
    }
}

/// Lifecycle state of a managed change consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConsumerState {
    /// Created, never started
    #[default]
    Init,
    /// A feed session is open and events are being pulled
    Running,
    /// Halted; may be started again
    Stopped,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerState::Init => "init",
            ConsumerState::Running => "running",
            ConsumerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
