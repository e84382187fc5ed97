//! View queries and design document view definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::changes::Seq;

/// Source of one view inside a design document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub map: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce: Option<String>,
}

impl ViewDefinition {
    pub fn map(map: impl Into<String>) -> Self {
        Self {
            map: map.into(),
            reduce: None,
        }
    }

    pub fn map_reduce(map: impl Into<String>, reduce: impl Into<String>) -> Self {
        Self {
            map: map.into(),
            reduce: Some(reduce.into()),
        }
    }
}

/// Parameters for `_all_docs` and `_view` queries.
///
/// Keys are arbitrary JSON and are sent JSON-encoded, as CouchDB expects.
/// A non-empty `keys` list turns the query into a `POST` with the keys in the body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewQuery {
    pub key: Option<Value>,
    pub keys: Vec<Value>,
    pub start_key: Option<Value>,
    pub end_key: Option<Value>,
    pub start_key_doc_id: Option<String>,
    pub end_key_doc_id: Option<String>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub descending: bool,
    pub include_docs: bool,
    pub reduce: Option<bool>,
    pub group: bool,
    pub group_level: Option<u32>,
    pub inclusive_end: Option<bool>,
    pub stale: Option<String>,
}

impl ViewQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<Value>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn keys(mut self, keys: Vec<Value>) -> Self {
        self.keys = keys;
        self
    }

    pub fn range(mut self, start: impl Into<Value>, end: impl Into<Value>) -> Self {
        self.start_key = Some(start.into());
        self.end_key = Some(end.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    pub fn include_docs(mut self, include_docs: bool) -> Self {
        self.include_docs = include_docs;
        self
    }

    pub fn reduce(mut self, reduce: bool) -> Self {
        self.reduce = Some(reduce);
        self
    }

    pub fn group_level(mut self, level: u32) -> Self {
        self.group = true;
        self.group_level = Some(level);
        self
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        let mut push = |name: &str, value: String| pairs.push((name.to_string(), value));

        if let Some(key) = &self.key {
            push("key", key.to_string());
        }
        if let Some(start) = &self.start_key {
            push("startkey", start.to_string());
        }
        if let Some(end) = &self.end_key {
            push("endkey", end.to_string());
        }
        if let Some(id) = &self.start_key_doc_id {
            push("startkey_docid", id.clone());
        }
        if let Some(id) = &self.end_key_doc_id {
            push("endkey_docid", id.clone());
        }
        if let Some(limit) = self.limit {
            push("limit", limit.to_string());
        }
        if let Some(skip) = self.skip {
            push("skip", skip.to_string());
        }
        if self.descending {
            push("descending", "true".to_string());
        }
        if self.include_docs {
            push("include_docs", "true".to_string());
        }
        if let Some(reduce) = self.reduce {
            push("reduce", reduce.to_string());
        }
        if self.group {
            push("group", "true".to_string());
        }
        if let Some(level) = self.group_level {
            push("group_level", level.to_string());
        }
        if let Some(inclusive_end) = self.inclusive_end {
            push("inclusive_end", inclusive_end.to_string());
        }
        if let Some(stale) = &self.stale {
            push("stale", stale.clone());
        }

        pairs
    }

    /// `{"keys": [...]}` body for multi-key queries
    pub fn keys_body(&self) -> Option<Value> {
        if self.keys.is_empty() {
            None
        } else {
            Some(serde_json::json!({ "keys": self.keys }))
        }
    }
}

/// One row of a view or `_all_docs` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRow {
    /// Absent for reduced rows
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub key: Value,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
    /// Set for `keys` lookups that matched nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewResponse {
    #[serde(default)]
    pub total_rows: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    pub rows: Vec<ViewRow>,
    #[serde(default)]
    pub update_seq: Option<Seq>,
}
