use serde::{Deserialize, Serialize};

use crate::changes::Seq;
use crate::JsonObject;

/// Metadata returned by `GET /{db}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub db_name: String,
    pub update_seq: Seq,
    #[serde(default)]
    pub doc_count: u64,
    #[serde(default)]
    pub doc_del_count: u64,
    /// Sizes, purge sequence, cluster info and whatever else the server reports
    #[serde(flatten)]
    pub extra: JsonObject,
}

/// Body of `POST /_replicate`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReplicationRequest {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub continuous: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub create_target: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl ReplicationRequest {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            ..Default::default()
        }
    }
}
