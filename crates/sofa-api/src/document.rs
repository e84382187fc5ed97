use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of a single document write (`PUT`, `POST`, `DELETE`, attachments)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUpdate {
    #[serde(default)]
    pub ok: bool,
    pub id: String,
    pub rev: String,
}

/// Body of `POST /{db}/_bulk_docs`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkDocsRequest {
    pub docs: Vec<Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub all_or_nothing: bool,
}

/// Per-document outcome of a bulk write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResult {
    pub id: String,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl BulkResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
