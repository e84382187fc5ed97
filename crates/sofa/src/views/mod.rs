//! View queries and design documents

pub mod compiler;

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

use crate::client::Database;
use crate::error::{Error, Result};
use crate::transport::HttpRequest;
use sofa_api::{DocumentUpdate, JsonObject, ViewDefinition, ViewQuery, ViewResponse};

pub use compiler::{IdentityCompiler, ViewCompiler, ViewCompilers, ViewTransform};

impl Database {
    /// Query `/_design/{design}/_view/{view}`
    pub async fn query_view(&self, design: &str, view: &str, query: &ViewQuery) -> Result<ViewResponse> {
        let url = self.url(&["_design", design, "_view", view], &query.query_pairs())?;
        let request = match query.keys_body() {
            Some(keys) => HttpRequest::post(url).json(keys),
            None => HttpRequest::get(url),
        };
        self.send(request).await?.error_for_status()?.json()
    }

    /// Create or overwrite a design document, picking up the current revision if one exists
    pub async fn save_design_document(&self, id: &str, doc: &Value) -> Result<DocumentUpdate> {
        let mut doc = doc.clone();
        let object = doc.as_object_mut().ok_or_else(|| {
            Error::Serialization(<serde_json::Error as serde::de::Error>::custom(
                "design document must be a JSON object",
            ))
        })?;
        object.insert("_id".to_string(), Value::String(id.to_string()));

        let existing: Option<Value> = self.get_document(id).await?;
        match existing.as_ref().and_then(|d| d.get("_rev")).cloned() {
            Some(rev) => {
                object.insert("_rev".to_string(), rev);
            }
            None => {
                object.remove("_rev");
            }
        }

        self.put_document(&doc).await
    }

    /// Add or replace views in `_design/{design}`.
    ///
    /// Each definition is run through the compiler registered for `language`
    /// first. Views already in the design document that are not named in
    /// `views` are kept.
    pub async fn save_view(
        &self,
        design: &str,
        language: &str,
        views: BTreeMap<String, ViewDefinition>,
        compilers: &ViewCompilers,
        options: &JsonObject,
    ) -> Result<DocumentUpdate> {
        let id = format!("_design/{}", design);
        let transform = compilers.compile(language, options);

        let mut doc = self
            .get_document::<JsonObject>(&id)
            .await?
            .unwrap_or_default();

        let mut stored_views = match doc.remove("views") {
            Some(Value::Object(existing)) => existing,
            _ => JsonObject::new(),
        };
        for (name, view) in views {
            stored_views.insert(name, serde_json::to_value(transform(view))?);
        }

        doc.insert("_id".to_string(), Value::String(id.clone()));
        doc.insert("language".to_string(), Value::String(language.to_string()));
        doc.insert("views".to_string(), Value::Object(stored_views));

        let update = self.put_document(&Value::Object(doc)).await?;
        info!("[Database] Saved views in '{}' of '{}' ({})", id, self.name(), language);
        Ok(update)
    }
}
