//! Document, attachment and bulk operations on a [`Database`]

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::client::Database;
use crate::error::{Error, Result};
use crate::transport::HttpRequest;
use sofa_api::{BulkDocsRequest, BulkResult, DocumentUpdate, ViewQuery, ViewResponse};

/// Attachment body with the content type the server reported
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub content_type: Option<String>,
    pub data: Bytes,
}

fn rev_query(rev: Option<&str>) -> Vec<(String, String)> {
    rev.map(|r| vec![("rev".to_string(), r.to_string())])
        .unwrap_or_default()
}

fn not_an_object() -> Error {
    Error::Serialization(<serde_json::Error as serde::de::Error>::custom(
        "document must be a JSON object",
    ))
}

impl Database {
    /// Fetch a document, `None` if it does not exist (or was deleted)
    pub async fn get_document<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        self.fetch_document(id, None).await
    }

    /// Fetch a specific revision of a document
    pub async fn get_document_rev<T: DeserializeOwned>(&self, id: &str, rev: &str) -> Result<Option<T>> {
        self.fetch_document(id, Some(rev)).await
    }

    async fn fetch_document<T: DeserializeOwned>(&self, id: &str, rev: Option<&str>) -> Result<Option<T>> {
        let url = self.doc_url(id, &[], &rev_query(rev))?;
        let response = self.send(HttpRequest::get(url)).await?;
        if response.status == 404 {
            debug!("[Database] Document '{}' not found in '{}'", id, self.name());
            return Ok(None);
        }
        response.error_for_status()?.json().map(Some)
    }

    /// Store a document.
    ///
    /// With an `_id` the document is `PUT` under that id (include `_rev` to
    /// update); without one it is `POST`ed and the server assigns the id.
    pub async fn put_document(&self, doc: &Value) -> Result<DocumentUpdate> {
        let object = doc.as_object().ok_or_else(not_an_object)?;
        let request = match object.get("_id").and_then(Value::as_str) {
            Some(id) => HttpRequest::put(self.doc_url(id, &[], &[])?),
            None => HttpRequest::post(self.url(&[], &[])?),
        };

        let update: DocumentUpdate = self
            .send(request.json(doc.clone()))
            .await?
            .error_for_status()?
            .json()?;
        debug!("[Database] Stored '{}' at rev {}", update.id, update.rev);
        Ok(update)
    }

    /// Write a new revision of `id` on top of `rev`
    pub async fn update_document(&self, id: &str, rev: &str, doc: &Value) -> Result<DocumentUpdate> {
        let mut doc = doc.clone();
        let object = doc.as_object_mut().ok_or_else(not_an_object)?;
        object.insert("_id".to_string(), Value::String(id.to_string()));
        object.insert("_rev".to_string(), Value::String(rev.to_string()));
        self.put_document(&doc).await
    }

    pub async fn delete_document(&self, id: &str, rev: &str) -> Result<DocumentUpdate> {
        let url = self.doc_url(id, &[], &rev_query(Some(rev)))?;
        self.send(HttpRequest::delete(url))
            .await?
            .error_for_status()?
            .json()
    }

    /// Upload an attachment. `rev` is required unless the document does not exist yet.
    pub async fn put_attachment(
        &self,
        doc_id: &str,
        rev: Option<&str>,
        name: &str,
        content_type: &str,
        data: impl Into<Bytes>,
    ) -> Result<DocumentUpdate> {
        let url = self.doc_url(doc_id, &[name], &rev_query(rev))?;
        self.send(HttpRequest::put(url).bytes(content_type, data))
            .await?
            .error_for_status()?
            .json()
    }

    pub async fn get_attachment(&self, doc_id: &str, name: &str) -> Result<Option<Attachment>> {
        let url = self.doc_url(doc_id, &[name], &[])?;
        let response = self.send(HttpRequest::get(url)).await?;
        if response.status == 404 {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        Ok(Some(Attachment {
            content_type: response.content_type,
            data: response.body,
        }))
    }

    pub async fn delete_attachment(&self, doc_id: &str, rev: &str, name: &str) -> Result<DocumentUpdate> {
        let url = self.doc_url(doc_id, &[name], &rev_query(Some(rev)))?;
        self.send(HttpRequest::delete(url))
            .await?
            .error_for_status()?
            .json()
    }

    /// Write many documents in one request (`POST /{db}/_bulk_docs`)
    pub async fn bulk_docs(&self, docs: Vec<Value>, all_or_nothing: bool) -> Result<Vec<BulkResult>> {
        let count = docs.len();
        let body = serde_json::to_value(BulkDocsRequest {
            docs,
            all_or_nothing,
        })?;
        let url = self.url(&["_bulk_docs"], &[])?;
        let results: Vec<BulkResult> = self
            .send(HttpRequest::post(url).json(body))
            .await?
            .error_for_status()?
            .json()?;

        let failed = results.iter().filter(|r| !r.is_ok()).count();
        debug!(
            "[Database] Bulk write of {} docs to '{}': {} failed",
            count,
            self.name(),
            failed
        );
        Ok(results)
    }

    /// Query `_all_docs`
    pub async fn all_docs(&self, query: &ViewQuery) -> Result<ViewResponse> {
        let url = self.url(&["_all_docs"], &query.query_pairs())?;
        let request = match query.keys_body() {
            Some(keys) => HttpRequest::post(url).json(keys),
            None => HttpRequest::get(url),
        };
        self.send(request).await?.error_for_status()?.json()
    }
}
