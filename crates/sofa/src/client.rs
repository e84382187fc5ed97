//! Server and database handles.
//!
//! Every call takes an explicit handle: [`Server`] for server-wide endpoints
//! and [`Database`] (obtained via [`Server::database`]) for everything scoped
//! to one database. Handles are cheap to clone and share one transport.

use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{ClientConfig, DEFAULT_TIMEOUT_SECS};
use crate::error::{Error, Result};
use crate::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use sofa_api::{DatabaseInfo, ReplicationRequest};

/// Handle to a CouchDB server
#[derive(Clone)]
pub struct Server {
    base_url: Url,
    transport: Arc<dyn Transport>,
}

impl Server {
    /// Connect to `base_url` with the default reqwest transport
    pub fn new(base_url: &str) -> Result<Self> {
        let transport = ReqwestTransport::new(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)))?;
        Self::with_transport(base_url, Arc::new(transport))
    }

    pub fn with_transport(base_url: &str, transport: Arc<dyn Transport>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidUrl(format!("{} cannot be a base URL", base_url)));
        }

        Ok(Self {
            base_url,
            transport,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut transport = ReqwestTransport::new(config.timeout())?;
        if let Some(username) = &config.username {
            transport = transport.with_basic_auth(username.clone(), config.password.clone());
        }
        Self::with_transport(&config.url, Arc::new(transport))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Handle for a database on this server. No request is made.
    pub fn database(&self, name: impl Into<String>) -> Database {
        Database {
            server: self.clone(),
            name: name.into(),
        }
    }

    /// Build a URL from raw path segments, each percent-encoded individually
    pub(crate) fn url(&self, segments: &[&str], query: &[(String, String)]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);

        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    pub(crate) async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.transport.send(request).await
    }

    /// Names of all databases (`GET /_all_dbs`)
    pub async fn all_databases(&self) -> Result<Vec<String>> {
        let url = self.url(&["_all_dbs"], &[])?;
        self.send(HttpRequest::get(url)).await?.error_for_status()?.json()
    }

    pub async fn create_database(&self, name: &str) -> Result<Database> {
        let db = self.database(name);
        db.create().await?;
        Ok(db)
    }

    pub async fn delete_database(&self, name: &str) -> Result<()> {
        self.database(name).delete().await
    }

    /// Database metadata, or `None` if the database does not exist
    pub async fn database_info(&self, name: &str) -> Result<Option<DatabaseInfo>> {
        match self.database(name).info().await {
            Ok(info) => Ok(Some(info)),
            Err(Error::DatabaseNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn database_exists(&self, name: &str) -> Result<bool> {
        Ok(self.database_info(name).await?.is_some())
    }

    /// Trigger (or cancel) a replication via `POST /_replicate`
    pub async fn replicate(&self, request: &ReplicationRequest) -> Result<Value> {
        let url = self.url(&["_replicate"], &[])?;
        info!(
            "[Server] Replicating {} -> {} (continuous={})",
            request.source, request.target, request.continuous
        );
        let body = serde_json::to_value(request)?;
        self.send(HttpRequest::post(url).json(body))
            .await?
            .error_for_status()?
            .json()
    }
}

/// Handle to one database on a server
#[derive(Clone)]
pub struct Database {
    server: Server,
    name: String,
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// URL below this database, e.g. `url(&["_changes"], ..)`
    pub(crate) fn url(&self, path: &[&str], query: &[(String, String)]) -> Result<Url> {
        let mut segments = Vec::with_capacity(path.len() + 1);
        segments.push(self.name.as_str());
        segments.extend_from_slice(path);
        self.server.url(&segments, query)
    }

    /// URL of a document, keeping `_design/` and `_local/` prefixes as their own segment
    pub(crate) fn doc_url(&self, id: &str, extra: &[&str], query: &[(String, String)]) -> Result<Url> {
        let mut segments = doc_segments(id);
        segments.extend_from_slice(extra);
        self.url(&segments, query)
    }

    pub(crate) async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.server.send(request).await
    }

    /// Map a 404 on a database-level request to `DatabaseNotFound`
    pub(crate) fn check_database_response(&self, response: HttpResponse) -> Result<HttpResponse> {
        if response.status == 404 {
            return Err(Error::DatabaseNotFound {
                db: self.name.clone(),
            });
        }
        response.error_for_status()
    }

    /// `GET /{db}`
    pub async fn info(&self) -> Result<DatabaseInfo> {
        let url = self.url(&[], &[])?;
        let response = self.send(HttpRequest::get(url)).await?;
        self.check_database_response(response)?.json()
    }

    pub async fn exists(&self) -> Result<bool> {
        match self.info().await {
            Ok(_) => Ok(true),
            Err(Error::DatabaseNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// `PUT /{db}`; fails with a 412 server error if it already exists
    pub async fn create(&self) -> Result<()> {
        let url = self.url(&[], &[])?;
        self.send(HttpRequest::put(url)).await?.error_for_status()?;
        info!("[Database] Created database '{}'", self.name);
        Ok(())
    }

    /// Create the database unless it already exists
    pub async fn get_or_create(&self) -> Result<()> {
        match self.create().await {
            Ok(()) => Ok(()),
            Err(e) if e.status() == Some(412) => {
                debug!("[Database] Database '{}' already exists", self.name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn delete(&self) -> Result<()> {
        let url = self.url(&[], &[])?;
        let response = self.send(HttpRequest::delete(url)).await?;
        self.check_database_response(response)?;
        info!("[Database] Deleted database '{}'", self.name);
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("server", &self.server.base_url.as_str())
            .field("name", &self.name)
            .finish()
    }
}

fn doc_segments(id: &str) -> Vec<&str> {
    for prefix in ["_design/", "_local/"] {
        if let Some(rest) = id.strip_prefix(prefix) {
            return vec![&prefix[..prefix.len() - 1], rest];
        }
    }
    vec![id]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;

    fn server() -> (Server, Arc<FakeTransport>) {
        let transport = Arc::new(FakeTransport::new());
        let server = Server::with_transport("http://couch.test:5984/", transport.clone()).unwrap();
        (server, transport)
    }

    #[test]
    fn test_database_names_are_encoded() {
        let (server, _) = server();
        let db = server.database("logs/2024");
        let url = db.url(&["_changes"], &[]).unwrap();
        assert_eq!(url.as_str(), "http://couch.test:5984/logs%2F2024/_changes");
    }

    #[test]
    fn test_design_doc_keeps_prefix_segment() {
        let (server, _) = server();
        let db = server.database("app");
        let url = db.doc_url("_design/users", &["_view", "by_name"], &[]).unwrap();
        assert_eq!(url.as_str(), "http://couch.test:5984/app/_design/users/_view/by_name");

        let url = db.doc_url("a/b", &[], &[]).unwrap();
        assert_eq!(url.as_str(), "http://couch.test:5984/app/a%2Fb");
    }

    #[test]
    fn test_base_path_is_preserved() {
        let transport = Arc::new(FakeTransport::new());
        let server = Server::with_transport("http://proxy.test/couchdb", transport).unwrap();
        let url = server.url(&["_all_dbs"], &[]).unwrap();
        assert_eq!(url.as_str(), "http://proxy.test/couchdb/_all_dbs");
    }

    #[test]
    fn test_invalid_base_url() {
        let transport = Arc::new(FakeTransport::new());
        assert!(matches!(
            Server::with_transport("not a url", transport),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_info_on_missing_database() {
        let (server, transport) = server();
        transport.respond_json("GET", "/missing", 404, r#"{"error":"not_found","reason":"Database does not exist."}"#);

        let err = server.database("missing").info().await.unwrap_err();
        assert!(matches!(err, Error::DatabaseNotFound { ref db } if db == "missing"));
        assert_eq!(server.database_info("missing").await.unwrap(), None);
        assert!(!server.database_exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_or_create_tolerates_existing() {
        let (server, transport) = server();
        transport.respond_json(
            "PUT",
            "/orders",
            412,
            r#"{"error":"file_exists","reason":"The database could not be created, the file already exists."}"#,
        );

        let db = server.database("orders");
        assert!(db.create().await.unwrap_err().status() == Some(412));
        db.get_or_create().await.unwrap();
    }

    #[tokio::test]
    async fn test_all_databases() {
        let (server, transport) = server();
        transport.respond_json("GET", "/_all_dbs", 200, r#"["_users","orders"]"#);
        assert_eq!(server.all_databases().await.unwrap(), vec!["_users", "orders"]);
    }

    #[tokio::test]
    async fn test_replicate_posts_request() {
        let (server, transport) = server();
        transport.respond_json("POST", "/_replicate", 200, r#"{"ok":true}"#);

        let mut request = ReplicationRequest::new("orders", "http://backup:5984/orders");
        request.create_target = true;
        let result = server.replicate(&request).await.unwrap();
        assert_eq!(result["ok"], Value::Bool(true));

        let sent = transport.requests();
        assert_eq!(
            sent[0].body,
            Some(crate::transport::RequestBody::Json(serde_json::json!({
                "source": "orders",
                "target": "http://backup:5984/orders",
                "create_target": true
            })))
        );
    }
}
