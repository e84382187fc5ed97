//! Wire and data model shared by the sofa CouchDB client.
//!
//! Everything in this crate is plain serde data: change feed events and
//! options, database metadata, document/bulk results and view queries.
//! No I/O happens here.

pub mod changes;
pub mod database;
pub mod document;
pub mod error;
pub mod view;

// Re-export change feed types
pub use changes::{
    ChangeEvent, ChangeRev, ChangesResponse, ConsumerState, FeedEvent, FeedLine, FeedOptions,
    FeedType, OneShotBody, Seq, DEFAULT_HEARTBEAT_MS,
};

// Re-export database types
pub use database::{DatabaseInfo, ReplicationRequest};

// Re-export document types
pub use document::{BulkDocsRequest, BulkResult, DocumentUpdate};

// Re-export error types
pub use error::{CouchError, UnknownFeedType};

// Re-export view types
pub use view::{ViewDefinition, ViewQuery, ViewResponse, ViewRow};

/// Generic JSON object as returned for documents and `doc` bodies
pub type JsonObject = serde_json::Map<String, serde_json::Value>;
