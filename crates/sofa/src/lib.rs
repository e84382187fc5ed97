//! CouchDB client with a managed `_changes` consumer
//!
//! - `client` - [`Server`] and [`Database`] handles
//! - `documents` - document, attachment and bulk operations
//! - `views` - view queries, design documents and the view compiler registry
//! - `changes` - change feed reader, sessions and [`ChangeConsumer`]
//! - `transport` - the HTTP seam ([`Transport`]) and its reqwest implementation
//! - `config` - [`ClientConfig`] loaded from YAML and the environment
//! - `testing` - [`testing::FakeTransport`] for driving the client without a server

pub mod changes;
pub mod client;
pub mod config;
pub mod documents;
pub mod error;
pub mod testing;
pub mod transport;
pub mod views;

pub use changes::{ChangeConsumer, ChangeFeed, ChangeListener, ChangeStream, ConnectionHandle, FeedSession, SubscriptionId};
pub use client::{Database, Server};
pub use config::ClientConfig;
pub use documents::Attachment;
pub use error::{Error, Result};
pub use transport::{ReqwestTransport, Transport};
pub use views::{IdentityCompiler, ViewCompiler, ViewCompilers};

// Wire types, so callers need only one import
pub use sofa_api::{
    ChangeEvent, ConsumerState, DatabaseInfo, FeedEvent, FeedOptions, FeedType, JsonObject, ReplicationRequest, Seq,
    ViewDefinition, ViewQuery, ViewResponse,
};
