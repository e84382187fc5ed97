//! Opening a `_changes` feed

use futures::StreamExt;
use futures::stream::{self, AbortHandle, abortable};
use tracing::{debug, info};

use crate::changes::reader::ChangeStream;
use crate::client::Database;
use crate::error::{Error, Result};
use crate::transport::HttpRequest;
use sofa_api::{FeedOptions, FeedType, Seq};

/// Forces an open feed connection closed.
///
/// Aborting wakes any pending read; the event stream then ends without an
/// error and releases the response body.
#[derive(Debug)]
pub struct ConnectionHandle {
    abort: AbortHandle,
}

impl ConnectionHandle {
    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }
}

/// An open change feed: its events plus the handle that can cut it off
pub struct FeedSession {
    pub events: ChangeStream,
    pub handle: ConnectionHandle,
    /// Sequence the feed was opened from
    pub since: Seq,
    pub feed: FeedType,
}

impl FeedSession {
    pub fn into_parts(self) -> (ChangeStream, ConnectionHandle) {
        (self.events, self.handle)
    }
}

pub struct ChangeFeed;

impl ChangeFeed {
    /// Open `GET /{db}/_changes` with `options`.
    ///
    /// Without an explicit `since`, the feed starts at the database's current
    /// update sequence. A missing database is reported as
    /// [`Error::DatabaseNotFound`] here, before any event is read.
    #[tracing::instrument(name = "changes.open", skip(db, options), fields(db = %db.name(), feed = %options.feed))]
    pub async fn open(db: &Database, options: &FeedOptions) -> Result<FeedSession> {
        let since = match &options.since {
            Some(since) => since.clone(),
            None => {
                let info = db.info().await?;
                debug!("[ChangeFeed] Resolved since from update_seq={}", info.update_seq);
                info.update_seq
            }
        };

        let url = db.url(&["_changes"], &options.query_pairs(Some(&since)))?;
        let response = db.server().transport().stream(HttpRequest::get(url)).await?;

        if response.status == 404 {
            return Err(Error::DatabaseNotFound {
                db: db.name().to_string(),
            });
        }
        if !response.is_success() {
            let status = response.status;
            let body = response.collect_body().await?;
            return Err(Error::from_status(status, &body));
        }

        // An aborted body ends with ConnectionAborted rather than a plain end,
        // so a partially received line is dropped instead of parsed
        let (body, abort) = abortable(response.body);
        let watcher = abort.clone();
        let body = body.chain(
            stream::once(async move { watcher.is_aborted() })
                .filter_map(|aborted| async move { aborted.then_some(Err(Error::ConnectionAborted)) }),
        );
        info!("[ChangeFeed] Opened {} feed on '{}' since {}", options.feed, db.name(), since);

        Ok(FeedSession {
            events: ChangeStream::new(Box::pin(body), options.feed),
            handle: ConnectionHandle { abort },
            since,
            feed: options.feed,
        })
    }
}

impl Database {
    /// Open a change feed session; see [`ChangeFeed::open`]
    pub async fn changes(&self, options: &FeedOptions) -> Result<FeedSession> {
        ChangeFeed::open(self, options).await
    }
}
