//! Turns a `_changes` response body into a stream of [`FeedEvent`]s.
//!
//! One-shot feeds are buffered and parsed as a whole once the body ends.
//! Continuous feeds are split on newlines as bytes arrive, so events are
//! yielded as soon as their line is complete regardless of how the
//! transport chunks the body.

use futures::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::transport::ByteStream;
use sofa_api::{FeedEvent, FeedLine, FeedType, OneShotBody};

/// Lazily parsed change feed.
///
/// The body stream is dropped as soon as the feed terminates (end of body,
/// abort, trailing `last_seq`, or a failure), and never polled again.
pub struct ChangeStream {
    body: Option<ByteStream>,
    continuous: bool,
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to hold no newline
    scanned: usize,
    pending: VecDeque<Result<FeedEvent>>,
}

impl ChangeStream {
    pub fn new(body: ByteStream, feed: FeedType) -> Self {
        Self {
            body: Some(body),
            continuous: feed.is_continuous(),
            buffer: Vec::new(),
            scanned: 0,
            pending: VecDeque::new(),
        }
    }

    /// True once the underlying body has been released
    pub fn is_terminated(&self) -> bool {
        self.body.is_none()
    }

    fn release(&mut self) {
        if self.body.take().is_some() {
            self.buffer.clear();
            self.scanned = 0;
            debug!("[ChangeStream] Released feed body");
        }
    }

    /// Queue every complete line currently buffered
    fn drain_lines(&mut self) {
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=self.scanned + offset).collect();
            self.scanned = 0;
            if !self.parse_line(&line, false) {
                return;
            }
        }
        self.scanned = self.buffer.len();
    }

    /// Parse one continuous-feed line. Returns false when the feed is over.
    ///
    /// `at_end` marks the bytes left over when the body ended; if those are
    /// a line cut short by the server closing the connection, the feed just
    /// ends.
    fn parse_line(&mut self, line: &[u8], at_end: bool) -> bool {
        let line = line.trim_ascii();
        if line.is_empty() {
            trace!("[ChangeStream] Heartbeat");
            return true;
        }

        match serde_json::from_slice::<FeedLine>(line) {
            Ok(FeedLine::Change(change)) => {
                self.pending.push_back(Ok(FeedEvent::Change(change)));
                true
            }
            Ok(FeedLine::Finished { last_seq, pending }) => {
                self.pending
                    .push_back(Ok(FeedEvent::Finished { last_seq, pending }));
                self.release();
                false
            }
            Ok(FeedLine::Error(source)) => {
                self.pending.push_back(Err(Error::Server {
                    status: 200,
                    source,
                }));
                self.release();
                false
            }
            Err(e) if at_end && e.is_eof() => {
                debug!("[ChangeStream] Dropping truncated final line ({} bytes)", line.len());
                self.release();
                false
            }
            Err(e) => {
                self.pending.push_back(Err(Error::Parse(e)));
                self.release();
                false
            }
        }
    }

    /// Handle the end of the body: parse the one-shot document, or a final
    /// continuous line that had no trailing newline.
    fn finish(&mut self) {
        let remaining = std::mem::take(&mut self.buffer);
        self.release();

        if self.continuous {
            self.parse_line(&remaining, true);
            return;
        }

        if remaining.trim_ascii().is_empty() {
            // Aborted before the server sent anything
            return;
        }

        match serde_json::from_slice::<OneShotBody>(&remaining) {
            Ok(OneShotBody::Changes(response)) => {
                debug!(
                    "[ChangeStream] One-shot feed with {} results, last_seq={}",
                    response.results.len(),
                    response.last_seq
                );
                self.pending.extend(
                    response
                        .results
                        .into_iter()
                        .map(|change| Ok(FeedEvent::Change(change))),
                );
                self.pending.push_back(Ok(FeedEvent::Finished {
                    last_seq: response.last_seq,
                    pending: response.pending,
                }));
            }
            Ok(OneShotBody::Error(source)) => {
                self.pending.push_back(Err(Error::Server {
                    status: 200,
                    source,
                }));
            }
            Err(e) => self.pending.push_back(Err(Error::Parse(e))),
        }
    }
}

impl Stream for ChangeStream {
    type Item = Result<FeedEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(item) = this.pending.pop_front() {
                return Poll::Ready(Some(item));
            }

            let Some(body) = this.body.as_mut() else {
                return Poll::Ready(None);
            };

            match body.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buffer.extend_from_slice(&chunk);
                    if this.continuous {
                        this.drain_lines();
                    }
                }
                Poll::Ready(Some(Err(Error::ConnectionAborted))) => {
                    debug!("[ChangeStream] Connection aborted, ending feed");
                    this.buffer.clear();
                    this.release();
                }
                Poll::Ready(Some(Err(e))) => {
                    this.release();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => this.finish(),
            }
        }
    }
}
