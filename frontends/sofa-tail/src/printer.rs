use async_trait::async_trait;
use std::io::Write;
use std::sync::Mutex;

use sofa::{ChangeListener, Error};
use sofa_api::ChangeEvent;

/// One output line for `change`: tab-separated `seq id revs [deleted]`, or the
/// change itself as JSON
pub fn format_change(change: &ChangeEvent, json: bool) -> String {
    if json {
        return serde_json::to_string(change).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e));
    }

    let mut line = format!("{}\t{}\t{}", change.seq, change.id, change.revs().join(","));
    if change.deleted {
        line.push_str("\tdeleted");
    }
    line
}

/// Writes every change to `out`, one line each
pub struct ChangePrinter<W> {
    out: Mutex<W>,
    json: bool,
}

impl<W: Write + Send> ChangePrinter<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self {
            out: Mutex::new(out),
            json,
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl<W: Write + Send> ChangeListener for ChangePrinter<W> {
    async fn on_change(&self, change: &ChangeEvent) {
        let line = format_change(change, self.json);
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            tracing::warn!("[ChangePrinter] Failed to write change {}: {}", change.seq, e);
        }
    }

    async fn on_error(&self, error: &Error) {
        tracing::error!("[ChangePrinter] Feed stopped: {}", error);
    }
}
