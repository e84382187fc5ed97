use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Error;
use sofa_api::ChangeEvent;

/// Receives the events of a [`ChangeConsumer`](super::ChangeConsumer).
///
/// Listeners are awaited one after another for every change, and the next
/// change is not read from the server until all of them have returned.
/// A slow listener therefore slows the feed down rather than buffering it.
#[async_trait]
pub trait ChangeListener: Send + Sync {
    async fn on_change(&self, change: &ChangeEvent);

    /// Called once when the feed stops because of an error
    async fn on_error(&self, _error: &Error) {}
}

/// Adapts a plain closure into a [`ChangeListener`]
pub struct FnListener<F>(pub F);

#[async_trait]
impl<F> ChangeListener for FnListener<F>
where
    F: Fn(&ChangeEvent) + Send + Sync,
{
    async fn on_change(&self, change: &ChangeEvent) {
        (self.0)(change)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Arc<dyn ChangeListener>)>,
}

impl Subscribers {
    pub(crate) fn add(&mut self, listener: Arc<dyn ChangeListener>) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.listeners.push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Listeners in subscription order
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn ChangeListener>> {
        self.listeners.iter().map(|(_, l)| l.clone()).collect()
    }
}
