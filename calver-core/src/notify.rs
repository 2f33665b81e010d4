//! Post-commit notifications.
//!
//! A committed mutation publishes a [`CommitNotice`]. Subscribers react
//! asynchronously; the commit itself never waits on them and succeeds even
//! when nobody is listening.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::cache::DiffCache;
use crate::event::EventId;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitNotice {
    pub event_id: EventId,
    pub kind: NoticeKind,
    /// The version committed, absent for deletions.
    pub version: Option<u32>,
}

#[derive(Clone)]
pub struct CommitNotifier {
    sender: broadcast::Sender<CommitNotice>,
}

impl Default for CommitNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        CommitNotifier { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CommitNotice> {
        self.sender.subscribe()
    }

    pub fn notify(&self, notice: CommitNotice) {
        if self.sender.send(notice).is_err() {
            debug!("no subscribers for commit notice");
        }
    }
}

/// Evicts cached diffs for events named in commit notices.
pub struct CacheInvalidator {
    cache: Arc<dyn DiffCache>,
    receiver: broadcast::Receiver<CommitNotice>,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<dyn DiffCache>, receiver: broadcast::Receiver<CommitNotice>) -> Self {
        CacheInvalidator { cache, receiver }
    }

    pub fn handle(&self, notice: &CommitNotice) {
        debug!(event = %notice.event_id, kind = ?notice.kind, "invalidating cached diffs");
        self.cache.invalidate_event(notice.event_id);
    }

    /// Process notices until every notifier is dropped.
    pub async fn run(mut self) {
        loop {
            match self.receiver.recv().await {
                Ok(notice) => self.handle(&notice),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "commit notices dropped, clearing diff cache");
                    self.cache.clear();
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DiffKey, MemoryDiffCache};

    #[tokio::test]
    async fn test_invalidator_evicts_notified_event() {
        let cache = Arc::new(MemoryDiffCache::new());
        let event = EventId::new();
        let other = EventId::new();
        cache.put(DiffKey::new(event, 1, 2), Arc::new(vec![]));
        cache.put(DiffKey::new(other, 1, 2), Arc::new(vec![]));

        let notifier = CommitNotifier::new();
        let invalidator = CacheInvalidator::new(cache.clone(), notifier.subscribe());
        notifier.notify(CommitNotice {
            event_id: event,
            kind: NoticeKind::Updated,
            version: Some(3),
        });
        drop(notifier);
        invalidator.run().await;

        assert!(cache.get(&DiffKey::new(event, 1, 2)).is_none());
        assert!(cache.get(&DiffKey::new(other, 1, 2)).is_some());
    }

    #[test]
    fn test_notify_without_subscribers_is_harmless() {
        CommitNotifier::new().notify(CommitNotice {
            event_id: EventId::new(),
            kind: NoticeKind::Deleted,
            version: None,
        });
    }
}
