//! In-process publish/subscribe channel for committed notifications.
//!
//! The feed is the live half of notification delivery: every notification
//! the store commits is published here so connected observers see it
//! immediately. The durable half is the store's notification log, which
//! observers poll with a cursor to catch up after a lag or reconnect.

use std::collections::BTreeSet;

use colony_types::{NotificationKind, NotificationRecord};
use tokio::sync::broadcast;

/// Default capacity of the broadcast channel.
///
/// A subscriber that falls behind by more than this many notifications
/// receives [`FeedError::Lagged`] and should re-sync from the store.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Why a subscription yielded no notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The subscriber missed notifications. The value is how many were
    /// dropped; the next receive resumes with the oldest retained one.
    #[error("subscriber lagged by {0} notifications")]
    Lagged(u64),

    /// The ledger was dropped and no more notifications will arrive.
    #[error("notification feed closed")]
    Closed,
}

/// Broadcast sender shared by the ledger and its observers.
#[derive(Debug, Clone)]
pub struct NotificationFeed {
    tx: broadcast::Sender<NotificationRecord>,
}

impl NotificationFeed {
    /// Create a feed retaining up to `capacity` unread notifications per
    /// subscriber (at least one).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a committed notification. Stores call this in sequence
    /// order while they still hold the outbox.
    ///
    /// Returns the number of subscribers that received it. Zero
    /// subscribers is normal and not an error.
    pub fn publish(&self, record: &NotificationRecord) -> usize {
        let receivers = self.tx.send(record.clone()).unwrap_or(0);
        tracing::trace!(
            sequence = record.sequence,
            kind = record.notification.kind().as_str(),
            receivers,
            "Published notification"
        );
        receivers
    }

    /// Subscribe to every notification kind.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            kinds: None,
        }
    }

    /// Subscribe to the given notification kinds only.
    pub fn subscribe_kinds(&self, kinds: impl IntoIterator<Item = NotificationKind>) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            kinds: Some(kinds.into_iter().collect()),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for NotificationFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

/// A filtered receiver on the [`NotificationFeed`].
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<NotificationRecord>,
    kinds: Option<BTreeSet<NotificationKind>>,
}

impl Subscription {
    /// Wait for the next notification that passes the filter.
    pub async fn recv(&mut self) -> Result<NotificationRecord, FeedError> {
        loop {
            match self.rx.recv().await {
                Ok(record) if self.accepts(&record) => return Ok(record),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => return Err(FeedError::Lagged(n)),
                Err(broadcast::error::RecvError::Closed) => return Err(FeedError::Closed),
            }
        }
    }

    fn accepts(&self, record: &NotificationRecord) -> bool {
        self.kinds
            .as_ref()
            .is_none_or(|kinds| kinds.contains(&record.notification.kind()))
    }
}
