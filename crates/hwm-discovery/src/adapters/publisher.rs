//! # Notification Publisher
//!
//! Broadcast fan-out of [`DiscoveryNotification`]s. Slow subscribers lag and
//! lose old notifications; publishers never block or fail.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::DiscoveryNotification;

/// Default channel capacity.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

/// In-process notification bus.
#[derive(Debug)]
pub struct NotificationPublisher {
    sender: broadcast::Sender<DiscoveryNotification>,
    published: AtomicU64,
}

impl Default for NotificationPublisher {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_NOTIFICATION_CAPACITY)
    }
}

impl NotificationPublisher {
    /// Bus holding at most `capacity` undelivered notifications per subscriber.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: AtomicU64::new(0),
        }
    }

    /// Publish to current subscribers. Returns how many received it.
    pub fn publish(&self, notification: DiscoveryNotification) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        match self.sender.send(notification) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("[discovery] notification dropped, no subscribers");
                0
            }
        }
    }

    /// New subscription starting at the next notification.
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryNotification> {
        self.sender.subscribe()
    }

    /// Total notifications published.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}
