//! Collapsing notification bursts into a single wake-up.
//!
//! A single user action on the backend often produces several change
//! notifications in quick succession (record update, purchase order
//! update, audit). [`Debouncer::next_burst`] waits for the first one, then
//! keeps absorbing notifications until the window elapses, so the board
//! re-fetches once per burst.

use std::time::Duration;

use crate::bus::{DateSubscription, Notification};

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Summary of one collapsed burst.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Burst {
    /// Number of change notifications collapsed into this burst.
    pub changes: usize,
    /// Whether the subscriber lagged at any point during the burst.
    pub lagged: bool,
}

impl Burst {
    fn absorb(&mut self, notification: Notification) {
        match notification {
            Notification::Changed(_) => self.changes += 1,
            Notification::Lagged(_) => self.lagged = true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Debouncer {
    window: Duration,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait for the next burst of notifications on `subscription`.
    ///
    /// The window opens at the first notification and is not extended by
    /// later ones. Returns `None` once the bus is closed and nothing is
    /// pending.
    pub async fn next_burst(&self, subscription: &mut DateSubscription) -> Option<Burst> {
        let mut burst = Burst::default();
        burst.absorb(subscription.recv().await?);

        let deadline = tokio::time::Instant::now() + self.window;
        loop {
            match tokio::time::timeout_at(deadline, subscription.recv()).await {
                Ok(Some(notification)) => burst.absorb(notification),
                // Closed mid-burst: deliver what we have, the next call ends.
                Ok(None) => break,
                Err(_elapsed) => break,
            }
        }

        tracing::debug!(
            changes = burst.changes,
            lagged = burst.lagged,
            date = %subscription.date(),
            "Collapsed change burst",
        );
        Some(burst)
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}
