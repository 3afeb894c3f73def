//! Background board reconciliation.
//!
//! Re-fetches the active day on a fixed interval and whenever a burst of
//! change notifications for that day arrives on the [`ChangeBus`]. Both
//! triggers funnel into [`DispatchBoard::refresh`], whose sequence numbers
//! keep overlapping fetches from rolling the board back. The change
//! subscription tracks the board's active date, so a day switch takes
//! effect even while a burst is being collected.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use beton_events::bus::ChangeBus;
use beton_events::debounce::Debouncer;

use crate::board::DispatchBoard;
use crate::config::DispatchConfig;

/// Default polling interval for the reconciliation loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Poll,
    Push,
}

impl Trigger {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Push => "push",
        }
    }
}

/// Keeps one [`DispatchBoard`] in step with the system of record.
///
/// A single long-lived Tokio task per open board.
pub struct BoardReconciler {
    board: Arc<DispatchBoard>,
    bus: Arc<ChangeBus>,
    poll_interval: Duration,
    debouncer: Debouncer,
}

impl BoardReconciler {
    /// Create a reconciler with the default 30-second poll interval and
    /// 100 ms debounce window.
    pub fn new(board: Arc<DispatchBoard>, bus: Arc<ChangeBus>) -> Self {
        Self {
            board,
            bus,
            poll_interval: DEFAULT_POLL_INTERVAL,
            debouncer: Debouncer::default(),
        }
    }

    pub fn from_config(
        board: Arc<DispatchBoard>,
        bus: Arc<ChangeBus>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            board,
            bus,
            poll_interval: config.poll_interval,
            debouncer: Debouncer::new(config.debounce_window),
        }
    }

    /// Run the reconciliation loop until the cancellation token is
    /// triggered.
    ///
    /// The first poll fires immediately. If the bus closes, the loop keeps
    /// polling.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut subscription = self.bus.follow_date(self.board.watch_date());
        let mut push_open = true;

        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            debounce_ms = self.debouncer.window().as_millis() as u64,
            "Board reconciler started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Board reconciler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.reconcile(Trigger::Poll).await;
                }
                burst = self.debouncer.next_burst(&mut subscription), if push_open => {
                    match burst {
                        Some(burst) => {
                            tracing::debug!(
                                changes = burst.changes,
                                lagged = burst.lagged,
                                "Change notifications received",
                            );
                            self.reconcile(Trigger::Push).await;
                        }
                        None => {
                            tracing::warn!("Change bus closed, continuing with polling only");
                            push_open = false;
                        }
                    }
                }
            }
        }
    }

    /// One reconciliation cycle. Failures leave the last good snapshot in
    /// place; the next trigger retries.
    async fn reconcile(&self, trigger: Trigger) {
        match self.board.refresh().await {
            Ok(snapshot) => tracing::debug!(
                trigger = trigger.as_str(),
                sequence = snapshot.sequence,
                deliveries = snapshot.deliveries.len(),
                "Board reconciled",
            ),
            Err(e) => tracing::warn!(
                trigger = trigger.as_str(),
                kind = e.kind(),
                error = %e,
                "Board reconciliation failed",
            ),
        }
    }
}
