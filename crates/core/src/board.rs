//! Partitioning the day's deliveries into dispatch board columns.

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::delivery::DeliveryRecord;
use crate::policy::DispatchPolicy;
use crate::workflow::WorkflowState;

/// The board columns. Every record lands in exactly one.
#[derive(Debug, Default, Serialize)]
pub struct BoardBuckets<'a> {
    pub pending_validation: Vec<&'a DeliveryRecord>,
    /// Planned and due within the look-ahead, overdue, or untimed.
    pub to_produce: Vec<&'a DeliveryRecord>,
    /// Planned but due later than the look-ahead.
    pub upcoming: Vec<&'a DeliveryRecord>,
    /// Loading or awaiting technical validation at the plant.
    pub loading: Vec<&'a DeliveryRecord>,
    pub en_route: Vec<&'a DeliveryRecord>,
    pub to_invoice: Vec<&'a DeliveryRecord>,
    pub invoiced: Vec<&'a DeliveryRecord>,
}

impl BoardBuckets<'_> {
    pub fn total(&self) -> usize {
        self.pending_validation.len()
            + self.to_produce.len()
            + self.upcoming.len()
            + self.loading.len()
            + self.en_route.len()
            + self.to_invoice.len()
            + self.invoiced.len()
    }
}

/// Whether a planned record needs production attention at `now`.
///
/// Untimed records always do; timed ones once they fall within the
/// look-ahead horizon, including anything already past due.
pub fn due_for_production(
    record: &DeliveryRecord,
    now: NaiveDateTime,
    lookahead: Duration,
) -> bool {
    match record.scheduled_at() {
        None => true,
        Some(at) => at - now <= lookahead,
    }
}

/// Partition deliveries by workflow state. `now` is plant wall-clock time.
pub fn categorize<'a>(
    deliveries: &'a [DeliveryRecord],
    now: NaiveDateTime,
    policy: &DispatchPolicy,
) -> BoardBuckets<'a> {
    let lookahead = Duration::minutes(policy.production_lookahead_minutes);
    let mut buckets = BoardBuckets::default();

    for record in deliveries {
        match record.state {
            WorkflowState::PendingValidation => buckets.pending_validation.push(record),
            WorkflowState::Planned if due_for_production(record, now, lookahead) => {
                buckets.to_produce.push(record)
            }
            WorkflowState::Planned => buckets.upcoming.push(record),
            WorkflowState::Loading | WorkflowState::TechnicalValidation => {
                buckets.loading.push(record)
            }
            WorkflowState::EnRoute => buckets.en_route.push(record),
            WorkflowState::Delivered if record.invoice_generated => buckets.invoiced.push(record),
            WorkflowState::Delivered => buckets.to_invoice.push(record),
            WorkflowState::Invoiced => buckets.invoiced.push(record),
        }
    }

    buckets
}
