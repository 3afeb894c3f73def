//! Scheduling collision detection among planned deliveries.
//!
//! Conflicts are informational: they never block a transition.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::delivery::DeliveryRecord;
use crate::types::DeliveryId;
use crate::workflow::WorkflowState;

/// Two planned deliveries scheduled closer together than the window.
///
/// `a` is the earlier of the two (ties broken by id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulingConflict {
    pub a: DeliveryId,
    pub b: DeliveryId,
    pub gap_minutes: i64,
}

impl SchedulingConflict {
    pub fn involves(&self, id: &str) -> bool {
        self.a == id || self.b == id
    }
}

/// Report every unordered pair of `Planned` deliveries with an explicit
/// time whose gap is strictly below `window_minutes`.
///
/// Sorts by scheduled instant and, for each record, scans forward while
/// the gap stays under the window. Every pair under the threshold is
/// reported, not only neighbours.
pub fn detect_conflicts(
    deliveries: &[DeliveryRecord],
    window_minutes: i64,
) -> Vec<SchedulingConflict> {
    let mut timed: Vec<(NaiveDateTime, &DeliveryRecord)> = deliveries
        .iter()
        .filter(|d| d.state == WorkflowState::Planned)
        .filter_map(|d| d.scheduled_at().map(|at| (at, d)))
        .collect();
    timed.sort_by(|(t1, d1), (t2, d2)| t1.cmp(t2).then_with(|| d1.id.cmp(&d2.id)));

    let mut conflicts = Vec::new();
    for (i, (start, first)) in timed.iter().enumerate() {
        for (at, second) in &timed[i + 1..] {
            let gap_minutes = (*at - *start).num_minutes();
            if gap_minutes >= window_minutes {
                break;
            }
            conflicts.push(SchedulingConflict {
                a: first.id.clone(),
                b: second.id.clone(),
                gap_minutes,
            });
        }
    }
    conflicts
}
