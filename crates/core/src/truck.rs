//! Fleet registry entries and truck assignment validation.
//!
//! The registry is owned externally; the dispatch core only reads it and
//! cross-checks it against the day's assignments to prevent double-booking.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryRecord;
use crate::types::{DeliveryId, TruckId};

/// Registry status of a fleet unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruckStatus {
    Available,
    OnMission,
    Maintenance,
    OutOfService,
}

/// A fleet unit (mixer truck or pump).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruckRecord {
    pub id: TruckId,
    pub driver_name: Option<String>,
    pub phone: Option<String>,
    /// Drum capacity in m³.
    pub capacity_m3: Decimal,
    pub status: TruckStatus,
}

/// Why a truck cannot take an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum UnavailableReason {
    OnMission,
    Maintenance,
    OutOfService,
    /// Registry says available but another active same-day delivery holds it.
    AssignedElsewhere { delivery_id: DeliveryId },
    UnknownTruck,
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OnMission => f.write_str("on mission"),
            Self::Maintenance => f.write_str("in maintenance"),
            Self::OutOfService => f.write_str("out of service"),
            Self::AssignedElsewhere { delivery_id } => {
                write!(f, "already assigned to delivery {delivery_id}")
            }
            Self::UnknownTruck => f.write_str("not in the fleet registry"),
        }
    }
}

/// Result of checking a truck against a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TruckAvailability {
    Available,
    Unavailable(UnavailableReason),
}

impl TruckAvailability {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Check whether `truck_id` may be assigned to `record`.
///
/// Re-assigning the record's current truck always succeeds. Otherwise the
/// registry status must be `Available` and no other delivery scheduled the
/// same day that still holds its truck may reference it.
pub fn check_assignment(
    trucks: &[TruckRecord],
    truck_id: &str,
    record: &DeliveryRecord,
    same_day: &[DeliveryRecord],
) -> TruckAvailability {
    if record.truck_id.as_deref() == Some(truck_id) {
        return TruckAvailability::Available;
    }

    let Some(truck) = trucks.iter().find(|t| t.id == truck_id) else {
        return TruckAvailability::Unavailable(UnavailableReason::UnknownTruck);
    };

    match truck.status {
        TruckStatus::Available => {}
        TruckStatus::OnMission => {
            return TruckAvailability::Unavailable(UnavailableReason::OnMission)
        }
        TruckStatus::Maintenance => {
            return TruckAvailability::Unavailable(UnavailableReason::Maintenance)
        }
        TruckStatus::OutOfService => {
            return TruckAvailability::Unavailable(UnavailableReason::OutOfService)
        }
    }

    let holder = same_day.iter().find(|other| {
        other.id != record.id
            && other.scheduled_date == record.scheduled_date
            && other.state.holds_truck()
            && other.truck_id.as_deref() == Some(truck_id)
    });

    match holder {
        Some(other) => TruckAvailability::Unavailable(UnavailableReason::AssignedElsewhere {
            delivery_id: other.id.clone(),
        }),
        None => TruckAvailability::Available,
    }
}

/// A delivery whose current truck breaks the assignment invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentAnomaly {
    pub delivery_id: DeliveryId,
    pub truck_id: TruckId,
    pub reason: UnavailableReason,
}

/// Find deliveries whose assigned truck is unknown, grounded, or shared
/// with another delivery that still holds it.
///
/// `OnMission` is not an anomaly here: the registry cannot say which
/// delivery the mission belongs to, and it may be this one.
pub fn assignment_anomalies(
    trucks: &[TruckRecord],
    deliveries: &[DeliveryRecord],
) -> Vec<AssignmentAnomaly> {
    let mut anomalies = Vec::new();

    for (idx, record) in deliveries.iter().enumerate() {
        let Some(truck_id) = record.truck_id.as_deref() else {
            continue;
        };
        if !record.state.holds_truck() {
            continue;
        }

        let reason = match trucks.iter().find(|t| t.id == truck_id).map(|t| t.status) {
            None => Some(UnavailableReason::UnknownTruck),
            Some(TruckStatus::Maintenance) => Some(UnavailableReason::Maintenance),
            Some(TruckStatus::OutOfService) => Some(UnavailableReason::OutOfService),
            Some(_) => deliveries[..idx]
                .iter()
                .find(|other| {
                    other.scheduled_date == record.scheduled_date
                        && other.state.holds_truck()
                        && other.truck_id.as_deref() == Some(truck_id)
                })
                .map(|other| UnavailableReason::AssignedElsewhere {
                    delivery_id: other.id.clone(),
                }),
        };

        if let Some(reason) = reason {
            anomalies.push(AssignmentAnomaly {
                delivery_id: record.id.clone(),
                truck_id: truck_id.to_string(),
                reason,
            });
        }
    }

    anomalies
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::workflow::WorkflowState;

    fn truck(id: &str, status: TruckStatus) -> TruckRecord {
        TruckRecord {
            id: id.into(),
            driver_name: Some("Driss".into()),
            phone: None,
            capacity_m3: dec!(8),
            status,
        }
    }

    fn delivery(id: &str, state: WorkflowState, truck: Option<&str>) -> DeliveryRecord {
        let mut rec = DeliveryRecord::new(
            id,
            "C-1",
            "B25",
            dec!(6),
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
        );
        rec.state = state;
        rec.truck_id = truck.map(str::to_string);
        rec
    }

    fn fleet() -> Vec<TruckRecord> {
        vec![
            truck("T-1", TruckStatus::Available),
            truck("T-2", TruckStatus::OnMission),
            truck("T-3", TruckStatus::Maintenance),
            truck("T-4", TruckStatus::OutOfService),
        ]
    }

    // -----------------------------------------------------------------------
    // check_assignment
    // -----------------------------------------------------------------------

    #[test]
    fn available_truck_is_assignable() {
        let rec = delivery("BL-1", WorkflowState::Planned, None);
        assert!(check_assignment(&fleet(), "T-1", &rec, &[]).is_available());
    }

    #[test]
    fn registry_status_distinguishes_reasons() {
        let rec = delivery("BL-1", WorkflowState::Planned, None);
        assert_eq!(
            check_assignment(&fleet(), "T-2", &rec, &[]),
            TruckAvailability::Unavailable(UnavailableReason::OnMission)
        );
        assert_eq!(
            check_assignment(&fleet(), "T-3", &rec, &[]),
            TruckAvailability::Unavailable(UnavailableReason::Maintenance)
        );
        assert_eq!(
            check_assignment(&fleet(), "T-4", &rec, &[]),
            TruckAvailability::Unavailable(UnavailableReason::OutOfService)
        );
    }

    #[test]
    fn unknown_truck_is_unavailable() {
        let rec = delivery("BL-1", WorkflowState::Planned, None);
        assert_eq!(
            check_assignment(&fleet(), "T-99", &rec, &[]),
            TruckAvailability::Unavailable(UnavailableReason::UnknownTruck)
        );
    }

    #[test]
    fn reassigning_current_truck_is_idempotent() {
        let rec = delivery("BL-1", WorkflowState::Loading, Some("T-2"));
        assert!(check_assignment(&fleet(), "T-2", &rec, &[]).is_available());
    }

    #[test]
    fn same_day_holder_blocks_double_booking() {
        let rec = delivery("BL-1", WorkflowState::Planned, None);
        let other = delivery("BL-2", WorkflowState::Loading, Some("T-1"));
        assert_eq!(
            check_assignment(&fleet(), "T-1", &rec, &[rec.clone(), other]),
            TruckAvailability::Unavailable(UnavailableReason::AssignedElsewhere {
                delivery_id: "BL-2".into()
            })
        );
    }

    #[test]
    fn delivered_record_releases_truck() {
        let rec = delivery("BL-1", WorkflowState::Planned, None);
        let mut other = delivery("BL-2", WorkflowState::Delivered, Some("T-1"));
        other.departed_at = Some(chrono::Utc::now());
        assert!(check_assignment(&fleet(), "T-1", &rec, &[other]).is_available());
    }

    #[test]
    fn other_day_does_not_block() {
        let rec = delivery("BL-1", WorkflowState::Planned, None);
        let mut other = delivery("BL-2", WorkflowState::Planned, Some("T-1"));
        other.scheduled_date = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
        assert!(check_assignment(&fleet(), "T-1", &rec, &[other]).is_available());
    }

    // -----------------------------------------------------------------------
    // assignment_anomalies
    // -----------------------------------------------------------------------

    #[test]
    fn grounded_and_shared_trucks_are_reported() {
        let deliveries = vec![
            delivery("BL-1", WorkflowState::Planned, Some("T-1")),
            delivery("BL-2", WorkflowState::Planned, Some("T-1")),
            delivery("BL-3", WorkflowState::Planned, Some("T-3")),
            delivery("BL-4", WorkflowState::Planned, Some("T-2")),
            delivery("BL-5", WorkflowState::Planned, Some("T-77")),
        ];
        let anomalies = assignment_anomalies(&fleet(), &deliveries);
        let ids: Vec<_> = anomalies.iter().map(|a| a.delivery_id.as_str()).collect();
        assert_eq!(ids, vec!["BL-2", "BL-3", "BL-5"]);
        assert_eq!(
            anomalies[0].reason,
            UnavailableReason::AssignedElsewhere {
                delivery_id: "BL-1".into()
            }
        );
    }

    #[test]
    fn reason_display_is_human_readable() {
        assert_eq!(UnavailableReason::Maintenance.to_string(), "in maintenance");
        assert_eq!(
            UnavailableReason::AssignedElsewhere {
                delivery_id: "BL-9".into()
            }
            .to_string(),
            "already assigned to delivery BL-9"
        );
    }
}
