//! Delivery workflow state machine and its pure guards.
//!
//! ```text
//! PendingValidation ──Confirm──▶ Planned ──StartProduction──────────▶ Loading ─────────────┐
//!        │                          └──RequestTechnicalValidation──▶ TechnicalValidation ─┤
//!      Reject                                                                    Dispatch │
//!        ▼                                                                                ▼
//!     (deleted)          Invoiced ◀──Invoice── Delivered ◀──MarkDelivered── EnRoute (MarkArrived)
//! ```
//!
//! This module lives in `core` (zero internal deps) so the transition table
//! and guards can be tested without any store. The async engine in
//! `beton-dispatch` calls these functions before touching anything external.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::credit::{ClientCreditSnapshot, CreditStatus};
use crate::delivery::DeliveryRecord;
use crate::error::{DispatchError, Prerequisite};
use crate::policy::DispatchPolicy;
use crate::roles::Actor;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

pub const STATE_PENDING_VALIDATION: &str = "pending_validation";
pub const STATE_PLANNED: &str = "planned";
pub const STATE_LOADING: &str = "loading";
pub const STATE_TECHNICAL_VALIDATION: &str = "technical_validation";
pub const STATE_EN_ROUTE: &str = "en_route";
pub const STATE_DELIVERED: &str = "delivered";
pub const STATE_INVOICED: &str = "invoiced";

/// All valid workflow state strings, in pipeline order.
pub const VALID_STATES: &[&str] = &[
    STATE_PENDING_VALIDATION,
    STATE_PLANNED,
    STATE_LOADING,
    STATE_TECHNICAL_VALIDATION,
    STATE_EN_ROUTE,
    STATE_DELIVERED,
    STATE_INVOICED,
];

/// Position of a delivery in the production → delivery → billing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    PendingValidation,
    Planned,
    Loading,
    TechnicalValidation,
    EnRoute,
    Delivered,
    Invoiced,
}

impl WorkflowState {
    /// Convert from a persisted string value.
    pub fn from_str_value(s: &str) -> Result<Self, String> {
        match s {
            STATE_PENDING_VALIDATION => Ok(Self::PendingValidation),
            STATE_PLANNED => Ok(Self::Planned),
            STATE_LOADING => Ok(Self::Loading),
            STATE_TECHNICAL_VALIDATION => Ok(Self::TechnicalValidation),
            STATE_EN_ROUTE => Ok(Self::EnRoute),
            STATE_DELIVERED => Ok(Self::Delivered),
            STATE_INVOICED => Ok(Self::Invoiced),
            _ => Err(format!(
                "Invalid workflow state '{s}'. Must be one of: {}",
                VALID_STATES.join(", ")
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingValidation => STATE_PENDING_VALIDATION,
            Self::Planned => STATE_PLANNED,
            Self::Loading => STATE_LOADING,
            Self::TechnicalValidation => STATE_TECHNICAL_VALIDATION,
            Self::EnRoute => STATE_EN_ROUTE,
            Self::Delivered => STATE_DELIVERED,
            Self::Invoiced => STATE_INVOICED,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Invoiced)
    }

    /// Whether the record still occupies its truck for the day.
    pub fn holds_truck(&self) -> bool {
        !matches!(self, Self::Delivered | Self::Invoiced)
    }

    /// Truck assignment is open until the truck leaves the plant.
    pub fn allows_truck_assignment(&self) -> bool {
        matches!(
            self,
            Self::PendingValidation | Self::Planned | Self::Loading | Self::TechnicalValidation
        )
    }

    /// The schedule is frozen once production starts.
    pub fn allows_schedule_edit(&self) -> bool {
        matches!(self, Self::PendingValidation | Self::Planned)
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// A user- or system-initiated workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    Confirm,
    Reject,
    StartProduction,
    RequestTechnicalValidation,
    Dispatch,
    MarkArrived,
    MarkDelivered,
    /// Driven by the external invoicing collaborator, never by the engine.
    Invoice,
}

impl WorkflowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::Reject => "reject",
            Self::StartProduction => "start_production",
            Self::RequestTechnicalValidation => "request_technical_validation",
            Self::Dispatch => "dispatch",
            Self::MarkArrived => "mark_arrived",
            Self::MarkDelivered => "mark_delivered",
            Self::Invoice => "invoice",
        }
    }

    /// Actions that start production share the same guards.
    pub fn starts_production(&self) -> bool {
        matches!(self, Self::StartProduction | Self::RequestTechnicalValidation)
    }
}

impl std::fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

/// Where a legal action leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    To(WorkflowState),
    /// The record stays in its state (stamp-only actions).
    Stay,
    /// The record is removed.
    Delete,
}

/// The single transition table. `None` means the action is illegal.
pub fn transition(from: WorkflowState, action: WorkflowAction) -> Option<Transition> {
    use WorkflowAction as A;
    use WorkflowState as S;

    match (from, action) {
        (S::PendingValidation, A::Confirm) => Some(Transition::To(S::Planned)),
        (S::PendingValidation, A::Reject) => Some(Transition::Delete),
        (S::Planned, A::StartProduction) => Some(Transition::To(S::Loading)),
        (S::Planned, A::RequestTechnicalValidation) => {
            Some(Transition::To(S::TechnicalValidation))
        }
        (S::Loading | S::TechnicalValidation, A::Dispatch) => Some(Transition::To(S::EnRoute)),
        (S::EnRoute, A::MarkArrived) => Some(Transition::Stay),
        (S::EnRoute, A::MarkDelivered) => Some(Transition::To(S::Delivered)),
        (S::Delivered, A::Invoice) => Some(Transition::To(S::Invoiced)),
        _ => None,
    }
}

/// Returns every action legal from `from`.
pub fn valid_actions(from: WorkflowState) -> &'static [WorkflowAction] {
    use WorkflowAction as A;

    match from {
        WorkflowState::PendingValidation => &[A::Confirm, A::Reject],
        WorkflowState::Planned => &[A::StartProduction, A::RequestTechnicalValidation],
        WorkflowState::Loading | WorkflowState::TechnicalValidation => &[A::Dispatch],
        WorkflowState::EnRoute => &[A::MarkArrived, A::MarkDelivered],
        WorkflowState::Delivered => &[A::Invoice],
        WorkflowState::Invoiced => &[],
    }
}

/// Validate an action against the table, returning where it leads.
pub fn validate_transition(
    from: WorkflowState,
    action: WorkflowAction,
) -> Result<Transition, DispatchError> {
    transition(from, action).ok_or(DispatchError::InvalidTransition { from, action })
}

/// Recognize the externally driven invoice step when reconciling.
///
/// A delivered record whose invoice flag was set by the invoicing
/// collaborator is treated as invoiced.
pub fn reconcile_invoiced(record: &mut DeliveryRecord) -> bool {
    if record.state == WorkflowState::Delivered && record.invoice_generated {
        record.state = WorkflowState::Invoiced;
        true
    } else {
        false
    }
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// Read-only roles are refused before any other check.
pub fn require_mutation_rights(actor: &Actor) -> Result<(), DispatchError> {
    if actor.role.can_mutate() {
        Ok(())
    } else {
        Err(DispatchError::Forbidden(format!(
            "role '{}' is read-only on the dispatch board",
            actor.role.as_str()
        )))
    }
}

/// How a credit check was satisfied, or that it still needs approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditClearance {
    /// The client is in good standing.
    Green,
    /// The actor's role bypasses the block.
    RoleOverride,
    /// An out-of-band approval code is required.
    NeedsApproval(CreditStatus),
}

/// Evaluate the credit gate for an action.
///
/// A missing snapshot is only tolerated for actors who could override
/// the block anyway.
pub fn credit_clearance(
    actor: &Actor,
    client_id: &str,
    snapshot: Option<&ClientCreditSnapshot>,
) -> Result<CreditClearance, DispatchError> {
    match snapshot.map(ClientCreditSnapshot::status) {
        Some(CreditStatus::Green) => Ok(CreditClearance::Green),
        _ if actor.role.can_override_credit() => Ok(CreditClearance::RoleOverride),
        Some(status) => Ok(CreditClearance::NeedsApproval(status)),
        None => Err(DispatchError::DataUnavailable(format!(
            "no credit snapshot loaded for client {client_id}"
        ))),
    }
}

/// A scheduled time and an assigned truck are required to start production.
pub fn check_production_prerequisites(record: &DeliveryRecord) -> Result<(), DispatchError> {
    if record.scheduled_time.is_none() {
        return Err(DispatchError::MissingPrerequisite(Prerequisite::ScheduledTime));
    }
    if record.truck_id.is_none() {
        return Err(DispatchError::MissingPrerequisite(Prerequisite::AssignedTruck));
    }
    Ok(())
}

/// Which time-of-day path a production start took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductionWindow {
    Daytime,
    /// Started inside the night window with the accepted justification.
    Night { justification: String },
}

/// Enforce the night-window justification rule.
///
/// Length is measured in characters after trimming surrounding whitespace.
pub fn check_production_window(
    local_time: NaiveTime,
    justification: Option<&str>,
    policy: &DispatchPolicy,
) -> Result<ProductionWindow, DispatchError> {
    if !policy.in_night_window(local_time) {
        return Ok(ProductionWindow::Daytime);
    }

    let text = justification.map(str::trim).unwrap_or_default();
    let supplied = text.chars().count();
    if supplied < policy.min_justification_chars {
        return Err(DispatchError::JustificationRequired {
            min_chars: policy.min_justification_chars,
            supplied,
        });
    }

    Ok(ProductionWindow::Night {
        justification: text.to_string(),
    })
}

/// A truck can only leave once production has been stamped.
pub fn check_dispatch_prerequisites(record: &DeliveryRecord) -> Result<(), DispatchError> {
    if record.truck_id.is_none() {
        return Err(DispatchError::MissingPrerequisite(Prerequisite::AssignedTruck));
    }
    if record.departed_at.is_none() {
        return Err(DispatchError::MissingPrerequisite(Prerequisite::DepartureStamp));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use fixtures::*;

    use super::*;
    use crate::roles::Role;

    mod fixtures {
        use chrono::{NaiveDate, NaiveTime};
        use rust_decimal_macros::dec;

        use crate::credit::ClientCreditSnapshot;
        use crate::delivery::DeliveryRecord;
        use crate::workflow::WorkflowState;

        pub fn hm(h: u32, m: u32) -> NaiveTime {
            NaiveTime::from_hms_opt(h, m, 0).unwrap()
        }

        pub fn planned() -> DeliveryRecord {
            let mut record = DeliveryRecord::new(
                "BL-1",
                "C-1",
                "B25",
                dec!(8),
                NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            );
            record.state = WorkflowState::Planned;
            record
        }

        pub fn snapshot(balance: i64, limit: i64) -> ClientCreditSnapshot {
            ClientCreditSnapshot {
                client_id: "C-1".into(),
                client_name: "Chantier Nord".into(),
                balance: balance.into(),
                credit_limit: limit.into(),
                hard_blocked: false,
                has_overdue_invoice: false,
            }
        }
    }

    fn actor(role: Role) -> Actor {
        Actor::new("u-1", "Test", role)
    }

    // -----------------------------------------------------------------------
    // Transition table
    // -----------------------------------------------------------------------

    #[test]
    fn confirm_moves_pending_to_planned() {
        assert_eq!(
            transition(WorkflowState::PendingValidation, WorkflowAction::Confirm),
            Some(Transition::To(WorkflowState::Planned))
        );
    }

    #[test]
    fn reject_deletes_pending_record() {
        assert_eq!(
            transition(WorkflowState::PendingValidation, WorkflowAction::Reject),
            Some(Transition::Delete)
        );
    }

    #[test]
    fn both_production_paths_lead_to_en_route() {
        for mid in [WorkflowState::Loading, WorkflowState::TechnicalValidation] {
            assert_eq!(
                transition(mid, WorkflowAction::Dispatch),
                Some(Transition::To(WorkflowState::EnRoute))
            );
        }
    }

    #[test]
    fn arrival_keeps_en_route() {
        assert_eq!(
            transition(WorkflowState::EnRoute, WorkflowAction::MarkArrived),
            Some(Transition::Stay)
        );
    }

    #[test]
    fn invoiced_has_no_transitions() {
        assert!(valid_actions(WorkflowState::Invoiced).is_empty());
    }

    #[test]
    fn no_jumps_across_the_pipeline() {
        assert!(transition(WorkflowState::PendingValidation, WorkflowAction::StartProduction)
            .is_none());
        assert!(transition(WorkflowState::Planned, WorkflowAction::MarkDelivered).is_none());
        assert!(transition(WorkflowState::Loading, WorkflowAction::Confirm).is_none());
        assert!(transition(WorkflowState::Planned, WorkflowAction::Reject).is_none());
    }

    #[test]
    fn valid_actions_agree_with_table() {
        let states = VALID_STATES
            .iter()
            .map(|s| WorkflowState::from_str_value(s).unwrap());
        let actions = [
            WorkflowAction::Confirm,
            WorkflowAction::Reject,
            WorkflowAction::StartProduction,
            WorkflowAction::RequestTechnicalValidation,
            WorkflowAction::Dispatch,
            WorkflowAction::MarkArrived,
            WorkflowAction::MarkDelivered,
            WorkflowAction::Invoice,
        ];
        for state in states {
            for action in actions {
                assert_eq!(
                    valid_actions(state).contains(&action),
                    transition(state, action).is_some(),
                    "{state} / {action}"
                );
            }
        }
    }

    #[test]
    fn validate_transition_names_both_sides() {
        let err = validate_transition(WorkflowState::Invoiced, WorkflowAction::Dispatch)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("invoiced"));
        assert!(msg.contains("dispatch"));
    }

    #[test]
    fn invalid_state_string_is_rejected() {
        assert!(WorkflowState::from_str_value("shipped").is_err());
    }

    // -----------------------------------------------------------------------
    // Invoice reconciliation
    // -----------------------------------------------------------------------

    #[test]
    fn delivered_with_invoice_flag_becomes_invoiced() {
        let mut record = planned();
        record.state = WorkflowState::Delivered;
        record.invoice_generated = true;
        assert!(reconcile_invoiced(&mut record));
        assert_eq!(record.state, WorkflowState::Invoiced);
    }

    #[test]
    fn invoice_flag_before_delivery_is_ignored() {
        let mut record = planned();
        record.invoice_generated = true;
        assert!(!reconcile_invoiced(&mut record));
        assert_eq!(record.state, WorkflowState::Planned);
    }

    // -----------------------------------------------------------------------
    // Guards
    // -----------------------------------------------------------------------

    #[test]
    fn viewer_is_forbidden() {
        let err = require_mutation_rights(&actor(Role::Viewer)).unwrap_err();
        assert_eq!(err.kind(), "FORBIDDEN");
    }

    #[test]
    fn green_client_clears_for_dispatcher() {
        let snap = snapshot(10_000, 50_000);
        assert_eq!(
            credit_clearance(&actor(Role::Dispatcher), "C-1", Some(&snap)).unwrap(),
            CreditClearance::Green
        );
    }

    #[test]
    fn red_client_needs_approval_for_dispatcher() {
        let snap = snapshot(60_000, 50_000);
        assert_eq!(
            credit_clearance(&actor(Role::Dispatcher), "C-1", Some(&snap)).unwrap(),
            CreditClearance::NeedsApproval(CreditStatus::Red)
        );
    }

    #[test]
    fn ceo_overrides_red_client() {
        let snap = snapshot(60_000, 50_000);
        assert_eq!(
            credit_clearance(&actor(Role::Ceo), "C-1", Some(&snap)).unwrap(),
            CreditClearance::RoleOverride
        );
    }

    #[test]
    fn missing_snapshot_is_unavailable_without_override() {
        let err = credit_clearance(&actor(Role::Dispatcher), "C-9", None).unwrap_err();
        assert_eq!(err.kind(), "DATA_UNAVAILABLE");
        assert_eq!(
            credit_clearance(&actor(Role::Admin), "C-9", None).unwrap(),
            CreditClearance::RoleOverride
        );
    }

    #[test]
    fn production_requires_time_then_truck() {
        let mut record = planned();
        assert_eq!(
            check_production_prerequisites(&record),
            Err(DispatchError::MissingPrerequisite(Prerequisite::ScheduledTime))
        );
        record.scheduled_time = Some(hm(9, 0));
        assert_eq!(
            check_production_prerequisites(&record),
            Err(DispatchError::MissingPrerequisite(Prerequisite::AssignedTruck))
        );
        record.truck_id = Some("T-1".into());
        assert!(check_production_prerequisites(&record).is_ok());
    }

    #[test]
    fn daytime_needs_no_justification() {
        let policy = DispatchPolicy::default();
        assert_eq!(
            check_production_window(hm(10, 0), None, &policy).unwrap(),
            ProductionWindow::Daytime
        );
    }

    #[test]
    fn night_justification_boundary_is_twenty_chars() {
        let policy = DispatchPolicy::default();
        let nineteen = "a".repeat(19);
        let twenty = "a".repeat(20);

        assert_eq!(
            check_production_window(hm(19, 0), Some(nineteen.as_str()), &policy),
            Err(DispatchError::JustificationRequired {
                min_chars: 20,
                supplied: 19
            })
        );
        assert_eq!(
            check_production_window(hm(19, 0), Some(twenty.as_str()), &policy).unwrap(),
            ProductionWindow::Night {
                justification: twenty.clone()
            }
        );
    }

    #[test]
    fn padding_does_not_count_toward_justification() {
        let policy = DispatchPolicy::default();
        let padded = format!("   {}   ", "b".repeat(18));
        assert!(check_production_window(hm(21, 0), Some(padded.as_str()), &policy).is_err());
    }

    #[test]
    fn dispatch_requires_departure_stamp() {
        let mut record = planned();
        record.truck_id = Some("T-1".into());
        assert_eq!(
            check_dispatch_prerequisites(&record),
            Err(DispatchError::MissingPrerequisite(Prerequisite::DepartureStamp))
        );
        record.departed_at = Some(chrono::Utc::now());
        assert!(check_dispatch_prerequisites(&record).is_ok());
    }
}
