//! Executes workflow actions against the external stores.
//!
//! Every action runs its guards in a fixed order before anything is
//! written:
//!
//! 1. role (read-only roles are refused outright)
//! 2. transition table
//! 3. local prerequisites (scheduled time, truck, departure stamp)
//! 4. night-window justification
//! 5. credit gate
//!
//! The credit gate runs last so a one-time approval code is never consumed
//! by an action that would have been refused anyway. A code only unlocks the
//! delivery, action and client it was issued for, and is released again if
//! the delivery write that follows it fails. A refused action
//! leaves the record untouched. Audit and alert writes are best-effort:
//! their failure is logged and never rolls back a completed transition.

use std::sync::Arc;

use beton_core::alert::midnight_protocol_alert;
use beton_core::approval::{validate_code_format, ApprovalRequest, ApprovalToken};
use beton_core::audit::{action_types, AuditEntry};
use beton_core::clock::Clock;
use beton_core::credit::ClientCreditSnapshot;
use beton_core::delivery::{format_time_of_day, parse_time_of_day, DeliveryPatch, DeliveryRecord};
use beton_core::error::{CreditBlock, DispatchError, StoreError};
use beton_core::policy::DispatchPolicy;
use beton_core::purchase_order::{reversal_patch, PurchaseOrder};
use beton_core::roles::Actor;
use beton_core::truck::{check_assignment, TruckAvailability, TruckRecord};
use beton_core::workflow::{
    check_dispatch_prerequisites, check_production_prerequisites, check_production_window,
    credit_clearance, require_mutation_rights, validate_transition, CreditClearance,
    ProductionWindow, Transition, WorkflowAction, WorkflowState,
};

use crate::store::Stores;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Optional inputs to a production start.
#[derive(Debug, Clone, Default)]
pub struct ProductionStart {
    /// Required inside the night window.
    pub justification: Option<String>,
    /// A management code for a credit-blocked client.
    pub approval: Option<ApprovalToken>,
}

impl ProductionStart {
    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = Some(justification.into());
        self
    }

    pub fn with_approval(mut self, token: ApprovalToken) -> Self {
        self.approval = Some(token);
        self
    }
}

/// How the credit gate let an action through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CreditPath {
    Green,
    RoleOverride,
    Approved,
}

impl CreditPath {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::RoleOverride => "role_override",
            Self::Approved => "approval_code",
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

pub struct WorkflowEngine {
    stores: Stores,
    clock: Arc<dyn Clock>,
    policy: DispatchPolicy,
}

impl WorkflowEngine {
    pub fn new(stores: Stores, clock: Arc<dyn Clock>, policy: DispatchPolicy) -> Self {
        Self {
            stores,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Confirm a pending delivery into the plan, subject to the credit gate.
    pub async fn confirm(
        &self,
        actor: &Actor,
        record: &DeliveryRecord,
        credit: Option<&ClientCreditSnapshot>,
        approval: Option<&ApprovalToken>,
    ) -> Result<DeliveryRecord, DispatchError> {
        let action = WorkflowAction::Confirm;
        let result: Result<DeliveryRecord, DispatchError> = async {
            require_mutation_rights(actor)?;
            let next = target_state(record.state, action)?;
            let credit_path = self
                .clear_credit(actor, record, action, credit, approval)
                .await?;

            let patch = DeliveryPatch {
                state: Some(next),
                ..Default::default()
            };
            let updated = match self.stores.deliveries.update(&record.id, &patch).await {
                Ok(updated) => updated,
                Err(e) => {
                    self.release_approval(record, credit_path, approval).await;
                    return Err(e.into());
                }
            };

            self.audit(
                AuditEntry::new(action_types::DELIVERY_CONFIRM, &record.id, actor, self.clock.now())
                    .with_details(serde_json::json!({ "credit": credit_path.as_str() })),
            )
            .await;
            self.audit_credit_override(actor, record, action, credit_path, approval)
                .await;
            Ok(updated)
        }
        .await;
        self.log_outcome(action, actor, record, &result);
        result
    }

    /// Reject a pending delivery: delete it and reverse its purchase order.
    ///
    /// The deletion is not undone if the reversal fails; the caller gets
    /// `CompensationFailed` so the inconsistency can be repaired by hand.
    pub async fn reject(&self, actor: &Actor, record: &DeliveryRecord) -> Result<(), DispatchError> {
        let action = WorkflowAction::Reject;
        let result: Result<(), DispatchError> = async {
            require_mutation_rights(actor)?;
            validate_transition(record.state, action)?;

            self.stores.deliveries.delete(&record.id).await?;
            self.audit(
                AuditEntry::new(action_types::DELIVERY_REJECT, &record.id, actor, self.clock.now())
                    .with_details(serde_json::json!({
                        "volume_m3": record.volume_m3,
                        "purchase_order_id": record.purchase_order_id,
                    })),
            )
            .await;

            let Some(po_id) = &record.purchase_order_id else {
                return Ok(());
            };
            match self.reverse_purchase_order(po_id, record).await {
                Ok(order) => {
                    tracing::info!(
                        delivery_id = %record.id,
                        purchase_order_id = %po_id,
                        delivered_volume_m3 = %order.delivered_volume_m3,
                        delivery_count = order.delivery_count,
                        "Purchase order reversed",
                    );
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(
                        delivery_id = %record.id,
                        purchase_order_id = %po_id,
                        error = %e,
                        "Delivery deleted but purchase order reversal failed",
                    );
                    Err(DispatchError::CompensationFailed {
                        delivery_id: record.id.clone(),
                        purchase_order_id: po_id.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }
        .await;
        self.log_outcome(action, actor, record, &result);
        result
    }

    /// Start production at the plant (Planned -> Loading).
    pub async fn start_production(
        &self,
        actor: &Actor,
        record: &DeliveryRecord,
        credit: Option<&ClientCreditSnapshot>,
        request: &ProductionStart,
    ) -> Result<DeliveryRecord, DispatchError> {
        self.begin_production(actor, record, credit, request, WorkflowAction::StartProduction)
            .await
    }

    /// Hold the load for a technical check (Planned -> TechnicalValidation).
    ///
    /// Guarded exactly like a production start.
    pub async fn request_technical_validation(
        &self,
        actor: &Actor,
        record: &DeliveryRecord,
        credit: Option<&ClientCreditSnapshot>,
        request: &ProductionStart,
    ) -> Result<DeliveryRecord, DispatchError> {
        self.begin_production(
            actor,
            record,
            credit,
            request,
            WorkflowAction::RequestTechnicalValidation,
        )
        .await
    }

    async fn begin_production(
        &self,
        actor: &Actor,
        record: &DeliveryRecord,
        credit: Option<&ClientCreditSnapshot>,
        request: &ProductionStart,
        action: WorkflowAction,
    ) -> Result<DeliveryRecord, DispatchError> {
        let result: Result<DeliveryRecord, DispatchError> = async {
            require_mutation_rights(actor)?;
            let next = target_state(record.state, action)?;
            check_production_prerequisites(record)?;

            let now = self.clock.now();
            let window = check_production_window(
                self.policy.local(now).time(),
                request.justification.as_deref(),
                &self.policy,
            )?;
            let approval = request.approval.as_ref();
            let credit_path = self
                .clear_credit(actor, record, action, credit, approval)
                .await?;

            let patch = DeliveryPatch {
                state: Some(next),
                departed_at: Some(now),
                ..Default::default()
            };
            let updated = match self.stores.deliveries.update(&record.id, &patch).await {
                Ok(updated) => updated,
                Err(e) => {
                    self.release_approval(record, credit_path, approval).await;
                    return Err(e.into());
                }
            };

            let audit_action = if action == WorkflowAction::StartProduction {
                action_types::PRODUCTION_START
            } else {
                action_types::TECHNICAL_VALIDATION_REQUEST
            };
            let justification = match &window {
                ProductionWindow::Daytime => None,
                ProductionWindow::Night { justification } => Some(justification.as_str()),
            };
            self.audit(
                AuditEntry::new(audit_action, &record.id, actor, now).with_details(
                    serde_json::json!({
                        "night_window": justification.is_some(),
                        "justification": justification,
                        "credit": credit_path.as_str(),
                    }),
                ),
            )
            .await;
            self.audit_credit_override(actor, record, action, credit_path, approval)
                .await;

            if let Some(justification) = justification {
                let alert = midnight_protocol_alert(&record.id, actor, justification, now);
                if let Err(e) = self.stores.alerts.raise(&alert).await {
                    tracing::warn!(
                        delivery_id = %record.id,
                        error = %e,
                        "Failed to raise night production alert",
                    );
                }
            }
            Ok(updated)
        }
        .await;
        self.log_outcome(action, actor, record, &result);
        result
    }

    /// The truck leaves the plant (Loading/TechnicalValidation -> EnRoute).
    pub async fn dispatch(
        &self,
        actor: &Actor,
        record: &DeliveryRecord,
    ) -> Result<DeliveryRecord, DispatchError> {
        let action = WorkflowAction::Dispatch;
        let result: Result<DeliveryRecord, DispatchError> = async {
            require_mutation_rights(actor)?;
            let next = target_state(record.state, action)?;
            check_dispatch_prerequisites(record)?;

            let patch = DeliveryPatch {
                state: Some(next),
                ..Default::default()
            };
            let updated = self.stores.deliveries.update(&record.id, &patch).await?;
            self.audit(
                AuditEntry::new(action_types::TRUCK_DISPATCH, &record.id, actor, self.clock.now())
                    .with_details(serde_json::json!({ "truck_id": record.truck_id })),
            )
            .await;
            Ok(updated)
        }
        .await;
        self.log_outcome(action, actor, record, &result);
        result
    }

    /// Stamp arrival on site. A second call leaves the first stamp alone.
    pub async fn mark_arrived(
        &self,
        actor: &Actor,
        record: &DeliveryRecord,
    ) -> Result<DeliveryRecord, DispatchError> {
        let action = WorkflowAction::MarkArrived;
        let result: Result<DeliveryRecord, DispatchError> = async {
            require_mutation_rights(actor)?;
            validate_transition(record.state, action)?;
            if record.arrived_at.is_some() {
                tracing::debug!(delivery_id = %record.id, "Arrival already stamped");
                return Ok(record.clone());
            }

            let now = self.clock.now();
            let patch = DeliveryPatch {
                arrived_at: Some(now),
                ..Default::default()
            };
            let updated = self.stores.deliveries.update(&record.id, &patch).await?;
            self.audit(AuditEntry::new(action_types::DELIVERY_ARRIVAL, &record.id, actor, now))
                .await;
            Ok(updated)
        }
        .await;
        self.log_outcome(action, actor, record, &result);
        result
    }

    /// Close the delivery once the truck is back (EnRoute -> Delivered).
    pub async fn mark_delivered(
        &self,
        actor: &Actor,
        record: &DeliveryRecord,
    ) -> Result<DeliveryRecord, DispatchError> {
        let action = WorkflowAction::MarkDelivered;
        let result: Result<DeliveryRecord, DispatchError> = async {
            require_mutation_rights(actor)?;
            let next = target_state(record.state, action)?;

            let now = self.clock.now();
            let patch = DeliveryPatch {
                state: Some(next),
                returned_at: Some(now),
                ..Default::default()
            };
            let updated = self.stores.deliveries.update(&record.id, &patch).await?;
            self.audit(AuditEntry::new(action_types::DELIVERY_COMPLETE, &record.id, actor, now))
                .await;
            Ok(updated)
        }
        .await;
        self.log_outcome(action, actor, record, &result);
        result
    }

    /// Assign a truck to a delivery that has not yet left the plant.
    ///
    /// `same_day` is the full list of deliveries scheduled on the record's
    /// date, used to detect double-booking.
    pub async fn assign_truck(
        &self,
        actor: &Actor,
        record: &DeliveryRecord,
        truck_id: &str,
        trucks: &[TruckRecord],
        same_day: &[DeliveryRecord],
    ) -> Result<DeliveryRecord, DispatchError> {
        let result: Result<DeliveryRecord, DispatchError> = async {
            require_mutation_rights(actor)?;
            if !record.state.allows_truck_assignment() {
                return Err(locked(record, "truck assignment"));
            }
            if let TruckAvailability::Unavailable(reason) =
                check_assignment(trucks, truck_id, record, same_day)
            {
                return Err(DispatchError::TruckUnavailable {
                    truck_id: truck_id.to_string(),
                    reason,
                });
            }
            if record.truck_id.as_deref() == Some(truck_id) {
                return Ok(record.clone());
            }

            let patch = DeliveryPatch {
                truck_id: Some(truck_id.to_string()),
                ..Default::default()
            };
            let updated = self.stores.deliveries.update(&record.id, &patch).await?;
            self.audit(
                AuditEntry::new(action_types::TRUCK_ASSIGN, &record.id, actor, self.clock.now())
                    .with_details(serde_json::json!({
                        "truck_id": truck_id,
                        "previous_truck_id": record.truck_id,
                    })),
            )
            .await;
            Ok(updated)
        }
        .await;
        log_edit_outcome("assign_truck", actor, record, &result);
        result
    }

    /// Set the scheduled time from user input (`HH:MM`).
    ///
    /// Malformed input is refused locally without touching the store.
    pub async fn set_scheduled_time(
        &self,
        actor: &Actor,
        record: &DeliveryRecord,
        raw: &str,
    ) -> Result<DeliveryRecord, DispatchError> {
        let result: Result<DeliveryRecord, DispatchError> = async {
            require_mutation_rights(actor)?;
            if !record.state.allows_schedule_edit() {
                return Err(locked(record, "rescheduling"));
            }
            let time = parse_time_of_day(raw)?;

            let patch = DeliveryPatch {
                scheduled_time: Some(time),
                ..Default::default()
            };
            let updated = self.stores.deliveries.update(&record.id, &patch).await?;
            self.audit(
                AuditEntry::new(action_types::SCHEDULE_SET, &record.id, actor, self.clock.now())
                    .with_details(serde_json::json!({
                        "from": record.scheduled_time.map(format_time_of_day),
                        "to": format_time_of_day(time),
                    })),
            )
            .await;
            Ok(updated)
        }
        .await;
        log_edit_outcome("set_scheduled_time", actor, record, &result);
        result
    }

    // -- Credit gate --------------------------------------------------------

    async fn clear_credit(
        &self,
        actor: &Actor,
        record: &DeliveryRecord,
        action: WorkflowAction,
        credit: Option<&ClientCreditSnapshot>,
        approval: Option<&ApprovalToken>,
    ) -> Result<CreditPath, DispatchError> {
        let status = match credit_clearance(actor, &record.client_id, credit)? {
            CreditClearance::Green => return Ok(CreditPath::Green),
            CreditClearance::RoleOverride => return Ok(CreditPath::RoleOverride),
            CreditClearance::NeedsApproval(status) => status,
        };
        // NeedsApproval is only returned with a snapshot in hand.
        let snapshot = credit.ok_or_else(|| {
            DispatchError::DataUnavailable(format!(
                "no credit snapshot loaded for client {}",
                record.client_id
            ))
        })?;

        let mut request = ApprovalRequest::new(&record.id, action, snapshot, actor, self.clock.now());
        let code_rejected = match approval {
            Some(token) => {
                request.id = token.request_id;
                let redeemed = match validate_code_format(&token.code) {
                    Ok(()) => self
                        .stores
                        .approvals
                        .redeem(token, &request)
                        .await
                        .map_err(DispatchError::from_fetch)?,
                    Err(reason) => {
                        tracing::debug!(delivery_id = %record.id, %reason, "Malformed approval code");
                        false
                    }
                };
                if redeemed {
                    return Ok(CreditPath::Approved);
                }
                true
            }
            None => {
                self.stores
                    .approvals
                    .open_request(&request)
                    .await
                    .map_err(DispatchError::from_fetch)?;
                false
            }
        };

        Err(DispatchError::CreditBlocked(Box::new(CreditBlock {
            client_id: snapshot.client_id.clone(),
            client_name: snapshot.client_name.clone(),
            balance: snapshot.balance,
            credit_limit: snapshot.credit_limit,
            status,
            approval: request,
            code_rejected,
        })))
    }

    async fn audit_credit_override(
        &self,
        actor: &Actor,
        record: &DeliveryRecord,
        action: WorkflowAction,
        path: CreditPath,
        approval: Option<&ApprovalToken>,
    ) {
        if path == CreditPath::Green {
            return;
        }
        self.audit(
            AuditEntry::new(action_types::CREDIT_OVERRIDE, &record.id, actor, self.clock.now())
                .with_details(serde_json::json!({
                    "action": action.as_str(),
                    "client_id": record.client_id,
                    "via": path.as_str(),
                    "approval_request_id": approval.map(|t| t.request_id),
                    "approval_code": approval.map(|t| t.code.as_str()),
                })),
        )
        .await;
    }

    /// Hand a redeemed code back after the guarded write failed.
    async fn release_approval(
        &self,
        record: &DeliveryRecord,
        path: CreditPath,
        approval: Option<&ApprovalToken>,
    ) {
        let (CreditPath::Approved, Some(token)) = (path, approval) else {
            return;
        };
        if let Err(e) = self.stores.approvals.release(token).await {
            tracing::warn!(
                delivery_id = %record.id,
                request_id = %token.request_id,
                error = %e,
                "Failed to release approval code after a failed write",
            );
        }
    }

    // -- Compensation -------------------------------------------------------

    async fn reverse_purchase_order(
        &self,
        po_id: &str,
        record: &DeliveryRecord,
    ) -> Result<PurchaseOrder, StoreError> {
        let order = self.stores.purchase_orders.get(po_id).await?;
        let patch = reversal_patch(&order, record.volume_m3);
        self.stores.purchase_orders.update(po_id, &patch).await
    }

    // -- Side channels ------------------------------------------------------

    async fn audit(&self, entry: AuditEntry) {
        if let Err(e) = self.stores.audit.record(&entry).await {
            tracing::warn!(
                action = %entry.action,
                delivery_id = %entry.delivery_id,
                error = %e,
                "Failed to write audit entry",
            );
        }
    }

    fn log_outcome<T>(
        &self,
        action: WorkflowAction,
        actor: &Actor,
        record: &DeliveryRecord,
        result: &Result<T, DispatchError>,
    ) {
        match result {
            Ok(_) => tracing::info!(
                delivery_id = %record.id,
                action = %action,
                from = %record.state,
                actor_id = %actor.id,
                "Workflow action applied",
            ),
            Err(e) if e.is_blocked_transition() => tracing::warn!(
                delivery_id = %record.id,
                action = %action,
                from = %record.state,
                actor_id = %actor.id,
                kind = e.kind(),
                error = %e,
                "Workflow action refused",
            ),
            Err(e) => tracing::error!(
                delivery_id = %record.id,
                action = %action,
                actor_id = %actor.id,
                kind = e.kind(),
                error = %e,
                "Workflow action failed",
            ),
        }
    }
}

fn target_state(from: WorkflowState, action: WorkflowAction) -> Result<WorkflowState, DispatchError> {
    match validate_transition(from, action)? {
        Transition::To(next) => Ok(next),
        Transition::Stay => Ok(from),
        Transition::Delete => Err(DispatchError::InvalidTransition { from, action }),
    }
}

fn locked(record: &DeliveryRecord, operation: &'static str) -> DispatchError {
    DispatchError::Locked {
        id: record.id.clone(),
        state: record.state,
        operation,
    }
}

fn log_edit_outcome<T>(
    operation: &'static str,
    actor: &Actor,
    record: &DeliveryRecord,
    result: &Result<T, DispatchError>,
) {
    match result {
        Ok(_) => tracing::info!(
            delivery_id = %record.id,
            operation,
            actor_id = %actor.id,
            "Planning edit applied",
        ),
        Err(e) => tracing::warn!(
            delivery_id = %record.id,
            operation,
            actor_id = %actor.id,
            kind = e.kind(),
            error = %e,
            "Planning edit refused",
        ),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn stamp_only_action_stays_in_place() {
        assert_eq!(
            target_state(WorkflowState::EnRoute, WorkflowAction::MarkArrived).unwrap(),
            WorkflowState::EnRoute
        );
    }

    #[test]
    fn deleting_action_has_no_target_state() {
        assert_matches!(
            target_state(WorkflowState::PendingValidation, WorkflowAction::Reject),
            Err(DispatchError::InvalidTransition { .. })
        );
    }

    #[test]
    fn production_start_builder_sets_both_inputs() {
        let token = ApprovalToken::new(uuid::Uuid::now_v7(), "A7K2");
        let request = ProductionStart::default()
            .with_justification("Coulage de nuit urgent")
            .with_approval(token.clone());
        assert_eq!(request.justification.as_deref(), Some("Coulage de nuit urgent"));
        assert_eq!(request.approval, Some(token));
    }
}
