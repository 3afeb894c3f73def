//! Out-of-band credit approval requests and the codes that redeem them.
//!
//! When a credit block stops a transition, the engine opens an
//! [`ApprovalRequest`] with the approval service and hands it back to the
//! caller. Management answers out-of-band with a one-time code; retrying
//! with an [`ApprovalToken`] redeems it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credit::ClientCreditSnapshot;
use crate::roles::Actor;
use crate::types::{ClientId, DeliveryId, Timestamp};
use crate::workflow::WorkflowAction;

/// Shortest code the approval service issues.
pub const MIN_CODE_LENGTH: usize = 4;

/// Longest code the approval service issues.
pub const MAX_CODE_LENGTH: usize = 32;

/// A pending request for management to approve a credit-blocked action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub delivery_id: DeliveryId,
    pub client_id: ClientId,
    pub action: WorkflowAction,
    pub balance: Decimal,
    pub credit_limit: Decimal,
    pub requested_by: String,
    pub requested_at: Timestamp,
}

impl ApprovalRequest {
    pub fn new(
        delivery_id: &str,
        action: WorkflowAction,
        snapshot: &ClientCreditSnapshot,
        actor: &Actor,
        requested_at: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            delivery_id: delivery_id.to_string(),
            client_id: snapshot.client_id.clone(),
            action,
            balance: snapshot.balance,
            credit_limit: snapshot.credit_limit,
            requested_by: actor.id.clone(),
            requested_at,
        }
    }

    /// Whether `other` asks for the same thing: same delivery, action and
    /// client. A code only unlocks the request it was issued for.
    pub fn same_scope(&self, other: &ApprovalRequest) -> bool {
        self.delivery_id == other.delivery_id
            && self.action == other.action
            && self.client_id == other.client_id
    }
}

/// A code supplied by the caller against a pending request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalToken {
    pub request_id: Uuid,
    pub code: String,
}

impl ApprovalToken {
    pub fn new(request_id: Uuid, code: impl Into<String>) -> Self {
        Self {
            request_id,
            code: code.into(),
        }
    }
}

/// Validate the shape of a code before it is sent to the approval service.
pub fn validate_code_format(code: &str) -> Result<(), String> {
    let code = code.trim();
    let len = code.chars().count();
    if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&len) {
        return Err(format!(
            "Approval code must be {MIN_CODE_LENGTH}-{MAX_CODE_LENGTH} characters, got {len}"
        ));
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err("Approval code may only contain letters, digits and '-'".to_string());
    }
    Ok(())
}
