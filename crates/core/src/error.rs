use rust_decimal::Decimal;

use crate::approval::ApprovalRequest;
use crate::credit::CreditStatus;
use crate::truck::UnavailableReason;
use crate::types::{ClientId, DeliveryId, PurchaseOrderId, TruckId};
use crate::workflow::{WorkflowAction, WorkflowState};

/// Failure reported by one of the external stores.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Store rejected the write: {0}")]
    Rejected(String),
}

/// A precondition that must hold before production can start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prerequisite {
    ScheduledTime,
    AssignedTruck,
    DepartureStamp,
}

impl std::fmt::Display for Prerequisite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ScheduledTime => "a scheduled time must be set",
            Self::AssignedTruck => "a truck must be assigned",
            Self::DepartureStamp => "production has not started",
        })
    }
}

/// Context attached to a credit block so the caller can render an
/// approval-request action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditBlock {
    pub client_id: ClientId,
    pub client_name: String,
    pub balance: Decimal,
    pub credit_limit: Decimal,
    pub status: CreditStatus,
    /// The pending out-of-band approval request to redeem on retry.
    pub approval: ApprovalRequest,
    /// Set when the caller supplied a code and it was refused.
    pub code_rejected: bool,
}

/// Every expected, recoverable outcome of a dispatch operation.
///
/// Blocked transitions never mutate the record; the variant tells the
/// presentation layer which remediation path to offer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error(
        "Credit blocked for client {}: balance {} against limit {}",
        .0.client_name, .0.balance, .0.credit_limit
    )]
    CreditBlocked(Box<CreditBlock>),

    #[error("Justification required: at least {min_chars} characters, got {supplied}")]
    JustificationRequired { min_chars: usize, supplied: usize },

    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(Prerequisite),

    #[error("Truck {truck_id} unavailable: {reason}")]
    TruckUnavailable {
        truck_id: TruckId,
        reason: UnavailableReason,
    },

    #[error("Invalid time '{0}': expected HH:MM")]
    InvalidTime(String),

    #[error(
        "Delivery {delivery_id} was deleted but purchase order {purchase_order_id} \
         could not be reversed: {reason}"
    )]
    CompensationFailed {
        delivery_id: DeliveryId,
        purchase_order_id: PurchaseOrderId,
        reason: String,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid transition: {action} is not allowed from {from}")]
    InvalidTransition {
        from: WorkflowState,
        action: WorkflowAction,
    },

    #[error("Delivery {id} is {state}: {operation} is no longer allowed")]
    Locked {
        id: DeliveryId,
        state: WorkflowState,
        operation: &'static str,
    },

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid record {id}: {reason}")]
    InvalidRecord { id: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Map a failed read to the board-level outcome.
    ///
    /// Missing entities stay `NotFound`; everything else is reported as
    /// `DataUnavailable` so the board keeps its last good snapshot.
    pub fn from_fetch(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::DataUnavailable(other.to_string()),
        }
    }

    /// Stable machine-readable code for per-kind UI treatment.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataUnavailable(_) => "DATA_UNAVAILABLE",
            Self::CreditBlocked(_) => "CREDIT_BLOCKED",
            Self::JustificationRequired { .. } => "JUSTIFICATION_REQUIRED",
            Self::MissingPrerequisite(_) => "MISSING_PREREQUISITE",
            Self::TruckUnavailable { .. } => "TRUCK_UNAVAILABLE",
            Self::InvalidTime(_) => "INVALID_TIME",
            Self::CompensationFailed { .. } => "COMPENSATION_FAILED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Locked { .. } => "LOCKED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidRecord { .. } => "INVALID_RECORD",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    /// Whether the operation was refused by a policy guard (as opposed
    /// to failing on I/O or bad data).
    pub fn is_blocked_transition(&self) -> bool {
        matches!(
            self,
            Self::CreditBlocked(_)
                | Self::JustificationRequired { .. }
                | Self::MissingPrerequisite(_)
                | Self::TruckUnavailable { .. }
                | Self::InvalidTime(_)
                | Self::Forbidden(_)
                | Self::InvalidTransition { .. }
                | Self::Locked { .. }
        )
    }
}
