//! Audit entry vocabulary, categories and redaction.
//!
//! This module lives in `core` (zero internal deps) so the engine and any
//! audit sink implementation agree on action names and on which detail
//! fields must never be stored in clear text.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::roles::Actor;
use crate::types::{DeliveryId, Timestamp};

// ---------------------------------------------------------------------------
// Action type constants
// ---------------------------------------------------------------------------

/// Known action types for audit entries.
pub mod action_types {
    pub const DELIVERY_CONFIRM: &str = "delivery_confirm";
    pub const DELIVERY_REJECT: &str = "delivery_reject";
    pub const PRODUCTION_START: &str = "production_start";
    pub const TECHNICAL_VALIDATION_REQUEST: &str = "technical_validation_request";
    pub const TRUCK_DISPATCH: &str = "truck_dispatch";
    pub const DELIVERY_ARRIVAL: &str = "delivery_arrival";
    pub const DELIVERY_COMPLETE: &str = "delivery_complete";
    pub const TRUCK_ASSIGN: &str = "truck_assign";
    pub const SCHEDULE_SET: &str = "schedule_set";
    pub const CREDIT_OVERRIDE: &str = "credit_override";
}

// ---------------------------------------------------------------------------
// Log category constants
// ---------------------------------------------------------------------------

/// Categories used by the audit store for retention grouping.
pub mod log_categories {
    pub const WORKFLOW: &str = "workflow";
    pub const PLANNING: &str = "planning";
    pub const FINANCE: &str = "finance";
}

/// Map an action type to its log category.
///
/// Unknown action types default to `"workflow"`.
pub fn action_to_category(action_type: &str) -> &'static str {
    match action_type {
        action_types::TRUCK_ASSIGN | action_types::SCHEDULE_SET => log_categories::PLANNING,
        action_types::CREDIT_OVERRIDE | action_types::DELIVERY_REJECT => log_categories::FINANCE,
        _ => log_categories::WORKFLOW,
    }
}

// ---------------------------------------------------------------------------
// Sensitive field redaction
// ---------------------------------------------------------------------------

/// Detail keys whose values must never reach the audit store.
pub const SENSITIVE_FIELDS: &[&str] = &["code", "token", "password", "secret"];

/// Redact sensitive fields from a JSON value, recursing into nested
/// objects and arrays.
///
/// Replaces the value of any key containing one of [`SENSITIVE_FIELDS`]
/// with `"[REDACTED]"`.
pub fn redact_sensitive_fields(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, val) in map {
                let lower_key = key.to_lowercase();
                if SENSITIVE_FIELDS.iter().any(|f| lower_key.contains(f)) {
                    redacted.insert(
                        key.clone(),
                        serde_json::Value::String("[REDACTED]".to_string()),
                    );
                } else {
                    redacted.insert(key.clone(), redact_sensitive_fields(val));
                }
            }
            serde_json::Value::Object(redacted)
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(redact_sensitive_fields).collect())
        }
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// AuditEntry
// ---------------------------------------------------------------------------

/// One audit record identifying actor, time and action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub action: String,
    pub category: String,
    pub delivery_id: DeliveryId,
    pub actor_id: String,
    pub actor_name: String,
    pub at: Timestamp,
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn new(action: &str, delivery_id: &str, actor: &Actor, at: Timestamp) -> Self {
        Self {
            id: Uuid::now_v7(),
            action: action.to_string(),
            category: action_to_category(action).to_string(),
            delivery_id: delivery_id.to_string(),
            actor_id: actor.id.clone(),
            actor_name: actor.name.clone(),
            at,
            details: serde_json::Value::Object(Default::default()),
        }
    }

    /// Attach details, redacting sensitive keys.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = redact_sensitive_fields(&details);
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
