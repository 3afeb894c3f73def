//! System alert types raised by the dispatch workflow.

use serde::{Deserialize, Serialize};

use crate::roles::Actor;
use crate::types::{DeliveryId, Timestamp};

/// Alert type for production started inside the night window.
pub const ALERT_MIDNIGHT_PROTOCOL: &str = "midnight_protocol";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    High,
    Critical,
}

/// An alert for management, referencing the delivery that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemAlert {
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub reference_id: DeliveryId,
    pub raised_at: Timestamp,
}

/// Build the alert emitted when production starts during the night window.
pub fn midnight_protocol_alert(
    delivery_id: &str,
    actor: &Actor,
    justification: &str,
    raised_at: Timestamp,
) -> SystemAlert {
    SystemAlert {
        alert_type: ALERT_MIDNIGHT_PROTOCOL.to_string(),
        severity: AlertSeverity::High,
        message: format!(
            "Night production started for {delivery_id} by {}: {justification}",
            actor.name
        ),
        reference_id: delivery_id.to_string(),
        raised_at,
    }
}
