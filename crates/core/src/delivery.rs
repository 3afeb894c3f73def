//! Delivery records ("bons de livraison") and their partial updates.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::types::{ClientId, DeliveryId, PurchaseOrderId, Timestamp, TruckId};
use crate::workflow::WorkflowState;

/// Wire format of a scheduled time-of-day.
pub const TIME_OF_DAY_FORMAT: &str = "%H:%M";

/// One delivery order tracked from validation through invoicing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: DeliveryId,
    pub client_id: ClientId,
    pub formula_id: String,
    /// Concrete volume in m³. Always positive.
    pub volume_m3: Decimal,
    pub scheduled_date: NaiveDate,
    #[serde(default, with = "time_of_day")]
    pub scheduled_time: Option<NaiveTime>,
    pub truck_id: Option<TruckId>,
    pub state: WorkflowState,
    pub departed_at: Option<Timestamp>,
    pub arrived_at: Option<Timestamp>,
    pub returned_at: Option<Timestamp>,
    pub invoice_generated: bool,
    pub wait_time_billable: bool,
    pub purchase_order_id: Option<PurchaseOrderId>,
}

impl DeliveryRecord {
    /// A fresh record awaiting validation, as order entry creates it.
    pub fn new(
        id: impl Into<DeliveryId>,
        client_id: impl Into<ClientId>,
        formula_id: impl Into<String>,
        volume_m3: Decimal,
        scheduled_date: NaiveDate,
    ) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            formula_id: formula_id.into(),
            volume_m3,
            scheduled_date,
            scheduled_time: None,
            truck_id: None,
            state: WorkflowState::PendingValidation,
            departed_at: None,
            arrived_at: None,
            returned_at: None,
            invoice_generated: false,
            wait_time_billable: false,
            purchase_order_id: None,
        }
    }

    /// Plant-local date and time the delivery is due, if a time is set.
    pub fn scheduled_at(&self) -> Option<NaiveDateTime> {
        self.scheduled_time
            .map(|time| self.scheduled_date.and_time(time))
    }

    /// Check the invariants a persisted record must satisfy.
    pub fn validate(&self) -> Result<(), DispatchError> {
        let invalid = |reason: &str| DispatchError::InvalidRecord {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.volume_m3 <= Decimal::ZERO {
            return Err(invalid("volume must be positive"));
        }
        if let (Some(departed), Some(arrived)) = (self.departed_at, self.arrived_at) {
            if arrived < departed {
                return Err(invalid("arrival precedes departure"));
            }
        }
        if let (Some(departed), Some(returned)) = (self.departed_at, self.returned_at) {
            if returned < departed {
                return Err(invalid("return precedes departure"));
            }
        }
        if matches!(
            self.state,
            WorkflowState::EnRoute | WorkflowState::Delivered | WorkflowState::Invoiced
        ) && self.departed_at.is_none()
        {
            return Err(invalid("record left the plant without a departure stamp"));
        }
        Ok(())
    }

    /// Apply a partial update. Stamps are write-once: a patch can set a
    /// missing stamp but never replace or clear an existing one.
    pub fn apply(&mut self, patch: &DeliveryPatch) {
        if let Some(state) = patch.state {
            self.state = state;
        }
        if let Some(truck_id) = &patch.truck_id {
            self.truck_id = Some(truck_id.clone());
        }
        if let Some(time) = patch.scheduled_time {
            self.scheduled_time = Some(time);
        }
        self.departed_at = self.departed_at.or(patch.departed_at);
        self.arrived_at = self.arrived_at.or(patch.arrived_at);
        self.returned_at = self.returned_at.or(patch.returned_at);
        if let Some(flag) = patch.invoice_generated {
            self.invoice_generated = flag;
        }
        if let Some(flag) = patch.wait_time_billable {
            self.wait_time_billable = flag;
        }
    }
}

/// A partial update written back to the delivery store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryPatch {
    pub state: Option<WorkflowState>,
    pub truck_id: Option<TruckId>,
    #[serde(default, with = "time_of_day")]
    pub scheduled_time: Option<NaiveTime>,
    pub departed_at: Option<Timestamp>,
    pub arrived_at: Option<Timestamp>,
    pub returned_at: Option<Timestamp>,
    pub invoice_generated: Option<bool>,
    pub wait_time_billable: Option<bool>,
}

impl DeliveryPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parse a user-supplied time-of-day (`HH:MM`, surrounding spaces allowed).
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, DispatchError> {
    NaiveTime::parse_from_str(raw.trim(), TIME_OF_DAY_FORMAT)
        .map_err(|_| DispatchError::InvalidTime(raw.to_string()))
}

pub fn format_time_of_day(time: NaiveTime) -> String {
    time.format(TIME_OF_DAY_FORMAT).to_string()
}

/// Serde adapter storing an optional time-of-day as `"HH:MM"` or null.
mod time_of_day {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIME_OF_DAY_FORMAT;

    pub fn serialize<S: Serializer>(value: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(time) => s.serialize_str(&super::format_time_of_day(*time)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(raw) if !raw.trim().is_empty() => {
                NaiveTime::parse_from_str(raw.trim(), TIME_OF_DAY_FORMAT)
                    .map(Some)
                    .map_err(serde::de::Error::custom)
            }
            _ => Ok(None),
        }
    }
}
