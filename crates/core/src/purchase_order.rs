//! Purchase orders ("bons de commande") and the reversal applied when a
//! linked delivery is rejected.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{ClientId, PurchaseOrderId};

pub const PO_STATUS_READY_FOR_PRODUCTION: &str = "ready_for_production";
pub const PO_STATUS_IN_PRODUCTION: &str = "in_production";
pub const PO_STATUS_COMPLETED: &str = "completed";
pub const PO_STATUS_CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    ReadyForProduction,
    InProduction,
    Completed,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadyForProduction => PO_STATUS_READY_FOR_PRODUCTION,
            Self::InProduction => PO_STATUS_IN_PRODUCTION,
            Self::Completed => PO_STATUS_COMPLETED,
            Self::Cancelled => PO_STATUS_CANCELLED,
        }
    }
}

/// A client order aggregating one or more deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: PurchaseOrderId,
    pub client_id: ClientId,
    pub ordered_volume_m3: Decimal,
    pub delivered_volume_m3: Decimal,
    pub delivery_count: u32,
    pub status: PurchaseOrderStatus,
}

/// A partial update written back to the purchase order store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderPatch {
    pub delivered_volume_m3: Option<Decimal>,
    pub delivery_count: Option<u32>,
    pub status: Option<PurchaseOrderStatus>,
}

impl PurchaseOrder {
    pub fn apply(&mut self, patch: &PurchaseOrderPatch) {
        if let Some(volume) = patch.delivered_volume_m3 {
            self.delivered_volume_m3 = volume;
        }
        if let Some(count) = patch.delivery_count {
            self.delivery_count = count;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
    }
}

/// Compute the compensating update for removing a delivery of
/// `removed_volume` from `order`. Neither counter goes below zero, and the
/// order returns to "ready for production".
pub fn reversal_patch(order: &PurchaseOrder, removed_volume: Decimal) -> PurchaseOrderPatch {
    let delivered = (order.delivered_volume_m3 - removed_volume).max(Decimal::ZERO);
    PurchaseOrderPatch {
        delivered_volume_m3: Some(delivered),
        delivery_count: Some(order.delivery_count.saturating_sub(1)),
        status: Some(PurchaseOrderStatus::ReadyForProduction),
    }
}
