//! Contracts for the external collaborators the dispatch board talks to.
//!
//! The board never owns persistence. Every read and write goes through
//! one of these traits so the workflow can run against a real backend or
//! the [`InMemoryBackend`](crate::memory::InMemoryBackend) used in tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use beton_core::alert::SystemAlert;
use beton_core::approval::{ApprovalRequest, ApprovalToken};
use beton_core::audit::AuditEntry;
use beton_core::credit::ClientCreditSnapshot;
use beton_core::delivery::{DeliveryPatch, DeliveryRecord};
use beton_core::error::StoreError;
use beton_core::purchase_order::{PurchaseOrder, PurchaseOrderPatch};
use beton_core::truck::TruckRecord;
use beton_core::types::ClientId;

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Every delivery scheduled on `date`, in any state.
    async fn list_by_date(&self, date: NaiveDate) -> Result<Vec<DeliveryRecord>, StoreError>;

    async fn get(&self, id: &str) -> Result<DeliveryRecord, StoreError>;

    /// Apply a partial update and return the record as stored.
    async fn update(&self, id: &str, patch: &DeliveryPatch) -> Result<DeliveryRecord, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TruckStore: Send + Sync {
    /// The full truck registry. Read-only from the board's perspective.
    async fn list(&self) -> Result<Vec<TruckRecord>, StoreError>;
}

#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Credit snapshots for the given clients. Unknown ids are omitted.
    async fn credit_snapshots(
        &self,
        client_ids: &[ClientId],
    ) -> Result<HashMap<ClientId, ClientCreditSnapshot>, StoreError>;

    /// Whether the client has an unpaid invoice older than
    /// `older_than_days` days.
    async fn has_overdue_invoice(
        &self,
        client_id: &str,
        older_than_days: i64,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait PurchaseOrderStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<PurchaseOrder, StoreError>;

    async fn update(
        &self,
        id: &str,
        patch: &PurchaseOrderPatch,
    ) -> Result<PurchaseOrder, StoreError>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn raise(&self, alert: &SystemAlert) -> Result<(), StoreError>;
}

/// Out-of-band management approval for credit-blocked actions.
///
/// A code is issued to management off-line for an opened request. Each
/// code can be redeemed at most once, and only for the delivery, action
/// and client of the request it was issued for.
///
/// The engine redeems a code before the guarded write and calls
/// [`release`](ApprovalService::release) if that write fails, so a code is
/// only spent by an action that actually happened.
#[async_trait]
pub trait ApprovalService: Send + Sync {
    async fn open_request(&self, request: &ApprovalRequest) -> Result<(), StoreError>;

    /// Consume the token for `request`. `Ok(false)` means the code was
    /// refused: wrong or spent, or issued for another delivery, action or
    /// client.
    async fn redeem(
        &self,
        token: &ApprovalToken,
        request: &ApprovalRequest,
    ) -> Result<bool, StoreError>;

    /// Return a redeemed code to the pending state.
    async fn release(&self, token: &ApprovalToken) -> Result<(), StoreError>;
}

/// The set of collaborators shared by the engine and the board.
#[derive(Clone)]
pub struct Stores {
    pub deliveries: Arc<dyn DeliveryStore>,
    pub trucks: Arc<dyn TruckStore>,
    pub clients: Arc<dyn ClientStore>,
    pub purchase_orders: Arc<dyn PurchaseOrderStore>,
    pub audit: Arc<dyn AuditSink>,
    pub alerts: Arc<dyn AlertSink>,
    pub approvals: Arc<dyn ApprovalService>,
}
