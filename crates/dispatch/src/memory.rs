//! In-memory backend implementing every store contract.
//!
//! Used by the integration tests and for local demos. Writes to deliveries
//! are published on the [`ChangeBus`] when one is attached, the same way a
//! real backend's change feed would notify the board. A handful of fault
//! switches let tests exercise the outage paths.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use uuid::Uuid;

use beton_core::alert::SystemAlert;
use beton_core::approval::{ApprovalRequest, ApprovalToken};
use beton_core::audit::AuditEntry;
use beton_core::clock::Clock;
use beton_core::credit::{invoice_is_overdue, ClientCreditSnapshot};
use beton_core::delivery::{DeliveryPatch, DeliveryRecord};
use beton_core::error::StoreError;
use beton_core::purchase_order::{PurchaseOrder, PurchaseOrderPatch};
use beton_core::truck::TruckRecord;
use beton_core::types::{ClientId, DeliveryId, PurchaseOrderId};
use beton_events::bus::{ChangeBus, ChangeKind, DeliveryChange};

use crate::store::{
    AlertSink, ApprovalService, AuditSink, ClientStore, DeliveryStore, PurchaseOrderStore,
    Stores, TruckStore,
};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// An approval request as the approval service tracks it.
#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub request: ApprovalRequest,
    /// The code management handed out, once issued.
    pub code: Option<String>,
    pub consumed: bool,
}

#[derive(Default)]
struct State {
    deliveries: BTreeMap<DeliveryId, DeliveryRecord>,
    trucks: Vec<TruckRecord>,
    clients: HashMap<ClientId, ClientCreditSnapshot>,
    unpaid_invoices: HashMap<ClientId, Vec<NaiveDate>>,
    purchase_orders: HashMap<PurchaseOrderId, PurchaseOrder>,
    audit: Vec<AuditEntry>,
    alerts: Vec<SystemAlert>,
    approvals: HashMap<Uuid, PendingApproval>,
}

#[derive(Default)]
struct Faults {
    failing_fetches: AtomicUsize,
    fail_purchase_order_updates: AtomicBool,
    fail_delivery_updates: AtomicBool,
    fail_audit: AtomicBool,
    fetch_delays: Mutex<VecDeque<Duration>>,
}

pub struct InMemoryBackend {
    state: RwLock<State>,
    faults: Faults,
    fetches: AtomicUsize,
    clock: Arc<dyn Clock>,
    bus: Option<Arc<ChangeBus>>,
}

impl InMemoryBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(State::default()),
            faults: Faults::default(),
            fetches: AtomicUsize::new(0),
            clock,
            bus: None,
        }
    }

    /// Publish delivery writes on `bus`.
    pub fn with_bus(mut self, bus: Arc<ChangeBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Bundle this backend as every collaborator of the board.
    pub fn stores(self: &Arc<Self>) -> Stores {
        Stores {
            deliveries: self.clone(),
            trucks: self.clone(),
            clients: self.clone(),
            purchase_orders: self.clone(),
            audit: self.clone(),
            alerts: self.clone(),
            approvals: self.clone(),
        }
    }

    fn publish(&self, kind: ChangeKind, record: &DeliveryRecord, payload: serde_json::Value) {
        if let Some(bus) = &self.bus {
            bus.publish(
                DeliveryChange::new(kind, record.id.clone(), record.scheduled_date)
                    .with_payload(payload),
            );
        }
    }

    // -- Seeding -----------------------------------------------------------

    pub async fn insert_delivery(&self, record: DeliveryRecord) {
        self.state
            .write()
            .await
            .deliveries
            .insert(record.id.clone(), record.clone());
        self.publish(ChangeKind::Created, &record, serde_json::json!({}));
    }

    pub async fn insert_truck(&self, truck: TruckRecord) {
        let mut state = self.state.write().await;
        state.trucks.retain(|t| t.id != truck.id);
        state.trucks.push(truck);
    }

    pub async fn insert_client(&self, snapshot: ClientCreditSnapshot) {
        self.state
            .write()
            .await
            .clients
            .insert(snapshot.client_id.clone(), snapshot);
    }

    /// Record an unpaid invoice for a client, issued on `issued_on`.
    pub async fn add_unpaid_invoice(&self, client_id: &str, issued_on: NaiveDate) {
        self.state
            .write()
            .await
            .unpaid_invoices
            .entry(client_id.to_string())
            .or_default()
            .push(issued_on);
    }

    pub async fn insert_purchase_order(&self, order: PurchaseOrder) {
        self.state
            .write()
            .await
            .purchase_orders
            .insert(order.id.clone(), order);
    }

    // -- Inspection --------------------------------------------------------

    pub async fn delivery(&self, id: &str) -> Option<DeliveryRecord> {
        self.state.read().await.deliveries.get(id).cloned()
    }

    pub async fn purchase_order(&self, id: &str) -> Option<PurchaseOrder> {
        self.state.read().await.purchase_orders.get(id).cloned()
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.read().await.audit.clone()
    }

    pub async fn alerts(&self) -> Vec<SystemAlert> {
        self.state.read().await.alerts.clone()
    }

    pub async fn approval(&self, request_id: Uuid) -> Option<PendingApproval> {
        self.state.read().await.approvals.get(&request_id).cloned()
    }

    /// Number of `list_by_date` calls served so far, failed ones included.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Management answers a request: issue its one-time code.
    pub async fn issue_code(&self, request_id: Uuid) -> Option<String> {
        let mut state = self.state.write().await;
        let pending = state.approvals.get_mut(&request_id)?;
        let code = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
        pending.code = Some(code.clone());
        Some(code)
    }

    // -- Fault injection ---------------------------------------------------

    /// Make the next `n` delivery fetches fail as unavailable.
    pub fn fail_next_fetches(&self, n: usize) {
        self.faults.failing_fetches.store(n, Ordering::SeqCst);
    }

    pub fn fail_purchase_order_updates(&self, fail: bool) {
        self.faults
            .fail_purchase_order_updates
            .store(fail, Ordering::SeqCst);
    }

    pub fn fail_delivery_updates(&self, fail: bool) {
        self.faults
            .fail_delivery_updates
            .store(fail, Ordering::SeqCst);
    }

    pub fn fail_audit(&self, fail: bool) {
        self.faults.fail_audit.store(fail, Ordering::SeqCst);
    }

    /// Queue an artificial latency for the next delivery fetch.
    pub fn delay_next_fetch(&self, delay: Duration) {
        self.faults
            .fetch_delays
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(delay);
    }

    fn take_fetch_fault(&self) -> Result<(), StoreError> {
        let failing = self.faults.failing_fetches.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |n| n.checked_sub(1),
        );
        match failing {
            Ok(_) => Err(StoreError::Unavailable("delivery store timed out".into())),
            Err(_) => Ok(()),
        }
    }

    fn take_fetch_delay(&self) -> Option<Duration> {
        self.faults
            .fetch_delays
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
    }
}

fn not_found(entity: &'static str, id: &str) -> StoreError {
    StoreError::NotFound {
        entity,
        id: id.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Store contracts
// ---------------------------------------------------------------------------

#[async_trait]
impl DeliveryStore for InMemoryBackend {
    async fn list_by_date(&self, date: NaiveDate) -> Result<Vec<DeliveryRecord>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.take_fetch_delay() {
            tokio::time::sleep(delay).await;
        }
        self.take_fetch_fault()?;

        let state = self.state.read().await;
        Ok(state
            .deliveries
            .values()
            .filter(|d| d.scheduled_date == date)
            .cloned()
            .collect())
    }

    async fn get(&self, id: &str) -> Result<DeliveryRecord, StoreError> {
        self.delivery(id).await.ok_or_else(|| not_found("delivery", id))
    }

    async fn update(&self, id: &str, patch: &DeliveryPatch) -> Result<DeliveryRecord, StoreError> {
        if self.faults.fail_delivery_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("delivery store timed out".into()));
        }
        let updated = {
            let mut state = self.state.write().await;
            let record = state
                .deliveries
                .get_mut(id)
                .ok_or_else(|| not_found("delivery", id))?;
            record.apply(patch);
            record.clone()
        };

        let payload = serde_json::to_value(patch).unwrap_or_default();
        self.publish(ChangeKind::Updated, &updated, payload);
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let removed = self
            .state
            .write()
            .await
            .deliveries
            .remove(id)
            .ok_or_else(|| not_found("delivery", id))?;
        self.publish(ChangeKind::Deleted, &removed, serde_json::json!({}));
        Ok(())
    }
}

#[async_trait]
impl TruckStore for InMemoryBackend {
    async fn list(&self) -> Result<Vec<TruckRecord>, StoreError> {
        Ok(self.state.read().await.trucks.clone())
    }
}

#[async_trait]
impl ClientStore for InMemoryBackend {
    async fn credit_snapshots(
        &self,
        client_ids: &[ClientId],
    ) -> Result<HashMap<ClientId, ClientCreditSnapshot>, StoreError> {
        let state = self.state.read().await;
        Ok(client_ids
            .iter()
            .filter_map(|id| state.clients.get(id).map(|s| (id.clone(), s.clone())))
            .collect())
    }

    async fn has_overdue_invoice(
        &self,
        client_id: &str,
        older_than_days: i64,
    ) -> Result<bool, StoreError> {
        let today = self.clock.now().date_naive();
        let state = self.state.read().await;
        Ok(state.unpaid_invoices.get(client_id).is_some_and(|issued| {
            issued
                .iter()
                .any(|on| invoice_is_overdue(*on, today, older_than_days))
        }))
    }
}

#[async_trait]
impl PurchaseOrderStore for InMemoryBackend {
    async fn get(&self, id: &str) -> Result<PurchaseOrder, StoreError> {
        self.purchase_order(id)
            .await
            .ok_or_else(|| not_found("purchase_order", id))
    }

    async fn update(
        &self,
        id: &str,
        patch: &PurchaseOrderPatch,
    ) -> Result<PurchaseOrder, StoreError> {
        if self.faults.fail_purchase_order_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("purchase order store timed out".into()));
        }
        let mut state = self.state.write().await;
        let order = state
            .purchase_orders
            .get_mut(id)
            .ok_or_else(|| not_found("purchase_order", id))?;
        order.apply(patch);
        Ok(order.clone())
    }
}

#[async_trait]
impl AuditSink for InMemoryBackend {
    async fn record(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        if self.faults.fail_audit.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("audit store timed out".into()));
        }
        self.state.write().await.audit.push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl AlertSink for InMemoryBackend {
    async fn raise(&self, alert: &SystemAlert) -> Result<(), StoreError> {
        self.state.write().await.alerts.push(alert.clone());
        Ok(())
    }
}

#[async_trait]
impl ApprovalService for InMemoryBackend {
    async fn open_request(&self, request: &ApprovalRequest) -> Result<(), StoreError> {
        self.state.write().await.approvals.insert(
            request.id,
            PendingApproval {
                request: request.clone(),
                code: None,
                consumed: false,
            },
        );
        Ok(())
    }

    async fn redeem(
        &self,
        token: &ApprovalToken,
        request: &ApprovalRequest,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Some(pending) = state.approvals.get_mut(&token.request_id) else {
            return Ok(false);
        };
        let matches = !pending.consumed
            && pending.code.as_deref() == Some(token.code.trim())
            && pending.request.same_scope(request);
        if matches {
            pending.consumed = true;
        }
        Ok(matches)
    }

    async fn release(&self, token: &ApprovalToken) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let pending = state
            .approvals
            .get_mut(&token.request_id)
            .ok_or_else(|| not_found("approval_request", &token.request_id.to_string()))?;
        pending.consumed = false;
        Ok(())
    }
}
