//! The dispatch board controller.
//!
//! [`DispatchBoard`] owns the board's view of one day: the last good
//! [`BoardSnapshot`] and a [`BoardStatus`] describing whether a fetch is
//! in flight and whether the snapshot is stale. Fetches are numbered; a
//! response is only committed if no later fetch has already been
//! committed, so overlapping refreshes can never roll the board back.
//!
//! Actions go through the [`WorkflowEngine`] against the record as the
//! board last saw it, and every successful write triggers an immediate
//! refresh.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{watch, RwLock};

use beton_core::approval::ApprovalToken;
use beton_core::board::{categorize, BoardBuckets};
use beton_core::clock::Clock;
use beton_core::conflict::{detect_conflicts, SchedulingConflict};
use beton_core::credit::{ClientCreditSnapshot, CreditStatus};
use beton_core::delivery::DeliveryRecord;
use beton_core::error::DispatchError;
use beton_core::policy::DispatchPolicy;
use beton_core::roles::Actor;
use beton_core::truck::{assignment_anomalies, AssignmentAnomaly, TruckRecord};
use beton_core::types::{ClientId, Timestamp};
use beton_core::workflow::reconcile_invoiced;

use crate::engine::{ProductionStart, WorkflowEngine};
use crate::store::Stores;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Everything the board knows about one day, as of one fetch.
#[derive(Debug, Clone)]
pub struct BoardSnapshot {
    pub date: NaiveDate,
    /// Fetch number that produced this snapshot.
    pub sequence: u64,
    pub fetched_at: Timestamp,
    /// Well-formed records only.
    pub deliveries: Vec<DeliveryRecord>,
    pub trucks: Vec<TruckRecord>,
    pub credit: HashMap<ClientId, ClientCreditSnapshot>,
    /// Records excluded from the board, as `InvalidRecord` errors.
    pub rejected: Vec<DispatchError>,
}

impl BoardSnapshot {
    pub fn delivery(&self, id: &str) -> Option<&DeliveryRecord> {
        self.deliveries.iter().find(|d| d.id == id)
    }

    pub fn credit_for(&self, record: &DeliveryRecord) -> Option<&ClientCreditSnapshot> {
        self.credit.get(&record.client_id)
    }

    /// Credit badge for a delivery. `None` when the client is unknown.
    pub fn credit_status(&self, delivery_id: &str) -> Option<CreditStatus> {
        self.delivery(delivery_id)
            .and_then(|d| self.credit_for(d))
            .map(ClientCreditSnapshot::status)
    }

    /// Board columns at plant time `now`.
    pub fn categorize(&self, now: Timestamp, policy: &DispatchPolicy) -> BoardBuckets<'_> {
        categorize(&self.deliveries, policy.local(now), policy)
    }

    pub fn conflicts(&self, policy: &DispatchPolicy) -> Vec<SchedulingConflict> {
        detect_conflicts(&self.deliveries, policy.conflict_window_minutes)
    }

    pub fn anomalies(&self) -> Vec<AssignmentAnomaly> {
        assignment_anomalies(&self.trucks, &self.deliveries)
    }
}

/// Load state shown alongside the snapshot.
#[derive(Debug, Clone, Default)]
pub struct BoardStatus {
    /// At least one fetch is in flight.
    pub loading: bool,
    /// The last fetch failed; the snapshot is from an earlier one.
    pub stale: bool,
    pub last_error: Option<DispatchError>,
    pub last_success: Option<Timestamp>,
}

struct BoardState {
    date: NaiveDate,
    snapshot: Option<Arc<BoardSnapshot>>,
    status: BoardStatus,
    issued: u64,
    committed: u64,
    in_flight: usize,
}

// ---------------------------------------------------------------------------
// DispatchBoard
// ---------------------------------------------------------------------------

pub struct DispatchBoard {
    stores: Stores,
    engine: WorkflowEngine,
    clock: Arc<dyn Clock>,
    state: RwLock<BoardState>,
    /// Mirrors `state.date` for subscribers that must not take the lock.
    active: watch::Sender<NaiveDate>,
}

impl DispatchBoard {
    pub fn new(
        stores: Stores,
        clock: Arc<dyn Clock>,
        policy: DispatchPolicy,
        date: NaiveDate,
    ) -> Self {
        let engine = WorkflowEngine::new(stores.clone(), clock.clone(), policy);
        Self {
            stores,
            engine,
            clock,
            active: watch::channel(date).0,
            state: RwLock::new(BoardState {
                date,
                snapshot: None,
                status: BoardStatus::default(),
                issued: 0,
                committed: 0,
                in_flight: 0,
            }),
        }
    }

    pub fn policy(&self) -> &DispatchPolicy {
        self.engine.policy()
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub async fn active_date(&self) -> NaiveDate {
        self.state.read().await.date
    }

    /// Follow the active date as it changes.
    pub fn watch_date(&self) -> watch::Receiver<NaiveDate> {
        self.active.subscribe()
    }

    pub async fn snapshot(&self) -> Option<Arc<BoardSnapshot>> {
        self.state.read().await.snapshot.clone()
    }

    pub async fn status(&self) -> BoardStatus {
        self.state.read().await.status.clone()
    }

    /// Switch the board to `date` and load it.
    ///
    /// The previous day's snapshot is dropped immediately so the board
    /// never shows one day's records under another day's header.
    pub async fn load_day(&self, date: NaiveDate) -> Result<Arc<BoardSnapshot>, DispatchError> {
        {
            let mut state = self.state.write().await;
            if state.date != date {
                tracing::info!(from = %state.date, to = %date, "Board switching day");
                state.date = date;
                state.snapshot = None;
                state.status.stale = false;
                state.status.last_error = None;
                self.active.send_replace(date);
            }
        }
        self.fetch(date).await
    }

    /// Re-fetch the active day.
    pub async fn refresh(&self) -> Result<Arc<BoardSnapshot>, DispatchError> {
        let date = self.active_date().await;
        self.fetch(date).await
    }

    async fn fetch(&self, date: NaiveDate) -> Result<Arc<BoardSnapshot>, DispatchError> {
        let sequence = {
            let mut state = self.state.write().await;
            state.issued += 1;
            state.in_flight += 1;
            state.status.loading = true;
            state.issued
        };

        let fetched_at = self.clock.now();
        let fetched = load_snapshot(&self.stores, self.policy(), date, sequence, fetched_at).await;

        let mut state = self.state.write().await;
        state.in_flight -= 1;
        state.status.loading = state.in_flight > 0;

        if state.date != date {
            tracing::debug!(sequence, %date, "Discarding fetch for a day no longer shown");
            return fetched.map(Arc::new);
        }
        if sequence <= state.committed {
            tracing::debug!(
                sequence,
                committed = state.committed,
                "Discarding out-of-order fetch",
            );
            return match &state.snapshot {
                Some(current) => Ok(current.clone()),
                None => fetched.map(Arc::new),
            };
        }

        match fetched {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                state.committed = sequence;
                state.snapshot = Some(snapshot.clone());
                state.status.stale = false;
                state.status.last_error = None;
                state.status.last_success = Some(snapshot.fetched_at);
                tracing::debug!(
                    sequence,
                    %date,
                    deliveries = snapshot.deliveries.len(),
                    rejected = snapshot.rejected.len(),
                    "Board snapshot committed",
                );
                Ok(snapshot)
            }
            Err(e) => {
                state.status.stale = state.snapshot.is_some();
                state.status.last_error = Some(e.clone());
                tracing::error!(sequence, %date, error = %e, "Board fetch failed");
                Err(e)
            }
        }
    }

    // -- Actions ------------------------------------------------------------

    pub async fn confirm(
        &self,
        actor: &Actor,
        delivery_id: &str,
        approval: Option<&ApprovalToken>,
    ) -> Result<DeliveryRecord, DispatchError> {
        let snapshot = self.current().await?;
        let record = find(&snapshot, delivery_id)?;
        let result = self
            .engine
            .confirm(actor, record, snapshot.credit_for(record), approval)
            .await;
        self.after_write(&result).await;
        result
    }

    pub async fn reject(&self, actor: &Actor, delivery_id: &str) -> Result<(), DispatchError> {
        let snapshot = self.current().await?;
        let record = find(&snapshot, delivery_id)?;
        let result = self.engine.reject(actor, record).await;
        self.after_write(&result).await;
        result
    }

    pub async fn start_production(
        &self,
        actor: &Actor,
        delivery_id: &str,
        request: &ProductionStart,
    ) -> Result<DeliveryRecord, DispatchError> {
        let snapshot = self.current().await?;
        let record = find(&snapshot, delivery_id)?;
        let result = self
            .engine
            .start_production(actor, record, snapshot.credit_for(record), request)
            .await;
        self.after_write(&result).await;
        result
    }

    pub async fn request_technical_validation(
        &self,
        actor: &Actor,
        delivery_id: &str,
        request: &ProductionStart,
    ) -> Result<DeliveryRecord, DispatchError> {
        let snapshot = self.current().await?;
        let record = find(&snapshot, delivery_id)?;
        let result = self
            .engine
            .request_technical_validation(actor, record, snapshot.credit_for(record), request)
            .await;
        self.after_write(&result).await;
        result
    }

    pub async fn dispatch(
        &self,
        actor: &Actor,
        delivery_id: &str,
    ) -> Result<DeliveryRecord, DispatchError> {
        let snapshot = self.current().await?;
        let record = find(&snapshot, delivery_id)?;
        let result = self.engine.dispatch(actor, record).await;
        self.after_write(&result).await;
        result
    }

    pub async fn mark_arrived(
        &self,
        actor: &Actor,
        delivery_id: &str,
    ) -> Result<DeliveryRecord, DispatchError> {
        let snapshot = self.current().await?;
        let record = find(&snapshot, delivery_id)?;
        let result = self.engine.mark_arrived(actor, record).await;
        self.after_write(&result).await;
        result
    }

    pub async fn mark_delivered(
        &self,
        actor: &Actor,
        delivery_id: &str,
    ) -> Result<DeliveryRecord, DispatchError> {
        let snapshot = self.current().await?;
        let record = find(&snapshot, delivery_id)?;
        let result = self.engine.mark_delivered(actor, record).await;
        self.after_write(&result).await;
        result
    }

    pub async fn assign_truck(
        &self,
        actor: &Actor,
        delivery_id: &str,
        truck_id: &str,
    ) -> Result<DeliveryRecord, DispatchError> {
        let snapshot = self.current().await?;
        let record = find(&snapshot, delivery_id)?;
        let result = self
            .engine
            .assign_truck(actor, record, truck_id, &snapshot.trucks, &snapshot.deliveries)
            .await;
        self.after_write(&result).await;
        result
    }

    pub async fn set_scheduled_time(
        &self,
        actor: &Actor,
        delivery_id: &str,
        raw: &str,
    ) -> Result<DeliveryRecord, DispatchError> {
        let snapshot = self.current().await?;
        let record = find(&snapshot, delivery_id)?;
        let result = self.engine.set_scheduled_time(actor, record, raw).await;
        self.after_write(&result).await;
        result
    }

    async fn current(&self) -> Result<Arc<BoardSnapshot>, DispatchError> {
        self.snapshot().await.ok_or_else(|| {
            DispatchError::DataUnavailable("the board has not been loaded yet".into())
        })
    }

    /// Refresh after anything that may have written to the store. A failed
    /// refresh does not fail the action; it only marks the board stale.
    async fn after_write<T>(&self, result: &Result<T, DispatchError>) {
        let wrote = match result {
            Ok(_) => true,
            Err(DispatchError::CompensationFailed { .. }) => true,
            Err(_) => false,
        };
        if !wrote {
            return;
        }
        if let Err(e) = self.refresh().await {
            tracing::warn!(error = %e, "Refresh after write failed");
        }
    }
}

fn find<'a>(snapshot: &'a BoardSnapshot, id: &str) -> Result<&'a DeliveryRecord, DispatchError> {
    snapshot.delivery(id).ok_or_else(|| DispatchError::NotFound {
        entity: "delivery",
        id: id.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Fetch and assemble one day's snapshot.
///
/// Deliveries and trucks are fetched concurrently, then credit snapshots
/// and overdue flags for every client on the day. Any store failure fails
/// the whole load. Malformed records are excluded and listed in
/// `rejected`; they never fail the load.
async fn load_snapshot(
    stores: &Stores,
    policy: &DispatchPolicy,
    date: NaiveDate,
    sequence: u64,
    fetched_at: Timestamp,
) -> Result<BoardSnapshot, DispatchError> {
    let (records, trucks) = tokio::try_join!(
        stores.deliveries.list_by_date(date),
        stores.trucks.list(),
    )
    .map_err(DispatchError::from_fetch)?;

    let mut deliveries = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();
    for mut record in records {
        if let Err(e) = record.validate() {
            tracing::error!(delivery_id = %record.id, error = %e, "Excluding malformed delivery");
            rejected.push(e);
            continue;
        }
        if reconcile_invoiced(&mut record) {
            tracing::debug!(delivery_id = %record.id, "Delivery recognized as invoiced");
        }
        deliveries.push(record);
    }

    let client_ids: Vec<ClientId> = deliveries
        .iter()
        .map(|d| d.client_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let (mut credit, overdue) = tokio::try_join!(
        stores.clients.credit_snapshots(&client_ids),
        futures::future::try_join_all(
            client_ids
                .iter()
                .map(|id| stores.clients.has_overdue_invoice(id, policy.overdue_invoice_days)),
        ),
    )
    .map_err(DispatchError::from_fetch)?;

    for (client_id, has_overdue) in client_ids.iter().zip(overdue) {
        match credit.get_mut(client_id) {
            Some(snapshot) => snapshot.has_overdue_invoice |= has_overdue,
            None => tracing::warn!(%client_id, "No credit snapshot for client on the board"),
        }
    }

    Ok(BoardSnapshot {
        date,
        sequence,
        fetched_at,
        deliveries,
        trucks,
        credit,
        rejected,
    })
}
