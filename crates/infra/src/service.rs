//! Transactional facade over the inventory domain.
//!
//! `InventoryService` owns the ledger, the batch tracker and the alert book
//! and exposes the named operations workflows call. Domain types stay pure;
//! this module adds locking, defaults from configuration, and snapshot
//! persistence.
//!
//! ## Write Flow
//!
//! ```text
//! request
//!   ↓
//! 1. Take the state write lock (single writer)
//!   ↓
//! 2. Prepare ledger records (validate, normalize, resolve product)
//!   ↓
//! 3. Check batch effects (check_receive / check_consume)
//!   ↓
//! 4. Apply batch effects, commit ledger records (cannot fail past here)
//!   ↓
//! 5. Invalidate snapshots dated on or after the movement
//! ```
//!
//! Any error in steps 2-3 returns before anything is mutated, so a failed
//! request leaves ledger and tracker exactly as they were.
//!
//! ## Reads
//!
//! Valuations take the state read lock, so they run alongside each other.
//! Work on one `(product, date, method)` key is serialized by a per-key
//! mutex; `compare_valuations` fans methods out over scoped threads.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_core::{AlertId, BatchId, LedgerError, MovementId, ProductId};
use stockledger_inventory::{
    Alert, AlertBook, AlertDeriver, Batch, BatchTracker, ConsumptionOrder, ConsumptionPlan,
    Direction, InMemoryProductCatalog, Ledger, MovementKind, MovementRecord, MovementReference,
    NewBatch, NewMovement, Product, ProductCatalog, Reconciliation, SnapshotKey,
    StockValuationSnapshot, ValuationEngine, ValuationMethod, reconcile,
};

use crate::config::InventoryConfig;
use crate::locks::KeyedLocks;
use crate::snapshot_store::SnapshotStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A thread panicked while holding the state lock.
    #[error("inventory state lock poisoned")]
    LockPoisoned,
}

impl ServiceError {
    pub fn as_ledger(&self) -> Option<&LedgerError> {
        match self {
            ServiceError::Ledger(e) => Some(e),
            ServiceError::LockPoisoned => None,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

fn default_receipt_kind() -> MovementKind {
    MovementKind::PurchaseReceipt
}

fn default_issue_kind() -> MovementKind {
    MovementKind::SalesIssue
}

/// Register a batch and append its inward movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub batch: NewBatch,
    #[serde(default = "default_receipt_kind")]
    pub kind: MovementKind,
    #[serde(default)]
    pub reference: Option<MovementReference>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ReceiveStock {
    pub fn purchase(batch: NewBatch) -> Self {
        Self {
            batch,
            kind: MovementKind::PurchaseReceipt,
            reference: None,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedStock {
    pub batch: Batch,
    pub movement: MovementRecord,
}

/// Issue stock across batches picked by layer selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueStock {
    pub product_id: ProductId,
    pub quantity: Decimal,
    #[serde(default = "default_issue_kind")]
    pub kind: MovementKind,
    /// Defaults to the order matching the product's valuation method.
    #[serde(default)]
    pub order: Option<ConsumptionOrder>,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub reference: Option<MovementReference>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl IssueStock {
    pub fn sale(product_id: ProductId, quantity: Decimal, occurred_at: DateTime<Utc>) -> Self {
        Self {
            product_id,
            quantity,
            kind: MovementKind::SalesIssue,
            order: None,
            occurred_at,
            location: None,
            reference: None,
            notes: None,
        }
    }

    pub fn with_order(mut self, order: ConsumptionOrder) -> Self {
        self.order = Some(order);
        self
    }
}

type Catalog = Arc<InMemoryProductCatalog>;

#[derive(Debug)]
struct State {
    ledger: Ledger<Catalog>,
    tracker: BatchTracker,
    alerts: AlertBook,
}

/// Single-process inventory service.
///
/// ## Generic Parameters
///
/// - `S`: snapshot store receiving every computed valuation
#[derive(Debug)]
pub struct InventoryService<S> {
    config: InventoryConfig,
    catalog: Catalog,
    state: RwLock<State>,
    snapshots: S,
    valuation_locks: KeyedLocks<SnapshotKey>,
    deriver: AlertDeriver,
}

impl<S> InventoryService<S> {
    pub fn new(config: InventoryConfig, snapshots: S) -> Self {
        let catalog: Catalog = Arc::new(InMemoryProductCatalog::new());
        let deriver = AlertDeriver::new(config.alerts.clone());
        Self {
            state: RwLock::new(State {
                ledger: Ledger::new(catalog.clone()),
                tracker: BatchTracker::new(),
                alerts: AlertBook::new(),
            }),
            config,
            catalog,
            snapshots,
            valuation_locks: KeyedLocks::new(),
            deriver,
        }
    }

    pub fn config(&self) -> &InventoryConfig {
        &self.config
    }

    pub fn snapshots(&self) -> &S {
        &self.snapshots
    }

    fn read(&self) -> ServiceResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| ServiceError::LockPoisoned)
    }

    fn write(&self) -> ServiceResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| ServiceError::LockPoisoned)
    }
}

impl<S: SnapshotStore> InventoryService<S> {
    // ---- products ----

    /// Insert or replace a product's stock settings.
    pub fn register_product(&self, product: Product) -> ServiceResult<Product> {
        self.catalog.upsert(product.clone())?;
        tracing::info!(product_id = %product.id, sku = %product.sku, "product registered");
        Ok(product)
    }

    pub fn product(&self, product_id: ProductId) -> ServiceResult<Product> {
        Ok(self.catalog.require(&product_id)?)
    }

    pub fn products(&self) -> Vec<Product> {
        self.catalog.list()
    }

    // ---- movements ----

    /// Append one movement. An outward movement naming a batch consumes that
    /// batch in the same step.
    pub fn append_movement(&self, mut new: NewMovement) -> ServiceResult<MovementRecord> {
        if new.location.is_none() {
            new.location = Some(self.config.default_location.clone());
        }

        let mut guard = self.write()?;
        let state = &mut *guard;

        let prepared = state.ledger.prepare(new)?;
        let record = prepared.record();

        let mut consume = None;
        if let Some(batch_id) = record.batch_id() {
            let batch = state.tracker.get(&batch_id)?;
            if batch.product_id() != record.product_id() {
                return Err(LedgerError::validation(format!(
                    "batch {} belongs to product {}, not {}",
                    batch.batch_number(),
                    batch.product_id(),
                    record.product_id()
                ))
                .into());
            }
            if record.direction() == Direction::Outward {
                let quantity = record.quantity().abs();
                batch.check_consume(quantity)?;
                consume = Some((batch_id, quantity));
            }
        }

        if let Some((batch_id, quantity)) = consume {
            state.tracker.consume(&batch_id, quantity)?;
        }
        let record = state.ledger.commit(prepared);
        self.snapshots
            .invalidate_from(record.product_id(), record.occurred_on());

        tracing::info!(
            movement_id = %record.id(),
            product_id = %record.product_id(),
            kind = %record.kind(),
            quantity = %record.quantity(),
            "movement recorded"
        );
        Ok(record)
    }

    /// Register a new batch and its inward movement as one unit.
    pub fn receive_stock(&self, request: ReceiveStock) -> ServiceResult<ReceivedStock> {
        if request.kind.direction() != Direction::Inward {
            return Err(LedgerError::invalid_movement(format!(
                "{} cannot receive stock",
                request.kind
            ))
            .into());
        }

        let mut guard = self.write()?;
        let state = &mut *guard;

        let mut new_batch = request.batch;
        let location = new_batch
            .location
            .clone()
            .unwrap_or_else(|| self.config.default_location.clone());
        new_batch.location = Some(location.clone());

        let batch_id = BatchId::new();
        let prepared = state.ledger.prepare(NewMovement {
            product_id: new_batch.product_id,
            batch_id: Some(batch_id),
            kind: request.kind,
            quantity: new_batch.quantity,
            unit_cost: new_batch.unit_cost,
            occurred_at: new_batch.received_at,
            location: Some(location),
            reference: request.reference,
            notes: request.notes,
        })?;

        let batch = state.tracker.receive(batch_id, new_batch)?;
        let movement = state.ledger.commit(prepared);
        self.snapshots
            .invalidate_from(movement.product_id(), movement.occurred_on());

        tracing::info!(
            batch_id = %batch.id(),
            batch_number = batch.batch_number(),
            movement_id = %movement.id(),
            quantity = %movement.quantity(),
            "stock received"
        );
        Ok(ReceivedStock { batch, movement })
    }

    /// Issue stock from batches picked by layer selection, one outward
    /// movement per batch. Rejects the whole request on any shortfall.
    pub fn issue_stock(&self, request: IssueStock) -> ServiceResult<Vec<MovementRecord>> {
        if request.kind.direction() != Direction::Outward {
            return Err(LedgerError::invalid_movement(format!(
                "{} cannot issue stock",
                request.kind
            ))
            .into());
        }

        let mut guard = self.write()?;
        let state = &mut *guard;

        let product = state.ledger.catalog().require(&request.product_id)?;
        let order = request.order.unwrap_or_else(|| product.consumption_order());
        let plan = state
            .tracker
            .select_for_consumption(product.id, request.quantity, order)?;
        if !plan.is_fully_covered() {
            return Err(LedgerError::InsufficientStock {
                product_id: product.id,
                requested: request.quantity,
                available: plan.selected_quantity(),
            }
            .into());
        }

        let location = request
            .location
            .clone()
            .unwrap_or_else(|| self.config.default_location.clone());

        let mut prepared = Vec::with_capacity(plan.selections.len());
        for selection in &plan.selections {
            state
                .tracker
                .check_consume(&selection.batch_id, selection.quantity)?;
            prepared.push(state.ledger.prepare(NewMovement {
                product_id: product.id,
                batch_id: Some(selection.batch_id),
                kind: request.kind,
                quantity: selection.quantity,
                unit_cost: selection.unit_cost,
                occurred_at: request.occurred_at,
                location: Some(location.clone()),
                reference: request.reference.clone(),
                notes: request.notes.clone(),
            })?);
        }

        let mut records = Vec::with_capacity(prepared.len());
        for (selection, p) in plan.selections.iter().zip(prepared) {
            state.tracker.consume(&selection.batch_id, selection.quantity)?;
            records.push(state.ledger.commit(p));
        }
        self.snapshots
            .invalidate_from(product.id, request.occurred_at.date_naive());

        tracing::info!(
            product_id = %product.id,
            quantity = %request.quantity,
            batches = records.len(),
            order = ?order,
            "stock issued"
        );
        Ok(records)
    }

    /// Exclude a movement from valuation and reports.
    pub fn deactivate_movement(&self, movement_id: MovementId) -> ServiceResult<MovementRecord> {
        let mut guard = self.write()?;
        let record = guard.ledger.deactivate(&movement_id)?;
        self.snapshots
            .invalidate_from(record.product_id(), record.occurred_on());
        Ok(record)
    }

    pub fn movement_history(&self, product_id: ProductId) -> ServiceResult<Vec<MovementRecord>> {
        let guard = self.read()?;
        self.catalog.require(&product_id)?;
        Ok(guard.ledger.history(product_id).to_vec())
    }

    pub fn current_stock(&self, product_id: ProductId) -> ServiceResult<Decimal> {
        Ok(self.read()?.ledger.current_stock(product_id)?)
    }

    // ---- batches ----

    /// Plan which batches would cover `quantity`. Nothing is consumed.
    pub fn select_consumption_layers(
        &self,
        product_id: ProductId,
        quantity: Decimal,
        order: Option<ConsumptionOrder>,
    ) -> ServiceResult<ConsumptionPlan> {
        let product = self.catalog.require(&product_id)?;
        let order = order.unwrap_or_else(|| product.consumption_order());
        Ok(self
            .read()?
            .tracker
            .select_for_consumption(product_id, quantity, order)?)
    }

    /// Decrement a batch directly, without a ledger record.
    pub fn consume_batch(&self, batch_id: BatchId, quantity: Decimal) -> ServiceResult<Batch> {
        Ok(self.write()?.tracker.consume(&batch_id, quantity)?)
    }

    pub fn batch(&self, batch_id: BatchId) -> ServiceResult<Batch> {
        Ok(self.read()?.tracker.get(&batch_id)?.clone())
    }

    pub fn batches_for(&self, product_id: ProductId) -> ServiceResult<Vec<Batch>> {
        Ok(self.read()?.tracker.batches_for(product_id).cloned().collect())
    }

    /// Expire active batches whose expiry date has passed.
    pub fn refresh_batch_expiry(&self, today: NaiveDate) -> ServiceResult<Vec<BatchId>> {
        let expired = self.write()?.tracker.refresh_expiry(today);
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), today = %today, "batches expired");
        }
        Ok(expired)
    }

    pub fn mark_batch_damaged(&self, batch_id: BatchId) -> ServiceResult<Batch> {
        Ok(self.write()?.tracker.mark_damaged(&batch_id)?)
    }

    pub fn mark_batch_returned(&self, batch_id: BatchId) -> ServiceResult<Batch> {
        Ok(self.write()?.tracker.mark_returned(&batch_id)?)
    }

    pub fn reconcile(&self, product_id: ProductId) -> ServiceResult<Reconciliation> {
        let guard = self.read()?;
        let result = reconcile(&guard.ledger, &guard.tracker, product_id)?;
        if !result.is_consistent() {
            tracing::debug!(
                product_id = %product_id,
                difference = %result.difference,
                "ledger and batch stock differ"
            );
        }
        Ok(result)
    }

    // ---- valuation ----

    /// Daily valuation snapshot, stored under `(product, as_of, method)`.
    ///
    /// When the previous day's snapshot for the same method is stored, the
    /// scan continues from its closing state instead of replaying history.
    pub fn compute_valuation(
        &self,
        product_id: ProductId,
        as_of: NaiveDate,
        method: ValuationMethod,
    ) -> ServiceResult<StockValuationSnapshot> {
        let guard = self.read()?;
        self.valuate(&guard.ledger, product_id, as_of, method)
    }

    /// One snapshot per method, in request order, computed in parallel.
    pub fn compare_valuations(
        &self,
        product_id: ProductId,
        as_of: NaiveDate,
        methods: &[ValuationMethod],
    ) -> ServiceResult<Vec<StockValuationSnapshot>> {
        let guard = self.read()?;
        let ledger = &guard.ledger;
        ledger.catalog().require(&product_id)?;

        std::thread::scope(|s| {
            let handles: Vec<_> = methods
                .iter()
                .map(|&method| s.spawn(move || self.valuate(ledger, product_id, as_of, method)))
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        })
    }

    fn valuate(
        &self,
        ledger: &Ledger<Catalog>,
        product_id: ProductId,
        as_of: NaiveDate,
        method: ValuationMethod,
    ) -> ServiceResult<StockValuationSnapshot> {
        let key = SnapshotKey {
            product_id,
            as_of,
            method,
        };

        self.valuation_locks.with_lock(&key, || -> ServiceResult<StockValuationSnapshot> {
            let engine = ValuationEngine::new(ledger);
            let prior = as_of.pred_opt().and_then(|day| {
                self.snapshots.get(&SnapshotKey {
                    product_id,
                    as_of: day,
                    method,
                })
            });

            let snapshot = match prior {
                Some(prior) => engine.compute_from(&prior, as_of)?,
                None => engine.compute(product_id, as_of, method)?,
            };
            self.snapshots.upsert(snapshot.clone());
            Ok(snapshot)
        })
    }

    // ---- alerts ----

    /// Derive alerts for `now` and raise the ones not already open.
    pub fn generate_alerts(&self, now: DateTime<Utc>) -> ServiceResult<Vec<Alert>> {
        let mut guard = self.write()?;
        let state = &mut *guard;

        let candidates = self
            .deriver
            .derive(&state.ledger, &state.tracker, now.date_naive())?;
        let evaluated = candidates.len();
        let raised = state.alerts.raise_all(candidates, now);

        tracing::info!(evaluated, raised = raised.len(), "alerts generated");
        Ok(raised)
    }

    pub fn acknowledge_alert(&self, alert_id: AlertId, now: DateTime<Utc>) -> ServiceResult<Alert> {
        Ok(self.write()?.alerts.acknowledge(&alert_id, now)?)
    }

    pub fn resolve_alert(&self, alert_id: AlertId, now: DateTime<Utc>) -> ServiceResult<Alert> {
        Ok(self.write()?.alerts.resolve(&alert_id, now)?)
    }

    /// Unresolved alerts, most urgent first.
    pub fn open_alerts(&self) -> ServiceResult<Vec<Alert>> {
        Ok(self.read()?.alerts.open().into_iter().cloned().collect())
    }
}
