//! Inventory ledger and valuation domain.
//!
//! Pure, deterministic domain logic: an append-only movement ledger, batch
//! tracking, FIFO/LIFO/weighted-average valuation and alert derivation.
//! No IO and no locking; callers that share state wrap it (see the infra crate).

pub mod alerts;
pub mod batch;
pub mod layers;
pub mod ledger;
pub mod movement;
pub mod product;
pub mod reconcile;
pub mod tracker;
pub mod valuation;

pub use alerts::{
    Alert, AlertBook, AlertCandidate, AlertDeriver, AlertKey, AlertLevel, AlertPolicy, AlertType,
};
pub use batch::{Batch, BatchStatus, NewBatch};
pub use layers::{Allocation, ConsumptionOrder, CostLayer, LayerQueue, allocate};
pub use ledger::{Ledger, PreparedMovement, RunningBalance};
pub use movement::{Direction, MovementKind, MovementRecord, MovementReference, NewMovement};
pub use product::{InMemoryProductCatalog, Product, ProductCatalog, StockThresholds};
pub use reconcile::{Reconciliation, reconcile};
pub use tracker::{BatchTracker, ConsumptionPlan, LayerSelection};
pub use valuation::{
    NegativeStockWarning, SnapshotKey, StockValuationSnapshot, ValuationEngine, ValuationMethod,
};
