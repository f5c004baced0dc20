use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;

use stockledger_core::ProductId;
use stockledger_inventory::{SnapshotKey, StockValuationSnapshot, ValuationMethod};

/// Keyed storage for computed valuation snapshots.
///
/// Snapshots are derived data: any of them can be dropped and recomputed
/// from the ledger.
pub trait SnapshotStore: Send + Sync {
    fn get(&self, key: &SnapshotKey) -> Option<StockValuationSnapshot>;
    /// Insert or replace the snapshot stored under `snapshot.key()`.
    fn upsert(&self, snapshot: StockValuationSnapshot);
    /// Snapshots of a product ordered by `(as_of, method)`.
    fn list(&self, product_id: ProductId) -> Vec<StockValuationSnapshot>;
    /// Drop every snapshot of a product dated `from` or later.
    fn invalidate_from(&self, product_id: ProductId, from: NaiveDate);
}

impl<S> SnapshotStore for Arc<S>
where
    S: SnapshotStore + ?Sized,
{
    fn get(&self, key: &SnapshotKey) -> Option<StockValuationSnapshot> {
        (**self).get(key)
    }

    fn upsert(&self, snapshot: StockValuationSnapshot) {
        (**self).upsert(snapshot)
    }

    fn list(&self, product_id: ProductId) -> Vec<StockValuationSnapshot> {
        (**self).list(product_id)
    }

    fn invalidate_from(&self, product_id: ProductId, from: NaiveDate) {
        (**self).invalidate_from(product_id, from)
    }
}

/// In-memory snapshot store for tests/dev and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    inner: RwLock<BTreeMap<SnapshotKey, StockValuationSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn product_range(
        product_id: ProductId,
        from: NaiveDate,
    ) -> std::ops::RangeFrom<SnapshotKey> {
        SnapshotKey {
            product_id,
            as_of: from,
            method: ValuationMethod::ALL[0],
        }..
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn get(&self, key: &SnapshotKey) -> Option<StockValuationSnapshot> {
        let map = self.inner.read().ok()?;
        map.get(key).cloned()
    }

    fn upsert(&self, snapshot: StockValuationSnapshot) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(snapshot.key(), snapshot);
        }
    }

    fn list(&self, product_id: ProductId) -> Vec<StockValuationSnapshot> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        map.range(Self::product_range(product_id, NaiveDate::MIN))
            .take_while(|(k, _)| k.product_id == product_id)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn invalidate_from(&self, product_id: ProductId, from: NaiveDate) {
        if let Ok(mut map) = self.inner.write() {
            let stale: Vec<SnapshotKey> = map
                .range(Self::product_range(product_id, from))
                .take_while(|(k, _)| k.product_id == product_id)
                .map(|(k, _)| *k)
                .collect();
            for key in &stale {
                map.remove(key);
            }
            if !stale.is_empty() {
                tracing::debug!(
                    product_id = %product_id,
                    from = %from,
                    dropped = stale.len(),
                    "valuation snapshots invalidated"
                );
            }
        }
    }
}
