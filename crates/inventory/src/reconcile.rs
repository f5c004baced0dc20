//! Ledger vs. batch stock cross-check.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{LedgerResult, ProductId};

use crate::ledger::Ledger;
use crate::product::ProductCatalog;
use crate::tracker::BatchTracker;

/// Ledger stock against the sum of remaining quantity over active batches.
///
/// Stock moved without a batch reference shows up as a difference; that is
/// expected for products not tracked by batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub product_id: ProductId,
    pub ledger_stock: Decimal,
    pub batch_stock: Decimal,
    pub difference: Decimal,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.difference.is_zero()
    }
}

pub fn reconcile<C: ProductCatalog>(
    ledger: &Ledger<C>,
    tracker: &BatchTracker,
    product_id: ProductId,
) -> LedgerResult<Reconciliation> {
    let ledger_stock = ledger.current_stock(product_id)?;
    let batch_stock = tracker.remaining_for(product_id);
    Ok(Reconciliation {
        product_id,
        ledger_stock,
        batch_stock,
        difference: ledger_stock - batch_stock,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::NewBatch;
    use crate::movement::{MovementKind, NewMovement};
    use crate::product::{InMemoryProductCatalog, Product};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use stockledger_core::BatchId;
    use std::sync::Arc;

    #[test]
    fn unbatched_movements_show_as_difference() {
        let catalog = Arc::new(InMemoryProductCatalog::new());
        let p = Product::new(ProductId::new(), "SKU-R", "Reconciled");
        catalog.upsert(p.clone()).unwrap();
        let mut ledger = Ledger::new(catalog);
        let mut tracker = BatchTracker::new();
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();

        let batch = BatchId::new();
        tracker.receive(batch, NewBatch::new("R-1", p.id, dec!(10), dec!(2), at)).unwrap();
        let receipt = NewMovement::new(p.id, MovementKind::PurchaseReceipt, dec!(10), dec!(2), at)
            .with_batch(batch);
        ledger.append(receipt).unwrap();
        assert!(reconcile(&ledger, &tracker, p.id).unwrap().is_consistent());

        ledger
            .append(NewMovement::new(p.id, MovementKind::AdjustmentNegative, dec!(3), dec!(2), at))
            .unwrap();
        let r = reconcile(&ledger, &tracker, p.id).unwrap();
        assert_eq!((r.ledger_stock, r.batch_stock, r.difference), (dec!(7), dec!(10), dec!(-3)));
    }
}
