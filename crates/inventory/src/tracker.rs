use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{BatchId, LedgerError, LedgerResult, ProductId};

use crate::batch::{Batch, NewBatch};
use crate::layers::{ConsumptionOrder, allocate};

/// One `(batch, quantity)` pair picked for consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSelection {
    pub batch_id: BatchId,
    pub batch_number: String,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

/// Answer to a layer-matching query. Nothing is consumed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionPlan {
    pub product_id: ProductId,
    pub order: ConsumptionOrder,
    pub selections: Vec<LayerSelection>,
    /// Requested quantity not covered by existing stock (0 when covered).
    pub shortfall: Decimal,
}

impl ConsumptionPlan {
    pub fn is_fully_covered(&self) -> bool {
        self.shortfall.is_zero()
    }

    pub fn selected_quantity(&self) -> Decimal {
        self.selections.iter().map(|s| s.quantity).sum()
    }

    pub fn selected_value(&self) -> Decimal {
        self.selections.iter().map(|s| s.quantity * s.unit_cost).sum()
    }
}

/// Per-product batch registry.
///
/// Batches are kept in registration order per product; `active_layers` sorts
/// that list by `received_at` (stable, so ties keep registration order).
#[derive(Debug, Clone, Default)]
pub struct BatchTracker {
    batches: HashMap<BatchId, Batch>,
    by_product: HashMap<ProductId, Vec<BatchId>>,
}

impl BatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a receipt without registering it.
    pub fn check_receive(&self, new: &NewBatch) -> LedgerResult<()> {
        let duplicate = self
            .batches_for(new.product_id)
            .any(|b| b.batch_number() == new.batch_number);
        if duplicate {
            return Err(LedgerError::DuplicateBatch {
                product_id: new.product_id,
                batch_number: new.batch_number.clone(),
            });
        }
        Ok(())
    }

    /// Register a received batch.
    pub fn receive(&mut self, id: BatchId, new: NewBatch) -> LedgerResult<Batch> {
        self.check_receive(&new)?;
        let batch = Batch::receive(id, new)?;

        self.by_product.entry(batch.product_id()).or_default().push(id);
        self.batches.insert(id, batch.clone());

        tracing::debug!(
            batch_id = %id,
            batch_number = batch.batch_number(),
            product_id = %batch.product_id(),
            quantity = %batch.initial_quantity(),
            "batch received"
        );
        Ok(batch)
    }

    pub fn get(&self, batch_id: &BatchId) -> LedgerResult<&Batch> {
        self.batches
            .get(batch_id)
            .ok_or(LedgerError::BatchNotFound(*batch_id))
    }

    /// All batches of a product, in registration order.
    pub fn batches_for(&self, product_id: ProductId) -> impl Iterator<Item = &Batch> + '_ {
        self.by_product
            .get(&product_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.batches.get(id))
    }

    /// Active batches with stock, oldest `received_at` first.
    pub fn active_layers(&self, product_id: ProductId) -> Vec<&Batch> {
        let mut layers: Vec<&Batch> = self
            .batches_for(product_id)
            .filter(|b| b.is_available())
            .collect();
        layers.sort_by_key(|b| b.received_at());
        layers
    }

    /// Total remaining quantity over the product's active layers.
    pub fn remaining_for(&self, product_id: ProductId) -> Decimal {
        self.active_layers(product_id)
            .iter()
            .map(|b| b.remaining_quantity())
            .sum()
    }

    /// Pick layers covering `required` without mutating anything.
    pub fn select_for_consumption(
        &self,
        product_id: ProductId,
        required: Decimal,
        order: ConsumptionOrder,
    ) -> LedgerResult<ConsumptionPlan> {
        if required <= Decimal::ZERO {
            return Err(LedgerError::invalid_movement(format!(
                "required quantity must be positive, got {required}"
            )));
        }

        let layers = self.active_layers(product_id);
        let available: Vec<Decimal> = layers.iter().map(|b| b.remaining_quantity()).collect();
        let allocation = allocate(&available, required, order);

        let selections = allocation
            .takes
            .into_iter()
            .map(|(idx, quantity)| {
                let b = layers[idx];
                LayerSelection {
                    batch_id: b.id(),
                    batch_number: b.batch_number().to_string(),
                    quantity,
                    unit_cost: b.unit_cost(),
                }
            })
            .collect();

        Ok(ConsumptionPlan {
            product_id,
            order,
            selections,
            shortfall: allocation.shortfall,
        })
    }

    pub fn check_consume(&self, batch_id: &BatchId, quantity: Decimal) -> LedgerResult<()> {
        self.get(batch_id)?.check_consume(quantity)
    }

    /// Decrement one batch. Fails without side effects when over-consuming.
    pub fn consume(&mut self, batch_id: &BatchId, quantity: Decimal) -> LedgerResult<Batch> {
        let batch = self
            .batches
            .get_mut(batch_id)
            .ok_or(LedgerError::BatchNotFound(*batch_id))?;
        batch.consume(quantity)?;

        tracing::debug!(
            batch_id = %batch_id,
            consumed = %quantity,
            remaining = %batch.remaining_quantity(),
            status = ?batch.status(),
            "batch consumed"
        );
        Ok(batch.clone())
    }

    /// Expire every active batch whose expiry date is before `today`.
    pub fn refresh_expiry(&mut self, today: NaiveDate) -> Vec<BatchId> {
        let mut expired: Vec<BatchId> = self
            .batches
            .values_mut()
            .filter_map(|b| b.refresh_expiry(today).then(|| b.id()))
            .collect();
        expired.sort();
        expired
    }

    pub fn mark_damaged(&mut self, batch_id: &BatchId) -> LedgerResult<Batch> {
        let batch = self
            .batches
            .get_mut(batch_id)
            .ok_or(LedgerError::BatchNotFound(*batch_id))?;
        batch.mark_damaged()?;
        Ok(batch.clone())
    }

    pub fn mark_returned(&mut self, batch_id: &BatchId) -> LedgerResult<Batch> {
        let batch = self
            .batches
            .get_mut(batch_id)
            .ok_or(LedgerError::BatchNotFound(*batch_id))?;
        batch.mark_returned()?;
        Ok(batch.clone())
    }

    /// Available batches whose expiry falls within `[today, today + horizon_days]`.
    pub fn expiring_within(&self, today: NaiveDate, horizon_days: i64) -> Vec<&Batch> {
        let mut batches: Vec<&Batch> = self
            .batches
            .values()
            .filter(|b| b.is_available())
            .filter(|b| {
                matches!(b.days_until_expiry(today), Some(d) if (0..=horizon_days).contains(&d))
            })
            .collect();
        batches.sort_by_key(|b| (b.expires_at(), b.id()));
        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, d, 10, 0, 0).unwrap()
    }

    fn tracker_with_two_layers() -> (BatchTracker, ProductId, BatchId, BatchId) {
        let mut t = BatchTracker::new();
        let p = ProductId::new();
        let (old, new) = (BatchId::new(), BatchId::new());
        // Registered newest first; received_at decides the layer order.
        t.receive(new, NewBatch::new("B-NEW", p, dec!(10), dec!(8), day(2))).unwrap();
        t.receive(old, NewBatch::new("B-OLD", p, dec!(10), dec!(5), day(1))).unwrap();
        (t, p, old, new)
    }

    #[test]
    fn active_layers_are_oldest_first() {
        let (t, p, old, new) = tracker_with_two_layers();
        let ids: Vec<_> = t.active_layers(p).iter().map(|b| b.id()).collect();
        assert_eq!(ids, vec![old, new]);
    }

    #[test]
    fn oldest_first_selection_matches_fifo() {
        let (t, p, old, new) = tracker_with_two_layers();
        let plan = t.select_for_consumption(p, dec!(15), ConsumptionOrder::OldestFirst).unwrap();

        let picked: Vec<_> = plan.selections.iter().map(|s| (s.batch_id, s.quantity)).collect();
        assert_eq!(picked, vec![(old, dec!(10)), (new, dec!(5))]);
        assert_eq!(plan.selected_value(), dec!(90));
        assert!(plan.is_fully_covered());
    }

    #[test]
    fn newest_first_selection_matches_lifo() {
        let (t, p, old, new) = tracker_with_two_layers();
        let plan = t.select_for_consumption(p, dec!(15), ConsumptionOrder::NewestFirst).unwrap();

        let picked: Vec<_> = plan.selections.iter().map(|s| (s.batch_id, s.quantity)).collect();
        assert_eq!(picked, vec![(new, dec!(10)), (old, dec!(5))]);
        assert_eq!(plan.selected_value(), dec!(105));
    }

    #[test]
    fn selection_reports_shortfall_and_does_not_mutate() {
        let (t, p, _, _) = tracker_with_two_layers();
        let plan = t.select_for_consumption(p, dec!(26), ConsumptionOrder::OldestFirst).unwrap();
        assert_eq!(plan.shortfall, dec!(6));
        assert_eq!(t.remaining_for(p), dec!(20));
    }

    #[test]
    fn consumed_batches_drop_out_of_layers() {
        let (mut t, p, old, new) = tracker_with_two_layers();
        t.consume(&old, dec!(10)).unwrap();
        let ids: Vec<_> = t.active_layers(p).iter().map(|b| b.id()).collect();
        assert_eq!(ids, vec![new]);
    }

    #[test]
    fn unknown_batch_is_reported() {
        let mut t = BatchTracker::new();
        let id = BatchId::new();
        assert_eq!(t.consume(&id, dec!(1)).unwrap_err(), LedgerError::BatchNotFound(id));
    }

    #[test]
    fn batch_numbers_are_unique_per_product() {
        let (mut t, p, _, _) = tracker_with_two_layers();
        let err = t
            .receive(BatchId::new(), NewBatch::new("B-OLD", p, dec!(1), dec!(1), day(3)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateBatch { .. }));

        // Same number on another product is fine.
        let elsewhere = NewBatch::new("B-OLD", ProductId::new(), dec!(1), dec!(1), day(3));
        t.receive(BatchId::new(), elsewhere).unwrap();
    }

    #[test]
    fn expiring_within_honours_the_horizon() {
        let mut t = BatchTracker::new();
        let p = ProductId::new();
        let today = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        for (n, days) in [("E-5", 5), ("E-30", 30), ("E-31", 31)] {
            let new = NewBatch::new(n, p, dec!(1), dec!(1), day(1))
                .with_dates(None, Some(today + chrono::Days::new(days)));
            t.receive(BatchId::new(), new).unwrap();
        }

        let numbers: Vec<_> = t
            .expiring_within(today, 30)
            .iter()
            .map(|b| b.batch_number().to_string())
            .collect();
        assert_eq!(numbers, vec!["E-5", "E-30"]);
    }
}
