//! Append-only movement ledger.
//!
//! Records are kept per product in `(occurred_at, sequence)` order. The
//! sequence is ledger-wide and strictly increasing, so records sharing a
//! timestamp keep their insertion order.

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{LedgerError, LedgerResult, MovementId, ProductId};

use crate::movement::{MovementRecord, NewMovement};
use crate::product::ProductCatalog;

/// Signed stock and value accumulated over a record scan.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningBalance {
    pub stock: Decimal,
    pub value: Decimal,
}

/// A validated record that has not been committed yet.
///
/// Holding one does not change the ledger; `Ledger::commit` is infallible, so
/// a caller can apply related effects (batch consumption) in between and
/// still commit or drop as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct PreparedMovement {
    record: MovementRecord,
}

impl PreparedMovement {
    pub fn record(&self) -> &MovementRecord {
        &self.record
    }
}

/// Lazy, restartable scan over a product's active records.
///
/// Cloning the iterator restarts from the same position.
#[derive(Debug, Clone)]
pub struct RecordsUpTo<'a> {
    inner: std::slice::Iter<'a, MovementRecord>,
    from: Option<NaiveDate>,
    to: NaiveDate,
}

impl<'a> Iterator for RecordsUpTo<'a> {
    type Item = &'a MovementRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = self.inner.next()?;
            let day = record.occurred_on();
            if day > self.to {
                // Sorted storage: nothing later can qualify.
                return None;
            }
            if !record.is_active() || self.from.is_some_and(|from| day < from) {
                continue;
            }
            return Some(record);
        }
    }
}

/// Movement ledger over a product catalog.
#[derive(Debug)]
pub struct Ledger<C> {
    catalog: C,
    records: HashMap<ProductId, Vec<MovementRecord>>,
    index: HashMap<MovementId, ProductId>,
    /// Per product: sum of absolute quantities and absolute total costs over
    /// every record. Any partial sum a scan computes is bounded by it.
    gross: HashMap<ProductId, RunningBalance>,
    next_sequence: u64,
}

impl<C: ProductCatalog> Ledger<C> {
    pub fn new(catalog: C) -> Self {
        Self {
            catalog,
            records: HashMap::new(),
            index: HashMap::new(),
            gross: HashMap::new(),
            next_sequence: 1,
        }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Validate a movement and assign its id, without storing it.
    ///
    /// The final sequence number is assigned by `commit`, so prepared
    /// movements take their tie-break order from commit order.
    pub fn prepare(&self, new: NewMovement) -> LedgerResult<PreparedMovement> {
        self.catalog.require(&new.product_id)?;
        let record = MovementRecord::from_new(MovementId::new(), self.next_sequence, new)?;
        self.gross_with(&record)?;
        Ok(PreparedMovement { record })
    }

    /// Product gross totals after adding `record`.
    fn gross_with(&self, record: &MovementRecord) -> LedgerResult<RunningBalance> {
        let gross = self.gross.get(&record.product_id()).copied().unwrap_or_default();
        let stock = gross.stock.checked_add(record.quantity().abs());
        let value = gross.value.checked_add(record.total_cost().abs());
        match (stock, value) {
            (Some(stock), Some(value)) => Ok(RunningBalance { stock, value }),
            _ => Err(LedgerError::invalid_movement(format!(
                "movement would take product {} totals past the decimal range",
                record.product_id()
            ))),
        }
    }

    /// Store a prepared movement.
    pub fn commit(&mut self, prepared: PreparedMovement) -> MovementRecord {
        let record = prepared.record.with_sequence(self.next_sequence);
        self.next_sequence += 1;

        let gross = self.gross.entry(record.product_id()).or_default();
        gross.stock = gross.stock.saturating_add(record.quantity().abs());
        gross.value = gross.value.saturating_add(record.total_cost().abs());

        let records = self.records.entry(record.product_id()).or_default();
        let key = record.order_key();
        let pos = records.partition_point(|r| r.order_key() <= key);
        records.insert(pos, record.clone());
        self.index.insert(record.id(), record.product_id());

        tracing::debug!(
            movement_id = %record.id(),
            product_id = %record.product_id(),
            kind = %record.kind(),
            quantity = %record.quantity(),
            sequence = record.sequence(),
            "movement appended"
        );
        record
    }

    /// Validate, normalize and store a movement.
    pub fn append(&mut self, new: NewMovement) -> LedgerResult<MovementRecord> {
        let prepared = self.prepare(new)?;
        Ok(self.commit(prepared))
    }

    /// Active records for a product up to and including `as_of`.
    pub fn records_up_to(
        &self,
        product_id: ProductId,
        as_of: NaiveDate,
    ) -> LedgerResult<RecordsUpTo<'_>> {
        self.catalog.require(&product_id)?;
        Ok(self.scan(product_id, None, as_of))
    }

    /// Active records for a product within `[from, to]`.
    pub fn records_between(
        &self,
        product_id: ProductId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> LedgerResult<RecordsUpTo<'_>> {
        if to < from {
            return Err(LedgerError::invalid_date_range(format!(
                "date_to {to} is before date_from {from}"
            )));
        }
        self.catalog.require(&product_id)?;
        Ok(self.scan(product_id, Some(from), to))
    }

    fn scan(
        &self,
        product_id: ProductId,
        from: Option<NaiveDate>,
        to: NaiveDate,
    ) -> RecordsUpTo<'_> {
        let slice = self.records.get(&product_id).map(Vec::as_slice).unwrap_or(&[]);
        RecordsUpTo {
            inner: slice.iter(),
            from,
            to,
        }
    }

    /// Every record of a product, inactive ones included.
    pub fn history(&self, product_id: ProductId) -> &[MovementRecord] {
        self.records.get(&product_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Signed stock and value as of the end of `as_of`.
    pub fn running_balance(
        &self,
        product_id: ProductId,
        as_of: NaiveDate,
    ) -> LedgerResult<RunningBalance> {
        Ok(self
            .records_up_to(product_id, as_of)?
            .fold(RunningBalance::default(), |acc, r| RunningBalance {
                stock: acc.stock + r.quantity(),
                value: acc.value + r.total_cost(),
            }))
    }

    /// Stock over all active records.
    pub fn current_stock(&self, product_id: ProductId) -> LedgerResult<Decimal> {
        self.catalog.require(&product_id)?;
        Ok(self
            .history(product_id)
            .iter()
            .filter(|r| r.is_active())
            .map(MovementRecord::quantity)
            .sum())
    }

    pub fn get(&self, movement_id: &MovementId) -> LedgerResult<&MovementRecord> {
        let product_id = self
            .index
            .get(movement_id)
            .ok_or(LedgerError::MovementNotFound(*movement_id))?;
        self.history(*product_id)
            .iter()
            .find(|r| r.id() == *movement_id)
            .ok_or(LedgerError::MovementNotFound(*movement_id))
    }

    /// Exclude a record from reports and valuation. It stays in `history`.
    pub fn deactivate(&mut self, movement_id: &MovementId) -> LedgerResult<MovementRecord> {
        let product_id = *self
            .index
            .get(movement_id)
            .ok_or(LedgerError::MovementNotFound(*movement_id))?;
        let record = self
            .records
            .get_mut(&product_id)
            .and_then(|rs| rs.iter_mut().find(|r| r.id() == *movement_id))
            .ok_or(LedgerError::MovementNotFound(*movement_id))?;

        if record.is_active() {
            record.deactivate();
            tracing::info!(
                movement_id = %movement_id,
                product_id = %product_id,
                "movement deactivated"
            );
        }
        Ok(record.clone())
    }

    /// Products that have at least one record.
    pub fn products(&self) -> Vec<ProductId> {
        let mut ids: Vec<ProductId> = self.records.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::MovementKind;
    use crate::product::{InMemoryProductCatalog, Product};
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, day, hour, 0, 0).unwrap()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, day).unwrap()
    }

    fn setup() -> (Ledger<Arc<InMemoryProductCatalog>>, ProductId) {
        let catalog = Arc::new(InMemoryProductCatalog::new());
        let product_id = ProductId::new();
        catalog.upsert(Product::new(product_id, "SKU-1", "Widget")).unwrap();
        (Ledger::new(catalog), product_id)
    }

    fn mv(
        p: ProductId,
        kind: MovementKind,
        qty: Decimal,
        cost: Decimal,
        when: DateTime<Utc>,
    ) -> NewMovement {
        NewMovement::new(p, kind, qty, cost, when)
    }

    #[test]
    fn sales_issue_with_positive_quantity_is_stored_negative() {
        let (mut ledger, p) = setup();
        let rec = ledger
            .append(mv(p, MovementKind::SalesIssue, dec!(3), dec!(2), at(1, 9)))
            .unwrap();
        assert_eq!(rec.quantity(), dec!(-3));
        assert_eq!(rec.total_cost(), dec!(-6));
    }

    #[test]
    fn unknown_product_is_not_found() {
        let (mut ledger, _) = setup();
        let other = ProductId::new();
        let err = ledger
            .append(mv(other, MovementKind::PurchaseReceipt, dec!(1), dec!(1), at(1, 9)))
            .unwrap_err();
        assert_eq!(err, LedgerError::ProductNotFound(other));
    }

    #[test]
    fn records_are_ordered_by_time_then_insertion() {
        let (mut ledger, p) = setup();
        let late = ledger
            .append(mv(p, MovementKind::PurchaseReceipt, dec!(1), dec!(1), at(3, 9)))
            .unwrap();
        let first = ledger
            .append(mv(p, MovementKind::PurchaseReceipt, dec!(2), dec!(1), at(2, 9)))
            .unwrap();
        let second = ledger
            .append(mv(p, MovementKind::SalesIssue, dec!(1), dec!(1), at(2, 9)))
            .unwrap();

        let ids: Vec<_> = ledger.records_up_to(p, date(3)).unwrap().map(|r| r.id()).collect();
        assert_eq!(ids, vec![first.id(), second.id(), late.id()]);
        assert!(first.sequence() < second.sequence());
    }

    #[test]
    fn records_up_to_is_inclusive_and_restartable() {
        let (mut ledger, p) = setup();
        ledger.append(mv(p, MovementKind::OpeningStock, dec!(5), dec!(1), at(1, 23))).unwrap();
        ledger.append(mv(p, MovementKind::PurchaseReceipt, dec!(5), dec!(1), at(2, 0))).unwrap();

        let scan = ledger.records_up_to(p, date(1)).unwrap();
        let again = scan.clone();
        assert_eq!(scan.count(), 1);
        assert_eq!(again.count(), 1);
        assert_eq!(ledger.records_up_to(p, date(2)).unwrap().count(), 2);
    }

    #[test]
    fn running_balance_accumulates_signed_values() {
        let (mut ledger, p) = setup();
        ledger.append(mv(p, MovementKind::PurchaseReceipt, dec!(10), dec!(5), at(1, 9))).unwrap();
        ledger.append(mv(p, MovementKind::SalesIssue, dec!(4), dec!(5), at(2, 9))).unwrap();

        let bal = ledger.running_balance(p, date(2)).unwrap();
        assert_eq!(bal, RunningBalance { stock: dec!(6), value: dec!(30) });
        assert_eq!(ledger.running_balance(p, date(1)).unwrap().stock, dec!(10));
    }

    #[test]
    fn records_between_rejects_inverted_range() {
        let (ledger, p) = setup();
        let err = ledger.records_between(p, date(5), date(4)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidDateRange(_)));
    }

    #[test]
    fn deactivated_records_leave_scans_but_stay_in_history() {
        let (mut ledger, p) = setup();
        let keep = ledger
            .append(mv(p, MovementKind::PurchaseReceipt, dec!(10), dec!(1), at(1, 9)))
            .unwrap();
        let drop = ledger
            .append(mv(p, MovementKind::AdjustmentNegative, dec!(4), dec!(1), at(1, 10)))
            .unwrap();

        ledger.deactivate(&drop.id()).unwrap();
        ledger.deactivate(&drop.id()).unwrap();

        assert_eq!(ledger.current_stock(p).unwrap(), dec!(10));
        assert_eq!(ledger.history(p).len(), 2);
        assert!(ledger.get(&keep.id()).unwrap().is_active());
        assert!(!ledger.get(&drop.id()).unwrap().is_active());
    }

    #[test]
    fn total_cost_past_the_decimal_range_is_rejected() {
        let (mut ledger, p) = setup();
        let err = ledger
            .append(mv(p, MovementKind::PurchaseReceipt, Decimal::MAX, dec!(2), at(1, 9)))
            .unwrap_err();

        assert!(matches!(err, LedgerError::InvalidMovement(_)));
        assert!(ledger.is_empty());
    }

    #[test]
    fn product_totals_past_the_decimal_range_are_rejected() {
        let (mut ledger, p) = setup();
        ledger
            .append(mv(p, MovementKind::PurchaseReceipt, Decimal::MAX, dec!(1), at(1, 9)))
            .unwrap();
        let err = ledger
            .append(mv(p, MovementKind::SalesIssue, Decimal::MAX, dec!(0), at(1, 10)))
            .unwrap_err();

        assert!(matches!(err, LedgerError::InvalidMovement(_)));
        assert_eq!(ledger.current_stock(p).unwrap(), Decimal::MAX);
    }

    #[test]
    fn prepare_does_not_touch_the_ledger() {
        let (ledger, p) = setup();
        let prepared = ledger
            .prepare(mv(p, MovementKind::PurchaseReceipt, dec!(1), dec!(1), at(1, 9)))
            .unwrap();
        assert_eq!(prepared.record().quantity(), dec!(1));
        assert!(ledger.is_empty());
    }
}
