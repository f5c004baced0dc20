//! Stock and expiry alerting derived from ledger and batch state.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{AlertId, BatchId, LedgerError, LedgerResult, ProductId};

use crate::batch::Batch;
use crate::ledger::Ledger;
use crate::product::{Product, ProductCatalog};
use crate::tracker::BatchTracker;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    LowStock,
    OutOfStock,
    ReorderPoint,
    Overstock,
    ExpiryWarning,
    NegativeStock,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// Uniqueness key for unresolved alerts. `batch_id` is set for expiry only.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub product_id: ProductId,
    pub alert_type: AlertType,
    pub batch_id: Option<BatchId>,
}

/// An alert the deriver wants raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertCandidate {
    pub product_id: ProductId,
    pub batch_id: Option<BatchId>,
    pub alert_type: AlertType,
    pub alert_level: AlertLevel,
    pub priority: u8,
    pub message: String,
    pub current_quantity: Decimal,
    pub threshold: Option<Decimal>,
}

impl AlertCandidate {
    pub fn key(&self) -> AlertKey {
        AlertKey {
            product_id: self.product_id,
            alert_type: self.alert_type,
            batch_id: self.batch_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub product_id: ProductId,
    pub batch_id: Option<BatchId>,
    pub alert_type: AlertType,
    pub alert_level: AlertLevel,
    pub priority: u8,
    pub message: String,
    pub current_quantity: Decimal,
    pub threshold: Option<Decimal>,
    pub raised_at: DateTime<Utc>,
    pub is_acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    fn from_candidate(id: AlertId, c: AlertCandidate, now: DateTime<Utc>) -> Self {
        Self {
            id,
            product_id: c.product_id,
            batch_id: c.batch_id,
            alert_type: c.alert_type,
            alert_level: c.alert_level,
            priority: c.priority,
            message: c.message,
            current_quantity: c.current_quantity,
            threshold: c.threshold,
            raised_at: now,
            is_acknowledged: false,
            acknowledged_at: None,
            is_resolved: false,
            resolved_at: None,
        }
    }

    pub fn key(&self) -> AlertKey {
        AlertKey {
            product_id: self.product_id,
            alert_type: self.alert_type,
            batch_id: self.batch_id,
        }
    }
}

/// Expiry horizon and level cut-offs (days).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPolicy {
    pub expiry_horizon_days: i64,
    pub expiry_critical_days: i64,
    pub expiry_warning_days: i64,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            expiry_horizon_days: 30,
            expiry_critical_days: 7,
            expiry_warning_days: 15,
        }
    }
}

/// Read-only alert rules.
#[derive(Debug, Clone, Default)]
pub struct AlertDeriver {
    policy: AlertPolicy,
}

impl AlertDeriver {
    pub fn new(policy: AlertPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// Stock rule for one product. First matching rule wins:
    /// negative, out of stock, reorder point, low stock, overstock.
    pub fn stock_alert(&self, product: &Product, stock: Decimal) -> Option<AlertCandidate> {
        let t = &product.thresholds;
        let candidate =
            |alert_type, alert_level, priority, threshold: Option<Decimal>, message: String| {
                AlertCandidate {
                    product_id: product.id,
                    batch_id: None,
                    alert_type,
                    alert_level,
                    priority,
                    message,
                    current_quantity: stock,
                    threshold,
                }
            };

        if stock < Decimal::ZERO {
            return Some(candidate(
                AlertType::NegativeStock,
                AlertLevel::Critical,
                9,
                None,
                format!("{} has negative stock ({stock})", product.sku),
            ));
        }
        if stock.is_zero() {
            return Some(candidate(
                AlertType::OutOfStock,
                AlertLevel::Critical,
                10,
                None,
                format!("{} is out of stock", product.sku),
            ));
        }
        if stock <= t.reorder_point {
            return Some(candidate(
                AlertType::ReorderPoint,
                AlertLevel::Warning,
                6,
                Some(t.reorder_point),
                format!("{} stock {stock} reached reorder point {}", product.sku, t.reorder_point),
            ));
        }
        if stock <= t.minimum_stock_level {
            return Some(candidate(
                AlertType::LowStock,
                AlertLevel::Warning,
                7,
                Some(t.minimum_stock_level),
                format!(
                    "{} stock {stock} is at or below minimum {}",
                    product.sku, t.minimum_stock_level
                ),
            ));
        }
        match t.maximum_stock_level {
            Some(max) if stock > max => Some(candidate(
                AlertType::Overstock,
                AlertLevel::Info,
                3,
                Some(max),
                format!("{} stock {stock} exceeds maximum {max}", product.sku),
            )),
            _ => None,
        }
    }

    /// Expiry rule for one batch; `None` outside the horizon or without stock.
    pub fn expiry_alert(&self, batch: &Batch, today: NaiveDate) -> Option<AlertCandidate> {
        if !batch.is_available() {
            return None;
        }
        let days = batch.days_until_expiry(today)?;
        if !(0..=self.policy.expiry_horizon_days).contains(&days) {
            return None;
        }

        let (alert_level, priority) = if days <= self.policy.expiry_critical_days {
            (AlertLevel::Critical, 8)
        } else if days <= self.policy.expiry_warning_days {
            (AlertLevel::Warning, 5)
        } else {
            (AlertLevel::Info, 5)
        };

        Some(AlertCandidate {
            product_id: batch.product_id(),
            batch_id: Some(batch.id()),
            alert_type: AlertType::ExpiryWarning,
            alert_level,
            priority,
            message: format!(
                "batch {} expires in {days} day(s) with {} remaining",
                batch.batch_number(),
                batch.remaining_quantity()
            ),
            current_quantity: batch.remaining_quantity(),
            threshold: None,
        })
    }

    /// Evaluate every active product and every expiring batch.
    pub fn derive<C: ProductCatalog>(
        &self,
        ledger: &Ledger<C>,
        tracker: &BatchTracker,
        today: NaiveDate,
    ) -> LedgerResult<Vec<AlertCandidate>> {
        let mut out = Vec::new();

        for product in ledger.catalog().list().into_iter().filter(|p| p.is_active) {
            let stock = ledger.current_stock(product.id)?;
            out.extend(self.stock_alert(&product, stock));
        }

        for batch in tracker.expiring_within(today, self.policy.expiry_horizon_days) {
            let product = ledger.catalog().require(&batch.product_id())?;
            if !product.is_active {
                continue;
            }
            out.extend(self.expiry_alert(batch, today));
        }

        Ok(out)
    }
}

/// Raised alerts plus the one-unresolved-per-key index.
#[derive(Debug, Clone, Default)]
pub struct AlertBook {
    alerts: Vec<Alert>,
    positions: HashMap<AlertId, usize>,
    open: HashMap<AlertKey, AlertId>,
}

impl AlertBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise a candidate unless an unresolved alert already holds its key.
    pub fn raise(&mut self, candidate: AlertCandidate, now: DateTime<Utc>) -> Option<Alert> {
        let key = candidate.key();
        if self.open.contains_key(&key) {
            return None;
        }

        let alert = Alert::from_candidate(AlertId::new(), candidate, now);
        self.open.insert(key, alert.id);
        self.positions.insert(alert.id, self.alerts.len());
        self.alerts.push(alert.clone());
        Some(alert)
    }

    /// Raise every candidate, returning only the newly created alerts.
    pub fn raise_all(
        &mut self,
        candidates: impl IntoIterator<Item = AlertCandidate>,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        candidates
            .into_iter()
            .filter_map(|c| self.raise(c, now))
            .collect()
    }

    pub fn get(&self, id: &AlertId) -> LedgerResult<&Alert> {
        self.positions
            .get(id)
            .map(|&i| &self.alerts[i])
            .ok_or(LedgerError::AlertNotFound(*id))
    }

    fn get_mut(&mut self, id: &AlertId) -> LedgerResult<&mut Alert> {
        let i = *self.positions.get(id).ok_or(LedgerError::AlertNotFound(*id))?;
        Ok(&mut self.alerts[i])
    }

    pub fn acknowledge(&mut self, id: &AlertId, now: DateTime<Utc>) -> LedgerResult<Alert> {
        let alert = self.get_mut(id)?;
        if !alert.is_acknowledged {
            alert.is_acknowledged = true;
            alert.acknowledged_at = Some(now);
        }
        Ok(alert.clone())
    }

    /// Resolve an alert; its key becomes free for the next derivation pass.
    pub fn resolve(&mut self, id: &AlertId, now: DateTime<Utc>) -> LedgerResult<Alert> {
        let alert = self.get_mut(id)?;
        if !alert.is_resolved {
            alert.is_resolved = true;
            alert.resolved_at = Some(now);
        }
        let alert = alert.clone();
        if self.open.get(&alert.key()) == Some(id) {
            self.open.remove(&alert.key());
        }
        Ok(alert)
    }

    /// Unresolved alerts, most urgent first.
    pub fn open(&self) -> Vec<&Alert> {
        let mut open: Vec<&Alert> = self.alerts.iter().filter(|a| !a.is_resolved).collect();
        open.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.raised_at.cmp(&b.raised_at)));
        open
    }

    pub fn all(&self) -> &[Alert] {
        &self.alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::NewBatch;
    use crate::movement::{MovementKind, NewMovement};
    use crate::product::{InMemoryProductCatalog, StockThresholds};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        now().date_naive()
    }

    fn product(reorder: Decimal, min: Decimal, max: Option<Decimal>) -> Product {
        Product::new(ProductId::new(), "SKU-A", "Alerted").with_thresholds(StockThresholds {
            reorder_point: reorder,
            minimum_stock_level: min,
            maximum_stock_level: max,
        })
    }

    fn alert_type(p: &Product, stock: Decimal) -> Option<AlertType> {
        AlertDeriver::default().stock_alert(p, stock).map(|c| c.alert_type)
    }

    #[test]
    fn stock_rules_apply_in_order() {
        let p = product(dec!(10), dec!(20), Some(dec!(100)));
        assert_eq!(alert_type(&p, dec!(-1)), Some(AlertType::NegativeStock));
        assert_eq!(alert_type(&p, dec!(0)), Some(AlertType::OutOfStock));
        assert_eq!(alert_type(&p, dec!(10)), Some(AlertType::ReorderPoint));
        assert_eq!(alert_type(&p, dec!(15)), Some(AlertType::LowStock));
        assert_eq!(alert_type(&p, dec!(50)), None);
        assert_eq!(alert_type(&p, dec!(101)), Some(AlertType::Overstock));
    }

    #[test]
    fn reorder_point_wins_over_low_stock() {
        let p = product(dec!(10), dec!(20), None);
        let c = AlertDeriver::default().stock_alert(&p, dec!(8)).unwrap();
        assert_eq!(c.alert_type, AlertType::ReorderPoint);
        assert_eq!(c.alert_level, AlertLevel::Warning);
        assert_eq!(c.priority, 6);
    }

    #[test]
    fn out_of_stock_is_critical_priority_ten() {
        let p = product(dec!(0), dec!(0), None);
        let c = AlertDeriver::default().stock_alert(&p, dec!(0)).unwrap();
        assert_eq!((c.alert_level, c.priority), (AlertLevel::Critical, 10));
        let c = AlertDeriver::default().stock_alert(&p, dec!(-3)).unwrap();
        assert_eq!((c.alert_level, c.priority), (AlertLevel::Critical, 9));
    }

    fn batch_expiring_in(days: u64) -> Batch {
        let new = NewBatch::new(format!("X-{days}"), ProductId::new(), dec!(2), dec!(1), now())
            .with_dates(None, Some(today() + chrono::Days::new(days)));
        Batch::receive(BatchId::new(), new).unwrap()
    }

    #[test]
    fn expiry_levels_follow_the_day_cut_offs() {
        let d = AlertDeriver::default();
        let level = |days| {
            d.expiry_alert(&batch_expiring_in(days), today())
                .map(|c| (c.alert_level, c.priority))
        };

        assert_eq!(level(0), Some((AlertLevel::Critical, 8)));
        assert_eq!(level(7), Some((AlertLevel::Critical, 8)));
        assert_eq!(level(8), Some((AlertLevel::Warning, 5)));
        assert_eq!(level(15), Some((AlertLevel::Warning, 5)));
        assert_eq!(level(16), Some((AlertLevel::Info, 5)));
        assert_eq!(level(30), Some((AlertLevel::Info, 5)));
        assert_eq!(level(31), None);
    }

    #[test]
    fn book_keeps_one_unresolved_alert_per_key() {
        let p = product(dec!(10), dec!(20), None);
        let d = AlertDeriver::default();
        let mut book = AlertBook::new();

        let first = book.raise_all(d.stock_alert(&p, dec!(8)), now());
        let second = book.raise_all(d.stock_alert(&p, dec!(8)), now());
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(book.open().len(), 1);

        book.resolve(&first[0].id, now()).unwrap();
        let third = book.raise_all(d.stock_alert(&p, dec!(8)), now());
        assert_eq!(third.len(), 1);
        assert_eq!(book.all().len(), 2);
    }

    #[test]
    fn expiry_alerts_are_kept_per_batch() {
        let d = AlertDeriver::default();
        let product_id = ProductId::new();
        let batches: Vec<Batch> = [3u64, 12]
            .into_iter()
            .map(|days| {
                let new = NewBatch::new(format!("E-{days}"), product_id, dec!(2), dec!(1), now())
                    .with_dates(None, Some(today() + chrono::Days::new(days)));
                Batch::receive(BatchId::new(), new).unwrap()
            })
            .collect();
        let candidates = || batches.iter().filter_map(|b| d.expiry_alert(b, today()));

        let mut book = AlertBook::new();
        let first = book.raise_all(candidates(), now());
        assert_eq!(first.len(), 2);
        assert_ne!(first[0].batch_id, first[1].batch_id);
        assert!(book.raise_all(candidates(), now()).is_empty());

        book.resolve(&first[0].id, now()).unwrap();
        let again = book.raise_all(candidates(), now());
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].batch_id, first[0].batch_id);
    }

    #[test]
    fn acknowledging_does_not_free_the_key() {
        let p = product(dec!(10), dec!(20), None);
        let d = AlertDeriver::default();
        let mut book = AlertBook::new();

        let raised = book.raise_all(d.stock_alert(&p, dec!(0)), now());
        let acked = book.acknowledge(&raised[0].id, now()).unwrap();
        assert!(acked.is_acknowledged);
        assert!(book.raise_all(d.stock_alert(&p, dec!(0)), now()).is_empty());
    }

    #[test]
    fn unknown_alert_id_is_reported() {
        let mut book = AlertBook::new();
        let id = AlertId::new();
        assert_eq!(book.resolve(&id, now()).unwrap_err(), LedgerError::AlertNotFound(id));
    }

    #[test]
    fn derive_combines_stock_and_expiry_alerts() {
        let catalog = Arc::new(InMemoryProductCatalog::new());
        let p = product(dec!(10), dec!(20), None);
        catalog.upsert(p.clone()).unwrap();
        let mut ledger = Ledger::new(catalog.clone());
        let mut tracker = BatchTracker::new();

        let batch_id = BatchId::new();
        let new = NewBatch::new("LOT-1", p.id, dec!(8), dec!(3), now())
            .with_dates(None, Some(today() + chrono::Days::new(5)));
        tracker.receive(batch_id, new).unwrap();
        ledger
            .append(
                NewMovement::new(p.id, MovementKind::PurchaseReceipt, dec!(8), dec!(3), now())
                    .with_batch(batch_id),
            )
            .unwrap();

        let deriver = AlertDeriver::default();
        let mut types: Vec<_> = deriver
            .derive(&ledger, &tracker, today())
            .unwrap()
            .into_iter()
            .map(|c| (c.alert_type, c.batch_id))
            .collect();
        types.sort_by_key(|(t, _)| *t as u8);
        assert_eq!(
            types,
            vec![(AlertType::ReorderPoint, None), (AlertType::ExpiryWarning, Some(batch_id))]
        );

        let mut inactive = p.clone();
        inactive.is_active = false;
        catalog.upsert(inactive).unwrap();
        assert!(deriver.derive(&ledger, &tracker, today()).unwrap().is_empty());
    }
}
