//! Point-in-time stock valuation (FIFO, LIFO, Weighted-Average).
//!
//! The engine is a pure function of the ledger's active records: the same
//! inputs always produce the same snapshot. The only state carried between
//! calls is what a caller passes in explicitly (`compute_from` with a prior
//! snapshot).

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{LedgerError, LedgerResult, MovementId, ProductId};

use crate::layers::{ConsumptionOrder, CostLayer, LayerQueue};
use crate::ledger::Ledger;
use crate::movement::{Direction, MovementRecord};
use crate::product::ProductCatalog;

/// Inventory costing method.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuationMethod {
    #[default]
    Fifo,
    Lifo,
    WeightedAverage,
}

impl ValuationMethod {
    pub const ALL: [ValuationMethod; 3] = [
        ValuationMethod::Fifo,
        ValuationMethod::Lifo,
        ValuationMethod::WeightedAverage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ValuationMethod::Fifo => "fifo",
            ValuationMethod::Lifo => "lifo",
            ValuationMethod::WeightedAverage => "weighted_average",
        }
    }

    /// Batch order that physically matches this costing method.
    pub fn consumption_order(self) -> ConsumptionOrder {
        match self {
            ValuationMethod::Lifo => ConsumptionOrder::NewestFirst,
            ValuationMethod::Fifo | ValuationMethod::WeightedAverage => {
                ConsumptionOrder::OldestFirst
            }
        }
    }
}

impl core::fmt::Display for ValuationMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ValuationMethod {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ValuationMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| LedgerError::validation(format!("unknown valuation method {s:?}")))
    }
}

/// Upsert key of a persisted snapshot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub product_id: ProductId,
    pub as_of: NaiveDate,
    pub method: ValuationMethod,
}

/// Raised when an outward movement found less stock than it removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegativeStockWarning {
    /// First movement that ran out of stock.
    pub movement_id: MovementId,
    pub occurred_at: DateTime<Utc>,
    /// Total uncovered quantity over the scan.
    pub shortfall: Decimal,
}

/// Stock and value for one product, period and costing method.
///
/// `closing_stock = opening_stock + inward_quantity - outward_quantity`, and
/// `average_cost = closing_value / closing_stock` when stock is positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockValuationSnapshot {
    pub product_id: ProductId,
    pub method: ValuationMethod,
    pub period_start: NaiveDate,
    pub as_of: NaiveDate,
    pub opening_stock: Decimal,
    pub opening_value: Decimal,
    pub inward_quantity: Decimal,
    pub inward_value: Decimal,
    pub outward_quantity: Decimal,
    /// Cost assigned to stock issued during the period.
    pub outward_value: Decimal,
    pub closing_stock: Decimal,
    pub closing_value: Decimal,
    pub average_cost: Decimal,
    /// Remaining cost layers, oldest first (empty for weighted-average).
    pub layers: Vec<CostLayer>,
    pub negative_stock: Option<NegativeStockWarning>,
}

impl StockValuationSnapshot {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey {
            product_id: self.product_id,
            as_of: self.as_of,
            method: self.method,
        }
    }

    pub fn is_flagged(&self) -> bool {
        self.negative_stock.is_some()
    }

    /// Turn the negative-stock flag into an error for callers that cannot
    /// accept an untrusted figure.
    pub fn ensure_trusted(&self) -> LedgerResult<&Self> {
        match &self.negative_stock {
            None => Ok(self),
            Some(w) => Err(LedgerError::NegativeStockEncountered {
                product_id: self.product_id,
                movement_id: w.movement_id,
                shortfall: w.shortfall,
            }),
        }
    }
}

/// `None` when the quotient leaves the decimal range.
fn average(value: Decimal, stock: Decimal) -> Option<Decimal> {
    if stock > Decimal::ZERO {
        value.checked_div(stock)
    } else {
        Some(Decimal::ZERO)
    }
}

#[derive(Debug, Default)]
struct PeriodTotals {
    inward_quantity: Decimal,
    inward_value: Decimal,
    outward_quantity: Decimal,
    outward_value: Decimal,
}

/// Running cost state for one scan.
#[derive(Debug)]
struct CostState {
    method: ValuationMethod,
    queue: LayerQueue,
    stock: Decimal,
    value: Decimal,
    average_cost: Decimal,
    warning: Option<NegativeStockWarning>,
}

impl CostState {
    fn new(method: ValuationMethod) -> Self {
        Self {
            method,
            queue: LayerQueue::new(),
            stock: Decimal::ZERO,
            value: Decimal::ZERO,
            average_cost: Decimal::ZERO,
            warning: None,
        }
    }

    fn seeded(prior: &StockValuationSnapshot) -> LedgerResult<Self> {
        let queue = match prior.method {
            ValuationMethod::WeightedAverage => LayerQueue::new(),
            _ => LayerQueue::from_layers(prior.layers.iter().cloned()),
        };
        let average_cost = average(prior.closing_value, prior.closing_stock)
            .ok_or_else(|| LedgerError::overflow("average cost of the prior snapshot"))?;
        Ok(Self {
            method: prior.method,
            queue,
            stock: prior.closing_stock,
            value: prior.closing_value,
            average_cost,
            warning: prior.negative_stock.clone(),
        })
    }

    fn apply(
        &mut self,
        record: &MovementRecord,
        totals: Option<&mut PeriodTotals>,
    ) -> LedgerResult<()> {
        let overflow = || LedgerError::overflow(format!("valuing movement {}", record.id()));

        match record.direction() {
            Direction::Inward => {
                let quantity = record.quantity();
                let value = quantity.checked_mul(record.unit_cost()).ok_or_else(overflow)?;
                if self.method != ValuationMethod::WeightedAverage {
                    self.queue.push(CostLayer::new(quantity, record.unit_cost()));
                }
                self.stock = self.stock.checked_add(quantity).ok_or_else(overflow)?;
                self.value = self.value.checked_add(value).ok_or_else(overflow)?;
                self.average_cost = average(self.value, self.stock).ok_or_else(overflow)?;

                if let Some(t) = totals {
                    t.inward_quantity =
                        t.inward_quantity.checked_add(quantity).ok_or_else(overflow)?;
                    t.inward_value = t.inward_value.checked_add(value).ok_or_else(overflow)?;
                }
            }
            Direction::Outward => {
                let quantity = record.quantity().abs();
                let (consumed_value, shortfall) = match self.method {
                    ValuationMethod::Fifo => {
                        let c = self.queue.consume(quantity, ConsumptionOrder::OldestFirst);
                        (c.value, c.shortfall)
                    }
                    ValuationMethod::Lifo => {
                        let c = self.queue.consume(quantity, ConsumptionOrder::NewestFirst);
                        (c.value, c.shortfall)
                    }
                    ValuationMethod::WeightedAverage => {
                        let on_hand = self.stock.max(Decimal::ZERO);
                        let shortfall = (quantity - on_hand).max(Decimal::ZERO);
                        let consumed = if on_hand > Decimal::ZERO && quantity >= on_hand {
                            // Emptying stock takes the whole carried value.
                            let uncovered =
                                shortfall.checked_mul(self.average_cost).ok_or_else(overflow)?;
                            self.value.checked_add(uncovered).ok_or_else(overflow)?
                        } else {
                            quantity.checked_mul(self.average_cost).ok_or_else(overflow)?
                        };
                        (consumed, shortfall)
                    }
                };

                self.stock = self.stock.checked_add(record.quantity()).ok_or_else(overflow)?;
                self.value = self.value.checked_sub(consumed_value).ok_or_else(overflow)?;
                self.average_cost = average(self.value, self.stock).ok_or_else(overflow)?;

                if shortfall > Decimal::ZERO {
                    self.flag(record, shortfall);
                }
                if let Some(t) = totals {
                    t.outward_quantity =
                        t.outward_quantity.checked_add(quantity).ok_or_else(overflow)?;
                    t.outward_value =
                        t.outward_value.checked_add(consumed_value).ok_or_else(overflow)?;
                }
            }
        }
        Ok(())
    }

    fn flag(&mut self, record: &MovementRecord, shortfall: Decimal) {
        match &mut self.warning {
            Some(w) => w.shortfall += shortfall,
            None => {
                self.warning = Some(NegativeStockWarning {
                    movement_id: record.id(),
                    occurred_at: record.occurred_at(),
                    shortfall,
                })
            }
        }
    }

    fn into_snapshot(
        self,
        product_id: ProductId,
        period_start: NaiveDate,
        as_of: NaiveDate,
        opening: (Decimal, Decimal),
        totals: PeriodTotals,
    ) -> StockValuationSnapshot {
        StockValuationSnapshot {
            product_id,
            method: self.method,
            period_start,
            as_of,
            opening_stock: opening.0,
            opening_value: opening.1,
            inward_quantity: totals.inward_quantity,
            inward_value: totals.inward_value,
            outward_quantity: totals.outward_quantity,
            outward_value: totals.outward_value,
            closing_stock: self.stock,
            closing_value: self.value,
            average_cost: self.average_cost,
            layers: self.queue.to_vec(),
            negative_stock: self.warning,
        }
    }
}

/// Read-side valuation over a ledger.
#[derive(Debug)]
pub struct ValuationEngine<'a, C> {
    ledger: &'a Ledger<C>,
}

impl<'a, C: ProductCatalog> ValuationEngine<'a, C> {
    pub fn new(ledger: &'a Ledger<C>) -> Self {
        Self { ledger }
    }

    /// Daily snapshot: opening at the end of the previous day, movements of `as_of`.
    pub fn compute(
        &self,
        product_id: ProductId,
        as_of: NaiveDate,
        method: ValuationMethod,
    ) -> LedgerResult<StockValuationSnapshot> {
        self.compute_period(product_id, as_of, as_of, method)
    }

    /// Snapshot over `[from, to]`, scanning the full history for the opening state.
    pub fn compute_period(
        &self,
        product_id: ProductId,
        from: NaiveDate,
        to: NaiveDate,
        method: ValuationMethod,
    ) -> LedgerResult<StockValuationSnapshot> {
        if to < from {
            return Err(LedgerError::invalid_date_range(format!(
                "date_to {to} is before date_from {from}"
            )));
        }

        let mut state = CostState::new(method);
        let mut totals = PeriodTotals::default();
        let mut opening = None;

        for record in self.ledger.records_up_to(product_id, to)? {
            if record.occurred_on() < from {
                state.apply(record, None)?;
            } else {
                opening.get_or_insert((state.stock, state.value));
                state.apply(record, Some(&mut totals))?;
            }
        }
        let opening = opening.unwrap_or((state.stock, state.value));

        Ok(self.finish(state, product_id, from, to, opening, totals))
    }

    /// Snapshot for `(prior.as_of, as_of]`, opening from a prior snapshot.
    pub fn compute_from(
        &self,
        prior: &StockValuationSnapshot,
        as_of: NaiveDate,
    ) -> LedgerResult<StockValuationSnapshot> {
        if as_of <= prior.as_of {
            return Err(LedgerError::invalid_date_range(format!(
                "as_of {as_of} does not follow prior snapshot date {}",
                prior.as_of
            )));
        }
        let from = prior
            .as_of
            .succ_opt()
            .ok_or_else(|| LedgerError::invalid_date_range("prior snapshot date is out of range"))?;

        let mut state = CostState::seeded(prior)?;
        let mut totals = PeriodTotals::default();
        let opening = (prior.closing_stock, prior.closing_value);

        for record in self.ledger.records_between(prior.product_id, from, as_of)? {
            state.apply(record, Some(&mut totals))?;
        }

        Ok(self.finish(state, prior.product_id, from, as_of, opening, totals))
    }

    /// One daily snapshot per requested method, in request order.
    pub fn compare(
        &self,
        product_id: ProductId,
        as_of: NaiveDate,
        methods: &[ValuationMethod],
    ) -> LedgerResult<Vec<StockValuationSnapshot>> {
        methods
            .iter()
            .map(|m| self.compute(product_id, as_of, *m))
            .collect()
    }

    fn finish(
        &self,
        state: CostState,
        product_id: ProductId,
        from: NaiveDate,
        to: NaiveDate,
        opening: (Decimal, Decimal),
        totals: PeriodTotals,
    ) -> StockValuationSnapshot {
        let snapshot = state.into_snapshot(product_id, from, to, opening, totals);

        if let Some(w) = &snapshot.negative_stock {
            tracing::warn!(
                product_id = %product_id,
                method = %snapshot.method,
                as_of = %to,
                movement_id = %w.movement_id,
                shortfall = %w.shortfall,
                "valuation ran out of stock; snapshot flagged"
            );
        }
        tracing::debug!(
            product_id = %product_id,
            method = %snapshot.method,
            as_of = %to,
            closing_stock = %snapshot.closing_stock,
            closing_value = %snapshot.closing_value,
            "valuation computed"
        );
        snapshot
    }
}
