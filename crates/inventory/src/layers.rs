//! Cost layers and the greedy allocation routine shared by batch selection
//! and FIFO/LIFO valuation.
//!
//! Both paths walk chronologically stored layers and take
//! `min(layer.available, still_needed)` from each; keeping that walk in one
//! function is what makes batch-tracked and ledger-valued stock agree.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order in which chronologically stored layers are consumed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionOrder {
    /// FIFO.
    OldestFirst,
    /// LIFO.
    NewestFirst,
}

/// Result of walking layers for a required quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// `(index into the storage order, quantity taken)` in consumption order.
    pub takes: Vec<(usize, Decimal)>,
    /// Quantity not covered by the layers (never negative).
    pub shortfall: Decimal,
}

/// Greedily allocate `required` across layers with the given availabilities.
///
/// `available` is in storage (oldest-first) order; `order` only changes the
/// walk direction. Layers with nothing available are skipped.
pub fn allocate(available: &[Decimal], required: Decimal, order: ConsumptionOrder) -> Allocation {
    let mut takes = Vec::new();
    let mut still_needed = required.max(Decimal::ZERO);

    let indices: Box<dyn Iterator<Item = usize>> = match order {
        ConsumptionOrder::OldestFirst => Box::new(0..available.len()),
        ConsumptionOrder::NewestFirst => Box::new((0..available.len()).rev()),
    };

    for idx in indices {
        if still_needed.is_zero() {
            break;
        }
        let avail = available[idx];
        if avail <= Decimal::ZERO {
            continue;
        }
        let take = avail.min(still_needed);
        takes.push((idx, take));
        still_needed -= take;
    }

    Allocation {
        takes,
        shortfall: still_needed,
    }
}

/// A quantity of stock carried at one unit cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostLayer {
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

impl CostLayer {
    pub fn new(quantity: Decimal, unit_cost: Decimal) -> Self {
        Self { quantity, unit_cost }
    }

    pub fn value(&self) -> Decimal {
        self.quantity * self.unit_cost
    }
}

/// What a `LayerQueue::consume` call removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumed {
    pub quantity: Decimal,
    pub value: Decimal,
    /// Part of the request that found no layer (consumed at zero value).
    pub shortfall: Decimal,
}

/// Chronological stack of cost layers (oldest at the front).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerQueue {
    layers: VecDeque<CostLayer>,
}

impl LayerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_layers(layers: impl IntoIterator<Item = CostLayer>) -> Self {
        Self {
            layers: layers.into_iter().filter(|l| l.quantity > Decimal::ZERO).collect(),
        }
    }

    pub fn push(&mut self, layer: CostLayer) {
        if layer.quantity > Decimal::ZERO {
            self.layers.push_back(layer);
        }
    }

    /// Remove `quantity` from the queue, front first (FIFO) or back first (LIFO).
    pub fn consume(&mut self, quantity: Decimal, order: ConsumptionOrder) -> Consumed {
        let available: Vec<Decimal> = self.layers.iter().map(|l| l.quantity).collect();
        let allocation = allocate(&available, quantity, order);

        let mut value = Decimal::ZERO;
        let mut taken_total = Decimal::ZERO;
        for &(idx, taken) in &allocation.takes {
            let layer = &mut self.layers[idx];
            value += taken * layer.unit_cost;
            taken_total += taken;
            layer.quantity -= taken;
        }
        self.layers.retain(|l| l.quantity > Decimal::ZERO);

        Consumed {
            quantity: taken_total,
            value,
            shortfall: allocation.shortfall,
        }
    }

    pub fn layers(&self) -> impl Iterator<Item = &CostLayer> {
        self.layers.iter()
    }

    pub fn to_vec(&self) -> Vec<CostLayer> {
        self.layers.iter().cloned().collect()
    }

    pub fn total_quantity(&self) -> Decimal {
        self.layers.iter().map(|l| l.quantity).sum()
    }

    pub fn total_value(&self) -> Decimal {
        self.layers.iter().map(CostLayer::value).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}
