use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{BatchId, LedgerError, LedgerResult, ProductId};

use crate::movement::DEFAULT_LOCATION;

/// Batch lifecycle status.
///
/// `Consumed` and `Expired` are reached automatically; `Damaged` and
/// `Returned` only through explicit calls.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Active,
    Consumed,
    Expired,
    Damaged,
    Returned,
}

/// Input for registering a received batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBatch {
    pub batch_number: String,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub manufactured_at: Option<NaiveDate>,
    #[serde(default)]
    pub expires_at: Option<NaiveDate>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub supplier_reference: Option<String>,
}

impl NewBatch {
    pub fn new(
        batch_number: impl Into<String>,
        product_id: ProductId,
        quantity: Decimal,
        unit_cost: Decimal,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            batch_number: batch_number.into(),
            product_id,
            quantity,
            unit_cost,
            received_at,
            manufactured_at: None,
            expires_at: None,
            location: None,
            supplier_reference: None,
        }
    }

    pub fn with_dates(
        mut self,
        manufactured_at: Option<NaiveDate>,
        expires_at: Option<NaiveDate>,
    ) -> Self {
        self.manufactured_at = manufactured_at;
        self.expires_at = expires_at;
        self
    }
}

/// A received quantity of one product, consumed over time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    id: BatchId,
    batch_number: String,
    product_id: ProductId,
    initial_quantity: Decimal,
    remaining_quantity: Decimal,
    unit_cost: Decimal,
    total_cost: Decimal,
    received_at: DateTime<Utc>,
    manufactured_at: Option<NaiveDate>,
    expires_at: Option<NaiveDate>,
    location: String,
    supplier_reference: Option<String>,
    status: BatchStatus,
}

impl Batch {
    /// Validate a receipt and build the batch in `Active` status.
    pub fn receive(id: BatchId, new: NewBatch) -> LedgerResult<Self> {
        if new.batch_number.trim().is_empty() {
            return Err(LedgerError::validation("batch number cannot be empty"));
        }
        if new.quantity <= Decimal::ZERO {
            return Err(LedgerError::invalid_movement(format!(
                "batch quantity must be positive, got {}",
                new.quantity
            )));
        }
        if new.unit_cost < Decimal::ZERO {
            return Err(LedgerError::invalid_movement(format!(
                "batch unit cost cannot be negative, got {}",
                new.unit_cost
            )));
        }
        let total_cost = new.quantity.checked_mul(new.unit_cost).ok_or_else(|| {
            LedgerError::invalid_movement(format!(
                "batch total cost of {} x {} exceeds the decimal range",
                new.quantity, new.unit_cost
            ))
        })?;
        if let (Some(made), Some(expires)) = (new.manufactured_at, new.expires_at) {
            if expires <= made {
                return Err(LedgerError::invalid_date_range(format!(
                    "batch {} expires {expires} on or before manufacture {made}",
                    new.batch_number
                )));
            }
        }

        Ok(Self {
            id,
            batch_number: new.batch_number,
            product_id: new.product_id,
            initial_quantity: new.quantity,
            remaining_quantity: new.quantity,
            unit_cost: new.unit_cost,
            total_cost,
            received_at: new.received_at,
            manufactured_at: new.manufactured_at,
            expires_at: new.expires_at,
            location: new.location.unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            supplier_reference: new.supplier_reference,
            status: BatchStatus::Active,
        })
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn batch_number(&self) -> &str {
        &self.batch_number
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn initial_quantity(&self) -> Decimal {
        self.initial_quantity
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.remaining_quantity
    }

    pub fn unit_cost(&self) -> Decimal {
        self.unit_cost
    }

    pub fn total_cost(&self) -> Decimal {
        self.total_cost
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn manufactured_at(&self) -> Option<NaiveDate> {
        self.manufactured_at
    }

    pub fn expires_at(&self) -> Option<NaiveDate> {
        self.expires_at
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn supplier_reference(&self) -> Option<&str> {
        self.supplier_reference.as_deref()
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    /// Active with stock left: eligible as a consumption layer.
    pub fn is_available(&self) -> bool {
        self.status == BatchStatus::Active && self.remaining_quantity > Decimal::ZERO
    }

    /// Days from `today` until expiry (negative once past).
    pub fn days_until_expiry(&self, today: NaiveDate) -> Option<i64> {
        self.expires_at.map(|e| (e - today).num_days())
    }

    /// Validation half of `consume`; leaves the batch untouched.
    pub fn check_consume(&self, quantity: Decimal) -> LedgerResult<()> {
        if quantity <= Decimal::ZERO {
            return Err(LedgerError::invalid_movement(format!(
                "consume quantity must be positive, got {quantity}"
            )));
        }
        if quantity > self.remaining_quantity {
            return Err(LedgerError::InsufficientBatchStock {
                batch_id: self.id,
                requested: quantity,
                remaining: self.remaining_quantity,
            });
        }
        Ok(())
    }

    /// Decrement remaining stock; reaching zero marks the batch consumed.
    pub fn consume(&mut self, quantity: Decimal) -> LedgerResult<()> {
        self.check_consume(quantity)?;
        self.remaining_quantity -= quantity;
        if self.remaining_quantity.is_zero() {
            self.status = BatchStatus::Consumed;
        }
        Ok(())
    }

    /// Apply the automatic active → expired transition. Returns true when it fired.
    pub fn refresh_expiry(&mut self, today: NaiveDate) -> bool {
        match self.expires_at {
            Some(expires) if self.status == BatchStatus::Active && expires < today => {
                self.status = BatchStatus::Expired;
                true
            }
            _ => false,
        }
    }

    pub fn mark_damaged(&mut self) -> LedgerResult<()> {
        self.transition(BatchStatus::Damaged)
    }

    pub fn mark_returned(&mut self) -> LedgerResult<()> {
        self.transition(BatchStatus::Returned)
    }

    fn transition(&mut self, to: BatchStatus) -> LedgerResult<()> {
        if self.status == BatchStatus::Consumed {
            return Err(LedgerError::validation(format!(
                "batch {} is already consumed",
                self.batch_number
            )));
        }
        self.status = to;
        Ok(())
    }
}
