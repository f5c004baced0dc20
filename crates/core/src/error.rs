//! Ledger error model.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::id::{AlertId, BatchId, MovementId, ProductId};

/// Result type used across the ledger crates.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger-level error.
///
/// Every variant is a deterministic, local failure: the caller corrects its
/// input (or its view of the data) and resubmits. Nothing in the core retries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Bad sign/kind combination, unknown kind, zero quantity, negative cost.
    #[error("invalid movement: {0}")]
    InvalidMovement(String),

    /// A quantity or value left the decimal range during a computation.
    #[error("arithmetic overflow: {0}")]
    ArithmeticOverflow(String),

    /// A consume request exceeded the batch's remaining quantity.
    #[error(
        "insufficient batch stock (batch={batch_id}, requested={requested}, remaining={remaining})"
    )]
    InsufficientBatchStock {
        batch_id: BatchId,
        requested: Decimal,
        remaining: Decimal,
    },

    /// Layer selection could not cover an issue request.
    #[error(
        "insufficient stock (product={product_id}, requested={requested}, available={available})"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: Decimal,
        available: Decimal,
    },

    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("batch not found: {0}")]
    BatchNotFound(BatchId),

    #[error("movement not found: {0}")]
    MovementNotFound(MovementId),

    #[error("alert not found: {0}")]
    AlertNotFound(AlertId),

    /// The batch number is already registered for this product.
    #[error("duplicate batch number {batch_number:?} for product {product_id}")]
    DuplicateBatch {
        product_id: ProductId,
        batch_number: String,
    },

    /// A valuation scan ran out of stock mid-scan.
    ///
    /// Snapshots carry this as a flag; callers opt into the hard error via
    /// `ensure_trusted`.
    #[error("negative stock (product={product_id}, movement={movement_id}, shortfall={shortfall})")]
    NegativeStockEncountered {
        product_id: ProductId,
        movement_id: MovementId,
        shortfall: Decimal,
    },

    /// Expiry before manufacture, `to < from`, or a non-advancing period.
    #[error("invalid date range: {0}")]
    InvalidDateRange(String),

    /// A value failed validation (product thresholds, snapshot seeding).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl LedgerError {
    pub fn invalid_movement(msg: impl Into<String>) -> Self {
        Self::InvalidMovement(msg.into())
    }

    pub fn overflow(msg: impl Into<String>) -> Self {
        Self::ArithmeticOverflow(msg.into())
    }

    pub fn invalid_date_range(msg: impl Into<String>) -> Self {
        Self::InvalidDateRange(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// True for failures the caller fixes by correcting input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidMovement(_)
                | Self::InvalidDateRange(_)
                | Self::Validation(_)
                | Self::InvalidId(_)
                | Self::DuplicateBatch { .. }
        )
    }
}
