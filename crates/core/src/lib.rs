//! Identifiers and the error taxonomy shared by the
//! inventory ledger crates.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{LedgerError, LedgerResult};
pub use id::{AlertId, BatchId, MovementId, ProductId};
