use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{BatchId, LedgerError, LedgerResult, MovementId, ProductId};

/// Location tag used when a movement does not name one.
pub const DEFAULT_LOCATION: &str = "main";

/// Which way a movement moves stock.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inward,
    Outward,
}

impl Direction {
    /// Sign applied to stored quantities (+1 inward, -1 outward).
    pub fn sign(self) -> Decimal {
        match self {
            Direction::Inward => Decimal::ONE,
            Direction::Outward => Decimal::NEGATIVE_ONE,
        }
    }
}

/// Kind of stock movement.
///
/// `direction()` is the only place that decides whether a kind adds or removes
/// stock. Sign normalization, layer selection and valuation all go through it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    PurchaseReceipt,
    SalesIssue,
    ProductionConsumption,
    ProductionOutput,
    AdjustmentPositive,
    AdjustmentNegative,
    TransferIn,
    TransferOut,
    ReturnIn,
    ReturnOut,
    Scrap,
    OpeningStock,
}

impl MovementKind {
    pub const ALL: [MovementKind; 12] = [
        MovementKind::PurchaseReceipt,
        MovementKind::SalesIssue,
        MovementKind::ProductionConsumption,
        MovementKind::ProductionOutput,
        MovementKind::AdjustmentPositive,
        MovementKind::AdjustmentNegative,
        MovementKind::TransferIn,
        MovementKind::TransferOut,
        MovementKind::ReturnIn,
        MovementKind::ReturnOut,
        MovementKind::Scrap,
        MovementKind::OpeningStock,
    ];

    pub fn direction(self) -> Direction {
        match self {
            MovementKind::PurchaseReceipt
            | MovementKind::ProductionOutput
            | MovementKind::AdjustmentPositive
            | MovementKind::TransferIn
            | MovementKind::ReturnIn
            | MovementKind::OpeningStock => Direction::Inward,
            MovementKind::SalesIssue
            | MovementKind::ProductionConsumption
            | MovementKind::AdjustmentNegative
            | MovementKind::TransferOut
            | MovementKind::ReturnOut
            | MovementKind::Scrap => Direction::Outward,
        }
    }

    pub fn is_inward(self) -> bool {
        self.direction() == Direction::Inward
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::PurchaseReceipt => "purchase_receipt",
            MovementKind::SalesIssue => "sales_issue",
            MovementKind::ProductionConsumption => "production_consumption",
            MovementKind::ProductionOutput => "production_output",
            MovementKind::AdjustmentPositive => "adjustment_positive",
            MovementKind::AdjustmentNegative => "adjustment_negative",
            MovementKind::TransferIn => "transfer_in",
            MovementKind::TransferOut => "transfer_out",
            MovementKind::ReturnIn => "return_in",
            MovementKind::ReturnOut => "return_out",
            MovementKind::Scrap => "scrap",
            MovementKind::OpeningStock => "opening_stock",
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| LedgerError::invalid_movement(format!("unknown movement kind {s:?}")))
    }
}

/// Business document a movement originated from (purchase order, invoice...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReference {
    pub document_type: String,
    pub document_id: String,
}

/// Input for appending a movement (as submitted by a workflow).
///
/// `quantity` may arrive with either sign for outward kinds; the ledger
/// normalizes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub product_id: ProductId,
    #[serde(default)]
    pub batch_id: Option<BatchId>,
    pub kind: MovementKind,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub reference: Option<MovementReference>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewMovement {
    pub fn new(
        product_id: ProductId,
        kind: MovementKind,
        quantity: Decimal,
        unit_cost: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id,
            batch_id: None,
            kind,
            quantity,
            unit_cost,
            occurred_at,
            location: None,
            reference: None,
            notes: None,
        }
    }

    pub fn with_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_reference(
        mut self,
        document_type: impl Into<String>,
        document_id: impl Into<String>,
    ) -> Self {
        self.reference = Some(MovementReference {
            document_type: document_type.into(),
            document_id: document_id.into(),
        });
        self
    }

    /// Signed quantity as it will be stored.
    ///
    /// Inward kinds must carry a positive quantity. Outward kinds are negated
    /// when submitted positive.
    pub fn normalized_quantity(&self) -> LedgerResult<Decimal> {
        if self.quantity.is_zero() {
            return Err(LedgerError::invalid_movement("quantity cannot be zero"));
        }
        match self.kind.direction() {
            Direction::Inward => {
                if self.quantity < Decimal::ZERO {
                    return Err(LedgerError::invalid_movement(format!(
                        "{} requires a positive quantity, got {}",
                        self.kind, self.quantity
                    )));
                }
                Ok(self.quantity)
            }
            Direction::Outward => Ok(-self.quantity.abs()),
        }
    }
}

/// One immutable entry in the ledger.
///
/// Fields are read-only once committed; the only later change is the
/// reporting flag set by `Ledger::deactivate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    id: MovementId,
    sequence: u64,
    product_id: ProductId,
    batch_id: Option<BatchId>,
    kind: MovementKind,
    quantity: Decimal,
    unit_cost: Decimal,
    total_cost: Decimal,
    occurred_at: DateTime<Utc>,
    location: String,
    reference: Option<MovementReference>,
    notes: Option<String>,
    is_active: bool,
}

impl MovementRecord {
    /// Validate and normalize a submitted movement into a record.
    pub(crate) fn from_new(id: MovementId, sequence: u64, new: NewMovement) -> LedgerResult<Self> {
        let quantity = new.normalized_quantity()?;

        if new.unit_cost < Decimal::ZERO {
            return Err(LedgerError::invalid_movement(format!(
                "unit cost cannot be negative, got {}",
                new.unit_cost
            )));
        }

        let total_cost = quantity.checked_mul(new.unit_cost).ok_or_else(|| {
            LedgerError::invalid_movement(format!(
                "total cost of {quantity} x {} exceeds the decimal range",
                new.unit_cost
            ))
        })?;

        let location = match new.location {
            Some(l) if !l.trim().is_empty() => l,
            _ => DEFAULT_LOCATION.to_string(),
        };

        Ok(Self {
            id,
            sequence,
            product_id: new.product_id,
            batch_id: new.batch_id,
            kind: new.kind,
            quantity,
            unit_cost: new.unit_cost,
            total_cost,
            occurred_at: new.occurred_at,
            location,
            reference: new.reference,
            notes: new.notes,
            is_active: true,
        })
    }

    pub fn id(&self) -> MovementId {
        self.id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn batch_id(&self) -> Option<BatchId> {
        self.batch_id
    }

    pub fn kind(&self) -> MovementKind {
        self.kind
    }

    pub fn direction(&self) -> Direction {
        self.kind.direction()
    }

    /// Signed quantity (positive inward, negative outward).
    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn unit_cost(&self) -> Decimal {
        self.unit_cost
    }

    /// `quantity × unit_cost`, carrying the quantity's sign.
    pub fn total_cost(&self) -> Decimal {
        self.total_cost
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn occurred_on(&self) -> NaiveDate {
        self.occurred_at.date_naive()
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn reference(&self) -> Option<&MovementReference> {
        self.reference.as_ref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Ordering key: business time, then insertion sequence.
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.occurred_at, self.sequence)
    }

    pub(crate) fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub(crate) fn deactivate(&mut self) {
        self.is_active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn new(kind: MovementKind, quantity: Decimal) -> NewMovement {
        NewMovement::new(ProductId::new(), kind, quantity, dec!(2.5), at())
    }

    #[test]
    fn every_kind_has_one_direction_and_round_trips_its_name() {
        let inward: Vec<_> = MovementKind::ALL.iter().filter(|k| k.is_inward()).collect();
        assert_eq!(inward.len(), 6);

        for kind in MovementKind::ALL {
            assert_eq!(kind.as_str().parse::<MovementKind>().unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn unknown_kind_is_invalid_movement() {
        let err = "teleport".parse::<MovementKind>().unwrap_err();
        assert!(matches!(err, LedgerError::InvalidMovement(_)));
    }

    #[test]
    fn outward_positive_quantity_is_negated() {
        let issue = new(MovementKind::SalesIssue, dec!(4));
        let rec = MovementRecord::from_new(MovementId::new(), 1, issue).unwrap();
        assert_eq!(rec.quantity(), dec!(-4));
        assert_eq!(rec.total_cost(), dec!(-10.0));
    }

    #[test]
    fn outward_negative_quantity_is_kept() {
        let rec = MovementRecord::from_new(MovementId::new(), 1, new(MovementKind::Scrap, dec!(-3)))
            .unwrap();
        assert_eq!(rec.quantity(), dec!(-3));
    }

    #[test]
    fn inward_non_positive_quantity_is_rejected() {
        for q in [dec!(0), dec!(-1)] {
            let err = MovementRecord::from_new(
                MovementId::new(),
                1,
                new(MovementKind::PurchaseReceipt, q),
            )
            .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidMovement(_)));
        }
    }

    #[test]
    fn negative_unit_cost_is_rejected() {
        let mut m = new(MovementKind::PurchaseReceipt, dec!(1));
        m.unit_cost = dec!(-0.01);
        let err = MovementRecord::from_new(MovementId::new(), 1, m).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidMovement(_)));
    }

    #[test]
    fn blank_location_defaults_to_main() {
        let m = new(MovementKind::TransferIn, dec!(1)).with_location("  ");
        let rec = MovementRecord::from_new(MovementId::new(), 1, m).unwrap();
        assert_eq!(rec.location(), DEFAULT_LOCATION);

        let m = new(MovementKind::TransferIn, dec!(1)).with_location("dock-2");
        let rec = MovementRecord::from_new(MovementId::new(), 2, m).unwrap();
        assert_eq!(rec.location(), "dock-2");
    }
}
