use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{LedgerError, LedgerResult, ProductId};

use crate::layers::ConsumptionOrder;
use crate::valuation::ValuationMethod;

/// Stock thresholds that drive alerting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockThresholds {
    pub reorder_point: Decimal,
    pub minimum_stock_level: Decimal,
    #[serde(default)]
    pub maximum_stock_level: Option<Decimal>,
}

impl Default for StockThresholds {
    fn default() -> Self {
        Self {
            reorder_point: Decimal::ZERO,
            minimum_stock_level: Decimal::ZERO,
            maximum_stock_level: None,
        }
    }
}

impl StockThresholds {
    pub fn validate(&self) -> LedgerResult<()> {
        if self.reorder_point < Decimal::ZERO || self.minimum_stock_level < Decimal::ZERO {
            return Err(LedgerError::validation("stock thresholds cannot be negative"));
        }
        if let Some(max) = self.maximum_stock_level {
            if max < self.minimum_stock_level {
                return Err(LedgerError::validation(format!(
                    "maximum stock level {max} is below minimum {}",
                    self.minimum_stock_level
                )));
            }
        }
        Ok(())
    }
}

/// The stock-relevant view of a product.
///
/// The product catalog itself lives outside the ledger; this is what the
/// ledger and the alert deriver need from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    #[serde(default = "default_unit")]
    pub unit_of_measure: String,
    #[serde(default)]
    pub thresholds: StockThresholds,
    #[serde(default)]
    pub valuation_method: ValuationMethod,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_unit() -> String {
    "unit".to_string()
}

fn default_active() -> bool {
    true
}

impl Product {
    pub fn new(id: ProductId, sku: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            sku: sku.into(),
            name: name.into(),
            unit_of_measure: default_unit(),
            thresholds: StockThresholds::default(),
            valuation_method: ValuationMethod::default(),
            is_active: true,
        }
    }

    pub fn with_thresholds(mut self, thresholds: StockThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_valuation_method(mut self, method: ValuationMethod) -> Self {
        self.valuation_method = method;
        self
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.sku.trim().is_empty() {
            return Err(LedgerError::validation("sku cannot be empty"));
        }
        self.thresholds.validate()
    }

    /// Layer order used when issuing stock without an explicit order.
    pub fn consumption_order(&self) -> ConsumptionOrder {
        self.valuation_method.consumption_order()
    }
}

/// Product lookup capability handed to the ledger and the alert deriver.
pub trait ProductCatalog: Send + Sync {
    fn get(&self, id: &ProductId) -> Option<Product>;
    fn list(&self) -> Vec<Product>;

    fn require(&self, id: &ProductId) -> LedgerResult<Product> {
        self.get(id).ok_or(LedgerError::ProductNotFound(*id))
    }
}

impl<C> ProductCatalog for Arc<C>
where
    C: ProductCatalog + ?Sized,
{
    fn get(&self, id: &ProductId) -> Option<Product> {
        (**self).get(id)
    }

    fn list(&self) -> Vec<Product> {
        (**self).list()
    }
}

/// In-memory catalog for tests/dev and for callers that preload products.
#[derive(Debug, Default)]
pub struct InMemoryProductCatalog {
    inner: RwLock<HashMap<ProductId, Product>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a product after validating it.
    pub fn upsert(&self, product: Product) -> LedgerResult<()> {
        product.validate()?;
        if let Ok(mut map) = self.inner.write() {
            map.insert(product.id, product);
        }
        Ok(())
    }
}

impl ProductCatalog for InMemoryProductCatalog {
    fn get(&self, id: &ProductId) -> Option<Product> {
        let map = self.inner.read().ok()?;
        map.get(id).cloned()
    }

    fn list(&self) -> Vec<Product> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };
        let mut products: Vec<Product> = map.values().cloned().collect();
        products.sort_by(|a, b| a.sku.cmp(&b.sku).then(a.id.cmp(&b.id)));
        products
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rejects_maximum_below_minimum() {
        let p = Product::new(ProductId::new(), "SKU-1", "Widget").with_thresholds(StockThresholds {
            reorder_point: dec!(5),
            minimum_stock_level: dec!(10),
            maximum_stock_level: Some(dec!(8)),
        });
        assert!(matches!(p.validate(), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn catalog_lists_in_sku_order() {
        let catalog = InMemoryProductCatalog::new();
        catalog.upsert(Product::new(ProductId::new(), "B", "b")).unwrap();
        catalog.upsert(Product::new(ProductId::new(), "A", "a")).unwrap();

        let skus: Vec<_> = catalog.list().into_iter().map(|p| p.sku).collect();
        assert_eq!(skus, vec!["A", "B"]);
    }

    #[test]
    fn require_reports_missing_product() {
        let catalog = InMemoryProductCatalog::new();
        let id = ProductId::new();
        assert_eq!(catalog.require(&id), Err(LedgerError::ProductNotFound(id)));
    }
}
