//! Line item shapes shared by the pricing, storage and saga layers.

use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::types::ProductId;

/// A product reference and quantity as requested by a client.
///
/// Carries no price: prices only ever come from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl RequestedItem {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// A requested item with its server-verified unit price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl PricedItem {
    pub fn new(product_id: ProductId, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
        }
    }

    /// Returns `unit_price * quantity`, or `None` on overflow.
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_multiply(self.quantity)
    }
}

/// Sums the line totals of a set of priced items, or `None` on overflow.
pub fn total_of(items: &[PricedItem]) -> Option<Money> {
    items
        .iter()
        .try_fold(Money::zero(), |acc, item| acc.checked_add(item.line_total()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_total() {
        let item = PricedItem::new(ProductId::new(9), 2, Money::from_cents(1000));
        assert_eq!(item.line_total(), Some(Money::from_cents(2000)));
    }

    #[test]
    fn test_total_of_items() {
        let items = vec![
            PricedItem::new(ProductId::new(1), 3, Money::from_cents(199)),
            PricedItem::new(ProductId::new(2), 1, Money::from_cents(2500)),
        ];
        assert_eq!(total_of(&items), Some(Money::from_cents(3097)));
        assert_eq!(total_of(&[]), Some(Money::zero()));
    }

    #[test]
    fn test_total_of_overflow_is_none() {
        let huge = Money::new(rust_decimal::Decimal::MAX / rust_decimal::Decimal::TWO);
        let items = vec![PricedItem::new(ProductId::new(9), 2, huge)];
        assert_eq!(total_of(&items), None);
    }
}
