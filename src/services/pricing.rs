//! Effective price and coupon discount arithmetic. No I/O.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::entities::{coupon::DiscountType, product};

/// A sale price counts only when it is positive and undercuts the list price.
pub fn is_on_sale(price: Decimal, sale_price: Option<Decimal>) -> bool {
    matches!(sale_price, Some(sale) if sale > Decimal::ZERO && sale < price)
}

pub fn effective_unit_price(price: Decimal, sale_price: Option<Decimal>) -> Decimal {
    match sale_price {
        Some(sale) if is_on_sale(price, Some(sale)) => sale,
        _ => price,
    }
}

pub fn effective_price(product: &product::Model) -> Decimal {
    effective_unit_price(product.price, product.sale_price)
}

/// Discount a coupon grants against `total`, rounded to whole currency units
/// for percentages and never more than `total`.
pub fn apply_discount(total: Decimal, discount_type: DiscountType, value: Decimal) -> Decimal {
    if total <= Decimal::ZERO || value <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let raw = match discount_type {
        DiscountType::Percentage => (total * value / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
        DiscountType::Fixed => value,
    };

    raw.clamp(Decimal::ZERO, total)
}

/// Amount due once the discount is taken off.
pub fn final_amount(total: Decimal, discount: Decimal) -> Decimal {
    (total - discount).max(Decimal::ZERO)
}
