//! Offer pricing arithmetic.
//!
//! `subtotal = Σ line_total` and `total_amount = subtotal + delivery_charge`. Quantity-priced
//! lines must state a `line_total` that agrees with `quantity * unit_price` within
//! [`LINE_TOTAL_TOLERANCE`].

use crate::constants::LINE_TOTAL_TOLERANCE;
use crate::model::{FulfillmentKind, LineItem};
use crate::{QuoteError, QuoteResult};
use quote_types::Money;

/// Totals derived from a validated set of line items.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfferPricing {
    pub subtotal: Money,
    pub delivery_charge: Money,
    pub total_amount: Money,
}

/// Validates line items against the request kind and computes the offer totals.
///
/// # Errors
///
/// Returns `QuoteError::Validation` if:
/// - there are no line items,
/// - a line's kind differs from the request kind,
/// - a quantity is not a positive finite number,
/// - a stated line total disagrees with `quantity * unit_price`,
/// - the delivery charge is negative or not finite.
pub fn price_offer(
    kind: FulfillmentKind,
    line_items: &[LineItem],
    delivery_charge: Option<f64>,
) -> QuoteResult<OfferPricing> {
    if line_items.is_empty() {
        return Err(QuoteError::Validation(
            "an offer needs at least one line item".into(),
        ));
    }

    for (index, item) in line_items.iter().enumerate() {
        if item.kind() != kind {
            return Err(QuoteError::Validation(format!(
                "line {index} is a {} item but the request is for {kind}",
                item.kind()
            )));
        }
        check_line_arithmetic(index, item)?;
    }

    let delivery_charge = Money::new(delivery_charge.unwrap_or(0.0))
        .map_err(|e| QuoteError::Validation(format!("delivery_charge: {e}")))?;
    let subtotal: Money = line_items.iter().map(LineItem::line_total).sum();

    Ok(OfferPricing {
        subtotal,
        delivery_charge,
        total_amount: subtotal + delivery_charge,
    })
}

fn check_line_arithmetic(index: usize, item: &LineItem) -> QuoteResult<()> {
    let LineItem::Medication {
        quantity,
        unit_price,
        line_total,
        ..
    } = item
    else {
        return Ok(());
    };

    if !quantity.is_finite() || *quantity <= 0.0 {
        return Err(QuoteError::Validation(format!(
            "line {index}: quantity must be a positive number"
        )));
    }

    let expected = quantity * unit_price.amount();
    if (expected - line_total.amount()).abs() > LINE_TOTAL_TOLERANCE {
        return Err(QuoteError::Validation(format!(
            "line {index}: line_total {line_total} does not equal quantity {quantity} x unit_price {unit_price}"
        )));
    }

    Ok(())
}
