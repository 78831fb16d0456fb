//! Read-time normalisation of stored line items.
//!
//! Offers written by older releases spell line-item fields in several ways (a medication's
//! name under `medicine` or `medicine_name`, a lab test's under `test_name`, totals under
//! `total_price` or `price`, no `kind` tag at all). Stored rows are never rewritten; every
//! read goes through [`decode_line_items`], which maps all known spellings onto [`LineItem`].

use crate::model::{FulfillmentKind, LineItem};
use crate::{QuoteError, QuoteResult};
use quote_types::{Money, NonEmptyText};
use serde_json::{Map, Value};

const DESCRIPTION_KEYS: &[&str] = &["description", "medicine_name", "medicine", "test_name", "name"];
const LINE_TOTAL_KEYS: &[&str] = &["line_total", "total_price", "price"];
const UNIT_PRICE_KEYS: &[&str] = &["unit_price"];
const QUANTITY_KEYS: &[&str] = &["quantity"];

/// Decodes a stored `line_items` JSON array, normalising legacy field names.
///
/// `request_kind` is used for entries that carry no `kind` tag.
pub fn decode_line_items(raw: &str, request_kind: FulfillmentKind) -> QuoteResult<Vec<LineItem>> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Array(entries) = value else {
        return Err(QuoteError::CorruptRecord(
            "line_items is not a JSON array".into(),
        ));
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| normalize_line_item(entry, request_kind).map_err(|e| match e {
            QuoteError::CorruptRecord(msg) => QuoteError::CorruptRecord(format!("line {index}: {msg}")),
            other => other,
        }))
        .collect()
}

/// Maps a single stored line item onto the canonical shape.
pub fn normalize_line_item(entry: &Value, request_kind: FulfillmentKind) -> QuoteResult<LineItem> {
    let Value::Object(fields) = entry else {
        return Err(QuoteError::CorruptRecord("line item is not an object".into()));
    };

    let kind = match fields.get("kind").and_then(Value::as_str) {
        Some(tag) => tag.parse::<FulfillmentKind>().map_err(|_| {
            QuoteError::CorruptRecord(format!("unknown line item kind: {tag}"))
        })?,
        None => request_kind,
    };

    if !fields.contains_key("description") || !fields.contains_key("kind") {
        tracing::debug!("normalising legacy line item fields: {:?}", fields.keys().collect::<Vec<_>>());
    }

    let description = first_text(fields, DESCRIPTION_KEYS)
        .ok_or_else(|| QuoteError::CorruptRecord("line item has no description".into()))?;
    let line_total = first_number(fields, LINE_TOTAL_KEYS)?
        .ok_or_else(|| QuoteError::CorruptRecord("line item has no total".into()))?;

    match kind {
        FulfillmentKind::LabTest => Ok(LineItem::LabTest {
            description,
            line_total: money(line_total)?,
        }),
        FulfillmentKind::Medication => {
            let quantity = first_number(fields, QUANTITY_KEYS)?
                .ok_or_else(|| QuoteError::CorruptRecord("medication line has no quantity".into()))?;
            let unit_price = match first_number(fields, UNIT_PRICE_KEYS)? {
                Some(price) => price,
                None if quantity > 0.0 => line_total / quantity,
                None => {
                    return Err(QuoteError::CorruptRecord(
                        "medication line has no unit price".into(),
                    ))
                }
            };
            Ok(LineItem::Medication {
                description,
                quantity,
                unit_price: money(unit_price)?,
                line_total: money(line_total)?,
            })
        }
    }
}

fn first_text(fields: &Map<String, Value>, keys: &[&str]) -> Option<NonEmptyText> {
    keys.iter()
        .filter_map(|k| fields.get(*k).and_then(Value::as_str))
        .find_map(|s| NonEmptyText::new(s).ok())
}

// Older rows serialised decimals as strings.
fn first_number(fields: &Map<String, Value>, keys: &[&str]) -> QuoteResult<Option<f64>> {
    for key in keys {
        match fields.get(*key) {
            None | Some(Value::Null) => continue,
            Some(Value::Number(n)) => return Ok(n.as_f64()),
            Some(Value::String(s)) => {
                return s.trim().parse::<f64>().map(Some).map_err(|_| {
                    QuoteError::CorruptRecord(format!("{key} is not numeric: {s}"))
                })
            }
            Some(other) => {
                return Err(QuoteError::CorruptRecord(format!(
                    "{key} has unexpected type: {other}"
                )))
            }
        }
    }
    Ok(None)
}

fn money(value: f64) -> QuoteResult<Money> {
    Money::new(value).map_err(|e| QuoteError::CorruptRecord(e.to_string()))
}
