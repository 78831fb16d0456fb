//! Row mapping and lookups shared by the ledgers, the allocation engine and the projections.
//!
//! All functions take a `&Connection`; a `&Transaction` derefs to one, so the same lookups run
//! both in plain reads and under a write lock.

use crate::model::{FulfillmentKind, FulfillmentRequest, OfferStatus, ProviderTarget, QuotationOffer};
use crate::normalize::decode_line_items;
use crate::store::parse_timestamp;
use crate::{QuoteError, QuoteResult};
use quote_types::Money;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

pub(crate) const REQUEST_COLUMNS: &str = "r.id, r.kind, r.requester_id, r.source_document_id, \
     r.items, r.notes, r.status, r.created_at, r.updated_at";

pub(crate) const OFFER_COLUMNS: &str = "o.id, o.request_id, o.provider_id, o.line_items, \
     o.subtotal, o.delivery_charge, o.total_amount, o.notes, o.estimated_fulfillment_time, \
     o.status, o.created_at, o.updated_at, r.kind";

/// Cheapest first, then earliest, then by id so that equal offers list deterministically.
pub(crate) const OFFER_LISTING_ORDER: &str = "o.total_amount ASC, o.created_at ASC, o.id ASC";

pub(crate) struct RequestRow {
    id: String,
    kind: String,
    requester_id: String,
    source_document_id: String,
    items: String,
    notes: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
}

impl RequestRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            requester_id: row.get(2)?,
            source_document_id: row.get(3)?,
            items: row.get(4)?,
            notes: row.get(5)?,
            status: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    pub(crate) fn into_request(self) -> QuoteResult<FulfillmentRequest> {
        Ok(FulfillmentRequest {
            id: stored_uuid("request id", &self.id)?,
            kind: stored_kind(&self.kind)?,
            requester_id: stored_uuid("requester id", &self.requester_id)?,
            source_document_id: stored_uuid("source document id", &self.source_document_id)?,
            items: serde_json::from_str(&self.items).map_err(|e| {
                QuoteError::CorruptRecord(format!("request {} items: {e}", self.id))
            })?,
            notes: self.notes,
            status: self.status.parse()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

pub(crate) struct OfferRow {
    id: String,
    request_id: String,
    provider_id: String,
    line_items: String,
    subtotal: f64,
    delivery_charge: f64,
    total_amount: f64,
    notes: Option<String>,
    estimated_fulfillment_time: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
    request_kind: String,
}

impl OfferRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            request_id: row.get(1)?,
            provider_id: row.get(2)?,
            line_items: row.get(3)?,
            subtotal: row.get(4)?,
            delivery_charge: row.get(5)?,
            total_amount: row.get(6)?,
            notes: row.get(7)?,
            estimated_fulfillment_time: row.get(8)?,
            status: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            request_kind: row.get(12)?,
        })
    }

    pub(crate) fn into_offer(self) -> QuoteResult<QuotationOffer> {
        let kind = stored_kind(&self.request_kind)?;
        Ok(QuotationOffer {
            id: stored_uuid("offer id", &self.id)?,
            request_id: stored_uuid("request id", &self.request_id)?,
            provider_id: stored_uuid("provider id", &self.provider_id)?,
            line_items: decode_line_items(&self.line_items, kind)?,
            subtotal: stored_money("subtotal", self.subtotal)?,
            delivery_charge: stored_money("delivery_charge", self.delivery_charge)?,
            total_amount: stored_money("total_amount", self.total_amount)?,
            notes: self.notes,
            estimated_fulfillment_time: self.estimated_fulfillment_time,
            status: self.status.parse::<OfferStatus>()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn stored_uuid(field: &str, value: &str) -> QuoteResult<Uuid> {
    Uuid::parse_str(value).map_err(|_| QuoteError::CorruptRecord(format!("{field}: {value}")))
}

fn stored_kind(value: &str) -> QuoteResult<FulfillmentKind> {
    value
        .parse()
        .map_err(|_| QuoteError::CorruptRecord(format!("fulfillment kind: {value}")))
}

fn stored_money(field: &str, value: f64) -> QuoteResult<Money> {
    Money::new(value).map_err(|e| QuoteError::CorruptRecord(format!("{field}: {e}")))
}

/// Collects mapped rows and converts each one, failing on the first bad row.
pub(crate) fn collect_rows<R, T>(
    rows: impl Iterator<Item = rusqlite::Result<R>>,
    convert: impl Fn(R) -> QuoteResult<T>,
) -> QuoteResult<Vec<T>> {
    rows.map(|row| convert(row?)).collect()
}

pub(crate) fn load_request(conn: &Connection, request_id: Uuid) -> QuoteResult<Option<FulfillmentRequest>> {
    let sql = format!("SELECT {REQUEST_COLUMNS} FROM fulfillment_requests r WHERE r.id = ?1");
    conn.query_row(&sql, params![request_id.to_string()], RequestRow::from_row)
        .optional()?
        .map(RequestRow::into_request)
        .transpose()
}

/// Loads a request and checks it belongs to `patient_id`.
///
/// # Errors
///
/// - `QuoteError::NotFound` if the request does not exist,
/// - `QuoteError::Forbidden` if it belongs to another patient.
pub(crate) fn require_owned_request(
    conn: &Connection,
    request_id: Uuid,
    patient_id: Uuid,
) -> QuoteResult<FulfillmentRequest> {
    let request = load_request(conn, request_id)?
        .ok_or_else(|| QuoteError::NotFound(format!("request {request_id}")))?;

    if request.requester_id != patient_id {
        tracing::warn!(
            "patient {} denied access to request {} owned by another patient",
            patient_id,
            request_id
        );
        return Err(QuoteError::Forbidden(format!(
            "request {request_id} belongs to another patient"
        )));
    }

    Ok(request)
}

/// The non-terminal request of `kind` for a document, if one exists.
pub(crate) fn open_request_for_document(
    conn: &Connection,
    requester_id: Uuid,
    source_document_id: Uuid,
    kind: FulfillmentKind,
) -> QuoteResult<Option<Uuid>> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM fulfillment_requests
             WHERE requester_id = ?1 AND source_document_id = ?2 AND kind = ?3
               AND status IN ('pending', 'quoted')",
            params![
                requester_id.to_string(),
                source_document_id.to_string(),
                kind.as_str()
            ],
            |row| row.get(0),
        )
        .optional()?;
    id.map(|id| stored_uuid("request id", &id)).transpose()
}

pub(crate) fn load_targets(conn: &Connection, request_id: Uuid) -> QuoteResult<Vec<ProviderTarget>> {
    let mut stmt = conn.prepare(
        "SELECT provider_id, created_at FROM provider_targets
         WHERE request_id = ?1 ORDER BY created_at, provider_id",
    )?;
    let rows = stmt.query_map(params![request_id.to_string()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    collect_rows(rows, |(provider_id, created_at)| {
        Ok(ProviderTarget {
            request_id,
            provider_id: stored_uuid("provider id", &provider_id)?,
            created_at: parse_timestamp(&created_at)?,
        })
    })
}

pub(crate) fn is_target(conn: &Connection, request_id: Uuid, provider_id: Uuid) -> QuoteResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM provider_targets WHERE request_id = ?1 AND provider_id = ?2",
            params![request_id.to_string(), provider_id.to_string()],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

pub(crate) fn has_offer_from(conn: &Connection, request_id: Uuid, provider_id: Uuid) -> QuoteResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM quotation_offers WHERE request_id = ?1 AND provider_id = ?2",
            params![request_id.to_string(), provider_id.to_string()],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

pub(crate) fn load_offer(conn: &Connection, offer_id: Uuid) -> QuoteResult<Option<QuotationOffer>> {
    let sql = format!(
        "SELECT {OFFER_COLUMNS} FROM quotation_offers o
         JOIN fulfillment_requests r ON r.id = o.request_id
         WHERE o.id = ?1"
    );
    conn.query_row(&sql, params![offer_id.to_string()], OfferRow::from_row)
        .optional()?
        .map(OfferRow::into_offer)
        .transpose()
}

/// Every offer on a request in listing order.
pub(crate) fn load_offers_for_request(conn: &Connection, request_id: Uuid) -> QuoteResult<Vec<QuotationOffer>> {
    let sql = format!(
        "SELECT {OFFER_COLUMNS} FROM quotation_offers o
         JOIN fulfillment_requests r ON r.id = o.request_id
         WHERE o.request_id = ?1
         ORDER BY {OFFER_LISTING_ORDER}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![request_id.to_string()], OfferRow::from_row)?;
    collect_rows(rows, OfferRow::into_offer)
}
