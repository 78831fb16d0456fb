//! Read projections.
//!
//! Nothing here writes. Offer line items pass through the read-time normaliser in
//! [`crate::normalize`], so offers stored by older releases list in the canonical shape.

use super::shared::{
    collect_rows, load_offers_for_request, load_request, load_targets, require_owned_request,
    OfferRow, RequestRow, OFFER_COLUMNS, REQUEST_COLUMNS,
};
use super::QuotationService;
use crate::model::{
    FulfillmentKind, FulfillmentRequest, OfferStatus, Provider, ProviderTarget, QuotationOffer,
    RequestStatus,
};
use crate::{QuoteError, QuoteResult};
use rusqlite::{params, Connection};
use serde::Serialize;
use uuid::Uuid;

/// A request together with who was asked and what they offered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestView {
    pub request: FulfillmentRequest,
    pub targets: Vec<ProviderTarget>,
    /// Cheapest first, then earliest.
    pub offers: Vec<QuotationOffer>,
}

/// One of a provider's own offers, with where its request stands now.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderOfferView {
    pub offer: QuotationOffer,
    pub request_status: RequestStatus,
}

impl QuotationService {
    /// Lists every offer on a request, cheapest first, ties broken by submission time then id.
    ///
    /// # Errors
    ///
    /// `QuoteError::NotFound` if the request does not exist, `QuoteError::Forbidden` if it
    /// belongs to another patient.
    pub fn list_offers(
        &self,
        request_id: Uuid,
        acting_patient_id: Uuid,
    ) -> QuoteResult<Vec<QuotationOffer>> {
        self.store.read(|conn| {
            require_owned_request(conn, request_id, acting_patient_id)?;
            load_offers_for_request(conn, request_id)
        })
    }

    /// Full view of one request for its owner.
    pub fn get_request(&self, request_id: Uuid, acting_patient_id: Uuid) -> QuoteResult<RequestView> {
        self.store.read(|conn| {
            let request = require_owned_request(conn, request_id, acting_patient_id)?;
            view_of(conn, request)
        })
    }

    /// A patient's requests, newest first.
    pub fn requests_for_patient(&self, patient_id: Uuid) -> QuoteResult<Vec<RequestView>> {
        self.store.read(|conn| {
            let sql = format!(
                "SELECT {REQUEST_COLUMNS} FROM fulfillment_requests r
                 WHERE r.requester_id = ?1
                 ORDER BY r.created_at DESC, r.id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![patient_id.to_string()], RequestRow::from_row)?;
            let requests = collect_rows(rows, RequestRow::into_request)?;

            requests
                .into_iter()
                .map(|request| view_of(conn, request))
                .collect()
        })
    }

    /// Open requests that target `provider_id` and that it has not answered yet, newest first.
    pub fn provider_inbox(&self, provider_id: Uuid) -> QuoteResult<Vec<FulfillmentRequest>> {
        self.store.read(|conn| {
            let sql = format!(
                "SELECT {REQUEST_COLUMNS} FROM fulfillment_requests r
                 JOIN provider_targets t ON t.request_id = r.id
                 WHERE t.provider_id = ?1
                   AND r.status IN ('pending', 'quoted')
                   AND NOT EXISTS (
                       SELECT 1 FROM quotation_offers o
                       WHERE o.request_id = r.id AND o.provider_id = ?1
                   )
                 ORDER BY r.created_at DESC, r.id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![provider_id.to_string()], RequestRow::from_row)?;
            collect_rows(rows, RequestRow::into_request)
        })
    }

    /// A provider's own offers, newest first.
    pub fn offers_for_provider(&self, provider_id: Uuid) -> QuoteResult<Vec<ProviderOfferView>> {
        self.store.read(|conn| {
            let sql = format!(
                "SELECT {OFFER_COLUMNS}, r.status FROM quotation_offers o
                 JOIN fulfillment_requests r ON r.id = o.request_id
                 WHERE o.provider_id = ?1
                 ORDER BY o.created_at DESC, o.id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![provider_id.to_string()], |row| {
                Ok((OfferRow::from_row(row)?, row.get::<_, String>(13)?))
            })?;
            collect_rows(rows, |(offer, request_status)| {
                Ok(ProviderOfferView {
                    offer: offer.into_offer()?,
                    request_status: request_status.parse()?,
                })
            })
        })
    }

    /// The accepted offer on a request, if allocation has happened.
    ///
    /// This is what a downstream fulfilment component polls.
    ///
    /// # Errors
    ///
    /// `QuoteError::NotFound` if the request does not exist.
    pub fn accepted_offer(&self, request_id: Uuid) -> QuoteResult<Option<QuotationOffer>> {
        self.store.read(|conn| {
            if load_request(conn, request_id)?.is_none() {
                return Err(QuoteError::NotFound(format!("request {request_id}")));
            }
            Ok(load_offers_for_request(conn, request_id)?
                .into_iter()
                .find(|offer| offer.status == OfferStatus::Accepted))
        })
    }

    /// Active, verified providers of a kind, for patients choosing whom to ask.
    pub fn eligible_providers(&self, kind: FulfillmentKind) -> QuoteResult<Vec<Provider>> {
        self.directory.eligible(kind)
    }
}

fn view_of(conn: &Connection, request: FulfillmentRequest) -> QuoteResult<RequestView> {
    Ok(RequestView {
        targets: load_targets(conn, request.id)?,
        offers: load_offers_for_request(conn, request.id)?,
        request,
    })
}
