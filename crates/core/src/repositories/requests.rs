//! Request ledger.
//!
//! Owns `fulfillment_requests` and `provider_targets`. A request and its targets are written in
//! one transaction; targets are never changed afterwards.

use super::shared::{open_request_for_document, require_owned_request};
use super::QuotationService;
use crate::model::{FulfillmentRequest, NewRequest, RequestStatus};
use crate::store::{constraint_violation, now, timestamp, Constraint};
use crate::validation::{dedup_provider_ids, validate_free_text};
use crate::{QuoteError, QuoteResult};
use rusqlite::params;
use uuid::Uuid;

impl QuotationService {
    /// Creates a request for quotes against one source document.
    ///
    /// Steps, each failing before anything is written:
    /// 1. resolve the source document (`NotFound`, `Forbidden`), which must have items of the
    ///    requested kind (`Validation`);
    /// 2. refuse a second non-terminal request of the same kind for the document (`Conflict`);
    /// 3. resolve the deduplicated provider ids; every one must exist, be active and
    ///    verified, and serve the requested kind (`Validation`).
    ///
    /// The request (status `pending`, items snapshotted from the document) and one target row
    /// per provider are then inserted atomically. The open-request check is repeated under
    /// the write lock and backed by a partial unique index, so two racing creations of one
    /// kind for the same document cannot both succeed.
    pub fn create_request(&self, new: NewRequest) -> QuoteResult<FulfillmentRequest> {
        let notes = validate_free_text("notes", new.notes)?;

        let document =
            self.documents
                .resolve(new.source_document_id, new.requester_id, new.kind)?;
        if document.items.is_empty() {
            return Err(QuoteError::Validation(format!(
                "source document {} has no {} items to quote",
                document.id, new.kind
            )));
        }

        if let Some(existing) = self
            .store
            .read(|conn| open_request_for_document(conn, new.requester_id, document.id, new.kind))?
        {
            return Err(duplicate_request(document.id, existing));
        }

        let provider_ids = dedup_provider_ids(&new.provider_ids)?;
        let providers = self.directory.lookup(&provider_ids)?;
        if providers.len() != provider_ids.len() {
            return Err(QuoteError::Validation(
                "one or more selected providers do not exist".into(),
            ));
        }
        if let Some(bad) = providers
            .iter()
            .find(|p| !p.is_eligible() || p.kind != new.kind)
        {
            return Err(QuoteError::Validation(format!(
                "provider {} cannot be asked for {} quotes (active={}, verified={}, kind={})",
                bad.id, new.kind, bad.active, bad.verified, bad.kind
            )));
        }

        let now = now();
        let request = FulfillmentRequest {
            id: Uuid::new_v4(),
            kind: new.kind,
            requester_id: new.requester_id,
            source_document_id: document.id,
            items: document.items,
            notes,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let items = serde_json::to_string(&request.items)?;
        let ts = timestamp(now);

        self.store.write("create request", |tx| {
            if let Some(existing) =
                open_request_for_document(
                    tx,
                    request.requester_id,
                    request.source_document_id,
                    request.kind,
                )?
            {
                return Err(duplicate_request(request.source_document_id, existing));
            }

            tx.execute(
                "INSERT INTO fulfillment_requests
                 (id, kind, requester_id, source_document_id, items, notes, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    request.id.to_string(),
                    request.kind.as_str(),
                    request.requester_id.to_string(),
                    request.source_document_id.to_string(),
                    items,
                    request.notes,
                    request.status.as_str(),
                    ts
                ],
            )
            .map_err(|e| match constraint_violation(&e) {
                Some(Constraint::Unique) => QuoteError::Conflict(format!(
                    "an active {} request already exists for source document {}",
                    request.kind, request.source_document_id
                )),
                _ => e.into(),
            })?;

            for provider_id in &provider_ids {
                tx.execute(
                    "INSERT INTO provider_targets (request_id, provider_id, created_at)
                     VALUES (?1, ?2, ?3)",
                    params![request.id.to_string(), provider_id.to_string(), ts],
                )?;
            }
            Ok(())
        })?;

        tracing::info!(
            "patient {} created {} request {} targeting {} provider(s)",
            request.requester_id,
            request.kind,
            request.id,
            provider_ids.len()
        );
        Ok(request)
    }

    /// Withdraws a non-terminal request.
    ///
    /// Offers under the request keep their `quoted` status as history, but can no longer be
    /// accepted because the request is terminal.
    ///
    /// # Errors
    ///
    /// - `QuoteError::NotFound` / `QuoteError::Forbidden` if the request is missing or owned
    ///   by another patient,
    /// - `QuoteError::Conflict` if the request is already terminal.
    pub fn cancel_request(
        &self,
        request_id: Uuid,
        acting_patient_id: Uuid,
    ) -> QuoteResult<FulfillmentRequest> {
        let now = now();
        let ts = timestamp(now);

        let cancelled = self.store.write("cancel request", |tx| {
            let request = require_owned_request(tx, request_id, acting_patient_id)?;
            if !request.status.can_transition_to(RequestStatus::Cancelled) {
                return Err(QuoteError::Conflict(format!(
                    "request {request_id} is already {}",
                    request.status
                )));
            }

            let changed = tx.execute(
                "UPDATE fulfillment_requests SET status = 'cancelled', updated_at = ?2
                 WHERE id = ?1 AND status IN ('pending', 'quoted')",
                params![request_id.to_string(), ts],
            )?;
            if changed != 1 {
                return Err(QuoteError::Conflict(format!(
                    "request {request_id} changed status concurrently"
                )));
            }

            Ok(FulfillmentRequest {
                status: RequestStatus::Cancelled,
                updated_at: now,
                ..request
            })
        })?;

        tracing::info!("patient {} cancelled request {}", acting_patient_id, request_id);
        Ok(cancelled)
    }
}

fn duplicate_request(document_id: Uuid, existing: Uuid) -> QuoteError {
    tracing::warn!(
        "refusing second open request for source document {} (open request {})",
        document_id,
        existing
    );
    QuoteError::Conflict(format!(
        "an active request ({existing}) already exists for source document {document_id}"
    ))
}
