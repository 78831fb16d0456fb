//! Allocation engine.
//!
//! Accepting an offer is the one operation where competing callers must be serialised: several
//! patients' sessions (or retries) may try to accept different offers on the same request at
//! once. The whole decision runs inside a single `BEGIN IMMEDIATE` transaction, and each status
//! change is a conditional update that only matches the expected prior status. The partial
//! unique index on accepted offers backs this up at the storage level.

use super::shared::{load_offer, require_owned_request};
use super::QuotationService;
use crate::model::{Allocation, FulfillmentRequest, OfferStatus, QuotationOffer, RequestStatus};
use crate::store::{constraint_violation, now, timestamp, Constraint};
use crate::{QuoteError, QuoteResult};
use rusqlite::{params, Transaction};
use uuid::Uuid;

impl QuotationService {
    /// Accepts one offer on a request, rejecting every other quoted offer and closing the
    /// request as `accepted`. All of it commits together or not at all.
    ///
    /// # Errors
    ///
    /// - `QuoteError::NotFound` if the request does not exist, or the offer does not exist
    ///   under that request,
    /// - `QuoteError::Forbidden` if the acting patient does not own the request,
    /// - `QuoteError::AlreadyAllocated` if another offer was accepted first,
    /// - `QuoteError::Conflict` if the request was cancelled or rejected, or the offer is no
    ///   longer `quoted`,
    /// - `QuoteError::Conflict` if storage stayed busy for every allocation attempt.
    pub fn accept_offer(
        &self,
        request_id: Uuid,
        offer_id: Uuid,
        acting_patient_id: Uuid,
    ) -> QuoteResult<Allocation> {
        let at = now();
        let ts = timestamp(at);

        let allocation = self.store.write("accept offer", |tx| {
            let request = require_owned_request(tx, request_id, acting_patient_id)?;
            let offer = load_offer(tx, offer_id)?
                .filter(|offer| offer.request_id == request_id)
                .ok_or_else(|| {
                    QuoteError::NotFound(format!("offer {offer_id} on request {request_id}"))
                })?;

            check_acceptable(&request, &offer)?;
            claim(tx, &request, &offer, &ts)?;
            let rejected_offer_ids = reject_competitors(tx, request_id, offer_id, &ts)?;
            close_request(tx, request_id, &ts)?;

            Ok(Allocation {
                request: FulfillmentRequest {
                    status: RequestStatus::Accepted,
                    updated_at: at,
                    ..request
                },
                accepted: QuotationOffer {
                    status: OfferStatus::Accepted,
                    updated_at: at,
                    ..offer
                },
                rejected_offer_ids,
            })
        })?;

        tracing::info!(
            "request {} allocated to provider {} (offer {}, {} competing offer(s) rejected)",
            request_id,
            allocation.accepted.provider_id,
            offer_id,
            allocation.rejected_offer_ids.len()
        );
        Ok(allocation)
    }
}

fn check_acceptable(request: &FulfillmentRequest, offer: &QuotationOffer) -> QuoteResult<()> {
    if request.status == RequestStatus::Accepted {
        return Err(already_allocated(request.id));
    }
    if !request.status.can_transition_to(RequestStatus::Accepted) {
        return Err(QuoteError::Conflict(format!(
            "request {} is {} and cannot be allocated",
            request.id, request.status
        )));
    }

    if !offer.status.can_transition_to(OfferStatus::Accepted) {
        return Err(QuoteError::Conflict(format!(
            "offer {} is {} and cannot be accepted",
            offer.id, offer.status
        )));
    }

    Ok(())
}

/// Moves the chosen offer `quoted -> accepted`.
fn claim(
    tx: &Transaction<'_>,
    request: &FulfillmentRequest,
    offer: &QuotationOffer,
    ts: &str,
) -> QuoteResult<()> {
    let changed = tx
        .execute(
            "UPDATE quotation_offers SET status = 'accepted', updated_at = ?2
             WHERE id = ?1 AND status = 'quoted'",
            params![offer.id.to_string(), ts],
        )
        .map_err(|e| match constraint_violation(&e) {
            Some(Constraint::Unique) => already_allocated(request.id),
            _ => e.into(),
        })?;

    if changed == 0 {
        return Err(already_allocated(request.id));
    }
    Ok(())
}

/// Rejects every other still-quoted offer on the request, returning their ids.
fn reject_competitors(
    tx: &Transaction<'_>,
    request_id: Uuid,
    accepted_offer_id: Uuid,
    ts: &str,
) -> QuoteResult<Vec<Uuid>> {
    let mut stmt = tx.prepare(
        "SELECT id FROM quotation_offers
         WHERE request_id = ?1 AND id != ?2 AND status = 'quoted'
         ORDER BY created_at, id",
    )?;
    let ids = stmt
        .query_map(
            params![request_id.to_string(), accepted_offer_id.to_string()],
            |row| row.get::<_, String>(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;

    tx.execute(
        "UPDATE quotation_offers SET status = 'rejected', updated_at = ?3
         WHERE request_id = ?1 AND id != ?2 AND status = 'quoted'",
        params![request_id.to_string(), accepted_offer_id.to_string(), ts],
    )?;

    ids.iter()
        .map(|id| {
            Uuid::parse_str(id).map_err(|_| QuoteError::CorruptRecord(format!("offer id: {id}")))
        })
        .collect()
}

fn close_request(tx: &Transaction<'_>, request_id: Uuid, ts: &str) -> QuoteResult<()> {
    let changed = tx.execute(
        "UPDATE fulfillment_requests SET status = 'accepted', updated_at = ?2
         WHERE id = ?1 AND status IN ('pending', 'quoted')",
        params![request_id.to_string(), ts],
    )?;
    if changed != 1 {
        return Err(already_allocated(request_id));
    }
    Ok(())
}

fn already_allocated(request_id: Uuid) -> QuoteError {
    tracing::warn!("allocation refused: request {} already has an accepted offer", request_id);
    QuoteError::AlreadyAllocated
}

#[cfg(test)]
mod tests {
    use super::super::testing::{offer_totalling, Fixture};
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn accepting_one_offer_rejects_the_others() {
        let fx = Fixture::new();
        let a = fx.pharmacy("A");
        let b = fx.pharmacy("B");
        let c = fx.pharmacy("C");
        let request = fx.medication_request(&[&a, &b, &c]);

        let oa = fx.service.submit_offer(offer_totalling(request.id, a.id, 30.0)).unwrap();
        let ob = fx.service.submit_offer(offer_totalling(request.id, b.id, 25.0)).unwrap();

        let allocation = fx.service.accept_offer(request.id, ob.id, fx.patient).unwrap();
        assert_eq!(allocation.request.status, RequestStatus::Accepted);
        assert_eq!(allocation.accepted.id, ob.id);
        assert_eq!(allocation.accepted.status, OfferStatus::Accepted);
        assert_eq!(allocation.rejected_offer_ids, vec![oa.id]);

        let view = fx.service.get_request(request.id, fx.patient).unwrap();
        assert_eq!(view.request.status, RequestStatus::Accepted);
        let statuses: Vec<_> = view.offers.iter().map(|o| (o.id, o.status)).collect();
        assert_eq!(
            statuses,
            vec![(ob.id, OfferStatus::Accepted), (oa.id, OfferStatus::Rejected)]
        );

        // The provider that never answered can no longer do so.
        assert!(matches!(
            fx.service.submit_offer(offer_totalling(request.id, c.id, 5.0)),
            Err(QuoteError::Conflict(_))
        ));
        assert_eq!(
            fx.service.accepted_offer(request.id).unwrap().map(|o| o.id),
            Some(ob.id)
        );
    }

    #[test]
    fn second_acceptance_is_already_allocated() {
        let fx = Fixture::new();
        let a = fx.pharmacy("A");
        let b = fx.pharmacy("B");
        let request = fx.medication_request(&[&a, &b]);
        let oa = fx.service.submit_offer(offer_totalling(request.id, a.id, 30.0)).unwrap();
        let ob = fx.service.submit_offer(offer_totalling(request.id, b.id, 25.0)).unwrap();

        fx.service.accept_offer(request.id, oa.id, fx.patient).unwrap();
        for offer in [oa.id, ob.id] {
            assert!(matches!(
                fx.service.accept_offer(request.id, offer, fx.patient),
                Err(QuoteError::AlreadyAllocated)
            ));
        }
    }

    #[test]
    fn concurrent_acceptances_allocate_exactly_once() {
        let fx = Fixture::new();
        let providers: Vec<_> = (0..5).map(|i| fx.pharmacy(&format!("P{i}"))).collect();
        let refs: Vec<_> = providers.iter().collect();
        let request = fx.medication_request(&refs);
        let offers: Vec<_> = providers
            .iter()
            .enumerate()
            .map(|(i, p)| {
                fx.service
                    .submit_offer(offer_totalling(request.id, p.id, 20.0 + i as f64))
                    .unwrap()
            })
            .collect();

        let barrier = Arc::new(Barrier::new(offers.len()));
        let handles: Vec<_> = offers
            .iter()
            .map(|offer| {
                let service = fx.another_handle();
                let barrier = barrier.clone();
                let (request_id, offer_id, patient) = (request.id, offer.id, fx.patient);
                thread::spawn(move || {
                    barrier.wait();
                    service.accept_offer(request_id, offer_id, patient)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        for result in &results {
            if let Err(e) = result {
                assert!(
                    matches!(e, QuoteError::AlreadyAllocated),
                    "losers must see the allocation, got: {e:?}"
                );
            }
        }

        let view = fx.service.get_request(request.id, fx.patient).unwrap();
        let accepted: Vec<_> = view
            .offers
            .iter()
            .filter(|o| o.status == OfferStatus::Accepted)
            .collect();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].id, winners[0].accepted.id);
        assert!(view
            .offers
            .iter()
            .filter(|o| o.id != winners[0].accepted.id)
            .all(|o| o.status == OfferStatus::Rejected));
    }

    #[test]
    fn cancelled_request_cannot_be_allocated() {
        let fx = Fixture::new();
        let a = fx.pharmacy("A");
        let request = fx.medication_request(&[&a]);
        let offer = fx.service.submit_offer(offer_totalling(request.id, a.id, 30.0)).unwrap();

        fx.service.cancel_request(request.id, fx.patient).unwrap();
        assert!(matches!(
            fx.service.accept_offer(request.id, offer.id, fx.patient),
            Err(QuoteError::Conflict(_))
        ));
        assert_eq!(fx.service.accepted_offer(request.id).unwrap(), None);
    }

    #[test]
    fn accepted_request_is_immutable() {
        let fx = Fixture::new();
        let a = fx.pharmacy("A");
        let request = fx.medication_request(&[&a]);
        let offer = fx.service.submit_offer(offer_totalling(request.id, a.id, 30.0)).unwrap();
        fx.service.accept_offer(request.id, offer.id, fx.patient).unwrap();

        assert!(matches!(
            fx.service.cancel_request(request.id, fx.patient),
            Err(QuoteError::Conflict(_))
        ));

        let view = fx.service.get_request(request.id, fx.patient).unwrap();
        assert_eq!(view.request.status, RequestStatus::Accepted);
        assert_eq!(view.offers[0].status, OfferStatus::Accepted);
    }

    #[test]
    fn only_the_owner_may_accept_and_offer_must_belong_to_request() {
        let fx = Fixture::new();
        let a = fx.pharmacy("A");
        let first = fx.medication_request(&[&a]);
        let second = fx.medication_request(&[&a]);
        let offer = fx.service.submit_offer(offer_totalling(first.id, a.id, 30.0)).unwrap();

        assert!(matches!(
            fx.service.accept_offer(first.id, offer.id, Uuid::new_v4()),
            Err(QuoteError::Forbidden(_))
        ));
        assert!(matches!(
            fx.service.accept_offer(second.id, offer.id, fx.patient),
            Err(QuoteError::NotFound(_))
        ));
        assert!(matches!(
            fx.service.accept_offer(first.id, Uuid::new_v4(), fx.patient),
            Err(QuoteError::NotFound(_))
        ));

        // Nothing changed.
        let view = fx.service.get_request(first.id, fx.patient).unwrap();
        assert_eq!(view.request.status, RequestStatus::Quoted);
        assert_eq!(view.offers[0].status, OfferStatus::Quoted);
    }
}
