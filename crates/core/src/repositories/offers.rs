//! Offer ledger.
//!
//! Providers submit offers independently and concurrently. Two storage rules carry the
//! invariants: `UNIQUE (request_id, provider_id)` on offers (one offer per provider, ever) and
//! the composite foreign key from an offer to its target row (only targeted providers). The
//! request's `pending -> quoted` move is a conditional update, so whichever first offer commits
//! first performs it and the others find it already done.

use super::shared::{has_offer_from, is_target, load_request};
use super::QuotationService;
use crate::model::{FulfillmentRequest, NewOffer, OfferStatus, QuotationOffer};
use crate::pricing::price_offer;
use crate::store::{constraint_violation, now, timestamp, Constraint};
use crate::validation::validate_free_text;
use crate::{QuoteError, QuoteResult};
use rusqlite::{params, Connection};
use uuid::Uuid;

impl QuotationService {
    /// Records a provider's offer on a request.
    ///
    /// # Errors
    ///
    /// In check order:
    /// - `QuoteError::NotFound` if the request does not exist,
    /// - `QuoteError::Conflict` if the request is terminal,
    /// - `QuoteError::Forbidden` if the provider is not targeted by the request, or is no
    ///   longer active and verified,
    /// - `QuoteError::Conflict` if the provider already submitted an offer,
    /// - `QuoteError::Validation` if the line items or delivery charge are invalid.
    pub fn submit_offer(&self, new: NewOffer) -> QuoteResult<QuotationOffer> {
        let request = self
            .store
            .read(|conn| check_submission(conn, new.request_id, new.provider_id))?;

        let eligible = self
            .directory
            .lookup(&[new.provider_id])?
            .iter()
            .any(|p| p.id == new.provider_id && p.is_eligible());
        if !eligible {
            tracing::warn!(
                "provider {} is not active and verified; offer on {} refused",
                new.provider_id,
                new.request_id
            );
            return Err(QuoteError::Forbidden(format!(
                "provider {} is not eligible to submit offers",
                new.provider_id
            )));
        }

        let pricing = price_offer(request.kind, &new.line_items, new.delivery_charge)?;
        let notes = validate_free_text("notes", new.notes)?;
        let estimated_fulfillment_time =
            validate_free_text("estimated_fulfillment_time", new.estimated_fulfillment_time)?;

        let now = now();
        let offer = QuotationOffer {
            id: Uuid::new_v4(),
            request_id: request.id,
            provider_id: new.provider_id,
            line_items: new.line_items,
            subtotal: pricing.subtotal,
            delivery_charge: pricing.delivery_charge,
            total_amount: pricing.total_amount,
            notes,
            estimated_fulfillment_time,
            status: OfferStatus::Quoted,
            created_at: now,
            updated_at: now,
        };
        let line_items = serde_json::to_string(&offer.line_items)?;
        let ts = timestamp(now);

        let moved_to_quoted = self.store.write("submit offer", |tx| {
            // Re-check under the write lock: the request may have become terminal, or this
            // provider's first submission may have committed, since the read above.
            check_submission(tx, offer.request_id, offer.provider_id)?;

            tx.execute(
                "INSERT INTO quotation_offers
                 (id, request_id, provider_id, line_items, subtotal, delivery_charge, total_amount,
                  notes, estimated_fulfillment_time, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    offer.id.to_string(),
                    offer.request_id.to_string(),
                    offer.provider_id.to_string(),
                    line_items,
                    offer.subtotal.amount(),
                    offer.delivery_charge.amount(),
                    offer.total_amount.amount(),
                    offer.notes,
                    offer.estimated_fulfillment_time,
                    offer.status.as_str(),
                    ts
                ],
            )
            .map_err(|e| match constraint_violation(&e) {
                Some(Constraint::Unique) => duplicate_offer(offer.request_id, offer.provider_id),
                Some(Constraint::ForeignKey) => not_targeted(offer.request_id, offer.provider_id),
                _ => e.into(),
            })?;

            let changed = tx.execute(
                "UPDATE fulfillment_requests SET status = 'quoted', updated_at = ?2
                 WHERE id = ?1 AND status = 'pending'",
                params![offer.request_id.to_string(), ts],
            )?;
            Ok(changed == 1)
        })?;

        if moved_to_quoted {
            tracing::info!("request {} moved pending -> quoted", offer.request_id);
        }
        tracing::info!(
            "provider {} quoted {} on request {} (offer {})",
            offer.provider_id,
            offer.total_amount,
            offer.request_id,
            offer.id
        );
        Ok(offer)
    }
}

/// Submission checks 1-4, shared by the optimistic read and the locked re-check.
fn check_submission(
    conn: &Connection,
    request_id: Uuid,
    provider_id: Uuid,
) -> QuoteResult<FulfillmentRequest> {
    let request = load_request(conn, request_id)?
        .ok_or_else(|| QuoteError::NotFound(format!("request {request_id}")))?;

    if request.status.is_terminal() {
        return Err(QuoteError::Conflict(format!(
            "request {request_id} is {} and accepts no new offers",
            request.status
        )));
    }

    if !is_target(conn, request_id, provider_id)? {
        return Err(not_targeted(request_id, provider_id));
    }

    if has_offer_from(conn, request_id, provider_id)? {
        return Err(duplicate_offer(request_id, provider_id));
    }

    Ok(request)
}

fn not_targeted(request_id: Uuid, provider_id: Uuid) -> QuoteError {
    tracing::warn!(
        "provider {} tried to quote on request {} without being targeted",
        provider_id,
        request_id
    );
    QuoteError::Forbidden(format!(
        "provider {provider_id} was not asked to quote on request {request_id}"
    ))
}

fn duplicate_offer(request_id: Uuid, provider_id: Uuid) -> QuoteError {
    QuoteError::Conflict(format!(
        "provider {provider_id} has already submitted an offer for request {request_id}"
    ))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{medication_line, offer_totalling, Fixture};
    use super::*;
    use crate::model::{FulfillmentKind, LineItem, NewRequest, RequestStatus};
    use quote_types::{Money, NonEmptyText};
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn first_offer_moves_request_to_quoted_and_prices_offer() {
        let fx = Fixture::new();
        let a = fx.pharmacy("A");
        let request = fx.medication_request(&[&a]);

        let offer = fx
            .service
            .submit_offer(NewOffer {
                request_id: request.id,
                provider_id: a.id,
                line_items: vec![
                    medication_line("Amoxicillin 500mg", 21.0, 0.5),
                    medication_line("Ibuprofen 200mg", 2.0, 3.25),
                ],
                delivery_charge: Some(4.0),
                notes: Some("generic substitutes".into()),
                estimated_fulfillment_time: Some("same day".into()),
            })
            .unwrap();

        assert_eq!(offer.status, OfferStatus::Quoted);
        assert!(offer.subtotal.approx_eq(Money::new(17.0).unwrap(), 1e-9));
        assert!(offer.total_amount.approx_eq(Money::new(21.0).unwrap(), 1e-9));

        let view = fx.service.get_request(request.id, fx.patient).unwrap();
        assert_eq!(view.request.status, RequestStatus::Quoted);
        assert_eq!(view.offers, vec![offer]);
    }

    #[test]
    fn resubmission_always_conflicts() {
        let fx = Fixture::new();
        let a = fx.pharmacy("A");
        let request = fx.medication_request(&[&a]);

        fx.service
            .submit_offer(offer_totalling(request.id, a.id, 10.0))
            .unwrap();
        let second = fx.service.submit_offer(offer_totalling(request.id, a.id, 8.0));
        assert!(matches!(second, Err(QuoteError::Conflict(_))));
    }

    #[test]
    fn untargeted_provider_is_forbidden() {
        let fx = Fixture::new();
        let a = fx.pharmacy("A");
        let d = fx.pharmacy("D");
        let request = fx.medication_request(&[&a]);

        let result = fx.service.submit_offer(offer_totalling(request.id, d.id, 10.0));
        assert!(matches!(result, Err(QuoteError::Forbidden(_))));
    }

    #[test]
    fn deactivated_target_is_forbidden() {
        let fx = Fixture::new();
        let a = fx.pharmacy("A");
        let request = fx.medication_request(&[&a]);
        fx.directory.set_flags(a.id, true, false).unwrap();

        let result = fx.service.submit_offer(offer_totalling(request.id, a.id, 10.0));
        assert!(matches!(result, Err(QuoteError::Forbidden(_))));
    }

    #[test]
    fn unknown_request_is_not_found() {
        let fx = Fixture::new();
        let a = fx.pharmacy("A");
        let result = fx.service.submit_offer(offer_totalling(Uuid::new_v4(), a.id, 10.0));
        assert!(matches!(result, Err(QuoteError::NotFound(_))));
    }

    #[test]
    fn bad_arithmetic_and_wrong_kind_are_validation_errors() {
        let fx = Fixture::new();
        let a = fx.pharmacy("A");
        let request = fx.medication_request(&[&a]);

        let mut wrong_total = offer_totalling(request.id, a.id, 10.0);
        wrong_total.line_items = vec![LineItem::Medication {
            description: NonEmptyText::new("Amoxicillin").unwrap(),
            quantity: 3.0,
            unit_price: Money::new(2.0).unwrap(),
            line_total: Money::new(7.0).unwrap(),
        }];
        assert!(matches!(
            fx.service.submit_offer(wrong_total),
            Err(QuoteError::Validation(_))
        ));

        let mut lab_lines = offer_totalling(request.id, a.id, 10.0);
        lab_lines.line_items = vec![LineItem::LabTest {
            description: NonEmptyText::new("CBC").unwrap(),
            line_total: Money::new(10.0).unwrap(),
        }];
        assert!(matches!(
            fx.service.submit_offer(lab_lines),
            Err(QuoteError::Validation(_))
        ));

        // A rejected submission does not use up the provider's single offer.
        assert!(fx
            .service
            .submit_offer(offer_totalling(request.id, a.id, 10.0))
            .is_ok());
    }

    #[test]
    fn lab_test_offers_are_flat_priced() {
        let fx = Fixture::new();
        let clinic = fx.clinic("Central Lab");
        let document = fx.prescription();
        let request = fx
            .service
            .create_request(NewRequest {
                requester_id: fx.patient,
                source_document_id: document,
                kind: FulfillmentKind::LabTest,
                provider_ids: vec![clinic.id],
                notes: None,
            })
            .unwrap();

        let offer = fx
            .service
            .submit_offer(NewOffer {
                request_id: request.id,
                provider_id: clinic.id,
                line_items: vec![LineItem::LabTest {
                    description: NonEmptyText::new("Full blood count").unwrap(),
                    line_total: Money::new(35.0).unwrap(),
                }],
                delivery_charge: None,
                notes: None,
                estimated_fulfillment_time: Some("48 hours".into()),
            })
            .unwrap();
        assert_eq!(offer.total_amount, Money::new(35.0).unwrap());
        assert_eq!(offer.delivery_charge, Money::ZERO);
    }

    #[test]
    fn concurrent_first_offers_all_succeed() {
        let fx = Fixture::new();
        let providers: Vec<_> = (0..6).map(|i| fx.pharmacy(&format!("P{i}"))).collect();
        let refs: Vec<_> = providers.iter().collect();
        let request = fx.medication_request(&refs);

        let barrier = Arc::new(Barrier::new(providers.len()));
        let handles: Vec<_> = providers
            .iter()
            .enumerate()
            .map(|(i, provider)| {
                let service = fx.another_handle();
                let barrier = barrier.clone();
                let offer = offer_totalling(request.id, provider.id, 10.0 + i as f64);
                thread::spawn(move || {
                    barrier.wait();
                    service.submit_offer(offer)
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let view = fx.service.get_request(request.id, fx.patient).unwrap();
        assert_eq!(view.request.status, RequestStatus::Quoted);
        assert_eq!(view.offers.len(), providers.len());
    }

    #[test]
    fn concurrent_duplicate_submissions_store_one_offer() {
        let fx = Fixture::new();
        let a = fx.pharmacy("A");
        let request = fx.medication_request(&[&a]);

        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = fx.another_handle();
                let barrier = barrier.clone();
                let offer = offer_totalling(request.id, a.id, 12.0);
                thread::spawn(move || {
                    barrier.wait();
                    service.submit_offer(offer)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, QuoteError::Conflict(_))));
    }
}
