//! Conversions between `quote-core` types and the protobuf wire types.
//!
//! Outgoing values use `From`; incoming requests are parsed with the `*_from_pb` functions,
//! which reject malformed ids, kinds and amounts before anything reaches the core.

use crate::pb;
use chrono::{DateTime, SecondsFormat, Utc};
use quote_core::{
    parse_id, Allocation, FulfillmentKind, FulfillmentRequest, LineItem, Money, NewOffer,
    NewRequest, NonEmptyText, Provider, ProviderOfferView, ProviderTarget, QuotationOffer,
    QuoteError, QuoteResult, RequestView, RequestedItem,
};
use uuid::Uuid;

fn wire_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl From<Provider> for pb::Provider {
    fn from(p: Provider) -> Self {
        pb::Provider {
            id: p.id.to_string(),
            name: p.name,
            kind: p.kind.as_str().into(),
            active: p.active,
            verified: p.verified,
        }
    }
}

impl From<RequestedItem> for pb::RequestedItem {
    fn from(item: RequestedItem) -> Self {
        pb::RequestedItem {
            name: item.name.into_inner(),
            instructions: item.instructions,
        }
    }
}

impl From<FulfillmentRequest> for pb::FulfillmentRequest {
    fn from(r: FulfillmentRequest) -> Self {
        pb::FulfillmentRequest {
            id: r.id.to_string(),
            kind: r.kind.as_str().into(),
            requester_id: r.requester_id.to_string(),
            source_document_id: r.source_document_id.to_string(),
            items: r.items.into_iter().map(Into::into).collect(),
            notes: r.notes,
            status: r.status.as_str().into(),
            created_at: wire_time(r.created_at),
            updated_at: wire_time(r.updated_at),
        }
    }
}

impl From<ProviderTarget> for pb::ProviderTarget {
    fn from(t: ProviderTarget) -> Self {
        pb::ProviderTarget {
            provider_id: t.provider_id.to_string(),
            created_at: wire_time(t.created_at),
        }
    }
}

impl From<LineItem> for pb::LineItem {
    fn from(item: LineItem) -> Self {
        pb::LineItem {
            kind: item.kind().as_str().into(),
            description: item.description().to_string(),
            quantity: item.quantity(),
            unit_price: item.unit_price().amount(),
            line_total: item.line_total().amount(),
        }
    }
}

impl From<QuotationOffer> for pb::QuotationOffer {
    fn from(o: QuotationOffer) -> Self {
        pb::QuotationOffer {
            id: o.id.to_string(),
            request_id: o.request_id.to_string(),
            provider_id: o.provider_id.to_string(),
            line_items: o.line_items.into_iter().map(Into::into).collect(),
            subtotal: o.subtotal.amount(),
            delivery_charge: o.delivery_charge.amount(),
            total_amount: o.total_amount.amount(),
            notes: o.notes,
            estimated_fulfillment_time: o.estimated_fulfillment_time,
            status: o.status.as_str().into(),
            created_at: wire_time(o.created_at),
            updated_at: wire_time(o.updated_at),
        }
    }
}

impl From<RequestView> for pb::RequestView {
    fn from(v: RequestView) -> Self {
        pb::RequestView {
            request: Some(v.request.into()),
            targets: v.targets.into_iter().map(Into::into).collect(),
            offers: v.offers.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<ProviderOfferView> for pb::ProviderOffer {
    fn from(v: ProviderOfferView) -> Self {
        pb::ProviderOffer {
            offer: Some(v.offer.into()),
            request_status: v.request_status.as_str().into(),
        }
    }
}

impl From<Allocation> for pb::AcceptOfferRes {
    fn from(a: Allocation) -> Self {
        pb::AcceptOfferRes {
            request: Some(a.request.into()),
            accepted: Some(a.accepted.into()),
            rejected_offer_ids: a.rejected_offer_ids.iter().map(Uuid::to_string).collect(),
        }
    }
}

/// Parses a wire kind (`"medication"` or `"lab_test"`).
pub fn kind_from_pb(kind: &str) -> QuoteResult<FulfillmentKind> {
    kind.parse()
}

/// Parses one offer line. Medication lines must carry a quantity; lab-test lines are flat
/// priced and must not carry one. A lab-test `unit_price` is ignored.
pub fn line_item_from_pb(item: pb::LineItem) -> QuoteResult<LineItem> {
    let description = NonEmptyText::new(&item.description)?;
    let line_total = Money::new(item.line_total)?;

    match kind_from_pb(&item.kind)? {
        FulfillmentKind::Medication => {
            let quantity = item.quantity.ok_or_else(|| {
                QuoteError::Validation(format!("medication line '{description}' has no quantity"))
            })?;
            Ok(LineItem::Medication {
                description,
                quantity,
                unit_price: Money::new(item.unit_price)?,
                line_total,
            })
        }
        FulfillmentKind::LabTest => {
            if let Some(quantity) = item.quantity {
                return Err(QuoteError::Validation(format!(
                    "lab test line '{description}' is flat priced but has quantity {quantity}"
                )));
            }
            Ok(LineItem::LabTest {
                description,
                line_total,
            })
        }
    }
}

pub fn new_request_from_pb(req: pb::CreateRequestReq) -> QuoteResult<NewRequest> {
    Ok(NewRequest {
        requester_id: parse_id("requester_id", &req.requester_id)?,
        source_document_id: parse_id("source_document_id", &req.source_document_id)?,
        kind: kind_from_pb(&req.kind)?,
        provider_ids: req
            .provider_ids
            .iter()
            .map(|id| parse_id("provider_ids", id))
            .collect::<QuoteResult<_>>()?,
        notes: req.notes,
    })
}

pub fn new_offer_from_pb(req: pb::SubmitOfferReq) -> QuoteResult<NewOffer> {
    Ok(NewOffer {
        request_id: parse_id("request_id", &req.request_id)?,
        provider_id: parse_id("provider_id", &req.provider_id)?,
        line_items: req
            .line_items
            .into_iter()
            .map(line_item_from_pb)
            .collect::<QuoteResult<_>>()?,
        delivery_charge: req.delivery_charge,
        notes: req.notes,
        estimated_fulfillment_time: req.estimated_fulfillment_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_line(kind: &str, quantity: Option<f64>) -> pb::LineItem {
        pb::LineItem {
            kind: kind.into(),
            description: "Amoxicillin 500mg".into(),
            quantity,
            unit_price: 2.0,
            line_total: 6.0,
        }
    }

    #[test]
    fn medication_line_requires_quantity() {
        assert!(matches!(
            line_item_from_pb(wire_line("medication", None)),
            Err(QuoteError::Validation(_))
        ));
        let item = line_item_from_pb(wire_line("medication", Some(3.0))).unwrap();
        assert_eq!(item.quantity(), Some(3.0));
    }

    #[test]
    fn lab_line_is_flat_priced() {
        let item = line_item_from_pb(wire_line("lab_test", None)).unwrap();
        assert_eq!(item.unit_price(), Money::new(6.0).unwrap());

        let back = pb::LineItem::from(item);
        assert_eq!(back.kind, "lab_test");
        assert_eq!(back.quantity, None);
    }

    #[test]
    fn lab_line_with_quantity_is_rejected() {
        let mut line = wire_line("lab_test", Some(3.0));
        line.line_total = 100.0;
        assert!(matches!(
            line_item_from_pb(line),
            Err(QuoteError::Validation(_))
        ));
    }

    #[test]
    fn negative_amounts_and_unknown_kinds_are_rejected() {
        let mut negative = wire_line("medication", Some(1.0));
        negative.line_total = -1.0;
        assert!(matches!(
            line_item_from_pb(negative),
            Err(QuoteError::Validation(_))
        ));
        assert!(matches!(
            line_item_from_pb(wire_line("surgery", Some(1.0))),
            Err(QuoteError::InvalidInput(_))
        ));
    }

    #[test]
    fn create_request_parses_ids() {
        let provider = Uuid::new_v4();
        let req = pb::CreateRequestReq {
            requester_id: Uuid::new_v4().to_string(),
            source_document_id: Uuid::new_v4().to_string(),
            kind: "medication".into(),
            provider_ids: vec![provider.to_string()],
            notes: None,
        };
        let parsed = new_request_from_pb(req.clone()).unwrap();
        assert_eq!(parsed.provider_ids, vec![provider]);

        let bad = pb::CreateRequestReq {
            provider_ids: vec!["not-a-uuid".into()],
            ..req
        };
        assert!(matches!(
            new_request_from_pb(bad),
            Err(QuoteError::InvalidInput(_))
        ));
    }
}
