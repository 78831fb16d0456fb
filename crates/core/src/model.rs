//! Marketplace data model.
//!
//! One generic request/offer/target model serves both pharmacy (medication) and clinic
//! (lab-test) quoting. The only place the two differ is the shape of an offer's line items,
//! which is the tagged [`LineItem`] variant.

use crate::{QuoteError, QuoteResult};
use chrono::{DateTime, Utc};
use quote_types::{Money, NonEmptyText};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// What a request asks providers to fulfil, and therefore which providers may quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentKind {
    /// Prescription medications, quoted by pharmacies.
    Medication,
    /// Prescription lab tests, quoted by clinics.
    LabTest,
}

impl FulfillmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FulfillmentKind::Medication => "medication",
            FulfillmentKind::LabTest => "lab_test",
        }
    }
}

impl fmt::Display for FulfillmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FulfillmentKind {
    type Err = QuoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "medication" => Ok(FulfillmentKind::Medication),
            "lab_test" => Ok(FulfillmentKind::LabTest),
            other => Err(QuoteError::InvalidInput(format!(
                "unknown fulfillment kind: {other}"
            ))),
        }
    }
}

/// Request-level status machine.
///
/// `Pending -> Quoted -> {Accepted | Rejected | Cancelled}`, plus `Pending -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Quoted,
    Accepted,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Quoted => "quoted",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Accepted | RequestStatus::Rejected | RequestStatus::Cancelled
        )
    }

    /// Whether the status machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Pending, Quoted)
                | (Pending, Cancelled)
                | (Quoted, Accepted)
                | (Quoted, Rejected)
                | (Quoted, Cancelled)
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = QuoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "quoted" => Ok(RequestStatus::Quoted),
            "accepted" => Ok(RequestStatus::Accepted),
            "rejected" => Ok(RequestStatus::Rejected),
            "cancelled" => Ok(RequestStatus::Cancelled),
            other => Err(QuoteError::CorruptRecord(format!(
                "unknown request status: {other}"
            ))),
        }
    }
}

/// Offer-level status machine: `Quoted -> {Accepted | Rejected | Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Quoted,
    Accepted,
    Rejected,
    Cancelled,
}

impl OfferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OfferStatus::Quoted => "quoted",
            OfferStatus::Accepted => "accepted",
            OfferStatus::Rejected => "rejected",
            OfferStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, OfferStatus::Quoted)
    }

    pub fn can_transition_to(self, next: OfferStatus) -> bool {
        matches!(self, OfferStatus::Quoted) && next.is_terminal()
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OfferStatus {
    type Err = QuoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quoted" => Ok(OfferStatus::Quoted),
            "accepted" => Ok(OfferStatus::Accepted),
            "rejected" => Ok(OfferStatus::Rejected),
            "cancelled" => Ok(OfferStatus::Cancelled),
            other => Err(QuoteError::CorruptRecord(format!(
                "unknown offer status: {other}"
            ))),
        }
    }
}

/// A pharmacy or clinic as seen through the provider directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub name: String,
    pub kind: FulfillmentKind,
    pub active: bool,
    pub verified: bool,
}

impl Provider {
    /// Only active and verified providers may be targeted or respond.
    pub fn is_eligible(&self) -> bool {
        self.active && self.verified
    }
}

/// One fulfillable line copied from the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestedItem {
    pub name: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// A prescription as resolved through the source document adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub items: Vec<RequestedItem>,
}

/// A patient's ask for competing quotes against one source document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FulfillmentRequest {
    pub id: Uuid,
    pub kind: FulfillmentKind,
    pub requester_id: Uuid,
    pub source_document_id: Uuid,
    /// Snapshot taken at creation time; never re-read from the source document.
    pub items: Vec<RequestedItem>,
    pub notes: Option<String>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A provider authorised to respond to a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderTarget {
    pub request_id: Uuid,
    pub provider_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One priced line of an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineItem {
    /// Quantity-priced medication line: `line_total = quantity * unit_price`.
    Medication {
        description: NonEmptyText,
        quantity: f64,
        unit_price: Money,
        line_total: Money,
    },
    /// Flat-priced lab test.
    LabTest {
        description: NonEmptyText,
        line_total: Money,
    },
}

impl LineItem {
    pub fn kind(&self) -> FulfillmentKind {
        match self {
            LineItem::Medication { .. } => FulfillmentKind::Medication,
            LineItem::LabTest { .. } => FulfillmentKind::LabTest,
        }
    }

    pub fn description(&self) -> &NonEmptyText {
        match self {
            LineItem::Medication { description, .. } | LineItem::LabTest { description, .. } => {
                description
            }
        }
    }

    pub fn quantity(&self) -> Option<f64> {
        match self {
            LineItem::Medication { quantity, .. } => Some(*quantity),
            LineItem::LabTest { .. } => None,
        }
    }

    /// For flat-priced lines the unit price is the line total.
    pub fn unit_price(&self) -> Money {
        match self {
            LineItem::Medication { unit_price, .. } => *unit_price,
            LineItem::LabTest { line_total, .. } => *line_total,
        }
    }

    pub fn line_total(&self) -> Money {
        match self {
            LineItem::Medication { line_total, .. } | LineItem::LabTest { line_total, .. } => {
                *line_total
            }
        }
    }
}

/// One provider's priced response to one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotationOffer {
    pub id: Uuid,
    pub request_id: Uuid,
    pub provider_id: Uuid,
    pub line_items: Vec<LineItem>,
    pub subtotal: Money,
    pub delivery_charge: Money,
    pub total_amount: Money,
    pub notes: Option<String>,
    pub estimated_fulfillment_time: Option<String>,
    pub status: OfferStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a request.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub requester_id: Uuid,
    pub source_document_id: Uuid,
    pub kind: FulfillmentKind,
    pub provider_ids: Vec<Uuid>,
    pub notes: Option<String>,
}

/// Input for submitting an offer.
#[derive(Debug, Clone)]
pub struct NewOffer {
    pub request_id: Uuid,
    pub provider_id: Uuid,
    pub line_items: Vec<LineItem>,
    pub delivery_charge: Option<f64>,
    pub notes: Option<String>,
    pub estimated_fulfillment_time: Option<String>,
}

/// Result of a successful acceptance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub request: FulfillmentRequest,
    pub accepted: QuotationOffer,
    pub rejected_offer_ids: Vec<Uuid>,
}

/// Parse an externally supplied identifier.
pub fn parse_id(field: &str, value: &str) -> QuoteResult<Uuid> {
    Uuid::parse_str(value.trim())
        .map_err(|_| QuoteError::InvalidInput(format!("{field} is not a valid UUID: {value}")))
}
