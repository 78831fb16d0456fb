//! # Quote Core
//!
//! Core business logic for the prescription quotation marketplace.
//!
//! A patient turns a prescription into a [`FulfillmentRequest`] aimed at chosen pharmacies or
//! clinics, each targeted provider may answer once with a priced [`QuotationOffer`], and the
//! patient accepts exactly one of them. Everything is stored in one SQLite database:
//! - request and offer ledgers with their status machines
//! - the allocation engine that guarantees at most one accepted offer per request
//! - read projections for patients, providers and downstream fulfilment
//!
//! **No API concerns**: HTTP/gRPC servers and wire types belong in `api-grpc`, `api-rest`, or
//! `api-shared`.

pub mod collaborators;
pub mod config;
pub mod constants;
pub mod error;
pub mod model;
pub mod normalize;
pub mod pricing;
pub mod repositories;
pub mod store;
pub mod validation;

pub use collaborators::{
    ProviderDirectory, SourceDocumentAdapter, SqliteProviderDirectory, SqliteSourceDocuments,
};
pub use config::CoreConfig;
pub use error::{ErrorKind, QuoteError, QuoteResult};
pub use model::{
    parse_id, Allocation, FulfillmentKind, FulfillmentRequest, LineItem, NewOffer, NewRequest,
    OfferStatus, Provider, ProviderTarget, QuotationOffer, RequestStatus, RequestedItem,
    SourceDocument,
};
pub use repositories::projections::{ProviderOfferView, RequestView};
pub use repositories::QuotationService;
pub use store::Store;

pub use quote_types::{Money, NonEmptyText};
