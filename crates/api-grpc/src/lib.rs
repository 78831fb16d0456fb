//! # API gRPC
//!
//! gRPC server implementation for the quotation marketplace.
//!
//! Handles:
//! - gRPC service setup and authentication
//! - Service implementations using `quote-core` for data operations
//! - gRPC-specific concerns (interceptors, status mapping, tonic integration)
//!
//! Uses `api-shared` for common types and utilities.

#![warn(rust_2018_idioms)]

pub use service::{auth_interceptor, pb, status_from, QuoteGrpcService};

pub mod service;
