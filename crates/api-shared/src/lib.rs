//! # API Shared
//!
//! Shared utilities and definitions for the quotation APIs.
//!
//! Contains:
//! - Protobuf-generated types (`pb` module)
//! - Conversions between `quote-core` types and the wire types
//! - Shared services like `HealthService`
//! - Authentication utilities (usable by both gRPC and REST)
//!
//! Used by `api-grpc` and `api-rest` for common functionality.

// Re-export the generated protobuf module. The generated code will be placed
// into OUT_DIR at build time by the build script.
pub mod pb {
    tonic::include_proto!("quote.v1");
}

pub mod auth;
pub mod blocking;
pub mod convert;
pub mod health;

pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("proto_descriptor");

pub use blocking::run_blocking;
pub use health::HealthService;
pub use pb::*;
