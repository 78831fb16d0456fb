use std::env;
use tonic::metadata::MetadataMap;

/// Header carrying the API key on gRPC calls.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Validates the provided API key against the expected API key from environment.
///
/// Returns `Ok(())` if the key is valid, or an error if invalid or missing.
#[allow(clippy::result_large_err)]
pub fn validate_api_key(provided_key: &str) -> Result<(), tonic::Status> {
    let expected_key = env::var("API_KEY")
        .map_err(|_| tonic::Status::internal("API_KEY not set in environment"))?;
    check_api_key(provided_key, &expected_key)
}

/// Compares a provided key with the expected one.
#[allow(clippy::result_large_err)]
pub fn check_api_key(provided_key: &str, expected_key: &str) -> Result<(), tonic::Status> {
    if expected_key.is_empty() {
        return Err(tonic::Status::internal("API_KEY is empty"));
    }
    if provided_key == expected_key {
        Ok(())
    } else {
        Err(tonic::Status::unauthenticated("Invalid API key"))
    }
}

/// Extracts the API key from request metadata.
#[allow(clippy::result_large_err)]
pub fn api_key_from_metadata(metadata: &MetadataMap) -> Result<&str, tonic::Status> {
    metadata
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| tonic::Status::unauthenticated("Missing x-api-key header"))
}
