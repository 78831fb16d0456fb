use crate::pb::HealthRes;

/// Simple health service that can be used by both gRPC and REST APIs
///
/// This service provides a standardised way to check the health status of the quotation
/// service.
#[derive(Clone, Default)]
pub struct HealthService;

impl HealthService {
    /// Check health without touching storage.
    pub fn check_health() -> HealthRes {
        HealthRes {
            ok: true,
            message: "quotation service is alive".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_alive() {
        assert!(HealthService::check_health().ok);
    }
}
