// Re-export the proto module from the shared `api-shared` crate so callers
// can reference `api_grpc::service::pb`.
pub use api_shared::pb;

use api_shared::convert::{kind_from_pb, new_offer_from_pb, new_request_from_pb};
use api_shared::{auth, run_blocking, HealthService};
use pb::quote_service_server::QuoteService;
use quote_core::{parse_id, QuotationService, QuoteError, QuoteResult};
use tonic::{Request, Response, Status};

/// Authentication interceptor for gRPC requests
#[allow(clippy::result_large_err)]
pub fn auth_interceptor(req: Request<()>) -> Result<Request<()>, Status> {
    let api_key = auth::api_key_from_metadata(req.metadata())?;
    auth::validate_api_key(api_key)?;
    Ok(req)
}

/// Maps a core error onto a gRPC status.
///
/// Storage and decoding failures are logged and reported without their details.
pub fn status_from(err: QuoteError) -> Status {
    match err {
        QuoteError::NotFound(msg) => Status::not_found(msg),
        QuoteError::Forbidden(msg) => Status::permission_denied(msg),
        QuoteError::Conflict(msg) => Status::already_exists(msg),
        QuoteError::AlreadyAllocated => Status::aborted(QuoteError::AlreadyAllocated.to_string()),
        QuoteError::Validation(msg) | QuoteError::InvalidInput(msg) => {
            Status::invalid_argument(msg)
        }
        other => {
            tracing::error!("internal error: {:?}", other);
            Status::internal("Internal error")
        }
    }
}

#[allow(clippy::result_large_err)]
fn id(field: &str, value: &str) -> Result<uuid::Uuid, Status> {
    parse_id(field, value).map_err(status_from)
}

#[derive(Clone)]
pub struct QuoteGrpcService {
    service: QuotationService,
}

impl QuoteGrpcService {
    pub fn new(service: QuotationService) -> Self {
        Self { service }
    }

    /// Runs a core operation on the blocking pool and maps its error.
    async fn call<T, F>(&self, f: F) -> Result<T, Status>
    where
        F: FnOnce(QuotationService) -> QuoteResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let service = self.service.clone();
        run_blocking(move || f(service)).await.map_err(status_from)
    }
}

#[tonic::async_trait]
impl QuoteService for QuoteGrpcService {
    async fn health(&self, _req: Request<()>) -> Result<Response<pb::HealthRes>, Status> {
        Ok(Response::new(HealthService::check_health()))
    }

    async fn list_providers(
        &self,
        req: Request<pb::ListProvidersReq>,
    ) -> Result<Response<pb::ListProvidersRes>, Status> {
        let kind = kind_from_pb(&req.into_inner().kind).map_err(status_from)?;
        let providers = self.call(move |s| s.eligible_providers(kind)).await?;
        Ok(Response::new(pb::ListProvidersRes {
            providers: providers.into_iter().map(Into::into).collect(),
        }))
    }

    async fn create_request(
        &self,
        req: Request<pb::CreateRequestReq>,
    ) -> Result<Response<pb::RequestRes>, Status> {
        let new = new_request_from_pb(req.into_inner()).map_err(status_from)?;
        let request = self.call(move |s| s.create_request(new)).await?;
        Ok(Response::new(pb::RequestRes {
            request: Some(request.into()),
        }))
    }

    async fn get_request(
        &self,
        req: Request<pb::GetRequestReq>,
    ) -> Result<Response<pb::RequestView>, Status> {
        let req = req.into_inner();
        let request_id = id("request_id", &req.request_id)?;
        let patient_id = id("acting_patient_id", &req.acting_patient_id)?;
        let view = self
            .call(move |s| s.get_request(request_id, patient_id))
            .await?;
        Ok(Response::new(view.into()))
    }

    async fn cancel_request(
        &self,
        req: Request<pb::CancelRequestReq>,
    ) -> Result<Response<pb::RequestRes>, Status> {
        let req = req.into_inner();
        let request_id = id("request_id", &req.request_id)?;
        let patient_id = id("acting_patient_id", &req.acting_patient_id)?;
        let request = self
            .call(move |s| s.cancel_request(request_id, patient_id))
            .await?;
        Ok(Response::new(pb::RequestRes {
            request: Some(request.into()),
        }))
    }

    async fn list_patient_requests(
        &self,
        req: Request<pb::ListPatientRequestsReq>,
    ) -> Result<Response<pb::ListRequestViewsRes>, Status> {
        let patient_id = id("patient_id", &req.into_inner().patient_id)?;
        let views = self.call(move |s| s.requests_for_patient(patient_id)).await?;
        Ok(Response::new(pb::ListRequestViewsRes {
            requests: views.into_iter().map(Into::into).collect(),
        }))
    }

    async fn submit_offer(
        &self,
        req: Request<pb::SubmitOfferReq>,
    ) -> Result<Response<pb::OfferRes>, Status> {
        let new = new_offer_from_pb(req.into_inner()).map_err(status_from)?;
        let offer = self.call(move |s| s.submit_offer(new)).await?;
        Ok(Response::new(pb::OfferRes {
            offer: Some(offer.into()),
        }))
    }

    async fn list_offers(
        &self,
        req: Request<pb::ListOffersReq>,
    ) -> Result<Response<pb::ListOffersRes>, Status> {
        let req = req.into_inner();
        let request_id = id("request_id", &req.request_id)?;
        let patient_id = id("acting_patient_id", &req.acting_patient_id)?;
        let offers = self
            .call(move |s| s.list_offers(request_id, patient_id))
            .await?;
        Ok(Response::new(pb::ListOffersRes {
            offers: offers.into_iter().map(Into::into).collect(),
        }))
    }

    async fn accept_offer(
        &self,
        req: Request<pb::AcceptOfferReq>,
    ) -> Result<Response<pb::AcceptOfferRes>, Status> {
        let req = req.into_inner();
        let request_id = id("request_id", &req.request_id)?;
        let offer_id = id("offer_id", &req.offer_id)?;
        let patient_id = id("acting_patient_id", &req.acting_patient_id)?;
        let allocation = self
            .call(move |s| s.accept_offer(request_id, offer_id, patient_id))
            .await?;
        Ok(Response::new(allocation.into()))
    }

    async fn accepted_offer(
        &self,
        req: Request<pb::AcceptedOfferReq>,
    ) -> Result<Response<pb::AcceptedOfferRes>, Status> {
        let request_id = id("request_id", &req.into_inner().request_id)?;
        let offer = self.call(move |s| s.accepted_offer(request_id)).await?;
        Ok(Response::new(pb::AcceptedOfferRes {
            offer: offer.map(Into::into),
        }))
    }

    async fn provider_inbox(
        &self,
        req: Request<pb::ProviderInboxReq>,
    ) -> Result<Response<pb::ListRequestsRes>, Status> {
        let provider_id = id("provider_id", &req.into_inner().provider_id)?;
        let requests = self.call(move |s| s.provider_inbox(provider_id)).await?;
        Ok(Response::new(pb::ListRequestsRes {
            requests: requests.into_iter().map(Into::into).collect(),
        }))
    }

    async fn provider_offers(
        &self,
        req: Request<pb::ProviderOffersReq>,
    ) -> Result<Response<pb::ListProviderOffersRes>, Status> {
        let provider_id = id("provider_id", &req.into_inner().provider_id)?;
        let offers = self.call(move |s| s.offers_for_provider(provider_id)).await?;
        Ok(Response::new(pb::ListProviderOffersRes {
            offers: offers.into_iter().map(Into::into).collect(),
        }))
    }
}
