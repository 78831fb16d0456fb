//! # API REST
//!
//! REST API implementation for the quotation marketplace.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, status codes)
//!
//! Uses `api-shared` for common types and utilities. Request and response bodies are the
//! protobuf messages, serialised as JSON.

#![warn(rust_2018_idioms)]

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use api_shared::convert::{kind_from_pb, new_offer_from_pb, new_request_from_pb};
use api_shared::{pb, run_blocking, HealthService};
use quote_core::{parse_id, ErrorKind, QuotationService, QuoteError, QuoteResult};

/// Application state for the REST API server
#[derive(Clone)]
pub struct AppState {
    service: QuotationService,
}

impl AppState {
    pub fn new(service: QuotationService) -> Self {
        Self { service }
    }

    async fn call<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(QuotationService) -> QuoteResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let service = self.service.clone();
        Ok(run_blocking(move || f(service)).await?)
    }
}

/// A core error rendered as `{"error": ..., "message": ...}` with a matching status code.
#[derive(Debug)]
pub struct ApiError(QuoteError);

impl From<QuoteError> for ApiError {
    fn from(err: QuoteError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let error = match self.0 {
            QuoteError::AlreadyAllocated => "already_allocated",
            _ => kind.as_str(),
        };
        let message = if kind == ErrorKind::Internal {
            tracing::error!("internal error: {:?}", self.0);
            "Internal error".to_string()
        } else {
            self.0.to_string()
        };

        (
            status,
            Json(pb::ErrorRes {
                error: error.into(),
                message,
            }),
        )
            .into_response()
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        list_providers,
        create_request,
        get_request,
        list_offers,
        accept_offer,
        cancel_request,
        patient_requests,
        provider_inbox,
        provider_offers,
        accepted_offer,
        submit_offer,
    ),
    components(schemas(
        pb::HealthRes,
        pb::ErrorRes,
        pb::Provider,
        pb::ListProvidersRes,
        pb::RequestedItem,
        pb::FulfillmentRequest,
        pb::ProviderTarget,
        pb::LineItem,
        pb::QuotationOffer,
        pb::RequestView,
        pb::CreateRequestReq,
        pb::RequestRes,
        pb::CancelRequestReq,
        pb::ListRequestViewsRes,
        pb::SubmitOfferReq,
        pb::OfferRes,
        pb::ListOffersRes,
        pb::AcceptOfferReq,
        pb::AcceptOfferRes,
        pb::AcceptedOfferRes,
        pb::ListRequestsRes,
        pb::ProviderOffer,
        pb::ListProviderOffersRes,
    ))
)]
pub struct ApiDoc;

/// Builds the REST router with Swagger UI and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/providers", get(list_providers))
        .route("/requests", post(create_request))
        .route("/requests/:id", get(get_request))
        .route("/requests/:id/offers", get(list_offers))
        .route("/requests/:id/offers/:offer_id/accept", post(accept_offer))
        .route("/requests/:id/cancel", post(cancel_request))
        .route("/requests/:id/accepted-offer", get(accepted_offer))
        .route("/patients/:id/requests", get(patient_requests))
        .route("/providers/:id/inbox", get(provider_inbox))
        .route("/providers/:id/offers", get(provider_offers))
        .route("/offers", post(submit_offer))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = pb::HealthRes)
    )
)]
async fn health() -> Json<pb::HealthRes> {
    Json(HealthService::check_health())
}

#[utoipa::path(
    get,
    path = "/providers",
    params(("kind" = String, Query, description = "medication or lab_test")),
    responses(
        (status = 200, description = "Active, verified providers ordered by name", body = pb::ListProvidersRes),
        (status = 422, description = "Unknown kind", body = pb::ErrorRes)
    )
)]
/// Lists providers a patient may ask for quotes.
#[axum::debug_handler]
async fn list_providers(
    State(state): State<AppState>,
    Query(req): Query<pb::ListProvidersReq>,
) -> Result<Json<pb::ListProvidersRes>, ApiError> {
    let kind = kind_from_pb(&req.kind)?;
    let providers = state.call(move |s| s.eligible_providers(kind)).await?;
    Ok(Json(pb::ListProvidersRes {
        providers: providers.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/requests",
    request_body = pb::CreateRequestReq,
    responses(
        (status = 201, description = "Request created", body = pb::RequestRes),
        (status = 403, description = "Source document belongs to another patient", body = pb::ErrorRes),
        (status = 404, description = "Source document not found", body = pb::ErrorRes),
        (status = 409, description = "An open request already exists for the document", body = pb::ErrorRes),
        (status = 422, description = "Invalid providers or input", body = pb::ErrorRes)
    )
)]
/// Create a request for quotes against a source document.
#[axum::debug_handler]
async fn create_request(
    State(state): State<AppState>,
    Json(req): Json<pb::CreateRequestReq>,
) -> Result<(StatusCode, Json<pb::RequestRes>), ApiError> {
    let new = new_request_from_pb(req)?;
    let request = state.call(move |s| s.create_request(new)).await?;
    Ok((
        StatusCode::CREATED,
        Json(pb::RequestRes {
            request: Some(request.into()),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/requests/{id}",
    params(
        ("id" = String, Path, description = "Request id"),
        ("acting_patient_id" = String, Query, description = "Patient performing the read")
    ),
    responses(
        (status = 200, description = "Request with targets and offers", body = pb::RequestView),
        (status = 403, description = "Not the owner", body = pb::ErrorRes),
        (status = 404, description = "Request not found", body = pb::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(mut req): Query<pb::GetRequestReq>,
) -> Result<Json<pb::RequestView>, ApiError> {
    req.request_id = id;
    let request_id = parse_id("request_id", &req.request_id)?;
    let patient_id = parse_id("acting_patient_id", &req.acting_patient_id)?;
    let view = state
        .call(move |s| s.get_request(request_id, patient_id))
        .await?;
    Ok(Json(view.into()))
}

#[utoipa::path(
    get,
    path = "/requests/{id}/offers",
    params(
        ("id" = String, Path, description = "Request id"),
        ("acting_patient_id" = String, Query, description = "Patient performing the read")
    ),
    responses(
        (status = 200, description = "Offers, cheapest first", body = pb::ListOffersRes),
        (status = 403, description = "Not the owner", body = pb::ErrorRes),
        (status = 404, description = "Request not found", body = pb::ErrorRes)
    )
)]
/// List offers on a request, cheapest then earliest first.
#[axum::debug_handler]
async fn list_offers(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(mut req): Query<pb::ListOffersReq>,
) -> Result<Json<pb::ListOffersRes>, ApiError> {
    req.request_id = id;
    let request_id = parse_id("request_id", &req.request_id)?;
    let patient_id = parse_id("acting_patient_id", &req.acting_patient_id)?;
    let offers = state
        .call(move |s| s.list_offers(request_id, patient_id))
        .await?;
    Ok(Json(pb::ListOffersRes {
        offers: offers.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/requests/{id}/offers/{offer_id}/accept",
    request_body = pb::AcceptOfferReq,
    params(
        ("id" = String, Path, description = "Request id"),
        ("offer_id" = String, Path, description = "Offer to accept")
    ),
    responses(
        (status = 200, description = "Offer accepted, competitors rejected", body = pb::AcceptOfferRes),
        (status = 403, description = "Not the owner", body = pb::ErrorRes),
        (status = 404, description = "Request or offer not found", body = pb::ErrorRes),
        (status = 409, description = "Already allocated or request closed", body = pb::ErrorRes)
    )
)]
/// Accept one offer. At most one acceptance per request ever succeeds.
#[axum::debug_handler]
async fn accept_offer(
    State(state): State<AppState>,
    Path((id, offer_id)): Path<(String, String)>,
    Json(mut req): Json<pb::AcceptOfferReq>,
) -> Result<Json<pb::AcceptOfferRes>, ApiError> {
    req.request_id = id;
    req.offer_id = offer_id;
    let request_id = parse_id("request_id", &req.request_id)?;
    let offer_id = parse_id("offer_id", &req.offer_id)?;
    let patient_id = parse_id("acting_patient_id", &req.acting_patient_id)?;
    let allocation = state
        .call(move |s| s.accept_offer(request_id, offer_id, patient_id))
        .await?;
    Ok(Json(allocation.into()))
}

#[utoipa::path(
    post,
    path = "/requests/{id}/cancel",
    request_body = pb::CancelRequestReq,
    params(("id" = String, Path, description = "Request id")),
    responses(
        (status = 200, description = "Request cancelled", body = pb::RequestRes),
        (status = 403, description = "Not the owner", body = pb::ErrorRes),
        (status = 404, description = "Request not found", body = pb::ErrorRes),
        (status = 409, description = "Request already closed", body = pb::ErrorRes)
    )
)]
#[axum::debug_handler]
async fn cancel_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut req): Json<pb::CancelRequestReq>,
) -> Result<Json<pb::RequestRes>, ApiError> {
    req.request_id = id;
    let request_id = parse_id("request_id", &req.request_id)?;
    let patient_id = parse_id("acting_patient_id", &req.acting_patient_id)?;
    let request = state
        .call(move |s| s.cancel_request(request_id, patient_id))
        .await?;
    Ok(Json(pb::RequestRes {
        request: Some(request.into()),
    }))
}

#[utoipa::path(
    get,
    path = "/requests/{id}/accepted-offer",
    params(("id" = String, Path, description = "Request id")),
    responses(
        (status = 200, description = "The accepted offer, if any", body = pb::AcceptedOfferRes),
        (status = 404, description = "Request not found", body = pb::ErrorRes)
    )
)]
/// Allocation signal for downstream fulfilment.
#[axum::debug_handler]
async fn accepted_offer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<pb::AcceptedOfferRes>, ApiError> {
    let request_id = parse_id("request_id", &id)?;
    let offer = state.call(move |s| s.accepted_offer(request_id)).await?;
    Ok(Json(pb::AcceptedOfferRes {
        offer: offer.map(Into::into),
    }))
}

#[utoipa::path(
    get,
    path = "/patients/{id}/requests",
    params(("id" = String, Path, description = "Patient id")),
    responses(
        (status = 200, description = "The patient's requests, newest first", body = pb::ListRequestViewsRes)
    )
)]
#[axum::debug_handler]
async fn patient_requests(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<pb::ListRequestViewsRes>, ApiError> {
    let patient_id = parse_id("patient_id", &id)?;
    let views = state.call(move |s| s.requests_for_patient(patient_id)).await?;
    Ok(Json(pb::ListRequestViewsRes {
        requests: views.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/providers/{id}/inbox",
    params(("id" = String, Path, description = "Provider id")),
    responses(
        (status = 200, description = "Open requests awaiting this provider's offer", body = pb::ListRequestsRes)
    )
)]
#[axum::debug_handler]
async fn provider_inbox(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<pb::ListRequestsRes>, ApiError> {
    let provider_id = parse_id("provider_id", &id)?;
    let requests = state.call(move |s| s.provider_inbox(provider_id)).await?;
    Ok(Json(pb::ListRequestsRes {
        requests: requests.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/providers/{id}/offers",
    params(("id" = String, Path, description = "Provider id")),
    responses(
        (status = 200, description = "The provider's offers, newest first", body = pb::ListProviderOffersRes)
    )
)]
#[axum::debug_handler]
async fn provider_offers(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<pb::ListProviderOffersRes>, ApiError> {
    let provider_id = parse_id("provider_id", &id)?;
    let offers = state.call(move |s| s.offers_for_provider(provider_id)).await?;
    Ok(Json(pb::ListProviderOffersRes {
        offers: offers.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/offers",
    request_body = pb::SubmitOfferReq,
    responses(
        (status = 201, description = "Offer recorded", body = pb::OfferRes),
        (status = 403, description = "Provider not targeted or not eligible", body = pb::ErrorRes),
        (status = 404, description = "Request not found", body = pb::ErrorRes),
        (status = 409, description = "Duplicate offer or request closed", body = pb::ErrorRes),
        (status = 422, description = "Invalid line items", body = pb::ErrorRes)
    )
)]
/// Submit a provider's single offer on a request.
#[axum::debug_handler]
async fn submit_offer(
    State(state): State<AppState>,
    Json(req): Json<pb::SubmitOfferReq>,
) -> Result<(StatusCode, Json<pb::OfferRes>), ApiError> {
    let new = new_offer_from_pb(req)?;
    let offer = state.call(move |s| s.submit_offer(new)).await?;
    Ok((
        StatusCode::CREATED,
        Json(pb::OfferRes {
            offer: Some(offer.into()),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use http_body_util::BodyExt;
    use quote_core::{
        CoreConfig, FulfillmentKind, NonEmptyText, RequestedItem, SqliteProviderDirectory,
        SqliteSourceDocuments,
    };
    use serde::de::DeserializeOwned;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct Setup {
        _dir: TempDir,
        app: Router,
        pharmacies: Vec<Uuid>,
        patient: Uuid,
        document: Uuid,
    }

    fn setup() -> Setup {
        let dir = TempDir::new().unwrap();
        let cfg = Arc::new(CoreConfig::with_database(dir.path().join("q.sqlite3")).unwrap());
        let service = QuotationService::with_sqlite_collaborators(cfg);
        service.store().initialise().unwrap();

        let directory = SqliteProviderDirectory::new(service.store().clone());
        let pharmacies = ["Alpha", "Beta"]
            .iter()
            .map(|name| {
                directory
                    .register_provider(name, FulfillmentKind::Medication, true, true)
                    .unwrap()
                    .id
            })
            .collect();
        let patient = Uuid::new_v4();
        let document = SqliteSourceDocuments::new(service.store().clone())
            .register_document(
                patient,
                &[RequestedItem {
                    name: NonEmptyText::new("Metformin 500mg").unwrap(),
                    instructions: Some("twice daily".into()),
                }],
                &[],
            )
            .unwrap();

        Setup {
            _dir: dir,
            app: router(AppState::new(service)),
            pharmacies,
            patient,
            document,
        }
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn parse<T: DeserializeOwned>(value: serde_json::Value) -> T {
        serde_json::from_value(value).unwrap()
    }

    async fn create_request(s: &Setup) -> pb::FulfillmentRequest {
        let (status, body) = send(
            &s.app,
            Method::POST,
            "/requests",
            Some(serde_json::json!({
                "requester_id": s.patient.to_string(),
                "source_document_id": s.document.to_string(),
                "kind": "medication",
                "provider_ids": s.pharmacies.iter().map(Uuid::to_string).collect::<Vec<_>>(),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        parse::<pb::RequestRes>(body).request.unwrap()
    }

    async fn submit(s: &Setup, request_id: &str, provider: Uuid, price: f64) -> pb::QuotationOffer {
        let (status, body) = send(
            &s.app,
            Method::POST,
            "/offers",
            Some(serde_json::json!({
                "request_id": request_id,
                "provider_id": provider.to_string(),
                "line_items": [{
                    "kind": "medication",
                    "description": "Metformin 500mg",
                    "quantity": 1.0,
                    "unit_price": price,
                    "line_total": price,
                }],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        parse::<pb::OfferRes>(body).offer.unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let s = setup();
        let (status, body) = send(&s.app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn providers_are_listed_by_kind() {
        let s = setup();
        let (status, body) = send(&s.app, Method::GET, "/providers?kind=medication", None).await;
        assert_eq!(status, StatusCode::OK);
        let res: pb::ListProvidersRes = parse(body);
        assert_eq!(res.providers.len(), 2);
        assert_eq!(res.providers[0].name, "Alpha");

        let (status, body) = send(&s.app, Method::GET, "/providers?kind=surgery", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "validation_error");
    }

    #[tokio::test]
    async fn quote_and_accept_flow() {
        let s = setup();
        let request = create_request(&s).await;
        let expensive = submit(&s, &request.id, s.pharmacies[0], 12.0).await;
        let cheap = submit(&s, &request.id, s.pharmacies[1], 9.5).await;

        let uri = format!("/requests/{}/offers?acting_patient_id={}", request.id, s.patient);
        let (status, body) = send(&s.app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let listed: pb::ListOffersRes = parse(body);
        let ids: Vec<_> = listed.offers.iter().map(|o| o.id.clone()).collect();
        assert_eq!(ids, vec![cheap.id.clone(), expensive.id.clone()]);

        let uri = format!("/requests/{}/offers/{}/accept", request.id, cheap.id);
        let body = serde_json::json!({ "acting_patient_id": s.patient.to_string() });
        let (status, res) = send(&s.app, Method::POST, &uri, Some(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let allocation: pb::AcceptOfferRes = parse(res);
        assert_eq!(allocation.rejected_offer_ids, vec![expensive.id.clone()]);

        let uri = format!("/requests/{}/offers/{}/accept", request.id, expensive.id);
        let (status, res) = send(&s.app, Method::POST, &uri, Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(res["error"], "already_allocated");

        let uri = format!("/requests/{}/accepted-offer", request.id);
        let (status, res) = send(&s.app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(res["offer"]["id"], cheap.id);
    }

    #[tokio::test]
    async fn owner_checks_and_missing_requests() {
        let s = setup();
        let request = create_request(&s).await;

        let uri = format!("/requests/{}?acting_patient_id={}", request.id, Uuid::new_v4());
        let (status, body) = send(&s.app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");

        let uri = format!("/requests/{}?acting_patient_id={}", Uuid::new_v4(), s.patient);
        let (status, _) = send(&s.app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let uri = format!("/requests/{}?acting_patient_id={}", request.id, s.patient);
        let (status, body) = send(&s.app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let view: pb::RequestView = parse(body);
        assert_eq!(view.targets.len(), 2);
        assert_eq!(view.request.unwrap().items[0].name, "Metformin 500mg");
    }

    #[tokio::test]
    async fn cancel_then_offers_conflict() {
        let s = setup();
        let request = create_request(&s).await;

        let uri = format!("/requests/{}/cancel", request.id);
        let body = serde_json::json!({ "acting_patient_id": s.patient.to_string() });
        let (status, res) = send(&s.app, Method::POST, &uri, Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(res["request"]["status"], "cancelled");

        let (status, res) = send(
            &s.app,
            Method::POST,
            "/offers",
            Some(serde_json::json!({
                "request_id": request.id,
                "provider_id": s.pharmacies[0].to_string(),
                "line_items": [{
                    "kind": "medication",
                    "description": "Metformin 500mg",
                    "quantity": 1.0,
                    "unit_price": 3.0,
                    "line_total": 3.0,
                }],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(res["error"], "conflict");
    }

    #[tokio::test]
    async fn provider_views() {
        let s = setup();
        let request = create_request(&s).await;
        submit(&s, &request.id, s.pharmacies[0], 7.0).await;

        let uri = format!("/providers/{}/inbox", s.pharmacies[0]);
        let (_, body) = send(&s.app, Method::GET, &uri, None).await;
        assert!(parse::<pb::ListRequestsRes>(body).requests.is_empty());

        let uri = format!("/providers/{}/inbox", s.pharmacies[1]);
        let (_, body) = send(&s.app, Method::GET, &uri, None).await;
        assert_eq!(parse::<pb::ListRequestsRes>(body).requests[0].id, request.id);

        let uri = format!("/providers/{}/offers", s.pharmacies[0]);
        let (_, body) = send(&s.app, Method::GET, &uri, None).await;
        let mine: pb::ListProviderOffersRes = parse(body);
        assert_eq!(mine.offers[0].request_status, "quoted");

        let uri = format!("/patients/{}/requests", s.patient);
        let (_, body) = send(&s.app, Method::GET, &uri, None).await;
        assert_eq!(parse::<pb::ListRequestViewsRes>(body).requests.len(), 1);
    }
}
