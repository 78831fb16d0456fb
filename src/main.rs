use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tonic_reflection::server::Builder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_grpc::{QuoteGrpcService, auth_interceptor, pb::quote_service_server::QuoteServiceServer};
use api_rest::{AppState, router};
use api_shared::FILE_DESCRIPTOR_SET;
use quote_core::{QuotationService, config::core_config_from_env_values};

/// Main entry point for the quotation marketplace
///
/// Starts both gRPC and REST servers concurrently over one `QuotationService`:
/// - gRPC server on port 50051 (configurable via QUOTE_GRPC_ADDR)
/// - REST server on port 3000 (configurable via QUOTE_REST_ADDR)
///
/// The gRPC server requires authentication via x-api-key header.
/// The REST server provides open access with Swagger UI at `/swagger-ui`.
///
/// # Environment Variables
/// - `QUOTE_GRPC_ADDR`: gRPC server address (default: "0.0.0.0:50051")
/// - `QUOTE_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `QUOTE_DATABASE_PATH`: SQLite database file (default: "quote_data/quotes.sqlite3")
/// - `QUOTE_BUSY_TIMEOUT_MS`: how long a connection waits on a locked database (default: 5000)
/// - `QUOTE_ALLOCATION_ATTEMPTS`: write attempts under contention (default: 3)
/// - `QUOTE_ENABLE_REFLECTION`: "true" to serve gRPC reflection
/// - `API_KEY`: API key for gRPC authentication
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quote_core=info".parse()?)
                .add_directive("quote_run=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let grpc_addr: SocketAddr = std::env::var("QUOTE_GRPC_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:50051".into())
        .parse()?;
    let rest_addr = std::env::var("QUOTE_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let cfg = Arc::new(core_config_from_env_values(
        std::env::var("QUOTE_DATABASE_PATH").ok(),
        std::env::var("QUOTE_BUSY_TIMEOUT_MS").ok(),
        std::env::var("QUOTE_ALLOCATION_ATTEMPTS").ok(),
    )?);
    let service = QuotationService::with_sqlite_collaborators(cfg);
    service.store().initialise()?;

    tracing::info!("++ Starting quotation gRPC on {}", grpc_addr);
    tracing::info!("++ Starting quotation REST on {}", rest_addr);

    let rest_app = router(AppState::new(service.clone()));
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    let rest_server = tokio::spawn(async move { axum::serve(listener, rest_app).await });

    let mut grpc_builder = Server::builder().add_service(QuoteServiceServer::with_interceptor(
        QuoteGrpcService::new(service),
        auth_interceptor,
    ));
    if std::env::var("QUOTE_ENABLE_REFLECTION").unwrap_or_else(|_| "false".to_string()) == "true" {
        let reflection_service = Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()?;
        grpc_builder = grpc_builder.add_service(reflection_service);
    }
    let grpc_server = grpc_builder.serve(grpc_addr);

    // Run both
    let (rest_result, grpc_result) = tokio::join!(rest_server, grpc_server);
    rest_result??;
    grpc_result?;

    Ok(())
}
