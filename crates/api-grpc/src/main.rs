//! Standalone gRPC server binary.
//!
//! The workspace's main `quote-run` binary runs both gRPC and REST concurrently; this one serves
//! gRPC only.

use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tonic_reflection::server::Builder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_grpc::{auth_interceptor, pb::quote_service_server::QuoteServiceServer, QuoteGrpcService};
use api_shared::FILE_DESCRIPTOR_SET;
use quote_core::{config::core_config_from_env_values, QuotationService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quote_core=info".parse()?)
                .add_directive("api_grpc=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr: SocketAddr = std::env::var("QUOTE_GRPC_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:50051".into())
        .parse()?;

    let cfg = Arc::new(core_config_from_env_values(
        std::env::var("QUOTE_DATABASE_PATH").ok(),
        std::env::var("QUOTE_BUSY_TIMEOUT_MS").ok(),
        std::env::var("QUOTE_ALLOCATION_ATTEMPTS").ok(),
    )?);
    let service = QuotationService::with_sqlite_collaborators(cfg);
    service.store().initialise()?;

    tracing::info!("-- Starting quotation gRPC on {}", addr);

    let mut server_builder = Server::builder().add_service(QuoteServiceServer::with_interceptor(
        QuoteGrpcService::new(service),
        auth_interceptor,
    ));

    if std::env::var("QUOTE_ENABLE_REFLECTION").unwrap_or_else(|_| "false".to_string()) == "true" {
        let reflection_service = Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()?;
        server_builder = server_builder.add_service(reflection_service);
        tracing::info!("gRPC server reflection enabled");
    } else {
        tracing::info!("gRPC server reflection disabled");
    }

    server_builder.serve(addr).await?;

    Ok(())
}
