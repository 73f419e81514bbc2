#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![deny(clippy::pedantic)]
#![deny(clippy::get_unwrap)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod config;
mod context;
pub mod error;
pub mod grpc;
pub mod http;
mod layer;
mod migrations;
mod repos;
mod system;
mod tokenizer;

use std::net::SocketAddr;
use std::sync::Arc;

pub use config::{Config, SecretKey};
pub use context::Context;
use iotauth_policy::proto::auth_service_server::AuthServiceServer;
use iotauth_policy::proto::authz_service_server::AuthzServiceServer;
use iotauth_policy::{GrpcPolicyEngineClient, PolicyAgent, PolicyEngineClient};
pub use system::{AuthService, Principal};
use tokio::sync::broadcast;
use tonic::transport::Channel;
use tracing::info;

use crate::grpc::GrpcAuthService;
use crate::http::AppState;
use crate::layer::RequestMetrics;
use crate::repos::Repos;
use crate::tokenizer::Tokenizer;

/// Resolves a `host:port` policy-engine address into a lazily-connecting
/// `tonic` channel, mirroring the teacher's pattern of building a transport
/// once at startup and sharing it across every request thread.
fn policy_engine_channel(addr: &str) -> anyhow::Result<Channel> {
    let endpoint = tonic::transport::Endpoint::from_shared(format!("http://{addr}"))?;
    Ok(endpoint.connect_lazy())
}

/// Assembles storage, the tokenizer, and the policy agent behind a real
/// `GrpcPolicyEngineClient`, then serves the HTTP (§6 `/keys`, `/policies`,
/// `/health`, `/metrics`) and gRPC (`AuthzService`, `AuthService`) surfaces
/// concurrently until `shutdown_signal` resolves, at which point both
/// listeners drain in-flight requests and return.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the database cannot be
/// migrated, or either listener fails to bind.
pub async fn start(
    config: Config,
    shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    config.sanitize()?;
    let config = Arc::new(config);

    let pool = Arc::new(iotauth_storage::connect(&config.database_url).await?);
    crate::migrations::migrate(&pool).await?;
    let repos = Repos::new(pool);

    let tokenizer = Arc::new(Tokenizer::new(&config.secret_key.0, config.issuer.clone()));
    let channel = policy_engine_channel(&config.policy_engine_addr)?;
    let policy_client = GrpcPolicyEngineClient::new(channel);
    let policy_agent = Arc::new(PolicyAgent::new(Arc::new(policy_client)));
    let (stop_tx, _) = broadcast::channel(1);

    let ctx = Context {
        config: Arc::clone(&config),
        repos,
        tokenizer,
        policy_agent,
        stop_tx,
    };

    serve(ctx, config.port, shutdown_signal).await
}

/// Wires an already-assembled [`Context`] onto both transports, one port
/// apart (`port` for HTTP, `port + 1` for gRPC). Split from [`start`] so
/// tests can drive the same serving logic against an in-process
/// `FakePolicyEngine` without a real policy-engine channel.
async fn serve<C: PolicyEngineClient + 'static>(
    ctx: Context<C>,
    port: u16,
    shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let stop_tx = ctx.stop_tx.clone();
    let service = AuthService::new(ctx);
    let metrics = RequestMetrics::new();

    let http_router = http::router(AppState::new(service.clone(), metrics));
    let grpc_service = GrpcAuthService::new(service);

    let http_shutdown = {
        let mut rx = stop_tx.subscribe();
        async move {
            let _ = rx.recv().await;
        }
    };
    let grpc_shutdown = {
        let mut rx = stop_tx.subscribe();
        async move {
            let _ = rx.recv().await;
        }
    };

    let http_addr = SocketAddr::from(([0, 0, 0, 0], port));
    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], port + 1));
    info!(%http_addr, %grpc_addr, "listening");

    let http_server = axum::Server::bind(&http_addr)
        .serve(http_router.into_make_service())
        .with_graceful_shutdown(http_shutdown);

    let grpc_server = tonic::transport::Server::builder()
        .add_service(AuthzServiceServer::new(grpc_service.clone()))
        .add_service(AuthServiceServer::new(grpc_service))
        .serve_with_shutdown(grpc_addr, grpc_shutdown);

    tokio::spawn(async move {
        shutdown_signal.await;
        info!("shutdown signal received, draining HTTP and gRPC listeners");
        let _ = stop_tx.send(());
    });

    let (http_result, grpc_result) = tokio::join!(http_server, grpc_server);
    http_result?;
    grpc_result?;
    Ok(())
}

pub async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
}
