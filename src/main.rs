use std::{net::SocketAddr, sync::Arc};

use parcelhub::{
    api,
    app::AppState,
    config::{Config, StorageBackend},
    error::Error,
    gateway::{PaymentProcessor, StripeGateway, StubGateway},
    identity::{IdentityProvider, JwtIdentity},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let identity: Arc<dyn IdentityProvider> = Arc::new(JwtIdentity::new(&config.identity_secret));

    let gateway: Arc<dyn PaymentProcessor> = match &config.stripe_secret_key {
        Some(key) => Arc::new(StripeGateway::new(key.clone())?),
        None => {
            tracing::warn!("STRIPE_SECRET_KEY is not set, payment intents use the stub gateway");
            Arc::new(StubGateway)
        }
    };

    let app_state = match config.storage {
        StorageBackend::Mongo => AppState::new_mongo(&config, identity, gateway).await?,
        StorageBackend::Memory => {
            tracing::warn!("using the in-memory storage backend, data will not survive restarts");
            AppState::new_memory(identity, gateway)
        }
    };

    let app = api::v1::router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::debug!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| Error::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
