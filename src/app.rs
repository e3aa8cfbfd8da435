use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    config::Config,
    error::Error,
    gateway::{PaymentGateway, PaymentProcessor},
    identity::{IdentityProvider, IdentityState},
    store::{
        memory::MemoryStore, mongo::MongoStore, ApplicationRepo, ApplicationStore, ParcelRepo,
        ParcelStore, PaymentRepo, PaymentStore, UserRepo, UserStore,
    },
};

#[derive(FromRef, Clone)]
pub struct AppState {
    pub identity: IdentityState,
    pub gateway: PaymentGateway,

    pub parcels: ParcelRepo,
    pub users: UserRepo,
    pub applications: ApplicationRepo,
    pub payments: PaymentRepo,
}

impl AppState {
    pub async fn new_mongo(
        config: &Config,
        identity: Arc<dyn IdentityProvider>,
        gateway: Arc<dyn PaymentProcessor>,
    ) -> Result<Self, Error> {
        let uri = config
            .mongodb_uri
            .as_deref()
            .ok_or_else(|| Error::Internal("MONGODB_URI is required".to_string()))?;

        let mut options = mongodb::options::ClientOptions::parse(uri).await?;
        // bounded timeouts so a slow server fails the request instead of
        // hanging the handler
        options.server_selection_timeout = Some(std::time::Duration::from_secs(5));
        options.connect_timeout = Some(std::time::Duration::from_secs(5));

        let client = mongodb::Client::with_options(options)?;
        let store = Arc::new(MongoStore::new(&client.database(&config.database_name)));
        store.ensure_indexes().await?;

        Ok(Self::with_stores(
            identity,
            gateway,
            store.clone(),
            store.clone(),
            store.clone(),
            store,
        ))
    }

    pub fn new_memory(
        identity: Arc<dyn IdentityProvider>,
        gateway: Arc<dyn PaymentProcessor>,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());

        Self::with_stores(
            identity,
            gateway,
            store.clone(),
            store.clone(),
            store.clone(),
            store,
        )
    }

    fn with_stores(
        identity: Arc<dyn IdentityProvider>,
        gateway: Arc<dyn PaymentProcessor>,
        parcels: Arc<dyn ParcelStore>,
        users: Arc<dyn UserStore>,
        applications: Arc<dyn ApplicationStore>,
        payments: Arc<dyn PaymentStore>,
    ) -> Self {
        Self {
            identity: IdentityState(identity),
            gateway: PaymentGateway(gateway),

            parcels: ParcelRepo(parcels),
            users: UserRepo(users),
            applications: ApplicationRepo(applications),
            payments: PaymentRepo(payments),
        }
    }
}
