use base64::{engine::general_purpose, Engine as _};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Mongo,
    Memory,
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub storage: StorageBackend,
    pub mongodb_uri: Option<String>,
    pub database_name: String,
    pub identity_secret: Vec<u8>,
    pub stripe_secret_key: Option<String>,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "5000".to_string())
            .parse::<u16>()
            .map_err(|err| Error::Internal(format!("invalid PORT: {err}")))?;

        let storage = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "mongo".to_string())
            .as_str()
        {
            "mongo" => StorageBackend::Mongo,
            "memory" => StorageBackend::Memory,
            other => {
                return Err(Error::Internal(format!(
                    "invalid STORAGE_BACKEND: {other} (expected \"mongo\" or \"memory\")"
                )))
            }
        };

        let mongodb_uri = std::env::var("MONGODB_URI").ok();
        if storage == StorageBackend::Mongo && mongodb_uri.is_none() {
            return Err(Error::Internal(
                "MONGODB_URI is required for the mongo storage backend".to_string(),
            ));
        }

        let identity_secret = std::env::var("IDENTITY_SECRET_KEY").map_err(|_| {
            Error::Internal("Cannot retreive IDENTITY_SECRET_KEY from environment variable.".to_string())
        })?;
        let identity_secret = general_purpose::STANDARD
            .decode(identity_secret)
            .map_err(|err| Error::Internal(format!("invalid IDENTITY_SECRET_KEY: {err}")))?;

        Ok(Self {
            port,
            storage,
            mongodb_uri,
            database_name: std::env::var("DATABASE_NAME")
                .unwrap_or_else(|_| "parcelhub".to_string()),
            identity_secret,
            stripe_secret_key: std::env::var("STRIPE_SECRET_KEY").ok(),
            log_level: std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "parcelhub=debug,tower_http=debug".to_string()),
        })
    }
}
