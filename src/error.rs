use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Unauthenticated(UnauthenticatedType),

    #[error("You have no permission to access this resource")]
    Forbidden,

    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Conflict(String),

    #[error("validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("{0}")]
    DatabaseError(#[from] mongodb::error::Error),

    #[error("{0}")]
    BsonSerError(#[from] bson::ser::Error),

    #[error("{0}")]
    BsonDeError(#[from] bson::de::Error),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum UnauthenticatedType {
    #[error("Missing or malformed authorization header")]
    MissingCredential,

    #[error("Invalid access credential")]
    InvalidCredential,

    #[error("User not found")]
    UnknownUser,
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Gateway(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        tracing::error!("error: {:?}", self);
        let status = match self {
            Self::Unauthenticated(..) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(..) => StatusCode::NOT_FOUND,
            Self::InvalidInput(..) => StatusCode::BAD_REQUEST,
            Self::Conflict(..) => StatusCode::CONFLICT,
            Self::ValidationError(..) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Gateway(..) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(..)
            | Self::BsonSerError(..)
            | Self::BsonDeError(..)
            | Self::Internal(..) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}
