use axum::{
    extract::{FromRef, FromRequestParts},
    headers::{authorization::Bearer, Authorization},
    http::request::Parts,
    RequestPartsExt, TypedHeader,
};
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::{Duration, OffsetDateTime};

use crate::{
    api::v1::user::Role,
    error::{Error, UnauthenticatedType},
    policy,
    store::UserRepo,
};

/// Outcome of verifying a bearer credential against the identity provider.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub uid: String,
    pub email: String,
}

/// External identity provider, consumed through a narrow interface so tests
/// and alternative providers can be swapped in behind the same state.
#[axum::async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, Error>;

    /// Best-effort removal of the provider-side account. The document store
    /// stays authoritative when this fails.
    async fn remove_account(&self, email: &str) -> Result<(), Error>;
}

pub fn current_timestamp() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IdentityClaims {
    pub sub: String,
    pub email: String,
    pub exp: i64,
}

impl IdentityClaims {
    pub fn is_expired(&self) -> bool {
        self.exp < current_timestamp().unix_timestamp()
    }
}

/// Signed-token identity provider. Credentials are HS256 tokens carrying the
/// account uid and email.
pub struct JwtIdentity {
    validation: jsonwebtoken::Validation,
    header: jsonwebtoken::Header,

    encoding_key: jsonwebtoken::EncodingKey,
    decoding_key: jsonwebtoken::DecodingKey,
}

impl JwtIdentity {
    pub fn new(secret: &[u8]) -> Self {
        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256);
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_exp = false;

        Self {
            header,
            validation,

            encoding_key: jsonwebtoken::EncodingKey::from_secret(secret),
            decoding_key: jsonwebtoken::DecodingKey::from_secret(secret),
        }
    }

    /// Issues a credential for the given account, mainly useful for
    /// bootstrapping service accounts and tests.
    pub fn issue(&self, uid: &str, email: &str, ttl: Duration) -> Result<String, Error> {
        let claims = IdentityClaims {
            sub: uid.to_string(),
            email: email.to_string(),
            exp: (current_timestamp() + ttl).unix_timestamp(),
        };

        jsonwebtoken::encode(&self.header, &claims, &self.encoding_key)
            .map_err(|err| Error::Internal(format!("failed to issue credential: {err}")))
    }

    fn decode(&self, token: &str) -> Result<IdentityClaims, Error> {
        jsonwebtoken::decode::<IdentityClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| Error::Unauthenticated(UnauthenticatedType::InvalidCredential))
    }
}

#[axum::async_trait]
impl IdentityProvider for JwtIdentity {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, Error> {
        let claims = self.decode(token)?;

        if claims.is_expired() {
            return Err(Error::Unauthenticated(UnauthenticatedType::InvalidCredential));
        }

        Ok(VerifiedIdentity {
            uid: claims.sub,
            email: claims.email,
        })
    }

    async fn remove_account(&self, email: &str) -> Result<(), Error> {
        // self-issued credentials expire on their own, there is no
        // provider-side record to clean up
        tracing::debug!(email, "no provider account to remove");
        Ok(())
    }
}

#[derive(Clone)]
pub struct IdentityState(pub std::sync::Arc<dyn IdentityProvider>);

impl std::ops::Deref for IdentityState {
    type Target = dyn IdentityProvider;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

async fn bearer_token(parts: &mut Parts) -> Result<String, Error> {
    let TypedHeader(Authorization(token)) = parts
        .extract::<TypedHeader<Authorization<Bearer>>>()
        .await
        .map_err(|_| Error::Unauthenticated(UnauthenticatedType::MissingCredential))?;

    Ok(token.token().to_string())
}

/// A verified identity without a role. The only place this is enough is the
/// first-login upsert, which seeds the record the role lookup reads.
#[derive(Debug)]
pub struct Identity(pub VerifiedIdentity);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Identity
where
    IdentityState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).await?;
        let identity = IdentityState::from_ref(state);

        identity.verify(&token).await.map(Self)
    }
}

/// A verified identity with the caller's stored role resolved by lookup.
/// The lookup happens once per request, at extraction time.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
    pub role: Role,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    IdentityState: FromRef<S>,
    UserRepo: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Identity(verified) = parts.extract_with_state::<Identity, _>(state).await?;

        let users = UserRepo::from_ref(state);
        let user = users
            .find_by_email(&verified.email)
            .await?
            .ok_or(Error::Unauthenticated(UnauthenticatedType::UnknownUser))
            .tap_err(|_| tracing::debug!(email = %verified.email, "credential for unknown user"))?;

        Ok(Self {
            uid: verified.uid,
            email: verified.email,
            role: user.role,
        })
    }
}

#[derive(Debug)]
pub struct Admin(pub AuthUser);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Admin
where
    IdentityState: FromRef<S>,
    UserRepo: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = parts.extract_with_state::<AuthUser, _>(state).await?;
        policy::require_role(&auth, Role::Admin)?;

        Ok(Self(auth))
    }
}

#[derive(Debug)]
pub struct Rider(pub AuthUser);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Rider
where
    IdentityState: FromRef<S>,
    UserRepo: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = parts.extract_with_state::<AuthUser, _>(state).await?;
        policy::require_role(&auth, Role::Rider)?;

        Ok(Self(auth))
    }
}
