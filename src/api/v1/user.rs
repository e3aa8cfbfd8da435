use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;
use validator::Validate;

use crate::{
    error::Error,
    identity::{Admin, AuthUser, Identity, IdentityState},
    store::{ApplicationRepo, ProfilePatch, UserFilter, UserRepo},
    util::{FormattedDateTime, ObjectIdString, PageQuery, Paginated},
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Rider,
    Admin,
}

/// Profile data merged into a user record when their rider application is
/// accepted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RiderDetails {
    pub name: String,
    pub age: u32,
    pub region: String,
    pub district: String,
    pub phone: String,
    pub national_id: String,
    pub bike_brand: String,
    pub bike_registration: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub email: String,
    pub role: Role,

    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,

    pub created_at: bson::DateTime,
    pub last_logged_in: bson::DateTime,

    #[serde(default)]
    pub details: Option<RiderDetails>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: ObjectIdString,
    pub email: String,
    pub role: Role,

    pub name: Option<String>,
    pub phone: Option<String>,

    pub created_at: FormattedDateTime,
    pub last_logged_in: FormattedDateTime,

    pub details: Option<RiderDetails>,
}

impl From<UserModel> for User {
    fn from(value: UserModel) -> Self {
        Self {
            id: value.id.into(),
            email: value.email,
            role: value.role,

            name: value.name,
            phone: value.phone,

            created_at: value.created_at.into(),
            last_logged_in: value.last_logged_in.into(),

            details: value.details,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct LoginRequest {
    pub name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginResponse {
    pub message: String,
}

/// First-login upsert. The email comes from the verified credential, never
/// from the request body; an existing record only gets its login stamp
/// bumped.
pub async fn login(
    State(users): State<UserRepo>,
    Identity(identity): Identity,
    request: Option<Json<LoginRequest>>,
) -> Result<axum::response::Response, Error> {
    let now = bson::DateTime::from(OffsetDateTime::now_utc());

    if users.find_by_email(&identity.email).await?.is_some() {
        users.touch_login(&identity.email, now).await?;

        let response = Json(LoginResponse {
            message: "user already exists".to_string(),
        });
        return Ok((StatusCode::OK, response).into_response());
    }

    let model = UserModel {
        id: ObjectId::new(),
        email: identity.email,
        role: Role::User,
        name: request.and_then(|Json(request)| request.name),
        phone: None,
        created_at: now,
        last_logged_in: now,
        details: None,
    };

    users.insert(&model).await?;

    Ok((StatusCode::CREATED, Json(User::from(model))).into_response())
}

pub async fn role(auth: AuthUser) -> Json<Role> {
    Json(auth.role)
}

pub async fn profile(
    State(users): State<UserRepo>,
    auth: AuthUser,
) -> Result<Json<User>, Error> {
    let user = users
        .find_by_email(&auth.email)
        .await?
        .ok_or(Error::NotFound("user not found"))?;

    Ok(Json(user.into()))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 124))]
    pub name: Option<String>,

    #[validate(length(min = 4, max = 32))]
    pub phone: Option<String>,
}

/// Allow-listed profile patch. Role, delivery fields and everything else not
/// named in [`ProfilePatch`] are unreachable from here.
pub async fn update_profile(
    State(users): State<UserRepo>,
    auth: AuthUser,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<User>, Error> {
    request.validate()?;

    let patch = ProfilePatch {
        name: request.name,
        phone: request.phone,
    };

    if patch.is_empty() {
        return Err(Error::InvalidInput("no fields to update".to_string()));
    }

    let matched = users.update_profile(&auth.email, patch).await?;
    if matched == 0 {
        return Err(Error::NotFound("user not found"));
    }

    let user = users
        .find_by_email(&auth.email)
        .await?
        .ok_or(Error::NotFound("user not found"))?;

    Ok(Json(user.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UserListQuery {
    pub role: Option<Role>,

    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl UserListQuery {
    fn page_query(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            limit: self.limit,
        }
    }
}

pub async fn index(
    Admin(admin): Admin,
    State(users): State<UserRepo>,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Paginated<User>>, Error> {
    tracing::debug!(admin = %admin.email, "listing users");

    let page_query = query.page_query();
    let filter = UserFilter {
        role: query.role,
        district: None,
    };

    let (users, total) = users.list(filter, Some(page_query.request()?)).await?;
    let users = users.into_iter().map(User::from).collect();

    Ok(Json(Paginated::new(users, total, &page_query)))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeleteResponse {
    pub message: String,
}

/// Admin-only removal. The store record is authoritative; the pending rider
/// application cascades and the identity-provider account removal is
/// best-effort.
#[tracing::instrument(
    skip_all,
    fields(
        admin = %admin.email,
        email = %email,
    )
)]
pub async fn delete(
    Admin(admin): Admin,
    State(users): State<UserRepo>,
    State(applications): State<ApplicationRepo>,
    State(identity): State<IdentityState>,
    Path(email): Path<String>,
) -> Result<Json<DeleteResponse>, Error> {
    let deleted = users.delete_by_email(&email).await?;
    if deleted == 0 {
        return Err(Error::NotFound("user not found"))
            .tap_err(|_| tracing::debug!("tried deleting non existing user"));
    }

    applications.delete_by_email(&email).await?;

    if let Err(err) = identity.remove_account(&email).await {
        // store state is authoritative, the provider record may lag until
        // reconciliation
        tracing::warn!(error = %err, "failed to remove identity provider account");
    }

    Ok(Json(DeleteResponse {
        message: "user deleted successfully".to_string(),
    }))
}
