use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;

use crate::{
    error::Error,
    gateway::PaymentGateway,
    identity::AuthUser,
    store::{ParcelFilter, ParcelPatch, ParcelRepo, PaymentRepo},
    util::{FormattedDateTime, ObjectIdString, PageQuery, Paginated},
};

use super::{parcel::PaymentStatus, user::Role};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub parcel_id: ObjectId,
    pub user_email: String,
    pub transaction_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: Option<String>,

    pub created_at: bson::DateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: ObjectIdString,

    pub parcel_id: ObjectIdString,
    pub user_email: String,
    pub transaction_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: Option<String>,

    pub created_at: FormattedDateTime,
}

impl From<PaymentModel> for Payment {
    fn from(value: PaymentModel) -> Self {
        Self {
            id: value.id.into(),

            parcel_id: value.parcel_id.into(),
            user_email: value.user_email,
            transaction_id: value.transaction_id,
            amount: value.amount,
            currency: value.currency,
            payment_method: value.payment_method,

            created_at: value.created_at.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateIntentRequest {
    #[serde(rename = "amountInCents")]
    pub amount_in_cents: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateIntentResponse {
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
}

pub async fn create_intent(
    State(gateway): State<PaymentGateway>,
    _auth: AuthUser,
    Json(request): Json<CreateIntentRequest>,
) -> Result<Json<CreateIntentResponse>, Error> {
    if request.amount_in_cents == 0 {
        return Err(Error::InvalidInput("amount is required".to_string()));
    }

    let client_secret = gateway.create_intent(request.amount_in_cents).await?;

    Ok(Json(CreateIntentResponse { client_secret }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RecordPaymentRequest {
    pub parcel_id: String,
    pub transaction_id: String,
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RecordPaymentResponse {
    pub message: String,
    pub inserted_id: ObjectIdString,
}

/// Records a confirmed payment: flips the parcel's payment flag first, then
/// inserts the immutable payment row. The two writes are not atomic across a
/// crash; a paid parcel without a payment row is a reconciliation concern,
/// not something this handler hides.
#[tracing::instrument(
    skip_all,
    fields(
        user = %auth.email,
    )
)]
pub async fn record(
    State(parcels): State<ParcelRepo>,
    State(payments): State<PaymentRepo>,
    auth: AuthUser,
    Json(request): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<RecordPaymentResponse>), Error> {
    let parcel_id = ObjectId::parse_str(&request.parcel_id)
        .map_err(|_| Error::InvalidInput("malformed parcel id".to_string()))?;

    if request.transaction_id.trim().is_empty() {
        return Err(Error::InvalidInput("missing payment details".to_string()));
    }
    if request.amount <= Decimal::ZERO {
        return Err(Error::InvalidInput(
            "amount must be greater than zero".to_string(),
        ));
    }

    let mut filter = ParcelFilter {
        id: Some(parcel_id),
        ..ParcelFilter::default()
    };
    if auth.role != Role::Admin {
        filter.created_by = Some(auth.email.clone());
    }

    let matched = parcels
        .update_one(
            filter,
            ParcelPatch {
                payment_status: Some(PaymentStatus::Paid),
                updated_at: Some(OffsetDateTime::now_utc().into()),
                ..ParcelPatch::default()
            },
        )
        .await?;

    if matched == 0 {
        return Err(Error::NotFound("parcel not found"))
            .tap_err(|_| tracing::debug!("payment for missing or foreign parcel"));
    }

    let model = PaymentModel {
        id: ObjectId::new(),

        parcel_id,
        user_email: auth.email,
        transaction_id: request.transaction_id,
        amount: request.amount,
        currency: request.currency.unwrap_or_else(|| "usd".to_string()),
        payment_method: request.payment_method,

        created_at: OffsetDateTime::now_utc().into(),
    };

    payments.insert(&model).await?;

    Ok((
        StatusCode::CREATED,
        Json(RecordPaymentResponse {
            message: "payment history saved successfully".to_string(),
            inserted_id: model.id.into(),
        }),
    ))
}

pub async fn index(
    State(payments): State<PaymentRepo>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<Paginated<Payment>>, Error> {
    let scope = match auth.role {
        Role::Admin => None,
        _ => Some(auth.email.as_str()),
    };

    let (payments, total) = payments.list(scope, Some(query.request()?)).await?;
    let payments = payments.into_iter().map(Payment::from).collect();

    Ok(Json(Paginated::new(payments, total, &query)))
}
