use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;
use validator::Validate;

use crate::{
    error::Error,
    identity::{Admin, AuthUser, Rider},
    policy,
    store::{
        AssignmentFilter, ParcelFilter, ParcelPatch, ParcelRepo, StatusCount, UserRepo,
    },
    util::{FormattedDateTime, ObjectIdString, PageQuery, Paginated, PathObjectId},
};

use super::user::Role;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "collecting")]
    Collecting,
    #[serde(rename = "collected")]
    Collected,
    #[serde(rename = "sendWarehouse")]
    SendWarehouse,
    #[serde(rename = "delivering")]
    Delivering,
    #[serde(rename = "delivered")]
    Delivered,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Collecting => "collecting",
            Self::Collected => "collected",
            Self::SendWarehouse => "sendWarehouse",
            Self::Delivering => "delivering",
            Self::Delivered => "delivered",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    #[serde(rename = "unpaid")]
    Unpaid,
    #[serde(rename = "paid")]
    Paid,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CashoutStatus {
    #[serde(rename = "cashed_out")]
    CashedOut,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParcelType {
    #[serde(rename = "document")]
    Document,
    #[serde(rename = "non-document")]
    NonDocument,
}

/// The customer-editable payload of a parcel. This doubles as the create and
/// update request body, so everything outside of it is unreachable from a
/// customer call.
#[derive(Validate, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParcelContent {
    #[validate(length(min = 1, max = 200))]
    pub title: String,

    pub parcel_type: ParcelType,

    pub weight: f64,
    pub cost: Decimal,

    #[validate(length(min = 1, max = 124))]
    pub sender_name: String,
    #[validate(length(min = 1, max = 32))]
    pub sender_contact: String,
    #[validate(length(min = 1, max = 64))]
    pub sender_region: String,
    #[validate(length(min = 1, max = 64))]
    pub sender_district: String,
    #[validate(length(min = 1, max = 256))]
    pub sender_address: String,
    #[serde(default)]
    pub pickup_instruction: Option<String>,

    #[validate(length(min = 1, max = 124))]
    pub receiver_name: String,
    #[validate(length(min = 1, max = 32))]
    pub receiver_contact: String,
    #[validate(length(min = 1, max = 64))]
    pub receiver_region: String,
    #[validate(length(min = 1, max = 64))]
    pub receiver_district: String,
    #[validate(length(min = 1, max = 256))]
    pub receiver_address: String,
    #[serde(default)]
    pub delivery_instruction: Option<String>,
}

impl ParcelContent {
    fn check(&self) -> Result<(), Error> {
        self.validate()?;

        if self.cost < Decimal::ZERO || self.weight < 0.0 {
            return Err(Error::InvalidInput(
                "cost and weight must not be negative".to_string(),
            ));
        }

        Ok(())
    }

    /// Cross-district parcels route through the warehouse leg instead of
    /// going out for direct delivery.
    pub fn crosses_district(&self) -> bool {
        self.sender_district != self.receiver_district
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParcelModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub created_by: String,
    pub delivery_status: DeliveryStatus,
    pub payment_status: PaymentStatus,

    #[serde(default)]
    pub assigned_to_collect: Option<String>,
    #[serde(default)]
    pub assigned_to_deliver: Option<String>,
    #[serde(default)]
    pub cashout_status: Option<CashoutStatus>,

    #[serde(default)]
    pub assigned_at: Option<bson::DateTime>,
    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,

    #[serde(flatten)]
    pub content: ParcelContent,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Parcel {
    pub id: ObjectIdString,

    pub created_by: String,
    pub delivery_status: DeliveryStatus,
    pub payment_status: PaymentStatus,

    pub assigned_to_collect: Option<String>,
    pub assigned_to_deliver: Option<String>,
    pub cashout_status: Option<CashoutStatus>,

    pub assigned_at: Option<FormattedDateTime>,
    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,

    #[serde(flatten)]
    pub content: ParcelContent,
}

impl From<ParcelModel> for Parcel {
    fn from(value: ParcelModel) -> Self {
        Self {
            id: value.id.into(),

            created_by: value.created_by,
            delivery_status: value.delivery_status,
            payment_status: value.payment_status,

            assigned_to_collect: value.assigned_to_collect,
            assigned_to_deliver: value.assigned_to_deliver,
            cashout_status: value.cashout_status,

            assigned_at: value.assigned_at.map(Into::into),
            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),

            content: value.content,
        }
    }
}

/// A planned rider status advance: the precondition it was computed from and
/// the state it moves to. The same precondition is replayed in the
/// conditional update filter, so a racing advance loses with zero matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusAdvance {
    pub from: DeliveryStatus,
    pub to: DeliveryStatus,
    /// A same-district collector carries the parcel out themselves and takes
    /// over the delivery leg.
    pub takes_delivery_leg: bool,
}

/// Computes the only legal advance for the calling rider, or why there is
/// none. The caller must be the rider assigned to the leg being advanced.
pub fn plan_advance(parcel: &ParcelModel, rider_email: &str) -> Result<StatusAdvance, Error> {
    let collector = parcel.assigned_to_collect.as_deref();
    let deliverer = parcel.assigned_to_deliver.as_deref();

    if collector != Some(rider_email) && deliverer != Some(rider_email) {
        return Err(Error::NotFound("parcel not found or unauthorized"));
    }

    match parcel.delivery_status {
        DeliveryStatus::Collecting => {
            if collector != Some(rider_email) {
                return Err(Error::NotFound("parcel not found or unauthorized"));
            }

            Ok(StatusAdvance {
                from: DeliveryStatus::Collecting,
                to: DeliveryStatus::Collected,
                takes_delivery_leg: false,
            })
        }
        DeliveryStatus::Collected => {
            if collector != Some(rider_email) {
                return Err(Error::NotFound("parcel not found or unauthorized"));
            }

            if parcel.content.crosses_district() {
                Ok(StatusAdvance {
                    from: DeliveryStatus::Collected,
                    to: DeliveryStatus::SendWarehouse,
                    takes_delivery_leg: false,
                })
            } else {
                Ok(StatusAdvance {
                    from: DeliveryStatus::Collected,
                    to: DeliveryStatus::Delivering,
                    takes_delivery_leg: true,
                })
            }
        }
        DeliveryStatus::Delivering => {
            if deliverer != Some(rider_email) {
                return Err(Error::NotFound("parcel not found or unauthorized"));
            }

            Ok(StatusAdvance {
                from: DeliveryStatus::Delivering,
                to: DeliveryStatus::Delivered,
                takes_delivery_leg: false,
            })
        }
        DeliveryStatus::Pending | DeliveryStatus::SendWarehouse | DeliveryStatus::Delivered => {
            Err(Error::InvalidInput(format!(
                "cannot advance parcel from status {}",
                parcel.delivery_status.as_str()
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Collect,
    Deliver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentPlan {
    pub leg: Leg,
    pub to: DeliveryStatus,
}

/// A pending parcel gets its collector; a parcel in any later state gets its
/// deliverer.
pub fn plan_assignment(parcel: &ParcelModel) -> AssignmentPlan {
    match parcel.delivery_status {
        DeliveryStatus::Pending => AssignmentPlan {
            leg: Leg::Collect,
            to: DeliveryStatus::Collecting,
        },
        _ => AssignmentPlan {
            leg: Leg::Deliver,
            to: DeliveryStatus::Delivering,
        },
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ParcelListQuery {
    pub email: Option<String>,
    pub delivery_status: Option<DeliveryStatus>,
    pub payment_status: Option<PaymentStatus>,

    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl ParcelListQuery {
    fn page_query(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            limit: self.limit,
        }
    }
}

pub async fn index(
    State(parcels): State<ParcelRepo>,
    auth: AuthUser,
    Query(query): Query<ParcelListQuery>,
) -> Result<Json<Paginated<Parcel>>, Error> {
    let page_query = query.page_query();
    let filter = policy::parcel_list_filter(&auth, &query);

    let (parcels, total) = parcels.list(filter, Some(page_query.request()?)).await?;
    let parcels = parcels.into_iter().map(Parcel::from).collect();

    Ok(Json(Paginated::new(parcels, total, &page_query)))
}

pub async fn status_count(
    State(parcels): State<ParcelRepo>,
) -> Result<Json<Vec<StatusCount>>, Error> {
    Ok(Json(parcels.status_counts().await?))
}

pub async fn show(
    State(parcels): State<ParcelRepo>,
    auth: AuthUser,
    PathObjectId(parcel_id): PathObjectId,
) -> Result<Json<Parcel>, Error> {
    let parcel = parcels
        .find_one(policy::parcel_read_filter(&auth, parcel_id))
        .await?
        .ok_or(Error::NotFound("parcel not found"))?;

    Ok(Json(parcel.into()))
}

#[tracing::instrument(
    skip_all,
    fields(
        user = %auth.email,
    )
)]
pub async fn create(
    State(parcels): State<ParcelRepo>,
    auth: AuthUser,
    Json(request): Json<ParcelContent>,
) -> Result<(StatusCode, Json<Parcel>), Error> {
    request.check()?;

    let now = bson::DateTime::from(OffsetDateTime::now_utc());
    let model = ParcelModel {
        id: ObjectId::new(),

        created_by: auth.email,
        delivery_status: DeliveryStatus::Pending,
        payment_status: PaymentStatus::Unpaid,

        assigned_to_collect: None,
        assigned_to_deliver: None,
        cashout_status: None,

        assigned_at: None,
        created_at: now,
        updated_at: now,

        content: request,
    };

    parcels.insert(&model).await?;

    Ok((StatusCode::CREATED, Json(model.into())))
}

/// Customer update, only while the parcel is still pending and unpaid. The
/// guard travels inside the update filter so a concurrent transition cannot
/// slip a stale write through.
#[tracing::instrument(
    skip_all,
    fields(
        id = %parcel_id,
        user = %auth.email,
    )
)]
pub async fn update(
    State(parcels): State<ParcelRepo>,
    auth: AuthUser,
    PathObjectId(parcel_id): PathObjectId,
    Json(request): Json<ParcelContent>,
) -> Result<Json<Parcel>, Error> {
    request.check()?;

    let now = bson::DateTime::from(OffsetDateTime::now_utc());
    let patch = ParcelPatch {
        content: Some(request),
        updated_at: Some(now),
        ..ParcelPatch::default()
    };

    let matched = parcels
        .update_one(policy::modifiable_parcel_filter(parcel_id, &auth.email), patch)
        .await?;

    if matched == 0 {
        return Err(Error::NotFound("parcel not found or no longer editable"))
            .tap_err(|_| tracing::debug!("tried updating locked or missing parcel"));
    }

    let parcel = parcels
        .find_one(ParcelFilter {
            id: Some(parcel_id),
            created_by: Some(auth.email.clone()),
            ..ParcelFilter::default()
        })
        .await?
        .ok_or(Error::NotFound("parcel not found"))?;

    Ok(Json(parcel.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeleteResponse {
    pub message: String,
}

#[tracing::instrument(
    skip_all,
    fields(
        id = %parcel_id,
        user = %auth.email,
    )
)]
pub async fn delete(
    State(parcels): State<ParcelRepo>,
    auth: AuthUser,
    PathObjectId(parcel_id): PathObjectId,
) -> Result<Json<DeleteResponse>, Error> {
    let deleted = parcels
        .delete_one(policy::modifiable_parcel_filter(parcel_id, &auth.email))
        .await?;

    if deleted == 0 {
        return Err(Error::NotFound("parcel not found or no longer editable"))
            .tap_err(|_| tracing::debug!("tried deleting locked or missing parcel"));
    }

    Ok(Json(DeleteResponse {
        message: "parcel deleted successfully".to_string(),
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AssignResponse {
    pub message: String,
    pub delivery_status: DeliveryStatus,
}

/// Admin assignment of the next leg. Pending parcels get a collector, every
/// later state gets a deliverer; the write is conditional on the status the
/// plan was computed from.
#[tracing::instrument(
    skip_all,
    fields(
        admin = %admin.email,
    )
)]
pub async fn assign(
    Admin(admin): Admin,
    State(parcels): State<ParcelRepo>,
    State(users): State<UserRepo>,
    Path((parcel_id, rider_email)): Path<(String, String)>,
) -> Result<Json<AssignResponse>, Error> {
    let parcel_id = ObjectId::parse_str(&parcel_id)
        .map_err(|_| Error::InvalidInput("malformed id".to_string()))?;

    users
        .find_by_email(&rider_email)
        .await?
        .filter(|user| user.role == Role::Rider)
        .ok_or(Error::NotFound("rider not found"))
        .tap_err(|_| tracing::debug!(rider = %rider_email, "tried assigning non rider"))?;

    let parcel = parcels
        .find_one(ParcelFilter {
            id: Some(parcel_id),
            ..ParcelFilter::default()
        })
        .await?
        .ok_or(Error::NotFound("parcel not found"))?;

    let plan = plan_assignment(&parcel);
    let now = bson::DateTime::from(OffsetDateTime::now_utc());

    let mut patch = ParcelPatch {
        delivery_status: Some(plan.to),
        assigned_at: Some(now),
        updated_at: Some(now),
        ..ParcelPatch::default()
    };
    match plan.leg {
        Leg::Collect => patch.assigned_to_collect = Some(rider_email.clone()),
        Leg::Deliver => patch.assigned_to_deliver = Some(rider_email.clone()),
    }

    let matched = parcels
        .update_one(
            ParcelFilter {
                id: Some(parcel_id),
                delivery_status: Some(parcel.delivery_status),
                ..ParcelFilter::default()
            },
            patch,
        )
        .await?;

    if matched == 0 {
        return Err(Error::NotFound("parcel not found"));
    }

    Ok(Json(AssignResponse {
        message: "rider assigned successfully".to_string(),
        delivery_status: plan.to,
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AdvanceResponse {
    pub message: String,
    pub delivery_status: DeliveryStatus,
}

/// Rider status advance. The parcel is re-fetched, the caller checked
/// against the assignment fields, and the transition written conditionally
/// on the state it was planned from.
#[tracing::instrument(
    skip_all,
    fields(
        id = %parcel_id,
        rider = %rider.email,
    )
)]
pub async fn advance(
    Rider(rider): Rider,
    State(parcels): State<ParcelRepo>,
    PathObjectId(parcel_id): PathObjectId,
) -> Result<Json<AdvanceResponse>, Error> {
    let parcel = parcels
        .find_one(ParcelFilter {
            id: Some(parcel_id),
            ..ParcelFilter::default()
        })
        .await?
        .ok_or(Error::NotFound("parcel not found or unauthorized"))?;

    let advance = plan_advance(&parcel, &rider.email)?;

    let assigned = match advance.from {
        DeliveryStatus::Delivering => AssignmentFilter::Deliverer(rider.email.clone()),
        _ => AssignmentFilter::Collector(rider.email.clone()),
    };

    let patch = ParcelPatch {
        delivery_status: Some(advance.to),
        assigned_to_deliver: advance.takes_delivery_leg.then(|| rider.email.clone()),
        updated_at: Some(bson::DateTime::from(OffsetDateTime::now_utc())),
        ..ParcelPatch::default()
    };

    let matched = parcels
        .update_one(
            ParcelFilter {
                id: Some(parcel_id),
                delivery_status: Some(advance.from),
                assigned: Some(assigned),
                ..ParcelFilter::default()
            },
            patch,
        )
        .await?;

    if matched == 0 {
        return Err(Error::NotFound("parcel not found or unauthorized"))
            .tap_err(|_| tracing::debug!("advance lost the precondition race"));
    }

    Ok(Json(AdvanceResponse {
        message: "delivery status updated successfully".to_string(),
        delivery_status: advance.to,
    }))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::{
        extract::{Path, Query},
        Json,
    };
    use bson::oid::ObjectId;

    use crate::{
        api::v1::tests::{bootstrap, sample_content},
        api::v1::user::Role,
        error::Error,
        store::ParcelFilter,
    };

    use super::{plan_advance, plan_assignment, DeliveryStatus, Leg, ParcelListQuery, PaymentStatus};

    #[tokio::test]
    async fn test_create_parcel_defaults() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;

        let (_, Json(parcel)) = super::create(
            bootstrap.parcels(),
            customer.auth(),
            Json(sample_content("Dhaka", "Sylhet", 100)),
        )
        .await
        .unwrap();

        assert_eq!(parcel.created_by, "customer@test.com");
        assert_eq!(parcel.delivery_status, DeliveryStatus::Pending);
        assert_eq!(parcel.payment_status, PaymentStatus::Unpaid);
        assert!(parcel.assigned_to_collect.is_none());
        assert!(parcel.assigned_to_deliver.is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_negative_cost() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;

        let mut content = sample_content("Dhaka", "Sylhet", 100);
        content.cost = rust_decimal::Decimal::from(-1);

        let error = super::create(bootstrap.parcels(), customer.auth(), Json(content))
            .await
            .unwrap_err();
        assert_matches!(error, Error::InvalidInput(..));
    }

    #[tokio::test]
    async fn test_customer_can_update_while_pending() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;
        let parcel = bootstrap.create_parcel(&customer, "Dhaka", "Dhaka", 100).await;

        let mut content = sample_content("Dhaka", "Dhaka", 100);
        content.title = "updated title".to_string();

        let Json(updated) = super::update(
            bootstrap.parcels(),
            customer.auth(),
            parcel.path_id(),
            Json(content),
        )
        .await
        .unwrap();

        assert_eq!(updated.content.title, "updated title");
    }

    #[tokio::test]
    async fn test_customer_cannot_update_once_assigned() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;
        let rider = bootstrap.rider("rider@test.com", "Dhaka").await;
        let parcel = bootstrap.create_parcel(&customer, "Dhaka", "Dhaka", 100).await;

        bootstrap.assign(&parcel, &rider).await;

        let error = super::update(
            bootstrap.parcels(),
            customer.auth(),
            parcel.path_id(),
            Json(sample_content("Dhaka", "Dhaka", 100)),
        )
        .await
        .unwrap_err();
        assert_matches!(error, Error::NotFound(..));
    }

    #[tokio::test]
    async fn test_customer_cannot_update_once_paid() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;
        let parcel = bootstrap.create_parcel(&customer, "Dhaka", "Dhaka", 100).await;

        bootstrap.mark_paid(&parcel).await;

        let error = super::update(
            bootstrap.parcels(),
            customer.auth(),
            parcel.path_id(),
            Json(sample_content("Dhaka", "Dhaka", 100)),
        )
        .await
        .unwrap_err();
        assert_matches!(error, Error::NotFound(..));

        let error = super::delete(bootstrap.parcels(), customer.auth(), parcel.path_id())
            .await
            .unwrap_err();
        assert_matches!(error, Error::NotFound(..));
    }

    #[tokio::test]
    async fn test_customer_can_delete_while_pending() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;
        let parcel = bootstrap.create_parcel(&customer, "Dhaka", "Dhaka", 100).await;

        let _ = super::delete(bootstrap.parcels(), customer.auth(), parcel.path_id())
            .await
            .unwrap();

        let gone = bootstrap
            .app_state
            .parcels
            .find_one(ParcelFilter {
                id: Some(*parcel.id),
                ..ParcelFilter::default()
            })
            .await
            .unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn test_customer_cannot_touch_other_parcel() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;
        let other = bootstrap.derive("other@test.com", Role::User).await;
        let parcel = bootstrap.create_parcel(&customer, "Dhaka", "Dhaka", 100).await;

        let error = super::update(
            bootstrap.parcels(),
            other.auth(),
            parcel.path_id(),
            Json(sample_content("Dhaka", "Dhaka", 100)),
        )
        .await
        .unwrap_err();
        assert_matches!(error, Error::NotFound(..));

        let error = super::show(bootstrap.parcels(), other.auth(), parcel.path_id())
            .await
            .unwrap_err();
        assert_matches!(error, Error::NotFound(..));
    }

    #[tokio::test]
    async fn test_assign_pending_sets_collector() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;
        let rider = bootstrap.rider("rider@test.com", "Dhaka").await;
        let parcel = bootstrap.create_parcel(&customer, "Dhaka", "Sylhet", 100).await;

        let Json(response) = super::assign(
            bootstrap.admin.admin(),
            bootstrap.parcels(),
            bootstrap.users(),
            Path((parcel.id.to_string(), rider.email.clone())),
        )
        .await
        .unwrap();

        assert_eq!(response.delivery_status, DeliveryStatus::Collecting);

        let stored = bootstrap.fetch_parcel(&parcel).await;
        assert_eq!(stored.delivery_status, DeliveryStatus::Collecting);
        assert_eq!(stored.assigned_to_collect.as_deref(), Some("rider@test.com"));
        assert!(stored.assigned_to_deliver.is_none());
        assert!(stored.assigned_at.is_some());
    }

    #[tokio::test]
    async fn test_assign_non_pending_sets_deliverer() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;
        let collector = bootstrap.rider("collector@test.com", "Dhaka").await;
        let deliverer = bootstrap.rider("deliverer@test.com", "Sylhet").await;
        let parcel = bootstrap.create_parcel(&customer, "Dhaka", "Sylhet", 100).await;

        bootstrap.assign(&parcel, &collector).await;
        bootstrap.advance(&parcel, &collector).await; // collected
        bootstrap.advance(&parcel, &collector).await; // sendWarehouse

        let Json(response) = super::assign(
            bootstrap.admin.admin(),
            bootstrap.parcels(),
            bootstrap.users(),
            Path((parcel.id.to_string(), deliverer.email.clone())),
        )
        .await
        .unwrap();

        assert_eq!(response.delivery_status, DeliveryStatus::Delivering);

        let stored = bootstrap.fetch_parcel(&parcel).await;
        assert_eq!(stored.assigned_to_collect.as_deref(), Some("collector@test.com"));
        assert_eq!(stored.assigned_to_deliver.as_deref(), Some("deliverer@test.com"));
    }

    #[tokio::test]
    async fn test_assign_rejects_non_rider() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;
        let parcel = bootstrap.create_parcel(&customer, "Dhaka", "Dhaka", 100).await;

        let error = super::assign(
            bootstrap.admin.admin(),
            bootstrap.parcels(),
            bootstrap.users(),
            Path((parcel.id.to_string(), customer.email.clone())),
        )
        .await
        .unwrap_err();
        assert_matches!(error, Error::NotFound("rider not found"));

        let error = super::assign(
            bootstrap.admin.admin(),
            bootstrap.parcels(),
            bootstrap.users(),
            Path((parcel.id.to_string(), "ghost@test.com".to_string())),
        )
        .await
        .unwrap_err();
        assert_matches!(error, Error::NotFound("rider not found"));
    }

    #[tokio::test]
    async fn test_cross_district_flow() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;
        let collector = bootstrap.rider("collector@test.com", "Dhaka").await;
        let deliverer = bootstrap.rider("deliverer@test.com", "Sylhet").await;
        let parcel = bootstrap.create_parcel(&customer, "Dhaka", "Sylhet", 100).await;

        bootstrap.assign(&parcel, &collector).await;

        let Json(response) = super::advance(
            collector.rider(),
            bootstrap.parcels(),
            parcel.path_id(),
        )
        .await
        .unwrap();
        assert_eq!(response.delivery_status, DeliveryStatus::Collected);

        let Json(response) = super::advance(
            collector.rider(),
            bootstrap.parcels(),
            parcel.path_id(),
        )
        .await
        .unwrap();
        assert_eq!(response.delivery_status, DeliveryStatus::SendWarehouse);

        // warehouse parcels wait for an explicit deliverer assignment
        let error = super::advance(collector.rider(), bootstrap.parcels(), parcel.path_id())
            .await
            .unwrap_err();
        assert_matches!(error, Error::InvalidInput(..));

        bootstrap.assign(&parcel, &deliverer).await;

        let Json(response) = super::advance(
            deliverer.rider(),
            bootstrap.parcels(),
            parcel.path_id(),
        )
        .await
        .unwrap();
        assert_eq!(response.delivery_status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn test_same_district_collector_takes_delivery_leg() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;
        let rider = bootstrap.rider("rider@test.com", "Dhaka").await;
        let parcel = bootstrap.create_parcel(&customer, "Dhaka", "Dhaka", 100).await;

        bootstrap.assign(&parcel, &rider).await;
        bootstrap.advance(&parcel, &rider).await; // collected

        let Json(response) = super::advance(rider.rider(), bootstrap.parcels(), parcel.path_id())
            .await
            .unwrap();
        assert_eq!(response.delivery_status, DeliveryStatus::Delivering);

        let stored = bootstrap.fetch_parcel(&parcel).await;
        assert_eq!(stored.assigned_to_deliver.as_deref(), Some("rider@test.com"));

        let Json(response) = super::advance(rider.rider(), bootstrap.parcels(), parcel.path_id())
            .await
            .unwrap();
        assert_eq!(response.delivery_status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn test_unassigned_rider_cannot_advance() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;
        let rider = bootstrap.rider("rider@test.com", "Dhaka").await;
        let intruder = bootstrap.rider("intruder@test.com", "Dhaka").await;
        let parcel = bootstrap.create_parcel(&customer, "Dhaka", "Dhaka", 100).await;

        bootstrap.assign(&parcel, &rider).await;

        let error = super::advance(intruder.rider(), bootstrap.parcels(), parcel.path_id())
            .await
            .unwrap_err();
        assert_matches!(error, Error::NotFound(..));

        let stored = bootstrap.fetch_parcel(&parcel).await;
        assert_eq!(stored.delivery_status, DeliveryStatus::Collecting);
    }

    #[tokio::test]
    async fn test_advance_pending_is_invalid() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;
        let rider = bootstrap.rider("rider@test.com", "Dhaka").await;
        let parcel = bootstrap.create_parcel(&customer, "Dhaka", "Dhaka", 100).await;

        // not assigned at all yet
        let error = super::advance(rider.rider(), bootstrap.parcels(), parcel.path_id())
            .await
            .unwrap_err();
        assert_matches!(error, Error::NotFound(..));
    }

    #[tokio::test]
    async fn test_advance_missing_parcel() {
        let bootstrap = bootstrap().await;
        let rider = bootstrap.rider("rider@test.com", "Dhaka").await;

        let error = super::advance(
            rider.rider(),
            bootstrap.parcels(),
            crate::util::PathObjectId(ObjectId::new()),
        )
        .await
        .unwrap_err();
        assert_matches!(error, Error::NotFound(..));
    }

    #[tokio::test]
    async fn test_index_role_scoping() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;
        let other = bootstrap.derive("other@test.com", Role::User).await;
        let rider = bootstrap.rider("rider@test.com", "Dhaka").await;

        let mine = bootstrap.create_parcel(&customer, "Dhaka", "Dhaka", 100).await;
        bootstrap.create_parcel(&other, "Dhaka", "Sylhet", 100).await;
        bootstrap.assign(&mine, &rider).await;

        let Json(all) = super::index(
            bootstrap.parcels(),
            bootstrap.admin.auth(),
            Query(ParcelListQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(all.pagination.total, 2);

        let Json(own) = super::index(
            bootstrap.parcels(),
            customer.auth(),
            Query(ParcelListQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(own.pagination.total, 1);
        assert_eq!(own.data[0].created_by, "customer@test.com");

        let Json(assigned) = super::index(
            bootstrap.parcels(),
            rider.auth(),
            Query(ParcelListQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(assigned.pagination.total, 1);
        assert_eq!(assigned.data[0].assigned_to_collect.as_deref(), Some("rider@test.com"));
    }

    #[tokio::test]
    async fn test_status_count_sorted() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;
        let rider = bootstrap.rider("rider@test.com", "Dhaka").await;

        let assigned = bootstrap.create_parcel(&customer, "Dhaka", "Dhaka", 100).await;
        bootstrap.create_parcel(&customer, "Dhaka", "Sylhet", 100).await;
        bootstrap.create_parcel(&customer, "Dhaka", "Sylhet", 100).await;
        bootstrap.assign(&assigned, &rider).await;

        let Json(counts) = super::status_count(bootstrap.parcels()).await.unwrap();

        let statuses: Vec<&str> = counts.iter().map(|count| count.status.as_str()).collect();
        assert_eq!(statuses, vec!["collecting", "pending"]);
        assert_eq!(counts[0].count, 1);
        assert_eq!(counts[1].count, 2);
    }

    #[test]
    fn test_plan_assignment() {
        let bootstrap_parcel = crate::api::v1::tests::sample_parcel("a@test.com", "Dhaka", "Dhaka", 100);

        let plan = plan_assignment(&bootstrap_parcel);
        assert_eq!(plan.leg, Leg::Collect);
        assert_eq!(plan.to, DeliveryStatus::Collecting);

        let mut collected = bootstrap_parcel;
        collected.delivery_status = DeliveryStatus::Collected;
        let plan = plan_assignment(&collected);
        assert_eq!(plan.leg, Leg::Deliver);
        assert_eq!(plan.to, DeliveryStatus::Delivering);
    }

    #[test]
    fn test_plan_advance_table() {
        let mut parcel = crate::api::v1::tests::sample_parcel("a@test.com", "Dhaka", "Sylhet", 100);
        parcel.assigned_to_collect = Some("rider@test.com".to_string());

        parcel.delivery_status = DeliveryStatus::Collecting;
        let advance = plan_advance(&parcel, "rider@test.com").unwrap();
        assert_eq!(advance.to, DeliveryStatus::Collected);
        assert!(!advance.takes_delivery_leg);

        parcel.delivery_status = DeliveryStatus::Collected;
        let advance = plan_advance(&parcel, "rider@test.com").unwrap();
        assert_eq!(advance.to, DeliveryStatus::SendWarehouse);

        parcel.content.receiver_district = "Dhaka".to_string();
        let advance = plan_advance(&parcel, "rider@test.com").unwrap();
        assert_eq!(advance.to, DeliveryStatus::Delivering);
        assert!(advance.takes_delivery_leg);

        parcel.delivery_status = DeliveryStatus::Delivering;
        parcel.assigned_to_deliver = Some("rider@test.com".to_string());
        let advance = plan_advance(&parcel, "rider@test.com").unwrap();
        assert_eq!(advance.to, DeliveryStatus::Delivered);

        parcel.delivery_status = DeliveryStatus::Delivered;
        let error = plan_advance(&parcel, "rider@test.com").unwrap_err();
        assert_matches!(error, Error::InvalidInput(..));

        parcel.delivery_status = DeliveryStatus::Collecting;
        let error = plan_advance(&parcel, "stranger@test.com").unwrap_err();
        assert_matches!(error, Error::NotFound(..));
    }
}
