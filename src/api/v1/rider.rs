use std::str::FromStr;

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
        ApplicationRepo, AssignmentFilter, ParcelFilter, ParcelPatch, ParcelRepo, UserFilter,
        UserRepo,
    },
    util::{FormattedDateTime, ObjectIdString, PageQuery, Paginated, PathObjectId},
};

use super::{
    parcel::{CashoutStatus, DeliveryStatus, Parcel, ParcelModel},
    user::{RiderDetails, Role, User},
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RiderApplicationModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub email: String,
    pub name: String,
    pub age: u32,
    pub region: String,
    pub district: String,
    pub phone: String,
    pub national_id: String,
    pub bike_brand: String,
    pub bike_registration: String,

    pub applied_at: bson::DateTime,
}

impl RiderApplicationModel {
    pub fn details(&self) -> RiderDetails {
        RiderDetails {
            name: self.name.clone(),
            age: self.age,
            region: self.region.clone(),
            district: self.district.clone(),
            phone: self.phone.clone(),
            national_id: self.national_id.clone(),
            bike_brand: self.bike_brand.clone(),
            bike_registration: self.bike_registration.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RiderApplication {
    pub id: ObjectIdString,

    pub email: String,
    pub name: String,
    pub age: u32,
    pub region: String,
    pub district: String,
    pub phone: String,
    pub national_id: String,
    pub bike_brand: String,
    pub bike_registration: String,

    pub applied_at: FormattedDateTime,
}

impl From<RiderApplicationModel> for RiderApplication {
    fn from(value: RiderApplicationModel) -> Self {
        Self {
            id: value.id.into(),

            email: value.email,
            name: value.name,
            age: value.age,
            region: value.region,
            district: value.district,
            phone: value.phone,
            national_id: value.national_id,
            bike_brand: value.bike_brand,
            bike_registration: value.bike_registration,

            applied_at: value.applied_at.into(),
        }
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct ApplicationRequest {
    #[validate(length(min = 1, max = 124))]
    pub name: String,

    #[validate(range(min = 18, max = 70))]
    pub age: u32,

    #[validate(length(min = 1, max = 64))]
    pub region: String,

    #[validate(length(min = 1, max = 64))]
    pub district: String,

    #[validate(length(min = 4, max = 32))]
    pub phone: String,

    #[validate(length(min = 4, max = 32))]
    pub national_id: String,

    #[validate(length(min = 1, max = 64))]
    pub bike_brand: String,

    #[validate(length(min = 1, max = 64))]
    pub bike_registration: String,
}

/// A normal user asks to become a rider. One outstanding application per
/// email; the email always comes from the verified caller.
#[tracing::instrument(
    skip_all,
    fields(
        user = %auth.email,
    )
)]
pub async fn apply(
    State(applications): State<ApplicationRepo>,
    auth: AuthUser,
    Json(request): Json<ApplicationRequest>,
) -> Result<(StatusCode, Json<RiderApplication>), Error> {
    policy::require_role(&auth, Role::User)
        .tap_err(|_| tracing::debug!("tried applying with non user role"))?;
    request.validate()?;

    if applications.find_by_email(&auth.email).await?.is_some() {
        return Err(Error::Conflict("you have already applied".to_string()));
    }

    let model = RiderApplicationModel {
        id: ObjectId::new(),

        email: auth.email,
        name: request.name,
        age: request.age,
        region: request.region,
        district: request.district,
        phone: request.phone,
        national_id: request.national_id,
        bike_brand: request.bike_brand,
        bike_registration: request.bike_registration,

        applied_at: OffsetDateTime::now_utc().into(),
    };

    applications.insert(&model).await?;

    Ok((StatusCode::CREATED, Json(model.into())))
}

pub async fn applications(
    Admin(_admin): Admin,
    State(applications): State<ApplicationRepo>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Paginated<RiderApplication>>, Error> {
    let (applications, total) = applications.list(Some(query.request()?)).await?;
    let applications = applications.into_iter().map(RiderApplication::from).collect();

    Ok(Json(Paginated::new(applications, total, &query)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

impl FromStr for Decision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(Self::Accept),
            "reject" => Ok(Self::Reject),
            other => Err(Error::InvalidInput(format!(
                "invalid decision {other:?} (expected \"accept\" or \"reject\")"
            ))),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DecisionResponse {
    pub message: String,
}

/// Admin disposition of an application: acceptance promotes the user to
/// rider and merges the application into their profile, rejection just
/// drops the application. Either way the application record is deleted.
#[tracing::instrument(
    skip_all,
    fields(
        admin = %admin.email,
        email = %email,
    )
)]
pub async fn decide(
    Admin(admin): Admin,
    State(applications): State<ApplicationRepo>,
    State(users): State<UserRepo>,
    Path((email, decision)): Path<(String, String)>,
) -> Result<Json<DecisionResponse>, Error> {
    let decision = decision.parse::<Decision>()?;

    let application = applications
        .find_by_email(&email)
        .await?
        .ok_or(Error::NotFound("application not found"))?;

    let message = match decision {
        Decision::Accept => {
            let matched = users
                .set_role(&email, Role::Rider, Some(application.details()))
                .await?;

            if matched == 0 {
                return Err(Error::NotFound("user not found"))
                    .tap_err(|_| tracing::debug!("application without matching user"));
            }

            "application accepted"
        }
        Decision::Reject => "application rejected",
    };

    applications.delete_by_email(&email).await?;

    Ok(Json(DecisionResponse {
        message: message.to_string(),
    }))
}

pub async fn index(
    Admin(_admin): Admin,
    State(users): State<UserRepo>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Paginated<User>>, Error> {
    let filter = UserFilter {
        role: Some(Role::Rider),
        district: None,
    };

    let (riders, total) = users.list(filter, Some(query.request()?)).await?;
    let riders = riders.into_iter().map(User::from).collect();

    Ok(Json(Paginated::new(riders, total, &query)))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AvailableRidersQuery {
    pub district: Option<String>,

    pub page: Option<u64>,
    pub limit: Option<u64>,
}

/// Riders filtered by the district they operate in, used by the assignment
/// screen to offer candidates near the parcel.
pub async fn available(
    Admin(_admin): Admin,
    State(users): State<UserRepo>,
    Query(query): Query<AvailableRidersQuery>,
) -> Result<Json<Paginated<User>>, Error> {
    let page_query = PageQuery {
        page: query.page,
        limit: query.limit,
    };
    let filter = UserFilter {
        role: Some(Role::Rider),
        district: query.district,
    };

    let (riders, total) = users.list(filter, Some(page_query.request()?)).await?;
    let riders = riders.into_iter().map(User::from).collect();

    Ok(Json(Paginated::new(riders, total, &page_query)))
}

const ACTIVE_STATUSES: [DeliveryStatus; 4] = [
    DeliveryStatus::Collecting,
    DeliveryStatus::Collected,
    DeliveryStatus::SendWarehouse,
    DeliveryStatus::Delivering,
];

pub async fn my_parcels(
    Rider(rider): Rider,
    State(parcels): State<ParcelRepo>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Paginated<Parcel>>, Error> {
    let filter = ParcelFilter {
        assigned: Some(AssignmentFilter::Either(rider.email)),
        delivery_status_in: Some(ACTIVE_STATUSES.to_vec()),
        ..ParcelFilter::default()
    };

    let (parcels, total) = parcels.list(filter, Some(query.request()?)).await?;
    let parcels = parcels.into_iter().map(Parcel::from).collect();

    Ok(Json(Paginated::new(parcels, total, &query)))
}

pub async fn completed_parcels(
    Rider(rider): Rider,
    State(parcels): State<ParcelRepo>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Paginated<Parcel>>, Error> {
    let filter = ParcelFilter {
        assigned: Some(AssignmentFilter::Either(rider.email)),
        delivery_status: Some(DeliveryStatus::Delivered),
        ..ParcelFilter::default()
    };

    let (parcels, total) = parcels.list(filter, Some(query.request()?)).await?;
    let parcels = parcels.into_iter().map(Parcel::from).collect();

    Ok(Json(Paginated::new(parcels, total, &query)))
}

/// Share of the parcel cost a rider earns per completed leg.
fn leg_rate() -> Decimal {
    Decimal::new(35, 2)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Earnings {
    pub collected_parcel_earning: Decimal,
    pub delivered_parcel_earning: Decimal,
    pub total_earning: Decimal,
    pub cashed_out_earning: Decimal,
    pub pending_earning: Decimal,
}

/// Derived earnings: 35% of cost per leg the rider performed, counted
/// independently for the collect and deliver legs. A collect leg counts once
/// the parcel moved past collection, a deliver leg once it is delivered.
pub fn compute_earnings(parcels: &[ParcelModel], rider_email: &str) -> Earnings {
    let mut earnings = Earnings {
        collected_parcel_earning: Decimal::ZERO,
        delivered_parcel_earning: Decimal::ZERO,
        total_earning: Decimal::ZERO,
        cashed_out_earning: Decimal::ZERO,
        pending_earning: Decimal::ZERO,
    };

    for parcel in parcels {
        let mut parcel_earning = Decimal::ZERO;

        let collect_done = matches!(
            parcel.delivery_status,
            DeliveryStatus::Collected
                | DeliveryStatus::SendWarehouse
                | DeliveryStatus::Delivering
                | DeliveryStatus::Delivered
        );
        if collect_done && parcel.assigned_to_collect.as_deref() == Some(rider_email) {
            let earned = parcel.content.cost * leg_rate();
            earnings.collected_parcel_earning += earned;
            parcel_earning += earned;
        }

        let deliver_done = parcel.delivery_status == DeliveryStatus::Delivered;
        if deliver_done && parcel.assigned_to_deliver.as_deref() == Some(rider_email) {
            let earned = parcel.content.cost * leg_rate();
            earnings.delivered_parcel_earning += earned;
            parcel_earning += earned;
        }

        match parcel.cashout_status {
            Some(CashoutStatus::CashedOut) => earnings.cashed_out_earning += parcel_earning,
            None => earnings.pending_earning += parcel_earning,
        }
    }

    earnings.total_earning = earnings.collected_parcel_earning + earnings.delivered_parcel_earning;
    earnings
}

pub async fn earnings(
    Rider(rider): Rider,
    State(parcels): State<ParcelRepo>,
) -> Result<Json<Earnings>, Error> {
    let filter = ParcelFilter {
        assigned: Some(AssignmentFilter::Either(rider.email.clone())),
        ..ParcelFilter::default()
    };

    let (parcels, _) = parcels.list(filter, None).await?;

    Ok(Json(compute_earnings(&parcels, &rider.email)))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CashoutResponse {
    pub message: String,
}

/// Withdrawal claim against a parcel the rider worked on. The filter carries
/// the not-yet-cashed-out precondition, so a repeated call matches nothing
/// and fails without touching state.
#[tracing::instrument(
    skip_all,
    fields(
        id = %parcel_id,
        rider = %rider.email,
    )
)]
pub async fn cashout(
    Rider(rider): Rider,
    State(parcels): State<ParcelRepo>,
    PathObjectId(parcel_id): PathObjectId,
) -> Result<Json<CashoutResponse>, Error> {
    let filter = ParcelFilter {
        id: Some(parcel_id),
        assigned: Some(AssignmentFilter::Either(rider.email.clone())),
        not_cashed_out: true,
        ..ParcelFilter::default()
    };
    let patch = ParcelPatch {
        cashout_status: Some(CashoutStatus::CashedOut),
        updated_at: Some(OffsetDateTime::now_utc().into()),
        ..ParcelPatch::default()
    };

    let matched = parcels.update_one(filter, patch).await?;
    if matched == 0 {
        return Err(Error::Conflict(
            "parcel not found or already cashed out".to_string(),
        ))
        .tap_err(|_| tracing::debug!("cashout matched nothing"));
    }

    Ok(Json(CashoutResponse {
        message: "cashout successful".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::{
        extract::{Path, Query},
        Json,
    };
    use rust_decimal::Decimal;

    use crate::{
        api::v1::tests::{bootstrap, sample_application},
        api::v1::user::Role,
        error::Error,
        util::PageQuery,
    };

    use super::{compute_earnings, AvailableRidersQuery, DeliveryStatus};

    #[tokio::test]
    async fn test_apply_then_conflict() {
        let bootstrap = bootstrap().await;
        let applicant = bootstrap.derive("applicant@test.com", Role::User).await;

        let (_, Json(application)) = super::apply(
            bootstrap.applications(),
            applicant.auth(),
            Json(sample_application("Dhaka")),
        )
        .await
        .unwrap();
        assert_eq!(application.email, "applicant@test.com");

        let error = super::apply(
            bootstrap.applications(),
            applicant.auth(),
            Json(sample_application("Dhaka")),
        )
        .await
        .unwrap_err();
        assert_matches!(error, Error::Conflict(..));
    }

    #[tokio::test]
    async fn test_only_users_can_apply() {
        let bootstrap = bootstrap().await;
        let rider = bootstrap.rider("rider@test.com", "Dhaka").await;

        let error = super::apply(
            bootstrap.applications(),
            rider.auth(),
            Json(sample_application("Dhaka")),
        )
        .await
        .unwrap_err();
        assert_matches!(error, Error::Forbidden);

        let error = super::apply(
            bootstrap.applications(),
            bootstrap.admin.auth(),
            Json(sample_application("Dhaka")),
        )
        .await
        .unwrap_err();
        assert_matches!(error, Error::Forbidden);
    }

    #[tokio::test]
    async fn test_accept_promotes_and_deletes() {
        let bootstrap = bootstrap().await;
        let applicant = bootstrap.derive("applicant@test.com", Role::User).await;
        bootstrap.submit_application(&applicant).await;

        let _ = super::decide(
            bootstrap.admin.admin(),
            bootstrap.applications(),
            bootstrap.users(),
            Path(("applicant@test.com".to_string(), "accept".to_string())),
        )
        .await
        .unwrap();

        let user = bootstrap
            .app_state
            .users
            .find_by_email("applicant@test.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.role, Role::Rider);
        assert_eq!(user.details.unwrap().district, "Dhaka");

        assert!(bootstrap
            .app_state
            .applications
            .find_by_email("applicant@test.com")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_reject_deletes_without_promotion() {
        let bootstrap = bootstrap().await;
        let applicant = bootstrap.derive("applicant@test.com", Role::User).await;
        bootstrap.submit_application(&applicant).await;

        let _ = super::decide(
            bootstrap.admin.admin(),
            bootstrap.applications(),
            bootstrap.users(),
            Path(("applicant@test.com".to_string(), "reject".to_string())),
        )
        .await
        .unwrap();

        let user = bootstrap
            .app_state
            .users
            .find_by_email("applicant@test.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.role, Role::User);
        assert!(user.details.is_none());

        assert!(bootstrap
            .app_state
            .applications
            .find_by_email("applicant@test.com")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_decide_rejects_bad_decision() {
        let bootstrap = bootstrap().await;

        let error = super::decide(
            bootstrap.admin.admin(),
            bootstrap.applications(),
            bootstrap.users(),
            Path(("applicant@test.com".to_string(), "maybe".to_string())),
        )
        .await
        .unwrap_err();
        assert_matches!(error, Error::InvalidInput(..));
    }

    #[tokio::test]
    async fn test_decide_missing_application() {
        let bootstrap = bootstrap().await;

        let error = super::decide(
            bootstrap.admin.admin(),
            bootstrap.applications(),
            bootstrap.users(),
            Path(("nobody@test.com".to_string(), "accept".to_string())),
        )
        .await
        .unwrap_err();
        assert_matches!(error, Error::NotFound(..));
    }

    #[tokio::test]
    async fn test_available_riders_by_district() {
        let bootstrap = bootstrap().await;
        bootstrap.rider("dhaka@test.com", "Dhaka").await;
        bootstrap.rider("sylhet@test.com", "Sylhet").await;

        let Json(riders) = super::available(
            bootstrap.admin.admin(),
            bootstrap.users(),
            Query(AvailableRidersQuery {
                district: Some("Dhaka".to_string()),
                ..AvailableRidersQuery::default()
            }),
        )
        .await
        .unwrap();

        assert_eq!(riders.pagination.total, 1);
        assert_eq!(riders.data[0].email, "dhaka@test.com");
    }

    #[tokio::test]
    async fn test_earnings_two_collects_one_delivery() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;
        let rider = bootstrap.rider("rider@test.com", "Dhaka").await;

        // same-district parcel: rider collects and delivers it
        let both = bootstrap.create_parcel(&customer, "Dhaka", "Dhaka", 100).await;
        bootstrap.assign(&both, &rider).await;
        bootstrap.advance(&both, &rider).await; // collected
        bootstrap.advance(&both, &rider).await; // delivering
        bootstrap.advance(&both, &rider).await; // delivered

        // cross-district parcel: rider only collects it
        let collect_only = bootstrap.create_parcel(&customer, "Dhaka", "Sylhet", 100).await;
        bootstrap.assign(&collect_only, &rider).await;
        bootstrap.advance(&collect_only, &rider).await; // collected
        bootstrap.advance(&collect_only, &rider).await; // sendWarehouse

        let Json(earnings) = super::earnings(rider.rider(), bootstrap.parcels())
            .await
            .unwrap();

        assert_eq!(earnings.collected_parcel_earning, Decimal::from(70));
        assert_eq!(earnings.delivered_parcel_earning, Decimal::from(35));
        assert_eq!(earnings.total_earning, Decimal::from(105));
        assert_eq!(earnings.pending_earning, Decimal::from(105));
        assert_eq!(earnings.cashed_out_earning, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_cashout_is_idempotent_in_effect() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;
        let rider = bootstrap.rider("rider@test.com", "Dhaka").await;

        let parcel = bootstrap.create_parcel(&customer, "Dhaka", "Dhaka", 100).await;
        bootstrap.assign(&parcel, &rider).await;
        bootstrap.advance(&parcel, &rider).await;
        bootstrap.advance(&parcel, &rider).await;
        bootstrap.advance(&parcel, &rider).await; // delivered

        let _ = super::cashout(rider.rider(), bootstrap.parcels(), parcel.path_id())
            .await
            .unwrap();

        let error = super::cashout(rider.rider(), bootstrap.parcels(), parcel.path_id())
            .await
            .unwrap_err();
        assert_matches!(error, Error::Conflict(..));

        let Json(earnings) = super::earnings(rider.rider(), bootstrap.parcels())
            .await
            .unwrap();
        assert_eq!(earnings.cashed_out_earning, Decimal::from(70));
        assert_eq!(earnings.pending_earning, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_cashout_requires_assignment() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;
        let rider = bootstrap.rider("rider@test.com", "Dhaka").await;
        let intruder = bootstrap.rider("intruder@test.com", "Dhaka").await;

        let parcel = bootstrap.create_parcel(&customer, "Dhaka", "Dhaka", 100).await;
        bootstrap.assign(&parcel, &rider).await;

        let error = super::cashout(intruder.rider(), bootstrap.parcels(), parcel.path_id())
            .await
            .unwrap_err();
        assert_matches!(error, Error::Conflict(..));
    }

    #[tokio::test]
    async fn test_rider_work_queues() {
        let bootstrap = bootstrap().await;
        let customer = bootstrap.derive("customer@test.com", Role::User).await;
        let rider = bootstrap.rider("rider@test.com", "Dhaka").await;

        let active = bootstrap.create_parcel(&customer, "Dhaka", "Dhaka", 100).await;
        bootstrap.assign(&active, &rider).await;

        let done = bootstrap.create_parcel(&customer, "Dhaka", "Dhaka", 100).await;
        bootstrap.assign(&done, &rider).await;
        bootstrap.advance(&done, &rider).await;
        bootstrap.advance(&done, &rider).await;
        bootstrap.advance(&done, &rider).await; // delivered

        let Json(current) = super::my_parcels(
            rider.rider(),
            bootstrap.parcels(),
            Query(PageQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(current.pagination.total, 1);
        assert_eq!(current.data[0].delivery_status, DeliveryStatus::Collecting);

        let Json(completed) = super::completed_parcels(
            rider.rider(),
            bootstrap.parcels(),
            Query(PageQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(completed.pagination.total, 1);
        assert_eq!(completed.data[0].delivery_status, DeliveryStatus::Delivered);
    }

    #[test]
    fn test_compute_earnings_empty() {
        let earnings = compute_earnings(&[], "rider@test.com");
        assert_eq!(earnings.total_earning, Decimal::ZERO);
        assert_eq!(earnings.pending_earning, Decimal::ZERO);
    }
}
