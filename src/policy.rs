//! Pure authorization decisions, evaluated after identity resolution and
//! before any mutation. Listing scopes are expressed as storage filters so
//! unauthorized records are never materialized.

use bson::oid::ObjectId;

use crate::{
    api::v1::{
        parcel::{DeliveryStatus, ParcelListQuery, ParcelModel, PaymentStatus},
        user::Role,
    },
    error::Error,
    identity::AuthUser,
    store::{AssignmentFilter, ParcelFilter},
};

pub fn require_role(auth: &AuthUser, role: Role) -> Result<(), Error> {
    if auth.role == role {
        Ok(())
    } else {
        Err(Error::Forbidden)
    }
}

/// Role-scoped filter for parcel listings. Admins may narrow by any field,
/// customers are pinned to parcels they created, riders to parcels assigned
/// to either of their legs.
pub fn parcel_list_filter(auth: &AuthUser, query: &ParcelListQuery) -> ParcelFilter {
    let requested = ParcelFilter {
        delivery_status: query.delivery_status,
        payment_status: query.payment_status,
        ..ParcelFilter::default()
    };

    match auth.role {
        Role::Admin => ParcelFilter {
            created_by: query.email.clone(),
            ..requested
        },
        Role::User => ParcelFilter {
            created_by: Some(auth.email.clone()),
            ..requested
        },
        Role::Rider => ParcelFilter {
            assigned: Some(AssignmentFilter::Either(auth.email.clone())),
            ..requested
        },
    }
}

/// Role-scoped filter for a single-parcel read.
pub fn parcel_read_filter(auth: &AuthUser, id: ObjectId) -> ParcelFilter {
    let filter = ParcelFilter {
        id: Some(id),
        ..ParcelFilter::default()
    };

    match auth.role {
        Role::Admin => filter,
        Role::User => ParcelFilter {
            created_by: Some(auth.email.clone()),
            ..filter
        },
        Role::Rider => ParcelFilter {
            assigned: Some(AssignmentFilter::Either(auth.email.clone())),
            ..filter
        },
    }
}

/// The customer-mutation guard: a parcel is editable by its owner only while
/// it is still pending and unpaid. The same facts are repeated in the
/// conditional update/delete filters so the check holds atomically.
pub fn can_modify(parcel: &ParcelModel, email: &str) -> bool {
    parcel.created_by == email
        && parcel.delivery_status == DeliveryStatus::Pending
        && parcel.payment_status == PaymentStatus::Unpaid
}

/// Filter enforcing [`can_modify`] inside the storage layer.
pub fn modifiable_parcel_filter(id: ObjectId, email: &str) -> ParcelFilter {
    ParcelFilter {
        id: Some(id),
        created_by: Some(email.to_string()),
        delivery_status: Some(DeliveryStatus::Pending),
        payment_status: Some(PaymentStatus::Unpaid),
        ..ParcelFilter::default()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        api::v1::parcel::{DeliveryStatus, ParcelListQuery, PaymentStatus},
        api::v1::tests::sample_parcel,
        api::v1::user::Role,
        identity::AuthUser,
        store::AssignmentFilter,
    };

    use super::{can_modify, parcel_list_filter};

    fn auth(email: &str, role: Role) -> AuthUser {
        AuthUser {
            uid: format!("uid-{email}"),
            email: email.to_string(),
            role,
        }
    }

    #[test]
    fn test_can_modify_only_pending_unpaid_owned() {
        let mut parcel = sample_parcel("customer@test.com", "Dhaka", "Dhaka", 100);
        assert!(can_modify(&parcel, "customer@test.com"));
        assert!(!can_modify(&parcel, "other@test.com"));

        parcel.payment_status = PaymentStatus::Paid;
        assert!(!can_modify(&parcel, "customer@test.com"));

        parcel.payment_status = PaymentStatus::Unpaid;
        parcel.delivery_status = DeliveryStatus::Collecting;
        assert!(!can_modify(&parcel, "customer@test.com"));
    }

    #[test]
    fn test_list_filter_pins_scope_by_role() {
        let query = ParcelListQuery {
            email: Some("someone-else@test.com".to_string()),
            ..ParcelListQuery::default()
        };

        let filter = parcel_list_filter(&auth("admin@test.com", Role::Admin), &query);
        assert_eq!(filter.created_by.as_deref(), Some("someone-else@test.com"));

        // a customer cannot widen the scope via the email filter
        let filter = parcel_list_filter(&auth("customer@test.com", Role::User), &query);
        assert_eq!(filter.created_by.as_deref(), Some("customer@test.com"));

        let filter = parcel_list_filter(&auth("rider@test.com", Role::Rider), &query);
        assert!(filter.created_by.is_none());
        assert!(matches!(
            filter.assigned,
            Some(AssignmentFilter::Either(email)) if email == "rider@test.com"
        ));
    }
}
