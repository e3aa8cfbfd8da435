//! In-memory storage backend. Conditional mutations hold the per-key entry
//! lock while the precondition is re-checked, which gives the same
//! at-most-one-winner behavior as the conditional writes on the mongo
//! backend.

use std::collections::BTreeMap;

use bson::oid::ObjectId;
use dashmap::DashMap;

use crate::{
    api::v1::{
        parcel::ParcelModel,
        payment::PaymentModel,
        rider::RiderApplicationModel,
        user::{RiderDetails, Role, UserModel},
    },
    error::Error,
    util::PageRequest,
};

use super::{
    ApplicationStore, AssignmentFilter, ParcelFilter, ParcelPatch, ParcelStore, PaymentStore,
    ProfilePatch, StatusCount, UserFilter, UserStore,
};

#[derive(Default)]
pub struct MemoryStore {
    parcels: DashMap<ObjectId, ParcelModel>,
    users: DashMap<String, UserModel>,
    applications: DashMap<String, RiderApplicationModel>,
    payments: DashMap<ObjectId, PaymentModel>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T>(items: Vec<T>, page: Option<PageRequest>) -> (Vec<T>, u64) {
    let total = items.len() as u64;

    match page {
        Some(page) => (
            items
                .into_iter()
                .skip(page.skip as usize)
                .take(page.limit as usize)
                .collect(),
            total,
        ),
        None => (items, total),
    }
}

fn parcel_matches(parcel: &ParcelModel, filter: &ParcelFilter) -> bool {
    if let Some(id) = filter.id {
        if parcel.id != id {
            return false;
        }
    }
    if let Some(created_by) = &filter.created_by {
        if &parcel.created_by != created_by {
            return false;
        }
    }
    if let Some(status) = filter.delivery_status {
        if parcel.delivery_status != status {
            return false;
        }
    }
    if let Some(statuses) = &filter.delivery_status_in {
        if !statuses.contains(&parcel.delivery_status) {
            return false;
        }
    }
    if let Some(status) = filter.payment_status {
        if parcel.payment_status != status {
            return false;
        }
    }
    if let Some(assigned) = &filter.assigned {
        let matches = match assigned {
            AssignmentFilter::Collector(email) => {
                parcel.assigned_to_collect.as_deref() == Some(email.as_str())
            }
            AssignmentFilter::Deliverer(email) => {
                parcel.assigned_to_deliver.as_deref() == Some(email.as_str())
            }
            AssignmentFilter::Either(email) => {
                parcel.assigned_to_collect.as_deref() == Some(email.as_str())
                    || parcel.assigned_to_deliver.as_deref() == Some(email.as_str())
            }
        };
        if !matches {
            return false;
        }
    }
    if filter.not_cashed_out && parcel.cashout_status.is_some() {
        return false;
    }

    true
}

fn apply_parcel_patch(parcel: &mut ParcelModel, patch: ParcelPatch) {
    if let Some(content) = patch.content {
        parcel.content = content;
    }
    if let Some(status) = patch.delivery_status {
        parcel.delivery_status = status;
    }
    if let Some(status) = patch.payment_status {
        parcel.payment_status = status;
    }
    if let Some(email) = patch.assigned_to_collect {
        parcel.assigned_to_collect = Some(email);
    }
    if let Some(email) = patch.assigned_to_deliver {
        parcel.assigned_to_deliver = Some(email);
    }
    if let Some(status) = patch.cashout_status {
        parcel.cashout_status = Some(status);
    }
    if let Some(at) = patch.assigned_at {
        parcel.assigned_at = Some(at);
    }
    if let Some(at) = patch.updated_at {
        parcel.updated_at = at;
    }
}

impl MemoryStore {
    fn matching_parcel_key(&self, filter: &ParcelFilter) -> Option<ObjectId> {
        if let Some(id) = filter.id {
            return Some(id);
        }

        self.parcels
            .iter()
            .find(|entry| parcel_matches(entry.value(), filter))
            .map(|entry| *entry.key())
    }
}

#[axum::async_trait]
impl ParcelStore for MemoryStore {
    async fn insert(&self, parcel: &ParcelModel) -> Result<(), Error> {
        self.parcels.insert(parcel.id, parcel.clone());
        Ok(())
    }

    async fn find_one(&self, filter: ParcelFilter) -> Result<Option<ParcelModel>, Error> {
        if let Some(id) = filter.id {
            return Ok(self.parcels.get(&id).and_then(|entry| {
                parcel_matches(entry.value(), &filter).then(|| entry.value().clone())
            }));
        }

        Ok(self
            .parcels
            .iter()
            .find(|entry| parcel_matches(entry.value(), &filter))
            .map(|entry| entry.value().clone()))
    }

    async fn list(
        &self,
        filter: ParcelFilter,
        page: Option<PageRequest>,
    ) -> Result<(Vec<ParcelModel>, u64), Error> {
        let mut parcels: Vec<ParcelModel> = self
            .parcels
            .iter()
            .filter(|entry| parcel_matches(entry.value(), &filter))
            .map(|entry| entry.value().clone())
            .collect();

        // newest first, object ids break same-millisecond ties
        parcels.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        Ok(paginate(parcels, page))
    }

    async fn update_one(&self, filter: ParcelFilter, patch: ParcelPatch) -> Result<u64, Error> {
        let Some(key) = self.matching_parcel_key(&filter) else {
            return Ok(0);
        };

        if let Some(mut entry) = self.parcels.get_mut(&key) {
            // precondition re-checked under the entry lock
            if parcel_matches(entry.value(), &filter) {
                apply_parcel_patch(entry.value_mut(), patch);
                return Ok(1);
            }
        }

        Ok(0)
    }

    async fn delete_one(&self, filter: ParcelFilter) -> Result<u64, Error> {
        let Some(key) = self.matching_parcel_key(&filter) else {
            return Ok(0);
        };

        let removed = self
            .parcels
            .remove_if(&key, |_, parcel| parcel_matches(parcel, &filter));

        Ok(removed.is_some() as u64)
    }

    async fn status_counts(&self) -> Result<Vec<StatusCount>, Error> {
        let mut counts: BTreeMap<&'static str, u64> = BTreeMap::new();

        for entry in self.parcels.iter() {
            *counts.entry(entry.value().delivery_status.as_str()).or_default() += 1;
        }

        Ok(counts
            .into_iter()
            .map(|(status, count)| StatusCount {
                status: status.to_string(),
                count,
            })
            .collect())
    }
}

fn user_matches(user: &UserModel, filter: &UserFilter) -> bool {
    if let Some(role) = filter.role {
        if user.role != role {
            return false;
        }
    }
    if let Some(district) = &filter.district {
        let user_district = user.details.as_ref().map(|details| details.district.as_str());
        if user_district != Some(district.as_str()) {
            return false;
        }
    }

    true
}

#[axum::async_trait]
impl UserStore for MemoryStore {
    async fn insert(&self, user: &UserModel) -> Result<(), Error> {
        if self.users.contains_key(&user.email) {
            return Err(Error::Conflict("email must be unique".to_string()));
        }

        self.users.insert(user.email.clone(), user.clone());
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserModel>, Error> {
        Ok(self.users.get(email).map(|entry| entry.value().clone()))
    }

    async fn touch_login(&self, email: &str, at: bson::DateTime) -> Result<u64, Error> {
        match self.users.get_mut(email) {
            Some(mut entry) => {
                entry.value_mut().last_logged_in = at;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_profile(&self, email: &str, patch: ProfilePatch) -> Result<u64, Error> {
        match self.users.get_mut(email) {
            Some(mut entry) => {
                let user = entry.value_mut();
                if let Some(name) = patch.name {
                    user.name = Some(name);
                }
                if let Some(phone) = patch.phone {
                    user.phone = Some(phone);
                }
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn set_role(
        &self,
        email: &str,
        role: Role,
        details: Option<RiderDetails>,
    ) -> Result<u64, Error> {
        match self.users.get_mut(email) {
            Some(mut entry) => {
                let user = entry.value_mut();
                user.role = role;
                if details.is_some() {
                    user.details = details;
                }
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn list(
        &self,
        filter: UserFilter,
        page: Option<PageRequest>,
    ) -> Result<(Vec<UserModel>, u64), Error> {
        let mut users: Vec<UserModel> = self
            .users
            .iter()
            .filter(|entry| user_matches(entry.value(), &filter))
            .map(|entry| entry.value().clone())
            .collect();

        // oldest first, stable insertion-order paging
        users.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(paginate(users, page))
    }

    async fn delete_by_email(&self, email: &str) -> Result<u64, Error> {
        Ok(self.users.remove(email).is_some() as u64)
    }
}

#[axum::async_trait]
impl ApplicationStore for MemoryStore {
    async fn insert(&self, application: &RiderApplicationModel) -> Result<(), Error> {
        if self.applications.contains_key(&application.email) {
            return Err(Error::Conflict("email must be unique".to_string()));
        }

        self.applications
            .insert(application.email.clone(), application.clone());
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<RiderApplicationModel>, Error> {
        Ok(self
            .applications
            .get(email)
            .map(|entry| entry.value().clone()))
    }

    async fn list(
        &self,
        page: Option<PageRequest>,
    ) -> Result<(Vec<RiderApplicationModel>, u64), Error> {
        let mut applications: Vec<RiderApplicationModel> = self
            .applications
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        applications.sort_by(|a, b| {
            a.applied_at
                .cmp(&b.applied_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(paginate(applications, page))
    }

    async fn delete_by_email(&self, email: &str) -> Result<u64, Error> {
        Ok(self.applications.remove(email).is_some() as u64)
    }
}

#[axum::async_trait]
impl PaymentStore for MemoryStore {
    async fn insert(&self, payment: &PaymentModel) -> Result<(), Error> {
        self.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn list(
        &self,
        user_email: Option<&str>,
        page: Option<PageRequest>,
    ) -> Result<(Vec<PaymentModel>, u64), Error> {
        let mut payments: Vec<PaymentModel> = self
            .payments
            .iter()
            .filter(|entry| match user_email {
                Some(email) => entry.value().user_email == email,
                None => true,
            })
            .map(|entry| entry.value().clone())
            .collect();

        payments.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        Ok(paginate(payments, page))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        api::v1::parcel::DeliveryStatus,
        api::v1::tests::sample_parcel,
        store::{AssignmentFilter, ParcelFilter, ParcelPatch, ParcelStore},
    };

    use super::MemoryStore;

    #[tokio::test]
    async fn test_conditional_update_has_one_winner() {
        let store = MemoryStore::new();

        let mut parcel = sample_parcel("customer@test.com", "Dhaka", "Dhaka", 100);
        parcel.delivery_status = DeliveryStatus::Collecting;
        parcel.assigned_to_collect = Some("rider@test.com".to_string());
        store.insert(&parcel).await.unwrap();

        let filter = || ParcelFilter {
            id: Some(parcel.id),
            delivery_status: Some(DeliveryStatus::Collecting),
            assigned: Some(AssignmentFilter::Collector("rider@test.com".to_string())),
            ..ParcelFilter::default()
        };
        let patch = || ParcelPatch {
            delivery_status: Some(DeliveryStatus::Collected),
            ..ParcelPatch::default()
        };

        // two racing advances computed from the same snapshot: exactly one
        // observes the precondition
        assert_eq!(store.update_one(filter(), patch()).await.unwrap(), 1);
        assert_eq!(store.update_one(filter(), patch()).await.unwrap(), 0);

        let stored = store
            .find_one(ParcelFilter {
                id: Some(parcel.id),
                ..ParcelFilter::default()
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.delivery_status, DeliveryStatus::Collected);
    }

    #[tokio::test]
    async fn test_delete_respects_filter() {
        let store = MemoryStore::new();

        let mut parcel = sample_parcel("customer@test.com", "Dhaka", "Dhaka", 100);
        parcel.delivery_status = DeliveryStatus::Collecting;
        store.insert(&parcel).await.unwrap();

        let deleted = store
            .delete_one(ParcelFilter {
                id: Some(parcel.id),
                delivery_status: Some(DeliveryStatus::Pending),
                ..ParcelFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(deleted, 0);

        let deleted = store
            .delete_one(ParcelFilter {
                id: Some(parcel.id),
                ..ParcelFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(deleted, 1);
    }
}
