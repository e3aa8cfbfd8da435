//! Storage interfaces. Every component receives its collection handle as an
//! injected trait object, so the mongo-backed production stores and the
//! in-memory test stores are interchangeable behind the same state.
//!
//! All state transitions go through conditional mutations: the filter carries
//! the expected precondition and the store reports how many records matched.
//! Racing requests cannot both succeed, the loser observes zero matches.

pub mod memory;
pub mod mongo;

use std::sync::Arc;

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::{
    api::v1::{
        parcel::{CashoutStatus, DeliveryStatus, ParcelContent, ParcelModel, PaymentStatus},
        payment::PaymentModel,
        rider::RiderApplicationModel,
        user::{RiderDetails, Role, UserModel},
    },
    error::Error,
    util::PageRequest,
};

#[derive(Debug, Clone, Default)]
pub struct ParcelFilter {
    pub id: Option<ObjectId>,
    pub created_by: Option<String>,
    pub delivery_status: Option<DeliveryStatus>,
    pub delivery_status_in: Option<Vec<DeliveryStatus>>,
    pub payment_status: Option<PaymentStatus>,
    pub assigned: Option<AssignmentFilter>,
    pub not_cashed_out: bool,
}

#[derive(Debug, Clone)]
pub enum AssignmentFilter {
    Collector(String),
    Deliverer(String),
    Either(String),
}

/// Allow-listed parcel mutation. Anything not named here cannot be written,
/// regardless of what a request body contains.
#[derive(Debug, Clone, Default)]
pub struct ParcelPatch {
    pub content: Option<ParcelContent>,
    pub delivery_status: Option<DeliveryStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub assigned_to_collect: Option<String>,
    pub assigned_to_deliver: Option<String>,
    pub cashout_status: Option<CashoutStatus>,
    pub assigned_at: Option<bson::DateTime>,
    pub updated_at: Option<bson::DateTime>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusCount {
    pub status: String,
    pub count: u64,
}

#[axum::async_trait]
pub trait ParcelStore: Send + Sync {
    async fn insert(&self, parcel: &ParcelModel) -> Result<(), Error>;

    async fn find_one(&self, filter: ParcelFilter) -> Result<Option<ParcelModel>, Error>;

    /// Newest-first listing; `page: None` returns every match.
    async fn list(
        &self,
        filter: ParcelFilter,
        page: Option<PageRequest>,
    ) -> Result<(Vec<ParcelModel>, u64), Error>;

    /// Conditionally patches at most one parcel, returns the matched count.
    async fn update_one(&self, filter: ParcelFilter, patch: ParcelPatch) -> Result<u64, Error>;

    /// Conditionally deletes at most one parcel, returns the deleted count.
    async fn delete_one(&self, filter: ParcelFilter) -> Result<u64, Error>;

    /// `{status, count}` per delivery status, ascending by status name.
    async fn status_counts(&self) -> Result<Vec<StatusCount>, Error>;
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub district: Option<String>,
}

/// Allow-listed profile mutation, the only path by which callers may touch
/// their own user record.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub phone: Option<String>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none()
    }
}

#[axum::async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, user: &UserModel) -> Result<(), Error>;

    async fn find_by_email(&self, email: &str) -> Result<Option<UserModel>, Error>;

    async fn touch_login(&self, email: &str, at: bson::DateTime) -> Result<u64, Error>;

    async fn update_profile(&self, email: &str, patch: ProfilePatch) -> Result<u64, Error>;

    async fn set_role(
        &self,
        email: &str,
        role: Role,
        details: Option<RiderDetails>,
    ) -> Result<u64, Error>;

    /// Oldest-first listing; `page: None` returns every match.
    async fn list(
        &self,
        filter: UserFilter,
        page: Option<PageRequest>,
    ) -> Result<(Vec<UserModel>, u64), Error>;

    async fn delete_by_email(&self, email: &str) -> Result<u64, Error>;
}

#[axum::async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn insert(&self, application: &RiderApplicationModel) -> Result<(), Error>;

    async fn find_by_email(&self, email: &str) -> Result<Option<RiderApplicationModel>, Error>;

    /// Oldest-first listing.
    async fn list(
        &self,
        page: Option<PageRequest>,
    ) -> Result<(Vec<RiderApplicationModel>, u64), Error>;

    async fn delete_by_email(&self, email: &str) -> Result<u64, Error>;
}

#[axum::async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: &PaymentModel) -> Result<(), Error>;

    /// Newest-first listing, optionally narrowed to a single payer.
    async fn list(
        &self,
        user_email: Option<&str>,
        page: Option<PageRequest>,
    ) -> Result<(Vec<PaymentModel>, u64), Error>;
}

macro_rules! repo {
    ($name:ident, $store:ident) => {
        #[derive(Clone)]
        pub struct $name(pub Arc<dyn $store>);

        impl std::ops::Deref for $name {
            type Target = dyn $store;

            fn deref(&self) -> &Self::Target {
                &*self.0
            }
        }
    };
}

repo!(ParcelRepo, ParcelStore);
repo!(UserRepo, UserStore);
repo!(ApplicationRepo, ApplicationStore);
repo!(PaymentRepo, PaymentStore);
