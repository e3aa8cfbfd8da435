//! MongoDB storage backend. Filters and patches are translated into plain
//! filter documents and `$set` updates, so every conditional mutation is a
//! single atomic `updateOne`/`deleteOne` against the collection.

use bson::{doc, Document};
use mongodb::{
    options::{FindOptions, IndexOptions},
    Collection, Database, IndexModel,
};

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

pub struct MongoStore {
    parcels: Collection<ParcelModel>,
    users: Collection<UserModel>,
    applications: Collection<RiderApplicationModel>,
    payments: Collection<PaymentModel>,
}

impl MongoStore {
    pub fn new(db: &Database) -> Self {
        Self {
            parcels: db.collection("parcels"),
            users: db.collection("users"),
            applications: db.collection("rider_applications"),
            payments: db.collection("payments"),
        }
    }

    pub async fn ensure_indexes(&self) -> Result<(), Error> {
        let unique = IndexOptions::builder().unique(true).build();

        self.users
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(unique.clone())
                    .build(),
                None,
            )
            .await?;

        self.applications
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(unique)
                    .build(),
                None,
            )
            .await?;

        self.parcels
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "created_by": 1, "created_at": -1 })
                    .build(),
                None,
            )
            .await?;

        self.payments
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "userEmail": 1, "createdAt": -1 })
                    .build(),
                None,
            )
            .await?;

        Ok(())
    }
}

fn parcel_filter_doc(filter: &ParcelFilter) -> Result<Document, Error> {
    let mut document = Document::new();

    if let Some(id) = filter.id {
        document.insert("_id", id);
    }
    if let Some(created_by) = &filter.created_by {
        document.insert("created_by", created_by);
    }
    if let Some(status) = filter.delivery_status {
        document.insert("delivery_status", bson::to_bson(&status)?);
    }
    if let Some(statuses) = &filter.delivery_status_in {
        document.insert("delivery_status", doc! { "$in": bson::to_bson(statuses)? });
    }
    if let Some(status) = filter.payment_status {
        document.insert("payment_status", bson::to_bson(&status)?);
    }
    if let Some(assigned) = &filter.assigned {
        match assigned {
            AssignmentFilter::Collector(email) => {
                document.insert("assigned_to_collect", email);
            }
            AssignmentFilter::Deliverer(email) => {
                document.insert("assigned_to_deliver", email);
            }
            AssignmentFilter::Either(email) => {
                document.insert(
                    "$or",
                    vec![
                        doc! { "assigned_to_collect": email },
                        doc! { "assigned_to_deliver": email },
                    ],
                );
            }
        }
    }
    if filter.not_cashed_out {
        document.insert(
            "cashout_status",
            doc! { "$ne": bson::to_bson(&crate::api::v1::parcel::CashoutStatus::CashedOut)? },
        );
    }

    Ok(document)
}

fn parcel_patch_doc(patch: ParcelPatch) -> Result<Document, Error> {
    let mut set = Document::new();

    if let Some(content) = &patch.content {
        set.extend(bson::to_document(content)?);
    }
    if let Some(status) = patch.delivery_status {
        set.insert("delivery_status", bson::to_bson(&status)?);
    }
    if let Some(status) = patch.payment_status {
        set.insert("payment_status", bson::to_bson(&status)?);
    }
    if let Some(email) = patch.assigned_to_collect {
        set.insert("assigned_to_collect", email);
    }
    if let Some(email) = patch.assigned_to_deliver {
        set.insert("assigned_to_deliver", email);
    }
    if let Some(status) = patch.cashout_status {
        set.insert("cashout_status", bson::to_bson(&status)?);
    }
    if let Some(at) = patch.assigned_at {
        set.insert("assigned_at", at);
    }
    if let Some(at) = patch.updated_at {
        set.insert("updated_at", at);
    }

    Ok(doc! { "$set": set })
}

fn find_options(page: Option<PageRequest>, sort: Document) -> FindOptions {
    let mut options = FindOptions::default();
    options.sort = Some(sort);

    if let Some(page) = page {
        options.skip = Some(page.skip);
        options.limit = Some(page.limit as i64);
    }

    options
}

#[axum::async_trait]
impl ParcelStore for MongoStore {
    async fn insert(&self, parcel: &ParcelModel) -> Result<(), Error> {
        self.parcels.insert_one(parcel, None).await?;
        Ok(())
    }

    async fn find_one(&self, filter: ParcelFilter) -> Result<Option<ParcelModel>, Error> {
        self.parcels
            .find_one(parcel_filter_doc(&filter)?, None)
            .await
            .map_err(Into::into)
    }

    async fn list(
        &self,
        filter: ParcelFilter,
        page: Option<PageRequest>,
    ) -> Result<(Vec<ParcelModel>, u64), Error> {
        let filter = parcel_filter_doc(&filter)?;
        let total = self.parcels.count_documents(filter.clone(), None).await?;

        let options = find_options(page, doc! { "created_at": -1, "_id": -1 });
        let mut cursor = self.parcels.find(filter, options).await?;

        let mut parcels = vec![];
        while cursor.advance().await? {
            parcels.push(cursor.deserialize_current()?);
        }

        Ok((parcels, total))
    }

    async fn update_one(&self, filter: ParcelFilter, patch: ParcelPatch) -> Result<u64, Error> {
        let result = self
            .parcels
            .update_one(parcel_filter_doc(&filter)?, parcel_patch_doc(patch)?, None)
            .await?;

        Ok(result.matched_count)
    }

    async fn delete_one(&self, filter: ParcelFilter) -> Result<u64, Error> {
        let result = self
            .parcels
            .delete_one(parcel_filter_doc(&filter)?, None)
            .await?;

        Ok(result.deleted_count)
    }

    async fn status_counts(&self) -> Result<Vec<StatusCount>, Error> {
        let pipeline = vec![
            doc! { "$group": { "_id": "$delivery_status", "count": { "$sum": 1 } } },
            doc! { "$project": { "_id": 0, "status": "$_id", "count": 1 } },
            doc! { "$sort": { "status": 1 } },
        ];

        let mut cursor = self.parcels.aggregate(pipeline, None).await?;

        let mut counts = vec![];
        while cursor.advance().await? {
            let document = cursor.deserialize_current()?;
            counts.push(bson::from_document::<StatusCount>(document)?);
        }

        Ok(counts)
    }
}

fn user_filter_doc(filter: &UserFilter) -> Result<Document, Error> {
    let mut document = Document::new();

    if let Some(role) = filter.role {
        document.insert("role", bson::to_bson(&role)?);
    }
    if let Some(district) = &filter.district {
        document.insert("details.district", district);
    }

    Ok(document)
}

#[axum::async_trait]
impl UserStore for MongoStore {
    async fn insert(&self, user: &UserModel) -> Result<(), Error> {
        self.users.insert_one(user, None).await?;
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserModel>, Error> {
        self.users
            .find_one(doc! { "email": email }, None)
            .await
            .map_err(Into::into)
    }

    async fn touch_login(&self, email: &str, at: bson::DateTime) -> Result<u64, Error> {
        let result = self
            .users
            .update_one(
                doc! { "email": email },
                doc! { "$set": { "last_logged_in": at } },
                None,
            )
            .await?;

        Ok(result.matched_count)
    }

    async fn update_profile(&self, email: &str, patch: ProfilePatch) -> Result<u64, Error> {
        let mut set = Document::new();
        if let Some(name) = patch.name {
            set.insert("name", name);
        }
        if let Some(phone) = patch.phone {
            set.insert("phone", phone);
        }

        let result = self
            .users
            .update_one(doc! { "email": email }, doc! { "$set": set }, None)
            .await?;

        Ok(result.matched_count)
    }

    async fn set_role(
        &self,
        email: &str,
        role: Role,
        details: Option<RiderDetails>,
    ) -> Result<u64, Error> {
        let mut set = doc! { "role": bson::to_bson(&role)? };
        if let Some(details) = details {
            set.insert("details", bson::to_bson(&details)?);
        }

        let result = self
            .users
            .update_one(doc! { "email": email }, doc! { "$set": set }, None)
            .await?;

        Ok(result.matched_count)
    }

    async fn list(
        &self,
        filter: UserFilter,
        page: Option<PageRequest>,
    ) -> Result<(Vec<UserModel>, u64), Error> {
        let filter = user_filter_doc(&filter)?;
        let total = self.users.count_documents(filter.clone(), None).await?;

        let options = find_options(page, doc! { "created_at": 1, "_id": 1 });
        let mut cursor = self.users.find(filter, options).await?;

        let mut users = vec![];
        while cursor.advance().await? {
            users.push(cursor.deserialize_current()?);
        }

        Ok((users, total))
    }

    async fn delete_by_email(&self, email: &str) -> Result<u64, Error> {
        let result = self.users.delete_one(doc! { "email": email }, None).await?;
        Ok(result.deleted_count)
    }
}

#[axum::async_trait]
impl ApplicationStore for MongoStore {
    async fn insert(&self, application: &RiderApplicationModel) -> Result<(), Error> {
        self.applications.insert_one(application, None).await?;
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<RiderApplicationModel>, Error> {
        self.applications
            .find_one(doc! { "email": email }, None)
            .await
            .map_err(Into::into)
    }

    async fn list(
        &self,
        page: Option<PageRequest>,
    ) -> Result<(Vec<RiderApplicationModel>, u64), Error> {
        let total = self.applications.count_documents(None, None).await?;

        let options = find_options(page, doc! { "applied_at": 1, "_id": 1 });
        let mut cursor = self.applications.find(None, options).await?;

        let mut applications = vec![];
        while cursor.advance().await? {
            applications.push(cursor.deserialize_current()?);
        }

        Ok((applications, total))
    }

    async fn delete_by_email(&self, email: &str) -> Result<u64, Error> {
        let result = self
            .applications
            .delete_one(doc! { "email": email }, None)
            .await?;

        Ok(result.deleted_count)
    }
}

#[axum::async_trait]
impl PaymentStore for MongoStore {
    async fn insert(&self, payment: &PaymentModel) -> Result<(), Error> {
        self.payments.insert_one(payment, None).await?;
        Ok(())
    }

    async fn list(
        &self,
        user_email: Option<&str>,
        page: Option<PageRequest>,
    ) -> Result<(Vec<PaymentModel>, u64), Error> {
        let mut filter = Document::new();
        if let Some(email) = user_email {
            filter.insert("userEmail", email);
        }

        let total = self.payments.count_documents(filter.clone(), None).await?;

        let options = find_options(page, doc! { "createdAt": -1, "_id": -1 });
        let mut cursor = self.payments.find(filter, options).await?;

        let mut payments = vec![];
        while cursor.advance().await? {
            payments.push(cursor.deserialize_current()?);
        }

        Ok((payments, total))
    }
}
