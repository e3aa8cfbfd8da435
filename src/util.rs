use axum::{
    extract::{FromRequestParts, Path},
    http::request::Parts,
    RequestPartsExt,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct ObjectIdString(#[serde(with = "object_id_string")] pub ObjectId);

impl From<ObjectId> for ObjectIdString {
    fn from(value: ObjectId) -> Self {
        Self(value)
    }
}

impl std::ops::Deref for ObjectIdString {
    type Target = ObjectId;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::cmp::PartialEq for ObjectIdString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl std::cmp::Eq for ObjectIdString {}

impl std::fmt::Display for ObjectIdString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

mod object_id_string {
    use bson::oid::ObjectId;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(id: &ObjectId, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&id.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<ObjectId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FormattedDateTime(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

impl From<bson::DateTime> for FormattedDateTime {
    fn from(value: bson::DateTime) -> Self {
        Self(value.into())
    }
}

impl From<OffsetDateTime> for FormattedDateTime {
    fn from(value: OffsetDateTime) -> Self {
        Self(value)
    }
}

/// Rejects ids that are not well-formed 24-hex-char object ids before any
/// storage lookup happens.
#[derive(Debug, Clone, Copy)]
pub struct PathObjectId(pub ObjectId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for PathObjectId
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = parts
            .extract::<Path<String>>()
            .await
            .map_err(|_| Error::InvalidInput("malformed id".to_string()))?;

        ObjectId::parse_str(&id)
            .map(Self)
            .map_err(|_| Error::InvalidInput("malformed id".to_string()))
    }
}

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 10;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl PageQuery {
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(DEFAULT_PAGE)
    }

    pub fn limit(&self) -> u64 {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }

    pub fn request(&self) -> Result<PageRequest, Error> {
        let (page, limit) = (self.page(), self.limit());

        if page < 1 || limit < 1 {
            return Err(Error::InvalidInput(
                "page and limit must be at least 1".to_string(),
            ));
        }

        Ok(PageRequest {
            skip: (page - 1) * limit,
            limit,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub skip: u64,
    pub limit: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Pagination {
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    #[serde(rename = "totalPages")]
    pub total_pages: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: u64, query: &PageQuery) -> Self {
        let limit = query.limit();
        let total_pages = if total == 0 { 0 } else { (total + limit - 1) / limit };

        Self {
            data,
            pagination: Pagination {
                total,
                page: query.page(),
                limit,
                total_pages,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::error::Error;

    use super::{PageQuery, Paginated};

    #[test]
    fn test_page_request() {
        let query = PageQuery {
            page: Some(3),
            limit: Some(10),
        };
        let request = query.request().unwrap();

        assert_eq!(request.skip, 20);
        assert_eq!(request.limit, 10);

        let request = PageQuery::default().request().unwrap();
        assert_eq!(request.skip, 0);
        assert_eq!(request.limit, 10);
    }

    #[test]
    fn test_page_request_rejects_zero() {
        let error = PageQuery {
            page: Some(0),
            limit: Some(10),
        }
        .request()
        .unwrap_err();
        assert_matches!(error, Error::InvalidInput(..));

        let error = PageQuery {
            page: Some(1),
            limit: Some(0),
        }
        .request()
        .unwrap_err();
        assert_matches!(error, Error::InvalidInput(..));
    }

    #[test]
    fn test_total_pages() {
        let query = PageQuery {
            page: Some(3),
            limit: Some(10),
        };
        let paginated = Paginated::new(vec![1, 2, 3, 4, 5], 25, &query);

        assert_eq!(paginated.pagination.total_pages, 3);
        assert_eq!(paginated.pagination.total, 25);
        assert_eq!(paginated.pagination.page, 3);

        let empty: Paginated<i32> = Paginated::new(vec![], 0, &PageQuery::default());
        assert_eq!(empty.pagination.total_pages, 0);
    }
}
