//! Durable document store dependency for the `user-review` collection.
//!
//! The store holds one document per user with every review entry the user
//! has written, newest insertion first. It is the source of truth for the
//! user review index; the cache only mirrors a recent window of it.

mod mongo_store;

#[cfg(test)]
mod memory;

pub use self::mongo_store::MongoReviewStore;

#[cfg(test)]
pub use self::memory::MemoryReviewStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::errors::{ErrorCode, ServiceError};
use crate::model::{ReviewEntry, UserReviewDocument};

pub const USER_REVIEW_DATABASE: &str = "user-review";
pub const USER_REVIEW_COLLECTION: &str = "user-review";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("duplicate key: user_id {0}")]
    DuplicateKey(i64),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        ServiceError::new(ErrorCode::StoreError, e.to_string())
    }
}

/// A connection to the `user-review` collection.
#[async_trait]
pub trait UserReviewStore: Send + Sync {
    /// Finds the document for `user_id`.
    async fn find_user(&self, user_id: i64) -> Result<Option<UserReviewDocument>, StoreError>;

    /// Inserts a new document. `user_id` is unique.
    async fn insert_user(&self, document: UserReviewDocument) -> Result<(), StoreError>;

    /// Atomically pushes `entry` at position 0 of the user's review list.
    /// Returns `false` when no document matched.
    async fn push_review_front(&self, user_id: i64, entry: ReviewEntry)
    -> Result<bool, StoreError>;

    /// Finds the user's review list projected to its first `limit` entries.
    async fn find_reviews_slice(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Option<Vec<ReviewEntry>>, StoreError>;
}
