use async_trait::async_trait;
use mongodb::bson::{Document, doc};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::{StoreError, USER_REVIEW_COLLECTION, USER_REVIEW_DATABASE, UserReviewStore};
use crate::model::{ReviewEntry, UserReviewDocument};

const DUPLICATE_KEY: i32 = 11000;

/// Store client backed by the `user-review` collection of a MongoDB
/// deployment.
///
/// Clones share one driver client, created on first use together with the
/// unique `user_id` index.
#[derive(Clone)]
pub struct MongoReviewStore {
    url: String,
    collection: Arc<OnceCell<Collection<UserReviewDocument>>>,
}

impl MongoReviewStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            collection: Arc::new(OnceCell::new()),
        }
    }

    async fn collection(&self) -> Result<&Collection<UserReviewDocument>, StoreError> {
        self.collection
            .get_or_try_init(|| async {
                let client = Client::with_uri_str(&self.url).await?;
                let collection = client
                    .database(USER_REVIEW_DATABASE)
                    .collection::<UserReviewDocument>(USER_REVIEW_COLLECTION);
                collection
                    .create_index(
                        IndexModel::builder()
                            .keys(doc! { "user_id": 1 })
                            .options(IndexOptions::builder().unique(true).build())
                            .build(),
                    )
                    .await?;
                tracing::info!(
                    database = USER_REVIEW_DATABASE,
                    collection = USER_REVIEW_COLLECTION,
                    "Connected to mongodb"
                );
                Ok::<_, mongodb::error::Error>(collection)
            })
            .await
            .map_err(unavailable)
    }
}

#[async_trait]
impl UserReviewStore for MongoReviewStore {
    async fn find_user(&self, user_id: i64) -> Result<Option<UserReviewDocument>, StoreError> {
        self.collection()
            .await?
            .find_one(user_filter(user_id))
            .await
            .map_err(unavailable)
    }

    async fn insert_user(&self, document: UserReviewDocument) -> Result<(), StoreError> {
        let user_id = document.user_id;
        match self.collection().await?.insert_one(document).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::DuplicateKey(user_id)),
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn push_review_front(
        &self,
        user_id: i64,
        entry: ReviewEntry,
    ) -> Result<bool, StoreError> {
        let updated = self
            .collection()
            .await?
            .find_one_and_update(user_filter(user_id), push_front_update(entry))
            .await
            .map_err(unavailable)?;
        Ok(updated.is_some())
    }

    async fn find_reviews_slice(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Option<Vec<ReviewEntry>>, StoreError> {
        let document = self
            .collection()
            .await?
            .find_one(user_filter(user_id))
            .projection(slice_projection(limit))
            .await
            .map_err(unavailable)?;
        Ok(document.map(|document| document.reviews))
    }
}

fn user_filter(user_id: i64) -> Document {
    doc! { "user_id": user_id }
}

/// `$push` of one entry at position 0 of `reviews`.
fn push_front_update(entry: ReviewEntry) -> Document {
    doc! {
        "$push": {
            "reviews": {
                "$each": [{ "review_id": entry.review_id, "timestamp": entry.timestamp }],
                "$position": 0,
            }
        }
    }
}

/// Keeps the first `limit` entries of `reviews`; other fields are returned
/// unchanged.
fn slice_projection(limit: usize) -> Document {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    doc! { "reviews": { "$slice": limit } }
}

fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    matches!(
        e.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

fn unavailable(e: mongodb::error::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}
