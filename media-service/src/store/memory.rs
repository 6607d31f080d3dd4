use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::{StoreError, UserReviewStore};
use crate::model::{ReviewEntry, UserReviewDocument};

/// Process-local store. Clones share the same collection.
#[derive(Clone, Default)]
pub struct MemoryReviewStore {
    documents: Arc<RwLock<HashMap<i64, UserReviewDocument>>>,
}

impl MemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, user_id: i64) -> Option<UserReviewDocument> {
        self.documents.read().get(&user_id).cloned()
    }
}

#[async_trait]
impl UserReviewStore for MemoryReviewStore {
    async fn find_user(&self, user_id: i64) -> Result<Option<UserReviewDocument>, StoreError> {
        Ok(self.document(user_id))
    }

    async fn insert_user(&self, document: UserReviewDocument) -> Result<(), StoreError> {
        let mut documents = self.documents.write();
        if documents.contains_key(&document.user_id) {
            return Err(StoreError::DuplicateKey(document.user_id));
        }
        documents.insert(document.user_id, document);
        Ok(())
    }

    async fn push_review_front(
        &self,
        user_id: i64,
        entry: ReviewEntry,
    ) -> Result<bool, StoreError> {
        match self.documents.write().get_mut(&user_id) {
            Some(document) => {
                document.reviews.insert(0, entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_reviews_slice(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Option<Vec<ReviewEntry>>, StoreError> {
        Ok(self.documents.read().get(&user_id).map(|document| {
            document
                .reviews
                .iter()
                .take(limit)
                .copied()
                .collect()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorCode, ServiceError};

    fn entry(review_id: i64, timestamp: i64) -> ReviewEntry {
        ReviewEntry {
            review_id,
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_push_front_keeps_insertion_order() {
        let store = MemoryReviewStore::new();
        assert!(!store.push_review_front(1, entry(10, 100)).await.unwrap());

        store
            .insert_user(UserReviewDocument {
                user_id: 1,
                reviews: vec![entry(10, 100)],
            })
            .await
            .unwrap();
        // An older timestamp still lands at the front.
        assert!(store.push_review_front(1, entry(11, 50)).await.unwrap());
        assert!(store.push_review_front(1, entry(12, 300)).await.unwrap());

        let reviews = store.find_user(1).await.unwrap().unwrap().reviews;
        assert_eq!(reviews, vec![entry(12, 300), entry(11, 50), entry(10, 100)]);

        let slice = store.find_reviews_slice(1, 2).await.unwrap().unwrap();
        assert_eq!(slice, vec![entry(12, 300), entry(11, 50)]);
        assert_eq!(store.find_reviews_slice(2, 2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_insert_is_unique_per_user() {
        let store = MemoryReviewStore::new();
        let document = UserReviewDocument {
            user_id: 3,
            reviews: vec![entry(1, 1)],
        };
        store.insert_user(document.clone()).await.unwrap();
        let err = store.insert_user(document).await.unwrap_err();
        assert_eq!(err, StoreError::DuplicateKey(3));
        assert_eq!(ServiceError::from(err).error_code, ErrorCode::StoreError);
    }
}
