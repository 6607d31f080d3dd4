//! Per-user review index kept in two tiers.
//!
//! The document store holds every entry a user has written, newest insertion
//! first. The cache holds a sorted set per user, scored by timestamp, that
//! may be missing, partial or complete. Writes go to both tiers; reads are
//! served from the cache and fall back to the store for whatever the cache
//! could not provide. After a fallback the user's cache entry is rebuilt from
//! the store slice that was read, so the next read of the same window is a
//! cache hit.

use std::collections::HashSet;

use super::{checkout, join};
use crate::cache::{CacheClient, CacheError, Pipeline};
use crate::clients::{ReviewStorageService, ServicePool};
use crate::errors::{ErrorCode, Result, ServiceError};
use crate::latency::ExtraLatency;
use crate::metrics_defs::{USER_REVIEW_CACHE_LOOKUP, USER_REVIEW_CACHE_REBUILD};
use crate::model::{Review, ReviewEntry, UserReviewDocument};
use crate::store::UserReviewStore;
use crate::trace::{Carrier, Span, Tracer};
use shared::counter;

pub struct UserReviewHandler {
    cache: ServicePool<dyn CacheClient>,
    store: ServicePool<dyn UserReviewStore>,
    review_storage: ServicePool<dyn ReviewStorageService>,
    tracer: Tracer,
    latency: ExtraLatency,
}

impl UserReviewHandler {
    pub fn new(
        cache: ServicePool<dyn CacheClient>,
        store: ServicePool<dyn UserReviewStore>,
        review_storage: ServicePool<dyn ReviewStorageService>,
        tracer: Tracer,
        latency: ExtraLatency,
    ) -> Self {
        Self {
            cache,
            store,
            review_storage,
            tracer,
            latency,
        }
    }

    /// Records that `user_id` wrote `review_id` at `timestamp`.
    ///
    /// The store write happens first, then the cache write. The two are not
    /// transactional: a failure between them leaves the store ahead of the
    /// cache, which the read path repairs.
    pub async fn upload_user_review(
        &self,
        req_id: i64,
        user_id: i64,
        review_id: i64,
        timestamp: i64,
        carrier: &Carrier,
    ) -> Result<()> {
        self.latency.apply(req_id).await;

        let parent = self.tracer.extract(carrier);
        let span = self.tracer.start_span("UploadUserReview", parent.as_ref());
        let entry = ReviewEntry {
            review_id,
            timestamp,
        };

        self.store_entry(&span, user_id, entry)
            .await
            .inspect_err(|e| {
                tracing::error!(req_id, user_id, error = %e, "Failed to store user review");
            })?;

        let cache = checkout(&self.cache)?;
        let cache_span = span.child("RedisUpdate");
        Pipeline::new()
            .zadd(cache_key(user_id), vec![(timestamp, review_id.to_string())])
            .commit(&**cache)
            .await
            .inspect_err(|e| {
                tracing::error!(req_id, user_id, error = %e, "Failed to update user review cache");
            })?;
        drop(cache);
        cache_span.finish();

        span.finish();
        Ok(())
    }

    async fn store_entry(&self, span: &Span, user_id: i64, entry: ReviewEntry) -> Result<()> {
        let store = checkout(&self.store)?;

        let find_span = span.child("MongoFindUser");
        let existing = store.find_user(user_id).await?;
        find_span.finish();

        if existing.is_none() {
            let insert_span = span.child("MongoInsert");
            store
                .insert_user(UserReviewDocument {
                    user_id,
                    reviews: vec![entry],
                })
                .await?;
            insert_span.finish();
            return Ok(());
        }

        let update_span = span.child("MongoUpdate");
        let matched = store.push_review_front(user_id, entry).await?;
        update_span.finish();
        if !matched {
            return Err(ServiceError::new(
                ErrorCode::StoreError,
                format!("Failed to update user-review for user {user_id}"),
            ));
        }
        Ok(())
    }

    /// Reviews of `user_id` in positions `[start, stop)` of the most recent
    /// first order, hydrated by the review storage service.
    ///
    /// An invalid range returns nothing without touching any dependency.
    pub async fn read_user_reviews(
        &self,
        req_id: i64,
        user_id: i64,
        start: i32,
        stop: i32,
        carrier: &Carrier,
    ) -> Result<Vec<Review>> {
        self.latency.apply(req_id).await;

        let parent = self.tracer.extract(carrier);
        let span = self.tracer.start_span("ReadUserReviews", parent.as_ref());

        if stop <= start || start < 0 {
            return Ok(Vec::new());
        }

        let mut review_ids = self
            .read_cached_ids(&span, user_id, start, stop)
            .await
            .inspect_err(|e| {
                tracing::error!(req_id, user_id, error = %e, "Failed to read review ids from cache");
            })?;

        let requested = (stop - start) as usize;
        let cached = review_ids.len();
        let lookup = match cached {
            0 => "miss",
            n if n < requested => "partial",
            _ => "hit",
        };
        counter!(USER_REVIEW_CACHE_LOOKUP, "result" => lookup).increment(1);

        let mut rebuild_entries = Vec::new();
        if cached < requested {
            let store = checkout(&self.store)?;
            let find_span = span.child("MongoFindUserReviews");
            let slice = store
                .find_reviews_slice(user_id, stop as usize)
                .await
                .inspect_err(|e| {
                    tracing::error!(req_id, user_id, error = %e, "Failed to read user reviews from store");
                })?;
            find_span.finish();
            drop(store);

            if let Some(slice) = slice {
                let fill_from = start as usize + cached;
                let mut seen: HashSet<i64> = review_ids.iter().copied().collect();
                for (idx, entry) in slice.iter().enumerate() {
                    if idx >= fill_from && seen.insert(entry.review_id) {
                        review_ids.push(entry.review_id);
                    }
                }
                rebuild_entries = slice;
            }
        }

        let rebuild = (!rebuild_entries.is_empty()).then(|| {
            let cache = self.cache.clone();
            let rebuild_span = span.child("RedisUpdate");
            tokio::spawn(async move {
                let client = checkout(&cache)?;
                let result = rebuild_cache(&**client, user_id, rebuild_entries).await;
                drop(client);
                rebuild_span.finish();
                result
            })
        });

        let content = if review_ids.is_empty() {
            Ok(Vec::new())
        } else {
            self.hydrate(req_id, &review_ids, self.tracer.inject(&span))
                .await
        };

        let reviews = match content {
            Ok(reviews) => reviews,
            Err(e) => {
                tracing::error!(req_id, user_id, error = %e, "Failed to read reviews from review-storage-service");
                if let Some(rebuild) = rebuild
                    && let Err(rebuild_error) = join(rebuild).await
                {
                    tracing::error!(req_id, user_id, error = %rebuild_error, "Failed to rebuild user review cache");
                }
                return Err(e);
            }
        };

        if let Some(rebuild) = rebuild {
            let outcome = join(rebuild).await;
            let status = if outcome.is_ok() { "ok" } else { "error" };
            counter!(USER_REVIEW_CACHE_REBUILD, "status" => status).increment(1);
            outcome.inspect_err(|e| {
                tracing::error!(req_id, user_id, error = %e, "Failed to rebuild user review cache");
            })?;
        }

        span.finish();
        Ok(reviews)
    }

    async fn hydrate(&self, req_id: i64, review_ids: &[i64], carrier: Carrier) -> Result<Vec<Review>> {
        let client = checkout(&self.review_storage)?;
        client.read_reviews(req_id, review_ids, carrier).await
    }

    async fn read_cached_ids(
        &self,
        span: &Span,
        user_id: i64,
        start: i32,
        stop: i32,
    ) -> Result<Vec<i64>> {
        let cache = checkout(&self.cache)?;
        let find_span = span.child("RedisFind");
        let mut replies = Pipeline::new()
            .zrevrange(cache_key(user_id), i64::from(start), i64::from(stop) - 1)
            .commit(&**cache)
            .await?;
        drop(cache);
        find_span.finish();

        let members = replies
            .pop()
            .ok_or(CacheError::UnexpectedReply("ZREVRANGE"))?
            .into_members()?;
        members
            .iter()
            .map(|member| {
                member.parse::<i64>().map_err(|_| {
                    ServiceError::new(
                        ErrorCode::CacheError,
                        format!("Invalid review id in cache: {member}"),
                    )
                })
            })
            .collect()
    }
}

fn cache_key(user_id: i64) -> String {
    user_id.to_string()
}

/// Replaces the user's cached set with `entries`.
async fn rebuild_cache(
    cache: &dyn CacheClient,
    user_id: i64,
    entries: Vec<ReviewEntry>,
) -> Result<()> {
    let members = entries
        .iter()
        .map(|entry| (entry.timestamp, entry.review_id.to_string()))
        .collect();
    Pipeline::new()
        .del(cache_key(user_id))
        .zadd(cache_key(user_id), members)
        .commit(cache)
        .await?;
    Ok(())
}
