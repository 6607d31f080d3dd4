//! Rating uploads.
//!
//! A rating is forwarded to the compose-review service and, concurrently,
//! added to two per-movie counters in the cache. A separate aggregation job
//! reads and resets the counters; this handler only increments them.

use super::{checkout, join};
use crate::cache::{CacheClient, Pipeline};
use crate::clients::{ComposeReviewService, ServicePool};
use crate::errors::{Result, ServiceError};
use crate::latency::ExtraLatency;
use crate::trace::{Carrier, Tracer};

pub fn uncommitted_sum_key(movie_id: &str) -> String {
    format!("{movie_id}:uncommit_sum")
}

pub fn uncommitted_count_key(movie_id: &str) -> String {
    format!("{movie_id}:uncommit_num")
}

pub struct RatingHandler {
    compose_review: ServicePool<dyn ComposeReviewService>,
    cache: ServicePool<dyn CacheClient>,
    tracer: Tracer,
    latency: ExtraLatency,
}

impl RatingHandler {
    pub fn new(
        compose_review: ServicePool<dyn ComposeReviewService>,
        cache: ServicePool<dyn CacheClient>,
        tracer: Tracer,
        latency: ExtraLatency,
    ) -> Self {
        Self {
            compose_review,
            cache,
            tracer,
            latency,
        }
    }

    pub async fn upload_rating(
        &self,
        req_id: i64,
        movie_id: &str,
        rating: i32,
        carrier: &Carrier,
    ) -> Result<()> {
        self.latency.apply(req_id).await;

        let parent = self.tracer.extract(carrier);
        let span = self.tracer.start_span("UploadRating", parent.as_ref());

        let upload = {
            let pool = self.compose_review.clone();
            let carrier = self.tracer.inject(&span);
            tokio::spawn(async move {
                let client = checkout(&pool)?;
                client.upload_rating(req_id, rating, carrier).await
            })
        };

        let accumulate = {
            let pool = self.cache.clone();
            let cache_span = span.child("RedisInsert");
            let movie_id = movie_id.to_string();
            tokio::spawn(async move {
                let client = checkout(&pool)?;
                Pipeline::new()
                    .incrby(uncommitted_sum_key(&movie_id), i64::from(rating))
                    .incr(uncommitted_count_key(&movie_id))
                    .commit(&**client)
                    .await?;
                cache_span.finish();
                Ok::<_, ServiceError>(())
            })
        };

        join(upload).await.inspect_err(|e| {
            tracing::error!(req_id, movie_id, error = %e, "Failed to upload rating to compose-review-service");
        })?;
        join(accumulate).await.inspect_err(|e| {
            tracing::error!(req_id, movie_id, error = %e, "Failed to update rating counters");
        })?;

        span.finish();
        Ok(())
    }
}
