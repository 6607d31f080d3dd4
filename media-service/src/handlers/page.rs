//! Movie page aggregation.
//!
//! A page is assembled from four downstream services. Movie info and the
//! review range are requested immediately; cast info and plot can only be
//! requested once movie info has arrived, since their ids come from it.
//!
//! Every branch runs as its own task and releases its pooled client when it
//! ends. When a join fails the call returns right away, and branches that
//! were not joined yet keep running to completion in the background.

use tokio::task::JoinHandle;

use super::{checkout, join};
use crate::clients::{
    CastInfoService, MovieInfoService, MovieReviewService, PlotService, ServicePool,
};
use crate::errors::Result;
use crate::latency::ExtraLatency;
use crate::model::{CastInfo, MovieInfo, Page, Review};
use crate::trace::{Carrier, Tracer};

pub struct PageHandler {
    movie_info: ServicePool<dyn MovieInfoService>,
    movie_review: ServicePool<dyn MovieReviewService>,
    cast_info: ServicePool<dyn CastInfoService>,
    plot: ServicePool<dyn PlotService>,
    tracer: Tracer,
    latency: ExtraLatency,
}

impl PageHandler {
    pub fn new(
        movie_info: ServicePool<dyn MovieInfoService>,
        movie_review: ServicePool<dyn MovieReviewService>,
        cast_info: ServicePool<dyn CastInfoService>,
        plot: ServicePool<dyn PlotService>,
        tracer: Tracer,
        latency: ExtraLatency,
    ) -> Self {
        Self {
            movie_info,
            movie_review,
            cast_info,
            plot,
            tracer,
            latency,
        }
    }

    /// Builds the page for `movie_id` with reviews in `[review_start, review_stop)`.
    ///
    /// Fails with the first error found when joining, in the order movie
    /// info, reviews, plot, cast info. No partial page is ever returned.
    pub async fn read_page(
        &self,
        req_id: i64,
        movie_id: &str,
        review_start: i32,
        review_stop: i32,
        carrier: &Carrier,
    ) -> Result<Page> {
        self.latency.apply(req_id).await;

        let parent = self.tracer.extract(carrier);
        let span = self.tracer.start_span("ReadPage", parent.as_ref());

        let movie_info = self.spawn_movie_info(req_id, movie_id, self.tracer.inject(&span));
        let reviews = self.spawn_movie_reviews(
            req_id,
            movie_id,
            review_start,
            review_stop,
            self.tracer.inject(&span),
        );

        let movie_info = join(movie_info).await?;

        let cast_infos =
            self.spawn_cast_info(req_id, movie_info.cast_info_ids(), self.tracer.inject(&span));
        let plot = self.spawn_plot(req_id, movie_info.plot_id, self.tracer.inject(&span));

        let reviews = join(reviews).await?;
        let plot = join(plot).await?;
        let cast_infos = join(cast_infos).await?;

        span.finish();
        Ok(Page {
            movie_info,
            reviews,
            cast_infos,
            plot,
        })
    }

    fn spawn_movie_info(
        &self,
        req_id: i64,
        movie_id: &str,
        carrier: Carrier,
    ) -> JoinHandle<Result<MovieInfo>> {
        let pool = self.movie_info.clone();
        let movie_id = movie_id.to_string();
        tokio::spawn(async move {
            let client = checkout(&pool)?;
            client
                .read_movie_info(req_id, &movie_id, carrier)
                .await
                .inspect_err(|e| {
                    tracing::error!(req_id, movie_id = %movie_id, error = %e, "Failed to read movie info");
                })
        })
    }

    fn spawn_movie_reviews(
        &self,
        req_id: i64,
        movie_id: &str,
        start: i32,
        stop: i32,
        carrier: Carrier,
    ) -> JoinHandle<Result<Vec<Review>>> {
        let pool = self.movie_review.clone();
        let movie_id = movie_id.to_string();
        tokio::spawn(async move {
            let client = checkout(&pool)?;
            client
                .read_movie_reviews(req_id, &movie_id, start, stop, carrier)
                .await
                .inspect_err(|e| {
                    tracing::error!(req_id, movie_id = %movie_id, error = %e, "Failed to read movie reviews");
                })
        })
    }

    fn spawn_cast_info(
        &self,
        req_id: i64,
        cast_ids: Vec<i64>,
        carrier: Carrier,
    ) -> JoinHandle<Result<Vec<CastInfo>>> {
        let pool = self.cast_info.clone();
        tokio::spawn(async move {
            let client = checkout(&pool)?;
            client
                .read_cast_info(req_id, &cast_ids, carrier)
                .await
                .inspect_err(|e| {
                    tracing::error!(req_id, error = %e, "Failed to read cast info");
                })
        })
    }

    fn spawn_plot(&self, req_id: i64, plot_id: i64, carrier: Carrier) -> JoinHandle<Result<String>> {
        let pool = self.plot.clone();
        tokio::spawn(async move {
            let client = checkout(&pool)?;
            client
                .read_plot(req_id, plot_id, carrier)
                .await
                .inspect_err(|e| {
                    tracing::error!(req_id, plot_id, error = %e, "Failed to read plot");
                })
        })
    }
}
