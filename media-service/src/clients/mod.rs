//! Downstream services called by the handlers.
//!
//! Every call takes the request id, its domain arguments, and a carrier
//! injected for that call alone. Handlers only see these traits; pools hold
//! boxed trait objects so tests can substitute scripted services.

pub mod http;

use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::Result;
use crate::model::{CastInfo, MovieInfo, Review};
use crate::pool::ClientPool;
use crate::trace::Carrier;

pub use self::http::HttpServiceClient;

/// Pool of clients for one downstream service.
pub type ServicePool<S> = Arc<ClientPool<Box<S>>>;

#[async_trait]
pub trait MovieInfoService: Send + Sync {
    async fn read_movie_info(&self, req_id: i64, movie_id: &str, carrier: Carrier)
    -> Result<MovieInfo>;
}

#[async_trait]
pub trait MovieReviewService: Send + Sync {
    /// Reviews of a movie in the range `[start, stop)`, most recent first.
    async fn read_movie_reviews(
        &self,
        req_id: i64,
        movie_id: &str,
        start: i32,
        stop: i32,
        carrier: Carrier,
    ) -> Result<Vec<Review>>;
}

#[async_trait]
pub trait CastInfoService: Send + Sync {
    async fn read_cast_info(
        &self,
        req_id: i64,
        cast_ids: &[i64],
        carrier: Carrier,
    ) -> Result<Vec<CastInfo>>;
}

#[async_trait]
pub trait PlotService: Send + Sync {
    async fn read_plot(&self, req_id: i64, plot_id: i64, carrier: Carrier) -> Result<String>;
}

#[async_trait]
pub trait ReviewStorageService: Send + Sync {
    /// Full review bodies for `review_ids`.
    async fn read_reviews(
        &self,
        req_id: i64,
        review_ids: &[i64],
        carrier: Carrier,
    ) -> Result<Vec<Review>>;
}

#[async_trait]
pub trait ComposeReviewService: Send + Sync {
    async fn upload_rating(&self, req_id: i64, rating: i32, carrier: Carrier) -> Result<()>;

    async fn upload_text(&self, req_id: i64, text: &str, carrier: Carrier) -> Result<()>;
}
