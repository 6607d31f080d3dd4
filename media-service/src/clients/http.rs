//! JSON-over-HTTP client for downstream services.
//!
//! Each call is a `POST` to a route named after the operation, with a JSON
//! object carrying `req_id`, the operation's arguments and the outbound
//! `carrier`. A 2xx response body is the result. Any other response whose
//! body is a [`ServiceError`] is returned as that error.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::{
    CastInfoService, ComposeReviewService, MovieInfoService, MovieReviewService, PlotService,
    ReviewStorageService,
};
use crate::config::{Upstream, UpstreamConfig};
use crate::errors::{ErrorCode, Result, ServiceError};
use crate::model::{CastInfo, MovieInfo, Review};
use crate::trace::Carrier;

pub const MOVIE_INFO_READ: &str = "/movie-info/read";
pub const MOVIE_REVIEW_READ: &str = "/movie-review/read";
pub const CAST_INFO_READ: &str = "/cast-info/read";
pub const PLOT_READ: &str = "/plot/read";
pub const REVIEW_STORAGE_READ: &str = "/review-storage/read";
pub const COMPOSE_REVIEW_UPLOAD_RATING: &str = "/compose-review/upload-rating";
pub const COMPOSE_REVIEW_UPLOAD_TEXT: &str = "/compose-review/upload-text";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(&'static str),

    #[error("Upstream request failed for {0}: {1}")]
    UpstreamRequestFailed(&'static str, reqwest::Error),

    #[error("{service} responded with {status}")]
    UnexpectedStatus {
        service: &'static str,
        status: StatusCode,
    },

    #[error("Failed to decode response from {0}: {1}")]
    Decode(&'static str, reqwest::Error),

    #[error("Failed to build HTTP client for {0}: {1}")]
    Build(&'static str, reqwest::Error),

    #[error(transparent)]
    Remote(ServiceError),
}

impl From<ClientError> for ServiceError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Remote(error) => error,
            ClientError::UpstreamTimeout(service)
            | ClientError::UpstreamRequestFailed(service, _) => ServiceError::connection(service),
            other => ServiceError::new(ErrorCode::HandlerError, other.to_string()),
        }
    }
}

/// Client for one downstream service. Cheap to clone; clones share the
/// connection pool of the underlying `reqwest::Client`.
#[derive(Clone, Debug)]
pub struct HttpServiceClient {
    service: &'static str,
    base_url: Url,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpServiceClient {
    /// Calls go straight to the configured URL; proxy settings from the
    /// environment are ignored.
    pub fn new(
        upstream: Upstream,
        config: &UpstreamConfig,
    ) -> std::result::Result<Self, ClientError> {
        let service = upstream.service_name();
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| ClientError::Build(service, e))?;
        Ok(Self {
            service,
            base_url: config.url.clone(),
            timeout: config.timeout(),
            client,
        })
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    /// Sends one call and decodes its result.
    ///
    /// The timeout applies to the whole cycle, including reading the
    /// response body.
    pub async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        payload: serde_json::Value,
    ) -> std::result::Result<T, ClientError> {
        let mut url = self.base_url.clone();
        url.set_path(path);

        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.map_err(|e| self.request_error(e))?;
            return Err(match serde_json::from_slice::<ServiceError>(&body) {
                Ok(error) => ClientError::Remote(error),
                Err(_) => ClientError::UnexpectedStatus {
                    service: self.service,
                    status,
                },
            });
        }

        response.json::<T>().await.map_err(|e| match e.is_decode() && !e.is_timeout() {
            true => ClientError::Decode(self.service, e),
            false => self.request_error(e),
        })
    }

    fn request_error(&self, e: reqwest::Error) -> ClientError {
        if e.is_timeout() {
            ClientError::UpstreamTimeout(self.service)
        } else {
            ClientError::UpstreamRequestFailed(self.service, e)
        }
    }
}

#[async_trait]
impl MovieInfoService for HttpServiceClient {
    async fn read_movie_info(
        &self,
        req_id: i64,
        movie_id: &str,
        carrier: Carrier,
    ) -> Result<MovieInfo> {
        let payload = json!({"req_id": req_id, "movie_id": movie_id, "carrier": carrier});
        Ok(self.call(MOVIE_INFO_READ, payload).await?)
    }
}

#[async_trait]
impl MovieReviewService for HttpServiceClient {
    async fn read_movie_reviews(
        &self,
        req_id: i64,
        movie_id: &str,
        start: i32,
        stop: i32,
        carrier: Carrier,
    ) -> Result<Vec<Review>> {
        let payload = json!({
            "req_id": req_id,
            "movie_id": movie_id,
            "start": start,
            "stop": stop,
            "carrier": carrier,
        });
        Ok(self.call(MOVIE_REVIEW_READ, payload).await?)
    }
}

#[async_trait]
impl CastInfoService for HttpServiceClient {
    async fn read_cast_info(
        &self,
        req_id: i64,
        cast_ids: &[i64],
        carrier: Carrier,
    ) -> Result<Vec<CastInfo>> {
        let payload = json!({"req_id": req_id, "cast_ids": cast_ids, "carrier": carrier});
        Ok(self.call(CAST_INFO_READ, payload).await?)
    }
}

#[async_trait]
impl PlotService for HttpServiceClient {
    async fn read_plot(&self, req_id: i64, plot_id: i64, carrier: Carrier) -> Result<String> {
        let payload = json!({"req_id": req_id, "plot_id": plot_id, "carrier": carrier});
        Ok(self.call(PLOT_READ, payload).await?)
    }
}

#[async_trait]
impl ReviewStorageService for HttpServiceClient {
    async fn read_reviews(
        &self,
        req_id: i64,
        review_ids: &[i64],
        carrier: Carrier,
    ) -> Result<Vec<Review>> {
        let payload = json!({"req_id": req_id, "review_ids": review_ids, "carrier": carrier});
        Ok(self.call(REVIEW_STORAGE_READ, payload).await?)
    }
}

#[async_trait]
impl ComposeReviewService for HttpServiceClient {
    async fn upload_rating(&self, req_id: i64, rating: i32, carrier: Carrier) -> Result<()> {
        let payload = json!({"req_id": req_id, "rating": rating, "carrier": carrier});
        self.call::<IgnoredAny>(COMPOSE_REVIEW_UPLOAD_RATING, payload)
            .await?;
        Ok(())
    }

    async fn upload_text(&self, req_id: i64, text: &str, carrier: Carrier) -> Result<()> {
        let payload = json!({"req_id": req_id, "text": text, "carrier": carrier});
        self.call::<IgnoredAny>(COMPOSE_REVIEW_UPLOAD_TEXT, payload)
            .await?;
        Ok(())
    }
}
