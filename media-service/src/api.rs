//! Inbound JSON-over-HTTP surface.
//!
//! Every call is a `POST` whose body is a JSON object with the call's
//! arguments, `req_id`, and an optional `carrier`. Each process serves only
//! the routes of its role; anything else is a 404.

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use shared::http::{ResponseBody, json_response, make_boxed_error_response};
use shared::{gauge, histogram};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use crate::errors::{ErrorCode, Result, ServiceError};
use crate::handlers::{PageHandler, RatingHandler, TextHandler, UserReviewHandler};
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use crate::trace::Carrier;

pub const PAGE_READ: &str = "/page/read";
pub const RATING_UPLOAD: &str = "/rating/upload";
pub const TEXT_UPLOAD: &str = "/text/upload";
pub const USER_REVIEW_UPLOAD: &str = "/user-review/upload";
pub const USER_REVIEW_READ: &str = "/user-review/read";

/// The handler served by one process.
pub enum RoleHandler {
    Page(PageHandler),
    UserReview(UserReviewHandler),
    Rating(RatingHandler),
    Text(TextHandler),
}

#[derive(Deserialize)]
struct ReadPageRequest {
    req_id: i64,
    movie_id: String,
    review_start: i32,
    review_stop: i32,
    #[serde(default)]
    carrier: Carrier,
}

#[derive(Deserialize)]
struct UploadRatingRequest {
    req_id: i64,
    movie_id: String,
    rating: i32,
    #[serde(default)]
    carrier: Carrier,
}

#[derive(Deserialize)]
struct UploadTextRequest {
    req_id: i64,
    text: String,
    #[serde(default)]
    carrier: Carrier,
}

#[derive(Deserialize)]
struct UploadUserReviewRequest {
    req_id: i64,
    user_id: i64,
    review_id: i64,
    timestamp: i64,
    #[serde(default)]
    carrier: Carrier,
}

#[derive(Deserialize)]
struct ReadUserReviewsRequest {
    req_id: i64,
    user_id: i64,
    start: i32,
    stop: i32,
    #[serde(default)]
    carrier: Carrier,
}

pub struct MediaApi {
    handler: Arc<RoleHandler>,
}

impl MediaApi {
    pub fn new(handler: RoleHandler) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }
}

impl Service<Request<Incoming>> for MediaApi {
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let handler = self.handler.clone();

        Box::pin(async move {
            if req.method() != Method::POST {
                return Ok(make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED));
            }
            let path = req.uri().path().to_owned();
            let response = match req.into_body().collect().await {
                Ok(collected) => dispatch(&handler, &path, &collected.to_bytes()).await,
                Err(e) => {
                    tracing::debug!(error = %e, "Failed to read request body");
                    error_response(&ServiceError::new(
                        ErrorCode::InvalidRequest,
                        format!("Failed to read request body: {e}"),
                    ))
                }
            };
            Ok(response)
        })
    }
}

/// Runs the call for `path` and renders its outcome.
pub async fn dispatch(handler: &RoleHandler, path: &str, body: &[u8]) -> Response<ResponseBody> {
    let started = Instant::now();
    let inflight = InflightGuard::new();

    let response = match route(handler, path, body).await {
        Some(Ok(response)) => response,
        Some(Err(e)) => error_response(&e),
        None => make_boxed_error_response(StatusCode::NOT_FOUND),
    };

    drop(inflight);
    let route_label = match response.status() {
        StatusCode::NOT_FOUND => "unknown".to_string(),
        _ => path.to_string(),
    };
    histogram!(
        REQUEST_DURATION,
        "handler" => route_label,
        "status" => response.status().as_str().to_string(),
    )
    .record(started.elapsed().as_secs_f64());

    response
}

/// Counts one request in `requests.inflight` until dropped.
struct InflightGuard(metrics::Gauge);

impl InflightGuard {
    fn new() -> Self {
        let gauge = gauge!(REQUESTS_INFLIGHT);
        gauge.increment(1.0);
        Self(gauge)
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.decrement(1.0);
    }
}

async fn route(
    handler: &RoleHandler,
    path: &str,
    body: &[u8],
) -> Option<Result<Response<ResponseBody>>> {
    let response = match (handler, path) {
        (RoleHandler::Page(page), PAGE_READ) => read_page(page, body).await,
        (RoleHandler::Rating(rating), RATING_UPLOAD) => upload_rating(rating, body).await,
        (RoleHandler::Text(text), TEXT_UPLOAD) => upload_text(text, body).await,
        (RoleHandler::UserReview(user_review), USER_REVIEW_UPLOAD) => {
            upload_user_review(user_review, body).await
        }
        (RoleHandler::UserReview(user_review), USER_REVIEW_READ) => {
            read_user_reviews(user_review, body).await
        }
        _ => return None,
    };
    Some(response)
}

async fn read_page(handler: &PageHandler, body: &[u8]) -> Result<Response<ResponseBody>> {
    let request: ReadPageRequest = parse(body)?;
    let page = handler
        .read_page(
            request.req_id,
            &request.movie_id,
            request.review_start,
            request.review_stop,
            &request.carrier,
        )
        .await?;
    Ok(json_response(StatusCode::OK, &page))
}

async fn upload_rating(handler: &RatingHandler, body: &[u8]) -> Result<Response<ResponseBody>> {
    let request: UploadRatingRequest = parse(body)?;
    handler
        .upload_rating(
            request.req_id,
            &request.movie_id,
            request.rating,
            &request.carrier,
        )
        .await?;
    Ok(empty_response())
}

async fn upload_text(handler: &TextHandler, body: &[u8]) -> Result<Response<ResponseBody>> {
    let request: UploadTextRequest = parse(body)?;
    handler
        .upload_text(request.req_id, &request.text, &request.carrier)
        .await?;
    Ok(empty_response())
}

async fn upload_user_review(
    handler: &UserReviewHandler,
    body: &[u8],
) -> Result<Response<ResponseBody>> {
    let request: UploadUserReviewRequest = parse(body)?;
    handler
        .upload_user_review(
            request.req_id,
            request.user_id,
            request.review_id,
            request.timestamp,
            &request.carrier,
        )
        .await?;
    Ok(empty_response())
}

async fn read_user_reviews(
    handler: &UserReviewHandler,
    body: &[u8],
) -> Result<Response<ResponseBody>> {
    let request: ReadUserReviewsRequest = parse(body)?;
    let reviews = handler
        .read_user_reviews(
            request.req_id,
            request.user_id,
            request.start,
            request.stop,
            &request.carrier,
        )
        .await?;
    Ok(json_response(StatusCode::OK, &reviews))
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| {
        ServiceError::new(
            ErrorCode::InvalidRequest,
            format!("Failed to parse request body: {e}"),
        )
    })
}

fn empty_response() -> Response<ResponseBody> {
    json_response(StatusCode::OK, &serde_json::json!({}))
}

pub fn status_for(error_code: ErrorCode) -> StatusCode {
    match error_code {
        ErrorCode::ConnectionError => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorCode::HandlerError
        | ErrorCode::CacheError
        | ErrorCode::StoreError
        | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &ServiceError) -> Response<ResponseBody> {
    json_response(status_for(error.error_code), error)
}
