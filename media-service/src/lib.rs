pub mod api;
pub mod cache;
pub mod clients;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod latency;
pub mod metrics_defs;
pub mod model;
pub mod pool;
pub mod store;
pub mod trace;

#[cfg(test)]
mod testutils;

use crate::api::{MediaApi, RoleHandler};
use crate::cache::{CacheClient, CacheError, RedisCache};
use crate::clients::{
    CastInfoService, ComposeReviewService, HttpServiceClient, MovieInfoService,
    MovieReviewService, PlotService, ReviewStorageService, ServicePool,
};
use crate::config::{Backend, Config, Role, Upstream, ValidationError};
use crate::errors::MediaServiceError;
use crate::handlers::{PageHandler, RatingHandler, TextHandler, UserReviewHandler};
use crate::latency::ExtraLatency;
use crate::pool::{ClientPool, PoolStatus};
use crate::store::{MongoReviewStore, UserReviewStore};
use crate::trace::Tracer;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;

/// Serves `role` on the configured listener until an I/O error occurs.
pub async fn run(
    role: Role,
    config: Config,
    latency: ExtraLatency,
    tracer: Tracer,
) -> Result<(), MediaServiceError> {
    config.validate(role)?;

    let (handler, pools) = build_handler(role, &config, latency, tracer)?;
    tracing::info!(
        %role,
        host = %config.listener.host,
        port = config.listener.port,
        ?latency,
        "Starting media service"
    );

    let api_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        MediaApi::new(handler),
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::new(move || ready(&pools)),
    );

    tokio::try_join!(api_task, admin_task)?;
    Ok(())
}

/// Ready while every dependency pool can still hand out a client.
fn ready(pools: &[Arc<dyn PoolStatus>]) -> bool {
    match pools.iter().find(|pool| pool.is_saturated()) {
        Some(pool) => {
            tracing::debug!(pool = pool.name(), "Not ready, pool saturated");
            false
        }
        None => true,
    }
}

type Pools = Vec<Arc<dyn PoolStatus>>;

fn build_handler(
    role: Role,
    config: &Config,
    latency: ExtraLatency,
    tracer: Tracer,
) -> Result<(RoleHandler, Pools), MediaServiceError> {
    let upstream = |upstream: Upstream| -> Result<HttpServiceClient, MediaServiceError> {
        let upstream_config = config
            .upstreams
            .get(&upstream)
            .ok_or(ValidationError::MissingUpstream { role, upstream })?;
        Ok(HttpServiceClient::new(upstream, upstream_config)?)
    };
    let backend_url = |backend: Backend| -> Result<String, ValidationError> {
        config
            .backend(backend)
            .url
            .as_ref()
            .map(|url| url.to_string())
            .ok_or(ValidationError::MissingBackend { role, backend })
    };
    let pool_size = |upstream: Upstream| {
        config
            .upstreams
            .get(&upstream)
            .map(|upstream_config| upstream_config.pool_size)
            .unwrap_or_default()
    };

    let mut pools: Pools = Vec::new();
    let handler = match role {
        Role::PageService => {
            let movie_info = http_pool(
                upstream(Upstream::MovieInfo)?,
                pool_size(Upstream::MovieInfo),
                |client| Box::new(client) as Box<dyn MovieInfoService>,
            );
            let movie_review = http_pool(
                upstream(Upstream::MovieReview)?,
                pool_size(Upstream::MovieReview),
                |client| Box::new(client) as Box<dyn MovieReviewService>,
            );
            let cast_info = http_pool(
                upstream(Upstream::CastInfo)?,
                pool_size(Upstream::CastInfo),
                |client| Box::new(client) as Box<dyn CastInfoService>,
            );
            let plot = http_pool(
                upstream(Upstream::Plot)?,
                pool_size(Upstream::Plot),
                |client| Box::new(client) as Box<dyn PlotService>,
            );
            pools.push(movie_info.clone());
            pools.push(movie_review.clone());
            pools.push(cast_info.clone());
            pools.push(plot.clone());
            RoleHandler::Page(PageHandler::new(
                movie_info,
                movie_review,
                cast_info,
                plot,
                tracer,
                latency,
            ))
        }
        Role::UserReviewService => {
            let cache = cache_pool(
                "user-review-redis",
                &backend_url(Backend::Cache)?,
                config.cache.pool_size,
            )?;
            let store = store_pool(
                "user-review-mongodb",
                &backend_url(Backend::Store)?,
                config.store.pool_size,
            );
            let review_storage = http_pool(
                upstream(Upstream::ReviewStorage)?,
                pool_size(Upstream::ReviewStorage),
                |client| Box::new(client) as Box<dyn ReviewStorageService>,
            );
            pools.push(cache.clone());
            pools.push(store.clone());
            pools.push(review_storage.clone());
            RoleHandler::UserReview(UserReviewHandler::new(
                cache,
                store,
                review_storage,
                tracer,
                latency,
            ))
        }
        Role::RatingService => {
            let compose_review = http_pool(
                upstream(Upstream::ComposeReview)?,
                pool_size(Upstream::ComposeReview),
                |client| Box::new(client) as Box<dyn ComposeReviewService>,
            );
            let cache = cache_pool(
                "rating-redis",
                &backend_url(Backend::Cache)?,
                config.cache.pool_size,
            )?;
            pools.push(compose_review.clone());
            pools.push(cache.clone());
            RoleHandler::Rating(RatingHandler::new(compose_review, cache, tracer, latency))
        }
        Role::TextService => {
            let compose_review = http_pool(
                upstream(Upstream::ComposeReview)?,
                pool_size(Upstream::ComposeReview),
                |client| Box::new(client) as Box<dyn ComposeReviewService>,
            );
            pools.push(compose_review.clone());
            RoleHandler::Text(TextHandler::new(compose_review, tracer, latency))
        }
    };

    Ok((handler, pools))
}

/// Pool of HTTP clients for one upstream. Clients share the underlying
/// hyper connection pool; the bound on checked-out clients is what limits
/// concurrent calls.
fn http_pool<S>(
    client: HttpServiceClient,
    capacity: usize,
    boxed: fn(HttpServiceClient) -> Box<S>,
) -> ServicePool<S>
where
    S: ?Sized + Send + 'static,
{
    ClientPool::new(client.service(), capacity, move || Some(boxed(client.clone())))
}

/// Pool of Redis clients sharing one multiplexed connection.
fn cache_pool(
    name: &str,
    url: &str,
    capacity: usize,
) -> Result<ServicePool<dyn CacheClient>, CacheError> {
    let cache = RedisCache::open(url)?;
    Ok(ClientPool::new(name, capacity, move || {
        Some(Box::new(cache.clone()) as Box<dyn CacheClient>)
    }))
}

fn store_pool(name: &str, url: &str, capacity: usize) -> ServicePool<dyn UserReviewStore> {
    let store = MongoReviewStore::new(url);
    ClientPool::new(name, capacity, move || {
        Some(Box::new(store.clone()) as Box<dyn UserReviewStore>)
    })
}
