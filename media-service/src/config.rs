use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Pool size cannot be 0: {0}")]
    EmptyPool(String),

    #[error("Timeout cannot be 0: {0}")]
    InvalidTimeout(String),

    #[error("Missing upstream {upstream} required by {role}")]
    MissingUpstream { role: Role, upstream: Upstream },

    #[error("Missing {backend} url required by {role}")]
    MissingBackend { role: Role, backend: Backend },
}

/// The handler a process serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    PageService,
    UserReviewService,
    RatingService,
    TextService,
}

impl Role {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::PageService => "page-service",
            Role::UserReviewService => "user-review-service",
            Role::RatingService => "rating-service",
            Role::TextService => "text-service",
        }
    }

    /// Downstream services this role calls.
    pub fn required_upstreams(&self) -> &'static [Upstream] {
        match self {
            Role::PageService => &[
                Upstream::MovieInfo,
                Upstream::MovieReview,
                Upstream::CastInfo,
                Upstream::Plot,
            ],
            Role::UserReviewService => &[Upstream::ReviewStorage],
            Role::RatingService | Role::TextService => &[Upstream::ComposeReview],
        }
    }

    /// Data stores this role writes to or reads from.
    pub fn required_backends(&self) -> &'static [Backend] {
        match self {
            Role::PageService | Role::TextService => &[],
            Role::UserReviewService => &[Backend::Cache, Backend::Store],
            Role::RatingService => &[Backend::Cache],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Downstream services, keyed by their name in the `upstreams` section.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Upstream {
    MovieInfo,
    MovieReview,
    CastInfo,
    Plot,
    ReviewStorage,
    ComposeReview,
}

impl Upstream {
    /// Service name used in logs, metric tags and connection errors.
    pub const fn service_name(&self) -> &'static str {
        match self {
            Upstream::MovieInfo => "movie-info-service",
            Upstream::MovieReview => "movie-review-service",
            Upstream::CastInfo => "cast-info-service",
            Upstream::Plot => "plot-service",
            Upstream::ReviewStorage => "review-storage-service",
            Upstream::ComposeReview => "compose-review-service",
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_name())
    }
}

/// Shared data stores behind the handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Redis, holding user review windows and rating counters
    Cache,
    /// MongoDB, holding the full user review index
    Store,
}

impl Backend {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Backend::Cache => "cache",
            Backend::Store => "store",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of one service process
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for inbound handler calls
    pub listener: Listener,
    /// Listener for the health and readiness endpoints
    pub admin_listener: Listener,
    /// Artificial delay before every handler call, e.g. "25ms".
    ///
    /// Falls back to the `EXTRA_LATENCY` environment variable when unset.
    #[serde(default)]
    pub extra_latency: Option<String>,
    #[serde(default)]
    pub upstreams: HashMap<Upstream, UpstreamConfig>,
    /// Connection pool for the fast cache
    #[serde(default)]
    pub cache: BackendConfig,
    /// Connection pool for the durable document store
    #[serde(default)]
    pub store: BackendConfig,
}

impl Config {
    /// Validates the configuration for the given role
    pub fn validate(&self, role: Role) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        for upstream in role.required_upstreams() {
            if !self.upstreams.contains_key(upstream) {
                return Err(ValidationError::MissingUpstream {
                    role,
                    upstream: *upstream,
                });
            }
        }

        for (upstream, config) in &self.upstreams {
            if config.pool_size == 0 {
                return Err(ValidationError::EmptyPool(upstream.to_string()));
            }
            if config.timeout_secs == 0 {
                return Err(ValidationError::InvalidTimeout(upstream.to_string()));
            }
        }

        for backend in role.required_backends() {
            if self.backend(*backend).url.is_none() {
                return Err(ValidationError::MissingBackend {
                    role,
                    backend: *backend,
                });
            }
        }

        for backend in [Backend::Cache, Backend::Store] {
            if self.backend(backend).pool_size == 0 {
                return Err(ValidationError::EmptyPool(backend.to_string()));
            }
        }

        Ok(())
    }

    pub fn backend(&self, backend: Backend) -> &BackendConfig {
        match backend {
            Backend::Cache => &self.cache,
            Backend::Store => &self.store,
        }
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

const DEFAULT_POOL_SIZE: usize = 128;
const DEFAULT_TIMEOUT_SECS: u64 = 10;

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Downstream service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    /// Base URL of the service
    ///
    /// Invalid URLs are rejected during config deserialization.
    pub url: Url,
    /// Maximum number of concurrent calls to this service
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Applies to the whole request/response cycle of one call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Connection settings for the cache or the document store
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// e.g. `redis://user-review-redis:6379` or `mongodb://user-review-mongodb:27017`
    ///
    /// Required by the roles that use this backend.
    #[serde(default)]
    pub url: Option<Url>,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}
