use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Handler duration in seconds. Tagged with handler, status.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const POOL_EXHAUSTED: MetricDef = MetricDef {
    name: "pool.exhausted",
    metric_type: MetricType::Counter,
    description: "Acquire calls rejected because every pooled client was checked out. Tagged with pool.",
};

pub const POOL_CONNECT_FAILED: MetricDef = MetricDef {
    name: "pool.connect_failed",
    metric_type: MetricType::Counter,
    description: "Acquire calls that failed to connect a new pooled client. Tagged with pool.",
};

pub const USER_REVIEW_CACHE_LOOKUP: MetricDef = MetricDef {
    name: "user_review.cache.lookup",
    metric_type: MetricType::Counter,
    description: "User review range lookups. Tagged with result: hit, partial, miss.",
};

pub const USER_REVIEW_CACHE_REBUILD: MetricDef = MetricDef {
    name: "user_review.cache.rebuild",
    metric_type: MetricType::Counter,
    description: "User review cache rebuilds after a durable store fallback. Tagged with status.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    POOL_EXHAUSTED,
    POOL_CONNECT_FAILED,
    USER_REVIEW_CACHE_LOOKUP,
    USER_REVIEW_CACHE_REBUILD,
];
