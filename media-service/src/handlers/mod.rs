pub mod page;
pub mod rating;
pub mod text;
pub mod user_review;

pub use page::PageHandler;
pub use rating::RatingHandler;
pub use text::TextHandler;
pub use user_review::UserReviewHandler;

use tokio::task::JoinHandle;

use crate::clients::ServicePool;
use crate::errors::{Result, ServiceError};
use crate::pool::PooledClient;

/// Checks a client out of `pool`, failing the call when none is available.
pub(crate) fn checkout<S>(pool: &ServicePool<S>) -> Result<PooledClient<Box<S>>>
where
    S: ?Sized + Send,
{
    pool.acquire().ok_or_else(|| {
        tracing::error!(pool = pool.name(), "Failed to pop a client from pool");
        ServiceError::connection(pool.name())
    })
}

/// Waits for a spawned branch. A branch that panicked fails the call.
pub(crate) async fn join<T>(branch: JoinHandle<Result<T>>) -> Result<T> {
    branch.await?
}
