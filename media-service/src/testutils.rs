use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheClient, CacheCommand, CacheError, CacheReply, MemoryCache};
use crate::clients::{
    CastInfoService, ComposeReviewService, MovieInfoService, MovieReviewService, PlotService,
    ReviewStorageService, ServicePool,
};
use crate::errors::{ErrorCode, Result, ServiceError};
use crate::model::{CastInfo, MovieInfo, Review, ReviewEntry, UserReviewDocument};
use crate::pool::ClientPool;
use crate::store::{StoreError, UserReviewStore};
use crate::trace::{Carrier, RecordingReporter, Tracer};

pub fn recording_tracer() -> (Tracer, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::default());
    (Tracer::new(reporter.clone()), reporter)
}

pub fn review(review_id: i64) -> Review {
    Review {
        review_id,
        user_id: 1,
        req_id: review_id,
        text: format!("review {review_id}"),
        movie_id: "m1".to_string(),
        rating: 5,
        timestamp: review_id,
    }
}

/// Pool whose clients are made by `make`.
pub fn boxed_pool<S, F>(name: &str, capacity: usize, make: F) -> ServicePool<S>
where
    S: ?Sized + Send + 'static,
    F: Fn() -> Box<S> + Send + Sync + 'static,
{
    ClientPool::new(name, capacity, move || Some(make()))
}

/// Downstream operations served by [`MockServices`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    ReadMovieInfo,
    ReadMovieReviews,
    ReadCastInfo,
    ReadPlot,
    ReadReviews,
    UploadRating,
    UploadText,
}

#[derive(Default)]
struct MockState {
    movies: Mutex<HashMap<String, MovieInfo>>,
    movie_reviews: Mutex<HashMap<String, Vec<Review>>>,
    cast_infos: Mutex<HashMap<i64, CastInfo>>,
    plots: Mutex<HashMap<i64, String>>,
    failures: Mutex<HashMap<Op, ServiceError>>,
    delays: Mutex<HashMap<Op, Duration>>,
    carriers: Mutex<HashMap<Op, Vec<Carrier>>>,
    completed: Mutex<HashMap<Op, usize>>,
    review_id_requests: Mutex<Vec<Vec<i64>>>,
    ratings: Mutex<Vec<i32>>,
    texts: Mutex<Vec<String>>,
}

/// Scripted stand-in for every downstream service. Clones share state, so
/// one instance can back several pools and still be inspected by the test.
#[derive(Clone, Default)]
pub struct MockServices {
    state: Arc<MockState>,
}

impl MockServices {
    pub fn add_movie(&self, movie_info: MovieInfo) {
        self.state
            .movies
            .lock()
            .insert(movie_info.movie_id.clone(), movie_info);
    }

    pub fn add_movie_reviews(&self, movie_id: &str, reviews: Vec<Review>) {
        self.state
            .movie_reviews
            .lock()
            .insert(movie_id.to_string(), reviews);
    }

    pub fn add_cast_info(&self, cast_info: CastInfo) {
        self.state
            .cast_infos
            .lock()
            .insert(cast_info.cast_info_id, cast_info);
    }

    pub fn add_plot(&self, plot_id: i64, plot: &str) {
        self.state.plots.lock().insert(plot_id, plot.to_string());
    }

    /// Every later call to `op` fails with `error`.
    pub fn fail(&self, op: Op, error: ServiceError) {
        self.state.failures.lock().insert(op, error);
    }

    /// Every later call to `op` sleeps for `delay` before answering.
    pub fn delay(&self, op: Op, delay: Duration) {
        self.state.delays.lock().insert(op, delay);
    }

    /// Number of calls received for `op`.
    pub fn calls(&self, op: Op) -> usize {
        self.carriers(op).len()
    }

    /// Number of calls to `op` that ran to the end.
    pub fn completed(&self, op: Op) -> usize {
        self.state.completed.lock().get(&op).copied().unwrap_or(0)
    }

    pub fn carriers(&self, op: Op) -> Vec<Carrier> {
        self.state
            .carriers
            .lock()
            .get(&op)
            .cloned()
            .unwrap_or_default()
    }

    /// Id lists passed to `read_reviews`, in call order.
    pub fn review_id_requests(&self) -> Vec<Vec<i64>> {
        self.state.review_id_requests.lock().clone()
    }

    pub fn ratings(&self) -> Vec<i32> {
        self.state.ratings.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.state.texts.lock().clone()
    }

    /// Pool of clients backed by this mock.
    pub fn pool<S>(&self, name: &str, capacity: usize) -> ServicePool<S>
    where
        S: ?Sized + Send + 'static,
        Self: Boxed<S>,
    {
        let services = self.clone();
        boxed_pool(name, capacity, move || <Self as Boxed<S>>::boxed(&services))
    }

    async fn enter(&self, op: Op, carrier: Carrier) -> Result<()> {
        self.state
            .carriers
            .lock()
            .entry(op)
            .or_default()
            .push(carrier);

        let delay = self.state.delays.lock().get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        *self.state.completed.lock().entry(op).or_default() += 1;
        match self.state.failures.lock().get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

fn not_found(what: &str) -> ServiceError {
    ServiceError::new(ErrorCode::HandlerError, format!("{what} not found"))
}

/// Converts a mock into one of the service trait objects.
pub trait Boxed<S: ?Sized> {
    fn boxed(&self) -> Box<S>;
}

macro_rules! impl_boxed {
    ($($service:ident),* $(,)?) => {
        $(
            impl Boxed<dyn $service> for MockServices {
                fn boxed(&self) -> Box<dyn $service> {
                    Box::new(self.clone())
                }
            }
        )*
    };
}

impl_boxed!(
    MovieInfoService,
    MovieReviewService,
    CastInfoService,
    PlotService,
    ReviewStorageService,
    ComposeReviewService,
);

#[async_trait]
impl MovieInfoService for MockServices {
    async fn read_movie_info(
        &self,
        _req_id: i64,
        movie_id: &str,
        carrier: Carrier,
    ) -> Result<MovieInfo> {
        self.enter(Op::ReadMovieInfo, carrier).await?;
        self.state
            .movies
            .lock()
            .get(movie_id)
            .cloned()
            .ok_or_else(|| not_found("movie"))
    }
}

#[async_trait]
impl MovieReviewService for MockServices {
    async fn read_movie_reviews(
        &self,
        _req_id: i64,
        movie_id: &str,
        start: i32,
        stop: i32,
        carrier: Carrier,
    ) -> Result<Vec<Review>> {
        self.enter(Op::ReadMovieReviews, carrier).await?;
        let movie_reviews = self.state.movie_reviews.lock();
        let reviews = movie_reviews.get(movie_id).map(Vec::as_slice).unwrap_or(&[]);
        let start = (start.max(0) as usize).min(reviews.len());
        let stop = (stop.max(0) as usize).clamp(start, reviews.len());
        Ok(reviews[start..stop].to_vec())
    }
}

#[async_trait]
impl CastInfoService for MockServices {
    async fn read_cast_info(
        &self,
        _req_id: i64,
        cast_ids: &[i64],
        carrier: Carrier,
    ) -> Result<Vec<CastInfo>> {
        self.enter(Op::ReadCastInfo, carrier).await?;
        let cast_infos = self.state.cast_infos.lock();
        cast_ids
            .iter()
            .map(|id| cast_infos.get(id).cloned().ok_or_else(|| not_found("cast info")))
            .collect()
    }
}

#[async_trait]
impl PlotService for MockServices {
    async fn read_plot(&self, _req_id: i64, plot_id: i64, carrier: Carrier) -> Result<String> {
        self.enter(Op::ReadPlot, carrier).await?;
        self.state
            .plots
            .lock()
            .get(&plot_id)
            .cloned()
            .ok_or_else(|| not_found("plot"))
    }
}

#[async_trait]
impl ReviewStorageService for MockServices {
    /// Answers with a generated review for every id, in request order.
    async fn read_reviews(
        &self,
        _req_id: i64,
        review_ids: &[i64],
        carrier: Carrier,
    ) -> Result<Vec<Review>> {
        self.state
            .review_id_requests
            .lock()
            .push(review_ids.to_vec());
        self.enter(Op::ReadReviews, carrier).await?;
        Ok(review_ids.iter().copied().map(review).collect())
    }
}

#[async_trait]
impl ComposeReviewService for MockServices {
    async fn upload_rating(&self, _req_id: i64, rating: i32, carrier: Carrier) -> Result<()> {
        self.enter(Op::UploadRating, carrier).await?;
        self.state.ratings.lock().push(rating);
        Ok(())
    }

    async fn upload_text(&self, _req_id: i64, text: &str, carrier: Carrier) -> Result<()> {
        self.enter(Op::UploadText, carrier).await?;
        self.state.texts.lock().push(text.to_string());
        Ok(())
    }
}

type CommandFilter = Arc<dyn Fn(&CacheCommand) -> bool + Send + Sync>;

/// Cache that rejects any pipeline containing a matching command and
/// otherwise delegates to a shared [`MemoryCache`].
#[derive(Clone)]
pub struct ScriptedCache {
    inner: MemoryCache,
    fail_when: CommandFilter,
}

impl ScriptedCache {
    pub fn failing_on<F>(inner: MemoryCache, fail_when: F) -> Self
    where
        F: Fn(&CacheCommand) -> bool + Send + Sync + 'static,
    {
        Self {
            inner,
            fail_when: Arc::new(fail_when),
        }
    }
}

#[async_trait]
impl CacheClient for ScriptedCache {
    async fn execute(
        &self,
        commands: Vec<CacheCommand>,
    ) -> std::result::Result<Vec<CacheReply>, CacheError> {
        if commands.iter().any(|command| (self.fail_when)(command)) {
            return Err(CacheError::Unavailable("connection reset".to_string()));
        }
        self.inner.execute(commands).await
    }
}

/// Store whose every operation fails.
#[derive(Clone)]
pub struct UnavailableStore;

#[async_trait]
impl UserReviewStore for UnavailableStore {
    async fn find_user(
        &self,
        _user_id: i64,
    ) -> std::result::Result<Option<UserReviewDocument>, StoreError> {
        Err(StoreError::Unavailable("no primary".to_string()))
    }

    async fn insert_user(&self, _document: UserReviewDocument) -> std::result::Result<(), StoreError> {
        Err(StoreError::Unavailable("no primary".to_string()))
    }

    async fn push_review_front(
        &self,
        _user_id: i64,
        _entry: ReviewEntry,
    ) -> std::result::Result<bool, StoreError> {
        Err(StoreError::Unavailable("no primary".to_string()))
    }

    async fn find_reviews_slice(
        &self,
        _user_id: i64,
        _limit: usize,
    ) -> std::result::Result<Option<Vec<ReviewEntry>>, StoreError> {
        Err(StoreError::Unavailable("no primary".to_string()))
    }
}
