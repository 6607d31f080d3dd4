//! Domain records exchanged with callers and downstream services.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cast {
    pub cast_id: i32,
    pub character: String,
    pub cast_info_id: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MovieInfo {
    pub movie_id: String,
    pub title: String,
    #[serde(default)]
    pub casts: Vec<Cast>,
    pub plot_id: i64,
    #[serde(default)]
    pub thumbnail_ids: Vec<String>,
    #[serde(default)]
    pub photo_ids: Vec<String>,
    #[serde(default)]
    pub video_ids: Vec<String>,
    #[serde(default)]
    pub avg_rating: f64,
    #[serde(default)]
    pub num_rating: i32,
}

impl MovieInfo {
    /// Cast info ids referenced by this movie, in cast order.
    pub fn cast_info_ids(&self) -> Vec<i64> {
        self.casts.iter().map(|cast| cast.cast_info_id).collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CastInfo {
    pub cast_info_id: i64,
    pub name: String,
    pub gender: bool,
    pub intro: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub review_id: i64,
    pub user_id: i64,
    pub req_id: i64,
    pub text: String,
    pub movie_id: String,
    pub rating: i32,
    pub timestamp: i64,
}

/// Everything needed to render one movie page.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub movie_info: MovieInfo,
    pub reviews: Vec<Review>,
    pub cast_infos: Vec<CastInfo>,
    pub plot: String,
}

/// One entry of a user's review index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub review_id: i64,
    pub timestamp: i64,
}

/// Durable record of every review a user has written, newest insertion first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReviewDocument {
    pub user_id: i64,
    pub reviews: Vec<ReviewEntry>,
}
