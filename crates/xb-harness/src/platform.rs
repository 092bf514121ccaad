use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use xb_core::types::{DirectMessage, Tweet, User};

use crate::transport::TransportError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The platform answered with a non-success status.
    #[error("API error (status {status}): {message}")]
    Status { status: u16, message: String },

    /// The platform answered 2xx but reported errors in the body.
    #[error("API error: {0}")]
    Api(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("media error: {0}")]
    Media(String),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Which timeline of a user to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineKind {
    Tweets,
    Replies,
    Media,
    Likes,
}

impl fmt::Display for TimelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimelineKind::Tweets => write!(f, "Tweets"),
            TimelineKind::Replies => write!(f, "Replies"),
            TimelineKind::Media => write!(f, "Media"),
            TimelineKind::Likes => write!(f, "Likes"),
        }
    }
}

impl FromStr for TimelineKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Tweets" => Ok(TimelineKind::Tweets),
            "Replies" => Ok(TimelineKind::Replies),
            "Media" => Ok(TimelineKind::Media),
            "Likes" => Ok(TimelineKind::Likes),
            other => Err(format!(
                "invalid tweet type '{other}', expected one of: Tweets, Replies, Media, Likes"
            )),
        }
    }
}

/// Search result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchProduct {
    #[default]
    Top,
    Latest,
    Media,
}

impl fmt::Display for SearchProduct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchProduct::Top => write!(f, "Top"),
            SearchProduct::Latest => write!(f, "Latest"),
            SearchProduct::Media => write!(f, "Media"),
        }
    }
}

impl FromStr for SearchProduct {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Top" => Ok(SearchProduct::Top),
            "Latest" => Ok(SearchProduct::Latest),
            "Media" => Ok(SearchProduct::Media),
            other => Err(format!(
                "invalid search mode '{other}', expected one of: Top, Latest, Media"
            )),
        }
    }
}

/// A tweet to publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTweet {
    pub text: String,
    pub reply_to: Option<String>,
    pub media_ids: Vec<String>,
}

impl NewTweet {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn reply_to(mut self, tweet_id: impl Into<String>) -> Self {
        self.reply_to = Some(tweet_id.into());
        self
    }

    pub fn with_media(mut self, media_id: impl Into<String>) -> Self {
        self.media_ids.push(media_id.into());
        self
    }
}

/// A local file to upload as tweet media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub path: PathBuf,
    /// MIME type, e.g. `image/png`.
    pub media_type: String,
}

// ---------------------------------------------------------------------------
// PlatformClient
// ---------------------------------------------------------------------------

/// The platform operations the bridge's action table needs.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn create_tweet(&self, tweet: NewTweet) -> Result<Tweet>;
    async fn delete_tweet(&self, tweet_id: &str) -> Result<()>;
    async fn favorite_tweet(&self, tweet_id: &str) -> Result<()>;
    async fn unfavorite_tweet(&self, tweet_id: &str) -> Result<()>;
    async fn retweet(&self, tweet_id: &str) -> Result<()>;
    async fn delete_retweet(&self, tweet_id: &str) -> Result<()>;

    async fn get_tweet_by_id(&self, tweet_id: &str) -> Result<Tweet>;
    async fn get_tweets_by_ids(&self, tweet_ids: &[String]) -> Result<Vec<Tweet>>;
    async fn get_user_tweets(
        &self,
        user_id: &str,
        kind: TimelineKind,
        count: u32,
    ) -> Result<Vec<Tweet>>;
    async fn search_tweets(
        &self,
        query: &str,
        product: SearchProduct,
        count: u32,
    ) -> Result<Vec<Tweet>>;
    async fn get_retweeters(&self, tweet_id: &str, count: u32) -> Result<Vec<User>>;

    async fn get_user_by_screen_name(&self, screen_name: &str) -> Result<User>;
    async fn follow_user(&self, user_id: &str) -> Result<User>;
    async fn unfollow_user(&self, user_id: &str) -> Result<User>;

    /// Upload a media file and return its media id.
    async fn upload_media(&self, upload: MediaUpload) -> Result<String>;
    async fn create_media_metadata(&self, media_id: &str, alt_text: &str) -> Result<()>;

    async fn send_direct_message(&self, user_id: &str, text: &str) -> Result<DirectMessage>;
}
