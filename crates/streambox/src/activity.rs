//! Per-channel likes, views and reviews.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ActivityError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("invalid activity data: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("rating {rating} is outside 1..=10")]
    InvalidRating { rating: u8 },

    #[error("review text is empty")]
    EmptyReview,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub text: String,
    pub rating: u8,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelActivity {
    pub likes: u64,
    pub dislikes: u64,
    pub views: u64,
    /// Newest first.
    pub reviews: Vec<Review>,
    pub user_liked: bool,
    pub user_disliked: bool,
    pub user_rating: Option<u8>,
}

impl ChannelActivity {
    /// Like, or undo a previous like. Liking clears a dislike.
    pub fn toggle_like(&mut self) {
        if self.user_liked {
            self.likes = self.likes.saturating_sub(1);
            self.user_liked = false;
        } else {
            self.likes += 1;
            self.user_liked = true;
            if self.user_disliked {
                self.dislikes = self.dislikes.saturating_sub(1);
                self.user_disliked = false;
            }
        }
    }

    /// Dislike, or undo a previous dislike. Disliking clears a like.
    pub fn toggle_dislike(&mut self) {
        if self.user_disliked {
            self.dislikes = self.dislikes.saturating_sub(1);
            self.user_disliked = false;
        } else {
            self.dislikes += 1;
            self.user_disliked = true;
            if self.user_liked {
                self.likes = self.likes.saturating_sub(1);
                self.user_liked = false;
            }
        }
    }

    pub fn average_rating(&self) -> Option<f64> {
        if self.reviews.is_empty() {
            return None;
        }
        let total: u64 = self.reviews.iter().map(|r| u64::from(r.rating)).sum();
        Some(total as f64 / self.reviews.len() as f64)
    }
}

/// Every channel's activity keyed by stream URL.
pub type ActivitySnapshot = BTreeMap<String, ChannelActivity>;

pub type ActivityCallback = Box<dyn Fn(&ActivitySnapshot) + Send + Sync>;

type Registry = Mutex<Subscribers>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    callbacks: HashMap<u64, Arc<ActivityCallback>>,
}

/// Handle returned by [`ActivityStore::subscribe`]. Delivery stops when it
/// is dropped or [`Subscription::unsubscribe`] is called.
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().callbacks.remove(&self.id);
        }
    }
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn get_activity(&self, url: &str) -> ChannelActivity;

    async fn increment_views(&self, url: &str) -> Result<(), ActivityError>;

    async fn toggle_like(&self, url: &str) -> Result<ChannelActivity, ActivityError>;

    async fn toggle_dislike(&self, url: &str) -> Result<ChannelActivity, ActivityError>;

    async fn add_review(&self, url: &str, text: &str, rating: u8)
    -> Result<Review, ActivityError>;

    /// Receive the whole store now and after every change.
    fn subscribe(&self, callback: ActivityCallback) -> Subscription;
}

/// JSON-file backed store, or purely in memory.
pub struct LocalActivityStore {
    path: Option<PathBuf>,
    data: Mutex<ActivitySnapshot>,
    persist_lock: tokio::sync::Mutex<()>,
    subscribers: Arc<Registry>,
}

impl LocalActivityStore {
    pub fn in_memory() -> Self {
        Self::with_data(None, ActivitySnapshot::new())
    }

    /// Load `path` if it exists; changes are written back to it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ActivityError> {
        let path = path.as_ref().to_path_buf();
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ActivitySnapshot::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), channels = data.len(), "Loaded activity store");
        Ok(Self::with_data(Some(path), data))
    }

    fn with_data(path: Option<PathBuf>, data: ActivitySnapshot) -> Self {
        Self {
            path,
            data: Mutex::new(data),
            persist_lock: tokio::sync::Mutex::new(()),
            subscribers: Arc::default(),
        }
    }

    pub fn snapshot(&self) -> ActivitySnapshot {
        self.data.lock().clone()
    }

    async fn update<T>(
        &self,
        url: &str,
        change: impl FnOnce(&mut ChannelActivity) -> Result<T, ActivityError>,
    ) -> Result<T, ActivityError> {
        // Writers are serialized by `persist_lock`; memory is committed only
        // after the snapshot is on disk.
        let _guard = self.persist_lock.lock().await;
        let mut snapshot = self.data.lock().clone();
        let value = change(snapshot.entry(url.to_string()).or_default())?;
        self.persist(&snapshot).await?;
        *self.data.lock() = snapshot.clone();
        self.notify(&snapshot);
        Ok(value)
    }

    async fn persist(&self, snapshot: &ActivitySnapshot) -> Result<(), ActivityError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(snapshot)?;
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &json).await?;
        tokio::fs::rename(&temp_path, path).await?;
        Ok(())
    }

    fn notify(&self, snapshot: &ActivitySnapshot) {
        let callbacks: Vec<_> = self
            .subscribers
            .lock()
            .callbacks
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(snapshot);
        }
    }
}

#[async_trait]
impl ActivityStore for LocalActivityStore {
    async fn get_activity(&self, url: &str) -> ChannelActivity {
        self.data.lock().get(url).cloned().unwrap_or_default()
    }

    async fn increment_views(&self, url: &str) -> Result<(), ActivityError> {
        self.update(url, |activity| {
            activity.views += 1;
            Ok(())
        })
        .await
    }

    async fn toggle_like(&self, url: &str) -> Result<ChannelActivity, ActivityError> {
        self.update(url, |activity| {
            activity.toggle_like();
            Ok(activity.clone())
        })
        .await
    }

    async fn toggle_dislike(&self, url: &str) -> Result<ChannelActivity, ActivityError> {
        self.update(url, |activity| {
            activity.toggle_dislike();
            Ok(activity.clone())
        })
        .await
    }

    async fn add_review(
        &self,
        url: &str,
        text: &str,
        rating: u8,
    ) -> Result<Review, ActivityError> {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(ActivityError::InvalidRating { rating });
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(ActivityError::EmptyReview);
        }
        let review = Review {
            id: Uuid::new_v4(),
            text: text.to_string(),
            rating,
            date: Utc::now(),
        };
        let stored = review.clone();
        self.update(url, move |activity| {
            activity.reviews.insert(0, stored);
            activity.user_rating = Some(rating);
            Ok(())
        })
        .await?;
        Ok(review)
    }

    fn subscribe(&self, callback: ActivityCallback) -> Subscription {
        let snapshot = self.snapshot();
        callback(&snapshot);

        let mut subscribers = self.subscribers.lock();
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.callbacks.insert(id, Arc::new(callback));
        Subscription {
            id,
            registry: Arc::downgrade(&self.subscribers),
        }
    }
}
