//! # Rating Model
//!
//! Value types shared by the cache, the rating client and the mutation
//! interceptor. A [`Rating`] is immutable: refreshing a track replaces the
//! whole value, it is never patched in place.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// Listener-assigned state of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatingState {
    Liked,
    Disliked,
    /// No rating record exists for the track
    Unrated,
}

impl RatingState {
    /// Translate the service's numeric rating value.
    ///
    /// The upstream schema only knows `1` (liked) and `-1` (disliked); any
    /// value other than `1` is read as a dislike. "Unrated" is never encoded
    /// numerically, it is signalled by the absence of a record.
    pub fn from_service_value(value: i64) -> Self {
        if value == 1 {
            RatingState::Liked
        } else {
            RatingState::Disliked
        }
    }

    /// Numeric value used in rating write bodies, `None` for unrated
    pub fn service_value(self) -> Option<i64> {
        match self {
            RatingState::Liked => Some(1),
            RatingState::Disliked => Some(-1),
            RatingState::Unrated => None,
        }
    }

    pub fn is_disliked(self) -> bool {
        self == RatingState::Disliked
    }
}

impl fmt::Display for RatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RatingState::Liked => "liked",
            RatingState::Disliked => "disliked",
            RatingState::Unrated => "unrated",
        };
        f.write_str(label)
    }
}

impl FromStr for RatingState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "like" | "liked" => Ok(RatingState::Liked),
            "dislike" | "disliked" => Ok(RatingState::Disliked),
            "unrated" | "none" => Ok(RatingState::Unrated),
            other => anyhow::bail!("Unknown rating '{other}'. Use 'like', 'dislike' or 'unrated'"),
        }
    }
}

/// Rating of a single track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub track_id: String,
    pub state: RatingState,
}

impl Rating {
    pub fn new(track_id: impl Into<String>, state: RatingState) -> Self {
        Self {
            track_id: track_id.into(),
            state,
        }
    }

    /// Rating synthesized for a track the service returned no record for
    pub fn unrated(track_id: impl Into<String>) -> Self {
        Self::new(track_id, RatingState::Unrated)
    }
}

/// A cached rating together with the time it was fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub rating: Rating,
    pub fetched_at: SystemTime,
}
