//! Player-facing types: the queue as Skipper sees it and the control surface
//! used to skip. The MPD implementation lives in [`crate::mpd_client`].

use anyhow::Result;
use std::fmt;

/// A queue item, identified by the id the rating service knows it by
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackRef {
    pub id: String,
    pub artist: String,
    pub title: String,
}

impl TrackRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_names(id: impl Into<String>, artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            artist: artist.into(),
            title: title.into(),
        }
    }
}

impl fmt::Display for TrackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.title.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{} - {}", self.artist, self.title.trim())
        }
    }
}

/// Direction of travel through the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// Forward when `new` lies after `old`, backward otherwise (including equal)
    pub fn between(old: i64, new: i64) -> Self {
        if new > old {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => f.write_str("forward"),
            Direction::Backward => f.write_str("backward"),
        }
    }
}

/// Control surface of the host player
pub trait PlaybackController: Send + Sync {
    fn skip_forward(&self) -> Result<()>;

    fn skip_backward(&self) -> Result<()>;

    /// Current queue in play order
    fn queue(&self) -> Result<Vec<TrackRef>>;

    fn now_playing(&self) -> Result<Option<TrackRef>>;

    fn skip(&self, direction: Direction) -> Result<()> {
        match direction {
            Direction::Forward => self.skip_forward(),
            Direction::Backward => self.skip_backward(),
        }
    }
}
