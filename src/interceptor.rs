//! # Rating Mutation Interceptor
//!
//! Middleware on the outbound request pipeline that watches for rating writes
//! and keeps the [`RatingCache`] honest about them.
//!
//! ## Recognized Writes
//!
//! | Endpoint | Path prefix              | Methods        |
//! |----------|--------------------------|----------------|
//! | Batched  | `/v1/me/ratings/songs/`  | `PUT`, `DELETE`|
//! | Legacy   | `/v1/me/rating/songs/`   | `PUT`, `DELETE`|
//!
//! The percent-decoded rest of the path is the track id. For either endpoint:
//!
//! 1. A `PUT` whose body carries `attributes.value == -1` for the track that is
//!    playing right now skips forward immediately, if `skip_song_on_dislike`
//!    is on.
//! 2. After a fixed settle delay the track's rating is force-refreshed
//!    (`ignore_cache = true`) so the cache reflects the write.
//!
//! Legacy writes are additionally rewritten to the batched path when
//! `patch_ratings_api` is set. Everything else is forwarded untouched.
//!
//! None of the side effects hold up the forwarded request.

use crate::config::ConfigSource;
use crate::player::PlaybackController;
use crate::rating_cache::RatingCache;
use crate::scheduler::Scheduler;
use crate::transport::{OutboundRequest, Transport, TransportResponse};
use anyhow::Result;
use log::{debug, info, warn};
use reqwest::{Method, Url};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const BATCHED_RATINGS_PREFIX: &str = "/v1/me/ratings/songs/";
pub const LEGACY_RATINGS_PREFIX: &str = "/v1/me/rating/songs/";

/// Time given to the remote write before the cache is refreshed
pub const SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// Service value that marks a dislike in a write body
const DISLIKE_VALUE: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Batched,
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// `PUT`: create or overwrite the rating
    Overwrite,
    /// `DELETE`: remove the rating
    Delete,
}

/// What the interceptor makes of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    PassThrough,
    RatingWrite {
        endpoint: Endpoint,
        kind: WriteKind,
        track_id: String,
    },
}

/// Decide whether `request` is a rating write, without side effects
pub fn classify(request: &OutboundRequest) -> Interception {
    let kind = match request.method {
        Method::PUT => WriteKind::Overwrite,
        Method::DELETE => WriteKind::Delete,
        _ => return Interception::PassThrough,
    };
    let Some(path) = request.path() else {
        return Interception::PassThrough;
    };

    let (endpoint, rest) = if let Some(rest) = path.strip_prefix(BATCHED_RATINGS_PREFIX) {
        (Endpoint::Batched, rest)
    } else if let Some(rest) = path.strip_prefix(LEGACY_RATINGS_PREFIX) {
        (Endpoint::Legacy, rest)
    } else {
        return Interception::PassThrough;
    };

    // Ids may themselves contain '/' so everything after the prefix is the id
    let encoded = rest.trim_end_matches('/');
    if encoded.is_empty() {
        return Interception::PassThrough;
    }
    match urlencoding::decode(encoded) {
        Ok(track_id) => Interception::RatingWrite {
            endpoint,
            kind,
            track_id: track_id.into_owned(),
        },
        Err(e) => {
            debug!("Rating write path is not valid UTF-8 once decoded: {e}");
            Interception::PassThrough
        }
    }
}

/// Legacy write URL moved onto the batched endpoint
pub fn rewrite_legacy_url(url: &str) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    let rest = parsed.path().strip_prefix(LEGACY_RATINGS_PREFIX)?.to_string();
    parsed.set_path(&format!("{BATCHED_RATINGS_PREFIX}{rest}"));
    Some(parsed.to_string())
}

/// Whether a write body sets the rating to "disliked".
///
/// Accepts the full resource form `{"attributes": {"value": -1}}` as well as a
/// bare `{"value": -1}`. A missing or empty body is not a dislike.
pub fn body_marks_dislike(body: Option<&[u8]>) -> Result<bool, serde_json::Error> {
    let Some(body) = body.filter(|b| !b.is_empty()) else {
        return Ok(false);
    };
    let json: Value = serde_json::from_slice(body)?;
    let value = json.pointer("/attributes/value")
        .or_else(|| json.pointer("/value"))
        .and_then(Value::as_i64);
    Ok(value == Some(DISLIKE_VALUE))
}

/// Body of a rating write for `value` (`1` like, `-1` dislike)
pub fn rating_write_body(value: i64) -> Vec<u8> {
    serde_json::json!({
        "type": "rating",
        "attributes": { "value": value },
    })
    .to_string()
    .into_bytes()
}

pub struct RatingMutationInterceptor<T: Transport> {
    inner: T,
    cache: Arc<RatingCache>,
    player: Arc<dyn PlaybackController>,
    config: Arc<dyn ConfigSource>,
    scheduler: Arc<dyn Scheduler>,
    settle_delay: Duration,
}

impl<T: Transport> RatingMutationInterceptor<T> {
    pub fn new(
        inner: T,
        cache: Arc<RatingCache>,
        player: Arc<dyn PlaybackController>,
        config: Arc<dyn ConfigSource>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            inner,
            cache,
            player,
            config,
            scheduler,
            settle_delay: SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Skip forward if `track_id` is playing right now
    fn skip_if_playing(&self, track_id: &str) {
        match self.player.now_playing() {
            Ok(Some(current)) if current.id == track_id => {
                match self.player.skip_forward() {
                    Ok(()) => info!("Skipped forward from just-disliked track \"{current}\""),
                    Err(e) => warn!("Failed to skip just-disliked track {track_id}: {e:#}"),
                }
            }
            Ok(_) => debug!("Disliked track {track_id} is not playing, no skip"),
            Err(e) => warn!("Could not read now playing track: {e:#}"),
        }
    }

    fn schedule_refresh(&self, track_id: String) {
        let cache = Arc::clone(&self.cache);
        self.scheduler.schedule(self.settle_delay, Box::new(move || {
            match cache.get(std::slice::from_ref(&track_id), true) {
                Ok(ratings) => {
                    if let Some(rating) = ratings.get(&track_id) {
                        debug!("Refreshed rating of {track_id}: {}", rating.state);
                    }
                }
                Err(e) => warn!("Failed to refresh rating of {track_id}: {e}"),
            }
        }));
    }
}

impl<T: Transport> Transport for RatingMutationInterceptor<T> {
    fn send(&self, request: OutboundRequest) -> Result<TransportResponse> {
        let (endpoint, kind, track_id) = match classify(&request) {
            Interception::PassThrough => return self.inner.send(request),
            Interception::RatingWrite { endpoint, kind, track_id } => (endpoint, kind, track_id),
        };
        debug!("Intercepted {kind:?} of rating for {track_id} ({endpoint:?} endpoint)");

        let settings = self.config.settings();
        let mut body_readable = true;

        if kind == WriteKind::Overwrite {
            match body_marks_dislike(request.body.as_deref()) {
                Ok(true) if settings.skip_song_on_dislike => self.skip_if_playing(&track_id),
                Ok(_) => {}
                Err(e) => {
                    warn!("Unreadable rating body for {track_id}, forwarding as-is: {e}");
                    body_readable = false;
                }
            }
        }

        self.schedule_refresh(track_id);

        if endpoint == Endpoint::Legacy && settings.patch_ratings_api && body_readable {
            if let Some(url) = rewrite_legacy_url(&request.url) {
                debug!("Rewriting legacy rating write to {url}");
                return self.inner.send(OutboundRequest { url, ..request });
            }
        }

        self.inner.send(request)
    }
}
