//! One-shot rating session used by the CLI.
//!
//! Bundles the cache, the interceptor pipeline and the refresh scheduler so a
//! single command can read ratings or write one and see the refreshed value
//! before the process exits.

use crate::config::{ConfigSource, CredentialSource};
use crate::interceptor::{rating_write_body, RatingMutationInterceptor};
use crate::player::PlaybackController;
use crate::rating::{Rating, RatingState};
use crate::rating_cache::RatingCache;
use crate::rating_client::{track_rating_url, RatingSource, MUSIC_USER_TOKEN_HEADER};
use crate::scheduler::DelayedTasks;
use crate::transport::{OutboundRequest, Transport};
use anyhow::{bail, Context, Result};
use log::info;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;

pub struct RatingSession<T: Transport> {
    cache: Arc<RatingCache>,
    pipeline: RatingMutationInterceptor<T>,
    scheduler: Arc<DelayedTasks>,
    credentials: Arc<dyn CredentialSource>,
}

impl<T: Transport> RatingSession<T> {
    pub fn new<S>(
        transport: T,
        source: Arc<dyn RatingSource>,
        player: Arc<dyn PlaybackController>,
        settings: Arc<S>,
    ) -> Self
    where
        S: ConfigSource + CredentialSource + 'static,
    {
        let cache = Arc::new(RatingCache::new(source, settings.clone()));
        let scheduler = Arc::new(DelayedTasks::new());
        let pipeline = RatingMutationInterceptor::new(
            transport,
            cache.clone(),
            player,
            settings.clone(),
            scheduler.clone(),
        );

        Self {
            cache,
            pipeline,
            scheduler,
            credentials: settings,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.pipeline = self.pipeline.with_settle_delay(delay);
        self
    }

    pub fn cache(&self) -> &RatingCache {
        &self.cache
    }

    /// Ratings for `track_ids` in request order, duplicates collapsed
    pub fn ratings(&self, track_ids: &[String], refresh: bool) -> Result<Vec<Rating>> {
        let mut found = self.cache.get(track_ids, refresh)?;
        let mut ordered = Vec::with_capacity(found.len());
        for id in track_ids {
            if let Some(rating) = found.remove(id) {
                ordered.push(rating);
            }
        }
        Ok(ordered)
    }

    /// Write a rating (`None` removes it) and wait for the cache refresh.
    ///
    /// Returns the rating as re-read after the settle delay.
    pub fn write(&self, track_id: &str, state: Option<RatingState>) -> Result<Option<Rating>> {
        let credentials = self.credentials.credentials()
            .context("No session credentials. Set developer_token and music_user_token first")?;
        let url = track_rating_url(&self.credentials.api_base_url(), track_id);

        let request = match state.and_then(RatingState::service_value) {
            Some(value) => OutboundRequest::new(Method::PUT, url)
                .header("Content-Type", "application/json")
                .body(rating_write_body(value)),
            None => OutboundRequest::new(Method::DELETE, url),
        }
        .header("Authorization", format!("Bearer {}", credentials.developer_token))
        .header(MUSIC_USER_TOKEN_HEADER, credentials.music_user_token);

        let response = self.pipeline.send(request)?;
        if !response.is_success() {
            let body = String::from_utf8_lossy(&response.body);
            bail!("Rating service rejected the write ({}): {}", response.status, body.trim());
        }
        info!("Rating of {track_id} written");

        self.scheduler.wait_all();
        Ok(self.cache.peek(track_id).map(|entry| entry.rating))
    }
}
