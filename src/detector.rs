//! # Playback Transition Detector
//!
//! Turns player notifications into skip decisions.
//!
//! ## Event Shapes
//!
//! - **Position**: `(old, new)` queue positions. `new == -1` means nothing is
//!   active and is ignored without a lookup. Travel is forward when
//!   `new > old`, backward otherwise.
//! - **Now playing**: the new current item only. Its index in the queue is
//!   compared with the index recorded for the previous event; the very first
//!   event counts as forward. The recorded index is updated on every event,
//!   whether or not a skip follows.
//! - **Queue changed**: warm the cache with every id in the new queue, no
//!   decision is made.
//!
//! A track is skipped only when its rating is exactly `disliked`, in the
//! direction of travel, so a listener stepping backwards through disliked
//! tracks keeps going backwards.
//!
//! ## Late Decisions
//!
//! The rating lookup may hit the network. When it returns, the detector checks
//! that the track it looked up is still the one playing; if playback has moved
//! on in the meantime the decision is dropped ([`TransitionOutcome::Superseded`])
//! instead of skipping whatever is current now.
//!
//! Handlers never fail: lookup and player errors are logged and reported in the
//! returned outcome.

use crate::config::ConfigSource;
use crate::player::{Direction, PlaybackController, TrackRef};
use crate::rating::RatingState;
use crate::rating_cache::RatingCache;
use log::{debug, info, warn};
use std::sync::Arc;

/// Notification from the host player
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueTransitionEvent {
    Position { old_position: i64, new_position: i64 },
    NowPlaying { item: Option<TrackRef> },
    QueueChanged { queue: Vec<TrackRef> },
}

/// Result of handling one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Nothing to decide (disabled, no active item, duplicate event, ...)
    Ignored,
    /// Track looked up and left playing
    Kept,
    Skipped(Direction),
    /// Playback moved on while the rating was being fetched
    Superseded,
    /// Rating lookup failed, decision suppressed
    LookupFailed,
    /// Skip was decided but the player refused it
    SkipFailed,
    /// Cache warm-up covered this many tracks
    Warmed(usize),
}

/// State carried between events for the lifetime of the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorState {
    pub last_known_index: Option<usize>,
}

pub struct PlaybackTransitionDetector {
    cache: Arc<RatingCache>,
    player: Arc<dyn PlaybackController>,
    config: Arc<dyn ConfigSource>,
    state: DetectorState,
    /// Queue slot and track of the last evaluated transition
    last_evaluated: Option<(usize, String)>,
}

impl PlaybackTransitionDetector {
    pub fn new(
        cache: Arc<RatingCache>,
        player: Arc<dyn PlaybackController>,
        config: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            cache,
            player,
            config,
            state: DetectorState::default(),
            last_evaluated: None,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn handle(&mut self, event: QueueTransitionEvent) -> TransitionOutcome {
        match event {
            QueueTransitionEvent::Position { old_position, new_position } => {
                self.on_position_changed(old_position, new_position)
            }
            QueueTransitionEvent::NowPlaying { item } => self.on_now_playing_changed(item.as_ref()),
            QueueTransitionEvent::QueueChanged { queue } => self.on_queue_changed(&queue),
        }
    }

    /// Position mode
    pub fn on_position_changed(&mut self, old_position: i64, new_position: i64) -> TransitionOutcome {
        if new_position < 0 {
            debug!("No active queue item (position {new_position}), ignoring");
            return TransitionOutcome::Ignored;
        }
        if !self.config.settings().enable_skipping {
            return TransitionOutcome::Ignored;
        }

        let direction = Direction::between(old_position, new_position);
        let index = new_position as usize;
        let queue = match self.player.queue() {
            Ok(queue) => queue,
            Err(e) => {
                warn!("Could not read queue: {e:#}");
                return TransitionOutcome::Ignored;
            }
        };
        let Some(track) = queue.into_iter().nth(index) else {
            debug!("No queue item at position {new_position}");
            return TransitionOutcome::Ignored;
        };

        self.decide(index, track, direction)
    }

    /// Identity mode
    pub fn on_now_playing_changed(&mut self, item: Option<&TrackRef>) -> TransitionOutcome {
        let Some(item) = item else {
            return TransitionOutcome::Ignored;
        };

        let queue = match self.player.queue() {
            Ok(queue) => queue,
            Err(e) => {
                warn!("Could not read queue: {e:#}");
                return TransitionOutcome::Ignored;
            }
        };
        let index = queue.iter().position(|track| track.id == item.id);

        let previous = self.state.last_known_index;
        self.state.last_known_index = index;

        let Some(index) = index else {
            debug!("Now playing {item} is not in the queue, direction unknown");
            return TransitionOutcome::Ignored;
        };
        let direction = match previous {
            Some(last) if index <= last => Direction::Backward,
            _ => Direction::Forward,
        };

        if !self.config.settings().enable_skipping {
            return TransitionOutcome::Ignored;
        }

        self.decide(index, item.clone(), direction)
    }

    /// Pre-fetch ratings for a new queue so later decisions are served from memory
    pub fn on_queue_changed(&self, queue: &[TrackRef]) -> TransitionOutcome {
        let settings = self.config.settings();
        if !settings.enable_skipping || !settings.enable_cache {
            return TransitionOutcome::Ignored;
        }

        let ids: Vec<String> = queue.iter().map(|track| track.id.clone()).collect();
        match self.cache.get(&ids, false) {
            Ok(ratings) => {
                debug!("Warmed {} ratings for new queue", ratings.len());
                TransitionOutcome::Warmed(ratings.len())
            }
            Err(e) => {
                warn!("Failed to pre-fetch queue ratings: {e}");
                TransitionOutcome::LookupFailed
            }
        }
    }

    fn decide(&mut self, index: usize, track: TrackRef, direction: Direction) -> TransitionOutcome {
        let key = (index, track.id.clone());
        if self.last_evaluated.as_ref() == Some(&key) {
            debug!("Transition to {track} at {index} already handled");
            return TransitionOutcome::Ignored;
        }
        self.last_evaluated = Some(key);

        let ratings = match self.cache.get(std::slice::from_ref(&track.id), false) {
            Ok(ratings) => ratings,
            Err(e) => {
                warn!("Rating lookup for {track} failed, not skipping: {e}");
                return TransitionOutcome::LookupFailed;
            }
        };

        let state = ratings.get(&track.id).map(|rating| rating.state);
        if state != Some(RatingState::Disliked) {
            debug!("Keeping {track} ({})", state.unwrap_or(RatingState::Unrated));
            return TransitionOutcome::Kept;
        }

        match self.player.now_playing() {
            Ok(Some(current)) if current.id == track.id => {}
            Ok(_) => {
                debug!("Playback moved on from {track} during lookup, dropping skip");
                return TransitionOutcome::Superseded;
            }
            Err(e) => warn!("Could not confirm now playing track, skipping anyway: {e:#}"),
        }

        match self.player.skip(direction) {
            Ok(()) => {
                info!("Skipped {direction} from disliked song \"{track}\"");
                TransitionOutcome::Skipped(direction)
            }
            Err(e) => {
                warn!("Failed to skip {direction} from {track}: {e:#}");
                TransitionOutcome::SkipFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedSettings;
    use crate::rating::Rating;
    use crate::rating_client::{RatingSource, ServiceError};
    use anyhow::Result;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakePlayer {
        queue: Mutex<Vec<TrackRef>>,
        current: Mutex<Option<usize>>,
        skips: Mutex<Vec<Direction>>,
    }

    impl FakePlayer {
        fn with_queue(ids: &[&str]) -> Arc<Self> {
            let player = Self::default();
            *player.queue.lock().unwrap() = ids.iter().map(|id| TrackRef::new(*id)).collect();
            Arc::new(player)
        }

        fn play(&self, index: usize) {
            *self.current.lock().unwrap() = Some(index);
        }

        fn skips(&self) -> Vec<Direction> {
            self.skips.lock().unwrap().clone()
        }
    }

    impl PlaybackController for FakePlayer {
        fn skip_forward(&self) -> Result<()> {
            self.skips.lock().unwrap().push(Direction::Forward);
            Ok(())
        }

        fn skip_backward(&self) -> Result<()> {
            self.skips.lock().unwrap().push(Direction::Backward);
            Ok(())
        }

        fn queue(&self) -> Result<Vec<TrackRef>> {
            Ok(self.queue.lock().unwrap().clone())
        }

        fn now_playing(&self) -> Result<Option<TrackRef>> {
            let current = *self.current.lock().unwrap();
            Ok(current.and_then(|i| self.queue.lock().unwrap().get(i).cloned()))
        }
    }

    /// Serves fixed ratings; optionally moves playback while "on the network"
    #[derive(Default)]
    struct FakeSource {
        ratings: HashMap<String, RatingState>,
        calls: Mutex<usize>,
        fail: bool,
        move_player_to: Option<(Arc<FakePlayer>, usize)>,
    }

    impl RatingSource for FakeSource {
        fn fetch_batch(&self, track_ids: &[String]) -> Result<Vec<Rating>, ServiceError> {
            *self.calls.lock().unwrap() += 1;
            if let Some((player, index)) = &self.move_player_to {
                player.play(*index);
            }
            if self.fail {
                return Err(ServiceError::Status { status: 503, body: String::new() });
            }
            Ok(track_ids
                .iter()
                .filter_map(|id| self.ratings.get(id).map(|s| Rating::new(id.as_str(), *s)))
                .collect())
        }
    }

    fn source(ratings: &[(&str, RatingState)]) -> FakeSource {
        FakeSource {
            ratings: ratings.iter().map(|(id, s)| (id.to_string(), *s)).collect(),
            ..Default::default()
        }
    }

    struct Harness {
        player: Arc<FakePlayer>,
        source: Arc<FakeSource>,
        settings: Arc<SharedSettings>,
        detector: PlaybackTransitionDetector,
    }

    fn harness(player: Arc<FakePlayer>, source: FakeSource) -> Harness {
        let source = Arc::new(source);
        let settings = Arc::new(SharedSettings::default());
        let cache = Arc::new(RatingCache::new(source.clone(), settings.clone()));
        let detector = PlaybackTransitionDetector::new(cache, player.clone(), settings.clone());
        Harness { player, source, settings, detector }
    }

    fn calls(h: &Harness) -> usize {
        *h.source.calls.lock().unwrap()
    }

    const QUEUE: &[&str] = &["a", "b", "c", "d", "e", "f"];

    #[test]
    fn test_position_forward_skip() {
        let player = FakePlayer::with_queue(QUEUE);
        player.play(5);
        let mut h = harness(player, source(&[("f", RatingState::Disliked)]));

        let outcome = h.detector.on_position_changed(2, 5);

        assert_eq!(outcome, TransitionOutcome::Skipped(Direction::Forward));
        assert_eq!(h.player.skips(), vec![Direction::Forward]);
    }

    #[test]
    fn test_position_backward_skip() {
        let player = FakePlayer::with_queue(QUEUE);
        player.play(2);
        let mut h = harness(player, source(&[("c", RatingState::Disliked)]));

        let outcome = h.detector.on_position_changed(5, 2);

        assert_eq!(outcome, TransitionOutcome::Skipped(Direction::Backward));
        assert_eq!(h.player.skips(), vec![Direction::Backward]);
    }

    #[test]
    fn test_no_active_item_skips_lookup() {
        let player = FakePlayer::with_queue(QUEUE);
        let mut h = harness(player, source(&[("a", RatingState::Disliked)]));

        assert_eq!(h.detector.on_position_changed(3, -1), TransitionOutcome::Ignored);
        assert_eq!(calls(&h), 0);
        assert!(h.player.skips().is_empty());
    }

    #[test]
    fn test_only_disliked_triggers_skip() {
        let player = FakePlayer::with_queue(QUEUE);
        let mut h = harness(player, source(&[("a", RatingState::Liked), ("b", RatingState::Disliked)]));

        h.player.play(0);
        assert_eq!(h.detector.on_position_changed(-1, 0), TransitionOutcome::Kept);
        h.player.play(2);
        assert_eq!(h.detector.on_position_changed(0, 2), TransitionOutcome::Kept, "unrated track is kept");
        h.player.play(1);
        assert_eq!(h.detector.on_position_changed(2, 1), TransitionOutcome::Skipped(Direction::Backward));

        assert_eq!(h.player.skips(), vec![Direction::Backward]);
    }

    #[test]
    fn test_skipping_disabled() {
        let player = FakePlayer::with_queue(QUEUE);
        player.play(1);
        let mut h = harness(player, source(&[("b", RatingState::Disliked)]));
        h.settings.update(|s| s.enable_skipping = false);

        assert_eq!(h.detector.on_position_changed(0, 1), TransitionOutcome::Ignored);
        assert_eq!(calls(&h), 0);
    }

    #[test]
    fn test_position_past_queue_end() {
        let player = FakePlayer::with_queue(&["a"]);
        let mut h = harness(player, source(&[]));

        assert_eq!(h.detector.on_position_changed(0, 4), TransitionOutcome::Ignored);
        assert_eq!(calls(&h), 0);
    }

    #[test]
    fn test_repeated_event_does_not_skip_twice() {
        let player = FakePlayer::with_queue(QUEUE);
        player.play(3);
        let mut h = harness(player, source(&[("d", RatingState::Disliked)]));

        assert_eq!(h.detector.on_position_changed(2, 3), TransitionOutcome::Skipped(Direction::Forward));
        assert_eq!(h.detector.on_position_changed(2, 3), TransitionOutcome::Ignored);

        assert_eq!(h.player.skips().len(), 1);
    }

    #[test]
    fn test_returning_to_disliked_track_skips_again() {
        let player = FakePlayer::with_queue(QUEUE);
        let mut h = harness(player, source(&[("d", RatingState::Disliked)]));

        h.player.play(3);
        h.detector.on_position_changed(2, 3);
        h.player.play(4);
        h.detector.on_position_changed(3, 4);
        h.player.play(3);
        h.detector.on_position_changed(4, 3);

        assert_eq!(h.player.skips(), vec![Direction::Forward, Direction::Backward]);
        assert_eq!(calls(&h), 2, "second visit to d is served from cache");
    }

    #[test]
    fn test_identity_first_event_is_forward() {
        let player = FakePlayer::with_queue(QUEUE);
        player.play(3);
        let mut h = harness(player, source(&[("d", RatingState::Disliked)]));

        let outcome = h.detector.on_now_playing_changed(Some(&TrackRef::new("d")));

        assert_eq!(outcome, TransitionOutcome::Skipped(Direction::Forward));
        assert_eq!(h.detector.state().last_known_index, Some(3));
    }

    #[test]
    fn test_identity_backward_and_index_updated_without_skip() {
        let player = FakePlayer::with_queue(QUEUE);
        let mut h = harness(player, source(&[("b", RatingState::Disliked)]));

        h.player.play(3);
        assert_eq!(h.detector.on_now_playing_changed(Some(&TrackRef::new("d"))), TransitionOutcome::Kept);
        assert_eq!(h.detector.state().last_known_index, Some(3));

        h.player.play(1);
        assert_eq!(
            h.detector.on_now_playing_changed(Some(&TrackRef::new("b"))),
            TransitionOutcome::Skipped(Direction::Backward)
        );
        assert_eq!(h.detector.state().last_known_index, Some(1));

        h.player.play(2);
        assert_eq!(h.detector.on_now_playing_changed(Some(&TrackRef::new("c"))), TransitionOutcome::Kept);
        assert_eq!(h.detector.state().last_known_index, Some(2));
    }

    #[test]
    fn test_identity_index_tracked_while_disabled() {
        let player = FakePlayer::with_queue(QUEUE);
        let mut h = harness(player, source(&[]));
        h.settings.update(|s| s.enable_skipping = false);

        h.detector.on_now_playing_changed(Some(&TrackRef::new("e")));

        assert_eq!(h.detector.state().last_known_index, Some(4));
        assert_eq!(calls(&h), 0);
    }

    #[test]
    fn test_identity_null_and_unknown_items() {
        let player = FakePlayer::with_queue(QUEUE);
        let mut h = harness(player, source(&[]));

        assert_eq!(h.detector.on_now_playing_changed(None), TransitionOutcome::Ignored);
        assert_eq!(h.detector.state(), DetectorState::default());

        h.detector.on_now_playing_changed(Some(&TrackRef::new("c")));
        assert_eq!(
            h.detector.on_now_playing_changed(Some(&TrackRef::new("zz"))),
            TransitionOutcome::Ignored
        );
        assert_eq!(h.detector.state().last_known_index, None);
    }

    #[test]
    fn test_lookup_failure_suppresses_skip() {
        let player = FakePlayer::with_queue(QUEUE);
        player.play(1);
        let mut failing = source(&[("b", RatingState::Disliked)]);
        failing.fail = true;
        let mut h = harness(player, failing);

        assert_eq!(h.detector.on_position_changed(0, 1), TransitionOutcome::LookupFailed);
        assert!(h.player.skips().is_empty());
    }

    #[test]
    fn test_late_decision_is_dropped() {
        let player = FakePlayer::with_queue(QUEUE);
        player.play(1);
        let mut racing = source(&[("b", RatingState::Disliked)]);
        racing.move_player_to = Some((player.clone(), 2));
        let mut h = harness(player, racing);

        assert_eq!(h.detector.on_position_changed(0, 1), TransitionOutcome::Superseded);
        assert!(h.player.skips().is_empty());
    }

    #[test]
    fn test_queue_change_warms_cache() {
        let player = FakePlayer::with_queue(QUEUE);
        let mut h = harness(player, source(&[("c", RatingState::Disliked)]));
        let queue: Vec<TrackRef> = QUEUE.iter().map(|id| TrackRef::new(*id)).collect();

        assert_eq!(h.detector.on_queue_changed(&queue), TransitionOutcome::Warmed(6));
        assert_eq!(calls(&h), 1);
        assert!(h.player.skips().is_empty());

        h.player.play(2);
        h.detector.on_position_changed(1, 2);
        assert_eq!(calls(&h), 1, "decision served from warmed cache");
        assert_eq!(h.player.skips(), vec![Direction::Forward]);
    }

    #[test]
    fn test_queue_warmup_respects_settings() {
        let player = FakePlayer::with_queue(QUEUE);
        let h = harness(player, source(&[]));
        let queue = vec![TrackRef::new("a")];

        h.settings.update(|s| s.enable_cache = false);
        assert_eq!(h.detector.on_queue_changed(&queue), TransitionOutcome::Ignored);
        h.settings.update(|s| {
            s.enable_cache = true;
            s.enable_skipping = false;
        });
        assert_eq!(h.detector.on_queue_changed(&queue), TransitionOutcome::Ignored);
        assert_eq!(calls(&h), 0);
    }

    #[test]
    fn test_handle_dispatches_events() {
        let player = FakePlayer::with_queue(QUEUE);
        player.play(0);
        let mut h = harness(player, source(&[("a", RatingState::Disliked)]));

        let outcome = h.detector.handle(QueueTransitionEvent::NowPlaying { item: Some(TrackRef::new("a")) });
        assert_eq!(outcome, TransitionOutcome::Skipped(Direction::Forward));

        let outcome = h.detector.handle(QueueTransitionEvent::Position { old_position: 0, new_position: -1 });
        assert_eq!(outcome, TransitionOutcome::Ignored);
    }
}
