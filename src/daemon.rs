//! # Skipper Daemon
//!
//! Background process that watches MPD and skips disliked songs as they come
//! up.
//!
//! ## Architecture
//!
//! The daemon blocks on `mpc idle player playlist` instead of polling. Each
//! wake-up is turned into a [`QueueTransitionEvent`] and handed to the
//! [`PlaybackTransitionDetector`]:
//!
//! - **player**: re-read `mpc status`; a changed queue position becomes a
//!   position event, a changed current song becomes a now-playing event.
//!   Which one is delivered depends on the `detection_mode` setting.
//! - **playlist**: the new queue is sent for cache warm-up.
//!
//! Every `mpc idle` run is a fresh connection, so player changes made between
//! runs are never reported. That includes the daemon's own skips. After each
//! wake-up the status is therefore re-read until it stops changing, so a run
//! of disliked songs is skipped one after another.
//!
//! Before anything is registered the daemon waits for MPD to answer
//! ([`wait_for_host`]). Errors inside one iteration are logged and the loop
//! carries on after a short pause; losing the MPD connection ends the daemon.

use crate::config::{self, ConfigSource, DetectionMode, SettingsFile};
use crate::detector::{DetectorState, PlaybackTransitionDetector, QueueTransitionEvent, TransitionOutcome};
use crate::mpd_client::{self, MpdController, MpdStatus, StatusSource};
use crate::player::{PlaybackController, TrackRef};
use crate::rating_cache::RatingCache;
use crate::rating_client::RatingServiceClient;
use anyhow::{bail, Context, Result};
use log::{debug, error, info, warn};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const PID_FILE_NAME: &str = "skipper-daemon.pid";

/// How often [`wait_for_host`] checks the player
pub const HOST_POLL_INTERVAL: Duration = Duration::from_millis(100);

const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Status re-reads after one wake-up before going back to idle
const MAX_FOLLOW_UPS: usize = 64;

/// Block until `ready` reports the host up, checking every `interval`.
///
/// Returns the number of failed checks before the host came up.
pub fn wait_for_host(ready: impl Fn() -> bool, interval: Duration) -> u32 {
    let mut attempts = 0;
    while !ready() {
        if attempts == 0 {
            info!("Waiting for MPD to become available");
        }
        attempts += 1;
        thread::sleep(interval);
    }
    debug!("Host ready after {attempts} failed checks");
    attempts
}

/// Turns successive status snapshots into transition events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTracker {
    position: i64,
    current: Option<TrackRef>,
}

impl Default for TransitionTracker {
    fn default() -> Self {
        Self {
            position: -1,
            current: None,
        }
    }
}

impl TransitionTracker {
    /// Start from what is playing right now so it isn't treated as a new transition
    pub fn synced(status: &MpdStatus) -> Self {
        Self {
            position: status.position,
            current: status.current.clone(),
        }
    }

    /// Event for a `player` wake-up, `None` if nothing relevant changed
    ///
    /// Both position and current song are tracked regardless of mode so the
    /// mode can be switched while the daemon runs.
    pub fn player_event(&mut self, status: &MpdStatus, mode: DetectionMode) -> Option<QueueTransitionEvent> {
        let old_position = std::mem::replace(&mut self.position, status.position);
        let old_id = self.current.as_ref().map(|track| track.id.clone());
        self.current = status.current.clone();
        let new_id = status.current.as_ref().map(|track| track.id.clone());

        match mode {
            DetectionMode::Position if old_position != status.position => Some(QueueTransitionEvent::Position {
                old_position,
                new_position: status.position,
            }),
            DetectionMode::Identity if old_id != new_id => Some(QueueTransitionEvent::NowPlaying {
                item: status.current.clone(),
            }),
            _ => None,
        }
    }

    /// Queue edits move positions without a transition
    pub fn resync_position(&mut self, status: &MpdStatus) {
        self.position = status.position;
        self.current = status.current.clone();
    }
}

/// Skip daemon bound to the local MPD instance
pub struct SkipperDaemon {
    detector: PlaybackTransitionDetector,
    player: Arc<dyn StatusSource>,
    config: Arc<dyn ConfigSource>,
    tracker: TransitionTracker,
    pid_file: PathBuf,
}

impl SkipperDaemon {
    /// Build the daemon from the settings file in the data directory
    pub fn new() -> Result<Self> {
        let settings = Arc::new(SettingsFile::open_default()?);
        let pid_file = config::get_data_dir()?.join(PID_FILE_NAME);
        Self::with_settings(settings, pid_file)
    }

    pub fn with_settings(settings: Arc<SettingsFile>, pid_file: PathBuf) -> Result<Self> {
        let id_format = settings.settings().track_id_format;
        let player = Arc::new(MpdController::with_id_format(id_format));
        let client = RatingServiceClient::new(settings.clone())
            .context("Failed to create rating service client")?;
        let cache = Arc::new(RatingCache::new(Arc::new(client), settings.clone()));
        Ok(Self::from_parts(player, cache, settings, pid_file))
    }

    /// Assemble a daemon around any player that can report its status
    pub fn from_parts<P>(
        player: Arc<P>,
        cache: Arc<RatingCache>,
        config: Arc<dyn ConfigSource>,
        pid_file: PathBuf,
    ) -> Self
    where
        P: StatusSource + 'static,
    {
        let detector = PlaybackTransitionDetector::new(cache, player.clone(), config.clone());
        Self {
            detector,
            player,
            config,
            tracker: TransitionTracker::default(),
            pid_file,
        }
    }

    pub fn detector_state(&self) -> DetectorState {
        self.detector.state()
    }

    /// Run until the MPD connection is lost.
    pub fn start_monitoring(&mut self) -> Result<()> {
        info!("Starting skip daemon");

        let pid = std::process::id();
        fs::write(&self.pid_file, pid.to_string())
            .with_context(|| format!("Failed to write PID file {}", self.pid_file.display()))?;
        info!("Daemon started with PID {pid}");

        wait_for_host(mpd_client::is_ready, HOST_POLL_INTERVAL);
        self.sync_current_state()?;

        loop {
            match self.wait_for_events() {
                Ok(()) => continue,
                Err(e) => {
                    error!("Error in daemon event loop: {e:#}");
                    if format!("{e:#}").to_lowercase().contains("connection refused") {
                        error!("MPD connection lost, exiting daemon");
                        break;
                    }
                    thread::sleep(RETRY_PAUSE);
                }
            }
        }

        let _ = fs::remove_file(&self.pid_file);
        Ok(())
    }

    fn wait_for_events(&mut self) -> Result<()> {
        debug!("Waiting for MPD events...");

        let mut child = Command::new("mpc")
            .args(["idle", "player", "playlist"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to start mpc idle")?;

        let stdout = child.stdout.take()
            .context("Failed to capture mpc idle output")?;

        let mut subsystems = Vec::new();
        for line in BufReader::new(stdout).lines() {
            subsystems.push(line.context("Failed to read mpc idle output")?);
        }

        let output = child.wait_with_output().context("mpc idle process failed")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("mpc idle failed: {}", stderr.trim());
        }

        self.handle_wakeup(&subsystems)?;
        Ok(())
    }

    /// Handle the subsystems reported by one `mpc idle` run.
    ///
    /// Afterwards the player status is re-read until it stops changing, so
    /// transitions caused by our own skips, or made while a rating was being
    /// fetched, are evaluated before the next idle. Returns every outcome in
    /// the order it happened.
    pub fn handle_wakeup<S: AsRef<str>>(&mut self, subsystems: &[S]) -> Result<Vec<TransitionOutcome>> {
        let mut outcomes = Vec::new();
        for subsystem in subsystems {
            if let Some(outcome) = self.handle_subsystem(subsystem.as_ref().trim())? {
                outcomes.push(outcome);
            }
        }

        for _ in 0..MAX_FOLLOW_UPS {
            match self.next_player_event()? {
                Some(event) => {
                    let outcome = self.detector.handle(event);
                    debug!("Follow-up transition handled: {outcome:?}");
                    outcomes.push(outcome);
                }
                None => return Ok(outcomes),
            }
        }

        warn!("Player still moving after {MAX_FOLLOW_UPS} follow-up checks, going back to idle");
        Ok(outcomes)
    }

    fn next_player_event(&mut self) -> Result<Option<QueueTransitionEvent>> {
        let status = self.player.status()?;
        let mode = self.config.settings().detection_mode;
        Ok(self.tracker.player_event(&status, mode))
    }

    fn handle_subsystem(&mut self, subsystem: &str) -> Result<Option<TransitionOutcome>> {
        let outcome = match subsystem {
            "player" => match self.next_player_event()? {
                Some(event) => self.detector.handle(event),
                None => return Ok(None),
            },
            "playlist" => {
                let queue = self.player.queue()?;
                let status = self.player.status()?;
                self.tracker.resync_position(&status);
                self.detector.handle(QueueTransitionEvent::QueueChanged { queue })
            }
            other => {
                debug!("Ignoring MPD subsystem {other}");
                return Ok(None);
            }
        };

        debug!("{subsystem} event handled: {outcome:?}");
        Ok(Some(outcome))
    }

    /// Align with the player's current state and warm the cache for the queue
    pub fn sync_current_state(&mut self) -> Result<()> {
        let status = self.player.status()?;
        self.tracker = TransitionTracker::synced(&status);

        if let Some(current) = &status.current {
            let elapsed = status.elapsed;
            info!("Synced with currently playing song: {current} ({elapsed:.1}s elapsed)");
        }

        let queue = self.player.queue()?;
        if let TransitionOutcome::Warmed(count) = self.detector.on_queue_changed(&queue) {
            info!("Pre-fetched {count} ratings for the current queue");
        }
        Ok(())
    }
}

fn read_pid(pid_file: &Path) -> Result<u32> {
    let pid_str = fs::read_to_string(pid_file)?;
    pid_str.trim().parse().context("Invalid PID in daemon file")
}

fn pid_file_path() -> Result<PathBuf> {
    Ok(config::get_data_dir()?.join(PID_FILE_NAME))
}

/// Check if the daemon is running
pub fn is_daemon_running() -> Result<bool> {
    is_running_at(&pid_file_path()?)
}

fn is_running_at(pid_file: &Path) -> Result<bool> {
    if !pid_file.exists() {
        return Ok(false);
    }

    let pid = read_pid(pid_file)?;

    // Signal 0 only checks that the process exists
    let alive = unsafe { libc::kill(pid as libc::pid_t, 0) } == 0;
    Ok(alive)
}

/// Stop the running daemon
pub fn stop_daemon() -> Result<()> {
    let pid_file = pid_file_path()?;

    if !pid_file.exists() {
        bail!("Daemon is not running");
    }

    let pid = read_pid(&pid_file)?;

    if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err).context("Failed to stop daemon");
        }
        info!("Daemon process {pid} was already gone");
    }

    fs::remove_file(&pid_file)?;

    info!("Daemon stopped (PID: {pid})");
    Ok(())
}
