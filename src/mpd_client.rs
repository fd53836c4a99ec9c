//! # MPD Playback Controller
//!
//! Drives Music Player Daemon through the `mpc` command-line client and
//! exposes it as a [`PlaybackController`].
//!
//! ## Track Identity
//!
//! The rating service identifies songs by catalog id; MPD identifies them by
//! file. The id for a queue item is whatever the configured `mpc` format
//! produces, `%file%` by default. Libraries that store the catalog id in a
//! tag can point the format at that tag instead (for example `%comment%`).
//!
//! Queue and status queries request one tab-separated line per song:
//!
//! ```text
//! <id>\t<artist>\t<title>
//! ```
//!
//! ## Status Output
//!
//! ```text
//! artist/album/song.mp3	Artist	Title
//! [playing] #5/20   1:23/3:45 (37%)
//! volume: 80%   repeat: on    random: off   single: off   consume: off
//! ```
//!
//! Parses to position 4 (zero-based), elapsed 83.0, duration 225.0. When
//! playback is stopped `mpc` prints only the options line and the position is
//! reported as -1.

use crate::player::{PlaybackController, TrackRef};
use anyhow::{bail, Context, Result};
use log::debug;
use std::process::Command;

pub const DEFAULT_ID_FORMAT: &str = "%file%";

const FIELD_SEPARATOR: char = '\t';

/// Verifies MPD and mpc availability.
///
/// Runs `mpc version`, which only succeeds when mpc is installed and MPD is
/// accepting connections.
pub fn check_connection() -> Result<()> {
    let output = Command::new("mpc")
        .arg("version")
        .output()
        .context("Failed to execute mpc command. Please install mpc (MPD client)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "Failed to connect to MPD. Make sure MPD is running on localhost:6600.\nError: {}",
            stderr.trim()
        );
    }

    Ok(())
}

/// Readiness check for [`crate::daemon::wait_for_host`]
pub fn is_ready() -> bool {
    check_connection().is_ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Playing,
    Paused,
    Stopped,
}

/// Snapshot of `mpc status`
#[derive(Debug, Clone, PartialEq)]
pub struct MpdStatus {
    pub current: Option<TrackRef>,
    /// Zero-based queue position, -1 when nothing is active
    pub position: i64,
    pub elapsed: f64,
    /// None for streams or unknown
    pub duration: Option<f64>,
    pub state: PlayerState,
}

impl MpdStatus {
    pub fn stopped() -> Self {
        Self {
            current: None,
            position: -1,
            elapsed: 0.0,
            duration: None,
            state: PlayerState::Stopped,
        }
    }
}

/// Parse `mpc status -f <format>` output
pub fn parse_status(text: &str) -> MpdStatus {
    let lines: Vec<&str> = text.lines().collect();
    let Some(state_index) = lines.iter().position(|line| line.trim_start().starts_with('[')) else {
        return MpdStatus::stopped();
    };

    let mut status = MpdStatus::stopped();
    if state_index > 0 {
        status.current = parse_track_line(lines[state_index - 1]);
    }

    let state_line = lines[state_index];
    status.state = if state_line.contains("[playing]") {
        PlayerState::Playing
    } else if state_line.contains("[paused]") {
        PlayerState::Paused
    } else {
        PlayerState::Stopped
    };

    for token in state_line.split_whitespace() {
        if let Some(position) = token.strip_prefix('#') {
            status.position = parse_position(position).unwrap_or(-1);
        } else if let Some((elapsed, duration)) = token.split_once('/') {
            if let Ok(secs) = parse_time(elapsed) {
                status.elapsed = secs;
            }
            status.duration = parse_time(duration).ok();
        }
    }

    status
}

/// `5/20` -> 4
fn parse_position(token: &str) -> Option<i64> {
    let (current, _) = token.split_once('/')?;
    let one_based: i64 = current.parse().ok()?;
    (one_based > 0).then(|| one_based - 1)
}

/// Parse time string in MM:SS format to seconds
fn parse_time(time_str: &str) -> Result<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    match parts.len() {
        2 => {
            let minutes: f64 = parts[0].parse()?;
            let seconds: f64 = parts[1].parse()?;
            Ok(minutes * 60.0 + seconds)
        }
        _ => bail!("Invalid time format: {}", time_str),
    }
}

fn parse_track_line(line: &str) -> Option<TrackRef> {
    let mut fields = line.split(FIELD_SEPARATOR);
    let id = fields.next()?.trim();
    if id.is_empty() {
        return None;
    }
    let artist = fields.next().unwrap_or_default().trim();
    let title = fields.next().unwrap_or_default().trim();
    Some(TrackRef::with_names(id, artist, title))
}

/// Parse `mpc playlist -f <format>` output, one song per line in queue order
pub fn parse_playlist(text: &str) -> Vec<TrackRef> {
    text.lines().filter_map(parse_track_line).collect()
}

/// [`PlaybackController`] for the local MPD instance
#[derive(Debug, Clone)]
pub struct MpdController {
    id_format: String,
}

impl Default for MpdController {
    fn default() -> Self {
        Self::new()
    }
}

impl MpdController {
    pub fn new() -> Self {
        Self::with_id_format(DEFAULT_ID_FORMAT)
    }

    pub fn with_id_format(id_format: impl Into<String>) -> Self {
        Self {
            id_format: id_format.into(),
        }
    }

    fn line_format(&self) -> String {
        format!("{0}{1}%artist%{1}%title%", self.id_format, FIELD_SEPARATOR)
    }

    fn mpc(&self, args: &[&str]) -> Result<String> {
        debug!("mpc {}", args.join(" "));
        let output = Command::new("mpc")
            .args(args)
            .output()
            .with_context(|| format!("Failed to execute mpc {}", args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("mpc {} failed: {}", args.join(" "), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

}

/// A player whose full status (position and current song) can be read
pub trait StatusSource: PlaybackController {
    fn status(&self) -> Result<MpdStatus>;
}

impl StatusSource for MpdController {
    fn status(&self) -> Result<MpdStatus> {
        let format = self.line_format();
        let text = self.mpc(&["status", "-f", &format])
            .context("Failed to get MPD status")?;
        Ok(parse_status(&text))
    }
}

impl PlaybackController for MpdController {
    fn skip_forward(&self) -> Result<()> {
        self.mpc(&["next"])?;
        Ok(())
    }

    fn skip_backward(&self) -> Result<()> {
        self.mpc(&["prev"])?;
        Ok(())
    }

    fn queue(&self) -> Result<Vec<TrackRef>> {
        let format = self.line_format();
        let text = self.mpc(&["playlist", "-f", &format])?;
        Ok(parse_playlist(&text))
    }

    fn now_playing(&self) -> Result<Option<TrackRef>> {
        let format = self.line_format();
        let text = self.mpc(&["current", "-f", &format])?;
        Ok(text.lines().next().and_then(parse_track_line))
    }
}
