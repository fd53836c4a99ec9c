//! # Command-Line Interface Module
//!
//! This module defines the command-line interface for Skipper using Clap derive
//! macros.
//!
//! ## Commands
//!
//! - `daemon`: Start, stop or inspect the background skip daemon
//! - `ratings`: Look up ratings through the cache
//! - `rate` / `unrate`: Write a rating through the interceptor pipeline
//! - `config`: Show or change settings
//! - `completion`: Generate shell completion scripts
//!
//! ## Examples
//!
//! ```bash
//! skipper daemon start
//! skipper ratings 1440818839 1440818840
//! skipper rate 1440818839 dislike
//! skipper config set cache_duration 15
//! ```

use crate::config::SETTING_KEYS;
use clap::builder::PossibleValuesParser;
use clap::{Parser, Subcommand, ValueEnum};

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Rating values accepted by `skipper rate`
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum RateValue {
    Like,
    Dislike,
}

/// Main application arguments structure.
#[derive(Parser)]
#[command(name = "skipper")]
#[command(about = "Skipper: skip songs you've disliked, automatically")]
#[command(version)]
pub struct Args {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Manage the skip daemon
    ///
    /// The daemon watches MPD and skips every song rated "disliked" as soon as
    /// it becomes the current song, in the direction you were travelling.
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },

    /// Show the rating of one or more tracks
    ///
    /// Ratings are served from the cache while fresh and fetched in a single
    /// batched request otherwise. Tracks without a rating show as "unrated".
    Ratings {
        /// Track ids as known to the rating service
        #[arg(required = true, value_hint = clap::ValueHint::Other)]
        ids: Vec<String>,

        /// Bypass the cache and fetch every id
        #[arg(long)]
        refresh: bool,
    },

    /// Like or dislike a track
    ///
    /// Disliking the song MPD is currently playing skips it immediately when
    /// `skip_song_on_dislike` is on.
    Rate {
        /// Track id
        id: String,

        /// like or dislike
        value: RateValue,
    },

    /// Remove the rating of a track
    Unrate {
        /// Track id
        id: String,
    },

    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    ///
    /// Usage: skipper completion bash > ~/.local/share/bash-completion/completions/skipper
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Daemon management actions
#[derive(Subcommand, Debug)]
pub enum DaemonAction {
    /// Start the skip daemon in the background
    Start,

    /// Stop the running daemon
    Stop,

    /// Check daemon status
    Status,

    /// Run the daemon in the foreground (logs to stderr)
    Run,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the current settings as JSON (tokens are masked)
    Show,

    /// Change one setting
    Set {
        #[arg(value_parser = PossibleValuesParser::new(SETTING_KEYS.iter().copied()))]
        key: String,

        value: String,
    },

    /// Print the settings file location
    Path,
}
