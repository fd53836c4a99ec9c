//! # Skipper - Dislike Skipper for MPD
//!
//! Skips songs you've marked "disliked" in your music service as soon as MPD
//! reaches them.
//!
//! ## Usage
//!
//! ```bash
//! # Store session credentials
//! skipper config set developer_token <token>
//! skipper config set music_user_token <token>
//!
//! # Watch MPD in the background
//! skipper daemon start
//!
//! # Inspect and change ratings
//! skipper ratings 1440818839
//! skipper rate 1440818839 dislike
//! ```

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use log::info;
use skipper::cli::{self, ConfigAction, DaemonAction, RateValue};
use skipper::config::{ConfigSource, SettingsFile};
use skipper::mpd_client::MpdController;
use skipper::rating::RatingState;
use skipper::rating_client::RatingServiceClient;
use skipper::session::RatingSession;
use skipper::transport::HttpTransport;
use skipper::{completion, daemon};
use std::sync::Arc;

const MASKED: &str = "********";

fn open_session() -> Result<RatingSession<HttpTransport>> {
    let settings = Arc::new(SettingsFile::open_default()?);
    let client = RatingServiceClient::new(settings.clone())
        .context("Failed to create rating service client")?;
    let player = Arc::new(MpdController::with_id_format(settings.settings().track_id_format));
    Ok(RatingSession::new(HttpTransport::new()?, Arc::new(client), player, settings))
}

fn write_rating(id: &str, state: Option<RatingState>) -> Result<()> {
    let session = open_session()?;
    match session.write(id, state)? {
        Some(rating) => println!("{}\t{}", rating.track_id, rating.state),
        None => println!("{id}\trating written, refresh failed"),
    }
    Ok(())
}

fn run_daemon_action(action: DaemonAction) -> Result<()> {
    match action {
        DaemonAction::Start => {
            if daemon::is_daemon_running()? {
                eprintln!("Daemon is already running");
                return Ok(());
            }

            match unsafe { libc::fork() } {
                0 => {
                    // Child process - become daemon
                    let mut daemon = daemon::SkipperDaemon::new()?;
                    daemon.start_monitoring()?;
                    std::process::exit(0);
                }
                pid if pid > 0 => {
                    println!("Starting skip daemon...");
                    std::thread::sleep(std::time::Duration::from_millis(500));

                    if daemon::is_daemon_running()? {
                        println!("Daemon started successfully");
                    } else {
                        eprintln!("Failed to start daemon");
                    }
                }
                _ => {
                    eprintln!("Failed to fork process");
                }
            }
        }
        DaemonAction::Stop => {
            daemon::stop_daemon()?;
            println!("Daemon stopped");
        }
        DaemonAction::Status => {
            if daemon::is_daemon_running()? {
                println!("Daemon is running");
            } else {
                println!("Daemon is not running");
            }
        }
        DaemonAction::Run => {
            let mut daemon = daemon::SkipperDaemon::new()?;
            daemon.start_monitoring()?;
        }
    }
    Ok(())
}

fn run_config_action(action: ConfigAction) -> Result<()> {
    let file = SettingsFile::open_default()?;
    match action {
        ConfigAction::Show => {
            let mut settings = file.load()?;
            if settings.developer_token.is_some() {
                settings.developer_token = Some(MASKED.to_string());
            }
            if settings.music_user_token.is_some() {
                settings.music_user_token = Some(MASKED.to_string());
            }
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        ConfigAction::Set { key, value } => {
            file.update(&key, &value)?;
            info!("Updated {key} in {}", file.path().display());
            println!("{key} updated");
        }
        ConfigAction::Path => {
            println!("{}", file.path().display());
        }
    }
    Ok(())
}

/// Main entry point for Skipper.
///
/// Logging is controlled via `RUST_LOG`:
/// - `RUST_LOG=debug skipper daemon run` - Enable debug logging
/// - `RUST_LOG=skipper::detector=debug skipper daemon run` - Skip decisions only
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();

    match args.command {
        cli::Command::Daemon { action } => run_daemon_action(action)?,
        cli::Command::Ratings { ids, refresh } => {
            let session = open_session()?;
            for rating in session.ratings(&ids, refresh)? {
                println!("{}\t{}", rating.track_id, rating.state);
            }
        }
        cli::Command::Rate { id, value } => {
            let state = match value {
                RateValue::Like => RatingState::Liked,
                RateValue::Dislike => RatingState::Disliked,
            };
            write_rating(&id, Some(state))?;
        }
        cli::Command::Unrate { id } => write_rating(&id, None)?,
        cli::Command::Config { action } => run_config_action(action)?,
        cli::Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(&shell), &mut cmd);
        }
    }

    Ok(())
}
