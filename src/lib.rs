//! Automatic skipping of disliked songs for MPD.
//!
//! Skipper watches the play queue and, whenever a song the listener has rated
//! "disliked" becomes current, skips it in the direction they were travelling.
//! Ratings live in a remote rating service and are cached locally.
//!
//! Core modules:
//! - [`rating_cache`] - TTL cache in front of the rating service
//! - [`detector`] - Turns queue transitions into skip decisions
//! - [`interceptor`] - Middleware that reacts to outbound rating writes
//! - [`daemon`] - MPD event loop driving the detector
//! - [`mpd_client`] - MPD integration via `mpc`
//!
//! ### Supporting Modules
//!
//! - [`rating`] / [`rating_client`] - Rating types and the HTTP client
//! - [`player`] - Queue items and the playback control surface
//! - [`transport`] / [`scheduler`] / [`clock`] - Request pipeline, delayed work, time
//! - [`session`] - Cache and write pipeline for one-shot commands
//! - [`config`] - Settings and data directory management
//! - [`cli`] / [`completion`] - Command-line interface and shell completions
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use skipper::config::SharedSettings;
//! use skipper::detector::PlaybackTransitionDetector;
//! use skipper::mpd_client::MpdController;
//! use skipper::rating_cache::RatingCache;
//! use skipper::rating_client::RatingServiceClient;
//! use std::sync::Arc;
//!
//! let settings = Arc::new(SharedSettings::default());
//! let client = RatingServiceClient::new(settings.clone())?;
//! let cache = Arc::new(RatingCache::new(Arc::new(client), settings.clone()));
//! let mut detector = PlaybackTransitionDetector::new(cache, Arc::new(MpdController::new()), settings);
//!
//! // MPD moved from queue position 2 to 3
//! let outcome = detector.on_position_changed(2, 3);
//! println!("{outcome:?}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Error Handling
//!
//! The rating client reports typed [`rating_client::ServiceError`]s; everything
//! above it uses `anyhow::Result`. Event handlers never fail: a lookup error
//! suppresses the decision and is logged.

pub mod cli;
pub mod clock;
pub mod completion;
pub mod config;
pub mod daemon;
pub mod detector;
pub mod interceptor;
pub mod mpd_client;
pub mod player;
pub mod rating;
pub mod rating_cache;
pub mod rating_client;
pub mod scheduler;
pub mod session;
pub mod transport;
