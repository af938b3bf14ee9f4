//! # anime1-dl
//!
//! Concurrent episode downloader for anime1 listing pages.
//!
//! A run takes a set of listing URLs (single episode pages or whole season
//! indexes), resolves them into episodes, downloads every episode on a
//! bounded worker pool and files the results as `root/show/season/label.ext`.
//!
//! ## Pipeline
//!
//! - **Resolve** - listing page to episode descriptors, yielded lazily
//! - **Classify** - direct file or HLS segment list
//! - **Download** - streamed to a per-task temporary directory, with retry
//! - **Remux** - ordered segments merged into one container
//! - **Place** - moved to its final, deterministic path
//!
//! A failure anywhere in one episode's pipeline is recorded in the
//! [`RunReport`] and never affects other episodes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use anime1_dl::{AnimeDownloader, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("config.json".as_ref())?;
//!     let downloader = AnimeDownloader::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = downloader
//!         .run(vec!["https://anime1.me/12345".to_string()])
//!         .await?;
//!     for failed in report.failures() {
//!         println!("failed: {}", failed.display_name());
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Source classification and HLS manifest handling
pub mod classifier;
/// Configuration types
pub mod config;
/// Worker pool and per-episode pipeline
pub mod coordinator;
/// Error types
pub mod error;
/// Direct and segmented media downloads
pub mod executor;
/// Shared HTTP client
pub mod http;
/// Listing URL intake
pub mod input;
/// Destination paths and final moves
pub mod placement;
/// Segment assembly
pub mod remux;
/// Listing and episode page resolution
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types
pub mod types;
/// Filename and path helpers
pub mod utils;

// Re-export commonly used types
pub use config::{Config, FileCollisionAction, NamingScheme, SeasonTable};
pub use coordinator::AnimeDownloader;
pub use error::{Error, ErrorKind, FetchError, Result};
pub use remux::{ConcatRemuxer, FfmpegRemuxer, Remuxer};
pub use types::{
    EpisodeDescriptor, Event, ListingKind, ListingUrl, Outcome, RunReport, SourceRef, Stage,
    TaskId, TaskReport,
};
