//! Segment assembly
//!
//! Segmented downloads are merged into one playable file by a [`Remuxer`].
//! Two implementations are provided:
//!
//! - [`FfmpegRemuxer`]: runs the external `ffmpeg` binary with the concat demuxer
//! - [`ConcatRemuxer`]: byte-concatenates MPEG-TS segments when ffmpeg is unavailable
//!
//! [`assemble`] is the stage entry point. It passes a single direct-file
//! artifact through untouched and checks that the remuxer left a non-empty
//! output behind.
//!
//! ## Usage
//!
//! ```no_run
//! use anime1_dl::remux::{FfmpegRemuxer, Remuxer};
//! use std::path::{Path, PathBuf};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let remuxer = FfmpegRemuxer::from_path().expect("ffmpeg not found");
//!     let segments = vec![PathBuf::from("segment_00000.ts"), PathBuf::from("segment_00001.ts")];
//!     remuxer.remux(&segments, Path::new("episode.mp4")).await?;
//!     Ok(())
//! }
//! ```

mod concat;
mod ffmpeg;

pub use concat::ConcatRemuxer;
pub use ffmpeg::FfmpegRemuxer;

use crate::config::RemuxConfig;
use crate::error::{Error, Result};
use crate::types::Artifacts;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Merges ordered segment files into one container
#[async_trait]
pub trait Remuxer: Send + Sync {
    /// Merge `inputs`, in the given order, into `output`
    ///
    /// A failure or a missing result is an [`Error::Remux`].
    async fn remux(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;

    /// Extension of the files this remuxer produces
    fn output_extension(&self) -> &'static str {
        "mp4"
    }

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Pick the remuxer described by configuration
///
/// An explicit `ffmpeg_path` wins, then a PATH search when enabled, then the
/// byte concatenation fallback.
pub fn remuxer_from_config(config: &RemuxConfig) -> Arc<dyn Remuxer> {
    let remuxer: Arc<dyn Remuxer> = if let Some(ref ffmpeg_path) = config.ffmpeg_path {
        Arc::new(FfmpegRemuxer::new(ffmpeg_path.clone()))
    } else if config.search_path {
        FfmpegRemuxer::from_path()
            .map(|r| Arc::new(r) as Arc<dyn Remuxer>)
            .unwrap_or_else(|| {
                tracing::warn!("ffmpeg not found in PATH, segmented episodes will be byte-concatenated");
                Arc::new(ConcatRemuxer)
            })
    } else {
        Arc::new(ConcatRemuxer)
    };

    tracing::info!(remuxer = remuxer.name(), "Remuxer initialized");
    remuxer
}

/// Turn downloaded artifacts into one media file inside `temp_dir`
pub async fn assemble(
    remuxer: &dyn Remuxer,
    artifacts: Artifacts,
    temp_dir: &Path,
) -> Result<PathBuf> {
    let segments = match artifacts {
        Artifacts::Single(path) => return Ok(path),
        Artifacts::Segments(segments) => segments,
    };
    if segments.is_empty() {
        return Err(Error::Remux("no segments to assemble".into()));
    }

    let output = temp_dir.join(format!("output.{}", remuxer.output_extension()));
    tracing::debug!(
        remuxer = remuxer.name(),
        segments = segments.len(),
        output = %output.display(),
        "Assembling segments"
    );
    remuxer.remux(&segments, &output).await?;

    match tokio::fs::metadata(&output).await {
        Ok(meta) if meta.len() > 0 => Ok(output),
        Ok(_) => Err(Error::Remux(format!(
            "{} produced an empty file at {}",
            remuxer.name(),
            output.display()
        ))),
        Err(_) => Err(Error::Remux(format!(
            "{} produced no output at {}",
            remuxer.name(),
            output.display()
        ))),
    }
}
