//! ffmpeg-based remuxer using the concat demuxer

use super::Remuxer;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Name of the segment list written next to the output
const LIST_FILE: &str = "concat.txt";

/// Remuxer that runs the external `ffmpeg` binary
///
/// Segments are listed in a concat demuxer file and copied into the output
/// container without re-encoding:
///
/// `ffmpeg -y -loglevel error -f concat -safe 0 -i concat.txt -c copy output.mp4`
///
/// # Examples
///
/// ```no_run
/// use anime1_dl::remux::{FfmpegRemuxer, Remuxer};
/// use std::path::PathBuf;
///
/// // Create with explicit path
/// let remuxer = FfmpegRemuxer::new(PathBuf::from("/usr/bin/ffmpeg"));
///
/// // Or auto-discover from PATH
/// let remuxer = FfmpegRemuxer::from_path().expect("ffmpeg not found in PATH");
/// assert_eq!(remuxer.name(), "ffmpeg");
/// ```
pub struct FfmpegRemuxer {
    binary_path: PathBuf,
}

impl FfmpegRemuxer {
    /// Create a remuxer with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find ffmpeg in PATH
    pub fn from_path() -> Option<Self> {
        which::which("ffmpeg").ok().map(Self::new)
    }

    /// The binary this remuxer runs
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }
}

/// Concat demuxer list for `inputs`, one `file '<path>'` line each
///
/// Paths are made absolute since ffmpeg resolves relative entries against
/// the list file's directory.
fn concat_list(inputs: &[PathBuf]) -> Result<String> {
    let mut list = String::new();
    for input in inputs {
        let absolute = std::path::absolute(input).map_err(|e| Error::fs(input, e))?;
        list.push_str("file '");
        list.push_str(&escape_single_quotes(&absolute.to_string_lossy()));
        list.push_str("'\n");
    }
    Ok(list)
}

/// `it's` becomes `it'\''s` inside a single-quoted concat entry
fn escape_single_quotes(path: &str) -> String {
    path.replace('\'', r"'\''")
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    async fn remux(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let list_path = output
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(LIST_FILE);
        tokio::fs::write(&list_path, concat_list(inputs)?)
            .await
            .map_err(|e| Error::fs(&list_path, e))?;

        let result = Command::new(&self.binary_path)
            .args(["-y", "-loglevel", "error", "-f", "concat", "-safe", "0", "-i"])
            .arg(&list_path)
            .args(["-c", "copy"])
            .arg(output)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Remux(format!("failed to execute ffmpeg: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let detail = stderr.lines().last().unwrap_or("").trim();
            return Err(Error::Remux(format!(
                "ffmpeg exited with {}: {}",
                result.status, detail
            )));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}
