//! Core types for anime1-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::{Error, ErrorKind, Result};

/// Unique identifier for a download task within one run
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a listing URL points at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingKind {
    /// A season index page (`/category/...`), possibly paginated
    SeasonIndex,
    /// A single episode page (`/<numeric id>`)
    Episode,
}

/// A validated input URL: either one episode page or a season index
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListingUrl {
    url: Url,
    kind: ListingKind,
}

impl ListingUrl {
    /// Validate an input string and classify it by path shape
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input.trim())
            .map_err(|e| Error::Parse(format!("malformed listing URL '{}': {}", input, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Parse(format!(
                "unsupported scheme '{}' in listing URL {}",
                url.scheme(),
                url
            )));
        }
        let kind = Self::kind_of(&url)
            .ok_or_else(|| Error::Parse(format!("unsupported listing URL: {}", url)))?;
        Ok(Self { url, kind })
    }

    fn kind_of(url: &Url) -> Option<ListingKind> {
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        match segments.as_slice() {
            ["category", _, ..] => Some(ListingKind::SeasonIndex),
            [id] if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) => {
                Some(ListingKind::Episode)
            }
            _ => None,
        }
    }

    /// The parsed URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Index or single episode
    pub fn kind(&self) -> ListingKind {
        self.kind
    }
}

impl std::fmt::Display for ListingUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// A raw media reference as handed out by the player API
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSource {
    /// Absolute media or manifest URL
    pub url: Url,
    /// MIME type announced by the player, when present
    pub mime_type: Option<String>,
    /// `Cookie` header value required by the media host
    pub cookie: Option<String>,
}

/// Resolved metadata plus source references for one downloadable episode
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeDescriptor {
    /// Episode page the descriptor was resolved from
    pub page_url: Url,
    /// Show title with the season label removed
    pub show_title: String,
    /// Season label found in the title, if any
    pub season_hint: Option<String>,
    /// Episode label (zero-padded when numeric)
    pub episode_label: String,
    /// One or more candidate sources, in player order (never empty)
    pub sources: Vec<RawSource>,
}

/// A classified media source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRef {
    /// A single media file
    DirectFile {
        /// Media URL
        url: Url,
    },
    /// Ordered segments of a stream; order is playback order
    SegmentedStream {
        /// Segment URLs in manifest order (never empty)
        segments: Vec<Url>,
    },
}

impl SourceRef {
    /// Container extension for the assembled file
    pub fn output_extension(&self) -> String {
        match self {
            SourceRef::DirectFile { url } => url_extension(url)
                .filter(|ext| !ext.is_empty())
                .unwrap_or_else(|| "mp4".to_string()),
            SourceRef::SegmentedStream { .. } => "mp4".to_string(),
        }
    }
}

/// Lower-cased extension of the last path segment of a URL
pub fn url_extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// Request details replayed on every media fetch of one source
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MediaAccess {
    /// `Cookie` header value
    pub cookie: Option<String>,
}

impl From<&RawSource> for MediaAccess {
    fn from(raw: &RawSource) -> Self {
        Self {
            cookie: raw.cookie.clone(),
        }
    }
}

/// Local files produced by the download executor
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Artifacts {
    /// One complete media file
    Single(PathBuf),
    /// Segment files in playback order
    Segments(Vec<PathBuf>),
}

/// Pipeline stage a task was in when it finished
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Listing or episode page resolution
    Resolve,
    /// Source classification and manifest resolution
    Classify,
    /// Media download
    Download,
    /// Segment assembly
    Remux,
    /// Naming and final move
    Place,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Resolve => "Resolve",
            Stage::Classify => "Classify",
            Stage::Download => "Download",
            Stage::Remux => "Remux",
            Stage::Place => "Place",
        };
        f.write_str(name)
    }
}

/// Terminal result of a download task; set exactly once
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The episode is at its final path
    Success {
        /// Final location of the episode
        final_path: PathBuf,
    },
    /// The task stopped at `stage`
    Failure {
        /// Stage the task failed in
        stage: Stage,
        /// Coarse error kind
        kind: ErrorKind,
        /// Human-readable reason
        reason: String,
    },
}

impl Outcome {
    /// Build a failure outcome from an error
    pub fn failure(stage: Stage, error: &Error) -> Self {
        Outcome::Failure {
            stage,
            kind: error.kind(),
            reason: error.to_string(),
        }
    }

    /// Whether the task succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// Accounting entry for one task
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskReport {
    /// Task identifier
    pub id: TaskId,
    /// Episode page URL, or the listing URL when resolution failed
    pub source_url: String,
    /// Show title, when resolution got that far
    pub show_title: Option<String>,
    /// Episode label, when resolution got that far
    pub episode_label: Option<String>,
    /// Network retries spent by this task
    pub attempts: u32,
    /// Terminal outcome
    pub outcome: Outcome,
}

impl TaskReport {
    /// Short human label: `Show 01` or the source URL
    pub fn display_name(&self) -> String {
        match (&self.show_title, &self.episode_label) {
            (Some(show), Some(label)) => format!("{} {}", show, label),
            _ => urlencoding::decode(&self.source_url)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| self.source_url.clone()),
        }
    }
}

/// Aggregated outcomes of one run, in completion order
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
    /// One entry per task
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    /// Tasks that ended in success
    pub fn successes(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks.iter().filter(|t| t.outcome.is_success())
    }

    /// Tasks that ended in failure
    pub fn failures(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks.iter().filter(|t| !t.outcome.is_success())
    }

    /// Number of successful tasks
    pub fn success_count(&self) -> usize {
        self.successes().count()
    }

    /// Number of failed tasks
    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }
}

/// Event emitted while a run progresses
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A listing URL finished enumerating
    ListingResolved {
        /// The listing URL
        url: String,
        /// Episodes yielded
        episodes: usize,
    },

    /// An episode was dispatched to the worker pool
    TaskQueued {
        /// Task ID
        id: TaskId,
        /// `Show label`
        name: String,
    },

    /// A worker picked the task up
    TaskStarted {
        /// Task ID
        id: TaskId,
    },

    /// Direct download progress
    Downloading {
        /// Task ID
        id: TaskId,
        /// Bytes written so far
        downloaded_bytes: u64,
        /// Declared size, when known
        #[serde(skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
    },

    /// A segment of a segmented stream finished
    SegmentFetched {
        /// Task ID
        id: TaskId,
        /// Segments completed so far
        completed: usize,
        /// Segments in the stream
        total: usize,
    },

    /// Segment assembly started
    Remuxing {
        /// Task ID
        id: TaskId,
        /// Segment count
        segments: usize,
    },

    /// Task finished successfully
    TaskCompleted {
        /// Task ID
        id: TaskId,
        /// Final path
        path: PathBuf,
    },

    /// Task failed
    TaskFailed {
        /// Task ID
        id: TaskId,
        /// Stage the failure happened in
        stage: Stage,
        /// Error message
        error: String,
    },

    /// Every dispatched task reached a terminal outcome
    RunComplete {
        /// Successful tasks
        succeeded: usize,
        /// Failed tasks
        failed: usize,
    },
}
