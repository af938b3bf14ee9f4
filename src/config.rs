//! Configuration types for anime1-dl
//!
//! The configuration is an immutable value built once at start-up and shared
//! (behind an `Arc`) with every component that needs it. It is read from a
//! JSON document; every field has a default so an empty object is valid.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Mapping from a human-readable season label (e.g. `第二季`) to its
/// two-digit code (e.g. `02`)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeasonTable(BTreeMap<String, String>);

impl SeasonTable {
    /// Empty table (every episode resolves to the default code)
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add or replace a label
    pub fn insert(&mut self, label: impl Into<String>, code: impl Into<String>) {
        self.0.insert(label.into(), code.into());
    }

    /// Look up the code for an exact label
    pub fn code_for(&self, label: &str) -> Option<&str> {
        self.0.get(label).map(String::as_str)
    }

    /// Find the longest label contained in `text`
    ///
    /// Longest-first keeps matching deterministic when one label is a
    /// substring of another (`第二季` inside `第二季後篇`).
    pub fn find_label_in(&self, text: &str) -> Option<&str> {
        self.0
            .keys()
            .filter(|label| !label.is_empty() && text.contains(label.as_str()))
            .max_by_key(|label| label.chars().count())
            .map(String::as_str)
    }

    /// Iterate over `(label, code)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of labels in the table
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for SeasonTable {
    fn default() -> Self {
        const LABELS: [&str; 10] = [
            "第一季",
            "第二季",
            "第三季",
            "第四季",
            "第五季",
            "第六季",
            "第七季",
            "第八季",
            "第九季",
            "第十季",
        ];
        LABELS
            .iter()
            .enumerate()
            .map(|(i, label)| (label.to_string(), format!("{:02}", i + 1)))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SeasonTable {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Output layout under the download root
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingScheme {
    /// `root/<show>/<season code>/<episode>.<ext>` (default)
    #[default]
    Flat,
    /// `root/<show>/Season <n>/<show> - S<code>E<episode>.<ext>`
    Library,
}

/// What to do when the destination file already exists
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCollisionAction {
    /// Replace the existing file (last writer wins, default)
    #[default]
    Overwrite,
    /// Fail the task before downloading anything
    Skip,
    /// Append (1), (2), etc. to the filename
    Rename,
}

/// Download behaviour: directories, concurrency and placement
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Base directory for finished episodes (default: "./downloads")
    #[serde(default = "default_download_root")]
    pub download_root: PathBuf,

    /// Directory for in-progress files (default: `<download_root>/.tmp`)
    ///
    /// Keeping it on the same filesystem as the download root makes the final
    /// move a plain rename.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Run several episodes in parallel (default: false)
    #[serde(default)]
    pub use_multithreading: bool,

    /// Worker pool size when multithreading is enabled (default: 4)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Segment fetches in flight per segmented episode (default: 8)
    #[serde(default = "default_segment_concurrency")]
    pub segment_concurrency: usize,

    /// Smallest acceptable finished file in bytes (default: 1 MiB, 0 disables)
    ///
    /// Anything smaller is treated as an error page or stub served with a
    /// success status and fails the task.
    #[serde(default = "default_min_file_size")]
    pub min_file_size: u64,

    /// Output layout
    #[serde(default)]
    pub naming: NamingScheme,

    /// File collision handling
    #[serde(default)]
    pub file_collision: FileCollisionAction,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_root: default_download_root(),
            temp_dir: None,
            use_multithreading: false,
            max_workers: default_max_workers(),
            segment_concurrency: default_segment_concurrency(),
            min_file_size: default_min_file_size(),
            naming: NamingScheme::default(),
            file_collision: FileCollisionAction::default(),
        }
    }
}

/// HTTP behaviour: headers, timeouts and the player API endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Headers sent with every request
    #[serde(default = "default_headers")]
    pub headers: BTreeMap<String, String>,

    /// Timeout for pages, API calls and manifests, and the longest a media
    /// body may stall between reads (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Connection establishment timeout (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Player API endpoint that turns a `data-apireq` payload into sources
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            headers: default_headers(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            api_endpoint: default_api_endpoint(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// External remux tool settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemuxConfig {
    /// Path to the ffmpeg executable (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Whether to search PATH for ffmpeg if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for RemuxConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            search_path: true,
        }
    }
}

/// Main configuration
///
/// Download and HTTP settings are flattened so the JSON document stays a
/// single flat object apart from `retry`, `remux` and `seasons`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Directories, concurrency and placement
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Request headers, timeouts and API endpoint
    #[serde(flatten)]
    pub http: HttpConfig,

    /// Retry policy for every network operation
    #[serde(default)]
    pub retry: RetryConfig,

    /// Remux tool discovery
    #[serde(default)]
    pub remux: RemuxConfig,

    /// Season label to code table
    #[serde(default)]
    pub seasons: SeasonTable,

    /// Code used when a title carries no known season label (default: "01")
    #[serde(default = "default_season_code")]
    pub default_season_code: String,

    /// File holding listing URLs, one per line (default: "urls.txt")
    #[serde(default = "default_urls_path")]
    pub urls_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download: DownloadConfig::default(),
            http: HttpConfig::default(),
            retry: RetryConfig::default(),
            remux: RemuxConfig::default(),
            seasons: SeasonTable::default(),
            default_season_code: default_season_code(),
            urls_path: default_urls_path(),
        }
    }
}

impl Config {
    /// Read and validate a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        Self::from_json(&text)
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text).map_err(|e| Error::Config {
            message: format!("invalid configuration document: {}", e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.download.max_workers == 0 {
            return Err(Error::config("must be at least 1", "max_workers"));
        }
        if self.download.segment_concurrency == 0 {
            return Err(Error::config("must be at least 1", "segment_concurrency"));
        }
        if self.download.download_root.as_os_str().is_empty() {
            return Err(Error::config("must not be empty", "download_root"));
        }
        if self.default_season_code.trim().is_empty() {
            return Err(Error::config("must not be empty", "default_season_code"));
        }
        if let Some((label, _)) = self.seasons.iter().find(|(_, code)| code.trim().is_empty()) {
            return Err(Error::config(
                format!("season label '{}' has an empty code", label),
                "seasons",
            ));
        }
        if let Err(e) = url::Url::parse(&self.http.api_endpoint) {
            return Err(Error::config(
                format!("'{}' is not a valid URL: {}", self.http.api_endpoint, e),
                "api_endpoint",
            ));
        }
        for (name, value) in &self.http.headers {
            if reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(Error::config(
                    format!("invalid header name '{}'", name),
                    "headers",
                ));
            }
            if reqwest::header::HeaderValue::from_str(value).is_err() {
                return Err(Error::config(
                    format!("invalid value for header '{}'", name),
                    "headers",
                ));
            }
        }
        Ok(())
    }

    /// Download root directory
    pub fn download_root(&self) -> &Path {
        &self.download.download_root
    }

    /// Directory under which per-task temporary directories are created
    pub fn temp_root(&self) -> PathBuf {
        self.download
            .temp_dir
            .clone()
            .unwrap_or_else(|| self.download.download_root.join(".tmp"))
    }

    /// Effective worker pool size (1 when multithreading is off)
    pub fn worker_count(&self) -> usize {
        if self.download.use_multithreading {
            self.download.max_workers.max(1)
        } else {
            1
        }
    }
}

fn default_download_root() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_urls_path() -> PathBuf {
    PathBuf::from("urls.txt")
}

fn default_max_workers() -> usize {
    4
}

fn default_segment_concurrency() -> usize {
    8
}

fn default_min_file_size() -> u64 {
    1024 * 1024
}

fn default_headers() -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert(
        "user-agent".to_string(),
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
            .to_string(),
    );
    headers.insert(
        "accept-language".to_string(),
        "zh-TW,zh;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
    );
    headers
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_api_endpoint() -> String {
    "https://v.anime1.me/api".to_string()
}

fn default_season_code() -> String {
    "01".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
