//! Download executor
//!
//! Fetches a classified source into a task's temporary directory. Direct
//! files are streamed to disk chunk by chunk and checked against the declared
//! length; segmented streams are fetched with bounded concurrency and written
//! as `segment_00000.ts`, `segment_00001.ts`, ... in manifest order, whatever
//! order the fetches complete in.
//!
//! A direct download has no overall deadline. It fails with
//! [`FetchError::Timeout`] only when the server stops sending for longer
//! than `request_timeout`.

use crate::error::{Error, FetchError, Result};
use crate::http::{HttpClient, media_headers};
use crate::retry::download_with_retry_counted;
use crate::types::{Artifacts, Event, MediaAccess, SourceRef, TaskId};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use url::Url;

/// Emit a `Downloading` event every time this many more bytes are written
const PROGRESS_STEP: u64 = 1024 * 1024;

/// Event sink bound to one task
#[derive(Clone)]
pub struct Progress {
    id: TaskId,
    events: broadcast::Sender<Event>,
}

impl Progress {
    /// Report progress for task `id` on `events`
    pub fn new(id: TaskId, events: broadcast::Sender<Event>) -> Self {
        Self { id, events }
    }

    /// The task this sink reports for
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Broadcast an event; having no subscribers is fine
    pub fn emit(&self, event: Event) {
        self.events.send(event).ok();
    }

    fn downloading(&self, downloaded_bytes: u64, total_bytes: Option<u64>) {
        self.emit(Event::Downloading {
            id: self.id,
            downloaded_bytes,
            total_bytes,
        });
    }

    fn segment_fetched(&self, completed: usize, total: usize) {
        self.emit(Event::SegmentFetched {
            id: self.id,
            completed,
            total,
        });
    }
}

/// Fetches sources into temporary files
#[derive(Clone)]
pub struct DownloadExecutor {
    http: HttpClient,
    segment_concurrency: usize,
    min_file_size: u64,
}

impl DownloadExecutor {
    /// Create an executor allowing `segment_concurrency` segment fetches in flight
    ///
    /// Finished media smaller than `min_file_size` bytes is rejected.
    pub fn new(http: HttpClient, segment_concurrency: usize, min_file_size: u64) -> Self {
        Self {
            http,
            segment_concurrency: segment_concurrency.max(1),
            min_file_size,
        }
    }

    /// Reject a finished media file below the minimum size
    ///
    /// Returns the file's size.
    pub async fn verify_size(&self, path: &Path) -> Result<u64> {
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::fs(path, e))?
            .len();
        if size < self.min_file_size {
            return Err(Error::Undersized {
                path: path.to_path_buf(),
                actual: size,
                minimum: self.min_file_size,
            });
        }
        Ok(size)
    }

    /// Download `source` into `temp_dir`
    ///
    /// Nothing is written outside `temp_dir`.
    pub async fn execute(
        &self,
        source: &SourceRef,
        access: &MediaAccess,
        temp_dir: &Path,
        progress: &Progress,
        retries: &AtomicU32,
    ) -> Result<Artifacts> {
        match source {
            SourceRef::DirectFile { url } => {
                let dest = temp_dir.join(format!("media.{}", source.output_extension()));
                self.download_direct(url, access, &dest, progress, retries)
                    .await?;
                self.verify_size(&dest).await?;
                Ok(Artifacts::Single(dest))
            }
            SourceRef::SegmentedStream { segments } => {
                if segments.is_empty() {
                    return Err(Error::Parse("segmented stream has no segments".into()));
                }
                let paths = self
                    .download_segments(segments, access, temp_dir, progress, retries)
                    .await?;
                Ok(Artifacts::Segments(paths))
            }
        }
    }

    /// Stream one file to `dest`, restarting from scratch on transient failures
    async fn download_direct(
        &self,
        url: &Url,
        access: &MediaAccess,
        dest: &Path,
        progress: &Progress,
        retries: &AtomicU32,
    ) -> Result<u64> {
        let headers = media_headers(access);
        let stall = self.http.request_timeout();
        let timed_out = || FetchError::Timeout {
            url: url.to_string(),
        };

        let written = download_with_retry_counted(self.http.retry_config(), retries, || {
            let request = self.http.inner().get(url.clone()).headers(headers.clone());
            async move {
                let mut response = tokio::time::timeout(stall, self.http.send_checked(request, url))
                    .await
                    .map_err(|_| timed_out())??;
                let declared = response.content_length();

                let mut file = tokio::fs::File::create(dest)
                    .await
                    .map_err(|e| Error::fs(dest, e))?;
                let mut written: u64 = 0;
                let mut next_report = PROGRESS_STEP;

                // The limit applies per read, so a slow but steady body is never cut off
                while let Some(chunk) = tokio::time::timeout(stall, response.chunk())
                    .await
                    .map_err(|_| timed_out())?
                    .map_err(|e| FetchError::from_reqwest(url.as_str(), e))?
                {
                    file.write_all(&chunk)
                        .await
                        .map_err(|e| Error::fs(dest, e))?;
                    written += chunk.len() as u64;
                    if written >= next_report {
                        progress.downloading(written, declared);
                        next_report = written + PROGRESS_STEP;
                    }
                }
                file.flush().await.map_err(|e| Error::fs(dest, e))?;
                drop(file);

                let on_disk = tokio::fs::metadata(dest)
                    .await
                    .map_err(|e| Error::fs(dest, e))?
                    .len();
                check_length(dest, declared, on_disk)?;
                progress.downloading(on_disk, declared);
                Ok::<_, Error>(on_disk)
            }
        })
        .await?;

        tracing::debug!(task_id = progress.id().0, url = %url, bytes = written, "Direct download finished");
        Ok(written)
    }

    /// Fetch every segment, keeping manifest order in the returned paths
    async fn download_segments(
        &self,
        segments: &[Url],
        access: &MediaAccess,
        dir: &Path,
        progress: &Progress,
        retries: &AtomicU32,
    ) -> Result<Vec<PathBuf>> {
        let total = segments.len();
        let completed = AtomicUsize::new(0);
        let completed = &completed;

        let paths: Vec<PathBuf> = stream::iter(segments.iter().cloned().enumerate())
            .map(move |(index, url)| async move {
                let bytes = self.http.get_bytes(&url, access, retries).await?;
                let path = dir.join(format!("segment_{:05}.ts", index));
                tokio::fs::write(&path, &bytes)
                    .await
                    .map_err(|e| Error::fs(&path, e))?;

                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                progress.segment_fetched(done, total);
                Ok::<_, Error>(path)
            })
            .buffered(self.segment_concurrency)
            .try_collect()
            .await?;

        tracing::debug!(task_id = progress.id().0, segments = total, "All segments fetched");
        Ok(paths)
    }
}

/// Compare the bytes on disk with the length the server declared
fn check_length(path: &Path, declared: Option<u64>, actual: u64) -> Result<()> {
    match declared {
        Some(expected) if expected != actual => Err(Error::PartialWrite {
            path: path.to_path_buf(),
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}
