//! Pipeline coordinator
//!
//! [`AnimeDownloader`] owns the shared pieces of a run (HTTP client,
//! resolver, executor, remuxer, placement) and fans resolved episodes out to
//! a bounded pool of worker tasks. Every episode, and every listing or page
//! that fails to resolve, ends up as exactly one [`TaskReport`].
//!
//! - [`task`] - the per-episode pipeline

mod task;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use futures::{FutureExt, StreamExt};
use tokio::sync::{Semaphore, broadcast};
use tokio::task::{self as tokio_task, JoinSet};

use crate::config::Config;
use crate::error::{Error, FetchError, Result};
use crate::executor::{DownloadExecutor, Progress};
use crate::http::HttpClient;
use crate::input;
use crate::placement::Placement;
use crate::remux::{Remuxer, remuxer_from_config};
use crate::resolver::{ResolveFailure, ResolvedEpisode, Resolver};
use crate::types::{Event, Outcome, RunReport, Stage, TaskId, TaskReport};

use task::{TaskContext, run_download_task};

/// Events buffered per subscriber before it starts lagging
const EVENT_BUFFER: usize = 1000;

/// Main downloader instance (cloneable, all shared state is behind `Arc`)
#[derive(Clone)]
pub struct AnimeDownloader {
    config: Arc<Config>,
    http: HttpClient,
    resolver: Resolver,
    executor: DownloadExecutor,
    remuxer: Arc<dyn Remuxer>,
    placement: Arc<Placement>,
    event_tx: broadcast::Sender<Event>,
    next_id: Arc<AtomicU64>,
}

impl AnimeDownloader {
    /// Create a downloader from a configuration
    ///
    /// Validates the configuration and picks the remuxer. Directories are
    /// created when a run starts.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let http = HttpClient::new(&config)?;
        let resolver = Resolver::new(http.clone(), config.clone())?;
        let executor = DownloadExecutor::new(
            http.clone(),
            config.download.segment_concurrency,
            config.download.min_file_size,
        );
        let remuxer = remuxer_from_config(&config.remux);
        let placement = Arc::new(Placement::new(&config));
        let (event_tx, _rx) = broadcast::channel(EVENT_BUFFER);

        Ok(Self {
            config,
            http,
            resolver,
            executor,
            remuxer,
            placement,
            event_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Replace the remuxer chosen from configuration
    pub fn with_remuxer(mut self, remuxer: Arc<dyn Remuxer>) -> Self {
        tracing::info!(remuxer = remuxer.name(), "Remuxer overridden");
        self.remuxer = remuxer;
        self
    }

    /// Subscribe to run events
    ///
    /// Each subscriber receives every event independently. A subscriber that
    /// falls more than 1000 events behind gets `RecvError::Lagged`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use anime1_dl::{AnimeDownloader, Config};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let downloader = AnimeDownloader::new(Config::default())?;
    ///
    ///     let mut events = downloader.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             println!("{:?}", event);
    ///         }
    ///     });
    ///
    ///     let report = downloader
    ///         .run(vec!["https://anime1.me/category/2024年夏季/某動畫".to_string()])
    ///         .await?;
    ///     println!("{} succeeded", report.success_count());
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The configuration this downloader was built with
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Name of the active remuxer
    pub fn remuxer_name(&self) -> &'static str {
        self.remuxer.name()
    }

    /// Resolve and download every listing URL, returning once all tasks are done
    ///
    /// Duplicate inputs are dropped. The only error is an unusable download
    /// or temporary root; everything else is recorded in the report.
    ///
    /// Task scratch space lives in a fresh `run-*` directory under the
    /// temporary root, so runs sharing a root never touch each other's files.
    pub async fn run(&self, inputs: Vec<String>) -> Result<RunReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        self.prepare_directories().await?;
        let temp_root = self.config.temp_root();
        let run_dir = tempfile::Builder::new()
            .prefix("run-")
            .tempdir_in(&temp_root)
            .map_err(|e| {
                Error::config(
                    format!("failed to create run directory in '{}': {}", temp_root.display(), e),
                    "temp_dir",
                )
            })?;

        let inputs = input::dedupe(inputs);
        let workers = self.config.worker_count();
        tracing::info!(inputs = inputs.len(), workers, "Run started");

        let pool = Arc::new(Semaphore::new(workers));
        let mut running: JoinSet<TaskReport> = JoinSet::new();
        let mut dispatched = HashMap::new();
        let mut tasks = Vec::new();

        for listing in &inputs {
            let mut episodes = 0usize;
            let mut stream = self.resolver.resolve(listing);

            while let Some(item) = stream.next().await {
                match item {
                    Ok(resolved) => {
                        episodes += 1;
                        let (task_id, id, url) =
                            self.dispatch(&mut running, &pool, run_dir.path(), resolved);
                        dispatched.insert(task_id, (id, url));
                    }
                    Err(failure) => tasks.push(self.resolve_failure(failure)),
                }
            }

            tracing::info!(url = %listing, episodes, "Listing resolved");
            self.emit(Event::ListingResolved {
                url: listing.clone(),
                episodes,
            });
        }

        tasks.extend(drain_workers(&mut running, dispatched, &self.event_tx).await);
        if let Err(e) = run_dir.close() {
            tracing::warn!(error = %e, "Failed to remove run directory");
        }

        let report = RunReport {
            started_at,
            elapsed: clock.elapsed(),
            tasks,
        };
        let (succeeded, failed) = (report.success_count(), report.failure_count());
        tracing::info!(succeeded, failed, elapsed_ms = report.elapsed.as_millis() as u64, "Run complete");
        self.emit(Event::RunComplete { succeeded, failed });
        Ok(report)
    }

    async fn prepare_directories(&self) -> Result<()> {
        let root = self.config.download_root();
        tokio::fs::create_dir_all(root).await.map_err(|e| {
            Error::config(
                format!("failed to create download root '{}': {}", root.display(), e),
                "download_root",
            )
        })?;
        let temp_root = self.config.temp_root();
        tokio::fs::create_dir_all(&temp_root).await.map_err(|e| {
            Error::config(
                format!("failed to create temp directory '{}': {}", temp_root.display(), e),
                "temp_dir",
            )
        })?;
        Ok(())
    }

    fn next_task_id(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Queue one episode; it starts once a worker slot is free
    ///
    /// Returns the spawned worker's id with the task id and page it runs.
    fn dispatch(
        &self,
        running: &mut JoinSet<TaskReport>,
        pool: &Arc<Semaphore>,
        temp_root: &Path,
        episode: ResolvedEpisode,
    ) -> (tokio_task::Id, TaskId, String) {
        let id = self.next_task_id();
        let descriptor = &episode.descriptor;
        self.emit(Event::TaskQueued {
            id,
            name: format!("{} {}", descriptor.show_title, descriptor.episode_label),
        });

        let page_url = descriptor.page_url.to_string();
        let ctx = TaskContext {
            id,
            http: self.http.clone(),
            executor: self.executor.clone(),
            remuxer: self.remuxer.clone(),
            placement: self.placement.clone(),
            temp_root: temp_root.to_path_buf(),
            progress: Progress::new(id, self.event_tx.clone()),
        };
        let events = self.event_tx.clone();
        let pool = pool.clone();
        let url = page_url.clone();
        let handle = running.spawn(async move {
            // The pool is never closed, so acquisition cannot fail
            let _permit = pool.acquire_owned().await.ok();
            match AssertUnwindSafe(run_download_task(ctx, episode))
                .catch_unwind()
                .await
            {
                Ok(report) => report,
                Err(_) => aborted_report(id, url, "worker panicked", &events),
            }
        });
        (handle.id(), id, page_url)
    }

    fn resolve_failure(&self, failure: ResolveFailure) -> TaskReport {
        let id = self.next_task_id();
        self.emit(Event::TaskFailed {
            id,
            stage: Stage::Resolve,
            error: failure.error.to_string(),
        });
        TaskReport {
            id,
            source_url: failure.url,
            show_title: None,
            episode_label: None,
            attempts: failure.retries,
            outcome: Outcome::failure(Stage::Resolve, &failure.error),
        }
    }
}

/// Collect a report from every worker in `running`
///
/// A worker that never hands back its report (cancelled, or panicked past
/// the pipeline's own guard) is recorded as a failure through `dispatched`.
async fn drain_workers(
    running: &mut JoinSet<TaskReport>,
    mut dispatched: HashMap<tokio_task::Id, (TaskId, String)>,
    events: &broadcast::Sender<Event>,
) -> Vec<TaskReport> {
    let mut reports = Vec::with_capacity(running.len());
    while let Some(joined) = running.join_next_with_id().await {
        match joined {
            Ok((worker, report)) => {
                dispatched.remove(&worker);
                reports.push(report);
            }
            Err(e) => match dispatched.remove(&e.id()) {
                Some((id, page_url)) => {
                    let reason = if e.is_cancelled() {
                        "worker cancelled"
                    } else {
                        "worker panicked"
                    };
                    reports.push(aborted_report(id, page_url, reason, events));
                }
                None => tracing::error!(error = %e, "Unknown worker exited without a report"),
            },
        }
    }
    reports
}

/// Report for a worker that stopped mid-pipeline
fn aborted_report(
    id: TaskId,
    page_url: String,
    reason: &str,
    events: &broadcast::Sender<Event>,
) -> TaskReport {
    let error = Error::Fetch(FetchError::Request {
        url: page_url.clone(),
        reason: reason.to_string(),
    });
    tracing::error!(task_id = id.0, url = %page_url, reason, "Worker stopped without a report");
    events
        .send(Event::TaskFailed {
            id,
            stage: Stage::Download,
            error: error.to_string(),
        })
        .ok();
    TaskReport {
        id,
        source_url: page_url,
        show_title: None,
        episode_label: None,
        attempts: 0,
        outcome: Outcome::failure(Stage::Download, &error),
    }
}
