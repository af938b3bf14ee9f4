//! Per-episode pipeline: classify, download, assemble, place.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::classifier::classify;
use crate::error::Error;
use crate::executor::{DownloadExecutor, Progress};
use crate::http::HttpClient;
use crate::placement::{Placement, ensure_dir};
use crate::remux::{Remuxer, assemble};
use crate::resolver::ResolvedEpisode;
use crate::types::{
    Artifacts, EpisodeDescriptor, Event, MediaAccess, Outcome, SourceRef, Stage, TaskId,
    TaskReport,
};

/// Everything one task needs, cloned out of the downloader
pub(crate) struct TaskContext {
    pub(crate) id: TaskId,
    pub(crate) http: HttpClient,
    pub(crate) executor: DownloadExecutor,
    pub(crate) remuxer: Arc<dyn Remuxer>,
    pub(crate) placement: Arc<Placement>,
    pub(crate) temp_root: PathBuf,
    pub(crate) progress: Progress,
}

type StageResult<T> = std::result::Result<T, (Stage, Error)>;

/// Run one episode to a terminal outcome
///
/// Phases:
/// 1. Classify the first usable source
/// 2. Check the destination against the collision policy
/// 3. Download into `<run dir>/task-<id>`
/// 4. Assemble segments (segmented sources only) and check the result's size
/// 5. Move the result to its final path
///
/// The temporary directory is removed whatever the outcome.
pub(crate) async fn run_download_task(ctx: TaskContext, episode: ResolvedEpisode) -> TaskReport {
    let id = ctx.id;
    let descriptor = episode.descriptor;
    let retries = AtomicU32::new(0);
    let temp_dir = ctx.temp_root.join(format!("task-{}", id.0));

    ctx.progress.emit(Event::TaskStarted { id });
    tracing::info!(
        task_id = id.0,
        show = %descriptor.show_title,
        episode = %descriptor.episode_label,
        "Task started"
    );

    let result = pipeline(&ctx, &descriptor, &temp_dir, &retries).await;

    if let Err(e) = tokio::fs::remove_dir_all(&temp_dir).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(task_id = id.0, path = %temp_dir.display(), error = %e, "Failed to remove temp directory");
    }

    let outcome = match result {
        Ok(final_path) => {
            tracing::info!(task_id = id.0, path = %final_path.display(), "Task completed");
            ctx.progress.emit(Event::TaskCompleted {
                id,
                path: final_path.clone(),
            });
            Outcome::Success { final_path }
        }
        Err((stage, error)) => {
            tracing::warn!(task_id = id.0, stage = %stage, error = %error, "Task failed");
            ctx.progress.emit(Event::TaskFailed {
                id,
                stage,
                error: error.to_string(),
            });
            Outcome::failure(stage, &error)
        }
    };

    TaskReport {
        id,
        source_url: descriptor.page_url.to_string(),
        show_title: Some(descriptor.show_title),
        episode_label: Some(descriptor.episode_label),
        attempts: episode.retries + retries.load(Ordering::Relaxed),
        outcome,
    }
}

async fn pipeline(
    ctx: &TaskContext,
    descriptor: &EpisodeDescriptor,
    temp_dir: &Path,
    retries: &AtomicU32,
) -> StageResult<PathBuf> {
    let (source, access) = classify_first(ctx, descriptor, retries)
        .await
        .map_err(|e| (Stage::Classify, e))?;

    let extension = match &source {
        SourceRef::DirectFile { .. } => source.output_extension(),
        SourceRef::SegmentedStream { .. } => ctx.remuxer.output_extension().to_string(),
    };
    let dest = ctx.placement.destination(
        &descriptor.show_title,
        descriptor.season_hint.as_deref(),
        &descriptor.episode_label,
        &extension,
    );
    ctx.placement
        .precheck(&dest)
        .map_err(|e| (Stage::Place, e))?;

    ensure_dir(temp_dir)
        .await
        .map_err(|e| (Stage::Download, e))?;
    let artifacts = ctx
        .executor
        .execute(&source, &access, temp_dir, &ctx.progress, retries)
        .await
        .map_err(|e| (Stage::Download, e))?;

    if let Artifacts::Segments(segments) = &artifacts {
        ctx.progress.emit(Event::Remuxing {
            id: ctx.id,
            segments: segments.len(),
        });
    }
    let segmented = matches!(artifacts, Artifacts::Segments(_));
    let assembled = assemble(ctx.remuxer.as_ref(), artifacts, temp_dir)
        .await
        .map_err(|e| (Stage::Remux, e))?;
    // Direct files were already checked by the executor
    if segmented {
        ctx.executor
            .verify_size(&assembled)
            .await
            .map_err(|e| (Stage::Remux, e))?;
    }

    ctx.placement
        .place(
            &descriptor.show_title,
            descriptor.season_hint.as_deref(),
            &descriptor.episode_label,
            &assembled,
        )
        .await
        .map_err(|e| (Stage::Place, e))
}

/// Classify sources in player order; the first one that classifies wins
async fn classify_first(
    ctx: &TaskContext,
    descriptor: &EpisodeDescriptor,
    retries: &AtomicU32,
) -> crate::Result<(SourceRef, MediaAccess)> {
    let mut last_error = None;
    for raw in &descriptor.sources {
        match classify(&ctx.http, raw, retries).await {
            Ok(source) => return Ok((source, MediaAccess::from(raw))),
            Err(e) => {
                tracing::debug!(task_id = ctx.id.0, url = %raw.url, error = %e, "Source rejected");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        Error::Parse(format!("episode {} has no sources", descriptor.page_url))
    }))
}
