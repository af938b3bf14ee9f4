use std::collections::HashMap;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anime1_dl::input::{parse_url_list, read_url_file};
use anime1_dl::utils::format_elapsed;
use anime1_dl::{AnimeDownloader, Config, Event, Outcome, RunReport, TaskId};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Download anime1 episodes and season listings into season folders
#[derive(Parser, Debug)]
#[command(name = "anime1-dl", version, about)]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// File with listing URLs, one per line (overrides `urls_path`)
    #[arg(short, long)]
    urls: Option<PathBuf>,

    /// Download this many episodes at once
    #[arg(short, long)]
    workers: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Episode or season listing URLs
    #[arg(value_name = "URL")]
    listings: Vec<String>,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("anime1_dl=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("anime1_dl=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Positional URLs, else the URL file, else an interactive prompt
fn collect_listings(args: &Args, config: &Config) -> Result<Vec<String>, String> {
    let positional: Vec<String> = args
        .listings
        .iter()
        .flat_map(|arg| parse_url_list(arg))
        .collect();
    if !positional.is_empty() {
        return Ok(positional);
    }

    let url_file = args.urls.as_ref().unwrap_or(&config.urls_path);
    let from_file = read_url_file(url_file).map_err(|e| e.to_string())?;
    if !from_file.is_empty() {
        println!("Read {} URL(s) from {}", from_file.len(), url_file.display());
        return Ok(from_file);
    }

    let typed: String = dialoguer::Input::new()
        .with_prompt("Listing URLs (comma separated)")
        .allow_empty(true)
        .interact_text()
        .map_err(|e| format!("failed to read URLs: {}", e))?;
    Ok(parse_url_list(&typed))
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .map(|style| style.progress_chars("━━╌"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// What a task's bar is currently counting
#[derive(Clone, Copy, PartialEq, Eq)]
enum Measure {
    Waiting,
    Bytes,
    UnknownBytes,
    Segments,
}

/// One progress bar per running task, with log lines printed above them
struct ProgressBoard {
    multi: MultiProgress,
    names: HashMap<TaskId, String>,
    bars: HashMap<TaskId, (ProgressBar, Measure)>,
}

impl ProgressBoard {
    fn new() -> Self {
        Self::with_multi(MultiProgress::new())
    }

    fn with_multi(multi: MultiProgress) -> Self {
        Self {
            multi,
            names: HashMap::new(),
            bars: HashMap::new(),
        }
    }

    /// Print above the bars; plain stdout when there is no terminal
    fn say(&self, line: String) {
        if self.multi.is_hidden() || self.multi.println(&line).is_err() {
            println!("{}", line);
        }
    }

    fn name(&self, id: TaskId) -> String {
        self.names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("task {}", id))
    }

    /// The task's bar, switched to `measure` if it was counting something else
    fn bar(&mut self, id: TaskId, measure: Measure) -> &ProgressBar {
        let name = self.name(id);
        let multi = &self.multi;
        let (bar, current) = self.bars.entry(id).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new_spinner());
            bar.set_style(style("{spinner:.cyan} {msg}"));
            bar.set_message(name);
            bar.enable_steady_tick(Duration::from_millis(120));
            (bar, Measure::Waiting)
        });
        if *current != measure {
            match measure {
                Measure::Waiting => {}
                Measure::Bytes => bar.set_style(style(
                    "{spinner:.cyan} [{bar:30.cyan/blue}] {bytes}/{total_bytes} @ {bytes_per_sec} {msg}",
                )),
                Measure::UnknownBytes => {
                    bar.set_style(style("{spinner:.cyan} {bytes} @ {bytes_per_sec} {msg}"))
                }
                Measure::Segments => bar.set_style(style(
                    "{spinner:.cyan} [{bar:30.green/white}] {pos}/{len} segments {msg}",
                )),
            }
            *current = measure;
        }
        bar
    }

    fn finish(&mut self, id: TaskId) {
        if let Some((bar, _)) = self.bars.remove(&id) {
            bar.finish_and_clear();
        }
        self.names.remove(&id);
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::ListingResolved { url, episodes } => {
                self.say(format!("Found {} episode(s) in {}", episodes, url));
            }
            Event::TaskQueued { id, name } => {
                self.say(format!("[{}] Queued: {}", id, name));
                self.names.insert(id, name);
            }
            Event::TaskStarted { id } => {
                self.bar(id, Measure::Waiting);
            }
            Event::Downloading {
                id,
                downloaded_bytes,
                total_bytes,
            } => {
                let measure = match total_bytes {
                    Some(_) => Measure::Bytes,
                    None => Measure::UnknownBytes,
                };
                let bar = self.bar(id, measure);
                if let Some(total) = total_bytes {
                    bar.set_length(total);
                }
                bar.set_position(downloaded_bytes);
            }
            Event::SegmentFetched {
                id,
                completed,
                total,
            } => {
                let bar = self.bar(id, Measure::Segments);
                bar.set_length(total as u64);
                bar.set_position(completed as u64);
            }
            Event::Remuxing { id, segments } => {
                let name = self.name(id);
                self.bar(id, Measure::Waiting)
                    .set_message(format!("{} (merging {} segments)", name, segments));
            }
            Event::TaskCompleted { id, path } => {
                self.finish(id);
                self.say(format!("[{}] Done: {}", id, path.display()));
            }
            Event::TaskFailed { id, stage, error } => {
                self.finish(id);
                self.say(format!("[{}] Failed during {}: {}", id, stage, error));
            }
            Event::RunComplete { .. } => {
                for (_, (bar, _)) in self.bars.drain() {
                    bar.finish_and_clear();
                }
            }
        }
    }
}

fn print_summary(report: &RunReport) {
    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        println!("\n=== Failed ===");
        for task in &failures {
            if let Outcome::Failure { stage, reason, .. } = &task.outcome {
                println!("  {} ({}): {}", task.display_name(), stage, reason);
            }
        }
    }

    println!(
        "\n{} succeeded, {} failed in {}",
        report.success_count(),
        report.failure_count(),
        format_elapsed(report.elapsed)
    );
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    if let Some(workers) = args.workers {
        config.download.use_multithreading = workers > 1;
        config.download.max_workers = workers.max(1);
    }

    let listings = match collect_listings(&args, &config) {
        Ok(listings) => listings,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    if listings.is_empty() {
        println!("No URLs to download.");
        return;
    }

    let downloader = match AnimeDownloader::new(config) {
        Ok(downloader) => downloader,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let mut events = downloader.subscribe();
    let printer = tokio::spawn(async move {
        let mut board = ProgressBoard::new();
        loop {
            match events.recv().await {
                Ok(event @ Event::RunComplete { .. }) => {
                    board.handle(event);
                    break;
                }
                Err(RecvError::Closed) => break,
                Ok(event) => board.handle(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Progress output lagging");
                }
            }
        }
    });

    let report = match downloader.run(listings).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    printer.await.ok();

    print_summary(&report);
    if report.failure_count() > 0 {
        process::exit(1);
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use indicatif::ProgressDrawTarget;

    fn board() -> ProgressBoard {
        ProgressBoard::with_multi(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()))
    }

    fn start(board: &mut ProgressBoard, id: u64) {
        board.handle(Event::TaskQueued {
            id: TaskId(id),
            name: format!("Show {:02}", id),
        });
        board.handle(Event::TaskStarted { id: TaskId(id) });
    }

    #[test]
    fn direct_download_bar_counts_bytes() {
        let mut board = board();
        start(&mut board, 1);
        board.handle(Event::Downloading {
            id: TaskId(1),
            downloaded_bytes: 40,
            total_bytes: Some(100),
        });

        let (bar, measure) = &board.bars[&TaskId(1)];
        assert!(*measure == Measure::Bytes);
        assert_eq!(bar.length(), Some(100));
        assert_eq!(bar.position(), 40);
    }

    #[test]
    fn unknown_size_falls_back_to_a_byte_counter() {
        let mut board = board();
        start(&mut board, 2);
        board.handle(Event::Downloading {
            id: TaskId(2),
            downloaded_bytes: 2048,
            total_bytes: None,
        });

        let (bar, measure) = &board.bars[&TaskId(2)];
        assert!(*measure == Measure::UnknownBytes);
        assert_eq!(bar.position(), 2048);
    }

    #[test]
    fn segmented_download_bar_counts_segments_and_clears_when_done() {
        let mut board = board();
        start(&mut board, 3);
        board.handle(Event::SegmentFetched {
            id: TaskId(3),
            completed: 4,
            total: 12,
        });
        {
            let (bar, measure) = &board.bars[&TaskId(3)];
            assert!(*measure == Measure::Segments);
            assert_eq!(bar.length(), Some(12));
            assert_eq!(bar.position(), 4);
        }

        board.handle(Event::TaskCompleted {
            id: TaskId(3),
            path: PathBuf::from("/downloads/Show/01/03.ts"),
        });
        assert!(board.bars.is_empty());
        assert!(board.names.is_empty());
    }
}
