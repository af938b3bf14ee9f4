//! Naming and placement of finished episodes
//!
//! The final path is derived from show title, season code and episode label
//! only, so the same episode always lands on the same path. Files arrive
//! there by rename; when the temporary directory lives on another filesystem
//! the file is copied to a hidden sibling first and then renamed, so the
//! final name never points at a partially written file.

use crate::config::{Config, FileCollisionAction, NamingScheme, SeasonTable};
use crate::error::{Error, Result};
use crate::utils::{get_unique_path, partial_path};
use std::io;
use std::path::{Path, PathBuf};

/// Computes destinations and moves files into the download root
#[derive(Clone, Debug)]
pub struct Placement {
    download_root: PathBuf,
    seasons: SeasonTable,
    default_code: String,
    naming: NamingScheme,
    collision: FileCollisionAction,
}

impl Placement {
    /// Build from the run configuration
    pub fn new(config: &Config) -> Self {
        Self {
            download_root: config.download.download_root.clone(),
            seasons: config.seasons.clone(),
            default_code: config.default_season_code.clone(),
            naming: config.download.naming,
            collision: config.download.file_collision,
        }
    }

    /// Season code for a hint; unknown or absent hints get the default code
    pub fn season_code(&self, season_hint: Option<&str>) -> &str {
        season_hint
            .and_then(|hint| self.seasons.code_for(hint))
            .unwrap_or(self.default_code.as_str())
    }

    /// Final path of an episode
    pub fn destination(
        &self,
        show_title: &str,
        season_hint: Option<&str>,
        episode_label: &str,
        extension: &str,
    ) -> PathBuf {
        let code = self.season_code(season_hint);
        let show_dir = self.download_root.join(show_title);
        match self.naming {
            NamingScheme::Flat => show_dir
                .join(code)
                .join(format!("{}.{}", episode_label, extension)),
            NamingScheme::Library => {
                let season_number = code
                    .parse::<u32>()
                    .map(|n| n.to_string())
                    .unwrap_or_else(|_| code.to_string());
                show_dir.join(format!("Season {}", season_number)).join(format!(
                    "{} - S{}E{}.{}",
                    show_title, code, episode_label, extension
                ))
            }
        }
    }

    /// Fail early when the collision policy would reject `dest` anyway
    pub fn precheck(&self, dest: &Path) -> Result<()> {
        if self.collision == FileCollisionAction::Skip && dest.exists() {
            return Err(Error::AlreadyExists(dest.to_path_buf()));
        }
        Ok(())
    }

    /// Move `source_file` to its final path and return that path
    ///
    /// The extension is taken from `source_file`.
    pub async fn place(
        &self,
        show_title: &str,
        season_hint: Option<&str>,
        episode_label: &str,
        source_file: &Path,
    ) -> Result<PathBuf> {
        let extension = source_file
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        let dest = self.destination(show_title, season_hint, episode_label, extension);
        if let Some(parent) = dest.parent() {
            ensure_dir(parent).await?;
        }

        let dest = get_unique_path(&dest, self.collision)?;
        move_into_place(source_file, &dest).await?;

        tracing::debug!(
            from = %source_file.display(),
            to = %dest.display(),
            "Placed episode"
        );
        Ok(dest)
    }
}

/// Create `dir` and its parents; an existing directory is not an error
pub async fn ensure_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::fs(dir, e))
}

/// Rename `source` onto `dest`, copying through a hidden sibling across filesystems
async fn move_into_place(source: &Path, dest: &Path) -> Result<()> {
    match tokio::fs::rename(source, dest).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            let staging = partial_path(dest);
            if let Err(e) = tokio::fs::copy(source, &staging).await {
                tokio::fs::remove_file(&staging).await.ok();
                return Err(Error::fs(&staging, e));
            }
            tokio::fs::rename(&staging, dest)
                .await
                .map_err(|e| Error::fs(dest, e))?;
            tokio::fs::remove_file(source).await.ok();
            Ok(())
        }
        Err(e) => Err(Error::fs(dest, e)),
    }
}
