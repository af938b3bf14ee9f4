//! Byte concatenation fallback for MPEG-TS segments

use super::Remuxer;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Appends segment files to each other in order
///
/// MPEG-TS is designed to be cut and joined at packet boundaries, so the
/// result plays in most players. The output stays a `.ts` file since nothing
/// is re-containered.
///
/// # Examples
///
/// ```
/// use anime1_dl::remux::{ConcatRemuxer, Remuxer};
///
/// let remuxer = ConcatRemuxer;
/// assert_eq!(remuxer.output_extension(), "ts");
/// ```
pub struct ConcatRemuxer;

#[async_trait]
impl Remuxer for ConcatRemuxer {
    async fn remux(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let mut out = tokio::fs::File::create(output).await.map_err(|e| {
            Error::Remux(format!("failed to create {}: {}", output.display(), e))
        })?;

        for input in inputs {
            let mut segment = tokio::fs::File::open(input).await.map_err(|e| {
                Error::Remux(format!("failed to open segment {}: {}", input.display(), e))
            })?;
            tokio::io::copy(&mut segment, &mut out).await.map_err(|e| {
                Error::Remux(format!("failed to append segment {}: {}", input.display(), e))
            })?;
        }

        out.flush()
            .await
            .map_err(|e| Error::Remux(format!("failed to flush {}: {}", output.display(), e)))
    }

    fn output_extension(&self) -> &'static str {
        "ts"
    }

    fn name(&self) -> &'static str {
        "concat"
    }
}
