//! Local export of verified artifacts.
//!
//! The exporter writes the final raster as PNG under a fixed file name.
//! Idempotency per Success transition is enforced by the pipeline, not here.

use std::path::{Path, PathBuf};

use crate::artifact::ImageArtifact;
use crate::error::{CaptureError, Result};

pub const DEFAULT_EXPORT_FILE_NAME: &str = "zkpa-verified.png";

pub trait Exporter {
    /// Persist `artifact`, returning where it was written.
    fn export(&mut self, artifact: &ImageArtifact) -> Result<PathBuf>;
}

/// Writes `<dir>/<file_name>` as PNG.
#[derive(Clone, Debug)]
pub struct PngFileExporter {
    dir: PathBuf,
    file_name: String,
}

impl PngFileExporter {
    pub fn new(dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            file_name: file_name.into(),
        }
    }

    pub fn target(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

impl Exporter for PngFileExporter {
    fn export(&mut self, artifact: &ImageArtifact) -> Result<PathBuf> {
        let png = artifact
            .to_png()
            .map_err(|e| CaptureError::Export(format!("encode PNG: {}", e)))?;
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            CaptureError::Export(format!("create {}: {}", self.dir.display(), e))
        })?;
        let target = self.target();
        write_atomically(&target, &png)?;
        Ok(target)
    }
}

// Write to a sibling temp file and rename so a reader never sees a partial PNG.
fn write_atomically(target: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = target.with_extension("png.partial");
    std::fs::write(&tmp, bytes)
        .map_err(|e| CaptureError::Export(format!("write {}: {}", tmp.display(), e)))?;
    std::fs::rename(&tmp, target).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        CaptureError::Export(format!("rename to {}: {}", target.display(), e))
    })
}
