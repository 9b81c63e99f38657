//! Source acquisition.
//!
//! Four entry points feed the pipeline:
//! - file picker uploads (local path or in-memory bytes)
//! - drag-and-drop payloads
//! - remote URL imports
//! - camera snapshots (produced by `CameraController::capture`)
//!
//! All of them end in `ImageBlob::validate`, which enforces the 25 MB limit
//! and the `image/*` MIME class before anything touches the network.

use std::io::Read;
use std::path::Path;

use url::Url;

use crate::artifact::{self, ImageBlob, SourceKind, MAX_IMAGE_BYTES};
use crate::error::{CaptureError, Result};
use crate::transport::{Fetched, HttpClient};

/// Stem of the synthesized name given to URL imports.
pub const IMPORTED_FILE_STEM: &str = "imported-image";

/// A local acquisition request.
#[derive(Debug)]
pub enum AcquireInput {
    Upload {
        file_name: String,
        mime_type: Option<String>,
        bytes: Vec<u8>,
    },
    Drop {
        file_name: String,
        mime_type: Option<String>,
        bytes: Vec<u8>,
    },
    /// Snapshot already rasterized by the camera controller.
    Camera(ImageBlob),
}

impl AcquireInput {
    /// Read a local file as a file-picker upload.
    pub fn upload_file(path: &Path) -> Result<Self> {
        let (file_name, bytes) = read_local(path)?;
        Ok(AcquireInput::Upload {
            file_name,
            mime_type: None,
            bytes,
        })
    }

    /// Read a local file as a drag-and-drop payload.
    pub fn drop_file(path: &Path) -> Result<Self> {
        let (file_name, bytes) = read_local(path)?;
        Ok(AcquireInput::Drop {
            file_name,
            mime_type: None,
            bytes,
        })
    }

    pub fn source(&self) -> SourceKind {
        match self {
            AcquireInput::Upload { .. } => SourceKind::Upload,
            AcquireInput::Drop { .. } => SourceKind::Drop,
            AcquireInput::Camera(blob) => blob.source(),
        }
    }
}

/// Normalize a local input into a validated blob.
pub fn normalize(input: AcquireInput) -> Result<ImageBlob> {
    let source = input.source();
    match input {
        AcquireInput::Upload {
            file_name,
            mime_type,
            bytes,
        }
        | AcquireInput::Drop {
            file_name,
            mime_type,
            bytes,
        } => ImageBlob::validate(bytes, mime_type.as_deref(), &file_name, source),
        AcquireInput::Camera(blob) => Ok(blob),
    }
}

// Checks the size from metadata first so oversized files are never read.
fn read_local(path: &Path) -> Result<(String, Vec<u8>)> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| CaptureError::validation(format!("{} is not a file", path.display())))?;
    let file = std::fs::File::open(path)
        .map_err(|e| CaptureError::validation(format!("open {}: {}", path.display(), e)))?;
    let len = file
        .metadata()
        .map_err(|e| CaptureError::validation(format!("stat {}: {}", path.display(), e)))?
        .len();
    artifact::validate_size(usize::try_from(len).unwrap_or(usize::MAX))?;

    let mut bytes = Vec::with_capacity(len as usize);
    file.take(MAX_IMAGE_BYTES as u64 + 1)
        .read_to_end(&mut bytes)
        .map_err(|e| CaptureError::validation(format!("read {}: {}", path.display(), e)))?;
    Ok((file_name, bytes))
}

// ----------------------------------------------------------------------------
// URL import
// ----------------------------------------------------------------------------

/// Fetches remote images for URL import.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &str, max_bytes: usize) -> Result<Fetched>;
}

impl ImageFetcher for HttpClient {
    fn fetch(&self, url: &str, max_bytes: usize) -> Result<Fetched> {
        self.get_bounded(url, max_bytes)
    }
}

/// Reject anything but absolute http(s) URLs.
pub fn parse_import_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| CaptureError::validation(format!("invalid image URL '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(CaptureError::validation(format!(
            "unsupported URL scheme '{}'; expected http or https",
            other
        ))),
    }
}

/// Download `url` and normalize the result into a blob.
pub fn import_url(fetcher: &dyn ImageFetcher, url: &Url) -> Result<ImageBlob> {
    let fetched = fetcher.fetch(url.as_str(), MAX_IMAGE_BYTES)?;
    blob_from_fetched(fetched)
}

/// Synthesize a name and MIME type for a downloaded body.
///
/// An `image/*` Content-Type is trusted; otherwise the bytes are sniffed. A
/// body that is neither keeps its declared type and fails validation.
pub fn blob_from_fetched(fetched: Fetched) -> Result<ImageBlob> {
    let declared = fetched
        .content_type
        .as_deref()
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase());
    let mime_type = match declared {
        Some(ct) if ct.starts_with("image/") => ct,
        other => artifact::sniff_mime(&fetched.bytes)
            .map(str::to_string)
            .or(other)
            .unwrap_or_else(|| "application/octet-stream".to_string()),
    };
    let file_name = format!(
        "{}.{}",
        IMPORTED_FILE_STEM,
        artifact::extension_for_mime(&mime_type)
    );
    ImageBlob::validate(
        fetched.bytes,
        Some(&mime_type),
        &file_name,
        SourceKind::UrlImport,
    )
}
