//! Image artifacts and preview handles.
//!
//! - `ImageBlob`: validated bytes + MIME type, not yet on display.
//! - `ImageArtifact`: immutable acquired image bound to a live `PreviewHandle`.
//! - `PreviewStore`: issues and revokes preview handles. At most one handle is
//!   live per store; the prior handle is revoked before a new one is issued.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use image::ImageFormat;

use crate::error::{CaptureError, Result};

/// Maximum accepted payload: 25 MB.
pub const MAX_IMAGE_BYTES: usize = 25 * 1024 * 1024;

/// Where an artifact came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Upload,
    Drop,
    UrlImport,
    Camera,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SourceKind::Upload => "upload",
            SourceKind::Drop => "drop",
            SourceKind::UrlImport => "url-import",
            SourceKind::Camera => "camera",
        };
        f.write_str(label)
    }
}

/// Validated image bytes that have passed the size and type checks.
#[derive(Clone, Debug)]
pub struct ImageBlob {
    bytes: Arc<[u8]>,
    mime_type: String,
    file_name: String,
    source: SourceKind,
}

impl ImageBlob {
    /// The single normalization step every source funnels through.
    ///
    /// `declared_mime` wins when present; otherwise the type is derived from the
    /// file name extension and finally from the content itself.
    pub fn validate(
        bytes: Vec<u8>,
        declared_mime: Option<&str>,
        file_name: &str,
        source: SourceKind,
    ) -> Result<Self> {
        validate_size(bytes.len())?;
        let mime_type = declared_mime
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty())
            .or_else(|| mime_from_name(file_name).map(str::to_string))
            .or_else(|| sniff_mime(&bytes).map(str::to_string))
            .ok_or_else(|| {
                CaptureError::validation(format!("cannot determine MIME type of {}", file_name))
            })?;
        validate_mime(&mime_type)?;
        Ok(Self {
            bytes: bytes.into(),
            mime_type,
            file_name: file_name.to_string(),
            source,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }
}

/// Reject payloads that are empty or larger than [`MAX_IMAGE_BYTES`].
pub fn validate_size(len: usize) -> Result<()> {
    if len == 0 {
        return Err(CaptureError::validation("image payload is empty"));
    }
    if len > MAX_IMAGE_BYTES {
        return Err(CaptureError::validation(format!(
            "image is {} bytes; maximum is {} bytes",
            len, MAX_IMAGE_BYTES
        )));
    }
    Ok(())
}

/// Reject anything outside the `image/*` MIME class.
pub fn validate_mime(mime: &str) -> Result<()> {
    let mut parts = mime.splitn(2, '/');
    let class = parts.next().unwrap_or("");
    let subtype = parts.next().unwrap_or("");
    if !class.eq_ignore_ascii_case("image") || subtype.trim().is_empty() {
        return Err(CaptureError::validation(format!(
            "unsupported MIME type '{}'; expected image/*",
            mime
        )));
    }
    Ok(())
}

/// MIME type guessed from magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

/// MIME type guessed from a file name extension.
pub fn mime_from_name(name: &str) -> Option<&'static str> {
    ImageFormat::from_path(Path::new(name))
        .ok()
        .map(|format| format.to_mime_type())
}

/// Preferred file extension for an image MIME type.
pub fn extension_for_mime(mime: &str) -> &'static str {
    ImageFormat::from_mime_type(mime)
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("img")
}

// ----------------------------------------------------------------------------
// Preview handles
// ----------------------------------------------------------------------------

/// Opaque handle to a displayable preview. Valid until revoked.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PreviewHandle {
    id: u64,
}

impl PreviewHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn uri(&self) -> String {
        format!("preview://{}", self.id)
    }
}

/// Issues preview handles and keeps their backing bytes alive until revoked.
#[derive(Debug, Default)]
pub struct PreviewStore {
    next_id: u64,
    live: HashMap<u64, Arc<[u8]>>,
    issued: u64,
    revoked: u64,
}

impl PreviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&mut self, bytes: Arc<[u8]>) -> PreviewHandle {
        self.next_id += 1;
        self.issued += 1;
        self.live.insert(self.next_id, bytes);
        PreviewHandle { id: self.next_id }
    }

    /// Revoke a handle. Returns false if it was already revoked.
    pub fn revoke(&mut self, handle: &PreviewHandle) -> bool {
        let removed = self.live.remove(&handle.id).is_some();
        if removed {
            self.revoked += 1;
        }
        removed
    }

    /// Bytes behind a live handle.
    pub fn resolve(&self, handle: &PreviewHandle) -> Option<Arc<[u8]>> {
        self.live.get(&handle.id).cloned()
    }

    pub fn is_live(&self, handle: &PreviewHandle) -> bool {
        self.live.contains_key(&handle.id)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn issued_count(&self) -> u64 {
        self.issued
    }

    pub fn revoked_count(&self) -> u64 {
        self.revoked
    }
}

// ----------------------------------------------------------------------------
// ImageArtifact
// ----------------------------------------------------------------------------

/// An acquired image bound to its preview handle.
///
/// Artifacts are never mutated; a new acquisition replaces the artifact wholesale.
/// Cloning is cheap (bytes are shared).
#[derive(Clone, Debug)]
pub struct ImageArtifact {
    blob: ImageBlob,
    preview: PreviewHandle,
}

impl ImageArtifact {
    /// Install `blob` as the displayed image, revoking `previous` first.
    pub fn install(
        store: &mut PreviewStore,
        previous: Option<&ImageArtifact>,
        blob: ImageBlob,
    ) -> Self {
        if let Some(previous) = previous {
            store.revoke(&previous.preview);
        }
        let preview = store.issue(blob.bytes.clone());
        Self { blob, preview }
    }

    pub fn bytes(&self) -> &[u8] {
        self.blob.bytes()
    }

    pub fn mime_type(&self) -> &str {
        self.blob.mime_type()
    }

    pub fn file_name(&self) -> &str {
        self.blob.file_name()
    }

    pub fn source(&self) -> SourceKind {
        self.blob.source()
    }

    pub fn preview(&self) -> &PreviewHandle {
        &self.preview
    }

    pub fn len(&self) -> usize {
        self.blob.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blob.bytes.is_empty()
    }

    /// The artifact as PNG bytes, transcoding when it is stored in another format.
    pub fn to_png(&self) -> std::result::Result<Cow<'_, [u8]>, image::ImageError> {
        if self.mime_type() == ImageFormat::Png.to_mime_type() {
            return Ok(Cow::Borrowed(self.bytes()));
        }
        let decoded = image::load_from_memory(self.bytes())?;
        let mut out = Cursor::new(Vec::new());
        decoded.write_to(&mut out, ImageFormat::Png)?;
        Ok(Cow::Owned(out.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

    #[test]
    fn rejects_oversized_payload() {
        let err = validate_size(MAX_IMAGE_BYTES + 1).unwrap_err();
        assert!(matches!(err, CaptureError::Validation(_)));
        assert!(validate_size(MAX_IMAGE_BYTES).is_ok());
    }

    #[test]
    fn rejects_non_image_mime() {
        let err = ImageBlob::validate(
            b"hello".to_vec(),
            Some("text/plain"),
            "notes.txt",
            SourceKind::Upload,
        )
        .unwrap_err();
        assert!(matches!(err, CaptureError::Validation(_)));
        assert!(validate_mime("image/").is_err());
        assert!(validate_mime("IMAGE/PNG").is_ok());
    }

    #[test]
    fn derives_mime_from_extension_then_content() -> Result<()> {
        let by_name = ImageBlob::validate(vec![1, 2, 3], None, "shot.jpg", SourceKind::Drop)?;
        assert_eq!(by_name.mime_type(), "image/jpeg");

        let by_content = ImageBlob::validate(PNG_MAGIC.to_vec(), None, "blob", SourceKind::Drop)?;
        assert_eq!(by_content.mime_type(), "image/png");
        Ok(())
    }

    #[test]
    fn install_revokes_previous_preview_first() -> Result<()> {
        let mut store = PreviewStore::new();
        let first = ImageArtifact::install(
            &mut store,
            None,
            ImageBlob::validate(PNG_MAGIC.to_vec(), None, "a.png", SourceKind::Upload)?,
        );
        let second = ImageArtifact::install(
            &mut store,
            Some(&first),
            ImageBlob::validate(PNG_MAGIC.to_vec(), None, "b.png", SourceKind::Upload)?,
        );

        assert!(!store.is_live(first.preview()));
        assert!(store.is_live(second.preview()));
        assert_eq!(store.live_count(), 1);
        assert_eq!(store.issued_count(), 2);
        assert_eq!(store.revoked_count(), 1);
        assert_ne!(first.preview().uri(), second.preview().uri());
        Ok(())
    }

    #[test]
    fn extension_lookup_falls_back() {
        assert_eq!(extension_for_mime("image/png"), "png");
        assert_eq!(extension_for_mime("image/x-unknown"), "img");
    }
}
