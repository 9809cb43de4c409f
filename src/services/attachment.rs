//! Attachment storage — constraint checks and the local-disk backend.
//!
//! DESIGN
//! ======
//! The message service hands an [`Upload`] to a [`FileStorage`] and gets back
//! an opaque reference (`attachments/<uuid>.<ext>`) that is stored on the
//! message row. Size and type constraints live here, not in the message
//! service. Extension/media-type pairs come from `mime_guess`; the content
//! itself is sniffed with `infer`. The router serves
//! `<storage_dir>/attachments` under `/storage`.

use std::path::{Path, PathBuf};

use tracing::info;
use uuid::Uuid;

pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "mp4"];

const ATTACHMENT_DIR: &str = "attachments";

#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("attachment rejected: {0}")]
    Rejected(String),
    #[error("attachment storage failed: {0}")]
    Io(#[from] std::io::Error),
}

/// An uploaded file as received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[async_trait::async_trait]
pub trait FileStorage: Send + Sync {
    /// Validate and persist an upload, returning its stored reference.
    async fn store(&self, upload: Upload) -> Result<String, AttachmentError>;

    /// Delete a previously stored reference. Missing files are not an error.
    async fn remove(&self, reference: &str) -> Result<(), AttachmentError>;
}

// =============================================================================
// CONSTRAINTS
// =============================================================================

fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

/// Whether `mime` is one of the media types registered for `ext`.
fn ext_has_mime(ext: &str, mime: &str) -> bool {
    mime_guess::from_ext(ext).iter().any(|m| m.essence_str() == mime)
}

/// First allowed extension whose registered media types include `mime`.
fn allowed_ext_for_mime(mime: &str) -> Option<&'static str> {
    ALLOWED_EXTENSIONS.iter().copied().find(|ext| ext_has_mime(ext, mime))
}

/// Check size and type and return the normalized file extension.
///
/// The type comes from the file name's extension, then the declared content
/// type, then the sniffed content. All three must agree: a declared type
/// (other than `application/octet-stream`) and the magic bytes of the file
/// must both be registered media types of the chosen extension.
///
/// # Errors
///
/// Returns [`AttachmentError::Rejected`] describing the violated constraint.
pub fn check_upload(upload: &Upload, max_bytes: usize) -> Result<String, AttachmentError> {
    if upload.bytes.is_empty() {
        return Err(AttachmentError::Rejected("attachment is empty".into()));
    }
    if upload.bytes.len() > max_bytes {
        return Err(AttachmentError::Rejected(format!(
            "attachment is {} bytes, limit is {max_bytes}",
            upload.bytes.len()
        )));
    }

    let declared = upload
        .content_type
        .as_deref()
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");
    if let Some(mime) = declared.as_deref() {
        if allowed_ext_for_mime(mime).is_none() {
            return Err(AttachmentError::Rejected(format!("content type {mime} is not allowed")));
        }
    }

    let sniffed = infer::get(&upload.bytes).map(|kind| kind.mime_type());
    let Some(sniffed) = sniffed.filter(|mime| allowed_ext_for_mime(mime).is_some()) else {
        return Err(AttachmentError::Rejected(
            "attachment content is not an allowed image or video".into(),
        ));
    };

    let ext = upload
        .file_name
        .as_deref()
        .and_then(extension_of)
        .or_else(|| declared.as_deref().and_then(allowed_ext_for_mime).map(str::to_owned))
        .or_else(|| allowed_ext_for_mime(sniffed).map(str::to_owned))
        .ok_or_else(|| AttachmentError::Rejected("attachment type could not be determined".into()))?;

    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(AttachmentError::Rejected(format!(
            "file type .{ext} is not allowed (allowed: {})",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }
    if let Some(mime) = declared.as_deref() {
        if !ext_has_mime(&ext, mime) {
            return Err(AttachmentError::Rejected(format!(
                "content type {mime} does not match .{ext}"
            )));
        }
    }
    if !ext_has_mime(&ext, sniffed) {
        return Err(AttachmentError::Rejected(format!(
            "attachment content is {sniffed}, not .{ext}"
        )));
    }
    Ok(if ext == "jpeg" { "jpg".to_owned() } else { ext })
}

// =============================================================================
// LOCAL DISK
// =============================================================================

pub struct LocalDiskStorage {
    root: PathBuf,
    max_bytes: usize,
}

impl LocalDiskStorage {
    #[must_use]
    pub fn new(root: PathBuf, max_bytes: usize) -> Self {
        Self { root, max_bytes }
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf, AttachmentError> {
        let Some(name) = reference.strip_prefix("attachments/") else {
            return Err(AttachmentError::Rejected(format!("unknown reference {reference}")));
        };
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(AttachmentError::Rejected(format!("unknown reference {reference}")));
        }
        Ok(self.root.join(ATTACHMENT_DIR).join(name))
    }
}

#[async_trait::async_trait]
impl FileStorage for LocalDiskStorage {
    async fn store(&self, upload: Upload) -> Result<String, AttachmentError> {
        let ext = check_upload(&upload, self.max_bytes)?;

        let dir = self.root.join(ATTACHMENT_DIR);
        tokio::fs::create_dir_all(&dir).await?;

        let reference = format!("{ATTACHMENT_DIR}/{}.{ext}", Uuid::new_v4());
        let path = self.resolve(&reference)?;
        tokio::fs::write(&path, &upload.bytes).await?;

        info!(%reference, bytes = upload.bytes.len(), "stored attachment");
        Ok(reference)
    }

    async fn remove(&self, reference: &str) -> Result<(), AttachmentError> {
        let path = self.resolve(reference)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[path = "attachment_test.rs"]
mod tests;
