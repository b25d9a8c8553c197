use crate::domain::model::{ImageEntry, UploadedFile, IMAGE_EXTENSIONS};
use crate::utils::error::{Result, ServeError};
use crate::utils::validation::{file_extension, has_allowed_extension};
use std::io::{Cursor, Read};
use zip::result::ZipError;
use zip::ZipArchive;

/// macOS resource-fork folder added by Finder's "Compress".
const MACOS_METADATA_DIR: &str = "__MACOSX";
/// All archives of one batch may expand to this many times the body limit.
const EXPANSION_FACTOR: u64 = 4;
const DEFAULT_BODY_LIMIT_BYTES: usize = 32 * 1024 * 1024;

/// How much a batch's zip archives may expand to.
///
/// Header sizes are never trusted; entries are read through a cap and an
/// archive that would exceed it is rejected as malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLimits {
    pub max_entry_bytes: u64,
    pub max_total_bytes: u64,
}

impl ArchiveLimits {
    /// One entry may be as large as a whole request body.
    pub fn for_body_limit(body_limit_bytes: usize) -> Self {
        let body = body_limit_bytes as u64;
        Self {
            max_entry_bytes: body,
            max_total_bytes: body.saturating_mul(EXPANSION_FACTOR),
        }
    }
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self::for_body_limit(DEFAULT_BODY_LIMIT_BYTES)
    }
}

/// Check a single upload and turn it into an image entry keyed by its filename.
pub fn validate_image_upload(file: UploadedFile) -> Result<ImageEntry> {
    if !has_allowed_extension(&file.filename, IMAGE_EXTENSIONS) {
        return Err(ServeError::UnsupportedExtension {
            filename: file.filename,
        });
    }
    Ok(ImageEntry {
        key: file.filename,
        bytes: file.bytes,
    })
}

pub fn is_zip(filename: &str) -> bool {
    file_extension(filename).as_deref() == Some("zip")
}

/// Flatten a batch upload into image entries, expanding zip archives.
///
/// Fails on the first invalid upload or archive entry; nothing is returned
/// for the entries that were fine.
pub fn expand_uploads(files: Vec<UploadedFile>, limits: ArchiveLimits) -> Result<Vec<ImageEntry>> {
    if files.is_empty() {
        return Err(ServeError::NoFiles);
    }

    let mut remaining = limits.max_total_bytes;
    let mut entries = Vec::with_capacity(files.len());
    for file in files {
        if is_zip(&file.filename) {
            let expanded = expand_zip(
                &file,
                ArchiveLimits {
                    max_total_bytes: remaining,
                    ..limits
                },
            )?;
            let size: u64 = expanded.iter().map(|e| e.bytes.len() as u64).sum();
            remaining = remaining.saturating_sub(size);
            entries.extend(expanded);
        } else {
            entries.push(validate_image_upload(file)?);
        }
    }
    Ok(entries)
}

/// Images inside a zip archive, keyed by base filename, in archive order.
///
/// Directory markers and anything under a hidden or `__MACOSX` folder are
/// skipped silently; any other non-image entry is an error.
pub fn expand_zip(file: &UploadedFile, limits: ArchiveLimits) -> Result<Vec<ImageEntry>> {
    let malformed = |source: ZipError| ServeError::MalformedArchive {
        filename: file.filename.clone(),
        source,
    };

    let mut archive = ZipArchive::new(Cursor::new(file.bytes.as_slice())).map_err(malformed)?;
    let mut entries = Vec::new();
    let mut total: u64 = 0;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(malformed)?;
        let name = entry.name().to_string();

        if entry.is_dir() || is_skipped_path(&name) {
            tracing::debug!("Skipping zip entry {}", name);
            continue;
        }

        if !has_allowed_extension(&name, IMAGE_EXTENSIONS) {
            return Err(ServeError::InvalidArchiveEntry { entry: name });
        }

        let cap = limits
            .max_entry_bytes
            .min(limits.max_total_bytes.saturating_sub(total));
        let mut bytes = Vec::new();
        (&mut entry)
            .take(cap.saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(|e| malformed(ZipError::Io(e)))?;
        if bytes.len() as u64 > cap {
            return Err(malformed(ZipError::InvalidArchive(
                format!("entry {} expands past the {} byte limit", name, cap).into(),
            )));
        }
        total += bytes.len() as u64;

        entries.push(ImageEntry {
            key: base_name(&name).to_string(),
            bytes,
        });
    }

    tracing::debug!(
        "Expanded {} images from archive {}",
        entries.len(),
        file.filename
    );
    Ok(entries)
}

/// Hidden files and folders (`.ipynb_checkpoints/`, `.DS_Store`) and macOS metadata.
fn is_skipped_path(name: &str) -> bool {
    name.split(['/', '\\'])
        .filter(|component| !component.is_empty())
        .any(|component| component.starts_with('.') || component == MACOS_METADATA_DIR)
}

fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}
