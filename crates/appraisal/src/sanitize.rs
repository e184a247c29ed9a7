//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Uploaded filenames routinely carry owner names and parcel numbers, so spans
//! only ever see a hashed stem plus the extension.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Replaces the stem of a filename with a short deterministic hash, keeping
/// the extension so traces remain useful for format-related debugging.
///
/// - `smith_parcel_0042.pdf` → `file-1a2b3c4d.pdf`
/// - `README` → `file-5e6f7a8b`
pub fn redact_filename(filename: &str) -> String {
    let name = redact_path(Path::new(filename));
    let (stem, extension) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (name.as_str(), None),
    };

    let mut hasher = DefaultHasher::new();
    stem.hash(&mut hasher);
    let short = (hasher.finish() & 0xffff_ffff) as u32;

    match extension {
        Some(ext) => format!("file-{:08x}.{}", short, ext.to_ascii_lowercase()),
        None => format!("file-{:08x}", short),
    }
}

/// Truncates a hex content digest for log correlation.
pub fn short_digest(digest: &str) -> &str {
    let end = digest
        .char_indices()
        .nth(12)
        .map(|(i, _)| i)
        .unwrap_or(digest.len());
    &digest[..end]
}
