//! Safety checks for files the importer writes.
//!
//! An export must never overwrite the library it was read from or the track
//! database.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

/// Resolve symlinks and `..` when the path exists, so aliases compare equal.
fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Validates that an output path is safe to overwrite.
///
/// Checks:
/// - Output must have the required extension (e.g., "xml")
/// - Output cannot be the same file as any of the provided source paths
pub fn validate_output_path(output: &Path, required_extension: &str, source_paths: &[&Path]) -> Result<()> {
    let has_extension = output
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(required_extension));
    if !has_extension {
        bail!(
            "Safety check failed: output file '{}' must have a .{} extension",
            output.display(),
            required_extension
        );
    }

    let output_canonical = canonical(output);
    for source in source_paths {
        if output == *source || output_canonical == canonical(source) {
            bail!(
                "Safety check failed: output '{}' cannot be the same as source '{}'",
                output.display(),
                source.display()
            );
        }
    }

    Ok(())
}
