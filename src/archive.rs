//! Archive normalization for submitted and template project packages.
//!
//! Submissions frequently arrive zipped with an extra top-level wrapper
//! directory added by an editor or export tool. Extraction strips the
//! minimum number of leading path segments shared by every non-empty entry
//! so the project root lands directly in the target directory.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::error::{CheckerError, Result};

/// Extract `bytes` into `dest`, overwriting existing files.
///
/// The number of segments stripped is the minimum directory depth across
/// non-empty entries, so mixed-depth archives are never over-stripped.
/// Returns [`CheckerError::Archive`] when the bytes are not a valid zip.
pub fn extract_normalized(bytes: &[u8], dest: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let mut levels_to_reduce: Option<usize> = None;
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.size() == 0 {
            continue;
        }
        let depth = entry.name().matches('/').count();
        levels_to_reduce = Some(match levels_to_reduce {
            Some(min) => min.min(depth),
            None => depth,
        });
    }
    let levels_to_reduce = levels_to_reduce.unwrap_or(0);

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry
            .enclosed_name()
            .ok_or_else(|| CheckerError::UnsafeArchivePath(entry.name().to_string()))?;

        let reduced: PathBuf = name.components().skip(levels_to_reduce).collect();
        if reduced.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(reduced);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
    }

    Ok(())
}
