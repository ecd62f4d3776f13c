//! Non-in-place resize: build a new file with a different archive list,
//! migrate every stored point into it, then swap it in atomically.
//!
//! Grounded on `whisper-resize.py`'s non-`--aggregate` path: that tool's
//! `--aggregate` branch, which interpolates coarse archives from in-memory
//! binary search over the old data, is deliberately not carried over here --
//! plain re-insertion through `update_many` already reconstructs every
//! coarser archive via the ordinary propagation cascade.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::error::{Result, WhisperError};
use crate::whisper::aggregation::AggregationMethod;
use crate::whisper::file::{current_time, WhisperFile};
use crate::whisper::options::WhisperOptions;
use crate::whisper::schema::ArchiveSpec;

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Rebuilds the whisper file at `path` with a new archive list. `None` for
/// `x_files_factor`/`aggregation_method` carries the old file's value
/// forward. On success the file at `path` has the new layout; a `.bak` copy
/// of the original is left behind unless `remove_backup` is set.
#[allow(clippy::too_many_arguments)]
pub fn resize(
    path: &Path,
    new_archives: Vec<ArchiveSpec>,
    x_files_factor: Option<f32>,
    aggregation_method: Option<AggregationMethod>,
    sparse: bool,
    fallocate: bool,
    remove_backup: bool,
    now: Option<i64>,
) -> Result<()> {
    let old_header = WhisperFile::info(path, None)?
        .ok_or_else(|| WhisperError::InvalidConfiguration(format!("file {} does not exist", path.display())))?;

    let xff = x_files_factor.unwrap_or(old_header.x_files_factor);
    let method = aggregation_method.unwrap_or(old_header.aggregation_method);
    let now = now.unwrap_or_else(current_time);

    let mut old_file = WhisperFile::open(path, WhisperOptions::default(), None)?;

    let mut all_points: Vec<(i64, f64)> = Vec::new();
    for archive in old_header.archives.iter().rev() {
        let from_time = now - archive.retention as i64 + archive.seconds_per_point as i64;
        let Some(fetched) = old_file.fetch(from_time, Some(now), Some(now), Some(archive.seconds_per_point))? else {
            continue;
        };
        all_points.extend(
            fetched
                .values
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.map(|value| (fetched.from + i as i64 * fetched.step as i64, value))),
        );
    }
    drop(old_file);

    let tmp_path = sibling_with_suffix(path, ".tmp");
    if tmp_path.exists() {
        fs::remove_file(&tmp_path)?;
    }

    let mut new_file = WhisperFile::create(&tmp_path, new_archives, Some(xff), Some(method), sparse, fallocate, WhisperOptions::default())?;
    new_file.update_many(&all_points, Some(now))?;
    drop(new_file);

    let backup_path = sibling_with_suffix(path, ".bak");
    fs::rename(path, &backup_path)?;

    if let Err(e) = fs::rename(&tmp_path, path) {
        fs::rename(&backup_path, path)?;
        return Err(e.into());
    }

    if remove_backup {
        fs::remove_file(&backup_path)?;
    }

    info!("resized whisper file {} ({} points migrated)", path.display(), all_points.len());
    Ok(())
}
