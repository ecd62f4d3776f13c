//! Cross-file operations: backfilling one database from another, and
//! comparing two databases archive by archive.
//!
//! Both require `from` and `to` to share an identical archive list -- a
//! mismatch means the caller should resize one of the files first.

use crate::error::{Result, WhisperError};
use crate::whisper::file::{current_time, WhisperFile};

fn require_matching_archives(a: &WhisperFile, b: &WhisperFile) -> Result<()> {
    if a.header().archives != b.header().archives {
        return Err(WhisperError::InvalidConfiguration(
            "source and destination archive configurations are unalike; resize one of them first".to_string(),
        ));
    }
    Ok(())
}

/// Copies every non-null point from `src` into `dst`, archive by archive,
/// finest first. Existing values in `dst` are not touched except where
/// `src` supplies the authoritative value for a slot `dst` already holds --
/// per the usual bulk-write semantics, the two may race for the same slot
/// and the earlier-submitted write wins (`src`'s, since it is read first).
pub fn merge(
    dst: &mut WhisperFile,
    src: &mut WhisperFile,
    time_from: Option<i64>,
    time_to: Option<i64>,
    now: Option<i64>,
) -> Result<()> {
    require_matching_archives(dst, src)?;

    let now = now.unwrap_or_else(current_time);
    let until_time = time_to.unwrap_or(now);
    let from_time = time_from.unwrap_or(0);
    if until_time < from_time {
        return Err(WhisperError::InvalidConfiguration("time_to must be >= time_from".to_string()));
    }

    let archive_count = dst.header().archives.len();
    for archive_idx in 0..archive_count {
        let archive = dst.header().archives[archive_idx];
        let floor = now - archive.retention as i64;

        let archive_from = from_time.max(floor);
        let archive_to = until_time;
        if archive_to < floor {
            continue;
        }

        let Some(fetched) = src.fetch(archive_from, Some(archive_to), Some(now), Some(archive.seconds_per_point))? else {
            continue;
        };

        let points: Vec<(i64, f64)> = fetched
            .values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|value| (fetched.from + i as i64 * fetched.step as i64, value)))
            .collect();
        if points.is_empty() {
            continue;
        }
        dst.commit_batch_for_merge(archive_idx, points)?;
    }
    Ok(())
}

/// One archive's worth of diff output: every slot where either side has a
/// value (or, with `ignore_empty`, where both do), paired with the
/// mismatching subset.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveDiff {
    pub archive_index: usize,
    pub seconds_per_point: u32,
    /// Slots where the two files disagree, as `(timestamp, from_value, to_value)`.
    pub mismatches: Vec<(i64, Option<f64>, Option<f64>)>,
    /// Count of slots considered (after the `ignore_empty` filter), for
    /// computing a match ratio.
    pub compared_points: usize,
}

/// Compares `from` and `to` archive by archive, finest first. With
/// `ignore_empty`, only slots where both files have a value are considered;
/// otherwise a slot with a value in one file and nothing in the other also
/// counts as compared (and, inherently, as a mismatch).
pub fn diff(
    from: &mut WhisperFile,
    to: &mut WhisperFile,
    ignore_empty: bool,
    until_time: Option<i64>,
    now: Option<i64>,
) -> Result<Vec<ArchiveDiff>> {
    require_matching_archives(from, to)?;

    let now = now.unwrap_or_else(current_time);
    let mut until = until_time.unwrap_or(now);

    let archive_count = to.header().archives.len();
    let mut results = Vec::with_capacity(archive_count);

    for archive_idx in 0..archive_count {
        let archive = to.header().archives[archive_idx];
        let start_time = now - archive.retention as i64;

        let from_fetch = from
            .fetch(start_time, Some(until), Some(now), Some(archive.seconds_per_point))?
            .expect("start_time..until always falls within this archive's own retention");
        let to_fetch = to
            .fetch(start_time, Some(until), Some(now), Some(archive.seconds_per_point))?
            .expect("start_time..until always falls within this archive's own retention");

        let start = from_fetch.from.min(to_fetch.from);
        let end = from_fetch.until.max(to_fetch.until);
        let step = from_fetch.step.min(to_fetch.step) as i64;

        let n = ((end - start) / step).max(0) as usize;
        let mut compared = 0usize;
        let mut mismatches = Vec::new();

        for s in 0..n {
            let timestamp = start + s as i64 * step;
            let from_value = value_at(&from_fetch, timestamp);
            let to_value = value_at(&to_fetch, timestamp);

            let considered = if ignore_empty {
                from_value.is_some() && to_value.is_some()
            } else {
                from_value.is_some() || to_value.is_some()
            };
            if !considered {
                continue;
            }
            compared += 1;
            if from_value != to_value {
                mismatches.push((timestamp, from_value, to_value));
            }
        }

        results.push(ArchiveDiff {
            archive_index: archive_idx,
            seconds_per_point: archive.seconds_per_point,
            mismatches,
            compared_points: compared,
        });
        until = until.min(start_time);
    }
    Ok(results)
}

fn value_at(fetch: &crate::whisper::file::FetchResult, timestamp: i64) -> Option<f64> {
    if timestamp < fetch.from || timestamp >= fetch.until {
        return None;
    }
    let index = ((timestamp - fetch.from) / fetch.step as i64) as usize;
    fetch.values.get(index).copied().flatten()
}
