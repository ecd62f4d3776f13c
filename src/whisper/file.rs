//! The `WhisperFile` handle: open/create a file and drive the single-point
//! and bulk write paths, the reader, and the aggregation-method/xff mutator.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, trace};

use crate::error::{Result, WhisperError};
use crate::whisper::aggregation::AggregationMethod;
use crate::whisper::archive::{self, slot_offset};
use crate::whisper::cache::HeaderCache;
use crate::whisper::create::create_file;
use crate::whisper::header::{ArchiveInfo, Header};
use crate::whisper::lock::LockGuard;
use crate::whisper::options::WhisperOptions;
use crate::whisper::point::{pack_points, unpack_points, Point};
use crate::whisper::propagate::propagate;
use crate::whisper::schema::ArchiveSpec;

pub fn current_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs() as i64
}

/// Floor-mod matching Python's `%` for the timestamp alignment math in this
/// module (archive.rs has its own copy scoped to byte-offset arithmetic).
fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a % b;
    if r < 0 {
        r + b
    } else {
        r
    }
}

/// The dense, null-padded result of a [`WhisperFile::fetch`]: a contiguous
/// span `[from, until)` stepped by `step` seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub from: i64,
    pub until: i64,
    pub step: u32,
    pub values: Vec<Option<f64>>,
}

pub struct WhisperFile {
    file: File,
    path: PathBuf,
    header: Header,
    options: WhisperOptions,
}

impl WhisperFile {
    /// Opens an existing whisper file, decoding its header. Consults
    /// `cache` first when supplied, and populates it on a miss.
    pub fn open<P: AsRef<Path>>(
        path: P,
        options: WhisperOptions,
        cache: Option<&HeaderCache>,
    ) -> Result<WhisperFile> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        options.apply_fadvise(&file);

        let header = if let Some(cache) = cache {
            match cache.get(&path) {
                Some(header) => header,
                None => {
                    let header = Header::read(&mut file, &path)?;
                    cache.put(&path, header.clone());
                    header
                }
            }
        } else {
            Header::read(&mut file, &path)?
        };

        trace!("opened whisper file {}", path.display());
        Ok(WhisperFile { file, path, header, options })
    }

    /// Creates a new whisper file and returns a handle to it, open for
    /// writing. See [`crate::whisper::create::create_file`] for the
    /// allocation policy.
    #[allow(clippy::too_many_arguments)]
    pub fn create<P: AsRef<Path>>(
        path: P,
        archives: Vec<ArchiveSpec>,
        x_files_factor: Option<f32>,
        aggregation_method: Option<AggregationMethod>,
        sparse: bool,
        fallocate: bool,
        options: WhisperOptions,
    ) -> Result<WhisperFile> {
        let path = path.as_ref().to_path_buf();
        let xff = x_files_factor.unwrap_or(0.5);
        let method = aggregation_method.unwrap_or(AggregationMethod::Average);

        let mut file = create_file(&path, archives, xff, method, sparse, fallocate)?;
        options.apply_fadvise(&file);
        let header = Header::read(&mut file, &path)?;

        Ok(WhisperFile { file, path, header, options })
    }

    /// Reads a file's header without keeping it open, for the `info`
    /// operation. Returns `Ok(None)` if the file doesn't exist or can't be
    /// opened; propagates `CorruptWhisperFile` if it exists but is invalid.
    pub fn info<P: AsRef<Path>>(path: P, cache: Option<&HeaderCache>) -> Result<Option<Header>> {
        let path = path.as_ref();
        match File::open(path) {
            Ok(mut file) => {
                if let Some(cache) = cache {
                    if let Some(header) = cache.get(path) {
                        return Ok(Some(header));
                    }
                }
                let header = Header::read(&mut file, path)?;
                if let Some(cache) = cache {
                    cache.put(path, header.clone());
                }
                Ok(Some(header))
            }
            Err(_) => Ok(None),
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_guard(&self) -> Result<Option<LockGuard<'_>>> {
        if self.options.lock {
            Ok(Some(LockGuard::acquire(&self.file)?))
        } else {
            Ok(None)
        }
    }

    fn maybe_flush(&mut self) -> Result<()> {
        if self.options.autoflush {
            self.file.flush()?;
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Single-point write. Selects the highest-resolution archive
    /// whose retention covers the point's age, writes it there, then
    /// cascades the propagator through every coarser archive until one
    /// stops it.
    pub fn update(&mut self, value: f64, timestamp: Option<i64>, now: Option<i64>) -> Result<()> {
        let _guard = self.lock_guard()?;

        let now = now.unwrap_or_else(current_time);
        let timestamp = timestamp.unwrap_or(now);
        let diff = now - timestamp;
        if diff < 0 || diff >= self.header.max_retention as i64 {
            return Err(WhisperError::TimestampNotCovered);
        }

        let target_idx = self
            .header
            .archives
            .iter()
            .position(|a| a.retention as i64 >= diff)
            .expect("max_retention is the largest archive retention");

        let archive = self.header.archives[target_idx];
        let step = archive.seconds_per_point as i64;
        let slot_time = (timestamp - floor_mod(timestamp, step)) as u32;

        let base = archive::read_base_point(&mut self.file, &archive)?;
        let target_offset = if base.timestamp == 0 {
            archive.offset
        } else {
            slot_offset(&archive, base.timestamp, slot_time)
        };
        archive::write_wrapped(&mut self.file, &archive, target_offset, &pack_points(&[Point::new(slot_time, value)]))?;
        trace!("update: wrote {value} at {slot_time} into archive step {}", archive.seconds_per_point);

        let mut higher = archive;
        for lower_idx in (target_idx + 1)..self.header.archives.len() {
            let lower = self.header.archives[lower_idx];
            if !propagate(&mut self.file, &self.header, slot_time, &higher, &lower)? {
                break;
            }
            higher = lower;
        }

        self.maybe_flush()?;
        Ok(())
    }

    /// Bulk write. `points` may be in any order and may contain
    /// duplicate timestamps.
    pub fn update_many(&mut self, points: &[(i64, f64)], now: Option<i64>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let _guard = self.lock_guard()?;
        let now = now.unwrap_or_else(current_time);

        let mut sorted = points.to_vec();
        sorted.sort_by(|a, b| b.0.cmp(&a.0));

        let mut archive_idx = 0usize;
        let mut current_points: Vec<(i64, f64)> = Vec::new();
        let mut exhausted = false;

        for point in sorted {
            let age = now - point.0;
            while (self.header.archives[archive_idx].retention as i64) < age {
                if !current_points.is_empty() {
                    current_points.reverse();
                    self.commit_batch(archive_idx, std::mem::take(&mut current_points))?;
                }
                archive_idx += 1;
                if archive_idx >= self.header.archives.len() {
                    exhausted = true;
                    break;
                }
            }
            if exhausted {
                break;
            }
            current_points.push(point);
        }

        if !exhausted && !current_points.is_empty() {
            current_points.reverse();
            self.commit_batch(archive_idx, current_points)?;
        }

        self.maybe_flush()?;
        Ok(())
    }

    /// Commits a chronologically-ordered batch of points to one archive,
    /// then cascades propagation into every coarser archive. `points` is
    /// chronological (oldest first); duplicate aligned timestamps are
    /// resolved by keeping the one that sorts first in submission order
    /// (see the crate-level design notes on this open question).
    fn commit_batch(&mut self, archive_idx: usize, points: Vec<(i64, f64)>) -> Result<()> {
        let archive = self.header.archives[archive_idx];
        let step = archive.seconds_per_point as i64;

        let aligned: Vec<(u32, f64)> = points
            .iter()
            .map(|&(t, v)| ((t - floor_mod(t, step)) as u32, v))
            .collect();

        let runs = build_runs(&aligned, archive.seconds_per_point);
        if runs.is_empty() {
            return Ok(());
        }

        let base = archive::read_base_point(&mut self.file, &archive)?;
        let base_interval = if base.timestamp == 0 { runs[0].0 } else { base.timestamp };

        for (start_interval, run_points) in &runs {
            let target_offset = slot_offset(&archive, base_interval, *start_interval);
            archive::write_wrapped(&mut self.file, &archive, target_offset, &pack_points(run_points))?;
        }
        debug!(
            "update_many: committed {} run(s) ({} points) to archive step {}",
            runs.len(),
            aligned.len(),
            archive.seconds_per_point
        );

        let mut higher = archive;
        for lower_idx in (archive_idx + 1)..self.header.archives.len() {
            let lower = self.header.archives[lower_idx];
            let lower_intervals: HashSet<u32> = aligned
                .iter()
                .map(|&(t, _)| t - (t % lower.seconds_per_point))
                .collect();

            let mut propagated_any = false;
            for interval in lower_intervals {
                if propagate(&mut self.file, &self.header, interval, &higher, &lower)? {
                    propagated_any = true;
                }
            }
            if !propagated_any {
                break;
            }
            higher = lower;
        }

        Ok(())
    }

    /// Fetch a contiguous range from the appropriate archive.
    pub fn fetch(
        &mut self,
        from_time: i64,
        until_time: Option<i64>,
        now: Option<i64>,
        archive_selector: Option<u32>,
    ) -> Result<Option<FetchResult>> {
        let now = now.unwrap_or_else(current_time);
        let mut until_time = until_time.unwrap_or(now);
        let mut from_time = from_time;

        if from_time > until_time {
            return Err(WhisperError::InvalidTimeInterval { from: from_time, until: until_time });
        }

        let oldest_time = now - self.header.max_retention as i64;
        if from_time > now {
            return Ok(None);
        }
        if until_time < oldest_time {
            return Ok(None);
        }
        if from_time < oldest_time {
            from_time = oldest_time;
        }
        if until_time > now {
            until_time = now;
        }
        let diff = now - from_time;

        let archive = if let Some(selector) = archive_selector {
            *self
                .header
                .archives
                .iter()
                .find(|a| a.seconds_per_point == selector)
                .ok_or(WhisperError::InvalidGranularity(selector))?
        } else {
            *self
                .header
                .archives
                .iter()
                .find(|a| a.retention as i64 >= diff)
                .unwrap_or(self.header.archives.last().expect("at least one archive"))
        };

        Ok(Some(self.fetch_from_archive(&archive, from_time, until_time)?))
    }

    fn fetch_from_archive(&mut self, archive: &ArchiveInfo, from_time: i64, until_time: i64) -> Result<FetchResult> {
        let step = archive.seconds_per_point as i64;
        let from_interval = from_time - floor_mod(from_time, step) + step;
        let mut until_interval = until_time - floor_mod(until_time, step) + step;
        if from_interval == until_interval {
            until_interval += step;
        }

        let n = ((until_interval - from_interval) / step) as usize;
        let base = archive::read_base_point(&mut self.file, archive)?;
        if base.timestamp == 0 {
            return Ok(FetchResult {
                from: from_interval,
                until: until_interval,
                step: archive.seconds_per_point,
                values: vec![None; n],
            });
        }

        let from_offset = slot_offset(archive, base.timestamp, from_interval as u32);
        let until_offset = slot_offset(archive, base.timestamp, until_interval as u32);
        let bytes = archive::read_range(&mut self.file, archive, from_offset, until_offset)?;
        let points = unpack_points(&bytes);

        let mut values = vec![None; n];
        for (i, point) in points.iter().enumerate() {
            let expected = from_interval + i as i64 * step;
            if point.timestamp as i64 == expected {
                values[i] = Some(point.value);
            }
        }

        Ok(FetchResult {
            from: from_interval,
            until: until_interval,
            step: archive.seconds_per_point,
            values,
        })
    }

    /// Rewrites aggregation method and/or xFilesFactor, returning
    /// the previous values. Invalidates `cache`'s entry for this path, if
    /// given, so subsequent cached reads see the new metadata.
    pub fn set_aggregation(
        &mut self,
        aggregation_method: Option<AggregationMethod>,
        x_files_factor: Option<f32>,
        cache: Option<&HeaderCache>,
    ) -> Result<(AggregationMethod, f32)> {
        let _guard = self.lock_guard()?;

        let previous = (self.header.aggregation_method, self.header.x_files_factor);
        let new_method = aggregation_method.unwrap_or(self.header.aggregation_method);
        let new_xff = x_files_factor.unwrap_or(self.header.x_files_factor);

        Header::write_metadata(
            &mut self.file,
            new_method,
            self.header.max_retention,
            new_xff,
            self.header.archives.len() as u32,
        )?;
        self.header.aggregation_method = new_method;
        self.header.x_files_factor = new_xff;

        if let Some(cache) = cache {
            cache.invalidate(&self.path);
        }
        self.maybe_flush()?;
        Ok(previous)
    }

    /// Direct file-level access used by [`crate::whisper::merge`] and
    /// [`crate::whisper::resize`], which need to fetch/commit against two
    /// open files at once without borrowing both through `&mut self`.
    pub(crate) fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    pub(crate) fn commit_batch_for_merge(&mut self, archive_idx: usize, points: Vec<(i64, f64)>) -> Result<()> {
        self.commit_batch(archive_idx, points)
    }
}

/// Groups chronologically-ordered, step-aligned `(timestamp, value)` pairs
/// into maximal runs of consecutive slots, deduplicating same-timestamp
/// entries by keeping the one with the highest index in `aligned` (see
/// [`WhisperFile::commit_batch`] for why that resolves to "oldest submitted
/// wins").
fn build_runs(aligned: &[(u32, f64)], step: u32) -> Vec<(u32, Vec<Point>)> {
    let mut runs = Vec::new();
    let mut current: Vec<Point> = Vec::new();
    let mut previous_interval: Option<u32> = None;
    let len = aligned.len();

    for i in 0..len {
        if i + 1 < len && aligned[i].0 == aligned[i + 1].0 {
            continue;
        }
        let (interval, value) = aligned[i];
        match previous_interval {
            Some(prev) if interval == prev + step => {
                current.push(Point::new(interval, value));
            }
            _ => {
                if !current.is_empty() {
                    runs.push(finish_run(&mut current, previous_interval.unwrap(), step));
                }
                current.push(Point::new(interval, value));
            }
        }
        previous_interval = Some(interval);
    }
    if !current.is_empty() {
        runs.push(finish_run(&mut current, previous_interval.unwrap(), step));
    }
    runs
}

fn finish_run(current: &mut Vec<Point>, last_interval: u32, step: u32) -> (u32, Vec<Point>) {
    let n = current.len() as u32;
    let start_interval = last_interval - step * (n - 1);
    (start_interval, std::mem::take(current))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::whisper::schema::ArchiveSpec;
    use tempfile::tempdir;

    fn open_new(dir: &std::path::Path, archives: Vec<ArchiveSpec>, xff: f32) -> WhisperFile {
        let _ = env_logger::builder().is_test(true).try_init();
        let path = dir.join("db.wsp");
        WhisperFile::create(&path, archives, Some(xff), None, false, false, WhisperOptions::default()).unwrap()
    }

    #[test]
    fn create_then_info_reports_expected_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.wsp");
        let archives = vec![ArchiveSpec::new(1, 60), ArchiveSpec::new(60, 60)];
        WhisperFile::create(&path, archives, None, None, false, false, WhisperOptions::default()).unwrap();

        let header = WhisperFile::info(&path, None).unwrap().unwrap();
        assert_eq!(header.max_retention, 3600);
        assert_eq!(header.x_files_factor, 0.5);
        assert_eq!(header.aggregation_method, AggregationMethod::Average);
        assert_eq!(header.archives[0].offset, 40);
        assert_eq!(header.archives[1].offset, 40 + 720);
    }

    #[test]
    fn write_then_read_back_single_point() {
        let dir = tempdir().unwrap();
        let mut file = open_new(dir.path(), vec![ArchiveSpec::new(1, 60), ArchiveSpec::new(60, 60)], 0.5);
        let now = 1_000_000i64;
        file.update(2.0, Some(now - 2), Some(now)).unwrap();

        let result = file.fetch(now - 3, Some(now - 1), Some(now), None).unwrap().unwrap();
        assert_eq!(result.values, vec![Some(2.0), None]);
    }

    #[test]
    fn rejects_timestamp_outside_retention() {
        let dir = tempdir().unwrap();
        let mut file = open_new(dir.path(), vec![ArchiveSpec::new(1, 60)], 0.5);
        let now = 1_000_000i64;
        let err = file.update(1.0, Some(now - 1000), Some(now)).unwrap_err();
        assert!(matches!(err, WhisperError::TimestampNotCovered));
        let err = file.update(1.0, Some(now + 10), Some(now)).unwrap_err();
        assert!(matches!(err, WhisperError::TimestampNotCovered));
    }

    #[test]
    fn propagation_fires_exactly_at_xff_threshold() {
        let dir = tempdir().unwrap();
        // fine: 1s x 3600, coarse: 60s x 60, ratio 60, xff 0.5
        let mut file = open_new(dir.path(), vec![ArchiveSpec::new(1, 3600), ArchiveSpec::new(60, 60)], 0.5);
        let slot_start = 120_000i64;
        let last = slot_start + 29;

        for i in 0..30 {
            let ts = slot_start + i;
            file.update(10.0, Some(ts), Some(last)).unwrap();
        }
        let result = file
            .fetch(slot_start - 1, Some(slot_start + 1), Some(last), Some(60))
            .unwrap()
            .unwrap();
        assert_eq!(result.values[0], Some(10.0));
    }

    #[test]
    fn propagation_withholds_below_xff_threshold() {
        let dir = tempdir().unwrap();
        let mut file = open_new(dir.path(), vec![ArchiveSpec::new(1, 3600), ArchiveSpec::new(60, 60)], 0.5);
        let slot_start = 120_000i64;
        let last = slot_start + 28;

        for i in 0..29 {
            let ts = slot_start + i;
            file.update(10.0, Some(ts), Some(last)).unwrap();
        }
        let result = file
            .fetch(slot_start - 1, Some(slot_start + 1), Some(last), Some(60))
            .unwrap()
            .unwrap();
        assert_eq!(result.values[0], None);
    }

    #[test]
    fn bulk_write_drops_points_outside_every_archive() {
        let dir = tempdir().unwrap();
        let mut file = open_new(dir.path(), vec![ArchiveSpec::new(1, 10)], 0.5);
        let now = 1000i64;
        // one point in range, one far too old to fit the only archive
        file.update_many(&[(now, 1.0), (now - 10_000, 2.0)], Some(now)).unwrap();

        let result = file.fetch(now - 9, Some(now + 1), Some(now), None).unwrap().unwrap();
        assert_eq!(*result.values.last().unwrap(), Some(1.0));
    }

    #[test]
    fn bulk_write_duplicate_timestamp_keeps_oldest_submitted() {
        let dir = tempdir().unwrap();
        let mut file = open_new(dir.path(), vec![ArchiveSpec::new(1, 10)], 0.5);
        let now = 1000i64;
        // (now, 1.0) submitted first, (now, 2.0) submitted second -- oldest
        // submitted (1.0) should win per the open question in the design doc.
        file.update_many(&[(now, 1.0), (now, 2.0)], Some(now)).unwrap();

        let result = file.fetch(now - 2, Some(now), Some(now), None).unwrap().unwrap();
        assert_eq!(result.values[1], Some(1.0));
    }

    #[test]
    fn ring_wrap_write_then_fetch_returns_correct_value() {
        let dir = tempdir().unwrap();
        let mut file = open_new(dir.path(), vec![ArchiveSpec::new(1, 3)], 0.5);
        let base = 1_000_000i64;
        // Five live writes into a 3-slot ring: the two oldest (base, base+1)
        // get overwritten by base+3 and base+4.
        for i in 0..5 {
            let ts = base + i;
            file.update(i as f64, Some(ts), Some(ts)).unwrap();
        }
        let result = file
            .fetch(base + 1, Some(base + 5), Some(base + 4), None)
            .unwrap()
            .unwrap();
        assert_eq!(result.values, vec![Some(2.0), Some(3.0), Some(4.0)]);
    }

    #[test]
    fn set_aggregation_round_trips_and_leaves_body_untouched() {
        let dir = tempdir().unwrap();
        let mut file = open_new(dir.path(), vec![ArchiveSpec::new(1, 10)], 0.5);
        file.update(1.0, Some(500), Some(500)).unwrap();

        let prev = file.set_aggregation(Some(AggregationMethod::Max), None, None).unwrap();
        assert_eq!(prev, (AggregationMethod::Average, 0.5));
        assert_eq!(file.header().aggregation_method, AggregationMethod::Max);

        let result = file.fetch(499, Some(501), Some(500), None).unwrap().unwrap();
        assert_eq!(result.values[0], Some(1.0));
    }

    #[test]
    fn header_cache_is_invalidated_on_metadata_mutation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.wsp");
        let cache = HeaderCache::default();
        WhisperFile::create(&path, vec![ArchiveSpec::new(1, 10)], None, None, false, false, WhisperOptions::default()).unwrap();

        let first = WhisperFile::info(&path, Some(&cache)).unwrap().unwrap();
        assert_eq!(first.aggregation_method, AggregationMethod::Average);

        let mut handle = WhisperFile::open(&path, WhisperOptions::default(), None).unwrap();
        handle.set_aggregation(Some(AggregationMethod::Max), None, Some(&cache)).unwrap();
        drop(handle);

        let second = WhisperFile::info(&path, Some(&cache)).unwrap().unwrap();
        assert_eq!(second.aggregation_method, AggregationMethod::Max);
    }

    #[test]
    fn corrupt_metadata_is_rejected_by_info_and_mutator() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.wsp");
        WhisperFile::create(&path, vec![ArchiveSpec::new(1, 10)], None, None, false, false, WhisperOptions::default()).unwrap();

        {
            let mut raw = OpenOptions::new().write(true).open(&path).unwrap();
            raw.seek(SeekFrom::Start(0)).unwrap();
            raw.write_all(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        }

        assert!(WhisperFile::info(&path, None).is_err());
        assert!(WhisperFile::open(&path, WhisperOptions::default(), None).is_err());
    }
}
