//! Archive list validation (data model invariants 1-4 in the design doc).
//!
//! Grounded on `validateArchiveList` in the original Python implementation:
//! sort by precision, then walk consecutive pairs checking that precision
//! strictly increases, evenly divides, covers a longer retention, and that
//! the finer archive has enough points to fill one coarser slot.

use crate::error::{Result, WhisperError};

/// One archive's shape: `secondsPerPoint` × `points`. Not yet validated
/// against its neighbors -- see [`validate_archive_list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSpec {
    pub seconds_per_point: u32,
    pub points: u32,
}

impl ArchiveSpec {
    pub fn new(seconds_per_point: u32, points: u32) -> Self {
        ArchiveSpec { seconds_per_point, points }
    }

    pub fn retention(&self) -> u32 {
        self.seconds_per_point * self.points
    }

    pub fn size_on_disk(&self) -> u32 {
        self.points * crate::whisper::point::POINT_SIZE as u32
    }
}

/// Sorts `archives` by ascending `seconds_per_point` and validates invariants
/// 1-4. Returns the (now-sorted) list, or `InvalidConfiguration` naming the
/// first violation found.
pub fn validate_archive_list(mut archives: Vec<ArchiveSpec>) -> Result<Vec<ArchiveSpec>> {
    if archives.is_empty() {
        return Err(WhisperError::InvalidConfiguration(
            "you must specify at least one archive configuration".to_string(),
        ));
    }

    archives.sort_by_key(|a| a.seconds_per_point);

    for i in 0..archives.len() - 1 {
        let archive = archives[i];
        let next = archives[i + 1];

        if archive.seconds_per_point >= next.seconds_per_point {
            return Err(WhisperError::InvalidConfiguration(format!(
                "a whisper database may not be configured with two archives at the same precision (archive{i}: {archive:?}, archive{}: {next:?})",
                i + 1
            )));
        }

        if next.seconds_per_point % archive.seconds_per_point != 0 {
            return Err(WhisperError::InvalidConfiguration(format!(
                "higher precision archives' precision must evenly divide all lower precision archives' precision (archive{i}: {}, archive{}: {})",
                archive.seconds_per_point, i + 1, next.seconds_per_point
            )));
        }

        if next.retention() <= archive.retention() {
            return Err(WhisperError::InvalidConfiguration(format!(
                "lower precision archives must cover larger time intervals than higher precision archives (archive{i}: {} seconds, archive{}: {} seconds)",
                archive.retention(), i + 1, next.retention()
            )));
        }

        let points_per_consolidation = next.seconds_per_point / archive.seconds_per_point;
        if archive.points < points_per_consolidation {
            return Err(WhisperError::InvalidConfiguration(format!(
                "each archive must have at least enough points to consolidate to the next archive (archive{} consolidates {} of archive{i}'s points but it has only {} total points)",
                i + 1, points_per_consolidation, archive.points
            )));
        }
    }

    Ok(archives)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(spp: u32, points: u32) -> ArchiveSpec {
        ArchiveSpec::new(spp, points)
    }

    #[test]
    fn accepts_a_well_formed_list() {
        let archives = validate_archive_list(vec![spec(60, 1440), spec(1, 60)]).unwrap();
        assert_eq!(archives[0].seconds_per_point, 1);
        assert_eq!(archives[1].seconds_per_point, 60);
    }

    #[test]
    fn rejects_empty_list() {
        assert!(validate_archive_list(vec![]).is_err());
    }

    #[test]
    fn rejects_duplicate_precision() {
        assert!(validate_archive_list(vec![spec(60, 10), spec(60, 20)]).is_err());
    }

    #[test]
    fn rejects_non_dividing_precision() {
        assert!(validate_archive_list(vec![spec(7, 100), spec(60, 100)]).is_err());
    }

    #[test]
    fn rejects_non_increasing_retention() {
        // 60*10 = 600, 600*1 = 600: not strictly greater.
        assert!(validate_archive_list(vec![spec(60, 10), spec(600, 1)]).is_err());
    }

    #[test]
    fn rejects_insufficient_points_to_consolidate() {
        // next needs 60/1 = 60 fine points per coarse slot, but archive has only 10.
        assert!(validate_archive_list(vec![spec(1, 10), spec(60, 100)]).is_err());
    }
}
