//! Consolidates a write into a finer archive down into a coarser one.

use std::io::{Read, Seek, Write};

use log::trace;

use crate::error::Result;
use crate::whisper::archive::{self, slot_offset};
use crate::whisper::header::{ArchiveInfo, Header};
use crate::whisper::point::{pack_points, unpack_points, Point, POINT_SIZE};

/// Attempts to propagate the value at `timestamp` from `higher` (finer) into
/// `lower` (coarser). Returns `Ok(true)` if a value was written, `Ok(false)`
/// if there weren't enough known neighbors to satisfy `xFilesFactor` -- the
/// caller stops the propagation cascade in that case.
pub fn propagate<F: Read + Write + Seek>(
    file: &mut F,
    header: &Header,
    timestamp: u32,
    higher: &ArchiveInfo,
    lower: &ArchiveInfo,
) -> Result<bool> {
    let lower_interval_start = timestamp - (timestamp % lower.seconds_per_point);

    let higher_base = archive::read_base_point(file, higher)?;
    let count = (lower.seconds_per_point / higher.seconds_per_point) as usize;

    let neighbor_bytes = if higher_base.timestamp == 0 {
        vec![0u8; count * POINT_SIZE]
    } else {
        let higher_first_offset = slot_offset(higher, higher_base.timestamp, lower_interval_start);
        let relative_first = higher_first_offset - higher.offset;
        let relative_last = (relative_first as u64 + (count * POINT_SIZE) as u64) % higher.size as u64;
        let higher_last_offset = relative_last as u32 + higher.offset;
        archive::read_range(file, higher, higher_first_offset, higher_last_offset)?
    };

    let raw_points = unpack_points(&neighbor_bytes);
    let mut neighbors: Vec<Option<f64>> = vec![None; count];
    for (i, point) in raw_points.iter().enumerate() {
        let expected = lower_interval_start + i as u32 * higher.seconds_per_point;
        if point.timestamp == expected {
            neighbors[i] = Some(point.value);
        }
    }

    let known: Vec<f64> = neighbors.iter().filter_map(|v| *v).collect();
    if known.is_empty() {
        trace!("propagate: no known neighbors at {lower_interval_start}, stopping cascade");
        return Ok(false);
    }

    let known_fraction = known.len() as f64 / neighbors.len() as f64;
    if known_fraction < header.x_files_factor as f64 {
        trace!(
            "propagate: known fraction {known_fraction} below xFilesFactor {}, stopping cascade",
            header.x_files_factor
        );
        return Ok(false);
    }

    let aggregate = header
        .aggregation_method
        .aggregate(&known, Some(&neighbors))?;
    let packed_point = Point::new(lower_interval_start, aggregate);

    let lower_base = archive::read_base_point(file, lower)?;
    let target_offset = if lower_base.timestamp == 0 {
        lower.offset
    } else {
        slot_offset(lower, lower_base.timestamp, lower_interval_start)
    };

    archive::write_wrapped(file, lower, target_offset, &pack_points(&[packed_point]))?;
    trace!(
        "propagate: wrote {aggregate} at {lower_interval_start} into archive step {}",
        lower.seconds_per_point
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::whisper::aggregation::AggregationMethod;
    use crate::whisper::archive::write_wrapped;
    use std::io::Cursor;

    fn archive_info(offset: u32, seconds_per_point: u32, points: u32) -> ArchiveInfo {
        ArchiveInfo {
            offset,
            seconds_per_point,
            points,
            retention: seconds_per_point * points,
            size: points * POINT_SIZE as u32,
        }
    }

    fn test_header(xff: f32) -> Header {
        Header {
            aggregation_method: AggregationMethod::Average,
            max_retention: 3600,
            x_files_factor: xff,
            archives: vec![],
        }
    }

    #[test]
    fn propagates_when_xff_gate_passes() {
        // higher: 1s x 10 points, lower: 2s x 5 points. xff = 0.5, ratio = 2.
        let higher = archive_info(0, 1, 10);
        let lower = archive_info(120, 2, 5);
        let mut cursor = Cursor::new(vec![0u8; 120 + 60]);

        // Write one of the two fine points covering lower interval [0,2).
        let payload = pack_points(&[Point::new(0, 10.0)]);
        write_wrapped(&mut cursor, &higher, 0, &payload).unwrap();

        let header = test_header(0.5);
        let propagated = propagate(&mut cursor, &header, 0, &higher, &lower).unwrap();
        assert!(propagated);

        let lower_base = archive::read_base_point(&mut cursor, &lower).unwrap();
        assert_eq!(lower_base, Point::new(0, 10.0));
    }

    #[test]
    fn does_not_propagate_below_xff_with_no_known() {
        let higher = archive_info(0, 1, 10);
        let lower = archive_info(120, 2, 5);
        let cursor_buf = vec![0u8; 120 + 60];
        let mut cursor = Cursor::new(cursor_buf);

        let header = test_header(0.5);
        let propagated = propagate(&mut cursor, &header, 0, &higher, &lower).unwrap();
        assert!(!propagated);
    }
}
