//! Ring-buffer addressing and wrap-aware I/O for a single archive.
//!
//! Everything here operates on byte offsets into an open file handle;
//! offsets are always absolute (i.e. already include `archive.offset`).
//! No floating point anywhere -- addressing is integer division/modulo
//! exactly as in the design doc.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::Result;
use crate::whisper::header::ArchiveInfo;
use crate::whisper::point::{Point, POINT_SIZE};

/// Floor-mod: Rust's `%` is a remainder and can be negative for negative
/// dividends, but the ring-buffer math here needs Python's always-positive
/// modulo.
fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a % b;
    if r < 0 {
        r + b
    } else {
        r
    }
}

/// Reads the point stored at the archive's first slot (file order, not
/// necessarily the chronologically earliest point). A zero timestamp here
/// means the archive has never been written.
pub fn read_base_point<F: Read + Seek>(file: &mut F, archive: &ArchiveInfo) -> Result<Point> {
    file.seek(SeekFrom::Start(archive.offset as u64))?;
    let mut buf = [0u8; POINT_SIZE];
    file.read_exact(&mut buf)?;
    Ok(Point::decode(&buf))
}

/// Byte offset, within `archive`'s absolute address space, of the slot that
/// would hold `timestamp`, given the archive's base interval (the timestamp
/// stored at `archive.offset`).
pub fn slot_offset(archive: &ArchiveInfo, base_interval: u32, timestamp: u32) -> u32 {
    let time_distance = timestamp as i64 - base_interval as i64;
    let point_distance = time_distance.div_euclid(archive.seconds_per_point as i64);
    let byte_distance = point_distance * POINT_SIZE as i64;
    archive.offset + floor_mod(byte_distance, archive.size as i64) as u32
}

/// Reads the half-open byte range `[from_offset, until_offset)` within
/// `archive`'s byte extent, with wrap-around handled as two reads when
/// `from_offset >= until_offset`.
pub fn read_range<F: Read + Seek>(
    file: &mut F,
    archive: &ArchiveInfo,
    from_offset: u32,
    until_offset: u32,
) -> Result<Vec<u8>> {
    let archive_end = archive.offset + archive.size;

    if from_offset < until_offset {
        file.seek(SeekFrom::Start(from_offset as u64))?;
        let mut buf = vec![0u8; (until_offset - from_offset) as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    } else {
        file.seek(SeekFrom::Start(from_offset as u64))?;
        let mut head = vec![0u8; (archive_end - from_offset) as usize];
        file.read_exact(&mut head)?;

        file.seek(SeekFrom::Start(archive.offset as u64))?;
        let mut tail = vec![0u8; (until_offset - archive.offset) as usize];
        file.read_exact(&mut tail)?;

        head.extend_from_slice(&tail);
        Ok(head)
    }
}

/// Writes `bytes` starting at `target_offset`, splitting into a tail write
/// followed by a head write wrapping to `archive.offset` if the write would
/// cross the archive's end. Callers guarantee `bytes.len() <= archive.size`.
pub fn write_wrapped<F: Write + Seek>(
    file: &mut F,
    archive: &ArchiveInfo,
    target_offset: u32,
    bytes: &[u8],
) -> Result<()> {
    let archive_end = archive.offset + archive.size;
    let bytes_beyond = (target_offset as i64 + bytes.len() as i64) - archive_end as i64;

    if bytes_beyond > 0 {
        let bytes_beyond = bytes_beyond as usize;
        let (head, tail) = bytes.split_at(bytes.len() - bytes_beyond);

        file.seek(SeekFrom::Start(target_offset as u64))?;
        file.write_all(head)?;

        file.seek(SeekFrom::Start(archive.offset as u64))?;
        file.write_all(tail)?;
    } else {
        file.seek(SeekFrom::Start(target_offset as u64))?;
        file.write_all(bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn archive(offset: u32, seconds_per_point: u32, points: u32) -> ArchiveInfo {
        ArchiveInfo {
            offset,
            seconds_per_point,
            points,
            retention: seconds_per_point * points,
            size: points * POINT_SIZE as u32,
        }
    }

    #[test]
    fn slot_offset_wraps_forward_and_backward() {
        let archive = archive(0, 2, 3);
        let base = 100;
        assert_eq!(slot_offset(&archive, base, 100), 0);
        assert_eq!(slot_offset(&archive, base, 102), 12);
        assert_eq!(slot_offset(&archive, base, 104), 24);
        // one slot past the end wraps back to 0
        assert_eq!(slot_offset(&archive, base, 106), 0);
        // one slot before the base wraps to the last slot
        assert_eq!(slot_offset(&archive, base, 98), 24);
    }

    #[test]
    fn read_range_without_wrap() {
        let archive = archive(0, 2, 3);
        let points = [Point::new(100, 1.0), Point::new(102, 2.0), Point::new(104, 3.0)];
        let mut bytes = Vec::new();
        for p in &points {
            let mut buf = [0u8; POINT_SIZE];
            p.encode(&mut buf);
            bytes.extend_from_slice(&buf);
        }
        let mut cursor = Cursor::new(bytes);
        let read = read_range(&mut cursor, &archive, 0, 24).unwrap();
        assert_eq!(Point::decode(&read[0..12]), points[0]);
        assert_eq!(Point::decode(&read[12..24]), points[1]);
    }

    #[test]
    fn read_range_with_wrap() {
        let archive = archive(0, 2, 3);
        let points = [Point::new(100, 1.0), Point::new(102, 2.0), Point::new(104, 3.0)];
        let mut bytes = Vec::new();
        for p in &points {
            let mut buf = [0u8; POINT_SIZE];
            p.encode(&mut buf);
            bytes.extend_from_slice(&buf);
        }
        let mut cursor = Cursor::new(bytes);
        // from=24 (end) wrapping to until=12 reads [slot2, slot0]
        let read = read_range(&mut cursor, &archive, 24, 12).unwrap();
        assert_eq!(read.len(), 24);
    }

    #[test]
    fn write_wrapped_splits_across_the_end() {
        let archive = archive(0, 2, 3);
        let mut cursor = Cursor::new(vec![0u8; 36]);
        let mut payload = Vec::new();
        for p in [Point::new(200, 9.0), Point::new(202, 10.0)] {
            let mut buf = [0u8; POINT_SIZE];
            p.encode(&mut buf);
            payload.extend_from_slice(&buf);
        }
        // target_offset = 24 (last slot); writing 24 bytes (2 points) crosses
        // the 36-byte end by 12 bytes, so the second point wraps to offset 0.
        write_wrapped(&mut cursor, &archive, 24, &payload).unwrap();
        let data = cursor.into_inner();
        assert_eq!(Point::decode(&data[24..36]), Point::new(200, 9.0));
        assert_eq!(Point::decode(&data[0..12]), Point::new(202, 10.0));
    }
}
