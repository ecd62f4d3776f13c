//! Big-endian pack/unpack of the fixed-size header structures.
//!
//! Point encoding lives in [`super::point`]; this module only covers
//! Metadata and ArchiveDescriptor, the two structures that make up the file
//! header (see the data model in the design doc).

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Result, WhisperError};

pub const METADATA_SIZE: usize = 16;
pub const ARCHIVE_INFO_SIZE: usize = 12;

/// The 16-byte metadata block at the start of every whisper file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawMetadata {
    pub aggregation_type: u32,
    pub max_retention: u32,
    pub x_files_factor: f32,
    pub archive_count: u32,
}

impl RawMetadata {
    pub fn encode(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), METADATA_SIZE);
        BigEndian::write_u32(&mut buf[0..4], self.aggregation_type);
        BigEndian::write_u32(&mut buf[4..8], self.max_retention);
        BigEndian::write_f32(&mut buf[8..12], self.x_files_factor);
        BigEndian::write_u32(&mut buf[12..16], self.archive_count);
    }

    /// Decodes without validating field ranges; callers that need the
    /// "corrupt file" contract use [`decode_validated`](Self::decode_validated).
    pub fn decode(buf: &[u8]) -> RawMetadata {
        RawMetadata {
            aggregation_type: BigEndian::read_u32(&buf[0..4]),
            max_retention: BigEndian::read_u32(&buf[4..8]),
            x_files_factor: BigEndian::read_f32(&buf[8..12]),
            archive_count: BigEndian::read_u32(&buf[12..16]),
        }
    }

    pub fn decode_validated(buf: &[u8]) -> Result<RawMetadata> {
        if buf.len() < METADATA_SIZE {
            return Err(WhisperError::corrupt("<unknown>", "short metadata read"));
        }
        let meta = RawMetadata::decode(buf);
        if !(1..=8).contains(&meta.aggregation_type) {
            return Err(WhisperError::corrupt(
                "<unknown>",
                format!("aggregation type {} out of range", meta.aggregation_type),
            ));
        }
        if !(0.0..=1.0).contains(&meta.x_files_factor) || !meta.x_files_factor.is_finite() {
            return Err(WhisperError::corrupt(
                "<unknown>",
                format!("xFilesFactor {} out of range", meta.x_files_factor),
            ));
        }
        Ok(meta)
    }
}

/// One 12-byte archive descriptor: offset + secondsPerPoint + points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawArchiveInfo {
    pub offset: u32,
    pub seconds_per_point: u32,
    pub points: u32,
}

impl RawArchiveInfo {
    pub fn encode(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), ARCHIVE_INFO_SIZE);
        BigEndian::write_u32(&mut buf[0..4], self.offset);
        BigEndian::write_u32(&mut buf[4..8], self.seconds_per_point);
        BigEndian::write_u32(&mut buf[8..12], self.points);
    }

    pub fn decode(buf: &[u8]) -> RawArchiveInfo {
        RawArchiveInfo {
            offset: BigEndian::read_u32(&buf[0..4]),
            seconds_per_point: BigEndian::read_u32(&buf[4..8]),
            points: BigEndian::read_u32(&buf[8..12]),
        }
    }
}
