use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Result, WhisperError};
use crate::whisper::aggregation::AggregationMethod;
use crate::whisper::codec::{RawArchiveInfo, RawMetadata, ARCHIVE_INFO_SIZE, METADATA_SIZE};

/// A single archive's descriptor, with `retention` and `size` precomputed
/// at header-read time so hot paths never recompute them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArchiveInfo {
    pub offset: u32,
    pub seconds_per_point: u32,
    pub points: u32,
    pub retention: u32,
    pub size: u32,
}

impl ArchiveInfo {
    fn from_raw(raw: RawArchiveInfo) -> ArchiveInfo {
        ArchiveInfo {
            offset: raw.offset,
            seconds_per_point: raw.seconds_per_point,
            points: raw.points,
            retention: raw.seconds_per_point * raw.points,
            size: raw.points * crate::whisper::point::POINT_SIZE as u32,
        }
    }

    fn to_raw(self) -> RawArchiveInfo {
        RawArchiveInfo {
            offset: self.offset,
            seconds_per_point: self.seconds_per_point,
            points: self.points,
        }
    }
}

/// A fully decoded file header: metadata plus every archive descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub aggregation_method: AggregationMethod,
    pub max_retention: u32,
    pub x_files_factor: f32,
    pub archives: Vec<ArchiveInfo>,
}

impl Header {
    pub fn header_size(archive_count: usize) -> usize {
        METADATA_SIZE + archive_count * ARCHIVE_INFO_SIZE
    }

    /// Seeks to 0, decodes the metadata block, then `archiveCount`
    /// descriptors. Any structural problem is reported as
    /// `CorruptWhisperFile` carrying `path` for diagnostics.
    pub fn read<R: Read + Seek>(reader: &mut R, path: &Path) -> Result<Header> {
        reader.seek(SeekFrom::Start(0))?;

        let mut meta_buf = [0u8; METADATA_SIZE];
        reader.read_exact(&mut meta_buf).map_err(|_| {
            WhisperError::corrupt(path.to_path_buf(), "unable to read header")
        })?;
        let meta = RawMetadata::decode_validated(&meta_buf)
            .map_err(|_| WhisperError::corrupt(path.to_path_buf(), "unable to read header"))?;

        let aggregation_method = AggregationMethod::from_u32(meta.aggregation_type)
            .map_err(|_| WhisperError::corrupt(path.to_path_buf(), "unable to read header"))?;

        let mut archives = Vec::with_capacity(meta.archive_count as usize);
        for i in 0..meta.archive_count {
            let mut info_buf = [0u8; ARCHIVE_INFO_SIZE];
            reader.read_exact(&mut info_buf).map_err(|_| {
                WhisperError::corrupt(path.to_path_buf(), format!("unable to read archive{i} metadata"))
            })?;
            archives.push(ArchiveInfo::from_raw(RawArchiveInfo::decode(&info_buf)));
        }

        Ok(Header {
            aggregation_method,
            max_retention: meta.max_retention,
            x_files_factor: meta.x_files_factor,
            archives,
        })
    }

    /// Rewrites the first 16 bytes of `writer` in place. Does not touch the
    /// archive descriptor block or any archive body.
    pub fn write_metadata<W: Write + Seek>(
        writer: &mut W,
        aggregation_method: AggregationMethod,
        max_retention: u32,
        x_files_factor: f32,
        archive_count: u32,
    ) -> Result<()> {
        if !(0.0..=1.0).contains(&x_files_factor) || !x_files_factor.is_finite() {
            return Err(WhisperError::InvalidXFilesFactor(format!(
                "invalid xFilesFactor {x_files_factor}, not between 0 and 1"
            )));
        }

        let meta = RawMetadata {
            aggregation_type: aggregation_method.to_u32(),
            max_retention,
            x_files_factor,
            archive_count,
        };
        let mut buf = [0u8; METADATA_SIZE];
        meta.encode(&mut buf);

        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&buf)?;
        Ok(())
    }

    /// Writes the full header (metadata + every archive descriptor) for a
    /// freshly created file. Archive offsets are running sums starting
    /// right after the descriptor block.
    pub fn write_new<W: Write + Seek>(
        writer: &mut W,
        aggregation_method: AggregationMethod,
        x_files_factor: f32,
        archives: &[crate::whisper::schema::ArchiveSpec],
    ) -> Result<Vec<ArchiveInfo>> {
        let max_retention = archives.iter().map(|a| a.retention()).max().unwrap_or(0);
        Header::write_metadata(
            writer,
            aggregation_method,
            max_retention,
            x_files_factor,
            archives.len() as u32,
        )?;

        let mut offset = Header::header_size(archives.len()) as u32;
        let mut infos = Vec::with_capacity(archives.len());
        for spec in archives {
            let info = ArchiveInfo {
                offset,
                seconds_per_point: spec.seconds_per_point,
                points: spec.points,
                retention: spec.retention(),
                size: spec.size_on_disk(),
            };
            let mut buf = [0u8; ARCHIVE_INFO_SIZE];
            info.to_raw().encode(&mut buf);
            writer.write_all(&buf)?;
            offset += info.size;
            infos.push(info);
        }
        Ok(infos)
    }
}
