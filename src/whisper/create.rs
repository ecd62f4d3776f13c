//! Validates an archive list, writes the header, and reserves the file
//! body using one of three allocation policies.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::error::{Result, WhisperError};
use crate::whisper::aggregation::AggregationMethod;
use crate::whisper::header::Header;
use crate::whisper::schema::{validate_archive_list, ArchiveSpec};

const ZERO_FILL_CHUNK: usize = 16 * 1024;

/// Creates a new whisper file at `path`. Fails with `InvalidConfiguration`
/// if the archive list is invalid or `path` already exists. On any I/O
/// failure partway through, the partially-written file is removed before
/// the error is returned.
pub fn create_file(
    path: &Path,
    archives: Vec<ArchiveSpec>,
    x_files_factor: f32,
    aggregation_method: AggregationMethod,
    sparse: bool,
    fallocate: bool,
) -> Result<File> {
    let archives = validate_archive_list(archives)?;

    if path.exists() {
        return Err(WhisperError::InvalidConfiguration(format!(
            "file {} already exists",
            path.display()
        )));
    }

    match try_create(path, &archives, x_files_factor, aggregation_method, sparse, fallocate) {
        Ok(file) => Ok(file),
        Err(e) => {
            let _ = fs::remove_file(path);
            Err(e)
        }
    }
}

fn try_create(
    path: &Path,
    archives: &[ArchiveSpec],
    x_files_factor: f32,
    aggregation_method: AggregationMethod,
    sparse: bool,
    fallocate: bool,
) -> Result<File> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)?;

    let archive_infos = Header::write_new(&mut file, aggregation_method, x_files_factor, archives)?;

    let header_size = Header::header_size(archives.len()) as u32;
    let body_size: u32 = archive_infos.iter().map(|a| a.size).sum();
    let total_size = header_size + body_size;

    reserve_body(&mut file, header_size, total_size, sparse, fallocate)?;

    debug!(
        "created whisper file {} ({} bytes, {} archives)",
        path.display(),
        total_size,
        archives.len()
    );
    Ok(file)
}

fn reserve_body(file: &mut File, header_size: u32, total_size: u32, sparse: bool, fallocate: bool) -> Result<()> {
    if fallocate {
        if try_fallocate(file, header_size as i64, (total_size - header_size) as i64) {
            return Ok(());
        }
        // Unsupported on this platform/filesystem: fall through to the
        // portable policies below.
    }

    if sparse {
        file.seek(SeekFrom::Start((total_size - 1) as u64))?;
        file.write_all(&[0u8])?;
    } else {
        file.seek(SeekFrom::Start(header_size as u64))?;
        let mut remaining = (total_size - header_size) as usize;
        let zeroes = [0u8; ZERO_FILL_CHUNK];
        while remaining > ZERO_FILL_CHUNK {
            file.write_all(&zeroes)?;
            remaining -= ZERO_FILL_CHUNK;
        }
        file.write_all(&zeroes[..remaining])?;
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn try_fallocate(file: &File, offset: i64, len: i64) -> bool {
    use std::os::unix::io::AsRawFd;
    let ret = unsafe { libc::fallocate(file.as_raw_fd(), 0, offset, len) };
    ret == 0
}

#[cfg(not(target_os = "linux"))]
fn try_fallocate(_file: &File, _offset: i64, _len: i64) -> bool {
    false
}
