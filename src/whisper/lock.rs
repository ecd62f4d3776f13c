//! Advisory exclusive locking over a file descriptor, gated by
//! [`crate::whisper::options::WhisperOptions::lock`].

use std::fs::File;
use std::os::unix::io::AsRawFd;

use crate::error::Result;

/// Acquires an exclusive `flock` on `file`. Blocks until available. Released
/// by [`unlock`], or implicitly when the file descriptor is closed.
pub fn lock_exclusive(file: &File) -> Result<()> {
    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

pub fn unlock(file: &File) -> Result<()> {
    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/// RAII guard: locks on construction, unlocks on drop. Holds no reference to
/// the file besides the raw fd captured at lock time, matching the "scoped
/// resource, released on every exit path" requirement in the design doc.
pub struct LockGuard<'a> {
    file: &'a File,
    held: bool,
}

impl<'a> LockGuard<'a> {
    pub fn acquire(file: &'a File) -> Result<Self> {
        lock_exclusive(file)?;
        Ok(LockGuard { file, held: true })
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.held {
            let _ = unlock(self.file);
        }
    }
}
