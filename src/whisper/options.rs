use std::fs::File;

/// Replaces the original implementation's module-level mutable flags
/// (`LOCK`, `AUTOFLUSH`, `FADVISE_RANDOM`, `CACHE_HEADERS`) with a plain
/// value threaded through `open`/`create` and stored on the handle.
#[derive(Debug, Clone, Copy)]
pub struct WhisperOptions {
    /// Acquire an exclusive advisory `flock` for the duration of each
    /// operation.
    pub lock: bool,
    /// Flush and fsync at the end of each write operation, before any lock
    /// is released.
    pub autoflush: bool,
    /// Advise the kernel that access to this file is random (best-effort;
    /// absent on platforms without `posix_fadvise`).
    pub fadvise_random: bool,
}

impl Default for WhisperOptions {
    fn default() -> Self {
        WhisperOptions {
            lock: false,
            autoflush: false,
            fadvise_random: false,
        }
    }
}

impl WhisperOptions {
    /// Applies `fadvise_random`, if set, to an already-open file. Called
    /// once, right after `open`/`create`.
    pub fn apply_fadvise(&self, file: &File) {
        if self.fadvise_random {
            fadvise_random(file);
        }
    }
}

#[cfg(target_os = "linux")]
fn fadvise_random(file: &File) {
    use std::os::unix::io::AsRawFd;
    unsafe {
        libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_RANDOM);
    }
}

#[cfg(not(target_os = "linux"))]
fn fadvise_random(_file: &File) {}
