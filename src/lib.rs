//! A fixed-size, round-robin time-series database file format: one file
//! per metric, one or more fixed-resolution archives cascading into each
//! other through a consolidation function gated by an `xFilesFactor`.

pub mod error;
mod whisper;

pub use error::{Result, WhisperError};

pub use whisper::aggregation::AggregationMethod;
pub use whisper::cache::HeaderCache;
pub use whisper::file::{FetchResult, WhisperFile};
pub use whisper::header::{ArchiveInfo, Header};
pub use whisper::merge::{diff, merge, ArchiveDiff};
pub use whisper::options::WhisperOptions;
pub use whisper::resize::resize;
pub use whisper::schema::ArchiveSpec;
