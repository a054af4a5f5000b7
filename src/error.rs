use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the arena and the word index.
#[derive(Debug, Error)]
pub enum Error {
    /// The backing file is missing, not a regular file, too small to hold
    /// the utilization footer, or could not be opened read-write.
    #[error("cannot open backing file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The shared read-write mapping of the backing file was refused.
    #[error("cannot map backing file: {0}")]
    Map(#[source] io::Error),

    /// The utilization mark recorded in the backing file is impossible.
    #[error("backing file records an impossible utilization mark ({found} of {limit} usable bytes)")]
    Footer { found: u64, limit: u64 },

    /// Syncing the mapping back to the backing file failed.
    #[error("cannot flush mapping to backing file: {0}")]
    Flush(#[source] io::Error),

    /// The requested allocation exceeds the arena's remaining capacity.
    #[error("arena exhausted: {needed} bytes requested, {available} free")]
    OutOfArena { needed: usize, available: usize },

    /// The word is not present in the index.
    #[error("word not present")]
    NotFound,

    /// A caller-supplied argument violates the interface contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
