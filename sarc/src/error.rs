use std::path::PathBuf;

use score::buf::CopyError;
use thiserror::Error;

// Every variant names the file or entry it was working on, the first failure
// aborts the whole operation and whatever was written so far stays on disk.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("unable to open {path:?} for reading: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to create {path:?}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to query {path:?}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0:?} is not a regular file")]
    NotAFile(PathBuf),
    #[error("invalid entry name {name}: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("entry {0} is already present in the archive")]
    DuplicateName(String),
    #[error("unable to write header for {name}: {source}")]
    HeaderWrite {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to read {path:?}: {source}")]
    BodyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to write body of {name}: {source}")]
    BodyWrite {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path:?} changed while archiving, expected {expected} bytes but read {actual}")]
    SizeChanged {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
    #[error("nothing was copied out of {0:?}")]
    EmptySplice(PathBuf),
    #[error("copied {copied} of {expected} bytes out of {path:?}")]
    ShortSplice {
        path: PathBuf,
        copied: u64,
        expected: u64,
    },
    #[error("unable to splice {path:?}: {source}")]
    Splice {
        path: PathBuf,
        #[source]
        source: CopyError,
    },
    #[error("{0:?} does not end with an end-of-archive marker")]
    MissingTerminator(PathBuf),
    #[error("unable to reposition over the end-of-archive marker of {path:?}: {source}")]
    Terminator {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to finish {path:?}: {source}")]
    Finish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to process {path:?}: {source}")]
    Iterate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("entry {0} escapes the target directory")]
    UnsafePath(String),
    #[error("unable to extract to {path:?}: {source}")]
    Extract {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to compress {path:?}: {source}")]
    Compress {
        path: PathBuf,
        #[source]
        source: CopyError,
    },
}
