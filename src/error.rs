use std::io;
use std::path::PathBuf;

use strum::Display;

/// File operation that failed, for error reporting.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Display)]
pub enum FileOp {
    Open,
    Seek,
    Read,
    Write,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A kernel pseudo-file or cgroup directory could not be accessed.
    #[error("{op} '{}' {len}@{offset} failed: {source}", path.display())]
    Io {
        path: PathBuf,
        op: FileOp,
        offset: u64,
        len: u64,
        #[source]
        source: io::Error,
    },

    /// Unparseable kernel input or a caller error on the control surface.
    #[error("{0}")]
    Config(String),
}

impl Error {
    pub(crate) fn open(path: &std::path::Path, source: io::Error) -> Self {
        Error::Io {
            path: path.to_owned(),
            op: FileOp::Open,
            offset: 0,
            len: 0,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
