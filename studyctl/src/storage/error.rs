use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the sharded file store. Paths are for logs only; callers see a generic message.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to open sandbox root {path}")]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create directory {path}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to stage upload at {path}")]
    Stage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to commit {from} to {to}")]
    Commit {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} is outside the files sandbox")]
    OutsideSandbox { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, StorageError>;
