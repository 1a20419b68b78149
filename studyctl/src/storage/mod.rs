//! Sharded on-disk storage for uploaded files.
//!
//! Every stored file gets a fresh time-based id and lands at
//! `<root>/files/<aa>/<bb>/<id><ext>`, where `aa` and `bb` are the first and second pair of hex
//! characters of the id. The location is a pure function of the id, so no index is needed to
//! find a file, and each shard directory holds roughly 1/256 of its parent's entries.
//!
//! Uploads are written to `<root>/.staging/` first and become visible at their final path only
//! through a single rename, see [`ShardedStore::commit`].

mod error;
mod sharded;

pub use error::StorageError;
pub use sharded::{FileId, Retirement, ShardedStore, StagedFile, StoredFile, FILES_DIR, STAGING_DIR};
