use super::error::{Result, StorageError};
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Subdirectory of the sandbox root holding committed files. Public paths start with `/files/`.
pub const FILES_DIR: &str = "files";
/// Subdirectory of the sandbox root holding uploads that have not been committed yet.
pub const STAGING_DIR: &str = ".staging";

const PUBLIC_PREFIX: &str = "/files/";

/// Identifier of a stored file: a version 1 (time-based) UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(Uuid);

impl FileId {
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Outer and inner shard directory names: hex characters 0..2 and 2..4 of the id.
    pub fn shard(&self) -> (String, String) {
        let hex = self.0.simple().to_string();
        (hex[0..2].to_string(), hex[2..4].to_string())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for FileId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(FileId)
    }
}

/// A committed file. Immutable once created; only referenced elsewhere through [`StoredFile::public_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub id: FileId,
    /// Extension including the leading dot, e.g. `.png` or `.flow.js`
    pub extension: String,
}

impl StoredFile {
    pub fn file_name(&self) -> String {
        format!("{}{}", self.id, self.extension)
    }

    /// Path relative to the sandbox root, e.g. `files/aa/bb/<id>.png`
    pub fn relative_path(&self) -> PathBuf {
        let (outer, inner) = self.id.shard();
        Path::new(FILES_DIR).join(outer).join(inner).join(self.file_name())
    }

    /// Path as referenced by documents in the resource store, e.g. `/files/aa/bb/<id>.png`
    pub fn public_path(&self) -> String {
        let (outer, inner) = self.id.shard();
        format!("{PUBLIC_PREFIX}{outer}/{inner}/{}", self.file_name())
    }
}

/// Uploaded bytes sitting in the staging directory, waiting to be committed.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort removal of an abandoned staging file.
    pub async fn discard(self) {
        if let Err(e) = fs::remove_file(&self.path).await
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "Failed to remove staging file");
        }
    }
}

/// Outcome of retiring a superseded file. Retirement never fails the surrounding request.
#[derive(Debug, PartialEq, Eq)]
pub enum Retirement {
    /// The file was deleted
    Removed(PathBuf),
    /// The reference does not point into `/files/` (e.g. an external URL); nothing to do
    NotManaged,
    /// The reference tried to leave the files sandbox and was ignored
    Rejected,
    /// Nothing exists at the referenced location
    Missing,
    /// The file exists but could not be deleted; logged
    Failed,
}

/// Sandboxed, sharded file store rooted at the configured upload folder.
#[derive(Debug)]
pub struct ShardedStore {
    root: PathBuf,
    files_dir: PathBuf,
    staging_dir: PathBuf,
    node_id: [u8; 6],
}

impl ShardedStore {
    /// Open (creating if needed) the sandbox root and clear staging files left by a previous run.
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).await.map_err(|source| StorageError::Root {
            path: root.to_path_buf(),
            source,
        })?;
        let root = fs::canonicalize(root).await.map_err(|source| StorageError::Root {
            path: root.to_path_buf(),
            source,
        })?;

        // Random node id; the multicast bit marks it as not being a hardware address
        let mut node_id = [0u8; 6];
        node_id.copy_from_slice(&Uuid::new_v4().as_bytes()[..6]);
        node_id[0] |= 0x01;

        let store = Self {
            files_dir: root.join(FILES_DIR),
            staging_dir: root.join(STAGING_DIR),
            root,
            node_id,
        };
        store.sweep_staging().await;

        info!(root = %store.root.display(), "Sharded store ready");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    /// A fresh time-based id. Identical content uploaded twice still gets two ids.
    pub fn generate_id(&self) -> FileId {
        FileId(Uuid::now_v1(&self.node_id))
    }

    /// Directory holding the file with this id: `<root>/files/<aa>/<bb>`.
    pub fn shard_path(&self, id: &FileId) -> PathBuf {
        let (outer, inner) = id.shard();
        self.files_dir.join(outer).join(inner)
    }

    /// Create `path` and any missing parents. Succeeds if it already exists as a directory,
    /// including when another request created it concurrently.
    pub async fn ensure_directory(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await.map_err(|source| {
            error!(path = %path.display(), error = %source, "Failed making folder");
            StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Write `contents` to a new file in the staging directory and flush it to disk.
    #[instrument(skip_all, fields(bytes = contents.len()))]
    pub async fn stage(&self, contents: &[u8]) -> Result<StagedFile> {
        self.ensure_directory(&self.staging_dir).await?;

        let path = self.staging_dir.join(format!("{}.part", Uuid::new_v4()));
        let staged = StagedFile { path };

        let written = async {
            let mut file = fs::File::create(&staged.path).await?;
            file.write_all(contents).await?;
            file.sync_all().await
        }
        .await;

        match written {
            Ok(()) => Ok(staged),
            Err(source) => {
                let path = staged.path.clone();
                staged.discard().await;
                Err(StorageError::Stage { path, source })
            }
        }
    }

    /// Atomically move a staged file to its final location.
    ///
    /// The rename is the only point at which the file appears at `final_path`. On failure the
    /// staged file is left where it was.
    #[instrument(skip_all, fields(to = %final_path.display()))]
    pub async fn commit(&self, staged: &StagedFile, final_path: &Path) -> Result<()> {
        if !final_path.starts_with(&self.files_dir) || final_path.components().any(|c| c == Component::ParentDir) {
            return Err(StorageError::OutsideSandbox {
                path: final_path.to_path_buf(),
            });
        }

        fs::rename(&staged.path, final_path).await.map_err(|source| StorageError::Commit {
            from: staged.path.clone(),
            to: final_path.to_path_buf(),
            source,
        })?;

        // Persist the new directory entry; not every platform can open a directory for syncing
        if let Some(parent) = final_path.parent()
            && let Ok(dir) = fs::File::open(parent).await
            && let Err(e) = dir.sync_all().await
        {
            debug!(path = %parent.display(), error = %e, "Could not sync shard directory");
        }

        Ok(())
    }

    /// Store `contents` under a newly generated id: provision the shard, stage, commit.
    ///
    /// If the commit fails the staged file stays in the staging directory until the next
    /// [`ShardedStore::open`] sweeps it.
    #[instrument(skip_all, fields(extension = extension, bytes = contents.len()))]
    pub async fn store(&self, contents: &[u8], extension: &str) -> Result<StoredFile> {
        let stored = StoredFile {
            id: self.generate_id(),
            extension: extension.to_string(),
        };
        self.store_as(stored, contents).await
    }

    async fn store_as(&self, stored: StoredFile, contents: &[u8]) -> Result<StoredFile> {
        self.ensure_directory(&self.shard_path(&stored.id)).await?;

        let staged = self.stage(contents).await?;
        let final_path = self.root.join(stored.relative_path());

        if let Err(e) = self.commit(&staged, &final_path).await {
            warn!(staged = %staged.path().display(), error = %e, "Commit failed, keeping staged file");
            return Err(e);
        }

        info!(file_id = %stored.id, path = %stored.public_path(), "Stored file");
        Ok(stored)
    }

    /// Delete a previously stored file given its public path.
    ///
    /// Only regular paths strictly inside `<root>/files/` are touched. References containing
    /// `..` (or any other non-plain segment) are rejected without looking at the filesystem,
    /// and the resolved target must still lie inside the files directory after symlinks are
    /// followed. Failures are logged and reported through the returned [`Retirement`].
    #[instrument(skip(self))]
    pub async fn remove_superseded(&self, public_path: &str) -> Retirement {
        if Path::new(public_path).components().any(|c| c == Component::ParentDir) {
            warn!("Refusing to retire file outside sandbox");
            return Retirement::Rejected;
        }

        let Some(relative) = public_path.strip_prefix(PUBLIC_PREFIX) else {
            debug!("Previous reference is not a stored file, keeping it");
            return Retirement::NotManaged;
        };

        let relative = Path::new(relative);
        if relative.as_os_str().is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            warn!("Refusing to retire file with irregular path");
            return Retirement::Rejected;
        }

        let files_dir = match fs::canonicalize(&self.files_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Retirement::Missing,
            Err(e) => {
                error!(error = %e, "Unable to resolve files directory");
                return Retirement::Failed;
            }
        };

        let resolved = match fs::canonicalize(files_dir.join(relative)).await {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Previous file already gone");
                return Retirement::Missing;
            }
            Err(e) => {
                error!(error = %e, "Unable to resolve previous file");
                return Retirement::Failed;
            }
        };

        if !resolved.starts_with(&files_dir) || resolved == files_dir {
            warn!(resolved = %resolved.display(), "Previous file resolves outside sandbox");
            return Retirement::Rejected;
        }

        match fs::remove_file(&resolved).await {
            Ok(()) => {
                debug!(path = %resolved.display(), "Unlinked previous file");
                Retirement::Removed(resolved)
            }
            Err(e) => {
                // Proceed even if deleting the old file failed
                error!(path = %resolved.display(), error = %e, "Unable to delete previous file");
                Retirement::Failed
            }
        }
    }

    async fn sweep_staging(&self) {
        let mut entries = match fs::read_dir(&self.staging_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(error = %e, "Unable to read staging directory");
                return;
            }
        };

        let mut removed = 0usize;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "part") && fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Removed leftover staging files");
        }
    }
}
