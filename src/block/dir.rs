//! Directory-backed block store.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::{BlockFetcher, BlockId, BlockStore, MAX_BLOCK_SIZE};
use crate::error::FetchError;
use crate::Result;

/// Block store keeping one file per block, named by its hex id.
///
/// The directory layout is flat so it can be served as-is by any static HTTP
/// server and read back through [`super::GatewayFetcher`].
#[derive(Debug, Clone)]
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `id`.
    pub fn block_path(&self, id: &BlockId) -> PathBuf {
        self.dir.join(id.to_string())
    }

    fn temp_path(&self, id: &BlockId) -> PathBuf {
        self.dir.join(format!("{}.tmp", id))
    }
}

impl BlockStore for DirStore {
    fn put(&mut self, id: &BlockId, bytes: &[u8]) -> Result<()> {
        let path = self.block_path(id);
        if path.exists() {
            return Ok(());
        }

        // Write to a temp file, then rename so readers never see a partial block
        let temp = self.temp_path(id);
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &path)?;

        log::trace!("Wrote block {} ({} bytes)", id, bytes.len());
        Ok(())
    }
}

impl BlockFetcher for DirStore {
    fn fetch(&self, id: &BlockId) -> std::result::Result<Vec<u8>, FetchError> {
        let path = self.block_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(FetchError::NotFound(*id)),
            Err(e) => return Err(e.into()),
        };
        if bytes.len() > MAX_BLOCK_SIZE {
            return Err(FetchError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }
}
