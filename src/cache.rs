//! Content-addressed file cache shared between coordinator and workers.
//!
//! Blobs are keyed by the backend-issued content digest, so an unchanged
//! submission file is transferred at most once across dispatches.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{CheckerError, Result};

#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn exists(&self, hash: &str) -> bool {
        self.entry_path(hash).is_file()
    }

    pub fn write(&self, hash: &str, bytes: &[u8]) -> Result<()> {
        // Write-then-rename so a concurrent reader never sees a partial blob.
        // The temp name derives from the sanitized key, never the raw hash.
        let target = self.entry_path(hash);
        let tmp = target.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, target)?;
        Ok(())
    }

    pub fn read(&self, hash: &str) -> Result<Vec<u8>> {
        match std::fs::read(self.entry_path(hash)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CheckerError::CacheMiss(hash.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn entry_path(&self, hash: &str) -> PathBuf {
        // Digests are hex; anything else is rejected by sanitization to keep
        // keys from addressing outside the cache root.
        let safe: String = hash
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        self.root.join(safe)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Hex-encoded SHA-256 of `bytes`, the digest convention used for cache keys.
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
