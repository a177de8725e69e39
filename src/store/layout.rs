//! Path layout for the four blob states a digest moves through.
//!
//! ```text
//! root/
//!   upload/<upload-id>            in-progress inbound write, name not yet content-addressed
//!   download/<digest-hex>         verified pieces accumulating, not yet complete
//!   download/<digest-hex>.status  sidecar: one byte per piece (see sidecar.rs)
//!   cache/<aa>/<bb>/<digest-hex>  complete, content-addressed, servable
//!   trash/<digest-hex>            unlinked from cache, pending reclamation
//! ```

use std::path::{Path, PathBuf};

use crate::digest::Digest;

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Layout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.root.join("upload")
    }

    pub fn upload_path(&self, upload_id: &str) -> PathBuf {
        self.upload_dir().join(upload_id)
    }

    pub fn download_dir(&self) -> PathBuf {
        self.root.join("download")
    }

    pub fn download_path(&self, digest: &Digest) -> PathBuf {
        self.download_dir().join(digest.to_hex())
    }

    pub fn download_status_path(&self, digest: &Digest) -> PathBuf {
        self.download_dir().join(format!("{}.status", digest.to_hex()))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn cache_path(&self, digest: &Digest) -> PathBuf {
        let (a, b) = digest.shard_prefix();
        self.cache_dir().join(a).join(b).join(digest.to_hex())
    }

    pub fn trash_dir(&self) -> PathBuf {
        self.root.join("trash")
    }

    pub fn trash_path(&self, digest: &Digest) -> PathBuf {
        self.trash_dir().join(digest.to_hex())
    }

    pub fn ensure_dirs_exist(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.upload_dir())?;
        std::fs::create_dir_all(self.download_dir())?;
        std::fs::create_dir_all(self.cache_dir())?;
        std::fs::create_dir_all(self.trash_dir())
    }
}
