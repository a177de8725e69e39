//! Minimal tag -> digest pointer for the agent's `GET /tags/{tag}`
//! endpoint. Deliberately not a tag resolver in the registry sense (no
//! manifest parsing, no image indexing) -- just a flat, file-backed
//! mapping from an opaque tag string to the digest it currently names.

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::digest::Digest;

#[derive(Debug, Clone)]
pub struct TagStore {
    dir: PathBuf,
}

impl TagStore {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = root.into().join("tags");
        fs::create_dir_all(&dir)?;
        Ok(TagStore { dir })
    }

    /// Tags may contain characters that aren't safe path components (`/`,
    /// `:`); hash the tag itself to get a stable filename rather than
    /// trying to escape it.
    fn path_for(&self, tag: &str) -> PathBuf {
        self.dir.join(Digest::of(tag.as_bytes()).to_hex())
    }

    pub fn resolve(&self, tag: &str) -> io::Result<Option<Digest>> {
        match fs::read_to_string(self.path_for(tag)) {
            Ok(hex) => Ok(hex.trim().parse().ok()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn set(&self, tag: &str, digest: Digest) -> io::Result<()> {
        fs::write(self.path_for(tag), digest.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_tag_resolves_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let tags = TagStore::open(dir.path()).unwrap();
        assert!(tags.resolve("latest").unwrap().is_none());
    }

    #[test]
    fn set_then_resolve_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let tags = TagStore::open(dir.path()).unwrap();
        let digest = Digest::of(b"some image layer");
        tags.set("myimage:latest", digest).unwrap();
        assert_eq!(tags.resolve("myimage:latest").unwrap(), Some(digest));
    }
}
