//! Per-piece status sidecar kept alongside a blob in the `download` state.
//!
//! One byte per piece, persisted as a flat file next to the blob so that an
//! in-progress download survives a process restart without re-verifying
//! pieces that already hashed clean.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::store::WriteError;

/// The state of a single piece within a blob in the `download` state.
///
/// Progression is monotonic: `Empty -> Dirty -> Clean`. A piece can never
/// regress once marked `Clean`, and a write always leaves a piece `Dirty`
/// until its hash is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PieceStatus {
    Empty = 0,
    Dirty = 1,
    Clean = 2,
}

impl PieceStatus {
    fn from_byte(b: u8) -> Self {
        match b {
            0 => PieceStatus::Empty,
            1 => PieceStatus::Dirty,
            _ => PieceStatus::Clean,
        }
    }

    /// Checks that moving from `self` to `to` doesn't regress progress.
    /// `Clean -> Dirty` would mean silently discarding a verified piece,
    /// which callers must never do through this sidecar.
    pub fn validate_transition(self, to: PieceStatus) -> Result<(), WriteError> {
        if self == PieceStatus::Clean && to != PieceStatus::Clean {
            return Err(WriteError::InvalidStatusTransition { from: self, to });
        }
        Ok(())
    }
}

pub struct Sidecar {
    file: File,
}

impl Sidecar {
    /// Opens (creating if absent) a sidecar sized for `piece_count` pieces,
    /// all initially `Empty`.
    pub fn open(path: &Path, piece_count: usize) -> std::io::Result<Self> {
        let existed = path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        if !existed {
            file.write_all(&vec![PieceStatus::Empty as u8; piece_count])?;
            file.flush()?;
        }

        Ok(Sidecar { file })
    }

    pub fn get(&mut self, index: usize) -> std::io::Result<PieceStatus> {
        self.file.seek(SeekFrom::Start(index as u64))?;
        let mut b = [0u8; 1];
        self.file.read_exact(&mut b)?;
        Ok(PieceStatus::from_byte(b[0]))
    }

    pub fn set(&mut self, index: usize, status: PieceStatus) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(index as u64))?;
        self.file.write_all(&[status as u8])?;
        self.file.flush()
    }

    pub fn all(&mut self) -> std::io::Result<Vec<PieceStatus>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;
        Ok(buf.into_iter().map(PieceStatus::from_byte).collect())
    }

    pub fn all_clean(&mut self) -> std::io::Result<bool> {
        Ok(self.all()?.iter().all(|s| *s == PieceStatus::Clean))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_sidecar_is_all_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.status");
        let mut sc = Sidecar::open(&path, 4).unwrap();
        assert_eq!(sc.all().unwrap(), vec![PieceStatus::Empty; 4]);
    }

    #[test]
    fn set_and_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.status");
        let mut sc = Sidecar::open(&path, 4).unwrap();
        sc.set(2, PieceStatus::Dirty).unwrap();
        assert_eq!(sc.get(2).unwrap(), PieceStatus::Dirty);
        assert_eq!(sc.get(0).unwrap(), PieceStatus::Empty);
    }

    #[test]
    fn reopening_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.status");
        {
            let mut sc = Sidecar::open(&path, 4).unwrap();
            sc.set(1, PieceStatus::Clean).unwrap();
        }
        let mut sc = Sidecar::open(&path, 4).unwrap();
        assert_eq!(sc.get(1).unwrap(), PieceStatus::Clean);
    }

    #[test]
    fn clean_cannot_regress() {
        assert!(PieceStatus::Clean.validate_transition(PieceStatus::Dirty).is_err());
        assert!(PieceStatus::Clean.validate_transition(PieceStatus::Clean).is_ok());
        assert!(PieceStatus::Empty.validate_transition(PieceStatus::Dirty).is_ok());
    }

    #[test]
    fn all_clean_detects_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.status");
        let mut sc = Sidecar::open(&path, 2).unwrap();
        assert!(!sc.all_clean().unwrap());
        sc.set(0, PieceStatus::Clean).unwrap();
        sc.set(1, PieceStatus::Clean).unwrap();
        assert!(sc.all_clean().unwrap());
    }
}
