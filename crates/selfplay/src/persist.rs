//! Binary blob framing and filesystem plumbing for checkpoints.
//!
//! Every persisted artifact is a 4-byte magic tag, a little-endian `u32`
//! format version and a bincode payload. Writes go to a sibling temp file
//! first and are moved into place with a rename, so a crash never leaves a
//! half-written checkpoint behind. A lock file guards an output directory
//! against concurrent writers.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::TrainError;

/// Identity and format version of one blob family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobKind {
    pub magic: [u8; 4],
    pub version: u32,
}

pub const STATE_MAGIC: BlobKind = BlobKind { magic: *b"SDMP", version: 1 };
pub const ENSEMBLE_MAGIC: BlobKind = BlobKind { magic: *b"ENA1", version: 1 };
pub const AGENT_MAGIC: BlobKind = BlobKind { magic: *b"TDA1", version: 1 };
pub const OPTIMIZER_MAGIC: BlobKind = BlobKind { magic: *b"AMBA", version: 1 };

/// Serializes `value` to `path` atomically.
pub fn save_blob<T: Serialize>(path: &Path, kind: BlobKind, value: &T) -> Result<(), TrainError> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    {
        let mut file = File::create(&temp)?;
        file.write_all(&kind.magic)?;
        file.write_all(&kind.version.to_le_bytes())?;
        let payload = bincode::serialize(value)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        file.write_all(&payload)?;
        file.sync_all()?;
    }

    fs::rename(&temp, path)?;
    Ok(())
}

/// Reads a blob written by [`save_blob`]. A missing file surfaces as
/// [`TrainError::Io`]; any framing or decoding mismatch as
/// [`TrainError::CheckpointCorrupt`].
pub fn load_blob<T: DeserializeOwned>(path: &Path, kind: BlobKind) -> Result<T, TrainError> {
    let mut file = File::open(path)?;
    let mut header = [0u8; 8];
    file.read_exact(&mut header).map_err(|_| {
        TrainError::CheckpointCorrupt(format!("{} is too short", path.display()))
    })?;

    if header[..4] != kind.magic {
        return Err(TrainError::CheckpointCorrupt(format!(
            "{} does not carry the expected magic tag",
            path.display()
        )));
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != kind.version {
        return Err(TrainError::CheckpointCorrupt(format!(
            "{} has format version {version}, expected {}",
            path.display(),
            kind.version
        )));
    }

    let mut payload = Vec::new();
    file.read_to_end(&mut payload)?;
    bincode::deserialize(&payload).map_err(|err| {
        TrainError::CheckpointCorrupt(format!("{}: {err}", path.display()))
    })
}

/// Exclusive lock on an output directory, held for the lifetime of the value.
pub struct DirLock {
    path: PathBuf,
}

impl DirLock {
    pub fn acquire(directory: &Path) -> Result<Self, TrainError> {
        let path = directory.join(".selfplay.lock");
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(TrainError::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!(
                        "output directory is locked by another run (remove {} if stale)",
                        path.display()
                    ),
                )))
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.sdmp");
        let value = vec![1u32, 2, 3];

        save_blob(&path, STATE_MAGIC, &value).unwrap();
        let loaded: Vec<u32> = load_blob(&path, STATE_MAGIC).unwrap();

        assert_eq!(loaded, value);
    }

    #[test]
    fn test_wrong_magic_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.sdmp");
        save_blob(&path, ENSEMBLE_MAGIC, &7u32).unwrap();

        let outcome: Result<u32, _> = load_blob(&path, STATE_MAGIC);
        assert!(matches!(outcome, Err(TrainError::CheckpointCorrupt(_))));
    }

    #[test]
    fn test_truncated_blob_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.sdmp");
        fs::write(&path, b"SD").unwrap();

        let outcome: Result<u32, _> = load_blob(&path, STATE_MAGIC);
        assert!(matches!(outcome, Err(TrainError::CheckpointCorrupt(_))));
    }

    #[test]
    fn test_missing_blob_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let outcome: Result<u32, _> = load_blob(&dir.path().join("absent"), STATE_MAGIC);
        assert!(matches!(outcome, Err(TrainError::Io(_))));
    }

    #[test]
    fn test_directory_lock_excludes_second_writer() {
        let dir = tempfile::tempdir().unwrap();
        let lock = DirLock::acquire(dir.path()).unwrap();
        assert!(DirLock::acquire(dir.path()).is_err());
        drop(lock);
        assert!(DirLock::acquire(dir.path()).is_ok());
    }
}
