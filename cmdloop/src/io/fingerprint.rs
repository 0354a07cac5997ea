//! Filesystem fingerprints for watched paths.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::core::change::{Fingerprint, Snapshot};

/// Fingerprint one path, resolved against `workdir` when relative.
///
/// Only regular files are hashed. Devices, fifos and sockets are recorded as
/// `Special` without being opened.
pub fn fingerprint(workdir: &Path, path: &str) -> Result<Fingerprint> {
    let resolved = workdir.join(path);
    // Unreadable metadata (not found, bad component, permission) counts as missing.
    let Ok(metadata) = fs::metadata(&resolved) else {
        return Ok(Fingerprint::Missing);
    };
    if metadata.is_dir() {
        return Ok(Fingerprint::Directory);
    }
    if !metadata.is_file() {
        return Ok(Fingerprint::Special);
    }
    let mut file =
        File::open(&resolved).with_context(|| format!("open {}", resolved.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).with_context(|| format!("hash {}", resolved.display()))?;
    Ok(Fingerprint::File(hex::encode(hasher.finalize())))
}

/// Fingerprint every path in `paths`.
pub fn snapshot(workdir: &Path, paths: &[String]) -> Result<Snapshot> {
    let mut snap = Snapshot::new();
    for path in paths {
        snap.insert(path.clone(), fingerprint(workdir, path)?);
    }
    Ok(snap)
}
