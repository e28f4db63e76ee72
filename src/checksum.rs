//! MD5 checksums for file contents.
//!
//! The remote wire contract (`app_properties.md5sum`) is specifically MD5,
//! lowercase hex. We keep it as a plain `String` rather than a newtype like
//! [`crate::afs`]'s node IDs: it travels as-is into remote metadata maps and
//! there's no binary representation anyone downstream needs back.

use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use data_encoding::HEXLOWER;
use md5::{Digest, Md5};

/// Hash a file's full contents, reading it in fixed-size chunks so we don't
/// have to hold the whole thing in memory for a large tree.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("Couldn't open {}", path.display()))?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("Couldn't read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(HEXLOWER.encode(&hasher.finalize()))
}

/// Hash an in-memory buffer, for tests that stage remote content directly.
pub fn hash_bytes(bytes: &[u8]) -> String {
    HEXLOWER.encode(&Md5::digest(bytes))
}
