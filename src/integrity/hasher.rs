//! Canonical hashing of archives and single files.
//!
//! Tree digests use the `h1:` encoding of Go module checksums: for every
//! archive entry, sorted by name, a line `"<sha256 hex>  <name>\n"` is fed to
//! an outer SHA-256 whose sum is standard-base64 encoded and prefixed `h1:`.
//! The result depends only on entry names and contents, never on the order
//! entries were written, timestamps, or permissions.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::archive::Archive;
use crate::error::{Error, Result};

pub const H1_PREFIX: &str = "h1:";

const CHUNK_SIZE: usize = 64 * 1024;

/// Combine `(name, content sha256 hex)` pairs into an `h1:` digest.
pub fn hash_entries(mut entries: Vec<(String, String)>) -> Result<String> {
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut summary = Sha256::new();
    for (name, digest) in &entries {
        if name.contains('\n') {
            return Err(Error::Archive(format!(
                "entry names with newlines are not supported: {:?}",
                name
            )));
        }
        summary.update(format!("{}  {}\n", digest, name).as_bytes());
    }
    Ok(format!("{}{}", H1_PREFIX, STANDARD.encode(summary.finalize())))
}

/// `h1:` digest of every entry in the zip at `archive`.
pub fn hash_tree(archive: &Path) -> Result<String> {
    let file = File::open(archive).map_err(|e| Error::io_at("opening", archive, e))?;
    let mut zip = zip::ZipArchive::new(file)?;

    let mut entries = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let name = entry.name().to_string();
        let digest = sha256_reader(&mut entry)
            .map_err(|e| Error::io(format!("reading archive entry {}", name), e))?;
        entries.push((name, digest));
    }
    hash_entries(entries)
}

/// Archive `dir` and hash the result. The archive is discarded afterwards.
pub fn hash_dir(dir: &Path) -> Result<String> {
    let archive = Archive::create(dir)?;
    hash_tree(archive.path())
}

/// Lowercase hex SHA-256 of a file's bytes.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io_at("opening", path, e))?;
    sha256_reader(&mut file).map_err(|e| Error::io_at("reading", path, e))
}

fn sha256_reader<R: Read>(reader: &mut R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
