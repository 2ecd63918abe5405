//! Directory archiver.
//!
//! Packs every regular file under a directory into a zip, naming each entry
//! by its path relative to the directory's parent (`tests/unit/test_a.py`).
//! Entries are written in file-name order with a fixed timestamp and mode so
//! identical trees produce identical archive bytes.

use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::{Error, Result};

pub const ARCHIVE_FILENAME: &str = "tests.zip";

/// An archive on disk. The backing temp directory, and the archive with it,
/// is removed when this value is dropped.
#[derive(Debug)]
pub struct Archive {
    _scratch: TempDir,
    path: PathBuf,
    entries: usize,
}

impl Archive {
    /// Archive `dir` into a fresh scratch directory.
    pub fn create(dir: &Path) -> Result<Self> {
        let scratch = TempDir::new().map_err(|e| Error::io("creating scratch directory", e))?;
        let path = scratch.path().join(ARCHIVE_FILENAME);
        let entries = write_archive(dir, &path)?;
        debug!("Archived {} files from {} into {}", entries, dir.display(), path.display());
        Ok(Self {
            _scratch: scratch,
            path,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of files packed.
    pub fn entries(&self) -> usize {
        self.entries
    }
}

/// Write a zip of `dir` to `dest`, returning the number of files packed.
pub fn write_archive(dir: &Path, dest: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Err(Error::io_at(
            "archiving",
            dir,
            io::Error::new(io::ErrorKind::NotFound, "directory does not exist"),
        ));
    }
    let base = dir.parent().unwrap_or(dir);

    let file = File::create(dest).map_err(|e| Error::io_at("creating", dest, e))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::<()>::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut count = 0;
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry =
            entry.map_err(|e| Error::io(format!("walking {}", dir.display()), e.into()))?;
        if entry.file_type().is_dir() {
            continue;
        }

        let name = entry_name(base, entry.path())?;
        zip.start_file(name, options)?;
        let mut source =
            File::open(entry.path()).map_err(|e| Error::io_at("opening", entry.path(), e))?;
        io::copy(&mut source, &mut zip).map_err(|e| Error::io_at("archiving", entry.path(), e))?;
        count += 1;
    }

    zip.finish()?;
    Ok(count)
}

/// `/`-separated path of `path` relative to `base`, independent of the host
/// separator.
fn entry_name(base: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(base).unwrap_or(path);
    let mut parts = Vec::new();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            let part = part
                .to_str()
                .ok_or_else(|| Error::Archive(format!("non UTF-8 path: {}", path.display())))?;
            parts.push(part);
        }
    }
    Ok(parts.join("/"))
}
