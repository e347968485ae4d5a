//! Where relation bytes come from.

use ahash::AHashMap;
use anyhow::{bail, Context, Result};
use common::HeapError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub trait FileSource {
    /// The whole file.
    fn read(&self, path: &Path) -> Result<Vec<u8>>;
    fn exists(&self, path: &Path) -> bool;
}

/// Reads relation files from the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsFileSource;

impl FileSource for FsFileSource {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        std::fs::read(path).with_context(|| format!("reading {}", path.display()))
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Files held in memory, keyed by path.
#[derive(Clone, Debug, Default)]
pub struct MemoryFileSource {
    files: AHashMap<PathBuf, Vec<u8>>,
}

impl MemoryFileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, bytes: Vec<u8>) -> &mut Self {
        self.files.insert(path.into(), bytes);
        self
    }
}

impl FileSource for MemoryFileSource {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        match self.files.get(path) {
            Some(bytes) => Ok(bytes.clone()),
            None => bail!(HeapError::NotFound(
                "file".into(),
                path.display().to_string().into()
            )),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }
}

/// Path of segment `segno` of a relation: `16401`, `16401.1`, `16401.2`...
pub fn segment_path(path: &Path, segno: usize) -> PathBuf {
    if segno == 0 {
        return path.to_path_buf();
    }
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{segno}"));
    PathBuf::from(name)
}

/// Read the first segment and every following segment that exists.
pub fn read_segments<S: FileSource + ?Sized>(source: &S, path: &Path) -> Result<Vec<Vec<u8>>> {
    let mut segments = vec![source.read(path)?];
    loop {
        let next = segment_path(path, segments.len());
        if !source.exists(&next) {
            break;
        }
        segments.push(source.read(&next)?);
    }
    Ok(segments)
}
