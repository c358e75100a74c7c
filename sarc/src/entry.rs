use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use crate::error::ArchiveError;
use crate::format::{padded, TERMINATOR_LEN};

/// One named file inside an archive and the byte range it occupies there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub start: u64,
    pub length: u64,
    pub name: String,
}

impl Entry {
    pub fn end(&self) -> u64 {
        self.start + self.length
    }
}

/// A finished archive on disk and the entries written into it.
///
/// Positions are local to `path`, a handle is never mutated, merging
/// produces a new handle for the new file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHandle {
    pub path: PathBuf,
    pub entries: Vec<Entry>,
}

impl ArchiveHandle {
    pub fn new(path: &Path, entries: Vec<Entry>) -> Self {
        ArchiveHandle {
            path: path.to_path_buf(),
            entries,
        }
    }

    /// Rebuild the handle of an existing uncompressed archive by walking its
    /// headers.
    ///
    /// The archive must end with the end-of-archive marker right after its
    /// last entry, a file cut short by a failed build is rejected.
    pub fn scan(path: &Path) -> Result<ArchiveHandle, ArchiveError> {
        let mut entries = Vec::new();

        for_each_raw_entry(path, |name, start, end| {
            entries.push(Entry {
                start,
                length: end - start,
                name: name.to_string(),
            });
            Ok(())
        })?;

        let end = entries.last().map(Entry::end).unwrap_or(0);
        check_terminator(path, end)?;

        Ok(ArchiveHandle::new(path, entries))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }
}

// The file must be exactly `end` bytes of entries followed by a zeroed marker
fn check_terminator(path: &Path, end: u64) -> Result<(), ArchiveError> {
    let iterate = |source| ArchiveError::Iterate {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(|source| ArchiveError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let len = file.metadata().map_err(iterate)?.len();

    if len != end + TERMINATOR_LEN {
        return Err(ArchiveError::MissingTerminator(path.to_path_buf()));
    }

    let mut marker = [0u8; TERMINATOR_LEN as usize];
    file.seek(SeekFrom::Start(end)).map_err(iterate)?;
    file.read_exact(&mut marker).map_err(iterate)?;

    if marker.iter().any(|b| *b != 0) {
        return Err(ArchiveError::MissingTerminator(path.to_path_buf()));
    }
    Ok(())
}

/// A file slated for inclusion into an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub abs_path: PathBuf,
    pub rel_path: String,
}

impl FileInfo {
    pub fn new(base_dir: &Path, abs_path: &Path) -> Result<FileInfo, ArchiveError> {
        Ok(FileInfo {
            abs_path: abs_path.to_path_buf(),
            rel_path: entry_name(base_dir, abs_path)?,
        })
    }
}

/// Entry name for `abs_path`: the path with `base_dir` stripped, `/`
/// separated, without any leading separator.
pub fn entry_name(base_dir: &Path, abs_path: &Path) -> Result<String, ArchiveError> {
    let invalid = |reason| ArchiveError::InvalidName {
        name: abs_path.display().to_string(),
        reason,
    };

    let rel = abs_path
        .strip_prefix(base_dir)
        .map_err(|_| invalid("not under the base directory"))?;

    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| invalid("not valid UTF-8"))?),
            Component::CurDir => (),
            _ => return Err(invalid("contains a root or parent component")),
        }
    }

    if parts.is_empty() {
        return Err(invalid("is the base directory itself"));
    }
    Ok(parts.join("/"))
}

/// Names a selective merge may carry over from the base archive.
///
/// Leading separators are ignored on both sides so names stored as
/// `/a.txt` and `a.txt` match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeepSet(HashSet<String>);

impl KeepSet {
    pub fn new() -> Self {
        KeepSet(HashSet::new())
    }

    pub fn insert(&mut self, name: &str) -> bool {
        self.0.insert(name.trim_start_matches('/').to_string())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.0.remove(name.trim_start_matches('/'))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name.trim_start_matches('/'))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for KeepSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = KeepSet::new();
        for name in iter {
            set.insert(name.as_ref());
        }
        set
    }
}

/// Walk the entries of an uncompressed archive reporting each one's raw byte
/// range `[start, end)`.
///
/// A range starts where the previous one ended, so extension records
/// (GNU long names, PAX headers) belong to the entry they describe.
/// Iteration stops at the end-of-archive marker.
pub(crate) fn for_each_raw_entry<F>(path: &Path, mut visit: F) -> Result<(), ArchiveError>
where
    F: FnMut(&str, u64, u64) -> Result<(), ArchiveError>,
{
    let iterate = |source| ArchiveError::Iterate {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(|source| ArchiveError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut archive = tar::Archive::new(file);
    let mut cursor: u64 = 0;

    for entry in archive.entries_with_seek().map_err(iterate)? {
        let entry = entry.map_err(iterate)?;

        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let end = entry.raw_file_position() + padded(entry.size());

        visit(&name, cursor, end)?;
        cursor = end;
    }
    Ok(())
}
