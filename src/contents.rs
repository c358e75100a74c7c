use std::fs;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use log::{debug, warn};
use regex::Regex;
use thiserror::Error;
use time::OffsetDateTime;

use sarc::{ArchiveError, FileInfo, KeepSet};

use crate::config::Configuration;

#[derive(Error, Debug)]
pub enum ContentsError {
    #[error("{0:?} is not a directory")]
    NotADirectory(PathBuf),
    #[error("unable to query {path:?}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Name(#[from] ArchiveError),
}

/// Snapshot of a directory tree: the files to archive and the aggregate
/// size and newest modification time used to name the archives.
#[derive(Debug, Clone)]
pub struct ContentsInfo {
    pub base_dir: PathBuf,
    pub contents: Vec<FileInfo>,
    pub size: u64,
    pub newest: OffsetDateTime,
}

impl ContentsInfo {
    /// A tree with nothing in it, dated `newest`.
    pub fn empty(base_dir: &Path, newest: OffsetDateTime) -> Self {
        ContentsInfo {
            base_dir: base_dir.to_path_buf(),
            contents: Vec::new(),
            size: 0,
            newest,
        }
    }

    /// Walk `base_dir` collecting every regular file whose relative path
    /// matches none of the `ignore` patterns, in file name order.
    pub fn scan(base_dir: &Path, ignore: &[Regex]) -> Result<Self, ContentsError> {
        if !base_dir.is_dir() {
            return Err(ContentsError::NotADirectory(base_dir.to_path_buf()));
        }

        let walker = WalkBuilder::new(base_dir)
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        let mut info = ContentsInfo::empty(base_dir, OffsetDateTime::UNIX_EPOCH);

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            let file = FileInfo::new(base_dir, entry.path())?;
            if ignore.iter().any(|r| r.is_match(&file.rel_path)) {
                debug!("Ignoring {}", file.rel_path);
                continue;
            }

            let meta = fs::metadata(entry.path()).map_err(|source| ContentsError::Stat {
                path: entry.path().to_path_buf(),
                source,
            })?;
            info.size += meta.len();

            let modified = meta.modified().map_err(|source| ContentsError::Stat {
                path: entry.path().to_path_buf(),
                source,
            })?;
            info.newest = info.newest.max(OffsetDateTime::from(modified));

            info.contents.push(file);
        }

        Ok(info)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.contents.iter().map(|f| f.rel_path.as_str())
    }

    pub fn newest_epoch(&self) -> i64 {
        self.newest.unix_timestamp()
    }

    /// Names of this tree that `conf` admits and `overlay` does not replace.
    pub fn keep_set(&self, conf: &Configuration, overlay: &ContentsInfo) -> KeepSet {
        let mut keep: KeepSet = self.names().filter(|name| conf.admits(name)).collect();
        for name in overlay.names() {
            keep.remove(name);
        }
        keep
    }

    /// Whether any file of `overlay` has the same name as one of ours.
    pub fn shadowed_by(&self, overlay: &ContentsInfo) -> bool {
        let keep: KeepSet = self.names().collect();
        overlay.names().any(|name| keep.contains(name))
    }
}
