//! Content addressed names for intermediate and final archives
//!
//! Two runs over an unchanged tree produce the same names:
//!
//!  - base archive: `{working}/{size}_{newest}.tar`
//!  - variant archive: `{working}/{name}_{size}_{newest}.tar`
//!
//! where `newest` is the newest modification time in epoch seconds. The
//! compressed and sealed forms append `.gz` / `.zst` and then `.enc`.
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::contents::ContentsInfo;

pub const SEALED_EXT: &str = "enc";

// Suffixes stripped off a sealed file name to get its extraction directory
const ARCHIVE_SUFFIXES: &[&str] = &[".tmp", ".tgz", ".tar", ".gz", ".zst"];

pub fn base_archive(working: &Path, contents: &ContentsInfo) -> PathBuf {
    working.join(format!("{}_{}.tar", contents.size, contents.newest_epoch()))
}

pub fn variant_archive(working: &Path, name: &str, contents: &ContentsInfo) -> PathBuf {
    working.join(format!("{}_{}_{}.tar", name, contents.size, contents.newest_epoch()))
}

/// `path` with `.{ext}` appended to the full file name.
pub fn with_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Directory a sealed archive extracts into by default: its path without
/// `.enc` and the archive suffixes in front of it.
///
/// `None` when nothing would be left to tell the directory apart from the
/// input file.
pub fn output_dir(sealed: &Path) -> Option<PathBuf> {
    let full = sealed.to_str()?;
    let mut stem = full.strip_suffix(".enc").unwrap_or(full);

    while let Some(rest) = ARCHIVE_SUFFIXES.iter().find_map(|s| stem.strip_suffix(s)) {
        stem = rest;
    }

    if stem.is_empty() || stem == full || stem.ends_with('/') {
        None
    } else {
        Some(PathBuf::from(stem))
    }
}

#[cfg(test)]
mod test_naming {
    use super::*;
    use time::OffsetDateTime;

    fn contents(size: u64, newest: i64) -> ContentsInfo {
        let mut info = ContentsInfo::empty(Path::new("/src"), OffsetDateTime::UNIX_EPOCH);
        info.size = size;
        info.newest = OffsetDateTime::from_unix_timestamp(newest).unwrap();
        info
    }

    #[test]
    fn archive_names() {
        let info = contents(1234, 1_700_000_000);
        let working = Path::new("/cfg/working");

        assert_eq!(base_archive(working, &info), PathBuf::from("/cfg/working/1234_1700000000.tar"));
        assert_eq!(
            variant_archive(working, "prod", &info),
            PathBuf::from("/cfg/working/prod_1234_1700000000.tar")
        );
    }

    #[test]
    fn extensions_chain() {
        let tar = PathBuf::from("/w/prod_1_2.tar");
        let gz = with_extension(&tar, "gz");
        let enc = with_extension(&gz, SEALED_EXT);
        assert_eq!(enc, PathBuf::from("/w/prod_1_2.tar.gz.enc"));
    }

    #[test]
    fn output_dir_strips_chain() {
        assert_eq!(output_dir(Path::new("/w/prod_1_2.tar.gz.enc")), Some(PathBuf::from("/w/prod_1_2")));
        assert_eq!(output_dir(Path::new("/w/site.tgz.enc")), Some(PathBuf::from("/w/site")));
        assert_eq!(output_dir(Path::new("/w/site.tar.zst.enc")), Some(PathBuf::from("/w/site")));
        assert_eq!(output_dir(Path::new("backup.enc")), Some(PathBuf::from("backup")));
    }

    #[test]
    fn output_dir_keeps_inner_dots() {
        assert_eq!(output_dir(Path::new("/w/my.tar.files.tar.gz.enc")), Some(PathBuf::from("/w/my.tar.files")));
    }

    #[test]
    fn output_dir_undeterminable() {
        assert_eq!(output_dir(Path::new("/w/plain")), None);
        assert_eq!(output_dir(Path::new(".tar.gz.enc")), None);
        assert_eq!(output_dir(Path::new("/w/.enc")), None);
    }
}
