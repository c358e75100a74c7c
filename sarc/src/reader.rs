use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use log::{debug, info, warn};
use score::buf::{CopyError, StreamCopier};
use tar::EntryType;

use crate::compress::open_decompressed;
use crate::error::ArchiveError;

/// What the entry visitor wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub name: String,
    pub output_path: PathBuf,
    pub entry_type: EntryType,
    pub size: u64,
    pub mode: u32,
}

/// Where an entry named `name` lands under `target`.
///
/// The two are concatenated when either side already provides the
/// separator, otherwise exactly one `/` is inserted. `target` is taken as
/// is, it need not be valid UTF-8.
pub fn join_output_path(target: &Path, name: &str) -> PathBuf {
    let mut joined = target.as_os_str().to_os_string();
    if !target.as_os_str().as_encoded_bytes().ends_with(b"/") && !name.starts_with('/') {
        joined.push("/");
    }
    joined.push(name);
    PathBuf::from(joined)
}

/// Walk the entries of a (possibly compressed) archive in order.
///
/// The visitor sees each entry's metadata and its body. `Ok(Stop)` ends the
/// walk successfully, an `Err` ends it with that error.
pub fn for_each_entry<F>(archive: &Path, target: &Path, mut visit: F) -> Result<(), ArchiveError>
where
    F: FnMut(&EntryMeta, &mut dyn Read) -> Result<Decision, ArchiveError>,
{
    let iterate = |source| ArchiveError::Iterate {
        path: archive.to_path_buf(),
        source,
    };

    let mut tar = tar::Archive::new(open_decompressed(archive)?);

    for entry in tar.entries().map_err(iterate)? {
        let mut entry = entry.map_err(iterate)?;

        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let meta = EntryMeta {
            output_path: join_output_path(target, &name),
            entry_type: entry.header().entry_type(),
            size: entry.size(),
            mode: entry.header().mode().unwrap_or(0o644),
            name,
        };

        if visit(&meta, &mut entry)? == Decision::Stop {
            debug!("Stopped at {}", meta.name);
            break;
        }
    }
    Ok(())
}

/// Unpack every entry of `archive` below `target_dir`, returns the number of
/// files written.
pub fn extract(archive: &Path, target_dir: &Path, copier: &StreamCopier) -> Result<u64, ArchiveError> {
    let mut written = 0;

    for_each_entry(archive, target_dir, |meta, body| {
        if Path::new(&meta.name).components().any(|c| c == Component::ParentDir) {
            return Err(ArchiveError::UnsafePath(meta.name.clone()));
        }

        let unpack = |source| ArchiveError::Extract {
            path: meta.output_path.clone(),
            source,
        };

        match meta.entry_type {
            EntryType::Directory => {
                fs::create_dir_all(&meta.output_path).map_err(unpack)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = meta.output_path.parent() {
                    fs::create_dir_all(parent).map_err(unpack)?;
                }

                let mut file = File::create(&meta.output_path).map_err(unpack)?;
                copier.copy(body, &mut file).map_err(|e| match e {
                    CopyError::Read(source) => ArchiveError::Iterate {
                        path: archive.to_path_buf(),
                        source,
                    },
                    CopyError::Write(source) => unpack(source),
                })?;
                set_mode(&meta.output_path, meta.mode).map_err(unpack)?;

                written += 1;
                info!("Extracted {}", meta.name);
            }
            other => warn!("Skipping {} ({:?})", meta.name, other),
        }
        Ok(Decision::Continue)
    })?;

    Ok(written)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// Read the body of the entry stored as `name` into memory.
///
/// An archive without such an entry yields an empty payload.
pub fn fetch(archive: &Path, name: &str) -> Result<Vec<u8>, ArchiveError> {
    let mut payload = Vec::new();

    for_each_entry(archive, Path::new(""), |meta, body| {
        if meta.name != name {
            return Ok(Decision::Continue);
        }

        body.read_to_end(&mut payload).map_err(|source| ArchiveError::Iterate {
            path: archive.to_path_buf(),
            source,
        })?;
        Ok(Decision::Stop)
    })?;

    if payload.is_empty() {
        debug!("{} not found in {:?}", name, archive);
    }
    Ok(payload)
}
