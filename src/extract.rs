use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use tempfile::NamedTempFile;

use score::buf::StreamCopier;
use score::crypto;

use crate::error::Error;
use crate::naming;

/// Decrypt `sealed` and unpack it into `out_dir`, or into the directory
/// named after `sealed` when none is given.
///
/// The decrypted archive is spooled next to the output directory and
/// removed whether or not extraction succeeds. Returns the directory and
/// the number of files written.
pub fn extract(
    sealed: &Path,
    key_file: &Path,
    out_dir: Option<&Path>,
    copier: &StreamCopier,
) -> Result<(PathBuf, u64), Error> {
    let directory = match out_dir {
        Some(dir) => dir.to_path_buf(),
        None => naming::output_dir(sealed).ok_or_else(|| Error::OutputDir(sealed.to_path_buf()))?,
    };

    // The spool lives in the parent, which has to exist first
    if !directory.exists() {
        fs::create_dir_all(&directory).map_err(|source| Error::CreateDir {
            path: directory.clone(),
            source,
        })?;
    }

    let spool = spool_in(&directory)?;
    crypto::decrypt_file(sealed, spool.path(), key_file)?;

    info!("Extracting {:?} into {:?}", sealed, directory);
    let written = sarc::extract(spool.path(), &directory, copier)?;
    Ok((directory, written))
}

/// Decrypt `sealed` and return the body of its entry `name`, empty when
/// the archive has no such entry.
pub fn fetch(sealed: &Path, key_file: &Path, name: &str) -> Result<Vec<u8>, Error> {
    let spool = spool_in(sealed)?;
    crypto::decrypt_file(sealed, spool.path(), key_file)?;

    Ok(sarc::fetch(spool.path(), name)?)
}

// Temporary file beside `path`, removed on drop
fn spool_in(path: &Path) -> Result<NamedTempFile, Error> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    tempfile::Builder::new()
        .prefix(".strand")
        .suffix(".tmp")
        .tempfile_in(&parent)
        .map_err(|source| Error::Spool { path: parent, source })
}
