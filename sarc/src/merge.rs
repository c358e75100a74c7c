use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use log::{debug, info};

use crate::entry::{for_each_raw_entry, ArchiveHandle, FileInfo, KeepSet};
use crate::error::ArchiveError;
use crate::writer::{ArchiveOptions, FileArchiveWriter};

/// Derive a new archive at `output` from `base`, then append `new_files`.
///
/// With a keep set only the base entries it names are carried over, copied
/// byte for byte out of the base archive. Without one the whole base archive
/// is spliced in and the new files land where its terminator was.
pub fn merge(
    base: &ArchiveHandle,
    base_dir: &Path,
    new_files: &[FileInfo],
    output: &Path,
    keep: Option<&KeepSet>,
    options: &ArchiveOptions,
) -> Result<ArchiveHandle, ArchiveError> {
    let mut writer = match keep {
        Some(keep) => {
            info!("Copying {} entries out of {:?}", keep.len(), base.path);
            let mut writer = FileArchiveWriter::create(output, options)?;
            copy_kept(&base.path, keep, &mut writer)?;
            writer
        }
        None => {
            info!("Splicing {:?}", base.path);
            FileArchiveWriter::splice(base, output, options)?
        }
    };

    let total = new_files.len();
    for (idx, file) in new_files.iter().enumerate() {
        info!("Adding {} / {}: {}", idx + 1, total, file.rel_path);
        writer.append_file(base_dir, file)?;
    }

    let (_, entries) = writer.finish()?;
    Ok(ArchiveHandle::new(output, entries))
}

fn copy_kept(base: &Path, keep: &KeepSet, writer: &mut FileArchiveWriter) -> Result<(), ArchiveError> {
    let open = |source| ArchiveError::Open {
        path: base.to_path_buf(),
        source,
    };
    let mut raw = File::open(base).map_err(open)?;

    for_each_raw_entry(base, |name, start, end| {
        if !keep.contains(name) {
            debug!("Dropping {}", name);
            return Ok(());
        }

        raw.seek(SeekFrom::Start(start)).map_err(open)?;
        writer.append_raw(name, &mut raw.by_ref().take(end - start), end - start, base)?;
        Ok(())
    })
}
