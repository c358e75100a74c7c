use std::path::Path;

use log::info;

use crate::entry::{ArchiveHandle, FileInfo};
use crate::error::ArchiveError;
use crate::writer::{ArchiveOptions, FileArchiveWriter};

/// Write a fresh archive at `output` holding `files` in order.
///
/// Entry names are the paths relative to `base_dir`. The returned handle
/// records where every entry landed.
pub fn build_base(
    base_dir: &Path,
    files: &[FileInfo],
    output: &Path,
    options: &ArchiveOptions,
) -> Result<ArchiveHandle, ArchiveError> {
    let mut writer = FileArchiveWriter::create(output, options)?;
    let total = files.len();

    for (idx, file) in files.iter().enumerate() {
        info!("Archiving {} / {}: {}", idx + 1, total, file.rel_path);
        writer.append_file(base_dir, file)?;
    }

    let (_, entries) = writer.finish()?;
    Ok(ArchiveHandle::new(output, entries))
}
