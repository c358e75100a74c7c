use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use log::debug;
use score::buf::{CopyError, StreamCopier};
use serde::Deserialize;

use crate::error::ArchiveError;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];

// Archives are written once and kept, favor ratio over speed
const ZSTD_LEVEL: i32 = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Gzip,
    Zstd,
}

impl Compression {
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Gzip => "gz",
            Compression::Zstd => "zst",
        }
    }

    /// Identify the filter from the first bytes of a stream.
    pub fn sniff(magic: &[u8]) -> Option<Compression> {
        if magic.starts_with(GZIP_MAGIC) {
            Some(Compression::Gzip)
        } else if magic.starts_with(ZSTD_MAGIC) {
            Some(Compression::Zstd)
        } else {
            None
        }
    }
}

/// Stream `input` through the compression filter into `output`, returns the
/// number of uncompressed bytes.
pub fn compress(
    input: &Path,
    output: &Path,
    compression: Compression,
    copier: &StreamCopier,
) -> Result<u64, ArchiveError> {
    let mut src = File::open(input).map_err(|source| ArchiveError::Open {
        path: input.to_path_buf(),
        source,
    })?;
    let dest = File::create(output).map_err(|source| ArchiveError::Create {
        path: output.to_path_buf(),
        source,
    })?;
    let dest = BufWriter::new(dest);

    let failed = |source| ArchiveError::Compress {
        path: output.to_path_buf(),
        source,
    };

    let copied = match compression {
        Compression::Gzip => {
            let mut enc = GzEncoder::new(dest, flate2::Compression::default());
            let copied = copier.copy(&mut src, &mut enc).map_err(failed)?;
            enc.finish()
                .and_then(|mut w| w.flush())
                .map_err(|e| failed(CopyError::Write(e)))?;
            copied
        }
        Compression::Zstd => {
            let mut enc = zstd::stream::write::Encoder::new(dest, ZSTD_LEVEL).map_err(|e| failed(CopyError::Write(e)))?;
            let copied = copier.copy(&mut src, &mut enc).map_err(failed)?;
            enc.finish()
                .and_then(|mut w| w.flush())
                .map_err(|e| failed(CopyError::Write(e)))?;
            copied
        }
    };

    debug!("Compressed {} bytes of {:?} with {:?}", copied, input, compression);
    Ok(copied)
}

/// Open an archive for reading, transparently undoing gzip or zstd framing.
/// Anything else is handed back as is.
pub fn open_decompressed(path: &Path) -> Result<Box<dyn Read>, ArchiveError> {
    let file = File::open(path).map_err(|source| ArchiveError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    let magic = reader.fill_buf().map_err(|source| ArchiveError::Iterate {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(match Compression::sniff(magic) {
        Some(Compression::Gzip) => Box::new(flate2::bufread::MultiGzDecoder::new(reader)),
        Some(Compression::Zstd) => Box::new(
            zstd::stream::read::Decoder::with_buffer(reader).map_err(|source| ArchiveError::Iterate {
                path: path.to_path_buf(),
                source,
            })?,
        ),
        None => Box::new(reader),
    })
}
