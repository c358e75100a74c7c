use std::collections::HashSet;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use log::debug;
use score::buf::{CopyError, StreamCopier};

use crate::entry::{entry_name, ArchiveHandle, Entry, FileInfo};
use crate::error::ArchiveError;
use crate::format::{encode_header, padding, BLOCK_LEN, TERMINATOR_LEN, ZERO_BLOCK};

// Mode stored when the source permissions cannot be queried
pub const DEFAULT_MODE: u32 = 0o644;

/// Which permission bits go into the entry headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModePolicy {
    /// Store the source file's own permission bits.
    #[default]
    Preserve,
    /// Store the same mode for every entry.
    Fixed(u32),
}

impl ModePolicy {
    pub fn resolve(&self, meta: &Metadata) -> u32 {
        match self {
            ModePolicy::Fixed(mode) => *mode,
            ModePolicy::Preserve => source_mode(meta),
        }
    }
}

#[cfg(unix)]
fn source_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn source_mode(_meta: &Metadata) -> u32 {
    DEFAULT_MODE
}

fn mtime_of(meta: &Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArchiveOptions {
    pub copier: StreamCopier,
    pub mode: ModePolicy,
}

pub type FileArchiveWriter = ArchiveWriter<BufWriter<File>>;

/// Sequential tar writer that records the byte range of every entry.
///
/// The end-of-archive marker is only written by [`ArchiveWriter::finish`],
/// a writer dropped early leaves a truncated archive behind.
pub struct ArchiveWriter<W: Write> {
    inner: W,
    path: PathBuf,
    pos: u64,
    copier: StreamCopier,
    mode: ModePolicy,
    entries: Vec<Entry>,
    names: HashSet<String>,
}

impl FileArchiveWriter {
    pub fn create(path: &Path, options: &ArchiveOptions) -> Result<Self, ArchiveError> {
        let file = File::create(path).map_err(|source| ArchiveError::Create {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(ArchiveWriter::new(BufWriter::new(file), path, options))
    }

    /// Open `path` as a raw copy of the base archive with its end-of-archive
    /// marker cut off, ready to append more entries.
    ///
    /// The base entries keep their positions since the prefix is unchanged.
    pub fn splice(base: &ArchiveHandle, path: &Path, options: &ArchiveOptions) -> Result<Self, ArchiveError> {
        let mut src = File::open(&base.path).map_err(|source| ArchiveError::Open {
            path: base.path.clone(),
            source,
        })?;
        let expected = src
            .metadata()
            .map_err(|source| ArchiveError::Stat {
                path: base.path.clone(),
                source,
            })?
            .len();

        let mut out = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| ArchiveError::Create {
                path: path.to_path_buf(),
                source,
            })?;

        let copied = options
            .copier
            .copy(&mut src, &mut out)
            .map_err(|source| ArchiveError::Splice {
                path: base.path.clone(),
                source,
            })?;

        if copied == 0 {
            return Err(ArchiveError::EmptySplice(base.path.clone()));
        }
        if copied != expected {
            return Err(ArchiveError::ShortSplice {
                path: base.path.clone(),
                copied,
                expected,
            });
        }

        let end = truncate_terminator(&mut out, copied).map_err(|e| match e {
            Some(source) => ArchiveError::Terminator {
                path: path.to_path_buf(),
                source,
            },
            None => ArchiveError::MissingTerminator(base.path.clone()),
        })?;
        debug!("Spliced {} bytes of {:?}, appending at {}", copied, base.path, end);

        let mut writer = ArchiveWriter::new(BufWriter::new(out), path, options);
        writer.pos = end;
        for entry in base.entries.iter() {
            writer.names.insert(entry.name.clone());
            writer.entries.push(entry.clone());
        }
        Ok(writer)
    }
}

// Cut the trailing end-of-archive marker off a file of `len` bytes and leave
// the cursor where it began. `None` means the tail is not a marker.
fn truncate_terminator(out: &mut File, len: u64) -> Result<u64, Option<std::io::Error>> {
    if len < TERMINATOR_LEN || len % BLOCK_LEN != 0 {
        return Err(None);
    }
    let end = len - TERMINATOR_LEN;

    let mut marker = [0u8; TERMINATOR_LEN as usize];
    out.seek(SeekFrom::Start(end)).map_err(Some)?;
    out.read_exact(&mut marker).map_err(Some)?;

    if marker.iter().any(|b| *b != 0) {
        return Err(None);
    }

    out.set_len(end).map_err(Some)?;
    out.seek(SeekFrom::Start(end)).map_err(Some)?;
    Ok(end)
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(inner: W, path: &Path, options: &ArchiveOptions) -> Self {
        ArchiveWriter {
            inner,
            path: path.to_path_buf(),
            pos: 0,
            copier: options.copier,
            mode: options.mode,
            entries: Vec::new(),
            names: HashSet::new(),
        }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Archive a file from disk under its name relative to `base_dir`.
    pub fn append_file(&mut self, base_dir: &Path, file: &FileInfo) -> Result<Entry, ArchiveError> {
        let name = entry_name(base_dir, &file.abs_path)?;

        let meta = fs::metadata(&file.abs_path).map_err(|source| ArchiveError::Stat {
            path: file.abs_path.clone(),
            source,
        })?;
        if !meta.is_file() {
            return Err(ArchiveError::NotAFile(file.abs_path.clone()));
        }

        let mut body = File::open(&file.abs_path).map_err(|source| ArchiveError::Open {
            path: file.abs_path.clone(),
            source,
        })?;

        self.append_data(
            &name,
            meta.len(),
            self.mode.resolve(&meta),
            mtime_of(&meta),
            &mut body,
            &file.abs_path,
        )
    }

    /// Write a header and exactly `size` bytes of `body`.
    ///
    /// A body that grew past `size` is cut at `size`, one that came up
    /// short fails since the header already promised `size` bytes.
    pub fn append_data<R: Read>(
        &mut self,
        name: &str,
        size: u64,
        mode: u32,
        mtime: u64,
        body: &mut R,
        source: &Path,
    ) -> Result<Entry, ArchiveError> {
        self.claim(name)?;
        let start = self.pos;

        let header = encode_header(name, size, mode, mtime).map_err(|reason| ArchiveError::InvalidName {
            name: name.to_string(),
            reason,
        })?;
        self.inner
            .write_all(&header)
            .map_err(|source| ArchiveError::HeaderWrite {
                name: name.to_string(),
                source,
            })?;
        self.pos += header.len() as u64;

        let copier = self.copier;
        let copied = copier
            .copy(&mut body.by_ref().take(size), &mut self.inner)
            .map_err(|e| match e {
                CopyError::Read(e) => ArchiveError::BodyRead {
                    path: source.to_path_buf(),
                    source: e,
                },
                CopyError::Write(e) => ArchiveError::BodyWrite {
                    name: name.to_string(),
                    source: e,
                },
            })?;
        self.pos += copied;

        if copied != size {
            return Err(ArchiveError::SizeChanged {
                path: source.to_path_buf(),
                expected: size,
                actual: copied,
            });
        }

        self.pad(size).map_err(|source| ArchiveError::BodyWrite {
            name: name.to_string(),
            source,
        })?;

        Ok(self.record(start, name))
    }

    /// Copy `len` bytes of an already encoded entry verbatim.
    pub fn append_raw<R: Read>(&mut self, name: &str, raw: &mut R, len: u64, source: &Path) -> Result<Entry, ArchiveError> {
        self.claim(name)?;
        let start = self.pos;

        let copier = self.copier;
        let copied = copier
            .copy(&mut raw.by_ref().take(len), &mut self.inner)
            .map_err(|e| ArchiveError::Splice {
                path: source.to_path_buf(),
                source: e,
            })?;
        self.pos += copied;

        if copied != len {
            return Err(ArchiveError::ShortSplice {
                path: source.to_path_buf(),
                copied,
                expected: len,
            });
        }

        Ok(self.record(start, name))
    }

    /// Write the end-of-archive marker and hand back the stream and entries.
    pub fn finish(mut self) -> Result<(W, Vec<Entry>), ArchiveError> {
        let finish = |source| ArchiveError::Finish {
            path: self.path.clone(),
            source,
        };

        self.inner.write_all(&ZERO_BLOCK).map_err(finish)?;
        self.inner.write_all(&ZERO_BLOCK).map_err(finish)?;
        self.inner.flush().map_err(finish)?;

        Ok((self.inner, self.entries))
    }

    fn claim(&mut self, name: &str) -> Result<(), ArchiveError> {
        if self.names.insert(name.to_string()) {
            Ok(())
        } else {
            Err(ArchiveError::DuplicateName(name.to_string()))
        }
    }

    fn pad(&mut self, size: u64) -> std::io::Result<()> {
        let pad = padding(size);
        self.inner.write_all(&ZERO_BLOCK[..pad as usize])?;
        self.pos += pad;
        Ok(())
    }

    fn record(&mut self, start: u64, name: &str) -> Entry {
        let entry = Entry {
            start,
            length: self.pos - start,
            name: name.to_string(),
        };
        debug!("{} @ {}+{}", entry.name, entry.start, entry.length);

        self.entries.push(entry.clone());
        entry
    }
}


#[cfg(test)]
mod test_splice {
    use super::*;

    fn base_archive(dir: &Path) -> ArchiveHandle {
        let path = dir.join("base.tar");
        let mut writer = FileArchiveWriter::create(&path, &ArchiveOptions::default()).unwrap();
        let src = Path::new("<test>");
        writer.append_data("a.txt", 5, 0o644, 0, &mut &b"hello"[..], src).unwrap();
        writer.append_data("b.txt", 3, 0o644, 0, &mut &b"hey"[..], src).unwrap();
        let (_, entries) = writer.finish().unwrap();
        ArchiveHandle::new(&path, entries)
    }

    #[test]
    fn appends_over_terminator() {
        let dir = tempfile::tempdir().unwrap();
        let base = base_archive(dir.path());
        let out = dir.path().join("out.tar");

        let mut writer = FileArchiveWriter::splice(&base, &out, &ArchiveOptions::default()).unwrap();
        assert_eq!(writer.position(), 2048);
        assert_eq!(writer.entries(), &base.entries[..]);

        let d = writer
            .append_data("d.txt", 4, 0o644, 0, &mut &b"dddd"[..], Path::new("<test>"))
            .unwrap();
        assert_eq!(d.start, 2048);
        writer.finish().unwrap();

        let base_bytes = fs::read(&base.path).unwrap();
        let out_bytes = fs::read(&out).unwrap();
        let prefix = base_bytes.len() - TERMINATOR_LEN as usize;

        assert_eq!(&out_bytes[..prefix], &base_bytes[..prefix]);
        assert_eq!(out_bytes.len(), prefix + 1024 + TERMINATOR_LEN as usize);
    }

    #[test]
    fn empty_base_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.tar");
        fs::write(&path, b"").unwrap();

        let base = ArchiveHandle::new(&path, Vec::new());
        let err = FileArchiveWriter::splice(&base, &dir.path().join("out.tar"), &ArchiveOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ArchiveError::EmptySplice(_)));
    }

    #[test]
    fn unterminated_base_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.tar");
        fs::write(&path, vec![1u8; 2048]).unwrap();

        let base = ArchiveHandle::new(&path, Vec::new());
        let err = FileArchiveWriter::splice(&base, &dir.path().join("out.tar"), &ArchiveOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ArchiveError::MissingTerminator(_)));
    }

    #[test]
    fn misaligned_base_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.tar");
        fs::write(&path, vec![0u8; 1500]).unwrap();

        let base = ArchiveHandle::new(&path, Vec::new());
        let err = FileArchiveWriter::splice(&base, &dir.path().join("out.tar"), &ArchiveOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ArchiveError::MissingTerminator(_)));
    }
}
