use std::fs::File;
use std::io::{Error, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use log::debug;
use sodiumoxide::crypto::secretstream::{Header, Key, Pull, Push, Stream, Tag, ABYTES, HEADERBYTES};
use thiserror::Error;

use crate::buf::{copy_chunked, fill_buf, flush_buf, CopyError};
use crate::key::{KeyError, MemKey};

// Sealed file layout:
//  [MAGIC | secretstream header | frame ... | final frame]
// every frame is CHUNK_SIZE of plaintext + ABYTES, the final one is shorter
// (possibly ABYTES only) and tagged with Tag::Final
pub const MAGIC: &[u8; 4] = b"STRE";

// 8Kb encryption frame buffer
const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("unable to initialize libsodium")]
    Init,
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("unable to open {path:?} for reading: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: Error,
    },
    #[error("unable to create {path:?}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: Error,
    },
    #[error("unable to set up the stream for {path:?}: {source}")]
    Stream {
        path: PathBuf,
        #[source]
        source: Error,
    },
    #[error("failed while processing {path:?}: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: CopyError,
    },
}

pub fn init() -> Result<(), CryptoError> {
    sodiumoxide::init().map_err(|_| CryptoError::Init)
}

pub struct Crypter<R, E> {
    reader: R,
    engine: E,
    in_buf: Box<[u8]>,
    out_buf: Vec<u8>,
}

pub fn encrypt<R: Read>(key: &Key, reader: R) -> std::io::Result<Crypter<R, EncEngine>> {
    let (stream, header) = Stream::init_push(key)
        .map_err(|_| Error::new(ErrorKind::Other, "unable to init push stream"))?;
    let engine = EncEngine(stream);

    // Chunk Frame size + encryption additional bytes (~17 bytes)
    let in_buf = vec![0u8; CHUNK_SIZE].into_boxed_slice();
    let mut out_buf = Vec::with_capacity(CHUNK_SIZE + ABYTES);

    // Flush magic + header to out_buf
    out_buf.extend_from_slice(MAGIC);
    out_buf.extend_from_slice(&header.0);

    Ok(Crypter {
        reader,
        engine,
        in_buf,
        out_buf,
    })
}

pub fn decrypt<R: Read>(key: &Key, mut reader: R) -> std::io::Result<Crypter<R, DecEngine>> {
    let mut dmagic: [u8; 4] = [0; 4];
    reader.read_exact(&mut dmagic)?;
    if &dmagic != MAGIC {
        return Err(Error::new(ErrorKind::InvalidData, "not a sealed stream"));
    }

    let mut dheader: [u8; HEADERBYTES] = [0; HEADERBYTES];
    reader.read_exact(&mut dheader)?;
    let fheader = Header::from_slice(&dheader)
        .ok_or_else(|| Error::new(ErrorKind::InvalidData, "malformed stream header"))?;

    // Decrypter setup
    let stream = Stream::init_pull(&fheader, key)
        .map_err(|_| Error::new(ErrorKind::InvalidData, "unable to init pull stream"))?;
    let engine = DecEngine(stream);

    // Chunk Frame size (input will be frame+abytes)
    let in_buf = vec![0u8; CHUNK_SIZE + ABYTES].into_boxed_slice();
    let out_buf = Vec::with_capacity(CHUNK_SIZE);

    Ok(Crypter {
        reader,
        engine,
        in_buf,
        out_buf,
    })
}

impl<R: Read, E: Engine> Read for Crypter<R, E> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        crypt_read(
            &mut self.reader,
            &mut self.out_buf,
            &mut self.engine,
            &mut self.in_buf,
            buf,
        )
    }
}

// Trait for wrapping up the encryption/decryption portion of the code
pub trait Engine {
    fn crypt(&mut self, data: &[u8], tag: Tag, out: &mut Vec<u8>) -> std::io::Result<()>;
    fn is_finalized(&self) -> bool;
}

pub struct EncEngine(Stream<Push>);
pub struct DecEngine(Stream<Pull>);

impl Engine for EncEngine {
    fn crypt(&mut self, data: &[u8], tag: Tag, out: &mut Vec<u8>) -> std::io::Result<()> {
        self.0
            .push_to_vec(data, None, tag, out)
            .map_err(|_| Error::new(ErrorKind::Other, "encryption failed"))
    }

    fn is_finalized(&self) -> bool {
        self.0.is_finalized()
    }
}

impl Engine for DecEngine {
    fn crypt(&mut self, data: &[u8], tag: Tag, out: &mut Vec<u8>) -> std::io::Result<()> {
        let dtag = self
            .0
            .pull_to_vec(data, None, out)
            .map_err(|_| Error::new(ErrorKind::InvalidData, "decryption failed"))?;

        if dtag == tag {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::InvalidData, "unexpected frame tag"))
        }
    }

    fn is_finalized(&self) -> bool {
        self.0.is_finalized()
    }
}

fn crypt_read<R: Read, E: Engine>(
    data: &mut R,
    out_buf: &mut Vec<u8>,
    engine: &mut E,
    in_buf: &mut [u8],
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut buf_write: usize = 0;

    // 1. If buf_write == buf.len() return
    while buf_write < buf.len() {
        if !out_buf.is_empty() {
            // 2. If data in out_buf, flush into buf first
            buf_write += flush_buf(out_buf, &mut buf[buf_write..]);
        } else {
            // 3. Read till there is a full frame of data in in_buf
            match fill_buf(data, in_buf)? {
                // 4a. Nothing left in in_buf, is EoF, and is not finalize, finalize
                (true, 0) if !engine.is_finalized() => {
                    engine.crypt(&[], Tag::Final, out_buf)?;
                }

                // 4b. Nothing left in [in_buf, out_buf] and is EoF, exit
                (true, 0) => return Ok(buf_write),

                // 4c. Copy in_buf -> out_buf
                // 4d. Final read, finalize
                (eof, in_len) => {
                    let tag = if eof { Tag::Final } else { Tag::Message };
                    engine.crypt(&in_buf[..in_len], tag, out_buf)?;
                }
            }
        }
    }

    Ok(buf_write)
}

pub fn encrypt_file(src: &Path, dest: &Path, key_file: &Path) -> Result<u64, CryptoError> {
    let key = MemKey::load(key_file)?;
    seal(src, dest, &key)
}

pub fn decrypt_file(src: &Path, dest: &Path, key_file: &Path) -> Result<u64, CryptoError> {
    let key = MemKey::load(key_file)?;
    unseal(src, dest, &key)
}

pub fn seal(src: &Path, dest: &Path, key: &MemKey) -> Result<u64, CryptoError> {
    let reader = File::open(src).map_err(|source| CryptoError::Open {
        path: src.to_path_buf(),
        source,
    })?;
    let mut enc = encrypt(key.enc_key(), reader).map_err(|source| CryptoError::Stream {
        path: src.to_path_buf(),
        source,
    })?;

    let len = spool(&mut enc, src, dest)?;
    debug!("Sealed {:?} -> {:?} ({} bytes)", src, dest, len);
    Ok(len)
}

pub fn unseal(src: &Path, dest: &Path, key: &MemKey) -> Result<u64, CryptoError> {
    let reader = File::open(src).map_err(|source| CryptoError::Open {
        path: src.to_path_buf(),
        source,
    })?;
    let mut dec = decrypt(key.enc_key(), reader).map_err(|source| CryptoError::Stream {
        path: src.to_path_buf(),
        source,
    })?;

    let len = spool(&mut dec, src, dest)?;
    debug!("Unsealed {:?} -> {:?} ({} bytes)", src, dest, len);
    Ok(len)
}

fn spool<R: Read>(reader: &mut R, src: &Path, dest: &Path) -> Result<u64, CryptoError> {
    let mut writer = File::create(dest).map_err(|source| CryptoError::Create {
        path: dest.to_path_buf(),
        source,
    })?;

    let len = copy_chunked(reader, &mut writer, CHUNK_SIZE).map_err(|source| {
        CryptoError::Copy {
            path: src.to_path_buf(),
            source,
        }
    })?;

    writer.flush().map_err(|source| CryptoError::Copy {
        path: dest.to_path_buf(),
        source: CopyError::Write(source),
    })?;
    Ok(len)
}

#[cfg(test)]
fn gen_key() -> Key {
    sodiumoxide::crypto::secretstream::gen_key()
}
