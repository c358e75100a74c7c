//! Tar container layout as written by this crate
//!
//! The archives are plain GNU flavoured tar so `tar xzf` can always open
//! them. The merge engine splices raw byte ranges out of and into existing
//! archives, so it depends on the exact block arithmetic described here.
//!
//! # Top Level
//!
//! An archive is a sequence of entries followed by the end-of-archive marker.
//! Everything is aligned on [`BLOCK_LEN`] byte blocks.
//!
//! | Blocks | Name       | Description |
//! | -----: | ---------- | ----------- |
//! | 0 or N | long name  | GNU `L` record, only when the name exceeds [`NAME_LEN`] bytes |
//! | 1      | header     | name, size, mode, mtime, checksum |
//! | N      | body       | file content, zero padded to the block boundary |
//! | 2      | terminator | [`TERMINATOR_LEN`] bytes of zero, ends the archive |
//!
//! An entry's recorded byte range covers the long name record (if any), the
//! header, the body and its padding. Ranges of consecutive entries touch, so
//! the first entry starts at 0 and the last one ends exactly where the
//! terminator starts.
//!
//! # Splicing
//!
//! Appending to a finished archive means dropping its terminator: the last
//! [`TERMINATOR_LEN`] bytes must be zero, the file is cut there and new
//! entries are written from that offset. A fresh terminator is written when
//! the appending writer finishes.
use std::cmp;

use tar::{EntryType, Header};

pub const BLOCK_LEN: u64 = 512;
pub const TERMINATOR_LEN: u64 = 2 * BLOCK_LEN;

// Size of the name field in the header block
pub const NAME_LEN: usize = 100;

// Name GNU tar uses for the long name pseudo entry
const LONG_LINK_NAME: &[u8] = b"././@LongLink";

pub const ZERO_BLOCK: [u8; BLOCK_LEN as usize] = [0; BLOCK_LEN as usize];

/// Bytes needed to pad `size` up to the next block boundary.
pub fn padding(size: u64) -> u64 {
    (BLOCK_LEN - size % BLOCK_LEN) % BLOCK_LEN
}

/// Length of a body of `size` bytes once padded.
pub fn padded(size: u64) -> u64 {
    size + padding(size)
}

/// Encode the header blocks for a regular file entry.
///
/// Returns one block for short names, or the GNU long name record followed
/// by the header block when the name does not fit the header.
pub fn encode_header(name: &str, size: u64, mode: u32, mtime: u64) -> Result<Vec<u8>, &'static str> {
    let bytes = name.as_bytes();

    if bytes.is_empty() {
        return Err("empty name");
    }
    if bytes.contains(&0) {
        return Err("name contains a NUL byte");
    }

    let mut out = Vec::with_capacity(2 * BLOCK_LEN as usize);

    if bytes.len() > NAME_LEN {
        // Name body is NUL terminated
        let long_len = bytes.len() as u64 + 1;

        let mut long = Header::new_gnu();
        long.set_entry_type(EntryType::GNULongName);
        long.set_size(long_len);
        long.set_mode(0o644);
        long.set_mtime(0);
        write_name(&mut long, LONG_LINK_NAME);
        long.set_cksum();

        out.extend_from_slice(long.as_bytes());
        out.extend_from_slice(bytes);
        out.push(0);
        out.extend_from_slice(&ZERO_BLOCK[..padding(long_len) as usize]);
    }

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(mtime);
    write_name(&mut header, &bytes[..cmp::min(bytes.len(), NAME_LEN)]);
    header.set_cksum();

    out.extend_from_slice(header.as_bytes());
    Ok(out)
}

fn write_name(header: &mut Header, name: &[u8]) {
    let slot = &mut header.as_old_mut().name;
    slot.fill(0);
    slot[..name.len()].copy_from_slice(name);
}
