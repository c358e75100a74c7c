//! Archive engine
//!
//! Builds a base tar archive out of a file list while recording the byte
//! range of every entry, derives variant archives from it by splicing raw
//! entry bytes instead of re-reading the source files, and reads archives
//! back for extraction or single entry fetches.
//!
//! See [`format`] for the block layout the splicing relies on.
pub mod builder;
pub mod compress;
pub mod entry;
pub mod error;
pub mod format;
pub mod merge;
pub mod reader;
pub mod writer;

pub use builder::build_base;
pub use compress::{compress, open_decompressed, Compression};
pub use entry::{entry_name, ArchiveHandle, Entry, FileInfo, KeepSet};
pub use error::ArchiveError;
pub use merge::merge;
pub use reader::{extract, fetch, for_each_entry, Decision, EntryMeta};
pub use writer::{ArchiveOptions, ArchiveWriter, ModePolicy};
