//! Shared primitives: bounded memory stream copying, key files and the
//! whole-file encryption gate used for sealing finished archives.
pub mod buf;
pub mod crypto;
pub mod key;
