//! Differential tar backups
//!
//! A source tree is archived once into a base archive. Every configuration
//! then gets its own variant, spliced together out of the base archive's
//! entries and the configuration's overlay directory, compressed and
//! optionally sealed with the configuration's key.
pub mod cli;
pub mod compile;
pub mod config;
pub mod contents;
pub mod error;
pub mod extract;
pub mod naming;

pub use error::Error;
