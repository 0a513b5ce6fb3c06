//! An integer-keyed, string-valued key-value store.
//!
//! [`table::Table`] is an open-addressing hash table with linear probing and
//! tombstone deletion. [`codec`] turns its contents into a small binary file
//! format and back, and [`store::Store`] ties the two together with a
//! filesystem so a table survives process restarts.

pub mod codec;
pub mod config;
pub mod error;
pub mod fs;
pub mod shell;
pub mod store;
pub mod table;

pub use error::{Error, ErrorKind, Result};
pub use store::Store;
pub use table::Table;
