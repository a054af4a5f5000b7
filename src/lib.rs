//! A persistent, file-backed index of counted words.
//!
//! The crate couples two pieces: a [storage-class-memory arena](arena),
//! which maps a fixed-size file read-write and carves it out with a bump
//! allocator, and a [height-balanced tree of counted words](word_map)
//! whose every node and item string lives inside that arena. All tree
//! links are arena-relative offsets, so reopening the same file
//! reconstitutes the prior index without replay.
//!
//! ```
//! use wordmap::WordMap;
//!
//! # fn main() -> wordmap::Result<()> {
//! let file = tempfile::NamedTempFile::new().unwrap();
//! file.as_file().set_len(1 << 16).unwrap();
//!
//! let mut map = WordMap::open(file.path(), true)?;
//! map.insert("autumn")?;
//! map.insert("autumn")?;
//! map.insert("rain")?;
//! map.close()?;
//!
//! let map = WordMap::open(file.path(), false)?;
//! assert_eq!(map.count("autumn"), 2);
//! assert_eq!(map.unique(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! Single-threaded: nothing here synchronizes concurrent mutation, and
//! two handles over one backing file are the caller's responsibility to
//! prevent. Durability is established at close (or drop), not per
//! operation.

pub mod arena;
pub mod error;
pub mod word_map;

mod node;

pub use arena::Arena;
pub use error::{Error, Result};
pub use word_map::WordMap;
