//! The storage-class-memory arena: a fixed-size regular file mapped
//! read-write and carved out by a bump allocator.
//!
//! The arena treats the backing file as a persistent heap. Allocations are
//! identified by their byte offset from the start of the mapping, so every
//! reference written into the file stays valid when the file is mapped
//! again in a later session, wherever the OS places the mapping.
//!
//! # File format
//!
//! ```text
//! [0, U):      bump allocations, laid out in allocation order
//! [U, N-8):    free space
//! [N-8, N):    footer: the water mark U, a u64 in host byte order
//! ```
//!
//! `N` is the file length, fixed at creation time; the arena never grows or
//! truncates the file. `U` is the utilization water mark: the offset of the
//! next free byte. It only ever advances within a session and is written
//! back into the footer on close, so the next session resumes where this
//! one stopped. Multi-byte fields inside allocations are host-endian; the
//! file is not portable across hosts that disagree on endianness or record
//! layout.
//!
//! The allocator is append-only: `free` releases nothing and capacity
//! decreases monotonically over the arena's whole life.

use std::fs::OpenOptions;
use std::io;
use std::mem::size_of;
use std::path::Path;

use memmap2::MmapMut;

use crate::error::{Error, Result};

/// Trailing bytes of the backing file reserved for the water mark.
const FOOTER_LEN: usize = size_of::<u64>();

/// A memory-mapped, bump-allocated, file-backed heap.
///
/// Dropping an `Arena` writes the footer and flushes best-effort; use
/// [`close`](Arena::close) to observe flush failures.
#[derive(Debug)]
pub struct Arena {
    map: MmapMut,
    utilized: usize,
    synced: bool,
}

impl Arena {
    /// Opens `path` as the backing device and maps it read-write, shared.
    ///
    /// The file must be a regular file large enough to hold the footer.
    /// With `truncate` the session starts from an empty arena; otherwise
    /// the water mark is resumed from the footer.
    pub fn open(path: impl AsRef<Path>, truncate: bool) -> Result<Arena> {
        let path = path.as_ref();
        let open_err = |source| Error::Open { path: path.to_path_buf(), source };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(open_err)?;
        let meta = file.metadata().map_err(open_err)?;
        if !meta.is_file() {
            return Err(open_err(io::Error::other("not a regular file")));
        }
        if (meta.len() as usize) < FOOTER_LEN + 1 {
            return Err(open_err(io::Error::other(
                "file too small to hold the utilization footer",
            )));
        }

        let map = unsafe { MmapMut::map_mut(&file) }.map_err(Error::Map)?;
        let limit = map.len() - FOOTER_LEN;
        let utilized = if truncate {
            0
        } else {
            let footer: [u8; FOOTER_LEN] = map[limit..]
                .try_into()
                .expect("footer spans exactly FOOTER_LEN bytes");
            let found = u64::from_ne_bytes(footer);
            if found > limit as u64 {
                return Err(Error::Footer { found, limit: limit as u64 });
            }
            found as usize
        };

        Ok(Arena { map, utilized, synced: false })
    }

    /// Reserves `n` bytes and returns their offset.
    ///
    /// A failed allocation leaves the water mark unchanged. The returned
    /// offset is deterministic: replaying the same allocation sequence in a
    /// later session yields the same offsets.
    pub fn alloc(&mut self, n: usize) -> Result<u64> {
        if n == 0 {
            return Err(Error::InvalidArgument("zero-length allocation"));
        }
        if n > self.limit() - self.utilized {
            return Err(Error::OutOfArena { needed: n, available: self.capacity() });
        }
        let offset = self.utilized as u64;
        self.utilized += n;
        Ok(offset)
    }

    /// Copies `bytes` plus a NUL terminator into a fresh allocation.
    pub fn alloc_cstr(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.alloc(bytes.len() + 1)?;
        let start = offset as usize;
        self.map[start..start + bytes.len()].copy_from_slice(bytes);
        self.map[start + bytes.len()] = 0;
        Ok(offset)
    }

    /// Releases nothing: the arena is append-only. Kept for symmetry with
    /// [`alloc`](Arena::alloc).
    pub fn free(&mut self, _offset: u64) {}

    /// Bytes allocated so far (the water mark).
    pub fn utilized(&self) -> usize {
        self.utilized
    }

    /// Bytes still allocatable.
    pub fn capacity(&self) -> usize {
        self.limit() - self.utilized
    }

    /// Writes the footer, flushes the mapping to the backing file, and
    /// unmaps. The mapping is released even when the flush fails.
    pub fn close(mut self) -> Result<()> {
        self.synced = true;
        self.write_footer();
        self.map.flush().map_err(Error::Flush)
    }

    /// Highest allocatable offset: everything below the footer.
    pub(crate) fn limit(&self) -> usize {
        self.map.len() - FOOTER_LEN
    }

    pub(crate) fn read_u64(&self, offset: u64) -> u64 {
        let start = offset as usize;
        let field: [u8; 8] = self.map[start..start + 8]
            .try_into()
            .expect("u64 fields span exactly 8 bytes");
        u64::from_ne_bytes(field)
    }

    pub(crate) fn write_u64(&mut self, offset: u64, value: u64) {
        let start = offset as usize;
        self.map[start..start + 8].copy_from_slice(&value.to_ne_bytes());
    }

    /// The NUL-terminated string at `offset`, without its terminator.
    pub(crate) fn cstr(&self, offset: u64) -> &[u8] {
        let tail = &self.map[offset as usize..self.limit()];
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .expect("string allocations are NUL-terminated");
        &tail[..len]
    }

    pub(crate) fn slice_mut(&mut self, offset: u64, len: usize) -> &mut [u8] {
        let start = offset as usize;
        &mut self.map[start..start + len]
    }

    fn write_footer(&mut self) {
        let at = self.map.len() - FOOTER_LEN;
        let utilized = self.utilized as u64;
        self.map[at..].copy_from_slice(&utilized.to_ne_bytes());
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if !self.synced {
            self.write_footer();
            let _ = self.map.flush();
        }
    }
}
