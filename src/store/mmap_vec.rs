// Stract is an open source web search engine.
// Copyright (C) 2023 Stract ApS
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Generic mmap-backed growable vector of fixed-size POD records.
//!
//! Backs the string store's offset file, the frontier's queued-record file,
//! and the disk ordered map's node arena. Growth doubles the backing file,
//! always unmapping before `ftruncate` and remapping after, mirroring the
//! on-disk string list in the original crawler.

use crate::error::Error;
use bytemuck::Pod;
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Header {
    len: u64,
}

const HEADER_SIZE: usize = std::mem::size_of::<Header>();

fn page_size() -> usize {
    4096
}

/// A growable vector of `T` persisted in a single mmap'd file.
pub struct MmapVec<T: Pod> {
    path: PathBuf,
    file: File,
    map: MmapMut,
    file_size: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> MmapVec<T> {
    pub fn open<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let exists = path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|source| Error::Storage {
                path: path.clone(),
                source,
            })?;

        let file_size = if exists {
            file.metadata()
                .map_err(|source| Error::Storage {
                    path: path.clone(),
                    source,
                })?
                .len() as usize
        } else {
            let initial = 8 * page_size();
            file.set_len(initial as u64)
                .map_err(|source| Error::Storage {
                    path: path.clone(),
                    source,
                })?;
            initial
        };

        let mut map = unsafe {
            MmapMut::map_mut(&file).map_err(|source| Error::Storage {
                path: path.clone(),
                source,
            })?
        };

        if !exists {
            let header = Header { len: 0 };
            map[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
            map.flush().map_err(|source| Error::Storage {
                path: path.clone(),
                source,
            })?;
        }

        Ok(Self {
            path,
            file,
            map,
            file_size,
            _marker: PhantomData,
        })
    }

    fn header(&self) -> Header {
        *bytemuck::from_bytes(&self.map[..HEADER_SIZE])
    }

    fn set_header(&mut self, header: Header) {
        self.map[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
    }

    fn capacity(&self) -> usize {
        (self.file_size - HEADER_SIZE) / std::mem::size_of::<T>()
    }

    pub fn len(&self) -> usize {
        self.header().len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot_range(index: usize) -> std::ops::Range<usize> {
        let elem = std::mem::size_of::<T>();
        let start = HEADER_SIZE + index * elem;
        start..start + elem
    }

    fn grow(&mut self) -> crate::error::Result<()> {
        let new_size = self.file_size * 2;

        // memmap2 requires the mapping be dropped before we can truncate.
        // mmap(2) rejects a zero-length mapping, so the throwaway has to be
        // at least one byte.
        self.map = MmapMut::map_anon(1).map_err(|source| Error::Storage {
            path: self.path.clone(),
            source,
        })?;

        self.file
            .set_len(new_size as u64)
            .map_err(|source| Error::Storage {
                path: self.path.clone(),
                source,
            })?;

        self.map = unsafe {
            MmapMut::map_mut(&self.file).map_err(|source| Error::Storage {
                path: self.path.clone(),
                source,
            })?
        };
        self.file_size = new_size;

        Ok(())
    }

    pub fn push(&mut self, item: T) -> crate::error::Result<usize> {
        let mut header = self.header();
        let len = header.len as usize;

        while len >= self.capacity() {
            self.grow()?;
        }

        let range = Self::slot_range(len);
        self.map[range].copy_from_slice(bytemuck::bytes_of(&item));

        header.len = (len + 1) as u64;
        self.set_header(header);

        Ok(len)
    }

    pub fn pop(&mut self) -> crate::error::Result<Option<T>> {
        let mut header = self.header();
        if header.len == 0 {
            return Ok(None);
        }

        let new_len = header.len - 1;
        let range = Self::slot_range(new_len as usize);
        let item: T = *bytemuck::from_bytes(&self.map[range]);

        header.len = new_len;
        self.set_header(header);

        Ok(Some(item))
    }

    pub fn get(&self, index: usize) -> crate::error::Result<T> {
        let len = self.len();
        if index >= len {
            return Err(Error::OutOfRange { index, len }.into());
        }
        let range = Self::slot_range(index);
        Ok(*bytemuck::from_bytes(&self.map[range]))
    }

    pub fn set(&mut self, index: usize, item: T) -> crate::error::Result<()> {
        let len = self.len();
        if index >= len {
            return Err(Error::OutOfRange { index, len }.into());
        }
        let range = Self::slot_range(index);
        self.map[range].copy_from_slice(bytemuck::bytes_of(&item));
        Ok(())
    }

    /// Swaps the element at `index` with the last element, then pops the
    /// (now-last) original element. O(1) unordered removal.
    pub fn swap_remove(&mut self, index: usize) -> crate::error::Result<T> {
        let len = self.len();
        if index >= len {
            return Err(Error::OutOfRange { index, len }.into());
        }

        if index != len - 1 {
            let last = self.get(len - 1)?;
            let removed = self.get(index)?;
            self.set(index, last)?;
            self.set(len - 1, removed)?;
        }

        Ok(self.pop()?.expect("len checked above"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    struct Rec {
        a: u64,
        b: u32,
        _pad: u32,
    }

    fn temp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "crawl-frontier-test-{}-{}-{}",
            name,
            std::process::id(),
            rand::random::<u64>()
        ));
        p
    }

    #[test]
    fn push_and_get_round_trip() {
        let path = temp_path("mmapvec-basic");
        let mut v: MmapVec<Rec> = MmapVec::open(&path).unwrap();

        for i in 0..10 {
            v.push(Rec {
                a: i,
                b: i as u32 * 2,
                _pad: 0,
            })
            .unwrap();
        }

        assert_eq!(v.len(), 10);
        for i in 0..10 {
            let rec = v.get(i as usize).unwrap();
            assert_eq!(rec.a, i);
            assert_eq!(rec.b, i as u32 * 2);
        }

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn grows_past_initial_capacity() {
        let path = temp_path("mmapvec-grow");
        let mut v: MmapVec<Rec> = MmapVec::open(&path).unwrap();

        // Force several doublings.
        for i in 0..20_000u64 {
            v.push(Rec {
                a: i,
                b: 0,
                _pad: 0,
            })
            .unwrap();
        }

        assert_eq!(v.len(), 20_000);
        assert_eq!(v.get(19_999).unwrap().a, 19_999);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn pop_then_push_reuses_slot() {
        let path = temp_path("mmapvec-pop");
        let mut v: MmapVec<Rec> = MmapVec::open(&path).unwrap();

        v.push(Rec { a: 1, b: 0, _pad: 0 }).unwrap();
        v.push(Rec { a: 2, b: 0, _pad: 0 }).unwrap();

        let popped = v.pop().unwrap().unwrap();
        assert_eq!(popped.a, 2);
        assert_eq!(v.len(), 1);

        v.push(Rec { a: 3, b: 0, _pad: 0 }).unwrap();
        assert_eq!(v.get(1).unwrap().a, 3);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn swap_remove_preserves_remaining_elements() {
        let path = temp_path("mmapvec-swap-remove");
        let mut v: MmapVec<Rec> = MmapVec::open(&path).unwrap();

        for i in 0..5u64 {
            v.push(Rec { a: i, b: 0, _pad: 0 }).unwrap();
        }

        let removed = v.swap_remove(1).unwrap();
        assert_eq!(removed.a, 1);
        assert_eq!(v.len(), 4);
        // index 1 now holds what used to be the last element (a = 4).
        assert_eq!(v.get(1).unwrap().a, 4);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn persists_across_reopen() {
        let path = temp_path("mmapvec-reopen");
        {
            let mut v: MmapVec<Rec> = MmapVec::open(&path).unwrap();
            v.push(Rec { a: 42, b: 7, _pad: 0 }).unwrap();
        }

        let v: MmapVec<Rec> = MmapVec::open(&path).unwrap();
        assert_eq!(v.len(), 1);
        assert_eq!(v.get(0).unwrap().a, 42);

        std::fs::remove_file(path).ok();
    }
}
