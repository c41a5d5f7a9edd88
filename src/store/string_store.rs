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

//! Append-only storage of variable-length byte strings, backed by a
//! mmap'd data file (raw bytes behind a small header) and an
//! [`MmapVec`] of start offsets.

use crate::error::Error;
use crate::store::mmap_vec::MmapVec;
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct DataHeader {
    total_bytes: u64,
}

const DATA_HEADER_SIZE: usize = std::mem::size_of::<DataHeader>();

fn page_size() -> usize {
    4096
}

struct DataFile {
    path: PathBuf,
    file: File,
    map: MmapMut,
    file_size: usize,
    total_bytes: usize,
}

impl DataFile {
    fn open<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
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
            let header = DataHeader { total_bytes: 0 };
            map[..DATA_HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
        }

        let total_bytes = {
            let header: DataHeader = *bytemuck::from_bytes(&map[..DATA_HEADER_SIZE]);
            header.total_bytes as usize
        };

        Ok(Self {
            path,
            file,
            map,
            file_size,
            total_bytes,
        })
    }

    fn capacity(&self) -> usize {
        self.file_size - DATA_HEADER_SIZE
    }

    fn set_total_bytes(&mut self, n: usize) {
        let header = DataHeader {
            total_bytes: n as u64,
        };
        self.map[..DATA_HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
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

    fn push_back(&mut self, bytes: &[u8]) -> crate::error::Result<usize> {
        while self.capacity() - self.total_bytes < bytes.len() {
            self.grow()?;
        }

        let start = self.total_bytes;
        let end = start + bytes.len();
        self.map[DATA_HEADER_SIZE + start..DATA_HEADER_SIZE + end].copy_from_slice(bytes);
        self.total_bytes = end;
        self.set_total_bytes(self.total_bytes);

        Ok(start)
    }

    fn truncate_to(&mut self, total_bytes: usize) {
        self.total_bytes = total_bytes;
        self.set_total_bytes(total_bytes);
    }

    fn slice(&self, start: usize, end: usize) -> &[u8] {
        &self.map[DATA_HEADER_SIZE + start..DATA_HEADER_SIZE + end]
    }
}

/// Append-only store of URL strings, keyed by a monotonically assigned
/// 32-bit identifier (insertion rank).
pub struct StringStore {
    data: DataFile,
    offsets: MmapVec<u64>,
}

impl StringStore {
    pub fn open<P: AsRef<Path>>(data_path: P, offsets_path: P) -> crate::error::Result<Self> {
        Ok(Self {
            data: DataFile::open(data_path)?,
            offsets: MmapVec::open(offsets_path)?,
        })
    }

    pub fn push_back(&mut self, s: &[u8]) -> crate::error::Result<u32> {
        let offset = self.data.push_back(s)?;
        let index = self.offsets.push(offset as u64)?;
        Ok(index as u32)
    }

    /// Retracts the most recent [`push_back`](Self::push_back). Used when a
    /// subsequent dedup check rejects the string.
    pub fn pop_back(&mut self) -> crate::error::Result<()> {
        let start = self
            .offsets
            .pop()?
            .ok_or(Error::OutOfRange { index: 0, len: 0 })?;
        self.data.truncate_to(start as usize);
        Ok(())
    }

    pub fn get(&self, n: u32) -> crate::error::Result<&[u8]> {
        let len = self.offsets.len();
        let n = n as usize;
        if n >= len {
            return Err(Error::OutOfRange { index: n, len }.into());
        }

        let start = self.offsets.get(n)?;
        let end = if len - 1 == n {
            self.data.total_bytes as u64
        } else {
            self.offsets.get(n + 1)?
        };

        Ok(self.data.slice(start as usize, end as usize))
    }

    pub fn size(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_pair(name: &str) -> (PathBuf, PathBuf) {
        let mut data = std::env::temp_dir();
        data.push(format!(
            "crawl-frontier-test-{}-data-{}-{}",
            name,
            std::process::id(),
            rand::random::<u64>()
        ));
        let mut offsets = std::env::temp_dir();
        offsets.push(format!(
            "crawl-frontier-test-{}-offsets-{}-{}",
            name,
            std::process::id(),
            rand::random::<u64>()
        ));
        (data, offsets)
    }

    #[test]
    fn round_trip() {
        let (d, o) = temp_pair("strings-basic");
        let mut store = StringStore::open(&d, &o).unwrap();

        let id1 = store.push_back(b"https://a.example/").unwrap();
        let id2 = store.push_back(b"https://b.example/path").unwrap();

        assert_eq!(store.get(id1).unwrap(), b"https://a.example/");
        assert_eq!(store.get(id2).unwrap(), b"https://b.example/path");
        assert_eq!(store.size(), 2);

        std::fs::remove_file(d).ok();
        std::fs::remove_file(o).ok();
    }

    #[test]
    fn pop_back_retracts_last_push() {
        let (d, o) = temp_pair("strings-pop");
        let mut store = StringStore::open(&d, &o).unwrap();

        let id1 = store.push_back(b"keep").unwrap();
        store.push_back(b"drop-me").unwrap();
        assert_eq!(store.size(), 2);

        store.pop_back().unwrap();
        assert_eq!(store.size(), 1);
        assert_eq!(store.get(id1).unwrap(), b"keep");

        std::fs::remove_file(d).ok();
        std::fs::remove_file(o).ok();
    }

    #[test]
    fn grows_across_many_pushes() {
        let (d, o) = temp_pair("strings-grow");
        let mut store = StringStore::open(&d, &o).unwrap();

        for i in 0..5000u32 {
            let s = format!("https://example.com/page/{i}");
            let id = store.push_back(s.as_bytes()).unwrap();
            assert_eq!(store.get(id).unwrap(), s.as_bytes());
        }

        assert_eq!(store.size(), 5000);

        std::fs::remove_file(d).ok();
        std::fs::remove_file(o).ok();
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn round_trip_prop(items: Vec<Vec<u8>>) {
            let (d, o) = temp_pair("strings-prop");
            let mut store = StringStore::open(&d, &o).unwrap();

            let mut ids = Vec::with_capacity(items.len());
            for item in &items {
                ids.push(store.push_back(item).unwrap());
            }

            for (id, expected) in ids.iter().zip(items.iter()) {
                prop_assert_eq!(store.get(*id).unwrap(), expected.as_slice());
            }
            prop_assert_eq!(store.size(), items.len());

            std::fs::remove_file(&d).ok();
            std::fs::remove_file(&o).ok();
        }
    }
}
