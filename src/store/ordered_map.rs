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

//! Disk-resident ordered index of fixed arity 128, mapping a string-store
//! index to presence, ordered by the referenced string's byte content.
//! Insert-only (no deletion) single-pass-down B-tree: full nodes are split
//! eagerly on the way down, so a split never needs to propagate back up.

use crate::error::Error;
use crate::store::mmap_vec::MmapVec;
use crate::store::string_store::StringStore;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const ORDER: usize = 128;
const MAX_KEYS: usize = ORDER - 1;
const NIL: u32 = u32::MAX;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Node {
    keys: [u32; MAX_KEYS],
    children: [u32; ORDER],
    num_keys: u32,
    leaf: u32,
}

impl Node {
    fn new_leaf() -> Self {
        Self {
            keys: [0; MAX_KEYS],
            children: [NIL; ORDER],
            num_keys: 0,
            leaf: 1,
        }
    }

    fn new_internal() -> Self {
        Self {
            keys: [0; MAX_KEYS],
            children: [NIL; ORDER],
            num_keys: 0,
            leaf: 0,
        }
    }

    fn is_leaf(&self) -> bool {
        self.leaf == 1
    }
}

/// Tracks the current root node id in a tiny standalone file, the same way
/// the string file's write cursor is tracked separately from its data.
struct RootPointer {
    file: File,
}

impl RootPointer {
    fn open<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.as_ref())
            .map_err(|source| Error::Storage {
                path: path.as_ref().to_path_buf(),
                source,
            })?;
        Ok(Self { file })
    }

    fn get(&mut self) -> u32 {
        self.file.seek(SeekFrom::Start(0)).ok();
        let mut buf = [0u8; 4];
        if self.file.read_exact(&mut buf).is_err() {
            return NIL;
        }
        u32::from_le_bytes(buf)
    }

    fn set(&mut self, id: u32) -> crate::error::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&id.to_le_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

fn key_order(store: &StringStore, a: u32, b: u32) -> std::cmp::Ordering {
    store.get(a).unwrap().cmp(store.get(b).unwrap())
}

fn needle_order(store: &StringStore, a: u32, needle: &[u8]) -> std::cmp::Ordering {
    store.get(a).unwrap().cmp(needle)
}

pub struct OrderedMap {
    root: RootPointer,
    nodes: MmapVec<Node>,
}

impl OrderedMap {
    pub fn open<P: AsRef<Path>>(root_path: P, nodes_path: P) -> crate::error::Result<Self> {
        Ok(Self {
            root: RootPointer::open(root_path)?,
            nodes: MmapVec::open(nodes_path)?,
        })
    }

    pub fn contains(&mut self, store: &StringStore, needle: &[u8]) -> crate::error::Result<bool> {
        let root_id = self.root.get();
        if root_id == NIL {
            return Ok(false);
        }

        let mut cur = root_id;
        loop {
            let node = self.nodes.get(cur as usize)?;
            match search_by_needle(&node, store, needle) {
                Ok(_) => return Ok(true),
                Err(idx) => {
                    if node.is_leaf() {
                        return Ok(false);
                    }
                    cur = node.children[idx];
                }
            }
        }
    }

    /// Returns `true` if `key` was newly inserted, `false` if an equal
    /// string was already present.
    pub fn insert(&mut self, store: &StringStore, key: u32) -> crate::error::Result<bool> {
        let root_id = self.root.get();

        if root_id == NIL {
            let mut root = Node::new_leaf();
            root.keys[0] = key;
            root.num_keys = 1;
            let id = self.nodes.push(root)? as u32;
            self.root.set(id)?;
            return Ok(true);
        }

        let mut root_id = root_id;
        let root = self.nodes.get(root_id as usize)?;
        if root.num_keys as usize == MAX_KEYS {
            let mut new_root = Node::new_internal();
            new_root.children[0] = root_id;
            let new_root_id = self.nodes.push(new_root)? as u32;
            self.split_child(new_root_id, 0)?;
            root_id = new_root_id;
            self.root.set(root_id)?;
        }

        self.insert_non_full(root_id, store, key)
    }

    /// Splits the full child at `parent.children[index]`, promoting its
    /// median key into `parent`.
    fn split_child(&mut self, parent_id: u32, index: usize) -> crate::error::Result<()> {
        let mut parent = self.nodes.get(parent_id as usize)?;
        let child_id = parent.children[index];
        let child = self.nodes.get(child_id as usize)?;

        let mid = MAX_KEYS / 2;
        let mid_key = child.keys[mid];
        let sibling_key_count = MAX_KEYS - mid - 1;

        let mut sibling = if child.is_leaf() {
            Node::new_leaf()
        } else {
            Node::new_internal()
        };
        sibling.keys[..sibling_key_count].copy_from_slice(&child.keys[mid + 1..MAX_KEYS]);
        sibling.num_keys = sibling_key_count as u32;
        if !child.is_leaf() {
            sibling.children[..sibling_key_count + 1]
                .copy_from_slice(&child.children[mid + 1..mid + 1 + sibling_key_count + 1]);
        }

        let mut shrunk_child = child;
        shrunk_child.num_keys = mid as u32;

        let sibling_id = self.nodes.push(sibling)? as u32;

        for i in (index + 1..=parent.num_keys as usize).rev() {
            parent.children[i + 1] = parent.children[i];
        }
        parent.children[index + 1] = sibling_id;

        for i in (index..parent.num_keys as usize).rev() {
            parent.keys[i + 1] = parent.keys[i];
        }
        parent.keys[index] = mid_key;
        parent.num_keys += 1;

        self.nodes.set(child_id as usize, shrunk_child)?;
        self.nodes.set(parent_id as usize, parent)?;
        Ok(())
    }

    fn insert_non_full(
        &mut self,
        node_id: u32,
        store: &StringStore,
        key: u32,
    ) -> crate::error::Result<bool> {
        let mut node = self.nodes.get(node_id as usize)?;

        match search_by_key(&node, store, key) {
            Ok(_) => Ok(false),
            Err(idx) => {
                if node.is_leaf() {
                    for i in (idx..node.num_keys as usize).rev() {
                        node.keys[i + 1] = node.keys[i];
                    }
                    node.keys[idx] = key;
                    node.num_keys += 1;
                    self.nodes.set(node_id as usize, node)?;
                    Ok(true)
                } else {
                    let mut child_index = idx;
                    let child_id = node.children[child_index];
                    let child = self.nodes.get(child_id as usize)?;

                    if child.num_keys as usize == MAX_KEYS {
                        self.split_child(node_id, child_index)?;
                        node = self.nodes.get(node_id as usize)?;
                        if key_order(store, key, node.keys[child_index]) == std::cmp::Ordering::Greater
                        {
                            child_index += 1;
                        }
                    }

                    let child_id = node.children[child_index];
                    self.insert_non_full(child_id, store, key)
                }
            }
        }
    }
}

fn search_by_key(node: &Node, store: &StringStore, key: u32) -> Result<usize, usize> {
    let keys = &node.keys[..node.num_keys as usize];
    keys.binary_search_by(|probe| key_order(store, *probe, key))
}

fn search_by_needle(node: &Node, store: &StringStore, needle: &[u8]) -> Result<usize, usize> {
    let keys = &node.keys[..node.num_keys as usize];
    keys.binary_search_by(|probe| needle_order(store, *probe, needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_paths(name: &str) -> (std::path::PathBuf, std::path::PathBuf, std::path::PathBuf, std::path::PathBuf) {
        let id = rand::random::<u64>();
        let pid = std::process::id();
        let mut data = std::env::temp_dir();
        data.push(format!("crawl-frontier-test-{name}-data-{pid}-{id}"));
        let mut offsets = std::env::temp_dir();
        offsets.push(format!("crawl-frontier-test-{name}-offsets-{pid}-{id}"));
        let mut root = std::env::temp_dir();
        root.push(format!("crawl-frontier-test-{name}-root-{pid}-{id}"));
        let mut nodes = std::env::temp_dir();
        nodes.push(format!("crawl-frontier-test-{name}-nodes-{pid}-{id}"));
        (data, offsets, root, nodes)
    }

    #[test]
    fn insert_and_contains_round_trip() {
        let (d, o, r, n) = temp_paths("omap-basic");
        let mut store = StringStore::open(&d, &o).unwrap();
        let mut map = OrderedMap::open(&r, &n).unwrap();

        let urls = [
            "https://a.example/",
            "https://b.example/",
            "https://c.example/",
            "https://z.example/",
            "https://m.example/",
        ];

        for url in urls {
            let id = store.push_back(url.as_bytes()).unwrap();
            let inserted = map.insert(&store, id).unwrap();
            assert!(inserted);
        }

        for url in urls {
            assert!(map.contains(&store, url.as_bytes()).unwrap());
        }
        assert!(!map.contains(&store, b"https://not-present.example/").unwrap());

        std::fs::remove_file(d).ok();
        std::fs::remove_file(o).ok();
        std::fs::remove_file(r).ok();
        std::fs::remove_file(n).ok();
    }

    #[test]
    fn duplicate_insert_rejected() {
        let (d, o, r, n) = temp_paths("omap-dup");
        let mut store = StringStore::open(&d, &o).unwrap();
        let mut map = OrderedMap::open(&r, &n).unwrap();

        let id1 = store.push_back(b"https://dup.example/").unwrap();
        assert!(map.insert(&store, id1).unwrap());

        // Same string content stored again under a different id.
        let id2 = store.push_back(b"https://dup.example/").unwrap();
        assert!(!map.insert(&store, id2).unwrap());

        std::fs::remove_file(d).ok();
        std::fs::remove_file(o).ok();
        std::fs::remove_file(r).ok();
        std::fs::remove_file(n).ok();
    }

    #[test]
    fn handles_many_inserts_across_splits() {
        let (d, o, r, n) = temp_paths("omap-many");
        let mut store = StringStore::open(&d, &o).unwrap();
        let mut map = OrderedMap::open(&r, &n).unwrap();

        let mut urls = Vec::new();
        for i in 0..5000 {
            urls.push(format!("https://example.com/page/{i}"));
        }

        for url in &urls {
            let id = store.push_back(url.as_bytes()).unwrap();
            assert!(map.insert(&store, id).unwrap());
        }

        for url in &urls {
            assert!(map.contains(&store, url.as_bytes()).unwrap());
        }

        std::fs::remove_file(d).ok();
        std::fs::remove_file(o).ok();
        std::fs::remove_file(r).ok();
        std::fs::remove_file(n).ok();
    }
}
