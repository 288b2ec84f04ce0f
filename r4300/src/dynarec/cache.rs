//! Translated pages, stored in an arena and addressed by `BlockId`.

use std::collections::HashMap;

use memmap2::{Mmap, MmapMut};

use crate::memory::CodePages;
use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(usize);

/// Native code for one 4 KB guest page
pub struct Block {
    pub vpage: u32,
    pub ppage: u32,
    code: Mmap,
    /// Native offset of every instruction slot
    entries: Vec<u32>,
}

impl Block {
    /// Copy `code` into a fresh executable mapping
    pub fn new(vpage: u32, ppage: u32, code: &[u8], entries: Vec<u32>) -> Result<Block, CoreError> {
        let exec_error = |e: std::io::Error| CoreError::ExecutableMemory(e.to_string());
        let mut map = MmapMut::map_anon(code.len()).map_err(exec_error)?;
        map.copy_from_slice(code);
        let code = map.make_exec().map_err(exec_error)?;
        Ok(Block { vpage, ppage, code, entries })
    }

    /// Native entry point for the instruction at `vaddr`
    pub fn entry(&self, vaddr: u32) -> *const u8 {
        let slot = ((vaddr & 0xfff) >> 2) as usize;
        self.code.as_ptr().wrapping_add(self.entries[slot] as usize)
    }

    /// Start of the mapping, where the prologue lives
    pub fn function(&self) -> *const u8 {
        self.code.as_ptr()
    }

    pub fn code_size(&self) -> usize {
        self.code.len()
    }
}

#[derive(Default)]
pub struct BlockCache {
    blocks: Vec<Option<Block>>,
    free: Vec<BlockId>,
    by_vpage: HashMap<u32, BlockId>,
    by_ppage: HashMap<u32, Vec<BlockId>>,
}

impl BlockCache {
    pub fn lookup(&self, vpage: u32) -> Option<BlockId> {
        self.by_vpage.get(&vpage).copied()
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0).and_then(Option::as_ref)
    }

    /// Store a block, replacing whatever was translated for the same virtual page
    pub fn insert(&mut self, block: Block, code_pages: &mut CodePages) -> BlockId {
        if let Some(old) = self.lookup(block.vpage) {
            self.remove(old, code_pages);
        }
        code_pages.insert(block.ppage);
        let (vpage, ppage) = (block.vpage, block.ppage);
        let id = match self.free.pop() {
            Some(id) => {
                self.blocks[id.0] = Some(block);
                id
            }
            None => {
                self.blocks.push(Some(block));
                BlockId(self.blocks.len() - 1)
            }
        };
        self.by_vpage.insert(vpage, id);
        self.by_ppage.entry(ppage).or_default().push(id);
        id
    }

    pub fn remove(&mut self, id: BlockId, code_pages: &mut CodePages) {
        let Some(block) = self.blocks.get_mut(id.0).and_then(Option::take) else {
            return;
        };
        log::trace!("dropping block for {:08x}", block.vpage << 12);
        code_pages.remove(block.ppage);
        if self.by_vpage.get(&block.vpage) == Some(&id) {
            self.by_vpage.remove(&block.vpage);
        }
        if let Some(ids) = self.by_ppage.get_mut(&block.ppage) {
            ids.retain(|&other| other != id);
            if ids.is_empty() {
                self.by_ppage.remove(&block.ppage);
            }
        }
        self.free.push(id);
    }

    /// Drop every block translated from physical page `ppage`
    pub fn invalidate_physical(&mut self, ppage: u32, code_pages: &mut CodePages) -> usize {
        let ids = self.by_ppage.remove(&ppage).unwrap_or_default();
        for &id in &ids {
            self.remove(id, code_pages);
        }
        ids.len()
    }

    /// Drop every block whose virtual page overlaps `start..end`
    pub fn invalidate_virtual(&mut self, start: u32, end: u32, code_pages: &mut CodePages) -> usize {
        if start >= end {
            return 0;
        }
        let (first, last) = (start >> 12, (end - 1) >> 12);
        let ids: Vec<BlockId> = if (last - first) as usize > self.by_vpage.len() {
            self.by_vpage
                .iter()
                .filter(|(&vpage, _)| vpage >= first && vpage <= last)
                .map(|(_, &id)| id)
                .collect()
        } else {
            (first..=last).filter_map(|vpage| self.lookup(vpage)).collect()
        };
        for &id in &ids {
            self.remove(id, code_pages);
        }
        ids.len()
    }

    pub fn clear(&mut self, code_pages: &mut CodePages) {
        let ids: Vec<BlockId> = self.by_vpage.values().copied().collect();
        for id in ids {
            self.remove(id, code_pages);
        }
    }

    pub fn len(&self) -> usize {
        self.by_vpage.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(vpage: u32, ppage: u32) -> Block {
        Block::new(vpage, ppage, &[0xc3; 16], vec![0; 1024]).unwrap()
    }

    #[test]
    fn insert_and_lookup() {
        let mut pages = CodePages::default();
        let mut cache = BlockCache::default();
        let id = cache.insert(block(0x80001, 1), &mut pages);
        assert_eq!(cache.lookup(0x80001), Some(id));
        assert!(pages.contains(1));
        let b = cache.get(id).unwrap();
        assert_eq!(b.entry(0x8000_1000), b.entry(0x8000_1ffc));
        assert_eq!(b.code_size(), 16);
    }

    #[test]
    fn physical_invalidation_drops_every_alias() {
        let mut pages = CodePages::default();
        let mut cache = BlockCache::default();
        cache.insert(block(0x80001, 1), &mut pages);
        cache.insert(block(0xa0001, 1), &mut pages);
        cache.insert(block(0x80002, 2), &mut pages);
        assert_eq!(cache.invalidate_physical(1, &mut pages), 2);
        assert!(!pages.contains(1));
        assert_eq!(cache.lookup(0x80001), None);
        assert_eq!(cache.lookup(0xa0001), None);
        assert_eq!(cache.len(), 1);
        assert!(pages.contains(2));
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut pages = CodePages::default();
        let mut cache = BlockCache::default();
        let a = cache.insert(block(0x80001, 1), &mut pages);
        // replacing the translation for a page frees the old one first
        let b = cache.insert(block(0x80001, 1), &mut pages);
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        assert!(pages.contains(1));
        assert_eq!(cache.invalidate_virtual(0x8000_0000, 0x8000_2000, &mut pages), 1);
        assert!(!pages.contains(1));
        cache.clear(&mut pages);
        assert_eq!(cache.len(), 0);
    }
}
