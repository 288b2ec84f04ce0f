//! Physical address space as seen by the CPU.

pub const RDRAM_BASE: u32 = 0x0000_0000;
pub const SP_DMEM_BASE: u32 = 0x0400_0000;
pub const SP_IMEM_BASE: u32 = 0x0400_1000;
pub const ROM_BASE: u32 = 0x1000_0000;
pub const ROM_END: u32 = 0x1fc0_0000;
pub const PIF_ROM_BASE: u32 = 0x1fc0_0000;
pub const PIF_ROM_SIZE: usize = 0x7c0;
pub const PIF_RAM_BASE: u32 = 0x1fc0_07c0;
pub const PIF_RAM_SIZE: usize = 0x40;
const SP_MEM_SIZE: usize = 0x1000;

/// Handler for everything that isn't plain memory (device registers).
///
/// Accesses are always word sized and word aligned; narrower stores come with a byte lane mask.
pub trait Mmio {
    fn read_word(&mut self, paddr: u32) -> u32;
    fn write_word(&mut self, paddr: u32, value: u32, mask: u32);
}

/// Nothing connected: reads return zero, writes are dropped.
#[derive(Default)]
pub struct OpenBus;

impl Mmio for OpenBus {
    fn read_word(&mut self, paddr: u32) -> u32 {
        log::trace!("open bus read {:08x}", paddr);
        0
    }
    fn write_word(&mut self, paddr: u32, value: u32, mask: u32) {
        log::trace!("open bus write {:08x} = {:08x} (mask {:08x})", paddr, value, mask);
    }
}

enum Region {
    Rdram,
    SpDmem,
    SpImem,
    Rom,
    PifRom,
    PifRam,
}

pub struct Memory {
    pub rdram: Vec<u8>,
    pub sp_dmem: Vec<u8>,
    pub sp_imem: Vec<u8>,
    pub rom: Vec<u8>,
    pub pif_rom: Vec<u8>,
    pub pif_ram: Vec<u8>,
    mmio: Box<dyn Mmio>,
}

impl Memory {
    pub fn new(rdram_size: usize, mmio: Box<dyn Mmio>) -> Memory {
        Memory {
            rdram: vec![0; rdram_size],
            sp_dmem: vec![0; SP_MEM_SIZE],
            sp_imem: vec![0; SP_MEM_SIZE],
            rom: Vec::new(),
            pif_rom: vec![0; PIF_ROM_SIZE],
            pif_ram: vec![0; PIF_RAM_SIZE],
            mmio,
        }
    }

    fn region(&self, paddr: u32) -> Option<(Region, usize)> {
        let in_range = |base: u32, len: usize| {
            paddr >= base && ((paddr - base) as usize) < len
        };
        if in_range(RDRAM_BASE, self.rdram.len()) {
            Some((Region::Rdram, (paddr - RDRAM_BASE) as usize))
        } else if in_range(SP_DMEM_BASE, SP_MEM_SIZE) {
            Some((Region::SpDmem, (paddr - SP_DMEM_BASE) as usize))
        } else if in_range(SP_IMEM_BASE, SP_MEM_SIZE) {
            Some((Region::SpImem, (paddr - SP_IMEM_BASE) as usize))
        } else if paddr >= ROM_BASE && paddr < ROM_END && ((paddr - ROM_BASE) as usize) < self.rom.len() {
            Some((Region::Rom, (paddr - ROM_BASE) as usize))
        } else if in_range(PIF_ROM_BASE, PIF_ROM_SIZE) {
            Some((Region::PifRom, (paddr - PIF_ROM_BASE) as usize))
        } else if in_range(PIF_RAM_BASE, PIF_RAM_SIZE) {
            Some((Region::PifRam, (paddr - PIF_RAM_BASE) as usize))
        } else {
            None
        }
    }

    fn bytes(&self, region: &Region) -> &[u8] {
        match region {
            Region::Rdram => &self.rdram,
            Region::SpDmem => &self.sp_dmem,
            Region::SpImem => &self.sp_imem,
            Region::Rom => &self.rom,
            Region::PifRom => &self.pif_rom,
            Region::PifRam => &self.pif_ram,
        }
    }

    /// Writable backing store, `None` for read-only regions
    fn bytes_mut(&mut self, region: &Region) -> Option<&mut [u8]> {
        match region {
            Region::Rdram => Some(&mut self.rdram),
            Region::SpDmem => Some(&mut self.sp_dmem),
            Region::SpImem => Some(&mut self.sp_imem),
            Region::PifRam => Some(&mut self.pif_ram),
            Region::Rom | Region::PifRom => None,
        }
    }

    /// Big-endian read of `size` (1, 2, 4 or 8) naturally aligned bytes, zero extended.
    pub fn read(&mut self, paddr: u32, size: usize) -> u64 {
        match self.region(paddr) {
            Some((region, offset)) => {
                let bytes = self.bytes(&region);
                let end = (offset + size).min(bytes.len());
                bytes[offset..end].iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
                    << (8 * (offset + size - end))
            }
            None => {
                let word_addr = paddr & !3;
                match size {
                    8 => {
                        let hi = self.mmio.read_word(word_addr) as u64;
                        let lo = self.mmio.read_word(word_addr + 4) as u64;
                        (hi << 32) | lo
                    }
                    _ => {
                        let word = self.mmio.read_word(word_addr) as u64;
                        let shift = 8 * (4 - size - (paddr & 3) as usize);
                        (word >> shift) & (u64::MAX >> (64 - 8 * size))
                    }
                }
            }
        }
    }

    /// Big-endian write of the low `size` bytes of `value`.
    pub fn write(&mut self, paddr: u32, size: usize, value: u64) {
        match self.region(paddr) {
            Some((region, offset)) => match self.bytes_mut(&region) {
                Some(bytes) => {
                    for i in 0..size {
                        if let Some(b) = bytes.get_mut(offset + i) {
                            *b = (value >> (8 * (size - 1 - i))) as u8;
                        }
                    }
                }
                None => log::warn!("write to read-only memory {:08x} = {:x}", paddr, value),
            },
            None => {
                let word_addr = paddr & !3;
                match size {
                    8 => {
                        self.mmio.write_word(word_addr, (value >> 32) as u32, !0);
                        self.mmio.write_word(word_addr + 4, value as u32, !0);
                    }
                    _ => {
                        let shift = 8 * (4 - size - (paddr & 3) as usize) as u32;
                        let mask = ((u64::MAX >> (64 - 8 * size)) << shift) as u32;
                        self.mmio.write_word(word_addr, ((value << shift) as u32) & mask, mask);
                    }
                }
            }
        }
    }

    /// Instruction fetch. Only plain memory can hold code; `None` means the address is unbacked.
    pub fn fetch(&self, paddr: u32) -> Option<u32> {
        let (region, offset) = self.region(paddr)?;
        let bytes = self.bytes(&region).get(offset..offset + 4)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Copy a block of big-endian data into writable memory
    pub fn load(&mut self, paddr: u32, data: &[u8]) -> usize {
        let mut written = 0;
        for (i, &b) in data.iter().enumerate() {
            let Some(addr) = paddr.checked_add(i as u32) else {
                break;
            };
            if let Some((region, offset)) = self.region(addr) {
                if let Some(bytes) = self.bytes_mut(&region) {
                    bytes[offset] = b;
                    written += 1;
                }
            }
        }
        written
    }
}

/// Physical pages that currently back translated code.
///
/// Stores and DMA consult this before touching memory; a hit is queued in `dirty` for the
/// dispatcher to drop the affected blocks.
#[derive(Default)]
pub struct CodePages {
    pages: Vec<u16>,
    pub dirty: Vec<u32>,
    pub dirty_virtual: Vec<(u32, u32)>,
}

const PHYS_PAGES: usize = 0x2000_0000 >> 12;

impl CodePages {
    pub fn insert(&mut self, ppage: u32) {
        if self.pages.is_empty() {
            self.pages = vec![0; PHYS_PAGES];
        }
        if let Some(n) = self.pages.get_mut(ppage as usize) {
            *n = n.saturating_add(1);
        }
    }

    pub fn remove(&mut self, ppage: u32) {
        if let Some(n) = self.pages.get_mut(ppage as usize) {
            *n = n.saturating_sub(1);
        }
    }

    #[inline(always)]
    pub fn contains(&self, ppage: u32) -> bool {
        self.pages.get(ppage as usize).map_or(false, |&n| n != 0)
    }

    /// Record a write to `paddr`. Returns true if it hit translated code.
    pub fn touch(&mut self, paddr: u32) -> bool {
        let ppage = paddr >> 12;
        if self.contains(ppage) {
            if !self.dirty.contains(&ppage) {
                self.dirty.push(ppage);
            }
            true
        } else {
            false
        }
    }

    /// Record a remapped virtual range. Only tracked once any code has been translated.
    pub fn touch_virtual(&mut self, (start, end): (u32, u32)) -> bool {
        if self.pages.is_empty() || start >= end {
            return false;
        }
        self.dirty_virtual.push((start, end));
        true
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty() || !self.dirty_virtual.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        writes: Arc<Mutex<Vec<(u32, u32, u32)>>>,
    }

    impl Mmio for Recorder {
        fn read_word(&mut self, paddr: u32) -> u32 {
            0x1122_3344 ^ paddr
        }
        fn write_word(&mut self, paddr: u32, value: u32, mask: u32) {
            self.writes.lock().unwrap().push((paddr, value, mask));
        }
    }

    #[test]
    fn big_endian_rdram() {
        let mut mem = Memory::new(0x40_0000, Box::new(OpenBus));
        mem.write(0x100, 4, 0xdead_beef);
        assert_eq!(mem.rdram[0x100..0x104], [0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(mem.read(0x100, 2), 0xdead);
        assert_eq!(mem.read(0x103, 1), 0xef);
        mem.write(0x108, 8, 0x0102_0304_0506_0708);
        assert_eq!(mem.read(0x108, 8), 0x0102_0304_0506_0708);
        assert_eq!(mem.fetch(0x100), Some(0xdead_beef));
    }

    #[test]
    fn rom_is_read_only() {
        let mut mem = Memory::new(0x40_0000, Box::new(OpenBus));
        mem.rom = vec![0x12, 0x34, 0x56, 0x78];
        mem.write(ROM_BASE, 4, 0);
        assert_eq!(mem.read(ROM_BASE, 4), 0x1234_5678);
        assert_eq!(mem.fetch(ROM_BASE), Some(0x1234_5678));
        assert_eq!(mem.fetch(ROM_BASE + 4), None);
        assert_eq!(mem.load(ROM_BASE, &[0; 4]), 0);
    }

    #[test]
    fn sp_and_pif_regions() {
        let mut mem = Memory::new(0x40_0000, Box::new(OpenBus));
        mem.write(SP_IMEM_BASE + 4, 4, 0xcafe_f00d);
        assert_eq!(mem.sp_imem[4..8], [0xca, 0xfe, 0xf0, 0x0d]);
        mem.write(PIF_RAM_BASE + 0x3c, 4, 0x80);
        assert_eq!(mem.read(PIF_RAM_BASE + 0x3f, 1), 0x80);
        assert_eq!(mem.fetch(0x0400_2000), None);
    }

    #[test]
    fn unbacked_goes_to_mmio() {
        let recorder = Recorder::default();
        let mut mem = Memory::new(0x40_0000, Box::new(recorder.clone()));
        assert_eq!(mem.read(0x0430_0000, 4), 0x1122_3344 ^ 0x0430_0000);
        assert_eq!(mem.read(0x0430_0002, 2), (0x1122_3344 ^ 0x0430_0000) & 0xffff);
        mem.write(0x0430_0001, 1, 0xab);
        mem.write(0x0430_0008, 8, 0x1111_2222_3333_4444);
        let writes = recorder.writes.lock().unwrap().clone();
        assert_eq!(writes, [
            (0x0430_0000, 0x00ab_0000, 0x00ff_0000),
            (0x0430_0008, 0x1111_2222, !0),
            (0x0430_000c, 0x3333_4444, !0),
        ]);
    }

    #[test]
    fn code_pages_track_dirty_writes() {
        let mut pages = CodePages::default();
        assert!(!pages.touch(0x1000));
        pages.insert(1);
        assert!(pages.touch(0x1ffc));
        assert!(pages.touch(0x1000));
        assert_eq!(pages.dirty, [1]);
        pages.remove(1);
        assert!(!pages.contains(1));
    }
}
