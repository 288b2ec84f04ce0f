//! Virtual to physical translation.
//!
//! kseg0/kseg1 are fixed windows onto the low 512 MB. Everything else goes through the 32
//! entry joint TLB, which is mirrored into two direct lookup tables (one for reads and fetches,
//! one for writes) indexed by the 4 KB virtual page. Entries whose physical target is beyond the
//! 512 MB window are left out of the tables and only found by a linear scan.

use crate::regfile::cp0;

pub const TLB_ENTRIES: usize = 32;
const LUT_SIZE: usize = 1 << 20;
const LUT_VALID: u32 = 0x8000_0000;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Fetch,
}

/// Why a translation failed
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Miss {
    /// No valid mapping for this page
    Invalid,
    /// Mapped, but the page is not writable
    Modification,
}

/// One half (even or odd page) of an entry
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct TlbPage {
    pub pfn: u32,
    pub c: u8,
    pub d: bool,
    pub v: bool,
    pub start: u32,
    pub end: u32,
    pub phys: u32,
}

impl TlbPage {
    fn from_entry_lo(lo: u32) -> Self {
        TlbPage {
            pfn: (lo & 0x3fff_ffc0) >> 6,
            c: ((lo >> 3) & 7) as u8,
            d: lo & 0x4 != 0,
            v: lo & 0x2 != 0,
            ..Default::default()
        }
    }

    fn entry_lo(&self, g: bool) -> u32 {
        (self.pfn << 6) | ((self.c as u32) << 3) | ((self.d as u32) << 2) | ((self.v as u32) << 1) | g as u32
    }

    /// The lookup tables only cover valid pages outside kseg0/kseg1 that land in the low 512 MB
    fn in_lut(&self) -> bool {
        self.v
            && self.start < self.end
            && !(self.start >= 0x8000_0000 && self.end < 0xc000_0000)
            && self.phys < 0x2000_0000
    }

    #[inline]
    fn contains(&self, vaddr: u32) -> bool {
        self.start <= vaddr && vaddr <= self.end
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct TlbEntry {
    pub mask: u32,
    pub vpn2: u32,
    pub g: bool,
    pub asid: u8,
    pub even: TlbPage,
    pub odd: TlbPage,
}

impl TlbEntry {
    fn matches(&self, vpn2: u32, asid: u8) -> bool {
        (self.vpn2 & !self.mask) == (vpn2 & !self.mask) && (self.g || self.asid == asid)
    }
}

pub struct Tlb {
    pub entries: [TlbEntry; TLB_ENTRIES],
    lut_r: Vec<u32>,
    lut_w: Vec<u32>,
}

impl Default for Tlb {
    fn default() -> Self {
        Self::new()
    }
}

impl Tlb {
    pub fn new() -> Tlb {
        Tlb {
            entries: [TlbEntry::default(); TLB_ENTRIES],
            lut_r: vec![0; LUT_SIZE],
            lut_w: vec![0; LUT_SIZE],
        }
    }

    /// Translate a virtual address.
    pub fn translate(&self, vaddr: u32, access: Access) -> Result<u32, Miss> {
        if (0x8000_0000..=0xbfff_ffff).contains(&vaddr) {
            return Ok(vaddr & 0x1fff_ffff);
        }

        let page = (vaddr >> 12) as usize;
        let lut = match access {
            Access::Read | Access::Fetch => self.lut_r[page],
            Access::Write => self.lut_w[page],
        };
        if lut & LUT_VALID != 0 {
            return Ok((lut & 0xffff_f000) | (vaddr & 0xfff));
        }

        match self.slow_lookup(vaddr) {
            Some(page) if access == Access::Write && !page.d => Err(Miss::Modification),
            Some(page) => Ok(page.phys.wrapping_add(vaddr - page.start)),
            None => Err(Miss::Invalid),
        }
    }

    /// Linear scan over valid pages; finds entries the lookup tables leave out and
    /// distinguishes clean pages from missing ones on writes.
    /// ASID and G are not checked, same as the direct tables.
    fn slow_lookup(&self, vaddr: u32) -> Option<&TlbPage> {
        self.entries.iter()
            .flat_map(|entry| [&entry.even, &entry.odd])
            .find(|page| page.v && page.start < page.end && page.contains(vaddr))
    }

    /// Index of the entry matching `vaddr` in address space `asid`, valid or not.
    /// Used to pick between the refill and general exception vectors.
    pub fn find(&self, vaddr: u32, asid: u8) -> Option<usize> {
        let vpn2 = vaddr >> 13;
        self.entries.iter().position(|entry| entry.matches(vpn2, asid))
    }

    fn unmap(&mut self, index: usize) {
        let entry = self.entries[index];
        for page in [entry.even, entry.odd] {
            if !page.in_lut() {
                continue;
            }
            for vpage in (page.start >> 12)..=(page.end >> 12) {
                self.lut_r[vpage as usize] = 0;
                if page.d {
                    self.lut_w[vpage as usize] = 0;
                }
            }
        }
    }

    fn map(&mut self, index: usize) {
        let entry = self.entries[index];
        for page in [entry.even, entry.odd] {
            if !page.in_lut() {
                continue;
            }
            for vpage in (page.start >> 12)..=(page.end >> 12) {
                let phys = page.phys.wrapping_add((vpage << 12) - page.start);
                self.lut_r[vpage as usize] = LUT_VALID | phys;
                if page.d {
                    self.lut_w[vpage as usize] = LUT_VALID | phys;
                }
            }
        }
    }

    /// Virtual ranges covered by an entry, valid or not
    fn ranges(&self, index: usize) -> [(u32, u32); 2] {
        let entry = &self.entries[index];
        [(entry.even.start, entry.even.end), (entry.odd.start, entry.odd.end)]
    }

    /// TLBWI/TLBWR: replace entry `index` from EntryHi, EntryLo0/1 and PageMask.
    ///
    /// Returns the virtual ranges that changed (old and new), so translated code for those
    /// pages can be dropped.
    pub fn write_entry(&mut self, index: usize, cop0: &[u32; 32]) -> [(u32, u32); 4] {
        let old = self.ranges(index);
        self.unmap(index);

        let entry_hi = cop0[cp0::ENTRY_HI];
        let lo0 = cop0[cp0::ENTRY_LO0];
        let lo1 = cop0[cp0::ENTRY_LO1];
        let mask = (cop0[cp0::PAGE_MASK] & 0x01ff_e000) >> 13;
        let vpn2 = (entry_hi & 0xffff_e000) >> 13;

        let mut even = TlbPage::from_entry_lo(lo0);
        let mut odd = TlbPage::from_entry_lo(lo1);

        even.start = vpn2 << 13;
        even.end = even.start.wrapping_add(mask << 12).wrapping_add(0xfff);
        even.phys = even.pfn << 12;
        odd.start = even.end.wrapping_add(1);
        odd.end = odd.start.wrapping_add(mask << 12).wrapping_add(0xfff);
        odd.phys = odd.pfn << 12;

        self.entries[index] = TlbEntry {
            mask,
            vpn2,
            g: lo0 & lo1 & 1 != 0,
            asid: entry_hi as u8,
            even,
            odd,
        };
        log::trace!("TLB[{}] = {:x?}", index, self.entries[index]);

        self.map(index);
        let new = self.ranges(index);
        [old[0], old[1], new[0], new[1]]
    }

    /// TLBR: load entry `index` into EntryHi, EntryLo0/1 and PageMask.
    pub fn read_entry(&self, index: usize, cop0: &mut [u32; 32]) {
        let entry = &self.entries[index];
        cop0[cp0::PAGE_MASK] = entry.mask << 13;
        cop0[cp0::ENTRY_HI] = (entry.vpn2 << 13) | entry.asid as u32;
        cop0[cp0::ENTRY_LO0] = entry.even.entry_lo(entry.g);
        cop0[cp0::ENTRY_LO1] = entry.odd.entry_lo(entry.g);
    }

    /// TLBP: search for EntryHi, leaving the result in Index.
    pub fn probe(&self, cop0: &mut [u32; 32]) {
        let entry_hi = cop0[cp0::ENTRY_HI];
        let vpn2 = (entry_hi & 0xffff_e000) >> 13;
        cop0[cp0::INDEX] |= 0x8000_0000;
        if let Some(i) = self.entries.iter().position(|e| e.matches(vpn2, entry_hi as u8)) {
            cop0[cp0::INDEX] = i as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cop0_for(vpn2_addr: u32, mask: u32, lo0: u32, lo1: u32) -> [u32; 32] {
        let mut cop0 = [0; 32];
        cop0[cp0::ENTRY_HI] = vpn2_addr;
        cop0[cp0::PAGE_MASK] = mask;
        cop0[cp0::ENTRY_LO0] = lo0;
        cop0[cp0::ENTRY_LO1] = lo1;
        cop0
    }

    /// PFN in bits 6.., dirty and valid
    fn lo(pfn: u32) -> u32 {
        (pfn << 6) | 0x6
    }

    #[test]
    fn direct_mapped_segments() {
        let tlb = Tlb::new();
        assert_eq!(tlb.translate(0x8000_1234, Access::Read), Ok(0x1234));
        assert_eq!(tlb.translate(0xa400_0040, Access::Write), Ok(0x0400_0040));
        assert_eq!(tlb.translate(0xbfc0_0000, Access::Fetch), Ok(0x1fc0_0000));
        assert_eq!(tlb.translate(0x0000_1000, Access::Read), Err(Miss::Invalid));
        assert_eq!(tlb.translate(0xc000_0000, Access::Read), Err(Miss::Invalid));
    }

    #[test]
    fn slot_zero_mapping_then_overwrite() {
        let mut tlb = Tlb::new();
        // VPN2 0x1000 covers virtual 0x0200_0000..0x0200_1fff
        let cop0 = cop0_for(0x1000 << 13, 0, lo(0x200), 0);
        tlb.write_entry(0, &cop0);
        assert_eq!(tlb.translate(0x0200_0000, Access::Read), Ok(0x0020_0000));
        assert_eq!(tlb.translate(0x0200_0abc, Access::Write), Ok(0x0020_0abc));
        assert_eq!(tlb.translate(0x0200_0fff, Access::Fetch), Ok(0x0020_0fff));
        // odd page was not valid
        assert_eq!(tlb.translate(0x0200_1000, Access::Read), Err(Miss::Invalid));

        let cop0 = cop0_for(0x2000 << 13, 0, lo(0x300), 0);
        tlb.write_entry(0, &cop0);
        assert_eq!(tlb.translate(0x0200_0000, Access::Read), Err(Miss::Invalid));
        assert_eq!(tlb.translate(0x0400_0010, Access::Read), Ok(0x0030_0010));
    }

    #[test]
    fn clean_page_rejects_writes() {
        let mut tlb = Tlb::new();
        let cop0 = cop0_for(0x10 << 13, 0, (0x40 << 6) | 0x2, 0);
        tlb.write_entry(3, &cop0);
        assert_eq!(tlb.translate(0x0002_0010, Access::Read), Ok(0x0004_0010));
        assert_eq!(tlb.translate(0x0002_0010, Access::Write), Err(Miss::Modification));
    }

    #[test]
    fn high_physical_targets_use_slow_path() {
        let mut tlb = Tlb::new();
        // PFN 0x20000 is physical 0x2000_0000
        let cop0 = cop0_for(0x40 << 13, 0, lo(0x20000), 0);
        tlb.write_entry(1, &cop0);
        assert_eq!(tlb.translate(0x0008_0004, Access::Read), Ok(0x2000_0004));

        // a non-global entry from another address space still hits
        let cop0 = cop0_for((0x80 << 13) | 0x05, 0, lo(0x20010), 0);
        tlb.write_entry(2, &cop0);
        assert_eq!(tlb.translate(0x0010_0008, Access::Read), Ok(0x2001_0008));
    }

    #[test]
    fn read_and_probe() {
        let mut tlb = Tlb::new();
        let mut cop0 = cop0_for((0x1234 << 13) | 0x05, 0x6000, lo(0x100) | 1, lo(0x104) | 1);
        tlb.write_entry(7, &cop0);

        let mut out = [0; 32];
        tlb.read_entry(7, &mut out);
        assert_eq!(out[cp0::PAGE_MASK], 0x6000);
        assert_eq!(out[cp0::ENTRY_HI], (0x1234 << 13) | 0x05);
        assert_eq!(out[cp0::ENTRY_LO0], lo(0x100) | 1);
        assert_eq!(out[cp0::ENTRY_LO1], lo(0x104) | 1);

        cop0[cp0::INDEX] = 0;
        cop0[cp0::ENTRY_HI] = 0x1234 << 13 | 0x09;
        tlb.probe(&mut cop0);
        assert_eq!(cop0[cp0::INDEX], 7);

        cop0[cp0::ENTRY_HI] = 0x4321 << 13;
        tlb.probe(&mut cop0);
        assert_eq!(cop0[cp0::INDEX] & 0x8000_0000, 0x8000_0000);
        assert_eq!(tlb.find((0x1234 << 13) + 0x10, 0), Some(7));
    }

    proptest! {
        #[test]
        fn round_trip_both_halves(vpn2 in 0x10u32..0x3_0000, pfn in 0u32..0x1000, mask_bits in 0u32..4) {
            // masks 0, 0x6000, 0x1e000, 0x7e000 (4 KB to 256 KB pages)
            let mask = [0, 0x3, 0xf, 0x3f][mask_bits as usize];
            let vpn2 = vpn2 & !mask;
            let page_size = (mask + 1) << 12;
            let mut tlb = Tlb::new();
            let cop0 = cop0_for(vpn2 << 13, mask << 13, lo(pfn), lo(pfn + 0x2000));
            tlb.write_entry(5, &cop0);

            let even = vpn2 << 13;
            let odd = even + page_size;
            for offset in [0, page_size / 2 + 4, page_size - 4] {
                prop_assert_eq!(tlb.translate(even + offset, Access::Read), Ok((pfn << 12) + offset));
                prop_assert_eq!(tlb.translate(odd + offset, Access::Write), Ok(((pfn + 0x2000) << 12) + offset));
            }
        }
    }
}
