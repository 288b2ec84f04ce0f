use core::fmt;
use std::ops::BitAnd;

/// A mask selecting a run of byte lanes within a big-endian doubleword.
///
/// Lane 0 is the most significant byte. Unaligned loads and stores (LWL, LDR, SWL, ...)
/// are expressed as a masked insert of a shifted value into the old contents.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ByteMask8 {
    mask: u64,
}

impl ByteMask8 {
    /// # Arguments
    ///
    /// * `width` - number of byte lanes covered, 0 to 8
    /// * `offset` - first lane covered, counted from the most significant byte
    #[inline(always)]
    pub fn new<W, A>(width: W, offset: A) -> Self
    where u32: From<W>, u32: From<A> {
        let width = u32::from(width);
        let offset = u32::from(offset);
        if width == 0 || offset >= 8 {
            return ByteMask8 { mask: 0 };
        }
        let mask = (!0u64).wrapping_shl(64 - width.min(8) * 8) >> (offset * 8);
        ByteMask8 { mask }
    }

    /// Mask covering the `width` least significant lanes.
    #[inline(always)]
    pub fn low(width: u32) -> Self {
        Self::new(width, 8u32.saturating_sub(width))
    }

    /// Mask covering the `width` most significant lanes.
    #[inline(always)]
    pub fn high(width: u32) -> Self {
        Self::new(width, 0u32)
    }

    #[inline(always)]
    pub fn apply(&self, data: u64) -> u64 {
        data & self.mask
    }

    #[inline(always)]
    pub fn masked_insert(&self, dest: &mut u64, value: u64) {
        *dest = (*dest & !self.mask) | (value & self.mask);
    }

    /// Same as `masked_insert`, returning the merged value.
    #[inline(always)]
    pub fn merge(&self, dest: u64, value: u64) -> u64 {
        (dest & !self.mask) | (value & self.mask)
    }

    #[inline(always)]
    pub fn value(&self) -> u64 {
        self.mask
    }

    /// Number of bits covered
    pub fn size(&self) -> u32 {
        self.mask.count_ones()
    }
}

impl BitAnd for ByteMask8 {
    type Output = Self;

    #[inline(always)]
    fn bitand(self, rhs: Self) -> Self::Output {
        ByteMask8 {
            mask: self.mask & rhs.mask,
        }
    }
}

impl Default for ByteMask8 {
    #[inline(always)]
    fn default() -> Self {
        ByteMask8 { mask: !0 }
    }
}

impl fmt::Debug for ByteMask8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteMask8({:016x})", self.mask)
    }
}

/// Sign extend the low 32 bits of a value into a full register
#[inline(always)]
pub fn sign_extend32(value: u64) -> u64 {
    value as u32 as i32 as i64 as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lanes_from_msb() {
        assert_eq!(ByteMask8::new(8u32, 0u32).value(), !0);
        assert_eq!(ByteMask8::new(1u32, 0u32).value(), 0xff00_0000_0000_0000);
        assert_eq!(ByteMask8::new(2u32, 3u32).value(), 0x0000_00ff_ff00_0000);
        assert_eq!(ByteMask8::new(0u32, 0u32).value(), 0);
    }

    #[test]
    fn low_and_high() {
        assert_eq!(ByteMask8::low(1).value(), 0xff);
        assert_eq!(ByteMask8::low(4).value(), 0xffff_ffff);
        assert_eq!(ByteMask8::high(7).value(), 0xffff_ffff_ffff_ff00);
        assert_eq!(ByteMask8::low(8), ByteMask8::default());
    }

    #[test]
    fn insert_keeps_unmasked_lanes() {
        let mut dest = 0x1122_3344_5566_7788;
        ByteMask8::low(2).masked_insert(&mut dest, 0xaaaa_bbbb_cccc_dddd);
        assert_eq!(dest, 0x1122_3344_5566_dddd);
        assert_eq!(ByteMask8::high(1).merge(0, !0), 0xff00_0000_0000_0000);
        assert_eq!((ByteMask8::high(4) & ByteMask8::low(5)).size(), 8);
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend32(0x7fff_ffff), 0x7fff_ffff);
        assert_eq!(sign_extend32(0x8000_0000), 0xffff_ffff_8000_0000);
        assert_eq!(sign_extend32(0x1234_5678_0000_0001), 1);
    }
}
