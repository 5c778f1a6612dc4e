// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Rust-Shyper is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! Helpers for the bitmap-shaped registers (mask banks, running bitmaps, blocked sets).

/// Mask covering the low `len` bits.
#[inline]
pub fn bit_mask(len: usize) -> u64 {
    if len >= 64 {
        u64::MAX
    } else {
        (1u64 << len) - 1
    }
}

/// Mask covering an access of `width` bytes.
#[inline]
pub fn width_mask(width: usize) -> u64 {
    bit_mask(width * 8)
}

/// Extract `len` bits of `bits` starting at bit `off`.
#[inline]
pub fn bit_extract(bits: u64, off: usize, len: usize) -> u64 {
    if off >= 64 {
        return 0;
    }
    (bits >> off) & bit_mask(len)
}

#[inline]
pub fn bit_get(bits: u64, off: usize) -> bool {
    off < 64 && (bits >> off) & 1 != 0
}

#[inline]
pub fn bit_set(bits: u64, off: usize) -> u64 {
    bits | (1 << off)
}

#[inline]
pub fn bit_clear(bits: u64, off: usize) -> u64 {
    bits & !(1 << off)
}

/// Iterator over the indices of the set bits of a bitmap, lowest first.
pub struct BitIter(u64);

impl Iterator for BitIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let idx = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Some(idx)
    }
}

pub fn bitmap_iter(bits: u64) -> BitIter {
    BitIter(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_and_mask() {
        assert_eq!(bit_mask(0), 0);
        assert_eq!(bit_mask(64), u64::MAX);
        assert_eq!(width_mask(4), 0xffff_ffff);
        assert_eq!(bit_extract(0xf0f0, 4, 4), 0xf);
        assert_eq!(bit_extract(0xf0f0, 64, 4), 0);
    }

    #[test]
    fn set_clear_get() {
        let bits = bit_set(0, 5);
        assert!(bit_get(bits, 5));
        assert!(!bit_get(bits, 4));
        assert!(!bit_get(bits, 70));
        assert_eq!(bit_clear(bits, 5), 0);
    }

    #[test]
    fn iterates_set_bits_in_order() {
        let set: Vec<usize> = bitmap_iter(0b1010_0101).collect();
        assert_eq!(set, vec![0, 2, 5, 7]);
        assert_eq!(bitmap_iter(1 << 63).collect::<Vec<_>>(), vec![63]);
        assert_eq!(bitmap_iter(0).count(), 0);
    }
}
