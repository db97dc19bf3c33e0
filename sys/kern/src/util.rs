// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Small utility functions shared across the kernel.

/// Copies `len` bytes from `src` to `dst`, a machine word at a time with a
/// byte-wise tail.
///
/// The ranges must not overlap. Neither pointer needs any particular
/// alignment; word transfers go through unaligned reads and writes.
///
/// # Safety
///
/// `src` must be valid for `len` bytes of reads and `dst` for `len` bytes
/// of writes, and the two ranges must be disjoint.
pub unsafe fn copy_bytes(dst: *mut u8, src: *const u8, len: usize) {
    const WORD: usize = core::mem::size_of::<usize>();
    let words = len / WORD;
    let tail = len % WORD;

    let mut d = dst.cast::<usize>();
    let mut s = src.cast::<usize>();
    for _ in 0..words {
        d.write_unaligned(s.read_unaligned());
        d = d.add(1);
        s = s.add(1);
    }

    let mut d = d.cast::<u8>();
    let mut s = s.cast::<u8>();
    for _ in 0..tail {
        d.write(s.read());
        d = d.add(1);
        s = s.add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_odd_lengths_at_odd_offsets() {
        let src: Vec<u8> = (0..64).collect();
        let mut dst = vec![0u8; 64];
        // Offsets chosen to defeat word alignment on any plausible target.
        unsafe { copy_bytes(dst.as_mut_ptr().add(1), src.as_ptr().add(3), 29) };
        assert_eq!(&dst[1..30], &src[3..32]);
        assert!(dst[30..].iter().all(|&b| b == 0));
        assert_eq!(dst[0], 0);
    }

    #[test]
    fn copies_nothing_for_zero_len() {
        let src = [0xAAu8; 4];
        let mut dst = [0u8; 4];
        unsafe { copy_bytes(dst.as_mut_ptr(), src.as_ptr(), 0) };
        assert_eq!(dst, [0u8; 4]);
    }
}
