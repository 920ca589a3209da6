/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Greatest coded line index extraction and its unary coding.
//!
//! A gcli is the highest occupied bitplane of a group of
//! [`GROUP_SIZE`](crate::pi::GROUP_SIZE) coefficients. The size
//! functions and the pack functions in this module are kept in strict
//! lockstep; the rate controller budgets with the former, the packer
//! emits with the latter, and the two must agree to the bit.

use crate::bitstream::BitstreamWriter;
use crate::pi::{GROUP_SIZE, SIGNIFICANCE_GROUP_SIZE};

/// Magnitude of a sign + magnitude coefficient.
#[inline]
pub const fn magnitude(coeff: u16) -> u16 {
    coeff & 0x7fff
}

#[inline]
pub const fn is_negative(coeff: u16) -> bool {
    coeff & 0x8000 != 0
}

/// Highest occupied bitplane of a group, 0 when every coefficient is
/// zero.
#[inline]
pub fn gcli_of_group(group: &[u16]) -> u8 {
    let mut max = 0u16;
    for &c in group {
        max |= magnitude(c);
    }
    (16 - max.leading_zeros()) as u8
}

/// Fill the gcli line for one band line of coefficients.
pub fn build_gcli_line(coeffs: &[u16], gclis: &mut [u8]) {
    debug_assert_eq!(coeffs.len().div_ceil(GROUP_SIZE), gclis.len());
    for (group, out) in coeffs.chunks(GROUP_SIZE).zip(gclis.iter_mut()) {
        *out = gcli_of_group(group);
    }
}

/// Fill the per super-group gcli maxima used by significance coding.
pub fn build_significance_line(gclis: &[u8], sig_max: &mut [u8]) {
    debug_assert_eq!(gclis.len().div_ceil(SIGNIFICANCE_GROUP_SIZE), sig_max.len());
    for (sg, out) in gclis.chunks(SIGNIFICANCE_GROUP_SIZE).zip(sig_max.iter_mut()) {
        *out = sg.iter().copied().max().unwrap_or(0);
    }
}

/// Unary code length of a non-negative value.
#[inline]
pub const fn unary_bits(value: u32) -> u32 {
    value + 1
}

#[inline]
fn delta_above(gcli: u8, gtli: u8) -> u32 {
    u32::from(gcli.max(gtli) - gtli)
}

/// Raw gcli stream size: four bits per value.
pub fn line_bits_raw(gclis: &[u8]) -> u32 {
    4 * gclis.len() as u32
}

/// Unary-coded gcli stream size without prediction.
pub fn line_bits_nopred(gclis: &[u8], gtli: u8) -> u32 {
    gclis.iter().map(|&g| unary_bits(delta_above(g, gtli))).sum()
}

/// Unary-coded gcli stream size with zero super-groups elided.
pub fn line_bits_nopred_sig(gclis: &[u8], sig_max: &[u8], gtli: u8) -> u32 {
    let mut bits = 0;
    for (sg, &max) in gclis.chunks(SIGNIFICANCE_GROUP_SIZE).zip(sig_max) {
        if max > gtli {
            bits += sg.iter().map(|&g| unary_bits(delta_above(g, gtli))).sum::<u32>();
        }
    }
    bits
}

pub fn pack_line_raw(bs: &mut BitstreamWriter, gclis: &[u8]) {
    for &g in gclis {
        bs.put_bits(u32::from(g), 4);
    }
}

fn put_unary(bs: &mut BitstreamWriter, value: u32) {
    // `value` one bits terminated by a zero
    let mut left = value;
    while left >= 24 {
        bs.put_bits(0x00ff_ffff, 24);
        left -= 24;
    }
    bs.put_bits((1 << (left + 1)) - 2, (left + 1) as u8);
}

pub fn pack_line_nopred(bs: &mut BitstreamWriter, gclis: &[u8], gtli: u8) {
    for &g in gclis {
        put_unary(bs, delta_above(g, gtli));
    }
}

pub fn pack_line_nopred_sig(bs: &mut BitstreamWriter, gclis: &[u8], sig_max: &[u8], gtli: u8) {
    for (sg, &max) in gclis.chunks(SIGNIFICANCE_GROUP_SIZE).zip(sig_max) {
        if max > gtli {
            for &g in sg {
                put_unary(bs, delta_above(g, gtli));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::bitstream::BitstreamWriter;
    use crate::gcli::{
        build_gcli_line, build_significance_line, gcli_of_group, line_bits_nopred,
        line_bits_nopred_sig, pack_line_nopred, pack_line_nopred_sig
    };

    #[test]
    fn gcli_is_highest_bitplane() {
        assert_eq!(gcli_of_group(&[0, 0, 0, 0]), 0);
        assert_eq!(gcli_of_group(&[1, 0, 0, 0]), 1);
        assert_eq!(gcli_of_group(&[0, 0x8001, 0, 0]), 1); // sign bit ignored
        assert_eq!(gcli_of_group(&[0x0400, 3, 0, 0]), 11);
        assert_eq!(gcli_of_group(&[0x7fff, 0, 0, 0]), 15);
    }

    #[test]
    fn significance_takes_group_max() {
        let coeffs: Vec<u16> = (0..64).map(|i| if i == 37 { 0x00f0 } else { 0 }).collect();
        let mut gclis = vec![0u8; 16];
        let mut sig = vec![0u8; 2];
        build_gcli_line(&coeffs, &mut gclis);
        build_significance_line(&gclis, &mut sig);
        assert_eq!(sig[0], 0);
        assert_eq!(sig[1], 8);
    }

    #[test]
    fn size_and_pack_agree() {
        let gclis = [0u8, 3, 1, 7, 0, 0, 0, 0, 2, 5];
        let mut sig = vec![0u8; 2];
        build_significance_line(&gclis, &mut sig);

        for gtli in 0..8 {
            let bits = line_bits_nopred(&gclis, gtli);
            let mut buf = vec![0u8; 64];
            let mut bs = BitstreamWriter::new(&mut buf);
            pack_line_nopred(&mut bs, &gclis, gtli);
            assert_eq!(bs.used_bits() as u32, bits, "gtli {gtli}");

            let bits = line_bits_nopred_sig(&gclis, &sig, gtli);
            let mut buf = vec![0u8; 64];
            let mut bs = BitstreamWriter::new(&mut buf);
            pack_line_nopred_sig(&mut bs, &gclis, &sig, gtli);
            assert_eq!(bs.used_bits() as u32, bits, "sig gtli {gtli}");
        }
    }
}
