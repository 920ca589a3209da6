/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Vertical prediction of gcli lines from the precinct above.
//!
//! A band line predicts each gcli from the same group position in the
//! top precinct's matching line; the signed residual is zigzag mapped
//! and unary coded. Two significance flavours exist: runs marking zero
//! residuals and runs marking zero coefficient groups.
//!
//! As with [`crate::gcli`], every size function has a pack twin that
//! must emit exactly the counted bits.

use crate::bitstream::BitstreamWriter;
use crate::gcli::unary_bits;
use crate::pi::SIGNIFICANCE_GROUP_SIZE;

/// Residual of one group against its vertical prediction.
///
/// Both sides are clamped to the truncation levels visible to a
/// decoder: the current value to `gtli`, the prediction to the larger
/// of both precincts' truncation levels.
#[inline]
pub fn residual(cur: u8, top: u8, gtli: u8, gtli_top: u8) -> i32 {
    let floor = gtli.max(gtli_top);
    i32::from(cur.max(gtli)) - i32::from(top.max(floor))
}

/// Zigzag map a signed residual onto the unary alphabet.
#[inline]
pub const fn map_residual(delta: i32) -> u32 {
    if delta >= 0 {
        (delta as u32) << 1
    } else {
        ((-delta as u32) << 1) - 1
    }
}

fn put_unary(bs: &mut BitstreamWriter, value: u32) {
    let mut left = value;
    while left >= 24 {
        bs.put_bits(0x00ff_ffff, 24);
        left -= 24;
    }
    bs.put_bits((1 << (left + 1)) - 2, (left + 1) as u8);
}

/// Stream size of a vertically predicted line, no significance.
pub fn line_bits_vpred(gclis: &[u8], top_gclis: &[u8], gtli: u8, gtli_top: u8) -> u32 {
    debug_assert_eq!(gclis.len(), top_gclis.len());
    gclis
        .iter()
        .zip(top_gclis)
        .map(|(&g, &t)| unary_bits(map_residual(residual(g, t, gtli, gtli_top))))
        .sum()
}

/// Stream size of a vertically predicted line with significance.
///
/// `zero_coefficients` selects what a zero run means: `false` elides
/// super-groups whose residuals are all zero, `true` elides
/// super-groups whose coefficients are all below `gtli`.
pub fn line_bits_vpred_sig(
    gclis: &[u8], top_gclis: &[u8], sig_max: &[u8], gtli: u8, gtli_top: u8,
    zero_coefficients: bool
) -> u32 {
    let mut bits = 0;
    let groups = gclis.chunks(SIGNIFICANCE_GROUP_SIZE);
    let top_groups = top_gclis.chunks(SIGNIFICANCE_GROUP_SIZE);

    for ((sg, top_sg), &max) in groups.zip(top_groups).zip(sig_max) {
        let inner: u32 = sg
            .iter()
            .zip(top_sg)
            .map(|(&g, &t)| unary_bits(map_residual(residual(g, t, gtli, gtli_top))))
            .sum();
        let significant = if zero_coefficients {
            max > gtli
        } else {
            // a run of zero residuals costs one unary bit per group
            inner != sg.len() as u32
        };
        if significant {
            bits += inner;
        }
    }
    bits
}

pub fn pack_line_vpred(
    bs: &mut BitstreamWriter, gclis: &[u8], top_gclis: &[u8], gtli: u8, gtli_top: u8
) {
    for (&g, &t) in gclis.iter().zip(top_gclis) {
        put_unary(bs, map_residual(residual(g, t, gtli, gtli_top)));
    }
}

pub fn pack_line_vpred_sig(
    bs: &mut BitstreamWriter, gclis: &[u8], top_gclis: &[u8], sig_max: &[u8], gtli: u8,
    gtli_top: u8, zero_coefficients: bool
) {
    let groups = gclis.chunks(SIGNIFICANCE_GROUP_SIZE);
    let top_groups = top_gclis.chunks(SIGNIFICANCE_GROUP_SIZE);

    for ((sg, top_sg), &max) in groups.zip(top_groups).zip(sig_max) {
        if line_group_significant(sg, top_sg, max, gtli, gtli_top, zero_coefficients) {
            for (&g, &t) in sg.iter().zip(top_sg) {
                put_unary(bs, map_residual(residual(g, t, gtli, gtli_top)));
            }
        }
    }
}

/// Significance flag of one super-group under vertical prediction.
pub fn line_group_significant(
    sg: &[u8], top_sg: &[u8], sig_max: u8, gtli: u8, gtli_top: u8, zero_coefficients: bool
) -> bool {
    if zero_coefficients {
        sig_max > gtli
    } else {
        sg.iter()
            .zip(top_sg)
            .any(|(&g, &t)| residual(g, t, gtli, gtli_top) != 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::bitstream::BitstreamWriter;
    use crate::gcli::build_significance_line;
    use crate::vpred::{
        line_bits_vpred, line_bits_vpred_sig, map_residual, pack_line_vpred, pack_line_vpred_sig,
        residual
    };

    #[test]
    fn residual_is_zero_for_copied_lines() {
        for g in 0..16u8 {
            assert_eq!(residual(g, g, 0, 0), 0);
        }
        // values below both truncation levels predict exactly
        assert_eq!(residual(1, 2, 3, 3), 0);
    }

    #[test]
    fn zigzag_is_bijective_on_small_values() {
        let mapped: Vec<u32> = (-3..=3).map(map_residual).collect();
        let mut sorted = mapped.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), mapped.len());
        assert_eq!(map_residual(0), 0);
    }

    #[test]
    fn size_and_pack_agree() {
        let gclis = [3u8, 0, 5, 1, 1, 0, 0, 2, 9, 9];
        let tops = [2u8, 0, 5, 3, 0, 0, 1, 2, 9, 8];
        let mut sig = vec![0u8; 2];
        build_significance_line(&gclis, &mut sig);

        for gtli in 0..6 {
            for gtli_top in 0..6 {
                let bits = line_bits_vpred(&gclis, &tops, gtli, gtli_top);
                let mut buf = vec![0u8; 64];
                let mut bs = BitstreamWriter::new(&mut buf);
                pack_line_vpred(&mut bs, &gclis, &tops, gtli, gtli_top);
                assert_eq!(bs.used_bits() as u32, bits);

                for zero_coeff in [false, true] {
                    let bits =
                        line_bits_vpred_sig(&gclis, &tops, &sig, gtli, gtli_top, zero_coeff);
                    let mut buf = vec![0u8; 64];
                    let mut bs = BitstreamWriter::new(&mut buf);
                    pack_line_vpred_sig(&mut bs, &gclis, &tops, &sig, gtli, gtli_top, zero_coeff);
                    assert_eq!(bs.used_bits() as u32, bits);
                }
            }
        }
    }
}
