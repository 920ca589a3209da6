/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! In-place coefficient quantization.
//!
//! Only groups whose gcli exceeds the band's gtli are touched; the
//! packer never emits the rest, so their stale magnitudes are
//! harmless.

use jxs_core::options::QuantType;

use crate::gcli::{is_negative, magnitude};
use crate::pi::GROUP_SIZE;

/// Smallest magnitude that survives quantization at a given gtli.
///
/// The rate controller counts sign bits with the same threshold so the
/// packer and the budget stay in agreement.
#[inline]
pub const fn significance_threshold(gtli: u8, quant: QuantType) -> u16 {
    match quant {
        QuantType::Deadzone => 1 << gtli,
        QuantType::Uniform => {
            if gtli == 0 {
                1
            } else {
                1 << (gtli - 1)
            }
        }
    }
}

#[inline]
fn quantize_coeff(coeff: u16, gcli: u8, gtli: u8, quant: QuantType) -> u16 {
    let mag = magnitude(coeff);
    let q = match quant {
        QuantType::Deadzone => mag >> gtli,
        QuantType::Uniform => {
            if gtli == 0 {
                mag
            } else {
                // round half up, clamped into the emitted bit width
                let max = (1u16 << (gcli - gtli)) - 1;
                (((mag >> (gtli - 1)) + 1) >> 1).min(max)
            }
        }
    };
    if q == 0 || !is_negative(coeff) {
        q
    } else {
        q | 0x8000
    }
}

/// Quantize one band line in place.
pub fn quantize_line(coeffs: &mut [u16], gclis: &[u8], gtli: u8, quant: QuantType) {
    if gtli == 0 {
        return;
    }
    for (group, &gcli) in coeffs.chunks_mut(GROUP_SIZE).zip(gclis) {
        if gcli <= gtli {
            continue;
        }
        for c in group {
            *c = quantize_coeff(*c, gcli, gtli, quant);
        }
    }
}

#[cfg(test)]
mod tests {
    use jxs_core::options::QuantType;

    use crate::quant::{quantize_line, significance_threshold};

    #[test]
    fn deadzone_truncates_bitplanes() {
        let mut coeffs = [0x00ffu16, 0x8013, 0x0004, 0x0000];
        let gclis = [8u8];
        quantize_line(&mut coeffs, &gclis, 3, QuantType::Deadzone);
        assert_eq!(coeffs, [0x001f, 0x8002, 0x0000, 0x0000]);
    }

    #[test]
    fn uniform_rounds_and_clamps() {
        let mut coeffs = [0x00ffu16, 0x0005, 0, 0];
        let gclis = [8u8];
        quantize_line(&mut coeffs, &gclis, 3, QuantType::Uniform);
        // 0xff -> 0x20 would overflow 5 bits, clamps to 0x1f
        assert_eq!(coeffs[0], 0x1f);
        // 5 -> round(5/8) = 1
        assert_eq!(coeffs[1], 0x0001);
    }

    #[test]
    fn groups_below_gtli_are_untouched() {
        let mut coeffs = [0x0007u16, 0, 0, 0];
        let gclis = [3u8];
        quantize_line(&mut coeffs, &gclis, 3, QuantType::Deadzone);
        assert_eq!(coeffs[0], 0x0007);
    }

    #[test]
    fn thresholds_match_survival() {
        for gtli in 0..12u8 {
            for quant in [QuantType::Deadzone, QuantType::Uniform] {
                let t = significance_threshold(gtli, quant);
                // a magnitude one below the threshold dies, the
                // threshold itself survives
                let gcli = 15u8;
                let mut pair = [t - 1, t, 0, 0];
                quantize_line(&mut pair, &[gcli], gtli, quant);
                if gtli > 0 {
                    assert_eq!(pair[0], 0, "gtli {gtli} {quant:?}");
                    assert_ne!(pair[1], 0, "gtli {gtli} {quant:?}");
                }
            }
        }
    }
}
