/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Precinct packer: emit one rate-controlled precinct into its slice
//! window.
//!
//! Emission order per band packet: header, significance flags, gcli
//! stream, coefficient data (with inline signs when sign handling is
//! off), sign stream. Every stream is byte aligned and its size must
//! land exactly on the bytes the rate controller budgeted.

use jxs_core::options::SignHandling;
use log::error;

use crate::bitstream::BitstreamWriter;
use crate::encoder::EncCommon;
use crate::errors::EncodeErrors;
use crate::gcli::{is_negative, magnitude};
use crate::headers::{write_packet_header, write_precinct_header};
use crate::pi::GROUP_SIZE;
use crate::precinct::{GcliMethod, PrecinctEnc};
use crate::vpred::line_group_significant;
use crate::{gcli, vpred};

/// Emit coefficient data bits of one line, with inline signs when
/// requested. Mirrors the bit counting in
/// [`crate::rc`]'s line statistics.
fn pack_data_line(
    bs: &mut BitstreamWriter, coeffs: &[u16], gclis: &[u8], gtli: u8, inline_signs: bool
) {
    for (group, &g) in coeffs.chunks(GROUP_SIZE).zip(gclis) {
        if g <= gtli {
            continue;
        }
        let nbits = g - gtli;
        for &c in group {
            bs.put_bits(u32::from(magnitude(c)), nbits);
        }
        if inline_signs {
            for &c in group {
                if magnitude(c) != 0 {
                    bs.put_bits(u32::from(is_negative(c)), 1);
                }
            }
        }
    }
}

/// Emit the separate sign stream of one line.
fn pack_sign_line(bs: &mut BitstreamWriter, coeffs: &[u16], gclis: &[u8], gtli: u8) {
    for (group, &g) in coeffs.chunks(GROUP_SIZE).zip(gclis) {
        if g <= gtli {
            continue;
        }
        for &c in group {
            if magnitude(c) != 0 {
                bs.put_bits(u32::from(is_negative(c)), 1);
            }
        }
    }
}

/// Pack one precinct into the slice window.
///
/// The precinct must hold a committed rate-control solution; the
/// coefficient buffers must already be quantized.
pub fn pack_precinct(
    bs: &mut BitstreamWriter, enc: &EncCommon, precinct: &mut PrecinctEnc,
    top: Option<&PrecinctEnc>
) -> Result<(), EncodeErrors> {
    let short = enc.pi.use_short_header;
    let start_bytes = bs.used_bytes();

    write_precinct_header(
        bs,
        short,
        precinct.pack_total_bytes,
        precinct.pack_quantization,
        precinct.pack_refinement
    );

    let mut retrieved = 0u32;
    let zero_coefficients = enc.vpred_zero_coefficients();

    for gb in enc.pi.global_bands.iter() {
        let (c, b) = (gb.comp, gb.band);
        let band = &enc.pi.components[c].bands[b];
        let cl = &enc.layout.components[c];
        let state = &precinct.bands[c][b];
        let rate = state.rate;
        let gtli = state.gtli;
        let lines = band.lines(precinct.kind);

        let sign_field_offset = write_packet_header(
            bs,
            !short,
            rate.method == GcliMethod::Raw,
            rate.data_bytes,
            rate.gcli_bytes,
            rate.sign_bytes
        );

        // significance flags
        if rate.method.uses_significance() {
            let stream_start = bs.used_bytes();
            for line in 0..lines {
                let sigs = &precinct.sig[c][cl.sig_range(b, band, line)];
                match rate.method {
                    GcliMethod::NoPredSig => {
                        for &max in sigs {
                            bs.put_bits(u32::from(max > gtli), 1);
                        }
                    }
                    GcliMethod::VpredSig => {
                        let gclis = &precinct.gcli[c][cl.gcli_range(b, band, line)];
                        let t = top.expect("vpred method without top precinct");
                        let top_gclis = &t.gcli[c][cl.gcli_range(b, band, line)];
                        let gtli_top = t.bands[c][b].gtli;
                        let groups = gclis.chunks(crate::pi::SIGNIFICANCE_GROUP_SIZE);
                        let top_groups =
                            top_gclis.chunks(crate::pi::SIGNIFICANCE_GROUP_SIZE);
                        for ((sg, top_sg), &max) in groups.zip(top_groups).zip(sigs) {
                            let flag = line_group_significant(
                                sg,
                                top_sg,
                                max,
                                gtli,
                                gtli_top,
                                zero_coefficients
                            );
                            bs.put_bits(u32::from(flag), 1);
                        }
                    }
                    _ => unreachable!()
                }
            }
            bs.align_to_byte();
            debug_assert_eq!((bs.used_bytes() - stream_start) as u32, rate.sig_bytes);
        }

        // gcli stream
        {
            let stream_start = bs.used_bytes();
            for line in 0..lines {
                let gclis = &precinct.gcli[c][cl.gcli_range(b, band, line)];
                match rate.method {
                    GcliMethod::Raw => gcli::pack_line_raw(bs, gclis),
                    GcliMethod::NoPred => gcli::pack_line_nopred(bs, gclis, gtli),
                    GcliMethod::NoPredSig => {
                        let sigs = &precinct.sig[c][cl.sig_range(b, band, line)];
                        gcli::pack_line_nopred_sig(bs, gclis, sigs, gtli);
                    }
                    GcliMethod::Vpred | GcliMethod::VpredSig => {
                        let t = top.expect("vpred method without top precinct");
                        let top_gclis = &t.gcli[c][cl.gcli_range(b, band, line)];
                        let gtli_top = t.bands[c][b].gtli;
                        if rate.method == GcliMethod::Vpred {
                            vpred::pack_line_vpred(bs, gclis, top_gclis, gtli, gtli_top);
                        } else {
                            let sigs = &precinct.sig[c][cl.sig_range(b, band, line)];
                            vpred::pack_line_vpred_sig(
                                bs,
                                gclis,
                                top_gclis,
                                sigs,
                                gtli,
                                gtli_top,
                                zero_coefficients
                            );
                        }
                    }
                }
            }
            bs.align_to_byte();
            debug_assert_eq!((bs.used_bytes() - stream_start) as u32, rate.gcli_bytes);
        }

        // coefficient data
        {
            let stream_start = bs.used_bytes();
            let inline_signs = enc.signs_handling == SignHandling::Off;
            for line in 0..lines {
                let coeffs = &precinct.coeff[c][cl.coeff_range(b, band, line)];
                let gclis = &precinct.gcli[c][cl.gcli_range(b, band, line)];
                pack_data_line(bs, coeffs, gclis, gtli, inline_signs);
            }
            bs.align_to_byte();
            debug_assert_eq!((bs.used_bytes() - stream_start) as u32, rate.data_bytes);
        }

        // sign stream
        if enc.signs_handling != SignHandling::Off {
            let stream_start = bs.used_bytes();
            for line in 0..lines {
                let coeffs = &precinct.coeff[c][cl.coeff_range(b, band, line)];
                let gclis = &precinct.gcli[c][cl.gcli_range(b, band, line)];
                pack_sign_line(bs, coeffs, gclis, gtli);
            }
            bs.align_to_byte();
            let actual = (bs.used_bytes() - stream_start) as u32;

            match enc.signs_handling {
                SignHandling::Full => {
                    debug_assert_eq!(actual, rate.sign_bytes);
                }
                SignHandling::Fast => {
                    debug_assert!(actual <= rate.sign_bytes);
                    let field_bits: u8 = if short { 11 } else { 15 };
                    bs.update_bits(sign_field_offset, actual, field_bits);
                    let unused = rate.sign_bytes - actual;
                    if precinct.pack_signs_cut {
                        retrieved += unused;
                    } else {
                        bs.pad_bytes(unused as usize);
                    }
                }
                SignHandling::Off => unreachable!()
            }
        }
    }

    precinct.pack_signs_retrieve_bytes = retrieved;

    let written = (bs.used_bytes() - start_bytes) as u32;
    let expected = precinct.pack_total_bytes - precinct.pack_padding_bytes - retrieved;
    if written != expected {
        error!(
            "precinct {}: packed {written} bytes, rate control budgeted {expected}",
            precinct.prec_idx
        );
        debug_assert_eq!(written, expected);
        return Err(EncodeErrors::PackerAccounting {
            expected,
            found: written
        });
    }

    bs.pad_bytes(precinct.pack_padding_bytes as usize);
    Ok(())
}

#[cfg(test)]
mod tests {
    use jxs_core::colour_format::ColourFormat;
    use jxs_core::options::{
        EncoderOptions, QuantType, SignHandling, VerticalPredictionMode
    };

    use crate::bitstream::BitstreamWriter;
    use crate::encoder::{build_enc_common, EncCommon};
    use crate::pack::pack_precinct;
    use crate::precinct::PrecinctEnc;
    use crate::quant::quantize_line;
    use crate::rc;

    fn test_common(
        signs: SignHandling, significance: bool, vpred: VerticalPredictionMode, quant: QuantType
    ) -> EncCommon {
        let options = EncoderOptions::new(48, 32, 8, ColourFormat::PlanarYuv400)
            .set_bpp(4, 1)
            .set_decomposition(2, 1)
            .set_slice_height(16)
            .set_signs_handling(signs)
            .set_significance(significance)
            .set_vertical_prediction(vpred)
            .set_quantization(quant);
        build_enc_common(&options).unwrap()
    }

    fn fill_precinct(enc: &EncCommon, precinct: &mut PrecinctEnc, prec_idx: u32, seed: u32) {
        precinct.init(&enc.pi, prec_idx);
        let mut state = seed | 1;
        for comp in precinct.coeff.iter_mut() {
            for c in comp.iter_mut() {
                // xorshift noise with a bias towards small magnitudes
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                let mag = (state >> 20) & 0x0fff;
                let mag = if state & 0x30 == 0 { mag } else { mag & 0x3f };
                *c = mag as u16 | ((state & 0x8000) as u16);
            }
        }
        precinct.build_gcli(&enc.pi);
    }

    fn quantize(enc: &EncCommon, precinct: &mut PrecinctEnc) {
        let PrecinctEnc {
            bands,
            coeff,
            gcli,
            kind,
            ..
        } = precinct;
        for c in 0..enc.pi.comps_num {
            let cl = &enc.layout.components[c];
            for (b, band) in enc.pi.components[c].bands.iter().enumerate() {
                let gtli = bands[c][b].gtli;
                if gtli == 0 {
                    continue;
                }
                for line in 0..band.lines(*kind) {
                    quantize_line(
                        &mut coeff[c][cl.coeff_range(b, band, line)],
                        &gcli[c][cl.gcli_range(b, band, line)],
                        gtli,
                        enc.quantization
                    );
                }
            }
        }
    }

    /// The packer must land exactly on the rate controller's budget in
    /// every coding configuration.
    #[test]
    fn packed_bytes_match_rate_control() {
        let configs = [
            (SignHandling::Off, true, VerticalPredictionMode::Disabled, QuantType::Deadzone),
            (SignHandling::Off, false, VerticalPredictionMode::Disabled, QuantType::Deadzone),
            (SignHandling::Full, true, VerticalPredictionMode::Disabled, QuantType::Uniform),
            (SignHandling::Fast, true, VerticalPredictionMode::Disabled, QuantType::Deadzone),
            (SignHandling::Off, true, VerticalPredictionMode::ZeroResidual, QuantType::Deadzone),
            (
                SignHandling::Full,
                true,
                VerticalPredictionMode::ZeroCoefficients,
                QuantType::Deadzone
            )
        ];

        for (i, &(signs, sig, vpred, quant)) in configs.iter().enumerate() {
            let enc = test_common(signs, sig, vpred, quant);
            let mut top = PrecinctEnc::new(&enc.pi, &enc.layout, enc.significance);
            let mut cur = PrecinctEnc::new(&enc.pi, &enc.layout, enc.significance);

            for budget in [200u32, 400, 900] {
                fill_precinct(&enc, &mut top, 0, 7 + i as u32);
                rc::rate_control_precinct(&enc, &mut top, None, budget, 0).unwrap();
                quantize(&enc, &mut top);
                let mut buf = vec![0u8; budget as usize];
                let mut bs = BitstreamWriter::new(&mut buf);
                pack_precinct(&mut bs, &enc, &mut top, None).unwrap();
                assert_eq!(bs.used_bytes() as u32, budget, "top config {i} budget {budget}");

                let use_top = enc.vpred_enabled();
                fill_precinct(&enc, &mut cur, 1, 1000 + i as u32);
                rc::rate_control_precinct(
                    &enc,
                    &mut cur,
                    use_top.then_some(&top),
                    budget,
                    0
                )
                .unwrap();
                quantize(&enc, &mut cur);
                let mut buf = vec![0u8; budget as usize];
                let mut bs = BitstreamWriter::new(&mut buf);
                pack_precinct(&mut bs, &enc, &mut cur, use_top.then_some(&top)).unwrap();
                assert_eq!(bs.used_bytes() as u32, budget, "cur config {i} budget {budget}");
            }
        }
    }

    /// The committed refinement is maximal: one more step must burst
    /// the budget.
    #[test]
    fn refinement_is_binary_search_optimal() {
        let enc = test_common(
            SignHandling::Off,
            true,
            VerticalPredictionMode::Disabled,
            QuantType::Deadzone
        );
        let mut precinct = PrecinctEnc::new(&enc.pi, &enc.layout, enc.significance);

        for budget in [160u32, 300, 700, 1500] {
            fill_precinct(&enc, &mut precinct, 0, budget);
            rc::rate_control_precinct(&enc, &mut precinct, None, budget, 0).unwrap();
            let (q, r) = (precinct.pack_quantization, precinct.pack_refinement);

            assert!(rc::precinct_size(&enc, &mut precinct, None, q, r) <= budget);
            if r < enc.pi.bands_num_all as u8 {
                assert!(
                    rc::precinct_size(&enc, &mut precinct, None, q, r + 1) > budget,
                    "budget {budget}: refinement {r} is not maximal"
                );
            } else if q > 0 {
                // the whole next quantization step fits only if the
                // search could not descend further
                assert!(rc::precinct_size(&enc, &mut precinct, None, q - 1, 0) > budget);
            }
        }
    }

    /// Too small a budget must fail cleanly.
    #[test]
    fn impossible_budget_reports_failure() {
        let enc = test_common(
            SignHandling::Off,
            true,
            VerticalPredictionMode::Disabled,
            QuantType::Deadzone
        );
        let mut precinct = PrecinctEnc::new(&enc.pi, &enc.layout, enc.significance);
        fill_precinct(&enc, &mut precinct, 0, 3);
        let err = rc::rate_control_precinct(&enc, &mut precinct, None, 8, 5);
        assert_eq!(
            err,
            Err(crate::errors::EncodeErrors::RateControlFailed { slice_idx: 5 })
        );
    }
}
