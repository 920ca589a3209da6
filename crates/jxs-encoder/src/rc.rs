/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Rate control: mapping a byte budget onto a quantization and
//! refinement pair.
//!
//! The search walks the quantization down from its maximum while the
//! precinct still fits, then binary-searches the largest refinement
//! that fits at that quantization. Per-band results are cached in a
//! two-slot ring keyed by gtli so neighbouring probes reuse their
//! line statistics.

use jxs_core::options::SignHandling;

use crate::encoder::EncCommon;
use crate::errors::EncodeErrors;
use crate::gcli::magnitude;
use crate::headers::{packet_header_bytes, precinct_header_bytes};
use crate::pi::{BandInfo, GROUP_SIZE, TRUNCATION_MAX};
use crate::precinct::{BandRate, GcliMethod, LineSizes, PrecinctEnc, RC_BAND_CACHE_SIZE};
use crate::quant::significance_threshold;
use crate::{gcli, vpred};

/// Truncation level of a band under a (quantization, refinement) pair.
///
/// Gain lowers the band's truncation, a refinement rank below the
/// refinement count buys one further bitplane.
pub fn gtli_for_band(band: &BandInfo, quantization: u8, refinement: u8) -> u8 {
    let mut gtli = i32::from(quantization) - i32::from(band.gain);
    if band.priority < refinement {
        gtli -= 1;
    }
    gtli.clamp(0, i32::from(TRUNCATION_MAX)) as u8
}

const fn bits_to_bytes(bits: u32) -> u32 {
    bits.div_ceil(8)
}

fn compute_line_sizes(
    coeffs: &[u16], gclis: &[u8], sigs: &[u8], top: Option<(&[u8], u8)>, gtli: u8,
    enc: &EncCommon
) -> LineSizes {
    let mut ls = LineSizes {
        gcli_raw_bits: gcli::line_bits_raw(gclis),
        gcli_nopred_bits: gcli::line_bits_nopred(gclis, gtli),
        ..LineSizes::default()
    };

    let threshold = significance_threshold(gtli, enc.quantization);
    for (group, &g) in coeffs.chunks(GROUP_SIZE).zip(gclis) {
        if g > gtli {
            ls.data_bits += group.len() as u32 * u32::from(g - gtli);
            ls.sign_upper_bits += group.len() as u32;
            for &c in group {
                if magnitude(c) >= threshold {
                    ls.sign_bits += 1;
                }
            }
        }
    }

    if !sigs.is_empty() {
        ls.gcli_nopred_sig_bits = gcli::line_bits_nopred_sig(gclis, sigs, gtli);
    }
    if let Some((top_gclis, gtli_top)) = top {
        ls.gcli_vpred_bits = vpred::line_bits_vpred(gclis, top_gclis, gtli, gtli_top);
        if !sigs.is_empty() {
            ls.gcli_vpred_sig_bits = vpred::line_bits_vpred_sig(
                gclis,
                top_gclis,
                sigs,
                gtli,
                gtli_top,
                enc.vpred_zero_coefficients()
            );
        }
    }
    ls
}

/// Pick the cheapest coding method for a band and fill its byte
/// budget. Data and sign streams are identical across methods, only
/// the gcli and significance streams compete.
fn select_method(
    enc: &EncCommon, band: &BandInfo, lines: &[LineSizes], use_vpred: bool
) -> BandRate {
    let header = packet_header_bytes(enc.pi.use_short_header);

    let data_bits: u32 = lines.iter().map(|l| l.data_bits).sum();
    let sign_bits: u32 = lines.iter().map(|l| l.sign_bits).sum();
    let sign_upper_bits: u32 = lines.iter().map(|l| l.sign_upper_bits).sum();

    let (data_bytes, sign_bytes) = match enc.signs_handling {
        SignHandling::Off => (bits_to_bytes(data_bits + sign_bits), 0),
        SignHandling::Full => (bits_to_bytes(data_bits), bits_to_bytes(sign_bits)),
        SignHandling::Fast => (bits_to_bytes(data_bits), bits_to_bytes(sign_upper_bits))
    };

    let sig_stream_bytes = bits_to_bytes(band.significance_width * lines.len() as u32);

    let mut candidates: Vec<(GcliMethod, u32, u32)> = Vec::with_capacity(5);
    candidates.push((
        GcliMethod::NoPred,
        lines.iter().map(|l| l.gcli_nopred_bits).sum(),
        0
    ));
    if enc.significance {
        candidates.push((
            GcliMethod::NoPredSig,
            lines.iter().map(|l| l.gcli_nopred_sig_bits).sum(),
            sig_stream_bytes
        ));
    }
    if use_vpred {
        candidates.push((
            GcliMethod::Vpred,
            lines.iter().map(|l| l.gcli_vpred_bits).sum(),
            0
        ));
        if enc.significance {
            candidates.push((
                GcliMethod::VpredSig,
                lines.iter().map(|l| l.gcli_vpred_sig_bits).sum(),
                sig_stream_bytes
            ));
        }
    }
    candidates.push((GcliMethod::Raw, lines.iter().map(|l| l.gcli_raw_bits).sum(), 0));

    let (method, gcli_bits, sig_bytes) = candidates
        .into_iter()
        .min_by_key(|&(_, bits, sig)| bits_to_bytes(bits) + sig)
        .unwrap();

    let gcli_bytes = bits_to_bytes(gcli_bits);
    BandRate {
        method,
        sig_bytes,
        gcli_bytes,
        data_bytes,
        sign_bytes,
        total_bytes: header + sig_bytes + gcli_bytes + data_bytes + sign_bytes
    }
}

/// Byte cost of band `(c, b)` at `gtli`, through the per-band cache.
pub fn band_rate(
    enc: &EncCommon, precinct: &mut PrecinctEnc, top: Option<&PrecinctEnc>, c: usize, b: usize,
    gtli: u8
) -> BandRate {
    let use_vpred = top.is_some() && enc.vpred_enabled();

    let PrecinctEnc {
        bands,
        coeff,
        gcli,
        sig,
        kind,
        ..
    } = precinct;

    let band = &enc.pi.components[c].bands[b];
    let lines = band.lines(*kind) as usize;
    let state = &mut bands[c][b];

    for slot in state.cache.iter() {
        if slot.valid && slot.gtli == gtli && (slot.has_vpred || !use_vpred) {
            return slot.rate;
        }
    }

    let slot_idx = state.cache_next;
    state.cache_next = (state.cache_next + 1) % RC_BAND_CACHE_SIZE;

    let cl = &enc.layout.components[c];
    let slot = &mut state.cache[slot_idx];
    slot.valid = true;
    slot.gtli = gtli;
    slot.has_vpred = use_vpred;

    for line in 0..lines {
        let coeffs = &coeff[c][cl.coeff_range(b, band, line as u32)];
        let gclis = &gcli[c][cl.gcli_range(b, band, line as u32)];
        let sigs = if sig[c].is_empty() {
            &[][..]
        } else {
            &sig[c][cl.sig_range(b, band, line as u32)]
        };
        let top_line = if use_vpred {
            let t = top.unwrap();
            Some((
                &t.gcli[c][cl.gcli_range(b, band, line as u32)],
                t.bands[c][b].gtli
            ))
        } else {
            None
        };
        slot.lines[line] = compute_line_sizes(coeffs, gclis, sigs, top_line, gtli, enc);
    }

    slot.rate = select_method(enc, band, &slot.lines[..lines], use_vpred);
    slot.rate
}

/// Packed byte size of a whole precinct at one (q, r) candidate.
pub fn precinct_size(
    enc: &EncCommon, precinct: &mut PrecinctEnc, top: Option<&PrecinctEnc>, quantization: u8,
    refinement: u8
) -> u32 {
    let mut total = precinct_header_bytes(enc.pi.use_short_header);
    for gb in enc.pi.global_bands.iter() {
        let band = &enc.pi.components[gb.comp].bands[gb.band];
        let gtli = gtli_for_band(band, quantization, refinement);
        total += band_rate(enc, precinct, top, gb.comp, gb.band, gtli).total_bytes;
    }
    total
}

/// Store the solution into the precinct's band states.
fn commit_precinct(
    enc: &EncCommon, precinct: &mut PrecinctEnc, top: Option<&PrecinctEnc>, quantization: u8,
    refinement: u8, budget_bytes: u32
) {
    let used = precinct_size(enc, precinct, top, quantization, refinement);
    debug_assert!(used <= budget_bytes);

    for gb in enc.pi.global_bands.iter() {
        let band = &enc.pi.components[gb.comp].bands[gb.band];
        let gtli = gtli_for_band(band, quantization, refinement);
        let rate = band_rate(enc, precinct, top, gb.comp, gb.band, gtli);
        let state = &mut precinct.bands[gb.comp][gb.band];
        state.gtli = gtli;
        state.rate = rate;
    }

    precinct.pack_quantization = quantization;
    precinct.pack_refinement = refinement;
    precinct.pack_total_bytes = budget_bytes;
    precinct.pack_padding_bytes = budget_bytes - used;
    precinct.pack_signs_retrieve_bytes = 0;
    precinct.pack_signs_cut = false;
}

/// Budget one precinct: largest refinement at the lowest feasible
/// quantization.
pub fn rate_control_precinct(
    enc: &EncCommon, precinct: &mut PrecinctEnc, top: Option<&PrecinctEnc>, budget_bytes: u32,
    slice_idx: u32
) -> Result<(), EncodeErrors> {
    let bands_num = enc.pi.bands_num_all as u8;

    if precinct_size(enc, precinct, top, enc.max_quantization, 0) > budget_bytes {
        return Err(EncodeErrors::RateControlFailed { slice_idx });
    }

    let mut q = enc.max_quantization;
    while q > 0 && precinct_size(enc, precinct, top, q - 1, 0) <= budget_bytes {
        q -= 1;
    }

    // largest refinement that still fits; one more must overflow
    let mut lo = 0u8;
    let mut hi = bands_num;
    while lo < hi {
        let mid = ((u32::from(lo) + u32::from(hi) + 1) / 2) as u8;
        if precinct_size(enc, precinct, top, q, mid) <= budget_bytes {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }

    commit_precinct(enc, precinct, top, q, lo, budget_bytes);
    Ok(())
}

/// Budget a whole slice with one shared (quantization, refinement).
///
/// Vertical prediction is left out of the shared search; the
/// per-precinct re-run performed by the pack stage picks it up once
/// budgets are final. All leftover bytes land on the last precinct as
/// padding.
pub fn rate_control_slice(
    enc: &EncCommon, precincts: &mut [PrecinctEnc], budget_bytes: u32, slice_idx: u32
) -> Result<(), EncodeErrors> {
    let bands_num = enc.pi.bands_num_all as u8;

    let slice_size = |precincts: &mut [PrecinctEnc], q: u8, r: u8| -> u32 {
        precincts
            .iter_mut()
            .map(|p| precinct_size(enc, p, None, q, r))
            .sum()
    };

    if slice_size(precincts, enc.max_quantization, 0) > budget_bytes {
        return Err(EncodeErrors::RateControlFailed { slice_idx });
    }

    let mut q = enc.max_quantization;
    while q > 0 && slice_size(precincts, q - 1, 0) <= budget_bytes {
        q -= 1;
    }

    let mut lo = 0u8;
    let mut hi = bands_num;
    while lo < hi {
        let mid = ((u32::from(lo) + u32::from(hi) + 1) / 2) as u8;
        if slice_size(precincts, q, mid) <= budget_bytes {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }

    let mut used_total = 0;
    let count = precincts.len();
    for (i, precinct) in precincts.iter_mut().enumerate() {
        let used = precinct_size(enc, precinct, None, q, lo);
        // every leftover byte becomes padding on the last precinct
        let budget = if i + 1 == count {
            budget_bytes - used_total
        } else {
            used
        };
        commit_precinct(enc, precinct, None, q, lo, budget);
        used_total += used;
    }

    debug_assert_eq!(
        precincts.iter().map(|p| p.pack_total_bytes).sum::<u32>(),
        budget_bytes
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::pi::BandInfo;
    use crate::rc::gtli_for_band;

    fn band(gain: u8, priority: u8) -> BandInfo {
        BandInfo {
            gain,
            priority,
            ..BandInfo::default()
        }
    }

    #[test]
    fn gtli_tracks_gain_and_refinement() {
        let b = band(2, 4);
        assert_eq!(gtli_for_band(&b, 10, 0), 8);
        // rank below the refinement count buys one plane
        assert_eq!(gtli_for_band(&b, 10, 5), 7);
        assert_eq!(gtli_for_band(&b, 10, 4), 8);
        // clamps at zero and the truncation maximum
        assert_eq!(gtli_for_band(&b, 1, 0), 0);
        assert_eq!(gtli_for_band(&b, 40, 0), 15);
    }

    #[test]
    fn full_refinement_equals_next_quantization() {
        // refining every band is exactly one quantization step
        for gain in 0..4u8 {
            for priority in 0..8u8 {
                let b = band(gain, priority);
                assert_eq!(gtli_for_band(&b, 9, 8), gtli_for_band(&b, 8, 0));
            }
        }
    }
}
