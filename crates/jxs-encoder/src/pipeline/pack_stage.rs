/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Pack stage: per-slice workers running rate control, quantization
//! and packing (plus the wavelet transform itself outside the CPU
//! profile).
//!
//! Per-precinct rate control walks the slice with one or two rotating
//! precinct buffers; the slice-common modes materialise every precinct
//! of the slice first, search one shared solution, then re-run each
//! precinct against its final budget.

use std::sync::Arc;

use jxs_core::image::ImageBuffer;
use jxs_core::options::{CpuProfile, RateControlMode, SignHandling};

use crate::bitstream::BitstreamWriter;
use crate::dwt::{dwt_component, DwtScratch, TileSink};
use crate::encoder::EncCommon;
use crate::errors::EncodeErrors;
use crate::headers::{write_slice_header, write_tail};
use crate::pack::pack_precinct;
use crate::pcs::{PackParams, Pcs};
use crate::pi::MAX_COMPONENTS;
use crate::pipeline::PipelineShared;
use crate::precinct::PrecinctEnc;
use crate::quant::quantize_line;
use crate::rc;

/// Padding bonus of a slice's first precinct under the move-padding
/// modes, in percent of its share.
const MOVE_PADDING_FIRST_PREC_BONUS_PERCENT: u32 = 10;
const MOVE_PADDING_FIRST_PREC_BONUS_SIGN_FAST_PERCENT: u32 = 20;
/// Largest-to-smallest precinct spread allowed by the max-rate mode.
const MAX_PRECINCT_BUDGET_RATE: u32 = 4;

fn first_precinct_bonus_percent(enc: &EncCommon) -> u32 {
    if enc.signs_handling == SignHandling::Fast {
        MOVE_PADDING_FIRST_PREC_BONUS_SIGN_FAST_PERCENT
    } else {
        MOVE_PADDING_FIRST_PREC_BONUS_PERCENT
    }
}

fn quantize_precinct(enc: &EncCommon, precinct: &mut PrecinctEnc) {
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
                let coeffs = &mut coeff[c][cl.coeff_range(b, band, line)];
                let gclis = &gcli[c][cl.gcli_range(b, band, line)];
                quantize_line(coeffs, gclis, gtli, enc.quantization);
            }
        }
    }
}

/// Gather this slice's wavelet coefficients: wait on the latch and
/// copy the tiles (CPU profile) or transform the rows right here.
#[allow(clippy::too_many_arguments)]
fn prepare_slice_coeffs(
    enc: &EncCommon, pcs: &Pcs, image: &ImageBuffer, slice_idx: u32,
    slice_coeffs: &mut [Vec<u16>], scratch: &mut DwtScratch
) -> Result<(), EncodeErrors> {
    let first = slice_idx * enc.pi.precincts_per_slice;
    let count = enc.pi.precincts_in_slice(slice_idx);

    if enc.cpu_profile == CpuProfile::Cpu {
        let mut needed = [false; MAX_COMPONENTS];
        for (c, comp) in enc.pi.components.iter().enumerate() {
            needed[c] = comp.decom_v > 0;
        }
        pcs.slice_sync[slice_idx as usize].wait_components(&needed)?;
    }

    for (c, comp) in enc.pi.components.iter().enumerate() {
        let stride = enc.layout.components[c].precinct_coeffs as usize;
        if enc.cpu_profile == CpuProfile::Cpu && comp.decom_v > 0 {
            let tile = pcs.slice_sync[slice_idx as usize].tiles[c].lock().unwrap();
            let n = stride * count as usize;
            slice_coeffs[c][..n].copy_from_slice(&tile[..n]);
        } else {
            let mut sink = TileSink {
                tile: &mut slice_coeffs[c],
                first_prec: first,
                stride
            };
            dwt_component(
                image,
                enc.colour_format,
                enc.bit_depth,
                c,
                comp,
                &enc.layout.components[c],
                first..first + count,
                scratch,
                &mut sink
            );
        }
    }
    Ok(())
}

/// Borrow the rotating current precinct plus its optional top.
fn split_cur_top(
    precincts: &mut [PrecinctEnc], cur: usize, top: Option<usize>
) -> (&mut PrecinctEnc, Option<&PrecinctEnc>) {
    match top {
        None => (&mut precincts[cur], None),
        Some(top) => {
            debug_assert_ne!(cur, top);
            if cur < top {
                let (lo, hi) = precincts.split_at_mut(top);
                (&mut lo[cur], Some(&hi[0]))
            } else {
                let (lo, hi) = precincts.split_at_mut(cur);
                (&mut hi[0], Some(&lo[top]))
            }
        }
    }
}

/// One loop over the slice: init + transform + rate control + pack per
/// precinct, with optional padding migration.
#[allow(clippy::too_many_arguments)]
fn encode_slice_per_precinct(
    enc: &EncCommon, bs: &mut BitstreamWriter, params: &PackParams,
    slice_coeffs: &[Vec<u16>], precincts: &mut [PrecinctEnc], prec_first: u32, prec_num: u32
) -> Result<(), EncodeErrors> {
    let move_padding = enc.rate_control_mode == RateControlMode::PerPrecinctMovePadding;
    let fast_signs = enc.signs_handling == SignHandling::Fast;
    let budget = params.slice_budget_bytes;

    let mut min_budget = budget / prec_num;
    let mut left_budget = budget - min_budget * prec_num;
    let mut first_budget = min_budget;

    if move_padding {
        // seed the first precinct so it is not the worst of the slice
        let bonus = u64::from(first_budget) * u64::from(100 + first_precinct_bonus_percent(enc));
        first_budget = ((bonus / 100) as u32).min(budget);
        if prec_num > 1 {
            let after_first = budget - first_budget;
            min_budget = after_first / (prec_num - 1);
            left_budget = budget - min_budget * (prec_num - 1) - first_budget;
        } else {
            left_budget = 0;
        }
    }
    debug_assert_eq!(
        budget,
        first_budget + (prec_num - 1) * min_budget + left_budget
    );

    write_slice_header(bs, params.slice_idx);

    let vpred = enc.vpred_enabled();
    let mut carry = 0u32;

    for i in 0..prec_num {
        let mut prec_budget = if i == 0 { first_budget } else { min_budget };
        if i < left_budget {
            prec_budget += 1;
        }
        prec_budget += carry;
        carry = 0;

        let (cur_slot, top_slot) = if vpred {
            ((i % 2) as usize, (i > 0).then(|| ((i + 1) % 2) as usize))
        } else {
            (0, None)
        };
        let (cur, top) = split_cur_top(precincts, cur_slot, top_slot);

        cur.init(&enc.pi, prec_first + i);
        cur.load_coeffs(&enc.layout, slice_coeffs, i);
        cur.build_gcli(&enc.pi);

        rc::rate_control_precinct(enc, cur, top, prec_budget, params.slice_idx)?;

        if move_padding && i + 1 < prec_num {
            // unfilled bytes migrate into the next precinct's budget
            carry = cur.pack_padding_bytes;
            cur.pack_total_bytes -= cur.pack_padding_bytes;
            cur.pack_padding_bytes = 0;
            if fast_signs {
                cur.pack_signs_cut = true;
            }
        }

        quantize_precinct(enc, cur);
        pack_precinct(bs, enc, cur, top)?;

        if move_padding && fast_signs && i + 1 < prec_num {
            carry += cur.pack_signs_retrieve_bytes;
        }
    }
    Ok(())
}

/// Slice-common rate control: one (quantization, refinement) searched
/// over the whole slice, padding redistributed, then a per-precinct
/// re-run against the final budgets.
#[allow(clippy::too_many_arguments)]
fn encode_slice_common(
    enc: &EncCommon, bs: &mut BitstreamWriter, params: &PackParams,
    slice_coeffs: &[Vec<u16>], precincts: &mut [PrecinctEnc], prec_first: u32, prec_num: u32
) -> Result<(), EncodeErrors> {
    let budget = params.slice_budget_bytes;
    let n = prec_num as usize;

    for (i, precinct) in precincts[..n].iter_mut().enumerate() {
        precinct.init(&enc.pi, prec_first + i as u32);
        precinct.load_coeffs(&enc.layout, slice_coeffs, i as u32);
        precinct.build_gcli(&enc.pi);
    }

    rc::rate_control_slice(enc, &mut precincts[..n], budget, params.slice_idx)?;

    if enc.rate_control_mode == RateControlMode::PerSliceMaxRate {
        // clamp the spread between the largest and smallest precinct
        let max_size = precincts[..n]
            .iter()
            .map(|p| p.pack_total_bytes - p.pack_padding_bytes)
            .max()
            .unwrap_or(0);
        let min_size = max_size / MAX_PRECINCT_BUDGET_RATE;

        let mut budget_to_get = 0u32;
        for p in precincts[..n].iter_mut() {
            let data_size = p.pack_total_bytes - p.pack_padding_bytes;
            if data_size < min_size {
                let add = min_size - data_size;
                p.pack_total_bytes += add;
                budget_to_get += add;
            }
        }
        if budget_to_get > 0 {
            let last = &mut precincts[n - 1];
            if last.pack_padding_bytes >= budget_to_get {
                last.pack_padding_bytes -= budget_to_get;
                last.pack_total_bytes -= budget_to_get;
            } else {
                budget_to_get -= last.pack_padding_bytes;
                last.pack_total_bytes -= last.pack_padding_bytes;
                last.pack_padding_bytes = 0;
                while budget_to_get > 0 {
                    for p in precincts[..n].iter_mut() {
                        if budget_to_get == 0 {
                            break;
                        }
                        budget_to_get -= 1;
                        p.pack_total_bytes -= 1;
                    }
                }
            }
        }
        debug_assert_eq!(
            precincts[..n].iter().map(|p| p.pack_total_bytes).sum::<u32>(),
            budget
        );
    }

    // hand the last precinct's padding out: a bonus for the first
    // precinct, the rest spread evenly
    if precincts[n - 1].pack_padding_bytes > 0 {
        let bonus = ((u64::from(precincts[0].pack_total_bytes)
            * u64::from(first_precinct_bonus_percent(enc))
            / 100) as u32)
            .min(precincts[n - 1].pack_padding_bytes);
        precincts[n - 1].pack_padding_bytes -= bonus;
        precincts[n - 1].pack_total_bytes -= bonus;
        precincts[0].pack_total_bytes += bonus;

        if precincts[n - 1].pack_padding_bytes > 0 {
            let left = precincts[n - 1].pack_padding_bytes;
            precincts[n - 1].pack_total_bytes -= left;
            precincts[n - 1].pack_padding_bytes = 0;
            let per_prec = left / prec_num;
            let remainder = left - per_prec * prec_num;
            for (i, p) in precincts[..n].iter_mut().enumerate() {
                p.pack_total_bytes += per_prec;
                if (i as u32) < remainder {
                    p.pack_total_bytes += 1;
                }
            }
        }
    }
    debug_assert_eq!(
        precincts[..n].iter().map(|p| p.pack_total_bytes).sum::<u32>(),
        budget
    );

    write_slice_header(bs, params.slice_idx);

    let vpred = enc.vpred_enabled();
    let fast_signs = enc.signs_handling == SignHandling::Fast;
    let mut carry = 0u32;

    for i in 0..n {
        let top_slot = (vpred && i > 0).then(|| i - 1);
        let (cur, top) = split_cur_top(precincts, i, top_slot);

        rc::rate_control_precinct(
            enc,
            cur,
            top,
            cur.pack_total_bytes + carry,
            params.slice_idx
        )?;

        if i + 1 < n {
            carry = cur.pack_padding_bytes;
            cur.pack_total_bytes -= cur.pack_padding_bytes;
            cur.pack_padding_bytes = 0;
            if fast_signs {
                cur.pack_signs_cut = true;
            }
        } else {
            carry = 0;
        }

        quantize_precinct(enc, cur);
        pack_precinct(bs, enc, cur, top)?;

        if i + 1 < n && fast_signs {
            carry += cur.pack_signs_retrieve_bytes;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn encode_slice(
    enc: &EncCommon, params: &PackParams, pcs: &Pcs, image: &ImageBuffer, data: &mut Vec<u8>,
    slice_coeffs: &mut [Vec<u16>], precincts: &mut [PrecinctEnc], scratch: &mut DwtScratch
) -> Result<(), EncodeErrors> {
    let size = enc.slice_sizes[params.slice_idx as usize] as usize;
    data.clear();
    data.resize(size, 0);

    prepare_slice_coeffs(enc, pcs, image, params.slice_idx, slice_coeffs, scratch)?;

    let window_len = (params.out_bytes_end - params.out_bytes_begin) as usize;
    debug_assert!(window_len <= size);
    let (body, tail_buf) = data.split_at_mut(window_len);

    let prec_first = params.slice_idx * enc.pi.precincts_per_slice;
    let prec_num = enc.pi.precincts_in_slice(params.slice_idx);

    let mut bs = BitstreamWriter::new(body);
    match enc.rate_control_mode {
        RateControlMode::PerPrecinct | RateControlMode::PerPrecinctMovePadding => {
            encode_slice_per_precinct(
                enc,
                &mut bs,
                params,
                slice_coeffs,
                precincts,
                prec_first,
                prec_num
            )?;
        }
        RateControlMode::PerSliceCommonQuant | RateControlMode::PerSliceMaxRate => {
            encode_slice_common(
                enc,
                &mut bs,
                params,
                slice_coeffs,
                precincts,
                prec_first,
                prec_num
            )?;
        }
    }

    let used = bs.used_bytes();
    if used != window_len {
        log::error!(
            "slice {}: wrote {used} bytes into a {window_len} byte window",
            params.slice_idx
        );
        debug_assert_eq!(used, window_len);
        return Err(EncodeErrors::PackerAccounting {
            expected: window_len as u32,
            found: used as u32
        });
    }

    if params.write_tail {
        let mut bs = BitstreamWriter::new(tail_buf);
        write_tail(&mut bs);
    }
    Ok(())
}

pub fn pack_stage_kernel(shared: &PipelineShared) {
    let enc = &shared.common;
    let mut scratch = DwtScratch::new(&enc.pi);

    let mut slice_coeffs: Vec<Vec<u16>> = (0..enc.pi.comps_num)
        .map(|c| {
            vec![
                0u16;
                (enc.layout.components[c].precinct_coeffs * enc.pi.precincts_per_slice) as usize
            ]
        })
        .collect();

    let scratch_precincts = match enc.rate_control_mode {
        RateControlMode::PerPrecinct | RateControlMode::PerPrecinctMovePadding => {
            if enc.vpred_enabled() {
                // current plus its prediction source
                2
            } else {
                1
            }
        }
        _ => enc.pi.precincts_per_slice as usize
    };
    let mut precincts: Vec<PrecinctEnc> = (0..scratch_precincts)
        .map(|_| PrecinctEnc::new(&enc.pi, &enc.layout, enc.significance))
        .collect();

    loop {
        let t_idx = match shared.pack_input.get_full() {
            Ok(idx) => idx,
            Err(_) => return
        };
        let params = shared.pack_input.obj(t_idx).lock().unwrap().clone();

        let pcs = shared.pcs_pool.obj(params.pcs_idx);
        let image: Option<Arc<ImageBuffer>> = pcs.image.lock().unwrap().clone();
        let Some(image) = image else {
            shared.pack_input.release(t_idx);
            continue;
        };

        let out_idx = match shared.pack_output.get_empty() {
            Ok(idx) => idx,
            Err(_) => return
        };
        let mut data = core::mem::take(&mut shared.pack_output.obj(out_idx).lock().unwrap().data);

        let result = encode_slice(
            enc,
            &params,
            pcs,
            &image,
            &mut data,
            &mut slice_coeffs,
            &mut precincts,
            &mut scratch
        );
        if result == Err(EncodeErrors::FifoShutdown) {
            return;
        }

        // give the image reference back before the final stage can see
        // this slice as the frame's last
        drop(image);

        {
            let mut out = shared.pack_output.obj(out_idx).lock().unwrap();
            out.pcs_idx = params.pcs_idx;
            out.frame_number = params.frame_number;
            out.slice_idx = params.slice_idx;
            out.error = result.err();
            out.data = data;
        }
        shared.pack_output.post_full(out_idx);
        shared.pack_input.release(t_idx);
    }
}
