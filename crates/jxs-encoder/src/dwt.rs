/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Wavelet decomposition: 5/3 lifting with up to two vertical and five
//! horizontal levels, driven precinct by precinct.
//!
//! Input rows pass the non-linear point transform into a 20-bit
//! integer domain (`BW` = 20, `FQ` = 8 fraction bits), the vertical
//! drivers keep a small ring of scaled rows and high-pass history, and
//! every finished precinct is handed to a [`PrecinctSink`]. Driving a
//! sub-range of precincts primes the lifting state one precinct early
//! from the real rows above, so slice-local runs produce exactly the
//! frame-global coefficients.

use core::ops::Range;

use jxs_core::colour_format::ColourFormat;
use jxs_core::image::ImageBuffer;

use crate::pi::{ComponentInfo, ComponentLayout, PictureInfo};

/// Wavelet domain depth in bits
pub const WAVELET_BW: u8 = 20;
/// Fraction bits dropped when storing 16-bit coefficients
pub const WAVELET_FQ: u8 = 8;

/// Receives finished precincts from a component driver.
pub trait PrecinctSink {
    /// Coefficient block of a precinct row, `None` when the caller is
    /// not interested in it (priming rows).
    fn precinct_buf(&mut self, prec_idx: u32) -> Option<&mut [u16]>;
    /// Called after the precinct's bands were fully written.
    fn precinct_done(&mut self, prec_idx: u32);
    /// Called once after the last precinct of the run.
    fn finish(&mut self) {}
}

/// Sink writing into a contiguous per-slice tile.
pub struct TileSink<'a> {
    pub tile:       &'a mut [u16],
    pub first_prec: u32,
    pub stride:     usize
}

impl PrecinctSink for TileSink<'_> {
    fn precinct_buf(&mut self, prec_idx: u32) -> Option<&mut [u16]> {
        let slot = prec_idx.checked_sub(self.first_prec)? as usize;
        let start = slot * self.stride;
        self.tile.get_mut(start..start + self.stride)
    }

    fn precinct_done(&mut self, _prec_idx: u32) {}
}

/// Whole-sample symmetric extension of an index into `0..n`.
#[inline]
fn reflect(idx: i64, n: u32) -> usize {
    if n <= 1 {
        return 0;
    }
    let period = i64::from(2 * (n - 1));
    let m = idx.rem_euclid(period);
    let m = if m < i64::from(n) {
        m
    } else {
        period - m
    };
    m as usize
}

/// Scale one input row into the wavelet domain, removing the DC
/// offset. Packed formats deinterleave on the fly.
pub fn scale_input_row(
    image: &ImageBuffer, colour_format: ColourFormat, bit_depth: u8, comp_id: usize,
    comp: &ComponentInfo, row: usize, dst: &mut [i32]
) {
    let shift = WAVELET_BW - bit_depth;
    let dc = 1i32 << (WAVELET_BW - 1);
    let width = comp.width as usize;

    let (plane_id, step, base_x) = if colour_format.is_packed() {
        (0, 3usize, comp_id)
    } else {
        (comp_id, 1usize, 0)
    };
    let plane = &image.planes[plane_id];
    let stride = image.strides[plane_id];

    if bit_depth <= 8 {
        let base = row * stride + base_x;
        for (x, out) in dst[..width].iter_mut().enumerate() {
            *out = (i32::from(plane[base + x * step]) << shift) - dc;
        }
    } else {
        let base = (row * stride + base_x) * 2;
        for (x, out) in dst[..width].iter_mut().enumerate() {
            let at = base + x * step * 2;
            let v = u16::from_ne_bytes([plane[at], plane[at + 1]]);
            *out = (i32::from(v) << shift) - dc;
        }
    }
}

/// One 5/3 horizontal split of `line[..n]`: low half first, high half
/// after it.
fn horizontal_split(line: &mut [i32], n: usize, tmp: &mut [i32]) {
    if n < 2 {
        return;
    }
    let hn = n / 2;
    let ln = n - hn;

    // predict: H[i] = x[2i+1] - ((x[2i] + x[2i+2]) >> 1)
    for i in 0..hn {
        let right = line[reflect(2 * i as i64 + 2, n as u32)];
        tmp[ln + i] = line[2 * i + 1] - ((line[2 * i] + right) >> 1);
    }
    // update: L[i] = x[2i] + ((H[i-1] + H[i] + 2) >> 2)
    for i in 0..ln {
        let h_prev = tmp[ln + i.saturating_sub(1).min(hn - 1)];
        let h_cur = tmp[ln + i.min(hn - 1)];
        tmp[i] = line[2 * i] + ((h_prev + h_cur + 2) >> 2);
    }
    line[..n].copy_from_slice(&tmp[..n]);
}

/// Repeated horizontal splits on the shrinking low-pass prefix.
fn horizontal_cascade(line: &mut [i32], width: usize, levels: u8, tmp: &mut [i32]) {
    let mut n = width;
    for _ in 0..levels {
        horizontal_split(line, n, tmp);
        n -= n / 2;
    }
}

#[inline]
fn to_sign_magnitude(v: i32) -> u16 {
    let mag = (v.unsigned_abs() >> WAVELET_FQ).min(0x7fff) as u16;
    if v < 0 && mag != 0 {
        mag | 0x8000
    } else {
        mag
    }
}

fn store_line(dst: &mut [u16], src: &[i32]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = to_sign_magnitude(s);
    }
}

/// Write the cascade output (bands `0..=decom_h`) as one line each.
fn emit_cascade_line(
    buf: &mut [u16], comp: &ComponentInfo, cl: &ComponentLayout, line: &[i32], line_idx: u32
) {
    let mut src_off = 0usize;
    for b in 0..=usize::from(comp.decom_h) {
        let band = &comp.bands[b];
        let w = band.width as usize;
        let range = cl.coeff_range(b, band, line_idx);
        store_line(&mut buf[range], &line[src_off..src_off + w]);
        src_off += w;
    }
}

/// Split a vertical high-pass row once and write the band pair.
fn emit_vertical_pair(
    buf: &mut [u16], comp: &ComponentInfo, cl: &ComponentLayout, band_low: usize, row: &mut [i32],
    line_idx: u32, tmp: &mut [i32]
) {
    let w = comp.width as usize;
    horizontal_split(row, w, tmp);

    let low = &comp.bands[band_low];
    let range = cl.coeff_range(band_low, low, line_idx);
    store_line(&mut buf[range], &row[..low.width as usize]);

    let high = &comp.bands[band_low + 1];
    let range = cl.coeff_range(band_low + 1, high, line_idx);
    store_line(&mut buf[range], &row[low.width as usize..w]);
}

/// Line buffers shared by every vertical driver, sized for the widest
/// component.
pub struct DwtScratch {
    r0:   Vec<i32>,
    r1:   Vec<i32>,
    r2:   Vec<i32>,
    hf_a: Vec<i32>,
    hf_b: Vec<i32>,
    lf:   Vec<i32>,
    lf1_ring: [Vec<i32>; 3],
    hf1_ring: [Vec<i32>; 3],
    hf2_prev: Vec<i32>,
    hf2_cur:  Vec<i32>,
    tmp:  Vec<i32>
}

impl DwtScratch {
    pub fn new(pi: &PictureInfo) -> DwtScratch {
        let w = pi.width as usize;
        let line = || vec![0i32; w];
        DwtScratch {
            r0: line(),
            r1: line(),
            r2: line(),
            hf_a: line(),
            hf_b: line(),
            lf: line(),
            lf1_ring: [line(), line(), line()],
            hf1_ring: [line(), line(), line()],
            hf2_prev: line(),
            hf2_cur: line(),
            tmp: line()
        }
    }
}

/// Run the wavelet transform of one component over a precinct range.
///
/// `emit` may be a sub-range of the component's precinct rows; the
/// driver primes its lifting state from the rows directly above the
/// range so the output matches a whole-frame run bit for bit.
#[allow(clippy::too_many_arguments)]
pub fn dwt_component(
    image: &ImageBuffer, colour_format: ColourFormat, bit_depth: u8, comp_id: usize,
    comp: &ComponentInfo, cl: &ComponentLayout, emit: Range<u32>,
    scratch: &mut DwtScratch, sink: &mut dyn PrecinctSink
) {
    match comp.decom_v {
        0 => dwt_component_v0(image, colour_format, bit_depth, comp_id, comp, cl, emit, scratch, sink),
        1 => dwt_component_v1(image, colour_format, bit_depth, comp_id, comp, cl, emit, scratch, sink),
        2 => dwt_component_v2(image, colour_format, bit_depth, comp_id, comp, cl, emit, scratch, sink),
        _ => unreachable!("decom_v outside 0..=2")
    }
    sink.finish();
}

#[allow(clippy::too_many_arguments)]
fn dwt_component_v0(
    image: &ImageBuffer, colour_format: ColourFormat, bit_depth: u8, comp_id: usize,
    comp: &ComponentInfo, cl: &ComponentLayout, emit: Range<u32>,
    scratch: &mut DwtScratch, sink: &mut dyn PrecinctSink
) {
    let w = comp.width as usize;
    for prec in emit {
        scale_input_row(
            image,
            colour_format,
            bit_depth,
            comp_id,
            comp,
            prec as usize,
            &mut scratch.r0
        );
        horizontal_cascade(&mut scratch.r0[..w], w, comp.decom_h, &mut scratch.tmp);
        if let Some(buf) = sink.precinct_buf(prec) {
            emit_cascade_line(buf, comp, cl, &scratch.r0[..w], 0);
            sink.precinct_done(prec);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn dwt_component_v1(
    image: &ImageBuffer, colour_format: ColourFormat, bit_depth: u8, comp_id: usize,
    comp: &ComponentInfo, cl: &ComponentLayout, emit: Range<u32>,
    scratch: &mut DwtScratch, sink: &mut dyn PrecinctSink
) {
    let w = comp.width as usize;
    let h = comp.height;
    let first = emit.start.saturating_sub(1);
    let band_pair = usize::from(comp.decom_h) + 1;

    let mut scale = |row: i64, dst: &mut Vec<i32>| {
        scale_input_row(
            image,
            colour_format,
            bit_depth,
            comp_id,
            comp,
            reflect(row, h),
            dst
        );
    };

    let r = 2 * i64::from(first);
    scale(r, &mut scratch.r0);
    scale(r + 1, &mut scratch.r1);
    scale(r + 2, &mut scratch.r2);

    let mut hf_prev_valid = false;
    for i in first..emit.end {
        // vertical predict
        for x in 0..w {
            scratch.hf_b[x] = scratch.r1[x] - ((scratch.r0[x] + scratch.r2[x]) >> 1);
        }

        if i >= emit.start {
            // vertical update; the first precinct mirrors its own
            // high-pass row
            for x in 0..w {
                let hp = if hf_prev_valid {
                    scratch.hf_a[x]
                } else {
                    scratch.hf_b[x]
                };
                scratch.lf[x] = scratch.r0[x] + ((hp + scratch.hf_b[x] + 2) >> 2);
            }

            if let Some(buf) = sink.precinct_buf(i) {
                horizontal_cascade(&mut scratch.lf[..w], w, comp.decom_h, &mut scratch.tmp);
                emit_cascade_line(buf, comp, cl, &scratch.lf[..w], 0);
                if 2 * i + 1 < h {
                    emit_vertical_pair(
                        buf,
                        comp,
                        cl,
                        band_pair,
                        &mut scratch.hf_b[..w],
                        0,
                        &mut scratch.tmp
                    );
                }
                sink.precinct_done(i);
            }
        }

        core::mem::swap(&mut scratch.hf_a, &mut scratch.hf_b);
        hf_prev_valid = true;

        // advance two rows
        core::mem::swap(&mut scratch.r0, &mut scratch.r2);
        let base = 2 * i64::from(i) + 2;
        scale(base + 1, &mut scratch.r1);
        scale(base + 2, &mut scratch.r2);
    }
}

#[allow(clippy::too_many_arguments)]
fn dwt_component_v2(
    image: &ImageBuffer, colour_format: ColourFormat, bit_depth: u8, comp_id: usize,
    comp: &ComponentInfo, cl: &ComponentLayout, emit: Range<u32>,
    scratch: &mut DwtScratch, sink: &mut dyn PrecinctSink
) {
    let w = comp.width as usize;
    let h = comp.height;
    let pairs = h.div_ceil(2);
    let first_prec = emit.start.saturating_sub(1);
    let j0 = 2 * first_prec;

    let mut scale = |row: i64, dst: &mut Vec<i32>| {
        scale_input_row(
            image,
            colour_format,
            bit_depth,
            comp_id,
            comp,
            reflect(row, h),
            dst
        );
    };

    // prime the level-1 high-pass history
    let mut hf1_prev_valid = false;
    if j0 > 0 {
        let r = 2 * i64::from(j0) - 2;
        scale(r, &mut scratch.r0);
        scale(r + 1, &mut scratch.r1);
        scale(r + 2, &mut scratch.r2);
        for x in 0..w {
            scratch.hf_a[x] = scratch.r1[x] - ((scratch.r0[x] + scratch.r2[x]) >> 1);
        }
        hf1_prev_valid = true;
    }

    let r = 2 * i64::from(j0);
    scale(r, &mut scratch.r0);
    scale(r + 1, &mut scratch.r1);
    scale(r + 2, &mut scratch.r2);

    let mut hf2_prev_valid = false;
    let mut next_emit = emit.start;

    let mut emit_precinct = |i: u32,
                             scratch: &mut DwtScratch,
                             sink: &mut dyn PrecinctSink,
                             hf2_prev_valid: &mut bool| {
        let pair_a = 2 * i as usize;
        let hf2_exists = (2 * i + 1) < pairs;

        {
            let lf1_a = &scratch.lf1_ring[pair_a % 3];
            let lf1_b = &scratch.lf1_ring[reflect(pair_a as i64 + 1, pairs) % 3];
            let lf1_c = &scratch.lf1_ring[reflect(pair_a as i64 + 2, pairs) % 3];
            if hf2_exists {
                for x in 0..w {
                    scratch.hf2_cur[x] = lf1_b[x] - ((lf1_a[x] + lf1_c[x]) >> 1);
                }
            }
        }

        {
            let lf1_a = &scratch.lf1_ring[pair_a % 3];
            for x in 0..w {
                let cur = if hf2_exists {
                    scratch.hf2_cur[x]
                } else {
                    scratch.hf2_prev[x]
                };
                let prev = if *hf2_prev_valid {
                    scratch.hf2_prev[x]
                } else {
                    cur
                };
                scratch.lf[x] = lf1_a[x] + ((prev + cur + 2) >> 2);
            }
        }

        if i >= emit.start && i < emit.end {
            if let Some(buf) = sink.precinct_buf(i) {
                let base = usize::from(comp.decom_h) + 1;
                horizontal_cascade(&mut scratch.lf[..w], w, comp.decom_h, &mut scratch.tmp);
                emit_cascade_line(buf, comp, cl, &scratch.lf[..w], 0);
                if hf2_exists {
                    let mut hf2 = core::mem::take(&mut scratch.hf2_cur);
                    emit_vertical_pair(buf, comp, cl, base, &mut hf2[..w], 0, &mut scratch.tmp);
                    scratch.hf2_cur = hf2;
                }
                for line in 0..2u32 {
                    let pair = pair_a + line as usize;
                    // a level-1 high-pass row exists for full pairs only
                    if pair < pairs as usize && (2 * pair + 1) < h as usize {
                        let mut hf1 = core::mem::take(&mut scratch.hf1_ring[pair % 3]);
                        emit_vertical_pair(
                            buf,
                            comp,
                            cl,
                            base + 2,
                            &mut hf1[..w],
                            line,
                            &mut scratch.tmp
                        );
                        scratch.hf1_ring[pair % 3] = hf1;
                    }
                }
                sink.precinct_done(i);
            }
        }

        if hf2_exists {
            core::mem::swap(&mut scratch.hf2_prev, &mut scratch.hf2_cur);
            *hf2_prev_valid = true;
        }
    };

    let pair_end = pairs.min(2 * emit.end + 1);
    for j in j0..pair_end {
        // level-1 predict and update for pair j
        for x in 0..w {
            scratch.hf_b[x] = scratch.r1[x] - ((scratch.r0[x] + scratch.r2[x]) >> 1);
        }
        {
            let lf1 = &mut scratch.lf1_ring[j as usize % 3];
            for x in 0..w {
                let hp = if hf1_prev_valid {
                    scratch.hf_a[x]
                } else {
                    scratch.hf_b[x]
                };
                lf1[x] = scratch.r0[x] + ((hp + scratch.hf_b[x] + 2) >> 2);
            }
        }
        scratch.hf1_ring[j as usize % 3].copy_from_slice(&scratch.hf_b);
        core::mem::swap(&mut scratch.hf_a, &mut scratch.hf_b);
        hf1_prev_valid = true;

        if j >= 2 && j % 2 == 0 {
            let i = (j - 2) / 2;
            emit_precinct(i, scratch, sink, &mut hf2_prev_valid);
            if i >= emit.start {
                next_emit = i + 1;
            }
        }

        core::mem::swap(&mut scratch.r0, &mut scratch.r2);
        let base = 2 * i64::from(j) + 2;
        scale(base + 1, &mut scratch.r1);
        scale(base + 2, &mut scratch.r2);
    }

    // flush precincts whose look-ahead pair runs past the image
    for i in next_emit..emit.end {
        emit_precinct(i, scratch, sink, &mut hf2_prev_valid);
    }
}
