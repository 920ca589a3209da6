/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Picture information: per-component band geometry, precinct and slice
//! layout, and the weight table ordering.
//!
//! Everything here is derived once from the configuration and shared
//! read-only across every frame.

use jxs_core::colour_format::ColourFormat;

use crate::errors::EncodeErrors;

/// Coefficients per gcli group
pub const GROUP_SIZE: usize = 4;
/// Gcli values per significance super-group
pub const SIGNIFICANCE_GROUP_SIZE: usize = 8;
pub const MAX_COMPONENTS: usize = 4;
/// Highest usable truncation bitplane; coefficients are stored as
/// sign + 15 magnitude bits
pub const TRUNCATION_MAX: u8 = 15;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PrecinctKind {
    Normal,
    Last
}

/// Geometry of one frequency band of one component.
#[derive(Clone, Debug, Default)]
pub struct BandInfo {
    /// Samples per line
    pub width: u32,
    /// Total lines in the frame
    pub height: u32,
    /// `ceil(width / GROUP_SIZE)`
    pub gcli_width: u32,
    /// `ceil(gcli_width / SIGNIFICANCE_GROUP_SIZE)`
    pub significance_width: u32,
    /// Lines this band contributes to a full precinct
    pub lines_per_precinct: u32,
    /// Lines this band contributes to the last precinct of the frame
    pub lines_last_precinct: u32,
    /// Decomposition level the band was produced at
    pub level: u8,
    /// Quantization gain from the weight table
    pub gain: u8,
    /// Global refinement rank, 0 is refined first
    pub priority: u8
}

impl BandInfo {
    pub fn lines(&self, kind: PrecinctKind) -> u32 {
        match kind {
            PrecinctKind::Normal => self.lines_per_precinct,
            PrecinctKind::Last => self.lines_last_precinct
        }
    }
}

#[derive(Clone, Debug)]
pub struct ComponentInfo {
    pub width:  u32,
    pub height: u32,
    /// Horizontal sampling factor, 1 or 2
    pub sx: u8,
    /// Vertical sampling factor, 1 or 2
    pub sy: u8,
    pub decom_h: u8,
    pub decom_v: u8,
    /// Input rows consumed per precinct row
    pub precinct_height: u32,
    pub bands: Vec<BandInfo>
}

/// Position of a band in the global priority ordering.
#[derive(Copy, Clone, Debug)]
pub struct GlobalBand {
    pub comp: usize,
    pub band: usize
}

#[derive(Clone, Debug)]
pub struct PictureInfo {
    pub width:  u32,
    pub height: u32,
    pub comps_num: usize,
    pub components: Vec<ComponentInfo>,
    pub decom_h: u8,
    pub decom_v: u8,
    pub slice_height: u32,
    pub precincts_per_slice: u32,
    /// Precinct rows in the whole frame
    pub precincts_line_num: u32,
    pub slice_num: u32,
    pub bands_num_all: u32,
    /// All bands ordered by descending priority; drives the weight
    /// table and the packet emission order
    pub global_bands: Vec<GlobalBand>,
    pub use_short_header: bool
}

/// Vertical split: `rows -> (high, low)` line counts.
const fn split_rows(rows: u32) -> (u32, u32) {
    (rows / 2, rows - rows / 2)
}

/// Line counts of every band for a block of `rows` input lines:
/// vertical high-pass levels deepest first, then the low-pass path.
fn band_lines_for_rows(rows: u32, decom_v: u8) -> (Vec<u32>, u32) {
    let mut low = rows;
    let mut highs = vec![0u32; usize::from(decom_v)];
    for l in 0..usize::from(decom_v) {
        let (high, new_low) = split_rows(low);
        highs[l] = high;
        low = new_low;
    }
    (highs, low)
}

fn compute_bands(width: u32, height: u32, decom_h: u8, decom_v: u8) -> Vec<BandInfo> {
    let dh = usize::from(decom_h);
    let dv = usize::from(decom_v);
    let mut bands = Vec::with_capacity(1 + dh + 2 * dv);

    // horizontal cascade widths on the low-pass path
    let mut low_w = vec![0u32; dh + 1];
    let mut high_w = vec![0u32; dh + 1];
    low_w[0] = width;
    for k in 1..=dh {
        high_w[k] = low_w[k - 1] / 2;
        low_w[k] = low_w[k - 1] - high_w[k];
    }

    let precinct_rows = 1u32 << decom_v;
    let last_rows = {
        let rem = height % precinct_rows;
        if rem == 0 {
            precinct_rows
        } else {
            rem
        }
    };

    let (frame_highs, frame_low) = band_lines_for_rows(height, decom_v);
    let (normal_highs, normal_low) = band_lines_for_rows(precinct_rows, decom_v);
    let (last_highs, last_low) = band_lines_for_rows(last_rows, decom_v);

    let mut push = |width: u32, height: u32, normal: u32, last: u32, level: u8| {
        bands.push(BandInfo {
            width,
            height,
            gcli_width: width.div_ceil(GROUP_SIZE as u32),
            significance_width: width
                .div_ceil(GROUP_SIZE as u32)
                .div_ceil(SIGNIFICANCE_GROUP_SIZE as u32),
            lines_per_precinct: normal,
            lines_last_precinct: last,
            level,
            gain: 0,
            priority: 0
        });
    };

    // band 0: LL, then the horizontal-only high bands deepest first
    push(low_w[dh], frame_low, normal_low, last_low, decom_h);
    for k in (1..=dh).rev() {
        push(high_w[k], frame_low, normal_low, last_low, k as u8);
    }

    // vertical levels deepest first; each high-pass row is split
    // horizontally once into a low and a high half
    let v_low_w = width - width / 2;
    let v_high_w = width / 2;
    for l in (1..=dv).rev() {
        push(v_low_w, frame_highs[l - 1], normal_highs[l - 1], last_highs[l - 1], l as u8);
        push(
            v_high_w,
            frame_highs[l - 1],
            normal_highs[l - 1],
            last_highs[l - 1],
            (l as u8).saturating_sub(1)
        );
    }

    bands
}

impl PictureInfo {
    /// Derive the full frame geometry.
    ///
    /// `slice_height` must already be clamped to the frame height and a
    /// multiple of `2^decom_v`; the configuration layer validates that.
    pub fn compute(
        width: u32, height: u32, colour_format: ColourFormat, decom_h: u8, decom_v: u8,
        slice_height: u32
    ) -> Result<PictureInfo, EncodeErrors> {
        let comps_num = colour_format.num_components();
        let (sx, sy) = colour_format.sampling_factors();

        let mut components = Vec::with_capacity(comps_num);
        for c in 0..comps_num {
            let comp_w = width >> (sx[c] - 1);
            let comp_h = height >> (sy[c] - 1);
            // subsampled components run one fewer decomposition in the
            // subsampled direction
            let comp_dh = decom_h - (sx[c] - 1);
            let comp_dv = decom_v - (sy[c] - 1);

            let bands = compute_bands(comp_w, comp_h, comp_dh, comp_dv);
            if bands.iter().any(|b| b.width == 0 || b.height == 0) {
                return Err(EncodeErrors::BadParameter(
                    "input plane too small for the decomposition depth"
                ));
            }

            components.push(ComponentInfo {
                width: comp_w,
                height: comp_h,
                sx: sx[c],
                sy: sy[c],
                decom_h: comp_dh,
                decom_v: comp_dv,
                precinct_height: 1 << comp_dv,
                bands
            });
        }

        let precincts_line_num = height.div_ceil(1 << decom_v);
        let precincts_per_slice = slice_height >> decom_v;
        if precincts_per_slice == 0 {
            return Err(EncodeErrors::BadParameter("slice_height below one precinct"));
        }
        let slice_num = precincts_line_num.div_ceil(precincts_per_slice);

        let mut pi = PictureInfo {
            width,
            height,
            comps_num,
            components,
            decom_h,
            decom_v,
            slice_height,
            precincts_per_slice,
            precincts_line_num,
            slice_num,
            bands_num_all: 0,
            global_bands: vec![],
            use_short_header: (width as usize * comps_num) < 32768 && decom_v < 3
        };
        pi.assign_weights();
        Ok(pi)
    }

    /// Compute per-band gains and the global priority ordering.
    ///
    /// Gain equals the decomposition level so deeper, lower-frequency
    /// bands are truncated last. Priority is the unique rank in the
    /// ordering (gain descending, luma before chroma, low band ids
    /// first) and doubles as the refinement order.
    fn assign_weights(&mut self) {
        for comp in self.components.iter_mut() {
            for band in comp.bands.iter_mut() {
                band.gain = band.level;
            }
        }

        let mut order: Vec<GlobalBand> = (0..self.comps_num)
            .flat_map(|c| {
                (0..self.components[c].bands.len()).map(move |b| GlobalBand { comp: c, band: b })
            })
            .collect();

        order.sort_by(|a, b| {
            let ga = self.components[a.comp].bands[a.band].gain;
            let gb = self.components[b.comp].bands[b.band].gain;
            gb.cmp(&ga)
                .then(a.comp.cmp(&b.comp))
                .then(a.band.cmp(&b.band))
        });

        for (rank, gb) in order.iter().enumerate() {
            self.components[gb.comp].bands[gb.band].priority = rank as u8;
        }

        self.bands_num_all = order.len() as u32;
        self.global_bands = order;
    }

    pub fn precinct_kind(&self, prec_idx: u32) -> PrecinctKind {
        if prec_idx + 1 >= self.precincts_line_num {
            PrecinctKind::Last
        } else {
            PrecinctKind::Normal
        }
    }

    /// Precinct rows covered by a slice; the last slice may be short.
    pub fn precincts_in_slice(&self, slice_idx: u32) -> u32 {
        let first = self.precincts_per_slice * slice_idx;
        (self.precincts_line_num - first).min(self.precincts_per_slice)
    }
}

/// Buffer layout of one component inside a precinct: band line data is
/// stored contiguously per band, bands in index order.
#[derive(Clone, Debug, Default)]
pub struct ComponentLayout {
    /// Coefficient offset of each band inside the precinct block
    pub band_offsets: Vec<u32>,
    /// Coefficients per full precinct
    pub precinct_coeffs: u32,
    /// Gcli offset of each band inside the precinct block
    pub gcli_offsets: Vec<u32>,
    pub precinct_gclis: u32,
    /// Significance offset of each band inside the precinct block
    pub sig_offsets: Vec<u32>,
    pub precinct_sigs: u32
}

impl ComponentLayout {
    pub fn coeff_range(&self, band: usize, info: &BandInfo, line: u32) -> core::ops::Range<usize> {
        let start = (self.band_offsets[band] + line * info.width) as usize;
        start..start + info.width as usize
    }

    pub fn gcli_range(&self, band: usize, info: &BandInfo, line: u32) -> core::ops::Range<usize> {
        let start = (self.gcli_offsets[band] + line * info.gcli_width) as usize;
        start..start + info.gcli_width as usize
    }

    pub fn sig_range(&self, band: usize, info: &BandInfo, line: u32) -> core::ops::Range<usize> {
        let start = (self.sig_offsets[band] + line * info.significance_width) as usize;
        start..start + info.significance_width as usize
    }
}

/// Precomputed buffer layouts for every component.
#[derive(Clone, Debug, Default)]
pub struct EncoderLayout {
    pub components: Vec<ComponentLayout>
}

impl EncoderLayout {
    pub fn new(pi: &PictureInfo) -> EncoderLayout {
        let mut components = Vec::with_capacity(pi.comps_num);
        for comp in &pi.components {
            let mut layout = ComponentLayout::default();
            let (mut coeffs, mut gclis, mut sigs) = (0u32, 0u32, 0u32);
            for band in &comp.bands {
                layout.band_offsets.push(coeffs);
                layout.gcli_offsets.push(gclis);
                layout.sig_offsets.push(sigs);
                coeffs += band.width * band.lines_per_precinct;
                gclis += band.gcli_width * band.lines_per_precinct;
                sigs += band.significance_width * band.lines_per_precinct;
            }
            layout.precinct_coeffs = coeffs;
            layout.precinct_gclis = gclis;
            layout.precinct_sigs = sigs;
            components.push(layout);
        }
        EncoderLayout { components }
    }
}

#[cfg(test)]
mod tests {
    use jxs_core::colour_format::ColourFormat;

    use crate::pi::{PictureInfo, PrecinctKind};

    #[test]
    fn band_count_matches_decomposition() {
        let pi =
            PictureInfo::compute(64, 64, ColourFormat::PlanarYuv444OrRgb, 5, 2, 16).unwrap();
        for comp in &pi.components {
            assert_eq!(comp.bands.len(), 1 + 5 + 2 * 2);
        }
        assert_eq!(pi.bands_num_all, 3 * 10);
    }

    #[test]
    fn coefficient_count_is_preserved_per_precinct() {
        // a full precinct must carry exactly width * 2^decom_v samples
        let pi =
            PictureInfo::compute(60, 32, ColourFormat::PlanarYuv400, 3, 2, 16).unwrap();
        let comp = &pi.components[0];
        let total: u32 = comp
            .bands
            .iter()
            .map(|b| b.width * b.lines_per_precinct)
            .sum();
        assert_eq!(total, comp.width * comp.precinct_height);
    }

    #[test]
    fn yuv420_chroma_alignment() {
        let pi = PictureInfo::compute(32, 32, ColourFormat::PlanarYuv420, 3, 2, 16).unwrap();
        assert_eq!(pi.precincts_line_num, 8);
        // chroma runs one fewer vertical level and stays row aligned
        for comp in &pi.components[1..] {
            assert_eq!(comp.decom_v, 1);
            assert_eq!(comp.height.div_ceil(comp.precinct_height), pi.precincts_line_num);
        }
    }

    #[test]
    fn last_precinct_has_partial_lines() {
        // 18 rows at decom_v 1 -> 9 precinct rows, single slice
        let pi = PictureInfo::compute(16, 18, ColourFormat::PlanarYuv400, 2, 1, 18).unwrap();
        assert_eq!(pi.precincts_line_num, 9);
        assert_eq!(pi.precinct_kind(8), PrecinctKind::Last);
        assert_eq!(pi.precinct_kind(7), PrecinctKind::Normal);
    }

    #[test]
    fn priorities_are_unique_ranks() {
        let pi = PictureInfo::compute(64, 48, ColourFormat::PlanarYuv422, 4, 2, 16).unwrap();
        let mut seen = vec![false; pi.bands_num_all as usize];
        for comp in &pi.components {
            for band in &comp.bands {
                assert!(!seen[usize::from(band.priority)]);
                seen[usize::from(band.priority)] = true;
            }
        }
        assert!(seen.iter().all(|s| *s));
    }
}
