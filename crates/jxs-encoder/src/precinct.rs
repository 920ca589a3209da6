/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Per-precinct working state of a slice worker.
//!
//! A [`PrecinctEnc`] owns thread-local buffers for one precinct's
//! coefficients, gcli values and significance maxima, plus the per-band
//! rate-control caches. Workers allocate a small fixed set of these and
//! rotate them while walking a slice; the previous precinct doubles as
//! the vertical prediction reference.

use crate::gcli;
use crate::pi::{EncoderLayout, PictureInfo, PrecinctKind};

/// Cached rate-control results kept per band, keyed by gtli
pub const RC_BAND_CACHE_SIZE: usize = 2;

/// How a band's gcli stream is coded inside a packet.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GcliMethod {
    /// Four raw bits per gcli
    Raw,
    /// Unary deltas against gtli
    #[default]
    NoPred,
    /// Unary deltas with zero super-groups elided
    NoPredSig,
    /// Unary residuals against the top precinct
    Vpred,
    /// Vertical prediction with significance runs
    VpredSig
}

impl GcliMethod {
    pub const fn uses_significance(self) -> bool {
        matches!(self, GcliMethod::NoPredSig | GcliMethod::VpredSig)
    }

    pub const fn uses_top(self) -> bool {
        matches!(self, GcliMethod::Vpred | GcliMethod::VpredSig)
    }
}

/// Bit cost of one band line at one gtli, split by stream.
#[derive(Copy, Clone, Debug, Default)]
pub struct LineSizes {
    pub data_bits: u32,
    /// Exact sign count, one per surviving coefficient
    pub sign_bits: u32,
    /// Upper bound used by the fast sign strategy, one bit per
    /// coefficient of every significant group
    pub sign_upper_bits: u32,
    pub gcli_raw_bits: u32,
    pub gcli_nopred_bits: u32,
    pub gcli_nopred_sig_bits: u32,
    pub gcli_vpred_bits: u32,
    pub gcli_vpred_sig_bits: u32
}

/// Byte budget of one band packet after method selection.
#[derive(Copy, Clone, Debug, Default)]
pub struct BandRate {
    pub method:     GcliMethod,
    pub sig_bytes:  u32,
    pub gcli_bytes: u32,
    pub data_bytes: u32,
    pub sign_bytes: u32,
    /// Everything above plus the packet header
    pub total_bytes: u32
}

#[derive(Clone, Debug, Default)]
pub struct BandCacheSlot {
    pub valid: bool,
    pub gtli: u8,
    /// Whether the vpred columns of `lines` were filled
    pub has_vpred: bool,
    pub lines: Vec<LineSizes>,
    pub rate: BandRate
}

#[derive(Clone, Debug, Default)]
pub struct BandEncState {
    /// Committed truncation level for the current precinct
    pub gtli: u8,
    /// Committed packet budget for the current precinct
    pub rate: BandRate,
    pub cache: [BandCacheSlot; RC_BAND_CACHE_SIZE],
    pub cache_next: usize
}

pub struct PrecinctEnc {
    pub prec_idx: u32,
    pub kind: PrecinctKind,
    /// Per component coefficient block in band layout order
    pub coeff: Vec<Vec<u16>>,
    /// Per component gcli block
    pub gcli: Vec<Vec<u8>>,
    /// Per component super-group maxima, empty when significance
    /// coding is disabled
    pub sig: Vec<Vec<u8>>,
    pub bands: Vec<Vec<BandEncState>>,

    pub pack_quantization: u8,
    pub pack_refinement: u8,
    pub pack_total_bytes: u32,
    pub pack_padding_bytes: u32,
    /// Sign bytes the packer handed back under the fast strategy
    pub pack_signs_retrieve_bytes: u32,
    /// Drop retrieved sign bytes instead of padding them
    pub pack_signs_cut: bool
}

impl PrecinctEnc {
    pub fn new(pi: &PictureInfo, layout: &EncoderLayout, significance: bool) -> PrecinctEnc {
        let mut coeff = Vec::with_capacity(pi.comps_num);
        let mut gcli = Vec::with_capacity(pi.comps_num);
        let mut sig = Vec::with_capacity(pi.comps_num);
        let mut bands = Vec::with_capacity(pi.comps_num);

        for c in 0..pi.comps_num {
            let comp = &pi.components[c];
            let cl = &layout.components[c];
            coeff.push(vec![0u16; cl.precinct_coeffs as usize]);
            gcli.push(vec![0u8; cl.precinct_gclis as usize]);
            sig.push(if significance {
                vec![0u8; cl.precinct_sigs as usize]
            } else {
                vec![]
            });
            bands.push(
                comp.bands
                    .iter()
                    .map(|band| {
                        let lines = band.lines_per_precinct as usize;
                        let slot = BandCacheSlot {
                            lines: vec![LineSizes::default(); lines],
                            ..BandCacheSlot::default()
                        };
                        BandEncState {
                            cache: [slot.clone(), slot],
                            ..BandEncState::default()
                        }
                    })
                    .collect()
            );
        }

        PrecinctEnc {
            prec_idx: 0,
            kind: PrecinctKind::Normal,
            coeff,
            gcli,
            sig,
            bands,
            pack_quantization: 0,
            pack_refinement: 0,
            pack_total_bytes: 0,
            pack_padding_bytes: 0,
            pack_signs_retrieve_bytes: 0,
            pack_signs_cut: false
        }
    }

    /// Rebind this scratch precinct to a new precinct row.
    pub fn init(&mut self, pi: &PictureInfo, prec_idx: u32) {
        self.prec_idx = prec_idx;
        self.kind = pi.precinct_kind(prec_idx);
        self.pack_quantization = 0;
        self.pack_refinement = 0;
        self.pack_total_bytes = 0;
        self.pack_padding_bytes = 0;
        self.pack_signs_retrieve_bytes = 0;
        self.pack_signs_cut = false;
        for comp in self.bands.iter_mut() {
            for band in comp.iter_mut() {
                band.gtli = 0;
                band.rate = BandRate::default();
                for slot in band.cache.iter_mut() {
                    slot.valid = false;
                }
                band.cache_next = 0;
            }
        }
    }

    /// Copy this precinct's coefficients out of the slice tile.
    pub fn load_coeffs(
        &mut self, layout: &EncoderLayout, slice_coeffs: &[Vec<u16>], prec_in_slice: u32
    ) {
        for (c, dst) in self.coeff.iter_mut().enumerate() {
            let stride = layout.components[c].precinct_coeffs as usize;
            let start = prec_in_slice as usize * stride;
            dst.copy_from_slice(&slice_coeffs[c][start..start + stride]);
        }
    }

    /// Build the gcli lines and, when enabled, the significance maxima.
    pub fn build_gcli(&mut self, pi: &PictureInfo) {
        for c in 0..pi.comps_num {
            let comp = &pi.components[c];
            let mut coeff_off = 0usize;
            let mut gcli_off = 0usize;
            let mut sig_off = 0usize;
            for band in comp.bands.iter() {
                for _line in 0..band.lines(self.kind) {
                    let coeffs =
                        &self.coeff[c][coeff_off..coeff_off + band.width as usize];
                    let gclis =
                        &mut self.gcli[c][gcli_off..gcli_off + band.gcli_width as usize];
                    gcli::build_gcli_line(coeffs, gclis);
                    if !self.sig[c].is_empty() {
                        let sig = &mut self.sig[c]
                            [sig_off..sig_off + band.significance_width as usize];
                        gcli::build_significance_line(gclis, sig);
                    }
                    coeff_off += band.width as usize;
                    gcli_off += band.gcli_width as usize;
                    sig_off += band.significance_width as usize;
                }
                // skip the slots of lines absent from a short precinct
                let missing = band.lines_per_precinct - band.lines(self.kind);
                coeff_off += (band.width * missing) as usize;
                gcli_off += (band.gcli_width * missing) as usize;
                sig_off += (band.significance_width * missing) as usize;
            }
        }
    }

}
