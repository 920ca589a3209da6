/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Wavelet stage (CPU profile): one task transforms one component of
//! one frame, posting each slice's latch as its rows complete.

use std::sync::MutexGuard;

use crate::dwt::{dwt_component, DwtScratch, PrecinctSink};
use crate::encoder::EncCommon;
use crate::pcs::Pcs;
use crate::pipeline::PipelineShared;

/// Sink for a whole-frame component run: writes into the per-slice
/// tiles of the picture control set and posts each slice latch once
/// its last precinct is done.
struct FrameSink<'a> {
    enc:     &'a EncCommon,
    pcs:     &'a Pcs,
    comp_id: usize,
    stride:  usize,
    current: Option<(u32, MutexGuard<'a, Vec<u16>>)>,
    /// The frame's last slice; posted by the kernel once the image
    /// reference is gone
    pending_last: Option<u32>
}

impl<'a> FrameSink<'a> {
    fn new(enc: &'a EncCommon, pcs: &'a Pcs, comp_id: usize) -> FrameSink<'a> {
        FrameSink {
            enc,
            pcs,
            comp_id,
            stride: enc.layout.components[comp_id].precinct_coeffs as usize,
            current: None,
            pending_last: None
        }
    }
}

impl PrecinctSink for FrameSink<'_> {
    fn precinct_buf(&mut self, prec_idx: u32) -> Option<&mut [u16]> {
        let slice = prec_idx / self.enc.pi.precincts_per_slice;
        if self.current.as_ref().map(|(s, _)| *s) != Some(slice) {
            self.current = None;
            let guard = self.pcs.slice_sync[slice as usize].tiles[self.comp_id]
                .lock()
                .unwrap();
            self.current = Some((slice, guard));
        }
        let first = slice * self.enc.pi.precincts_per_slice;
        let offset = (prec_idx - first) as usize * self.stride;
        let (_, guard) = self.current.as_mut().unwrap();
        Some(&mut guard[offset..offset + self.stride])
    }

    fn precinct_done(&mut self, prec_idx: u32) {
        let last_of_slice = (prec_idx + 1) % self.enc.pi.precincts_per_slice == 0
            || prec_idx + 1 == self.enc.pi.precincts_line_num;
        if last_of_slice {
            let slice = prec_idx / self.enc.pi.precincts_per_slice;
            // unlock the tile before waking the slice worker
            self.current = None;
            if prec_idx + 1 == self.enc.pi.precincts_line_num {
                self.pending_last = Some(slice);
            } else {
                self.pcs.slice_sync[slice as usize].post_component(self.comp_id);
            }
        }
    }
}

pub fn dwt_stage_kernel(shared: &PipelineShared) {
    let enc = &shared.common;
    let dwt_input = shared
        .dwt_input
        .as_ref()
        .expect("wavelet stage running without its queue");
    let mut scratch = DwtScratch::new(&enc.pi);

    loop {
        let idx = match dwt_input.get_full() {
            Ok(idx) => idx,
            Err(_) => return
        };
        let params = dwt_input.obj(idx).lock().unwrap().clone();
        dwt_input.release(idx);

        let pcs = shared.pcs_pool.obj(params.pcs_idx);
        let Some(image) = pcs.image.lock().unwrap().clone() else {
            continue;
        };

        let comp_id = params.component_id;
        let mut sink = FrameSink::new(enc, pcs, comp_id);
        dwt_component(
            &image,
            enc.colour_format,
            enc.bit_depth,
            comp_id,
            &enc.pi.components[comp_id],
            &enc.layout.components[comp_id],
            0..enc.pi.precincts_line_num,
            &mut scratch,
            &mut sink
        );

        // drop the image reference before waking the last slice, so a
        // completing frame can reclaim it immediately
        let pending_last = sink.pending_last.take();
        drop(sink);
        drop(image);
        if let Some(slice) = pending_last {
            pcs.slice_sync[slice as usize].post_component(comp_id);
        }
    }
}
