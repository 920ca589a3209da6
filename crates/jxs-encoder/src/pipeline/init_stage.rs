/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Init stage: single threaded frame intake.
//!
//! Pulls one submitted frame per loop, binds it to a picture control
//! set, writes the pre-rendered frame header into the output buffer
//! and fans out one pack task per slice (plus one wavelet task per
//! component in the CPU profile). Blocks on the reorder ring's
//! free-slot counter for backpressure.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use jxs_core::image::{ImageBuffer, XsFrame};
use jxs_core::options::CpuProfile;
use log::warn;

use crate::headers::{CODESTREAM_TAIL_BYTES, SLICE_HEADER_BYTES};
use crate::pcs::FrameOut;
use crate::pipeline::PipelineShared;

/// Warn when a high bit depth input carries values above its declared
/// range. Debug builds only, the frame moves on regardless.
fn validate_input_range(shared: &PipelineShared, image: &ImageBuffer, frame_number: u64) {
    let enc = &shared.common;
    if !cfg!(debug_assertions) || enc.bit_depth <= 8 || enc.colour_format.is_packed() {
        return;
    }
    let mask = !((1u16 << enc.bit_depth) - 1);
    for (c, comp) in enc.pi.components.iter().enumerate() {
        let plane = &image.planes[c];
        let stride = image.strides[c];
        for y in 0..comp.height as usize {
            for x in 0..comp.width as usize {
                let at = (y * stride + x) * 2;
                let v = u16::from_ne_bytes([plane[at], plane[at + 1]]);
                if v & mask != 0 {
                    warn!(
                        "frame {frame_number}: sample out of {} bit range, component {c} at {x}x{y}",
                        enc.bit_depth
                    );
                    return;
                }
            }
        }
    }
}

pub fn init_stage_kernel(shared: &PipelineShared) {
    let enc = &shared.common;

    loop {
        let in_idx = match shared.input_queue.get_full() {
            Ok(idx) => idx,
            Err(_) => return
        };
        let (frame, frame_number) = {
            let mut item = shared.input_queue.obj(in_idx).lock().unwrap();
            (item.frame.take(), item.frame_number)
        };
        let Some(frame) = frame else {
            shared.input_queue.release(in_idx);
            continue;
        };

        let pcs_idx = match shared.pcs_pool.get_empty() {
            Ok(idx) => idx,
            Err(_) => return
        };
        let pcs = shared.pcs_pool.obj(pcs_idx);

        let XsFrame {
            image,
            mut bitstream,
            user_context
        } = frame;

        validate_input_range(shared, &image, frame_number);

        // the header segment is identical for every frame
        bitstream.data[..enc.frame_header.len()].copy_from_slice(&enc.frame_header);
        bitstream.used_size = enc.hdr.lcod as usize;

        let image = Arc::new(image);
        pcs.frame_number.store(frame_number, Ordering::Release);
        *pcs.image.lock().unwrap() = Some(image.clone());
        *pcs.out.lock().unwrap() = Some(FrameOut {
            image,
            bitstream,
            user_context
        });

        // wait for a reorder ring slot before fanning out
        if shared.ring_free.acquire().is_err() {
            return;
        }

        if enc.cpu_profile == CpuProfile::Cpu {
            for sync in &pcs.slice_sync {
                sync.reset();
            }
        }

        for slice_idx in 0..enc.pi.slice_num {
            let t_idx = match shared.pack_input.get_empty() {
                Ok(idx) => idx,
                Err(_) => return
            };
            {
                let mut task = shared.pack_input.obj(t_idx).lock().unwrap();
                let size = enc.slice_sizes[slice_idx as usize];
                let last = slice_idx + 1 == enc.pi.slice_num;
                let tail = if last { CODESTREAM_TAIL_BYTES } else { 0 };

                task.pcs_idx = pcs_idx;
                task.frame_number = frame_number;
                task.slice_idx = slice_idx;
                task.slice_budget_bytes = size - SLICE_HEADER_BYTES - tail;
                task.out_bytes_begin = enc.slice_offsets[slice_idx as usize];
                task.out_bytes_end = enc.slice_offsets[slice_idx as usize] + size - tail;
                task.write_tail = last;
            }
            shared.pack_input.post_full(t_idx);
        }

        if let Some(dwt_input) = &shared.dwt_input {
            for (c, comp) in enc.pi.components.iter().enumerate() {
                // components without vertical decomposition run inside
                // the slice workers
                if comp.decom_v == 0 {
                    continue;
                }
                let t_idx = match dwt_input.get_empty() {
                    Ok(idx) => idx,
                    Err(_) => return
                };
                {
                    let mut task = dwt_input.obj(t_idx).lock().unwrap();
                    task.pcs_idx = pcs_idx;
                    task.frame_number = frame_number;
                    task.component_id = c;
                }
                dwt_input.post_full(t_idx);
            }
        }

        shared.input_queue.release(in_idx);
    }
}
