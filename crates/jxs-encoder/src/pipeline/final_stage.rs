/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Final stage: collects out-of-order slice results, assembles each
//! frame's codestream and releases frames in submission order through
//! a reorder ring indexed by `frame_number % ring_size`.

use std::sync::Arc;

use jxs_core::image::XsFrame;
use jxs_core::options::PacketizationMode;
use log::warn;

use crate::encoder::EncodedPacket;
use crate::pcs::FrameOut;
use crate::pipeline::PipelineShared;

struct RingSlot {
    pcs_idx:      u32,
    frame_number: u64,
    out:          FrameOut,
    slice_done:   Vec<bool>,
    slices_done:  u32,
    frame_error:  bool,
    /// Next slice to hand out in per-slice packetization mode
    released_idx: u32
}

fn emit_packet(shared: &PipelineShared, packet: EncodedPacket) -> Result<(), ()> {
    let idx = shared.output_queue.get_empty().map_err(|_| ())?;
    *shared.output_queue.obj(idx).lock().unwrap() = Some(packet);
    shared.output_queue.post_full(idx);
    Ok(())
}

/// Reclaim the input image for the caller; at this point no worker
/// holds a reference any more.
fn unwrap_image(image: Arc<jxs_core::image::ImageBuffer>) -> jxs_core::image::ImageBuffer {
    Arc::try_unwrap(image).unwrap_or_else(|arc| {
        warn!("input image still shared at frame release");
        (*arc).clone()
    })
}

pub fn final_stage_kernel(shared: &PipelineShared) {
    let enc = &shared.common;
    let ring_size = shared.ring_size as usize;
    let mut ring: Vec<Option<RingSlot>> = (0..ring_size).map(|_| None).collect();
    let mut next_frame: u64 = 0;
    let per_slice = enc.packetization == PacketizationMode::PerSlice;

    loop {
        let po_idx = match shared.pack_output.get_full() {
            Ok(idx) => idx,
            Err(_) => return
        };
        let (pcs_idx, frame_number, slice_idx, slice_error, data) = {
            let mut po = shared.pack_output.obj(po_idx).lock().unwrap();
            (
                po.pcs_idx,
                po.frame_number,
                po.slice_idx,
                po.error,
                core::mem::take(&mut po.data)
            )
        };

        let slot_idx = (frame_number % ring_size as u64) as usize;
        if ring[slot_idx].is_none() {
            let pcs = shared.pcs_pool.obj(pcs_idx);
            let Some(out) = pcs.out.lock().unwrap().take() else {
                shared.pack_output.release(po_idx);
                continue;
            };
            ring[slot_idx] = Some(RingSlot {
                pcs_idx,
                frame_number,
                out,
                slice_done: vec![false; enc.pi.slice_num as usize],
                slices_done: 0,
                frame_error: false,
                released_idx: 0
            });
        }

        {
            let slot = ring[slot_idx].as_mut().unwrap();
            debug_assert_eq!(slot.frame_number, frame_number);

            let begin = enc.slice_offsets[slice_idx as usize] as usize;
            let size = enc.slice_sizes[slice_idx as usize] as usize;
            slot.out.bitstream.data[begin..begin + size].copy_from_slice(&data[..size]);

            slot.slice_done[slice_idx as usize] = true;
            slot.slices_done += 1;
            slot.frame_error |= slice_error.is_some();
        }

        // hand the window buffer back to the pool object
        shared.pack_output.obj(po_idx).lock().unwrap().data = data;
        shared.pack_output.release(po_idx);

        // release everything contiguous in submission order
        loop {
            let slot_idx = (next_frame % ring_size as u64) as usize;
            let Some(slot) = ring[slot_idx].as_mut() else {
                break;
            };

            if per_slice {
                while slot.released_idx < enc.pi.slice_num
                    && slot.slice_done[slot.released_idx as usize]
                {
                    if slot.released_idx == 0 {
                        // the header segment travels as its own packet
                        let hdr_len = enc.frame_header.len();
                        let packet = EncodedPacket {
                            frame_number: slot.frame_number,
                            span: 0..hdr_len,
                            data: slot.out.bitstream.data[..hdr_len].to_vec(),
                            last_packet_in_frame: false,
                            frame_error: slot.frame_error,
                            frame: None
                        };
                        if emit_packet(shared, packet).is_err() {
                            return;
                        }
                    }
                    if slot.released_idx + 1 == enc.pi.slice_num {
                        // the last slice leaves with the whole frame below
                        break;
                    }
                    let begin = enc.slice_offsets[slot.released_idx as usize] as usize;
                    let size = enc.slice_sizes[slot.released_idx as usize] as usize;
                    let packet = EncodedPacket {
                        frame_number: slot.frame_number,
                        span: begin..begin + size,
                        data: slot.out.bitstream.data[begin..begin + size].to_vec(),
                        last_packet_in_frame: false,
                        frame_error: slot.frame_error,
                        frame: None
                    };
                    if emit_packet(shared, packet).is_err() {
                        return;
                    }
                    slot.released_idx += 1;
                }
            }

            if slot.slices_done < enc.pi.slice_num {
                break;
            }

            // frame complete: build the terminal packet and free the slot
            let slot = ring[slot_idx].take().unwrap();
            let pcs = shared.pcs_pool.obj(slot.pcs_idx);
            pcs.image.lock().unwrap().take();

            let FrameOut {
                image,
                bitstream,
                user_context
            } = slot.out;
            let frame = XsFrame {
                image: unwrap_image(image),
                bitstream,
                user_context
            };

            let packet = if per_slice {
                let last = enc.pi.slice_num - 1;
                let begin = enc.slice_offsets[last as usize] as usize;
                let size = enc.slice_sizes[last as usize] as usize;
                EncodedPacket {
                    frame_number: slot.frame_number,
                    span: begin..begin + size,
                    data: frame.bitstream.data[begin..begin + size].to_vec(),
                    last_packet_in_frame: true,
                    frame_error: slot.frame_error,
                    frame: Some(frame)
                }
            } else {
                EncodedPacket {
                    frame_number: slot.frame_number,
                    span: 0..enc.hdr.lcod as usize,
                    data: vec![],
                    last_packet_in_frame: true,
                    frame_error: slot.frame_error,
                    frame: Some(frame)
                }
            };

            if emit_packet(shared, packet).is_err() {
                return;
            }
            shared.pcs_pool.release(slot.pcs_idx);
            shared.ring_free.release();
            next_frame += 1;
        }
    }
}
