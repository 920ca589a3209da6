/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Per-frame control state and the item types travelling between
//! pipeline stages.
//!
//! A [`Pcs`] is drawn from a fixed pool at the init stage and released
//! by the final stage once the frame's last slice left the encoder.
//! Its fields are phase-disjoint: init fills them, slice workers read
//! the image, the final stage drains the output half. The per-slice
//! [`SliceSync`] latches carry the CPU profile's wavelet coefficients
//! from the transform workers to the slice workers.

use std::any::Any;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Condvar, Mutex};

use jxs_core::image::{BitstreamBuffer, ImageBuffer};
use jxs_core::options::CpuProfile;

use crate::encoder::EncCommon;
use crate::errors::EncodeErrors;
use crate::pi::MAX_COMPONENTS;

/// Count-down latch for one slice: every wavelet worker posts its
/// component, slice workers wait for the full set. The latch also owns
/// the per-component coefficient tiles for the slice.
pub struct SliceSync {
    state: Mutex<SyncState>,
    cond:  Condvar,
    /// Per component coefficient tile, empty for components the slice
    /// worker transforms itself
    pub tiles: Vec<Mutex<Vec<u16>>>
}

struct SyncState {
    done: [bool; MAX_COMPONENTS],
    quit: bool
}

impl SliceSync {
    fn new(tile_sizes: &[usize]) -> SliceSync {
        SliceSync {
            state: Mutex::new(SyncState {
                done: [false; MAX_COMPONENTS],
                quit: false
            }),
            cond:  Condvar::new(),
            tiles: tile_sizes.iter().map(|&s| Mutex::new(vec![0u16; s])).collect()
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.done = [false; MAX_COMPONENTS];
    }

    /// Mark one component's coefficients as complete, waking waiters.
    pub fn post_component(&self, comp_id: usize) {
        let mut state = self.state.lock().unwrap();
        state.done[comp_id] = true;
        drop(state);
        self.cond.notify_all();
    }

    /// Park until every component in `needed` has posted.
    pub fn wait_components(&self, needed: &[bool; MAX_COMPONENTS]) -> Result<(), EncodeErrors> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.quit {
                return Err(EncodeErrors::FifoShutdown);
            }
            if needed
                .iter()
                .zip(state.done.iter())
                .all(|(&need, &done)| !need || done)
            {
                return Ok(());
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.quit = true;
        drop(state);
        self.cond.notify_all();
    }
}

/// Everything the final stage returns to the caller with the frame's
/// last packet.
pub struct FrameOut {
    pub image:        Arc<ImageBuffer>,
    pub bitstream:    BitstreamBuffer,
    pub user_context: Option<Box<dyn Any + Send>>
}

/// Picture control set: the per-frame state shared across stages.
pub struct Pcs {
    pub frame_number: AtomicU64,
    /// Read-only input planes, cloned out by every worker
    pub image: Mutex<Option<Arc<ImageBuffer>>>,
    /// Output half, drained by the final stage on first contact
    pub out: Mutex<Option<FrameOut>>,
    /// One latch per slice; empty outside the CPU profile
    pub slice_sync: Vec<SliceSync>
}

impl Pcs {
    pub fn new(enc: &EncCommon) -> Pcs {
        let slice_sync = if enc.cpu_profile == CpuProfile::Cpu {
            let tile_sizes: Vec<usize> = (0..MAX_COMPONENTS)
                .map(|c| {
                    if c < enc.pi.comps_num && enc.pi.components[c].decom_v > 0 {
                        (enc.layout.components[c].precinct_coeffs * enc.pi.precincts_per_slice)
                            as usize
                    } else {
                        0
                    }
                })
                .collect();
            (0..enc.pi.slice_num).map(|_| SliceSync::new(&tile_sizes)).collect()
        } else {
            Vec::new()
        };

        Pcs {
            frame_number: AtomicU64::new(0),
            image: Mutex::new(None),
            out: Mutex::new(None),
            slice_sync
        }
    }
}

/// Input queue item: one submitted frame.
#[derive(Default)]
pub struct InputItem {
    pub frame: Option<jxs_core::image::XsFrame>,
    pub frame_number: u64
}

/// One slice-pack task.
#[derive(Clone, Default)]
pub struct PackParams {
    pub pcs_idx: u32,
    pub frame_number: u64,
    pub slice_idx: u32,
    pub slice_budget_bytes: u32,
    /// This slice's window inside the frame codestream
    pub out_bytes_begin: u32,
    pub out_bytes_end: u32,
    /// Append the EOC marker after the slice
    pub write_tail: bool
}

/// One per-component wavelet task (CPU profile).
#[derive(Clone, Default)]
pub struct DwtParams {
    pub pcs_idx: u32,
    pub frame_number: u64,
    pub component_id: usize
}

/// Completed slice handed to the final stage; `data` carries the
/// packed window and is recycled with the pool object.
#[derive(Default)]
pub struct PackOut {
    pub pcs_idx: u32,
    pub frame_number: u64,
    pub slice_idx: u32,
    pub error: Option<EncodeErrors>,
    pub data: Vec<u8>
}
