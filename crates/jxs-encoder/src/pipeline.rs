/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Pipeline stages and the shared resources connecting them.
//!
//! Frames enter the init stage in submission order, fan out into
//! per-slice pack tasks (and per-component wavelet tasks in the CPU
//! profile) and regroup at the final stage, which restores submission
//! order through a reorder ring.

use std::sync::Mutex;

use crate::encoder::{EncCommon, EncodedPacket};
use crate::fifo::{CondCounter, SystemResource};
use crate::pcs::{DwtParams, InputItem, PackOut, PackParams, Pcs};

pub mod dwt_stage;
pub mod final_stage;
pub mod init_stage;
pub mod pack_stage;

/// Every queue and pool of one encoder instance. Thread kernels hold
/// this behind an `Arc` and exit when any of it shuts down.
pub struct PipelineShared {
    pub common: EncCommon,

    pub pcs_pool:     SystemResource<Pcs>,
    pub input_queue:  SystemResource<Mutex<InputItem>>,
    pub output_queue: SystemResource<Mutex<Option<EncodedPacket>>>,
    pub pack_input:   SystemResource<Mutex<PackParams>>,
    pub pack_output:  SystemResource<Mutex<PackOut>>,
    /// CPU profile only
    pub dwt_input: Option<SystemResource<Mutex<DwtParams>>>,

    /// Free slots of the final stage's reorder ring
    pub ring_free: CondCounter,
    pub ring_size: u32
}

impl PipelineShared {
    /// Shut down every wait point so parked workers drain out.
    pub fn shutdown(&self) {
        self.input_queue.shutdown();
        if let Some(dwt) = &self.dwt_input {
            dwt.shutdown();
        }
        self.pack_input.shutdown();
        self.pack_output.shutdown();
        self.output_queue.shutdown();
        self.pcs_pool.shutdown();
        self.ring_free.shutdown();
        for i in 0..self.pcs_pool.len() as u32 {
            for sync in &self.pcs_pool.obj(i).slice_sync {
                sync.shutdown();
            }
        }
    }
}
