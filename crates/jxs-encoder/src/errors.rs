/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

#![allow(clippy::uninlined_format_args)]

use core::fmt::{Debug, Formatter};

/// Errors that may arise during encoding
#[derive(Copy, Clone, Eq, PartialEq)]
pub enum EncodeErrors {
    /// Invalid configuration or buffer geometry, with the offending
    /// parameter named
    BadParameter(&'static str),
    /// The caller requested an API version newer than this library
    InvalidApiVersion,
    /// An allocation or thread spawn failed during init
    InsufficientResources(&'static str),
    /// The output buffer cannot hold the codestream
    BitstreamTooShort {
        needed: usize,
        have:   usize
    },
    /// No (quantization, refinement) pair fits the byte budget
    RateControlFailed {
        slice_idx: u32
    },
    /// Non-blocking send or receive found no capacity or no item
    EmptyQueue,
    /// Internal queues were shut down; delivered to parked workers
    FifoShutdown,
    /// At least one slice of the frame carried an error
    EncodeFrameError,
    /// The packer produced a different byte count than the rate
    /// controller budgeted
    PackerAccounting {
        expected: u32,
        found:    u32
    },
    /// Generic error
    Generic(&'static str)
}

impl Debug for EncodeErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            EncodeErrors::BadParameter(param) => {
                writeln!(f, "Bad parameter: {param}")
            }
            EncodeErrors::InvalidApiVersion => {
                writeln!(f, "Requested API version is newer than the library")
            }
            EncodeErrors::InsufficientResources(what) => {
                writeln!(f, "Could not allocate {what}")
            }
            EncodeErrors::BitstreamTooShort { needed, have } => {
                writeln!(f, "Bitstream buffer of {have} bytes cannot hold {needed} bytes")
            }
            EncodeErrors::RateControlFailed { slice_idx } => {
                writeln!(f, "No feasible quantization for slice {slice_idx}")
            }
            EncodeErrors::EmptyQueue => {
                writeln!(f, "Queue empty or full, try again later")
            }
            EncodeErrors::FifoShutdown => {
                writeln!(f, "Encoder queues were shut down")
            }
            EncodeErrors::EncodeFrameError => {
                writeln!(f, "Frame finished with at least one errored slice")
            }
            EncodeErrors::PackerAccounting { expected, found } => {
                writeln!(f, "Packer wrote {found} bytes, rate control budgeted {expected}")
            }
            EncodeErrors::Generic(msg) => {
                writeln!(f, "{}", msg)
            }
        }
    }
}
