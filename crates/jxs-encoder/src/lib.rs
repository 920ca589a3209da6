/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! jxs-encoder
//!
//! A multi-threaded JPEG XS encoder core in pure rust.
//!
//! The encoder turns raw frames into ISO/IEC 21122-1 codestreams at an
//! exact bits-per-pixel budget: every frame compresses to
//! `ceil(width * height * bpp / 8)` bytes, byte for byte, with rate
//! control choosing a quantization and refinement per precinct or per
//! slice and padding the remainder.
//!
//! It supports the following features
//!
//! - 8 to 14 bit input, planar yuv 4:0:0/4:2:0/4:2:2/4:4:4 and packed
//!   RGB
//! - up to 5 horizontal and 2 vertical wavelet decomposition levels
//! - four constant-bitrate modes (per precinct, per precinct with
//!   padding migration, per slice, per slice with a spread cap)
//! - significance coding, vertical prediction and three sign handling
//!   strategies
//! - low latency and CPU-balanced threading profiles
//! - full-frame or per-slice output packetization
//!
//! Frames move through a bounded pipeline: submission never allocates,
//! output arrives in submission order and `send_picture`/`get_packet`
//! can run from different threads than the encoder's own workers.
//!
//! The library is fully safe; it talks to the outside world through
//! the types of the `jxs-core` crate.
//!
//! # Example
//! See [`XsEncoder`] for an end to end round trip.
#![forbid(unsafe_code)]
pub use encoder::{
    image_config, load_default_parameters, EncodedPacket, SendError, XsEncoder,
    API_VERSION_MAJOR, API_VERSION_MINOR
};
pub use errors::EncodeErrors;

mod bitstream;
mod dwt;
mod encoder;
mod errors;
mod fifo;
mod gcli;
mod headers;
mod pack;
mod pcs;
mod pi;
mod pipeline;
mod precinct;
mod quant;
mod rc;
mod vpred;
