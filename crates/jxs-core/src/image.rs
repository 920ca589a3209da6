/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Frame and buffer types crossing the encoder boundary

use std::any::Any;
use std::fmt::{Debug, Formatter};

/// One picture worth of input planes.
///
/// Each plane is a byte buffer; samples wider than 8 bits are stored as
/// two native endian bytes per sample. Strides are counted in samples,
/// not bytes, and may exceed the plane width. Packed formats carry one
/// interleaved plane whose tight stride is `3 * width` samples.
#[derive(Clone, Debug, Default)]
pub struct ImageBuffer {
    pub planes:  Vec<Vec<u8>>,
    pub strides: Vec<usize>
}

impl ImageBuffer {
    pub fn new(planes: Vec<Vec<u8>>, strides: Vec<usize>) -> ImageBuffer {
        ImageBuffer { planes, strides }
    }
}

/// Output buffer for one frame's codestream.
///
/// The caller allocates `data` at least `bytes_per_frame` long; the
/// encoder owns the buffer from `send_picture` until the frame's last
/// packet hands it back with `used_size` set.
#[derive(Clone, Debug, Default)]
pub struct BitstreamBuffer {
    pub data:      Vec<u8>,
    pub used_size: usize
}

impl BitstreamBuffer {
    /// Allocate a zeroed buffer of the given byte size.
    pub fn with_size(size: usize) -> BitstreamBuffer {
        BitstreamBuffer {
            data:      vec![0; size],
            used_size: 0
        }
    }
}

/// Everything travelling with one frame through the encoder: the input
/// image, the codestream buffer and an opaque caller context.
#[derive(Default)]
pub struct XsFrame {
    pub image:     ImageBuffer,
    pub bitstream: BitstreamBuffer,
    /// Returned untouched with the frame's last packet.
    pub user_context: Option<Box<dyn Any + Send>>
}

impl XsFrame {
    pub fn new(image: ImageBuffer, bitstream: BitstreamBuffer) -> XsFrame {
        XsFrame {
            image,
            bitstream,
            user_context: None
        }
    }
}

impl Debug for XsFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XsFrame")
            .field("image", &self.image)
            .field("bitstream", &self.bitstream)
            .field("user_context", &self.user_context.is_some())
            .finish()
    }
}

/// Geometry of one input plane as the encoder expects it.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PlaneConfig {
    pub width:     u32,
    pub height:    u32,
    /// Minimum byte size of the plane buffer at the tight stride
    pub byte_size: usize
}

/// Input layout derived from an [`EncoderOptions`](crate::options::EncoderOptions)
/// without constructing an encoder.
#[derive(Clone, Debug, Default)]
pub struct ImageConfig {
    pub width:      u32,
    pub height:     u32,
    pub bit_depth:  u8,
    pub planes_num: usize,
    pub planes:     Vec<PlaneConfig>
}
