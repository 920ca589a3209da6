/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Core types shared by the `jxs` family of JPEG XS crates.
//!
//! This crate carries the pieces every other crate in the family agrees
//! on and nothing else:
//!
//! - [`ColourFormat`](colour_format::ColourFormat): input chroma layouts
//!   and their sampling factors
//! - [`EncoderOptions`](options::EncoderOptions): the full encoder
//!   configuration surface
//! - frame and buffer types handed across the encoder boundary
//!
//! The crate is dependency free; the `serde` feature adds
//! `Serialize`/`Deserialize` derives to the configuration types.
pub mod colour_format;
pub mod image;
pub mod options;
