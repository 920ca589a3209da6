/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Encoder configuration
//!
//! All knobs the encoder understands live in one [`EncoderOptions`]
//! struct so a single value can be passed around, stored or serialized.
//!
//! To remove the annoyance of getters and setters all options are
//! declared public; builder style `set_*` methods are provided for
//! chaining.

use crate::colour_format::ColourFormat;

/// Quantization method signalled in the picture header (`Qpih`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum QuantType {
    /// Plain bitplane truncation
    Deadzone,
    /// Truncation with rounding towards the retained bitplanes
    Uniform
}

/// Threading layout of the pipeline.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CpuProfile {
    /// Wavelet transform runs inside each slice worker.
    ///
    /// Lowest latency from input row to output slice.
    LowLatency,
    /// Dedicated per-component wavelet workers feed the slice workers
    /// through per-slice barriers. Better core utilisation on wide
    /// machines.
    Cpu
}

/// Constant-bitrate budget distribution.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RateControlMode {
    /// Every precinct gets an equal share of the slice budget.
    PerPrecinct,
    /// Equal shares, but bytes a precinct leaves as padding migrate to
    /// the next precinct; the first precinct receives a bonus share.
    PerPrecinctMovePadding,
    /// One (quantization, refinement) pair for the whole slice.
    PerSliceCommonQuant,
    /// Like [`RateControlMode::PerSliceCommonQuant`] with an additional
    /// cap on the spread between the largest and smallest precinct.
    PerSliceMaxRate
}

/// How coefficient signs reach the codestream.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SignHandling {
    /// Signs interleaved with the coefficient data
    Off,
    /// Separate sign stream, conservatively budgeted, unused tail bytes
    /// retrieved into the next precinct's budget
    Fast,
    /// Separate sign stream, exactly accounted in every rate probe
    Full
}

/// Vertical prediction of bitplane counts from the precinct above.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VerticalPredictionMode {
    Disabled,
    /// Significance runs indicate zero prediction residuals
    ZeroResidual,
    /// Significance runs indicate zero coefficient groups
    ZeroCoefficients
}

/// Shape of the units handed out by `get_packet`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PacketizationMode {
    /// One packet per frame carrying the whole codestream
    FullFrame,
    /// One packet for the header segment, then one packet per slice
    PerSlice
}

/// Encoder configuration.
///
/// [`EncoderOptions::default`] matches the library defaults: five
/// horizontal and two vertical decomposition levels, sixteen line
/// slices, per-precinct rate control with padding migration,
/// significance coding on.
///
/// Width, height, bit depth, colour format and bpp have no meaningful
/// defaults and must always be set.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EncoderOptions {
    /// Width of the input in luma pixels, minimum 4
    pub width: u32,
    /// Height of the input in luma pixels
    pub height: u32,
    /// Bits per input sample, 8 to 14
    pub bit_depth: u8,
    /// Chroma layout of the input
    pub colour_format: ColourFormat,
    /// Target bits per pixel, numerator
    pub bpp_numerator: u32,
    /// Target bits per pixel, denominator
    pub bpp_denominator: u32,
    /// Vertical decomposition levels, 0 to 2
    pub decomp_v: u8,
    /// Horizontal decomposition levels, `decomp_v` to 5
    pub decomp_h: u8,
    /// Quantization method
    pub quantization: QuantType,
    /// Slice height in luma lines; must be a multiple of
    /// `2^decomp_v` and is clamped to the frame height
    pub slice_height: u32,
    /// Threading profile
    pub cpu_profile: CpuProfile,
    /// Worker thread budget, 0 selects the minimum layout
    pub threads_num: u32,
    /// Budget distribution mode
    pub rate_control_mode: RateControlMode,
    /// Sign stream strategy
    pub signs_handling: SignHandling,
    /// Significance (zero super-group) coding
    pub significance: bool,
    /// Vertical prediction of bitplane counts
    pub vertical_prediction: VerticalPredictionMode,
    /// Output packetization
    pub packetization: PacketizationMode
}

impl Default for EncoderOptions {
    fn default() -> EncoderOptions {
        EncoderOptions {
            width: 0,
            height: 0,
            bit_depth: 0,
            colour_format: ColourFormat::PlanarYuv444OrRgb,
            bpp_numerator: 0,
            bpp_denominator: 1,
            decomp_v: 2,
            decomp_h: 5,
            quantization: QuantType::Deadzone,
            slice_height: 16,
            cpu_profile: CpuProfile::LowLatency,
            threads_num: 0,
            rate_control_mode: RateControlMode::PerPrecinctMovePadding,
            signs_handling: SignHandling::Off,
            significance: true,
            vertical_prediction: VerticalPredictionMode::Disabled,
            packetization: PacketizationMode::FullFrame
        }
    }
}

impl EncoderOptions {
    /// Create options for a given geometry, leaving everything else at
    /// the defaults.
    pub fn new(
        width: u32, height: u32, bit_depth: u8, colour_format: ColourFormat
    ) -> EncoderOptions {
        EncoderOptions {
            width,
            height,
            bit_depth,
            colour_format,
            ..EncoderOptions::default()
        }
    }

    pub fn set_bpp(mut self, numerator: u32, denominator: u32) -> Self {
        self.bpp_numerator = numerator;
        self.bpp_denominator = denominator;
        self
    }

    pub fn set_decomposition(mut self, horizontal: u8, vertical: u8) -> Self {
        self.decomp_h = horizontal;
        self.decomp_v = vertical;
        self
    }

    pub fn set_quantization(mut self, quantization: QuantType) -> Self {
        self.quantization = quantization;
        self
    }

    pub fn set_slice_height(mut self, slice_height: u32) -> Self {
        self.slice_height = slice_height;
        self
    }

    pub fn set_cpu_profile(mut self, profile: CpuProfile) -> Self {
        self.cpu_profile = profile;
        self
    }

    pub fn set_num_threads(mut self, threads: u32) -> Self {
        self.threads_num = threads;
        self
    }

    pub fn set_rate_control_mode(mut self, mode: RateControlMode) -> Self {
        self.rate_control_mode = mode;
        self
    }

    pub fn set_signs_handling(mut self, mode: SignHandling) -> Self {
        self.signs_handling = mode;
        self
    }

    pub fn set_significance(mut self, enabled: bool) -> Self {
        self.significance = enabled;
        self
    }

    pub fn set_vertical_prediction(mut self, mode: VerticalPredictionMode) -> Self {
        self.vertical_prediction = mode;
        self
    }

    pub fn set_packetization(mut self, mode: PacketizationMode) -> Self {
        self.packetization = mode;
        self
    }

    /// Size of one input sample in bytes.
    ///
    /// Samples above 8 bits travel as two native endian bytes.
    pub const fn pixel_size(&self) -> usize {
        if self.bit_depth <= 8 {
            1
        } else {
            2
        }
    }
}
