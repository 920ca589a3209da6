/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Public encoder handle: configuration validation, pool and thread
//! setup, frame submission and packet retrieval.

use core::fmt::{Debug, Formatter};
use core::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use jxs_core::colour_format::ColourFormat;
use jxs_core::image::{ImageConfig, PlaneConfig, XsFrame};
use jxs_core::options::{
    CpuProfile, EncoderOptions, PacketizationMode, QuantType, RateControlMode, SignHandling,
    VerticalPredictionMode
};
use log::{trace, warn};

use crate::bitstream::BitstreamWriter;
use crate::errors::EncodeErrors;
use crate::fifo::{CondCounter, SystemResource};
use crate::headers::{write_frame_header, CODESTREAM_TAIL_BYTES, SLICE_HEADER_BYTES};
use crate::pcs::{DwtParams, InputItem, PackOut, PackParams, Pcs};
use crate::pi::{EncoderLayout, PictureInfo, TRUNCATION_MAX};
use crate::pipeline::{dwt_stage, final_stage, init_stage, pack_stage, PipelineShared};

pub const API_VERSION_MAJOR: u64 = 1;
pub const API_VERSION_MINOR: u64 = 0;

/// Frames the encoder keeps in flight; also the input queue depth.
const PCS_POOL_COUNT: u32 = 10;

fn check_api_version(major: u64, minor: u64) -> Result<(), EncodeErrors> {
    if major > API_VERSION_MAJOR || (major == API_VERSION_MAJOR && minor > API_VERSION_MINOR) {
        return Err(EncodeErrors::InvalidApiVersion);
    }
    Ok(())
}

/// Fill an [`EncoderOptions`] with the library defaults.
pub fn load_default_parameters(
    api_major: u64, api_minor: u64
) -> Result<EncoderOptions, EncodeErrors> {
    check_api_version(api_major, api_minor)?;
    Ok(EncoderOptions::default())
}

/// Fields of the picture header that depend on the configuration.
#[derive(Clone, Debug, Default)]
pub struct PictureHeaderDynamic {
    /// Wavelet domain depth, fixed at 20 bits
    pub bw: u8,
    /// Fraction bits dropped after the transform
    pub fq: u8,
    pub qpih: u8,
    /// Sign handling flag: signs travel separately
    pub fs: u8,
    /// Run mode: zero coefficients instead of zero residuals
    pub rm: u8,
    /// Packet-based raw mode switch
    pub rl: u8,
    /// Codestream length in bytes
    pub lcod: u32
}

/// Immutable per-encoder state shared by every stage.
pub struct EncCommon {
    pub pi:     PictureInfo,
    pub layout: EncoderLayout,

    pub bit_depth: u8,
    pub colour_format: ColourFormat,
    pub cpu_profile: CpuProfile,
    pub rate_control_mode: RateControlMode,
    pub significance: bool,
    pub vertical_prediction: VerticalPredictionMode,
    pub signs_handling: SignHandling,
    pub quantization: QuantType,
    pub packetization: PacketizationMode,

    pub hdr: PictureHeaderDynamic,
    /// Pre-rendered SOC..WGT segment, identical for every frame
    pub frame_header: Vec<u8>,
    /// Byte size of each slice, SLH included (EOC on the last)
    pub slice_sizes: Vec<u32>,
    /// Byte offset of each slice inside the codestream
    pub slice_offsets: Vec<u32>,
    /// Upper bound of the quantization search
    pub max_quantization: u8
}

impl EncCommon {
    pub fn vpred_enabled(&self) -> bool {
        self.vertical_prediction != VerticalPredictionMode::Disabled
    }

    pub fn vpred_zero_coefficients(&self) -> bool {
        self.vertical_prediction == VerticalPredictionMode::ZeroCoefficients
    }
}

/// One unit handed out by [`XsEncoder::get_packet`].
///
/// Full-frame packetization emits one packet per frame with the
/// resources attached and `data` empty. Per-slice packetization emits
/// the header segment first, then one packet per slice carrying its
/// payload bytes; the frame resources ride on the last slice.
pub struct EncodedPacket {
    pub frame_number: u64,
    /// Location of this packet's bytes inside the frame codestream
    pub span: Range<usize>,
    /// Payload copy, empty for full-frame packets
    pub data: Vec<u8>,
    pub last_packet_in_frame: bool,
    /// At least one slice of the frame failed; the codestream length
    /// is still exact, its contents are not
    pub frame_error: bool,
    /// Input image, codestream buffer and user context, returned with
    /// the frame's last packet
    pub frame: Option<XsFrame>
}

impl Debug for EncodedPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EncodedPacket")
            .field("frame_number", &self.frame_number)
            .field("span", &self.span)
            .field("data_len", &self.data.len())
            .field("last_packet_in_frame", &self.last_packet_in_frame)
            .field("frame_error", &self.frame_error)
            .field("frame", &self.frame.is_some())
            .finish()
    }
}

/// A rejected [`XsEncoder::send_picture`] call; the frame comes back
/// to the caller untouched.
pub struct SendError {
    pub frame: XsFrame,
    pub error: EncodeErrors
}

impl Debug for SendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        self.error.fmt(f)
    }
}

fn bytes_per_frame(options: &EncoderOptions) -> Result<u32, EncodeErrors> {
    if options.bpp_denominator == 0 {
        return Err(EncodeErrors::BadParameter("bpp_denominator cannot be 0"));
    }
    if options.bpp_numerator == 0 {
        return Err(EncodeErrors::BadParameter("bpp_numerator cannot be 0"));
    }
    let bits = u64::from(options.width) * u64::from(options.height)
        * u64::from(options.bpp_numerator)
        / u64::from(options.bpp_denominator);
    let bytes = (bits + 7) / 8;
    if bytes == 0 {
        return Err(EncodeErrors::BadParameter("bpp too small for this resolution"));
    }
    if bytes >= 1u64 << 32 {
        return Err(EncodeErrors::BadParameter("bpp too large for this resolution"));
    }
    Ok(bytes as u32)
}

/// Derive the input plane layout and the frame byte budget from a
/// configuration. Pure, allocates no encoder.
pub fn image_config(options: &EncoderOptions) -> Result<(ImageConfig, u32), EncodeErrors> {
    if options.bit_depth < 8 || options.bit_depth > 14 {
        return Err(EncodeErrors::BadParameter("bit_depth outside 8..=14"));
    }
    let pixel_size = options.pixel_size();
    let (sx, sy) = options.colour_format.sampling_factors();

    let mut config = ImageConfig {
        width: options.width,
        height: options.height,
        bit_depth: options.bit_depth,
        planes_num: options.colour_format.num_planes(),
        planes: vec![]
    };

    if options.colour_format.is_packed() {
        config.planes.push(PlaneConfig {
            width:     options.width,
            height:    options.height,
            byte_size: options.width as usize * options.height as usize * 3 * pixel_size
        });
    } else {
        for c in 0..options.colour_format.num_components() {
            let width = options.width >> (sx[c] - 1);
            let height = options.height >> (sy[c] - 1);
            config.planes.push(PlaneConfig {
                width,
                height,
                byte_size: width as usize * height as usize * pixel_size
            });
        }
    }

    let bytes = bytes_per_frame(options)?;
    Ok((config, bytes))
}

/// Split the codestream budget into per-slice byte sizes.
///
/// Every precinct row gets an equal share; the division remainder is
/// handed out one byte per slice from the top and the last slice
/// absorbs whatever is left, including the EOC marker.
fn compute_slice_sizes(pi: &PictureInfo, lcod: u32, header_len: u32) -> Vec<u32> {
    let slice_num = pi.slice_num;
    let tags = header_len + CODESTREAM_TAIL_BYTES + SLICE_HEADER_BYTES * slice_num;
    debug_assert!(lcod > tags);
    let size_all_precincts = lcod - tags;

    let precincts_last_slice =
        pi.precincts_per_slice - (slice_num * pi.precincts_per_slice - pi.precincts_line_num);
    let min_per_precinct = size_all_precincts / pi.precincts_line_num;
    let mut min_per_slice = min_per_precinct * pi.precincts_per_slice;
    let mut last_slice_size = min_per_precinct * precincts_last_slice;

    let mut size_left =
        size_all_precincts - last_slice_size - min_per_slice * (slice_num - 1);

    if slice_num > 1 {
        let add = u64::from(size_left) * u64::from(slice_num - 1)
            * u64::from(pi.precincts_per_slice)
            / u64::from(pi.precincts_line_num);
        min_per_slice += (add / u64::from(slice_num - 1)) as u32;
    }
    last_slice_size += (u64::from(size_left) * u64::from(precincts_last_slice)
        / u64::from(pi.precincts_line_num)) as u32;
    size_left = size_all_precincts - last_slice_size - min_per_slice * (slice_num - 1);
    debug_assert!(size_left <= slice_num);

    let mut sizes = vec![0u32; slice_num as usize];
    let mut bytes_left = lcod - header_len;
    for i in 0..slice_num {
        if i + 1 != slice_num {
            let mut size = min_per_slice;
            if i < size_left {
                size += 1;
            }
            size += SLICE_HEADER_BYTES;
            sizes[i as usize] = size;
            bytes_left -= size;
        } else {
            sizes[i as usize] = bytes_left;
        }
    }
    sizes
}

/// Validate a configuration and build the shared encoder state.
pub(crate) fn build_enc_common(options: &EncoderOptions) -> Result<EncCommon, EncodeErrors> {
    let mut options = options.clone();

    if options.bit_depth < 8 || options.bit_depth > 14 {
        return Err(EncodeErrors::BadParameter("bit_depth outside 8..=14"));
    }
    if options.width < 4 {
        return Err(EncodeErrors::BadParameter("minimum width is 4"));
    }
    if options.height == 0 {
        return Err(EncodeErrors::BadParameter("height cannot be 0"));
    }
    // the picture header carries 16 bit frame dimensions
    if options.width > 0xffff || options.height > 0xffff {
        return Err(EncodeErrors::BadParameter("frame dimensions above 65535"));
    }

    let is_420 = options.colour_format == ColourFormat::PlanarYuv420;
    let is_422 = options.colour_format == ColourFormat::PlanarYuv422;
    if (is_420 || is_422) && options.width % 2 != 0 {
        return Err(EncodeErrors::BadParameter("subsampled input requires an even width"));
    }
    if is_420 {
        if options.height % 2 != 0 {
            return Err(EncodeErrors::BadParameter("yuv420 requires an even height"));
        }
        if options.decomp_v == 0 {
            return Err(EncodeErrors::BadParameter(
                "yuv420 requires at least one vertical decomposition"
            ));
        }
    }

    if options.decomp_v > 2 {
        return Err(EncodeErrors::BadParameter("vertical decomposition outside 0..=2"));
    }
    if options.decomp_h > 5 {
        return Err(EncodeErrors::BadParameter("horizontal decomposition outside 0..=5"));
    }
    if options.decomp_h < options.decomp_v {
        return Err(EncodeErrors::BadParameter(
            "horizontal decomposition below the vertical decomposition"
        ));
    }
    if options.decomp_h == 0 && options.decomp_v == 0 {
        return Err(EncodeErrors::BadParameter("zero decomposition is not supported"));
    }

    if options.slice_height == 0 {
        return Err(EncodeErrors::BadParameter("slice_height cannot be 0"));
    }
    if options.slice_height >= options.height {
        options.slice_height = options.height;
    } else if options.slice_height % (1 << options.decomp_v) != 0 {
        return Err(EncodeErrors::BadParameter(
            "slice_height must be a multiple of 2^decomp_v"
        ));
    }

    if options.colour_format.is_packed() && options.cpu_profile == CpuProfile::Cpu {
        return Err(EncodeErrors::BadParameter(
            "packed input runs only in the low latency profile"
        ));
    }

    let mut cpu_profile = options.cpu_profile;
    if options.decomp_v == 0 {
        // the CPU profile has nothing to parallelise without vertical
        // decomposition
        cpu_profile = CpuProfile::LowLatency;
    }

    if options.signs_handling == SignHandling::Fast
        && options.rate_control_mode == RateControlMode::PerPrecinct
    {
        warn!("fast sign handling has no benefit without padding migration");
    }

    let lcod = bytes_per_frame(&options)?;

    let pi = PictureInfo::compute(
        options.width,
        options.height,
        options.colour_format,
        options.decomp_h,
        options.decomp_v,
        options.slice_height
    )?;
    let layout = EncoderLayout::new(&pi);

    let max_gain = pi
        .components
        .iter()
        .flat_map(|c| c.bands.iter())
        .map(|b| b.gain)
        .max()
        .unwrap_or(0);

    let hdr = PictureHeaderDynamic {
        bw: crate::dwt::WAVELET_BW,
        fq: crate::dwt::WAVELET_FQ,
        qpih: match options.quantization {
            QuantType::Deadzone => 0,
            QuantType::Uniform => 1
        },
        fs: u8::from(options.signs_handling != SignHandling::Off),
        rm: u8::from(options.vertical_prediction == VerticalPredictionMode::ZeroCoefficients),
        rl: 1,
        lcod
    };

    let mut enc = EncCommon {
        pi,
        layout,
        bit_depth: options.bit_depth,
        colour_format: options.colour_format,
        cpu_profile,
        rate_control_mode: options.rate_control_mode,
        significance: options.significance,
        vertical_prediction: options.vertical_prediction,
        signs_handling: options.signs_handling,
        quantization: options.quantization,
        packetization: options.packetization,
        hdr,
        frame_header: vec![],
        slice_sizes: vec![],
        slice_offsets: vec![],
        max_quantization: TRUNCATION_MAX + max_gain
    };

    // pre-render the frame header once for every frame
    let mut header_buf = [0u8; 256];
    let header_len = {
        let mut bs = BitstreamWriter::new(&mut header_buf);
        write_frame_header(&mut bs, &enc);
        bs.used_bytes()
    };
    enc.frame_header = header_buf[..header_len].to_vec();

    let headers_len =
        header_len as u32 + CODESTREAM_TAIL_BYTES + SLICE_HEADER_BYTES * enc.pi.slice_num;
    if headers_len >= lcod {
        return Err(EncodeErrors::BadParameter("bpp too small to fit the headers"));
    }

    enc.slice_sizes = compute_slice_sizes(&enc.pi, lcod, header_len as u32);
    let mut offset = header_len as u32;
    enc.slice_offsets = enc
        .slice_sizes
        .iter()
        .map(|&size| {
            let at = offset;
            offset += size;
            at
        })
        .collect();
    debug_assert_eq!(offset, lcod);

    Ok(enc)
}

/// A running JPEG XS encoder.
///
/// Construction validates the configuration, allocates every pool and
/// spawns the pipeline threads. Frames then cycle through
/// [`send_picture`](Self::send_picture) and
/// [`get_packet`](Self::get_packet) until [`close`](Self::close).
///
/// # Example
/// ```no_run
/// use jxs_core::colour_format::ColourFormat;
/// use jxs_core::image::{BitstreamBuffer, ImageBuffer, XsFrame};
/// use jxs_core::options::EncoderOptions;
/// use jxs_encoder::{image_config, XsEncoder, API_VERSION_MAJOR, API_VERSION_MINOR};
///
/// let options = EncoderOptions::new(640, 480, 8, ColourFormat::PlanarYuv420)
///     .set_bpp(2, 1)
///     .set_decomposition(5, 2);
/// let (config, bytes_per_frame) = image_config(&options).unwrap();
///
/// let encoder = XsEncoder::new(API_VERSION_MAJOR, API_VERSION_MINOR, &options).unwrap();
/// let planes = config
///     .planes
///     .iter()
///     .map(|p| vec![0u8; p.byte_size])
///     .collect();
/// let strides = config.planes.iter().map(|p| p.width as usize).collect();
/// let frame = XsFrame::new(
///     ImageBuffer::new(planes, strides),
///     BitstreamBuffer::with_size(bytes_per_frame as usize)
/// );
/// encoder.send_picture(frame, true).unwrap();
/// let packet = encoder.get_packet(true).unwrap();
/// assert!(packet.last_packet_in_frame);
/// encoder.close();
/// ```
pub struct XsEncoder {
    shared: Arc<PipelineShared>,
    frame_counter: AtomicU64,
    init_thread:  Option<JoinHandle<()>>,
    dwt_threads:  Vec<JoinHandle<()>>,
    pack_threads: Vec<JoinHandle<()>>,
    final_thread: Option<JoinHandle<()>>
}

impl std::fmt::Debug for XsEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XsEncoder").finish_non_exhaustive()
    }
}

impl XsEncoder {
    /// Validate the configuration, build the picture information and
    /// spawn the pipeline.
    pub fn new(
        api_major: u64, api_minor: u64, options: &EncoderOptions
    ) -> Result<XsEncoder, EncodeErrors> {
        check_api_version(api_major, api_minor)?;
        let enc = build_enc_common(options)?;

        let (dwt_threads_num, pack_threads_num) = match enc.cpu_profile {
            CpuProfile::Cpu => {
                let dwt = if options.threads_num > 12 {
                    3u32
                } else if options.threads_num > 8 {
                    2
                } else {
                    1
                };
                let pack = (options.threads_num as i64 - 2 - i64::from(dwt)).max(1) as u32;
                (dwt, pack)
            }
            CpuProfile::LowLatency => (0, (options.threads_num as i64 - 2).max(1) as u32)
        };

        let mut pack_input_count = 2 * pack_threads_num;
        if enc.cpu_profile == CpuProfile::Cpu {
            // a queue shorter than the per-frame task burst deadlocks
            // the init stage against the slice barriers
            pack_input_count = pack_input_count.max(2 * enc.pi.slice_num);
            pack_input_count = pack_input_count
                .max(dwt_threads_num / enc.pi.comps_num as u32 * enc.pi.slice_num);
        }
        let dwt_input_count = dwt_threads_num * 3;
        let ring_size = PCS_POOL_COUNT + 10;
        let output_count = ring_size + 8;
        let pack_output_count = pack_input_count;

        trace!(
            "configured {} pack threads, {} dwt threads, {} inflight frames",
            pack_threads_num,
            dwt_threads_num,
            PCS_POOL_COUNT
        );
        trace!(
            "{}x{} depth {} {:?}, {} slices of {} precincts, {:?} {:?}",
            enc.pi.width,
            enc.pi.height,
            enc.bit_depth,
            enc.colour_format,
            enc.pi.slice_num,
            enc.pi.precincts_per_slice,
            enc.rate_control_mode,
            enc.cpu_profile
        );

        let dwt_input = (enc.cpu_profile == CpuProfile::Cpu).then(|| {
            SystemResource::new(dwt_input_count as usize, |_| {
                Mutex::new(DwtParams::default())
            })
        });

        let shared = Arc::new(PipelineShared {
            pcs_pool: SystemResource::new(PCS_POOL_COUNT as usize, |_| Pcs::new(&enc)),
            input_queue: SystemResource::new(PCS_POOL_COUNT as usize, |_| {
                Mutex::new(InputItem::default())
            }),
            output_queue: SystemResource::new(output_count as usize, |_| Mutex::new(None)),
            pack_input: SystemResource::new(pack_input_count as usize, |_| {
                Mutex::new(PackParams::default())
            }),
            pack_output: SystemResource::new(pack_output_count as usize, |_| {
                Mutex::new(PackOut::default())
            }),
            dwt_input,
            ring_free: CondCounter::new(i64::from(ring_size)),
            ring_size,
            common: enc
        });

        let spawn = |name: &str, f: Box<dyn FnOnce() + Send>| {
            std::thread::Builder::new()
                .name(name.to_string())
                .spawn(f)
                .map_err(|_| EncodeErrors::InsufficientResources("worker thread"))
        };

        let init_thread = {
            let shared = shared.clone();
            Some(spawn("jxs-init", Box::new(move || init_stage::init_stage_kernel(&shared)))?)
        };
        let mut dwt_threads = Vec::new();
        for i in 0..dwt_threads_num {
            let shared = shared.clone();
            dwt_threads.push(spawn(
                &format!("jxs-dwt-{i}"),
                Box::new(move || dwt_stage::dwt_stage_kernel(&shared))
            )?);
        }
        let mut pack_threads = Vec::new();
        for i in 0..pack_threads_num {
            let shared = shared.clone();
            pack_threads.push(spawn(
                &format!("jxs-pack-{i}"),
                Box::new(move || pack_stage::pack_stage_kernel(&shared))
            )?);
        }
        let final_thread = {
            let shared = shared.clone();
            Some(spawn(
                "jxs-final",
                Box::new(move || final_stage::final_stage_kernel(&shared))
            )?)
        };

        Ok(XsEncoder {
            shared,
            frame_counter: AtomicU64::new(0),
            init_thread,
            dwt_threads,
            pack_threads,
            final_thread
        })
    }

    /// Submit one frame.
    ///
    /// Non-blocking submission fails with
    /// [`EncodeErrors::EmptyQueue`] when the input ring is full; the
    /// frame rides back inside the error either way.
    pub fn send_picture(&self, frame: XsFrame, blocking: bool) -> Result<(), SendError> {
        let enc = &self.shared.common;

        if frame.bitstream.data.len() < enc.hdr.lcod as usize {
            return Err(SendError {
                error: EncodeErrors::BitstreamTooShort {
                    needed: enc.hdr.lcod as usize,
                    have:   frame.bitstream.data.len()
                },
                frame
            });
        }
        if frame.image.planes.len() < enc.colour_format.num_planes()
            || frame.image.strides.len() < enc.colour_format.num_planes()
        {
            return Err(SendError {
                error: EncodeErrors::BadParameter("missing input planes"),
                frame
            });
        }
        let pixel_size = if enc.bit_depth <= 8 { 1 } else { 2 };
        for c in 0..enc.colour_format.num_planes() {
            // the last row may be shorter than the stride
            let (width, height) = if enc.colour_format.is_packed() {
                (enc.pi.width as usize * 3, enc.pi.height as usize)
            } else {
                (
                    enc.pi.components[c].width as usize,
                    enc.pi.components[c].height as usize
                )
            };
            let min_size = (frame.image.strides[c] * (height - 1) + width) * pixel_size;
            if frame.image.planes[c].len() < min_size {
                return Err(SendError {
                    error: EncodeErrors::BadParameter("input plane smaller than its geometry"),
                    frame
                });
            }
        }

        let idx = if blocking {
            match self.shared.input_queue.get_empty() {
                Ok(idx) => idx,
                Err(e) => return Err(SendError { error: e, frame })
            }
        } else {
            match self.shared.input_queue.get_empty_non_blocking() {
                Ok(Some(idx)) => idx,
                Ok(None) => {
                    return Err(SendError {
                        error: EncodeErrors::EmptyQueue,
                        frame
                    })
                }
                Err(e) => return Err(SendError { error: e, frame })
            }
        };

        {
            let mut item = self.shared.input_queue.obj(idx).lock().unwrap();
            item.frame = Some(frame);
            item.frame_number = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.input_queue.post_full(idx);
        Ok(())
    }

    /// Retrieve one output packet.
    ///
    /// Non-blocking retrieval fails with [`EncodeErrors::EmptyQueue`]
    /// when nothing is ready yet.
    pub fn get_packet(&self, blocking: bool) -> Result<EncodedPacket, EncodeErrors> {
        let idx = if blocking {
            self.shared.output_queue.get_full()?
        } else {
            match self.shared.output_queue.get_full_non_blocking()? {
                Some(idx) => idx,
                None => return Err(EncodeErrors::EmptyQueue)
            }
        };
        let packet = self.shared.output_queue.obj(idx).lock().unwrap().take();
        self.shared.output_queue.release(idx);
        packet.ok_or(EncodeErrors::Generic("empty output slot"))
    }

    /// Shut down the pipeline and join every worker.
    pub fn close(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.shared.shutdown();
        if let Some(handle) = self.init_thread.take() {
            let _ = handle.join();
        }
        for handle in self.dwt_threads.drain(..) {
            let _ = handle.join();
        }
        for handle in self.pack_threads.drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = self.final_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for XsEncoder {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

#[cfg(test)]
mod tests {
    use jxs_core::colour_format::ColourFormat;
    use jxs_core::options::EncoderOptions;

    use crate::encoder::{
        build_enc_common, compute_slice_sizes, image_config, load_default_parameters
    };
    use crate::errors::EncodeErrors;
    use crate::headers::SLICE_HEADER_BYTES;

    fn base_options() -> EncoderOptions {
        EncoderOptions::new(64, 64, 8, ColourFormat::PlanarYuv422)
            .set_bpp(3, 1)
            .set_decomposition(3, 1)
            .set_slice_height(16)
    }

    #[test]
    fn api_version_is_checked() {
        assert!(load_default_parameters(1, 0).is_ok());
        assert_eq!(
            load_default_parameters(2, 0).unwrap_err(),
            EncodeErrors::InvalidApiVersion
        );
    }

    #[test]
    fn slice_sizes_cover_the_codestream() {
        let enc = build_enc_common(&base_options()).unwrap();
        let total: u32 = enc.slice_sizes.iter().sum();
        assert_eq!(total + enc.frame_header.len() as u32, enc.hdr.lcod);
        // every slice carries at least its header
        for (i, &size) in enc.slice_sizes.iter().enumerate() {
            assert!(size > SLICE_HEADER_BYTES, "slice {i}");
        }
        // leading slices may only be one byte larger
        let min = enc.slice_sizes[..enc.slice_sizes.len() - 1].iter().min().unwrap();
        let max = enc.slice_sizes[..enc.slice_sizes.len() - 1].iter().max().unwrap();
        assert!(max - min <= 1);
    }

    #[test]
    fn slice_size_remainder_goes_to_the_front() {
        let enc = build_enc_common(&base_options()).unwrap();
        let sizes = compute_slice_sizes(&enc.pi, enc.hdr.lcod, enc.frame_header.len() as u32);
        assert_eq!(sizes, enc.slice_sizes);
        let body: Vec<u32> = sizes[..sizes.len() - 1].to_vec();
        for pair in body.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }

    #[test]
    fn rejects_invalid_configurations() {
        let bad_depth = EncoderOptions {
            bit_depth: 16,
            ..base_options()
        };
        assert!(matches!(
            build_enc_common(&bad_depth),
            Err(EncodeErrors::BadParameter(_))
        ));

        let bad_decomp = base_options().set_decomposition(1, 2);
        assert!(build_enc_common(&bad_decomp).is_err());

        let bad_slice = base_options().set_decomposition(2, 2).set_slice_height(10);
        assert!(build_enc_common(&bad_slice).is_err());

        let missing_bpp = EncoderOptions::new(64, 64, 8, ColourFormat::PlanarYuv422);
        assert!(build_enc_common(&missing_bpp).is_err());

        let overflow = base_options().set_bpp(u32::MAX, 1);
        assert!(matches!(
            build_enc_common(&overflow),
            Err(EncodeErrors::BadParameter(_))
        ));

        // dimensions must fit the 16 bit picture header fields
        let too_wide = EncoderOptions {
            width: 0x10000,
            ..base_options()
        };
        assert!(matches!(
            build_enc_common(&too_wide),
            Err(EncodeErrors::BadParameter(_))
        ));
        let too_tall = EncoderOptions {
            height: 0x10000,
            ..base_options()
        };
        assert!(matches!(
            build_enc_common(&too_tall),
            Err(EncodeErrors::BadParameter(_))
        ));
    }

    #[test]
    fn image_config_reports_subsampled_planes() {
        let (config, bytes) = image_config(&base_options()).unwrap();
        assert_eq!(config.planes_num, 3);
        assert_eq!(config.planes[0].width, 64);
        assert_eq!(config.planes[1].width, 32);
        assert_eq!(config.planes[1].height, 64);
        // 64 * 64 * 3bpp / 8
        assert_eq!(bytes, 1536);
    }

    #[test]
    fn yuv420_needs_vertical_decomposition() {
        let options = EncoderOptions::new(64, 64, 8, ColourFormat::PlanarYuv420)
            .set_bpp(2, 1)
            .set_decomposition(2, 0);
        assert!(build_enc_common(&options).is_err());
    }
}
