/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */
//! End to end pipeline tests: exact frame sizing, ordering,
//! packetization, backpressure and shutdown.

use jxs_core::colour_format::ColourFormat;
use jxs_core::image::{BitstreamBuffer, ImageBuffer, XsFrame};
use jxs_core::options::{
    CpuProfile, EncoderOptions, PacketizationMode, RateControlMode, SignHandling,
    VerticalPredictionMode
};
use jxs_encoder::{image_config, EncodeErrors, XsEncoder, API_VERSION_MAJOR, API_VERSION_MINOR};
use nanorand::{Rng, WyRand};

fn new_encoder(options: &EncoderOptions) -> XsEncoder {
    XsEncoder::new(API_VERSION_MAJOR, API_VERSION_MINOR, options).unwrap()
}

fn make_frame(options: &EncoderOptions, rng: &mut WyRand) -> XsFrame {
    let (config, bytes_per_frame) = image_config(options).unwrap();
    let mut planes = Vec::new();
    let mut strides = Vec::new();

    for plane in &config.planes {
        let mut data = vec![0u8; plane.byte_size];
        if options.bit_depth <= 8 {
            for b in data.iter_mut() {
                *b = rng.generate::<u8>();
            }
        } else {
            let mask = (1u16 << options.bit_depth) - 1;
            for pair in data.chunks_exact_mut(2) {
                let v = rng.generate::<u16>() & mask;
                pair.copy_from_slice(&v.to_ne_bytes());
            }
        }
        planes.push(data);
        strides.push(if options.colour_format.is_packed() {
            plane.width as usize * 3
        } else {
            plane.width as usize
        });
    }

    XsFrame::new(
        ImageBuffer::new(planes, strides),
        BitstreamBuffer::with_size(bytes_per_frame as usize)
    )
}

/// Tiny 4:2:2 frame: one slice, deterministic 96 byte codestream.
#[test]
fn tiny_422_frame_has_exact_byte_count() {
    let options = EncoderOptions::new(16, 16, 8, ColourFormat::PlanarYuv422)
        .set_bpp(3, 1)
        .set_decomposition(1, 0)
        .set_slice_height(16)
        .set_rate_control_mode(RateControlMode::PerPrecinct);
    let mut rng = WyRand::new_seed(1);

    let encoder = new_encoder(&options);
    encoder.send_picture(make_frame(&options, &mut rng), true).unwrap();

    let packet = encoder.get_packet(true).unwrap();
    assert!(packet.last_packet_in_frame);
    assert_eq!(packet.span, 0..96);
    let frame = packet.frame.unwrap();
    assert_eq!(frame.bitstream.used_size, 96);
    // the codestream prologue survives whatever rate control decided
    assert_eq!(&frame.bitstream.data[..2], &[0xff, 0x10]);
    encoder.close();
}

/// A generous budget must produce clean, fully packed frames.
#[test]
fn generous_budget_encodes_without_errors() {
    for rc_mode in [
        RateControlMode::PerPrecinct,
        RateControlMode::PerPrecinctMovePadding,
        RateControlMode::PerSliceCommonQuant,
        RateControlMode::PerSliceMaxRate
    ] {
        let options = EncoderOptions::new(256, 32, 8, ColourFormat::PlanarYuv400)
            .set_bpp(4, 1)
            .set_decomposition(2, 1)
            .set_slice_height(16)
            .set_rate_control_mode(rc_mode);
        let mut rng = WyRand::new_seed(7);

        let encoder = new_encoder(&options);
        encoder.send_picture(make_frame(&options, &mut rng), true).unwrap();
        let packet = encoder.get_packet(true).unwrap();
        assert!(!packet.frame_error, "{rc_mode:?}");
        assert_eq!(packet.frame.unwrap().bitstream.used_size, 256 * 32 * 4 / 8);
        encoder.close();
    }
}

/// Coding tool combinations keep the frame size exact and clean.
#[test]
fn coding_tools_encode_without_errors() {
    let combos = [
        (SignHandling::Full, true, VerticalPredictionMode::Disabled),
        (SignHandling::Fast, true, VerticalPredictionMode::Disabled),
        (SignHandling::Off, false, VerticalPredictionMode::Disabled),
        (SignHandling::Off, true, VerticalPredictionMode::ZeroResidual),
        (SignHandling::Full, true, VerticalPredictionMode::ZeroCoefficients)
    ];
    for (signs, significance, vpred) in combos {
        let options = EncoderOptions::new(256, 32, 8, ColourFormat::PlanarYuv400)
            .set_bpp(4, 1)
            .set_decomposition(2, 1)
            .set_slice_height(16)
            .set_rate_control_mode(RateControlMode::PerPrecinctMovePadding)
            .set_signs_handling(signs)
            .set_significance(significance)
            .set_vertical_prediction(vpred);
        let mut rng = WyRand::new_seed(11);

        let encoder = new_encoder(&options);
        encoder.send_picture(make_frame(&options, &mut rng), true).unwrap();
        let packet = encoder.get_packet(true).unwrap();
        assert!(!packet.frame_error, "{signs:?} sig={significance} {vpred:?}");
        encoder.close();
    }
}

/// Two-slice 4:2:0: per-slice packetization accounts for every byte.
#[test]
fn two_slice_420_budget_split() {
    let options = EncoderOptions::new(32, 32, 10, ColourFormat::PlanarYuv420)
        .set_bpp(2, 1)
        .set_decomposition(3, 2)
        .set_slice_height(16)
        .set_rate_control_mode(RateControlMode::PerSliceCommonQuant)
        .set_packetization(PacketizationMode::PerSlice);
    let mut rng = WyRand::new_seed(3);

    let encoder = new_encoder(&options);
    encoder.send_picture(make_frame(&options, &mut rng), true).unwrap();

    let header = encoder.get_packet(true).unwrap();
    let slice0 = encoder.get_packet(true).unwrap();
    let slice1 = encoder.get_packet(true).unwrap();

    assert!(!header.last_packet_in_frame);
    assert!(!slice0.last_packet_in_frame);
    assert!(slice1.last_packet_in_frame);

    let header_len = header.span.len();
    let s0 = slice0.span.len();
    let s1 = slice1.span.len();
    assert_eq!(header_len + s0 + s1, 32 * 32 * 2 / 8);
    // the trailing slice only exceeds the leading one by the EOC marker
    assert!(s0 + 2 >= s1);
    assert!(slice1.frame.is_some());
    encoder.close();
}

/// CPU profile, many frames: packets come back in submission order.
#[test]
fn frames_return_in_order_cpu_profile() {
    let options = EncoderOptions::new(256, 64, 8, ColourFormat::PlanarYuv444OrRgb)
        .set_bpp(4, 1)
        .set_decomposition(5, 1)
        .set_slice_height(16)
        .set_cpu_profile(CpuProfile::Cpu)
        .set_num_threads(8);
    let mut rng = WyRand::new_seed(5);

    let encoder = new_encoder(&options);
    let frames = 8u64;
    let mut received = 0u64;
    for _ in 0..frames {
        encoder.send_picture(make_frame(&options, &mut rng), true).unwrap();
        // drain opportunistically to keep the pipeline moving
        while let Ok(packet) = encoder.get_packet(false) {
            assert_eq!(packet.frame_number, received);
            received += 1;
        }
    }
    while received < frames {
        let packet = encoder.get_packet(true).unwrap();
        assert!(packet.last_packet_in_frame);
        assert_eq!(packet.frame_number, received);
        received += 1;
    }
    encoder.close();
}

/// Saturating the input without draining must eventually report a
/// full queue, and every accepted frame must still come back.
#[test]
fn backpressure_reports_full_queue() {
    let options = EncoderOptions::new(64, 64, 8, ColourFormat::PlanarYuv400)
        .set_bpp(1, 1)
        .set_decomposition(2, 1)
        .set_slice_height(8);
    let mut rng = WyRand::new_seed(9);

    let encoder = new_encoder(&options);
    let mut accepted = 0u32;
    let mut saw_full_queue = false;
    for _ in 0..200 {
        match encoder.send_picture(make_frame(&options, &mut rng), false) {
            Ok(()) => accepted += 1,
            Err(e) => {
                assert_eq!(e.error, EncodeErrors::EmptyQueue);
                saw_full_queue = true;
                break;
            }
        }
    }
    assert!(saw_full_queue, "queue never filled after 200 frames");

    for n in 0..accepted {
        let packet = encoder.get_packet(true).unwrap();
        assert_eq!(packet.frame_number, u64::from(n));
    }
    assert_eq!(
        encoder.get_packet(false).unwrap_err(),
        EncodeErrors::EmptyQueue
    );
    encoder.close();
}

/// Five slices in per-slice mode: header packet plus one packet per
/// slice, the last one flagged and carrying the frame.
#[test]
fn per_slice_packetization_event_sequence() {
    let options = EncoderOptions::new(32, 80, 8, ColourFormat::PlanarYuv422)
        .set_bpp(2, 1)
        .set_decomposition(2, 1)
        .set_slice_height(16)
        .set_packetization(PacketizationMode::PerSlice);
    let mut rng = WyRand::new_seed(13);
    let total_bytes = 32 * 80 * 2 / 8;

    let encoder = new_encoder(&options);
    let frames = 2;
    for _ in 0..frames {
        encoder.send_picture(make_frame(&options, &mut rng), true).unwrap();
    }

    for frame_number in 0..frames {
        let mut events = Vec::new();
        loop {
            let packet = encoder.get_packet(true).unwrap();
            assert_eq!(packet.frame_number, frame_number);
            let done = packet.last_packet_in_frame;
            events.push(packet);
            if done {
                break;
            }
        }
        // header plus five slices
        assert_eq!(events.len(), 6);
        assert_eq!(events[0].span.start, 0);
        assert!(events[0].frame.is_none());
        for pair in events.windows(2) {
            assert_eq!(pair[0].span.end, pair[1].span.start);
        }
        assert_eq!(events.last().unwrap().span.end, total_bytes);
        assert!(events.last().unwrap().frame.is_some());
        for event in &events {
            assert_eq!(event.data.len(), event.span.len());
        }
    }
    encoder.close();
}

/// A slice as tall as the frame still works.
#[test]
fn single_slice_frame() {
    let options = EncoderOptions::new(64, 24, 8, ColourFormat::PlanarYuv400)
        .set_bpp(4, 1)
        .set_decomposition(1, 0)
        .set_slice_height(64);
    let mut rng = WyRand::new_seed(21);

    let encoder = new_encoder(&options);
    encoder.send_picture(make_frame(&options, &mut rng), true).unwrap();
    let packet = encoder.get_packet(true).unwrap();
    assert!(packet.last_packet_in_frame);
    assert_eq!(packet.frame.unwrap().bitstream.used_size, 64 * 24 * 4 / 8);
    encoder.close();
}

/// Minimum width input.
#[test]
fn minimum_width_frame() {
    let options = EncoderOptions::new(4, 16, 8, ColourFormat::PlanarYuv400)
        .set_bpp(16, 1)
        .set_decomposition(1, 1)
        .set_slice_height(16);
    let mut rng = WyRand::new_seed(23);

    let encoder = new_encoder(&options);
    encoder.send_picture(make_frame(&options, &mut rng), true).unwrap();
    let packet = encoder.get_packet(true).unwrap();
    assert_eq!(packet.frame.unwrap().bitstream.used_size, 4 * 16 * 16 / 8);
    encoder.close();
}

/// Ten-bit input through the whole pipeline.
#[test]
fn ten_bit_input_roundtrip() {
    let options = EncoderOptions::new(128, 32, 10, ColourFormat::PlanarYuv422)
        .set_bpp(6, 1)
        .set_decomposition(3, 1)
        .set_slice_height(16);
    let mut rng = WyRand::new_seed(27);

    let encoder = new_encoder(&options);
    encoder.send_picture(make_frame(&options, &mut rng), true).unwrap();
    let packet = encoder.get_packet(true).unwrap();
    assert_eq!(packet.frame.unwrap().bitstream.used_size, 128 * 32 * 6 / 8);
    encoder.close();
}

/// An impossible bpp must be rejected at init.
#[test]
fn oversized_frame_budget_is_rejected() {
    let options = EncoderOptions::new(60000, 60000, 8, ColourFormat::PlanarYuv400)
        .set_bpp(10, 1)
        .set_decomposition(2, 1);
    let err = XsEncoder::new(API_VERSION_MAJOR, API_VERSION_MINOR, &options).unwrap_err();
    assert!(matches!(err, EncodeErrors::BadParameter(_)));
}

/// Closing with inflight frames joins every worker without hanging.
#[test]
fn shutdown_with_inflight_frames() {
    let options = EncoderOptions::new(256, 64, 8, ColourFormat::PlanarYuv444OrRgb)
        .set_bpp(4, 1)
        .set_decomposition(4, 2)
        .set_slice_height(16)
        .set_cpu_profile(CpuProfile::Cpu)
        .set_num_threads(6);
    let mut rng = WyRand::new_seed(31);

    let encoder = new_encoder(&options);
    for _ in 0..3 {
        encoder.send_picture(make_frame(&options, &mut rng), true).unwrap();
    }
    encoder.close();
}

/// The packed RGB input path.
#[test]
fn packed_rgb_frame() {
    let options = EncoderOptions::new(128, 32, 8, ColourFormat::PackedYuv444OrRgb)
        .set_bpp(6, 1)
        .set_decomposition(3, 1)
        .set_slice_height(16);
    let mut rng = WyRand::new_seed(33);

    let encoder = new_encoder(&options);
    encoder.send_picture(make_frame(&options, &mut rng), true).unwrap();
    let packet = encoder.get_packet(true).unwrap();
    assert_eq!(packet.frame.unwrap().bitstream.used_size, 128 * 32 * 6 / 8);
    encoder.close();
}
