/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Codestream markers and fixed headers.
//!
//! Layout: SOC CAP PIH CDT WGT, then per slice SLH + precinct packets,
//! then EOC. Everything is big-endian.

use jxs_core::colour_format::ColourFormat;

use crate::bitstream::BitstreamWriter;
use crate::encoder::EncCommon;
use crate::pi::{PictureInfo, GROUP_SIZE, SIGNIFICANCE_GROUP_SIZE};

pub const MARKER_SOC: u16 = 0xff10;
pub const MARKER_EOC: u16 = 0xff11;
pub const MARKER_PIH: u16 = 0xff12;
pub const MARKER_CDT: u16 = 0xff13;
pub const MARKER_WGT: u16 = 0xff14;
pub const MARKER_SLH: u16 = 0xff20;
pub const MARKER_CAP: u16 = 0xff50;

/// EOC marker size
pub const CODESTREAM_TAIL_BYTES: u32 = 2;
/// SLH marker + length + slice index
pub const SLICE_HEADER_BYTES: u32 = 6;
/// PIH payload size, excluding the marker itself
const PICTURE_HEADER_SIZE_BYTES: u16 = 26;

pub const fn packet_header_bytes(short: bool) -> u32 {
    if short {
        5
    } else {
        7
    }
}

pub const fn precinct_header_bytes(short: bool) -> u32 {
    if short {
        4
    } else {
        5
    }
}

fn write_capabilities_marker(bs: &mut BitstreamWriter, enc: &EncCommon) {
    bs.write_u16(MARKER_CAP);

    let support_420 = enc.colour_format == ColourFormat::PlanarYuv420;
    let capability: [u8; 9] = [
        0,                   // unused
        0,                   // Star-Tetrix transform and CTS marker
        0,                   // quadratic non-linear transform
        0,                   // extended non-linear transform
        u8::from(support_420), // a component with sy > 1 present
        0,                   // component-dependent wavelet decomposition
        0,                   // lossless decoding
        0,                   // unused
        enc.hdr.rl           // packet-based raw-mode switch
    ];

    let size_bytes = (16 + capability.len() as u16 + 7) / 8;
    bs.write_u16(size_bytes);
    for bit in capability {
        bs.put_bits(u32::from(bit), 1);
    }
    bs.align_to_byte();
}

fn write_picture_header(bs: &mut BitstreamWriter, pi: &PictureInfo, enc: &EncCommon) {
    bs.write_u16(MARKER_PIH);
    bs.write_u16(PICTURE_HEADER_SIZE_BYTES);
    bs.write_u32(enc.hdr.lcod);
    bs.write_u16(0); // Ppih
    bs.write_u16(0); // Plev
    bs.write_u16(pi.width as u16); // Wf
    bs.write_u16(pi.height as u16); // Hf
    bs.write_u16(0); // Cw, precincts span the full width
    bs.write_u16(pi.precincts_per_slice as u16); // Hsl
    bs.write_u8(pi.comps_num as u8); // Nc
    bs.write_u8(GROUP_SIZE as u8); // Ng
    bs.write_u8(SIGNIFICANCE_GROUP_SIZE as u8); // Ss
    bs.write_u8(enc.hdr.bw); // Bw
    bs.put_bits(u32::from(enc.hdr.fq), 4); // Fq
    bs.put_bits(4, 4); // Br
    bs.put_fields3([(0, 1), (0, 3), (0, 4)]); // Fslc | Ppoc | Cpih
    bs.put_bits(u32::from(pi.decom_h), 4); // Nlx
    bs.put_bits(u32::from(pi.decom_v), 4); // Nly

    bs.put_bits(u32::from(!pi.use_short_header), 1); // Lh
    bs.put_bits(u32::from(enc.hdr.rl), 1); // Rl
    bs.put_bits(u32::from(enc.hdr.qpih), 2); // Qpih
    bs.put_bits(u32::from(enc.hdr.fs), 2); // Fs
    bs.put_bits(u32::from(enc.hdr.rm), 2); // Rm
}

fn write_component_table(bs: &mut BitstreamWriter, pi: &PictureInfo, bit_depth: u8) {
    bs.write_u16(MARKER_CDT);
    bs.write_u16(2 * pi.comps_num as u16 + 2);

    for comp in &pi.components {
        bs.write_u8(bit_depth);
        bs.put_bits(u32::from(comp.sx), 4);
        bs.put_bits(u32::from(comp.sy), 4);
    }
}

fn write_weight_table(bs: &mut BitstreamWriter, pi: &PictureInfo) {
    bs.write_u16(MARKER_WGT);
    bs.write_u16(2 * pi.bands_num_all as u16 + 2);

    for gb in &pi.global_bands {
        let band = &pi.components[gb.comp].bands[gb.band];
        bs.write_u8(band.gain);
        bs.write_u8(band.priority);
    }
}

/// Write the complete frame prologue: SOC through WGT.
pub fn write_frame_header(bs: &mut BitstreamWriter, enc: &EncCommon) {
    bs.write_u16(MARKER_SOC);
    write_capabilities_marker(bs, enc);
    write_picture_header(bs, &enc.pi, enc);
    write_component_table(bs, &enc.pi, enc.bit_depth);
    write_weight_table(bs, &enc.pi);
    bs.align_to_byte();
}

pub fn write_slice_header(bs: &mut BitstreamWriter, slice_idx: u32) {
    bs.write_u16(MARKER_SLH);
    bs.write_u16(4);
    bs.write_u16(slice_idx as u16);
}

/// Precinct prologue: coded length, quantization and refinement.
pub fn write_precinct_header(
    bs: &mut BitstreamWriter, short: bool, total_bytes: u32, quantization: u8, refinement: u8
) {
    if short {
        debug_assert!(total_bytes <= u32::from(u16::MAX));
        bs.write_u16(total_bytes as u16);
    } else {
        bs.write_u24(total_bytes);
    }
    bs.write_u8(quantization);
    bs.write_u8(refinement);
}

/// Write a packet header and return the absolute bit offset of the
/// sign-size field so the packer can back-patch it.
///
/// Short form is 5 bytes: raw(1) data(15) gcli(13) signs(11).
/// Long form is 7 bytes: raw(1) data(20) gcli(20) signs(15).
pub fn write_packet_header(
    bs: &mut BitstreamWriter, long_hdr: bool, raw_coding: bool, data_bytes: u32, gcli_bytes: u32,
    sign_bytes: u32
) -> usize {
    bs.put_bits(u32::from(raw_coding), 1);
    if long_hdr {
        bs.put_bits(data_bytes, 20);
        bs.put_bits(gcli_bytes, 20);
        bs.put_bits(sign_bytes, 15);
        bs.used_bits() - 15
    } else {
        bs.put_bits(data_bytes, 15);
        bs.put_bits(gcli_bytes, 13);
        bs.put_bits(sign_bytes, 11);
        bs.used_bits() - 11
    }
}

pub fn write_tail(bs: &mut BitstreamWriter) {
    bs.write_u16(MARKER_EOC);
}

#[cfg(test)]
mod tests {
    use crate::bitstream::BitstreamWriter;
    use crate::headers::{write_packet_header, write_slice_header};

    #[test]
    fn slice_header_is_six_bytes() {
        let mut buf = [0u8; 8];
        let mut bs = BitstreamWriter::new(&mut buf);
        write_slice_header(&mut bs, 3);
        assert_eq!(bs.used_bytes(), 6);
        assert_eq!(&buf[..6], &[0xff, 0x20, 0x00, 0x04, 0x00, 0x03]);
    }

    #[test]
    fn packet_header_sizes() {
        let mut buf = [0u8; 16];
        let mut bs = BitstreamWriter::new(&mut buf);
        let off = write_packet_header(&mut bs, false, false, 0x123, 0x45, 0x67);
        assert_eq!(bs.used_bytes(), 5);
        assert_eq!(off, 40 - 11);

        let mut buf = [0u8; 16];
        let mut bs = BitstreamWriter::new(&mut buf);
        let off = write_packet_header(&mut bs, true, true, 0x12345, 0x6789, 0xab);
        assert_eq!(bs.used_bytes(), 7);
        assert_eq!(off, 56 - 15);
        assert_eq!(buf[0] >> 7, 1);
    }

    #[test]
    fn packet_header_sign_field_back_patch() {
        let mut buf = [0u8; 8];
        let mut bs = BitstreamWriter::new(&mut buf);
        let off = write_packet_header(&mut bs, false, false, 1, 2, 0x7ff);
        bs.update_bits(off, 0x155, 11);
        // low 11 bits of the 5 byte header
        let tail = (u32::from(buf[3] & 0x07) << 8) | u32::from(buf[4]);
        assert_eq!(tail, 0x155);
    }
}
