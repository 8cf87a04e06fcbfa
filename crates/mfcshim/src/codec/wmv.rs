// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Windows Media Video stream headers.
//!
//! A WMV stream starts with the container's `BITMAPINFOHEADER`. Its
//! compression FourCC selects the profile. WMV3 (simple/main) streams are
//! fed to the engine as RCV: the header is replaced by the RCV sequence
//! layer and frames go in unchanged. VC-1 advanced streams carry their
//! sequence header after a one byte ASF binding, and frames arrive from the
//! demuxer without their start code.

use crate::engine::VideoCodec;
use crate::Error;

/// Size of `BITMAPINFOHEADER`.
pub const BITMAP_INFO_HEADER_SIZE: usize = 40;

/// `BITMAPINFOHEADER` followed by the ASF binding byte.
pub const ASF_BINDING_HEADER_SIZE: usize = 41;

const COMPRESSION_OFFSET: usize = 16;

/// VC-1 frame start code.
pub const FRAME_START_CODE: [u8; 4] = [0x00, 0x00, 0x01, 0x0D];

const FOURCC_WMV3: u32 = u32::from_le_bytes(*b"WMV3");
const FOURCC_WVC1: u32 = u32::from_le_bytes(*b"WVC1");
const FOURCC_WMVA: u32 = u32::from_le_bytes(*b"WMVA");

/// Default STRUCT_C when the header carries no codec private data.
const DEFAULT_STRUCT_C: [u8; 4] = [0x30, 0x00, 0x00, 0x00];

/// WMV profile announced by the stream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WmvFormat {
    /// WMV3, VC-1 simple and main profile
    Wmv3,
    /// VC-1 advanced profile
    Vc1,
}

impl WmvFormat {
    /// Read the profile from a `BITMAPINFOHEADER`.
    pub fn from_header(header: &[u8]) -> Result<Self, Error> {
        let compression = read_u32(header, COMPRESSION_OFFSET).ok_or_else(|| {
            Error::HardwareInit(format!("{} byte WMV header is truncated", header.len()))
        })?;
        match compression {
            FOURCC_WMV3 => Ok(WmvFormat::Wmv3),
            FOURCC_WVC1 | FOURCC_WMVA => Ok(WmvFormat::Vc1),
            other => Err(Error::HardwareInit(format!(
                "unsupported WMV compression {:#010x}",
                other
            ))),
        }
    }

    /// Engine codec for this profile.
    pub fn codec(self) -> VideoCodec {
        match self {
            WmvFormat::Wmv3 => VideoCodec::Wmv3,
            WmvFormat::Vc1 => VideoCodec::Vc1,
        }
    }

    /// Bytes prepended to every frame before it reaches the engine.
    pub fn frame_prefix(self) -> &'static [u8] {
        match self {
            WmvFormat::Wmv3 => &[],
            WmvFormat::Vc1 => &FRAME_START_CODE,
        }
    }
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Sequence data the engine expects in place of the container header.
pub fn sequence_header(format: WmvFormat, header: &[u8]) -> Result<Vec<u8>, Error> {
    match format {
        WmvFormat::Wmv3 => rcv_sequence_layer(header),
        WmvFormat::Vc1 => {
            if header.len() < ASF_BINDING_HEADER_SIZE {
                return Err(Error::HardwareInit(format!(
                    "{} byte VC-1 header holds no sequence header",
                    header.len()
                )));
            }
            Ok(header[ASF_BINDING_HEADER_SIZE..].to_vec())
        }
    }
}

/// RCV sequence layer (SMPTE 421M annex L) for a WMV3 stream.
fn rcv_sequence_layer(header: &[u8]) -> Result<Vec<u8>, Error> {
    if header.len() < BITMAP_INFO_HEADER_SIZE {
        return Err(Error::HardwareInit(format!(
            "{} byte WMV3 header is truncated",
            header.len()
        )));
    }
    let width = read_u32(header, 4).unwrap_or_default();
    let height = read_u32(header, 8).unwrap_or_default();
    let struct_c = header
        .get(BITMAP_INFO_HEADER_SIZE..BITMAP_INFO_HEADER_SIZE + 4)
        .map_or(DEFAULT_STRUCT_C, |c| [c[0], c[1], c[2], c[3]]);

    let mut layer = Vec::with_capacity(36);
    layer.extend_from_slice(&[0x00, 0x00, 0x00, 0xC5]);
    layer.extend_from_slice(&4u32.to_le_bytes());
    layer.extend_from_slice(&struct_c);
    // STRUCT_A
    layer.extend_from_slice(&height.to_le_bytes());
    layer.extend_from_slice(&width.to_le_bytes());
    layer.extend_from_slice(&12u32.to_le_bytes());
    // STRUCT_B
    layer.extend_from_slice(&[0xB3, 0x19, 0x00, 0x00]);
    layer.extend_from_slice(&[0x44, 0x62, 0x05, 0x00]);
    layer.extend_from_slice(&[0x0F, 0x00, 0x00, 0x00]);
    Ok(layer)
}

/// Build a `BITMAPINFOHEADER` for a `width`x`height` stream.
///
/// `private` is appended after the header (STRUCT_C for WMV3, the ASF
/// binding byte and sequence header for VC-1).
pub fn bitmap_info_header(fourcc: &[u8; 4], width: u32, height: u32, private: &[u8]) -> Vec<u8> {
    let mut header = Vec::with_capacity(BITMAP_INFO_HEADER_SIZE + private.len());
    header.extend_from_slice(&((BITMAP_INFO_HEADER_SIZE + private.len()) as u32).to_le_bytes());
    header.extend_from_slice(&width.to_le_bytes());
    header.extend_from_slice(&height.to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes());
    header.extend_from_slice(&24u16.to_le_bytes());
    header.extend_from_slice(fourcc);
    header.extend_from_slice(&width.wrapping_mul(height).wrapping_mul(3).to_le_bytes());
    header.extend_from_slice(&[0; 16]);
    header.extend_from_slice(private);
    header
}
