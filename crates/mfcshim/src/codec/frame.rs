// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Bitstream frame boundary detection.

use serde::{Deserialize, Serialize};

/// How an input stream is cut into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameSplit {
    /// Annex B access units
    H264,
    /// Video object planes
    Mpeg4,
    /// Pictures delimited by the picture start code
    H263,
    /// Every input buffer holds exactly one frame
    WholeBuffer,
}

const NAL_SLICE: u8 = 1;
const NAL_IDR_SLICE: u8 = 5;
const NAL_SEI: u8 = 6;
const NAL_AUD: u8 = 9;

const MPEG4_VOP: u8 = 0xB6;
const MPEG4_VOS: u8 = 0xB0;
const MPEG4_GOV: u8 = 0xB3;
const MPEG4_VO: u8 = 0xB5;

/// Positions of `00 00 01` prefixes at or after `from`.
fn start_codes(data: &[u8], from: usize) -> impl Iterator<Item = usize> + '_ {
    (from..data.len().saturating_sub(2))
        .filter(move |&i| data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1)
}

/// Include a leading zero of a four-byte start code in the boundary.
fn boundary(data: &[u8], prefix: usize) -> usize {
    if prefix > 0 && data[prefix - 1] == 0 {
        prefix - 1
    } else {
        prefix
    }
}

fn h264_frame_end(data: &[u8]) -> Option<usize> {
    let mut seen_picture = false;
    for prefix in start_codes(data, 0) {
        let Some(&header) = data.get(prefix + 3) else {
            break;
        };
        let nal_type = header & 0x1F;
        let is_slice = nal_type == NAL_SLICE || nal_type == NAL_IDR_SLICE;
        if seen_picture {
            // first_mb_in_slice == 0 codes as a single '1' bit
            let new_picture = is_slice
                && data
                    .get(prefix + 4)
                    .map_or(false, |&first| first & 0x80 != 0);
            if new_picture || (NAL_SEI..=NAL_AUD).contains(&nal_type) {
                return Some(boundary(data, prefix));
            }
        }
        if is_slice {
            seen_picture = true;
        }
    }
    None
}

fn mpeg4_frame_end(data: &[u8]) -> Option<usize> {
    let mut seen_vop = false;
    for prefix in start_codes(data, 0) {
        let Some(&code) = data.get(prefix + 3) else {
            break;
        };
        let starts_unit = matches!(code, MPEG4_VOP | MPEG4_VOS | MPEG4_GOV | MPEG4_VO)
            || code <= 0x2F;
        if seen_vop && starts_unit {
            return Some(prefix);
        }
        if code == MPEG4_VOP {
            seen_vop = true;
        }
    }
    None
}

fn is_h263_psc(data: &[u8], at: usize) -> bool {
    data.len() > at + 2 && data[at] == 0 && data[at + 1] == 0 && data[at + 2] & 0xFC == 0x80
}

fn h263_frame_end(data: &[u8]) -> Option<usize> {
    (1..data.len().saturating_sub(2)).find(|&i| is_h263_psc(data, i))
}

/// Length of the frame at the start of `data`.
///
/// Returns `None` when `data` ends before the next frame begins, meaning
/// more input is needed (or the stream ended and all of `data` is the
/// frame). `WholeBuffer` streams never have an internal boundary.
pub fn find_frame_end(split: FrameSplit, data: &[u8]) -> Option<usize> {
    match split {
        FrameSplit::H264 => h264_frame_end(data),
        FrameSplit::Mpeg4 => mpeg4_frame_end(data),
        FrameSplit::H263 => h263_frame_end(data),
        FrameSplit::WholeBuffer => None,
    }
}

/// True if `data` begins with something the engine can decode.
pub fn is_frame_start(split: FrameSplit, data: &[u8]) -> bool {
    match split {
        FrameSplit::H264 | FrameSplit::Mpeg4 => start_codes(data, 0).next().is_some(),
        FrameSplit::H263 => (0..data.len().saturating_sub(2)).any(|i| is_h263_psc(data, i)),
        FrameSplit::WholeBuffer => !data.is_empty(),
    }
}

/// True if a VP8 frame is a key frame (carries the `9d 01 2a` start code).
pub fn is_vp8_key_frame(data: &[u8]) -> bool {
    data.len() >= 6 && data[0] & 0x01 == 0 && data[3..6] == [0x9D, 0x01, 0x2A]
}

/// Split a complete stream into frame lengths.
pub fn split_stream(split: FrameSplit, mut data: &[u8]) -> Vec<usize> {
    let mut frames = Vec::new();
    while !data.is_empty() {
        let len = find_frame_end(split, data).unwrap_or(data.len());
        frames.push(len);
        data = &data[len..];
    }
    frames
}
