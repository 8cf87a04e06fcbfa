// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use serde::{Deserialize, Serialize};

use crate::convert::PixelFormat;
use crate::submission::{DEFAULT_MFC_INPUT_BUFFER_SIZE, MFC_INPUT_BUFFER_NUM_MAX};

pub const DEFAULT_FRAME_WIDTH: u32 = 176;
pub const DEFAULT_FRAME_HEIGHT: u32 = 144;

pub const VIDEO_INPUT_BUFFER_NUM: usize = 5;
pub const VIDEO_OUTPUT_BUFFER_NUM: usize = 2;
pub const AUDIO_INPUT_BUFFER_NUM: usize = 2;
pub const AUDIO_OUTPUT_BUFFER_NUM: usize = 2;

pub const DEFAULT_AUDIO_INPUT_BUFFER_SIZE: usize = 16 * 1024;
/// One MP3 frame of 1152 stereo 16-bit samples, doubled.
pub const DEFAULT_AUDIO_OUTPUT_BUFFER_SIZE: usize = 1152 * 2 * 2 * 2;

/// Component configuration.
///
/// Every field has a default, so a JSON file only needs the values it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentConfig {
    /// Initial frame width, replaced by the stream geometry once decoded
    pub width: u32,
    pub height: u32,

    /// Buffer counts; `None` picks the per-codec default
    pub input_buffer_count: Option<usize>,
    pub output_buffer_count: Option<usize>,

    /// Minimum host buffer sizes; `None` derives them from the geometry
    pub input_buffer_size: Option<usize>,
    pub output_buffer_size: Option<usize>,

    /// Raw picture format on the raw side of a video codec
    pub color_format: PixelFormat,

    /// Decode without display delay, for single-frame thumbnails
    pub thumbnail: bool,

    /// Run hardware executions on the execute worker thread
    pub nonblocking: bool,

    /// Size of each hardware input slot
    pub slot_size: usize,

    /// Encoder bitrate in bits per second
    pub bitrate: u32,
    pub frame_rate: u32,
    pub gop_size: u32,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
            input_buffer_count: None,
            output_buffer_count: None,
            input_buffer_size: None,
            output_buffer_size: None,
            color_format: PixelFormat::Yuv420Planar,
            thumbnail: false,
            nonblocking: true,
            slot_size: DEFAULT_MFC_INPUT_BUFFER_SIZE / MFC_INPUT_BUFFER_NUM_MAX,
            bitrate: 64_000,
            frame_rate: 15,
            gop_size: 15,
        }
    }
}

impl ComponentConfig {
    /// Bytes of one raw frame at the configured geometry.
    pub fn raw_frame_size(&self) -> usize {
        self.color_format
            .frame_size(self.width as usize, self.height as usize)
    }

    /// Default size for a compressed video buffer.
    pub fn compressed_frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 2
    }
}
