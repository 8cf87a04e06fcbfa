// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Hardware engine collaborator interfaces.
//!
//! The codec steps never call vendor code directly. They drive one of the
//! engine traits below, implemented by [`crate::mfc`] on top of the vendor
//! library and by [`crate::sim`] in memory. Engines are shared behind an
//! `Arc<Mutex<..>>`; holding the lock serializes hardware calls, since the
//! hardware has no internal reentrancy.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::port::CropRect;
use crate::Error;

/// Engine-defined handle naming an input slot.
pub type SlotId = usize;

/// Hardware-visible input memory obtained from an engine.
pub trait InputSlot: Send {
    fn id(&self) -> SlotId;

    fn as_mut_slice(&mut self) -> &mut [u8];

    fn capacity(&mut self) -> usize {
        self.as_mut_slice().len()
    }
}

/// Heap-backed slot for engines without dedicated hardware memory.
#[derive(Debug)]
pub struct HeapSlot {
    id: SlotId,
    memory: Vec<u8>,
}

impl HeapSlot {
    pub fn new(id: SlotId, size: usize) -> Self {
        Self {
            id,
            memory: vec![0; size],
        }
    }
}

impl InputSlot for HeapSlot {
    fn id(&self) -> SlotId {
        self.id
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.memory
    }
}

/// Calls shared by every engine that consumes staged input slots.
pub trait HardwareEngine: Send {
    /// Allocate one hardware input slot of `size` bytes.
    fn alloc_input_slot(&mut self, size: usize) -> Result<Box<dyn InputSlot>, Error>;

    /// Point the engine at `slot` holding `len` staged bytes.
    fn set_in_buffer(&mut self, slot: SlotId, len: usize) -> Result<(), Error>;

    /// Run the engine on the last input set with `set_in_buffer`.
    fn execute(&mut self, len: usize) -> Result<(), Error>;
}

/// Compressed video format handed to the engine at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
    Mpeg4,
    H263,
    Vp8,
    /// VC-1 advanced profile
    Vc1,
    /// WMV3 (VC-1 simple/main) in RCV framing
    Wmv3,
}

/// State of the decoder's output after an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    /// Nothing decoded, nothing to display
    Null,
    /// Input decoded into the reorder pipeline, nothing to display yet
    DecodingOnly,
    /// Input decoded and a frame is ready for display
    DisplayDecoding,
    /// A delayed frame is ready for display, the input was not consumed
    DisplayOnly,
    /// The pipeline is empty
    DisplayEnd,
}

impl OutputStatus {
    pub fn has_display(self) -> bool {
        matches!(self, OutputStatus::DisplayDecoding | OutputStatus::DisplayOnly)
    }
}

/// Picture coding type reported by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    #[default]
    Unknown,
    I,
    P,
    B,
    Skipped,
    Other,
}

/// Picture geometry reported after stream init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamGeometry {
    pub width: u32,
    pub height: u32,
    /// Decoded buffer size, padded to the hardware alignment
    pub buffer_width: u32,
    pub buffer_height: u32,
    pub crop: CropRect,
}

/// Result of `VideoDecodeEngine::get_out_buffer`.
///
/// The planes themselves are read through `VideoDecodeEngine::planes`
/// while the engine lock is still held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOutput {
    pub status: OutputStatus,
    pub frame_type: FrameType,
    pub width: u32,
    pub height: u32,
}

/// Decoder parameters set before or during decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeConfig {
    /// Tag the engine reports back for the next submitted frame
    FrameTag(i32),
    /// Number of frames the engine may hold for reordering
    DisplayDelay(u32),
    /// Additional decoded picture buffers
    ExtraBufferNum(u32),
}

pub trait VideoDecodeEngine: HardwareEngine {
    /// Parse the stream header of `header_len` bytes in the current slot.
    fn init(&mut self, codec: VideoCodec, header_len: usize) -> Result<(), Error>;

    fn geometry(&mut self) -> Result<StreamGeometry, Error>;

    fn get_out_buffer(&mut self) -> Result<DecodeOutput, Error>;

    /// Luma and chroma planes (native tiled layout) of the last output.
    fn planes(&self) -> (&[u8], &[u8]);

    fn set_config(&mut self, config: DecodeConfig) -> Result<(), Error>;

    /// Tag of the frame returned by the last `get_out_buffer`.
    fn frame_tag(&mut self) -> Result<i32, Error>;

    fn close(&mut self) {}
}

/// Encoder stream parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeParams {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    pub frame_rate: u32,
    /// Number of frames between intra frames
    pub gop_size: u32,
}

/// Encoder parameters that can change between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeConfig {
    FrameTag(i32),
    Bitrate(u32),
    FrameRate(u32),
    ForceKeyFrame,
}

/// Result of `VideoEncodeEngine::get_out_buffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOutput {
    pub frame_type: FrameType,
    pub len: usize,
}

pub trait VideoEncodeEngine: HardwareEngine {
    fn init(&mut self, params: &EncodeParams) -> Result<(), Error>;

    /// Stream header produced by init.
    fn stream_header(&mut self) -> Result<Vec<u8>, Error>;

    fn get_out_buffer(&mut self) -> Result<EncodeOutput, Error>;

    /// Encoded bytes of the last output.
    fn stream(&self) -> &[u8];

    fn set_config(&mut self, config: EncodeConfig) -> Result<(), Error>;

    fn frame_tag(&mut self) -> Result<i32, Error>;

    fn close(&mut self) {}
}

/// Whether the audio engine accepted the submitted bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeAccept {
    Accepted,
    /// Input buffer full, submit the same bytes again later
    InputOverflow,
}

/// Stream parameters known once the audio engine has parsed a frame.
///
/// Zero values mean the engine has not seen enough data yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStreamInfo {
    pub channels: u32,
    pub sample_rate: u32,
}

impl AudioStreamInfo {
    pub fn is_known(self) -> bool {
        self.channels != 0 && self.sample_rate != 0
    }
}

/// Blocking audio decoder.
pub trait AudioDecodeEngine: Send {
    fn init(&mut self) -> Result<(), Error>;

    fn decode(&mut self, data: &[u8]) -> Result<DecodeAccept, Error>;

    /// Tell the engine no more input follows.
    fn send_eos(&mut self) -> Result<(), Error>;

    fn stream_info(&mut self) -> Result<AudioStreamInfo, Error>;

    /// Append decoded PCM to `out`, returning the number of bytes added.
    fn read_pcm(&mut self, out: &mut Vec<u8>) -> Result<usize, Error>;

    /// True once every PCM sample after `send_eos` has been read.
    fn is_stopped(&mut self) -> Result<bool, Error>;

    fn flush(&mut self) -> Result<(), Error>;

    fn close(&mut self) {}
}

pub type SharedVideoDecoder = Arc<Mutex<dyn VideoDecodeEngine>>;
pub type SharedVideoEncoder = Arc<Mutex<dyn VideoEncodeEngine>>;
pub type SharedAudioDecoder = Arc<Mutex<dyn AudioDecodeEngine>>;

/// Explicit engine handle owned by one component.
#[derive(Clone)]
pub enum EngineHandle {
    VideoDecoder(SharedVideoDecoder),
    VideoEncoder(SharedVideoEncoder),
    AudioDecoder(SharedAudioDecoder),
}

impl EngineHandle {
    pub fn video_decoder<E: VideoDecodeEngine + 'static>(engine: E) -> Self {
        EngineHandle::VideoDecoder(Arc::new(Mutex::new(engine)))
    }

    pub fn video_encoder<E: VideoEncodeEngine + 'static>(engine: E) -> Self {
        EngineHandle::VideoEncoder(Arc::new(Mutex::new(engine)))
    }

    pub fn audio_decoder<E: AudioDecodeEngine + 'static>(engine: E) -> Self {
        EngineHandle::AudioDecoder(Arc::new(Mutex::new(engine)))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            EngineHandle::VideoDecoder(_) => "video decoder",
            EngineHandle::VideoEncoder(_) => "video encoder",
            EngineHandle::AudioDecoder(_) => "audio decoder",
        }
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EngineHandle({})", self.kind_name())
    }
}
