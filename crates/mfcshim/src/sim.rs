// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! In-memory engines.
//!
//! The simulated engines implement the engine traits without hardware so
//! whole components can run in tests and from the CLI. They model the
//! behaviour the buffer-process loop depends on: tags reported per
//! displayed frame, a configurable reorder delay, zero-length drain
//! executions, and injected failures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::wmv::bitmap_info_header;
use crate::codec::CodecKind;
use crate::config::ComponentConfig;
use crate::convert::tiled_plane_size;
use crate::engine::{
    AudioDecodeEngine, AudioStreamInfo, DecodeAccept, DecodeConfig, DecodeOutput, EncodeConfig,
    EncodeOutput, EncodeParams, FrameType, HardwareEngine, HeapSlot, InputSlot, OutputStatus,
    SlotId, StreamGeometry, VideoCodec, VideoDecodeEngine, VideoEncodeEngine,
};
use crate::port::CropRect;
use crate::Error;

/// Order in which the simulated decoder displays decoded frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayOrder {
    /// Frames are displayed in the order they were decoded
    #[default]
    Decode,
    /// Every pair of frames is displayed swapped (1, 0, 3, 2, ...)
    SwapPairs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimDecodeConfig {
    pub width: u32,
    pub height: u32,
    /// Frames held back before the first display
    pub display_delay: usize,
    pub order: DisplayOrder,
    pub fail_init: bool,
    /// Fail the n-th execution (1-based)
    pub fail_execute_at: Option<usize>,
}

impl Default for SimDecodeConfig {
    fn default() -> Self {
        Self {
            width: 176,
            height: 144,
            display_delay: 0,
            order: DisplayOrder::Decode,
            fail_init: false,
            fail_execute_at: None,
        }
    }
}

/// Counters shared between a simulated engine and its observers.
#[derive(Debug, Clone, Default)]
pub struct SimStats {
    executions: Arc<AtomicUsize>,
    submitted_bytes: Arc<AtomicUsize>,
    inits: Arc<AtomicUsize>,
}

impl SimStats {
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn submitted_bytes(&self) -> usize {
        self.submitted_bytes.load(Ordering::SeqCst)
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
struct Decoded {
    sequence: usize,
    tag: i32,
}

/// Simulated video decoder.
#[derive(Debug)]
pub struct SimVideoDecoder {
    config: SimDecodeConfig,
    stats: SimStats,
    allocated: usize,
    current: Option<(SlotId, usize)>,
    codec: Option<VideoCodec>,
    delay: usize,
    next_tag: i32,
    decoded: usize,
    pending: Vec<Decoded>,
    last: DecodeOutput,
    last_tag: i32,
    luma: Vec<u8>,
    chroma: Vec<u8>,
}

impl SimVideoDecoder {
    pub fn new(config: SimDecodeConfig) -> Self {
        let (w, h) = (config.width as usize, config.height as usize);
        Self {
            config,
            stats: SimStats::default(),
            allocated: 0,
            current: None,
            codec: None,
            delay: config.display_delay,
            next_tag: -1,
            decoded: 0,
            pending: Vec::new(),
            last: DecodeOutput {
                status: OutputStatus::Null,
                frame_type: FrameType::Unknown,
                width: config.width,
                height: config.height,
            },
            last_tag: -1,
            luma: vec![0; tiled_plane_size(w, h)],
            chroma: vec![0; tiled_plane_size(w, (h + 1) / 2)],
        }
    }

    pub fn stats(&self) -> SimStats {
        self.stats.clone()
    }

    fn display(&mut self, status: OutputStatus) {
        let pick = match self.config.order {
            DisplayOrder::Decode => self
                .pending
                .iter()
                .enumerate()
                .min_by_key(|(_, frame)| frame.sequence),
            DisplayOrder::SwapPairs => self
                .pending
                .iter()
                .enumerate()
                .min_by_key(|(_, frame)| frame.sequence ^ 1),
        }
        .map(|(index, _)| index);

        let Some(index) = pick else {
            self.set_output(OutputStatus::DisplayEnd, FrameType::Unknown, -1);
            return;
        };
        let frame = self.pending.remove(index);
        let frame_type = match (frame.sequence, self.config.order) {
            (0, _) => FrameType::I,
            (n, DisplayOrder::SwapPairs) if n % 2 == 0 => FrameType::B,
            _ => FrameType::P,
        };
        let fill = frame.tag as u8;
        self.luma.fill(fill);
        self.chroma.fill(fill.wrapping_add(0x80));
        self.set_output(status, frame_type, frame.tag);
    }

    fn set_output(&mut self, status: OutputStatus, frame_type: FrameType, tag: i32) {
        self.last = DecodeOutput {
            status,
            frame_type,
            width: self.config.width,
            height: self.config.height,
        };
        self.last_tag = tag;
    }
}

impl Default for SimVideoDecoder {
    fn default() -> Self {
        Self::new(SimDecodeConfig::default())
    }
}

impl HardwareEngine for SimVideoDecoder {
    fn alloc_input_slot(&mut self, size: usize) -> Result<Box<dyn InputSlot>, Error> {
        self.allocated += 1;
        Ok(Box::new(HeapSlot::new(self.allocated, size)))
    }

    fn set_in_buffer(&mut self, slot: SlotId, len: usize) -> Result<(), Error> {
        self.current = Some((slot, len));
        Ok(())
    }

    fn execute(&mut self, len: usize) -> Result<(), Error> {
        let count = self.stats.executions.fetch_add(1, Ordering::SeqCst) + 1;
        if self.config.fail_execute_at == Some(count) {
            return Err(Error::Hardware(format!("injected failure at execution {}", count)));
        }
        if self.codec.is_none() || self.current.is_none() {
            return Err(Error::Hardware("execute before init".into()));
        }
        self.stats.submitted_bytes.fetch_add(len, Ordering::SeqCst);

        if len > 0 {
            self.pending.push(Decoded {
                sequence: self.decoded,
                tag: self.next_tag,
            });
            self.decoded += 1;
            if self.pending.len() > self.delay {
                self.display(OutputStatus::DisplayDecoding);
            } else {
                self.set_output(OutputStatus::DecodingOnly, FrameType::Unknown, -1);
            }
        } else if self.pending.is_empty() {
            self.set_output(OutputStatus::DisplayEnd, FrameType::Unknown, -1);
        } else {
            self.display(OutputStatus::DisplayOnly);
        }
        Ok(())
    }
}

impl VideoDecodeEngine for SimVideoDecoder {
    fn init(&mut self, codec: VideoCodec, header_len: usize) -> Result<(), Error> {
        if self.config.fail_init {
            return Err(Error::Hardware("injected init failure".into()));
        }
        if header_len == 0 || self.current.is_none() {
            return Err(Error::BadParameter("no stream header staged".into()));
        }
        self.stats.inits.fetch_add(1, Ordering::SeqCst);
        self.codec = Some(codec);
        self.pending.clear();
        self.decoded = 0;
        Ok(())
    }

    fn geometry(&mut self) -> Result<StreamGeometry, Error> {
        let (width, height) = (self.config.width, self.config.height);
        Ok(StreamGeometry {
            width,
            height,
            buffer_width: (width + 15) & !15,
            buffer_height: (height + 15) & !15,
            crop: CropRect {
                left: 0,
                top: 0,
                width,
                height,
            },
        })
    }

    fn get_out_buffer(&mut self) -> Result<DecodeOutput, Error> {
        Ok(self.last)
    }

    fn planes(&self) -> (&[u8], &[u8]) {
        (&self.luma, &self.chroma)
    }

    fn set_config(&mut self, config: DecodeConfig) -> Result<(), Error> {
        match config {
            DecodeConfig::FrameTag(tag) => self.next_tag = tag,
            // A request caps the stream's own reorder depth.
            DecodeConfig::DisplayDelay(delay) => {
                self.delay = self.config.display_delay.min(delay as usize)
            }
            DecodeConfig::ExtraBufferNum(_) => {}
        }
        Ok(())
    }

    fn frame_tag(&mut self) -> Result<i32, Error> {
        Ok(self.last_tag)
    }

    fn close(&mut self) {
        self.codec = None;
        self.pending.clear();
    }
}

/// Simulated video encoder producing start-code framed dummy streams.
#[derive(Debug, Default)]
pub struct SimVideoEncoder {
    params: Option<EncodeParams>,
    stats: SimStats,
    allocated: usize,
    current: Option<SlotId>,
    frames: usize,
    force_key: bool,
    next_tag: i32,
    last: Option<EncodeOutput>,
    last_tag: i32,
    stream: Vec<u8>,
}

impl SimVideoEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> SimStats {
        self.stats.clone()
    }

    /// Bitrate the engine currently encodes at.
    pub fn bitrate(&self) -> u32 {
        self.params.map_or(0, |params| params.bitrate)
    }

    pub fn frame_rate(&self) -> u32 {
        self.params.map_or(0, |params| params.frame_rate)
    }

    fn params(&self) -> Result<EncodeParams, Error> {
        self.params
            .ok_or_else(|| Error::Hardware("encoder not initialised".into()))
    }
}

impl HardwareEngine for SimVideoEncoder {
    fn alloc_input_slot(&mut self, size: usize) -> Result<Box<dyn InputSlot>, Error> {
        self.allocated += 1;
        Ok(Box::new(HeapSlot::new(self.allocated, size)))
    }

    fn set_in_buffer(&mut self, slot: SlotId, _len: usize) -> Result<(), Error> {
        self.current = Some(slot);
        Ok(())
    }

    fn execute(&mut self, len: usize) -> Result<(), Error> {
        let params = self.params()?;
        if self.current.is_none() {
            return Err(Error::Hardware("execute without input".into()));
        }
        self.stats.executions.fetch_add(1, Ordering::SeqCst);
        self.stats.submitted_bytes.fetch_add(len, Ordering::SeqCst);

        let gop = params.gop_size.max(1) as usize;
        let frame_type = if std::mem::take(&mut self.force_key) || self.frames % gop == 0 {
            FrameType::I
        } else {
            FrameType::P
        };
        let payload = match frame_type {
            FrameType::I => 64,
            _ => 16,
        };
        self.stream.clear();
        self.stream.extend_from_slice(&[0, 0, 1, 0xB6]);
        self.stream
            .extend(std::iter::repeat(self.frames as u8).take(payload));
        self.last = Some(EncodeOutput {
            frame_type,
            len: self.stream.len(),
        });
        self.last_tag = self.next_tag;
        self.frames += 1;
        Ok(())
    }
}

impl VideoEncodeEngine for SimVideoEncoder {
    fn init(&mut self, params: &EncodeParams) -> Result<(), Error> {
        if params.width == 0 || params.height == 0 || params.bitrate == 0 {
            return Err(Error::BadParameter(format!("invalid encode parameters {:?}", params)));
        }
        self.stats.inits.fetch_add(1, Ordering::SeqCst);
        self.params = Some(*params);
        self.frames = 0;
        self.last = None;
        Ok(())
    }

    fn stream_header(&mut self) -> Result<Vec<u8>, Error> {
        let params = self.params()?;
        let header = match params.codec {
            VideoCodec::H264 => vec![0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1E, 0, 0, 0, 1, 0x68, 0xCE],
            VideoCodec::Mpeg4 => vec![0, 0, 1, 0xB0, 0x01, 0, 0, 1, 0xB5, 0x09, 0, 0, 1, 0x20],
            VideoCodec::H263 | VideoCodec::Vp8 | VideoCodec::Vc1 | VideoCodec::Wmv3 => {
                vec![0, 0, 0x80, 0x02]
            }
        };
        Ok(header)
    }

    fn get_out_buffer(&mut self) -> Result<EncodeOutput, Error> {
        self.last
            .ok_or_else(|| Error::Hardware("no encoded frame".into()))
    }

    fn stream(&self) -> &[u8] {
        &self.stream
    }

    fn set_config(&mut self, config: EncodeConfig) -> Result<(), Error> {
        match config {
            EncodeConfig::FrameTag(tag) => self.next_tag = tag,
            EncodeConfig::Bitrate(bitrate) => {
                if let Some(params) = self.params.as_mut() {
                    params.bitrate = bitrate;
                }
            }
            EncodeConfig::FrameRate(frame_rate) => {
                if let Some(params) = self.params.as_mut() {
                    params.frame_rate = frame_rate;
                }
            }
            EncodeConfig::ForceKeyFrame => self.force_key = true,
        }
        Ok(())
    }

    fn frame_tag(&mut self) -> Result<i32, Error> {
        Ok(self.last_tag)
    }

    fn close(&mut self) {
        self.params = None;
    }
}

/// Samples per MP3 frame.
const MP3_FRAME_SAMPLES: usize = 1152;

/// Simulated blocking MP3 decoder.
#[derive(Debug)]
pub struct SimAudioDecoder {
    info: AudioStreamInfo,
    stop_delay: usize,
    overflow_every: Option<usize>,
    calls: usize,
    accepted: usize,
    pcm: Vec<u8>,
    eos: bool,
    stop_queries: usize,
}

impl SimAudioDecoder {
    pub fn new(channels: u32, sample_rate: u32) -> Self {
        Self {
            info: AudioStreamInfo {
                channels,
                sample_rate,
            },
            stop_delay: 0,
            overflow_every: None,
            calls: 0,
            accepted: 0,
            pcm: Vec::new(),
            eos: false,
            stop_queries: 0,
        }
    }

    /// Answer `is_stopped` with false this many times once PCM is drained.
    pub fn with_stop_delay(mut self, queries: usize) -> Self {
        self.stop_delay = queries;
        self
    }

    /// Report a full input buffer on every n-th decode call.
    pub fn with_overflow_every(mut self, calls: usize) -> Self {
        self.overflow_every = Some(calls.max(1));
        self
    }

    fn frame_bytes(&self) -> usize {
        MP3_FRAME_SAMPLES * self.info.channels as usize * 2
    }
}

impl Default for SimAudioDecoder {
    fn default() -> Self {
        Self::new(2, 44100)
    }
}

impl AudioDecodeEngine for SimAudioDecoder {
    fn init(&mut self) -> Result<(), Error> {
        self.calls = 0;
        self.accepted = 0;
        self.pcm.clear();
        self.eos = false;
        self.stop_queries = 0;
        Ok(())
    }

    fn decode(&mut self, data: &[u8]) -> Result<DecodeAccept, Error> {
        self.calls += 1;
        if self
            .overflow_every
            .map_or(false, |every| self.calls % every == 0)
        {
            return Ok(DecodeAccept::InputOverflow);
        }
        if !data.is_empty() {
            self.accepted += 1;
            let fill = self.accepted as u8;
            let bytes = self.frame_bytes();
            self.pcm.extend(std::iter::repeat(fill).take(bytes));
        }
        Ok(DecodeAccept::Accepted)
    }

    fn send_eos(&mut self) -> Result<(), Error> {
        self.eos = true;
        Ok(())
    }

    fn stream_info(&mut self) -> Result<AudioStreamInfo, Error> {
        if self.accepted == 0 {
            return Ok(AudioStreamInfo::default());
        }
        Ok(self.info)
    }

    fn read_pcm(&mut self, out: &mut Vec<u8>) -> Result<usize, Error> {
        let len = self.frame_bytes().min(self.pcm.len());
        out.extend(self.pcm.drain(..len));
        Ok(len)
    }

    fn is_stopped(&mut self) -> Result<bool, Error> {
        if !self.eos || !self.pcm.is_empty() {
            return Ok(false);
        }
        self.stop_queries += 1;
        Ok(self.stop_queries > self.stop_delay)
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.pcm.clear();
        self.eos = false;
        self.stop_queries = 0;
        Ok(())
    }
}

/// Synthetic input frame `index` for a component of `kind`.
///
/// Compressed frames carry the start codes the frame boundary checks look
/// for; the first frame of a video stream includes the stream header. Raw
/// frames for encoders are `raw_frame_size` bytes filled with the index.
pub fn sample_frame(kind: CodecKind, index: usize, config: &ComponentConfig) -> Vec<u8> {
    let fill = index as u8;
    let mut frame = match kind {
        CodecKind::H264Dec => {
            let mut frame = Vec::new();
            if index == 0 {
                frame.extend_from_slice(&[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1E]);
                frame.extend_from_slice(&[0, 0, 0, 1, 0x68, 0xCE, 0x38, 0x80]);
                frame.extend_from_slice(&[0, 0, 0, 1, 0x65, 0x88, 0x84]);
            } else {
                frame.extend_from_slice(&[0, 0, 0, 1, 0x41, 0x9A]);
            }
            frame
        }
        CodecKind::Mpeg4Dec => {
            let mut frame = Vec::new();
            if index == 0 {
                frame.extend_from_slice(&[0, 0, 1, 0xB0, 0x01, 0, 0, 1, 0xB5, 0x09]);
            }
            frame.extend_from_slice(&[0, 0, 1, 0xB6, if index == 0 { 0x10 } else { 0x50 }]);
            frame
        }
        CodecKind::H263Dec => vec![0, 0, 0x80, 0x02, if index == 0 { 0x0A } else { 0x0E }],
        CodecKind::Vp8Dec => {
            if index == 0 {
                vec![0x10, 0x02, 0x00, 0x9D, 0x01, 0x2A, 0xB0, 0x00, 0x90, 0x00]
            } else {
                vec![0x11, 0x02, 0x00]
            }
        }
        CodecKind::Vc1Dec => {
            if index == 0 {
                return bitmap_info_header(b"WMV3", config.width, config.height, &[]);
            }
            vec![0x12, fill]
        }
        CodecKind::Mp3Dec => vec![0xFF, 0xFB, 0x90, 0x64],
        CodecKind::Mpeg4Enc | CodecKind::H263Enc | CodecKind::H264Enc => {
            return vec![fill; config.raw_frame_size()];
        }
    };
    let body = if kind.is_audio() { 413 } else { 64 };
    frame.extend(std::iter::repeat(fill | 0x01).take(body));
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(config: SimDecodeConfig) -> SimVideoDecoder {
        let mut sim = SimVideoDecoder::new(config);
        let slot = sim.alloc_input_slot(64).unwrap();
        sim.set_in_buffer(slot.id(), 8).unwrap();
        sim.init(VideoCodec::H264, 8).unwrap();
        sim
    }

    fn run(sim: &mut SimVideoDecoder, tag: i32, len: usize) -> (OutputStatus, i32) {
        sim.set_config(DecodeConfig::FrameTag(tag)).unwrap();
        sim.execute(len).unwrap();
        let out = sim.get_out_buffer().unwrap();
        (out.status, sim.frame_tag().unwrap())
    }

    #[test]
    fn test_swapped_pairs() {
        let mut sim = decoder(SimDecodeConfig {
            display_delay: 1,
            order: DisplayOrder::SwapPairs,
            ..Default::default()
        });
        let shown: Vec<i32> = (0..6)
            .map(|tag| run(&mut sim, tag, 10))
            .filter(|(status, _)| status.has_display())
            .map(|(_, tag)| tag)
            .collect();
        assert_eq!(shown, vec![1, 0, 3, 2, 5]);
        assert_eq!(run(&mut sim, -1, 0), (OutputStatus::DisplayOnly, 4));
        assert_eq!(run(&mut sim, -1, 0).0, OutputStatus::DisplayEnd);
    }

    #[test]
    fn test_display_delay_capped_by_request() {
        let mut sim = decoder(SimDecodeConfig {
            display_delay: 3,
            ..Default::default()
        });
        sim.set_config(DecodeConfig::DisplayDelay(0)).unwrap();
        assert_eq!(run(&mut sim, 0, 10), (OutputStatus::DisplayDecoding, 0));
    }

    #[test]
    fn test_injected_execute_failure() {
        let mut sim = decoder(SimDecodeConfig {
            fail_execute_at: Some(2),
            ..Default::default()
        });
        assert!(sim.execute(4).is_ok());
        assert!(matches!(sim.execute(4), Err(Error::Hardware(_))));
        assert_eq!(sim.stats().executions(), 2);
    }

    #[test]
    fn test_planes_carry_tag() {
        let mut sim = decoder(SimDecodeConfig::default());
        run(&mut sim, 9, 10);
        let (luma, _) = sim.planes();
        assert!(luma.iter().all(|&b| b == 9));
    }

    #[test]
    fn test_encoder_gop() {
        let mut enc = SimVideoEncoder::new();
        enc.init(&EncodeParams {
            codec: VideoCodec::H263,
            width: 64,
            height: 32,
            bitrate: 1000,
            frame_rate: 30,
            gop_size: 3,
        })
        .unwrap();
        let slot = enc.alloc_input_slot(16).unwrap();
        enc.set_in_buffer(slot.id(), 16).unwrap();
        let types: Vec<FrameType> = (0..4)
            .map(|_| {
                enc.execute(16).unwrap();
                enc.get_out_buffer().unwrap().frame_type
            })
            .collect();
        assert_eq!(types, vec![FrameType::I, FrameType::P, FrameType::P, FrameType::I]);
    }

    #[test]
    fn test_audio_stream_info_after_first_frame() {
        let mut mp3 = SimAudioDecoder::new(2, 48000);
        mp3.init().unwrap();
        assert!(!mp3.stream_info().unwrap().is_known());
        mp3.decode(&[1, 2, 3]).unwrap();
        assert_eq!(mp3.stream_info().unwrap().sample_rate, 48000);
        let mut pcm = Vec::new();
        assert_eq!(mp3.read_pcm(&mut pcm).unwrap(), 1152 * 4);
    }

    #[test]
    fn test_sample_frames_start_frames() {
        use crate::codec::frame::{find_frame_end, is_frame_start};

        let config = ComponentConfig::default();
        for kind in [
            CodecKind::H264Dec,
            CodecKind::Mpeg4Dec,
            CodecKind::H263Dec,
            CodecKind::Vp8Dec,
            CodecKind::Vc1Dec,
            CodecKind::Mp3Dec,
        ] {
            for index in 0..3 {
                let frame = sample_frame(kind, index, &config);
                assert!(is_frame_start(kind.split(), &frame), "{:?} #{}", kind, index);
                assert_eq!(find_frame_end(kind.split(), &frame), None, "{:?} #{}", kind, index);
            }
        }
        assert_eq!(
            sample_frame(CodecKind::H263Enc, 2, &config).len(),
            config.raw_frame_size()
        );
    }
}
