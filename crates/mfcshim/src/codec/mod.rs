// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Codec-specific single-frame steps.
//!
//! The buffer-process loop is the same for every component; what differs
//! is how one frame moves through the engine. Each codec implements
//! [`CodecStep`] and [`create`] picks the implementation for a
//! [`CodecKind`] once, at component construction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::buffer::{BufferFlags, Mark};
use crate::config::{
    ComponentConfig, AUDIO_INPUT_BUFFER_NUM, AUDIO_OUTPUT_BUFFER_NUM,
    DEFAULT_AUDIO_INPUT_BUFFER_SIZE, DEFAULT_AUDIO_OUTPUT_BUFFER_SIZE, VIDEO_INPUT_BUFFER_NUM,
    VIDEO_OUTPUT_BUFFER_NUM,
};
use crate::engine::{EngineHandle, VideoCodec};
use crate::pool::MAX_BUFFER_NUM;
use crate::port::{AudioFormat, CropRect, PortDefinition, PortFormat, PortIndex, VideoFormat};
use crate::Error;

pub mod audio_dec;
pub mod frame;
pub mod video_dec;
pub mod video_enc;
pub mod wmv;

use frame::FrameSplit;

/// Every component this crate can instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecKind {
    H264Dec,
    Mpeg4Dec,
    H263Dec,
    Vp8Dec,
    Vc1Dec,
    Mp3Dec,
    Mpeg4Enc,
    H263Enc,
    H264Enc,
}

impl CodecKind {
    pub fn all() -> &'static [CodecKind] {
        &[
            CodecKind::H264Dec,
            CodecKind::Mpeg4Dec,
            CodecKind::H263Dec,
            CodecKind::Vp8Dec,
            CodecKind::Vc1Dec,
            CodecKind::Mp3Dec,
            CodecKind::Mpeg4Enc,
            CodecKind::H263Enc,
            CodecKind::H264Enc,
        ]
    }

    /// Registered component name.
    pub fn name(self) -> &'static str {
        match self {
            CodecKind::H264Dec => "OMX.SEC.AVC.Decoder",
            CodecKind::Mpeg4Dec => "OMX.SEC.MPEG4.Decoder",
            CodecKind::H263Dec => "OMX.SEC.H263.Decoder",
            CodecKind::Vp8Dec => "OMX.SEC.VP8.Decoder",
            CodecKind::Vc1Dec => "OMX.SEC.WMV.Decoder",
            CodecKind::Mp3Dec => "OMX.SEC.MP3.Decoder",
            CodecKind::Mpeg4Enc => "OMX.SEC.MPEG4.Encoder",
            CodecKind::H263Enc => "OMX.SEC.H263.Encoder",
            CodecKind::H264Enc => "OMX.SEC.AVC.Encoder",
        }
    }

    pub fn role(self) -> &'static str {
        match self {
            CodecKind::H264Dec => "video_decoder.avc",
            CodecKind::Mpeg4Dec => "video_decoder.mpeg4",
            CodecKind::H263Dec => "video_decoder.h263",
            CodecKind::Vp8Dec => "video_decoder.vpx",
            CodecKind::Vc1Dec => "video_decoder.wmv",
            CodecKind::Mp3Dec => "audio_decoder.mp3",
            CodecKind::Mpeg4Enc => "video_encoder.mpeg4",
            CodecKind::H263Enc => "video_encoder.h263",
            CodecKind::H264Enc => "video_encoder.avc",
        }
    }

    /// Look a kind up by component name.
    pub fn from_name(name: &str) -> Option<CodecKind> {
        Self::all().iter().copied().find(|kind| kind.name() == name)
    }

    pub fn is_encoder(self) -> bool {
        matches!(
            self,
            CodecKind::Mpeg4Enc | CodecKind::H263Enc | CodecKind::H264Enc
        )
    }

    pub fn is_audio(self) -> bool {
        self == CodecKind::Mp3Dec
    }

    pub fn video_codec(self) -> Option<VideoCodec> {
        match self {
            CodecKind::H264Dec | CodecKind::H264Enc => Some(VideoCodec::H264),
            CodecKind::Mpeg4Dec | CodecKind::Mpeg4Enc => Some(VideoCodec::Mpeg4),
            CodecKind::H263Dec | CodecKind::H263Enc => Some(VideoCodec::H263),
            CodecKind::Vp8Dec => Some(VideoCodec::Vp8),
            // the stream header picks VC-1 or WMV3
            CodecKind::Vc1Dec => Some(VideoCodec::Vc1),
            CodecKind::Mp3Dec => None,
        }
    }

    /// How input bytes are cut into frames.
    pub fn split(self) -> FrameSplit {
        match self {
            CodecKind::H264Dec => FrameSplit::H264,
            CodecKind::Mpeg4Dec => FrameSplit::Mpeg4,
            CodecKind::H263Dec => FrameSplit::H263,
            _ => FrameSplit::WholeBuffer,
        }
    }

    /// Initial definitions of the input and output ports.
    pub fn port_definitions(self, config: &ComponentConfig) -> [PortDefinition; 2] {
        let (width, height) = (config.width, config.height);
        let compressed = PortFormat::Video(VideoFormat::compressed(width, height));
        let raw = PortFormat::Video(VideoFormat::raw(width, height, config.color_format));

        let (input, output) = if self.is_audio() {
            let format = PortFormat::Audio(AudioFormat {
                channels: 2,
                sample_rate: 44100,
                bits_per_sample: 16,
            });
            (
                (AUDIO_INPUT_BUFFER_NUM, DEFAULT_AUDIO_INPUT_BUFFER_SIZE, format),
                (AUDIO_OUTPUT_BUFFER_NUM, DEFAULT_AUDIO_OUTPUT_BUFFER_SIZE, format),
            )
        } else if self.is_encoder() {
            (
                (VIDEO_INPUT_BUFFER_NUM, config.raw_frame_size(), raw),
                (VIDEO_OUTPUT_BUFFER_NUM, config.compressed_frame_size(), compressed),
            )
        } else {
            (
                (VIDEO_INPUT_BUFFER_NUM, config.compressed_frame_size(), compressed),
                (VIDEO_OUTPUT_BUFFER_NUM, config.raw_frame_size(), raw),
            )
        };

        [
            port_definition(
                PortIndex::Input,
                input,
                config.input_buffer_count,
                config.input_buffer_size,
            ),
            port_definition(
                PortIndex::Output,
                output,
                config.output_buffer_count,
                config.output_buffer_size,
            ),
        ]
    }
}

fn port_definition(
    index: PortIndex,
    (count, size, format): (usize, usize, PortFormat),
    count_override: Option<usize>,
    size_override: Option<usize>,
) -> PortDefinition {
    let count = match count_override {
        Some(requested) if requested > MAX_BUFFER_NUM => {
            log::warn!(
                "{:?} port limited to {} buffers, {} requested",
                index,
                MAX_BUFFER_NUM,
                requested
            );
            MAX_BUFFER_NUM
        }
        Some(requested) => requested.max(1),
        None => count,
    };
    PortDefinition {
        index,
        enabled: true,
        populated: false,
        buffer_count_actual: count,
        buffer_count_min: count,
        buffer_size: size_override.unwrap_or(size),
        format,
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CodecKind {
    type Err = Error;

    /// Accepts a component name or a short codec name (`h264dec`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(kind) = Self::from_name(s) {
            return Ok(kind);
        }
        match s.to_ascii_lowercase().as_str() {
            "h264dec" | "avcdec" => Ok(CodecKind::H264Dec),
            "mpeg4dec" => Ok(CodecKind::Mpeg4Dec),
            "h263dec" => Ok(CodecKind::H263Dec),
            "vp8dec" => Ok(CodecKind::Vp8Dec),
            "vc1dec" | "wmvdec" => Ok(CodecKind::Vc1Dec),
            "mp3dec" => Ok(CodecKind::Mp3Dec),
            "mpeg4enc" => Ok(CodecKind::Mpeg4Enc),
            "h263enc" => Ok(CodecKind::H263Enc),
            "h264enc" | "avcenc" => Ok(CodecKind::H264Enc),
            _ => Err(Error::BadParameter(format!("unknown codec '{}'", s))),
        }
    }
}

/// Frame staged from input buffers for one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputRecord {
    pub data: Vec<u8>,
    pub timestamp: i64,
    pub flags: BufferFlags,
    pub mark: Option<Mark>,
}

impl InputRecord {
    pub fn is_eos(&self) -> bool {
        self.flags.contains(BufferFlags::EOS)
    }

    pub fn reset(&mut self) {
        self.data.clear();
        self.timestamp = 0;
        self.flags = BufferFlags::NONE;
        self.mark = None;
    }
}

/// Result a step leaves for the host-facing output buffer.
///
/// An output record is delivered when it holds data or carries EOS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputRecord {
    pub data: Vec<u8>,
    pub timestamp: i64,
    pub flags: BufferFlags,
    pub mark: Option<Mark>,
}

impl OutputRecord {
    pub fn is_ready(&self) -> bool {
        !self.data.is_empty() || self.flags.contains(BufferFlags::EOS)
    }

    pub fn reset(&mut self) {
        self.data.clear();
        self.timestamp = 0;
        self.flags = BufferFlags::NONE;
        self.mark = None;
    }
}

/// Outcome of one codec step.
#[derive(Debug)]
pub enum StepResult {
    /// The input record was consumed; the output record may hold a frame.
    Done,
    /// Keep the input record and feed it again on the next step.
    ///
    /// The output record may still hold a frame (a delayed display or a
    /// frame drained after end of stream).
    NeedMoreInput,
    /// The engine failed; reported to the host as an error event.
    Fatal(Error),
}

/// Port requirements after the stream header was parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub format: PortFormat,
    pub buffer_size: usize,
    pub crop: CropRect,
}

/// Encoder parameters a host may change while executing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicConfig {
    pub bitrate: Option<u32>,
    pub frame_rate: Option<u32>,
    pub force_key_frame: bool,
}

/// One codec's part of the buffer-process loop.
pub trait CodecStep: Send {
    fn kind(&self) -> CodecKind;

    /// Acquire engine resources; called on the Loaded to Idle transition.
    fn init(&mut self) -> Result<(), Error>;

    /// Release engine resources; called on the Idle to Loaded transition.
    fn terminate(&mut self);

    /// Move one frame through the engine.
    fn step(&mut self, input: &InputRecord, output: &mut OutputRecord) -> StepResult;

    /// Drop in-flight state for a flushed port.
    fn flush(&mut self, port: PortIndex);

    /// New output port settings produced by the last step, if any.
    fn take_settings_change(&mut self) -> Option<StreamSettings> {
        None
    }

    fn set_config(&mut self, config: DynamicConfig) -> Result<(), Error> {
        let _ = config;
        Err(Error::BadParameter(format!(
            "{} has no dynamic configuration",
            self.kind()
        )))
    }

    /// Largest frame the engine accepts in one step.
    fn max_frame_size(&self) -> usize {
        usize::MAX
    }

    /// The engine may still display frames staged before a flush.
    fn holds_frames(&self) -> bool {
        false
    }
}

/// Build the step for `kind` on `engine`.
///
/// # Errors
///
/// Returns [`Error::BadParameter`] if the engine handle does not match
/// the codec kind.
pub fn create(
    kind: CodecKind,
    engine: EngineHandle,
    config: &ComponentConfig,
) -> Result<Box<dyn CodecStep>, Error> {
    match (kind.video_codec(), kind.is_encoder(), engine) {
        (Some(codec), false, EngineHandle::VideoDecoder(engine)) => Ok(Box::new(
            video_dec::VideoDecoder::new(kind, codec, engine, config.clone()),
        )),
        (Some(codec), true, EngineHandle::VideoEncoder(engine)) => Ok(Box::new(
            video_enc::VideoEncoder::new(kind, codec, engine, config.clone()),
        )),
        (None, false, EngineHandle::AudioDecoder(engine)) => {
            Ok(Box::new(audio_dec::AudioDecoder::new(kind, engine)))
        }
        (_, _, engine) => Err(Error::BadParameter(format!(
            "{} cannot run on a {} engine",
            kind,
            engine.kind_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimAudioDecoder, SimVideoDecoder};

    #[test]
    fn test_registry_names() {
        assert_eq!(CodecKind::all().len(), 9);
        for kind in CodecKind::all() {
            assert_eq!(CodecKind::from_name(kind.name()), Some(*kind));
        }
        assert_eq!(CodecKind::H264Dec.role(), "video_decoder.avc");
        assert_eq!(
            CodecKind::from_name("OMX.SEC.WMV.Decoder"),
            Some(CodecKind::Vc1Dec)
        );
        assert_eq!(CodecKind::Vc1Dec.role(), "video_decoder.wmv");
        assert_eq!(CodecKind::Vc1Dec.split(), FrameSplit::WholeBuffer);
        assert_eq!("wmvdec".parse::<CodecKind>().unwrap(), CodecKind::Vc1Dec);
        assert_eq!(CodecKind::from_name("OMX.SEC.WMA.Decoder"), None);
    }

    #[test]
    fn test_parse_short_names() {
        assert_eq!("h264dec".parse::<CodecKind>().unwrap(), CodecKind::H264Dec);
        assert_eq!(
            "OMX.SEC.MP3.Decoder".parse::<CodecKind>().unwrap(),
            CodecKind::Mp3Dec
        );
        assert!("foo".parse::<CodecKind>().is_err());
    }

    #[test]
    fn test_port_definitions() {
        let config = ComponentConfig::default();
        let [input, output] = CodecKind::H264Dec.port_definitions(&config);
        assert_eq!(input.buffer_count_actual, 5);
        assert_eq!(output.buffer_count_actual, 2);
        assert_eq!(input.buffer_size, 176 * 144 * 2);
        assert_eq!(output.buffer_size, 176 * 144 * 3 / 2);

        let [input, _] = CodecKind::Mp3Dec.port_definitions(&config);
        assert_eq!(input.buffer_count_actual, 2);
        assert!(matches!(input.format, PortFormat::Audio(_)));
    }

    #[test]
    fn test_buffer_count_override_is_capped() {
        let config = ComponentConfig {
            input_buffer_count: Some(MAX_BUFFER_NUM + 10),
            output_buffer_count: Some(12),
            ..Default::default()
        };
        let [input, output] = CodecKind::Mpeg4Dec.port_definitions(&config);
        assert_eq!(input.buffer_count_actual, MAX_BUFFER_NUM);
        assert_eq!(output.buffer_count_actual, 12);
    }

    #[test]
    fn test_create_rejects_mismatched_engine() {
        let config = ComponentConfig::default();
        let audio = EngineHandle::audio_decoder(SimAudioDecoder::default());
        assert!(matches!(
            create(CodecKind::H264Dec, audio, &config),
            Err(Error::BadParameter(_))
        ));

        let video = EngineHandle::video_decoder(SimVideoDecoder::new(Default::default()));
        let step = create(CodecKind::Vp8Dec, video, &config).unwrap();
        assert_eq!(step.kind(), CodecKind::Vp8Dec);
    }
}
