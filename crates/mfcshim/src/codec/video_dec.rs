// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Video decoder step shared by the H.264, MPEG-4, H.263, VP8 and WMV
//! components.
//!
//! Each step stages the incoming frame into the free hardware slot,
//! collects the execution started by the previous step, then submits the
//! new frame. Decoded pictures therefore leave one step after their input,
//! plus whatever display delay the engine adds for reordering.

use std::sync::Arc;

use crate::buffer::BufferFlags;
use crate::codec::frame::{self, FrameSplit};
use crate::codec::wmv::{self, WmvFormat};
use crate::codec::{CodecKind, CodecStep, InputRecord, OutputRecord, StepResult, StreamSettings};
use crate::config::ComponentConfig;
use crate::convert::{ColorConverter, SoftwareConverter};
use crate::engine::{
    DecodeConfig, OutputStatus, SharedVideoDecoder, StreamGeometry, VideoCodec, VideoDecodeEngine,
};
use crate::ledger::{FrameRecord, TimestampLedger, MAX_TIMESTAMP};
use crate::port::{CropRect, PortFormat, PortIndex, VideoFormat};
use crate::submission::{ExecuteMode, SubmissionUnit};
use crate::sync::lock;
use crate::Error;

/// Frames the engine may hold back for reordering.
pub const DEFAULT_DISPLAY_DELAY: u32 = 8;

/// Decoded picture buffers beyond what the stream needs.
pub const EXTRA_BUFFER_NUM: u32 = 7;

pub struct VideoDecoder {
    kind: CodecKind,
    codec: VideoCodec,
    split: FrameSplit,
    engine: SharedVideoDecoder,
    config: ComponentConfig,
    unit: Option<SubmissionUnit<dyn VideoDecodeEngine>>,
    ledger: TimestampLedger,
    converter: Box<dyn ColorConverter>,
    configured: bool,
    /// WMV profile read from the stream header
    wmv: Option<WmvFormat>,
    /// Set from the end-of-stream input until the engine reports its
    /// display pipeline empty.
    draining: bool,
    idle_drains: usize,
    picture: (u32, u32),
    settings: Option<StreamSettings>,
}

impl VideoDecoder {
    pub fn new(
        kind: CodecKind,
        codec: VideoCodec,
        engine: SharedVideoDecoder,
        config: ComponentConfig,
    ) -> Self {
        Self::with_converter(kind, codec, engine, config, Box::new(SoftwareConverter::new()))
    }

    pub fn with_converter(
        kind: CodecKind,
        codec: VideoCodec,
        engine: SharedVideoDecoder,
        config: ComponentConfig,
        converter: Box<dyn ColorConverter>,
    ) -> Self {
        let picture = (config.width, config.height);
        Self {
            kind,
            codec,
            split: kind.split(),
            engine,
            config,
            unit: None,
            ledger: TimestampLedger::new(),
            converter,
            configured: false,
            wmv: None,
            draining: false,
            idle_drains: 0,
            picture,
            settings: None,
        }
    }

    fn unit(&mut self) -> Result<&mut SubmissionUnit<dyn VideoDecodeEngine>, Error> {
        self.unit.as_mut().ok_or(Error::IncorrectStateOperation)
    }

    fn init_stream(&mut self, input: &InputRecord, output: &mut OutputRecord) -> Result<(), Error> {
        if input.data.is_empty() {
            output.timestamp = input.timestamp;
            output.flags = input.flags;
            return Ok(());
        }

        let header = if self.kind == CodecKind::Vc1Dec {
            let format = WmvFormat::from_header(&input.data)?;
            log::debug!("{} {:?} stream", self.kind, format);
            self.wmv = Some(format);
            self.codec = format.codec();
            wmv::sequence_header(format, &input.data)?
        } else {
            input.data.clone()
        };

        let thumbnail = self.config.thumbnail;
        let codec = self.codec;
        let index = self.unit()?.stage(&header)?;
        let slot = self
            .unit()?
            .slot_id(index)
            .ok_or(Error::IncorrectStateOperation)?;

        let geometry = {
            let mut engine = lock(&self.engine);
            if thumbnail {
                engine.set_config(DecodeConfig::DisplayDelay(0))?;
            } else {
                engine.set_config(DecodeConfig::ExtraBufferNum(EXTRA_BUFFER_NUM))?;
                engine.set_config(DecodeConfig::DisplayDelay(DEFAULT_DISPLAY_DELAY))?;
            }
            engine.set_in_buffer(slot, header.len())?;
            engine
                .init(codec, header.len())
                .map_err(|err| Error::HardwareInit(err.to_string()))?;
            engine.geometry()?
        };
        log::debug!(
            "{} stream {}x{} (buffer {}x{})",
            self.kind,
            geometry.width,
            geometry.height,
            geometry.buffer_width,
            geometry.buffer_height
        );

        self.configured = true;
        self.apply_geometry(&geometry);
        self.unit()?.reset();

        output.timestamp = input.timestamp;
        output.flags = input.flags;
        Ok(())
    }

    fn apply_geometry(&mut self, geometry: &StreamGeometry) {
        let cropped = geometry.crop != CropRect::default()
            && (geometry.crop.width, geometry.crop.height) != (geometry.width, geometry.height);
        if (geometry.width, geometry.height) != self.picture || cropped {
            self.picture = (geometry.width, geometry.height);
            self.settings = Some(self.stream_settings(geometry.crop));
        }
    }

    fn stream_settings(&self, crop: CropRect) -> StreamSettings {
        let (width, height) = self.picture;
        let color = self.config.color_format;
        StreamSettings {
            format: PortFormat::Video(VideoFormat::raw(width, height, color)),
            buffer_size: color.frame_size(width as usize, height as usize),
            crop,
        }
    }

    /// Read the result of the execution just collected.
    ///
    /// A displayable picture is converted into `output` with the
    /// timestamp recorded for its tag. Frames the engine did not tag fall
    /// back to `fallback`.
    fn read_output(
        &mut self,
        fallback: FrameRecord,
        output: &mut OutputRecord,
    ) -> Result<OutputStatus, Error> {
        let engine = Arc::clone(&self.engine);
        let mut engine = lock(&engine);
        let result = engine.get_out_buffer()?;
        if !result.status.has_display() {
            return Ok(result.status);
        }

        let record = engine
            .frame_tag()
            .ok()
            .and_then(|tag| self.ledger.lookup(tag))
            .unwrap_or(fallback);
        let position = self.ledger.next_output();
        log::trace!(
            "{} display #{} ts {} ({:?})",
            self.kind,
            position,
            record.timestamp,
            result.frame_type
        );

        let (luma, chroma) = engine.planes();
        self.converter.from_engine(
            luma,
            chroma,
            result.width as usize,
            result.height as usize,
            self.config.color_format,
            &mut output.data,
        )?;
        drop(engine);

        output.timestamp = record.timestamp;
        output.flags = record.flags.without(BufferFlags::EOS);

        if (result.width, result.height) != self.picture {
            self.picture = (result.width, result.height);
            self.settings = Some(self.stream_settings(CropRect {
                left: 0,
                top: 0,
                width: result.width,
                height: result.height,
            }));
        }
        Ok(result.status)
    }

    fn decode(&mut self, input: &InputRecord, output: &mut OutputRecord) -> Result<StepResult, Error> {
        if self.draining {
            return self.drain(input, output);
        }

        let submit = !input.data.is_empty() && frame::is_frame_start(self.split, &input.data);
        if !submit && !input.data.is_empty() {
            log::warn!(
                "{} dropping {} bytes without a frame start",
                self.kind,
                input.data.len()
            );
        }
        let staged = match (submit, self.wmv) {
            (false, _) => None,
            (true, Some(format)) if !format.frame_prefix().is_empty() => {
                let mut framed = format.frame_prefix().to_vec();
                framed.extend_from_slice(&input.data);
                Some(self.unit()?.stage(&framed)?)
            }
            (true, _) => Some(self.unit()?.stage(&input.data)?),
        };

        let fallback = FrameRecord {
            timestamp: input.timestamp,
            flags: input.flags,
        };
        let status = match self.unit()?.wait_done() {
            Some(result) => {
                result?;
                Some(self.read_output(fallback, output)?)
            }
            None => None,
        };

        if status == Some(OutputStatus::DisplayOnly) {
            // The engine displayed a held picture without consuming the
            // previous input; run that slot again and keep this frame.
            self.unit()?.resubmit()?;
            return Ok(StepResult::NeedMoreInput);
        }

        if let Some(index) = staged {
            let tag = self
                .ledger
                .record(input.timestamp, input.flags.without(BufferFlags::EOS));
            lock(&self.engine).set_config(DecodeConfig::FrameTag(tag))?;
            self.ledger.advance();
            self.unit()?.submit(index)?;
        }

        if input.is_eos() {
            self.draining = true;
            self.idle_drains = 0;
            if !self.unit()?.in_flight() {
                self.unit()?.submit_next_frame(&[])?;
            }
            if output.is_ready() {
                return Ok(StepResult::NeedMoreInput);
            }
            return self.drain(input, output);
        }
        Ok(StepResult::Done)
    }

    /// Pull the pictures the engine still holds after end of stream.
    fn drain(&mut self, input: &InputRecord, output: &mut OutputRecord) -> Result<StepResult, Error> {
        let fallback = FrameRecord {
            timestamp: input.timestamp,
            flags: input.flags,
        };
        let status = match self.unit()?.wait_done() {
            Some(result) => {
                result?;
                self.read_output(fallback, output)?
            }
            None => OutputStatus::DisplayEnd,
        };

        let exhausted = if status.has_display() {
            self.idle_drains = 0;
            false
        } else {
            self.idle_drains += 1;
            self.idle_drains > MAX_TIMESTAMP
        };

        if matches!(status, OutputStatus::DisplayEnd | OutputStatus::Null) || exhausted {
            if exhausted {
                log::warn!("{} engine never reported the end of its pipeline", self.kind);
            }
            log::debug!("{} drained", self.kind);
            self.draining = false;
            output.data.clear();
            output.timestamp = input.timestamp;
            output.flags = BufferFlags::EOS;
            return Ok(StepResult::Done);
        }

        self.unit()?.submit_next_frame(&[])?;
        if output.is_ready() {
            Ok(StepResult::NeedMoreInput)
        } else {
            self.drain(input, output)
        }
    }
}

impl CodecStep for VideoDecoder {
    fn kind(&self) -> CodecKind {
        self.kind
    }

    fn init(&mut self) -> Result<(), Error> {
        let mode = if self.config.nonblocking {
            ExecuteMode::Worker
        } else {
            ExecuteMode::Inline
        };
        self.unit = Some(SubmissionUnit::new(
            Arc::clone(&self.engine),
            self.config.slot_size,
            mode,
        )?);
        self.ledger.reset();
        self.configured = false;
        self.wmv = None;
        self.draining = false;
        log::debug!("{} initialised ({:?})", self.kind, mode);
        Ok(())
    }

    fn terminate(&mut self) {
        if let Some(mut unit) = self.unit.take() {
            unit.shutdown();
        }
        lock(&self.engine).close();
        self.configured = false;
        self.wmv = None;
        self.draining = false;
    }

    fn step(&mut self, input: &InputRecord, output: &mut OutputRecord) -> StepResult {
        let result = if self.configured {
            self.decode(input, output)
        } else {
            self.init_stream(input, output).map(|()| StepResult::Done)
        };
        result.unwrap_or_else(|err| {
            log::error!("{} step failed: {}", self.kind, err);
            self.draining = false;
            StepResult::Fatal(err)
        })
    }

    fn flush(&mut self, port: PortIndex) {
        if port == PortIndex::Input {
            if let Some(unit) = self.unit.as_mut() {
                unit.reset();
            }
            self.ledger.reset();
            self.draining = false;
        }
    }

    fn take_settings_change(&mut self) -> Option<StreamSettings> {
        self.settings.take()
    }

    fn max_frame_size(&self) -> usize {
        if self.kind == CodecKind::Vc1Dec {
            // room for the frame start code
            return self.config.slot_size.saturating_sub(wmv::FRAME_START_CODE.len());
        }
        self.config.slot_size
    }

    fn holds_frames(&self) -> bool {
        self.configured
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{DisplayOrder, SimDecodeConfig, SimVideoDecoder};
    use std::sync::Mutex;

    const IDR: &[u8] = &[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00];

    fn decoder(sim: SimDecodeConfig) -> (VideoDecoder, crate::sim::SimStats) {
        decoder_for(CodecKind::H264Dec, VideoCodec::H264, sim)
    }

    fn decoder_for(
        kind: CodecKind,
        codec: VideoCodec,
        sim: SimDecodeConfig,
    ) -> (VideoDecoder, crate::sim::SimStats) {
        let engine = SimVideoDecoder::new(sim);
        let stats = engine.stats();
        let engine: SharedVideoDecoder = Arc::new(Mutex::new(engine));
        let config = ComponentConfig {
            nonblocking: false,
            slot_size: 4096,
            ..Default::default()
        };
        let mut decoder = VideoDecoder::new(kind, codec, engine, config);
        decoder.init().unwrap();
        (decoder, stats)
    }

    fn frame(ts: i64, flags: BufferFlags) -> InputRecord {
        InputRecord {
            data: IDR.to_vec(),
            timestamp: ts,
            flags,
            mark: None,
        }
    }

    #[test]
    fn test_header_configures_stream() {
        let (mut dec, stats) = decoder(SimDecodeConfig::default());
        let mut out = OutputRecord::default();
        assert!(matches!(
            dec.step(&frame(0, BufferFlags::CODEC_CONFIG), &mut out),
            StepResult::Done
        ));
        assert!(out.data.is_empty());
        assert_eq!(stats.executions(), 0);
        assert!(dec.take_settings_change().is_none());
    }

    #[test]
    fn test_frames_leave_one_step_later() {
        let (mut dec, stats) = decoder(SimDecodeConfig {
            display_delay: 0,
            ..Default::default()
        });
        let mut out = OutputRecord::default();
        dec.step(&frame(0, BufferFlags::CODEC_CONFIG), &mut out);

        out.reset();
        assert!(matches!(dec.step(&frame(100, BufferFlags::NONE), &mut out), StepResult::Done));
        assert!(!out.is_ready());

        out.reset();
        assert!(matches!(dec.step(&frame(200, BufferFlags::NONE), &mut out), StepResult::Done));
        assert_eq!(out.timestamp, 100);
        assert!(!out.data.is_empty());
        assert_eq!(stats.executions(), 2);
    }

    #[test]
    fn test_eos_drains_delayed_frames() {
        let (mut dec, _stats) = decoder(SimDecodeConfig {
            display_delay: 2,
            ..Default::default()
        });
        let mut out = OutputRecord::default();
        dec.step(&frame(0, BufferFlags::CODEC_CONFIG), &mut out);

        let mut shown = Vec::new();
        for ts in [10, 20, 30] {
            out.reset();
            assert!(matches!(dec.step(&frame(ts, BufferFlags::NONE), &mut out), StepResult::Done));
            if out.is_ready() {
                shown.push(out.timestamp);
            }
        }

        let eos = InputRecord {
            flags: BufferFlags::EOS,
            timestamp: 40,
            ..Default::default()
        };
        loop {
            out.reset();
            let result = dec.step(&eos, &mut out);
            if out.flags.contains(BufferFlags::EOS) {
                assert!(matches!(result, StepResult::Done));
                assert_eq!(out.timestamp, 40);
                break;
            }
            assert!(matches!(result, StepResult::NeedMoreInput));
            shown.push(out.timestamp);
        }
        assert_eq!(shown, vec![10, 20, 30]);
    }

    #[test]
    fn test_init_failure_is_fatal() {
        let (mut dec, _stats) = decoder(SimDecodeConfig {
            fail_init: true,
            ..Default::default()
        });
        let mut out = OutputRecord::default();
        assert!(matches!(
            dec.step(&frame(0, BufferFlags::NONE), &mut out),
            StepResult::Fatal(Error::HardwareInit(_))
        ));
    }

    #[test]
    fn test_swapped_display_order_keeps_timestamps() {
        let (mut dec, _stats) = decoder(SimDecodeConfig {
            display_delay: 1,
            order: DisplayOrder::SwapPairs,
            ..Default::default()
        });
        let mut out = OutputRecord::default();
        dec.step(&frame(0, BufferFlags::CODEC_CONFIG), &mut out);

        let mut shown = Vec::new();
        for ts in 0..6 {
            out.reset();
            let input = frame(ts * 1000, BufferFlags::NONE);
            loop {
                let result = dec.step(&input, &mut out);
                if out.is_ready() {
                    shown.push(out.timestamp);
                    out.reset();
                }
                if matches!(result, StepResult::Done) {
                    break;
                }
            }
        }
        assert_eq!(&shown[..4], &[1000, 0, 3000, 2000]);
    }

    #[test]
    fn test_flush_resets_ledger() {
        let (mut dec, _stats) = decoder(SimDecodeConfig::default());
        let mut out = OutputRecord::default();
        dec.step(&frame(0, BufferFlags::CODEC_CONFIG), &mut out);
        dec.step(&frame(10, BufferFlags::NONE), &mut out);
        dec.flush(PortIndex::Input);
        assert_eq!(dec.ledger.tag(), 0);
        assert!(!dec.unit.as_ref().unwrap().in_flight());
    }

    fn wmv_input(data: Vec<u8>, ts: i64) -> InputRecord {
        InputRecord {
            data,
            timestamp: ts,
            flags: BufferFlags::NONE,
            mark: None,
        }
    }

    #[test]
    fn test_wmv3_header_becomes_rcv_layer() {
        let (mut dec, stats) =
            decoder_for(CodecKind::Vc1Dec, VideoCodec::Vc1, SimDecodeConfig::default());
        let mut out = OutputRecord::default();
        let header = wmv::bitmap_info_header(b"WMV3", 176, 144, &[]);
        assert!(matches!(
            dec.step(&wmv_input(header, 0), &mut out),
            StepResult::Done
        ));
        assert_eq!(dec.codec, VideoCodec::Wmv3);
        assert_eq!(dec.wmv, Some(WmvFormat::Wmv3));
        assert_eq!(stats.inits(), 1);

        out.reset();
        dec.step(&wmv_input(vec![0x12, 0x34, 0x56], 100), &mut out);
        assert_eq!(stats.submitted_bytes(), 3);
    }

    #[test]
    fn test_vc1_frames_gain_start_code() {
        let (mut dec, stats) =
            decoder_for(CodecKind::Vc1Dec, VideoCodec::Vc1, SimDecodeConfig::default());
        let mut out = OutputRecord::default();
        let header = wmv::bitmap_info_header(b"WVC1", 176, 144, &[0x25, 0, 0, 1, 0x0F, 0xCA]);
        dec.step(&wmv_input(header, 0), &mut out);
        assert_eq!(dec.codec, VideoCodec::Vc1);

        out.reset();
        dec.step(&wmv_input(vec![0x12, 0x34, 0x56], 100), &mut out);
        assert_eq!(stats.submitted_bytes(), 3 + wmv::FRAME_START_CODE.len());
        assert_eq!(
            dec.max_frame_size(),
            4096 - wmv::FRAME_START_CODE.len()
        );

        dec.terminate();
        assert_eq!(dec.wmv, None);
    }

    #[test]
    fn test_unknown_wmv_header_fails() {
        let (mut dec, _stats) =
            decoder_for(CodecKind::Vc1Dec, VideoCodec::Vc1, SimDecodeConfig::default());
        let mut out = OutputRecord::default();
        let header = wmv::bitmap_info_header(b"MP43", 176, 144, &[]);
        assert!(matches!(
            dec.step(&wmv_input(header, 0), &mut out),
            StepResult::Fatal(Error::HardwareInit(_))
        ));
    }
}
