// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Video encoder step shared by the MPEG-4, H.263 and H.264 components.

use std::sync::Arc;

use crate::buffer::BufferFlags;
use crate::codec::{CodecKind, CodecStep, DynamicConfig, InputRecord, OutputRecord, StepResult};
use crate::config::ComponentConfig;
use crate::convert::{ColorConverter, PixelFormat, SoftwareConverter};
use crate::engine::{
    EncodeConfig, EncodeParams, FrameType, SharedVideoEncoder, VideoCodec, VideoEncodeEngine,
};
use crate::ledger::{FrameRecord, TimestampLedger};
use crate::port::PortIndex;
use crate::submission::{ExecuteMode, SubmissionUnit};
use crate::sync::lock;
use crate::Error;

pub struct VideoEncoder {
    kind: CodecKind,
    engine: SharedVideoEncoder,
    config: ComponentConfig,
    params: EncodeParams,
    unit: Option<SubmissionUnit<dyn VideoEncodeEngine>>,
    ledger: TimestampLedger,
    converter: Box<dyn ColorConverter>,
    scratch: Vec<u8>,
    header_sent: bool,
    draining: bool,
    pending: DynamicConfig,
}

impl VideoEncoder {
    pub fn new(
        kind: CodecKind,
        codec: VideoCodec,
        engine: SharedVideoEncoder,
        config: ComponentConfig,
    ) -> Self {
        let params = EncodeParams {
            codec,
            width: config.width,
            height: config.height,
            bitrate: config.bitrate,
            frame_rate: config.frame_rate,
            gop_size: config.gop_size,
        };
        Self {
            kind,
            engine,
            config,
            params,
            unit: None,
            ledger: TimestampLedger::new(),
            converter: Box::new(SoftwareConverter::new()),
            scratch: Vec::new(),
            header_sent: false,
            draining: false,
            pending: DynamicConfig::default(),
        }
    }

    fn unit(&mut self) -> Result<&mut SubmissionUnit<dyn VideoEncodeEngine>, Error> {
        self.unit.as_mut().ok_or(Error::IncorrectStateOperation)
    }

    fn engine_frame_size(&self) -> usize {
        PixelFormat::Nv12Tiled.frame_size(self.params.width as usize, self.params.height as usize)
    }

    fn emit_header(&mut self, output: &mut OutputRecord) -> Result<StepResult, Error> {
        let header = lock(&self.engine).stream_header()?;
        log::debug!("{} stream header {} bytes", self.kind, header.len());
        output.data = header;
        output.timestamp = 0;
        output.flags = BufferFlags::CODEC_CONFIG | BufferFlags::END_OF_FRAME;
        self.header_sent = true;
        Ok(StepResult::NeedMoreInput)
    }

    fn apply_pending(&mut self) -> Result<(), Error> {
        let pending = std::mem::take(&mut self.pending);
        if pending == DynamicConfig::default() {
            return Ok(());
        }
        let mut engine = lock(&self.engine);
        if let Some(bitrate) = pending.bitrate {
            log::debug!("{} bitrate -> {}", self.kind, bitrate);
            engine.set_config(EncodeConfig::Bitrate(bitrate))?;
        }
        if let Some(frame_rate) = pending.frame_rate {
            log::debug!("{} frame rate -> {}", self.kind, frame_rate);
            engine.set_config(EncodeConfig::FrameRate(frame_rate))?;
        }
        if pending.force_key_frame {
            engine.set_config(EncodeConfig::ForceKeyFrame)?;
        }
        Ok(())
    }

    /// Copy the stream of the execution just collected into `output`.
    fn read_output(&mut self, fallback: FrameRecord, output: &mut OutputRecord) -> Result<(), Error> {
        let engine = Arc::clone(&self.engine);
        let mut engine = lock(&engine);
        let result = engine.get_out_buffer()?;
        let record = engine
            .frame_tag()
            .ok()
            .and_then(|tag| self.ledger.lookup(tag))
            .unwrap_or(fallback);

        let stream = engine.stream();
        output.data.clear();
        output.data.extend_from_slice(&stream[..result.len.min(stream.len())]);
        output.timestamp = record.timestamp;
        output.flags = record.flags.without(BufferFlags::EOS) | BufferFlags::END_OF_FRAME;
        if result.frame_type == FrameType::I {
            output.flags.insert(BufferFlags::SYNC_FRAME);
        }
        log::trace!(
            "{} encoded {} bytes ts {} ({:?})",
            self.kind,
            output.data.len(),
            output.timestamp,
            result.frame_type
        );
        Ok(())
    }

    fn encode(&mut self, input: &InputRecord, output: &mut OutputRecord) -> Result<StepResult, Error> {
        let fallback = FrameRecord {
            timestamp: input.timestamp,
            flags: input.flags,
        };

        if self.draining {
            if let Some(result) = self.unit()?.wait_done() {
                result?;
                self.read_output(fallback, output)?;
                return Ok(StepResult::NeedMoreInput);
            }
            self.draining = false;
            output.data.clear();
            output.timestamp = input.timestamp;
            output.flags = BufferFlags::EOS;
            return Ok(StepResult::Done);
        }

        if input.data.is_empty() {
            if input.is_eos() && self.unit()?.in_flight() {
                self.draining = true;
                return self.encode(input, output);
            }
            output.timestamp = input.timestamp;
            output.flags = input.flags;
            return Ok(StepResult::Done);
        }

        let needed = self.engine_frame_size();
        self.scratch.resize(needed, 0);
        let (width, height) = (self.params.width as usize, self.params.height as usize);
        self.converter.to_engine(
            &input.data,
            self.config.color_format,
            width,
            height,
            &mut self.scratch,
        )?;
        let index = {
            let scratch = std::mem::take(&mut self.scratch);
            let staged = self.unit()?.stage(&scratch);
            self.scratch = scratch;
            staged?
        };

        if let Some(result) = self.unit()?.wait_done() {
            result?;
            self.read_output(fallback, output)?;
        }

        self.apply_pending()?;
        let tag = self
            .ledger
            .record(input.timestamp, input.flags.without(BufferFlags::EOS));
        lock(&self.engine).set_config(EncodeConfig::FrameTag(tag))?;
        self.ledger.advance();
        self.unit()?.submit(index)?;

        if input.is_eos() {
            self.draining = true;
            if output.is_ready() {
                return Ok(StepResult::NeedMoreInput);
            }
            return self.encode(input, output);
        }
        Ok(StepResult::Done)
    }
}

impl CodecStep for VideoEncoder {
    fn kind(&self) -> CodecKind {
        self.kind
    }

    fn init(&mut self) -> Result<(), Error> {
        lock(&self.engine)
            .init(&self.params)
            .map_err(|err| Error::HardwareInit(err.to_string()))?;
        let mode = if self.config.nonblocking {
            ExecuteMode::Worker
        } else {
            ExecuteMode::Inline
        };
        let slot_size = self.config.slot_size.max(self.engine_frame_size());
        self.unit = Some(SubmissionUnit::new(
            Arc::clone(&self.engine),
            slot_size,
            mode,
        )?);
        self.ledger.reset();
        self.header_sent = false;
        self.draining = false;
        log::debug!(
            "{} initialised {}x{} @ {} bps",
            self.kind,
            self.params.width,
            self.params.height,
            self.params.bitrate
        );
        Ok(())
    }

    fn terminate(&mut self) {
        if let Some(mut unit) = self.unit.take() {
            unit.shutdown();
        }
        lock(&self.engine).close();
        self.draining = false;
    }

    fn step(&mut self, input: &InputRecord, output: &mut OutputRecord) -> StepResult {
        let result = if self.header_sent {
            self.encode(input, output)
        } else {
            self.emit_header(output)
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

    fn set_config(&mut self, config: DynamicConfig) -> Result<(), Error> {
        if let Some(bitrate) = config.bitrate {
            if bitrate == 0 {
                return Err(Error::BadParameter("bitrate must be positive".into()));
            }
            self.params.bitrate = bitrate;
            self.pending.bitrate = Some(bitrate);
        }
        if let Some(frame_rate) = config.frame_rate {
            if frame_rate == 0 {
                return Err(Error::BadParameter("frame rate must be positive".into()));
            }
            self.params.frame_rate = frame_rate;
            self.pending.frame_rate = Some(frame_rate);
        }
        self.pending.force_key_frame |= config.force_key_frame;
        Ok(())
    }
}
