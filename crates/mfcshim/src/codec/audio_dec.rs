// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! MP3 decoder step over the blocking audio engine.

use crate::buffer::BufferFlags;
use crate::codec::{CodecKind, CodecStep, InputRecord, OutputRecord, StepResult, StreamSettings};
use crate::config::DEFAULT_AUDIO_OUTPUT_BUFFER_SIZE;
use crate::engine::{AudioStreamInfo, DecodeAccept, SharedAudioDecoder};
use crate::port::{AudioFormat, CropRect, PortFormat, PortIndex};
use crate::sync::lock;
use crate::Error;

pub struct AudioDecoder {
    kind: CodecKind,
    engine: SharedAudioDecoder,
    info: AudioStreamInfo,
    configured: bool,
    eos_sent: bool,
    /// End of stream reached, waiting for the engine to stop.
    draining: bool,
    settings: Option<StreamSettings>,
}

impl AudioDecoder {
    pub fn new(kind: CodecKind, engine: SharedAudioDecoder) -> Self {
        Self {
            kind,
            engine,
            info: AudioStreamInfo {
                channels: 2,
                sample_rate: 44100,
            },
            configured: false,
            eos_sent: false,
            draining: false,
            settings: None,
        }
    }

    fn finish(&mut self, output: &mut OutputRecord) -> StepResult {
        output.flags.insert(BufferFlags::EOS);
        self.eos_sent = false;
        self.draining = false;
        log::debug!("{} drained", self.kind);
        StepResult::Done
    }

    fn decode(&mut self, input: &InputRecord, output: &mut OutputRecord) -> Result<StepResult, Error> {
        output.timestamp = input.timestamp;
        output.flags = input.flags.without(BufferFlags::EOS);

        let engine = std::sync::Arc::clone(&self.engine);
        let mut engine = lock(&engine);

        let mut overflow = false;
        if !self.draining {
            match engine.decode(&input.data)? {
                DecodeAccept::Accepted => {
                    if input.is_eos() {
                        engine.send_eos()?;
                        self.eos_sent = true;
                    }
                }
                DecodeAccept::InputOverflow => overflow = true,
            }
        }
        let pending = if overflow {
            // the engine takes more input only after PCM is read out
            output.data.clear();
            if engine.read_pcm(&mut output.data)? == 0 {
                return Err(Error::Hardware(format!(
                    "{} input overflow with no PCM pending",
                    self.kind
                )));
            }
            StepResult::NeedMoreInput
        } else {
            StepResult::Done
        };

        if !self.configured {
            let info = engine.stream_info()?;
            if !info.is_known() {
                if self.eos_sent && engine.is_stopped()? {
                    return Ok(self.finish(output));
                }
                if self.eos_sent {
                    self.draining = true;
                    return Ok(StepResult::NeedMoreInput);
                }
                return Ok(pending);
            }

            log::debug!(
                "{} {} channels at {} Hz",
                self.kind,
                info.channels,
                info.sample_rate
            );
            if info != self.info {
                self.info = info;
                self.settings = Some(StreamSettings {
                    format: PortFormat::Audio(AudioFormat {
                        channels: info.channels,
                        sample_rate: info.sample_rate,
                        bits_per_sample: 16,
                    }),
                    buffer_size: DEFAULT_AUDIO_OUTPUT_BUFFER_SIZE,
                    crop: CropRect::default(),
                });
            }
            self.configured = true;
            if self.eos_sent {
                self.draining = true;
                return Ok(StepResult::NeedMoreInput);
            }
            return Ok(pending);
        }

        if !overflow {
            output.data.clear();
            engine.read_pcm(&mut output.data)?;
        }
        log::trace!("{} {} PCM bytes", self.kind, output.data.len());

        if self.eos_sent {
            if input.is_eos() {
                if engine.is_stopped()? {
                    return Ok(self.finish(output));
                }
                self.draining = true;
                return Ok(StepResult::NeedMoreInput);
            }
            self.eos_sent = false;
        }
        Ok(pending)
    }
}

impl CodecStep for AudioDecoder {
    fn kind(&self) -> CodecKind {
        self.kind
    }

    fn init(&mut self) -> Result<(), Error> {
        lock(&self.engine)
            .init()
            .map_err(|err| Error::HardwareInit(err.to_string()))?;
        self.configured = false;
        self.eos_sent = false;
        self.draining = false;
        Ok(())
    }

    fn terminate(&mut self) {
        lock(&self.engine).close();
    }

    fn step(&mut self, input: &InputRecord, output: &mut OutputRecord) -> StepResult {
        self.decode(input, output).unwrap_or_else(|err| {
            log::error!("{} step failed: {}", self.kind, err);
            self.draining = false;
            StepResult::Fatal(err)
        })
    }

    fn flush(&mut self, port: PortIndex) {
        if port == PortIndex::Input {
            if let Err(err) = lock(&self.engine).flush() {
                log::warn!("{} engine flush failed: {}", self.kind, err);
            }
            self.eos_sent = false;
            self.draining = false;
        }
    }

    fn take_settings_change(&mut self) -> Option<StreamSettings> {
        self.settings.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimAudioDecoder;
    use std::sync::{Arc, Mutex};

    fn decoder(sim: SimAudioDecoder) -> AudioDecoder {
        let engine: SharedAudioDecoder = Arc::new(Mutex::new(sim));
        let mut dec = AudioDecoder::new(CodecKind::Mp3Dec, engine);
        dec.init().unwrap();
        dec
    }

    fn chunk(ts: i64, flags: BufferFlags) -> InputRecord {
        InputRecord {
            data: vec![0xFF; 417],
            timestamp: ts,
            flags,
            mark: None,
        }
    }

    #[test]
    fn test_stream_info_changes_settings() {
        let mut dec = decoder(SimAudioDecoder::new(1, 22050));
        let mut out = OutputRecord::default();
        assert!(matches!(dec.step(&chunk(0, BufferFlags::NONE), &mut out), StepResult::Done));
        let settings = dec.take_settings_change().unwrap();
        assert!(matches!(
            settings.format,
            PortFormat::Audio(AudioFormat {
                channels: 1,
                sample_rate: 22050,
                ..
            })
        ));

        out.reset();
        dec.step(&chunk(26, BufferFlags::NONE), &mut out);
        assert!(!out.data.is_empty());
        assert_eq!(out.timestamp, 26);
    }

    #[test]
    fn test_eos_waits_for_engine_stop() {
        let mut dec = decoder(SimAudioDecoder::new(2, 44100).with_stop_delay(2));
        let mut out = OutputRecord::default();
        dec.step(&chunk(0, BufferFlags::NONE), &mut out);

        let last = chunk(26, BufferFlags::EOS);
        let mut steps = 0;
        loop {
            out.reset();
            let result = dec.step(&last, &mut out);
            steps += 1;
            if out.flags.contains(BufferFlags::EOS) {
                assert!(matches!(result, StepResult::Done));
                break;
            }
            assert!(matches!(result, StepResult::NeedMoreInput));
            assert!(steps < 10);
        }
        // two PCM frames to drain, then two stop queries answered false
        assert_eq!(steps, 4);
    }

    #[test]
    fn test_input_overflow_keeps_input() {
        let mut dec = decoder(SimAudioDecoder::new(2, 44100).with_overflow_every(2));
        let mut out = OutputRecord::default();
        dec.step(&chunk(0, BufferFlags::NONE), &mut out);
        out.reset();
        let result = dec.step(&chunk(26, BufferFlags::NONE), &mut out);
        assert!(matches!(result, StepResult::NeedMoreInput));
        assert!(out.is_ready());

        // the retry is accepted once the PCM was read
        out.reset();
        let result = dec.step(&chunk(26, BufferFlags::NONE), &mut out);
        assert!(matches!(result, StepResult::Done));
    }

    #[test]
    fn test_overflow_without_pcm_fails() {
        let mut dec = decoder(SimAudioDecoder::new(2, 44100).with_overflow_every(1));
        let mut out = OutputRecord::default();
        let result = dec.step(&chunk(0, BufferFlags::NONE), &mut out);
        assert!(matches!(result, StepResult::Fatal(Error::Hardware(_))));
        assert!(!out.is_ready());
    }
}
