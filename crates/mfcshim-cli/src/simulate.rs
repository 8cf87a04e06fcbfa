// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::metrics::MetricsCollector;
use crate::utils::{self, codec_short_name};
use clap::Args as ClapArgs;
use mfcshim::buffer::{Buffer, BufferFlags};
use mfcshim::callbacks::{ChannelHost, Completed, Event, HostMessage};
use mfcshim::codec::CodecKind;
use mfcshim::component::{Command, Component, State};
use mfcshim::config::ComponentConfig;
use mfcshim::engine::EngineHandle;
use mfcshim::port::PortIndex;
use mfcshim::sim::{
    self, DisplayOrder, SimAudioDecoder, SimDecodeConfig, SimVideoDecoder, SimVideoEncoder,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Component to run (h264, mpeg4, h263, vp8, wmv, mp3, mpeg4enc, h263enc, h264enc)
    #[arg(short, long, value_parser = utils::parse_codec)]
    pub codec: CodecKind,

    /// Number of input frames to submit before end of stream
    #[arg(short = 'n', long, default_value = "30")]
    pub frames: u32,

    /// Frames the simulated decoder holds back before display
    #[arg(short, long, default_value = "0")]
    pub delay: usize,

    /// Display order of the simulated decoder (decode or swap)
    #[arg(long, default_value = "decode", value_parser = utils::parse_order)]
    pub order: DisplayOrder,

    /// JSON component configuration applied over the defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Picture size (e.g. 320x240)
    #[arg(short, long, value_parser = utils::parse_resolution)]
    pub size: Option<(u32, u32)>,

    /// Encoder bitrate (e.g. 64, 512kbps, 2Mbps)
    #[arg(short, long, value_parser = utils::parse_bitrate)]
    pub bitrate: Option<u32>,

    /// Run hardware executions on the calling thread instead of the worker
    #[arg(long)]
    pub inline: bool,

    /// Seconds to wait for the component before giving up
    #[arg(long, default_value = "10")]
    pub timeout: u64,
}

/// Load the component configuration: JSON file over the defaults, then flags.
pub fn load_config(args: &Args) -> Result<ComponentConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| {
                CliError::InvalidArgs(format!("Cannot read config {}: {}", path.display(), e))
            })?;
            serde_json::from_str(&text).map_err(|e| {
                CliError::InvalidArgs(format!("Invalid config {}: {}", path.display(), e))
            })?
        }
        None => ComponentConfig::default(),
    };

    if let Some((width, height)) = args.size {
        config.width = width;
        config.height = height;
    }
    if let Some(kbps) = args.bitrate {
        config.bitrate = kbps.saturating_mul(1000);
    }
    if args.inline {
        config.nonblocking = false;
    }
    Ok(config)
}

fn engine_for(args: &Args, config: &ComponentConfig) -> EngineHandle {
    if args.codec.is_audio() {
        EngineHandle::audio_decoder(SimAudioDecoder::default())
    } else if args.codec.is_encoder() {
        EngineHandle::video_encoder(SimVideoEncoder::new())
    } else {
        EngineHandle::video_decoder(SimVideoDecoder::new(SimDecodeConfig {
            width: config.width,
            height: config.height,
            display_delay: args.delay,
            order: args.order,
            ..Default::default()
        }))
    }
}

/// Host side of one simulated session.
struct Session {
    component: Component,
    messages: Receiver<HostMessage>,
    inputs: Vec<Buffer>,
    outputs: Vec<Buffer>,
    timeout: Duration,
    progress: Progress,
}

/// What the host has seen leave the output port.
#[derive(Default)]
struct Progress {
    submitted: HashMap<i64, Instant>,
    metrics: MetricsCollector,
    eos: bool,
}

impl Progress {
    fn output(&mut self, buffer: &Buffer) {
        if buffer.flags().contains(BufferFlags::EOS) {
            self.eos = true;
        }
        if buffer.filled_len() == 0 {
            return;
        }
        let config = buffer.flags().contains(BufferFlags::CODEC_CONFIG);
        if !config {
            if let Some(start) = self.submitted.remove(&buffer.timestamp()) {
                self.metrics
                    .record_latency_us(start.elapsed().as_micros() as u64);
            }
            self.metrics.track_timestamp(buffer.timestamp());
        }
        self.metrics.record_bytes(buffer.filled_len() as u64);
        log::trace!(
            "output ts {} {} bytes {:?}",
            buffer.timestamp(),
            buffer.filled_len(),
            buffer.flags()
        );
    }
}

impl Session {
    /// Handle one host message, returning any event it carried.
    fn next(&mut self) -> Result<Option<Event>, CliError> {
        match self.messages.recv_timeout(self.timeout) {
            Ok(HostMessage::InputConsumed(buffer)) => {
                self.inputs.push(buffer);
                Ok(None)
            }
            Ok(HostMessage::OutputReady(buffer)) => {
                self.progress.output(&buffer);
                self.outputs.push(buffer);
                Ok(None)
            }
            Ok(HostMessage::Event(event)) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Err(CliError::Timeout(format!(
                "no callback from {} within {:?}",
                self.component.kind(),
                self.timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(CliError::General("component host channel closed".into()))
            }
        }
    }

    fn handle_event(&mut self, event: Event) -> Result<(), CliError> {
        match event {
            Event::Error(err) => Err(CliError::StreamError(err.to_string())),
            Event::PortSettingsChanged(index) => {
                let definition = self.component.port_definition(index);
                log::info!(
                    "{:?} port settings changed: {:?}, {} byte buffers",
                    index,
                    definition.format,
                    definition.buffer_size
                );
                Ok(())
            }
            other => {
                log::debug!("event {:?}", other);
                Ok(())
            }
        }
    }

    fn wait_complete(&mut self, expected: Completed) -> Result<(), CliError> {
        loop {
            match self.next()? {
                Some(Event::CmdComplete(completed)) if completed == expected => return Ok(()),
                Some(event) => self.handle_event(event)?,
                None => {}
            }
        }
    }

    fn set_state(&mut self, state: State) -> Result<(), CliError> {
        self.component.send_command(Command::StateSet(state))?;
        Ok(())
    }

    /// Register every buffer both ports need.
    fn populate(&mut self) -> Result<(), CliError> {
        for index in PortIndex::ALL {
            let definition = self.component.port_definition(index);
            for _ in 0..definition.buffer_count_actual {
                let buffer = self
                    .component
                    .allocate_buffer(index, definition.buffer_size)?;
                match index {
                    PortIndex::Input => self.inputs.push(buffer),
                    PortIndex::Output => self.outputs.push(buffer),
                }
            }
            log::debug!(
                "{:?} port: {} buffers of {} bytes",
                index,
                definition.buffer_count_actual,
                definition.buffer_size
            );
        }
        Ok(())
    }

    /// Wait until every registered buffer is back with the host.
    ///
    /// The loop may hand back its last buffers just after the state change
    /// that returned the rest completed.
    fn reclaim(&mut self) -> Result<(), CliError> {
        let inputs = self.component.port_definition(PortIndex::Input).buffer_count_actual;
        let outputs = self.component.port_definition(PortIndex::Output).buffer_count_actual;
        while self.inputs.len() < inputs || self.outputs.len() < outputs {
            if let Some(event) = self.next()? {
                self.handle_event(event)?;
            }
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), CliError> {
        for buffer in self.inputs.drain(..).chain(self.outputs.drain(..)) {
            self.component.free_buffer(buffer)?;
        }
        Ok(())
    }

    fn submit_outputs(&mut self) -> Result<(), CliError> {
        for buffer in std::mem::take(&mut self.outputs) {
            self.component
                .submit_output(buffer)
                .map_err(|rejected| CliError::from(rejected.error))?;
        }
        Ok(())
    }

    /// Feed `frames` frames then end of stream, until the EOS output arrives.
    fn stream(
        &mut self,
        config: &ComponentConfig,
        frames: u32,
        term: &AtomicBool,
    ) -> Result<u32, CliError> {
        let kind = self.component.kind();
        let interval = 1_000_000 / i64::from(config.frame_rate.max(1));
        let mut next = 0u32;
        let mut eos_sent = false;

        while !self.progress.eos {
            self.submit_outputs()?;

            while !eos_sent {
                let Some(mut buffer) = self.inputs.pop() else {
                    break;
                };
                let interrupted = term.load(Ordering::Relaxed);
                if interrupted {
                    log::info!("Interrupted, ending stream after {} frames", next + 1);
                }
                let last = next + 1 >= frames || interrupted;
                let timestamp = i64::from(next) * interval;
                let mut flags = BufferFlags::END_OF_FRAME;
                if last {
                    flags.insert(BufferFlags::EOS);
                }
                let payload = sim::sample_frame(kind, next as usize, config);
                buffer.load(&payload, timestamp, flags)?;
                self.progress.submitted.insert(timestamp, Instant::now());
                self.component
                    .submit_input(buffer)
                    .map_err(|rejected| CliError::from(rejected.error))?;
                next += 1;
                eos_sent = last;
            }

            if let Some(event) = self.next()? {
                self.handle_event(event)?;
            }
        }
        Ok(next)
    }
}

#[derive(serde::Serialize)]
struct Report<'a> {
    component: &'a str,
    codec: &'a str,
    frames_submitted: u32,
    #[serde(flatten)]
    metrics: crate::metrics::FrameMetrics,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    if args.frames == 0 {
        return Err(CliError::InvalidArgs("--frames must be at least 1".into()));
    }
    let config = load_config(&args)?;
    let term = utils::install_signal_handler()?;
    run(&args, &config, &term, json)
}

fn run(
    args: &Args,
    config: &ComponentConfig,
    term: &Arc<AtomicBool>,
    json: bool,
) -> Result<(), CliError> {
    let (host, messages) = ChannelHost::new();
    let engine = engine_for(args, config);
    let component = Component::new(args.codec, engine, config.clone(), host)?;
    log::info!(
        "Simulating {} ({}) for {} frames",
        args.codec.name(),
        args.codec.role(),
        args.frames
    );

    let mut session = Session {
        component,
        messages,
        inputs: Vec::new(),
        outputs: Vec::new(),
        timeout: Duration::from_secs(args.timeout.max(1)),
        progress: Progress::default(),
    };

    session.set_state(State::Idle)?;
    session.populate()?;
    session.wait_complete(Completed::StateSet(State::Idle))?;
    session.set_state(State::Executing)?;
    session.wait_complete(Completed::StateSet(State::Executing))?;

    let started = Instant::now();
    let submitted = session.stream(config, args.frames, term)?;
    log::debug!("stream finished in {:?}", started.elapsed());

    session.set_state(State::Idle)?;
    session.wait_complete(Completed::StateSet(State::Idle))?;
    session.reclaim()?;
    session.set_state(State::Loaded)?;
    session.release()?;
    session.wait_complete(Completed::StateSet(State::Loaded))?;

    let metrics = session.progress.metrics.finalize();
    if json {
        let report = Report {
            component: args.codec.name(),
            codec: codec_short_name(args.codec),
            frames_submitted: submitted,
            metrics,
        };
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| CliError::General(format!("JSON serialization failed: {}", e)))?;
        println!("{}", text);
    } else {
        println!("Component:         {}", args.codec.name());
        println!("Frames submitted:  {}", submitted);
        crate::metrics::print_text(&metrics);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        args: Args,
    }

    fn parse(argv: &[&str]) -> Args {
        Cli::parse_from(std::iter::once("simulate").chain(argv.iter().copied())).args
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = parse(&[
            "--codec", "h263enc", "--size", "320x240", "--bitrate", "512kbps", "--inline",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!((config.width, config.height), (320, 240));
        assert_eq!(config.bitrate, 512_000);
        assert!(!config.nonblocking);
    }

    #[test]
    fn test_config_file_then_flags() {
        let dir = std::env::temp_dir().join(format!("mfcshim-sim-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{"width": 352, "height": 288, "gop_size": 5}"#).unwrap();

        let args = parse(&[
            "--codec",
            "mpeg4enc",
            "--config",
            path.to_str().unwrap(),
            "--size",
            "176x144",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!((config.width, config.height), (176, 144));
        assert_eq!(config.gop_size, 5);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_bad_config_file() {
        let args = parse(&["--codec", "h264", "--config", "/nonexistent/mfcshim.json"]);
        assert!(matches!(load_config(&args), Err(CliError::InvalidArgs(_))));
    }

    #[test]
    fn test_decoder_session_reorders() {
        let args = parse(&[
            "--codec", "h264", "--frames", "6", "--order", "swap", "--delay", "2",
        ]);
        let config = load_config(&args).unwrap();
        let term = Arc::new(AtomicBool::new(false));
        run(&args, &config, &term, true).unwrap();
    }

    #[test]
    fn test_audio_session() {
        let args = parse(&["--codec", "mp3", "--frames", "4"]);
        let config = load_config(&args).unwrap();
        let term = Arc::new(AtomicBool::new(false));
        run(&args, &config, &term, false).unwrap();
    }
}
