// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// mfcshim Component Tests
//
// TESTING LAYERS:
//
// Layer 1 (Unit Tests - No hardware required):
//   - #[cfg(test)] modules next to each source file
//
// Layer 2 (Component Integration - No hardware required):
//   - test_decode_stream_in_order: header, frames and EOS through a decoder
//   - test_wmv_stream_decodes: WMV3 header rewritten to RCV, whole-buffer frames
//   - test_swapped_display_keeps_timestamps: reordering engine, ledger lookup
//   - test_random_interleaving_preserves_order: host submits at random times
//   - test_flush_while_paused_returns_inputs: queued buffers come back
//   - test_pause_holds_inputs_until_resume: nothing consumed while paused
//   - test_pause_holds_input_taken_while_waiting: loop blocked on input at pause
//   - test_empty_eos_buffer_drains_stream: zero-length EOS input
//   - test_seek_drops_stale_frames: input flush mid-stream
//   - test_encoder_header_and_sync_frames: CODEC_CONFIG first, GOP key frames
//   - test_audio_stream_reaches_eos: MP3 through the blocking audio engine
//   - test_mark_reaches_target / test_foreign_mark_travels_with_output
//   - test_output_port_disable_enable: release and repopulate while executing
//   - test_register_release_round_trip / test_rejected_commands
//   - test_invalid_state_is_terminal
//
// Layer 3 (Hardware Integration - Requires MFC engine library):
//   - #[ignore] tests in src/mfc.rs
//
// RUN LAYER 2:
//   cargo test --test component_pipeline

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use mfcshim::buffer::{Buffer, BufferFlags, Mark};
use mfcshim::callbacks::{ChannelHost, Completed, Event, HostMessage};
use mfcshim::codec::CodecKind;
use mfcshim::component::{Command, Component, PortSelector, State};
use mfcshim::config::ComponentConfig;
use mfcshim::engine::EngineHandle;
use mfcshim::port::PortIndex;
use mfcshim::sim::{
    self, DisplayOrder, SimAudioDecoder, SimDecodeConfig, SimVideoDecoder, SimVideoEncoder,
};
use mfcshim::Error;
use rand::Rng;

const TIMEOUT: Duration = Duration::from_secs(5);
const FRAME_INTERVAL: i64 = 1000;

/// An output buffer as the host saw it.
#[derive(Debug, Clone, Copy)]
struct Received {
    timestamp: i64,
    flags: BufferFlags,
    len: usize,
    mark: Option<Mark>,
}

/// Host side of a component under test.
struct Harness {
    component: Component,
    config: ComponentConfig,
    messages: Receiver<HostMessage>,
    inputs: Vec<Buffer>,
    outputs: Vec<Buffer>,
    received: Vec<Received>,
    events: Vec<Event>,
}

impl Harness {
    fn new(kind: CodecKind, engine: EngineHandle, config: ComponentConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let (host, messages) = ChannelHost::new();
        let component = Component::new(kind, engine, config.clone(), host).unwrap();
        Self {
            component,
            config,
            messages,
            inputs: Vec::new(),
            outputs: Vec::new(),
            received: Vec::new(),
            events: Vec::new(),
        }
    }

    fn decoder(kind: CodecKind, sim: SimDecodeConfig) -> Self {
        let config = ComponentConfig::default();
        Self::new(kind, EngineHandle::video_decoder(SimVideoDecoder::new(sim)), config)
    }

    fn kind(&self) -> CodecKind {
        self.component.kind()
    }

    /// Handle exactly one host message.
    fn pump(&mut self) {
        match self.messages.recv_timeout(TIMEOUT) {
            Ok(HostMessage::InputConsumed(buffer)) => self.inputs.push(buffer),
            Ok(HostMessage::OutputReady(buffer)) => {
                if buffer.filled_len() > 0 || buffer.flags().contains(BufferFlags::EOS) {
                    self.received.push(Received {
                        timestamp: buffer.timestamp(),
                        flags: buffer.flags(),
                        len: buffer.filled_len(),
                        mark: buffer.mark(),
                    });
                }
                self.outputs.push(buffer);
            }
            Ok(HostMessage::Event(event)) => self.events.push(event),
            Err(RecvTimeoutError::Timeout) => {
                panic!("{} stalled in {:?}: {:?}", self.kind(), self.component.state(), self.events)
            }
            Err(RecvTimeoutError::Disconnected) => panic!("host channel closed"),
        }
    }

    /// Keep the output port fed and pump until `done` holds.
    fn pump_until(&mut self, done: impl Fn(&Harness) -> bool) {
        while !done(self) {
            self.submit_outputs();
            self.pump();
        }
    }

    fn take_event(&mut self, matches: impl Fn(&Event) -> bool) -> Option<Event> {
        let position = self.events.iter().position(matches)?;
        Some(self.events.remove(position))
    }

    fn wait_complete(&mut self, expected: Completed) {
        loop {
            let found = self.take_event(|event| {
                matches!(event, Event::CmdComplete(completed) if *completed == expected)
            });
            if found.is_some() {
                return;
            }
            self.pump();
        }
    }

    fn command(&mut self, command: Command, expected: Completed) {
        self.component.send_command(command).unwrap();
        self.wait_complete(expected);
    }

    fn populate(&mut self, index: PortIndex) {
        let definition = self.component.port_definition(index);
        for _ in 0..definition.buffer_count_actual {
            let buffer = self
                .component
                .allocate_buffer(index, definition.buffer_size)
                .unwrap();
            match index {
                PortIndex::Input => self.inputs.push(buffer),
                PortIndex::Output => self.outputs.push(buffer),
            }
        }
    }

    /// Loaded to Executing with every buffer allocated.
    fn start(&mut self) {
        self.component
            .send_command(Command::StateSet(State::Idle))
            .unwrap();
        self.populate(PortIndex::Input);
        self.populate(PortIndex::Output);
        self.wait_complete(Completed::StateSet(State::Idle));
        self.command(
            Command::StateSet(State::Executing),
            Completed::StateSet(State::Executing),
        );
        assert_eq!(self.component.state(), State::Executing);
    }

    fn submit_outputs(&mut self) {
        if !self.component.state().is_running() {
            return;
        }
        for buffer in std::mem::take(&mut self.outputs) {
            if let Err(rejected) = self.component.submit_output(buffer) {
                panic!("output rejected: {}", rejected.error);
            }
        }
    }

    fn timestamp(index: usize) -> i64 {
        index as i64 * FRAME_INTERVAL
    }

    /// Submit sample frame `index`, waiting for a free input buffer.
    fn submit_frame(&mut self, index: usize, flags: BufferFlags) {
        while self.inputs.is_empty() {
            self.submit_outputs();
            self.pump();
        }
        let mut buffer = self.inputs.pop().unwrap();
        let payload = sim::sample_frame(self.kind(), index, &self.config);
        buffer
            .load(&payload, Self::timestamp(index), flags | BufferFlags::END_OF_FRAME)
            .unwrap();
        self.component.submit_input(buffer).unwrap();
    }

    /// Submit an empty buffer carrying only the EOS flag.
    fn submit_empty_eos(&mut self, timestamp: i64) {
        while self.inputs.is_empty() {
            self.submit_outputs();
            self.pump();
        }
        let mut buffer = self.inputs.pop().unwrap();
        buffer.load(&[], timestamp, BufferFlags::EOS).unwrap();
        self.component.submit_input(buffer).unwrap();
    }

    fn eos_seen(&self) -> bool {
        self.received
            .iter()
            .any(|r| r.flags.contains(BufferFlags::EOS))
            && self.events.iter().any(|event| {
                matches!(event, Event::BufferFlag(PortIndex::Output, flags)
                    if flags.contains(BufferFlags::EOS))
            })
    }

    /// Submit frames `range`, the last one with EOS, and wait for the EOS output.
    fn stream(&mut self, range: std::ops::Range<usize>) {
        let last = range.end - 1;
        self.submit_outputs();
        for index in range {
            let flags = if index == last {
                BufferFlags::EOS
            } else {
                BufferFlags::NONE
            };
            self.submit_frame(index, flags);
            self.submit_outputs();
        }
        self.pump_until(Harness::eos_seen);
    }

    /// Timestamps of every picture or stream chunk the host received.
    fn displayed(&self) -> Vec<i64> {
        self.received
            .iter()
            .filter(|r| r.len > 0 && !r.flags.contains(BufferFlags::CODEC_CONFIG))
            .map(|r| r.timestamp)
            .collect()
    }

    fn errors(&self) -> Vec<&Error> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Error(err) => Some(err),
                _ => None,
            })
            .collect()
    }

    fn held(&self, index: PortIndex) -> usize {
        match index {
            PortIndex::Input => self.inputs.len(),
            PortIndex::Output => self.outputs.len(),
        }
    }

    /// Executing to Loaded, freeing every buffer.
    fn shutdown(mut self) {
        self.command(Command::StateSet(State::Idle), Completed::StateSet(State::Idle));
        let inputs = self.component.port_definition(PortIndex::Input).buffer_count_actual;
        let outputs = self.component.port_definition(PortIndex::Output).buffer_count_actual;
        self.pump_until(|h| h.held(PortIndex::Input) == inputs && h.held(PortIndex::Output) == outputs);

        self.component
            .send_command(Command::StateSet(State::Loaded))
            .unwrap();
        for buffer in std::mem::take(&mut self.inputs)
            .into_iter()
            .chain(std::mem::take(&mut self.outputs))
        {
            self.component.free_buffer(buffer).unwrap();
        }
        self.wait_complete(Completed::StateSet(State::Loaded));
        assert_eq!(self.component.state(), State::Loaded);
        assert!(self.errors().is_empty(), "unexpected errors: {:?}", self.errors());
    }
}

fn timestamps(range: std::ops::Range<usize>) -> Vec<i64> {
    range.map(Harness::timestamp).collect()
}

#[test]
fn test_decode_stream_in_order() {
    let mut h = Harness::decoder(CodecKind::H264Dec, SimDecodeConfig::default());
    h.start();
    h.stream(0..6);

    // frame 0 carries the stream header and configures the decoder
    assert_eq!(h.displayed(), timestamps(1..6));
    let last = h.received.last().unwrap();
    assert!(last.flags.contains(BufferFlags::EOS));
    assert_eq!(last.len, 0);
    assert_eq!(last.timestamp, Harness::timestamp(5));
    h.shutdown();
}

#[test]
fn test_wmv_stream_decodes() {
    let mut h = Harness::decoder(CodecKind::Vc1Dec, SimDecodeConfig::default());
    h.start();
    h.stream(0..5);

    // frame 0 is the BITMAPINFOHEADER
    assert_eq!(h.displayed(), timestamps(1..5));
    assert!(h.errors().is_empty());
    h.shutdown();
}

#[test]
fn test_swapped_display_keeps_timestamps() {
    let mut h = Harness::decoder(
        CodecKind::H264Dec,
        SimDecodeConfig {
            display_delay: 1,
            order: DisplayOrder::SwapPairs,
            ..Default::default()
        },
    );
    h.start();
    h.stream(0..9);

    let displayed = h.displayed();
    let mut sorted = displayed.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, timestamps(1..9));
    assert_ne!(displayed, sorted);
    h.shutdown();
}

#[test]
fn test_random_interleaving_preserves_order() {
    let mut rng = rand::rng();
    let frames = rng.random_range(4..16);
    let mut h = Harness::decoder(
        CodecKind::Mpeg4Dec,
        SimDecodeConfig {
            display_delay: rng.random_range(0..3),
            ..Default::default()
        },
    );
    h.start();

    h.submit_outputs();
    for index in 0..frames {
        let flags = if index + 1 == frames {
            BufferFlags::EOS
        } else {
            BufferFlags::NONE
        };
        h.submit_frame(index, flags);
        // hand output buffers back at random points
        if rng.random_bool(0.5) {
            h.submit_outputs();
        }
    }
    h.pump_until(Harness::eos_seen);

    assert_eq!(h.displayed(), timestamps(1..frames));
    h.shutdown();
}

#[test]
fn test_flush_while_paused_returns_inputs() {
    let engine = SimVideoDecoder::new(SimDecodeConfig::default());
    let stats = engine.stats();
    let mut h = Harness::new(
        CodecKind::H264Dec,
        EngineHandle::video_decoder(engine),
        ComponentConfig::default(),
    );
    h.start();
    let inputs = h.held(PortIndex::Input);

    h.command(Command::StateSet(State::Pause), Completed::StateSet(State::Pause));
    h.submit_frame(0, BufferFlags::NONE);
    h.submit_frame(1, BufferFlags::NONE);
    assert_eq!(h.component.queued(PortIndex::Input), 2);
    let executions = stats.executions();

    h.command(
        Command::Flush(PortSelector::Port(PortIndex::Input)),
        Completed::Flush(PortIndex::Input),
    );
    assert_eq!(h.held(PortIndex::Input), inputs);
    assert_eq!(h.component.queued(PortIndex::Input), 0);
    assert_eq!(stats.executions(), executions);
    assert!(h.inputs.iter().all(|buffer| buffer.consumed() == 0));

    // flushing empty ports completes once per port
    h.component
        .send_command(Command::Flush(PortSelector::All))
        .unwrap();
    h.wait_complete(Completed::Flush(PortIndex::Input));
    h.wait_complete(Completed::Flush(PortIndex::Output));

    h.command(
        Command::StateSet(State::Executing),
        Completed::StateSet(State::Executing),
    );
    h.stream(0..5);
    assert_eq!(h.displayed(), timestamps(1..5));
    h.shutdown();
}

#[test]
fn test_pause_holds_inputs_until_resume() {
    let mut h = Harness::decoder(CodecKind::H264Dec, SimDecodeConfig::default());
    h.start();

    h.command(Command::StateSet(State::Pause), Completed::StateSet(State::Pause));
    h.submit_frame(0, BufferFlags::NONE);
    h.submit_frame(1, BufferFlags::NONE);
    std::thread::sleep(Duration::from_millis(100));
    assert!(h.messages.try_recv().is_err());
    assert_eq!(h.component.queued(PortIndex::Input), 2);

    h.command(
        Command::StateSet(State::Executing),
        Completed::StateSet(State::Executing),
    );
    h.stream(2..5);
    assert_eq!(h.displayed(), timestamps(1..5));
    h.shutdown();
}

#[test]
fn test_pause_holds_input_taken_while_waiting() {
    let mut h = Harness::decoder(CodecKind::H264Dec, SimDecodeConfig::default());
    h.start();

    // the loop holds an output and waits on the input queue
    h.submit_outputs();
    std::thread::sleep(Duration::from_millis(100));
    h.command(Command::StateSet(State::Pause), Completed::StateSet(State::Pause));
    h.submit_frame(0, BufferFlags::NONE);
    h.submit_frame(1, BufferFlags::NONE);
    std::thread::sleep(Duration::from_millis(200));
    assert!(h.messages.try_recv().is_err());
    assert!(h.component.queued(PortIndex::Input) >= 1);

    h.command(
        Command::StateSet(State::Executing),
        Completed::StateSet(State::Executing),
    );
    h.stream(2..5);
    assert_eq!(h.displayed(), timestamps(1..5));
    h.shutdown();
}

#[test]
fn test_empty_eos_buffer_drains_stream() {
    let mut h = Harness::decoder(
        CodecKind::H264Dec,
        SimDecodeConfig {
            display_delay: 1,
            ..Default::default()
        },
    );
    h.start();
    h.submit_outputs();
    for index in 0..4 {
        h.submit_frame(index, BufferFlags::NONE);
        h.submit_outputs();
    }
    h.submit_empty_eos(Harness::timestamp(4));
    h.pump_until(Harness::eos_seen);

    assert_eq!(h.displayed(), timestamps(1..4));
    let eos: Vec<&Received> = h
        .received
        .iter()
        .filter(|r| r.flags.contains(BufferFlags::EOS))
        .collect();
    assert_eq!(eos.len(), 1);
    assert_eq!(eos[0].len, 0);
    assert!(h.received.last().unwrap().flags.contains(BufferFlags::EOS));
    h.shutdown();
}

#[test]
fn test_seek_drops_stale_frames() {
    let mut h = Harness::decoder(
        CodecKind::H264Dec,
        SimDecodeConfig {
            display_delay: 2,
            ..Default::default()
        },
    );
    h.start();
    let inputs = h.held(PortIndex::Input);

    h.submit_outputs();
    for index in 0..inputs {
        h.submit_frame(index, BufferFlags::NONE);
    }
    h.pump_until(|h| h.held(PortIndex::Input) == inputs);

    h.command(
        Command::Flush(PortSelector::Port(PortIndex::Input)),
        Completed::Flush(PortIndex::Input),
    );
    h.stream(10..15);

    // frames held across the flush come back untagged and are dropped
    let displayed = h.displayed();
    assert!(displayed.iter().all(|&ts| ts > 0));
    let after: Vec<i64> = displayed
        .into_iter()
        .filter(|&ts| ts >= Harness::timestamp(10))
        .collect();
    assert_eq!(after, timestamps(10..15));
    h.shutdown();
}

#[test]
fn test_encoder_header_and_sync_frames() {
    let config = ComponentConfig {
        gop_size: 2,
        ..Default::default()
    };
    let mut h = Harness::new(
        CodecKind::Mpeg4Enc,
        EngineHandle::video_encoder(SimVideoEncoder::new()),
        config,
    );
    h.start();
    h.stream(0..4);

    let header = h.received[0];
    assert!(header.flags.contains(BufferFlags::CODEC_CONFIG));
    assert!(header.len > 0);

    let frames: Vec<(i64, bool)> = h
        .received
        .iter()
        .filter(|r| r.len > 0 && !r.flags.contains(BufferFlags::CODEC_CONFIG))
        .map(|r| (r.timestamp, r.flags.contains(BufferFlags::SYNC_FRAME)))
        .collect();
    assert_eq!(
        frames,
        vec![(0, true), (1000, false), (2000, true), (3000, false)]
    );
    assert!(h.received.last().unwrap().flags.contains(BufferFlags::EOS));
    h.shutdown();
}

#[test]
fn test_audio_stream_reaches_eos() {
    let mut h = Harness::new(
        CodecKind::Mp3Dec,
        EngineHandle::audio_decoder(SimAudioDecoder::new(2, 44_100)),
        ComponentConfig::default(),
    );
    h.start();
    h.stream(0..4);

    assert!(h.received.iter().any(|r| r.len > 0));
    assert!(h.received.last().unwrap().flags.contains(BufferFlags::EOS));
    h.shutdown();
}

#[test]
fn test_mark_reaches_target() {
    let mut h = Harness::decoder(CodecKind::H264Dec, SimDecodeConfig::default());
    h.start();
    let mark = Mark {
        target: h.component.id(),
        data: 42,
    };
    h.command(
        Command::MarkBuffer(PortIndex::Input, mark),
        Completed::MarkBuffer(PortIndex::Input),
    );
    h.stream(0..4);

    assert!(h.take_event(|event| matches!(event, Event::Mark(42))).is_some());
    assert!(h.received.iter().all(|r| r.mark.is_none()));
    h.shutdown();
}

#[test]
fn test_foreign_mark_travels_with_output() {
    let mut h = Harness::decoder(CodecKind::H264Dec, SimDecodeConfig::default());
    h.start();
    let mark = Mark {
        target: h.component.id() + 1000,
        data: 7,
    };
    h.command(
        Command::MarkBuffer(PortIndex::Input, mark),
        Completed::MarkBuffer(PortIndex::Input),
    );
    h.stream(0..4);

    let marked: Vec<Mark> = h.received.iter().filter_map(|r| r.mark).collect();
    assert_eq!(marked, vec![mark]);
    assert!(!h.events.iter().any(|event| matches!(event, Event::Mark(_))));
    h.shutdown();
}

#[test]
fn test_output_port_disable_enable() {
    let mut h = Harness::decoder(CodecKind::H263Dec, SimDecodeConfig::default());
    h.start();
    h.submit_outputs();
    let outputs = h
        .component
        .port_definition(PortIndex::Output)
        .buffer_count_actual;

    h.component
        .send_command(Command::PortDisable(PortSelector::Port(PortIndex::Output)))
        .unwrap();
    while h.held(PortIndex::Output) < outputs {
        h.pump();
    }
    for buffer in std::mem::take(&mut h.outputs) {
        assert!(h.component.free_buffer(buffer).unwrap().is_none());
    }
    h.wait_complete(Completed::PortDisable(PortIndex::Output));

    // disabling twice is refused
    assert!(matches!(
        h.component
            .send_command(Command::PortDisable(PortSelector::Port(PortIndex::Output))),
        Err(Error::IncorrectStateOperation)
    ));

    h.component
        .send_command(Command::PortEnable(PortSelector::Port(PortIndex::Output)))
        .unwrap();
    h.populate(PortIndex::Output);
    h.wait_complete(Completed::PortEnable(PortIndex::Output));

    h.stream(0..4);
    assert_eq!(h.displayed(), timestamps(1..4));
    h.shutdown();
}

#[test]
fn test_register_release_round_trip() {
    let mut h = Harness::decoder(CodecKind::Vp8Dec, SimDecodeConfig::default());
    let input = h.component.port_definition(PortIndex::Input);
    assert!(matches!(
        h.component.allocate_buffer(PortIndex::Input, input.buffer_size),
        Err(Error::IncorrectStateOperation)
    ));

    h.component
        .send_command(Command::StateSet(State::Idle))
        .unwrap();
    assert_eq!(h.component.state(), State::LoadedToIdle);

    let mut host_memory = Vec::new();
    for _ in 0..input.buffer_count_actual {
        let buffer = h
            .component
            .use_buffer(PortIndex::Input, vec![0xA5; input.buffer_size])
            .unwrap();
        host_memory.push(buffer);
    }
    assert!(matches!(
        h.component
            .use_buffer(PortIndex::Input, vec![0; input.buffer_size]),
        Err(Error::InsufficientResources(_))
    ));
    assert!(matches!(
        h.component.allocate_buffer(PortIndex::Output, 1),
        Err(Error::BadParameter(_))
    ));
    h.populate(PortIndex::Output);
    h.wait_complete(Completed::StateSet(State::Idle));
    assert_eq!(h.component.state(), State::Idle);

    h.component
        .send_command(Command::StateSet(State::Loaded))
        .unwrap();
    for buffer in host_memory {
        let memory = h.component.free_buffer(buffer).unwrap().unwrap();
        assert_eq!(memory.len(), input.buffer_size);
        assert!(memory.iter().all(|&b| b == 0xA5));
    }
    for buffer in std::mem::take(&mut h.outputs) {
        assert!(h.component.free_buffer(buffer).unwrap().is_none());
    }
    h.wait_complete(Completed::StateSet(State::Loaded));
    assert_eq!(h.component.state(), State::Loaded);
    assert!(h.errors().is_empty());
}

#[test]
fn test_rejected_commands() {
    let mut h = Harness::decoder(CodecKind::H264Dec, SimDecodeConfig::default());
    assert!(matches!(
        h.component
            .send_command(Command::StateSet(State::Executing)),
        Err(Error::IncorrectStateTransition {
            from: State::Loaded,
            to: State::Executing
        })
    ));
    assert!(matches!(
        h.component.send_command(Command::StateSet(State::Loaded)),
        Err(Error::SameState)
    ));
    assert!(matches!(
        h.component
            .send_command(Command::Flush(PortSelector::All)),
        Err(Error::IncorrectStateOperation)
    ));

    h.start();
    let mark = Mark { target: 1, data: 1 };
    assert!(matches!(
        h.component
            .send_command(Command::MarkBuffer(PortIndex::Output, mark)),
        Err(Error::BadPortIndex(1))
    ));

    // an input buffer on the output port is handed back
    let buffer = h.inputs.pop().unwrap();
    let id = buffer.id();
    let rejected = h.component.submit_output(buffer).unwrap_err();
    assert!(matches!(rejected.error, Error::BadParameter(_)));
    assert_eq!(rejected.buffer.id(), id);
    h.inputs.push(rejected.buffer);

    h.command(Command::StateSet(State::Idle), Completed::StateSet(State::Idle));
    let buffer = h.inputs.pop().unwrap();
    let rejected = h.component.submit_input(buffer).unwrap_err();
    assert!(matches!(rejected.error, Error::IncorrectStateOperation));
    h.inputs.push(rejected.buffer);

    h.command(
        Command::StateSet(State::Executing),
        Completed::StateSet(State::Executing),
    );
    h.shutdown();
}

#[test]
fn test_invalid_state_is_terminal() {
    let mut h = Harness::decoder(CodecKind::Mpeg4Dec, SimDecodeConfig::default());
    h.start();
    h.component
        .send_command(Command::StateSet(State::Invalid))
        .unwrap();
    while !h.errors().iter().any(|err| matches!(err, Error::InvalidState)) {
        h.pump();
    }
    assert_eq!(h.component.state(), State::Invalid);
    assert!(matches!(
        h.component.send_command(Command::StateSet(State::Idle)),
        Err(Error::InvalidState)
    ));
    assert!(matches!(
        h.component.allocate_buffer(PortIndex::Input, 1),
        Err(Error::InvalidState)
    ));
}
