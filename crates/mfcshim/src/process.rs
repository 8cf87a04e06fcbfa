// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Buffer-process loop.
//!
//! One thread per executing component moves buffers between the two ports
//! and the codec step. It blocks only in the port queues and on the run
//! signal; every host callback is made after the work lock is dropped.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::buffer::{Buffer, BufferFlags, Mark};
use crate::callbacks::{Event, HostCallbacks};
use crate::codec::frame::{find_frame_end, FrameSplit};
use crate::codec::{CodecStep, InputRecord, OutputRecord, StepResult};
use crate::component::Inner;
use crate::ledger::FrameRecord;
use crate::port::PortIndex;
use crate::sync::lock;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum LoopState {
    NotRunning = 0,
    Running = 1,
    Exiting = 2,
}

#[derive(Debug)]
pub(crate) struct LoopFlag(AtomicU8);

impl LoopFlag {
    pub fn new() -> Self {
        Self(AtomicU8::new(LoopState::NotRunning as u8))
    }

    pub fn get(&self) -> LoopState {
        match self.0.load(Ordering::Acquire) {
            1 => LoopState::Running,
            2 => LoopState::Exiting,
            _ => LoopState::NotRunning,
        }
    }

    pub fn set(&self, state: LoopState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Output filter armed by an input flush.
///
/// After a seek the engine may still emit frames decoded before the flush.
/// Output is dropped until the first frame staged after the flush comes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Gate {
    Open,
    Armed,
    Waiting(FrameRecord),
}

/// Something to hand to the host once the work lock is released.
#[derive(Debug)]
pub(crate) enum Outgoing {
    Input(Buffer),
    Output(Buffer),
    Event(Event),
}

impl Outgoing {
    pub fn dispatch(self, host: &dyn HostCallbacks) {
        match self {
            Outgoing::Input(buffer) => host.on_input_consumed(buffer),
            Outgoing::Output(buffer) => host.on_output_ready(buffer),
            Outgoing::Event(event) => host.on_event(event),
        }
    }
}

pub(crate) fn dispatch_all(host: &dyn HostCallbacks, outgoing: Vec<Outgoing>) {
    for item in outgoing {
        item.dispatch(host);
    }
}

/// Loop state shared with the command thread.
///
/// Guarded by one mutex: the loop holds it for a single step, the command
/// thread holds it while flushing or changing state.
pub(crate) struct Work {
    pub codec: Box<dyn CodecStep>,
    /// Input buffer whose bytes are being staged
    pub input: Option<Buffer>,
    /// Output buffer waiting for a frame
    pub output: Option<Buffer>,
    pub staged: InputRecord,
    /// `staged` holds a complete frame
    pub staged_ready: bool,
    /// Bytes of the next frame read from an earlier buffer
    pub carry: Vec<u8>,
    pub result: OutputRecord,
    /// The host marks frame boundaries itself
    pub frame_marked: bool,
    pub gate: Gate,
    /// Mark of a consumed frame waiting for its output
    pub carry_mark: Option<Mark>,
}

impl Work {
    pub fn new(codec: Box<dyn CodecStep>) -> Self {
        Self {
            codec,
            input: None,
            output: None,
            staged: InputRecord::default(),
            staged_ready: false,
            carry: Vec::new(),
            result: OutputRecord::default(),
            frame_marked: false,
            gate: Gate::Open,
            carry_mark: None,
        }
    }

    /// Drop staged input and give back the held input buffer.
    pub fn reset_input(&mut self) -> Option<Buffer> {
        self.staged.reset();
        self.staged_ready = false;
        self.carry.clear();
        self.frame_marked = false;
        self.carry_mark = None;
        self.input.take()
    }

    /// Drop the pending result and give back the held output buffer.
    pub fn reset_output(&mut self) -> Option<Buffer> {
        self.result.reset();
        self.output.take().map(|mut buffer| {
            buffer.clear();
            buffer
        })
    }
}

pub(crate) fn run(inner: Arc<Inner>) {
    log::debug!("{} buffer process started", inner.kind);
    while inner.loop_state.get() != LoopState::Exiting {
        if !inner.can_run() {
            inner.run.wait();
            continue;
        }
        if !take_buffer(&inner, PortIndex::Output) {
            continue;
        }
        if !take_buffer(&inner, PortIndex::Input) {
            continue;
        }

        let outgoing = {
            let mut work = lock(&inner.work);
            if !inner.can_run() {
                // paused while dequeuing, held buffers wait for the resume
                continue;
            }
            process(&inner, &mut work)
        };
        dispatch_all(inner.host.as_ref(), outgoing);
    }
    log::debug!("{} buffer process exiting", inner.kind);
}

/// Make sure the loop holds a buffer for `index`.
///
/// Returns false when the loop must re-check its state first (woken
/// without a buffer, shutting down, or the buffer was flushed).
fn take_buffer(inner: &Inner, index: PortIndex) -> bool {
    {
        let work = lock(&inner.work);
        let held = match index {
            PortIndex::Input => work.input.is_some() || work.staged_ready,
            PortIndex::Output => work.output.is_some(),
        };
        if held {
            return true;
        }
    }

    let port = inner.port(index);
    let Some((mut buffer, epoch)) = port.dequeue() else {
        return false;
    };

    let mut work = lock(&inner.work);
    if epoch != port.flush_epoch() || port.is_flushing() {
        drop(work);
        log::trace!("{:?} buffer {:?} flushed before processing", index, buffer.id());
        match index {
            PortIndex::Input => inner.host.on_input_consumed(buffer),
            PortIndex::Output => {
                buffer.clear();
                inner.host.on_output_ready(buffer);
            }
        }
        return false;
    }

    match index {
        PortIndex::Input => {
            if buffer.mark().is_none() {
                buffer.set_mark(port.take_pending_mark());
            }
            work.input = Some(buffer);
        }
        PortIndex::Output => work.output = Some(buffer),
    }
    inner.loop_state.get() != LoopState::Exiting
}

/// Run one iteration with both buffers held.
pub(crate) fn process(inner: &Inner, work: &mut Work) -> Vec<Outgoing> {
    let mut outgoing = Vec::new();
    if work.output.is_none() {
        return outgoing;
    }

    if !work.staged_ready {
        stage(inner, work, &mut outgoing);
        if !work.staged_ready {
            return outgoing;
        }
    }

    let result = work.codec.step(&work.staged, &mut work.result);
    match result {
        StepResult::Done => {
            if let Some(mark) = work.staged.mark.take() {
                work.carry_mark = Some(mark);
            }
            work.staged.reset();
            work.staged_ready = false;
            release_consumed_input(work, &mut outgoing);
        }
        StepResult::NeedMoreInput => {}
        StepResult::Fatal(err) => {
            log::error!("{} frame at {} failed: {}", inner.kind, work.staged.timestamp, err);
            outgoing.push(Outgoing::Event(Event::Error(err)));
            work.staged.reset();
            work.staged_ready = false;
            work.result.reset();
            release_consumed_input(work, &mut outgoing);
        }
    }

    if let Some(settings) = work.codec.take_settings_change() {
        log::debug!("{} output settings changed: {:?}", inner.kind, settings.format);
        inner
            .port(PortIndex::Output)
            .update_format(settings.format, settings.buffer_size, settings.crop);
        outgoing.push(Outgoing::Event(Event::PortSettingsChanged(PortIndex::Output)));
    }

    if work.result.is_ready() {
        deliver(inner, work, &mut outgoing);
    }
    outgoing
}

fn release_consumed_input(work: &mut Work, outgoing: &mut Vec<Outgoing>) {
    if work
        .input
        .as_ref()
        .map_or(false, |buffer| buffer.filled_len() == 0)
    {
        if let Some(buffer) = work.input.take() {
            outgoing.push(Outgoing::Input(buffer));
        }
    }
}

/// Move bytes from the held input buffer into the staged frame.
fn stage(inner: &Inner, work: &mut Work, outgoing: &mut Vec<Outgoing>) {
    let Some(input) = work.input.as_mut() else {
        return;
    };

    let flags = input.flags();
    if flags.contains(BufferFlags::END_OF_FRAME) {
        work.frame_marked = true;
    }
    let split = if work.frame_marked {
        FrameSplit::WholeBuffer
    } else {
        work.codec.kind().split()
    };

    let staged = &mut work.staged;
    if staged.data.is_empty() {
        staged.timestamp = input.timestamp();
        staged.flags = flags.without(BufferFlags::EOS);
        staged.data.append(&mut work.carry);
    }
    if let Some(mark) = input.mark() {
        staged.mark = Some(mark);
        input.set_mark(None);
    }

    let previous = staged.data.len();
    staged.data.extend_from_slice(input.filled());
    let complete = match find_frame_end(split, &staged.data) {
        Some(end) if end > 0 => {
            input.take_payload(end.saturating_sub(previous));
            if end < previous {
                work.carry.extend_from_slice(&staged.data[end..previous]);
            }
            staged.data.truncate(end);
            true
        }
        _ => {
            let len = input.filled_len();
            input.take_payload(len);
            split == FrameSplit::WholeBuffer || flags.contains(BufferFlags::EOS)
        }
    };

    if input.filled_len() == 0 && flags.contains(BufferFlags::EOS) {
        staged.flags.insert(BufferFlags::EOS);
    }

    let limit = work.codec.max_frame_size();
    if staged.data.len() > limit {
        log::warn!(
            "{} dropping {} byte frame, engine accepts {}",
            inner.kind,
            staged.data.len(),
            limit
        );
        outgoing.push(Outgoing::Event(Event::Error(Error::InsufficientResources(
            format!("frame of {} bytes exceeds {}", staged.data.len(), limit),
        ))));
        let eos = staged.is_eos();
        staged.reset();
        if eos {
            // keep the end of stream edge
            staged.flags = BufferFlags::EOS;
            work.staged_ready = true;
        }
        release_consumed_input(work, outgoing);
        return;
    }

    if complete && (!staged.data.is_empty() || staged.is_eos()) {
        work.staged_ready = true;
        if work.gate == Gate::Armed
            && !staged.is_eos()
            && !staged.flags.contains(BufferFlags::CODEC_CONFIG)
        {
            work.gate = Gate::Waiting(FrameRecord {
                timestamp: staged.timestamp,
                flags: staged.flags,
            });
        }
        log::trace!(
            "{} staged {} bytes at {}",
            inner.kind,
            staged.data.len(),
            staged.timestamp
        );
    } else {
        release_consumed_input(work, outgoing);
    }
}

/// Hand the pending result to the host in the held output buffer.
fn deliver(inner: &Inner, work: &mut Work, outgoing: &mut Vec<Outgoing>) {
    let record = &mut work.result;
    let eos = record.flags.contains(BufferFlags::EOS);

    if let Gate::Waiting(expected) = work.gate {
        if !eos {
            let flags = record.flags.without(BufferFlags::EOS);
            if record.timestamp != expected.timestamp || flags != expected.flags {
                log::trace!(
                    "{} dropping frame at {} before seek target {}",
                    inner.kind,
                    record.timestamp,
                    expected.timestamp
                );
                record.reset();
                return;
            }
        }
        work.gate = Gate::Open;
    }

    let Some(mut buffer) = work.output.take() else {
        return;
    };
    let len = buffer.store_output(&record.data);
    if len < record.data.len() {
        log::warn!(
            "{} output frame truncated from {} to {} bytes",
            inner.kind,
            record.data.len(),
            len
        );
    }
    buffer.set_timestamp(record.timestamp);
    buffer.set_flags(record.flags);

    let mark = record.mark.take().or_else(|| work.carry_mark.take());
    match mark {
        Some(mark) if mark.target == inner.id => {
            outgoing.push(Outgoing::Event(Event::Mark(mark.data)));
            buffer.set_mark(None);
        }
        other => buffer.set_mark(other),
    }

    log::trace!(
        "{} output {} bytes at {} {:?}",
        inner.kind,
        len,
        record.timestamp,
        record.flags
    );
    let flags = record.flags;
    record.reset();
    outgoing.push(Outgoing::Output(buffer));
    if eos {
        outgoing.push(Outgoing::Event(Event::BufferFlag(PortIndex::Output, flags)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_flag() {
        let flag = LoopFlag::new();
        assert_eq!(flag.get(), LoopState::NotRunning);
        flag.set(LoopState::Running);
        assert_eq!(flag.get(), LoopState::Running);
        flag.set(LoopState::Exiting);
        assert_eq!(flag.get(), LoopState::Exiting);
    }
}
