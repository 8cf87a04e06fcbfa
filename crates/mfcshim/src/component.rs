// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Component state machine and host-facing API.
//!
//! A [`Component`] owns both ports, the codec step and the two worker
//! threads: the command thread executes state changes, flushes and port
//! commands in order, and the buffer-process loop moves frames once the
//! component is executing.
//!
//! # Example
//!
//! ```no_run
//! use mfcshim::callbacks::{ChannelHost, Event, HostMessage};
//! use mfcshim::codec::CodecKind;
//! use mfcshim::component::{Command, Component, State};
//! use mfcshim::config::ComponentConfig;
//! use mfcshim::engine::EngineHandle;
//! use mfcshim::port::PortIndex;
//! use mfcshim::sim::SimVideoDecoder;
//!
//! let (host, events) = ChannelHost::new();
//! let engine = EngineHandle::video_decoder(SimVideoDecoder::default());
//! let component = Component::new(CodecKind::H264Dec, engine, ComponentConfig::default(), host)?;
//!
//! component.send_command(Command::StateSet(State::Idle))?;
//! for port in PortIndex::ALL {
//!     let definition = component.port_definition(port);
//!     for _ in 0..definition.buffer_count_actual {
//!         let buffer = component.allocate_buffer(port, definition.buffer_size)?;
//!         // keep the buffer until it is submitted
//! #       drop(buffer);
//!     }
//! }
//! // wait for Event::CmdComplete(Completed::StateSet(State::Idle)) on `events`
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};

use crate::buffer::{Buffer, Mark};
use crate::callbacks::{Completed, Event, HostCallbacks};
use crate::codec::{self, CodecKind, DynamicConfig};
use crate::config::ComponentConfig;
use crate::engine::EngineHandle;
use crate::pool::Ownership;
use crate::port::{CropRect, Port, PortDefinition, PortIndex};
use crate::process::{self, dispatch_all, Gate, LoopFlag, LoopState, Outgoing, Work};
use crate::sync::{lock, Signal};
use crate::Error;

/// Component lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    Loaded,
    Idle,
    Executing,
    Pause,
    Invalid,
    /// Waiting for every enabled port to be populated
    LoadedToIdle,
    /// Waiting for every buffer to be released
    IdleToLoaded,
    IdleToExecuting,
    /// Returning buffers owned by the component
    ExecutingToIdle,
}

impl State {
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            State::LoadedToIdle
                | State::IdleToLoaded
                | State::IdleToExecuting
                | State::ExecutingToIdle
        )
    }

    /// True in the states where buffers may be exchanged.
    pub fn is_running(self) -> bool {
        matches!(self, State::Executing | State::Pause)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Which ports a command applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSelector {
    Port(PortIndex),
    All,
}

impl PortSelector {
    pub fn ports(self) -> Vec<PortIndex> {
        match self {
            PortSelector::Port(index) => vec![index],
            PortSelector::All => PortIndex::ALL.to_vec(),
        }
    }
}

impl From<PortIndex> for PortSelector {
    fn from(index: PortIndex) -> Self {
        PortSelector::Port(index)
    }
}

/// Asynchronous command executed on the command thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StateSet(State),
    Flush(PortSelector),
    PortDisable(PortSelector),
    PortEnable(PortSelector),
    MarkBuffer(PortIndex, Mark),
}

/// A submitted buffer the component refused, handed back to the caller.
#[derive(Debug)]
pub struct Rejected {
    pub error: Error,
    pub buffer: Buffer,
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer {:?} rejected: {}", self.buffer.id(), self.error)
    }
}

impl std::error::Error for Rejected {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[derive(Debug, Clone, Copy)]
struct Lifecycle {
    current: State,
    /// State once every queued command has run
    target: State,
}

static NEXT_COMPONENT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct Inner {
    pub id: u64,
    pub kind: CodecKind,
    pub host: Arc<dyn HostCallbacks>,
    pub work: Mutex<Work>,
    pub loop_state: LoopFlag,
    /// Set while the loop may process frames
    pub run: Signal,
    ports: [Port; 2],
    lifecycle: Mutex<Lifecycle>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    initialised: Mutex<bool>,
}

impl Inner {
    pub fn port(&self, index: PortIndex) -> &Port {
        &self.ports[index.as_usize()]
    }

    pub fn state(&self) -> State {
        lock(&self.lifecycle).current
    }

    pub fn can_run(&self) -> bool {
        self.state() == State::Executing && self.ports.iter().all(Port::is_enabled)
    }

    fn set_state(&self, state: State) {
        let mut lifecycle = lock(&self.lifecycle);
        log::debug!("{} state {} -> {}", self.kind, lifecycle.current, state);
        lifecycle.current = state;
        if !state.is_transient() {
            lifecycle.target = state;
        }
        drop(lifecycle);

        let port_state = match state {
            State::LoadedToIdle | State::ExecutingToIdle => State::Idle,
            State::IdleToLoaded => State::Loaded,
            State::IdleToExecuting => State::Executing,
            other => other,
        };
        for port in &self.ports {
            if port.is_enabled() {
                port.set_lifecycle(port_state);
            }
        }
        self.update_run();
    }

    /// Wake or park the loop to match the current state.
    fn update_run(&self) {
        if self.can_run() || self.loop_state.get() == LoopState::Exiting {
            self.run.set();
        } else {
            self.run.reset();
        }
    }

    fn wake_loop(&self) {
        for port in &self.ports {
            port.wake();
        }
    }

    fn complete(&self, completed: Completed) {
        log::debug!("{} completed {:?}", self.kind, completed);
        self.host.on_event(Event::CmdComplete(completed));
    }

    fn fail(&self, error: Error) {
        log::error!("{} command failed: {}", self.kind, error);
        self.host.on_event(Event::Error(error));
    }

    fn start_loop(self: &Arc<Self>) -> Result<(), Error> {
        self.loop_state.set(LoopState::Running);
        let inner = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("{}-process", self.kind.role()))
            .spawn(move || process::run(inner))
            .map_err(|err| {
                self.loop_state.set(LoopState::NotRunning);
                Error::Io(err)
            })?;
        *lock(&self.loop_handle) = Some(handle);
        Ok(())
    }

    fn stop_loop(&self) {
        let Some(handle) = lock(&self.loop_handle).take() else {
            return;
        };
        self.loop_state.set(LoopState::Exiting);
        self.run.set();
        self.wake_loop();
        if handle.join().is_err() {
            log::error!("{} buffer process panicked", self.kind);
        }
        self.loop_state.set(LoopState::NotRunning);
        self.update_run();
    }

    /// Take every buffer of `index` away from the loop and the queue.
    fn collect_port(&self, work: &mut Work, index: PortIndex, outgoing: &mut Vec<Outgoing>) {
        let port = self.port(index);
        match index {
            PortIndex::Input => {
                if let Some(buffer) = work.reset_input() {
                    outgoing.push(Outgoing::Input(buffer));
                }
                for buffer in port.drain_queue() {
                    outgoing.push(Outgoing::Input(buffer));
                }
            }
            PortIndex::Output => {
                if let Some(buffer) = work.reset_output() {
                    outgoing.push(Outgoing::Output(buffer));
                }
                for mut buffer in port.drain_queue() {
                    buffer.clear();
                    outgoing.push(Outgoing::Output(buffer));
                }
            }
        }
    }

    /// Return the buffers of `ports` to the host and reset the codec.
    fn flush_ports(&self, ports: &[PortIndex], seek: bool) {
        for &index in ports {
            self.port(index).begin_flush();
        }
        self.wake_loop();

        let mut outgoing = Vec::new();
        {
            let mut work = lock(&self.work);
            for &index in ports {
                self.collect_port(&mut work, index, &mut outgoing);
                work.codec.flush(index);
                if seek && index == PortIndex::Input && work.codec.holds_frames() {
                    work.gate = Gate::Armed;
                }
            }
            if !seek {
                work.gate = Gate::Open;
            }
        }
        for &index in ports {
            self.port(index).end_flush();
        }
        log::debug!("{} flushed {:?}, {} buffers returned", self.kind, ports, outgoing.len());
        dispatch_all(self.host.as_ref(), outgoing);
    }

    fn execute(self: &Arc<Self>, command: Command) {
        match command {
            Command::StateSet(state) => self.execute_state_set(state),
            Command::Flush(ports) => {
                for index in ports.ports() {
                    self.flush_ports(&[index], true);
                    self.complete(Completed::Flush(index));
                }
            }
            Command::PortDisable(ports) => {
                for index in ports.ports() {
                    self.disable_port(index);
                }
            }
            Command::PortEnable(ports) => {
                for index in ports.ports() {
                    self.enable_port(index);
                }
            }
            Command::MarkBuffer(index, mark) => {
                self.port(index).set_pending_mark(mark);
                self.complete(Completed::MarkBuffer(index));
            }
        }
    }

    fn execute_state_set(self: &Arc<Self>, target: State) {
        let from = self.state();
        let result = match (from, target) {
            (_, State::Invalid) => {
                self.teardown();
                self.set_state(State::Invalid);
                self.fail(Error::InvalidState);
                return;
            }
            (State::LoadedToIdle, State::Idle) => self.load(),
            (State::Idle | State::IdleToLoaded, State::Loaded) => self.unload(),
            (State::Idle, State::Executing) => {
                self.set_state(State::IdleToExecuting);
                self.set_state(State::Executing);
                Ok(())
            }
            (State::Pause, State::Executing) => {
                self.set_state(target);
                Ok(())
            }
            (State::Executing, State::Pause) => {
                // an iteration in progress finishes before the pause completes
                let _work = lock(&self.work);
                self.set_state(target);
                Ok(())
            }
            (State::Executing | State::Pause, State::Idle) => {
                self.set_state(State::ExecutingToIdle);
                self.flush_ports(&PortIndex::ALL, false);
                self.set_state(State::Idle);
                Ok(())
            }
            (from, to) => Err(Error::IncorrectStateTransition { from, to }),
        };

        match result {
            Ok(()) => self.complete(Completed::StateSet(target)),
            Err(err) => {
                let mut lifecycle = lock(&self.lifecycle);
                lifecycle.target = lifecycle.current;
                drop(lifecycle);
                self.fail(err);
            }
        }
    }

    /// Loaded to Idle: wait for buffers, initialise the codec, start the loop.
    fn load(self: &Arc<Self>) -> Result<(), Error> {
        for port in &self.ports {
            if port.is_enabled() && !port.wait_populated() {
                return Err(Error::IncorrectStateOperation);
            }
        }

        if let Err(err) = lock(&self.work).codec.init() {
            self.set_state(State::Loaded);
            return Err(err);
        }
        *lock(&self.initialised) = true;

        if let Err(err) = self.start_loop() {
            lock(&self.work).codec.terminate();
            *lock(&self.initialised) = false;
            self.set_state(State::Loaded);
            return Err(err);
        }
        self.set_state(State::Idle);
        Ok(())
    }

    /// Idle to Loaded: stop the loop, release the codec, wait for the host
    /// to free every buffer.
    fn unload(&self) -> Result<(), Error> {
        self.set_state(State::IdleToLoaded);
        self.teardown();
        for port in &self.ports {
            if !port.wait_unpopulated() {
                return Err(Error::IncorrectStateOperation);
            }
        }
        self.set_state(State::Loaded);
        Ok(())
    }

    fn teardown(&self) {
        self.stop_loop();
        let mut outgoing = Vec::new();
        {
            let mut work = lock(&self.work);
            for index in PortIndex::ALL {
                self.collect_port(&mut work, index, &mut outgoing);
            }
            let mut initialised = lock(&self.initialised);
            if *initialised {
                work.codec.terminate();
                *initialised = false;
            }
        }
        dispatch_all(self.host.as_ref(), outgoing);
    }

    fn disable_port(&self, index: PortIndex) {
        let port = self.port(index);
        port.set_enabled(false);
        self.update_run();
        self.flush_ports(&[index], false);
        let state = self.state();
        port.set_lifecycle(State::Loaded);
        if state != State::Loaded && !port.wait_unpopulated() {
            self.fail(Error::IncorrectStateOperation);
            return;
        }
        self.complete(Completed::PortDisable(index));
    }

    fn enable_port(&self, index: PortIndex) {
        let port = self.port(index);
        let state = self.state();
        if state != State::Loaded && !port.wait_populated() {
            self.fail(Error::IncorrectStateOperation);
            return;
        }
        port.set_enabled(true);
        port.set_lifecycle(state);
        self.update_run();
        self.complete(Completed::PortEnable(index));
    }
}

/// One codec session.
pub struct Component {
    inner: Arc<Inner>,
    commands: Mutex<Option<Sender<Command>>>,
    command_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Component {
    /// Create a component in the Loaded state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadParameter`] if `engine` cannot run `kind`, and
    /// [`Error::Io`] if the command thread cannot be started.
    pub fn new(
        kind: CodecKind,
        engine: EngineHandle,
        config: ComponentConfig,
        host: Arc<dyn HostCallbacks>,
    ) -> Result<Self, Error> {
        let codec = codec::create(kind, engine, &config)?;
        let [input, output] = kind.port_definitions(&config);
        let inner = Arc::new(Inner {
            id: NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            host,
            work: Mutex::new(Work::new(codec)),
            loop_state: LoopFlag::new(),
            run: Signal::new(),
            ports: [Port::new(input), Port::new(output)],
            lifecycle: Mutex::new(Lifecycle {
                current: State::Loaded,
                target: State::Loaded,
            }),
            loop_handle: Mutex::new(None),
            initialised: Mutex::new(false),
        });

        let (sender, receiver) = mpsc::channel();
        let command_thread = {
            let inner = Arc::clone(&inner);
            thread::Builder::new()
                .name(format!("{}-command", kind.role()))
                .spawn(move || command_loop(inner, receiver))?
        };
        log::debug!("{} created", kind);

        Ok(Self {
            inner,
            commands: Mutex::new(Some(sender)),
            command_thread: Mutex::new(Some(command_thread)),
        })
    }

    pub fn kind(&self) -> CodecKind {
        self.inner.kind
    }

    /// Identity used as the target of buffer marks.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn state(&self) -> State {
        self.inner.state()
    }

    pub fn port_definition(&self, index: PortIndex) -> PortDefinition {
        self.inner.port(index).definition()
    }

    pub fn crop(&self, index: PortIndex) -> CropRect {
        self.inner.port(index).crop()
    }

    /// Buffers waiting in the port's queue.
    pub fn queued(&self, index: PortIndex) -> usize {
        self.inner.port(index).queued()
    }

    /// Validate `command` and queue it for the command thread.
    ///
    /// The outcome of an accepted command arrives as exactly one
    /// `Event::CmdComplete` (one per port for port commands) or
    /// `Event::Error`.
    pub fn send_command(&self, command: Command) -> Result<(), Error> {
        let mut lifecycle = lock(&self.inner.lifecycle);
        let current = lifecycle.target;
        if current == State::Invalid {
            return Err(Error::InvalidState);
        }

        match command {
            Command::StateSet(target) => {
                validate_transition(current, target)?;
                lifecycle.target = target;
                // open the registration (or release) window before the
                // call returns
                let window = match (current, target) {
                    (State::Loaded, State::Idle) => Some(State::LoadedToIdle),
                    (State::Idle, State::Loaded) => Some(State::IdleToLoaded),
                    _ => None,
                };
                if let Some(window) = window {
                    drop(lifecycle);
                    self.inner.set_state(window);
                    lifecycle = lock(&self.inner.lifecycle);
                }
            }
            Command::MarkBuffer(PortIndex::Output, _) => {
                return Err(Error::BadPortIndex(PortIndex::Output as u32));
            }
            Command::Flush(_) | Command::MarkBuffer(..) if !current.is_running() => {
                return Err(Error::IncorrectStateOperation);
            }
            Command::Flush(_) | Command::MarkBuffer(..) => {}
            Command::PortDisable(ports) => {
                if ports
                    .ports()
                    .iter()
                    .any(|&index| !self.inner.port(index).is_enabled())
                {
                    return Err(Error::IncorrectStateOperation);
                }
            }
            Command::PortEnable(ports) => {
                let ports = ports.ports();
                if ports.iter().any(|&index| self.inner.port(index).is_enabled()) {
                    return Err(Error::IncorrectStateOperation);
                }
                if current != State::Loaded {
                    for index in ports {
                        // buffers for the port may be registered right away
                        self.inner.port(index).set_lifecycle(State::Idle);
                    }
                }
            }
        }
        drop(lifecycle);

        let commands = lock(&self.commands);
        let sender = commands.as_ref().ok_or(Error::InvalidState)?;
        sender.send(command).map_err(|_| Error::InvalidState)
    }

    /// Register a buffer whose memory the component allocates.
    pub fn allocate_buffer(&self, index: PortIndex, size: usize) -> Result<Buffer, Error> {
        self.register(index, vec![0; size], Ownership::Component)
    }

    /// Register host-supplied memory as a buffer.
    pub fn use_buffer(&self, index: PortIndex, memory: Vec<u8>) -> Result<Buffer, Error> {
        self.register(index, memory, Ownership::Host)
    }

    fn register(&self, index: PortIndex, data: Vec<u8>, ownership: Ownership) -> Result<Buffer, Error> {
        let state = self.state();
        if state == State::Invalid {
            return Err(Error::InvalidState);
        }
        let buffer = self
            .inner
            .port(index)
            .register(data, ownership, state == State::LoadedToIdle)?;
        log::trace!("{} registered {:?}", self.inner.kind, buffer.id());
        Ok(buffer)
    }

    /// Release a buffer, returning host-supplied memory.
    ///
    /// Releasing a buffer while its port still needs it succeeds but raises
    /// `Event::Error(Error::PortUnpopulated)`.
    pub fn free_buffer(&self, buffer: Buffer) -> Result<Option<Vec<u8>>, Error> {
        let index = buffer.port();
        let release = self.inner.port(index).release(buffer)?;
        if release.unpopulated_early && self.inner.port(index).is_enabled() {
            log::warn!("{} {:?} port unpopulated while in use", self.inner.kind, index);
            self.inner
                .host
                .on_event(Event::Error(Error::PortUnpopulated(index)));
        }
        Ok(release.memory)
    }

    /// Queue a filled input buffer.
    pub fn submit_input(&self, buffer: Buffer) -> Result<(), Rejected> {
        self.submit(PortIndex::Input, buffer)
    }

    /// Queue an empty output buffer to be filled.
    pub fn submit_output(&self, buffer: Buffer) -> Result<(), Rejected> {
        self.submit(PortIndex::Output, buffer)
    }

    fn submit(&self, index: PortIndex, mut buffer: Buffer) -> Result<(), Rejected> {
        let port = self.inner.port(index);
        let reject = |error, buffer| Err(Rejected { error, buffer });

        let state = self.state();
        if !state.is_running() {
            return reject(Error::IncorrectStateOperation, buffer);
        }
        if buffer.port() != index || !port.owns(buffer.id()) {
            let error = Error::BadParameter(format!(
                "buffer {:?} does not belong to the {:?} port",
                buffer.id(),
                index
            ));
            return reject(error, buffer);
        }
        if !port.is_enabled() {
            return reject(Error::IncorrectStateOperation, buffer);
        }

        buffer.reset_for_submit();
        if index == PortIndex::Output {
            buffer.clear();
        }
        port.enqueue(buffer).or_else(|buffer| {
            reject(
                Error::InsufficientResources(format!("{:?} queue full", index)),
                buffer,
            )
        })
    }

    /// Change encoder parameters; applied from the next frame.
    pub fn set_config(&self, config: DynamicConfig) -> Result<(), Error> {
        lock(&self.inner.work).codec.set_config(config)
    }
}

impl Drop for Component {
    fn drop(&mut self) {
        for port in &self.inner.ports {
            port.abort_waits();
        }
        lock(&self.commands).take();
        if let Some(handle) = lock(&self.command_thread).take() {
            if handle.join().is_err() {
                log::error!("{} command thread panicked", self.inner.kind);
            }
        }
        self.inner.stop_loop();
        let mut work = lock(&self.inner.work);
        let mut initialised = lock(&self.inner.initialised);
        if *initialised {
            work.codec.terminate();
            *initialised = false;
        }
        log::debug!("{} destroyed", self.inner.kind);
    }
}

fn command_loop(inner: Arc<Inner>, commands: Receiver<Command>) {
    for command in commands {
        log::debug!("{} executing {:?}", inner.kind, command);
        inner.execute(command);
    }
}

fn validate_transition(from: State, to: State) -> Result<(), Error> {
    if from == to {
        return Err(Error::SameState);
    }
    match (from, to) {
        (_, State::Invalid)
        | (State::Loaded, State::Idle)
        | (State::Idle, State::Loaded)
        | (State::Idle, State::Executing)
        | (State::Executing, State::Pause)
        | (State::Pause, State::Executing)
        | (State::Executing, State::Idle)
        | (State::Pause, State::Idle) => Ok(()),
        (from, to) => Err(Error::IncorrectStateTransition { from, to }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_transition() {
        assert!(validate_transition(State::Loaded, State::Idle).is_ok());
        assert!(validate_transition(State::Pause, State::Idle).is_ok());
        assert!(validate_transition(State::Executing, State::Invalid).is_ok());
        assert!(matches!(
            validate_transition(State::Idle, State::Idle),
            Err(Error::SameState)
        ));
        assert!(matches!(
            validate_transition(State::Loaded, State::Executing),
            Err(Error::IncorrectStateTransition {
                from: State::Loaded,
                to: State::Executing
            })
        ));
    }

    #[test]
    fn test_port_selector() {
        assert_eq!(PortSelector::All.ports(), vec![PortIndex::Input, PortIndex::Output]);
        assert_eq!(PortSelector::from(PortIndex::Output).ports(), vec![PortIndex::Output]);
    }

    #[test]
    fn test_transient_states() {
        assert!(State::LoadedToIdle.is_transient());
        assert!(!State::Pause.is_transient());
        assert!(State::Pause.is_running());
        assert!(!State::Idle.is_running());
    }
}
