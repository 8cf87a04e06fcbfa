// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Host completion interface.
//!
//! A component reports everything that happens off the caller's thread
//! through [`HostCallbacks`]: returned input buffers, filled output buffers
//! and asynchronous events. Callbacks are invoked from the component's
//! worker threads with no component lock held, so a host may call back into
//! the component (e.g. resubmit a buffer) from inside a callback.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::buffer::{Buffer, BufferFlags};
use crate::component::State;
use crate::port::PortIndex;
use crate::sync::lock;
use crate::Error;

/// A command that finished executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completed {
    StateSet(State),
    Flush(PortIndex),
    PortDisable(PortIndex),
    PortEnable(PortIndex),
    MarkBuffer(PortIndex),
}

/// Asynchronous component event.
#[derive(Debug)]
pub enum Event {
    CmdComplete(Completed),
    Error(Error),
    /// The port's format or buffer requirements changed
    PortSettingsChanged(PortIndex),
    /// A buffer carrying these flags (end of stream) left the port
    BufferFlag(PortIndex, BufferFlags),
    /// A marked frame reached its target component
    Mark(u64),
}

pub trait HostCallbacks: Send + Sync {
    fn on_event(&self, event: Event);

    /// An input buffer is handed back to the host.
    fn on_input_consumed(&self, buffer: Buffer);

    /// A filled output buffer is handed back to the host.
    fn on_output_ready(&self, buffer: Buffer);
}

/// Message produced by [`ChannelHost`].
#[derive(Debug)]
pub enum HostMessage {
    Event(Event),
    InputConsumed(Buffer),
    OutputReady(Buffer),
}

impl HostMessage {
    pub fn into_event(self) -> Option<Event> {
        match self {
            HostMessage::Event(event) => Some(event),
            _ => None,
        }
    }
}

/// Host implementation forwarding every callback into a channel.
pub struct ChannelHost {
    sender: Mutex<Sender<HostMessage>>,
}

impl ChannelHost {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Arc<ChannelHost>, Receiver<HostMessage>) {
        let (sender, receiver) = mpsc::channel();
        let host = Arc::new(ChannelHost {
            sender: Mutex::new(sender),
        });
        (host, receiver)
    }

    fn send(&self, message: HostMessage) {
        if lock(&self.sender).send(message).is_err() {
            log::trace!("host receiver dropped, discarding callback");
        }
    }
}

impl HostCallbacks for ChannelHost {
    fn on_event(&self, event: Event) {
        self.send(HostMessage::Event(event));
    }

    fn on_input_consumed(&self, buffer: Buffer) {
        self.send(HostMessage::InputConsumed(buffer));
    }

    fn on_output_ready(&self, buffer: Buffer) {
        self.send(HostMessage::OutputReady(buffer));
    }
}
