// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! MFC Codec Shim for Rust
//!
//! Buffer-exchange and hardware-pipelining engine for fixed-function MFC
//! codec hardware. Every codec component (H.264/MPEG-4/H.263/VP8/WMV/MP3
//! decoders, MPEG-4/H.263/H.264 encoders) exposes the same two-port buffer
//! contract to a media pipeline host and drives the hardware engine from a
//! background worker.
//!
//! The engine is double-buffered: the next frame is staged into one
//! hardware input slot while the hardware still executes the previous one,
//! and completion results are matched back to their presentation timestamps
//! through a tag ledger, because the hardware may reorder frames.
//!
//! # Quick Start
//!
//! ## Decoding with the simulated engine
//!
//! ```no_run
//! use mfcshim::callbacks::ChannelHost;
//! use mfcshim::codec::CodecKind;
//! use mfcshim::component::{Command, Component, State};
//! use mfcshim::config::ComponentConfig;
//! use mfcshim::engine::EngineHandle;
//! use mfcshim::port::PortIndex;
//! use mfcshim::sim::SimVideoDecoder;
//!
//! let (host, _events) = ChannelHost::new();
//! let engine = EngineHandle::video_decoder(SimVideoDecoder::new(Default::default()));
//! let component = Component::new(
//!     CodecKind::H264Dec,
//!     engine,
//!     ComponentConfig::default(),
//!     host,
//! )?;
//!
//! component.send_command(Command::StateSet(State::Idle))?;
//! let _input = component.allocate_buffer(PortIndex::Input, 4096)?;
//! // ... register every buffer, then wait for the state change to complete
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Features
//!
//! - Double-buffered hardware submission with a dedicated execute worker
//! - Out-of-order completion handled by a 17-entry timestamp ledger
//! - End-of-stream draining of the hardware display delay
//! - Flush, pause and port enable/disable without losing buffers
//! - Runtime loading of the vendor engine (`libmfcengine.so`)
//! - In-memory simulated engines for testing without hardware
//!
//! # Support
//!
//! For questions and support:
//! - Repository: <https://github.com/EdgeFirstAI/mfcshim>
//! - Professional support: support@au-zone.com

use std::{error, fmt, io};

use mfcshim_sys as ffi;

use crate::component::State;
use crate::port::PortIndex;

/// Error type for codec shim operations
#[derive(Debug)]
pub enum Error {
    /// Invalid argument (null buffer, size mismatch, unknown buffer)
    BadParameter(String),

    /// Port index out of range
    BadPortIndex(u32),

    /// Operation not valid in the current lifecycle state
    IncorrectStateOperation,

    /// Requested state change is not a legal transition
    IncorrectStateTransition { from: State, to: State },

    /// Requested state change targets the current state
    SameState,

    /// The component is in the Invalid state
    InvalidState,

    /// Buffer pool full or allocation failure
    InsufficientResources(String),

    /// The hardware engine reported a failure
    Hardware(String),

    /// The hardware engine failed to initialise the stream
    HardwareInit(String),

    /// A buffer was released while its port still needed it
    PortUnpopulated(PortIndex),

    /// The engine library (libmfcengine.so) could not be loaded at runtime
    LibraryNotLoaded(ffi::libloading::Error),

    /// The engine library is loaded but lacks a required symbol
    SymbolNotFound(&'static str),

    /// I/O error from underlying system calls
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::BadParameter(msg) => write!(f, "Bad parameter: {}", msg),
            Error::BadPortIndex(index) => write!(f, "Bad port index: {}", index),
            Error::IncorrectStateOperation => {
                write!(f, "Operation not allowed in the current state")
            }
            Error::IncorrectStateTransition { from, to } => {
                write!(f, "Illegal state transition: {:?} -> {:?}", from, to)
            }
            Error::SameState => write!(f, "Component is already in the requested state"),
            Error::InvalidState => write!(f, "Component is in the Invalid state"),
            Error::InsufficientResources(msg) => write!(f, "Insufficient resources: {}", msg),
            Error::Hardware(msg) => write!(f, "Hardware error: {}", msg),
            Error::HardwareInit(msg) => write!(f, "Hardware initialisation failed: {}", msg),
            Error::PortUnpopulated(port) => write!(f, "Port {:?} unpopulated", port),
            Error::LibraryNotLoaded(err) => {
                write!(f, "MFC engine library could not be loaded: {}", err)
            }
            Error::SymbolNotFound(sym) => write!(f, "Symbol not found in engine: {}", sym),
            Error::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::LibraryNotLoaded(err) => Some(err),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ffi::libloading::Error> for Error {
    fn from(err: ffi::libloading::Error) -> Self {
        Error::LibraryNotLoaded(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// The sync module provides the semaphore and signal suspension points.
pub mod sync;

/// The buffer module provides buffer descriptors, flags and marks.
pub mod buffer;

/// The pool module tracks buffer slot ownership per port.
pub mod pool;

/// The queue module provides the bounded pending-buffer FIFO.
pub mod queue;

/// The port module provides the two buffer-exchange endpoints.
pub mod port;

/// The ledger module correlates hardware tags with timestamps.
pub mod ledger;

/// The engine module defines the hardware engine collaborator interfaces.
pub mod engine;

/// The submission module provides double-buffered hardware submission.
pub mod submission;

/// The convert module provides the colorspace conversion collaborator.
pub mod convert;

/// The codec module provides the per-codec single-frame steps.
pub mod codec;

/// The config module provides component configuration.
pub mod config;

/// The callbacks module provides the host completion interface.
pub mod callbacks;

/// The component module provides the state machine and host API.
pub mod component;

mod process;

/// The sim module provides in-memory engines for testing.
pub mod sim;

/// The mfc module drives the vendor engine through mfcshim-sys.
pub mod mfc;

/// Path the engine library is loaded from (`MFCSHIM_LIBRARY` or the default).
pub fn engine_library_path() -> String {
    ffi::library_path()
}

/// Check whether the vendor engine library can be loaded
///
/// Returns an error if the library is not loaded or lacks required symbols.
pub fn engine_available() -> Result<(), Error> {
    let lib = ffi::init()?;
    mfc::check_symbols(lib)
}
