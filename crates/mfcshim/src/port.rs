// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::buffer::{Buffer, BufferId, Mark};
use crate::component::State;
use crate::convert::PixelFormat;
use crate::pool::{BufferPool, Ownership, MAX_BUFFER_NUM};
use crate::queue::PendingQueue;
use crate::sync::lock;
use crate::Error;

/// Port index, input is 0 and output is 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortIndex {
    Input = 0,
    Output = 1,
}

impl PortIndex {
    pub const ALL: [PortIndex; 2] = [PortIndex::Input, PortIndex::Output];

    pub fn as_usize(self) -> usize {
        self as usize
    }
}

impl TryFrom<u32> for PortIndex {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PortIndex::Input),
            1 => Ok(PortIndex::Output),
            _ => Err(Error::BadPortIndex(value)),
        }
    }
}

/// Video format of a port.
///
/// `color` is `None` on the compressed side of a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub slice_height: u32,
    pub color: Option<PixelFormat>,
}

impl VideoFormat {
    pub fn compressed(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            stride: width,
            slice_height: height,
            color: None,
        }
    }

    pub fn raw(width: u32, height: u32, color: PixelFormat) -> Self {
        Self {
            width,
            height,
            stride: width,
            slice_height: height,
            color: Some(color),
        }
    }
}

/// PCM or compressed audio format of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub channels: u32,
    pub sample_rate: u32,
    pub bits_per_sample: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortFormat {
    Video(VideoFormat),
    Audio(AudioFormat),
}

/// Buffer requirements and format of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDefinition {
    pub index: PortIndex,
    pub enabled: bool,
    pub populated: bool,
    pub buffer_count_actual: usize,
    pub buffer_count_min: usize,
    pub buffer_size: usize,
    pub format: PortFormat,
}

/// Visible region of a decoded frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
pub(crate) struct PortState {
    pub definition: PortDefinition,
    pub pool: BufferPool,
    pub lifecycle: State,
    pub crop: CropRect,
    pub pending_mark: Option<Mark>,
}

/// One buffer-exchange endpoint of a component.
#[derive(Debug)]
pub struct Port {
    index: PortIndex,
    state: Mutex<PortState>,
    queue: PendingQueue<(Buffer, u64)>,
    flushing: AtomicBool,
    aborted: AtomicBool,
    flush_epoch: AtomicU64,
    population: Condvar,
}

/// Outcome of handing a buffer back to its pool.
#[derive(Debug)]
pub(crate) struct Release {
    /// Host-supplied memory, if the host owned it
    pub memory: Option<Vec<u8>>,
    /// The port still needed its buffers
    pub unpopulated_early: bool,
}

impl Port {
    pub fn new(definition: PortDefinition) -> Self {
        let index = definition.index;
        let crop = match definition.format {
            PortFormat::Video(video) => CropRect {
                left: 0,
                top: 0,
                width: video.width,
                height: video.height,
            },
            PortFormat::Audio(_) => CropRect::default(),
        };
        Self {
            index,
            state: Mutex::new(PortState {
                definition,
                pool: BufferPool::new(index),
                lifecycle: State::Loaded,
                crop,
                pending_mark: None,
            }),
            // room for every buffer the pool can register
            queue: PendingQueue::with_capacity(MAX_BUFFER_NUM),
            flushing: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            flush_epoch: AtomicU64::new(0),
            population: Condvar::new(),
        }
    }

    pub fn index(&self) -> PortIndex {
        self.index
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PortState> {
        lock(&self.state)
    }

    pub fn definition(&self) -> PortDefinition {
        self.lock().definition
    }

    pub fn crop(&self) -> CropRect {
        self.lock().crop
    }

    pub fn lifecycle(&self) -> State {
        self.lock().lifecycle
    }

    pub(crate) fn set_lifecycle(&self, state: State) {
        self.lock().lifecycle = state;
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().definition.enabled
    }

    pub fn is_populated(&self) -> bool {
        self.lock().definition.populated
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.lock().definition.enabled = enabled;
    }

    /// Register a buffer.
    ///
    /// `loading` tells whether the component is in its Loaded to Idle
    /// transition, the only time an enabled port accepts buffers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IncorrectStateOperation`] outside the registration
    /// window and [`Error::InsufficientResources`] if the pool is full.
    pub(crate) fn register(
        &self,
        data: Vec<u8>,
        ownership: Ownership,
        loading: bool,
    ) -> Result<Buffer, Error> {
        let mut state = self.lock();
        if state.lifecycle != State::Idle || (state.definition.enabled && !loading) {
            return Err(Error::IncorrectStateOperation);
        }
        if state.definition.populated {
            return Err(Error::InsufficientResources(format!(
                "{:?} port already holds {} buffers",
                self.index, state.definition.buffer_count_actual
            )));
        }
        if data.len() < state.definition.buffer_size {
            return Err(Error::BadParameter(format!(
                "buffer of {} bytes is smaller than the required {}",
                data.len(),
                state.definition.buffer_size
            )));
        }

        let buffer = state.pool.register(data, ownership)?;
        if state.pool.assigned() == state.definition.buffer_count_actual {
            state.definition.populated = true;
            log::debug!("{:?} port populated", self.index);
            self.population.notify_all();
        }
        Ok(buffer)
    }

    pub(crate) fn release(&self, buffer: Buffer) -> Result<Release, Error> {
        let mut state = self.lock();
        let unpopulated_early = !matches!(state.lifecycle, State::Loaded | State::Invalid);
        let memory = state.pool.release(buffer)?;
        if state.pool.assigned() == 0 {
            state.definition.populated = false;
            log::debug!("{:?} port unpopulated", self.index);
            self.population.notify_all();
        }
        Ok(Release {
            memory,
            unpopulated_early,
        })
    }

    pub(crate) fn owns(&self, id: BufferId) -> bool {
        self.lock().pool.contains(id)
    }

    pub fn assigned(&self) -> usize {
        self.lock().pool.assigned()
    }

    pub fn free_slots(&self) -> usize {
        self.lock().pool.free_slots()
    }

    /// Block until every buffer the port needs is registered.
    ///
    /// Returns false if the wait was aborted by [`Port::abort_waits`].
    pub(crate) fn wait_populated(&self) -> bool {
        let mut state = self.lock();
        while !state.definition.populated {
            if self.aborted.load(Ordering::Acquire) {
                return false;
            }
            state = self
                .population
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        true
    }

    /// Block until every registered buffer is released.
    pub(crate) fn wait_unpopulated(&self) -> bool {
        let mut state = self.lock();
        while state.pool.assigned() > 0 {
            if self.aborted.load(Ordering::Acquire) {
                return false;
            }
            state = self
                .population
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        true
    }

    /// Release every thread blocked on population changes, for good.
    pub(crate) fn abort_waits(&self) {
        let _state = self.lock();
        self.aborted.store(true, Ordering::Release);
        self.population.notify_all();
    }

    /// Queue a submitted buffer for the loop.
    ///
    /// The buffer is stamped with the current flush epoch so a buffer the
    /// loop dequeues after a flush started is recognised as flushed.
    pub(crate) fn enqueue(&self, buffer: Buffer) -> Result<(), Buffer> {
        self.queue
            .enqueue((buffer, self.flush_epoch()))
            .map_err(|(buffer, _)| buffer)
    }

    /// Block until a buffer is queued or the port is woken.
    pub(crate) fn dequeue(&self) -> Option<(Buffer, u64)> {
        self.queue.dequeue()
    }

    pub(crate) fn wake(&self) {
        self.queue.wake();
    }

    /// Take every queued buffer.
    pub(crate) fn drain_queue(&self) -> Vec<Buffer> {
        self.queue
            .drain()
            .into_iter()
            .map(|(buffer, _)| buffer)
            .collect()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Mark the port as flushing and bump its flush epoch.
    pub(crate) fn begin_flush(&self) {
        self.flushing.store(true, Ordering::Release);
        self.flush_epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn end_flush(&self) {
        self.flushing.store(false, Ordering::Release);
    }

    pub(crate) fn flush_epoch(&self) -> u64 {
        self.flush_epoch.load(Ordering::Acquire)
    }

    pub(crate) fn take_pending_mark(&self) -> Option<Mark> {
        self.lock().pending_mark.take()
    }

    pub(crate) fn set_pending_mark(&self, mark: Mark) {
        self.lock().pending_mark = Some(mark);
    }

    /// Replace the format after a stream settings change.
    pub(crate) fn update_format(&self, format: PortFormat, buffer_size: usize, crop: CropRect) {
        let mut state = self.lock();
        state.definition.format = format;
        state.definition.buffer_size = buffer_size;
        state.crop = crop;
    }
}
