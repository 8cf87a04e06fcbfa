// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::buffer::{Buffer, BufferId};
use crate::port::PortIndex;
use crate::Error;

/// Maximum number of buffer slots per port.
pub const MAX_BUFFER_NUM: usize = 20;

/// Who owns the memory behind a registered buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The host supplied the memory; it is handed back on release.
    Host,
    /// The component allocated the memory; it is freed on release.
    Component,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Assigned,
    Allocated,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    state: SlotState,
    generation: u32,
}

/// Fixed-capacity table of buffer slots for one port.
#[derive(Debug)]
pub struct BufferPool {
    port: PortIndex,
    slots: Vec<Slot>,
    assigned: usize,
}

impl BufferPool {
    pub fn new(port: PortIndex) -> Self {
        Self::with_capacity(port, MAX_BUFFER_NUM)
    }

    pub fn with_capacity(port: PortIndex, capacity: usize) -> Self {
        Self {
            port,
            slots: vec![
                Slot {
                    state: SlotState::Free,
                    generation: 0,
                };
                capacity
            ],
            assigned: 0,
        }
    }

    /// Take a free slot for `data`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientResources`] if every slot is in use.
    pub fn register(&mut self, data: Vec<u8>, ownership: Ownership) -> Result<Buffer, Error> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.state == SlotState::Free)
            .ok_or_else(|| {
                Error::InsufficientResources(format!(
                    "no free buffer slot on {:?} port",
                    self.port
                ))
            })?;

        let slot = &mut self.slots[index];
        slot.state = match ownership {
            Ownership::Host => SlotState::Assigned,
            Ownership::Component => SlotState::Allocated,
        };
        self.assigned += 1;

        let id = BufferId {
            port: self.port,
            index,
            generation: slot.generation,
        };
        Ok(Buffer::new(id, data))
    }

    /// Give a slot back.
    ///
    /// Returns the memory for host-owned buffers; component-allocated memory
    /// is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadParameter`] if this pool never issued `buffer`.
    pub fn release(&mut self, buffer: Buffer) -> Result<Option<Vec<u8>>, Error> {
        let id = buffer.id();
        if !self.contains(id) {
            return Err(Error::BadParameter(format!(
                "buffer {:?} was not issued by the {:?} port",
                id, self.port
            )));
        }

        let slot = &mut self.slots[id.index];
        let ownership = slot.state;
        slot.state = SlotState::Free;
        slot.generation = slot.generation.wrapping_add(1);
        self.assigned -= 1;

        match ownership {
            SlotState::Assigned => Ok(Some(buffer.into_data())),
            _ => Ok(None),
        }
    }

    /// True if `id` names a buffer currently registered with this pool.
    pub fn contains(&self, id: BufferId) -> bool {
        id.port == self.port
            && self.slots.get(id.index).map_or(false, |slot| {
                slot.state != SlotState::Free && slot.generation == id.generation
            })
    }

    pub fn assigned(&self) -> usize {
        self.assigned
    }

    pub fn free_slots(&self) -> usize {
        self.slots.len() - self.assigned
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
