// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::port::PortIndex;
use crate::Error;

/// Per-buffer flag bitmask.
///
/// The bit values follow the OpenMAX IL buffer flag layout so the mask can be
/// handed to an IL host without translation.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    /// Final buffer of the stream
    pub const EOS: BufferFlags = BufferFlags(0x0000_0001);
    /// Buffer ends a complete frame
    pub const END_OF_FRAME: BufferFlags = BufferFlags(0x0000_0010);
    /// Buffer is a key frame
    pub const SYNC_FRAME: BufferFlags = BufferFlags(0x0000_0020);
    /// Buffer carries codec configuration (stream header)
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(0x0000_0080);

    pub const fn from_bits(bits: u32) -> Self {
        BufferFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: BufferFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: BufferFlags) {
        self.0 &= !other.0;
    }

    pub const fn without(self, other: BufferFlags) -> Self {
        BufferFlags(self.0 & !other.0)
    }
}

impl BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        BufferFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (BufferFlags::EOS, "EOS"),
            (BufferFlags::END_OF_FRAME, "END_OF_FRAME"),
            (BufferFlags::SYNC_FRAME, "SYNC_FRAME"),
            (BufferFlags::CODEC_CONFIG, "CODEC_CONFIG"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "BufferFlags(NONE)")
        } else {
            write!(f, "BufferFlags({})", set.join(" | "))
        }
    }
}

/// Out-of-band token travelling with a buffer through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    /// Component that raises the mark event when the buffer reaches it
    pub target: u64,
    /// Opaque host data returned with the event
    pub data: u64,
}

/// Identity of a buffer within its port's pool.
///
/// The generation changes every time a slot is reused, so a stale id from a
/// released buffer is never confused with the slot's new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    pub port: PortIndex,
    pub index: usize,
    pub generation: u32,
}

/// Buffer descriptor exchanged between host and component.
///
/// A `Buffer` is deliberately not `Clone`: whoever holds the value owns the
/// buffer, which keeps it visible to exactly one of the host, a pending
/// queue, or the processing loop.
pub struct Buffer {
    id: BufferId,
    data: Vec<u8>,
    filled_len: usize,
    offset: usize,
    consumed: usize,
    timestamp: i64,
    flags: BufferFlags,
    mark: Option<Mark>,
}

impl Buffer {
    pub(crate) fn new(id: BufferId, data: Vec<u8>) -> Self {
        Self {
            id,
            data,
            filled_len: 0,
            offset: 0,
            consumed: 0,
            timestamp: 0,
            flags: BufferFlags::NONE,
            mark: None,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn port(&self) -> PortIndex {
        self.id.port
    }

    /// Total size of the memory region.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Valid payload bytes, starting at `offset`.
    pub fn filled(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.filled_len]
    }

    pub fn filled_len(&self) -> usize {
        self.filled_len
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes the component took from this buffer before handing it back.
    ///
    /// Zero for a buffer returned by a flush before it was processed.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: BufferFlags) {
        self.flags = flags;
    }

    pub fn mark(&self) -> Option<Mark> {
        self.mark
    }

    pub fn set_mark(&mut self, mark: Option<Mark>) {
        self.mark = mark;
    }

    /// Set the payload window after writing into `data_mut()`.
    pub fn set_payload(&mut self, offset: usize, len: usize) -> Result<(), Error> {
        if offset.checked_add(len).map_or(true, |end| end > self.data.len()) {
            return Err(Error::BadParameter(format!(
                "payload {}+{} exceeds buffer capacity {}",
                offset,
                len,
                self.data.len()
            )));
        }
        self.offset = offset;
        self.filled_len = len;
        Ok(())
    }

    /// Copy `bytes` into the buffer and set timestamp and flags.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadParameter`] if `bytes` does not fit.
    pub fn load(&mut self, bytes: &[u8], timestamp: i64, flags: BufferFlags) -> Result<(), Error> {
        if bytes.len() > self.data.len() {
            return Err(Error::BadParameter(format!(
                "{} bytes exceed buffer capacity {}",
                bytes.len(),
                self.data.len()
            )));
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.offset = 0;
        self.filled_len = bytes.len();
        self.consumed = 0;
        self.timestamp = timestamp;
        self.flags = flags;
        Ok(())
    }

    pub(crate) fn take_payload(&mut self, len: usize) -> &[u8] {
        let len = len.min(self.filled_len);
        let start = self.offset;
        self.offset += len;
        self.filled_len -= len;
        self.consumed += len;
        &self.data[start..start + len]
    }

    pub(crate) fn store_output(&mut self, bytes: &[u8]) -> usize {
        let len = bytes.len().min(self.data.len());
        self.data[..len].copy_from_slice(&bytes[..len]);
        self.offset = 0;
        self.filled_len = len;
        len
    }

    /// Reset the payload window before handing the buffer back to the host.
    pub(crate) fn clear(&mut self) {
        self.offset = 0;
        self.filled_len = 0;
    }

    pub(crate) fn reset_for_submit(&mut self) {
        self.consumed = 0;
    }

    pub(crate) fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("capacity", &self.data.len())
            .field("filled_len", &self.filled_len)
            .field("offset", &self.offset)
            .field("timestamp", &self.timestamp)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(size: usize) -> Buffer {
        let id = BufferId {
            port: PortIndex::Input,
            index: 0,
            generation: 0,
        };
        Buffer::new(id, vec![0; size])
    }

    #[test]
    fn test_flags_contains() {
        let flags = BufferFlags::EOS | BufferFlags::END_OF_FRAME;
        assert!(flags.contains(BufferFlags::EOS));
        assert!(flags.contains(BufferFlags::END_OF_FRAME));
        assert!(!flags.contains(BufferFlags::SYNC_FRAME));
        assert!(!flags.contains(BufferFlags::NONE));
        assert_eq!(flags.without(BufferFlags::EOS), BufferFlags::END_OF_FRAME);
    }

    #[test]
    fn test_flags_debug() {
        let flags = BufferFlags::CODEC_CONFIG | BufferFlags::END_OF_FRAME;
        assert_eq!(
            format!("{:?}", flags),
            "BufferFlags(END_OF_FRAME | CODEC_CONFIG)"
        );
        assert_eq!(format!("{:?}", BufferFlags::NONE), "BufferFlags(NONE)");
    }

    #[test]
    fn test_load_and_take() {
        let mut buf = buffer(8);
        buf.load(&[1, 2, 3, 4, 5], 33, BufferFlags::END_OF_FRAME)
            .unwrap();
        assert_eq!(buf.filled(), &[1, 2, 3, 4, 5]);

        assert_eq!(buf.take_payload(2), &[1, 2]);
        assert_eq!(buf.filled(), &[3, 4, 5]);
        assert_eq!(buf.consumed(), 2);
        assert_eq!(buf.offset(), 2);

        assert_eq!(buf.take_payload(10), &[3, 4, 5]);
        assert_eq!(buf.filled_len(), 0);
        assert_eq!(buf.consumed(), 5);
    }

    #[test]
    fn test_load_too_large() {
        let mut buf = buffer(4);
        assert!(matches!(
            buf.load(&[0; 5], 0, BufferFlags::NONE),
            Err(Error::BadParameter(_))
        ));
    }

    #[test]
    fn test_set_payload_bounds() {
        let mut buf = buffer(16);
        assert!(buf.set_payload(4, 12).is_ok());
        assert!(buf.set_payload(4, 13).is_err());
        assert!(buf.set_payload(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_store_output_truncates() {
        let mut buf = buffer(3);
        assert_eq!(buf.store_output(&[9, 8, 7, 6]), 3);
        assert_eq!(buf.filled(), &[9, 8, 7]);
    }
}
