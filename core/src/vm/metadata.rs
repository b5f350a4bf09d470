//! Per-slot runtime metadata.
//!
//! One byte per 4-byte data or stack slot: the high nibble is a type tag, the
//! low nibble the vector size (`0` encodes 4). Values spanning several slots
//! carry the same byte at their first and last slot, so either end can be
//! probed independently.

use crate::vm::value::{MAX_LANES, ValueType};

pub const TAG_EMPTY: u8 = 0x0;
pub const TAG_NUMERIC: u8 = 0x1;
pub const TAG_ID: u8 = 0x2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotMeta {
    pub ty: ValueType,
    pub size: u8,
}

impl SlotMeta {
    pub fn new(ty: ValueType, size: u8) -> Self {
        Self { ty, size }
    }

    pub fn numeric(size: u8) -> Self {
        Self::new(ValueType::Numeric, size)
    }

    pub fn encode(self) -> u8 {
        let tag = match self.ty {
            ValueType::Numeric => TAG_NUMERIC,
            ValueType::Id => TAG_ID,
        };
        (tag << 4) | (self.size & 0x3)
    }

    /// Decodes a metadata byte; empty or unknown tags yield `None`.
    pub fn decode(byte: u8) -> Option<Self> {
        let ty = match byte >> 4 {
            TAG_NUMERIC => ValueType::Numeric,
            TAG_ID => ValueType::Id,
            _ => return None,
        };
        let size = match byte & 0xF {
            0 => MAX_LANES as u8,
            s @ 1..=3 => s,
            _ => return None,
        };
        Some(Self { ty, size })
    }
}

/// Writes `meta` at the first and last slot of a value starting at `slot`.
///
/// Out-of-range slots are ignored; callers check capacity before writing.
pub fn write(metadata: &mut [u8], slot: usize, meta: SlotMeta) {
    let byte = meta.encode();
    let last = slot + meta.size as usize - 1;
    if let Some(first) = metadata.get_mut(slot) {
        *first = byte;
    }
    if let Some(end) = metadata.get_mut(last) {
        *end = byte;
    }
}

/// Clears the metadata of the slots `slot..slot + size`.
pub fn clear(metadata: &mut [u8], slot: usize, size: usize) {
    let end = (slot + size).min(metadata.len());
    if slot < end {
        metadata[slot..end].fill(TAG_EMPTY);
    }
}

pub fn read(metadata: &[u8], slot: usize) -> Option<SlotMeta> {
    metadata.get(slot).copied().and_then(SlotMeta::decode)
}
