//! Bounds-checked views over the data/stack bytes of one instance.
//!
//! Slots are 4 bytes wide and hold little-endian `f32` bits (ids keep their
//! raw `u32` bits). The data slots come first, followed by the stack slots.

use crate::compiler::package::Package;
use crate::vm::metadata::{self, SlotMeta};
use crate::vm::value::{Lanes, MAX_LANES, Value, ValueType};

pub const SLOT_BYTES: usize = 4;

#[inline]
pub fn read_lane(bytes: &[u8], slot: usize) -> Option<f32> {
    let start = slot * SLOT_BYTES;
    let raw: [u8; SLOT_BYTES] = bytes.get(start..start + SLOT_BYTES)?.try_into().ok()?;
    Some(f32::from_le_bytes(raw))
}

#[inline]
pub fn write_lane(bytes: &mut [u8], slot: usize, x: f32) -> bool {
    let start = slot * SLOT_BYTES;
    match bytes.get_mut(start..start + SLOT_BYTES) {
        Some(dst) => {
            dst.copy_from_slice(&x.to_le_bytes());
            true
        }
        None => false,
    }
}

pub fn read_lanes(bytes: &[u8], slot: usize, size: u8) -> Option<Lanes> {
    let mut lanes = [0.0; MAX_LANES];
    for (i, lane) in lanes.iter_mut().enumerate().take(size as usize) {
        *lane = read_lane(bytes, slot + i)?;
    }
    Some(lanes)
}

pub fn write_lanes(bytes: &mut [u8], slot: usize, value: &Value) -> bool {
    value
        .as_slice()
        .iter()
        .enumerate()
        .all(|(i, x)| write_lane(bytes, slot + i, *x))
}

/// Mutable per-execution state created from a package: the metadata region
/// plus the data and stack bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Memory {
    pub metadata: Vec<u8>,
    pub data: Vec<u8>,
}

impl Memory {
    /// Copies the package's metadata, the initial data image and a zeroed stack.
    pub fn new(package: &Package, data_image: &[u8]) -> Self {
        let header = package.header();
        let mut data = vec![0u8; (header.data_slots + header.stack_slots) * SLOT_BYTES];
        let n = data_image.len().min(header.data_slots * SLOT_BYTES);
        data[..n].copy_from_slice(&data_image[..n]);
        Self {
            metadata: package.metadata().to_vec(),
            data,
        }
    }

    /// Reads the value whose first slot is `slot`, using its metadata.
    pub fn read(&self, slot: usize) -> Option<Value> {
        let meta = metadata::read(&self.metadata, slot)?;
        let lanes = read_lanes(&self.data, slot, meta.size)?;
        Some(Value {
            lanes,
            size: meta.size,
            ty: meta.ty,
        })
    }

    /// Writes a value and its metadata. Returns `false` if out of range.
    pub fn write(&mut self, slot: usize, value: &Value) -> bool {
        if !write_lanes(&mut self.data, slot, value) {
            return false;
        }
        metadata::write(&mut self.metadata, slot, SlotMeta::new(value.ty, value.size));
        true
    }

    /// Writes raw lanes into a slot range without touching metadata.
    pub fn write_raw(&mut self, slot: usize, lanes: &[f32]) -> bool {
        lanes
            .iter()
            .enumerate()
            .all(|(i, x)| write_lane(&mut self.data, slot + i, *x))
    }

    pub fn read_id(&self, slot: usize) -> Option<u32> {
        let meta = metadata::read(&self.metadata, slot)?;
        (meta.ty == ValueType::Id)
            .then(|| read_lane(&self.data, slot).map(f32::to_bits))
            .flatten()
    }
}
