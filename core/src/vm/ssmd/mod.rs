//! Single script, multiple data: one program over a batch of instances.

pub mod interpreter;
pub mod kernels;
pub mod wide;

pub use interpreter::SsmdInterpreter;
pub use wide::{WideFolder, WideValue};

use smallvec::SmallVec;

use crate::compiler::package::Package;
use crate::vm::context::CallHandles;
use crate::vm::error::{Completion, VmResult};
use crate::vm::memory::{SLOT_BYTES, read_lanes, write_lanes};
use crate::vm::metadata;
use crate::vm::value::Value;

/// Owned storage for a batch: shared metadata plus one data block per
/// instance, each initialized from the data image.
#[derive(Debug, Clone, PartialEq)]
pub struct SsmdBlock {
    metadata: Vec<u8>,
    instances: Vec<Vec<u8>>,
}

impl SsmdBlock {
    pub fn new(package: &Package, data_image: &[u8], count: usize) -> Self {
        let header = package.header();
        let bytes = (header.data_slots + header.stack_slots) * SLOT_BYTES;
        let mut block = vec![0u8; bytes];
        let n = data_image.len().min(header.data_slots * SLOT_BYTES);
        block[..n].copy_from_slice(&data_image[..n]);
        Self {
            metadata: package.metadata().to_vec(),
            instances: vec![block; count],
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn metadata(&self) -> &[u8] {
        &self.metadata
    }

    pub fn instance(&self, index: usize) -> Option<&[u8]> {
        self.instances.get(index).map(Vec::as_slice)
    }

    /// Reads the value at `slot` of one instance.
    pub fn read(&self, instance: usize, slot: usize) -> Option<Value> {
        let meta = metadata::read(&self.metadata, slot)?;
        let lanes = read_lanes(self.instances.get(instance)?, slot, meta.size)?;
        Some(Value {
            lanes,
            size: meta.size,
            ty: meta.ty,
        })
    }

    /// Writes a value of the slot's declared shape into one instance.
    pub fn write(&mut self, instance: usize, slot: usize, value: &Value) -> bool {
        match (metadata::read(&self.metadata, slot), self.instances.get_mut(instance)) {
            (Some(meta), Some(data)) if meta.ty == value.ty && (value.size == meta.size || value.size == 1) => {
                write_lanes(data, slot, &value.broadcast(meta.size))
            }
            _ => false,
        }
    }

    pub fn execute(
        &mut self,
        interpreter: &mut SsmdInterpreter<'_>,
        handles: &mut CallHandles<'_>,
    ) -> VmResult<Completion> {
        let mut views: SmallVec<[&mut [u8]; 16]> =
            self.instances.iter_mut().map(Vec::as_mut_slice).collect();
        interpreter.execute(&mut self.metadata, &mut views, handles)
    }

    pub fn resume(
        &mut self,
        interpreter: &mut SsmdInterpreter<'_>,
        handles: &mut CallHandles<'_>,
    ) -> VmResult<Completion> {
        let mut views: SmallVec<[&mut [u8]; 16]> =
            self.instances.iter_mut().map(Vec::as_mut_slice).collect();
        interpreter.resume(&mut self.metadata, &mut views, handles)
    }
}
