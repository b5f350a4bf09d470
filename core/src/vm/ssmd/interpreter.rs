//! Lock-step interpreter over a batch of instances.
//!
//! Every instance runs the same code; only the data differs. The metadata
//! region is shared, since all instances hold the same shapes at the same
//! slots. Branches must agree across the batch: a condition that is true for
//! some instances and false for others aborts with
//! [`VmError::DivergentBranch`].

use smallvec::SmallVec;
use tracing::{error, trace};

use crate::compiler::package::Package;
use crate::parser::syntax::Swizzle;
use crate::stdlib::functions::BuiltinCode;
use crate::stdlib::math::eval_builtin;
use crate::vm::CHECKED;
use crate::vm::context::{CallHandles, EngineContext};
use crate::vm::error::{Completion, VmError, VmResult};
use crate::vm::interpreter::ExecutionOptions;
use crate::vm::memory::{read_lanes, write_lane, write_lanes};
use crate::vm::metadata::{self, SlotMeta};
use crate::vm::opcode::{Byte, ExtendedOpcode, Opcode, split_reduction_control};
use crate::vm::ssmd::wide::{WideFolder, WideValue};
use crate::vm::value::{Value, ValueType};

/// Borrowed view of a batch: the shared metadata and one data block per
/// instance.
struct Batch<'m, 'i> {
    metadata: &'m mut [u8],
    instances: &'m mut [&'i mut [u8]],
}

pub struct SsmdInterpreter<'p> {
    code: &'p [u8],
    data_slots: usize,
    stack_slots: usize,
    context: &'p EngineContext,
    options: ExecutionOptions,
    ip: usize,
    sp: usize,
    register: Option<WideValue>,
    iterations: u32,
    high_water: usize,
    suspended: bool,
}

impl<'p> SsmdInterpreter<'p> {
    pub fn new(package: &'p Package, context: &'p EngineContext, options: ExecutionOptions) -> Self {
        let header = package.header();
        Self {
            code: package.code(),
            data_slots: header.data_slots,
            stack_slots: header.stack_slots,
            context,
            options,
            ip: 0,
            sp: 0,
            register: None,
            iterations: 0,
            high_water: 0,
            suspended: false,
        }
    }

    /// Runs the batch from the start of the code. `instances` are the data
    /// blocks (data + stack bytes) of each instance.
    pub fn execute(
        &mut self,
        metadata: &mut [u8],
        instances: &mut [&mut [u8]],
        handles: &mut CallHandles<'_>,
    ) -> VmResult<Completion> {
        self.ip = 0;
        self.sp = 0;
        self.iterations = 0;
        self.suspended = false;
        self.register = None;
        if instances.is_empty() {
            return Ok(Completion::Finished);
        }
        let mut batch = Batch {
            metadata,
            instances,
        };
        self.run(&mut batch, handles)
    }

    pub fn resume(
        &mut self,
        metadata: &mut [u8],
        instances: &mut [&mut [u8]],
        handles: &mut CallHandles<'_>,
    ) -> VmResult<Completion> {
        if !self.suspended {
            return Err(VmError::NotSuspended);
        }
        let mut batch = Batch {
            metadata,
            instances,
        };
        let at = self.ip;
        let counter = self.pop(&mut batch, SlotMeta::numeric(1), at)?;
        let remaining = counter.get(0).lanes[0] - 1.0;
        if remaining > 0.0 {
            let n = batch.instances.len();
            self.push(&mut batch, &WideValue::splat(Value::scalar(remaining), n))?;
            return Ok(Completion::Yielded);
        }
        self.register = Some(self.pop_any(&mut batch, at)?);
        self.suspended = false;
        self.run(&mut batch, handles)
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn run(&mut self, batch: &mut Batch<'_, '_>, handles: &mut CallHandles<'_>) -> VmResult<Completion> {
        loop {
            if self.ip == self.code.len() {
                return Ok(Completion::Finished);
            }
            let at = self.ip;
            let byte = self.fetch()?;
            let Some(Byte::Op(op)) = Byte::decode(byte) else {
                return Err(VmError::UnsupportedOpcodeAtRoot {
                    opcode: byte,
                    offset: at,
                });
            };

            use Opcode::*;
            match op {
                Return => return Ok(Completion::Finished),
                Nop => {}
                Assign | AssignSwizzle => {
                    let slot = self.fetch_slot()?;
                    let swizzle = if op == AssignSwizzle {
                        Some(self.fetch_swizzle()?)
                    } else {
                        None
                    };
                    let value = self.compound(batch, handles)?;
                    self.assign(batch, slot, &value, swizzle, at)?;
                    self.register = Some(value);
                }
                Push => {
                    // Gather the whole operand first, then write it to every
                    // instance's stack in one pass.
                    let value = self.compound(batch, handles)?;
                    self.push(batch, &value)?;
                }
                Condition => {
                    self.register = Some(self.compound(batch, handles)?);
                }
                Jump => {
                    let offset = self.fetch()? as usize;
                    self.jump_forward(offset)?;
                }
                JumpBack => {
                    let offset = self.fetch()? as usize;
                    self.iterations += 1;
                    if self.iterations > self.options.max_iterations {
                        return Err(VmError::MaxIterationsExceeded {
                            limit: self.options.max_iterations,
                        });
                    }
                    self.ip = self
                        .ip
                        .checked_sub(offset)
                        .ok_or(VmError::CodeOverrun { offset: at })?;
                }
                JumpIfZero | JumpIfNotZero => {
                    let offset = self.fetch()? as usize;
                    let truth = self.uniform_truth(at)?;
                    if truth == (op == JumpIfNotZero) {
                        self.jump_forward(offset)?;
                    }
                }
                Yield => {
                    let frames = self.fetch()?.max(1);
                    let n = batch.instances.len();
                    let register = self
                        .register
                        .clone()
                        .unwrap_or_else(|| WideValue::splat(Value::ZERO, n));
                    self.push(batch, &register)?;
                    self.push(batch, &WideValue::splat(Value::scalar(frames as f32), n))?;
                    self.suspended = true;
                    trace!(ip = self.ip, frames, "Batch yielded");
                    return Ok(Completion::Yielded);
                }
                _ => {
                    return Err(VmError::UnsupportedOpcodeAtRoot {
                        opcode: byte,
                        offset: at,
                    });
                }
            }
        }
    }

    /// Truthiness of the register, which must be the same for every instance.
    fn uniform_truth(&self, at: usize) -> VmResult<bool> {
        let Some(register) = &self.register else {
            return Ok(false);
        };
        let first = register.get(0).is_true();
        for i in 1..register.instances() {
            if register.get(i).is_true() != first {
                return Err(VmError::DivergentBranch {
                    instance: i,
                    offset: at,
                });
            }
        }
        Ok(first)
    }

    fn fetch(&mut self) -> VmResult<u8> {
        let byte = *self
            .code
            .get(self.ip)
            .ok_or(VmError::CodeOverrun { offset: self.ip })?;
        self.ip += 1;
        Ok(byte)
    }

    fn fetch_slot(&mut self) -> VmResult<usize> {
        let at = self.ip;
        let byte = self.fetch()?;
        match Byte::decode(byte) {
            Some(Byte::Slot(slot)) => Ok(slot as usize),
            _ => Err(VmError::InvalidOperand { byte, offset: at }),
        }
    }

    fn fetch_swizzle(&mut self) -> VmResult<Swizzle> {
        let count = self.fetch()?;
        let pattern = self.fetch()?;
        if !(1..=4).contains(&count) {
            return Err(VmError::InvalidOperand {
                byte: count,
                offset: self.ip - 2,
            });
        }
        Ok(Swizzle { count, pattern })
    }

    fn jump_forward(&mut self, offset: usize) -> VmResult<()> {
        let target = self.ip + offset;
        if target > self.code.len() {
            return Err(VmError::CodeOverrun { offset: self.ip });
        }
        self.ip = target;
        Ok(())
    }

    fn compound(&mut self, batch: &mut Batch<'_, '_>, handles: &mut CallHandles<'_>) -> VmResult<WideValue> {
        let mut folder = WideFolder::new();
        loop {
            let at = self.ip;
            let byte = self.fetch()?;
            if let Some(Byte::Op(op)) = Byte::decode(byte) {
                if op == Opcode::End {
                    return folder.finish().map_err(|e| e.at(at));
                }
                if let Some(binary) = op.as_binary() {
                    folder.push_operator(binary).map_err(|e| e.at(at))?;
                    continue;
                }
                if let Some(unary) = op.as_unary() {
                    folder.push_unary(unary).map_err(|e| e.at(at))?;
                    continue;
                }
            }
            let value = self.value_token(byte, at, batch, handles)?;
            folder.push_value(value).map_err(|e| e.at(at))?;
        }
    }

    fn value_token(
        &mut self,
        byte: u8,
        at: usize,
        batch: &mut Batch<'_, '_>,
        handles: &mut CallHandles<'_>,
    ) -> VmResult<WideValue> {
        let invalid = VmError::InvalidOperand { byte, offset: at };
        let n = batch.instances.len();
        match Byte::decode(byte).ok_or(invalid.clone())? {
            Byte::Slot(slot) => self.read_slot(batch, slot as usize).ok_or(invalid),
            Byte::Constant(index) => self
                .context
                .constants
                .get(index)
                .map(|x| WideValue::splat(Value::scalar(x), n))
                .ok_or(invalid),
            Byte::Extended => {
                let ext = ExtendedOpcode::from_byte(self.fetch()?).ok_or(invalid)?;
                match ext {
                    ExtendedOpcode::ExternalCall => self.call_external(at, batch, handles),
                    _ => self.call_builtin(BuiltinCode::Extended(ext), at, batch, handles),
                }
            }
            Byte::Op(Opcode::StackPop) => {
                let meta = SlotMeta::decode(self.fetch()?).ok_or(invalid)?;
                self.pop(batch, meta, at)
            }
            Byte::Op(Opcode::Swizzle) => {
                let swizzle = self.fetch_swizzle()?;
                let inner_at = self.ip;
                let inner = self.fetch()?;
                let value = self.value_token(inner, inner_at, batch, handles)?;
                value.swizzle(swizzle).ok_or(VmError::VectorSizeMismatch {
                    left: value.size,
                    right: swizzle.max_component() + 1,
                    offset: at,
                })
            }
            Byte::Op(op) if op.fixed_arity().is_some() || op == Opcode::Random || op.is_reduction() => {
                self.call_builtin(BuiltinCode::Base(op), at, batch, handles)
            }
            Byte::Op(_) => Err(invalid),
        }
    }

    fn read_slot(&self, batch: &Batch<'_, '_>, slot: usize) -> Option<WideValue> {
        let meta = metadata::read(batch.metadata, slot)?;
        let mut value = WideValue::zeroed(0, meta.size, meta.ty);
        for data in batch.instances.iter() {
            value.lanes.push(read_lanes(data, slot, meta.size)?);
        }
        Some(value)
    }

    fn call_builtin(
        &mut self,
        code: BuiltinCode,
        at: usize,
        batch: &mut Batch<'_, '_>,
        handles: &mut CallHandles<'_>,
    ) -> VmResult<WideValue> {
        let (count, control) = match code {
            BuiltinCode::Base(Opcode::Random) => {
                let control = self.fetch()?;
                (control as usize, control)
            }
            BuiltinCode::Base(op) if op.is_reduction() => {
                let control = self.fetch()?;
                (split_reduction_control(control).0, control)
            }
            BuiltinCode::Base(op) => (op.fixed_arity().unwrap_or(0), 0),
            BuiltinCode::Extended(op) => (op.fixed_arity().unwrap_or(0), 0),
        };
        let args = self.arguments(count, batch, handles)?;
        let rng = &self.context.rng;
        WideValue::gather(
            (0..batch.instances.len())
                .map(|i| {
                    let per_instance: SmallVec<[Value; 4]> = args.iter().map(|a| a.get(i)).collect();
                    eval_builtin(code, control, &per_instance, rng)
                })
                .collect::<VmResult<SmallVec<[Value; 8]>>>()?,
        )
        .map_err(|e| e.at(at))
    }

    fn call_external(
        &mut self,
        at: usize,
        batch: &mut Batch<'_, '_>,
        handles: &mut CallHandles<'_>,
    ) -> VmResult<WideValue> {
        let mut id = [0u8; 4];
        for b in &mut id {
            *b = self.fetch()?;
        }
        let id = u32::from_be_bytes(id);
        let context = self.context;
        let function = context
            .functions
            .get(id)
            .ok_or(VmError::UnknownFunction { id })?;
        let args = self.arguments(function.arity(), batch, handles)?;
        let n = batch.instances.len();
        let declared = Value::zero(function.result.ty, function.result.size);
        if self.options.validation_mode {
            return Ok(WideValue::splat(declared, n));
        }
        let mut out = WideValue::zeroed(0, declared.size, declared.ty);
        for i in 0..n {
            let per_instance: SmallVec<[Value; 4]> = args.iter().map(|a| a.get(i)).collect();
            let mut result = (function.function)(&per_instance, handles);
            if result.ty != declared.ty || result.size != declared.size {
                if !CHECKED {
                    return Err(VmError::TypeMismatch {
                        expected: declared.ty,
                        found: result.ty,
                        offset: at,
                    });
                }
                error!(
                    function = %function.name,
                    instance = i,
                    "External function returned a value of the wrong shape"
                );
                result = Value::sentinel(declared.ty, declared.size);
            }
            out.lanes.push(result.lanes);
        }
        Ok(out)
    }

    fn arguments(
        &mut self,
        count: usize,
        batch: &mut Batch<'_, '_>,
        handles: &mut CallHandles<'_>,
    ) -> VmResult<SmallVec<[WideValue; 4]>> {
        let mut args = SmallVec::new();
        for _ in 0..count {
            let at = self.ip;
            let byte = self.fetch()?;
            args.push(self.value_token(byte, at, batch, handles)?);
        }
        Ok(args)
    }

    fn assign(
        &mut self,
        batch: &mut Batch<'_, '_>,
        slot: usize,
        value: &WideValue,
        swizzle: Option<Swizzle>,
        at: usize,
    ) -> VmResult<()> {
        let target = metadata::read(batch.metadata, slot).ok_or(VmError::InvalidOperand {
            byte: self.code.get(at + 1).copied().unwrap_or(0),
            offset: at,
        })?;
        let mismatch = VmError::VectorSizeMismatch {
            left: target.size,
            right: value.size,
            offset: at,
        };
        let width = swizzle.map_or(target.size, |s| s.count);
        if value.size != width && value.size != 1 {
            return Err(mismatch);
        }
        if value.ty != target.ty {
            return Err(VmError::TypeMismatch {
                expected: target.ty,
                found: value.ty,
                offset: at,
            });
        }
        for (i, data) in batch.instances.iter_mut().enumerate() {
            let v = value.get(i);
            let ok = match swizzle {
                None => (0..target.size as usize).all(|c| write_lane(data, slot + c, v.lane(c))),
                Some(swizzle) => swizzle.components().enumerate().all(|(k, c)| {
                    c < target.size && write_lane(data, slot + c as usize, v.lane(k))
                }),
            };
            if !ok {
                return Err(mismatch);
            }
        }
        Ok(())
    }

    fn push(&mut self, batch: &mut Batch<'_, '_>, value: &WideValue) -> VmResult<()> {
        let needed = self.sp + value.size as usize;
        if needed > self.stack_slots {
            return Err(VmError::StackTooSmall {
                needed,
                capacity: self.stack_slots,
            });
        }
        let slot = self.data_slots + self.sp;
        for (i, data) in batch.instances.iter_mut().enumerate() {
            if !write_lanes(data, slot, &value.get(i)) {
                return Err(VmError::StackTooSmall {
                    needed,
                    capacity: (data.len() / 4).saturating_sub(self.data_slots),
                });
            }
        }
        metadata::write(batch.metadata, slot, SlotMeta::new(value.ty, value.size));
        self.sp = needed;
        self.high_water = self.high_water.max(self.sp);
        Ok(())
    }

    fn pop(&mut self, batch: &mut Batch<'_, '_>, meta: SlotMeta, at: usize) -> VmResult<WideValue> {
        let size = meta.size as usize;
        if size > self.sp {
            return Err(VmError::StackUnderflow { offset: at });
        }
        self.sp -= size;
        let slot = self.data_slots + self.sp;
        let mut value = WideValue::zeroed(0, meta.size, meta.ty);
        for data in batch.instances.iter() {
            let lanes =
                read_lanes(data, slot, meta.size).ok_or(VmError::StackUnderflow { offset: at })?;
            value.lanes.push(lanes);
        }
        if CHECKED {
            let recorded = metadata::read(batch.metadata, slot);
            if recorded != Some(meta) {
                error!(offset = at, expected = ?meta, ?recorded, "Batched stack pop does not match the pushed value");
                value = WideValue::splat(Value::sentinel(meta.ty, meta.size), batch.instances.len());
            }
        }
        metadata::clear(batch.metadata, slot, size);
        Ok(value)
    }

    fn pop_any(&mut self, batch: &mut Batch<'_, '_>, at: usize) -> VmResult<WideValue> {
        let top = self
            .sp
            .checked_sub(1)
            .ok_or(VmError::StackUnderflow { offset: at })?;
        let meta = metadata::read(batch.metadata, self.data_slots + top).unwrap_or(SlotMeta {
            ty: ValueType::Numeric,
            size: 1,
        });
        self.pop(batch, meta, at)
    }
}
