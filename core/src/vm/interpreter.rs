//! Single-instance interpreter.
//!
//! Executes a package's code against one [`Memory`]. The code is a sequence
//! of root instructions; each `Assign`, `Push` or `Condition` carries a
//! compound that is folded left to right by a [`CompoundFolder`]. The stack
//! lives in the slots following the data slots, so a suspended execution is
//! fully described by the memory plus the few registers kept here.

use smallvec::SmallVec;
use tracing::{error, trace};

use crate::compiler::package::Package;
use crate::stdlib::functions::BuiltinCode;
use crate::stdlib::math::eval_builtin;
use crate::vm::CHECKED;
use crate::vm::compound::CompoundFolder;
use crate::vm::context::{CallHandles, EngineContext};
use crate::vm::error::{Completion, VmError, VmResult};
use crate::vm::memory::{Memory, read_lanes, write_lane};
use crate::vm::metadata::{self, SlotMeta};
use crate::vm::opcode::{Byte, ExtendedOpcode, Opcode, split_reduction_control};
use crate::vm::value::{Value, ValueType};
use crate::parser::syntax::Swizzle;

/// Per-execution switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Backward jumps allowed before the execution is aborted.
    pub max_iterations: u32,
    /// External calls are skipped and return zero of their declared shape;
    /// their arguments are still evaluated.
    pub validation_mode: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            validation_mode: false,
        }
    }
}

pub struct Interpreter<'p> {
    code: &'p [u8],
    data_slots: usize,
    stack_slots: usize,
    context: &'p EngineContext,
    options: ExecutionOptions,
    ip: usize,
    /// Stack depth in slots.
    sp: usize,
    register: Value,
    iterations: u32,
    high_water: usize,
    suspended: bool,
}

impl<'p> Interpreter<'p> {
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
            register: Value::ZERO,
            iterations: 0,
            high_water: 0,
            suspended: false,
        }
    }

    /// Runs from the start of the code.
    pub fn execute(
        &mut self,
        memory: &mut Memory,
        handles: &mut CallHandles<'_>,
    ) -> VmResult<Completion> {
        self.ip = 0;
        self.sp = 0;
        self.iterations = 0;
        self.suspended = false;
        self.register = Value::ZERO;
        self.run(memory, handles)
    }

    /// Continues a yielded execution. While frames remain on the yield
    /// counter, resuming yields again without running any code.
    pub fn resume(
        &mut self,
        memory: &mut Memory,
        handles: &mut CallHandles<'_>,
    ) -> VmResult<Completion> {
        if !self.suspended {
            return Err(VmError::NotSuspended);
        }
        let at = self.ip;
        let counter = self.pop(memory, SlotMeta::numeric(1), at)?;
        let remaining = counter.lanes[0] - 1.0;
        if remaining > 0.0 {
            self.push(memory, Value::scalar(remaining))?;
            return Ok(Completion::Yielded);
        }
        self.register = self.pop_any(memory, at)?;
        self.suspended = false;
        self.run(memory, handles)
    }

    /// Deepest stack usage seen so far, in slots.
    pub fn high_water_mark(&self) -> usize {
        self.high_water
    }

    pub fn register(&self) -> Value {
        self.register
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    fn run(&mut self, memory: &mut Memory, handles: &mut CallHandles<'_>) -> VmResult<Completion> {
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
                Assign => {
                    let slot = self.fetch_slot()?;
                    let value = self.compound(memory, handles)?;
                    self.assign(memory, slot, value, None, at)?;
                    self.register = value;
                }
                AssignSwizzle => {
                    let slot = self.fetch_slot()?;
                    let swizzle = self.fetch_swizzle()?;
                    let value = self.compound(memory, handles)?;
                    self.assign(memory, slot, value, Some(swizzle), at)?;
                    self.register = value;
                }
                Push => {
                    let value = self.compound(memory, handles)?;
                    self.push(memory, value)?;
                }
                Condition => {
                    self.register = self.compound(memory, handles)?;
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
                JumpIfZero => {
                    let offset = self.fetch()? as usize;
                    if !self.register.is_true() {
                        self.jump_forward(offset)?;
                    }
                }
                JumpIfNotZero => {
                    let offset = self.fetch()? as usize;
                    if self.register.is_true() {
                        self.jump_forward(offset)?;
                    }
                }
                Yield => {
                    let frames = self.fetch()?.max(1);
                    self.push(memory, self.register)?;
                    self.push(memory, Value::scalar(frames as f32))?;
                    self.suspended = true;
                    trace!(ip = self.ip, frames, "Yielded");
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
        match Byte::decode(self.fetch()?) {
            Some(Byte::Slot(slot)) => Ok(slot as usize),
            _ => Err(VmError::InvalidOperand {
                byte: self.code[at],
                offset: at,
            }),
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

    /// Folds the compound starting at `ip`, through its `End` byte.
    fn compound(&mut self, memory: &mut Memory, handles: &mut CallHandles<'_>) -> VmResult<Value> {
        let mut folder = CompoundFolder::new();
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
            let value = self.value_token(byte, at, memory, handles)?;
            folder.push_value(value).map_err(|e| e.at(at))?;
        }
    }

    /// Reads the value token whose first byte, at `at`, was just fetched.
    fn value_token(
        &mut self,
        byte: u8,
        at: usize,
        memory: &mut Memory,
        handles: &mut CallHandles<'_>,
    ) -> VmResult<Value> {
        let invalid = VmError::InvalidOperand { byte, offset: at };
        match Byte::decode(byte).ok_or(invalid.clone())? {
            Byte::Slot(slot) => memory.read(slot as usize).ok_or(invalid),
            Byte::Constant(index) => self
                .context
                .constants
                .get(index)
                .map(Value::scalar)
                .ok_or(invalid),
            Byte::Extended => {
                let ext = ExtendedOpcode::from_byte(self.fetch()?).ok_or(invalid)?;
                match ext {
                    ExtendedOpcode::ExternalCall => self.call_external(at, memory, handles),
                    _ => self.call_builtin(BuiltinCode::Extended(ext), at, memory, handles),
                }
            }
            Byte::Op(Opcode::StackPop) => {
                let meta = SlotMeta::decode(self.fetch()?).ok_or(invalid)?;
                self.pop(memory, meta, at)
            }
            Byte::Op(Opcode::Swizzle) => {
                let swizzle = self.fetch_swizzle()?;
                let inner_at = self.ip;
                let inner = self.fetch()?;
                let value = self.value_token(inner, inner_at, memory, handles)?;
                value.swizzle(swizzle).ok_or(VmError::VectorSizeMismatch {
                    left: value.size,
                    right: swizzle.max_component() + 1,
                    offset: at,
                })
            }
            Byte::Op(op) if op.fixed_arity().is_some() || op == Opcode::Random || op.is_reduction() => {
                self.call_builtin(BuiltinCode::Base(op), at, memory, handles)
            }
            Byte::Op(_) => Err(invalid),
        }
    }

    fn call_builtin(
        &mut self,
        code: BuiltinCode,
        at: usize,
        memory: &mut Memory,
        handles: &mut CallHandles<'_>,
    ) -> VmResult<Value> {
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
        let args = self.arguments(count, memory, handles)?;
        eval_builtin(code, control, &args, &self.context.rng).map_err(|e| e.at(at))
    }

    fn call_external(
        &mut self,
        at: usize,
        memory: &mut Memory,
        handles: &mut CallHandles<'_>,
    ) -> VmResult<Value> {
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
        let args = self.arguments(function.arity(), memory, handles)?;
        if self.options.validation_mode {
            return Ok(Value::zero(function.result.ty, function.result.size));
        }
        let result = (function.function)(&args, handles);
        if CHECKED && (result.ty != function.result.ty || result.size != function.result.size) {
            error!(
                function = %function.name,
                offset = at,
                "External function returned {}{} instead of its declared {}{}",
                result.ty,
                result.size,
                function.result.ty,
                function.result.size
            );
            return Ok(Value::sentinel(function.result.ty, function.result.size));
        }
        Ok(result)
    }

    fn arguments(
        &mut self,
        count: usize,
        memory: &mut Memory,
        handles: &mut CallHandles<'_>,
    ) -> VmResult<SmallVec<[Value; 4]>> {
        let mut args = SmallVec::new();
        for _ in 0..count {
            let at = self.ip;
            let byte = self.fetch()?;
            args.push(self.value_token(byte, at, memory, handles)?);
        }
        Ok(args)
    }

    fn assign(
        &mut self,
        memory: &mut Memory,
        slot: usize,
        value: Value,
        swizzle: Option<Swizzle>,
        at: usize,
    ) -> VmResult<()> {
        let target = metadata::read(&memory.metadata, slot).ok_or(VmError::InvalidOperand {
            byte: self.code[at + 1],
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
        let value = if value.ty != target.ty {
            if CHECKED {
                error!(offset = at, "Assigning {} value to {} slot", value.ty, target.ty);
                Value::sentinel(target.ty, width)
            } else {
                return Err(VmError::TypeMismatch {
                    expected: target.ty,
                    found: value.ty,
                    offset: at,
                });
            }
        } else {
            value
        };

        match swizzle {
            None => {
                let value = value.broadcast(target.size);
                if !memory.write_raw(slot, &value.as_slice()[..target.size as usize]) {
                    return Err(mismatch);
                }
            }
            Some(swizzle) => {
                for (i, component) in swizzle.components().enumerate() {
                    if component >= target.size
                        || !write_lane(&mut memory.data, slot + component as usize, value.lane(i))
                    {
                        return Err(mismatch);
                    }
                }
            }
        }
        Ok(())
    }

    fn push(&mut self, memory: &mut Memory, value: Value) -> VmResult<()> {
        let needed = self.sp + value.size as usize;
        if needed > self.stack_slots {
            return Err(VmError::StackTooSmall {
                needed,
                capacity: self.stack_slots,
            });
        }
        if !memory.write(self.data_slots + self.sp, &value) {
            return Err(VmError::StackTooSmall {
                needed,
                capacity: memory.metadata.len().saturating_sub(self.data_slots),
            });
        }
        self.sp = needed;
        self.high_water = self.high_water.max(self.sp);
        Ok(())
    }

    fn pop(&mut self, memory: &mut Memory, meta: SlotMeta, at: usize) -> VmResult<Value> {
        let size = meta.size as usize;
        if size > self.sp {
            return Err(VmError::StackUnderflow { offset: at });
        }
        self.sp -= size;
        let slot = self.data_slots + self.sp;
        let lanes =
            read_lanes(&memory.data, slot, meta.size).ok_or(VmError::StackUnderflow { offset: at })?;
        let mut value = Value {
            lanes,
            size: meta.size,
            ty: meta.ty,
        };
        if CHECKED {
            let recorded = metadata::read(&memory.metadata, slot);
            if recorded != Some(meta) {
                error!(
                    offset = at,
                    expected = ?meta,
                    ?recorded,
                    "Stack pop does not match the pushed value"
                );
                value = Value::sentinel(meta.ty, meta.size);
            }
        }
        metadata::clear(&mut memory.metadata, slot, size);
        Ok(value)
    }

    /// Pops the top value whatever its shape, read from its last slot's
    /// metadata.
    fn pop_any(&mut self, memory: &mut Memory, at: usize) -> VmResult<Value> {
        let top = self
            .sp
            .checked_sub(1)
            .ok_or(VmError::StackUnderflow { offset: at })?;
        let meta = metadata::read(&memory.metadata, self.data_slots + top).unwrap_or(SlotMeta {
            ty: ValueType::Numeric,
            size: 1,
        });
        self.pop(memory, meta, at)
    }
}
