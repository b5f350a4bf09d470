//! Values held by N instances at once, and the batched compound folder.

use smallvec::SmallVec;

use crate::parser::syntax::{BinaryOp, Swizzle, UnaryOp};
use crate::vm::compound::{CompoundState, PendingUnary, ValueStep};
use crate::vm::error::{VmError, VmResult};
use crate::vm::opcode::Opcode;
use crate::vm::ssmd::kernels;
use crate::vm::value::{Lanes, MAX_LANES, Value, ValueType};

/// One value per instance, all sharing a vector size and type.
#[derive(Debug, Clone, PartialEq)]
pub struct WideValue {
    pub size: u8,
    pub ty: ValueType,
    pub lanes: SmallVec<[Lanes; 8]>,
}

impl WideValue {
    pub fn zeroed(instances: usize, size: u8, ty: ValueType) -> Self {
        Self {
            size,
            ty,
            lanes: SmallVec::from_elem([0.0; MAX_LANES], instances),
        }
    }

    pub fn splat(value: Value, instances: usize) -> Self {
        Self {
            size: value.size,
            ty: value.ty,
            lanes: SmallVec::from_elem(value.lanes, instances),
        }
    }

    /// Gathers per-instance values; they must agree on shape.
    pub fn gather(values: impl IntoIterator<Item = Value>) -> VmResult<Self> {
        let mut iter = values.into_iter();
        let Some(first) = iter.next() else {
            return Ok(Self::zeroed(0, 1, ValueType::Numeric));
        };
        let mut wide = Self {
            size: first.size,
            ty: first.ty,
            lanes: SmallVec::new(),
        };
        wide.lanes.push(first.lanes);
        for value in iter {
            if value.size != wide.size {
                return Err(VmError::VectorSizeMismatch {
                    left: wide.size,
                    right: value.size,
                    offset: 0,
                });
            }
            wide.lanes.push(value.lanes);
        }
        Ok(wide)
    }

    pub fn instances(&self) -> usize {
        self.lanes.len()
    }

    /// The value seen by one instance.
    pub fn get(&self, instance: usize) -> Value {
        Value {
            lanes: self.lanes.get(instance).copied().unwrap_or([0.0; MAX_LANES]),
            size: self.size,
            ty: self.ty,
        }
    }

    pub fn swizzle(&self, swizzle: Swizzle) -> Option<WideValue> {
        if self.size > 1 && swizzle.max_component() >= self.size {
            return None;
        }
        let mut out = Self::zeroed(self.instances(), swizzle.count, self.ty);
        for (src, dst) in self.lanes.iter().zip(out.lanes.iter_mut()) {
            for (i, c) in swizzle.components().enumerate() {
                dst[i] = if self.size == 1 { src[0] } else { src[c as usize] };
            }
        }
        Some(out)
    }

    /// Appends `other`'s components after this value's, per instance.
    fn grow(&mut self, other: &WideValue) {
        let start = self.size as usize;
        for (dst, src) in self.lanes.iter_mut().zip(other.lanes.iter()) {
            dst[start..start + other.size as usize].copy_from_slice(&src[..other.size as usize]);
        }
        self.size += other.size;
    }
}

/// Batched counterpart of [`crate::vm::compound::CompoundFolder`]; shares its
/// state transitions.
#[derive(Debug, Clone, Default)]
pub struct WideFolder {
    state: CompoundState,
    acc: Option<WideValue>,
    operand: Option<WideValue>,
    pending_op: Option<BinaryOp>,
    unary: PendingUnary,
}

impl WideFolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_unary(&mut self, op: UnaryOp) -> VmResult<()> {
        self.unary.push(op)
    }

    pub fn push_value(&mut self, value: WideValue) -> VmResult<()> {
        let value = match self.unary.take() {
            Some(op) => kernels::unary(op, &value)?,
            None => value,
        };
        let current = self.operand.as_ref().map_or(0, |o| o.size);
        let (step, next) = self.state.accept_value(current, value.size)?;
        match (step, self.operand.as_mut()) {
            (ValueStep::Grow, Some(operand)) => {
                if operand.ty != value.ty {
                    return Err(VmError::TypeMismatch {
                        expected: operand.ty,
                        found: value.ty,
                        offset: 0,
                    });
                }
                operand.grow(&value);
            }
            _ => self.operand = Some(value),
        }
        self.state = next;
        Ok(())
    }

    pub fn push_operator(&mut self, op: BinaryOp) -> VmResult<()> {
        self.state = self.state.accept_operator(Opcode::from_binary(op).byte())?;
        self.close_operand()?;
        self.pending_op = Some(op);
        Ok(())
    }

    pub fn finish(mut self) -> VmResult<WideValue> {
        self.state.accept_end(Opcode::End.byte())?;
        self.close_operand()?;
        self.acc.ok_or(VmError::InvalidOperand {
            byte: Opcode::End.byte(),
            offset: 0,
        })
    }

    fn close_operand(&mut self) -> VmResult<()> {
        let Some(operand) = self.operand.take() else {
            return Ok(());
        };
        let acc = match (self.acc.take(), self.pending_op.take()) {
            (Some(left), Some(op)) => kernels::binary(op, &left, &operand)?,
            _ => operand,
        };
        self.acc = Some(acc);
        Ok(())
    }
}
