//! Operator kernels shared by both interpreters and the constant folder.
//!
//! Lane-level functions (`binary_lane`, `unary_lane`) are the single source of
//! arithmetic truth; the value-level wrappers add broadcasting and type
//! checks. Folding a constant at compile time therefore produces the same
//! bits as executing it.

use crate::parser::syntax::{BinaryOp, UnaryOp};
use crate::vm::error::{VmError, VmResult};
use crate::vm::value::{MAX_LANES, Value, ValueType};

#[inline]
fn truth(b: bool) -> f32 {
    if b { 1.0 } else { 0.0 }
}

#[inline]
pub fn binary_lane(op: BinaryOp, a: f32, b: f32) -> f32 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        // Floored modulo: the result takes the sign of the divisor.
        BinaryOp::Mod => a - b * (a / b).floor(),
        BinaryOp::Pow => a.powf(b),
        BinaryOp::Lt => truth(a < b),
        BinaryOp::Le => truth(a <= b),
        BinaryOp::Gt => truth(a > b),
        BinaryOp::Ge => truth(a >= b),
        BinaryOp::Eq => truth(a == b),
        BinaryOp::Ne => truth(a != b),
        BinaryOp::And => truth(a != 0.0 && b != 0.0),
        BinaryOp::Or => truth(a != 0.0 || b != 0.0),
    }
}

/// Equality on raw id bits. Ids never compare through float semantics.
#[inline]
pub fn id_lane(op: BinaryOp, a: f32, b: f32) -> f32 {
    match op {
        BinaryOp::Eq => truth(a.to_bits() == b.to_bits()),
        _ => truth(a.to_bits() != b.to_bits()),
    }
}

#[inline]
pub fn unary_lane(op: UnaryOp, x: f32) -> f32 {
    match op {
        UnaryOp::Neg => -x,
        UnaryOp::Not => truth(x == 0.0),
    }
}

/// Result size of a binary operation, or `None` when the sizes are neither
/// equal nor broadcastable.
#[inline]
pub fn result_size(left: u8, right: u8) -> Option<u8> {
    if left == right || right == 1 {
        Some(left)
    } else if left == 1 {
        Some(right)
    } else {
        None
    }
}

pub fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> VmResult<Value> {
    let size = result_size(left.size, right.size).ok_or(VmError::VectorSizeMismatch {
        left: left.size,
        right: right.size,
        offset: 0,
    })?;
    let kernel: fn(BinaryOp, f32, f32) -> f32 = match (left.ty, right.ty) {
        (ValueType::Numeric, ValueType::Numeric) => binary_lane,
        (ValueType::Id, ValueType::Id) if op.is_equality() => id_lane,
        _ => {
            return Err(VmError::TypeMismatch {
                expected: ValueType::Numeric,
                found: ValueType::Id,
                offset: 0,
            });
        }
    };
    let mut lanes = [0.0; MAX_LANES];
    for (i, lane) in lanes.iter_mut().enumerate().take(size as usize) {
        *lane = kernel(op, left.lane(i), right.lane(i));
    }
    Ok(Value {
        lanes,
        size,
        ty: ValueType::Numeric,
    })
}

pub fn apply_unary(op: UnaryOp, value: &Value) -> VmResult<Value> {
    if value.ty != ValueType::Numeric {
        return Err(VmError::TypeMismatch {
            expected: ValueType::Numeric,
            found: value.ty,
            offset: 0,
        });
    }
    let mut out = *value;
    for lane in out.lanes.iter_mut().take(value.size as usize) {
        *lane = unary_lane(op, *lane);
    }
    Ok(out)
}
