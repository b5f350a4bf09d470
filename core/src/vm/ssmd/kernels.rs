//! Monomorphized binary kernels for batched execution.
//!
//! Each valid (left size, right size) pair gets its own instantiation of
//! [`kernel`], so the per-instance inner loop has a compile-time trip count
//! and a compile-time broadcast decision.

use crate::parser::syntax::{BinaryOp, UnaryOp};
use crate::vm::error::{VmError, VmResult};
use crate::vm::operators::{binary_lane, id_lane, result_size, unary_lane};
use crate::vm::ssmd::wide::WideValue;
use crate::vm::value::{Lanes, ValueType};

#[inline(always)]
fn kernel<const A: usize, const B: usize, F: Fn(f32, f32) -> f32>(
    f: F,
    left: &[Lanes],
    right: &[Lanes],
    out: &mut [Lanes],
) {
    let n = if A > B { A } else { B };
    for ((l, r), o) in left.iter().zip(right).zip(out.iter_mut()) {
        for c in 0..n {
            let a = if A == 1 { l[0] } else { l[c] };
            let b = if B == 1 { r[0] } else { r[c] };
            o[c] = f(a, b);
        }
    }
}

macro_rules! dispatch {
    ($f:expr, $left:expr, $right:expr, $out:expr, $sizes:expr; $(($a:literal, $b:literal)),+ $(,)?) => {
        match $sizes {
            $(($a, $b) => kernel::<$a, $b, _>($f, $left, $right, $out),)+
            (left, right) => {
                return Err(VmError::VectorSizeMismatch {
                    left,
                    right,
                    offset: 0,
                })
            }
        }
    };
}

macro_rules! dispatch_sizes {
    ($f:expr, $left:expr, $right:expr, $out:expr, $sizes:expr) => {
        dispatch!($f, $left, $right, $out, $sizes;
            (1, 1), (1, 2), (1, 3), (1, 4),
            (2, 1), (2, 2),
            (3, 1), (3, 3),
            (4, 1), (4, 4),
        )
    };
}

pub fn binary(op: BinaryOp, left: &WideValue, right: &WideValue) -> VmResult<WideValue> {
    let size = result_size(left.size, right.size).ok_or(VmError::VectorSizeMismatch {
        left: left.size,
        right: right.size,
        offset: 0,
    })?;
    let mut out = WideValue::zeroed(left.instances(), size, ValueType::Numeric);
    let sizes = (left.size, right.size);
    match (left.ty, right.ty) {
        (ValueType::Numeric, ValueType::Numeric) => {
            dispatch_sizes!(|a, b| binary_lane(op, a, b), &left.lanes, &right.lanes, &mut out.lanes, sizes)
        }
        (ValueType::Id, ValueType::Id) if op.is_equality() => {
            dispatch_sizes!(|a, b| id_lane(op, a, b), &left.lanes, &right.lanes, &mut out.lanes, sizes)
        }
        _ => {
            return Err(VmError::TypeMismatch {
                expected: ValueType::Numeric,
                found: ValueType::Id,
                offset: 0,
            });
        }
    }
    Ok(out)
}

pub fn unary(op: UnaryOp, value: &WideValue) -> VmResult<WideValue> {
    if value.ty != ValueType::Numeric {
        return Err(VmError::TypeMismatch {
            expected: ValueType::Numeric,
            found: value.ty,
            offset: 0,
        });
    }
    let mut out = value.clone();
    for lanes in out.lanes.iter_mut() {
        for x in lanes.iter_mut().take(value.size as usize) {
            *x = unary_lane(op, *x);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::operators::apply_binary;
    use crate::vm::value::Value;

    #[test]
    fn batched_results_match_the_scalar_operators() {
        let left = [Value::vector(&[1.0, 2.0, 3.0]), Value::vector(&[-4.0, 0.5, 9.0])];
        let right = [Value::scalar(2.0), Value::scalar(-1.0)];
        let wl = WideValue::gather(left).unwrap();
        let wr = WideValue::gather(right).unwrap();
        for op in [BinaryOp::Add, BinaryOp::Mod, BinaryOp::Pow, BinaryOp::Lt] {
            let out = binary(op, &wl, &wr).unwrap();
            for i in 0..2 {
                assert_eq!(out.get(i), apply_binary(op, &left[i], &right[i]).unwrap());
            }
        }
    }

    #[test]
    fn unsupported_size_pairs_are_rejected() {
        let wl = WideValue::splat(Value::vector(&[1.0, 2.0]), 2);
        let wr = WideValue::splat(Value::vector(&[1.0, 2.0, 3.0]), 2);
        assert!(matches!(
            binary(BinaryOp::Add, &wl, &wr),
            Err(VmError::VectorSizeMismatch { left: 2, right: 3, .. })
        ));
    }
}
