//! Builtin function kernels.
//!
//! Shared by both interpreters and by constant folding. Operands arrive as
//! already-read [`Value`]s; the caller decides how many to read from the
//! function's arity or control byte.

use tracing::{debug, error};

use crate::stdlib::functions::{BuiltinCode, BuiltinFunction, by_code};
use crate::stdlib::random::Rng;
use crate::vm::CHECKED;
use crate::vm::error::{VmError, VmResult};
use crate::vm::opcode::{ExtendedOpcode, Opcode};
use crate::vm::value::{MAX_LANES, Value, ValueType};

// ============================================================================
// Lane kernels
// ============================================================================

/// Component-wise single-operand functions.
fn unary_lane(code: BuiltinCode, x: f32) -> Option<f32> {
    use BuiltinCode::{Base, Extended};
    Some(match code {
        Base(Opcode::Abs) => x.abs(),
        Base(Opcode::Saturate) => x.clamp(0.0, 1.0),
        Base(Opcode::Floor) => x.floor(),
        Base(Opcode::Ceil) => x.ceil(),
        Base(Opcode::Frac) => x - x.floor(),
        Base(Opcode::Sqrt) => x.sqrt(),
        Base(Opcode::Sin) => x.sin(),
        Base(Opcode::Cos) => x.cos(),
        Base(Opcode::Tan) => x.tan(),
        Base(Opcode::Log) => x.ln(),
        Base(Opcode::Log2) => x.log2(),
        Base(Opcode::Exp) => x.exp(),
        Base(Opcode::Exp2) => x.exp2(),
        Extended(ExtendedOpcode::Round) => x.round(),
        Extended(ExtendedOpcode::Sign) => {
            if x == 0.0 || x.is_nan() {
                x
            } else {
                x.signum()
            }
        }
        Extended(ExtendedOpcode::Rsqrt) => 1.0 / x.sqrt(),
        Extended(ExtendedOpcode::Asin) => x.asin(),
        Extended(ExtendedOpcode::Acos) => x.acos(),
        Extended(ExtendedOpcode::Atan) => x.atan(),
        Extended(ExtendedOpcode::Sinh) => x.sinh(),
        Extended(ExtendedOpcode::Cosh) => x.cosh(),
        Extended(ExtendedOpcode::Tanh) => x.tanh(),
        Extended(ExtendedOpcode::Log10) => x.log10(),
        _ => return None,
    })
}

fn smoothstep(e0: f32, e1: f32, x: f32) -> f32 {
    let t = ((x - e0) / (e1 - e0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn dot(a: &Value, b: &Value) -> f32 {
    let size = a.size.max(b.size) as usize;
    (0..size).map(|i| a.lane(i) * b.lane(i)).sum()
}

fn map_lanes(size: u8, f: impl Fn(usize) -> f32) -> Value {
    let mut lanes = [0.0; MAX_LANES];
    for (i, lane) in lanes.iter_mut().enumerate().take(size as usize) {
        *lane = f(i);
    }
    Value {
        lanes,
        size,
        ty: ValueType::Numeric,
    }
}

// ============================================================================
// Operand checks
// ============================================================================

fn require_numeric(args: &[Value]) -> VmResult<()> {
    match args.iter().find(|v| v.ty != ValueType::Numeric) {
        Some(v) => Err(VmError::TypeMismatch {
            expected: ValueType::Numeric,
            found: v.ty,
            offset: 0,
        }),
        None => Ok(()),
    }
}

/// Checked builds verify that strict functions got equally sized operands.
/// A violation is logged and answered with the sentinel value.
fn strict_violation(function: &BuiltinFunction, args: &[Value]) -> Option<Value> {
    if !CHECKED || !function.strict_operands {
        return None;
    }
    let first = args.first()?;
    if args.iter().all(|a| a.size == first.size && a.ty == first.ty) {
        return None;
    }
    error!(
        "Operands of '{}' disagree in size or type: {:?}",
        function.name,
        args.iter().map(|a| (a.ty, a.size)).collect::<Vec<_>>()
    );
    Some(Value::sentinel(
        first.ty,
        function.result_size(&args.iter().map(|a| a.size).collect::<Vec<_>>()),
    ))
}

fn broadcast_size(args: &[Value]) -> VmResult<u8> {
    let widest = args.iter().map(|a| a.size).max().unwrap_or(1);
    match args.iter().find(|a| a.size != 1 && a.size != widest) {
        Some(bad) => Err(VmError::VectorSizeMismatch {
            left: widest,
            right: bad.size,
            offset: 0,
        }),
        None => Ok(widest),
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Evaluates a builtin on its operands.
///
/// `control` is the byte following `Random` or a reduction opcode, ignored
/// otherwise.
pub fn eval_builtin(code: BuiltinCode, control: u8, args: &[Value], rng: &Rng) -> VmResult<Value> {
    let function = by_code(code).ok_or(VmError::InvalidOperand {
        byte: match code {
            BuiltinCode::Base(op) => op.byte(),
            BuiltinCode::Extended(op) => op.byte(),
        },
        offset: 0,
    })?;

    if code == BuiltinCode::Extended(ExtendedOpcode::DebugDump) {
        let value = args.first().copied().unwrap_or(Value::ZERO);
        debug!("dump: {}", value);
        return Ok(value);
    }

    require_numeric(args)?;
    if let Some(sentinel) = strict_violation(function, args) {
        return Ok(sentinel);
    }

    let arg = |i: usize| args.get(i).copied().unwrap_or(Value::ZERO);

    if args.len() == 1 && unary_lane(code, 0.0).is_some() {
        let x = args[0];
        return Ok(map_lanes(x.size, |i| {
            unary_lane(code, x.lanes[i]).unwrap_or(f32::NAN)
        }));
    }

    use BuiltinCode::{Base, Extended};
    let value = match code {
        Base(Opcode::Normalize) => {
            let v = arg(0);
            let len = dot(&v, &v).sqrt();
            if len == 0.0 {
                Value::zero(ValueType::Numeric, v.size)
            } else {
                map_lanes(v.size, |i| v.lanes[i] / len)
            }
        }
        Base(Opcode::Length) => {
            let v = arg(0);
            Value::scalar(dot(&v, &v).sqrt())
        }
        Base(Opcode::Dot) => Value::scalar(dot(&arg(0), &arg(1))),
        Extended(ExtendedOpcode::Distance) => {
            let (a, b) = (arg(0), arg(1));
            let size = a.size.max(b.size) as usize;
            Value::scalar(
                (0..size)
                    .map(|i| (a.lane(i) - b.lane(i)).powi(2))
                    .sum::<f32>()
                    .sqrt(),
            )
        }
        Base(Opcode::Cross) => {
            let (a, b) = (arg(0), arg(1));
            if a.size != 3 || b.size != 3 {
                return Err(VmError::VectorSizeMismatch {
                    left: a.size,
                    right: b.size,
                    offset: 0,
                });
            }
            let [ax, ay, az, _] = a.lanes;
            let [bx, by, bz, _] = b.lanes;
            Value::vector(&[ay * bz - az * by, az * bx - ax * bz, ax * by - ay * bx])
        }
        Extended(ExtendedOpcode::Atan2) => {
            let size = broadcast_size(args)?;
            let (y, x) = (arg(0), arg(1));
            map_lanes(size, |i| y.lane(i).atan2(x.lane(i)))
        }
        Extended(ExtendedOpcode::Step) => {
            let size = broadcast_size(args)?;
            let (edge, x) = (arg(0), arg(1));
            map_lanes(size, |i| if x.lane(i) < edge.lane(i) { 0.0 } else { 1.0 })
        }
        Base(Opcode::Random) => match control {
            0 => Value::scalar(rng.next_f32()),
            1 => {
                let hi = arg(0);
                map_lanes(hi.size, |i| rng.next_f32() * hi.lanes[i])
            }
            _ => {
                let size = broadcast_size(args)?;
                let (lo, hi) = (arg(0), arg(1));
                map_lanes(size, |i| {
                    lo.lane(i) + (hi.lane(i) - lo.lane(i)) * rng.next_f32()
                })
            }
        },
        Base(Opcode::Fma) => {
            let size = broadcast_size(args)?;
            let (a, b, c) = (arg(0), arg(1), arg(2));
            map_lanes(size, |i| a.lane(i).mul_add(b.lane(i), c.lane(i)))
        }
        Base(Opcode::Lerp) => {
            let size = broadcast_size(args)?;
            let (a, b, t) = (arg(0), arg(1), arg(2));
            map_lanes(size, |i| a.lane(i) + (b.lane(i) - a.lane(i)) * t.lane(i))
        }
        Base(Opcode::Select) => {
            let size = broadcast_size(args)?;
            let (cond, a, b) = (arg(0), arg(1), arg(2));
            map_lanes(size, |i| {
                if cond.lane(i) != 0.0 {
                    a.lane(i)
                } else {
                    b.lane(i)
                }
            })
        }
        Base(Opcode::Clamp) => {
            let size = broadcast_size(args)?;
            let (x, lo, hi) = (arg(0), arg(1), arg(2));
            map_lanes(size, |i| x.lane(i).max(lo.lane(i)).min(hi.lane(i)))
        }
        Extended(ExtendedOpcode::Smoothstep) => {
            let size = broadcast_size(args)?;
            let (e0, e1, x) = (arg(0), arg(1), arg(2));
            map_lanes(size, |i| smoothstep(e0.lane(i), e1.lane(i), x.lane(i)))
        }
        Base(op) if op.is_reduction() => reduce(op, args)?,
        _ => {
            return Err(VmError::InvalidOperand {
                byte: match code {
                    Base(op) => op.byte(),
                    Extended(op) => op.byte(),
                },
                offset: 0,
            });
        }
    };
    Ok(value)
}

fn reduce(op: Opcode, args: &[Value]) -> VmResult<Value> {
    let combine = |acc: f32, x: f32| match op {
        Opcode::AddAll => acc + x,
        Opcode::MulAll => acc * x,
        Opcode::MinAll => acc.min(x),
        Opcode::MaxAll => acc.max(x),
        Opcode::Any => {
            if acc != 0.0 || x != 0.0 {
                1.0
            } else {
                0.0
            }
        }
        _ => {
            if acc != 0.0 && x != 0.0 {
                1.0
            } else {
                0.0
            }
        }
    };
    let identity = match op {
        Opcode::AddAll | Opcode::Any => 0.0,
        Opcode::MulAll | Opcode::All => 1.0,
        Opcode::MinAll => f32::INFINITY,
        _ => f32::NEG_INFINITY,
    };

    let horizontal = matches!(op, Opcode::Any | Opcode::All) || args.len() == 1;
    if horizontal {
        let folded = args
            .iter()
            .flat_map(|v| v.as_slice().iter().copied())
            .fold(identity, combine);
        return Ok(Value::scalar(folded));
    }

    let size = broadcast_size(args)?;
    Ok(map_lanes(size, |i| {
        args.iter().map(|v| v.lane(i)).fold(identity, combine)
    }))
}

/// Result size of a builtin call, used when an operand count is only known
/// from a control byte.
pub fn builtin_result_size(code: BuiltinCode, args: &[Value]) -> u8 {
    by_code(code)
        .map(|f| f.result_size(&args.iter().map(|a| a.size).collect::<Vec<_>>()))
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(code: BuiltinCode, args: &[Value]) -> Value {
        eval_builtin(code, args.len() as u8, args, &Rng::default()).unwrap()
    }

    #[test]
    fn unary_functions_preserve_size() {
        let v = call(
            BuiltinCode::Base(Opcode::Abs),
            &[Value::vector(&[-1.0, 2.0, -3.0])],
        );
        assert_eq!(v.as_slice(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn dot_and_length_reduce_to_scalar() {
        let a = Value::vector(&[1.0, 2.0, 3.0]);
        assert_eq!(call(BuiltinCode::Base(Opcode::Dot), &[a, a]).as_slice(), &[14.0]);
        let b = Value::vector(&[3.0, 4.0]);
        assert_eq!(call(BuiltinCode::Base(Opcode::Length), &[b]).as_slice(), &[5.0]);
    }

    #[test]
    fn cross_requires_size_three() {
        let x = Value::vector(&[1.0, 0.0, 0.0]);
        let y = Value::vector(&[0.0, 1.0, 0.0]);
        assert_eq!(
            call(BuiltinCode::Base(Opcode::Cross), &[x, y]).as_slice(),
            &[0.0, 0.0, 1.0]
        );
        let err = eval_builtin(
            BuiltinCode::Base(Opcode::Cross),
            0,
            &[Value::vector(&[1.0, 2.0]), Value::vector(&[1.0, 2.0])],
            &Rng::default(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn reductions_fold_horizontally_for_one_operand() {
        let v = Value::vector(&[1.0, 5.0, 3.0]);
        assert_eq!(call(BuiltinCode::Base(Opcode::MaxAll), &[v]).as_slice(), &[5.0]);
        assert_eq!(call(BuiltinCode::Base(Opcode::AddAll), &[v]).as_slice(), &[9.0]);
        let w = Value::vector(&[4.0, 0.0, 4.0]);
        assert_eq!(
            call(BuiltinCode::Base(Opcode::MinAll), &[v, w]).as_slice(),
            &[1.0, 0.0, 3.0]
        );
        assert_eq!(call(BuiltinCode::Base(Opcode::All), &[v, w]).as_slice(), &[0.0]);
        assert_eq!(call(BuiltinCode::Base(Opcode::Any), &[w]).as_slice(), &[1.0]);
    }

    #[test]
    fn random_respects_ranges() {
        let rng = Rng::new(3);
        for _ in 0..100 {
            let v = eval_builtin(
                BuiltinCode::Base(Opcode::Random),
                2,
                &[Value::scalar(5.0), Value::scalar(6.0)],
                &rng,
            )
            .unwrap();
            assert!((5.0..6.0).contains(&v.lanes[0]));
        }
    }

    #[test]
    fn smoothstep_is_clamped() {
        let v = call(
            BuiltinCode::Extended(ExtendedOpcode::Smoothstep),
            &[Value::scalar(0.0), Value::scalar(1.0), Value::scalar(2.0)],
        );
        assert_eq!(v.lanes[0], 1.0);
    }

    #[test]
    fn dump_is_identity() {
        let v = Value::vector(&[1.0, 2.0]);
        assert_eq!(
            call(BuiltinCode::Extended(ExtendedOpcode::DebugDump), &[v]),
            v
        );
    }
}
