//! The compound evaluator's state machine.
//!
//! A compound is a flat, left-to-right stream of values and operators with no
//! precedence: `a + b * c` folds as `(a + b) * c`. Precedence is expressed by
//! the compiler through nesting. Consecutive values without an operator
//! between them grow the current operand into a vector.
//!
//! ```text
//!              value (len < 4)               value (len < 4)
//!  ExpectValue ──────────────► VectorGrowing ◄──────────────┐
//!       ▲                         │  │  └───────────────────┘
//!       │        operator         │  │ value (len == 4)
//!       └─────────────────────────┘  ▼
//!       ▲                      ExpectOperator ── value ──► VectorOverflow
//!       └──────── operator ───────────┘
//! ```
//!
//! The transitions live on [`CompoundState`] so the single-instance folder
//! here and the batched folder in `vm::ssmd` share them.

use tracing::warn;

use crate::parser::syntax::{BinaryOp, UnaryOp};
use crate::vm::error::{VmError, VmResult};
use crate::vm::opcode::Opcode;
use crate::vm::operators::{apply_binary, apply_unary};
use crate::vm::value::{MAX_LANES, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompoundState {
    /// At the start, or after a binary operator.
    #[default]
    ExpectValue,
    /// The current operand holds four lanes; only an operator or the end may follow.
    ExpectOperator,
    /// The current operand can still grow.
    VectorGrowing,
}

/// What to do with an incoming value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueStep {
    /// Start a new operand.
    Start,
    /// Append lanes to the current operand.
    Grow,
}

impl CompoundState {
    /// Accepts a value of `incoming` lanes while the current operand holds
    /// `current` lanes. Returns the step to take and the resulting state.
    pub fn accept_value(self, current: u8, incoming: u8) -> VmResult<(ValueStep, CompoundState)> {
        let (step, len) = match self {
            CompoundState::ExpectValue => (ValueStep::Start, incoming),
            CompoundState::VectorGrowing => (ValueStep::Grow, current + incoming),
            CompoundState::ExpectOperator => return Err(VmError::VectorOverflow { offset: 0 }),
        };
        if len as usize > MAX_LANES {
            return Err(VmError::VectorOverflow { offset: 0 });
        }
        let next = if len as usize == MAX_LANES {
            CompoundState::ExpectOperator
        } else {
            CompoundState::VectorGrowing
        };
        Ok((step, next))
    }

    /// Accepts a binary operator, closing the current operand.
    pub fn accept_operator(self, byte: u8) -> VmResult<CompoundState> {
        match self {
            CompoundState::ExpectValue => Err(VmError::InvalidOperand { byte, offset: 0 }),
            _ => Ok(CompoundState::ExpectValue),
        }
    }

    /// Accepts the end of the compound.
    pub fn accept_end(self, byte: u8) -> VmResult<()> {
        match self {
            CompoundState::ExpectValue => Err(VmError::InvalidOperand { byte, offset: 0 }),
            _ => Ok(()),
        }
    }
}

/// Tracks a pending unary operator. A repeated operator of the same kind
/// cancels; the caller is told so it can log it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingUnary(Option<UnaryOp>);

impl PendingUnary {
    pub fn push(&mut self, op: UnaryOp) -> VmResult<()> {
        match self.0 {
            None => self.0 = Some(op),
            Some(pending) if pending == op => {
                warn!(
                    "Repeated unary '{}' cancels out; this is likely unintentional",
                    op
                );
                self.0 = None;
            }
            Some(_) => {
                return Err(VmError::InvalidOperand {
                    byte: Opcode::from_unary(op).byte(),
                    offset: 0,
                });
            }
        }
        Ok(())
    }

    pub fn take(&mut self) -> Option<UnaryOp> {
        self.0.take()
    }

    pub fn is_pending(&self) -> bool {
        self.0.is_some()
    }
}

/// Folds a compound stream into one value.
///
/// Used by the single-instance interpreter at run time and by the flattening
/// stage to fold constant compounds.
#[derive(Debug, Clone, Default)]
pub struct CompoundFolder {
    state: CompoundState,
    acc: Option<Value>,
    operand: Value,
    pending_op: Option<BinaryOp>,
    unary: PendingUnary,
    max_size: u8,
}

impl CompoundFolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CompoundState {
        self.state
    }

    /// Largest vector size seen so far, operands and intermediate results.
    pub fn max_size(&self) -> u8 {
        self.max_size
    }

    pub fn push_unary(&mut self, op: UnaryOp) -> VmResult<()> {
        self.unary.push(op)
    }

    pub fn push_value(&mut self, value: Value) -> VmResult<()> {
        let value = match self.unary.take() {
            Some(op) => apply_unary(op, &value)?,
            None => value,
        };
        let (step, next) = self.state.accept_value(self.operand.size, value.size)?;
        match step {
            ValueStep::Start => self.operand = value,
            ValueStep::Grow => {
                if self.operand.ty != value.ty {
                    return Err(VmError::TypeMismatch {
                        expected: self.operand.ty,
                        found: value.ty,
                        offset: 0,
                    });
                }
                let start = self.operand.size as usize;
                for (i, x) in value.as_slice().iter().enumerate() {
                    self.operand.lanes[start + i] = *x;
                }
                self.operand.size += value.size;
            }
        }
        self.max_size = self.max_size.max(self.operand.size);
        self.state = next;
        Ok(())
    }

    pub fn push_operator(&mut self, op: BinaryOp) -> VmResult<()> {
        self.state = self
            .state
            .accept_operator(Opcode::from_binary(op).byte())?;
        self.close_operand()?;
        self.pending_op = Some(op);
        Ok(())
    }

    pub fn finish(mut self) -> VmResult<Value> {
        self.state
            .accept_end(Opcode::End.byte())?;
        self.close_operand()?;
        self.acc.ok_or(VmError::InvalidOperand {
            byte: Opcode::End.byte(),
            offset: 0,
        })
    }

    fn close_operand(&mut self) -> VmResult<()> {
        let operand = self.operand;
        let acc = match (self.acc.take(), self.pending_op.take()) {
            (Some(left), Some(op)) => apply_binary(op, &left, &operand)?,
            _ => operand,
        };
        self.max_size = self.max_size.max(acc.size);
        self.acc = Some(acc);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(steps: &[Step]) -> VmResult<Value> {
        let mut folder = CompoundFolder::new();
        for step in steps {
            match *step {
                Step::V(x) => folder.push_value(Value::scalar(x))?,
                Step::Op(op) => folder.push_operator(op)?,
                Step::U(op) => folder.push_unary(op)?,
            }
        }
        folder.finish()
    }

    enum Step {
        V(f32),
        Op(BinaryOp),
        U(UnaryOp),
    }
    use Step::*;

    #[test]
    fn folds_left_to_right_without_precedence() {
        let v = fold(&[V(1.0), Op(BinaryOp::Add), V(2.0), Op(BinaryOp::Mul), V(3.0)]).unwrap();
        assert_eq!(v.lanes[0], 9.0);
    }

    #[test]
    fn consecutive_values_grow_a_vector() {
        let v = fold(&[V(1.0), V(2.0), V(3.0), Op(BinaryOp::Add), V(10.0), V(20.0), V(30.0)])
            .unwrap();
        assert_eq!(v.as_slice(), &[11.0, 22.0, 33.0]);
    }

    #[test]
    fn growth_past_four_lanes_overflows() {
        let err = fold(&[V(1.0), V(2.0), V(3.0), V(4.0), V(5.0)]).unwrap_err();
        assert!(matches!(err, VmError::VectorOverflow { .. }));
    }

    #[test]
    fn full_vector_moves_to_expect_operator() {
        let mut folder = CompoundFolder::new();
        folder.push_value(Value::vector(&[1.0, 2.0, 3.0, 4.0])).unwrap();
        assert_eq!(folder.state(), CompoundState::ExpectOperator);
        folder.push_operator(BinaryOp::Mul).unwrap();
        assert_eq!(folder.state(), CompoundState::ExpectValue);
    }

    #[test]
    fn unary_applies_to_the_next_value_only() {
        let v = fold(&[U(UnaryOp::Neg), V(1.0), V(2.0)]).unwrap();
        assert_eq!(v.as_slice(), &[-1.0, 2.0]);
    }

    #[test]
    fn repeated_unary_cancels() {
        let v = fold(&[U(UnaryOp::Neg), U(UnaryOp::Neg), V(5.0)]).unwrap();
        assert_eq!(v.lanes[0], 5.0);
        let v = fold(&[U(UnaryOp::Not), U(UnaryOp::Not), V(5.0)]).unwrap();
        assert_eq!(v.lanes[0], 5.0);
    }

    #[test]
    fn mixed_unary_is_rejected() {
        let err = fold(&[U(UnaryOp::Neg), U(UnaryOp::Not), V(5.0)]).unwrap_err();
        assert!(matches!(err, VmError::InvalidOperand { .. }));
    }

    #[test]
    fn dangling_operator_is_rejected() {
        assert!(fold(&[V(1.0), Op(BinaryOp::Add)]).is_err());
        assert!(fold(&[Op(BinaryOp::Add), V(1.0)]).is_err());
        assert!(fold(&[]).is_err());
    }

    #[test]
    fn max_size_tracks_the_widest_operand() {
        let mut folder = CompoundFolder::new();
        folder.push_value(Value::vector(&[1.0, 2.0, 3.0])).unwrap();
        folder.push_operator(BinaryOp::Mul).unwrap();
        folder.push_value(Value::scalar(2.0)).unwrap();
        assert_eq!(folder.max_size(), 3);
    }
}
