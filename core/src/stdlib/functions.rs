//! Catalog of builtin functions.
//!
//! The catalog is the one place that knows, per function name: its encoding,
//! how many arguments it takes, how its result size derives from its operand
//! sizes and whether the compiler may fold it.

use hashbrown::HashMap;
use lazy_static::lazy_static;

use crate::vm::opcode::{ExtendedOpcode, Opcode};

/// Encoding of a builtin in the code stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinCode {
    Base(Opcode),
    Extended(ExtendedOpcode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    /// Inclusive range.
    Range(usize, usize),
    /// One or more operands, up to the 6-bit count of a reduction control byte.
    Variadic,
}

pub const MAX_VARIADIC_OPERANDS: usize = 63;

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == k,
            Arity::Range(lo, hi) => (lo..=hi).contains(&n),
            Arity::Variadic => (1..=MAX_VARIADIC_OPERANDS).contains(&n),
        }
    }
}

impl core::fmt::Display for Arity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Arity::Exact(k) => write!(f, "{}", k),
            Arity::Range(lo, hi) => write!(f, "{} to {}", lo, hi),
            Arity::Variadic => write!(f, "1 to {}", MAX_VARIADIC_OPERANDS),
        }
    }
}

/// How a function's result size follows from its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeRule {
    /// Largest operand size (component-wise functions, scalars broadcast).
    SameAsInput,
    /// Always this size; operands must have it too.
    Fixed(u8),
    /// Aggregate reduction: always size 1.
    Reduction,
    /// `sum`/`product`/`min`/`max`: component-wise across several operands,
    /// horizontal (size 1) over a single operand.
    Fold,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuiltinFunction {
    pub name: &'static str,
    pub code: BuiltinCode,
    pub arity: Arity,
    pub size_rule: SizeRule,
    /// Operands must all share one vector size (no broadcasting).
    pub strict_operands: bool,
    /// Result depends only on the operands, so constant calls may be folded.
    pub pure: bool,
    /// Only kept when debug functions are included in the build.
    pub debug_only: bool,
}

impl BuiltinFunction {
    const fn new(name: &'static str, code: BuiltinCode, arity: Arity, size_rule: SizeRule) -> Self {
        Self {
            name,
            code,
            arity,
            size_rule,
            strict_operands: false,
            pure: true,
            debug_only: false,
        }
    }

    const fn strict(mut self) -> Self {
        self.strict_operands = true;
        self
    }

    const fn impure(mut self) -> Self {
        self.pure = false;
        self
    }

    const fn debug(mut self) -> Self {
        self.debug_only = true;
        self.pure = false;
        self
    }

    /// Result size for the given operand sizes.
    pub fn result_size(&self, operand_sizes: &[u8]) -> u8 {
        let widest = operand_sizes.iter().copied().max().unwrap_or(1);
        match self.size_rule {
            SizeRule::SameAsInput => widest,
            SizeRule::Fixed(n) => n,
            SizeRule::Reduction => 1,
            SizeRule::Fold if operand_sizes.len() == 1 => 1,
            SizeRule::Fold => widest,
        }
    }
}

use Arity::*;
use BuiltinCode::{Base, Extended};
use SizeRule::*;

const fn unary(name: &'static str, code: BuiltinCode) -> BuiltinFunction {
    BuiltinFunction::new(name, code, Exact(1), SameAsInput)
}

static CATALOG: &[BuiltinFunction] = &[
    unary("abs", Base(Opcode::Abs)),
    unary("normalize", Base(Opcode::Normalize)),
    unary("saturate", Base(Opcode::Saturate)),
    unary("floor", Base(Opcode::Floor)),
    unary("ceil", Base(Opcode::Ceil)),
    unary("frac", Base(Opcode::Frac)),
    unary("sqrt", Base(Opcode::Sqrt)),
    unary("sin", Base(Opcode::Sin)),
    unary("cos", Base(Opcode::Cos)),
    unary("tan", Base(Opcode::Tan)),
    unary("log", Base(Opcode::Log)),
    unary("log2", Base(Opcode::Log2)),
    unary("exp", Base(Opcode::Exp)),
    unary("exp2", Base(Opcode::Exp2)),
    unary("round", Extended(ExtendedOpcode::Round)),
    unary("sign", Extended(ExtendedOpcode::Sign)),
    unary("rsqrt", Extended(ExtendedOpcode::Rsqrt)),
    unary("asin", Extended(ExtendedOpcode::Asin)),
    unary("acos", Extended(ExtendedOpcode::Acos)),
    unary("atan", Extended(ExtendedOpcode::Atan)),
    unary("sinh", Extended(ExtendedOpcode::Sinh)),
    unary("cosh", Extended(ExtendedOpcode::Cosh)),
    unary("tanh", Extended(ExtendedOpcode::Tanh)),
    unary("log10", Extended(ExtendedOpcode::Log10)),
    BuiltinFunction::new("length", Base(Opcode::Length), Exact(1), Reduction),
    BuiltinFunction::new("dot", Base(Opcode::Dot), Exact(2), Reduction).strict(),
    BuiltinFunction::new("distance", Extended(ExtendedOpcode::Distance), Exact(2), Reduction)
        .strict(),
    BuiltinFunction::new("cross", Base(Opcode::Cross), Exact(2), Fixed(3)).strict(),
    BuiltinFunction::new("atan2", Extended(ExtendedOpcode::Atan2), Exact(2), SameAsInput),
    BuiltinFunction::new("step", Extended(ExtendedOpcode::Step), Exact(2), SameAsInput),
    BuiltinFunction::new("random", Base(Opcode::Random), Range(0, 2), SameAsInput).impure(),
    BuiltinFunction::new("fma", Base(Opcode::Fma), Exact(3), SameAsInput).strict(),
    BuiltinFunction::new("lerp", Base(Opcode::Lerp), Exact(3), SameAsInput).strict(),
    BuiltinFunction::new("select", Base(Opcode::Select), Exact(3), SameAsInput).strict(),
    BuiltinFunction::new("clamp", Base(Opcode::Clamp), Exact(3), SameAsInput).strict(),
    BuiltinFunction::new(
        "smoothstep",
        Extended(ExtendedOpcode::Smoothstep),
        Exact(3),
        SameAsInput,
    )
    .strict(),
    BuiltinFunction::new("sum", Base(Opcode::AddAll), Variadic, Fold),
    BuiltinFunction::new("product", Base(Opcode::MulAll), Variadic, Fold),
    BuiltinFunction::new("min", Base(Opcode::MinAll), Variadic, Fold),
    BuiltinFunction::new("max", Base(Opcode::MaxAll), Variadic, Fold),
    BuiltinFunction::new("any", Base(Opcode::Any), Variadic, Reduction),
    BuiltinFunction::new("all", Base(Opcode::All), Variadic, Reduction),
    BuiltinFunction::new("dump", Extended(ExtendedOpcode::DebugDump), Exact(1), SameAsInput)
        .debug(),
];

lazy_static! {
    static ref BY_NAME: HashMap<&'static str, &'static BuiltinFunction> =
        CATALOG.iter().map(|f| (f.name, f)).collect();
    static ref BY_CODE: HashMap<BuiltinCode, &'static BuiltinFunction> =
        CATALOG.iter().map(|f| (f.code, f)).collect();
}

pub fn lookup(name: &str) -> Option<&'static BuiltinFunction> {
    BY_NAME.get(name).copied()
}

pub fn by_code(code: BuiltinCode) -> Option<&'static BuiltinFunction> {
    BY_CODE.get(&code).copied()
}

pub fn all() -> &'static [BuiltinFunction] {
    CATALOG
}
