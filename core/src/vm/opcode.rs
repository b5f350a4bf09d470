//! Vexpr bytecode encoding.
//!
//! Every byte of a code stream falls in one of four ranges:
//!
//! ```text
//! 0x00 - 0x3F   root/control opcodes and compound tokens (operators, functions)
//! 0x40 - 0x7F   shared constant table index (64 entries)
//! 0x80 - 0xFE   data slot (slot = byte - 0x80, byte offset = slot * 4)
//! 0xFF          extended opcode prefix, followed by an `ExtendedOpcode` byte
//! ```
//!
//! # Root instructions
//!
//! ```text
//! Assign        <slot> <compound...> End
//! AssignSwizzle <slot> <count> <pattern> <compound...> End
//! Push          <compound...> End
//! Condition     <compound...> End
//! Jump | JumpBack | JumpIfZero | JumpIfNotZero  <offset>
//! Yield         <frames>
//! Return | Nop
//! ```
//!
//! Jump offsets are relative to the byte following the offset byte.
//!
//! # Compound tokens
//!
//! A compound is a flat, left-to-right stream of value and operator tokens.
//! Value tokens are slots, constants, `StackPop <meta>`, `Swizzle <count>
//! <pattern> <value>` and function calls. A function token is followed by its
//! arguments, each a single value token.

use core::fmt;

use crate::parser::syntax::{BinaryOp, UnaryOp};

pub const CONSTANT_BASE: u8 = 0x40;
pub const CONSTANT_COUNT: usize = 64;
pub const SLOT_BASE: u8 = 0x80;
/// Number of addressable data slots (`0x80..=0xFE`).
pub const MAX_DATA_SLOTS: usize = 127;
pub const EXTENDED_PREFIX: u8 = 0xFF;

/// Opcodes of the primary table (`0x00..=0x3F`).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ========================================================================
    // Root / control (0x00 - 0x0F)
    // ========================================================================
    /// Ends execution. Uninitialized (zeroed) code halts.
    Return = 0x00,
    Nop = 0x01,
    Assign = 0x02,
    AssignSwizzle = 0x03,
    Push = 0x04,
    Condition = 0x05,
    Jump = 0x06,
    JumpBack = 0x07,
    JumpIfZero = 0x08,
    JumpIfNotZero = 0x09,
    Yield = 0x0A,
    /// Terminates a compound.
    End = 0x0F,

    // ========================================================================
    // Operators (0x10 - 0x1F)
    // ========================================================================
    Add = 0x10,
    Sub = 0x11,
    Mul = 0x12,
    Div = 0x13,
    Mod = 0x14,
    Pow = 0x15,
    Lt = 0x16,
    Le = 0x17,
    Gt = 0x18,
    Ge = 0x19,
    Eq = 0x1A,
    Ne = 0x1B,
    And = 0x1C,
    Or = 0x1D,
    Neg = 0x1E,
    Not = 0x1F,

    // ========================================================================
    // Value access (0x20 - 0x21)
    // ========================================================================
    /// Followed by the expected metadata byte of the popped value.
    StackPop = 0x20,
    /// Followed by component count, packed pattern and the base value token.
    Swizzle = 0x21,

    // ========================================================================
    // Builtin functions (0x22 - 0x37)
    // ========================================================================
    Abs = 0x22,
    Normalize = 0x23,
    Saturate = 0x24,
    Floor = 0x25,
    Ceil = 0x26,
    Frac = 0x27,
    Sqrt = 0x28,
    Sin = 0x29,
    Cos = 0x2A,
    Tan = 0x2B,
    Log = 0x2C,
    Log2 = 0x2D,
    Exp = 0x2E,
    Exp2 = 0x2F,
    Length = 0x30,
    Dot = 0x31,
    Cross = 0x32,
    /// Followed by a control byte: number of arguments (0, 1 or 2).
    Random = 0x33,
    Fma = 0x34,
    Lerp = 0x35,
    Select = 0x36,
    Clamp = 0x37,

    // ========================================================================
    // Variable-argument reductions (0x38 - 0x3D)
    //
    // Followed by a control byte: operand count << 2 | result size (0 = 4).
    // ========================================================================
    AddAll = 0x38,
    MulAll = 0x39,
    MinAll = 0x3A,
    MaxAll = 0x3B,
    Any = 0x3C,
    All = 0x3D,
}

static_assertions::assert_eq_size!(Opcode, u8);

impl Opcode {
    /// Decodes a byte of the primary table. Returns `None` for unassigned
    /// values and for bytes outside `0x00..=0x3F`.
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match byte {
            0x00 => Return,
            0x01 => Nop,
            0x02 => Assign,
            0x03 => AssignSwizzle,
            0x04 => Push,
            0x05 => Condition,
            0x06 => Jump,
            0x07 => JumpBack,
            0x08 => JumpIfZero,
            0x09 => JumpIfNotZero,
            0x0A => Yield,
            0x0F => End,
            0x10 => Add,
            0x11 => Sub,
            0x12 => Mul,
            0x13 => Div,
            0x14 => Mod,
            0x15 => Pow,
            0x16 => Lt,
            0x17 => Le,
            0x18 => Gt,
            0x19 => Ge,
            0x1A => Eq,
            0x1B => Ne,
            0x1C => And,
            0x1D => Or,
            0x1E => Neg,
            0x1F => Not,
            0x20 => StackPop,
            0x21 => Swizzle,
            0x22 => Abs,
            0x23 => Normalize,
            0x24 => Saturate,
            0x25 => Floor,
            0x26 => Ceil,
            0x27 => Frac,
            0x28 => Sqrt,
            0x29 => Sin,
            0x2A => Cos,
            0x2B => Tan,
            0x2C => Log,
            0x2D => Log2,
            0x2E => Exp,
            0x2F => Exp2,
            0x30 => Length,
            0x31 => Dot,
            0x32 => Cross,
            0x33 => Random,
            0x34 => Fma,
            0x35 => Lerp,
            0x36 => Select,
            0x37 => Clamp,
            0x38 => AddAll,
            0x39 => MulAll,
            0x3A => MinAll,
            0x3B => MaxAll,
            0x3C => Any,
            0x3D => All,
            _ => return None,
        })
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn from_binary(op: BinaryOp) -> Opcode {
        match op {
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Mod => Opcode::Mod,
            BinaryOp::Pow => Opcode::Pow,
            BinaryOp::Lt => Opcode::Lt,
            BinaryOp::Le => Opcode::Le,
            BinaryOp::Gt => Opcode::Gt,
            BinaryOp::Ge => Opcode::Ge,
            BinaryOp::Eq => Opcode::Eq,
            BinaryOp::Ne => Opcode::Ne,
            BinaryOp::And => Opcode::And,
            BinaryOp::Or => Opcode::Or,
        }
    }

    pub fn from_unary(op: UnaryOp) -> Opcode {
        match op {
            UnaryOp::Neg => Opcode::Neg,
            UnaryOp::Not => Opcode::Not,
        }
    }

    pub fn as_binary(self) -> Option<BinaryOp> {
        Some(match self {
            Opcode::Add => BinaryOp::Add,
            Opcode::Sub => BinaryOp::Sub,
            Opcode::Mul => BinaryOp::Mul,
            Opcode::Div => BinaryOp::Div,
            Opcode::Mod => BinaryOp::Mod,
            Opcode::Pow => BinaryOp::Pow,
            Opcode::Lt => BinaryOp::Lt,
            Opcode::Le => BinaryOp::Le,
            Opcode::Gt => BinaryOp::Gt,
            Opcode::Ge => BinaryOp::Ge,
            Opcode::Eq => BinaryOp::Eq,
            Opcode::Ne => BinaryOp::Ne,
            Opcode::And => BinaryOp::And,
            Opcode::Or => BinaryOp::Or,
            _ => return None,
        })
    }

    pub fn as_unary(self) -> Option<UnaryOp> {
        match self {
            Opcode::Neg => Some(UnaryOp::Neg),
            Opcode::Not => Some(UnaryOp::Not),
            _ => None,
        }
    }

    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::Jump | Opcode::JumpBack | Opcode::JumpIfZero | Opcode::JumpIfNotZero
        )
    }

    pub fn is_reduction(self) -> bool {
        matches!(
            self,
            Opcode::AddAll
                | Opcode::MulAll
                | Opcode::MinAll
                | Opcode::MaxAll
                | Opcode::Any
                | Opcode::All
        )
    }

    /// Number of fixed arguments taken by a builtin function token, or
    /// `None` when the token is not a fixed-arity function.
    pub fn fixed_arity(self) -> Option<usize> {
        use Opcode::*;
        match self {
            Abs | Normalize | Saturate | Floor | Ceil | Frac | Sqrt | Sin | Cos | Tan | Log
            | Log2 | Exp | Exp2 | Length => Some(1),
            Dot | Cross => Some(2),
            Fma | Lerp | Select | Clamp => Some(3),
            _ => None,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Return => "Return",
            Nop => "Nop",
            Assign => "Assign",
            AssignSwizzle => "AssignSwizzle",
            Push => "Push",
            Condition => "Condition",
            Jump => "Jump",
            JumpBack => "JumpBack",
            JumpIfZero => "JumpIfZero",
            JumpIfNotZero => "JumpIfNotZero",
            Yield => "Yield",
            End => "End",
            Add => "Add",
            Sub => "Sub",
            Mul => "Mul",
            Div => "Div",
            Mod => "Mod",
            Pow => "Pow",
            Lt => "Lt",
            Le => "Le",
            Gt => "Gt",
            Ge => "Ge",
            Eq => "Eq",
            Ne => "Ne",
            And => "And",
            Or => "Or",
            Neg => "Neg",
            Not => "Not",
            StackPop => "Pop",
            Swizzle => "Swizzle",
            Abs => "abs",
            Normalize => "normalize",
            Saturate => "saturate",
            Floor => "floor",
            Ceil => "ceil",
            Frac => "frac",
            Sqrt => "sqrt",
            Sin => "sin",
            Cos => "cos",
            Tan => "tan",
            Log => "log",
            Log2 => "log2",
            Exp => "exp",
            Exp2 => "exp2",
            Length => "length",
            Dot => "dot",
            Cross => "cross",
            Random => "random",
            Fma => "fma",
            Lerp => "lerp",
            Select => "select",
            Clamp => "clamp",
            AddAll => "sum",
            MulAll => "product",
            MinAll => "min",
            MaxAll => "max",
            Any => "any",
            All => "all",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Opcodes of the extended table, reached through the `0xFF` prefix.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtendedOpcode {
    Round = 0x00,
    Sign = 0x01,
    Rsqrt = 0x02,
    Asin = 0x03,
    Acos = 0x04,
    Atan = 0x05,
    Sinh = 0x06,
    Cosh = 0x07,
    Tanh = 0x08,
    Log10 = 0x09,
    Atan2 = 0x0A,
    Step = 0x0B,
    Smoothstep = 0x0C,
    Distance = 0x0D,
    /// Followed by a 4-byte big-endian function id.
    ExternalCall = 0x40,
    /// Identity that logs its operand.
    DebugDump = 0x41,
}

static_assertions::assert_eq_size!(ExtendedOpcode, u8);

impl ExtendedOpcode {
    pub fn from_byte(byte: u8) -> Option<ExtendedOpcode> {
        use ExtendedOpcode::*;
        Some(match byte {
            0x00 => Round,
            0x01 => Sign,
            0x02 => Rsqrt,
            0x03 => Asin,
            0x04 => Acos,
            0x05 => Atan,
            0x06 => Sinh,
            0x07 => Cosh,
            0x08 => Tanh,
            0x09 => Log10,
            0x0A => Atan2,
            0x0B => Step,
            0x0C => Smoothstep,
            0x0D => Distance,
            0x40 => ExternalCall,
            0x41 => DebugDump,
            _ => return None,
        })
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Number of arguments, `None` for external calls (decided by the callee).
    pub fn fixed_arity(self) -> Option<usize> {
        use ExtendedOpcode::*;
        match self {
            Round | Sign | Rsqrt | Asin | Acos | Atan | Sinh | Cosh | Tanh | Log10
            | DebugDump => Some(1),
            Atan2 | Step | Distance => Some(2),
            Smoothstep => Some(3),
            ExternalCall => None,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        use ExtendedOpcode::*;
        match self {
            Round => "round",
            Sign => "sign",
            Rsqrt => "rsqrt",
            Asin => "asin",
            Acos => "acos",
            Atan => "atan",
            Sinh => "sinh",
            Cosh => "cosh",
            Tanh => "tanh",
            Log10 => "log10",
            Atan2 => "atan2",
            Step => "step",
            Smoothstep => "smoothstep",
            Distance => "distance",
            ExternalCall => "call",
            DebugDump => "dump",
        }
    }
}

impl fmt::Display for ExtendedOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A decoded code byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Byte {
    Op(Opcode),
    /// Shared constant table index.
    Constant(u8),
    /// Data slot index.
    Slot(u8),
    /// `0xFF`: the next byte is an [`ExtendedOpcode`].
    Extended,
}

impl Byte {
    pub fn decode(byte: u8) -> Option<Byte> {
        match byte {
            0x00..=0x3F => Opcode::from_byte(byte).map(Byte::Op),
            0x40..=0x7F => Some(Byte::Constant(byte - CONSTANT_BASE)),
            0x80..=0xFE => Some(Byte::Slot(byte - SLOT_BASE)),
            EXTENDED_PREFIX => Some(Byte::Extended),
        }
    }
}

pub fn constant_byte(index: u8) -> u8 {
    debug_assert!((index as usize) < CONSTANT_COUNT);
    CONSTANT_BASE + index
}

pub fn slot_byte(slot: u8) -> u8 {
    debug_assert!((slot as usize) < MAX_DATA_SLOTS);
    SLOT_BASE + slot
}

/// Packs the control byte of a variable-argument reduction.
pub fn reduction_control(count: usize, size: u8) -> u8 {
    ((count as u8) << 2) | (size & 0b11)
}

/// Unpacks a reduction control byte into (operand count, result size).
pub fn split_reduction_control(byte: u8) -> (usize, u8) {
    let size = match byte & 0b11 {
        0 => 4,
        s => s,
    };
    ((byte >> 2) as usize, size)
}

/// Length in bytes of the single token starting at `pos`, arguments of a
/// function token excluded. `None` when the stream is truncated or the byte
/// does not start a token.
pub fn token_len(code: &[u8], pos: usize) -> Option<usize> {
    let byte = *code.get(pos)?;
    let len = match Byte::decode(byte)? {
        Byte::Constant(_) | Byte::Slot(_) => 1,
        Byte::Extended => match ExtendedOpcode::from_byte(*code.get(pos + 1)?)? {
            ExtendedOpcode::ExternalCall => 6,
            _ => 2,
        },
        Byte::Op(op) => match op {
            Opcode::StackPop | Opcode::Random => 2,
            Opcode::Swizzle => 3 + token_len(code, pos + 3)?,
            op if op.is_reduction() => 2,
            _ => 1,
        },
    };
    if pos + len > code.len() {
        return None;
    }
    Some(len)
}
