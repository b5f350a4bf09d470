//! vexpr standard library
//!
//! - [`functions`]: the builtin function catalogue (names, arity, size rules)
//! - [`math`]: evaluation of builtins over single values
//! - [`constants`]: the shared constant table behind bytes `0x40..=0x7F`
//! - [`random`]: the engine's random source
//!
//! Builtins are resolved by name at parse time and compiled to dedicated
//! opcodes; host functions go through [`crate::vm::FunctionTable`] instead.

pub mod constants;
pub mod functions;
pub mod math;
pub mod random;

pub use constants::{ConstantEntry, ConstantTable, ConstantTableError};
pub use functions::{Arity, BuiltinCode, BuiltinFunction, SizeRule};
pub use random::{DEFAULT_SEED, Rng};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_never_collide_with_constant_names() {
        let constants = ConstantTable::builtin();
        for function in functions::all() {
            assert_eq!(constants.lookup_name(function.name), None, "{}", function.name);
        }
    }
}
