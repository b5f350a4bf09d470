//! State shared by every execution against one engine: the external function
//! table, the constant table and the random generator.

use core::any::Any;
use core::fmt;
use std::sync::Arc;

use ecow::EcoString;
use hashbrown::HashMap;

use crate::stdlib::constants::ConstantTable;
use crate::stdlib::random::Rng;
use crate::vm::value::{Value, ValueType};

/// Opaque host references handed to external functions.
///
/// The interpreters never look inside; they only pass the handles through.
#[derive(Default)]
pub struct CallHandles<'a> {
    pub environment: Option<&'a mut (dyn Any + 'static)>,
    pub caller: Option<&'a (dyn Any + 'static)>,
}

impl<'a> CallHandles<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(
        environment: Option<&'a mut (dyn Any + 'static)>,
        caller: Option<&'a (dyn Any + 'static)>,
    ) -> Self {
        Self {
            environment,
            caller,
        }
    }

    pub fn environment<T: 'static>(&mut self) -> Option<&mut T> {
        self.environment.as_mut()?.downcast_mut::<T>()
    }

    pub fn caller<T: 'static>(&self) -> Option<&T> {
        self.caller?.downcast_ref::<T>()
    }
}

impl fmt::Debug for CallHandles<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandles")
            .field("environment", &self.environment.is_some())
            .field("caller", &self.caller.is_some())
            .finish()
    }
}

/// Declared shape of an external function parameter or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub ty: ValueType,
    pub size: u8,
}

impl ParamSpec {
    pub fn numeric(size: u8) -> Self {
        Self {
            ty: ValueType::Numeric,
            size,
        }
    }

    pub fn id() -> Self {
        Self {
            ty: ValueType::Id,
            size: 1,
        }
    }
}

pub type NativeFn = Arc<dyn Fn(&[Value], &mut CallHandles<'_>) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct ExternalFunction {
    pub id: u32,
    pub name: EcoString,
    pub params: Vec<ParamSpec>,
    pub result: ParamSpec,
    pub function: NativeFn,
}

impl ExternalFunction {
    pub fn new(
        id: u32,
        name: &str,
        params: Vec<ParamSpec>,
        result: ParamSpec,
        function: impl Fn(&[Value], &mut CallHandles<'_>) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            params,
            result,
            function: Arc::new(function),
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Debug for ExternalFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalFunction")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("params", &self.params)
            .field("result", &self.result)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("function '{0}' is already registered")]
    DuplicateName(EcoString),
    #[error("function id {0} is already registered")]
    DuplicateId(u32),
    #[error("'{0}' shadows a builtin function")]
    ShadowsBuiltin(EcoString),
    #[error(transparent)]
    Constant(#[from] crate::stdlib::constants::ConstantTableError),
}

/// External functions, addressable by name (compiler) and id (interpreters).
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    by_id: HashMap<u32, ExternalFunction>,
    by_name: HashMap<EcoString, u32>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, function: ExternalFunction) -> Result<(), RegistryError> {
        if crate::stdlib::functions::lookup(&function.name).is_some() {
            return Err(RegistryError::ShadowsBuiltin(function.name));
        }
        if self.by_name.contains_key(&function.name) {
            return Err(RegistryError::DuplicateName(function.name));
        }
        if self.by_id.contains_key(&function.id) {
            return Err(RegistryError::DuplicateId(function.id));
        }
        self.by_name.insert(function.name.clone(), function.id);
        self.by_id.insert(function.id, function);
        Ok(())
    }

    pub fn get(&self, id: u32) -> Option<&ExternalFunction> {
        self.by_id.get(&id)
    }

    pub fn lookup(&self, name: &str) -> Option<&ExternalFunction> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Everything an interpreter borrows from the engine.
///
/// Not `Sync`: the generator mutates through a `Cell`.
#[derive(Debug, Clone, Default)]
pub struct EngineContext {
    pub functions: FunctionTable,
    pub constants: ConstantTable,
    pub rng: Rng,
}

impl EngineContext {
    pub fn new(functions: FunctionTable, constants: ConstantTable, seed: u64) -> Self {
        Self {
            functions,
            constants,
            rng: Rng::new(seed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double() -> ExternalFunction {
        ExternalFunction::new(
            1,
            "double",
            vec![ParamSpec::numeric(1)],
            ParamSpec::numeric(1),
            |args, _| Value::scalar(args[0].lanes[0] * 2.0),
        )
    }

    #[test]
    fn lookup_by_name_and_id() {
        let mut table = FunctionTable::new();
        table.register(double()).unwrap();
        assert_eq!(table.lookup("double").map(|f| f.id), Some(1));
        let f = table.get(1).unwrap();
        let out = (f.function)(&[Value::scalar(4.0)], &mut CallHandles::none());
        assert_eq!(out.lanes[0], 8.0);
    }

    #[test]
    fn duplicates_and_builtins_are_rejected() {
        let mut table = FunctionTable::new();
        table.register(double()).unwrap();
        assert!(matches!(
            table.register(double()),
            Err(RegistryError::DuplicateName(_))
        ));
        let mut shadow = double();
        shadow.name = "sqrt".into();
        shadow.id = 2;
        assert!(matches!(
            table.register(shadow),
            Err(RegistryError::ShadowsBuiltin(_))
        ));
    }

    #[test]
    fn handles_downcast() {
        let mut counter = 5u32;
        let mut handles = CallHandles::new(Some(&mut counter), None);
        *handles.environment::<u32>().unwrap() += 1;
        assert_eq!(counter, 6);
    }
}
