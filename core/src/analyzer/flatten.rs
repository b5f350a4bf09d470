//! Flattening: constant folding, collapse of redundant nesting and
//! linearization of evaluation order.
//!
//! A compound in the code stream cannot contain another compound. After this
//! stage every statement value is a compound whose members are operators,
//! unary markers and simple operands: variables, constants, stack pops and
//! function calls over simple operands. Anything else is evaluated ahead of
//! the statement by a `Push` recorded in its `depends_on`, and read back
//! through a `StackPop` placeholder.
//!
//! Pops happen in token order, so pushes are recorded in reverse: the first
//! operand consumed is the last one pushed.

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::analyzer::fold::constant_value;
use crate::compiler::error::CompileErrorKind;
use crate::compiler::pipeline::CompilationState;
use crate::parser::ast::{Ast, Callee, ConstantRef, NodeId, NodeKind};
use crate::parser::syntax::Swizzle;
use crate::parser::variables::VariableTable;
use crate::vm::context::EngineContext;
use crate::vm::value::{Value, ValueType};

type FlattenResult<T> = Result<T, CompileErrorKind>;

pub fn flatten(state: &mut CompilationState<'_>) -> FlattenResult<()> {
    let options = state.options;
    let mut flattener = Flattener {
        ast: &mut state.ast,
        variables: &mut state.variables,
        context: state.context,
        strip_debug: !options.include_debug_functions,
        use_builtin_constants: options.use_builtin_constants,
        epsilon: options.constant_epsilon,
        hoisted: 0,
    };
    let root = flattener.ast.root();
    let statements: Vec<NodeId> = flattener.ast.children(root).to_vec();
    for statement in statements {
        if matches!(
            flattener.ast.kind(statement),
            NodeKind::Assignment { .. } | NodeKind::Condition
        ) {
            flattener.statement(statement)?;
        }
    }
    trace!(pushes = flattener.hoisted, "Flattened statements");
    Ok(())
}

struct Flattener<'a> {
    ast: &'a mut Ast,
    variables: &'a mut VariableTable,
    context: &'a EngineContext,
    strip_debug: bool,
    use_builtin_constants: bool,
    epsilon: f32,
    hoisted: usize,
}

impl Flattener<'_> {
    fn statement(&mut self, statement: NodeId) -> FlattenResult<()> {
        let Some(value) = self.ast.child(statement, 0) else {
            return Ok(());
        };
        let value = self.strip(value)?;
        let value = self.normalize(value)?;
        let value = self.ensure_compound(value);
        self.ast.set_children(statement, [value]);

        for push in self.linearize(value) {
            self.ast.push_dependency(statement, push);
        }
        Ok(())
    }

    /// Replaces debug-only calls by their argument.
    fn strip(&mut self, id: NodeId) -> FlattenResult<NodeId> {
        let children: SmallVec<[NodeId; 4]> = self.ast.children(id).into();
        let mut stripped = SmallVec::<[NodeId; 4]>::new();
        for child in children {
            stripped.push(self.strip(child)?);
        }
        if let NodeKind::Function(Callee::Builtin(function)) = self.ast.kind(id)
            && function.debug_only
            && self.strip_debug
            && let [arg] = stripped[..]
        {
            debug!(function = function.name, "Removed debug call");
            let outer = self.ast.node(id).indexer;
            self.compose_indexer(arg, outer)?;
            return Ok(arg);
        }
        self.ast.set_children(id, stripped);
        Ok(id)
    }

    /// Folds constants top-down, then collapses nesting bottom-up. Returns
    /// the node that takes the place of `id`.
    fn normalize(&mut self, id: NodeId) -> FlattenResult<NodeId> {
        if let Some(value) = constant_value(
            self.ast,
            id,
            &self.context.constants,
            self.variables,
        ) {
            self.make_constant(id, value);
            return Ok(id);
        }
        match self.ast.kind(id) {
            NodeKind::Compound => self.compound(id),
            NodeKind::Function(_) => {
                let args: SmallVec<[NodeId; 4]> = self.ast.children(id).into();
                let mut normalized = SmallVec::<[NodeId; 4]>::new();
                for arg in args {
                    normalized.push(self.normalize(arg)?);
                }
                self.ast.set_children(id, normalized);
                Ok(id)
            }
            _ => Ok(id),
        }
    }

    fn compound(&mut self, id: NodeId) -> FlattenResult<NodeId> {
        let members = self.ast.take_children(id);
        let mut out: Vec<NodeId> = Vec::with_capacity(members.len());
        for member in members {
            if self.ast.kind(member).is_value() {
                out.push(self.normalize(member)?);
            } else {
                out.push(member);
            }
        }

        let mut i = 0;
        while i < out.len() {
            if self.splices(&out, i) {
                let inner = self.ast.take_children(out[i]);
                out.splice(i..=i, inner);
                continue;
            }
            i += 1;
        }

        if let [single] = out[..]
            && self.ast.kind(single).is_value()
        {
            let outer = self.ast.node(id).indexer;
            self.compose_indexer(single, outer)?;
            return Ok(single);
        }
        self.ast.set_children(id, out);
        Ok(id)
    }

    /// Whether the nested compound at `out[i]` can be inlined into its parent
    /// without changing the fold.
    fn splices(&self, out: &[NodeId], i: usize) -> bool {
        let node = self.ast.node(out[i]);
        if node.kind != NodeKind::Compound || node.indexer.is_some() {
            return false;
        }
        let inner = &node.children;
        let after_unary = i > 0 && matches!(self.ast.kind(out[i - 1]), NodeKind::Unary(_));
        let values_only = inner.iter().all(|&c| self.ast.kind(c).is_value());
        let unary_value = inner.split_last().is_some_and(|(last, init)| {
            self.ast.kind(*last).is_value()
                && init.iter().all(|&c| matches!(self.ast.kind(c), NodeKind::Unary(_)))
        });
        let leading = i == 0
            && out
                .get(1)
                .is_none_or(|&next| matches!(self.ast.kind(next), NodeKind::Operator(_)));
        ((values_only || unary_value) && !after_unary) || leading
    }

    fn make_constant(&mut self, id: NodeId, value: Value) {
        let shared = (self.use_builtin_constants && value.size == 1 && value.ty == ValueType::Numeric)
            .then(|| self.context.constants.find_value(value.lanes[0], self.epsilon))
            .flatten();
        let reference = match shared {
            Some(index) => ConstantRef::Shared(index),
            None => {
                let span = self.ast.node(id).span.clone();
                ConstantRef::Slot(self.variables.add_constant(value, span))
            }
        };
        trace!(node = %id, %value, ?reference, "Folded constant");
        let node = self.ast.node_mut(id);
        node.kind = NodeKind::Constant(reference);
        node.constant = Some(value);
        node.vector_size = Some(value.size);
        node.value_type = value.ty;
        node.indexer = None;
        node.children.clear();
    }

    /// Applies `outer` on top of the node's own indexer.
    fn compose_indexer(&mut self, id: NodeId, outer: Option<Swizzle>) -> FlattenResult<()> {
        let Some(outer) = outer else {
            return Ok(());
        };
        let node = self.ast.node_mut(id);
        node.indexer = match node.indexer {
            None => Some(outer),
            Some(inner) => Some(inner.then(outer).ok_or_else(|| {
                CompileErrorKind::Internal(format!("swizzle {} does not apply to {}", outer, inner).into())
            })?),
        };
        Ok(())
    }

    /// Statement values must be plain compounds.
    fn ensure_compound(&mut self, id: NodeId) -> NodeId {
        let node = self.ast.node(id);
        if node.kind == NodeKind::Compound && node.indexer.is_none() {
            return id;
        }
        let (span, size, ty) = (node.span.clone(), node.value_size(), node.value_type);
        let wrapper = self.ast.add(NodeKind::Compound, span);
        self.ast.set_children(wrapper, [id]);
        let wrapper_node = self.ast.node_mut(wrapper);
        wrapper_node.vector_size = size;
        wrapper_node.value_type = ty;
        wrapper
    }

    /// Hoists the non-simple operands of a compound. Returns the pushes in
    /// execution order.
    fn linearize(&mut self, compound: NodeId) -> Vec<NodeId> {
        let mut groups: Vec<Vec<NodeId>> = Vec::new();
        let members: SmallVec<[NodeId; 4]> = self.ast.children(compound).into();
        for member in members {
            if self.ast.kind(member).is_value() {
                self.operand(member, &mut groups);
            }
        }
        groups.into_iter().rev().flatten().collect()
    }

    /// Visits an operand in consumption order, hoisting it when it is a
    /// nested compound.
    fn operand(&mut self, id: NodeId, groups: &mut Vec<Vec<NodeId>>) {
        match self.ast.kind(id) {
            NodeKind::Compound => groups.push(self.hoist(id)),
            NodeKind::Function(_) => {
                let args: SmallVec<[NodeId; 4]> = self.ast.children(id).into();
                for arg in args {
                    self.operand(arg, groups);
                }
            }
            _ => {}
        }
    }

    /// Moves a compound into a `Push` and leaves a `StackPop` in its place.
    /// Returns the pushes the compound itself needs, followed by its own.
    fn hoist(&mut self, compound: NodeId) -> Vec<NodeId> {
        let mut pushes = self.linearize(compound);
        let node = self.ast.node_mut(compound);
        let indexer = node.indexer.take();
        let (span, size, ty) = (node.span.clone(), node.vector_size, node.value_type);

        let pop = self.ast.add(NodeKind::StackPop, span.clone());
        self.ast.replace(compound, pop);
        let pop_node = self.ast.node_mut(pop);
        pop_node.indexer = indexer;
        pop_node.vector_size = size;
        pop_node.value_type = ty;

        let push = self.ast.add(NodeKind::Push, span);
        self.ast.set_children(push, [compound]);
        let push_node = self.ast.node_mut(push);
        push_node.vector_size = size;
        push_node.value_type = ty;

        self.hoisted += 1;
        pushes.push(push);
        pushes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{parameters, transform};
    use crate::api::options::CompileOptions;
    use crate::parser::parser::parse;

    fn flattened(source: &str, options: &CompileOptions) -> String {
        let context = EngineContext::default();
        let script = parse(source, &context).unwrap();
        let mut state = CompilationState::from_parsed(script, options, &context);
        transform::transform(&mut state).unwrap();
        parameters::analyze(&mut state).unwrap();
        flatten(&mut state).unwrap();
        assert!(state.ast.check_links());
        state.ast_dump()
    }

    fn statement_shapes(source: &str) -> Vec<(String, usize)> {
        let context = EngineContext::default();
        let options = CompileOptions::default();
        let script = parse(source, &context).unwrap();
        let mut state = CompilationState::from_parsed(script, &options, &context);
        transform::transform(&mut state).unwrap();
        parameters::analyze(&mut state).unwrap();
        flatten(&mut state).unwrap();
        let ast = &state.ast;
        ast.children(ast.root())
            .iter()
            .map(|&s| (ast.kind(s).name().to_string(), ast.node(s).depends_on.len()))
            .collect()
    }

    #[test]
    fn constant_expressions_fold_to_one_constant() {
        let dump = flattened("output o; o = 2 * 3 + 1;", &CompileOptions::default());
        assert!(dump.contains("7"), "{}", dump);
        assert!(!dump.contains("Operator"), "{}", dump);
    }

    #[test]
    fn precedence_nesting_is_hoisted_into_pushes() {
        // `a + b * c` nests `b * c`, which cannot stay inline.
        let shapes = statement_shapes("input a; input b; input c; output o; o = a + b * c;");
        assert_eq!(shapes, vec![("Assignment".to_string(), 1)]);
    }

    #[test]
    fn leading_nested_compound_is_spliced() {
        // `(a + b) * c` folds left to right without help.
        let shapes = statement_shapes("input a; input b; input c; output o; o = (a + b) * c;");
        assert_eq!(shapes, vec![("Assignment".to_string(), 0)]);
    }

    #[test]
    fn negated_operands_and_vector_literals_stay_inline() {
        let shapes = statement_shapes("input a; input b; output o[3]; o = (a, -b, 1) * a;");
        assert_eq!(shapes, vec![("Assignment".to_string(), 0)]);
    }

    #[test]
    fn function_arguments_that_are_expressions_are_pushed() {
        let shapes = statement_shapes("input a; input b; output o; o = max(a + b, a * b);");
        assert_eq!(shapes, vec![("Assignment".to_string(), 2)]);
    }

    #[test]
    fn debug_calls_are_removed_unless_requested() {
        let source = "input a; output o; o = dump(a) + 1;";
        let dump = flattened(source, &CompileOptions::default());
        assert!(!dump.contains("dump"), "{}", dump);

        let options = CompileOptions {
            include_debug_functions: true,
            ..CompileOptions::default()
        };
        assert!(flattened(source, &options).contains("dump"));
    }

    #[test]
    fn literals_resolve_to_shared_constants_when_allowed() {
        let dump = flattened("input a; output o; o = a * 1;", &CompileOptions::default());
        assert!(dump.contains("Constant"), "{}", dump);
        let options = CompileOptions {
            use_builtin_constants: false,
            ..CompileOptions::default()
        };
        let dump = flattened("input a; output o; o = a * 1;", &options);
        assert!(dump.contains("$1"), "{}", dump);
    }
}
