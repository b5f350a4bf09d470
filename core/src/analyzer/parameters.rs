//! Parameter analysis: vector sizes, value types and the input/output
//! contract.
//!
//! Sizes flow bottom-up. Inside a compound, consecutive values form one
//! operand group whose size is the sum of its members; groups combine
//! through binary operators, which require equal sizes or a scalar side.
//! Every value node gets its pre-indexer size in `vector_size`.

use hashbrown::HashSet;
use tracing::{debug, trace};

use crate::compiler::error::CompileErrorKind;
use crate::compiler::pipeline::CompilationState;
use crate::parser::ast::{Ast, Callee, ConstantRef, NodeId, NodeKind};
use crate::parser::syntax::{BinaryOp, Span};
use crate::parser::variables::{VarId, VariableKind, VariableTable};
use crate::stdlib::functions::{BuiltinFunction, SizeRule};
use crate::vm::context::EngineContext;
use crate::vm::memory::SLOT_BYTES;
use crate::vm::value::{MAX_LANES, ValueType};

type Shape = (u8, ValueType);
type AnalysisResult<T> = Result<T, CompileErrorKind>;

pub fn analyze(state: &mut CompilationState<'_>) -> AnalysisResult<()> {
    layout_inputs(&mut state.variables)?;
    state.variables.reset_counts();

    let mut analyzer = Analyzer {
        ast: &mut state.ast,
        variables: &mut state.variables,
        context: state.context,
        defined: HashSet::new(),
    };
    let root = analyzer.ast.root();
    let statements: Vec<NodeId> = analyzer.ast.children(root).to_vec();
    for statement in statements {
        analyzer.statement(statement, state.options.yield_support)?;
    }
    let defined = analyzer.defined;

    let rule_targets: HashSet<VarId> = state.rules.iter().map(|r| r.target).collect();
    check_contract(state, &defined, &rule_targets)
}

/// Inputs are packed in declaration order; a pinned offset must match.
fn layout_inputs(variables: &mut VariableTable) -> AnalysisResult<()> {
    let inputs: Vec<VarId> = variables.inputs().map(|v| v.id).collect();
    let mut offset = 0;
    for id in inputs {
        let var = variables.get_mut(id);
        if let Some(pinned) = var.pinned_offset
            && pinned != offset
        {
            return Err(CompileErrorKind::MisalignedInput {
                name: var.name.clone(),
                pinned,
                expected: offset,
                span: var.span.clone(),
            });
        }
        trace!(input = %var.name, offset, "Placed input");
        var.offset = Some(offset);
        offset += var.size() as usize * SLOT_BYTES;
    }
    Ok(())
}

fn check_contract(
    state: &mut CompilationState<'_>,
    defined: &HashSet<VarId>,
    rule_targets: &HashSet<VarId>,
) -> AnalysisResult<()> {
    let mut warnings = Vec::new();
    for var in state.variables.iter() {
        match var.kind {
            VariableKind::Input if var.reads == 0 => {
                warnings.push((var.span.clone(), format!("input '{}' is never read", var.name)));
            }
            VariableKind::Output if !defined.contains(&var.id) => {
                return Err(CompileErrorKind::UndefinedOutput {
                    name: var.name.clone(),
                    span: var.span.clone(),
                });
            }
            // An inout's incoming value counts as a reference only once the
            // script reads it; assigned but never read, it should be an output.
            VariableKind::InOut if var.reads == 0 => {
                return Err(CompileErrorKind::SuperfluousValue {
                    name: var.name.clone(),
                    span: var.span.clone(),
                });
            }
            VariableKind::InOut if var.writes == 0 => {
                return Err(CompileErrorKind::UndefinedOutput {
                    name: var.name.clone(),
                    span: var.span.clone(),
                });
            }
            VariableKind::Local if var.reads == 0 && !var.hidden && !rule_targets.contains(&var.id) => {
                warnings.push((
                    var.span.clone(),
                    format!("local '{}' is assigned but never read", var.name),
                ));
            }
            _ => {}
        }
    }
    for (span, message) in warnings {
        state.warn(Some(span), message);
    }
    Ok(())
}

struct Analyzer<'a> {
    ast: &'a mut Ast,
    variables: &'a mut VariableTable,
    context: &'a EngineContext,
    /// Targets of at least one assignment that does not read the target.
    defined: HashSet<VarId>,
}

impl Analyzer<'_> {
    fn statement(&mut self, id: NodeId, yield_support: bool) -> AnalysisResult<()> {
        let deps: Vec<NodeId> = self.ast.node(id).depends_on.to_vec();
        for dep in deps {
            self.statement(dep, yield_support)?;
        }
        let span = self.ast.node(id).span.clone();
        match self.ast.kind(id).clone() {
            NodeKind::Assignment { target, swizzle } => {
                let value = self.child(id)?;
                let (size, ty) = self.value(value)?;
                let var = self.variables.get_mut(target);
                let width = match var.vector_size {
                    None => {
                        var.vector_size = Some(size);
                        var.value_type = ty;
                        debug!(local = %var.name, size, %ty, "Inferred local shape");
                        size
                    }
                    Some(target_size) => {
                        let width = match swizzle {
                            Some(s) if target_size > 1 && s.max_component() >= target_size => {
                                return Err(CompileErrorKind::VectorSizeMismatch {
                                    left: target_size,
                                    right: s.max_component() + 1,
                                    span,
                                });
                            }
                            Some(s) => s.count,
                            None => target_size,
                        };
                        if size != width && size != 1 {
                            return Err(CompileErrorKind::VectorSizeMismatch {
                                left: width,
                                right: size,
                                span,
                            });
                        }
                        if ty != var.value_type {
                            return Err(CompileErrorKind::TypeMismatch {
                                expected: var.value_type,
                                found: ty,
                                span,
                            });
                        }
                        width
                    }
                };
                var.writes += 1;
                if !reads_variable(self.ast, value, target) {
                    self.defined.insert(target);
                }
                let node = self.ast.node_mut(id);
                node.vector_size = Some(width);
                node.value_type = ty;
            }
            NodeKind::Condition | NodeKind::Push => {
                let value = self.child(id)?;
                let (size, ty) = self.value(value)?;
                let node = self.ast.node_mut(id);
                node.vector_size = Some(size);
                node.value_type = ty;
            }
            NodeKind::Yield { .. } if !yield_support => {
                return Err(CompileErrorKind::YieldDisabled { span });
            }
            NodeKind::Yield { .. } | NodeKind::Jump { .. } | NodeKind::Label(_) => {}
            kind => {
                return Err(CompileErrorKind::Internal(
                    format!("{} statement left after lowering", kind.name()).into(),
                ));
            }
        }
        Ok(())
    }

    fn child(&self, id: NodeId) -> AnalysisResult<NodeId> {
        self.ast.child(id, 0).ok_or_else(|| {
            CompileErrorKind::Internal(format!("{} without a value", self.ast.kind(id).name()).into())
        })
    }

    /// Shape of the value a node produces, indexer applied.
    fn value(&mut self, id: NodeId) -> AnalysisResult<Shape> {
        let span = self.ast.node(id).span.clone();
        let (size, ty) = match self.ast.kind(id).clone() {
            NodeKind::Literal(_) | NodeKind::Constant(ConstantRef::Shared(_)) => {
                (1, ValueType::Numeric)
            }
            NodeKind::Constant(ConstantRef::Slot(var)) => {
                let var = self.variables.get(var);
                (var.size(), var.value_type)
            }
            NodeKind::Variable(var) => {
                let var = self.variables.get_mut(var);
                var.reads += 1;
                let size = var.vector_size.ok_or_else(|| {
                    CompileErrorKind::Internal(
                        format!("'{}' is read before its size is known", var.name).into(),
                    )
                })?;
                (size, var.value_type)
            }
            NodeKind::StackPop => {
                let node = self.ast.node(id);
                (node.vector_size.unwrap_or(1), node.value_type)
            }
            NodeKind::Compound => self.compound(id, &span)?,
            NodeKind::Function(Callee::Builtin(function)) => self.builtin(id, function, &span)?,
            NodeKind::Function(Callee::External(fid)) => self.external(id, fid, &span)?,
            kind => {
                return Err(CompileErrorKind::Internal(
                    format!("{} in value position", kind.name()).into(),
                ));
            }
        };
        let node = self.ast.node_mut(id);
        node.vector_size = Some(size);
        node.value_type = ty;

        match node.indexer {
            None => Ok((size, ty)),
            Some(swizzle) => {
                if size > 1 && swizzle.max_component() >= size {
                    return Err(CompileErrorKind::VectorSizeMismatch {
                        left: size,
                        right: swizzle.max_component() + 1,
                        span,
                    });
                }
                if ty == ValueType::Id && swizzle.count > 1 {
                    return Err(CompileErrorKind::TypeMismatch {
                        expected: ValueType::Numeric,
                        found: ValueType::Id,
                        span,
                    });
                }
                Ok((swizzle.count, ty))
            }
        }
    }

    fn compound(&mut self, id: NodeId, span: &Span) -> AnalysisResult<Shape> {
        let children: Vec<NodeId> = self.ast.children(id).to_vec();
        let mut acc: Option<Shape> = None;
        let mut group: Option<(usize, ValueType)> = None;
        let mut pending_op: Option<BinaryOp> = None;
        let mut pending_unary = false;

        for child in children {
            match *self.ast.kind(child) {
                NodeKind::Operator(op) => {
                    acc = Some(self.close_group(acc, group.take(), pending_op, span)?);
                    pending_op = Some(op);
                }
                NodeKind::Unary(_) => pending_unary = true,
                _ => {
                    let (size, ty) = self.value(child)?;
                    if pending_unary && ty == ValueType::Id {
                        return Err(CompileErrorKind::TypeMismatch {
                            expected: ValueType::Numeric,
                            found: ty,
                            span: self.ast.node(child).span.clone(),
                        });
                    }
                    pending_unary = false;
                    group = Some(match group {
                        None => (size as usize, ty),
                        Some((_, group_ty)) if group_ty != ty || ty == ValueType::Id => {
                            return Err(CompileErrorKind::TypeMismatch {
                                expected: ValueType::Numeric,
                                found: ValueType::Id,
                                span: span.clone(),
                            });
                        }
                        Some((len, _)) => (len + size as usize, ty),
                    });
                }
            }
        }
        self.close_group(acc, group, pending_op, span)
    }

    /// Folds the finished operand group into the accumulated shape.
    fn close_group(
        &self,
        acc: Option<Shape>,
        group: Option<(usize, ValueType)>,
        op: Option<BinaryOp>,
        span: &Span,
    ) -> AnalysisResult<Shape> {
        let Some((len, ty)) = group else {
            return Err(CompileErrorKind::Internal("compound operand without a value".into()));
        };
        if len > MAX_LANES {
            return Err(CompileErrorKind::VectorTooLarge {
                size: len,
                span: span.clone(),
            });
        }
        let right = (len as u8, ty);
        let (Some(left), Some(op)) = (acc, op) else {
            return Ok(right);
        };
        if left.0 != right.0 && left.0 != 1 && right.0 != 1 {
            return Err(CompileErrorKind::VectorSizeMismatch {
                left: left.0,
                right: right.0,
                span: span.clone(),
            });
        }
        let size = left.0.max(right.0);
        match (left.1, right.1) {
            (ValueType::Numeric, ValueType::Numeric) => Ok((size, ValueType::Numeric)),
            (ValueType::Id, ValueType::Id) if op.is_equality() => Ok((size, ValueType::Numeric)),
            (expected, found) => Err(CompileErrorKind::TypeMismatch {
                expected: if expected == found { ValueType::Numeric } else { expected },
                found,
                span: span.clone(),
            }),
        }
    }

    fn arguments(&mut self, id: NodeId) -> AnalysisResult<Vec<(Shape, Span)>> {
        let args: Vec<NodeId> = self.ast.children(id).to_vec();
        args.into_iter()
            .map(|arg| Ok((self.value(arg)?, self.ast.node(arg).span.clone())))
            .collect()
    }

    fn builtin(
        &mut self,
        id: NodeId,
        function: &'static BuiltinFunction,
        span: &Span,
    ) -> AnalysisResult<Shape> {
        let args = self.arguments(id)?;
        for ((_, ty), arg_span) in &args {
            if *ty == ValueType::Id && !function.debug_only {
                return Err(CompileErrorKind::TypeMismatch {
                    expected: ValueType::Numeric,
                    found: ValueType::Id,
                    span: arg_span.clone(),
                });
            }
        }
        let sizes: Vec<u8> = args.iter().map(|((size, _), _)| *size).collect();
        if let SizeRule::Fixed(n) = function.size_rule
            && let Some(&bad) = sizes.iter().find(|&&s| s != n)
        {
            return Err(CompileErrorKind::VectorSizeMismatch {
                left: n,
                right: bad,
                span: span.clone(),
            });
        }
        let first = sizes.first().copied().unwrap_or(1);
        for &size in &sizes {
            let compatible = if function.strict_operands {
                size == first
            } else {
                size == first || size == 1 || first == 1
            };
            if !compatible {
                return Err(CompileErrorKind::VectorSizeMismatch {
                    left: first,
                    right: size,
                    span: span.clone(),
                });
            }
        }
        let ty = args.first().map_or(ValueType::Numeric, |((_, ty), _)| *ty);
        let ty = if function.debug_only { ty } else { ValueType::Numeric };
        Ok((function.result_size(&sizes), ty))
    }

    fn external(&mut self, id: NodeId, fid: u32, span: &Span) -> AnalysisResult<Shape> {
        let args = self.arguments(id)?;
        let function = self
            .context
            .functions
            .get(fid)
            .ok_or_else(|| CompileErrorKind::Internal(format!("unknown function id {}", fid).into()))?;
        for (param, ((size, ty), arg_span)) in function.params.iter().zip(&args) {
            if *ty != param.ty {
                return Err(CompileErrorKind::TypeMismatch {
                    expected: param.ty,
                    found: *ty,
                    span: arg_span.clone(),
                });
            }
            if *size != param.size {
                return Err(CompileErrorKind::VectorSizeMismatch {
                    left: param.size,
                    right: *size,
                    span: arg_span.clone(),
                });
            }
        }
        trace!(function = %function.name, span = ?span, "Checked external call");
        Ok((function.result.size, function.result.ty))
    }
}

fn reads_variable(ast: &Ast, id: NodeId, var: VarId) -> bool {
    let mut found = false;
    ast.walk(id, &mut |_, node| {
        if node.kind == NodeKind::Variable(var) {
            found = true;
        }
    });
    found
}
