use crate::analyzer::{parameters, transform};
use crate::api::error::Severity;
use crate::api::options::CompileOptions;
use crate::compiler::error::CompileErrorKind;
use crate::compiler::pipeline::CompilationState;
use crate::parser::parser::parse;
use crate::parser::variables::VariableKind;
use crate::vm::context::{EngineContext, ExternalFunction, FunctionTable, ParamSpec};
use crate::vm::value::{Value, ValueType};

// Helper to run the front end and parameter analysis over a source string
fn analyze_with(
    source: &str,
    options: &CompileOptions,
    context: &EngineContext,
) -> Result<(Vec<(String, Option<u8>, ValueType)>, Vec<String>), CompileErrorKind> {
    let script = parse(source, context)?;
    let mut state = CompilationState::from_parsed(script, options, context);
    transform::transform(&mut state)?;
    parameters::analyze(&mut state)?;
    let shapes = state
        .variables
        .iter()
        .filter(|v| v.kind != VariableKind::Undeclared && !v.hidden)
        .map(|v| (v.name.to_string(), v.vector_size, v.value_type))
        .collect();
    let warnings = state
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Warning)
        .map(|d| d.message.clone())
        .collect();
    Ok((shapes, warnings))
}

fn analyze_source(source: &str) -> Result<(Vec<(String, Option<u8>, ValueType)>, Vec<String>), CompileErrorKind> {
    analyze_with(source, &CompileOptions::default(), &EngineContext::default())
}

fn size_of(source: &str, name: &str) -> Option<u8> {
    let (shapes, _) = analyze_source(source).unwrap();
    shapes.into_iter().find(|(n, _, _)| n == name).and_then(|(_, s, _)| s)
}

// ============================================================================
// Vector size propagation
// ============================================================================

#[test]
fn test_locals_take_the_size_of_their_first_assignment() {
    let source = "input v[3]; output o; t = v * 2; o = t.x;";
    assert_eq!(size_of(source, "t"), Some(3));
}

#[test]
fn test_operand_groups_sum_their_members() {
    let source = "input a; input b[2]; output o[3]; t = (a, b); o = t;";
    assert_eq!(size_of(source, "t"), Some(3));
}

#[test]
fn test_scalars_broadcast_against_vectors() {
    let source = "input v[4]; input s; output o[4]; o = s * v + 1;";
    assert!(analyze_source(source).is_ok());
}

#[test]
fn test_mismatched_vector_sizes_fail() {
    let result = analyze_source("input a[2]; input b[3]; output o[3]; o = a + b;");
    assert!(matches!(
        result,
        Err(CompileErrorKind::VectorSizeMismatch { left: 2, right: 3, .. })
    ));
}

#[test]
fn test_groups_past_four_components_fail() {
    let result = analyze_source("input a[3]; input b[2]; output o; t = (a, b); o = t.x;");
    assert!(matches!(result, Err(CompileErrorKind::VectorTooLarge { size: 5, .. })));
}

#[test]
fn test_function_result_sizes() {
    let source = "input v[3]; input w[3]; output o; \
                  d = dot(v, w); c = cross(v, w); s = sum(v); m = max(v, w); o = d + c.x + s + m.y;";
    assert_eq!(size_of(source, "d"), Some(1));
    assert_eq!(size_of(source, "c"), Some(3));
    assert_eq!(size_of(source, "s"), Some(1));
    assert_eq!(size_of(source, "m"), Some(3));
}

#[test]
fn test_cross_requires_three_components() {
    let result = analyze_source("input a[2]; input b[2]; output o[3]; o = cross(a, b);");
    assert!(matches!(result, Err(CompileErrorKind::VectorSizeMismatch { left: 3, right: 2, .. })));
}

#[test]
fn test_strict_functions_reject_broadcasting() {
    let result = analyze_source("input v[2]; output o[2]; o = clamp(v, 0, 1);");
    assert!(matches!(result, Err(CompileErrorKind::VectorSizeMismatch { .. })));
}

#[test]
fn test_swizzles_must_stay_inside_the_vector() {
    let result = analyze_source("input v[2]; output o; o = v.z;");
    assert!(matches!(result, Err(CompileErrorKind::VectorSizeMismatch { left: 2, right: 3, .. })));
    assert!(analyze_source("input s; output o[3]; o = s.xxx;").is_ok());
}

#[test]
fn test_assignment_requires_matching_size_or_scalar() {
    assert!(analyze_source("input s; output o[3]; o = s;").is_ok());
    let result = analyze_source("input v[2]; output o[3]; o = v;");
    assert!(matches!(result, Err(CompileErrorKind::VectorSizeMismatch { left: 3, right: 2, .. })));
    assert!(analyze_source("input v[2]; output o[4]; o = 0; o.zw = v;").is_ok());
}

// ============================================================================
// Inputs and the output contract
// ============================================================================

#[test]
fn test_pinned_offsets_must_match_the_packed_layout() {
    assert!(analyze_source("input a[2] @ 0; input b @ 8; output o; o = a.x + b;").is_ok());
    let result = analyze_source("input a[2]; input b @ 4; output o; o = a.x + b;");
    assert!(matches!(
        result,
        Err(CompileErrorKind::MisalignedInput { pinned: 4, expected: 8, .. })
    ));
}

#[test]
fn test_unused_input_is_a_warning() {
    let (_, warnings) = analyze_source("input a; input unused; output o; o = a;").unwrap();
    assert_eq!(warnings, vec!["input 'unused' is never read".to_string()]);
}

#[test]
fn test_output_defined_only_in_terms_of_itself_fails() {
    let result = analyze_source("input x; output y; y = y * 2;");
    assert!(matches!(result, Err(CompileErrorKind::UndefinedOutput { .. })));
    let result = analyze_source("input x; output y; z = x;");
    assert!(matches!(result, Err(CompileErrorKind::UndefinedOutput { .. })));
}

#[test]
fn test_inout_must_be_read() {
    let result = analyze_source("input x; inout y; y = x;");
    assert!(matches!(result, Err(CompileErrorKind::SuperfluousValue { .. })));
    assert!(analyze_source("inout y; y = y * 2;").is_ok());
}

#[test]
fn test_unread_local_is_a_warning() {
    let (_, warnings) = analyze_source("input x; output o; t = x; o = x;").unwrap();
    assert_eq!(warnings, vec!["local 't' is assigned but never read".to_string()]);
}

// ============================================================================
// Value types
// ============================================================================

#[test]
fn test_ids_compare_for_equality_only() {
    assert!(analyze_source("input id a; input id b; output o; o = a == b;").is_ok());
    let result = analyze_source("input id a; input id b; output o; o = a < b;");
    assert!(matches!(result, Err(CompileErrorKind::TypeMismatch { .. })));
    let result = analyze_source("input id a; output o; o = a + 1;");
    assert!(matches!(result, Err(CompileErrorKind::TypeMismatch { .. })));
    let result = analyze_source("input id a; output o; o = -a;");
    assert!(matches!(result, Err(CompileErrorKind::TypeMismatch { .. })));
}

#[test]
fn test_ids_assign_to_ids() {
    assert!(analyze_source("input id a; output id o; o = a;").is_ok());
    let result = analyze_source("input a; output id o; o = a;");
    assert!(matches!(
        result,
        Err(CompileErrorKind::TypeMismatch { expected: ValueType::Id, found: ValueType::Numeric, .. })
    ));
}

#[test]
fn test_external_calls_check_parameters_exactly() {
    let mut functions = FunctionTable::new();
    functions
        .register(ExternalFunction::new(
            7,
            "owner",
            vec![ParamSpec::id(), ParamSpec::numeric(3)],
            ParamSpec::numeric(1),
            |_, _| Value::scalar(0.0),
        ))
        .unwrap();
    let context = EngineContext::new(functions, Default::default(), 1);
    let options = CompileOptions::default();

    let ok = "input id e; input p[3]; output o; o = owner(e, p);";
    assert!(analyze_with(ok, &options, &context).is_ok());
    let wrong_size = "input id e; input p[2]; output o; o = owner(e, p);";
    assert!(matches!(
        analyze_with(wrong_size, &options, &context),
        Err(CompileErrorKind::VectorSizeMismatch { left: 3, right: 2, .. })
    ));
    let wrong_type = "input e; input p[3]; output o; o = owner(e, p);";
    assert!(matches!(
        analyze_with(wrong_type, &options, &context),
        Err(CompileErrorKind::TypeMismatch { expected: ValueType::Id, .. })
    ));
}

// ============================================================================
// Options
// ============================================================================

#[test]
fn test_yield_can_be_disabled() {
    let source = "input x; output o; o = x; yield;";
    assert!(analyze_source(source).is_ok());
    let options = CompileOptions {
        yield_support: false,
        ..CompileOptions::default()
    };
    assert!(matches!(
        analyze_with(source, &options, &EngineContext::default()),
        Err(CompileErrorKind::YieldDisabled { .. })
    ));
}
