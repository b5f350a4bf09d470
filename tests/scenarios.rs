mod common;

use common::{engine, run};
use indoc::indoc;
use pretty_assertions::assert_eq;
use vexpr::{CallHandles, CompileOptions, Engine, Severity, Value};
use vexpr_core::compiler::CompileErrorKind;

#[test]
fn constant_sum_lands_in_the_output_slot() {
    let engine = engine();
    let script = engine.compile("output a; a = 1 + 2;").unwrap();

    let a = script.variable("a").unwrap();
    assert_eq!(a.size, 1);
    let memory = run(&engine, &script, &[]);
    assert_eq!(memory.read(a.slot()), Some(Value::scalar(3.0)));
}

#[test]
fn vector_groups_add_component_wise() {
    let engine = engine();
    let script = engine
        .compile("output a[3]; a = (1, 2, 3) + (10, 20, 30);")
        .unwrap();

    let memory = run(&engine, &script, &[]);
    assert_eq!(
        script.output(&memory, "a").unwrap(),
        Value::vector(&[11.0, 22.0, 33.0])
    );
}

#[test]
fn unreferenced_input_is_only_a_warning() {
    let script = engine()
        .compile(indoc! {"
            input x;
            output y;
            y = 1;
        "})
        .unwrap();

    let unused = script
        .warnings()
        .find(|w| w.message.contains("'x'"))
        .expect("warning about 'x'");
    assert_eq!(unused.severity, Severity::Warning);
    assert!(unused.span.is_some());
}

#[test]
fn inout_written_once_and_never_read_fails_liveness() {
    let failure = engine().compile("inout y; y = 3;").unwrap_err();

    assert_eq!(failure.stage_name, "ParameterAnalysis");
    assert!(matches!(failure.error, CompileErrorKind::SuperfluousValue { .. }));
}

#[test]
fn output_defined_only_through_itself_fails_liveness() {
    let failure = engine().compile("output y; y = y * 2;").unwrap_err();

    assert_eq!(failure.stage_name, "ParameterAnalysis");
    assert!(matches!(failure.error, CompileErrorKind::UndefinedOutput { .. }));
}

#[test]
fn batch_of_four_doubles_every_instance() {
    let engine = engine();
    let script = engine.compile("input in; output out; out = in * 2;").unwrap();

    let mut block = script.ssmd_block(4);
    // Fill in reverse so nothing depends on instance order.
    for i in (0..4).rev() {
        script
            .set_batch_input(&mut block, i, "in", Value::scalar((i + 1) as f32))
            .unwrap();
    }
    let mut interpreter = script.ssmd_interpreter(engine.context());
    block
        .execute(&mut interpreter, &mut CallHandles::none())
        .unwrap();

    let outputs: Vec<_> = (0..4)
        .map(|i| script.batch_output(&block, i, "out").unwrap())
        .collect();
    assert_eq!(
        outputs,
        [2.0, 4.0, 6.0, 8.0].map(Value::scalar).to_vec()
    );
}

#[test]
fn validation_rule_honors_epsilon_and_names_the_rule() {
    let engine = Engine::new(
        CompileOptions {
            constant_epsilon: 0.001,
            ..CompileOptions::default()
        },
        |_| {},
    )
    .unwrap();
    let script = engine
        .compile("input v; output x; x = v; validate x == 5;")
        .unwrap();

    let report = script
        .validate_with(engine.context(), &[("v", Value::scalar(5.0005))])
        .unwrap();
    assert!(report.passed());

    let report = script
        .validate_with(engine.context(), &[("v", Value::scalar(5.002))])
        .unwrap();
    assert!(!report.passed());
    let failed: Vec<_> = report.failures().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "x");
    assert!(failed[0].text.contains("x == 5"), "{}", failed[0].text);
}

#[test]
fn deeply_nested_groups_fail_to_parse_instead_of_aborting() {
    let source = format!("output o; o = {}1{};", "(".repeat(2000), ")".repeat(2000));
    let failure = engine().compile(&source).unwrap_err();

    assert_eq!(failure.stage_name, "Parse");
    assert!(failure.to_string().contains("nesting depth"), "{}", failure);
}
