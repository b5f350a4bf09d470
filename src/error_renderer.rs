//! Error rendering using ariadne
//!
//! Turns the diagnostics of a failed compilation into reports with source
//! snippets. Diagnostics without a span (stage dumps, package summaries)
//! are printed as plain lines.

use crate::{CompileFailure, Diagnostic, Severity};
use ariadne::{Color, ColorGenerator, Label, Report, ReportKind, Source};
use std::io::Write;

const SOURCE_ID: &str = "<script>";

/// Render a compile failure to stderr.
///
/// # Example
/// ```no_run
/// use vexpr::{CompileOptions, Engine, render_failure};
///
/// let engine = Engine::new(CompileOptions::default(), |_| {}).unwrap();
/// if let Err(failure) = engine.compile("output o; o = q;") {
///     render_failure(&failure);
/// }
/// ```
pub fn render_failure(failure: &CompileFailure) {
    render_failure_to_writer(failure, &mut std::io::stderr(), true).ok();
}

/// Render a compile failure to a specific writer.
pub fn render_failure_to(failure: &CompileFailure, writer: &mut dyn Write) -> std::io::Result<()> {
    render_failure_to_writer(failure, writer, true)
}

/// Render a compile failure to a String.
pub fn render_failure_to_string(failure: &CompileFailure) -> String {
    let mut buf = Vec::new();
    render_failure_to_writer(failure, &mut buf, true).ok();
    String::from_utf8_lossy(&buf).to_string()
}

/// Same as [`render_failure_to_string`] without ANSI color codes.
pub fn render_failure_to_string_no_color(failure: &CompileFailure) -> String {
    let mut buf = Vec::new();
    render_failure_to_writer(failure, &mut buf, false).ok();
    String::from_utf8_lossy(&buf).to_string()
}

fn render_failure_to_writer(
    failure: &CompileFailure,
    writer: &mut dyn Write,
    use_color: bool,
) -> std::io::Result<()> {
    render_diagnostics(&failure.source_text, &failure.diagnostics, writer, use_color)?;
    writeln!(writer, "{}", failure)
}

/// Render a list of diagnostics against the source they refer to.
///
/// Also used for the warnings of a successful compilation.
pub fn render_diagnostics(
    source: &str,
    diagnostics: &[Diagnostic],
    writer: &mut dyn Write,
    use_color: bool,
) -> std::io::Result<()> {
    for diag in diagnostics {
        let Some(span) = diag.span.as_ref() else {
            writeln!(writer, "{}", diag)?;
            continue;
        };
        // ariadne needs a span inside the source.
        let end = span.end().min(source.len());
        let range = span.start().min(end)..end;

        let mut colors = ColorGenerator::new();
        colors.next(); // Skip the first color.

        let kind = match diag.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
            Severity::Info => ReportKind::Advice,
            Severity::Trace => ReportKind::Custom("Trace", Color::Fixed(244)),
        };

        let mut report = Report::build(kind, (SOURCE_ID, range.clone()))
            .with_message(&diag.message)
            .with_config(ariadne::Config::default().with_color(use_color));

        if let Some(code) = diag.code {
            report = report.with_code(format!("E{:03}", code));
        }

        let color = colors.next();
        report = report.with_label(
            Label::new((SOURCE_ID, range))
                .with_message(&diag.message)
                .with_color(color),
        );

        if let Some(stage) = diag.stage {
            report = report.with_note(format!("reported by the {} stage", stage));
        }
        for help_msg in &diag.help {
            report = report.with_help(help_msg);
        }

        report
            .finish()
            .write((SOURCE_ID, Source::from(source)), &mut *writer)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompileOptions, Engine};

    fn failure(source: &str) -> CompileFailure {
        let engine = Engine::new(CompileOptions::default(), |_| {}).unwrap();
        match engine.compile(source) {
            Err(failure) => failure,
            Ok(_) => panic!("expected {:?} to fail", source),
        }
    }

    #[test]
    fn test_render_parse_error() {
        let output = render_failure_to_string_no_color(&failure("output o; o = 1 + ;"));

        assert!(output.contains("Error") || output.contains("error"));
        assert!(output.contains("o = 1 + ;"));
        assert!(output.contains("Parse"));
    }

    #[test]
    fn test_render_unresolved_identifier() {
        let output = render_failure_to_string_no_color(&failure("output o; o = q;"));

        assert!(output.contains("q"));
        assert!(output.lines().count() > 1);
    }

    #[test]
    fn test_render_analysis_error_without_color() {
        let output = render_failure_to_string_no_color(&failure("output o; o = o + 1;"));

        assert!(output.contains("ParameterAnalysis"));
        assert!(!output.contains('\u{1b}'));
    }

    #[test]
    fn test_spanless_diagnostics_are_plain_lines() {
        let diagnostics = vec![Diagnostic::warning("stack size measured")];
        let mut buf = Vec::new();
        render_diagnostics("", &diagnostics, &mut buf, false).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "warning: stack size measured\n");
    }
}
