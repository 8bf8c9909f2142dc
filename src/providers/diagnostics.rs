//! Diagnostic construction and ordering helpers

use std::cmp::Ordering;

use tower_lsp::lsp_types::*;

use crate::collectors::Dependency;

/// `source` field of every diagnostic this server publishes
pub const DIAGNOSTIC_SOURCE: &str = "dependency-analytics";

/// Range covering a dependency's version text.
///
/// Collector positions are 1-based and LSP positions 0-based. A placeholder
/// position maps to an empty range at the start of the document.
pub fn version_range(dep: &Dependency) -> Range {
    let position = dep.version.position;
    if position.is_placeholder() {
        return Range::default();
    }

    let start = Position {
        line: position.line.saturating_sub(1),
        character: position.column.saturating_sub(1),
    };
    let end = Position {
        line: start.line,
        character: start.character + dep.version.value.chars().count() as u32,
    };
    Range { start, end }
}

/// Create a diagnostic anchored at a dependency's version
pub fn create_diagnostic(
    dep: &Dependency,
    severity: DiagnosticSeverity,
    code: &str,
    message: String,
    data: Option<serde_json::Value>,
) -> Diagnostic {
    Diagnostic {
        range: version_range(dep),
        severity: Some(severity),
        code: Some(NumberOrString::String(code.to_string())),
        source: Some(DIAGNOSTIC_SOURCE.to_string()),
        message,
        related_information: None,
        tags: None,
        code_description: None,
        data,
    }
}

/// Sort diagnostics by range, then message, so batches are reproducible
pub fn sort_diagnostics(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by(|a, b| {
        compare_positions(a.range.start, b.range.start)
            .then_with(|| compare_positions(a.range.end, b.range.end))
            .then_with(|| a.message.cmp(&b.message))
    });
}

fn compare_positions(a: Position, b: Position) -> Ordering {
    (a.line, a.character).cmp(&(b.line, b.character))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{PositionedValue, SourcePosition};

    fn dep_at(version: &str, line: u32, column: u32) -> Dependency {
        Dependency::new(
            PositionedValue::placeholder("pkg"),
            PositionedValue::new(version, SourcePosition::new(line, column)),
        )
    }

    #[test]
    fn test_version_range_is_zero_based() {
        let range = version_range(&dep_at("4.17.1", 4, 17));
        assert_eq!(range.start, Position { line: 3, character: 16 });
        assert_eq!(range.end, Position { line: 3, character: 22 });
    }

    #[test]
    fn test_placeholder_range() {
        let range = version_range(&dep_at("1.0", 0, 0));
        assert_eq!(range, Range::default());
    }

    #[test]
    fn test_create_diagnostic_fields() {
        let diag = create_diagnostic(
            &dep_at("1.0", 1, 7),
            DiagnosticSeverity::WARNING,
            "forbidden-license",
            "message".to_string(),
            None,
        );
        assert_eq!(diag.source.as_deref(), Some(DIAGNOSTIC_SOURCE));
        assert_eq!(
            diag.code,
            Some(NumberOrString::String("forbidden-license".to_string()))
        );
        assert_eq!(diag.range.start.character, 6);
    }

    #[test]
    fn test_sort_diagnostics() {
        let mut diags = vec![
            create_diagnostic(&dep_at("1", 5, 1), DiagnosticSeverity::ERROR, "x", "b".into(), None),
            create_diagnostic(&dep_at("1", 2, 9), DiagnosticSeverity::ERROR, "x", "z".into(), None),
            create_diagnostic(&dep_at("1", 5, 1), DiagnosticSeverity::ERROR, "x", "a".into(), None),
            create_diagnostic(&dep_at("1", 2, 3), DiagnosticSeverity::ERROR, "x", "y".into(), None),
        ];
        sort_diagnostics(&mut diags);
        let messages: Vec<_> = diags.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["y", "z", "a", "b"]);
    }
}
