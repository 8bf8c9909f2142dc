//! Security scanner over component-analysis payloads
//!
//! Reads `result.recommendation["component-analyses"].cve` and the
//! suggested replacement in `result.recommendation.change_to`.

use serde::Deserialize;
use serde_json::json;
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity};

use super::Scanner;
use super::diagnostics::create_diagnostic;
use crate::collectors::Dependency;
use crate::registries::Metadata;

/// CVSS score from which a vulnerability is reported as an error
const HIGH_SEVERITY_CVSS: f64 = 7.0;

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    result: Option<AnalysisResult>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisResult {
    #[serde(default)]
    recommendation: Option<Recommendation>,
}

#[derive(Debug, Default, Deserialize)]
struct Recommendation {
    #[serde(rename = "component-analyses", default)]
    component_analyses: Option<ComponentAnalyses>,
    #[serde(default)]
    change_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ComponentAnalyses {
    #[serde(default)]
    cve: Vec<Cve>,
}

#[derive(Debug, Deserialize)]
struct Cve {
    id: String,
    #[serde(default)]
    cvss: Option<Score>,
}

/// Services report CVSS either as a number or as a numeric string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Score {
    Number(f64),
    Text(String),
}

impl Score {
    fn value(&self) -> Option<f64> {
        match self {
            Score::Number(n) => Some(*n),
            Score::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Flags dependencies with known vulnerabilities
#[derive(Debug, Default)]
pub struct SecurityScanner;

impl Scanner for SecurityScanner {
    fn name(&self) -> &'static str {
        "security"
    }

    fn scan(&self, dependency: &Dependency, metadata: &Metadata, diagnostics: &mut Vec<Diagnostic>) {
        let recommendation = match Payload::deserialize(metadata) {
            Ok(Payload {
                result:
                    Some(AnalysisResult {
                        recommendation: Some(recommendation),
                    }),
            }) => recommendation,
            Ok(_) => return,
            Err(e) => {
                tracing::debug!(
                    "Unreadable security payload for {}: {}",
                    dependency.name.value,
                    e
                );
                return;
            }
        };

        let cves = recommendation
            .component_analyses
            .map(|analyses| analyses.cve)
            .unwrap_or_default();
        if cves.is_empty() {
            return;
        }

        let highest = cves
            .iter()
            .filter_map(|cve| cve.cvss.as_ref().and_then(Score::value))
            .fold(None, |max: Option<f64>, score| Some(max.map_or(score, |m| m.max(score))));

        let severity = if highest.is_some_and(|score| score >= HIGH_SEVERITY_CVSS) {
            DiagnosticSeverity::ERROR
        } else {
            DiagnosticSeverity::WARNING
        };

        let ids: Vec<_> = cves.iter().map(|cve| cve.id.as_str()).collect();
        let noun = if ids.len() == 1 {
            "vulnerability"
        } else {
            "vulnerabilities"
        };
        let mut message = format!(
            "{}@{} has {} known security {}: {}",
            dependency.name.value,
            dependency.version.value,
            ids.len(),
            noun,
            ids.join(", ")
        );
        if let Some(score) = highest {
            message.push_str(&format!(" (highest CVSS {score:.1})"));
        }
        if let Some(change_to) = &recommendation.change_to {
            message.push_str(&format!(". Recommended version: {change_to}"));
        }

        let data = recommendation
            .change_to
            .map(|change_to| json!({ "changeTo": change_to }));

        diagnostics.push(create_diagnostic(
            dependency,
            severity,
            "security-vulnerability",
            message,
            data,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{PositionedValue, SourcePosition};

    fn dep() -> Dependency {
        Dependency::new(
            PositionedValue::new("lodash", SourcePosition::new(3, 6)),
            PositionedValue::new("4.17.4", SourcePosition::new(3, 17)),
        )
    }

    fn scan(metadata: serde_json::Value) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        SecurityScanner.scan(&dep(), &metadata, &mut diagnostics);
        diagnostics
    }

    #[test]
    fn test_high_cvss_is_error() {
        let diags = scan(json!({
            "result": {
                "recommendation": {
                    "change_to": "4.17.21",
                    "component-analyses": {
                        "cve": [
                            {"id": "CVE-2019-10744", "cvss": "9.1"},
                            {"id": "CVE-2018-16487", "cvss": 5.6}
                        ]
                    }
                }
            }
        }));

        assert_eq!(diags.len(), 1);
        let diag = &diags[0];
        assert_eq!(diag.severity, Some(DiagnosticSeverity::ERROR));
        assert_eq!(
            diag.message,
            "lodash@4.17.4 has 2 known security vulnerabilities: CVE-2019-10744, CVE-2018-16487 \
             (highest CVSS 9.1). Recommended version: 4.17.21"
        );
        assert_eq!(diag.data, Some(json!({"changeTo": "4.17.21"})));
        assert_eq!(diag.range.start.line, 2);
        assert_eq!(diag.range.start.character, 16);
    }

    #[test]
    fn test_low_cvss_is_warning() {
        let diags = scan(json!({
            "result": {"recommendation": {"component-analyses": {"cve": [{"id": "CVE-1", "cvss": 4.0}]}}}
        }));
        assert_eq!(diags[0].severity, Some(DiagnosticSeverity::WARNING));
        assert_eq!(
            diags[0].message,
            "lodash@4.17.4 has 1 known security vulnerability: CVE-1 (highest CVSS 4.0)"
        );
        assert_eq!(diags[0].data, None);
    }

    #[test]
    fn test_missing_score_is_warning() {
        let diags = scan(json!({
            "result": {"recommendation": {"component-analyses": {"cve": [{"id": "CVE-1"}]}}}
        }));
        assert_eq!(diags[0].severity, Some(DiagnosticSeverity::WARNING));
    }

    #[test]
    fn test_clean_payloads_yield_nothing() {
        assert!(scan(json!({})).is_empty());
        assert!(scan(json!({"result": {}})).is_empty());
        assert!(scan(json!({"result": {"recommendation": {}}})).is_empty());
        assert!(scan(json!({"result": {"recommendation": {"component-analyses": {"cve": []}}}})).is_empty());
    }

    #[test]
    fn test_unreadable_payload_yields_nothing() {
        assert!(scan(json!("not an object")).is_empty());
        assert!(scan(json!({"result": {"recommendation": {"component-analyses": {"cve": "x"}}}})).is_empty());
    }
}
