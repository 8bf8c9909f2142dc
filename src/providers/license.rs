//! License scanner over component-analysis payloads

use serde::Deserialize;
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity};

use super::Scanner;
use super::diagnostics::create_diagnostic;
use crate::collectors::Dependency;
use crate::registries::Metadata;

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    result: Option<AnalysisResult>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisResult {
    #[serde(default)]
    data: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
struct Entry {
    #[serde(default)]
    version: Option<VersionData>,
}

#[derive(Debug, Default, Deserialize)]
struct VersionData {
    #[serde(default)]
    licenses: Vec<String>,
}

/// Flags dependencies declaring a forbidden license
#[derive(Debug)]
pub struct LicenseScanner {
    forbidden: Vec<String>,
}

impl LicenseScanner {
    pub fn new(forbidden: Vec<String>) -> Self {
        Self { forbidden }
    }

    fn is_forbidden(&self, license: &str) -> bool {
        self.forbidden
            .iter()
            .any(|f| f.eq_ignore_ascii_case(license.trim()))
    }
}

impl Scanner for LicenseScanner {
    fn name(&self) -> &'static str {
        "license"
    }

    fn scan(&self, dependency: &Dependency, metadata: &Metadata, diagnostics: &mut Vec<Diagnostic>) {
        let Ok(Payload {
            result: Some(result),
        }) = Payload::deserialize(metadata)
        else {
            return;
        };

        let mut flagged: Vec<&str> = Vec::new();
        for license in result
            .data
            .iter()
            .filter_map(|entry| entry.version.as_ref())
            .flat_map(|version| &version.licenses)
        {
            let seen = flagged.iter().any(|f| f.eq_ignore_ascii_case(license));
            if self.is_forbidden(license) && !seen {
                flagged.push(license);
            }
        }
        if flagged.is_empty() {
            return;
        }

        diagnostics.push(create_diagnostic(
            dependency,
            DiagnosticSeverity::WARNING,
            "forbidden-license",
            format!(
                "{}@{} is distributed under a forbidden license: {}",
                dependency.name.value,
                dependency.version.value,
                flagged.join(", ")
            ),
            None,
        ));
    }
}
