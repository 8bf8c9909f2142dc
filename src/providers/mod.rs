//! Scanners turning fetched metadata into diagnostics

use tower_lsp::lsp_types::Diagnostic;

use crate::collectors::Dependency;
use crate::config::AnalysisConfig;
use crate::registries::Metadata;

pub mod diagnostics;
pub mod license;
pub mod security;

pub use license::LicenseScanner;
pub use security::SecurityScanner;

/// Trait for inspecting one dependency's metadata
///
/// Scanners are infallible: a payload they cannot read yields no diagnostics.
pub trait Scanner: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Append diagnostics for `dependency`, tied to its version position
    fn scan(&self, dependency: &Dependency, metadata: &Metadata, diagnostics: &mut Vec<Diagnostic>);
}

/// The scanners run for every resolved dependency, in order
pub struct ScannerSet {
    scanners: Vec<Box<dyn Scanner>>,
}

impl ScannerSet {
    pub fn new(scanners: Vec<Box<dyn Scanner>>) -> Self {
        Self { scanners }
    }

    /// Security scanning always runs; license scanning only when some
    /// licenses are forbidden.
    pub fn from_config(config: &AnalysisConfig) -> Self {
        let mut scanners: Vec<Box<dyn Scanner>> = vec![Box::new(SecurityScanner)];
        if !config.forbidden_licenses.is_empty() {
            scanners.push(Box::new(LicenseScanner::new(config.forbidden_licenses.clone())));
        }
        Self::new(scanners)
    }

    /// Run every scanner over one dependency
    pub fn scan(&self, dependency: &Dependency, metadata: &Metadata) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for scanner in &self.scanners {
            let before = diagnostics.len();
            scanner.scan(dependency, metadata, &mut diagnostics);
            let added = diagnostics.len() - before;
            if added > 0 {
                tracing::debug!(
                    "{} flagged {} issue(s) in {}",
                    scanner.name(),
                    added,
                    dependency.name.value
                );
            }
        }
        diagnostics
    }

    pub fn len(&self) -> usize {
        self.scanners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config = AnalysisConfig::default();
        assert_eq!(ScannerSet::from_config(&config).len(), 1);

        let config = AnalysisConfig {
            forbidden_licenses: vec!["GPL-3.0".to_string()],
            ..Default::default()
        };
        assert_eq!(ScannerSet::from_config(&config).len(), 2);
    }

    #[test]
    fn test_empty_set_yields_nothing() {
        let set = ScannerSet::new(Vec::new());
        assert!(set.is_empty());

        let dep = Dependency::new(
            crate::collectors::PositionedValue::placeholder("a"),
            crate::collectors::PositionedValue::placeholder("1.0"),
        );
        assert!(set.scan(&dep, &serde_json::json!({})).is_empty());
    }
}
