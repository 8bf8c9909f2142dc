//! Collector for plain requirement lists (requirements.txt)

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::{Collector, Dependency, PositionedValue, SourcePosition};
use crate::error::CollectError;

/// One or more `=`/`>` characters, covering `==`, `>=` and `>`
static VERSION_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[=>]+").expect("valid separator regex"));

const COMMENT_MARKER: char = '#';

/// How blank and comment-only lines are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlankLinePolicy {
    /// Lines without a declaration produce no record
    #[default]
    Skip,
    /// Every line produces a record, empty ones included
    Keep,
}

/// Collector for line-oriented requirement lists
#[derive(Debug, Default)]
pub struct LineListCollector {
    blank_lines: BlankLinePolicy,
}

impl LineListCollector {
    pub fn new(blank_lines: BlankLinePolicy) -> Self {
        Self { blank_lines }
    }

    fn parse_line(line: &str, line_number: u32) -> Dependency {
        let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
        let declaration = match compact.find(COMMENT_MARKER) {
            Some(idx) => &compact[..idx],
            None => compact.as_str(),
        };

        let mut parts = VERSION_SEPARATOR.split(declaration);
        let name = parts.next().unwrap_or_default();
        let version = parts.next().unwrap_or_default();

        let indent = line.chars().take_while(|c| c.is_whitespace()).count() as u32;
        // Approximation: just past a two-character separator
        let version_column = name.chars().count() as u32 + 2;

        Dependency::new(
            PositionedValue::new(name, SourcePosition::new(line_number, indent + 1)),
            PositionedValue::new(version, SourcePosition::new(line_number, version_column)),
        )
    }
}

impl Collector for LineListCollector {
    fn collect(&self, content: &str) -> Result<Vec<Dependency>, CollectError> {
        let dependencies = content
            .split('\n')
            .enumerate()
            .map(|(idx, line)| Self::parse_line(line, idx as u32 + 1))
            .filter(|dep| {
                self.blank_lines == BlankLinePolicy::Keep
                    || !(dep.name.value.is_empty() && dep.version.value.is_empty())
            })
            .collect();
        Ok(dependencies)
    }
}
