//! Format collectors turning manifest contents into dependency records
//!
//! Every collector produces the same [`Dependency`] type, whatever the
//! manifest syntax. Positions are 1-based (line and column, counted in
//! characters). Fields a collector cannot locate carry
//! [`SourcePosition::PLACEHOLDER`].

use std::io::Read;

use serde::Serialize;

use crate::config::CollectorConfig;
use crate::error::CollectError;
use crate::file_types::ManifestKind;

pub mod json;
pub mod line_list;
pub mod xml;

pub use json::JsonCollector;
pub use line_list::{BlankLinePolicy, LineListCollector};
pub use xml::XmlCollector;

/// 1-based source location of a field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourcePosition {
    pub line: u32,
    pub column: u32,
}

impl SourcePosition {
    /// Position used when the parser cannot locate a field
    pub const PLACEHOLDER: SourcePosition = SourcePosition { line: 0, column: 0 };

    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    pub fn is_placeholder(&self) -> bool {
        *self == Self::PLACEHOLDER
    }
}

/// A text value together with where it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionedValue {
    pub value: String,
    pub position: SourcePosition,
}

impl PositionedValue {
    pub fn new(value: impl Into<String>, position: SourcePosition) -> Self {
        Self {
            value: value.into(),
            position,
        }
    }

    /// A value whose origin is unknown or synthesized
    pub fn placeholder(value: impl Into<String>) -> Self {
        Self::new(value, SourcePosition::PLACEHOLDER)
    }
}

/// One dependency declaration extracted from a manifest
///
/// Records are never mutated after collection. Within a batch they are
/// identified by their index in the collected sequence, not by value, so two
/// identical declarations stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub name: PositionedValue,
    pub version: PositionedValue,
}

impl Dependency {
    pub fn new(name: PositionedValue, version: PositionedValue) -> Self {
        Self { name, version }
    }
}

/// Trait for turning one manifest syntax into dependency records
pub trait Collector: Send + Sync {
    /// Extract dependencies from the full manifest text, in source order
    fn collect(&self, content: &str) -> Result<Vec<Dependency>, CollectError>;

    /// Extract dependencies from a byte stream.
    ///
    /// The default reads the stream to the end and delegates to
    /// [`Collector::collect`]; collectors that can consume events
    /// incrementally override it.
    fn collect_from_reader(&self, reader: &mut dyn Read) -> Result<Vec<Dependency>, CollectError> {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        self.collect(&content)
    }
}

/// Build the collector handling a manifest kind
pub fn collector_for(kind: ManifestKind, config: &CollectorConfig) -> Box<dyn Collector> {
    match kind {
        ManifestKind::PackageJson => Box::new(JsonCollector::new(config.json_classes.clone())),
        ManifestKind::PomXml => Box::new(XmlCollector::new(config.xml_element.clone())),
        ManifestKind::Requirements => Box::new(LineListCollector::new(config.blank_lines)),
    }
}

/// Maps byte offsets in a document to 1-based line/column positions
#[derive(Debug)]
pub struct LineIndex<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { text, line_starts }
    }

    /// Position of the character starting at `offset`.
    ///
    /// Offsets past the end clamp to the end of the text; offsets inside a
    /// multi-byte character resolve to that character.
    pub fn position(&self, offset: usize) -> SourcePosition {
        let offset = offset.min(self.text.len());
        let line = self.line_starts.partition_point(|&start| start <= offset) - 1;
        let line_start = self.line_starts[line];
        let column = self.text[line_start..]
            .char_indices()
            .take_while(|(i, _)| line_start + i < offset)
            .count();
        SourcePosition::new(line as u32 + 1, column as u32 + 1)
    }

    /// Position of the first token at or after `offset`, skipping whitespace
    /// and a leading string quote.
    pub fn token_position(&self, offset: usize) -> SourcePosition {
        let rest = self.text.get(offset..).unwrap_or("");
        let trimmed = rest.trim_start();
        let mut start = offset + (rest.len() - trimmed.len());
        if trimmed.starts_with('"') {
            start += 1;
        }
        self.position(start)
    }
}
