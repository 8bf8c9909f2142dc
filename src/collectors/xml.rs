//! Collector for Maven pom.xml build descriptors
//!
//! The document is consumed as an event stream. A small state machine tracks
//! whether the reader is inside a dependency element and assembles its
//! direct children; no tree is ever built. Syntax errors are logged and
//! skipped so that a half-edited pom still yields whatever was readable.

use std::io::{self, BufRead, BufReader, Read};

use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, Event};

use super::{Collector, Dependency, PositionedValue, SourcePosition};
use crate::error::CollectError;

/// Scopes that are part of the runtime classpath. A missing scope means compile.
const RUNTIME_SCOPES: &[&str] = &["compile", "runtime"];

/// Collector for XML build descriptors
#[derive(Debug)]
pub struct XmlCollector {
    element: String,
}

impl Default for XmlCollector {
    fn default() -> Self {
        Self::new("dependency".to_string())
    }
}

impl XmlCollector {
    /// Create a collector treating `element` as one dependency unit
    pub fn new(element: String) -> Self {
        Self { element }
    }

    fn collect_buffered<R: BufRead>(&self, input: R) -> Vec<Dependency> {
        let mut reader = Reader::from_reader(PositionTracker::new(input));
        reader.config_mut().check_end_names = false;

        let mut machine = StateMachine::new(self.element.as_bytes());
        let mut buf = Vec::new();
        let mut last_error_at = None;

        loop {
            let event = reader.read_event_into(&mut buf);
            let cursor = reader.get_ref().position();
            match event {
                Ok(Event::Eof) => break,
                Ok(event) => machine.on_event(&event, cursor),
                Err(e) => {
                    let offset = reader.buffer_position();
                    tracing::debug!("Skipping malformed XML at byte {}: {}", offset, e);
                    if last_error_at == Some(offset) {
                        break;
                    }
                    last_error_at = Some(offset);
                }
            }
            buf.clear();
        }

        machine.finish()
    }
}

impl Collector for XmlCollector {
    fn collect(&self, content: &str) -> Result<Vec<Dependency>, CollectError> {
        Ok(self.collect_buffered(content.as_bytes()))
    }

    fn collect_from_reader(&self, reader: &mut dyn Read) -> Result<Vec<Dependency>, CollectError> {
        Ok(self.collect_buffered(BufReader::new(reader)))
    }
}

/// Direct children of a dependency element that are captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    GroupId,
    ArtifactId,
    Version,
    Scope,
}

impl Field {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"groupId" => Some(Field::GroupId),
            b"artifactId" => Some(Field::ArtifactId),
            b"version" => Some(Field::Version),
            b"scope" => Some(Field::Scope),
            _ => None,
        }
    }
}

/// Fields gathered so far for the dependency being read
#[derive(Debug, Default)]
struct PendingDependency {
    /// Elements currently open below the dependency element
    depth: usize,
    field: Option<Field>,
    group_id: Option<String>,
    artifact_id: Option<String>,
    version: Option<String>,
    scope: Option<String>,
}

impl PendingDependency {
    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::GroupId => &mut self.group_id,
            Field::ArtifactId => &mut self.artifact_id,
            Field::Version => &mut self.version,
            Field::Scope => &mut self.scope,
        }
    }

    fn append_text(&mut self, text: &str) {
        if self.depth != 1 {
            return;
        }
        if let Some(field) = self.field {
            self.slot(field).get_or_insert_with(String::new).push_str(text);
        }
    }

    /// Turn the gathered fields into a record, if they describe a runtime dependency
    fn into_dependency(self, version_position: SourcePosition) -> Option<Dependency> {
        let non_empty = |v: Option<String>| {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        };

        let group_id = non_empty(self.group_id)?;
        let artifact_id = non_empty(self.artifact_id)?;
        let version = non_empty(self.version)?;
        if let Some(scope) = non_empty(self.scope)
            && !RUNTIME_SCOPES.contains(&scope.as_str())
        {
            tracing::debug!("Skipping {}:{} with scope {}", group_id, artifact_id, scope);
            return None;
        }

        Some(Dependency::new(
            PositionedValue::placeholder(format!("{group_id}:{artifact_id}")),
            PositionedValue::new(version, version_position),
        ))
    }
}

#[derive(Debug)]
enum State {
    Outside,
    InsideDependency(PendingDependency),
}

/// Event-driven assembly of dependency records
struct StateMachine<'a> {
    element: &'a [u8],
    state: State,
    /// Position just past the most recent `<version>` open tag
    version_position: SourcePosition,
    dependencies: Vec<Dependency>,
}

impl<'a> StateMachine<'a> {
    fn new(element: &'a [u8]) -> Self {
        Self {
            element,
            state: State::Outside,
            version_position: SourcePosition::PLACEHOLDER,
            dependencies: Vec::new(),
        }
    }

    fn on_event(&mut self, event: &Event<'_>, cursor: SourcePosition) {
        match event {
            Event::Start(e) => self.on_open(e.local_name().as_ref(), cursor),
            Event::Empty(e) => {
                let name = e.local_name();
                self.on_open(name.as_ref(), cursor);
                self.on_close(name.as_ref());
            }
            Event::End(e) => self.on_close(e.local_name().as_ref()),
            Event::Text(t) => self.on_text(&String::from_utf8_lossy(t)),
            Event::CData(t) => self.on_text(&String::from_utf8_lossy(t)),
            Event::GeneralRef(r) => self.on_text(&resolve_reference(r)),
            _ => {}
        }
    }

    fn on_open(&mut self, name: &[u8], cursor: SourcePosition) {
        if name == self.element {
            // A single flag: a nested unit restarts assembly
            self.state = State::InsideDependency(PendingDependency::default());
            return;
        }

        if let State::InsideDependency(pending) = &mut self.state {
            pending.depth += 1;
            pending.field = if pending.depth == 1 {
                Field::from_name(name)
            } else {
                None
            };
            if pending.field == Some(Field::Version) {
                self.version_position = cursor;
            }
        }
    }

    fn on_close(&mut self, name: &[u8]) {
        if name == self.element {
            let state = std::mem::replace(&mut self.state, State::Outside);
            if let State::InsideDependency(pending) = state
                && let Some(dep) = pending.into_dependency(self.version_position)
            {
                self.dependencies.push(dep);
            }
            return;
        }

        if let State::InsideDependency(pending) = &mut self.state {
            pending.depth = pending.depth.saturating_sub(1);
            pending.field = None;
        }
    }

    fn on_text(&mut self, text: &str) {
        if let State::InsideDependency(pending) = &mut self.state {
            pending.append_text(text);
        }
    }

    fn finish(self) -> Vec<Dependency> {
        self.dependencies
    }
}

/// Text an entity or character reference stands for. Unknown entities are
/// kept verbatim.
fn resolve_reference(reference: &BytesRef<'_>) -> String {
    match reference.resolve_char_ref() {
        Ok(Some(ch)) => return ch.to_string(),
        Ok(None) => {}
        Err(e) => tracing::debug!("Invalid character reference: {}", e),
    }
    let name = String::from_utf8_lossy(reference);
    match resolve_predefined_entity(&name) {
        Some(text) => text.to_string(),
        None => format!("&{name};"),
    }
}

/// Buffered reader that tracks the 1-based line and column of the next
/// unread character.
struct PositionTracker<R> {
    inner: R,
    line: u32,
    column: u32,
}

impl<R: BufRead> PositionTracker<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            line: 1,
            column: 1,
        }
    }

    fn position(&self) -> SourcePosition {
        SourcePosition::new(self.line, self.column)
    }
}

impl<R: BufRead> Read for PositionTracker<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = {
            let available = self.inner.fill_buf()?;
            let n = available.len().min(out.len());
            out[..n].copy_from_slice(&available[..n]);
            n
        };
        self.consume(n);
        Ok(n)
    }
}

impl<R: BufRead> BufRead for PositionTracker<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        let Self {
            inner,
            line,
            column,
        } = self;
        if let Ok(available) = inner.fill_buf() {
            for &b in &available[..amt.min(available.len())] {
                if b == b'\n' {
                    *line += 1;
                    *column = 1;
                } else if b & 0xC0 != 0x80 {
                    // continuation bytes of multi-byte characters do not count
                    *column += 1;
                }
            }
        }
        inner.consume(amt);
    }
}
