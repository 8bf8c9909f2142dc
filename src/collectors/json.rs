//! Collector for package.json manifests
//!
//! The document is deserialized with byte spans attached to every key and
//! value, then the configured dependency classes are read in configuration
//! order. Top-level properties are kept in document order rather than going
//! through a map, so duplicate and unknown keys cost nothing.

use std::fmt;

use json_spanned_value::Spanned;
use serde::de::{self, Deserialize, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde_json::Value;

use super::{Collector, Dependency, LineIndex, PositionedValue};
use crate::error::CollectError;

/// Collector for JSON package manifests
#[derive(Debug)]
pub struct JsonCollector {
    classes: Vec<String>,
}

impl Default for JsonCollector {
    fn default() -> Self {
        Self::new(vec!["dependencies".to_string()])
    }
}

impl JsonCollector {
    /// Create a collector reading the given top-level properties
    pub fn new(classes: Vec<String>) -> Self {
        Self { classes }
    }
}

impl Collector for JsonCollector {
    fn collect(&self, content: &str) -> Result<Vec<Dependency>, CollectError> {
        let manifest: Manifest = json_spanned_value::from_str(content)?;
        let index = LineIndex::new(content);
        let mut dependencies = Vec::new();

        for class in &self.classes {
            for (key, section) in &manifest.properties {
                if key.get_ref() != class {
                    continue;
                }
                let Section::Object(entries) = section else {
                    return Err(CollectError::InvalidSection {
                        class: class.clone(),
                    });
                };
                dependencies.extend(entries.iter().map(|(name, version)| {
                    Dependency::new(
                        PositionedValue::new(name.get_ref().as_str(), index.token_position(name.span().0)),
                        PositionedValue::new(
                            version_text(version.get_ref()),
                            index.token_position(version.span().0),
                        ),
                    )
                }));
            }
        }

        Ok(dependencies)
    }
}

fn version_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Top-level properties of a manifest, in document order
struct Manifest {
    properties: Vec<(Spanned<String>, Section)>,
}

/// Value of a top-level property
enum Section {
    Object(Vec<(Spanned<String>, Spanned<Value>)>),
    Other,
}

impl<'de> Deserialize<'de> for Manifest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ManifestVisitor;

        impl<'de> Visitor<'de> for ManifestVisitor {
            type Value = Manifest;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Manifest, A::Error> {
                let mut properties = Vec::new();
                while let Some(key) = map.next_key::<Spanned<String>>()? {
                    let section = map.next_value::<Section>()?;
                    properties.push((key, section));
                }
                Ok(Manifest { properties })
            }
        }

        deserializer.deserialize_map(ManifestVisitor)
    }
}

impl<'de> Deserialize<'de> for Section {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SectionVisitor;

        impl<'de> Visitor<'de> for SectionVisitor {
            type Value = Section;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("any JSON value")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Section, A::Error> {
                let mut entries = Vec::new();
                while let Some(entry) = map.next_entry::<Spanned<String>, Spanned<Value>>()? {
                    entries.push(entry);
                }
                Ok(Section::Object(entries))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Section, A::Error> {
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                Ok(Section::Other)
            }

            fn visit_bool<E: de::Error>(self, _: bool) -> Result<Section, E> {
                Ok(Section::Other)
            }

            fn visit_i64<E: de::Error>(self, _: i64) -> Result<Section, E> {
                Ok(Section::Other)
            }

            fn visit_u64<E: de::Error>(self, _: u64) -> Result<Section, E> {
                Ok(Section::Other)
            }

            fn visit_f64<E: de::Error>(self, _: f64) -> Result<Section, E> {
                Ok(Section::Other)
            }

            fn visit_str<E: de::Error>(self, _: &str) -> Result<Section, E> {
                Ok(Section::Other)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Section, E> {
                Ok(Section::Other)
            }

            fn visit_none<E: de::Error>(self) -> Result<Section, E> {
                Ok(Section::Other)
            }
        }

        deserializer.deserialize_any(SectionVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::SourcePosition;

    #[test]
    fn test_parse_dependencies() {
        let content = r#"{
  "name": "my-app",
  "dependencies": {
    "express": "4.17.1",
    "lodash": "^4.17.21"
  }
}"#;

        let deps = JsonCollector::default().collect(content).unwrap();
        assert_eq!(deps.len(), 2);

        assert_eq!(deps[0].name.value, "express");
        assert_eq!(deps[0].name.position, SourcePosition::new(4, 6));
        assert_eq!(deps[0].version.value, "4.17.1");
        assert_eq!(deps[0].version.position, SourcePosition::new(4, 17));

        assert_eq!(deps[1].name.value, "lodash");
        assert_eq!(deps[1].version.value, "^4.17.21");
        assert_eq!(deps[1].version.position.line, 5);
    }

    #[test]
    fn test_class_order_follows_configuration() {
        let content = r#"{
  "dependencies": { "a": "1.0.0" },
  "devDependencies": { "b": "2.0.0", "c": "3.0.0" }
}"#;

        let collector = JsonCollector::new(vec![
            "devDependencies".to_string(),
            "dependencies".to_string(),
        ]);
        let names: Vec<_> = collector
            .collect(content)
            .unwrap()
            .into_iter()
            .map(|d| d.name.value)
            .collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_document_order_is_preserved() {
        let content = r#"{"dependencies": {"zeta": "1", "alpha": "2", "mid": "3"}}"#;
        let names: Vec<_> = JsonCollector::default()
            .collect(content)
            .unwrap()
            .into_iter()
            .map(|d| d.name.value)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_no_matching_class_is_empty() {
        let content = r#"{"name": "x", "scripts": {"test": "jest"}, "files": ["a"], "private": true}"#;
        let deps = JsonCollector::default().collect(content).unwrap();
        assert!(deps.is_empty());
    }

    #[test]
    fn test_non_string_version_is_stringified() {
        let content = r#"{"dependencies": {"a": 1, "b": null}}"#;
        let deps = JsonCollector::default().collect(content).unwrap();
        assert_eq!(deps[0].version.value, "1");
        assert_eq!(deps[1].version.value, "null");
    }

    #[test]
    fn test_non_object_class_is_rejected() {
        let content = r#"{"dependencies": ["a", "b"]}"#;
        let err = JsonCollector::default().collect(content).unwrap_err();
        assert!(matches!(err, CollectError::InvalidSection { class } if class == "dependencies"));
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let err = JsonCollector::default()
            .collect(r#"{"dependencies": {"a": "1.0""#)
            .unwrap_err();
        assert!(matches!(err, CollectError::Json(_)));

        let err = JsonCollector::default().collect("[1, 2]").unwrap_err();
        assert!(matches!(err, CollectError::Json(_)));
    }
}
