//! Manifest kind detection and ecosystem mapping
//!
//! This module decides which collector handles a document, based on its
//! URI, and which ecosystem tag routes its metadata lookups.

use std::fmt;

use tower_lsp::lsp_types::Url;

/// Supported manifest kinds.
///
/// Each variant selects one format collector and one ecosystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestKind {
    /// npm manifest (package.json), parsed as a JSON tree
    PackageJson,
    /// Maven build descriptor (pom.xml), parsed as an XML event stream
    PomXml,
    /// pip requirement list (requirements.txt and variants), parsed line by line
    Requirements,
}

impl ManifestKind {
    /// Detect the manifest kind from a document URI.
    ///
    /// Only the file name is considered, so a directory called
    /// `requirements/` does not make every text file inside it a manifest.
    pub fn detect(uri: &Url) -> Option<Self> {
        let path = uri.path();
        let filename = path.rsplit('/').next().unwrap_or(path);
        Self::from_file_name(filename)
    }

    /// Detect the manifest kind from a bare file name.
    pub fn from_file_name(filename: &str) -> Option<Self> {
        if filename == "package.json" {
            Some(ManifestKind::PackageJson)
        } else if filename == "pom.xml" {
            Some(ManifestKind::PomXml)
        } else if filename.ends_with(".txt") && filename.contains("requirements") {
            Some(ManifestKind::Requirements)
        } else {
            None
        }
    }

    /// Ecosystem tag used for metadata lookups of this manifest's dependencies.
    pub fn ecosystem(self) -> Ecosystem {
        match self {
            ManifestKind::PackageJson => Ecosystem::Npm,
            ManifestKind::PomXml => Ecosystem::Maven,
            ManifestKind::Requirements => Ecosystem::PyPI,
        }
    }
}

/// Package source a dependency is looked up in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ecosystem {
    Npm,
    Maven,
    PyPI,
}

impl Ecosystem {
    /// Tag used in metadata cache keys and in the metadata service's URL path
    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "npm",
            Ecosystem::Maven => "maven",
            Ecosystem::PyPI => "pypi",
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
