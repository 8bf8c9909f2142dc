//! Remote metadata lookups
//!
//! The pipeline only sees the [`MetadataSource`] trait. The shipped
//! implementation talks to a component-analysis service over HTTP; tests
//! substitute in-memory sources.

use async_trait::async_trait;

use crate::error::LookupError;
use crate::file_types::Ecosystem;

pub mod component_analysis;
pub mod http_client;

pub use component_analysis::ComponentAnalysisClient;

/// Metadata payload for one (ecosystem, name, version) triple.
///
/// Its shape is ecosystem specific and opaque to the lookup layer; only the
/// scanners look inside.
pub type Metadata = serde_json::Value;

/// Trait for fetching dependency metadata from a remote service
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch metadata for one dependency version.
    ///
    /// Every failure mode maps to a distinct [`LookupError`] variant.
    async fn fetch(
        &self,
        ecosystem: Ecosystem,
        name: &str,
        version: &str,
    ) -> Result<Metadata, LookupError>;
}
