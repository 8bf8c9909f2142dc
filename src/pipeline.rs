//! Analysis pipeline for one manifest version
//!
//! A run collects the manifest's dependencies, fans out one metadata lookup
//! per dependency with a syntactically valid version, scans every payload
//! that comes back and, once the completion aggregator reports that every
//! dependency is resolved, emits the whole batch of diagnostics at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::{Semaphore, oneshot};
use tower_lsp::lsp_types::{Diagnostic, Url};

use crate::aggregator::CompletionAggregator;
use crate::cache::MetadataCache;
use crate::collectors::{Dependency, collector_for};
use crate::config::{CollectorConfig, Config};
use crate::error::{CollectError, LookupError};
use crate::file_types::ManifestKind;
use crate::providers::ScannerSet;
use crate::providers::diagnostics::sort_diagnostics;
use crate::registries::MetadataSource;

/// Notice shown while a batch is in flight
pub const SCAN_STARTED_MESSAGE: &str = "Checking for security vulnerabilities ...";

/// Up to four dot-separated alphanumeric segments, e.g. `1.2.3` or `2.0.0.RELEASE`
static VALID_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z0-9]+\.)?([a-zA-Z0-9]+\.)?([a-zA-Z0-9]+\.)?([a-zA-Z0-9]+)$")
        .expect("valid version regex")
});

/// Whether a lookup for this dependency can mean anything
pub fn is_valid_version(dep: &Dependency) -> bool {
    !dep.name.value.is_empty()
        && !dep.version.value.is_empty()
        && VALID_VERSION.is_match(dep.version.value.trim())
}

/// Outcome of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Dependencies collected from the manifest
    pub dependencies: usize,
    /// Diagnostics emitted for the batch
    pub diagnostics: usize,
    /// Metadata lookups issued (cache hits included)
    pub lookups: usize,
    /// Lookups that ended in an error
    pub failed_lookups: usize,
}

impl ScanSummary {
    /// Completion notice shown to the user
    pub fn message(&self) -> String {
        if self.diagnostics > 0 {
            format!(
                "Scanned {} runtime dependencies, flagged {} potential security vulnerabilities",
                self.dependencies, self.diagnostics
            )
        } else {
            format!(
                "Scanned {} runtime dependencies. No potential security vulnerabilities found",
                self.dependencies
            )
        }
    }
}

/// Sink for the events of an analysis run
#[async_trait]
pub trait AnalysisObserver: Send + Sync {
    /// Called before any lookup is issued
    async fn scan_started(&self, uri: &Url);

    /// Called once per batch, after every dependency is resolved
    async fn scan_completed(&self, uri: &Url, summary: &ScanSummary);

    /// Called once per batch with the full, sorted diagnostics list
    async fn diagnostics_ready(&self, uri: &Url, diagnostics: Vec<Diagnostic>);

    /// Called for every failed lookup. Failures never reach the diagnostics.
    fn lookup_failed(&self, uri: &Url, dependency: &Dependency, error: &LookupError) {
        tracing::warn!(
            "Lookup failed for {}@{} in {}: {}",
            dependency.name.value,
            dependency.version.value,
            uri,
            error
        );
    }
}

/// Wires collectors, the metadata cache and the scanners together
pub struct Pipeline {
    cache: Arc<MetadataCache>,
    scanners: Arc<ScannerSet>,
    collectors: CollectorConfig,
    max_concurrent_lookups: usize,
}

impl Pipeline {
    pub fn new(
        cache: Arc<MetadataCache>,
        scanners: ScannerSet,
        collectors: CollectorConfig,
        max_concurrent_lookups: usize,
    ) -> Self {
        Self {
            cache,
            scanners: Arc::new(scanners),
            collectors,
            max_concurrent_lookups: max_concurrent_lookups.max(1),
        }
    }

    /// Build a pipeline with a fresh cache over `source`
    pub fn from_config(config: &Config, source: Arc<dyn MetadataSource>) -> Self {
        Self::new(
            Arc::new(MetadataCache::new(source)),
            ScannerSet::from_config(&config.analysis),
            config.collectors.clone(),
            config.analysis.max_concurrent_lookups,
        )
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    /// Analyze one snapshot of a manifest.
    ///
    /// Only a collector error fails the run; in that case no event is
    /// emitted. Otherwise the observer sees `scan_started`, then exactly one
    /// `scan_completed` and one `diagnostics_ready`, even if every lookup
    /// failed.
    pub async fn analyze(
        &self,
        uri: &Url,
        kind: ManifestKind,
        content: &str,
        observer: Arc<dyn AnalysisObserver>,
    ) -> Result<ScanSummary, CollectError> {
        let dependencies = Arc::new(collector_for(kind, &self.collectors).collect(content)?);
        tracing::info!(
            "Collected {} dependencies from {}",
            dependencies.len(),
            uri.path()
        );

        observer.scan_started(uri).await;

        let (done_tx, done_rx) = oneshot::channel();
        let aggregator = Arc::new(CompletionAggregator::new(dependencies.len(), move || {
            let _ = done_tx.send(());
        }));

        let diagnostics = Arc::new(Mutex::new(Vec::new()));
        let failed = Arc::new(AtomicUsize::new(0));
        let limiter = Arc::new(Semaphore::new(self.max_concurrent_lookups));
        let ecosystem = kind.ecosystem();
        let mut lookups = 0;

        for (index, dep) in dependencies.iter().enumerate() {
            if !is_valid_version(dep) {
                tracing::debug!(
                    "Skipping lookup for {:?}@{:?}",
                    dep.name.value,
                    dep.version.value
                );
                resolve(&aggregator, index);
                continue;
            }
            lookups += 1;

            let guard = ResolveOnDrop {
                aggregator: Arc::clone(&aggregator),
                index,
            };
            let dependencies = Arc::clone(&dependencies);
            let diagnostics = Arc::clone(&diagnostics);
            let failed = Arc::clone(&failed);
            let limiter = Arc::clone(&limiter);
            let cache = Arc::clone(&self.cache);
            let scanners = Arc::clone(&self.scanners);
            let observer = Arc::clone(&observer);
            let uri = uri.clone();

            tokio::spawn(async move {
                // resolves the dependency on every exit path, panics included
                let _guard = guard;
                let _permit = limiter.acquire_owned().await;
                let dep = &dependencies[index];

                match cache
                    .lookup(ecosystem, &dep.name.value, dep.version.value.trim())
                    .await
                {
                    Ok(metadata) => {
                        let found = scanners.scan(dep, &metadata);
                        if !found.is_empty() {
                            lock(&diagnostics).extend(found);
                        }
                    }
                    Err(e) => {
                        failed.fetch_add(1, Ordering::Relaxed);
                        observer.lookup_failed(&uri, dep, &e);
                    }
                }
            });
        }

        if done_rx.await.is_err() {
            tracing::error!("Batch for {} was dropped before completing", uri);
        }

        let mut diagnostics = std::mem::take(&mut *lock(&diagnostics));
        sort_diagnostics(&mut diagnostics);

        let summary = ScanSummary {
            dependencies: dependencies.len(),
            diagnostics: diagnostics.len(),
            lookups,
            failed_lookups: failed.load(Ordering::Relaxed),
        };
        tracing::info!("{} ({})", summary.message(), uri.path());
        tracing::debug!("{}", self.cache.stats());

        observer.scan_completed(uri, &summary).await;
        observer.diagnostics_ready(uri, diagnostics).await;

        Ok(summary)
    }
}

/// Marks one dependency resolved when dropped
struct ResolveOnDrop {
    aggregator: Arc<CompletionAggregator>,
    index: usize,
}

impl Drop for ResolveOnDrop {
    fn drop(&mut self) {
        resolve(&self.aggregator, self.index);
    }
}

fn resolve(aggregator: &CompletionAggregator, index: usize) {
    if let Err(e) = aggregator.mark_resolved(index) {
        tracing::error!("{}", e);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
