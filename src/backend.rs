use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::notification::Notification;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};

use crate::collectors::Dependency;
use crate::config::Config;
use crate::error::LookupError;
use crate::file_types::ManifestKind;
use crate::pipeline::{AnalysisObserver, Pipeline, SCAN_STARTED_MESSAGE, ScanSummary};
use crate::registries::ComponentAnalysisClient;
use crate::registries::http_client::create_shared_client;

/// Progress notification understood by the editor extension
pub enum CaNotification {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaNotificationParams {
    /// Text shown to the user
    pub data: String,
    /// Number of diagnostics in the finished batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diag_count: Option<usize>,
}

impl Notification for CaNotification {
    type Params = CaNotificationParams;
    const METHOD: &'static str = "caNotification";
}

/// Per-document analysis generations.
///
/// Every edit, save or close bumps the document's generation; a run only
/// starts, and only publishes, while its generation is still current.
#[derive(Debug, Default)]
pub struct GenerationTracker {
    generations: DashMap<Url, u64>,
}

impl GenerationTracker {
    /// Start a new generation and return it
    pub fn bump(&self, uri: &Url) -> u64 {
        let mut generation = self.generations.entry(uri.clone()).or_insert(0);
        *generation += 1;
        *generation
    }

    pub fn current(&self, uri: &Url) -> Option<u64> {
        self.generations.get(uri).map(|g| *g)
    }

    pub fn is_current(&self, uri: &Url, generation: u64) -> bool {
        self.current(uri) == Some(generation)
    }

    /// Wait out `delay`, then drive `task` only if `generation` is still
    /// current. Returns whether the task ran.
    pub async fn run_if_current<F>(
        &self,
        uri: &Url,
        generation: u64,
        delay: Option<Duration>,
        task: F,
    ) -> bool
    where
        F: Future<Output = ()>,
    {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.is_current(uri, generation) {
            tracing::debug!("Analysis of {} superseded before start", uri);
            return false;
        }
        task.await;
        true
    }
}

/// Editor-facing side effects of an analysis run
#[async_trait]
pub trait EditorSink: Clone + Send + Sync + 'static {
    async fn notify(&self, params: CaNotificationParams);

    async fn publish(&self, uri: Url, diagnostics: Vec<Diagnostic>);

    async fn log(&self, level: MessageType, message: String);
}

#[async_trait]
impl EditorSink for Client {
    async fn notify(&self, params: CaNotificationParams) {
        self.send_notification::<CaNotification>(params).await;
    }

    async fn publish(&self, uri: Url, diagnostics: Vec<Diagnostic>) {
        self.publish_diagnostics(uri, diagnostics, None).await;
    }

    async fn log(&self, level: MessageType, message: String) {
        self.log_message(level, message).await;
    }
}

struct BackendState {
    client: Client,
    /// Configuration
    config: RwLock<Config>,
    http_client: Arc<HttpClient>,
    /// Latest known text of each open manifest
    documents: DashMap<Url, String>,
    generations: Arc<GenerationTracker>,
    /// Rebuilt when configuration changes; runs in flight keep their own
    pipeline: RwLock<Arc<Pipeline>>,
}

impl BackendState {
    fn pipeline(&self) -> Arc<Pipeline> {
        match self.pipeline.read() {
            Ok(pipeline) => Arc::clone(&pipeline),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn config(&self) -> Config {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

fn build_pipeline(config: &Config, http_client: Arc<HttpClient>) -> Pipeline {
    let source = ComponentAnalysisClient::with_client(http_client, config.server.clone());
    Pipeline::from_config(config, Arc::new(source))
}

pub struct AnalyticsBackend {
    state: Arc<BackendState>,
}

impl AnalyticsBackend {
    pub fn new(client: Client) -> Self {
        Self::with_http_client(client, None)
    }

    pub fn with_http_client(client: Client, http_client: Option<Arc<HttpClient>>) -> Self {
        let http_client = http_client.unwrap_or_else(|| {
            create_shared_client().expect("Failed to create shared HTTP client")
        });
        let config = Config::default();
        let pipeline = build_pipeline(&config, Arc::clone(&http_client));

        Self {
            state: Arc::new(BackendState {
                client,
                config: RwLock::new(config),
                http_client,
                documents: DashMap::new(),
                generations: Arc::new(GenerationTracker::default()),
                pipeline: RwLock::new(Arc::new(pipeline)),
            }),
        }
    }

    /// Record a new snapshot of `uri` and analyze it, after `debounce` when given
    fn schedule(&self, uri: Url, content: String, debounce: Option<Duration>) {
        let Some(kind) = ManifestKind::detect(&uri) else {
            return;
        };

        self.state.documents.insert(uri.clone(), content.clone());
        let generation = self.state.generations.bump(&uri);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let generations = Arc::clone(&state.generations);
            let run = analyze(state, uri.clone(), kind, content, generation);
            generations
                .run_if_current(&uri, generation, debounce, run)
                .await;
        });
    }
}

async fn analyze(state: Arc<BackendState>, uri: Url, kind: ManifestKind, content: String, generation: u64) {
    let diagnostics_enabled = state
        .config
        .read()
        .map(|c| c.analysis.diagnostics_enabled)
        .unwrap_or(true);
    let pipeline = state.pipeline();
    let observer = Arc::new(LspObserver {
        sink: state.client.clone(),
        generations: Arc::clone(&state.generations),
        generation,
        diagnostics_enabled,
    });

    if let Err(e) = pipeline.analyze(&uri, kind, &content, observer).await {
        tracing::warn!("Could not read dependencies from {}: {}", uri, e);
        state
            .client
            .log_message(MessageType::WARNING, format!("{}: {}", uri.path(), e))
            .await;
    }
}

/// Forwards pipeline events to the editor. Results of a run whose
/// generation is no longer current are dropped.
struct LspObserver<S> {
    sink: S,
    generations: Arc<GenerationTracker>,
    generation: u64,
    diagnostics_enabled: bool,
}

impl<S> LspObserver<S> {
    fn is_stale(&self, uri: &Url) -> bool {
        !self.generations.is_current(uri, self.generation)
    }
}

#[async_trait]
impl<S: EditorSink> AnalysisObserver for LspObserver<S> {
    async fn scan_started(&self, _uri: &Url) {
        self.sink
            .notify(CaNotificationParams {
                data: SCAN_STARTED_MESSAGE.to_string(),
                diag_count: None,
            })
            .await;
    }

    async fn scan_completed(&self, uri: &Url, summary: &ScanSummary) {
        if self.is_stale(uri) {
            tracing::debug!("Dropping stale completion notice for {}", uri);
            return;
        }
        self.sink
            .notify(CaNotificationParams {
                data: summary.message(),
                diag_count: Some(summary.diagnostics),
            })
            .await;
    }

    async fn diagnostics_ready(&self, uri: &Url, diagnostics: Vec<Diagnostic>) {
        if !self.diagnostics_enabled {
            return;
        }
        if self.is_stale(uri) {
            tracing::debug!(
                "Dropping {} stale diagnostics for {} (generation {})",
                diagnostics.len(),
                uri,
                self.generation
            );
            return;
        }
        self.sink.publish(uri.clone(), diagnostics).await;
    }

    fn lookup_failed(&self, uri: &Url, dependency: &Dependency, error: &LookupError) {
        tracing::warn!(
            "Lookup failed for {}@{} in {}: {}",
            dependency.name.value,
            dependency.version.value,
            uri.path(),
            error
        );
        let sink = self.sink.clone();
        let message = format!(
            "Could not scan {}@{}: {}",
            dependency.name.value, dependency.version.value, error
        );
        tokio::spawn(async move {
            sink.log(MessageType::WARNING, message).await;
        });
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for AnalyticsBackend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        let config = Config::resolve(params.initialization_options);
        tracing::info!("Configuration: {:?}", config);

        let pipeline = build_pipeline(&config, Arc::clone(&self.state.http_client));
        if let Ok(mut current) = self.state.pipeline.write() {
            *current = Arc::new(pipeline);
        }
        if let Ok(mut cfg) = self.state.config.write() {
            *cfg = config;
        }

        Ok(InitializeResult {
            server_info: Some(ServerInfo {
                name: "analytics-lsp".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(
                    TextDocumentSyncOptions {
                        open_close: Some(true),
                        change: Some(TextDocumentSyncKind::FULL),
                        save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
                            include_text: Some(true),
                        })),
                        ..Default::default()
                    },
                )),
                ..Default::default()
            },
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        self.state
            .client
            .log_message(MessageType::INFO, "Dependency analytics LSP initialized")
            .await;

        if !self.state.config().server.is_configured() {
            self.state
                .client
                .log_message(
                    MessageType::WARNING,
                    "No metadata server configured; set RECOMMENDER_API_URL or ~/.analysis_rc",
                )
                .await;
        }

        tracing::info!("Dependency analytics LSP initialized");
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::info!(
            "Dependency analytics LSP shutting down ({})",
            self.state.pipeline().cache().stats()
        );
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        tracing::debug!("Document opened: {}", uri);
        self.schedule(uri, params.text_document.text, None);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;

        // With FULL sync, the last change carries the entire document
        if let Some(change) = params.content_changes.into_iter().last() {
            tracing::debug!("Document changed: {}", uri);
            let debounce = self.state.config().analysis.debounce();
            self.schedule(uri, change.text, Some(debounce));
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;
        let text = params
            .text
            .or_else(|| self.state.documents.get(&uri).map(|doc| doc.clone()));

        if let Some(text) = text {
            tracing::debug!("Document saved: {}", uri);
            self.schedule(uri, text, None);
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        tracing::debug!("Document closed: {}", uri);
        self.state.documents.remove(&uri);
        self.state.generations.bump(&uri);

        // Clear diagnostics for this document
        self.state.client.publish_diagnostics(uri, vec![], None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_types::Ecosystem;
    use crate::registries::{Metadata, MetadataSource};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    enum SinkEvent {
        Notified(CaNotificationParams),
        Published(Url, usize),
        Logged(String),
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        events: Arc<Mutex<Vec<SinkEvent>>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<SinkEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EditorSink for RecordingSink {
        async fn notify(&self, params: CaNotificationParams) {
            self.events.lock().unwrap().push(SinkEvent::Notified(params));
        }

        async fn publish(&self, uri: Url, diagnostics: Vec<Diagnostic>) {
            self.events
                .lock()
                .unwrap()
                .push(SinkEvent::Published(uri, diagnostics.len()));
        }

        async fn log(&self, _level: MessageType, message: String) {
            self.events.lock().unwrap().push(SinkEvent::Logged(message));
        }
    }

    /// Flags every dependency; optionally starts a newer generation of
    /// the document while the lookup is in flight
    struct VulnerableSource {
        generations: Arc<GenerationTracker>,
        supersede: bool,
    }

    #[async_trait]
    impl MetadataSource for VulnerableSource {
        async fn fetch(
            &self,
            _ecosystem: Ecosystem,
            _name: &str,
            _version: &str,
        ) -> std::result::Result<Metadata, LookupError> {
            if self.supersede {
                self.generations.bump(&uri());
            }
            Ok(json!({"result": {"recommendation": {
                "component-analyses": {"cve": [{"id": "CVE-1", "cvss": 9.0}]}
            }}}))
        }
    }

    fn uri() -> Url {
        Url::parse("file:///project/requirements.txt").unwrap()
    }

    async fn run_analysis(supersede: bool) -> (ScanSummary, Vec<SinkEvent>) {
        let generations = Arc::new(GenerationTracker::default());
        let generation = generations.bump(&uri());
        let source = VulnerableSource {
            generations: Arc::clone(&generations),
            supersede,
        };
        let pipeline = Pipeline::from_config(&Config::default(), Arc::new(source));
        let sink = RecordingSink::default();
        let observer = Arc::new(LspObserver {
            sink: sink.clone(),
            generations,
            generation,
            diagnostics_enabled: true,
        });

        let summary = pipeline
            .analyze(&uri(), ManifestKind::Requirements, "vuln==1.0\n", observer)
            .await
            .unwrap();
        (summary, sink.events())
    }

    fn started() -> SinkEvent {
        SinkEvent::Notified(CaNotificationParams {
            data: SCAN_STARTED_MESSAGE.to_string(),
            diag_count: None,
        })
    }

    #[tokio::test]
    async fn test_current_run_publishes() {
        let (summary, events) = run_analysis(false).await;
        assert_eq!(summary.diagnostics, 1);
        assert_eq!(
            events,
            vec![
                started(),
                SinkEvent::Notified(CaNotificationParams {
                    data: summary.message(),
                    diag_count: Some(1),
                }),
                SinkEvent::Published(uri(), 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_run_superseded_mid_flight_publishes_nothing() {
        let (summary, events) = run_analysis(true).await;

        // the batch still completes, only its results are withheld
        assert_eq!(summary.diagnostics, 1);
        assert_eq!(events, vec![started()]);
    }

    #[tokio::test]
    async fn test_superseded_run_never_starts() {
        let tracker = Arc::new(GenerationTracker::default());
        let first = tracker.bump(&uri());
        let started = Arc::new(AtomicBool::new(false));

        let pending = {
            let tracker = Arc::clone(&tracker);
            let started = Arc::clone(&started);
            tokio::spawn(async move {
                tracker
                    .run_if_current(&uri(), first, Some(Duration::from_millis(50)), async move {
                        started.store(true, Ordering::SeqCst);
                    })
                    .await
            })
        };
        let second = tracker.bump(&uri());

        assert!(!pending.await.unwrap());
        assert!(!started.load(Ordering::SeqCst));

        let ran = tracker
            .run_if_current(&uri(), second, None, async {
                started.store(true, Ordering::SeqCst);
            })
            .await;
        assert!(ran);
        assert!(started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_lookup_is_logged_to_the_editor() {
        let sink = RecordingSink::default();
        let observer = LspObserver {
            sink: sink.clone(),
            generations: Arc::new(GenerationTracker::default()),
            generation: 1,
            diagnostics_enabled: true,
        };
        let dep = Dependency::new(
            crate::collectors::PositionedValue::placeholder("flask"),
            crate::collectors::PositionedValue::placeholder("1.0"),
        );

        observer.lookup_failed(&uri(), &dep, &LookupError::Unauthorized);
        for _ in 0..10 {
            if !sink.events().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(
            sink.events(),
            vec![SinkEvent::Logged(format!(
                "Could not scan flask@1.0: {}",
                LookupError::Unauthorized
            ))]
        );
    }

    #[test]
    fn test_generation_tracker() {
        let tracker = GenerationTracker::default();
        let a = Url::parse("file:///a/package.json").unwrap();
        let b = Url::parse("file:///b/package.json").unwrap();

        assert_eq!(tracker.current(&a), None);
        let first = tracker.bump(&a);
        assert!(tracker.is_current(&a, first));

        let second = tracker.bump(&a);
        assert!(second > first);
        assert!(!tracker.is_current(&a, first));
        assert!(tracker.is_current(&a, second));

        assert!(!tracker.is_current(&b, first));
        assert_eq!(tracker.bump(&b), 1);
    }

    #[test]
    fn test_notification_params_serialization() {
        let started = CaNotificationParams {
            data: SCAN_STARTED_MESSAGE.to_string(),
            diag_count: None,
        };
        assert_eq!(
            serde_json::to_value(&started).unwrap(),
            json!({"data": "Checking for security vulnerabilities ..."})
        );

        let done = CaNotificationParams {
            data: "Scanned 2 runtime dependencies".to_string(),
            diag_count: Some(0),
        };
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            json!({"data": "Scanned 2 runtime dependencies", "diagCount": 0})
        );
        assert_eq!(CaNotification::METHOD, "caNotification");
    }
}
