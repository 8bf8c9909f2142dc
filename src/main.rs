use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, Url};
use tower_lsp::{LspService, Server};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use analytics_lsp::backend::AnalyticsBackend;
use analytics_lsp::config::Config;
use analytics_lsp::file_types::ManifestKind;
use analytics_lsp::pipeline::{AnalysisObserver, Pipeline, SCAN_STARTED_MESSAGE, ScanSummary};
use analytics_lsp::registries::ComponentAnalysisClient;

#[derive(Parser)]
#[command(name = "analytics-lsp")]
#[command(about = "Language server flagging vulnerable dependencies", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Summary,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the LSP server (default behavior)
    Lsp,
    /// Scan a manifest once and exit with code 1 if issues are flagged
    Scan {
        /// Path to package.json, pom.xml or a requirements file
        #[arg(short, long)]
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "summary")]
        output: OutputFormat,

        /// Exit with code 1 if issues are flagged
        #[arg(long, default_value = "true")]
        fail_on_issues: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Some(Commands::Scan {
            file,
            output,
            fail_on_issues,
        }) => match run_scan(&file, output).await {
            Ok(summary) if fail_on_issues && summary.diagnostics > 0 => ExitCode::FAILURE,
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::FAILURE
            }
        },
        Some(Commands::Lsp) | None => {
            run_lsp().await;
            ExitCode::SUCCESS
        }
    }
}

async fn run_lsp() {
    tracing::info!("Starting dependency analytics LSP server");

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(AnalyticsBackend::new);
    Server::new(stdin, stdout, socket).serve(service).await;
}

/// Collects pipeline events for printing once the batch is done
#[derive(Default)]
struct ConsoleObserver {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

#[async_trait]
impl AnalysisObserver for ConsoleObserver {
    async fn scan_started(&self, _uri: &Url) {
        eprintln!("{SCAN_STARTED_MESSAGE}");
    }

    async fn scan_completed(&self, _uri: &Url, summary: &ScanSummary) {
        eprintln!("{}", summary.message());
    }

    async fn diagnostics_ready(&self, _uri: &Url, diagnostics: Vec<Diagnostic>) {
        if let Ok(mut slot) = self.diagnostics.lock() {
            *slot = diagnostics;
        }
    }
}

async fn run_scan(file: &Path, output: OutputFormat) -> anyhow::Result<ScanSummary> {
    let kind = file
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(ManifestKind::from_file_name)
        .with_context(|| format!("Unsupported manifest: {}", file.display()))?;

    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Error reading {}", file.display()))?;

    let absolute = std::path::absolute(file)?;
    let uri = Url::from_file_path(&absolute)
        .map_err(|_| anyhow::anyhow!("Cannot build a URI for {}", absolute.display()))?;

    let config = Config::resolve(None);
    if !config.server.is_configured() {
        anyhow::bail!("No metadata server configured; set RECOMMENDER_API_URL or ~/.analysis_rc");
    }
    let source = ComponentAnalysisClient::new(config.server.clone())?;
    let pipeline = Pipeline::from_config(&config, Arc::new(source));

    let observer = Arc::new(ConsoleObserver::default());
    let summary = pipeline
        .analyze(&uri, kind, &content, observer.clone())
        .await?;

    let diagnostics = observer
        .diagnostics
        .lock()
        .map(|d| d.clone())
        .unwrap_or_default();
    print_report(file, &summary, &diagnostics, output)?;

    Ok(summary)
}

fn print_report(
    file: &Path,
    summary: &ScanSummary,
    diagnostics: &[Diagnostic],
    output: OutputFormat,
) -> anyhow::Result<()> {
    match output {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "file": file.display().to_string(),
                "summary": {
                    "dependencies": summary.dependencies,
                    "lookups": summary.lookups,
                    "failed_lookups": summary.failed_lookups,
                    "issues": summary.diagnostics,
                },
                "issues": diagnostics,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Summary => {
            println!("Dependency scan results for {}\n", file.display());
            for diag in diagnostics {
                let label = match diag.severity {
                    Some(DiagnosticSeverity::ERROR) => "error",
                    Some(DiagnosticSeverity::WARNING) => "warning",
                    _ => "info",
                };
                println!(
                    "  {}:{}  {:<7}  {}",
                    diag.range.start.line + 1,
                    diag.range.start.character + 1,
                    label,
                    diag.message
                );
            }
            if summary.failed_lookups > 0 {
                println!(
                    "\n  {} of {} lookups failed; see the log for details",
                    summary.failed_lookups, summary.lookups
                );
            }
            println!("\n{}", summary.message());
        }
    }
    Ok(())
}
