//! Configuration management for the analytics language server
//!
//! Settings come from three places. LSP initialization options win, then
//! the `~/.analysis_rc` file, then the process environment.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::collectors::line_list::BlankLinePolicy;

/// Environment variable holding the metadata server base URL
pub const ENV_SERVER_URL: &str = "RECOMMENDER_API_URL";
/// Environment variable holding the bearer token
pub const ENV_API_TOKEN: &str = "RECOMMENDER_API_TOKEN";
/// Environment variable holding the gateway user key
pub const ENV_USER_KEY: &str = "THREE_SCALE_USER_TOKEN";

/// Name of the optional rc file in the user's home directory
const RC_FILE_NAME: &str = ".analysis_rc";

/// Default delay before re-analyzing after an edit
const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Default number of metadata requests in flight per batch
const DEFAULT_MAX_CONCURRENT_LOOKUPS: usize = 5;

/// LSP configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Metadata server connection
    pub server: ServerConfig,
    /// Format collector settings
    pub collectors: CollectorConfig,
    /// Analysis run settings
    pub analysis: AnalysisConfig,
}

/// Metadata server connection settings
#[derive(Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL, e.g. `https://recommender.example.com/api/v1`
    pub url: Option<String>,
    /// Bearer token sent with every lookup
    pub api_token: Option<String>,
    /// Gateway user key, sent as a query parameter when present
    pub user_key: Option<String>,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("url", &self.url)
            .field("api_token", &self.api_token.as_deref().map(redact_token))
            .field("user_key", &self.user_key.as_deref().map(redact_token))
            .finish()
    }
}

/// Format collector settings
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CollectorConfig {
    /// Top-level package.json properties treated as dependency containers
    pub json_classes: Vec<String>,
    /// XML element name denoting one dependency
    pub xml_element: String,
    /// What to do with blank and comment-only lines in requirement lists
    pub blank_lines: BlankLinePolicy,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            json_classes: vec!["dependencies".to_string()],
            xml_element: "dependency".to_string(),
            blank_lines: BlankLinePolicy::default(),
        }
    }
}

/// Analysis run settings
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Delay in milliseconds used to coalesce rapid edits into one run
    pub debounce_ms: u64,
    /// Upper bound on metadata requests in flight for a single batch
    pub max_concurrent_lookups: usize,
    /// SPDX identifiers that should be flagged wherever they appear
    pub forbidden_licenses: Vec<String>,
    /// Publish diagnostics at all
    pub diagnostics_enabled: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_concurrent_lookups: DEFAULT_MAX_CONCURRENT_LOOKUPS,
            forbidden_licenses: Vec::new(),
            diagnostics_enabled: true,
        }
    }
}

impl AnalysisConfig {
    /// Debounce delay as a [`Duration`]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Deserialize)]
struct RcFile {
    server: Option<String>,
}

impl ServerConfig {
    /// Fill the URL from an rc file of the form `{"server": "https://host"}`.
    ///
    /// The API prefix `/api/v1` is appended to the configured host. A missing
    /// or unreadable file is not an error.
    pub fn fill_from_rc_file(&mut self, path: &Path) {
        if self.url.is_some() {
            return;
        }

        let Ok(content) = std::fs::read_to_string(path) else {
            return;
        };

        match serde_json::from_str::<RcFile>(&content) {
            Ok(RcFile {
                server: Some(server),
            }) if !server.trim().is_empty() => {
                tracing::debug!("Using metadata server from {}", path.display());
                self.url = Some(format!("{}/api/v1", server.trim().trim_end_matches('/')));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Ignoring malformed rc file {}: {}", path.display(), e);
            }
        }
    }

    /// Fill unset fields from environment-style lookups.
    ///
    /// Takes the lookup as a function so callers (and tests) can decide
    /// where variables come from.
    pub fn fill_from_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if self.url.is_none() {
            self.url = non_empty(ENV_SERVER_URL);
        }
        if self.api_token.is_none() {
            self.api_token = non_empty(ENV_API_TOKEN);
        }
        if self.user_key.is_none() {
            self.user_key = non_empty(ENV_USER_KEY);
        }
    }

    /// Whether lookups can be issued at all
    pub fn is_configured(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }
}

impl Config {
    /// Parse configuration from initialization options
    pub fn from_init_options(options: Option<serde_json::Value>) -> Self {
        match options {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                tracing::warn!("Invalid initialization options, using defaults: {}", e);
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// Build the effective configuration: initialization options, then the
    /// rc file, then the process environment.
    pub fn resolve(options: Option<serde_json::Value>) -> Self {
        let mut config = Self::from_init_options(options);
        if let Some(path) = rc_file_path() {
            config.server.fill_from_rc_file(&path);
        }
        config
            .server
            .fill_from_env(|key| std::env::var(key).ok());
        config
    }
}

/// Location of the rc file, if a home directory is known
pub fn rc_file_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(RC_FILE_NAME))
}

/// Redact a secret for safe logging.
///
/// Only the first four characters survive, which is enough to tell tokens
/// apart without exposing them.
pub fn redact_token(token: &str) -> String {
    match token.char_indices().nth(4) {
        Some((cut, _)) => format!("{}...", &token[..cut]),
        None => "****".to_string(),
    }
}
