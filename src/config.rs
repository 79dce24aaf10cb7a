//! Application configuration.
//!
//! Resolution order, later wins:
//! 1. Built-in defaults
//! 2. YAML file: `--config` / `CAPDISPATCH_CONFIG`, else `capdispatch.yaml`
//!    found by walking up from the current directory (optional)
//! 3. Environment: `MCP_SERVER_URL`, `OPENAI_API_KEY`, `OPENAI_BASE_URL`,
//!    `OPENAI_MODEL`
//! 4. CLI flags (applied by the binary)
//!
//! String values in the file may use `${VAR}` or `${VAR:-default}`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::a2a::AgentMode;
use crate::agent_core::{Directive, Dispatcher, RefreshPolicy, SessionOptions};
use crate::inference::ModelConfig;

/// File name looked up when no explicit config path is given.
pub const CONFIG_FILE_NAME: &str = "capdispatch.yaml";

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    /// A setting the requested command needs is not configured.
    #[error("missing required setting: {setting}")]
    MissingSetting { setting: String },

    #[error("invalid value for {setting}: {reason}")]
    Invalid { setting: String, reason: String },
}

// ─── Sections ────────────────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mcp: McpConfig,
    pub model: ModelConfig,
    pub session: SessionConfig,
    pub agent: AgentConfig,
}

/// The remote capability server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// JSON-RPC endpoint, e.g. `http://localhost:8888/mcp`.
    pub url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            url: None,
            request_timeout_secs: 30,
        }
    }
}

/// Session loop behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub refresh_policy: RefreshPolicy,
    /// Check directive arguments against the tool schema before invoking.
    pub validate_arguments: bool,
    /// Extra attempts for resource reads failing with a transient error.
    pub resource_retries: u32,
    pub exit_keywords: Vec<String>,
    /// Directive used when the model output cannot be used.
    pub fallback: Option<Directive>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let options = SessionOptions::default();
        Self {
            refresh_policy: options.refresh_policy,
            validate_arguments: false,
            resource_retries: 0,
            exit_keywords: options.exit_keywords,
            fallback: None,
        }
    }
}

/// The A2A agent server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub bind: String,
    pub port: u16,
    /// URL advertised on the agent card. Defaults to `http://localhost:{port}/`.
    pub public_url: Option<String>,
    pub mode: AgentMode,
    /// Bearer token guarding the extended card. `None` serves it openly.
    pub extended_card_token: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 9999,
            public_url: None,
            mode: AgentMode::default(),
            extended_card_token: None,
        }
    }
}

impl AgentConfig {
    pub fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}/", self.port))
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load the config file (if any) and apply environment overrides.
    ///
    /// An explicit path must exist; the discovered file is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => std::env::current_dir()
                .ok()
                .and_then(|cwd| find_config_path(&cwd)),
        };

        let mut config = match &path {
            Some(path) => load_config_file(path)?,
            None => AppConfig::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());

        tracing::debug!(
            config_file = ?path,
            mcp_url = ?config.mcp.url,
            model = %config.model.model,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Apply environment overrides from `lookup`. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("MCP_SERVER_URL") {
            self.mcp.url = Some(url);
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Some(base_url) = get("OPENAI_BASE_URL") {
            self.model.base_url = base_url;
        }
        if let Some(model) = get("OPENAI_MODEL") {
            self.model.model = model;
        }
    }

    /// The capability server URL, or `MissingSetting`.
    pub fn require_mcp_url(&self) -> Result<&str, ConfigError> {
        let url = self
            .mcp
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingSetting {
                setting: "mcp.url (MCP_SERVER_URL)".into(),
            })?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                setting: "mcp.url".into(),
                reason: format!("'{url}' is not an http(s) URL"),
            });
        }
        Ok(url)
    }

    /// Check that a model credential is configured.
    pub fn require_model_credential(&self) -> Result<(), ConfigError> {
        match self.model.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(()),
            _ => Err(ConfigError::MissingSetting {
                setting: "model.api_key (OPENAI_API_KEY)".into(),
            }),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            refresh_policy: self.session.refresh_policy,
            exit_keywords: self.session.exit_keywords.clone(),
            fallback: self.session.fallback.clone(),
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.session.validate_arguments,
            self.session.resource_retries,
        )
    }
}

/// Search upward from `start` for [`CONFIG_FILE_NAME`].
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Read, interpolate and parse one config file.
pub fn load_config_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let interpolated = interpolate_env_vars(&raw);

    serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` with values from the environment.
pub fn interpolate_env_vars(input: &str) -> String {
    interpolate_with(input, |name| std::env::var(name).ok())
}

/// Replace `${VAR}` and `${VAR:-default}` using `lookup`.
fn interpolate_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr, &lookup));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr<F>(expr: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    match expr.split_once(":-") {
        Some((name, default)) => lookup(name).unwrap_or_else(|| expand_tilde(default)),
        None => lookup(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
