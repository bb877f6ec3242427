//! Configuration file management for itinera.
//!
//! Provides a TOML-based config file at `~/.config/itinera/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use itinera_core::workflow::WorkflowConfig;
use itinera_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    pub workflow: WorkflowSection,
    pub server: ServerSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkflowSection {
    /// Base URL of the AI workflow API, without a trailing slash.
    pub base_url: String,
    /// Identifier of the itinerary-generation workflow.
    pub workflow_id: String,
    /// Bearer token for the workflow API.
    pub api_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerSection {
    /// Bearer key required by the operator endpoints (credit purchases).
    /// Hex-encoded (64 hex chars = 32 bytes).
    pub api_key: String,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the itinera config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/itinera` or `~/.config/itinera`.
/// We intentionally ignore the platform-specific `dirs::config_dir()`
/// (which returns `~/Library/Application Support` on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("itinera");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("itinera")
}

/// Return the path to the itinera config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix (it holds bearer tokens).
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Operator key generation
// -----------------------------------------------------------------------

/// Generate a random operator API key: 32 random bytes, hex-encoded (64 chars).
pub fn generate_api_key() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct ItineraConfig {
    pub db_config: DbConfig,
    pub workflow: WorkflowConfig,
    pub api_key: String,
}

/// Resolve just the database config: CLI flag > `ITINERA_DATABASE_URL` env >
/// config file > default. Commands that never touch the workflow service use
/// this lighter chain.
pub fn resolve_db(cli_db_url: Option<&str>) -> DbConfig {
    if let Some(url) = cli_db_url {
        return DbConfig::new(url);
    }
    if let Ok(url) = std::env::var("ITINERA_DATABASE_URL") {
        return DbConfig::new(url);
    }
    if let Ok(cfg) = load_config() {
        return DbConfig::new(cfg.database.url);
    }
    DbConfig::new(DbConfig::DEFAULT_URL)
}

impl ItineraConfig {
    /// Resolve the full configuration using the chain:
    /// CLI flag > env var > config file > default/error.
    ///
    /// - DB URL: as in [`resolve_db`].
    /// - Workflow: `ITINERA_WORKFLOW_URL` / `ITINERA_WORKFLOW_ID` /
    ///   `ITINERA_WORKFLOW_TOKEN` env > config file > error.
    /// - Operator key: `ITINERA_API_KEY` env > config file > error.
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        let db_config = resolve_db(cli_db_url);

        let base_url = resolve_value(
            "ITINERA_WORKFLOW_URL",
            file_config.as_ref().map(|c| c.workflow.base_url.as_str()),
        );
        let workflow_id = resolve_value(
            "ITINERA_WORKFLOW_ID",
            file_config.as_ref().map(|c| c.workflow.workflow_id.as_str()),
        );
        let api_token = resolve_value(
            "ITINERA_WORKFLOW_TOKEN",
            file_config.as_ref().map(|c| c.workflow.api_token.as_str()),
        );

        let (Some(base_url), Some(workflow_id), Some(api_token)) =
            (base_url, workflow_id, api_token)
        else {
            bail!(
                "workflow service not configured; set ITINERA_WORKFLOW_URL, \
                 ITINERA_WORKFLOW_ID and ITINERA_WORKFLOW_TOKEN, or run `itinera init` \
                 and fill in the [workflow] section"
            );
        };

        let Some(api_key) = resolve_value(
            "ITINERA_API_KEY",
            file_config.as_ref().map(|c| c.server.api_key.as_str()),
        ) else {
            bail!(
                "operator API key not found; set ITINERA_API_KEY or run `itinera init` \
                 to create a config file"
            );
        };

        Ok(Self {
            db_config,
            workflow: WorkflowConfig::new(base_url, workflow_id, api_token),
            api_key,
        })
    }
}

/// Env var if set and non-empty, else the (non-empty) file value.
fn resolve_value(env_var: &str, file_value: Option<&str>) -> Option<String> {
    if let Ok(value) = std::env::var(env_var) {
        if !value.is_empty() {
            return Some(value);
        }
    }
    file_value
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
