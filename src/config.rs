//! Application configuration: TOML file loading, CLI overrides, and defaults.
//!
//! Resolution order (first found wins, values merge/override):
//! 1. CLI flags (`--config`, `--sort`, `--json`, etc.)
//! 2. `$PAKX_CONFIG` environment variable (path to config file)
//! 3. Project-local `.pakx.toml` in the current working directory
//! 4. Global `~/.config/pakx/config.toml`
//! 5. Built-in defaults

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::tree::SortBy;

// ── Section configs ──────────────────────────────────────────────────────────

/// Tree ordering settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TreeConfig {
    /// Sort order: "name", "size", "modified", "key".
    pub sort_by: Option<String>,
    /// Directories always listed first.
    pub dirs_first: Option<bool>,
}

/// Filter settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FilterConfig {
    /// Ignore punctuation, symbols and whitespace when matching.
    pub ignore_symbols: Option<bool>,
}

/// Nested container expansion.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct NestedConfig {
    /// Expand nested archives after loading.
    pub enabled: Option<bool>,
    /// File extensions treated as nested zip archives.
    pub extensions: Option<Vec<String>>,
}

/// Output settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OutputConfig {
    /// Print JSON instead of text.
    pub json: Option<bool>,
}

// ── Top-level config ─────────────────────────────────────────────────────────

/// Top-level application configuration.
///
/// All fields are optional so that partial configs from different sources
/// can be merged together (CLI overrides file, file overrides defaults).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub tree: TreeConfig,
    pub filter: FilterConfig,
    pub nested: NestedConfig,
    pub output: OutputConfig,
}

// ── Default constants ────────────────────────────────────────────────────────

/// Extensions expanded as nested archives when none are configured.
pub const DEFAULT_NESTED_EXTENSIONS: &[&str] = &["zip", "pak"];

// ── Config file locator ──────────────────────────────────────────────────────

/// Return the list of candidate config file paths in priority order.
///
/// Does NOT include the CLI `--config` path; that is handled separately.
fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(env_path) = std::env::var("PAKX_CONFIG") {
        paths.push(PathBuf::from(env_path));
    }

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".pakx.toml"));
    }

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("pakx").join("config.toml"));
    }

    paths
}

/// Try to read and parse a TOML config file. Returns `None` if the file
/// doesn't exist or can't be parsed (with a warning logged).
fn load_file(path: &Path) -> Option<AppConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return None,
    };
    match toml::from_str::<AppConfig>(&content) {
        Ok(cfg) => {
            log::debug!("loaded config from {}", path.display());
            Some(cfg)
        }
        Err(e) => {
            log::warn!("failed to parse config file {}: {}", path.display(), e);
            None
        }
    }
}

// ── Merge logic ──────────────────────────────────────────────────────────────

impl AppConfig {
    /// Merge `other` on top of `self`; `other`'s `Some` values win.
    pub fn merge(self, other: &AppConfig) -> AppConfig {
        AppConfig {
            tree: TreeConfig {
                sort_by: other.tree.sort_by.clone().or(self.tree.sort_by),
                dirs_first: other.tree.dirs_first.or(self.tree.dirs_first),
            },
            filter: FilterConfig {
                ignore_symbols: other.filter.ignore_symbols.or(self.filter.ignore_symbols),
            },
            nested: NestedConfig {
                enabled: other.nested.enabled.or(self.nested.enabled),
                extensions: other
                    .nested
                    .extensions
                    .clone()
                    .or(self.nested.extensions),
            },
            output: OutputConfig {
                json: other.output.json.or(self.output.json),
            },
        }
    }

    /// Load the final merged configuration.
    ///
    /// `cli_config_path` is an explicit config file path from `--config`.
    /// `cli_overrides` are partial overrides derived from CLI flags.
    pub fn load(cli_config_path: Option<&Path>, cli_overrides: Option<&AppConfig>) -> AppConfig {
        let mut config = AppConfig::default();

        // Lowest priority first so higher ones overwrite.
        for path in candidate_paths().iter().rev() {
            if let Some(file_cfg) = load_file(path) {
                config = config.merge(&file_cfg);
            }
        }

        if let Some(cli_path) = cli_config_path {
            match load_file(cli_path) {
                Some(file_cfg) => config = config.merge(&file_cfg),
                None => log::warn!("config file {} not loaded", cli_path.display()),
            }
        }

        if let Some(overrides) = cli_overrides {
            config = config.merge(overrides);
        }

        config
    }

    // ── Convenience getters with built-in defaults ──────────────────────────

    pub fn sort_by(&self) -> SortBy {
        SortBy::from_str(self.tree.sort_by.as_deref().unwrap_or("name"))
    }

    /// Whether directories are listed before files.
    pub fn dirs_first(&self) -> bool {
        self.tree.dirs_first.unwrap_or(true)
    }

    pub fn ignore_symbols(&self) -> bool {
        self.filter.ignore_symbols.unwrap_or(true)
    }

    /// Whether nested archives are expanded after loading.
    pub fn nested_enabled(&self) -> bool {
        self.nested.enabled.unwrap_or(false)
    }

    pub fn nested_extensions(&self) -> Vec<String> {
        match &self.nested.extensions {
            Some(exts) => exts.clone(),
            None => DEFAULT_NESTED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn json_output(&self) -> bool {
        self.output.json.unwrap_or(false)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
