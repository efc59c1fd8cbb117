use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use toml::Value;

use crate::error::{Error, Result};
use crate::fetch::{RetryOn, RetryPolicy};
use crate::launcher::WarmStartPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "streamboot.toml";

fn default_download_path() -> String {
    "streamdownload".into()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> f64 {
    2.0
}

fn default_user_header() -> String {
    "X-Streamuser".into()
}

fn default_key_header() -> String {
    "X-Downloaderkey".into()
}

fn default_body_excerpt_chars() -> usize {
    200
}

fn default_url_key() -> String {
    "downloaderurl".into()
}

fn default_user_key() -> String {
    "streamuser".into()
}

fn default_access_key_key() -> String {
    "downloaderkey".into()
}

fn default_root_dir() -> String {
    ".".into()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MarkerConfig {
    /// Absent means `<temp dir>/streamdownload.lock`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    #[serde(default = "default_download_path")]
    pub download_path: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: f64,
    #[serde(default)]
    pub retry_on: RetryOn,
    #[serde(default = "default_user_header")]
    pub user_header: String,
    #[serde(default = "default_key_header")]
    pub key_header: String,
    #[serde(default = "default_body_excerpt_chars")]
    pub body_excerpt_chars: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            download_path: default_download_path(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            retry_on: RetryOn::default(),
            user_header: default_user_header(),
            key_header: default_key_header(),
            body_excerpt_chars: default_body_excerpt_chars(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        if self.max_attempts == 0 {
            return Err(Error::configuration("fetch.max_attempts must be at least 1"));
        }
        if !self.retry_delay_secs.is_finite() || self.retry_delay_secs < 0.0 {
            return Err(Error::configuration(format!(
                "fetch.retry_delay_secs must be a non-negative number (got {})",
                self.retry_delay_secs
            )));
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            delay: Duration::from_secs_f64(self.retry_delay_secs),
            retry_on: self.retry_on,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// TOML file with top-level `key = "value"` secrets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// dotenv file consulted after `file` and before the process environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dotenv: Option<PathBuf>,
    #[serde(default = "default_url_key")]
    pub url_key: String,
    #[serde(default = "default_user_key")]
    pub user_key: String,
    #[serde(default = "default_access_key_key")]
    pub access_key_key: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            file: None,
            dotenv: None,
            url_key: default_url_key(),
            user_key: default_user_key(),
            access_key_key: default_access_key_key(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
    /// Reject absolute destinations and `..` escapes from `root_dir`.
    #[serde(default)]
    pub confine: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            confine: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EntryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Defaults to the workspace root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub on_warm_start: WarmStartPolicy,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub marker: MarkerConfig,
    pub fetch: FetchConfig,
    pub secrets: SecretsConfig,
    pub workspace: WorkspaceConfig,
    pub entry: EntryConfig,
    pub launch: LaunchConfig,
}

impl LauncherConfig {
    pub fn from_value(value: Value) -> Result<Self> {
        value
            .try_into()
            .map_err(|e| Error::configuration(format!("invalid launcher config: {e}")))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::msg(format!("failed to render config: {e}")))
    }
}

fn merge_values(base: &mut Value, child: Value) {
    match (base, child) {
        (Value::Table(base_tbl), Value::Table(child_tbl)) => {
            for (k, v) in child_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge_values(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (base_slot, child_val) => {
            *base_slot = child_val;
        }
    }
}

fn resolve_ref_path(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        p
    } else {
        from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
    }
}

// Relative paths inside a file are relative to that file, not to the cwd.
fn rebase_relative_paths(file: &Path, value: &mut Value) {
    const PATH_KEYS: &[(&str, &str)] = &[
        ("marker", "path"),
        ("secrets", "file"),
        ("secrets", "dotenv"),
        ("workspace", "root_dir"),
        ("entry", "cwd"),
    ];
    for (table, key) in PATH_KEYS {
        let Some(slot) = value
            .get_mut(*table)
            .and_then(Value::as_table_mut)
            .and_then(|t| t.get_mut(*key))
        else {
            continue;
        };
        if let Some(raw) = slot.as_str() {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let resolved = resolve_ref_path(file, raw);
            *slot = Value::String(resolved.to_string_lossy().into_owned());
        }
    }
}

fn load_value_inner(path: &Path, stack: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !stack.insert(canonical.clone()) {
        return Err(Error::configuration(format!(
            "config extends cycle detected at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path).map_err(|e| {
        Error::configuration(format!("failed to read config {}: {e}", path.display()))
    })?;
    let mut value: Value = toml::from_str(&data).map_err(|e| {
        Error::configuration(format!("TOML parse error in {}: {e}", path.display()))
    })?;

    let mut out = Value::Table(Default::default());
    if let Some(ext) = value.get("extends").and_then(Value::as_str) {
        let base_path = resolve_ref_path(path, ext);
        out = load_value_inner(&base_path, stack)?;
    }
    if let Some(tbl) = value.as_table_mut() {
        tbl.remove("extends");
    }
    rebase_relative_paths(path, &mut value);

    merge_values(&mut out, value);

    stack.remove(&canonical);
    Ok(out)
}

/// Loads a launcher config, following a root-level `extends = "<file>"`.
pub fn load(path: &Path) -> Result<LauncherConfig> {
    let mut stack = HashSet::<PathBuf>::new();
    let value = load_value_inner(path, &mut stack)?;
    LauncherConfig::from_value(value)
}

/// Like [`load`], but a missing file yields the defaults.
pub fn load_or_default(path: &Path) -> Result<LauncherConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(LauncherConfig::default());
    }
    load(path)
}
