use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use toml::Value;

use crate::config::SecretsConfig;
use crate::error::{Error, Result};

/// Opaque key-value source for deployment secrets.
///
/// An unset key is reported as an empty string, never as an error; callers
/// decide which keys are required.
pub trait SecretProvider {
    fn get(&self, key: &str) -> String;
}

/// Reads the process environment. The key is tried verbatim, then upper-cased.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecrets;

impl SecretProvider for EnvSecrets {
    fn get(&self, key: &str) -> String {
        [key.to_string(), key.to_ascii_uppercase()]
            .iter()
            .filter_map(|k| std::env::var(k).ok())
            .find(|v| !v.is_empty())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Clone)]
pub struct MapSecrets {
    values: BTreeMap<String, String>,
}

impl MapSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl SecretProvider for MapSecrets {
    fn get(&self, key: &str) -> String {
        self.values.get(key).cloned().unwrap_or_default()
    }
}

/// Top-level keys of a TOML secrets file (`key = "value"`).
#[derive(Debug, Default, Clone)]
pub struct TomlSecrets {
    inner: MapSecrets,
}

impl TomlSecrets {
    /// A missing file is an empty provider; an unreadable or malformed one is
    /// a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "secrets file not found");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("failed to read secrets {}: {e}", path.display()))
        })?;
        Self::parse(&raw)
            .map_err(|e| e.context(format!("invalid secrets file {}", path.display())))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = toml::from_str(raw)?;
        let mut inner = MapSecrets::new();
        if let Some(tbl) = value.as_table() {
            for (k, v) in tbl {
                match v {
                    Value::String(s) => inner.insert(k.clone(), s.clone()),
                    Value::Table(_) | Value::Array(_) => continue,
                    other => inner.insert(k.clone(), other.to_string()),
                }
            }
        }
        Ok(Self { inner })
    }
}

impl SecretProvider for TomlSecrets {
    fn get(&self, key: &str) -> String {
        self.inner.get(key)
    }
}

/// Entries of a dotenv file, kept in memory rather than exported to the
/// process environment.
#[derive(Debug, Default, Clone)]
pub struct DotenvSecrets {
    inner: MapSecrets,
}

impl DotenvSecrets {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "dotenv file not found");
            return Ok(Self::default());
        }
        let iter = dotenv::from_path_iter(path).map_err(|e| {
            Error::configuration(format!("failed to open dotenv {}: {e}", path.display()))
        })?;
        let mut inner = MapSecrets::new();
        for item in iter {
            let (k, v) = item.map_err(|e| {
                Error::configuration(format!("invalid dotenv {}: {e}", path.display()))
            })?;
            inner.insert(k, v);
        }
        Ok(Self { inner })
    }
}

impl SecretProvider for DotenvSecrets {
    fn get(&self, key: &str) -> String {
        let direct = self.inner.get(key);
        if direct.is_empty() {
            self.inner.get(&key.to_ascii_uppercase())
        } else {
            direct
        }
    }
}

/// First provider with a non-empty value wins.
#[derive(Default)]
pub struct ChainSecrets {
    providers: Vec<Box<dyn SecretProvider>>,
}

impl ChainSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<P: SecretProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Box::new(provider));
        self
    }
}

impl SecretProvider for ChainSecrets {
    fn get(&self, key: &str) -> String {
        self.providers
            .iter()
            .map(|p| p.get(key))
            .find(|v| !v.is_empty())
            .unwrap_or_default()
    }
}

/// Builds the provider chain for a config: secrets file, dotenv file, then
/// the process environment.
pub fn from_config(cfg: &SecretsConfig) -> Result<ChainSecrets> {
    let mut chain = ChainSecrets::new();
    if let Some(path) = cfg.file.as_deref() {
        chain = chain.push(TomlSecrets::load(path)?);
    }
    if let Some(path) = cfg.dotenv.as_deref() {
        chain = chain.push(DotenvSecrets::load(path)?);
    }
    Ok(chain.push(EnvSecrets))
}

/// Produces credentials once the launcher has decided to download.
///
/// Every [`SecretProvider`] is a source. [`ConfiguredSecrets`] defers
/// reading secret files until this point, so a warm start never touches them
/// and a broken file is reported as a download failure.
pub trait CredentialSource {
    fn credentials(&self, keys: &SecretKeys) -> Result<Credentials>;
}

impl<P: SecretProvider + ?Sized> CredentialSource for P {
    fn credentials(&self, keys: &SecretKeys) -> Result<Credentials> {
        Ok(Credentials::load(self, keys))
    }
}

/// The provider chain of a [`SecretsConfig`], built on first use.
pub struct ConfiguredSecrets<'a> {
    cfg: &'a SecretsConfig,
}

impl<'a> ConfiguredSecrets<'a> {
    pub fn new(cfg: &'a SecretsConfig) -> Self {
        Self { cfg }
    }
}

impl CredentialSource for ConfiguredSecrets<'_> {
    fn credentials(&self, keys: &SecretKeys) -> Result<Credentials> {
        let chain = from_config(self.cfg)?;
        Ok(Credentials::load(&chain, keys))
    }
}

#[derive(Debug, Clone)]
pub struct SecretKeys {
    pub url: String,
    pub user: String,
    pub access_key: String,
}

impl From<&SecretsConfig> for SecretKeys {
    fn from(cfg: &SecretsConfig) -> Self {
        Self {
            url: cfg.url_key.clone(),
            user: cfg.user_key.clone(),
            access_key: cfg.access_key_key.clone(),
        }
    }
}

impl Default for SecretKeys {
    fn default() -> Self {
        Self::from(&SecretsConfig::default())
    }
}

/// Endpoint and identity used to authenticate a download.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub endpoint_url: String,
    pub principal: String,
    pub access_key: String,
}

impl Credentials {
    pub fn new(
        endpoint_url: impl Into<String>,
        principal: impl Into<String>,
        access_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            principal: principal.into(),
            access_key: access_key.into(),
        }
    }

    /// Reads all three values once. Missing values stay empty; see
    /// [`Credentials::require_complete`].
    pub fn load<P: SecretProvider + ?Sized>(provider: &P, keys: &SecretKeys) -> Self {
        Self {
            endpoint_url: provider.get(&keys.url),
            principal: provider.get(&keys.user),
            access_key: provider.get(&keys.access_key),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.endpoint_url.is_empty() && !self.principal.is_empty() && !self.access_key.is_empty()
    }

    /// Fails with one message listing which values are present, as booleans.
    pub fn require_complete(&self) -> Result<()> {
        if self.is_complete() {
            return Ok(());
        }
        Err(Error::configuration(format!(
            "Missing secrets: url={} streamuser={} key={}",
            !self.endpoint_url.is_empty(),
            !self.principal.is_empty(),
            !self.access_key.is_empty()
        )))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint_url", &self.endpoint_url)
            .field("principal", &self.principal)
            .field("access_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_reported_as_booleans() {
        let secrets = MapSecrets::new()
            .with("downloaderurl", "https://dl.example")
            .with("streamuser", "alice");
        let creds = Credentials::load(&secrets, &SecretKeys::default());
        let err = creds.require_complete().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing secrets: url=true streamuser=true key=false"
        );
        assert!(!err.to_string().contains("alice"));
    }

    #[test]
    fn only_empty_values_count_as_missing() {
        let secrets = MapSecrets::new()
            .with("downloaderurl", "https://dl.example")
            .with("streamuser", "  ")
            .with("downloaderkey", "");
        let creds = Credentials::load(&secrets, &SecretKeys::default());
        assert_eq!(creds.principal, "  ");
        assert_eq!(
            creds.require_complete().unwrap_err().to_string(),
            "Missing secrets: url=true streamuser=true key=false"
        );
    }

    #[test]
    fn configured_secrets_defer_file_errors_to_credentials() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("secrets.toml");
        fs::write(&path, "downloaderurl = [unterminated").expect("write secrets");
        let cfg = SecretsConfig {
            file: Some(path),
            ..SecretsConfig::default()
        };

        let source = ConfiguredSecrets::new(&cfg);
        let err = source.credentials(&SecretKeys::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        assert!(err.to_string().contains("invalid secrets file"), "{err}");
    }

    #[test]
    fn configured_secrets_read_files_lazily() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("secrets.toml");
        let cfg = SecretsConfig {
            file: Some(path.clone()),
            ..SecretsConfig::default()
        };
        let source = ConfiguredSecrets::new(&cfg);
        fs::write(
            &path,
            "downloaderurl = \"https://dl.example\"\nstreamuser = \"alice\"\ndownloaderkey = \"k\"\n",
        )
        .expect("write secrets");

        let creds = source.credentials(&SecretKeys::default()).expect("credentials");
        assert!(creds.is_complete());
    }

    #[test]
    fn chain_prefers_first_non_empty() {
        let chain = ChainSecrets::new()
            .push(MapSecrets::new().with("streamuser", ""))
            .push(MapSecrets::new().with("streamuser", "bob"));
        assert_eq!(chain.get("streamuser"), "bob");
        assert_eq!(chain.get("downloaderkey"), "");
    }

    #[test]
    fn toml_secrets_read_top_level_strings() {
        let secrets = TomlSecrets::parse(
            r#"
downloaderurl = "https://dl.example"
port = 8080

[nested]
streamuser = "ignored"
"#,
        )
        .expect("parse");
        assert_eq!(secrets.get("downloaderurl"), "https://dl.example");
        assert_eq!(secrets.get("port"), "8080");
        assert_eq!(secrets.get("streamuser"), "");
    }

    #[test]
    fn dotenv_secrets_fall_back_to_upper_case() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join(".env");
        fs::write(&path, "DOWNLOADERKEY=s3cret\nstreamuser=carol\n").expect("write env");
        let secrets = DotenvSecrets::load(&path).expect("load");
        assert_eq!(secrets.get("downloaderkey"), "s3cret");
        assert_eq!(secrets.get("streamuser"), "carol");
    }

    #[test]
    fn missing_secret_files_are_empty() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let toml = TomlSecrets::load(&tmp.path().join("secrets.toml")).expect("toml");
        let env = DotenvSecrets::load(&tmp.path().join(".env")).expect("dotenv");
        assert_eq!(toml.get("downloaderurl"), "");
        assert_eq!(env.get("downloaderurl"), "");
    }

    #[test]
    fn debug_redacts_access_key() {
        let creds = Credentials::new("https://dl.example", "alice", "hunter2");
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("hunter2"));
    }
}
