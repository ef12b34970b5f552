//! Configuration and the settings store.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.hugin/config.toml` (user)
//! 3. `/etc/hugin/config.toml` (system)
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.hugin/secrets.toml` (user, must be 0600)
//! 2. `/etc/hugin/secrets.toml` (system, must be 0600)
//!
//! Model overrides chosen at runtime are written to `models.toml` next to
//! the config file and take precedence over the configured model.
//!
//! The router never reads files directly. It asks a [`SettingsStore`] for a
//! [`SettingsSnapshot`] on initialize and on every refresh.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::cache::CacheConfig;
use crate::health::ProbeConfig;
use crate::types::{PricingDescriptor, ProviderFamily};
use crate::{HuginError, Result};

/// Router configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub router: RouterSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub probe: ProbeSection,
    #[serde(default)]
    pub weights: WeightsConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// Dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSection {
    /// Deadline for a single provider call in seconds (default: 120).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Provider shown as the default in administrative screens.
    #[serde(default)]
    pub default_provider: Option<String>,
    /// Model shown as the default in administrative screens.
    #[serde(default)]
    pub default_model: Option<String>,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            default_provider: None,
            default_model: None,
        }
    }
}

impl RouterSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_request_timeout() -> u64 {
    120
}

/// Response cache bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    /// Maximum cached responses (default: 1000).
    #[serde(default = "default_cache_entries")]
    pub max_entries: u64,
    /// Time-to-live in seconds (default: 6 hours).
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_cache_entries() -> u64 {
    1_000
}

fn default_cache_ttl() -> u64 {
    6 * 3600
}

impl From<CacheSection> for CacheConfig {
    fn from(section: CacheSection) -> Self {
        CacheConfig::new()
            .max_entries(section.max_entries)
            .ttl(Duration::from_secs(section.ttl_secs))
    }
}

/// Health probe timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSection {
    #[serde(default = "default_self_hosted_probe")]
    pub self_hosted_timeout_secs: u64,
    #[serde(default = "default_hosted_probe")]
    pub hosted_timeout_secs: u64,
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            self_hosted_timeout_secs: default_self_hosted_probe(),
            hosted_timeout_secs: default_hosted_probe(),
        }
    }
}

fn default_self_hosted_probe() -> u64 {
    5
}

fn default_hosted_probe() -> u64 {
    10
}

impl From<ProbeSection> for ProbeConfig {
    fn from(section: ProbeSection) -> Self {
        ProbeConfig::new()
            .self_hosted_timeout(Duration::from_secs(section.self_hosted_timeout_secs))
            .hosted_timeout(Duration::from_secs(section.hosted_timeout_secs))
    }
}

/// Latency/cost weighting knobs.
///
/// Parsed and reported, but provider ordering uses the explicit priority
/// list only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightsConfig {
    #[serde(default)]
    pub latency: f64,
    #[serde(default)]
    pub cost: f64,
}

/// One configured provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Stable identifier; never reused for another provider.
    pub key: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub family: ProviderFamily,
    /// Base URL (self-hosted) or full request URL (hosted families).
    pub endpoint: String,
    pub model: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Ascending: 1 is tried before 2. Unset providers follow the ordered ones.
    #[serde(default)]
    pub priority: Option<u32>,
    /// Environment variable holding the credential.
    #[serde(default)]
    pub credential_env: Option<String>,
    /// Defaults to true for hosted families, false for self-hosted.
    #[serde(default)]
    pub requires_credential: Option<bool>,
    /// Version header for the messages family.
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub pricing: PricingDescriptor,
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    /// Minimal config for a provider; everything else takes defaults.
    pub fn new(
        key: impl Into<String>,
        family: ProviderFamily,
        endpoint: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            display_name: None,
            family,
            endpoint: endpoint.into(),
            model: model.into(),
            enabled: true,
            priority: None,
            credential_env: None,
            requires_credential: None,
            api_version: None,
            pricing: PricingDescriptor::default(),
        }
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn pricing(mut self, pricing: PricingDescriptor) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn requires_credential(mut self, required: bool) -> Self {
        self.requires_credential = Some(required);
        self
    }

    /// Whether selection must wait for a credential.
    pub fn credential_required(&self) -> bool {
        self.requires_credential
            .unwrap_or_else(|| self.family.requires_credential())
    }

    /// Environment variable consulted when no secrets file entry exists.
    pub fn credential_env_var(&self) -> String {
        self.credential_env.clone().unwrap_or_else(|| {
            format!(
                "HUGIN_{}_API_KEY",
                self.key.to_uppercase().replace(['-', '.'], "_")
            )
        })
    }
}

impl RouterConfig {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.hugin/config.toml`
    /// 3. `/etc/hugin/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::load_from_file(&path)
    }

    /// Parse a specific config file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HuginError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::parse(&content, path)
    }

    /// Parse and validate config text read from `path`.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| {
            HuginError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject duplicate provider keys.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.key.as_str()) {
                return Err(HuginError::Configuration(format!(
                    "duplicate provider key '{}'",
                    provider.key
                )));
            }
        }
        Ok(())
    }

    /// Resolve the config file path.
    pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(HuginError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".hugin").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/hugin/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(HuginError::Configuration(
            "No config file found. Create ~/.hugin/config.toml or /etc/hugin/config.toml"
                .to_string(),
        ))
    }
}

/// Secrets configuration: one table per provider key.
///
/// ```toml
/// [openai]
/// api_key = "sk-..."
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(flatten)]
    pub providers: HashMap<String, ApiKeySecret>,
}

/// A single API key secret.
#[derive(Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
}

impl std::fmt::Debug for ApiKeySecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeySecret")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists (providers may use env vars).
    pub fn load() -> Result<Self> {
        match Self::resolve_path() {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Secrets::default()),
        }
    }

    fn resolve_path() -> Option<PathBuf> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".hugin").join("secrets.toml");
            if user_secrets.exists() {
                return Some(user_secrets);
            }
        }
        let system_secrets = PathBuf::from("/etc/hugin/secrets.toml");
        system_secrets.exists().then_some(system_secrets)
    }

    /// Load a specific secrets file after checking its permissions.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path).map_err(|e| {
            HuginError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;
        Self::check_permissions(&metadata, path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            HuginError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        Self::parse(&content, path)
    }

    /// Async counterpart of [`Secrets::load_from_file`]; a missing file
    /// yields empty secrets.
    pub async fn read_from_file(path: &Path) -> Result<Self> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(HuginError::Configuration(format!(
                    "Failed to stat secrets file {path:?}: {e}"
                )));
            }
        };
        Self::check_permissions(&metadata, path)?;
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            HuginError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            HuginError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(metadata: &fs::Metadata, path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(HuginError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_metadata: &fs::Metadata, _path: &Path) -> Result<()> {
        Ok(())
    }

    /// Credential for a provider, falling back to its environment variable.
    pub fn api_key(&self, provider: &ProviderConfig) -> Option<String> {
        self.providers
            .get(&provider.key)
            .map(|s| s.api_key.clone())
            .or_else(|| std::env::var(provider.credential_env_var()).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

// ============================================================================
// Settings store
// ============================================================================

/// Everything the router reads from the settings collaborator at once.
#[derive(Clone, Default)]
pub struct SettingsSnapshot {
    pub config: RouterConfig,
    /// Resolved credentials keyed by provider key.
    pub credentials: HashMap<String, String>,
    /// Runtime model choices keyed by provider key.
    pub model_overrides: HashMap<String, String>,
}

impl std::fmt::Debug for SettingsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsSnapshot")
            .field("config", &self.config)
            .field("credentials", &self.credentials.keys().collect::<Vec<_>>())
            .field("model_overrides", &self.model_overrides)
            .finish()
    }
}

impl SettingsSnapshot {
    /// Effective model for a provider: runtime override, else configured.
    pub fn model_for<'a>(&'a self, provider: &'a ProviderConfig) -> &'a str {
        self.model_overrides
            .get(&provider.key)
            .map(String::as_str)
            .unwrap_or(&provider.model)
    }
}

/// External source of provider configuration, credentials and model choices.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read the current settings.
    async fn snapshot(&self) -> Result<SettingsSnapshot>;

    /// Persist a runtime model choice for one provider.
    async fn set_model_override(&self, provider_key: &str, model: &str) -> Result<()>;

    /// Read one provider's credential.
    async fn credential(&self, provider_key: &str) -> Result<Option<String>> {
        Ok(self.snapshot().await?.credentials.remove(provider_key))
    }
}

/// In-memory settings store for embedding and tests.
#[derive(Default)]
pub struct MemorySettingsStore {
    inner: RwLock<SettingsSnapshot>,
}

impl MemorySettingsStore {
    /// Store with the given config and no credentials.
    pub fn new(config: RouterConfig) -> Self {
        Self {
            inner: RwLock::new(SettingsSnapshot {
                config,
                ..Default::default()
            }),
        }
    }

    /// Set (or replace) a provider credential.
    pub async fn set_credential(&self, provider_key: &str, credential: impl Into<String>) {
        self.inner
            .write()
            .await
            .credentials
            .insert(provider_key.to_string(), credential.into());
    }

    /// Remove a provider credential.
    pub async fn remove_credential(&self, provider_key: &str) {
        self.inner.write().await.credentials.remove(provider_key);
    }

    /// Replace the whole config.
    pub async fn set_config(&self, config: RouterConfig) {
        self.inner.write().await.config = config;
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn snapshot(&self) -> Result<SettingsSnapshot> {
        Ok(self.inner.read().await.clone())
    }

    async fn set_model_override(&self, provider_key: &str, model: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .model_overrides
            .insert(provider_key.to_string(), model.to_string());
        Ok(())
    }

    async fn credential(&self, provider_key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().await.credentials.get(provider_key).cloned())
    }
}

/// On-disk model overrides (`models.toml`).
#[derive(Debug, Default, Serialize, Deserialize)]
struct ModelOverrides {
    #[serde(default)]
    models: BTreeMap<String, String>,
}

/// Settings store backed by `config.toml`, `secrets.toml` and `models.toml`.
///
/// Every snapshot re-reads all three files, so edits take effect on the
/// next refresh.
pub struct FileSettingsStore {
    config_path: PathBuf,
    secrets_path: Option<PathBuf>,
    overrides_path: PathBuf,
}

impl FileSettingsStore {
    /// Use an explicit config file; secrets come from the standard locations.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        let config_path = config_path.into();
        let overrides_path = config_path
            .parent()
            .map(|dir| dir.join("models.toml"))
            .unwrap_or_else(|| PathBuf::from("models.toml"));
        Self {
            config_path,
            secrets_path: Secrets::resolve_path(),
            overrides_path,
        }
    }

    /// Resolve the config file the same way as [`RouterConfig::load`].
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        Ok(Self::new(RouterConfig::resolve_config_path(explicit)?))
    }

    /// Use a specific secrets file instead of the standard locations.
    pub fn with_secrets(mut self, path: impl Into<PathBuf>) -> Self {
        self.secrets_path = Some(path.into());
        self
    }

    /// Use a specific overrides file instead of `models.toml` beside the config.
    pub fn with_overrides(mut self, path: impl Into<PathBuf>) -> Self {
        self.overrides_path = path.into();
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    async fn read_overrides(&self) -> Result<ModelOverrides> {
        match tokio::fs::read_to_string(&self.overrides_path).await {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                HuginError::Configuration(format!(
                    "Failed to parse overrides file {:?}: {e}",
                    self.overrides_path
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ModelOverrides::default()),
            Err(e) => Err(HuginError::Storage(format!(
                "Failed to read overrides file {:?}: {e}",
                self.overrides_path
            ))),
        }
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn snapshot(&self) -> Result<SettingsSnapshot> {
        let path = &self.config_path;
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            HuginError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config = RouterConfig::parse(&content, path)?;
        let secrets = match &self.secrets_path {
            Some(path) => Secrets::read_from_file(path).await?,
            None => Secrets::default(),
        };
        let credentials = config
            .providers
            .iter()
            .filter_map(|p| secrets.api_key(p).map(|key| (p.key.clone(), key)))
            .collect();
        let model_overrides = self.read_overrides().await?.models.into_iter().collect();
        Ok(SettingsSnapshot {
            config,
            credentials,
            model_overrides,
        })
    }

    async fn set_model_override(&self, provider_key: &str, model: &str) -> Result<()> {
        let mut overrides = self.read_overrides().await?;
        overrides
            .models
            .insert(provider_key.to_string(), model.to_string());
        let content = toml::to_string(&overrides)
            .map_err(|e| HuginError::Storage(format!("Failed to encode overrides: {e}")))?;
        tokio::fs::write(&self.overrides_path, content)
            .await
            .map_err(|e| {
                HuginError::Storage(format!(
                    "Failed to write overrides file {:?}: {e}",
                    self.overrides_path
                ))
            })
    }
}
