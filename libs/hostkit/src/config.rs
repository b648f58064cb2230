//! Narrow configuration read interface and the layered provider behind it.
//!
//! The runtime consumes configuration only through [`ConfigProvider`]; the
//! layered implementation resolves keys with first-match precedence across
//! datacenter-specific file → environment file → base file → prefixed
//! environment variables.

use std::path::Path;
use std::sync::Arc;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Configuration section holding the service's own metadata.
pub const SERVICE_SECTION: &str = "service";

/// Default prefix for environment lookups (`APP_ENVIRONMENT`,
/// `APP_DATACENTER`, `APP_CONFIG_DIR` and `APP_`-prefixed overrides).
pub const DEFAULT_ENV_PREFIX: &str = "APP";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("missing '{key}' configuration section")]
    MissingSection { key: String },

    #[error("invalid '{key}' configuration section: {source}")]
    InvalidSection {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("global provider must be set before any configuration access")]
    GlobalLocked,
}

/// Read-only key lookup into layered configuration.
///
/// Implementations resolve dotted keys (`service.name`) to raw values; typed
/// binding is layered on top by [`populate`].
pub trait ConfigProvider: Send + Sync {
    /// Raw value at a dotted key, if any layer defines it.
    fn get_raw(&self, key: &str) -> Option<serde_json::Value>;
}

/// Value accessor returned by [`get_value`].
pub struct ConfigValue(Option<serde_json::Value>);

impl ConfigValue {
    pub fn is_present(&self) -> bool {
        self.0.is_some()
    }

    /// String rendering of the value; scalars are stringified, structured
    /// values yield `None`.
    pub fn as_string(&self) -> Option<String> {
        match &self.0 {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn raw(&self) -> Option<&serde_json::Value> {
        self.0.as_ref()
    }
}

/// Lookup a key as a [`ConfigValue`] accessor.
pub fn get_value(provider: &dyn ConfigProvider, key: &str) -> ConfigValue {
    ConfigValue(provider.get_raw(key))
}

/// Bind a configuration section into a typed value.
///
/// Returns `Ok(None)` when the section is absent.
///
/// # Errors
/// [`ConfigError::InvalidSection`] when the section exists but does not
/// deserialize into `T`.
pub fn populate<T: DeserializeOwned>(
    provider: &dyn ConfigProvider,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match provider.get_raw(key) {
        None => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| ConfigError::InvalidSection {
                key: key.to_owned(),
                source,
            }),
    }
}

/// Explicit typed-configuration contract for collaborators.
///
/// A collaborator declares its configuration shape as an associated type and
/// accepts it through `apply_config`; [`load_instance_config`] wires the two
/// together from a named section.
pub trait Configurable {
    type Config: DeserializeOwned;

    fn apply_config(&mut self, config: Self::Config);
}

/// Bind the section at `key` into `target`. Returns whether a section was
/// found and applied; deserialization failures are reported as `false` after
/// logging.
pub fn load_instance_config<C: Configurable>(
    provider: &dyn ConfigProvider,
    key: &str,
    target: &mut C,
) -> bool {
    match populate::<C::Config>(provider, key) {
        Ok(Some(config)) => {
            target.apply_config(config);
            true
        }
        Ok(None) => false,
        Err(error) => {
            tracing::warn!(key = %key, error = %error, "failed to bind configuration section");
            false
        }
    }
}

/// Service metadata and host tuning, bound from the `service` section.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CoreConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Bounded wait around each module's stop call; disabled when absent.
    #[serde(default)]
    pub stop_timeout_ms: Option<u64>,
}

impl CoreConfig {
    /// Bind the `service` section from a provider.
    ///
    /// # Errors
    /// [`ConfigError::MissingSection`] when no `service` section exists,
    /// [`ConfigError::InvalidSection`] when it does not deserialize.
    pub fn from_provider(provider: &dyn ConfigProvider) -> Result<Self, ConfigError> {
        populate::<CoreConfig>(provider, SERVICE_SECTION)?.ok_or_else(|| {
            ConfigError::MissingSection {
                key: SERVICE_SECTION.to_owned(),
            }
        })
    }
}

/// Figment-backed layered provider.
pub struct LayeredProvider {
    figment: Figment,
}

impl LayeredProvider {
    /// Build the documented layering from the process environment.
    ///
    /// `{PREFIX}_ENVIRONMENT` selects the environment file (default
    /// `development`), `{PREFIX}_DATACENTER` adds a datacenter-specific
    /// overlay, `{PREFIX}_CONFIG_DIR` points at the config directory
    /// (default `./config`). Missing files contribute nothing.
    #[must_use]
    pub fn from_environment(env_prefix: &str) -> Self {
        let environment = std::env::var(format!("{env_prefix}_ENVIRONMENT"))
            .unwrap_or_else(|_| "development".to_owned());
        let datacenter = std::env::var(format!("{env_prefix}_DATACENTER")).ok();
        let config_dir =
            std::env::var(format!("{env_prefix}_CONFIG_DIR")).unwrap_or_else(|_| "./config".to_owned());
        let dir = Path::new(&config_dir);

        // Later merges win: env vars are the weakest layer, the
        // datacenter-specific file the strongest.
        let mut figment = Figment::new()
            .merge(Env::prefixed(&format!("{env_prefix}_")).split("__"))
            .merge(Yaml::file(dir.join("base.yaml")))
            .merge(Yaml::file(dir.join(format!("{environment}.yaml"))));
        if let Some(dc) = datacenter {
            figment = figment.merge(Yaml::file(dir.join(format!("{environment}-{dc}.yaml"))));
        }
        LayeredProvider { figment }
    }

    #[must_use]
    pub fn from_figment(figment: Figment) -> Self {
        LayeredProvider { figment }
    }
}

impl ConfigProvider for LayeredProvider {
    fn get_raw(&self, key: &str) -> Option<serde_json::Value> {
        self.figment.extract_inner::<serde_json::Value>(key).ok()
    }
}

struct GlobalProvider {
    provider: Option<Arc<dyn ConfigProvider>>,
    locked: bool,
}

static GLOBAL: Mutex<GlobalProvider> = Mutex::new(GlobalProvider {
    provider: None,
    locked: false,
});

/// Install the process-wide provider. Construct-once-at-startup: after the
/// first [`global`] read the provider is locked and can only be replaced
/// with `force`.
///
/// # Errors
/// [`ConfigError::GlobalLocked`] when the provider was already read and
/// `force` is not set.
pub fn set_global(provider: Arc<dyn ConfigProvider>, force: bool) -> Result<(), ConfigError> {
    let mut global = GLOBAL.lock();
    if global.locked && !force {
        return Err(ConfigError::GlobalLocked);
    }
    global.provider = Some(provider);
    Ok(())
}

/// The process-wide provider, locking it against non-forced replacement.
pub fn global() -> Option<Arc<dyn ConfigProvider>> {
    let mut global = GLOBAL.lock();
    global.locked = true;
    global.provider.clone()
}

/// Test-isolation reset of the process-wide provider.
pub fn reset_global() {
    let mut global = GLOBAL.lock();
    global.provider = None;
    global.locked = false;
}

/// Service name from the process-wide provider, when configured.
pub fn service_name() -> Option<String> {
    let provider = global()?;
    get_value(provider.as_ref(), "service.name").as_string()
}
