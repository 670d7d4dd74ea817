//! Shared configuration for the stowage CLI.
//!
//! TOML profiles layered over global defaults and `STOWAGE_` environment
//! variables, translated into `stowage_api::TransportConfig`,
//! `stowage_core::StoreOptions` and `stowage_core::StorageSettings`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stowage_api::{TlsMode, TransportConfig};
use stowage_core::{Backend, StorageSettings, StoreOptions};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{profile}'")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    /// Global transport and output defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Where the `local` and `database` backends keep their files.
    #[serde(default)]
    pub storage: StorageSection,

    /// Store options applied to every profile.
    #[serde(default)]
    pub store: StoreSection,

    /// Named endpoint profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            storage: StorageSection::default(),
            store: StoreSection::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default)]
    pub insecure: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// JSONP round-trip limit in seconds.
    #[serde(default = "default_timeout")]
    pub jsonp_timeout: u64,

    pub user_agent: Option<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            insecure: false,
            timeout: default_timeout(),
            jsonp_timeout: default_timeout(),
            user_agent: None,
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageSection {
    pub local_dir: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
}

/// Partial store options. Unset fields fall through to the next layer.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreSection {
    pub key: Option<String>,
    pub source: Option<String>,
    pub retrieve: Option<bool>,
    pub max_depth: Option<usize>,
    pub ignore: Option<Vec<String>>,
    pub leafs: Option<Vec<String>>,
    pub callback: Option<String>,
    pub autosave: Option<Backend>,
    /// Resync interval, e.g. `"5m"` or `"30s"`.
    pub expires: Option<String>,
    pub offload_threshold: Option<usize>,
}

impl StoreSection {
    fn apply(&self, opts: &mut StoreOptions) -> Result<(), ConfigError> {
        if let Some(ref key) = self.key {
            opts.key = Some(key.clone());
        }
        if let Some(ref source) = self.source {
            opts.source = Some(source.clone());
        }
        if let Some(retrieve) = self.retrieve {
            opts.retrieve = retrieve;
        }
        if let Some(depth) = self.max_depth {
            opts.max_depth = depth;
        }
        if let Some(ref ignore) = self.ignore {
            opts.ignore.clone_from(ignore);
        }
        if let Some(ref leafs) = self.leafs {
            opts.leafs.clone_from(leafs);
        }
        if let Some(ref callback) = self.callback {
            opts.callback = Some(callback.clone());
        }
        if let Some(backend) = self.autosave {
            opts.autosave = Some(backend);
        }
        if let Some(ref expires) = self.expires {
            opts.expires = Some(parse_interval("expires", expires)?);
        }
        if let Some(threshold) = self.offload_threshold {
            opts.offload_threshold = threshold;
        }
        Ok(())
    }
}

/// A named endpoint profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Collection URI fetched when the command names none.
    pub uri: Option<String>,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,

    /// Headers sent with every request of this profile.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Store options layered over the global `[store]` table.
    #[serde(default)]
    pub store: StoreSection,
}

/// Parse a humantime interval such as `"90s"` or `"5m"`.
pub fn parse_interval(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("{raw:?}: {e}"),
    })
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "stowage", "stowage")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Directory for persisted stores when the config names none.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("data"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("stowage");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path`, layered as defaults, then file, then `STOWAGE_`
/// variables (`__` separates nested keys: `STOWAGE_DEFAULTS__TIMEOUT`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("STOWAGE_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Resolve a profile by name, falling back to `default_profile`.
    ///
    /// Naming a profile that does not exist is an error; an unset default
    /// resolves to an empty profile.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, Profile), ConfigError> {
        if let Some(name) = name {
            return self
                .profiles
                .get(name)
                .map(|p| (name.to_owned(), p.clone()))
                .ok_or_else(|| ConfigError::UnknownProfile {
                    profile: name.into(),
                });
        }
        let name = self
            .default_profile
            .clone()
            .unwrap_or_else(|| "default".into());
        let profile = self.profiles.get(&name).cloned().unwrap_or_default();
        Ok((name, profile))
    }

    /// Transport settings for a profile.
    pub fn transport_config(&self, profile: &Profile) -> TransportConfig {
        let tls = if profile.insecure.unwrap_or(self.defaults.insecure) {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca_path) = profile.ca_cert {
            TlsMode::CustomCa(ca_path.clone())
        } else {
            TlsMode::System
        };

        let mut transport = TransportConfig {
            tls,
            timeout: Duration::from_secs(profile.timeout.unwrap_or(self.defaults.timeout)),
            jsonp_timeout: Duration::from_secs(self.defaults.jsonp_timeout),
            ..TransportConfig::default()
        };
        if let Some(ref agent) = self.defaults.user_agent {
            transport.user_agent.clone_from(agent);
        }
        transport
    }

    /// Store options: built-in defaults, then `[store]`, then the
    /// profile's own `store` table and headers.
    pub fn store_options(&self, profile: &Profile) -> Result<StoreOptions, ConfigError> {
        let mut opts = StoreOptions::default();
        self.store.apply(&mut opts)?;
        profile.store.apply(&mut opts)?;
        opts.headers.extend(profile.headers.clone());
        if opts.expires.is_some_and(|d| d < Duration::from_secs(1)) {
            return Err(ConfigError::Validation {
                field: "expires".into(),
                reason: "must be at least 1s".into(),
            });
        }
        Ok(opts)
    }

    /// Storage locations, defaulting into the platform data directory.
    pub fn storage_settings(&self) -> StorageSettings {
        let base = data_dir();
        StorageSettings {
            local_dir: Some(
                self.storage
                    .local_dir
                    .clone()
                    .unwrap_or_else(|| base.join("local")),
            ),
            database_path: Some(
                self.storage
                    .database_path
                    .clone()
                    .unwrap_or_else(|| base.join("stowage.redb")),
            ),
        }
    }

    /// Validate a profile's URI, if it has one.
    pub fn profile_uri(profile: &Profile) -> Result<Option<url::Url>, ConfigError> {
        profile
            .uri
            .as_deref()
            .map(|raw| {
                raw.parse().map_err(|_| ConfigError::Validation {
                    field: "uri".into(),
                    reason: format!("invalid URL: {raw}"),
                })
            })
            .transpose()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use figment::Jail;

    const SAMPLE: &str = r#"
default_profile = "people"

[defaults]
timeout = 10

[store]
max_depth = 2
leafs = ["avatar"]

[profiles.people]
uri = "https://api.example.com/people"
timeout = 5
headers = { Authorization = "Bearer abc" }

[profiles.people.store]
key = "id"
expires = "5m"
autosave = "session"
"#;

    #[test]
    fn profile_layers_over_global_store() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", SAMPLE)?;
            let cfg = load_config_from(Path::new("config.toml")).map_err(|e| e.to_string())?;

            let (name, profile) = cfg.profile(None).map_err(|e| e.to_string())?;
            assert_eq!(name, "people");

            let opts = cfg.store_options(&profile).map_err(|e| e.to_string())?;
            assert_eq!(opts.key.as_deref(), Some("id"));
            assert_eq!(opts.max_depth, 2);
            assert_eq!(opts.leafs, ["avatar"]);
            assert_eq!(opts.expires, Some(Duration::from_secs(300)));
            assert_eq!(opts.autosave, Some(Backend::Session));
            assert_eq!(opts.headers["Authorization"], "Bearer abc");

            let transport = cfg.transport_config(&profile);
            assert_eq!(transport.timeout, Duration::from_secs(5));
            assert_eq!(transport.tls, TlsMode::System);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", SAMPLE)?;
            jail.set_env("STOWAGE_DEFAULTS__INSECURE", "true");
            let cfg = load_config_from(Path::new("config.toml")).map_err(|e| e.to_string())?;
            assert!(cfg.defaults.insecure);
            assert_eq!(cfg.defaults.timeout, 10);
            let transport = cfg.transport_config(&Profile::default());
            assert_eq!(transport.tls, TlsMode::DangerAcceptInvalid);
            Ok(())
        });
    }

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_| {
            let cfg = load_config_from(Path::new("nope.toml")).map_err(|e| e.to_string())?;
            assert_eq!(cfg.defaults.output, "table");
            let (name, profile) = cfg.profile(None).map_err(|e| e.to_string())?;
            assert_eq!(name, "default");
            assert!(profile.uri.is_none());
            Ok(())
        });
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let cfg = Config::default();
        assert!(matches!(
            cfg.profile(Some("ghost")),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn bad_intervals_are_rejected() {
        let mut cfg = Config::default();
        cfg.store.expires = Some("soon".into());
        assert!(cfg.store_options(&Profile::default()).is_err());
        cfg.store.expires = Some("200ms".into());
        assert!(cfg.store_options(&Profile::default()).is_err());
    }

    #[test]
    fn save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "p".into(),
            Profile {
                uri: Some("https://example.com/items".into()),
                ..Profile::default()
            },
        );
        save_config_to(&cfg, &path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let back: Config = toml::from_str(&raw).unwrap();
        assert_eq!(back.profiles["p"].uri.as_deref(), Some("https://example.com/items"));
    }

    #[test]
    fn profile_uri_is_validated() {
        let profile = Profile {
            uri: Some("not a url".into()),
            ..Profile::default()
        };
        assert!(Config::profile_uri(&profile).is_err());
        assert!(Config::profile_uri(&Profile::default()).unwrap().is_none());
    }
}
