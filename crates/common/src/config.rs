//! Environment configuration
//!
//! Settings are read once at startup from up to three layers, lowest
//! precedence first:
//!
//! 1. a TOML profile with one `[environments.<name>]` table per target
//! 2. dotenv files (`.env`, then `.env.<name>`) in a configured directory
//! 3. the process environment
//!
//! The result is an immutable [`Configuration`] that is passed explicitly to
//! every component needing it. Whether a test group can run is decided by
//! [`Configuration::resolve`], which never fails: missing settings come back
//! as [`Resolution::Unconfigured`] so the harness can skip instead of crash.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// A named setting a test group may depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfigKey {
    /// Dashboard base URL
    #[serde(rename = "BASE_URL")]
    BaseUrl,
    /// Management API base URL
    #[serde(rename = "API_URL")]
    ApiUrl,
    /// Login email for the dashboard
    #[serde(rename = "EMAIL")]
    Email,
    /// Login password for the dashboard
    #[serde(rename = "PASSWORD")]
    Password,
    /// Organization reference
    #[serde(rename = "ORG_REF")]
    OrgRef,
    /// Project reference
    #[serde(rename = "PROJECT_REF")]
    ProjectRef,
    /// Management API bearer token
    #[serde(rename = "ACCESS_TOKEN")]
    AccessToken,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 7] = [
        ConfigKey::BaseUrl,
        ConfigKey::ApiUrl,
        ConfigKey::Email,
        ConfigKey::Password,
        ConfigKey::OrgRef,
        ConfigKey::ProjectRef,
        ConfigKey::AccessToken,
    ];

    /// Keys a browser session login needs
    pub const SESSION: [ConfigKey; 3] = [ConfigKey::BaseUrl, ConfigKey::Email, ConfigKey::Password];

    /// Keys every management API group needs
    pub const API: [ConfigKey; 3] = [ConfigKey::ApiUrl, ConfigKey::ProjectRef, ConfigKey::AccessToken];

    /// Environment variable name for this key
    pub fn env_name(&self) -> &'static str {
        match self {
            ConfigKey::BaseUrl => "BASE_URL",
            ConfigKey::ApiUrl => "API_URL",
            ConfigKey::Email => "EMAIL",
            ConfigKey::Password => "PASSWORD",
            ConfigKey::OrgRef => "ORG_REF",
            ConfigKey::ProjectRef => "PROJECT_REF",
            ConfigKey::AccessToken => "ACCESS_TOKEN",
        }
    }

    pub fn from_env_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.env_name() == name)
    }

    /// Values that must never appear in logs
    pub fn is_secret(&self) -> bool {
        matches!(self, ConfigKey::Password | ConfigKey::AccessToken)
    }

    fn is_url(&self) -> bool {
        matches!(self, ConfigKey::BaseUrl | ConfigKey::ApiUrl)
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.env_name())
    }
}

/// Where configuration is read from
#[derive(Debug, Clone)]
pub struct EnvironmentSource {
    /// Target environment name (`local`, `staging`, ...)
    pub environment: String,

    /// TOML profile with per-environment tables
    pub profile_path: Option<PathBuf>,

    /// Directory holding `.env` / `.env.<environment>`
    pub dotenv_dir: Option<PathBuf>,

    /// Whether the process environment is the top layer
    pub process_env: bool,
}

impl Default for EnvironmentSource {
    fn default() -> Self {
        Self {
            environment: crate::DEFAULT_ENVIRONMENT.to_string(),
            profile_path: None,
            dotenv_dir: Some(PathBuf::from(".")),
            process_env: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Profile {
    #[serde(default)]
    environments: BTreeMap<String, BTreeMap<String, String>>,
}

/// Immutable, validated settings for one run
#[derive(Clone, PartialEq, Eq)]
pub struct Configuration {
    environment: String,
    values: BTreeMap<ConfigKey, String>,
}

impl Configuration {
    /// Load all layers described by `source`
    pub fn load(source: &EnvironmentSource) -> Result<Self> {
        let mut raw: BTreeMap<ConfigKey, String> = BTreeMap::new();

        if let Some(path) = &source.profile_path {
            let layer = read_profile(path, &source.environment)?;
            merge(&mut raw, layer);
        }

        if let Some(dir) = &source.dotenv_dir {
            for name in [".env".to_string(), format!(".env.{}", source.environment)] {
                let path = dir.join(&name);
                if path.exists() {
                    debug!("Loading dotenv file {}", path.display());
                    merge(&mut raw, read_dotenv(&path)?);
                }
            }
        }

        if source.process_env {
            merge(&mut raw, std::env::vars());
        }

        Self::from_map(&source.environment, raw)
    }

    /// Build a configuration from explicit `NAME=value` pairs.
    ///
    /// Unknown names are ignored. Later pairs win.
    pub fn from_pairs<I, K, V>(environment: &str, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut raw = BTreeMap::new();
        merge(&mut raw, pairs);
        Self::from_map(environment, raw)
    }

    fn from_map(environment: &str, raw: BTreeMap<ConfigKey, String>) -> Result<Self> {
        let mut values = BTreeMap::new();
        for (key, value) in raw {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let value = if key.is_url() {
                normalize_url(key, value)?
            } else {
                value.to_string()
            };
            values.insert(key, value);
        }

        Ok(Self {
            environment: environment.to_string(),
            values,
        })
    }

    /// Name of the target environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Value of a setting, `None` when absent or empty
    pub fn get(&self, key: ConfigKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    /// Keys present in this configuration
    pub fn present(&self) -> impl Iterator<Item = ConfigKey> + '_ {
        self.values.keys().copied()
    }

    /// Decide whether a group requiring `required` can run
    pub fn resolve(&self, required: &[ConfigKey]) -> Resolution<'_> {
        let mut missing: Vec<ConfigKey> = Vec::new();
        for key in required {
            if self.get(*key).is_none() && !missing.contains(key) {
                missing.push(*key);
            }
        }

        if missing.is_empty() {
            Resolution::Configured(self)
        } else {
            Resolution::Unconfigured(Unconfigured { missing })
        }
    }

    /// Substitute `{orgRef}` and `{projectRef}` placeholders in a path template
    pub fn render(&self, template: &str) -> std::result::Result<String, Unconfigured> {
        let mut out = template.to_string();
        let mut missing = Vec::new();

        for (placeholder, key) in [("{orgRef}", ConfigKey::OrgRef), ("{projectRef}", ConfigKey::ProjectRef)] {
            if !out.contains(placeholder) {
                continue;
            }
            match self.get(key) {
                Some(value) => out = out.replace(placeholder, value),
                None => missing.push(key),
            }
        }

        if missing.is_empty() {
            Ok(out)
        } else {
            Err(Unconfigured { missing })
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        map.entry(&"environment", &self.environment);
        for (key, value) in &self.values {
            if key.is_secret() {
                map.entry(&key.env_name(), &"<redacted>");
            } else {
                map.entry(&key.env_name(), value);
            }
        }
        map.finish()
    }
}

/// Outcome of gating a group on its required settings
#[derive(Debug)]
pub enum Resolution<'a> {
    Configured(&'a Configuration),
    Unconfigured(Unconfigured),
}

impl<'a> Resolution<'a> {
    pub fn is_configured(&self) -> bool {
        matches!(self, Resolution::Configured(_))
    }

    pub fn into_result(self) -> std::result::Result<&'a Configuration, Unconfigured> {
        match self {
            Resolution::Configured(config) => Ok(config),
            Resolution::Unconfigured(unconfigured) => Err(unconfigured),
        }
    }
}

/// Settings a group declared as required but that have no value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unconfigured {
    pub missing: Vec<ConfigKey>,
}

impl fmt::Display for Unconfigured {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.missing.iter().map(|k| k.env_name()).collect();
        write!(f, "missing configuration: {}", names.join(", "))
    }
}

fn merge<I, K, V>(into: &mut BTreeMap<ConfigKey, String>, pairs: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    for (name, value) in pairs {
        if let Some(key) = ConfigKey::from_env_name(name.as_ref()) {
            into.insert(key, value.into());
        }
    }
}

fn read_profile(path: &Path, environment: &str) -> Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path)?;
    let mut profile: Profile = toml::from_str(&content).map_err(|source| Error::Profile {
        path: path.to_path_buf(),
        source,
    })?;

    profile
        .environments
        .remove(environment)
        .ok_or_else(|| Error::UnknownEnvironment(environment.to_string()))
}

fn read_dotenv(path: &Path) -> Result<Vec<(String, String)>> {
    let to_error = |source: dotenvy::Error| Error::Dotenv {
        path: path.to_path_buf(),
        source,
    };

    dotenvy::from_path_iter(path)
        .map_err(to_error)?
        .map(|item| item.map_err(to_error))
        .collect()
}

fn normalize_url(key: ConfigKey, value: &str) -> Result<String> {
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(Error::InvalidConfig {
            key: key.env_name().to_string(),
            value: value.to_string(),
            reason: "expected an http:// or https:// URL".to_string(),
        });
    }
    Ok(value.trim_end_matches('/').to_string())
}
