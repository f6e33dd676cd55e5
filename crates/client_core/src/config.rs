use std::{fs, io, path::Path};

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

pub const SETTINGS_FILE: &str = "sepecheck.toml";

/// Environment variables consulted for the API base URL, lowest precedence first.
const API_URL_ENV_KEYS: [&str; 2] = ["API_URL", "APP__API_URL"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub api_url: Option<String>,
}

impl Settings {
    pub fn api_base(&self) -> Result<ApiBase, ConfigError> {
        ApiBase::parse(self.api_url.as_deref().unwrap_or_default())
    }
}

pub fn load_settings() -> Result<Settings, ConfigError> {
    load_settings_with(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Merges the optional settings file at `path` with environment overrides.
/// A missing file is not an error.
pub fn load_settings_with(
    path: &Path,
    lookup_env: impl Fn(&str) -> Option<String>,
) -> Result<Settings, ConfigError> {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => toml::from_str::<Settings>(&raw).map_err(|source| {
            ConfigError::SettingsFormat {
                path: path.display().to_string(),
                source,
            }
        })?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Settings::default(),
        Err(source) => {
            return Err(ConfigError::SettingsFile {
                path: path.display().to_string(),
                source,
            })
        }
    };

    for key in API_URL_ENV_KEYS {
        if let Some(value) = lookup_env(key) {
            settings.api_url = Some(value);
        }
    }

    Ok(settings)
}

/// Validated base URL of the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiBase(Url);

impl ApiBase {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::MissingApiUrl);
        }
        let url = Url::parse(raw).map_err(|source| ConfigError::InvalidApiUrl {
            value: raw.to_string(),
            source,
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(ConfigError::UnsupportedScheme {
                value: raw.to_string(),
            });
        }
        Ok(Self(url))
    }

    /// Resolves a fixed sub-path. The base's own path, query and fragment
    /// are replaced, not extended.
    pub fn endpoint(&self, path: &str) -> Url {
        let mut url = self.0.clone();
        url.set_path(path);
        url.set_query(None);
        url.set_fragment(None);
        url
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }
}
