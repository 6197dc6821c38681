use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;
use url::Url;

pub const API_KEY_ENV: &str = "NO_PAUSE_API_KEY";
pub const API_BASE_ENV: &str = "NO_PAUSE_API_BASE";
pub const API_VERSION_ENV: &str = "NO_PAUSE_API_VERSION";
pub const WS_PROTOCOL_ENV: &str = "NO_PAUSE_WS_PROTOCOL";

pub const DEFAULT_API_BASE: &str = "api.nopause.io";
pub const DEFAULT_API_VERSION: &str = "v1";
pub const DEFAULT_WS_PROTOCOL: &str = "wss";

const SYNTHESIS_PATH: &str = "tts/dual-stream";
const PARSING_ORDER: &str = "function_param > environment > defaults";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "No {env_var} provided (parsed from {parsed_from}). Set it by function param or the {env_var} environment variable or defaults.{name} first."
    )]
    Missing {
        name: &'static str,
        env_var: &'static str,
        parsed_from: SettingSource,
    },
    #[error("Invalid endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },
}

/// Where a setting's value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingSource {
    Argument(&'static str),
    Environment(&'static str),
    Default(&'static str),
}

impl fmt::Display for SettingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingSource::Argument(name) => write!(f, "function_param: {}", name),
            SettingSource::Environment(var) => write!(f, "environment: {}", var),
            SettingSource::Default(name) => write!(f, "defaults.{}", name),
        }
    }
}

/// A resolved setting together with its source
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub value: T,
    pub source: SettingSource,
}

/// Snapshot of the process environment
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

/// Process-wide fallback values, built once at start-up
#[derive(Debug)]
pub struct Defaults {
    pub api_key: Option<SecretString>,
    pub api_base: Option<String>,
    pub api_version: Option<String>,
    pub ws_protocol: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: Some(DEFAULT_API_BASE.to_string()),
            api_version: Some(DEFAULT_API_VERSION.to_string()),
            ws_protocol: DEFAULT_WS_PROTOCOL.to_string(),
        }
    }
}

/// Values passed explicitly by the caller; these win over everything else
#[derive(Debug, Default)]
pub struct SettingsOverrides {
    pub api_key: Option<SecretString>,
    pub api_base: Option<String>,
    pub api_version: Option<String>,
}

/// Fully resolved connection settings
#[derive(Debug)]
pub struct ApiSettings {
    api_key: Resolved<SecretString>,
    api_base: Resolved<String>,
    api_version: Resolved<String>,
    ws_protocol: String,
    endpoint: String,
}

impl ApiSettings {
    /// Resolve every setting with the order argument > environment > defaults
    pub fn resolve(
        overrides: &SettingsOverrides,
        environment: &Environment,
        defaults: &Defaults,
    ) -> Result<Self, ConfigError> {
        let api_key = resolve_setting(
            "api_key",
            API_KEY_ENV,
            overrides.api_key.as_ref().map(|key| key.expose_secret()),
            environment,
            defaults.api_key.as_ref().map(|key| key.expose_secret()),
        )?;
        let api_base = resolve_setting(
            "api_base",
            API_BASE_ENV,
            overrides.api_base.as_deref(),
            environment,
            defaults.api_base.as_deref(),
        )?;
        let api_version = resolve_setting(
            "api_version",
            API_VERSION_ENV,
            overrides.api_version.as_deref(),
            environment,
            defaults.api_version.as_deref(),
        )?;

        let ws_protocol = environment
            .get(WS_PROTOCOL_ENV)
            .filter(|protocol| !protocol.trim().is_empty())
            .unwrap_or(&defaults.ws_protocol)
            .to_string();

        let endpoint = format!(
            "{}://{}/{}/{}",
            ws_protocol,
            api_base.value.trim_end_matches('/'),
            api_version.value.trim_matches('/'),
            SYNTHESIS_PATH
        );
        Url::parse(&endpoint).map_err(|e| ConfigError::InvalidEndpoint {
            url: endpoint.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            api_key: Resolved {
                value: SecretString::from(api_key.value),
                source: api_key.source,
            },
            api_base,
            api_version,
            ws_protocol,
            endpoint,
        })
    }

    /// Load settings from `.env`, the process environment and the built-in defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(&SettingsOverrides::default())
    }

    pub fn from_env_with(overrides: &SettingsOverrides) -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        match Self::resolve(overrides, &Environment::capture(), &Defaults::default()) {
            Ok(settings) => {
                log::info!("Resolved NoPause endpoint {}", settings.endpoint);
                Ok(settings)
            }
            Err(e) => {
                log::error!("Configuration error: {}", e);
                Err(e)
            }
        }
    }

    /// Full WebSocket URL of the dual-stream endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get the API key (use only when building the connection request)
    pub fn api_key(&self) -> &SecretString {
        &self.api_key.value
    }

    pub fn api_key_source(&self) -> SettingSource {
        self.api_key.source
    }

    pub fn api_base(&self) -> &Resolved<String> {
        &self.api_base
    }

    pub fn api_version(&self) -> &Resolved<String> {
        &self.api_version
    }

    pub fn ws_protocol(&self) -> &str {
        &self.ws_protocol
    }

    /// Human-readable settings summary for error messages. Never includes the key.
    pub fn describe(&self, error: Option<&str>) -> String {
        let mut out = String::new();
        if let Some(error) = error {
            out.push_str(error);
            out.push('\n');
        }
        out.push_str(&format!(
            "\n[NoPause Settings] (Parsing Order: {})\n* API_BASE: {} ({})\n* API_VERSION: {} ({})\n* API_URL: {}",
            PARSING_ORDER,
            self.api_base.value,
            self.api_base.source,
            self.api_version.value,
            self.api_version.source,
            self.endpoint
        ));
        out
    }
}

impl Clone for ApiSettings {
    fn clone(&self) -> Self {
        Self {
            api_key: Resolved {
                value: SecretString::from(self.api_key.value.expose_secret().to_owned()),
                source: self.api_key.source,
            },
            api_base: self.api_base.clone(),
            api_version: self.api_version.clone(),
            ws_protocol: self.ws_protocol.clone(),
            endpoint: self.endpoint.clone(),
        }
    }
}

fn resolve_setting(
    name: &'static str,
    env_var: &'static str,
    argument: Option<&str>,
    environment: &Environment,
    default: Option<&str>,
) -> Result<Resolved<String>, ConfigError> {
    let (value, source) = match argument.filter(|value| !value.is_empty()) {
        Some(value) => (Some(value), SettingSource::Argument(name)),
        None => match environment.get(env_var) {
            Some(value) => (Some(value), SettingSource::Environment(env_var)),
            None => (default, SettingSource::Default(name)),
        },
    };

    match value {
        Some(value) if !value.trim().is_empty() => Ok(Resolved {
            value: value.to_string(),
            source,
        }),
        _ => Err(ConfigError::Missing {
            name,
            env_var,
            parsed_from: source,
        }),
    }
}
