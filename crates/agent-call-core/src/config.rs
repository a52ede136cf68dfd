//! Client configuration and the connect handshake parameters derived from it.

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Environment variable overriding the agent base URL.
pub const BASE_URL_ENV: &str = "AGENT_BASE_URL";

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Path of the connect handshake endpoint.
pub const DEFAULT_CONNECT_PATH: &str = "/connect";

const DEFAULT_STATS_INTERVAL_MS: u64 = 5000;

/// Configuration error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("Connect path must not be empty")]
    EmptyConnectPath,
    #[error("Invalid connect path: {0}")]
    InvalidConnectPath(String),
    #[error("Stats interval must be greater than zero")]
    ZeroStatsInterval,
    #[error("Invalid configuration: {0}")]
    Parse(String),
}

/// Input to the transport's connect handshake.
///
/// The transport issues the request against `endpoint`, forwards
/// `request_data` in the body and treats the response as opaque.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectParams {
    pub endpoint: String,
    pub request_data: HashMap<String, Value>,
}

/// Client configuration, supplied at deployment time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the agent server.
    pub base_url: String,
    /// Connect handshake path, appended to `base_url`.
    pub connect_path: String,
    /// Acquire the microphone during device initialization.
    pub enable_mic: bool,
    /// Acquire the camera before connecting.
    pub enable_cam: bool,
    /// Stats polling interval in milliseconds.
    pub stats_interval_ms: u64,
    /// Extra data sent with the connect handshake.
    pub request_data: HashMap<String, Value>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_path: DEFAULT_CONNECT_PATH.to_string(),
            enable_mic: true,
            enable_cam: true,
            stats_interval_ms: DEFAULT_STATS_INTERVAL_MS,
            request_data: HashMap::new(),
        }
    }
}

impl ClientConfig {
    /// Defaults, with the base URL taken from `AGENT_BASE_URL` when set.
    ///
    /// # Errors
    /// Returns error if the resulting configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_base_url_override(std::env::var(BASE_URL_ENV).ok())
    }

    /// Parse a JSON configuration document; missing fields take defaults.
    ///
    /// # Errors
    /// Returns error if the document is malformed or invalid.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn with_base_url_override(mut self, base_url: Option<String>) -> Result<Self, ConfigError> {
        if let Some(url) = base_url.filter(|u| !u.trim().is_empty()) {
            tracing::debug!(%url, "Using base URL from {BASE_URL_ENV}");
            self.base_url = url.trim().to_string();
        }
        self.validate()?;
        Ok(self)
    }

    /// Check the configuration for values the session cannot work with.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connect_url()?;
        if self.stats_interval_ms == 0 {
            return Err(ConfigError::ZeroStatsInterval);
        }
        Ok(())
    }

    /// The base URL as an `http(s)` URL with a host and no query or fragment.
    fn parsed_base_url(&self) -> Result<Url, ConfigError> {
        let invalid = || ConfigError::InvalidBaseUrl(self.base_url.clone());
        let url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "http" | "https")
            || url.host_str().is_none_or(str::is_empty)
            || url.query().is_some()
            || url.fragment().is_some()
        {
            return Err(invalid());
        }
        Ok(url)
    }

    /// Full URL of the connect handshake endpoint.
    ///
    /// The connect path is resolved below the base URL's path, so
    /// `https://host/api` plus `/connect` gives `https://host/api/connect`.
    ///
    /// # Errors
    /// Returns error if the base URL or connect path is invalid.
    pub fn connect_url(&self) -> Result<Url, ConfigError> {
        let mut base = self.parsed_base_url()?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let path = self.connect_path.trim_start_matches('/');
        if path.trim_end_matches('/').is_empty() {
            return Err(ConfigError::EmptyConnectPath);
        }
        base.join(path)
            .map_err(|e| ConfigError::InvalidConnectPath(format!("{}: {e}", self.connect_path)))
    }

    /// Stats polling interval.
    #[must_use]
    pub const fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    /// Parameters for the transport's connect handshake.
    ///
    /// # Errors
    /// Returns error if the handshake URL cannot be built.
    pub fn connect_params(&self) -> Result<ConnectParams, ConfigError> {
        Ok(ConnectParams {
            endpoint: self.connect_url()?.into(),
            request_data: self.request_data.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_ok!(config.validate());
        assert_eq!(assert_ok!(config.connect_url()).as_str(), "http://localhost:8000/connect");
        assert_eq!(config.stats_interval(), Duration::from_secs(5));
        assert!(config.enable_mic && config.enable_cam);
    }

    #[test]
    fn test_connect_url_joins_with_single_slash() {
        let config = ClientConfig {
            base_url: "https://agent.example.com/".to_string(),
            connect_path: "connect".to_string(),
            ..ClientConfig::default()
        };
        assert_eq!(assert_ok!(config.connect_url()).as_str(), "https://agent.example.com/connect");

        let nested = ClientConfig {
            base_url: "https://agent.example.com/api".to_string(),
            ..ClientConfig::default()
        };
        assert_eq!(assert_ok!(nested.connect_url()).as_str(), "https://agent.example.com/api/connect");
    }

    #[test]
    fn test_base_url_override() {
        let config = assert_ok!(
            ClientConfig::default().with_base_url_override(Some(" https://bot.internal:7860 ".into()))
        );
        assert_eq!(assert_ok!(config.connect_url()).as_str(), "https://bot.internal:7860/connect");

        let config = assert_ok!(ClientConfig::default().with_base_url_override(Some(String::new())));
        assert_eq!(config.base_url, DEFAULT_BASE_URL);

        let err = assert_err!(ClientConfig::default().with_base_url_override(Some("ftp://x".into())));
        assert_eq!(err, ConfigError::InvalidBaseUrl("ftp://x".into()));
    }

    #[test]
    fn test_from_json_partial() {
        let config = assert_ok!(ClientConfig::from_json(
            r#"{"base_url":"http://10.0.0.5:8000","enable_cam":false,"request_data":{"voice":"tiffany"}}"#
        ));
        assert!(!config.enable_cam);
        assert!(config.enable_mic);

        let params = assert_ok!(config.connect_params());
        assert_eq!(params.endpoint, "http://10.0.0.5:8000/connect");
        assert_eq!(params.request_data.get("voice"), Some(&Value::from("tiffany")));
    }

    #[test]
    fn test_validation_errors() {
        let empty_path = ClientConfig {
            connect_path: "/".to_string(),
            ..ClientConfig::default()
        };
        assert_eq!(empty_path.validate(), Err(ConfigError::EmptyConnectPath));

        let zero = ClientConfig {
            stats_interval_ms: 0,
            ..ClientConfig::default()
        };
        assert_eq!(zero.validate(), Err(ConfigError::ZeroStatsInterval));

        let no_host = ClientConfig {
            base_url: "http://".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(no_host.validate(), Err(ConfigError::InvalidBaseUrl(_))));

        assert!(matches!(ClientConfig::from_json("{"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_malformed_base_urls_are_rejected() {
        for base_url in [
            "http://exa mple.com",
            "http://?token=1",
            "https://host:notaport",
            "https://host/?token=1",
            "https://host/#frag",
            "localhost:8000",
            "ws://localhost:8000",
        ] {
            let config = ClientConfig {
                base_url: base_url.to_string(),
                ..ClientConfig::default()
            };
            assert_eq!(
                config.validate(),
                Err(ConfigError::InvalidBaseUrl(base_url.to_string())),
                "{base_url}"
            );
            assert_err!(config.connect_params());
        }
    }
}
