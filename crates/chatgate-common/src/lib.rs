use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3264;
pub const DEFAULT_DATA_DIR: &str = "./session";
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://chat.qwen.ai";
pub const DEFAULT_MODEL: &str = "qwen-max-latest";
pub const DEFAULT_SESSION_POOL_CAPACITY: usize = 3;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_RATE_LIMIT_COOLDOWN_HOURS: u64 = 24;
pub const DEFAULT_STREAM_CHUNK_SIZE: usize = 16;
pub const DEFAULT_STREAM_CHUNK_DELAY_MS: u64 = 15;

pub const CREDENTIALS_FILE_NAME: &str = "tokens.json";
pub const SHARED_TOKEN_FILE_NAME: &str = "auth_token.txt";

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("invalid global config field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// What the gateway does once no credential is eligible anymore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Answer 503 and keep serving; credentials may recover later.
    #[default]
    Reject,
    /// Answer 503, then stop the server and exit non-zero.
    Shutdown,
}

impl ExhaustionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ExhaustionPolicy::Reject => "reject",
            ExhaustionPolicy::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for ExhaustionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExhaustionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(ExhaustionPolicy::Reject),
            "shutdown" => Ok(ExhaustionPolicy::Shutdown),
            other => Err(format!("unknown exhaustion policy: {other}")),
        }
    }
}

/// Final, merged global configuration used by the running process.
///
/// Merge order: CLI > ENV > config file > defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Holds `tokens.json` and `auth_token.txt`.
    pub data_dir: PathBuf,
    pub upstream_base_url: String,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
    pub session_pool_capacity: usize,
    pub request_timeout_secs: u64,
    pub default_model: String,
    pub rate_limit_cooldown_hours: u64,
    /// Code points per synthetic stream chunk.
    pub stream_chunk_size: usize,
    pub stream_chunk_delay_ms: u64,
    pub exhaustion_policy: ExhaustionPolicy,
    /// Downstream bearer keys. Empty disables client authentication.
    pub api_keys: Vec<String>,
    /// Admin routes are not mounted without a key.
    pub admin_key: Option<String>,
}

impl GlobalConfig {
    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join(CREDENTIALS_FILE_NAME)
    }

    pub fn shared_token_path(&self) -> PathBuf {
        self.data_dir.join(SHARED_TOKEN_FILE_NAME)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Optional layer used for merging global config. Also the shape of the
/// `--config` JSON file, so every field may be omitted there.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub upstream_base_url: Option<String>,
    pub proxy: Option<String>,
    pub session_pool_capacity: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    pub default_model: Option<String>,
    pub rate_limit_cooldown_hours: Option<u64>,
    pub stream_chunk_size: Option<usize>,
    pub stream_chunk_delay_ms: Option<u64>,
    pub exhaustion_policy: Option<ExhaustionPolicy>,
    pub api_keys: Option<Vec<String>>,
    pub admin_key: Option<String>,
}

impl GlobalConfigPatch {
    pub fn from_json_file(path: &Path) -> Result<Self, GlobalConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| GlobalConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| GlobalConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
        if other.upstream_base_url.is_some() {
            self.upstream_base_url = other.upstream_base_url;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        if other.session_pool_capacity.is_some() {
            self.session_pool_capacity = other.session_pool_capacity;
        }
        if other.request_timeout_secs.is_some() {
            self.request_timeout_secs = other.request_timeout_secs;
        }
        if other.default_model.is_some() {
            self.default_model = other.default_model;
        }
        if other.rate_limit_cooldown_hours.is_some() {
            self.rate_limit_cooldown_hours = other.rate_limit_cooldown_hours;
        }
        if other.stream_chunk_size.is_some() {
            self.stream_chunk_size = other.stream_chunk_size;
        }
        if other.stream_chunk_delay_ms.is_some() {
            self.stream_chunk_delay_ms = other.stream_chunk_delay_ms;
        }
        if other.exhaustion_policy.is_some() {
            self.exhaustion_policy = other.exhaustion_policy;
        }
        // An empty key list from the CLI means "not given".
        if other.api_keys.as_ref().is_some_and(|keys| !keys.is_empty()) {
            self.api_keys = other.api_keys;
        }
        if other.admin_key.is_some() {
            self.admin_key = other.admin_key;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        let config = GlobalConfig {
            host: self.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            data_dir: self
                .data_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            upstream_base_url: self
                .upstream_base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_UPSTREAM_BASE_URL.to_string()),
            proxy: self.proxy.filter(|proxy| !proxy.trim().is_empty()),
            session_pool_capacity: self
                .session_pool_capacity
                .unwrap_or(DEFAULT_SESSION_POOL_CAPACITY),
            request_timeout_secs: self
                .request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            default_model: self
                .default_model
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            rate_limit_cooldown_hours: self
                .rate_limit_cooldown_hours
                .unwrap_or(DEFAULT_RATE_LIMIT_COOLDOWN_HOURS),
            stream_chunk_size: self.stream_chunk_size.unwrap_or(DEFAULT_STREAM_CHUNK_SIZE),
            stream_chunk_delay_ms: self
                .stream_chunk_delay_ms
                .unwrap_or(DEFAULT_STREAM_CHUNK_DELAY_MS),
            exhaustion_policy: self.exhaustion_policy.unwrap_or_default(),
            api_keys: self
                .api_keys
                .unwrap_or_default()
                .into_iter()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty())
                .collect(),
            admin_key: self.admin_key.filter(|key| !key.trim().is_empty()),
        };
        if config.session_pool_capacity == 0 {
            return Err(GlobalConfigError::InvalidField {
                field: "session_pool_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if config.stream_chunk_size == 0 {
            return Err(GlobalConfigError::InvalidField {
                field: "stream_chunk_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if config.request_timeout_secs == 0 {
            return Err(GlobalConfigError::InvalidField {
                field: "request_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if config.default_model.trim().is_empty() {
            return Err(GlobalConfigError::InvalidField {
                field: "default_model",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(config)
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            data_dir: Some(value.data_dir),
            upstream_base_url: Some(value.upstream_base_url),
            proxy: value.proxy,
            session_pool_capacity: Some(value.session_pool_capacity),
            request_timeout_secs: Some(value.request_timeout_secs),
            default_model: Some(value.default_model),
            rate_limit_cooldown_hours: Some(value.rate_limit_cooldown_hours),
            stream_chunk_size: Some(value.stream_chunk_size),
            stream_chunk_delay_ms: Some(value.stream_chunk_delay_ms),
            exhaustion_policy: Some(value.exhaustion_policy),
            api_keys: Some(value.api_keys),
            admin_key: value.admin_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_patch() {
        let config = GlobalConfigPatch::default().into_config().unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.session_pool_capacity, 3);
        assert_eq!(config.default_model, "qwen-max-latest");
        assert_eq!(config.exhaustion_policy, ExhaustionPolicy::Reject);
        assert!(config.api_keys.is_empty());
        assert_eq!(
            config.credentials_path(),
            PathBuf::from("./session").join("tokens.json")
        );
    }

    #[test]
    fn later_layer_wins() {
        let mut merged: GlobalConfigPatch =
            serde_json::from_str(r#"{"port": 9000, "default_model": "qwen-plus"}"#).unwrap();
        merged.overlay(GlobalConfigPatch {
            port: Some(9100),
            api_keys: Some(Vec::new()),
            ..Default::default()
        });
        let config = merged.into_config().unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.default_model, "qwen-plus");
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = GlobalConfigPatch {
            stream_chunk_size: Some(0),
            ..Default::default()
        }
        .into_config()
        .unwrap_err();
        assert!(matches!(
            err,
            GlobalConfigError::InvalidField {
                field: "stream_chunk_size",
                ..
            }
        ));
    }

    #[test]
    fn exhaustion_policy_parses_case_insensitively() {
        assert_eq!(
            "Shutdown".parse::<ExhaustionPolicy>().unwrap(),
            ExhaustionPolicy::Shutdown
        );
        assert!("halt".parse::<ExhaustionPolicy>().is_err());
    }
}
