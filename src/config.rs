use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const DEFAULT_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub ncbi: NcbiSection,
    #[serde(default)]
    pub throttle: ThrottleSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub archive: ArchiveSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct NcbiSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ThrottleSection {
    #[serde(default)]
    pub requests_per_window: Option<u32>,
    #[serde(default)]
    pub window_ms: Option<u64>,
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SessionSection {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_sessions: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ServerSection {
    #[serde(default)]
    pub bind: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ArchiveSection {
    #[serde(default)]
    pub combined_fasta: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NcbiSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub email: Option<String>,
    pub tool: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleSettings {
    pub requests_per_window: u32,
    pub window: Duration,
    pub max_in_flight: usize,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub call_timeout: Duration,
}

impl ThrottleSettings {
    pub fn for_api_key(has_key: bool) -> Self {
        Self {
            requests_per_window: if has_key { 10 } else { 3 },
            window: Duration::from_secs(1),
            max_in_flight: if has_key { 8 } else { 3 },
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self::for_api_key(false)
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub ncbi: NcbiSettings,
    pub throttle: ThrottleSettings,
    pub session_timeout: Option<Duration>,
    pub max_sessions: usize,
    pub bind: SocketAddr,
    pub combined_fasta: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub api_key: Option<String>,
    pub email: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            api_key: read("NCBI_API_KEY"),
            email: read("NCBI_EMAIL"),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let env = EnvOverrides::from_env();
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover_path(),
        };

        let config = match config_path {
            Some(config_path) => {
                if path.is_some() && !config_path.exists() {
                    return Err(KiraError::ConfigRead(config_path));
                }
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
                tracing::debug!(path = %config_path.display(), "loaded config");
                serde_json::from_str(&content)
                    .map_err(|err| KiraError::ConfigParse(err.to_string()))?
            }
            None => Config::default(),
        };

        Self::resolve_config(config, &env)
    }

    fn discover_path() -> Option<PathBuf> {
        let local = PathBuf::from("kira-clade.json");
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("kira-clade").join("config.json"))
            .filter(|path| path.exists())
    }

    pub fn resolve_config(config: Config, env: &EnvOverrides) -> Result<ResolvedConfig, KiraError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let api_key = env
            .api_key
            .clone()
            .or(config.ncbi.api_key)
            .filter(|key| !key.trim().is_empty());
        let ncbi = NcbiSettings {
            base_url: config
                .ncbi
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            email: env.email.clone().or(config.ncbi.email),
            tool: config.ncbi.tool.unwrap_or_else(|| "kira-clade".to_string()),
            api_key,
        };

        let defaults = ThrottleSettings::for_api_key(ncbi.api_key.is_some());
        let section = config.throttle;
        let throttle = ThrottleSettings {
            requests_per_window: section
                .requests_per_window
                .unwrap_or(defaults.requests_per_window),
            window: section
                .window_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.window),
            max_in_flight: section.max_in_flight.unwrap_or(defaults.max_in_flight),
            max_attempts: section.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: section
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            call_timeout: section
                .call_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.call_timeout),
        };
        if throttle.requests_per_window == 0 || throttle.window.is_zero() {
            return Err(KiraError::ConfigParse(
                "throttle window must admit at least one request".to_string(),
            ));
        }
        if throttle.max_in_flight == 0 || throttle.max_attempts == 0 {
            return Err(KiraError::ConfigParse(
                "max_in_flight and max_attempts must be positive".to_string(),
            ));
        }

        let session_timeout = match config.session.timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(Duration::from_secs(30 * 60)),
        };
        if let Some(session_timeout) = session_timeout {
            if session_timeout <= throttle.call_timeout {
                return Err(KiraError::ConfigParse(
                    "session timeout must exceed the per-call timeout".to_string(),
                ));
            }
        }

        let bind = config
            .server
            .bind
            .unwrap_or_else(|| "127.0.0.1:8000".to_string())
            .parse::<SocketAddr>()
            .map_err(|err| KiraError::ConfigParse(format!("server.bind: {err}")))?;

        Ok(ResolvedConfig {
            schema_version,
            ncbi,
            throttle,
            session_timeout,
            max_sessions: config.session.max_sessions.unwrap_or(16).max(1),
            bind,
            combined_fasta: config.archive.combined_fasta.unwrap_or(false),
        })
    }
}
