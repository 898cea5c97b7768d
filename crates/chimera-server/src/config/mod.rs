use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Event bus configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BusConfig {
    /// Number of events kept in the log (default: 1000)
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Limit used when a caller asks for recent events without one (default: 50)
    #[serde(default = "default_query_limit")]
    pub default_query_limit: usize,
    /// Largest accepted recent-events limit (default: 10000)
    #[serde(default = "default_max_query_limit")]
    pub max_query_limit: usize,
}

fn default_log_capacity() -> usize {
    crate::event_bus::DEFAULT_LOG_CAPACITY
}

fn default_query_limit() -> usize {
    50
}

fn default_max_query_limit() -> usize {
    10_000
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            log_capacity: default_log_capacity(),
            default_query_limit: default_query_limit(),
            max_query_limit: default_max_query_limit(),
        }
    }
}

/// Eye module configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EyeConfig {
    /// Minimum time between two identical detection results (default: 5000)
    #[serde(default = "default_min_publish_interval_ms")]
    pub min_publish_interval_ms: u64,
}

fn default_min_publish_interval_ms() -> u64 {
    5_000
}

impl EyeConfig {
    pub fn min_publish_interval(&self) -> Duration {
        Duration::from_millis(self.min_publish_interval_ms)
    }
}

impl Default for EyeConfig {
    fn default() -> Self {
        Self {
            min_publish_interval_ms: default_min_publish_interval_ms(),
        }
    }
}

/// Brain module configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrainConfig {
    /// OpenAI API key; the Brain is not started without one
    #[serde(default)]
    pub openai_api_key: String,
    /// Model to use (default: gpt-4o-mini)
    #[serde(default = "default_model")]
    pub model: String,
    /// Optional OpenAI base URL (for proxies or compatible APIs)
    #[serde(default)]
    pub openai_base_url: Option<String>,
    /// Timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Event kinds the Brain reacts to (default: detection.result)
    #[serde(default = "default_interests")]
    pub interests: Vec<String>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_interests() -> Vec<String> {
    vec!["detection.result".to_string()]
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            model: default_model(),
            openai_base_url: None,
            timeout_secs: default_timeout(),
            interests: default_interests(),
        }
    }
}

/// What to do right after start-up
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StartupConfig {
    /// Modules toggled on before the console starts
    #[serde(default)]
    pub enabled_modules: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub eye: EyeConfig,
    #[serde(default)]
    pub brain: BrainConfig,
    #[serde(default)]
    pub startup: StartupConfig,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with defaults
            .add_source(File::with_name("config/default").required(false))
            // Add environment-specific file
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local configuration file (not tracked by git)
            .add_source(File::with_name("config/local").required(false))
            // Add in settings from environment variables, e.g. CHIMERA_BRAIN__OPENAI_API_KEY
            .add_source(
                Environment::with_prefix("CHIMERA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("brain.interests")
                    .with_list_parse_key("startup.enabled_modules"),
            )
            .build()?;

        s.try_deserialize()
    }
}
