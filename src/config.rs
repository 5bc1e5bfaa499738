//! Configuration loading: TOML file, overridden by `APP_*` env vars,
//! overridden by CLI flags — highest priority wins. Mirrors the layering in
//! `stellar::config::Config::load`.

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub cache: CacheConfig,
    pub analytics: AnalyticsConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            llm: LlmConfig::default(),
            cache: CacheConfig::default(),
            analytics: AnalyticsConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub statement_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/nlsql".to_string(),
            pool_size: 10,
            statement_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 300, max_entries: 10_000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub queue_size: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self { queue_size: 4_096 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub request_timeout_secs: u64,
    pub system_max_timeout_secs: u64,
    pub default_strategy: String,
    pub default_limit: u32,
    pub whitelist: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            system_max_timeout_secs: 60,
            default_strategy: "rule_first".to_string(),
            default_limit: 100,
            whitelist: vec![
                "customers".to_string(),
                "customer_memos".to_string(),
                "customer_products".to_string(),
                "users".to_string(),
                "events".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,nlsql_pipeline=debug".to_string(), file: None }
    }
}

/// Command line overrides (highest priority).
#[derive(Parser, Debug, Clone)]
#[command(name = "nlsql-pipeline")]
#[command(version, about = "Natural-language to SQL query pipeline")]
pub struct CommandLineArgs {
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,

    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Config {
    /// Loading order (highest to lowest priority): CLI args, env vars
    /// (`APP_*`), config file (`conf/config.toml`), defaults.
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(path) = config_path {
            Self::from_toml(&path)?
        } else {
            tracing::warn!("configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
        }
        if let Ok(url) = std::env::var("APP_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(key) = std::env::var("APP_LLM_API_KEY") {
            self.llm.api_key = key;
        }
        if let Ok(base) = std::env::var("APP_LLM_API_BASE") {
            self.llm.api_base = base;
        }
        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.server_port {
            self.server.port = port;
        }
        if let Some(url) = &args.database_url {
            self.database.url = url.clone();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("server.port cannot be 0");
        }
        if self.database.url.is_empty() {
            anyhow::bail!("database.url cannot be empty");
        }
        if self.pipeline.whitelist.is_empty() {
            anyhow::bail!("pipeline.whitelist cannot be empty");
        }
        if self.pipeline.default_limit == 0 || self.pipeline.default_limit > 100 {
            anyhow::bail!("pipeline.default_limit must be in 1..=100");
        }
        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let candidates = ["conf/config.toml", "config.toml", "./conf/config.toml"];
        candidates.iter().find(|p| Path::new(p).exists()).map(|p| p.to_string())
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// The per-request deadline bound: `min(requested, system_max)`.
    pub fn effective_timeout(&self, requested_secs: Option<u64>) -> std::time::Duration {
        let requested = requested_secs.unwrap_or(self.pipeline.request_timeout_secs);
        std::time::Duration::from_secs(requested.min(self.pipeline.system_max_timeout_secs))
    }
}
