use serde::Deserialize;
use validator::Validate;

/// Main configuration for the IKnowEverything relay
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct Config {
    /// HTTP server port
    #[validate(range(min = 1024, max = 65535))]
    pub server_port: u16,

    /// Client API keys; each key identifies one user
    #[validate(length(min = 1))]
    pub api_keys: Vec<String>,

    /// Database URL (SeaORM / SQLite)
    pub database_url: String,

    /// Base URL of the chat-completion API
    pub completion_url: String,

    /// Optional bearer key for the completion API
    pub completion_api_key: Option<String>,

    /// Model name sent upstream
    pub completion_model: String,

    /// Optional system prompt prepended to every upstream request
    pub system_prompt: Option<String>,

    /// How many of the most recent messages are forwarded upstream
    #[validate(range(min = 1, max = 200))]
    pub context_window_messages: usize,

    /// Auto-derived conversation titles are truncated to this length
    #[validate(range(min = 8, max = 200))]
    pub title_max_chars: usize,

    /// Maximum database connections
    #[validate(range(min = 1, max = 100))]
    pub max_connections: u32,

    /// Log level (e.g., info, debug, trace)
    pub log_level: String,

    /// Whether permissive CORS is enabled
    pub cors_enabled: bool,

    /// Optional rate limit in requests per minute.
    /// If `None`, defaults to 1000.
    pub rate_limit_per_minute: Option<u32>,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            // Core defaults
            .set_default("server_port", 8080)?
            .set_default("api_keys", Vec::<String>::new())?
            .set_default("database_url", "sqlite://iknoweverything.db")?
            .set_default("completion_url", "https://api.openai.com")?
            .set_default("completion_model", "gpt-4o-mini")?
            .set_default("context_window_messages", 30)?
            .set_default("title_max_chars", 48)?
            .set_default("max_connections", 10)?
            .set_default("log_level", "info")?
            .set_default("cors_enabled", true)?
            .set_default("rate_limit_per_minute", 1000u32)?
            // Load from ~/.iknoweverything/config.toml (if present)
            .add_source(
                config::File::with_name(&format!(
                    "{}/.iknoweverything/config",
                    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
                ))
                .required(false),
            )
            // Environment overrides: IKE__SERVER_PORT, IKE__COMPLETION_URL, etc.
            .add_source(config::Environment::with_prefix("IKE").separator("__"))
            .build()?;

        let cfg: Config = settings.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Returns the effective rate limit (requests per minute).
    /// Defaults to 1000 if not explicitly set.
    pub fn effective_rate_limit(&self) -> u32 {
        self.rate_limit_per_minute.unwrap_or(1000)
    }
}
