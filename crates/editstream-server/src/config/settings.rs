use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    pub gemini: GeminiConfig,
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub body_limit_mb: usize,
}

/// Set `base_url` to forward every edit to another instance speaking the
/// same protocol instead of running the workflow here.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub planning_model: String,
    pub image_model: String,
    pub thinking_budget: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkflowConfig {
    pub default_max_iterations: u32,
    /// Skip the self-check on the last allowed iteration and keep its image.
    pub accept_final_iteration: bool,
}

impl Settings {
    /// Defaults, then `config/settings.{toml,yaml,..}`, then `EDITSTREAM_*`
    /// environment variables (`EDITSTREAM_SERVER__PORT=9000`).
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Self::defaults()?
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("EDITSTREAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;

        if settings.gemini.api_key.is_none() {
            settings.gemini.api_key = std::env::var("GEMINI_API_KEY")
                .or_else(|_| std::env::var("GOOGLE_API_KEY"))
                .ok();
        }

        Ok(settings)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("server.environment", "development")?
            .set_default("server.body_limit_mb", 50)?
            .set_default("upstream.connect_timeout_seconds", 10)?
            .set_default("gemini.base_url", "https://generativelanguage.googleapis.com/v1beta")?
            .set_default("gemini.planning_model", "gemini-3-flash-preview")?
            .set_default("gemini.image_model", "gemini-3-pro-image-preview")?
            .set_default("gemini.thinking_budget", 8192)?
            .set_default("workflow.default_max_iterations", 3)?
            .set_default("workflow.accept_final_iteration", true)
    }

    /// Built-in defaults only, no file or environment lookups.
    pub fn from_defaults() -> Result<Self, ConfigError> {
        Self::defaults()?.build()?.try_deserialize()
    }
}
