use crate::conversation::{AssistantDefaults, PollPolicy};
use crate::gateway::GatewaySettings;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Gateway API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Gateway base URL
    #[arg(long, env = "OPENAI_BASE_URL")]
    pub base_url: Option<String>,

    /// Model for newly created assistants
    #[arg(long, env = "OPENAI_MODEL")]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub assistant: AssistantConfig,
    pub polling: PollingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Deserialize, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub organization: Option<String>,
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("organization", &self.organization)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    pub name: String,
    pub instructions: String,
    pub model: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    pub interval_ms: u64,
    /// Zero disables the bound.
    pub max_wait_secs: u64,
}

impl AppConfig {
    /// Load from the process arguments.
    ///
    /// Usage errors, `--help` and `--version` are handled by clap, which
    /// prints and exits with its own status code.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::from_cli(Cli::parse())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Self::from_cli(cli)
    }

    fn from_cli(cli: Cli) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("server.port", 3000)?
            .set_default("server.host", "127.0.0.1")?
            .set_default("gateway.base_url", "https://api.openai.com")?
            .set_default("gateway.request_timeout_secs", 60)?
            .set_default("assistant.name", "Default Assistant")?
            .set_default("assistant.instructions", "")?
            .set_default("assistant.model", "gpt-4o-mini")?
            .set_default("polling.interval_ms", 1000)?
            .set_default("polling.max_wait_secs", 600)?;

        // 2. Config file: explicit path, else optional ./config.{yaml,toml,json}
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // 3. Environment variables, e.g. CHAT_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("CHAT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // 4. CLI flags (and the env vars clap maps onto them) win
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(key) = cli.api_key {
            builder = builder.set_override("gateway.api_key", key)?;
        }
        if let Some(url) = cli.base_url {
            builder = builder.set_override("gateway.base_url", url)?;
        }
        if let Some(model) = cli.model {
            builder = builder.set_override("assistant.model", model)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }

    /// Gateway connection settings. Fails if no API key was provided.
    pub fn gateway_settings(&self) -> Result<GatewaySettings, String> {
        let api_key = self.gateway.api_key.trim();
        if api_key.is_empty() {
            return Err(
                "Missing gateway API key: set OPENAI_API_KEY or gateway.api_key".to_string(),
            );
        }
        if self.gateway.base_url.trim().is_empty() {
            return Err("gateway.base_url cannot be empty".to_string());
        }

        Ok(GatewaySettings {
            base_url: self.gateway.base_url.clone(),
            api_key: api_key.to_string(),
            organization: self
                .gateway
                .organization
                .clone()
                .filter(|s| !s.trim().is_empty()),
            request_timeout: Duration::from_secs(self.gateway.request_timeout_secs),
        })
    }

    #[must_use]
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.polling.interval_ms),
            max_wait: (self.polling.max_wait_secs > 0)
                .then(|| Duration::from_secs(self.polling.max_wait_secs)),
        }
    }

    #[must_use]
    pub fn assistant_defaults(&self) -> AssistantDefaults {
        AssistantDefaults {
            name: self.assistant.name.clone(),
            instructions: self.assistant.instructions.clone(),
            model: self.assistant.model.clone(),
        }
    }
}
