use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for the swarm field
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SwarmFieldConfig {
    /// Database settings
    pub database: DatabaseConfig,
    /// Potential/temperature model and sensing settings
    pub field: FieldConfig,
    /// Liveness sweeper settings
    pub liveness: LivenessConfig,
    /// Defaults applied to newly registered agents
    pub agents: AgentDefaults,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite connection string
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
    /// How long a writer waits on a locked database
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FieldConfig {
    /// Temperature added to a node every time its claim is released
    pub release_temperature_boost: f64,
    /// Half-life of temperature decay; 0 disables decay
    pub temperature_half_life_secs: u64,
    /// Upper bound for stored temperature
    pub temperature_cap: f64,
    /// Candidates returned by sense when no limit is given
    pub default_sense_limit: usize,
    /// Hard ceiling on the sense limit
    pub max_sense_limit: usize,
    /// Agent types allowed to approve resolved nodes
    pub review_agent_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LivenessConfig {
    /// Agents silent for longer than this are reclaimed
    pub heartbeat_timeout_secs: u64,
    /// Interval between sweeps
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentDefaults {
    pub default_max_turns: u32,
    pub default_checkpoint_at: u32,
    pub default_max_context_tokens: u64,
    /// Fraction of max_context_tokens that forces a checkpoint
    pub context_checkpoint_ratio: f64,
    /// Hand off to a successor at checkpoint instead of releasing the claim
    pub handoff_on_checkpoint: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON logs instead of human-readable ones
    pub json_logs: bool,
}

impl Default for SwarmFieldConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            field: FieldConfig::default(),
            liveness: LivenessConfig::default(),
            agents: AgentDefaults::default(),
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: false,
            },
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://.swarm-field/field.db".to_string(),
            max_connections: 8,
            auto_migrate: true,
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            release_temperature_boost: 0.5,
            temperature_half_life_secs: 1_800, // 30 minutes
            temperature_cap: 5.0,
            default_sense_limit: 10,
            max_sense_limit: 100,
            review_agent_types: vec!["reviewer".to_string()],
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 120,
            sweep_interval_secs: 30,
        }
    }
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            default_max_turns: 50,
            default_checkpoint_at: 40,
            default_max_context_tokens: 200_000,
            context_checkpoint_ratio: 0.9,
            handoff_on_checkpoint: true,
        }
    }
}

impl LivenessConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl SwarmFieldConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (swarm-field.toml)
    /// 3. Environment variables (prefixed with SWARM_FIELD, `__` between sections)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("swarm-field.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("SWARM_FIELD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<SwarmFieldConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = SwarmFieldConfig::load_env_file();
        SwarmFieldConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static SwarmFieldConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}
