use anyhow::Context;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub mongo: MongoConfig,
    pub task: TaskConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default)]
    pub env: Env,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    #[default]
    Dev,
    Prod,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    pub uris: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,
    pub dispatch: DispatchBinding,
    pub result: ResultBinding,
}

/// Where dispatch messages are published.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchBinding {
    pub exchange: String,
    pub routing_key: String,
}

/// Where worker results are consumed from. The queue is declared
/// externally.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResultBinding {
    pub queue: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MongoConfig {
    pub uri: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub database: String,
    /// "majority" (default) or a node count.
    #[serde(default)]
    pub write_concern: Option<String>,
    /// "majority", "local", etc.
    #[serde(default)]
    pub read_concern: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    pub alphabet: String,
    pub chunk_size: u64,
    /// Deadline granted to each task before the timeout sweep fails it.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Upper bound on concurrently active tasks; 0 disables the limit.
    #[serde(default)]
    pub limit: u64,
    /// Tasks older than this are deleted wholesale.
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    /// Cadence of the timeout sweep.
    #[serde(with = "humantime_serde")]
    pub finish_delay: Duration,
    /// Cadence of pending-subtask re-execution.
    #[serde(with = "humantime_serde")]
    pub restart_delay: Duration,
}

fn default_prefetch() -> u16 {
    1
}

pub fn load(path: &Path) -> anyhow::Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.broker.uris.is_empty(), "broker.uris must not be empty");
        anyhow::ensure!(!self.mongo.uri.is_empty(), "mongo.uri must not be empty");
        anyhow::ensure!(
            !self.mongo.database.is_empty(),
            "mongo.database must not be empty"
        );
        anyhow::ensure!(
            !self.task.alphabet.is_empty(),
            "task.alphabet must not be empty"
        );
        anyhow::ensure!(self.task.chunk_size > 0, "task.chunk_size must be positive");
        anyhow::ensure!(
            !self.task.timeout.is_zero(),
            "task.timeout must be positive"
        );
        anyhow::ensure!(
            !self.task.max_age.is_zero(),
            "task.max_age must be positive"
        );
        Ok(())
    }
}
