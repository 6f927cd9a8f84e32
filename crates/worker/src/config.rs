use anyhow::Context;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
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

/// Where dispatch messages are consumed from.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchBinding {
    pub queue: String,
}

/// Where progress results are published.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResultBinding {
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Candidates per chunk; must match the manager's splitter.
    pub chunk_size: u64,
    /// Cadence of in-progress snapshots per chunk.
    #[serde(with = "humantime_serde")]
    pub progress_period: Duration,
    /// Concurrently executing chunks.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_prefetch() -> u16 {
    1
}

fn default_concurrency() -> usize {
    4
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
        anyhow::ensure!(self.task.chunk_size > 0, "task.chunk_size must be positive");
        anyhow::ensure!(
            !self.task.progress_period.is_zero(),
            "task.progress_period must be positive"
        );
        anyhow::ensure!(
            self.task.concurrency > 0,
            "task.concurrency must be positive"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
server:
  port: 8081
broker:
  uris: [amqp://rabbit-1:5672]
  username: guest
  password: guest
  prefetch: 4
  dispatch:
    queue: task-dispatch
  result:
    exchange: hashcrack
    routing_key: task.result
task:
  chunk_size: 10000000
  progress_period: 10s
  concurrency: 8
"#;

    #[test]
    fn parses_and_validates() {
        let config: Config = serde_yaml::from_str(YAML).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.env, Env::Dev);
        assert_eq!(config.task.progress_period, Duration::from_secs(10));
        assert_eq!(config.task.concurrency, 8);
    }
}
