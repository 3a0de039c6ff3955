//! CLI command implementations.

pub mod request;
pub mod topology;

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use vellum_client::{ExecutorConfig, ReadBalance, RequestExecutor};

/// Connection flags shared by every command.
#[derive(Debug, Clone, Default, Args)]
pub struct ConnectionArgs {
    /// Node URL (repeat for several seed nodes)
    #[arg(short, long = "url", global = true)]
    pub urls: Vec<String>,

    /// Database name
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// YAML executor configuration; flags override its values
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Read balance policy (none, fastest-node, round-robin)
    #[arg(long, global = true)]
    pub read_balance: Option<ReadBalance>,

    /// Bearer token
    #[arg(long, env = "VELLUM_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,
}

impl ConnectionArgs {
    /// Merge the configuration file (if any) with the command-line flags.
    pub fn executor_config(&self) -> Result<ExecutorConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let yaml = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config: {}", path.display()))?;
                ExecutorConfig::from_yaml(&yaml)
                    .with_context(|| format!("Invalid config: {}", path.display()))?
            }
            None => ExecutorConfig::default(),
        };

        if !self.urls.is_empty() {
            config.urls = self.urls.clone();
        }
        if self.database.is_some() {
            config.database = self.database.clone();
        }
        if let Some(policy) = self.read_balance {
            config.read_balance = policy;
        }
        if self.api_key.is_some() {
            config.api_key = self.api_key.clone();
        }

        if config.urls.is_empty() {
            anyhow::bail!("No node URL given; pass --url or set `urls` in --config");
        }
        config.validate()?;
        Ok(config)
    }

    /// Build an executor from the merged configuration.
    pub fn connect(&self) -> Result<RequestExecutor> {
        let config = self.executor_config()?;
        tracing::debug!(urls = ?config.urls, database = ?config.database, "Connecting");
        Ok(RequestExecutor::new(config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_build_a_config() {
        let args = ConnectionArgs {
            urls: vec!["http://a:8080".into(), "http://b:8080".into()],
            database: Some("orders".into()),
            read_balance: Some(ReadBalance::RoundRobin),
            ..Default::default()
        };

        let config = args.executor_config().unwrap();
        assert_eq!(config.urls.len(), 2);
        assert_eq!(config.database.as_deref(), Some("orders"));
        assert_eq!(config.read_balance, ReadBalance::RoundRobin);
    }

    #[test]
    fn flags_override_config_file() {
        let path = std::env::temp_dir().join(format!("vellum-cli-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "urls: [\"http://file:8080\"]\ndatabase: from_file\nrequest_timeout_ms: 1500\n",
        )
        .unwrap();

        let args = ConnectionArgs {
            database: Some("orders".into()),
            config: Some(path.clone()),
            ..Default::default()
        };
        let config = args.executor_config().unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.urls, vec!["http://file:8080".to_string()]);
        assert_eq!(config.database.as_deref(), Some("orders"));
        assert_eq!(config.request_timeout_ms, 1500);
    }

    #[test]
    fn missing_urls_is_an_error() {
        let err = ConnectionArgs::default().executor_config().unwrap_err();
        assert!(err.to_string().contains("--url"));
    }

    #[test]
    fn bad_urls_fail_validation() {
        let args = ConnectionArgs {
            urls: vec!["ftp://a".into()],
            ..Default::default()
        };
        assert!(args.executor_config().is_err());
    }
}
