use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tokio::fs::{create_dir_all, read_to_string, write};

use crate::api::engine::EngineConfig;
use crate::naming::SnapshotClass;
use crate::retention::RetentionPolicy;

const DEFAULT_POLL_INTERVAL: &str = "10s";
const DEFAULT_POLL_DEADLINE: &str = "30m";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(skip_serializing, skip_deserializing)]
    pub config_path: PathBuf,

    #[serde(rename = "default-environment")]
    pub default_environment: String,

    #[serde(rename = "environment", default)]
    pub environments: Vec<Environment>,
}

/// One deployment environment: engine endpoint, credentials, export target
/// and retention counts. Read-only after load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    pub name: String,
    pub fqdn: String,
    pub username: String,
    pub password: String,

    #[serde(rename = "ca-file", skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,

    #[serde(rename = "export-host")]
    pub export_host: String,

    #[serde(rename = "export-dir")]
    pub export_dir: String,

    #[serde(rename = "log-dir", skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    #[serde(rename = "poll-interval", default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(rename = "poll-deadline", default = "default_poll_deadline")]
    pub poll_deadline: String,

    #[serde(default)]
    pub retention: Retention,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Retention {
    #[serde(default = "default_nightly_keep")]
    pub nightly: usize,

    #[serde(default = "default_weekly_keep")]
    pub weekly: usize,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            nightly: default_nightly_keep(),
            weekly: default_weekly_keep(),
        }
    }
}

fn default_poll_interval() -> String {
    DEFAULT_POLL_INTERVAL.to_string()
}

fn default_poll_deadline() -> String {
    DEFAULT_POLL_DEADLINE.to_string()
}

fn default_nightly_keep() -> usize {
    5
}

fn default_weekly_keep() -> usize {
    4
}

impl Environment {
    pub fn poll_interval(&self) -> Result<Duration> {
        humantime::parse_duration(&self.poll_interval)
            .with_context(|| format!("invalid poll-interval {:?}", self.poll_interval))
    }

    pub fn poll_deadline(&self) -> Result<Duration> {
        humantime::parse_duration(&self.poll_deadline)
            .with_context(|| format!("invalid poll-deadline {:?}", self.poll_deadline))
    }

    pub fn policy(&self, class: SnapshotClass) -> RetentionPolicy {
        let keep = match class {
            SnapshotClass::Nightly => self.retention.nightly,
            SnapshotClass::Weekly => self.retention.weekly,
        };
        RetentionPolicy { class, keep }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            fqdn: self.fqdn.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            ca_file: self.ca_file.clone(),
        }
    }
}

impl Config {
    pub fn environment(&self, name: Option<&str>) -> Result<&Environment> {
        let name = match name {
            Some(name) => name,
            None if !self.default_environment.is_empty() => &self.default_environment,
            None => bail!(
                "no environment selected; pass --environment or set default-environment in {}",
                self.config_path.display()
            ),
        };

        self.environments
            .iter()
            .find(|env| env.name == name)
            .with_context(|| {
                format!(
                    "environment {:?} not found in {}",
                    name,
                    self.config_path.display()
                )
            })
    }

    pub async fn load() -> Result<Self> {
        let config_path_env = std::env::var("SNAPKEEP_CONFIG");
        let config_path = if let Ok(path) = config_path_env {
            PathBuf::from(path)
        } else {
            let Some(project_dirs) = directories::ProjectDirs::from("io", "snapkeep", "snapkeep")
            else {
                bail!("Failed to get config dir");
            };

            let config_dir = project_dirs.config_dir();
            if !config_dir.exists() {
                create_dir_all(config_dir).await?;
            };

            config_dir.join("config.toml")
        };

        Self::load_from(config_path).await
    }

    pub async fn load_from(config_path: PathBuf) -> Result<Self> {
        if !config_path.exists() {
            let config = Self {
                config_path,
                default_environment: String::new(),
                environments: vec![],
            };

            config.save().await?;

            Ok(config)
        } else {
            let config_str = read_to_string(&config_path).await?;
            let mut config: Self = toml::from_str(&config_str)
                .with_context(|| format!("failed to parse {}", config_path.display()))?;
            config.config_path = config_path;

            Ok(config)
        }
    }

    pub async fn save(&self) -> Result<()> {
        let config_str = toml::to_string_pretty(&self)?;
        write(&self.config_path, config_str).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        default-environment = "lab"

        [[environment]]
        name = "lab"
        fqdn = "engine.lab.example.com"
        username = "admin@internal"
        password = "hunter2"
        ca-file = "/etc/pki/ovirt/lab-ca.pem"
        export-host = "backup01"
        export-dir = "/srv/exports"
        poll-interval = "2s"
        poll-deadline = "5m"

        [environment.retention]
        nightly = 7
        weekly = 3

        [[environment]]
        name = "prod"
        fqdn = "engine.prod.example.com"
        username = "admin@internal"
        password = "hunter3"
        export-host = "backup02"
        export-dir = "/srv/exports"
    "#;

    #[test]
    fn test_environment_selection_and_defaults() {
        let config: Config = toml::from_str(SAMPLE).expect("parse");

        let lab = config.environment(None).expect("default env");
        assert_eq!(lab.name, "lab");
        assert_eq!(lab.poll_interval().expect("interval"), Duration::from_secs(2));
        assert_eq!(lab.retention.nightly, 7);
        assert_eq!(lab.policy(SnapshotClass::Weekly).keep, 3);

        let prod = config.environment(Some("prod")).expect("prod env");
        assert_eq!(prod.retention.nightly, 5);
        assert_eq!(prod.retention.weekly, 4);
        assert_eq!(
            prod.poll_interval().expect("interval"),
            Duration::from_secs(10)
        );
        assert!(prod.ca_file.is_none());

        assert!(config.environment(Some("staging")).is_err());
    }

    #[tokio::test]
    async fn test_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, SAMPLE).await.expect("write sample");

        let config = Config::load_from(path.clone()).await.expect("load");
        assert_eq!(config.environments.len(), 2);

        config.save().await.expect("save");
        let reloaded = Config::load_from(path).await.expect("reload");
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_load_writes_default_on_first_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        let config = Config::load_from(path.clone()).await.expect("load");
        assert!(config.environments.is_empty());
        assert!(path.exists());
        assert!(config.environment(None).is_err());
    }
}
