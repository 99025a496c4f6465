use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "COLLECTIVE_GRAPH_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub collective: CollectiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub http_addr: String,
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:9110".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Base URL a local client uses to reach this daemon.
    pub fn url(&self) -> String {
        format!("http://{}", self.http_addr)
    }
}

/// Where the collective controller's REST API lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectiveConfig {
    pub base_url: String,
    pub api_prefix: String,
    pub timeout_secs: u64,
    pub accept_invalid_certs: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for CollectiveConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost:9443".to_string(),
            api_prefix: "/ibm/api/collective/v1".to_string(),
            timeout_secs: 30,
            accept_invalid_certs: false,
            username: None,
            password: None,
        }
    }
}

impl Config {
    pub fn path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("could not determine config directory")?;
        Ok(config_dir.join("collective-graph").join("config.yaml"))
    }
}

fn figment(file: &Path) -> Figment {
    Figment::from(Serialized::defaults(Config::default()))
        .merge(Yaml::file(file))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load config: defaults, then the YAML file, then `COLLECTIVE_GRAPH_*`
/// environment variables. A missing file is not an error.
pub fn load(path: Option<&str>) -> Result<Config> {
    let file = match path {
        Some(p) => {
            let p = PathBuf::from(p);
            if !p.exists() {
                anyhow::bail!("config file {} does not exist", p.display());
            }
            p
        }
        None => Config::path()?,
    };
    figment(&file)
        .extract()
        .with_context(|| format!("loading config from {}", file.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn yaml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "daemon:\n  http_addr: 0.0.0.0:8080\ncollective:\n  base_url: https://controller:9443\n  username: admin"
        )
        .unwrap();

        let config = load(file.path().to_str()).unwrap();
        assert_eq!(config.daemon.http_addr, "0.0.0.0:8080");
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.collective.base_url, "https://controller:9443");
        assert_eq!(config.collective.username.as_deref(), Some("admin"));
        assert_eq!(config.collective.timeout_secs, 30);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");
        assert!(load(missing.to_str()).is_err());
    }

    #[test]
    fn daemon_url_uses_http_addr() {
        assert_eq!(DaemonConfig::default().url(), "http://127.0.0.1:9110");
    }
}
