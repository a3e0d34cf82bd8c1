//! Process configuration: defaults, an optional TOML file, then environment overrides.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DeployError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "deploy_config.toml";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 900;
/// GitHub caps delivery payloads at 25MB
const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DeployConfig {
    pub bind_address: String,
    pub port: u16,
    /// Status API credential; `None` disables status reporting entirely
    pub github_token: Option<String>,
    pub github_api_url: String,
    pub app_id: String,
    pub proxy_domain: String,
    pub status_context: String,
    /// Checkout that fetch and test run in
    pub working_dir: PathBuf,
    /// Directory the deploy command runs in
    pub deploy_dir: PathBuf,
    /// `{branch}` is replaced with the pushed branch
    pub fetch_command: String,
    pub test_command: String,
    pub deploy_command: String,
    /// 0 disables the per-stage timeout
    pub stage_timeout_secs: u64,
    pub webhook_secret: Option<String>,
    /// Deliveries larger than this are refused with 413
    pub max_body_bytes: usize,
    pub log_dir: Option<PathBuf>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            github_token: None,
            github_api_url: "https://api.github.com".to_string(),
            app_id: "localhost".to_string(),
            proxy_domain: "local".to_string(),
            status_context: "ci/push-deploy".to_string(),
            working_dir: PathBuf::from("."),
            deploy_dir: PathBuf::from("."),
            fetch_command: "git pull origin {branch}".to_string(),
            test_command: "./test.sh".to_string(),
            deploy_command: "./deploy.sh".to_string(),
            stage_timeout_secs: DEFAULT_STAGE_TIMEOUT_SECS,
            webhook_secret: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            log_dir: None,
        }
    }
}

impl DeployConfig {
    /// Returns true if a non-empty status API token is configured.
    pub fn status_enabled(&self) -> bool {
        self.github_token
            .as_ref()
            .map(|t| !t.is_empty())
            .unwrap_or(false)
    }

    /// Returns true if inbound deliveries must carry a valid signature.
    pub fn needs_webhook_secret(&self) -> bool {
        self.webhook_secret
            .as_ref()
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }

    /// Externally reachable address of the deployed application
    pub fn target_url(&self) -> String {
        format!("http://app.{}.{}:{}", self.app_id, self.proxy_domain, self.port)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        (self.stage_timeout_secs > 0).then(|| Duration::from_secs(self.stage_timeout_secs))
    }

    /// Applies overrides from a key lookup (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = lookup("GITHUB_TOKEN") {
            // An explicitly empty token switches reporting off
            self.github_token = Some(v).filter(|t| !t.is_empty());
        }
        if let Some(v) = text("ID") {
            self.app_id = v;
        }
        if let Some(v) = text("PROXY") {
            self.proxy_domain = v;
        }
        if let Some(v) = text("PORT") {
            self.port = v
                .trim()
                .parse()
                .map_err(|e| DeployError::ConfigError(format!("Invalid PORT '{}': {}", v, e)))?;
        }
        if let Some(v) = text("BIND_ADDRESS") {
            self.bind_address = v;
        }
        if let Some(v) = text("GITHUB_API_URL") {
            self.github_api_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = text("STATUS_CONTEXT") {
            self.status_context = v;
        }
        if let Some(v) = text("WORKING_DIR") {
            self.working_dir = PathBuf::from(v);
        }
        if let Some(v) = text("DEPLOY_DIR") {
            self.deploy_dir = PathBuf::from(v);
        }
        if let Some(v) = text("FETCH_COMMAND") {
            self.fetch_command = v;
        }
        if let Some(v) = text("TEST_COMMAND") {
            self.test_command = v;
        }
        if let Some(v) = text("DEPLOY_COMMAND") {
            self.deploy_command = v;
        }
        if let Some(v) = text("STAGE_TIMEOUT_SECS") {
            self.stage_timeout_secs = v.trim().parse().map_err(|e| {
                DeployError::ConfigError(format!("Invalid STAGE_TIMEOUT_SECS '{}': {}", v, e))
            })?;
        }
        if let Some(v) = text("WEBHOOK_SECRET") {
            self.webhook_secret = Some(v);
        }
        if let Some(v) = text("MAX_BODY_BYTES") {
            self.max_body_bytes = v.trim().parse().map_err(|e| {
                DeployError::ConfigError(format!("Invalid MAX_BODY_BYTES '{}': {}", v, e))
            })?;
        }
        if let Some(v) = text("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Rejects configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("fetch_command", &self.fetch_command),
            ("test_command", &self.test_command),
            ("deploy_command", &self.deploy_command),
        ] {
            if value.trim().is_empty() {
                return Err(DeployError::ConfigError(format!("{} is empty", key)));
            }
        }
        if self.max_body_bytes == 0 {
            return Err(DeployError::ConfigError("max_body_bytes must be positive".to_string()));
        }
        if self.github_api_url.trim().is_empty() {
            return Err(DeployError::ConfigError("github_api_url is empty".to_string()));
        }
        Ok(())
    }
}

/// Parse a TOML configuration string
pub fn parse_config(config_str: &str) -> Result<DeployConfig> {
    Ok(toml::from_str(config_str)?)
}

/// Load the configuration file if it exists, falling back to defaults
pub fn load_config_file(path: &Path) -> Result<DeployConfig> {
    if !path.exists() {
        return Ok(DeployConfig::default());
    }
    let config_str = fs::read_to_string(path).map_err(|e| {
        DeployError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&config_str).map_err(|e| {
        DeployError::ConfigError(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Build the process configuration from the config file and environment
pub fn load_config() -> Result<DeployConfig> {
    let path = std::env::var("DEPLOY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = load_config_file(Path::new(&path))?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_disable_reporting() {
        let config = DeployConfig::default();
        assert!(!config.status_enabled());
        assert!(!config.needs_webhook_secret());
        assert_eq!(config.target_url(), "http://app.localhost.local:8080");
        assert_eq!(config.stage_timeout(), Some(Duration::from_secs(900)));
        assert_eq!(config.max_body_bytes, 25 * 1024 * 1024);
    }

    #[test]
    fn env_overrides_take_precedence() {
        let mut config = parse_config(
            r#"
            port = 9000
            app_id = "from-file"
            test_command = "make test"
            "#,
        )
        .unwrap();

        config
            .apply_overrides(lookup(&[
                ("ID", "team7"),
                ("PROXY", "example.net"),
                ("GITHUB_TOKEN", "ghp_secret"),
                ("STAGE_TIMEOUT_SECS", "0"),
            ]))
            .unwrap();

        assert_eq!(config.app_id, "team7");
        assert_eq!(config.test_command, "make test");
        assert!(config.status_enabled());
        assert_eq!(config.stage_timeout(), None);
        assert_eq!(config.target_url(), "http://app.team7.example.net:9000");
    }

    #[test]
    fn empty_token_disables_reporting() {
        let mut config = DeployConfig {
            github_token: Some("from-file".into()),
            ..DeployConfig::default()
        };
        config
            .apply_overrides(lookup(&[("GITHUB_TOKEN", "")]))
            .unwrap();
        assert!(!config.status_enabled());
    }

    #[test]
    fn invalid_port_is_a_config_error() {
        let mut config = DeployConfig::default();
        let err = config
            .apply_overrides(lookup(&[("PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, DeployError::ConfigError(_)));
    }

    #[test]
    fn body_limit_comes_from_env() {
        let mut config = DeployConfig::default();
        config
            .apply_overrides(lookup(&[("MAX_BODY_BYTES", "4096")]))
            .unwrap();
        assert_eq!(config.max_body_bytes, 4096);

        config.max_body_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_command_fails_validation() {
        let config = DeployConfig {
            deploy_command: "   ".into(),
            ..DeployConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, DeployConfig::default());
    }

    #[test]
    fn malformed_config_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy_config.toml");
        fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(load_config_file(&path).is_err());
    }
}
