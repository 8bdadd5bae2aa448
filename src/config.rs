use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, DeployResult};

/// Deployment settings. Every field has a default so an empty or
/// partial YAML file is valid.
///
/// # Example
///
/// ```
/// use alicerce::DeployConfig;
///
/// let config: DeployConfig =
///     serde_yaml::from_str("app_name: clinic\nport: 9000\n").unwrap();
///
/// assert_eq!(config.app_name, "clinic");
/// assert_eq!(config.port, 9000);
/// assert_eq!(config.database.name, "pillcare360");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Used for the systemd unit, Nginx site and log file names.
    pub app_name: String,
    /// Human-readable name passed to the application.
    pub project_name: String,
    pub source_dir: PathBuf,
    pub deploy_dir: PathBuf,
    /// File that must exist under `source_dir` for the source to
    /// count as the application.
    pub marker_file: PathBuf,
    pub service_user: String,
    pub host: String,
    pub port: u16,
    pub server_name: String,
    pub database: DatabaseConfig,
    pub credential_store: PathBuf,
    pub log_dir: PathBuf,
    pub upload_folder: String,
    pub reports_folder: String,
    pub cors_origins: Vec<String>,
    pub environment: String,
    pub health_path: String,
    pub probe_timeout_secs: u64,
    pub settle_secs: u64,
    pub venv_dir: String,
    pub requirements_file: String,
    /// Path relative to `deploy_dir`, run inside the virtualenv on
    /// install.
    pub schema_script: Option<String>,
    pub packages: Vec<String>,
    pub firewall_rules: Vec<String>,
    pub sync_exclude: Vec<String>,
    pub systemd_dir: PathBuf,
    pub nginx_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub charset: String,
    pub service: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            name: "pillcare360".to_string(),
            user: "pillcare_user".to_string(),
            charset: "utf8mb4".to_string(),
            service: "mysql".to_string(),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            app_name: "pillcare".to_string(),
            project_name: "PillCare 360 API".to_string(),
            source_dir: PathBuf::from("/home/ubuntu/pillcare-backend"),
            deploy_dir: PathBuf::from("/opt/pillcare"),
            marker_file: PathBuf::from("app/main.py"),
            service_user: "www-data".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8081,
            server_name: "_".to_string(),
            database: DatabaseConfig::default(),
            credential_store: PathBuf::from("/root/.pillcare_credentials"),
            log_dir: PathBuf::from("/var/log/pillcare"),
            upload_folder: "uploads".to_string(),
            reports_folder: "reports".to_string(),
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
            environment: "production".to_string(),
            health_path: "/health".to_string(),
            probe_timeout_secs: 5,
            settle_secs: 5,
            venv_dir: "venv".to_string(),
            requirements_file: "requirements.txt".to_string(),
            schema_script: Some("scripts/create_tables.py".to_string()),
            packages: [
                "python3",
                "python3-venv",
                "python3-pip",
                "python3-dev",
                "default-libmysqlclient-dev",
                "build-essential",
                "pkg-config",
                "mysql-server",
                "nginx",
                "ufw",
                "curl",
            ]
            .map(String::from)
            .to_vec(),
            firewall_rules: vec!["OpenSSH".to_string(), "Nginx Full".to_string()],
            sync_exclude: [
                "venv",
                ".env",
                "uploads",
                "reports",
                "logs",
                "__pycache__",
                ".git",
            ]
            .map(String::from)
            .to_vec(),
            systemd_dir: PathBuf::from("/etc/systemd/system"),
            nginx_dir: PathBuf::from("/etc/nginx"),
        }
    }
}

impl DeployConfig {
    /// Load from a YAML file, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> DeployResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        if !path.exists() {
            return Err(DeployError::FileNotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> DeployResult<()> {
        if self.app_name.is_empty()
            || !self
                .app_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DeployError::Config(format!(
                "app_name '{}' must be non-empty and contain only \
                 [A-Za-z0-9_-]",
                self.app_name
            )));
        }
        if !self.health_path.starts_with('/') {
            return Err(DeployError::Config(format!(
                "health_path '{}' must start with '/'",
                self.health_path
            )));
        }
        for ident in [&self.database.name, &self.database.user] {
            if ident.is_empty() || !ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(DeployError::Config(format!(
                    "database identifier '{ident}' must contain only \
                     [A-Za-z0-9_]"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn unit_name(&self) -> String {
        format!("{}.service", self.app_name)
    }

    #[must_use]
    pub fn env_file(&self) -> PathBuf {
        self.deploy_dir.join(".env")
    }

    #[must_use]
    pub fn venv_path(&self) -> PathBuf {
        self.deploy_dir.join(&self.venv_dir)
    }

    #[must_use]
    pub fn health_url(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.port, self.health_path)
    }

    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    #[must_use]
    pub const fn settle_time(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = DeployConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.unit_name(), "pillcare.service");
        assert_eq!(config.env_file(), PathBuf::from("/opt/pillcare/.env"));
        assert_eq!(config.health_url(), "http://127.0.0.1:8081/health");
    }

    #[test]
    fn rejects_bad_app_name() {
        let config = DeployConfig {
            app_name: "my app;rm".to_string(),
            ..DeployConfig::default()
        };

        assert!(matches!(config.validate(), Err(DeployError::Config(_))));
    }

    #[test]
    fn rejects_quoted_database_user() {
        let mut config = DeployConfig::default();
        config.database.user = "x'--".to_string();

        assert!(matches!(config.validate(), Err(DeployError::Config(_))));
    }

    #[test]
    fn load_without_path_uses_defaults() {
        let config = DeployConfig::load(None).expect("defaults load");

        assert_eq!(config, DeployConfig::default());
    }
}
