use indexmap::IndexMap;

use crate::config::DeployConfig;
use crate::secrets::SecretBundle;

/// Keys whose values are masked in [`EnvironmentManifest::render_masked`].
const SECRET_KEYS: &[&str] = &["SECRET_KEY", "DB_PASSWORD"];

/// Runtime configuration for the deployed application, rendered as
/// a flat `KEY=value` file.
///
/// Built fresh on every deploy from the secret bundle and the
/// deployment config; never merged with a previous file.
///
/// # Example
///
/// ```
/// use alicerce::{DeployConfig, EnvironmentManifest, SecretBundle};
///
/// let secrets = SecretBundle::generate();
/// let manifest = EnvironmentManifest::build(&DeployConfig::default(), &secrets);
///
/// assert_eq!(manifest.get("PORT"), Some("8081"));
/// assert_eq!(manifest.get("DB_PASSWORD"), Some(secrets.app_password.as_str()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvironmentManifest {
    entries: IndexMap<String, String>,
}

impl EnvironmentManifest {
    #[must_use]
    pub fn build(config: &DeployConfig, secrets: &SecretBundle) -> Self {
        let db = &config.database;
        let cors = serde_json::to_string(&config.cors_origins).unwrap_or_else(|_| "[]".to_string());
        let deploy = config.deploy_dir.display();

        Self::default()
            .set("PROJECT_NAME", &config.project_name)
            .set("ENVIRONMENT", &config.environment)
            .set("DEBUG", "False")
            .set("HOST", &config.host)
            .set("PORT", &config.port.to_string())
            .set("SECRET_KEY", &secrets.secret_key)
            .set("ALGORITHM", "HS256")
            .set("ACCESS_TOKEN_EXPIRE_MINUTES", "30")
            .set("DB_HOST", &db.host)
            .set("DB_PORT", &db.port.to_string())
            .set("DB_NAME", &db.name)
            .set("DB_USER", &db.user)
            .set("DB_PASSWORD", &secrets.app_password)
            .set("DB_CHARSET", &db.charset)
            .set("CORS_ORIGINS", &cors)
            .set(
                "UPLOAD_FOLDER",
                &format!("{deploy}/{}", config.upload_folder),
            )
            .set(
                "REPORTS_FOLDER",
                &format!("{deploy}/{}", config.reports_folder),
            )
            .set("LOG_LEVEL", "INFO")
    }

    /// Insert or replace a key, keeping first-insertion order.
    #[must_use]
    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.entries.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Entries in render order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn render(&self) -> String {
        self.render_with(|_, v| v.to_string())
    }

    /// Render with secret values replaced, for dry runs.
    #[must_use]
    pub fn render_masked(&self) -> String {
        self.render_with(|k, v| {
            if SECRET_KEYS.contains(&k) {
                "********".to_string()
            } else {
                v.to_string()
            }
        })
    }

    fn render_with(&self, value: impl Fn(&str, &str) -> String) -> String {
        let mut out = String::new();
        for (k, v) in &self.entries {
            out.push_str(k);
            out.push('=');
            out.push_str(&value(k, v));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_secrets() -> SecretBundle {
        SecretBundle {
            root_password: "root-pw".into(),
            app_password: "app-pw".into(),
            secret_key: "signing".into(),
        }
    }

    #[test]
    fn references_bundle_secrets() {
        let manifest = EnvironmentManifest::build(&DeployConfig::default(), &fixed_secrets());

        assert_eq!(manifest.get("DB_PASSWORD"), Some("app-pw"));
        assert_eq!(manifest.get("SECRET_KEY"), Some("signing"));
        assert!(!manifest.render().contains("root-pw"));
    }

    #[test]
    fn cors_is_json_list() {
        let manifest = EnvironmentManifest::build(&DeployConfig::default(), &fixed_secrets());

        assert_eq!(
            manifest.get("CORS_ORIGINS"),
            Some(r#"["http://localhost:3000","http://localhost:5173"]"#)
        );
    }

    #[test]
    fn folders_are_absolute_under_deploy_dir() {
        let manifest = EnvironmentManifest::build(&DeployConfig::default(), &fixed_secrets());

        assert_eq!(manifest.get("UPLOAD_FOLDER"), Some("/opt/pillcare/uploads"));
        assert_eq!(manifest.get("REPORTS_FOLDER"), Some("/opt/pillcare/reports"));
    }

    #[test]
    fn render_is_deterministic_and_ordered() {
        let config = DeployConfig::default();
        let a = EnvironmentManifest::build(&config, &fixed_secrets()).render();
        let b = EnvironmentManifest::build(&config, &fixed_secrets()).render();

        assert_eq!(a, b);
        assert!(a.starts_with("PROJECT_NAME=PillCare 360 API\n"));
    }

    #[test]
    fn masked_render_hides_secrets() {
        let manifest = EnvironmentManifest::build(&DeployConfig::default(), &fixed_secrets());

        let masked = manifest.render_masked();

        assert!(masked.contains("DB_PASSWORD=********"));
        assert!(masked.contains("SECRET_KEY=********"));
        assert!(!masked.contains("app-pw"));
        assert!(masked.contains("DB_USER=pillcare_user"));
    }

    #[test]
    fn set_replaces_in_place() {
        let manifest = EnvironmentManifest::default()
            .set("A", "1")
            .set("B", "2")
            .set("A", "3");

        assert_eq!(manifest.render(), "A=3\nB=2\n");
        assert_eq!(manifest.len(), 2);
    }
}
