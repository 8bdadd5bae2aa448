use crate::cmd::Host;
use crate::config::DatabaseConfig;
use crate::error::DeployResult;
use crate::mysql::MysqlAdmin;
use crate::secrets::SecretBundle;
use crate::step::ProvisioningStep;

/// The application database and account. Creating them is
/// create-if-missing; an existing account's password is never
/// changed.
#[derive(Debug, Clone)]
pub struct DatabaseObjects {
    pub database: DatabaseConfig,
    pub secrets: SecretBundle,
}

impl DatabaseObjects {
    #[must_use]
    pub fn new(database: &DatabaseConfig, secrets: &SecretBundle) -> Self {
        Self {
            database: database.clone(),
            secrets: secrets.clone(),
        }
    }
}

impl ProvisioningStep for DatabaseObjects {
    fn name(&self) -> String {
        format!("mysql:{}", self.database.name)
    }

    fn description(&self) -> String {
        format!(
            "Ensure database {} and user {}",
            self.database.name, self.database.user
        )
    }

    fn is_applied(&self, host: &dyn Host) -> DeployResult<bool> {
        let admin = MysqlAdmin::new(host, &self.database);
        let root = &self.secrets.root_password;
        Ok(admin.database_exists(root)? && admin.user_exists(root)?)
    }

    fn apply(&self, host: &dyn Host) -> DeployResult<()> {
        MysqlAdmin::new(host, &self.database)
            .ensure_app_objects(&self.secrets.root_password, &self.secrets.app_password)
    }
}
