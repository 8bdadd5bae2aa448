//! MySQL as the credential target: detection of the root account
//! state, root password initialization, and the application
//! database and account.

use crate::cmd::{Host, Invocation};
use crate::config::DatabaseConfig;
use crate::error::{DeployError, DeployResult};
use crate::secrets::{CredentialTarget, RootAccess, SecretBundle};

/// Client error codes meaning the server answered and refused the
/// credentials.
const ACCESS_DENIED: &[&str] = &["ERROR 1045", "ERROR 1698"];

/// Client error codes meaning the server could not be reached.
const UNREACHABLE: &[&str] = &["ERROR 2002", "ERROR 2003", "ERROR 2005", "ERROR 2013"];

/// Outcome of a probe connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    Accepted,
    Denied,
    Unreachable,
    Unknown,
}

/// Classify the stderr of a failed `mysql` client call.
#[must_use]
pub fn classify_client_error(stderr: &str) -> ProbeResult {
    if ACCESS_DENIED.iter().any(|code| stderr.contains(code)) {
        ProbeResult::Denied
    } else if UNREACHABLE.iter().any(|code| stderr.contains(code)) {
        ProbeResult::Unreachable
    } else {
        ProbeResult::Unknown
    }
}

/// Quote a string as a MySQL single-quoted literal.
#[must_use]
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// SQL that creates the application database and account if they
/// are missing. An existing account keeps its password.
#[must_use]
pub fn app_objects_sql(db: &DatabaseConfig, app_password: &str) -> String {
    let user = quote(&db.user);
    format!(
        "CREATE DATABASE IF NOT EXISTS `{name}` CHARACTER SET {charset} \
         COLLATE {charset}_unicode_ci;\n\
         CREATE USER IF NOT EXISTS {user}@'localhost' IDENTIFIED BY {password};\n\
         GRANT ALL PRIVILEGES ON `{name}`.* TO {user}@'localhost';\n\
         FLUSH PRIVILEGES;\n",
        name = db.name,
        charset = db.charset,
        password = quote(app_password),
    )
}

/// SQL that sets the root password and switches root to password
/// authentication.
#[must_use]
pub fn root_password_sql(root_password: &str) -> String {
    format!(
        "ALTER USER 'root'@'localhost' IDENTIFIED WITH \
         mysql_native_password BY {};\nFLUSH PRIVILEGES;\n",
        quote(root_password)
    )
}

/// MySQL administration through the `mysql` command-line client.
pub struct MysqlAdmin<'a> {
    host: &'a dyn Host,
    db: DatabaseConfig,
}

impl<'a> MysqlAdmin<'a> {
    #[must_use]
    pub fn new(host: &'a dyn Host, db: &DatabaseConfig) -> Self {
        Self {
            host,
            db: db.clone(),
        }
    }

    fn client(root_password: Option<&str>) -> Invocation {
        let inv = Invocation::new("mysql").args(["--user=root", "--batch", "--skip-column-names"]);
        match root_password {
            Some(password) => inv.env("MYSQL_PWD", password),
            None => inv,
        }
    }

    /// Execute SQL as root.
    pub fn execute(&self, root_password: Option<&str>, sql: &str) -> DeployResult<String> {
        self.host.exec(&Self::client(root_password).stdin(sql))
    }

    fn probe(&self, root_password: Option<&str>) -> DeployResult<ProbeResult> {
        match self.execute(root_password, "SELECT 1;") {
            Ok(_) => Ok(ProbeResult::Accepted),
            Err(err @ DeployError::CommandFailed { .. }) => {
                Ok(classify_client_error(err.stderr().unwrap_or_default()))
            }
            Err(err) => Err(err),
        }
    }

    /// Whether the application database exists.
    pub fn database_exists(&self, root_password: &str) -> DeployResult<bool> {
        let out = self.execute(
            Some(root_password),
            &format!(
                "SELECT SCHEMA_NAME FROM information_schema.SCHEMATA \
                 WHERE SCHEMA_NAME = {};",
                quote(&self.db.name)
            ),
        )?;
        Ok(out.lines().any(|l| l.trim() == self.db.name))
    }

    /// Whether the application account exists.
    pub fn user_exists(&self, root_password: &str) -> DeployResult<bool> {
        let out = self.execute(
            Some(root_password),
            &format!(
                "SELECT User FROM mysql.user WHERE User = {} AND Host = 'localhost';",
                quote(&self.db.user)
            ),
        )?;
        Ok(out.lines().any(|l| l.trim() == self.db.user))
    }

    /// Create the application database and account if missing.
    pub fn ensure_app_objects(&self, root_password: &str, app_password: &str) -> DeployResult<()> {
        self.execute(Some(root_password), &app_objects_sql(&self.db, app_password))?;
        Ok(())
    }
}

impl CredentialTarget for MysqlAdmin<'_> {
    fn prepare(&self) -> DeployResult<()> {
        if !self.host.command_exists("mysql") {
            log::info!("Installing mysql-server...");
            self.host.exec_interactive(
                &Invocation::new("apt-get")
                    .args(["install", "-y", "mysql-server"])
                    .env("DEBIAN_FRONTEND", "noninteractive"),
            )?;
        }
        self.host.exec(
            &Invocation::new("systemctl").args(["enable", "--now", self.db.service.as_str()]),
        )?;
        Ok(())
    }

    fn detect(&self, candidate: &SecretBundle) -> DeployResult<RootAccess> {
        let without = self.probe(None)?;
        if without == ProbeResult::Accepted {
            return Ok(RootAccess::NoPassword);
        }

        let with = self.probe(Some(&candidate.root_password))?;
        match (without, with) {
            (_, ProbeResult::Accepted) => Ok(RootAccess::Password),
            (ProbeResult::Unreachable, _) | (_, ProbeResult::Unreachable) => {
                Err(DeployError::DatabaseUnreachable(format!(
                    "mysql on {}:{} did not accept connections",
                    self.db.host, self.db.port
                )))
            }
            _ => Ok(RootAccess::Denied),
        }
    }

    fn initialize(&self, access: RootAccess, bundle: &SecretBundle) -> DeployResult<()> {
        match access {
            RootAccess::NoPassword => {
                let sql = format!(
                    "{}{}",
                    app_objects_sql(&self.db, &bundle.app_password),
                    root_password_sql(&bundle.root_password)
                );
                self.execute(None, &sql)?;
            }
            RootAccess::Password | RootAccess::Denied => {
                self.ensure_app_objects(&bundle.root_password, &bundle.app_password)?;
            }
        }
        Ok(())
    }
}
