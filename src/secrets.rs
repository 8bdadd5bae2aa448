//! Credential bootstrapping.
//!
//! Secrets are generated once, applied to the credential target
//! (the database server), and persisted to an owner-only key=value
//! store. Every later run reads the store and never regenerates.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::{DeployError, DeployResult};

pub const ROOT_PASSWORD_KEY: &str = "MYSQL_ROOT_PASSWORD";
pub const APP_PASSWORD_KEY: &str = "DB_PASSWORD";
pub const SECRET_KEY_KEY: &str = "SECRET_KEY";

/// Random bytes drawn per secret before encoding.
pub const SECRET_BYTES: usize = 32;

const STORE_MODE: u32 = 0o600;

/// Generated credentials shared by the database and the
/// application environment.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretBundle {
    pub root_password: String,
    pub app_password: String,
    pub secret_key: String,
}

impl fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBundle")
            .field("root_password", &"<redacted>")
            .field("app_password", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl SecretBundle {
    /// Fresh secrets from the operating system's CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            root_password: random_secret(),
            app_password: random_secret(),
            secret_key: random_secret(),
        }
    }

    /// Parse store content. Blank lines and `#` comments are
    /// ignored; all three keys must be present and non-empty.
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut root = None;
        let mut app = None;
        let mut key = None;

        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (k, v) = line
                .split_once('=')
                .ok_or_else(|| format!("line {}: expected KEY=value", lineno + 1))?;
            let slot = match k.trim() {
                ROOT_PASSWORD_KEY => &mut root,
                APP_PASSWORD_KEY => &mut app,
                SECRET_KEY_KEY => &mut key,
                _ => continue,
            };
            *slot = Some(v.trim().to_string());
        }

        let require = |value: Option<String>, name: &str| match value {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(format!("missing {name}")),
        };

        Ok(Self {
            root_password: require(root, ROOT_PASSWORD_KEY)?,
            app_password: require(app, APP_PASSWORD_KEY)?,
            secret_key: require(key, SECRET_KEY_KEY)?,
        })
    }

    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "# Generated by alicerce. Do not edit; secrets are reused on \
             every run.\n\
             {ROOT_PASSWORD_KEY}={}\n\
             {APP_PASSWORD_KEY}={}\n\
             {SECRET_KEY_KEY}={}\n",
            self.root_password, self.app_password, self.secret_key
        )
    }

    pub fn load(path: &Path) -> DeployResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| DeployError::SecretStore {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&content).map_err(|reason| DeployError::SecretStore {
            path: path.display().to_string(),
            reason,
        })
    }

    /// Write atomically with owner-only permissions.
    pub fn persist(&self, path: &Path) -> DeployResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = sibling(path, "tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(STORE_MODE)
                .open(&tmp)?;
            file.write_all(self.render().as_bytes())?;
            file.sync_all()?;
        }
        fs::set_permissions(&tmp, fs::Permissions::from_mode(STORE_MODE))?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn random_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Path where freshly generated secrets wait until they have been
/// applied to the credential target.
#[must_use]
pub fn pending_path(store: &Path) -> PathBuf {
    sibling(store, "pending")
}

/// How the administrative account of the credential target can be
/// reached right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootAccess {
    /// No password set yet (fresh install, socket auth).
    NoPassword,
    /// The candidate root password is accepted.
    Password,
    /// The server answered but rejected both.
    Denied,
}

/// The system whose accounts receive the generated passwords.
pub trait CredentialTarget {
    /// Make the target reachable (e.g. start the database server).
    fn prepare(&self) -> DeployResult<()>;

    /// Determine the current root access state. Must fail with
    /// [`DeployError::DatabaseUnreachable`] rather than report
    /// [`RootAccess::Denied`] when the server cannot be contacted.
    fn detect(&self, candidate: &SecretBundle) -> DeployResult<RootAccess>;

    /// Set the root password (if needed) and create the
    /// application account, connecting via `access`.
    fn initialize(&self, access: RootAccess, bundle: &SecretBundle) -> DeployResult<()>;
}

impl<T: CredentialTarget + ?Sized> CredentialTarget for &T {
    fn prepare(&self) -> DeployResult<()> {
        (**self).prepare()
    }

    fn detect(&self, candidate: &SecretBundle) -> DeployResult<RootAccess> {
        (**self).detect(candidate)
    }

    fn initialize(&self, access: RootAccess, bundle: &SecretBundle) -> DeployResult<()> {
        (**self).initialize(access, bundle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Primary,
    Fallback,
}

/// Run `primary`; if it fails run `fallback`. If both fail the
/// combined error carries both causes.
pub fn attempt_with_fallback<T>(
    primary: impl FnOnce() -> DeployResult<T>,
    fallback: impl FnOnce() -> DeployResult<T>,
) -> DeployResult<(T, Attempt)> {
    match primary() {
        Ok(value) => Ok((value, Attempt::Primary)),
        Err(primary_err) => {
            log::warn!("Primary attempt failed: {primary_err}; trying fallback");
            match fallback() {
                Ok(value) => Ok((value, Attempt::Fallback)),
                Err(fallback_err) => Err(DeployError::BootstrapFailed {
                    primary: Box::new(primary_err),
                    fallback: Box::new(fallback_err),
                }),
            }
        }
    }
}

/// Where the returned bundle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretOrigin {
    /// Read from the persisted store; nothing was generated or
    /// applied.
    Existing,
    /// Reused from a pending file left by an interrupted run.
    Resumed,
    Generated,
}

#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub bundle: SecretBundle,
    pub origin: SecretOrigin,
}

/// Return the persisted secrets, creating and applying them on the
/// first run.
pub fn ensure_secrets(store: &Path, target: &dyn CredentialTarget) -> DeployResult<Bootstrap> {
    if store.exists() {
        log::info!("Using existing credentials from {}", store.display());
        // Permission drift self-heals; content is never rewritten.
        fs::set_permissions(store, fs::Permissions::from_mode(STORE_MODE))?;
        return Ok(Bootstrap {
            bundle: SecretBundle::load(store)?,
            origin: SecretOrigin::Existing,
        });
    }

    let pending = pending_path(store);
    let (bundle, origin) = if pending.exists() {
        log::warn!(
            "Resuming interrupted bootstrap with secrets from {}",
            pending.display()
        );
        (SecretBundle::load(&pending)?, SecretOrigin::Resumed)
    } else {
        log::info!("Generating new credentials");
        let bundle = SecretBundle::generate();
        bundle.persist(&pending)?;
        (bundle, SecretOrigin::Generated)
    };

    target.prepare()?;

    let (first, second) = match target.detect(&bundle)? {
        RootAccess::Password => (RootAccess::Password, RootAccess::NoPassword),
        RootAccess::NoPassword | RootAccess::Denied => {
            (RootAccess::NoPassword, RootAccess::Password)
        }
    };
    log::info!("Initializing credentials (root access: {first:?})");

    let ((), used) = attempt_with_fallback(
        || target.initialize(first, &bundle),
        || target.initialize(second, &bundle),
    )?;
    log::debug!("Credential initialization succeeded on {used:?} attempt");

    fs::rename(&pending, store)?;
    fs::set_permissions(store, fs::Permissions::from_mode(STORE_MODE))?;
    log::info!("Credentials saved to {}", store.display());

    Ok(Bootstrap { bundle, origin })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_are_distinct_and_long() {
        let bundle = SecretBundle::generate();

        assert_eq!(bundle.root_password.len(), 43);
        assert_ne!(bundle.root_password, bundle.app_password);
        assert_ne!(bundle.app_password, bundle.secret_key);
        assert!(
            bundle
                .secret_key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn parse_reads_rendered_store() {
        let bundle = SecretBundle::generate();

        let parsed = SecretBundle::parse(&bundle.render()).expect("parse");

        assert_eq!(parsed, bundle);
    }

    #[test]
    fn parse_rejects_missing_key() {
        let err = SecretBundle::parse("MYSQL_ROOT_PASSWORD=a\nDB_PASSWORD=b\n").unwrap_err();

        assert_eq!(err, "missing SECRET_KEY");
    }

    #[test]
    fn parse_rejects_garbage_line() {
        let err = SecretBundle::parse("not a pair\n").unwrap_err();

        assert!(err.contains("line 1"));
    }

    #[test]
    fn debug_redacts() {
        let bundle = SecretBundle::generate();

        let shown = format!("{bundle:?}");

        assert!(!shown.contains(&bundle.root_password));
        assert!(shown.contains("<redacted>"));
    }

    #[test]
    fn pending_path_is_sibling() {
        assert_eq!(
            pending_path(Path::new("/root/.creds")),
            PathBuf::from("/root/.creds.pending")
        );
    }

    #[test]
    fn fallback_used_when_primary_fails() {
        let (value, attempt) =
            attempt_with_fallback(|| Err(DeployError::Other("a".into())), || Ok(7))
                .expect("fallback succeeds");

        assert_eq!(value, 7);
        assert_eq!(attempt, Attempt::Fallback);
    }

    #[test]
    fn fallback_not_run_when_primary_succeeds() {
        let (value, attempt) = attempt_with_fallback(
            || Ok(1),
            || -> DeployResult<i32> { panic!("fallback must not run") },
        )
        .expect("primary succeeds");

        assert_eq!(value, 1);
        assert_eq!(attempt, Attempt::Primary);
    }

    #[test]
    fn both_attempts_failing_is_fatal() {
        let err = attempt_with_fallback::<()>(
            || Err(DeployError::Other("first".into())),
            || Err(DeployError::Other("second".into())),
        )
        .unwrap_err();

        assert!(matches!(err, DeployError::BootstrapFailed { .. }));
        let msg = err.to_string();
        assert!(msg.contains("first"));
        assert!(msg.contains("second"));
    }
}
