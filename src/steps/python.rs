use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::cmd::{Host, Invocation};
use crate::error::DeployResult;
use crate::step::ProvisioningStep;

use super::chown;

/// Marker touched after a successful dependency install.
pub const INSTALLED_MARKER: &str = ".alicerce-installed";

/// A Python virtualenv with the application's requirements.
///
/// Dependencies are reinstalled only when the requirements file is
/// newer than the install marker.
#[derive(Debug, Clone)]
pub struct PythonEnv {
    pub app_dir: PathBuf,
    pub venv: PathBuf,
    pub requirements: PathBuf,
    pub owner: Option<String>,
}

impl PythonEnv {
    #[must_use]
    pub fn new(app_dir: impl AsRef<Path>, venv: impl AsRef<Path>, requirements: &str) -> Self {
        let app_dir = app_dir.as_ref().to_path_buf();
        Self {
            requirements: app_dir.join(requirements),
            venv: venv.as_ref().to_path_buf(),
            app_dir,
            owner: None,
        }
    }

    #[must_use]
    pub fn owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    #[must_use]
    pub fn marker(&self) -> PathBuf {
        self.venv.join(INSTALLED_MARKER)
    }

    fn python(&self) -> String {
        self.venv.join("bin").join("python").display().to_string()
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Whether dependencies must be (re)installed: the marker is
/// missing, or the requirements file is newer than it.
#[must_use]
pub fn needs_install(requirements: &Path, marker: &Path) -> bool {
    match (modified(requirements), modified(marker)) {
        (_, None) => true,
        (Some(req), Some(mark)) => req > mark,
        (None, Some(_)) => false,
    }
}

impl ProvisioningStep for PythonEnv {
    fn name(&self) -> String {
        format!("venv:{}", self.venv.display())
    }

    fn description(&self) -> String {
        format!("Install Python dependencies into {}", self.venv.display())
    }

    fn is_applied(&self, _host: &dyn Host) -> DeployResult<bool> {
        Ok(self.venv.join("bin").join("python").exists()
            && !needs_install(&self.requirements, &self.marker()))
    }

    fn apply(&self, host: &dyn Host) -> DeployResult<()> {
        if !self.venv.join("bin").join("python").exists() {
            host.exec(
                &Invocation::new("python3")
                    .args(["-m", "venv"])
                    .arg(self.venv.display().to_string()),
            )?;
        }

        let python = self.python();
        host.exec_interactive(
            &Invocation::new(&python)
                .args(["-m", "pip", "install", "--upgrade", "pip", "wheel"])
                .current_dir(&self.app_dir),
        )?;
        if self.requirements.exists() {
            host.exec_interactive(
                &Invocation::new(&python)
                    .args(["-m", "pip", "install", "-r"])
                    .arg(self.requirements.display().to_string())
                    .current_dir(&self.app_dir),
            )?;
        } else {
            log::warn!(
                "{} not found; skipping dependency install",
                self.requirements.display()
            );
        }

        fs::write(self.marker(), b"")?;
        Ok(())
    }

    fn finalize(&self, host: &dyn Host) -> DeployResult<()> {
        if let Some(owner) = &self.owner {
            if self.venv.exists() {
                chown(host, &self.venv, owner, true)?;
            }
        }
        Ok(())
    }
}
