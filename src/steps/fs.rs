//! Filesystem steps: directories, generated files, symlinks and
//! removals.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::cmd::Host;
use crate::error::DeployResult;
use crate::step::ProvisioningStep;

use super::{chown, mode_of, set_mode};

/// A directory that must exist.
#[derive(Debug, Clone)]
pub struct Directory {
    pub path: PathBuf,
    pub mode: Option<u32>,
    pub owner: Option<String>,
    pub recursive_owner: bool,
}

impl Directory {
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            mode: None,
            owner: None,
            recursive_owner: false,
        }
    }

    #[must_use]
    pub const fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    #[must_use]
    pub fn owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    /// Apply ownership to the whole tree.
    #[must_use]
    pub const fn recursive(mut self) -> Self {
        self.recursive_owner = true;
        self
    }
}

impl ProvisioningStep for Directory {
    fn name(&self) -> String {
        format!("dir:{}", self.path.display())
    }

    fn description(&self) -> String {
        format!("Create directory {}", self.path.display())
    }

    fn is_applied(&self, _host: &dyn Host) -> DeployResult<bool> {
        Ok(self.path.is_dir())
    }

    fn apply(&self, _host: &dyn Host) -> DeployResult<()> {
        fs::create_dir_all(&self.path)?;
        Ok(())
    }

    fn finalize(&self, host: &dyn Host) -> DeployResult<()> {
        if let Some(mode) = self.mode {
            set_mode(&self.path, mode)?;
        }
        if let Some(owner) = &self.owner {
            chown(host, &self.path, owner, self.recursive_owner)?;
        }
        Ok(())
    }
}

/// A file whose full content is generated by this run.
#[derive(Debug, Clone)]
pub struct ManagedFile {
    pub path: PathBuf,
    pub content: String,
    pub mode: u32,
    pub owner: Option<String>,
    pub unit_definition: bool,
}

impl ManagedFile {
    #[must_use]
    pub fn new(path: impl AsRef<Path>, content: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            content: content.into(),
            mode: 0o644,
            owner: None,
            unit_definition: false,
        }
    }

    #[must_use]
    pub const fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    /// Mark as a service-manager unit so a change triggers a
    /// definition reload.
    #[must_use]
    pub const fn unit_definition(mut self) -> Self {
        self.unit_definition = true;
        self
    }
}

impl ProvisioningStep for ManagedFile {
    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn description(&self) -> String {
        format!("Write {}", self.path.display())
    }

    fn is_applied(&self, _host: &dyn Host) -> DeployResult<bool> {
        match fs::read(&self.path) {
            Ok(current) => Ok(current == self.content.as_bytes()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn apply(&self, _host: &dyn Host) -> DeployResult<()> {
        write_atomic(&self.path, self.content.as_bytes(), self.mode)
    }

    fn finalize(&self, host: &dyn Host) -> DeployResult<()> {
        if mode_of(&self.path) != Some(self.mode) {
            set_mode(&self.path, self.mode)?;
        }
        if let Some(owner) = &self.owner {
            chown(host, &self.path, owner, false)?;
        }
        Ok(())
    }

    fn is_unit_definition(&self) -> bool {
        self.unit_definition
    }
}

/// Write via a temp file in the same directory and rename, so a
/// reader never sees a partial file.
pub(crate) fn write_atomic(path: &Path, content: &[u8], mode: u32) -> DeployResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".alicerce-tmp");
    let tmp = path.with_file_name(tmp_name);

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&tmp)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    set_mode(&tmp, mode)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// A symbolic link pointing at `target`.
#[derive(Debug, Clone)]
pub struct Symlink {
    pub link: PathBuf,
    pub target: PathBuf,
}

impl Symlink {
    #[must_use]
    pub fn new(link: impl AsRef<Path>, target: impl AsRef<Path>) -> Self {
        Self {
            link: link.as_ref().to_path_buf(),
            target: target.as_ref().to_path_buf(),
        }
    }
}

impl ProvisioningStep for Symlink {
    fn name(&self) -> String {
        format!("symlink:{}", self.link.display())
    }

    fn description(&self) -> String {
        format!(
            "Link {} -> {}",
            self.link.display(),
            self.target.display()
        )
    }

    fn is_applied(&self, _host: &dyn Host) -> DeployResult<bool> {
        Ok(fs::read_link(&self.link).is_ok_and(|current| current == self.target))
    }

    fn apply(&self, _host: &dyn Host) -> DeployResult<()> {
        if fs::symlink_metadata(&self.link).is_ok() {
            fs::remove_file(&self.link)?;
        }
        if let Some(parent) = self.link.parent() {
            fs::create_dir_all(parent)?;
        }
        std::os::unix::fs::symlink(&self.target, &self.link)?;
        Ok(())
    }
}

/// A path that must not exist (e.g. a distribution default site).
#[derive(Debug, Clone)]
pub struct RemovePath {
    pub path: PathBuf,
}

impl RemovePath {
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ProvisioningStep for RemovePath {
    fn name(&self) -> String {
        format!("absent:{}", self.path.display())
    }

    fn description(&self) -> String {
        format!("Remove {}", self.path.display())
    }

    fn is_applied(&self, _host: &dyn Host) -> DeployResult<bool> {
        Ok(fs::symlink_metadata(&self.path).is_err())
    }

    fn apply(&self, _host: &dyn Host) -> DeployResult<()> {
        let meta = fs::symlink_metadata(&self.path)?;
        if meta.is_dir() {
            fs::remove_dir_all(&self.path)?;
        } else {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
