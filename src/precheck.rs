//! Execution-context checks run before any host mutation.

use std::path::{Path, PathBuf};

use crate::error::{DeployError, DeployResult};

/// Facts about the running process that preconditions are checked
/// against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub effective_uid: u32,
}

impl ExecutionContext {
    /// Capture the context of the current process.
    #[must_use]
    pub fn current() -> Self {
        // SAFETY: geteuid has no preconditions and cannot fail.
        let effective_uid = unsafe { libc::geteuid() };
        Self { effective_uid }
    }

    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        self.effective_uid == 0
    }
}

/// What must hold before a run may touch the host.
///
/// # Example
///
/// ```
/// use alicerce::precheck::{ExecutionContext, Preconditions};
///
/// let checks = Preconditions::new("/definitely/missing/source")
///     .marker("app/main.py");
/// let ctx = ExecutionContext { effective_uid: 0 };
///
/// assert!(checks.check(&ctx).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct Preconditions {
    pub require_root: bool,
    pub source_dir: PathBuf,
    pub marker_file: Option<PathBuf>,
    pub required_files: Vec<PathBuf>,
}

impl Preconditions {
    #[must_use]
    pub fn new(source_dir: impl AsRef<Path>) -> Self {
        Self {
            require_root: true,
            source_dir: source_dir.as_ref().to_path_buf(),
            marker_file: None,
            required_files: Vec::new(),
        }
    }

    /// File that must exist relative to the source directory.
    #[must_use]
    pub fn marker(mut self, relative: impl AsRef<Path>) -> Self {
        self.marker_file = Some(relative.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn require_file(mut self, path: impl AsRef<Path>) -> Self {
        self.required_files.push(path.as_ref().to_path_buf());
        self
    }

    /// Check every precondition. Read-only: nothing on the host is
    /// changed whether the check passes or fails.
    pub fn check(&self, ctx: &ExecutionContext) -> DeployResult<()> {
        log::info!("Checking preconditions...");

        if self.require_root && !ctx.is_privileged() {
            return Err(DeployError::PreconditionFailed(format!(
                "must run as root (effective uid is {}); retry with sudo",
                ctx.effective_uid
            )));
        }

        if !self.source_dir.is_dir() {
            return Err(DeployError::PreconditionFailed(format!(
                "application source directory {} not found",
                self.source_dir.display()
            )));
        }

        if let Some(marker) = &self.marker_file {
            let path = self.source_dir.join(marker);
            if !path.is_file() {
                return Err(DeployError::PreconditionFailed(format!(
                    "{} not found; {} does not look like the application \
                     source",
                    path.display(),
                    self.source_dir.display()
                )));
            }
        }

        for file in &self.required_files {
            if !file.is_file() {
                return Err(DeployError::PreconditionFailed(format!(
                    "{} not found; run the install command first",
                    file.display()
                )));
            }
        }

        log::info!("Preconditions OK");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_context_is_privileged() {
        assert!(ExecutionContext { effective_uid: 0 }.is_privileged());
        assert!(!ExecutionContext { effective_uid: 1000 }.is_privileged());
    }

    #[test]
    fn builder_defaults() {
        let checks = Preconditions::new("/src");

        assert!(checks.require_root);
        assert_eq!(checks.source_dir, PathBuf::from("/src"));
        assert!(checks.marker_file.is_none());
        assert!(checks.required_files.is_empty());
    }
}
