//! Concrete provisioning steps.

pub mod command;
pub mod database;
pub mod firewall;
pub mod fs;
pub mod packages;
pub mod python;
pub mod service;
pub mod sync;

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::cmd::{Host, Invocation};
use crate::error::DeployResult;

pub use command::CommandStep;
pub use database::DatabaseObjects;
pub use firewall::Firewall;
pub use fs::{Directory, ManagedFile, RemovePath, Symlink};
pub use packages::AptPackages;
pub use python::PythonEnv;
pub use service::ServiceRunning;
pub use sync::{MirrorSync, SyncStats, mirror};

/// Set ownership via `chown`. `owner` is `user` or `user:group`.
pub(crate) fn chown(
    host: &dyn Host,
    path: &Path,
    owner: &str,
    recursive: bool,
) -> DeployResult<()> {
    let mut inv = Invocation::new("chown");
    if recursive {
        inv = inv.arg("-R");
    }
    host.exec(&inv.arg(owner).arg(path.display().to_string()))?;
    Ok(())
}

pub(crate) fn set_mode(path: &Path, mode: u32) -> DeployResult<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Permission bits of `path`, or `None` if it does not exist.
pub(crate) fn mode_of(path: &Path) -> Option<u32> {
    std::fs::metadata(path)
        .ok()
        .map(|m| m.permissions().mode() & 0o7777)
}
