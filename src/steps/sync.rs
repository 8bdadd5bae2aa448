//! Exact mirroring of a source tree into the deployment directory.
//!
//! Files missing from the source are deleted from the destination,
//! except under excluded names, which are neither copied nor
//! deleted (virtualenv, `.env`, upload folders).

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::cmd::Host;
use crate::error::{DeployError, DeployResult};
use crate::step::ProvisioningStep;

use super::chown;

/// Counts from one mirror pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub copied: usize,
    pub removed: usize,
    pub dirs_created: usize,
}

/// Pending changes between a source and destination tree. Paths
/// are relative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub remove: Vec<PathBuf>,
    pub create_dirs: Vec<PathBuf>,
    pub copy: Vec<PathBuf>,
    pub links: Vec<(PathBuf, PathBuf)>,
}

impl SyncPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty()
            && self.create_dirs.is_empty()
            && self.copy.is_empty()
            && self.links.is_empty()
    }
}

fn is_excluded(rel: &Path, excludes: &[String]) -> bool {
    rel.components()
        .any(|c| excludes.iter().any(|e| c.as_os_str() == e.as_str()))
}

fn relative(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

fn walk_err(e: walkdir::Error) -> DeployError {
    e.into_io_error()
        .map_or_else(|| DeployError::Other("filesystem loop during sync".into()), DeployError::Io)
}

fn same_content(a: &Path, b: &Path) -> DeployResult<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    Ok(fs::read(a)? == fs::read(b)?)
}

/// Compute what a mirror of `src` into `dst` would change.
pub fn plan(src: &Path, dst: &Path, excludes: &[String]) -> DeployResult<SyncPlan> {
    if !src.is_dir() {
        return Err(DeployError::FileNotFound(src.display().to_string()));
    }

    let mut plan = SyncPlan::default();

    let walker = WalkDir::new(src)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_excluded(&relative(src, e.path()), excludes));

    for entry in walker {
        let entry = entry.map_err(walk_err)?;
        let rel = relative(src, entry.path());
        let dest = dst.join(&rel);
        let dest_meta = fs::symlink_metadata(&dest).ok();
        let ft = entry.file_type();

        if ft.is_dir() {
            match dest_meta {
                Some(m) if m.is_dir() => {}
                Some(_) => {
                    plan.remove.push(rel.clone());
                    plan.create_dirs.push(rel);
                }
                None => plan.create_dirs.push(rel),
            }
        } else if ft.is_symlink() {
            let target = fs::read_link(entry.path())?;
            match dest_meta {
                Some(m) if m.file_type().is_symlink() && fs::read_link(&dest)? == target => {}
                Some(_) => {
                    plan.remove.push(rel.clone());
                    plan.links.push((rel, target));
                }
                None => plan.links.push((rel, target)),
            }
        } else {
            match dest_meta {
                Some(m) if m.is_file() => {
                    if !same_content(entry.path(), &dest)? {
                        plan.copy.push(rel);
                    }
                }
                Some(_) => {
                    plan.remove.push(rel.clone());
                    plan.copy.push(rel);
                }
                None => plan.copy.push(rel),
            }
        }
    }

    if dst.is_dir() {
        let mut walker = WalkDir::new(dst)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_excluded(&relative(dst, e.path()), excludes));

        while let Some(entry) = walker.next() {
            let entry = entry.map_err(walk_err)?;
            let rel = relative(dst, entry.path());
            if fs::symlink_metadata(src.join(&rel)).is_err() {
                plan.remove.push(rel);
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
            }
        }
    }

    Ok(plan)
}

/// Make `dst` an exact copy of `src`, minus excluded names.
pub fn mirror(src: &Path, dst: &Path, excludes: &[String]) -> DeployResult<SyncStats> {
    let plan = plan(src, dst, excludes)?;
    let mut stats = SyncStats::default();

    fs::create_dir_all(dst)?;

    for rel in &plan.remove {
        let path = dst.join(rel);
        match fs::symlink_metadata(&path) {
            Ok(m) if m.is_dir() => fs::remove_dir_all(&path)?,
            Ok(_) => fs::remove_file(&path)?,
            Err(_) => continue,
        }
        log::debug!("sync: removed {}", rel.display());
        stats.removed += 1;
    }

    for rel in &plan.create_dirs {
        fs::create_dir_all(dst.join(rel))?;
        stats.dirs_created += 1;
    }

    for rel in &plan.copy {
        let to = dst.join(rel);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src.join(rel), &to)?;
        stats.copied += 1;
    }

    for (rel, target) in &plan.links {
        std::os::unix::fs::symlink(target, dst.join(rel))?;
        stats.copied += 1;
    }

    Ok(stats)
}

/// Mirror the application source into the deployment directory.
#[derive(Debug, Clone)]
pub struct MirrorSync {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub exclude: Vec<String>,
    pub owner: Option<String>,
}

impl MirrorSync {
    #[must_use]
    pub fn new(source: impl AsRef<Path>, dest: impl AsRef<Path>) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            dest: dest.as_ref().to_path_buf(),
            exclude: Vec::new(),
            owner: None,
        }
    }

    #[must_use]
    pub fn excludes(mut self, names: &[String]) -> Self {
        self.exclude.extend(names.iter().cloned());
        self
    }

    #[must_use]
    pub fn owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }
}

impl ProvisioningStep for MirrorSync {
    fn name(&self) -> String {
        format!("sync:{}", self.dest.display())
    }

    fn description(&self) -> String {
        format!(
            "Mirror {} -> {}",
            self.source.display(),
            self.dest.display()
        )
    }

    fn is_applied(&self, _host: &dyn Host) -> DeployResult<bool> {
        Ok(self.dest.is_dir() && plan(&self.source, &self.dest, &self.exclude)?.is_empty())
    }

    fn apply(&self, _host: &dyn Host) -> DeployResult<()> {
        let stats = mirror(&self.source, &self.dest, &self.exclude)?;
        log::info!(
            "  {} copied, {} removed, {} directories created",
            stats.copied,
            stats.removed,
            stats.dirs_created
        );
        Ok(())
    }

    fn finalize(&self, host: &dyn Host) -> DeployResult<()> {
        if let Some(owner) = &self.owner {
            chown(host, &self.dest, owner, true)?;
        }
        Ok(())
    }
}
