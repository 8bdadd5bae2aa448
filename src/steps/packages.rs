use crate::cmd::{Host, Invocation};
use crate::error::DeployResult;
use crate::step::ProvisioningStep;

/// A set of Debian packages installed through `apt-get`.
#[derive(Debug, Clone)]
pub struct AptPackages {
    pub packages: Vec<String>,
}

impl AptPackages {
    #[must_use]
    pub fn new<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            packages: packages.into_iter().map(Into::into).collect(),
        }
    }

    /// Packages `dpkg-query` does not report as installed.
    pub fn missing(&self, host: &dyn Host) -> DeployResult<Vec<String>> {
        let mut missing = Vec::new();
        for pkg in &self.packages {
            let status = host.exec(
                &Invocation::new("dpkg-query").args(["-W", "-f=${Status}", pkg.as_str()]),
            );
            match status {
                Ok(s) if s.trim() == "install ok installed" => {}
                _ => missing.push(pkg.clone()),
            }
        }
        Ok(missing)
    }
}

fn apt(args: &[&str]) -> Invocation {
    Invocation::new("apt-get")
        .args(args.iter().copied())
        .env("DEBIAN_FRONTEND", "noninteractive")
}

impl ProvisioningStep for AptPackages {
    fn name(&self) -> String {
        "apt:packages".to_string()
    }

    fn description(&self) -> String {
        format!("Install packages: {}", self.packages.join(" "))
    }

    fn is_applied(&self, host: &dyn Host) -> DeployResult<bool> {
        Ok(self.missing(host)?.is_empty())
    }

    fn apply(&self, host: &dyn Host) -> DeployResult<()> {
        let missing = self.missing(host)?;
        host.exec_interactive(&apt(&["update", "-y"]))?;

        let mut args = vec!["install", "-y", "--no-install-recommends"];
        args.extend(missing.iter().map(String::as_str));
        host.exec_interactive(&apt(&args))
    }
}
