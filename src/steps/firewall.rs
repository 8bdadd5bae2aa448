use crate::cmd::{Host, Invocation};
use crate::error::DeployResult;
use crate::step::ProvisioningStep;

/// `ufw` rules plus an enabled firewall.
#[derive(Debug, Clone)]
pub struct Firewall {
    pub allow: Vec<String>,
}

impl Firewall {
    #[must_use]
    pub fn new<I, S>(allow: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow: allow.into_iter().map(Into::into).collect(),
        }
    }
}

/// Whether `ufw status` output shows an active firewall allowing
/// every rule.
#[must_use]
pub fn status_satisfies(status: &str, rules: &[String]) -> bool {
    let active = status
        .lines()
        .any(|l| l.trim().eq_ignore_ascii_case("status: active"));
    active
        && rules.iter().all(|rule| {
            status.lines().any(|l| {
                l.starts_with(rule.as_str())
                    && l[rule.len()..].trim_start().starts_with("ALLOW")
            })
        })
}

impl ProvisioningStep for Firewall {
    fn name(&self) -> String {
        "ufw".to_string()
    }

    fn description(&self) -> String {
        format!("Configure firewall: allow {}", self.allow.join(", "))
    }

    fn is_applied(&self, host: &dyn Host) -> DeployResult<bool> {
        let status = host.exec(&Invocation::new("ufw").arg("status"))?;
        Ok(status_satisfies(&status, &self.allow))
    }

    fn apply(&self, host: &dyn Host) -> DeployResult<()> {
        for rule in &self.allow {
            host.exec(&Invocation::new("ufw").arg("allow").arg(rule.as_str()))?;
        }
        host.exec(&Invocation::new("ufw").args(["--force", "enable"]))?;
        Ok(())
    }
}
