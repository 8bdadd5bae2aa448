use crate::cmd::{Host, Invocation};
use crate::error::DeployResult;
use crate::step::ProvisioningStep;

/// A system service that must be enabled and running before later
/// steps talk to it (e.g. the database server before database
/// objects are created).
#[derive(Debug, Clone)]
pub struct ServiceRunning {
    pub service: String,
}

impl ServiceRunning {
    #[must_use]
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }
}

fn systemctl(args: &[&str]) -> Invocation {
    Invocation::new("systemctl").args(args.iter().copied())
}

impl ProvisioningStep for ServiceRunning {
    fn name(&self) -> String {
        format!("service:{}", self.service)
    }

    fn description(&self) -> String {
        format!("Ensure {} is running", self.service)
    }

    fn is_applied(&self, host: &dyn Host) -> DeployResult<bool> {
        let state = host.exec(&systemctl(&["is-active", self.service.as_str()]));
        Ok(state.is_ok_and(|s| s.trim() == "active"))
    }

    fn apply(&self, host: &dyn Host) -> DeployResult<()> {
        host.exec(&systemctl(&["enable", "--now", self.service.as_str()]))?;
        Ok(())
    }
}
