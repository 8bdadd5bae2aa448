use crate::cmd::{Host, Invocation};
use crate::error::DeployResult;
use crate::step::ProvisioningStep;

/// An external command run as a step. Without an `unless` guard
/// it runs every time, so the command itself must be idempotent
/// (e.g. `nginx -t`, create-if-missing schema scripts).
#[derive(Debug, Clone)]
pub struct CommandStep {
    pub name: String,
    pub description: String,
    pub run: Invocation,
    pub unless: Option<Invocation>,
}

impl CommandStep {
    #[must_use]
    pub fn new(name: &str, description: &str, run: Invocation) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            run,
            unless: None,
        }
    }

    /// Skip the command when `guard` exits successfully.
    #[must_use]
    pub fn unless(mut self, guard: Invocation) -> Self {
        self.unless = Some(guard);
        self
    }
}

impl ProvisioningStep for CommandStep {
    fn name(&self) -> String {
        format!("cmd:{}", self.name)
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn is_applied(&self, host: &dyn Host) -> DeployResult<bool> {
        Ok(self.unless.as_ref().is_some_and(|guard| host.exec(guard).is_ok()))
    }

    fn apply(&self, host: &dyn Host) -> DeployResult<()> {
        host.exec(&self.run)?;
        Ok(())
    }
}
