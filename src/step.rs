//! Ordered, idempotent provisioning steps.
//!
//! Each step answers "is this already applied?" before acting, so
//! re-running a whole plan converges to the same end state. The
//! first failing step aborts the run; nothing is rolled back.

use crate::cmd::Host;
use crate::error::{DeployError, DeployResult};

/// What a step did during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Applied,
    AlreadyApplied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub name: String,
    pub outcome: StepOutcome,
    /// The step changed a service-manager unit definition.
    pub changed_units: bool,
}

/// A named unit of provisioning work.
pub trait ProvisioningStep {
    /// Short identifier used in logs and errors (e.g.
    /// `"file:/etc/nginx/sites-available/app"`).
    fn name(&self) -> String;

    /// Human-readable description.
    fn description(&self) -> String;

    /// Whether the desired state is already in place.
    fn is_applied(&self, host: &dyn Host) -> DeployResult<bool>;

    /// Bring the host to the desired state.
    fn apply(&self, host: &dyn Host) -> DeployResult<()>;

    /// Ownership and permission fix-ups, run after every check or
    /// apply regardless of outcome.
    fn finalize(&self, _host: &dyn Host) -> DeployResult<()> {
        Ok(())
    }

    /// Whether applying this step changes a service unit file.
    fn is_unit_definition(&self) -> bool {
        false
    }
}

/// An ordered list of steps.
#[derive(Default)]
pub struct Plan {
    steps: Vec<Box<dyn ProvisioningStep>>,
}

impl Plan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn step(mut self, step: impl ProvisioningStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn push(&mut self, step: Box<dyn ProvisioningStep>) {
        self.steps.push(step);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names in application order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn descriptions(&self) -> impl Iterator<Item = String> + '_ {
        self.steps.iter().map(|s| s.description())
    }

    /// Apply every step in order. Stops at the first failure.
    pub fn apply(&self, host: &dyn Host) -> DeployResult<Vec<StepReport>> {
        apply(&self.steps, host)
    }
}

/// Apply `steps` strictly in order, aborting on the first failure.
pub fn apply(
    steps: &[Box<dyn ProvisioningStep>],
    host: &dyn Host,
) -> DeployResult<Vec<StepReport>> {
    let total = steps.len();
    let mut reports = Vec::with_capacity(total);

    for (i, step) in steps.iter().enumerate() {
        let name = step.name();
        let fail = |source: DeployError| DeployError::StepFailed {
            step: name.clone(),
            source: Box::new(source),
        };

        let outcome = if step.is_applied(host).map_err(fail)? {
            log::info!("[{}/{total}] {} (already applied)", i + 1, step.description());
            StepOutcome::AlreadyApplied
        } else {
            log::info!("[{}/{total}] {}", i + 1, step.description());
            step.apply(host).map_err(fail)?;
            StepOutcome::Applied
        };

        step.finalize(host).map_err(fail)?;

        reports.push(StepReport {
            changed_units: outcome == StepOutcome::Applied && step.is_unit_definition(),
            name,
            outcome,
        });
    }

    Ok(reports)
}

/// Whether any applied step rewrote a unit definition.
#[must_use]
pub fn units_changed(reports: &[StepReport]) -> bool {
    reports.iter().any(|r| r.changed_units)
}
