//! Managed service convergence: enable and (re)start services in
//! dependency order, then query their live state.

use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::cmd::{Host, Invocation};
use crate::error::{DeployError, DeployResult};

/// How a service is brought up during convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    /// Start if not running; leave a running instance alone.
    Running,
    /// Always restart so new configuration is picked up.
    Restarted,
}

/// A managed service and the services it needs.
///
/// # Example
///
/// ```
/// use alicerce::lifecycle::{DesiredState, ServiceDescriptor};
///
/// let api = ServiceDescriptor::new("pillcare")
///     .depends_on("mysql")
///     .restarted();
///
/// assert_eq!(api.depends_on, vec!["mysql"]);
/// assert_eq!(api.desired, DesiredState::Restarted);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub depends_on: Vec<String>,
    pub desired: DesiredState,
}

impl ServiceDescriptor {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            depends_on: Vec::new(),
            desired: DesiredState::Running,
        }
    }

    #[must_use]
    pub fn depends_on(mut self, name: &str) -> Self {
        self.depends_on.push(name.to_string());
        self
    }

    #[must_use]
    pub const fn restarted(mut self) -> Self {
        self.desired = DesiredState::Restarted;
        self
    }
}

/// The host's service manager.
pub trait ServiceManager {
    /// Re-read unit definitions from disk.
    fn reload_definitions(&self) -> DeployResult<()>;
    fn enable(&self, service: &str) -> DeployResult<()>;
    fn start(&self, service: &str) -> DeployResult<()>;
    fn restart(&self, service: &str) -> DeployResult<()>;
    /// Live active state. Distinct from being enabled.
    fn is_active(&self, service: &str) -> bool;
    fn is_enabled(&self, service: &str) -> bool;
}

impl<T: ServiceManager + ?Sized> ServiceManager for &T {
    fn reload_definitions(&self) -> DeployResult<()> {
        (**self).reload_definitions()
    }

    fn enable(&self, service: &str) -> DeployResult<()> {
        (**self).enable(service)
    }

    fn start(&self, service: &str) -> DeployResult<()> {
        (**self).start(service)
    }

    fn restart(&self, service: &str) -> DeployResult<()> {
        (**self).restart(service)
    }

    fn is_active(&self, service: &str) -> bool {
        (**self).is_active(service)
    }

    fn is_enabled(&self, service: &str) -> bool {
        (**self).is_enabled(service)
    }
}

/// `systemctl` on the given host.
pub struct Systemd<'a> {
    host: &'a dyn Host,
}

impl<'a> Systemd<'a> {
    #[must_use]
    pub fn new(host: &'a dyn Host) -> Self {
        Self { host }
    }

    fn systemctl(&self, verb: &str, service: &str) -> DeployResult<String> {
        self.host.exec(&Invocation::new("systemctl").arg(verb).arg(service))
    }
}

impl ServiceManager for Systemd<'_> {
    fn reload_definitions(&self) -> DeployResult<()> {
        self.host.exec(&Invocation::new("systemctl").arg("daemon-reload"))?;
        Ok(())
    }

    fn enable(&self, service: &str) -> DeployResult<()> {
        self.systemctl("enable", service)?;
        Ok(())
    }

    fn start(&self, service: &str) -> DeployResult<()> {
        self.systemctl("start", service)?;
        Ok(())
    }

    fn restart(&self, service: &str) -> DeployResult<()> {
        self.systemctl("restart", service)?;
        Ok(())
    }

    fn is_active(&self, service: &str) -> bool {
        self.systemctl("is-active", service)
            .is_ok_and(|s| s.trim() == "active")
    }

    fn is_enabled(&self, service: &str) -> bool {
        self.systemctl("is-enabled", service)
            .is_ok_and(|s| s.trim() == "enabled")
    }
}

/// Live state of one service after convergence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub enabled: bool,
    pub active: bool,
    /// Error from enabling or (re)starting, if any.
    pub error: Option<String>,
}

/// Sort services so each comes after its dependencies. Ties keep
/// declaration order.
pub fn dependency_order(services: &[ServiceDescriptor]) -> DeployResult<Vec<&ServiceDescriptor>> {
    for svc in services {
        for dep in &svc.depends_on {
            if !services.iter().any(|s| &s.name == dep) {
                return Err(DeployError::UnknownDependency {
                    service: svc.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let mut ordered: Vec<&ServiceDescriptor> = Vec::with_capacity(services.len());
    while ordered.len() < services.len() {
        let next = services.iter().find(|svc| {
            !ordered.iter().any(|o| o.name == svc.name)
                && svc
                    .depends_on
                    .iter()
                    .all(|dep| ordered.iter().any(|o| &o.name == dep))
        });
        match next {
            Some(svc) => ordered.push(svc),
            None => {
                let stuck = services
                    .iter()
                    .find(|svc| !ordered.iter().any(|o| o.name == svc.name))
                    .map_or_else(String::new, |svc| svc.name.clone());
                return Err(DeployError::DependencyCycle(stuck));
            }
        }
    }

    Ok(ordered)
}

/// Enable and (re)start every service in dependency order, wait
/// `settle`, then query each one's live state.
///
/// A failure on one service is recorded and the remaining services
/// are still attempted. Only an invalid dependency graph is an
/// error.
pub fn converge(
    services: &[ServiceDescriptor],
    manager: &dyn ServiceManager,
    definitions_changed: bool,
    settle: Duration,
) -> DeployResult<Vec<ServiceStatus>> {
    let ordered = dependency_order(services)?;

    if definitions_changed {
        log::info!("Reloading service definitions...");
        if let Err(e) = manager.reload_definitions() {
            log::warn!("Reloading service definitions failed: {e}");
        }
    }

    let mut errors: Vec<(String, String)> = Vec::new();

    for svc in &ordered {
        let failed_deps: Vec<&String> = svc
            .depends_on
            .iter()
            .filter(|d| errors.iter().any(|(name, _)| name == *d))
            .collect();
        if !failed_deps.is_empty() {
            log::warn!(
                "{} depends on failed service(s) {:?}; attempting anyway",
                svc.name,
                failed_deps
            );
        }

        let verb = match svc.desired {
            DesiredState::Running => "Starting",
            DesiredState::Restarted => "Restarting",
        };
        log::info!("{verb} {}...", svc.name);

        let result = manager.enable(&svc.name).and_then(|()| match svc.desired {
            DesiredState::Running => manager.start(&svc.name),
            DesiredState::Restarted => manager.restart(&svc.name),
        });

        if let Err(e) = result {
            log::error!("{} failed to start: {e}", svc.name);
            errors.push((svc.name.clone(), e.to_string()));
        }
    }

    if !settle.is_zero() {
        log::info!("Waiting {}s for services to settle...", settle.as_secs());
        thread::sleep(settle);
    }

    let mut statuses = query(ordered, manager);
    for status in &mut statuses {
        status.error = errors
            .iter()
            .find(|(name, _)| name == &status.name)
            .map(|(_, e)| e.clone());
    }
    Ok(statuses)
}

/// Read-only: the live state of each service, in the given order.
pub fn query<'a>(
    services: impl IntoIterator<Item = &'a ServiceDescriptor>,
    manager: &dyn ServiceManager,
) -> Vec<ServiceStatus> {
    services
        .into_iter()
        .map(|svc| status_of(&svc.name, manager))
        .collect()
}

#[must_use]
pub fn status_of(service: &str, manager: &dyn ServiceManager) -> ServiceStatus {
    ServiceStatus {
        name: service.to_string(),
        enabled: manager.is_enabled(service),
        active: manager.is_active(service),
        error: None,
    }
}
