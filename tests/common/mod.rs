#![allow(dead_code)]

use std::cell::RefCell;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use alicerce::cmd::{Host, Invocation};
use alicerce::error::{DeployError, DeployResult};
use alicerce::lifecycle::ServiceManager;
use alicerce::secrets::{CredentialTarget, RootAccess, SecretBundle};
use alicerce::verify::{LivenessProbe, ProbeReport};

type Matcher = Box<dyn Fn(&Invocation) -> bool>;

/// Records every invocation; answers from canned rules.
#[derive(Default)]
pub struct FakeHost {
    calls: RefCell<Vec<Invocation>>,
    failures: Vec<(Matcher, String)>,
    outputs: Vec<(Matcher, String)>,
    missing: Vec<String>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail invocations whose display form starts with `prefix`.
    pub fn fail(self, prefix: &str, stderr: &str) -> Self {
        let prefix = prefix.to_string();
        self.fail_when(move |inv| inv.to_string().starts_with(&prefix), stderr)
    }

    pub fn fail_when(
        mut self,
        matcher: impl Fn(&Invocation) -> bool + 'static,
        stderr: &str,
    ) -> Self {
        self.failures.push((Box::new(matcher), stderr.to_string()));
        self
    }

    pub fn respond(self, prefix: &str, stdout: &str) -> Self {
        let prefix = prefix.to_string();
        self.respond_when(move |inv| inv.to_string().starts_with(&prefix), stdout)
    }

    pub fn respond_when(
        mut self,
        matcher: impl Fn(&Invocation) -> bool + 'static,
        stdout: &str,
    ) -> Self {
        self.outputs.push((Box::new(matcher), stdout.to_string()));
        self
    }

    pub fn missing(mut self, program: &str) -> Self {
        self.missing.push(program.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls.borrow().iter().map(ToString::to_string).collect()
    }

    /// SQL and other payloads sent on stdin, in call order.
    pub fn stdin_payloads(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|inv| inv.stdin.as_deref())
            .map(|data| String::from_utf8_lossy(data).into_owned())
            .collect()
    }

    fn answer(&self, invocation: &Invocation) -> DeployResult<String> {
        self.calls.borrow_mut().push(invocation.clone());

        if let Some((_, stderr)) = self.failures.iter().find(|(m, _)| m(invocation)) {
            return Err(DeployError::CommandFailed {
                command: invocation.to_string(),
                status: ExitStatus::from_raw(256),
                stderr: stderr.clone(),
            });
        }
        Ok(self
            .outputs
            .iter()
            .find(|(m, _)| m(invocation))
            .map(|(_, out)| out.clone())
            .unwrap_or_default())
    }
}

impl Host for FakeHost {
    fn exec(&self, invocation: &Invocation) -> DeployResult<String> {
        self.answer(invocation)
    }

    fn exec_interactive(&self, invocation: &Invocation) -> DeployResult<()> {
        self.answer(invocation).map(|_| ())
    }

    fn command_exists(&self, program: &str) -> bool {
        !self.missing.iter().any(|m| m == program)
    }
}

/// Whether `invocation` sends SQL containing `needle`.
pub fn sql_contains(invocation: &Invocation, needle: &str) -> bool {
    invocation
        .stdin
        .as_deref()
        .is_some_and(|data| String::from_utf8_lossy(data).contains(needle))
}

/// Service manager that keeps state in memory.
#[derive(Default)]
pub struct FakeServices {
    pub log: RefCell<Vec<String>>,
    failing: Vec<String>,
    active: RefCell<Vec<String>>,
    enabled: RefCell<Vec<String>>,
}

impl FakeServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, service: &str) -> Self {
        self.failing.push(service.to_string());
        self
    }

    pub fn running(self, service: &str) -> Self {
        self.active.borrow_mut().push(service.to_string());
        self.enabled.borrow_mut().push(service.to_string());
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    fn record(&self, entry: String) {
        self.log.borrow_mut().push(entry);
    }

    fn bring_up(&self, verb: &str, service: &str) -> DeployResult<()> {
        self.record(format!("{verb} {service}"));
        if self.failing.iter().any(|f| f == service) {
            return Err(DeployError::CommandFailed {
                command: format!("systemctl {verb} {service}"),
                status: ExitStatus::from_raw(256),
                stderr: format!("Job for {service}.service failed"),
            });
        }
        self.active.borrow_mut().push(service.to_string());
        Ok(())
    }
}

impl ServiceManager for FakeServices {
    fn reload_definitions(&self) -> DeployResult<()> {
        self.record("daemon-reload".to_string());
        Ok(())
    }

    fn enable(&self, service: &str) -> DeployResult<()> {
        self.record(format!("enable {service}"));
        self.enabled.borrow_mut().push(service.to_string());
        Ok(())
    }

    fn start(&self, service: &str) -> DeployResult<()> {
        self.bring_up("start", service)
    }

    fn restart(&self, service: &str) -> DeployResult<()> {
        self.bring_up("restart", service)
    }

    fn is_active(&self, service: &str) -> bool {
        self.active.borrow().iter().any(|s| s == service)
    }

    fn is_enabled(&self, service: &str) -> bool {
        self.enabled.borrow().iter().any(|s| s == service)
    }
}

/// What [`FakeTarget::detect`] reports.
#[derive(Debug, Clone, Copy)]
pub enum Detected {
    Access(RootAccess),
    Unreachable,
}

/// Credential target whose initialization succeeds only for the
/// listed access paths.
pub struct FakeTarget {
    detected: Detected,
    works: Vec<RootAccess>,
    pub calls: RefCell<Vec<String>>,
    pub applied: RefCell<Vec<SecretBundle>>,
}

impl FakeTarget {
    pub fn new(detected: Detected, works: &[RootAccess]) -> Self {
        Self {
            detected,
            works: works.to_vec(),
            calls: RefCell::new(Vec::new()),
            applied: RefCell::new(Vec::new()),
        }
    }

    /// Fresh server: no root password, initialization works.
    pub fn fresh() -> Self {
        Self::new(Detected::Access(RootAccess::NoPassword), &[RootAccess::NoPassword])
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl CredentialTarget for FakeTarget {
    fn prepare(&self) -> DeployResult<()> {
        self.calls.borrow_mut().push("prepare".to_string());
        Ok(())
    }

    fn detect(&self, _candidate: &SecretBundle) -> DeployResult<RootAccess> {
        self.calls.borrow_mut().push("detect".to_string());
        match self.detected {
            Detected::Access(access) => Ok(access),
            Detected::Unreachable => Err(DeployError::DatabaseUnreachable(
                "mysql on localhost:3306 did not accept connections".to_string(),
            )),
        }
    }

    fn initialize(&self, access: RootAccess, bundle: &SecretBundle) -> DeployResult<()> {
        self.calls.borrow_mut().push(format!("initialize {access:?}"));
        if self.works.contains(&access) {
            self.applied.borrow_mut().push(bundle.clone());
            Ok(())
        } else {
            Err(DeployError::Other(format!("{access:?} rejected")))
        }
    }
}

/// Probe with a fixed answer.
pub struct FixedProbe(pub bool);

impl LivenessProbe for FixedProbe {
    fn check(&self) -> ProbeReport {
        ProbeReport {
            url: "http://127.0.0.1:8081/health".to_string(),
            reachable: self.0,
            status: self.0.then_some(200),
            error: (!self.0).then(|| "connection refused".to_string()),
        }
    }
}
