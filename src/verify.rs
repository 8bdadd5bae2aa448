//! Post-deploy verification: service state, a best-effort HTTP
//! liveness probe, address discovery and the final report.

use std::fmt::Write as _;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::cmd::{Host, Invocation};
use crate::error::DeployResult;
use crate::lifecycle::ServiceStatus;

const IMDS_BASE: &str = "http://169.254.169.254/latest";
const IMDS_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of one liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub url: String,
    pub reachable: bool,
    pub status: Option<u16>,
    pub error: Option<String>,
}

/// Application-level liveness check.
pub trait LivenessProbe {
    fn check(&self) -> ProbeReport;
}

impl<T: LivenessProbe + ?Sized> LivenessProbe for &T {
    fn check(&self) -> ProbeReport {
        (**self).check()
    }
}

/// HTTP GET against the application's health endpoint. Any 2xx
/// counts as reachable.
pub struct HttpProbe {
    url: String,
    agent: ureq::Agent,
}

impl HttpProbe {
    #[must_use]
    pub fn new(url: &str, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            url: url.to_string(),
            agent,
        }
    }
}

impl LivenessProbe for HttpProbe {
    fn check(&self) -> ProbeReport {
        match self.agent.get(self.url.as_str()).call() {
            Ok(response) => {
                let status = response.status();
                ProbeReport {
                    url: self.url.clone(),
                    reachable: status.is_success(),
                    status: Some(status.as_u16()),
                    error: (!status.is_success()).then(|| format!("HTTP {}", status.as_u16())),
                }
            }
            Err(e) => ProbeReport {
                url: self.url.clone(),
                reachable: false,
                status: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Externally reachable address: EC2 instance metadata first, then
/// the first address reported by `hostname -I`.
#[must_use]
pub fn public_address(host: &dyn Host) -> Option<String> {
    imds_public_ipv4().or_else(|| {
        host.exec(&Invocation::new("hostname").arg("-I"))
            .ok()
            .and_then(|out| first_address(&out))
    })
}

fn imds_public_ipv4() -> Option<String> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(IMDS_TIMEOUT))
        .build()
        .into();

    let token_url = format!("{IMDS_BASE}/api/token");
    let mut response = agent
        .put(token_url.as_str())
        .header("X-aws-ec2-metadata-token-ttl-seconds", "60")
        .send_empty()
        .ok()?;
    let token = response.body_mut().read_to_string().ok()?;

    let ip_url = format!("{IMDS_BASE}/meta-data/public-ipv4");
    let mut response = agent
        .get(ip_url.as_str())
        .header("X-aws-ec2-metadata-token", token.trim())
        .call()
        .ok()?;
    let body = response.body_mut().read_to_string().ok()?;

    log::debug!("Instance metadata reports public address {}", body.trim());
    first_address(&body)
}

/// First whitespace-separated token that parses as an IP address.
#[must_use]
pub fn first_address(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find(|tok| tok.parse::<IpAddr>().is_ok())
        .map(str::to_string)
}

/// Everything a run learned about the deployed system.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentOutcome {
    pub services: Vec<ServiceStatus>,
    pub probe: ProbeReport,
    pub address: Option<String>,
    pub app_service: String,
    pub credential_store: PathBuf,
    pub log_files: Vec<PathBuf>,
}

impl DeploymentOutcome {
    /// All services active and the probe answered.
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.probe.reachable && self.services.iter().all(|s| s.active)
    }

    pub fn to_json(&self) -> DeployResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable summary with follow-up commands.
    #[must_use]
    pub fn report(&self) -> String {
        let mut out = String::new();
        let width = self
            .services
            .iter()
            .map(|s| s.name.len())
            .max()
            .unwrap_or(0);

        let _ = writeln!(out, "Deployment summary");
        let _ = writeln!(out, "==================");
        let _ = writeln!(out);
        let _ = writeln!(out, "Services:");
        for svc in &self.services {
            let state = if svc.active { "active" } else { "inactive" };
            let enabled = if svc.enabled { "enabled" } else { "disabled" };
            let _ = write!(out, "  {:width$}  {state:8} ({enabled})", svc.name);
            if let Some(err) = &svc.error {
                let _ = write!(out, "  error: {err}");
            }
            let _ = writeln!(out);
        }
        let _ = writeln!(out);

        let probe = if self.probe.reachable {
            "reachable".to_string()
        } else {
            format!(
                "unreachable ({})",
                self.probe.error.as_deref().unwrap_or("no response")
            )
        };
        let _ = writeln!(out, "Health check: {} {probe}", self.probe.url);
        match &self.address {
            Some(addr) => {
                let _ = writeln!(out, "API address:  http://{addr}/");
            }
            None => {
                let _ = writeln!(out, "API address:  unknown");
            }
        }
        let _ = writeln!(
            out,
            "Credentials:  {} (root only)",
            self.credential_store.display()
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "Next steps:");
        let _ = writeln!(out, "  journalctl -u {} -f", self.app_service);
        if !self.log_files.is_empty() {
            let files: Vec<String> = self
                .log_files
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            let _ = writeln!(out, "  tail -f {}", files.join(" "));
        }
        let _ = writeln!(out, "  systemctl status {}", self.app_service);

        out
    }
}

/// Probe the application and assemble the outcome. Never fails:
/// an unreachable probe or inactive service is reported, not
/// raised.
pub fn verify(
    services: Vec<ServiceStatus>,
    probe: &dyn LivenessProbe,
    address: Option<String>,
    app_service: &str,
    credential_store: PathBuf,
    log_files: Vec<PathBuf>,
) -> DeploymentOutcome {
    log::info!("Verifying deployment...");

    for svc in services.iter().filter(|s| !s.active) {
        log::warn!("Service {} is not active", svc.name);
    }

    let report = probe.check();
    if report.reachable {
        log::info!("Health check passed: {}", report.url);
    } else {
        log::warn!(
            "Health check {} failed: {}; the service may still be starting",
            report.url,
            report.error.as_deref().unwrap_or("no response")
        );
    }

    DeploymentOutcome {
        services,
        probe: report,
        address,
        app_service: app_service.to_string(),
        credential_store,
        log_files,
    }
}
