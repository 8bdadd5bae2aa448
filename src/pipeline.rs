use std::fmt::{self, Write as _};
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::cmd::{Host, Invocation};
use crate::config::DeployConfig;
use crate::error::DeployResult;
use crate::lifecycle::{self, ServiceDescriptor, ServiceManager, ServiceStatus, Systemd};
use crate::manifest::EnvironmentManifest;
use crate::mysql::MysqlAdmin;
use crate::nginx::Nginx;
use crate::precheck::{ExecutionContext, Preconditions};
use crate::secrets::{self, CredentialTarget, SecretBundle};
use crate::step::{self, Plan};
use crate::steps::{
    AptPackages, CommandStep, DatabaseObjects, Directory, Firewall, ManagedFile, MirrorSync,
    PythonEnv, RemovePath, ServiceRunning, Symlink,
};
use crate::unit::ServiceUnit;
use crate::verify::{self, DeploymentOutcome, HttpProbe, LivenessProbe};

/// Stages of a run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Check,
    Bootstrap,
    Apply,
    Lifecycle,
    Verify,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Check => "check",
            Self::Bootstrap => "bootstrap",
            Self::Apply => "apply",
            Self::Lifecycle => "lifecycle",
            Self::Verify => "verify",
        };
        f.write_str(name)
    }
}

fn enter(stage: Stage) {
    log::info!("==> {stage}");
}

fn print(outcome: &DeploymentOutcome, json: bool) -> DeployResult<()> {
    if json {
        println!("{}", outcome.to_json()?);
    } else {
        println!("{}", outcome.report());
    }
    Ok(())
}

/// Deployment pipeline: precondition check, credential bootstrap,
/// step application, service convergence and verification.
///
/// Service manager, credential target and liveness probe default to
/// `systemctl`, the local MySQL server and an HTTP probe of the
/// health endpoint; each can be replaced.
pub struct Pipeline<'a> {
    config: DeployConfig,
    host: &'a dyn Host,
    context: ExecutionContext,
    manager: Option<Box<dyn ServiceManager + 'a>>,
    credentials: Option<Box<dyn CredentialTarget + 'a>>,
    probe: Option<Box<dyn LivenessProbe + 'a>>,
    address_lookup: bool,
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new(config: DeployConfig, host: &'a dyn Host) -> Self {
        Self {
            config,
            host,
            context: ExecutionContext::current(),
            manager: None,
            credentials: None,
            probe: None,
            address_lookup: true,
        }
    }

    #[must_use]
    pub fn context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn service_manager(mut self, manager: impl ServiceManager + 'a) -> Self {
        self.manager = Some(Box::new(manager));
        self
    }

    #[must_use]
    pub fn credential_target(mut self, target: impl CredentialTarget + 'a) -> Self {
        self.credentials = Some(Box::new(target));
        self
    }

    #[must_use]
    pub fn probe(mut self, probe: impl LivenessProbe + 'a) -> Self {
        self.probe = Some(Box::new(probe));
        self
    }

    /// Skip public address discovery in the final report.
    #[must_use]
    pub const fn without_address_lookup(mut self) -> Self {
        self.address_lookup = false;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Dispatch a parsed CLI command, printing the report to stdout.
    pub fn run(&self, command: &Command) -> DeployResult<()> {
        match command {
            Command::Install { json } => print(&self.install()?, *json),
            Command::Update { json } => print(&self.update()?, *json),
            Command::Status { json } => print(&self.status(), *json),
            Command::Render => {
                println!("{}", self.render());
                Ok(())
            }
        }
    }

    /// First-run (and repair) path.
    pub fn install(&self) -> DeployResult<DeploymentOutcome> {
        enter(Stage::Check);
        self.preconditions().check(&self.context)?;

        enter(Stage::Bootstrap);
        let bootstrap = match &self.credentials {
            Some(target) => secrets::ensure_secrets(&self.config.credential_store, target.as_ref()),
            None => secrets::ensure_secrets(
                &self.config.credential_store,
                &MysqlAdmin::new(self.host, &self.config.database),
            ),
        }?;
        log::info!("Credentials ready ({:?})", bootstrap.origin);

        enter(Stage::Apply);
        let reports = self.install_plan(&bootstrap.bundle).apply(self.host)?;

        enter(Stage::Lifecycle);
        let converged = self.with_manager(|manager| {
            lifecycle::converge(
                &self.install_services(),
                manager,
                step::units_changed(&reports),
                self.config.settle_time(),
            )
        })?;

        enter(Stage::Verify);
        Ok(self.verify(&converged))
    }

    /// Redeploy changed source onto an installed host. Requires the
    /// credential store; never generates secrets.
    pub fn update(&self) -> DeployResult<DeploymentOutcome> {
        enter(Stage::Check);
        self.preconditions()
            .require_file(&self.config.credential_store)
            .check(&self.context)?;

        let bundle = SecretBundle::load(&self.config.credential_store)?;

        enter(Stage::Apply);
        let reports = self.update_plan(&bundle).apply(self.host)?;

        enter(Stage::Lifecycle);
        let converged = self.with_manager(|manager| {
            lifecycle::converge(
                &self.update_services(),
                manager,
                step::units_changed(&reports),
                self.config.settle_time(),
            )
        })?;

        enter(Stage::Verify);
        Ok(self.verify(&converged))
    }

    /// Read-only report of the current deployment.
    #[must_use]
    pub fn status(&self) -> DeploymentOutcome {
        enter(Stage::Verify);
        self.verify(&[])
    }

    /// Generated files and planned steps, without touching the host.
    /// Secret values are masked.
    #[must_use]
    pub fn render(&self) -> String {
        let bundle = SecretBundle::generate();
        let unit = self.service_unit();
        let mut out = String::new();

        let _ = writeln!(out, "--- {} (secrets masked) ---", self.config.env_file().display());
        out.push_str(&EnvironmentManifest::build(&self.config, &bundle).render_masked());
        let _ = writeln!(
            out,
            "\n--- {} ---",
            self.config.systemd_dir.join(unit.file_name()).display()
        );
        out.push_str(&unit.render());
        let _ = writeln!(out, "\n--- {} ---", self.site_available().display());
        out.push_str(&self.nginx().render());
        let _ = writeln!(out, "\n--- Install steps ---");
        for (i, desc) in self.install_plan(&bundle).descriptions().enumerate() {
            let _ = writeln!(out, "{}. {desc}", i + 1);
        }
        out
    }

    fn preconditions(&self) -> Preconditions {
        Preconditions::new(&self.config.source_dir).marker(&self.config.marker_file)
    }

    /// Every step of a fresh install, in order.
    #[must_use]
    pub fn install_plan(&self, bundle: &SecretBundle) -> Plan {
        let c = &self.config;
        let user = c.service_user.as_str();
        let enabled = c.nginx_dir.join("sites-enabled");
        let manifest = EnvironmentManifest::build(c, bundle);

        let mut plan = Plan::new()
            .step(AptPackages::new(&c.packages))
            .step(Directory::new(&c.deploy_dir).owner(user))
            .step(Directory::new(&c.log_dir).owner(user))
            .step(
                MirrorSync::new(&c.source_dir, &c.deploy_dir)
                    .excludes(&c.sync_exclude)
                    .owner(user),
            )
            .step(Directory::new(c.deploy_dir.join(&c.upload_folder)).owner(user))
            .step(Directory::new(c.deploy_dir.join(&c.reports_folder)).owner(user))
            .step(ServiceRunning::new(&c.database.service))
            .step(DatabaseObjects::new(&c.database, bundle))
            .step(self.python_env())
            .step(self.env_file(&manifest));

        if let Some(script) = &c.schema_script {
            let path = c.deploy_dir.join(script).display().to_string();
            // The application reads its settings from the process environment.
            plan = plan.step(
                CommandStep::new(
                    "schema",
                    "Create database tables",
                    Invocation::new(&self.venv_python())
                        .arg(path.as_str())
                        .envs(manifest.entries())
                        .current_dir(&c.deploy_dir),
                )
                .unless(Invocation::new("test").args(["!", "-f", path.as_str()])),
            );
        }

        plan.step(self.unit_file())
            .step(ManagedFile::new(self.site_available(), self.nginx().render()))
            .step(Symlink::new(enabled.join(&c.app_name), self.site_available()))
            .step(RemovePath::new(enabled.join("default")))
            .step(CommandStep::new(
                "nginx-test",
                "Validate Nginx configuration",
                Invocation::new("nginx").arg("-t"),
            ))
            .step(Firewall::new(&c.firewall_rules))
    }

    /// Steps of an update: source, dependencies, manifest and unit.
    #[must_use]
    pub fn update_plan(&self, bundle: &SecretBundle) -> Plan {
        let c = &self.config;
        Plan::new()
            .step(
                MirrorSync::new(&c.source_dir, &c.deploy_dir)
                    .excludes(&c.sync_exclude)
                    .owner(&c.service_user),
            )
            .step(self.python_env())
            .step(self.env_file(&EnvironmentManifest::build(c, bundle)))
            .step(self.unit_file())
    }

    /// Database, application and proxy, each depending on the
    /// previous one.
    #[must_use]
    pub fn install_services(&self) -> Vec<ServiceDescriptor> {
        let c = &self.config;
        vec![
            ServiceDescriptor::new(&c.database.service),
            ServiceDescriptor::new(&c.app_name)
                .depends_on(&c.database.service)
                .restarted(),
            ServiceDescriptor::new("nginx")
                .depends_on(&c.app_name)
                .restarted(),
        ]
    }

    /// Only the application is restarted on update.
    #[must_use]
    pub fn update_services(&self) -> Vec<ServiceDescriptor> {
        vec![ServiceDescriptor::new(&self.config.app_name).restarted()]
    }

    #[must_use]
    pub fn service_unit(&self) -> ServiceUnit {
        let c = &self.config;
        let exec = format!(
            "{}/bin/uvicorn app.main:app --host {} --port {}",
            c.venv_path().display(),
            c.host,
            c.port
        );
        ServiceUnit::new(&c.app_name, &exec)
            .description(&c.project_name)
            .after(&format!("{}.service", c.database.service))
            .working_dir(&c.deploy_dir)
            .environment_file(c.env_file())
            .user(&c.service_user)
            .log_dir(&c.log_dir)
    }

    #[must_use]
    pub fn nginx(&self) -> Nginx {
        let c = &self.config;
        Nginx::new(&format!("127.0.0.1:{}", c.port))
            .server_name(&c.server_name)
            .cors_preflight()
            .client_max_body_size("10M")
            .logs(
                &format!("/var/log/nginx/{}_access.log", c.app_name),
                &format!("/var/log/nginx/{}_error.log", c.app_name),
            )
    }

    fn site_available(&self) -> PathBuf {
        self.config
            .nginx_dir
            .join("sites-available")
            .join(&self.config.app_name)
    }

    fn venv_python(&self) -> String {
        self.config
            .venv_path()
            .join("bin")
            .join("python")
            .display()
            .to_string()
    }

    fn python_env(&self) -> PythonEnv {
        let c = &self.config;
        PythonEnv::new(&c.deploy_dir, c.venv_path(), &c.requirements_file).owner(&c.service_user)
    }

    fn env_file(&self, manifest: &EnvironmentManifest) -> ManagedFile {
        ManagedFile::new(self.config.env_file(), manifest.render())
        .mode(0o600)
        .owner(&self.config.service_user)
    }

    fn unit_file(&self) -> ManagedFile {
        let unit = self.service_unit();
        ManagedFile::new(self.config.systemd_dir.join(unit.file_name()), unit.render())
            .unit_definition()
    }

    fn with_manager<T>(&self, f: impl FnOnce(&dyn ServiceManager) -> T) -> T {
        match &self.manager {
            Some(manager) => f(manager.as_ref()),
            None => f(&Systemd::new(self.host)),
        }
    }

    /// Status of every managed service, preferring the results of
    /// this run's convergence, then probe and report.
    fn verify(&self, converged: &[ServiceStatus]) -> DeploymentOutcome {
        let c = &self.config;
        let services = self.with_manager(|manager| {
            self.install_services()
                .iter()
                .map(|svc| {
                    converged
                        .iter()
                        .find(|s| s.name == svc.name)
                        .cloned()
                        .unwrap_or_else(|| lifecycle::status_of(&svc.name, manager))
                })
                .collect()
        });

        let address = if self.address_lookup {
            verify::public_address(self.host)
        } else {
            None
        };

        let unit = self.service_unit();
        let log_files: Vec<PathBuf> = [unit.stdout_log, unit.stderr_log]
            .into_iter()
            .flatten()
            .collect();

        let run = |probe: &dyn LivenessProbe| {
            verify::verify(
                services,
                probe,
                address,
                &c.app_name,
                c.credential_store.clone(),
                log_files,
            )
        };
        match &self.probe {
            Some(probe) => run(probe.as_ref()),
            None => run(&HttpProbe::new(&c.health_url(), c.probe_timeout())),
        }
    }
}

#[derive(Parser)]
#[command(name = "alicerce")]
#[command(version, about = "Idempotent host provisioning and deployment")]
pub struct Cli {
    /// YAML configuration file (defaults apply without it)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Defaults to `install`
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Provision the host and deploy the application
    Install {
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sync new source and restart the application
    Update {
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report service and health state without changing anything
    Status {
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print generated files and planned steps (dry run)
    Render,
}

impl Default for Command {
    fn default() -> Self {
        Self::Install { json: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::LocalHost;

    fn pipeline(host: &LocalHost) -> Pipeline<'_> {
        Pipeline::new(DeployConfig::default(), host)
    }

    #[test]
    fn cli_defaults_to_install() {
        let cli = Cli::parse_from(["alicerce"]);

        assert_eq!(cli.command.unwrap_or_default(), Command::Install { json: false });
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn cli_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["alicerce", "status", "--json", "-vv", "--config", "d.yml"]);

        assert_eq!(cli.command, Some(Command::Status { json: true }));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("d.yml")));
    }

    #[test]
    fn install_plan_order() {
        let host = LocalHost;
        let p = pipeline(&host);

        let names = p.install_plan(&SecretBundle::generate()).names();

        let pos = |prefix: &str| {
            names
                .iter()
                .position(|n| n.starts_with(prefix))
                .unwrap_or_else(|| panic!("no step {prefix} in {names:?}"))
        };
        assert_eq!(pos("apt"), 0);
        assert!(pos("sync:") < pos("mysql:"));
        assert_eq!(pos("service:mysql") + 1, pos("mysql:"));
        assert!(pos("mysql:") < pos("venv:"));
        assert!(pos("venv:") < pos("cmd:schema"));
        assert!(pos("file:/etc/systemd") < pos("cmd:nginx-test"));
        assert_eq!(pos("ufw"), names.len() - 1);
    }

    #[test]
    fn update_restarts_only_the_application() {
        let host = LocalHost;
        let services = pipeline(&host).update_services();

        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "pillcare");
    }

    #[test]
    fn render_masks_secrets() {
        let host = LocalHost;
        let out = pipeline(&host).render();

        assert!(out.contains("SECRET_KEY=********"));
        assert!(out.contains("DB_PASSWORD=********"));
        assert!(out.contains("ExecStart=/opt/pillcare/venv/bin/uvicorn app.main:app"));
        assert!(out.contains("proxy_pass http://127.0.0.1:8081"));
    }
}
