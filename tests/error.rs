use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use alicerce::error::DeployError;

fn command_failed(stderr: &str) -> DeployError {
    DeployError::CommandFailed {
        command: "systemctl restart pillcare".into(),
        status: ExitStatus::from_raw(256),
        stderr: stderr.into(),
    }
}

#[test]
fn display_command_failed_omits_stderr() {
    let err = command_failed("Job for pillcare.service failed");
    assert_eq!(err.to_string(), "command failed: systemctl restart pillcare");
    assert_eq!(err.stderr(), Some("Job for pillcare.service failed"));
}

#[test]
fn display_precondition_failed() {
    let err = DeployError::PreconditionFailed("must run as root".into());
    assert_eq!(err.to_string(), "precondition failed: must run as root");
}

#[test]
fn display_bootstrap_failed_names_both_attempts() {
    let err = DeployError::BootstrapFailed {
        primary: Box::new(DeployError::Other("socket auth refused".into())),
        fallback: Box::new(DeployError::Other("password refused".into())),
    };
    assert_eq!(
        err.to_string(),
        "credential bootstrap failed: primary attempt: socket auth refused; \
         fallback attempt: password refused"
    );
}

#[test]
fn display_database_unreachable() {
    let err = DeployError::DatabaseUnreachable("mysql on localhost:3306".into());
    assert_eq!(
        err.to_string(),
        "database server unreachable: mysql on localhost:3306"
    );
}

#[test]
fn display_secret_store() {
    let err = DeployError::SecretStore {
        path: "/root/.pillcare_credentials".into(),
        reason: "missing SECRET_KEY".into(),
    };
    assert_eq!(
        err.to_string(),
        "secret store /root/.pillcare_credentials: missing SECRET_KEY"
    );
}

#[test]
fn step_failed_exposes_inner_stderr() {
    let err = DeployError::StepFailed {
        step: "cmd:nginx-test".into(),
        source: Box::new(command_failed("nginx: [emerg] unexpected \"}\"")),
    };
    assert_eq!(
        err.to_string(),
        "step 'cmd:nginx-test' failed: command failed: systemctl restart pillcare"
    );
    assert_eq!(err.stderr(), Some("nginx: [emerg] unexpected \"}\""));
}

#[test]
fn display_dependency_errors() {
    let cycle = DeployError::DependencyCycle("nginx".into());
    assert_eq!(cycle.to_string(), "service dependency cycle involving 'nginx'");

    let unknown = DeployError::UnknownDependency {
        service: "pillcare".into(),
        dependency: "redis".into(),
    };
    assert_eq!(
        unknown.to_string(),
        "service 'pillcare' depends on unknown service 'redis'"
    );
}

#[test]
fn display_command_not_found() {
    let err = DeployError::CommandNotFound("ufw".into());
    assert_eq!(err.to_string(), "command not found: ufw");
}

#[test]
fn display_config() {
    let err = DeployError::Config("port out of range".into());
    assert_eq!(err.to_string(), "invalid configuration: port out of range");
}

#[test]
fn stderr_absent_for_other_errors() {
    assert_eq!(DeployError::Other("x".into()).stderr(), None);
}

#[test]
fn from_io_error() {
    let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err: DeployError = io_err.into();
    assert!(matches!(err, DeployError::Io(_)));
}

#[test]
fn from_yaml_error() {
    let yaml_err = serde_yaml::from_str::<Vec<u64>>("{ not: [a list").unwrap_err();
    let err: DeployError = yaml_err.into();
    assert!(matches!(err, DeployError::Yaml(_)));
}
