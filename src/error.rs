use std::process::ExitStatus;

pub type DeployResult<T> = Result<T, DeployError>;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("command failed: {command}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error(
        "credential bootstrap failed: primary attempt: {primary}; \
         fallback attempt: {fallback}"
    )]
    BootstrapFailed {
        primary: Box<DeployError>,
        fallback: Box<DeployError>,
    },

    #[error("database server unreachable: {0}")]
    DatabaseUnreachable(String),

    #[error("secret store {path}: {reason}")]
    SecretStore { path: String, reason: String },

    #[error("step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        source: Box<DeployError>,
    },

    #[error("service dependency cycle involving '{0}'")]
    DependencyCycle(String),

    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl DeployError {
    /// Standard error captured from a failed external command, if any.
    #[must_use]
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { stderr, .. } => Some(stderr),
            Self::StepFailed { source, .. } => source.stderr(),
            _ => None,
        }
    }
}
