use std::fmt::Write;
use std::path::{Path, PathBuf};

/// A systemd service unit for the application process.
///
/// # Example
///
/// ```
/// use alicerce::ServiceUnit;
///
/// let unit = ServiceUnit::new("pillcare", "/opt/pillcare/venv/bin/uvicorn app.main:app")
///     .description("PillCare 360 API")
///     .after("mysql.service")
///     .working_dir("/opt/pillcare")
///     .environment_file("/opt/pillcare/.env")
///     .user("www-data");
///
/// let rendered = unit.render();
/// assert!(rendered.contains("Restart=always"));
/// assert!(rendered.contains("EnvironmentFile=/opt/pillcare/.env"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnit {
    pub name: String,
    pub description: String,
    pub exec_start: String,
    pub after: Vec<String>,
    pub wants: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub environment_file: Option<PathBuf>,
    pub user: Option<String>,
    pub group: Option<String>,
    pub restart_sec: u32,
    pub stdout_log: Option<PathBuf>,
    pub stderr_log: Option<PathBuf>,
}

impl ServiceUnit {
    #[must_use]
    pub fn new(name: &str, exec_start: &str) -> Self {
        Self {
            name: name.to_string(),
            description: name.to_string(),
            exec_start: exec_start.to_string(),
            after: vec!["network.target".to_string()],
            wants: Vec::new(),
            working_dir: None,
            environment_file: None,
            user: None,
            group: None,
            restart_sec: 10,
            stdout_log: None,
            stderr_log: None,
        }
    }

    #[must_use]
    pub fn description(mut self, text: &str) -> Self {
        self.description = text.to_string();
        self
    }

    /// Order after another unit and pull it in.
    #[must_use]
    pub fn after(mut self, unit: &str) -> Self {
        self.after.push(unit.to_string());
        self.wants.push(unit.to_string());
        self
    }

    #[must_use]
    pub fn working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn environment_file(mut self, path: impl AsRef<Path>) -> Self {
        self.environment_file = Some(path.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self.group = Some(user.to_string());
        self
    }

    /// Append stdout and stderr to `<dir>/<name>.log` and
    /// `<dir>/<name>-error.log`.
    #[must_use]
    pub fn log_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.stdout_log = Some(dir.join(format!("{}.log", self.name)));
        self.stderr_log = Some(dir.join(format!("{}-error.log", self.name)));
        self
    }

    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.service", self.name)
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "[Unit]");
        let _ = writeln!(out, "Description={}", self.description);
        let _ = writeln!(out, "After={}", self.after.join(" "));
        if !self.wants.is_empty() {
            let _ = writeln!(out, "Wants={}", self.wants.join(" "));
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "[Service]");
        let _ = writeln!(out, "Type=simple");
        if let Some(user) = &self.user {
            let _ = writeln!(out, "User={user}");
        }
        if let Some(group) = &self.group {
            let _ = writeln!(out, "Group={group}");
        }
        if let Some(dir) = &self.working_dir {
            let _ = writeln!(out, "WorkingDirectory={}", dir.display());
        }
        if let Some(env) = &self.environment_file {
            let _ = writeln!(out, "EnvironmentFile={}", env.display());
        }
        let _ = writeln!(out, "ExecStart={}", self.exec_start);
        let _ = writeln!(out, "Restart=always");
        let _ = writeln!(out, "RestartSec={}", self.restart_sec);
        if let Some(log) = &self.stdout_log {
            let _ = writeln!(out, "StandardOutput=append:{}", log.display());
        }
        if let Some(log) = &self.stderr_log {
            let _ = writeln!(out, "StandardError=append:{}", log.display());
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "[Install]");
        let _ = writeln!(out, "WantedBy=multi-user.target");

        out
    }
}
