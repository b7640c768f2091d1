use crate::engine::error::EngineError;
use crate::engine::settings::EngineSettings;
use async_trait::async_trait;
use std::fmt::{Debug, Display, Formatter};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// A fully spelled-out external program call. No shell is involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl Display for Invocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// How an external tool finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolStatus {
    code: Option<i32>,
}

impl ToolStatus {
    pub const SUCCESS: ToolStatus = ToolStatus { code: Some(0) };

    /// `None` means the process was terminated by a signal.
    pub fn from_code(code: Option<i32>) -> Self {
        ToolStatus { code }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }
}

impl Display for ToolStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exited with status {}", code),
            None => write!(f, "was terminated by a signal"),
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync + Debug {
    async fn run(&self, invocation: &Invocation) -> io::Result<ToolStatus>;
}

/// Spawns tools on the host with inherited stdio, so their output reaches the console.
#[derive(Debug, Default)]
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> io::Result<ToolStatus> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args).current_dir(&invocation.cwd);

        let status = cmd.spawn()?.wait().await?;
        Ok(ToolStatus::from_code(status.code()))
    }
}

#[derive(Debug)]
pub struct Environment {
    settings: Arc<EngineSettings>,
    runner: Arc<dyn ProcessRunner>,
}

impl Environment {
    pub fn new(settings: Arc<EngineSettings>, runner: Arc<dyn ProcessRunner>) -> Self {
        Environment { settings, runner }
    }

    pub fn invocation<I, S>(&self, program: &str, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: self.settings.root_path().to_path_buf(),
        }
    }

    /// Runs the invocation to completion. A non-zero status is returned, not raised;
    /// callers classify it.
    pub async fn execute(&self, invocation: &Invocation) -> Result<ToolStatus, EngineError> {
        debug!(command = %invocation, cwd = %invocation.cwd.display(), "spawning process");

        let status = self
            .runner
            .run(invocation)
            .await
            .map_err(|source| EngineError::Spawn {
                tool: invocation.program.clone(),
                source,
            })?;

        debug!(program = %invocation.program, %status, "process finished");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Layout, Toolchain};
    use crate::engine::settings::Jobs;
    use tempfile::TempDir;

    fn environment(root: &std::path::Path) -> Environment {
        let settings = EngineSettings::new(root, &Layout::default(), Toolchain::default(), Jobs::new(1));
        Environment::new(Arc::new(settings), Arc::new(SystemRunner))
    }

    #[test]
    fn invocation_runs_from_root() {
        let env = environment(std::path::Path::new("/work"));
        let inv = env.invocation("make", ["-j4", "-C", "lib/build/src/tree-sitter"]);

        assert_eq!(inv.cwd, PathBuf::from("/work"));
        assert_eq!(inv.to_string(), "make -j4 -C lib/build/src/tree-sitter");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn system_runner_reports_exit_status() {
        let temp_dir = TempDir::new().unwrap();
        let env = environment(temp_dir.path());

        let ok = env.execute(&env.invocation("true", Vec::<String>::new())).await.unwrap();
        assert!(ok.success());

        let failed = env
            .execute(&env.invocation("sh", ["-c", "exit 3"]))
            .await
            .unwrap();
        assert!(!failed.success());
        assert_eq!(failed.code(), Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn arguments_are_not_shell_interpreted() {
        let temp_dir = TempDir::new().unwrap();
        let env = environment(temp_dir.path());

        let status = env
            .execute(&env.invocation("touch", ["a; touch b"]))
            .await
            .unwrap();

        assert!(status.success());
        assert!(temp_dir.path().join("a; touch b").exists());
        assert!(!temp_dir.path().join("b").exists());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let temp_dir = TempDir::new().unwrap();
        let env = environment(temp_dir.path());

        let err = env
            .execute(&env.invocation("kiln-no-such-tool", Vec::<String>::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Spawn { ref tool, .. } if tool == "kiln-no-such-tool"));
    }
}
