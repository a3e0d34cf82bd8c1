//! Runs one stage command and captures its output.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{DeployError, Result};
use crate::run::{StageName, StageResult, truncate_output};

/// A parsed command line plus the directory and environment it runs with
#[derive(Debug, Clone, PartialEq)]
pub struct StageCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

impl StageCommand {
    /// Split a command line on whitespace into program + args.
    /// Returns a config error if the command line is empty.
    pub fn parse(command_line: &str, cwd: impl Into<PathBuf>) -> Result<Self> {
        Self::parse_template(command_line, &[], cwd)
    }

    /// Split a configured command line on whitespace, then replace each
    /// `{key}` placeholder inside the resulting tokens. A substituted value
    /// always stays within its token, whatever whitespace it contains.
    pub fn parse_template(
        template: &str,
        substitutions: &[(&str, &str)],
        cwd: impl Into<PathBuf>,
    ) -> Result<Self> {
        let expand = |token: &str| {
            substitutions
                .iter()
                .fold(token.to_string(), |acc, (key, value)| {
                    acc.replace(&format!("{{{}}}", key), value)
                })
        };
        let mut parts = template.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| DeployError::ConfigError("stage command is empty".to_string()))?;
        Ok(Self {
            program: expand(program),
            args: parts.map(expand).collect(),
            cwd: cwd.into(),
            env: Vec::new(),
        })
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn display(&self) -> String {
        let mut cmd = self.program.clone();
        for arg in &self.args {
            cmd.push(' ');
            cmd.push_str(arg);
        }
        cmd
    }
}

/// Executes stage commands. A non-zero exit is a normal result; only a
/// command that cannot be started, or one that outlives the timeout, is an error.
#[derive(Debug, Clone, Default)]
pub struct StageRunner {
    timeout: Option<Duration>,
}

impl StageRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub async fn run(&self, stage: StageName, command: &StageCommand) -> Result<StageResult> {
        info!(
            target: "stage",
            "Running {} (cwd = '{}'): {}",
            stage,
            command.cwd.display(),
            command.display()
        );

        ensure_dir(stage, &command.cwd)?;

        let start = Instant::now();
        let child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.cwd)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DeployError::StageSpawnFailed { stage, source })?;

        // Dropping the future on timeout drops the child, which kills it
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| {
                    warn!("{} exceeded its {}s limit, killed", stage, limit.as_secs());
                    DeployError::StageTimedOut {
                        stage,
                        limit_secs: limit.as_secs(),
                    }
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|source| DeployError::StageSpawnFailed { stage, source })?;

        let duration_ms = start.elapsed().as_millis() as u64;
        // Killed by a signal: no exit code
        let exit_code = output.status.code().unwrap_or(-1);
        let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if truncate_output(&mut stdout) | truncate_output(&mut stderr) {
            debug!("{} output truncated", stage);
        }

        let result = StageResult {
            name: stage,
            exit_code,
            stdout,
            stderr,
            succeeded: output.status.success(),
            duration_ms,
        };
        log_output(&result);
        Ok(result)
    }
}

fn ensure_dir(stage: StageName, dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    Err(DeployError::StageSpawnFailed {
        stage,
        source: std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("working directory '{}' not found", dir.display()),
        ),
    })
}

fn log_output(result: &StageResult) {
    let out = result.stdout.trim();
    match result.name {
        StageName::Fetch => {
            info!(target: "stage::fetch", exit_code = result.exit_code, duration_ms = result.duration_ms, "{}", out)
        }
        StageName::Test => {
            info!(target: "stage::test", exit_code = result.exit_code, duration_ms = result.duration_ms, "{}", out)
        }
        StageName::Deploy => {
            info!(target: "stage::deploy", exit_code = result.exit_code, duration_ms = result.duration_ms, "{}", out)
        }
    }
    if !result.succeeded {
        warn!(
            "{} exited with code {}:\n{}",
            result.name,
            result.exit_code,
            result.failure_output()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_program_and_args() {
        let cmd = StageCommand::parse("git pull origin main", "/srv/app").unwrap();
        assert_eq!(cmd.program, "git");
        assert_eq!(cmd.args, vec!["pull", "origin", "main"]);
        assert_eq!(cmd.cwd, PathBuf::from("/srv/app"));
        assert_eq!(cmd.display(), "git pull origin main");
    }

    #[test]
    fn template_values_stay_one_argument() {
        let cmd = StageCommand::parse_template(
            "git pull origin {branch}",
            &[("branch", "main --upload-pack=touch")],
            ".",
        )
        .unwrap();
        assert_eq!(cmd.args, vec!["pull", "origin", "main --upload-pack=touch"]);
    }

    #[test]
    fn parse_rejects_empty_command() {
        let err = StageCommand::parse("   ", ".").unwrap_err();
        assert!(matches!(err, DeployError::ConfigError(_)));
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr_separately() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("both.sh");
        std::fs::write(&script, "echo out-line\necho err-line >&2\n").unwrap();
        let cmd = StageCommand::parse(&format!("sh {}", script.display()), dir.path()).unwrap();

        let result = StageRunner::default().run(StageName::Test, &cmd).await.unwrap();
        assert!(result.succeeded);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "out-line");
        assert_eq!(result.stderr.trim(), "err-line");
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_result_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = StageCommand::parse("false", dir.path()).unwrap();
        let result = StageRunner::default().run(StageName::Deploy, &cmd).await.unwrap();
        assert!(!result.succeeded);
        assert_ne!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = StageCommand::parse("definitely-not-a-real-binary-4821", dir.path()).unwrap();
        let err = StageRunner::default().run(StageName::Test, &cmd).await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::StageSpawnFailed { stage: StageName::Test, .. }
        ));
    }

    #[tokio::test]
    async fn missing_directory_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = StageCommand::parse("true", dir.path().join("gone")).unwrap();
        let err = StageRunner::default().run(StageName::Fetch, &cmd).await.unwrap_err();
        assert!(matches!(err, DeployError::StageSpawnFailed { .. }));
    }

    #[tokio::test]
    async fn hung_stage_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = StageCommand::parse("sleep 5", dir.path()).unwrap();
        let runner = StageRunner::new(Some(Duration::from_millis(100)));
        let err = runner.run(StageName::Deploy, &cmd).await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::StageTimedOut { stage: StageName::Deploy, .. }
        ));
    }

    #[tokio::test]
    async fn env_is_exported_to_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("env.sh");
        std::fs::write(&script, "echo \"$CI_BRANCH\"\n").unwrap();
        let cmd = StageCommand::parse(&format!("sh {}", script.display()), dir.path())
            .unwrap()
            .with_env("CI_BRANCH", "release/1.2");

        let result = StageRunner::default().run(StageName::Test, &cmd).await.unwrap();
        assert_eq!(result.stdout.trim(), "release/1.2");
    }
}
