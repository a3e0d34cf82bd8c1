//! Push pipeline: fetch, test, deploy, with a status update on every transition.
//!
//! Stages run strictly in order and the first failure ends the run. Deploy
//! never runs against code whose tests failed. There is no rollback.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::DeployConfig;
use crate::error::DeployError;
use crate::run::{PipelineRun, RunState, StageName, StageResult};
use crate::stage::{StageCommand, StageRunner};
use crate::status::{CommitRef, CommitState, StatusObserver, StatusUpdate};
use crate::webhook::PushPayload;

/// Command lines and directories the stages run with
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub working_dir: PathBuf,
    pub deploy_dir: PathBuf,
    pub fetch_command: String,
    pub test_command: String,
    pub deploy_command: String,
    pub status_context: String,
    pub target_url: String,
}

impl From<&DeployConfig> for PipelineSettings {
    fn from(config: &DeployConfig) -> Self {
        Self {
            working_dir: config.working_dir.clone(),
            deploy_dir: config.deploy_dir.clone(),
            fetch_command: config.fetch_command.clone(),
            test_command: config.test_command.clone(),
            deploy_command: config.deploy_command.clone(),
            status_context: config.status_context.clone(),
            target_url: config.target_url(),
        }
    }
}

/// Branch names reach the fetch command as an argument, so anything git
/// could read as an option, or that is not a single token, is refused.
pub fn is_safe_branch(branch: &str) -> bool {
    !branch.is_empty()
        && !branch.starts_with('-')
        && !branch.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// How a stage ended, from the pipeline's point of view
enum StageOutcome {
    Passed(StageResult),
    /// Ran and exited non-zero
    Failed(StageResult),
    /// Never produced a result: could not start or timed out
    Aborted(DeployError),
}

pub struct Orchestrator {
    settings: PipelineSettings,
    runner: StageRunner,
    observer: Arc<dyn StatusObserver>,
}

impl Orchestrator {
    pub fn new(
        settings: PipelineSettings,
        runner: StageRunner,
        observer: Arc<dyn StatusObserver>,
    ) -> Self {
        Self {
            settings,
            runner,
            observer,
        }
    }

    pub fn from_config(config: &DeployConfig, observer: Arc<dyn StatusObserver>) -> Self {
        Self::new(
            PipelineSettings::from(config),
            StageRunner::new(config.stage_timeout()),
            observer,
        )
    }

    /// Runs the whole pipeline for one push and returns the finished run.
    pub async fn run(&self, repository_full_name: &str, push: &PushPayload) -> PipelineRun {
        let mut run = PipelineRun::new(
            repository_full_name.to_string(),
            push.head_sha.clone(),
            push.branch.clone(),
        );
        let commit = CommitRef::new(repository_full_name, push.head_sha.clone());
        info!(
            "Run {} started for '{}' branch '{}' ({})",
            run.id, repository_full_name, push.branch, push.head_sha
        );

        self.enter_stage(&mut run, &commit, StageName::Fetch);
        if !self.settings.working_dir.is_dir() {
            error!(
                "Working directory not found: {}",
                self.settings.working_dir.display()
            );
            self.finish(&mut run, &commit, RunState::Error, "working directory not found");
            return run;
        }

        if !is_safe_branch(&push.branch) {
            error!("Refusing to fetch branch {:?}", push.branch);
            self.finish(&mut run, &commit, RunState::Error, "invalid branch name");
            return run;
        }

        let fetch = StageCommand::parse_template(
            &self.settings.fetch_command,
            &[("branch", &push.branch)],
            &self.settings.working_dir,
        );
        match self.execute(&run, push, StageName::Fetch, fetch).await {
            StageOutcome::Passed(result) => run.record(result),
            StageOutcome::Failed(result) => {
                run.record(result);
                self.finish(&mut run, &commit, RunState::Error, "fetch failed");
                return run;
            }
            StageOutcome::Aborted(e) => {
                self.abort(&mut run, &commit, StageName::Fetch, e);
                return run;
            }
        }

        for (stage, command_line, dir) in [
            (
                StageName::Test,
                &self.settings.test_command,
                &self.settings.working_dir,
            ),
            (
                StageName::Deploy,
                &self.settings.deploy_command,
                &self.settings.deploy_dir,
            ),
        ] {
            self.enter_stage(&mut run, &commit, stage);
            let command = StageCommand::parse(command_line, dir);
            match self.execute(&run, push, stage, command).await {
                StageOutcome::Passed(result) => run.record(result),
                StageOutcome::Failed(result) => {
                    run.record(result);
                    self.finish(&mut run, &commit, RunState::Failure, stage.failed_description());
                    return run;
                }
                StageOutcome::Aborted(e) => {
                    self.abort(&mut run, &commit, stage, e);
                    return run;
                }
            }
        }

        self.finish(&mut run, &commit, RunState::Success, "automation completed");
        run
    }

    /// Closes out a commit whose run died without reaching a terminal state.
    pub fn report_unexpected(&self, commit: &CommitRef) {
        self.emit(commit, CommitState::Error, "unexpected error");
    }

    async fn execute(
        &self,
        run: &PipelineRun,
        push: &PushPayload,
        stage: StageName,
        command: crate::error::Result<StageCommand>,
    ) -> StageOutcome {
        let command = match command {
            Ok(cmd) => cmd
                .with_env("CI_REPOSITORY", &run.repository_full_name)
                .with_env("CI_BRANCH", &push.branch)
                .with_env("CI_COMMIT_SHA", &push.head_sha)
                .with_env("CI_PUSHER", &push.pusher_name)
                .with_env("CI_RUN_ID", &run.id),
            Err(e) => return StageOutcome::Aborted(e),
        };

        match self.runner.run(stage, &command).await {
            Ok(result) if result.succeeded => {
                info!("Run {}: {} passed", run.id, stage);
                StageOutcome::Passed(result)
            }
            Ok(result) => {
                warn!(
                    "Run {}: {} failed with exit code {}",
                    run.id, stage, result.exit_code
                );
                StageOutcome::Failed(result)
            }
            Err(e) => StageOutcome::Aborted(e),
        }
    }

    fn enter_stage(&self, run: &mut PipelineRun, commit: &CommitRef, stage: StageName) {
        if run.transition(RunState::Pending(stage)) {
            self.emit(commit, CommitState::Pending, stage.starting_description());
        }
    }

    /// A stage that never produced an exit code. Timeouts count as failures;
    /// anything else (missing interpreter, bad command line) is an error.
    fn abort(&self, run: &mut PipelineRun, commit: &CommitRef, stage: StageName, err: DeployError) {
        error!("Run {}: {}", run.id, err);
        match err {
            DeployError::StageTimedOut { .. } => {
                self.finish(run, commit, RunState::Failure, &format!("{} timed out", stage))
            }
            _ => self.finish(run, commit, RunState::Error, &format!("{} could not start", stage)),
        }
    }

    fn finish(&self, run: &mut PipelineRun, commit: &CommitRef, state: RunState, description: &str) {
        let commit_state = match state {
            RunState::Success => CommitState::Success,
            RunState::Failure => CommitState::Failure,
            _ => CommitState::Error,
        };
        if run.transition(state) {
            self.emit(commit, commit_state, description);
            info!("Run {} finished: {} ({})", run.id, commit_state, description);
        }
    }

    fn emit(&self, commit: &CommitRef, state: CommitState, description: &str) {
        self.observer.notify(
            commit,
            StatusUpdate {
                state,
                target_url: self.settings.target_url.clone(),
                description: description.to_string(),
                context: self.settings.status_context.clone(),
            },
        );
    }
}
