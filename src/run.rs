use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum size for captured stage output before truncation (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// The three stages of a push pipeline, in execution order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Fetch,
    Test,
    Deploy,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Fetch => "fetch",
            StageName::Test => "test",
            StageName::Deploy => "deploy",
        }
    }

    /// Description sent with the pending status that opens this stage
    pub fn starting_description(&self) -> &'static str {
        match self {
            StageName::Fetch => "fetch starting",
            StageName::Test => "tests starting",
            StageName::Deploy => "deploy starting",
        }
    }

    /// Description sent when the stage command exits non-zero
    pub fn failed_description(&self) -> &'static str {
        match self {
            StageName::Fetch => "fetch failed",
            StageName::Test => "tests failed",
            StageName::Deploy => "deploy failed",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one stage command that ran to completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub name: StageName,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub succeeded: bool,
    pub duration_ms: u64,
}

impl StageResult {
    /// Text worth showing when the stage failed: stderr if any, otherwise stdout
    pub fn failure_output(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

/// Truncates captured output in place, returning true if anything was cut
pub fn truncate_output(output: &mut String) -> bool {
    if output.len() <= MAX_OUTPUT_SIZE {
        return false;
    }
    let mut cut = MAX_OUTPUT_SIZE;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output.push_str("\n... (output truncated)");
    true
}

/// Pipeline state machine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", tag = "state", content = "stage")]
pub enum RunState {
    Idle,
    Pending(StageName),
    Success,
    Failure,
    Error,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Success | RunState::Failure | RunState::Error)
    }
}

/// A single pipeline run for one push delivery. Lives only as long as its task.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub id: String,
    pub repository_full_name: String,
    pub head_sha: String,
    pub branch: String,
    pub state: RunState,
    pub stages: Vec<StageResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(repository_full_name: String, head_sha: String, branch: String) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            repository_full_name,
            head_sha,
            branch,
            state: RunState::Idle,
            stages: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Moves the run to `next`. Returns false, leaving the run untouched,
    /// if the run already reached a terminal state.
    pub fn transition(&mut self, next: RunState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        true
    }

    pub fn record(&mut self, result: StageResult) {
        self.stages.push(result);
    }

    /// Names of the stages that actually ran, in order
    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.name).collect()
    }
}
