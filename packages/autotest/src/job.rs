use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::{
    AutoTestResult, ContainerInput, ContainerOutput, ContainerState, GradePayload, GradeReport,
};

use crate::docker::DockerRuntime;
use crate::error::{AutotestError, Result};
use crate::sinks::GradeSink;

/// How much container stdio to keep on the result for staff debugging.
const STDIO_TAIL_BYTES: usize = 4096;

/// Everything a detached grading run needs, cloned out of the dispatcher
/// at launch time. The completion sender is the only route back; every
/// exit of the job body uses it.
pub(crate) struct JobContext {
    pub docker: Arc<DockerRuntime>,
    pub grade_sink: Arc<dyn GradeSink>,
    pub completion_tx: mpsc::UnboundedSender<AutoTestResult>,
    pub workspace_root: PathBuf,
}

/// Entry point for a scheduled job. Never returns an error: failures are
/// folded into a well-formed result so the slot always frees.
pub(crate) async fn run_detached(ctx: JobContext, input: ContainerInput) {
    let key = input.key();
    let result = if input.target.postback.is_test_mode() {
        MockGradingJob::new(input).run()
    } else {
        let mut job = GradingJob::new(input, &ctx.workspace_root);
        job.grade(&ctx.docker).await
    };

    let payload = partial_grade(&result);
    if let Err(e) = ctx.grade_sink.send_grade(&payload).await {
        warn!(key = %key, error = %e, "Grade sink rejected partial grade");
    }

    if ctx.completion_tx.send(result).is_err() {
        warn!(key = %key, "Dispatcher gone before job completion");
    }
}

/// The partial grade emitted to the grade sink right after a run.
fn partial_grade(result: &AutoTestResult) -> GradePayload {
    let short_sha: String = result.commit_sha.chars().take(7).collect();
    GradePayload {
        deliv_id: result.deliv_id.clone(),
        repo_id: result.repo_id.clone(),
        repo_url: repo_url_of(&result.commit_url),
        score: result.score(),
        url_name: short_sha,
        url: result.commit_url.clone(),
        comment: None,
        timestamp: result.output.timestamp,
        custom: Default::default(),
    }
}

/// The commit URL is `<repo url>/commit/<sha>`; everything before the
/// marker is the repository itself.
fn repo_url_of(commit_url: &str) -> String {
    match commit_url.find("/commit/") {
        Some(idx) => commit_url[..idx].to_string(),
        None => commit_url.to_string(),
    }
}

/// A one-shot grading run: workspace checkout, container execution,
/// report collection.
pub struct GradingJob {
    job_id: String,
    input: ContainerInput,
    workspace: PathBuf,
    prepared: bool,
}

impl GradingJob {
    pub fn new(input: ContainerInput, workspace_root: &Path) -> Self {
        let job_id = Uuid::new_v4().to_string();
        let workspace = workspace_root.join(format!("job-{job_id}"));
        Self {
            job_id,
            input,
            workspace,
            prepared: false,
        }
    }

    /// Create the per-job working area and check out the target commit.
    /// Idempotent: a second call on the same job is a no-op.
    pub async fn prepare(&mut self) -> Result<()> {
        if self.prepared {
            debug!(job_id = %self.job_id, "Workspace already prepared");
            return Ok(());
        }

        let assn = self.workspace.join("assn");
        fs::create_dir_all(&assn).await?;
        fs::create_dir_all(self.workspace.join("output")).await?;

        let clone_url = repo_url_of(&self.input.target.commit_url);
        run_git(&["clone", &clone_url, &assn.to_string_lossy()]).await?;
        run_git(&[
            "-C",
            &assn.to_string_lossy(),
            "checkout",
            &self.input.target.commit_sha,
        ])
        .await?;

        self.prepared = true;
        Ok(())
    }

    /// Prepare, run the container, and collect the report. All failure
    /// modes land in the returned record; the caller never sees an error.
    pub async fn grade(&mut self, docker: &DockerRuntime) -> AutoTestResult {
        if let Err(e) = self.prepare().await {
            warn!(job_id = %self.job_id, error = %e, "Workspace preparation failed");
            return self.finish(ContainerOutput::errored(
                ContainerState::Fail,
                Some(e.to_string()),
            ));
        }
        let output = self.run(docker).await;
        self.finish(output)
    }

    /// Launch the deliverable's image against the prepared workspace and
    /// build the container output, enforcing the per-deliverable timeout.
    async fn run(&self, docker: &DockerRuntime) -> ContainerOutput {
        let timeout = Duration::from_secs(self.input.params.timeout_secs);
        let name = format!("autograde-{}", self.job_id);

        let run = match docker
            .run_container(&name, &self.input.params.image, &self.workspace, timeout)
            .await
        {
            Ok(run) => run,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "Container launch failed");
                return ContainerOutput::errored(ContainerState::Fail, Some(e.to_string()));
            }
        };

        if run.timed_out {
            return ContainerOutput::errored(ContainerState::Timeout, None);
        }

        let stdio = tail(&format!("{}{}", run.stdout, run.stderr));
        match self.collect_report().await {
            Ok(report) => ContainerOutput {
                timestamp: Utc::now(),
                report: Some(report),
                state: ContainerState::Success,
                stdio,
            },
            Err(_) if !run.succeeded() => {
                info!(job_id = %self.job_id, exit = ?run.exit_code, "Container failed without a report");
                ContainerOutput::errored(ContainerState::Fail, stdio)
            }
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "Container exited cleanly but report is unusable");
                ContainerOutput::errored(ContainerState::Invalid, stdio)
            }
        }
    }

    /// The grader image writes its structured report to `output/report.json`.
    async fn collect_report(&self) -> Result<GradeReport> {
        let path = self.workspace.join("output").join("report.json");
        let raw = fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn finish(&self, output: ContainerOutput) -> AutoTestResult {
        AutoTestResult::from_input(self.input.clone(), output)
    }
}

async fn run_git(args: &[&str]) -> Result<()> {
    let out = Command::new("git").args(args).output().await?;
    if !out.status.success() {
        return Err(AutotestError::Checkout(
            String::from_utf8_lossy(&out.stderr).to_string(),
        ));
    }
    Ok(())
}

fn tail(s: &str) -> Option<String> {
    if s.is_empty() {
        return None;
    }
    let start = s.len().saturating_sub(STDIO_TAIL_BYTES);
    // Snap to a char boundary.
    let start = (start..s.len()).find(|i| s.is_char_boundary(*i)).unwrap_or(0);
    Some(s[start..].to_string())
}

/// Synthetic grading run for test submissions. Skips the container runtime
/// entirely and returns a fixed mid-range grade.
pub struct MockGradingJob {
    input: ContainerInput,
}

impl MockGradingJob {
    pub fn new(input: ContainerInput) -> Self {
        Self { input }
    }

    pub fn run(self) -> AutoTestResult {
        let report = GradeReport {
            score_overall: Some(50.0),
            feedback: Some("Grading completed (test mode).".into()),
            ..GradeReport::default()
        };
        AutoTestResult::from_input(
            self.input,
            ContainerOutput {
                timestamp: Utc::now(),
                report: Some(report),
                state: ContainerState::Success,
                stdio: None,
            },
        )
    }
}
