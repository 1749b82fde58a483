use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use common::config::AutotestConfig;
use common::{AutoTestResult, ContainerInput, ExecutionKey};

use crate::docker::DockerRuntime;
use crate::job::{run_detached, JobContext};
use crate::queue::JobQueue;
use crate::sinks::{ExecutionObserver, GradeSink, ResultSink};

/// The three priority tiers, always locked together. One logical executor
/// owns scheduling; this mutex is that serialization on a threaded runtime.
struct Tiers {
    express: JobQueue,
    standard: JobQueue,
    regression: JobQueue,
}

impl Tiers {
    fn contains(&self, key: &ExecutionKey) -> bool {
        self.express.contains(key) || self.standard.contains(key) || self.regression.contains(key)
    }

    fn is_executing(&self, key: &ExecutionKey) -> bool {
        self.express.is_commit_executing(key)
            || self.standard.is_commit_executing(key)
            || self.regression.is_commit_executing(key)
    }
}

/// Point-in-time view of one tier, for status endpoints and tests.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub name: String,
    pub waiting: usize,
    pub running: usize,
}

impl QueueSnapshot {
    fn of(q: &JobQueue) -> Self {
        Self {
            name: q.name().to_string(),
            waiting: q.len(),
            running: q.num_running(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatcherSnapshot {
    pub express: QueueSnapshot,
    pub standard: QueueSnapshot,
    pub regression: QueueSnapshot,
}

impl DispatcherSnapshot {
    pub fn total_running(&self) -> usize {
        self.express.running + self.standard.running + self.regression.running
    }

    pub fn total_waiting(&self) -> usize {
        self.express.waiting + self.standard.waiting + self.regression.waiting
    }
}

/// The grading scheduler. Owns the express/standard/regression tiers,
/// admits work, advances on `tick`, and frees slots as detached job runs
/// report back through the completion channel.
///
/// A job failure never takes the dispatcher down: every completion path
/// funnels through [`Dispatcher::handle_execution_complete`], which frees
/// the slot and re-ticks.
pub struct Dispatcher {
    tiers: Mutex<Tiers>,
    docker: Arc<DockerRuntime>,
    result_sink: Arc<dyn ResultSink>,
    grade_sink: Arc<dyn GradeSink>,
    observer: Arc<dyn ExecutionObserver>,
    workspace_root: PathBuf,
    completion_tx: mpsc::UnboundedSender<AutoTestResult>,
}

impl Dispatcher {
    pub fn new(
        cfg: &AutotestConfig,
        docker: Arc<DockerRuntime>,
        result_sink: Arc<dyn ResultSink>,
        grade_sink: Arc<dyn GradeSink>,
        observer: Arc<dyn ExecutionObserver>,
        workspace_root: PathBuf,
    ) -> Arc<Self> {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Self {
            tiers: Mutex::new(Tiers {
                express: JobQueue::new("express", cfg.slots_express),
                standard: JobQueue::new("standard", cfg.slots_standard),
                regression: JobQueue::new("regression", cfg.slots_regression),
            }),
            docker,
            result_sink,
            grade_sink,
            observer,
            workspace_root,
            completion_tx,
        });
        tokio::spawn(completion_loop(
            Arc::downgrade(&dispatcher),
            completion_rx,
        ));
        dispatcher
    }

    /// Admit a job to the standard tier. Duplicate admissions of an
    /// execution already queued or running anywhere are dropped.
    ///
    /// Returns whether the job was admitted.
    pub async fn add_to_standard_queue(&self, input: ContainerInput) -> bool {
        let mut tiers = self.tiers.lock().await;
        let key = input.key();
        if tiers.contains(&key) {
            debug!(key = %key, "Commit already queued or running; not re-admitting");
            return false;
        }
        info!(key = %key, "Admitted to standard queue");
        tiers.standard.push(input)
    }

    /// Admit a job to the regression tier (scheduled regression sweeps).
    pub async fn add_to_regression_queue(&self, input: ContainerInput) -> bool {
        let mut tiers = self.tiers.lock().await;
        let key = input.key();
        if tiers.contains(&key) {
            debug!(key = %key, "Commit already queued or running; not re-admitting");
            return false;
        }
        info!(key = %key, "Admitted to regression queue");
        tiers.regression.push(input)
    }

    /// Advance the scheduler once. Starts every job that can start right
    /// now: fills express, drains express backlog into idle standard and
    /// regression slots, fills standard, drains standard backlog into an
    /// idle regression slot, fills regression. Idempotent when there is
    /// nothing to do.
    pub async fn tick(&self) {
        let launches = {
            let mut tiers = self.tiers.lock().await;
            self.handle_tick(&mut tiers)
        };
        for input in launches {
            self.launch(input);
        }
    }

    fn handle_tick(&self, t: &mut Tiers) -> Vec<ContainerInput> {
        let mut launches = Vec::new();
        Self::schedule(&mut t.express, &mut launches);
        Self::promote(&mut t.express, &mut t.standard, &mut launches);
        Self::promote(&mut t.express, &mut t.regression, &mut launches);
        Self::schedule(&mut t.standard, &mut launches);
        Self::promote(&mut t.standard, &mut t.regression, &mut launches);
        Self::schedule(&mut t.regression, &mut launches);
        launches
    }

    /// Start the head of `q` if it has one and a slot is free.
    fn schedule(q: &mut JobQueue, launches: &mut Vec<ContainerInput>) {
        if !q.has_capacity() || q.is_empty() {
            return;
        }
        match q.schedule_next() {
            Ok(input) => {
                info!(queue = %q.name(), key = %input.key(), "Job scheduled");
                launches.push(input);
            }
            // Preconditions were checked above; reaching here is a bug,
            // but scheduling must stay alive.
            Err(e) => error!(queue = %q.name(), error = %e, "Scheduling failed"),
        }
    }

    /// Move the head of `from`'s backlog into `to`'s free slot. Head
    /// insertion keeps the job's arrival priority in the receiving tier.
    fn promote(from: &mut JobQueue, to: &mut JobQueue, launches: &mut Vec<ContainerInput>) {
        if from.is_empty() || !to.has_capacity() {
            return;
        }
        match from.pop() {
            Ok(input) => {
                debug!(from = %from.name(), to = %to.name(), key = %input.key(), "Promoting across tiers");
                to.push_first(input);
                Self::schedule(to, launches);
            }
            Err(e) => error!(from = %from.name(), error = %e, "Promotion pop failed"),
        }
    }

    /// On a user-initiated feedback request, consider moving an
    /// already-queued job to the express tier.
    ///
    /// The job moves only when the express backlog is shorter than the
    /// job's current position (counting from one): anything closer to the
    /// front of its own tier finishes sooner by staying put. Running jobs
    /// and jobs already on express are left alone.
    pub async fn promote_if_needed(&self, key: &ExecutionKey) {
        let moved = {
            let mut guard = self.tiers.lock().await;
            let t = &mut *guard;
            if t.is_executing(key) {
                debug!(key = %key, "Already executing; no promotion");
                false
            } else if t.express.index_of(&key.commit_url).is_some() {
                debug!(key = %key, "Already on express; no promotion");
                false
            } else if let Some(idx) = t.standard.index_of(&key.commit_url) {
                Self::move_to_express(&mut t.standard, &mut t.express, key, idx)
            } else if let Some(idx) = t.regression.index_of(&key.commit_url) {
                Self::move_to_express(&mut t.regression, &mut t.express, key, idx)
            } else {
                debug!(key = %key, "Not queued; no promotion");
                false
            }
        };
        if moved {
            self.tick().await;
        }
    }

    fn move_to_express(
        from: &mut JobQueue,
        express: &mut JobQueue,
        key: &ExecutionKey,
        idx: usize,
    ) -> bool {
        if express.len() > idx {
            debug!(key = %key, position = idx, "Express backlog no shorter; staying put");
            return false;
        }
        match from.remove(&key.commit_url) {
            Some(input) => {
                info!(key = %key, from = %from.name(), "Promoted to express on demand");
                express.push(input)
            }
            None => false,
        }
    }

    /// Detach a grading run for a scheduled input. The spawned future owns
    /// everything it needs; its only route back is the completion channel,
    /// which it signals on every exit path.
    fn launch(&self, input: ContainerInput) {
        let ctx = JobContext {
            docker: Arc::clone(&self.docker),
            grade_sink: Arc::clone(&self.grade_sink),
            completion_tx: self.completion_tx.clone(),
            workspace_root: self.workspace_root.clone(),
        };
        tokio::spawn(run_detached(ctx, input));
    }

    /// Completion hook: store the result, notify the extension seam, free
    /// the slot, and advance the scheduler.
    pub async fn handle_execution_complete(&self, result: AutoTestResult) {
        if !result.is_well_formed() {
            error!(
                commit_url = %result.commit_url,
                deliv_id = %result.deliv_id,
                "Dropping malformed grading result"
            );
            return;
        }

        if let Err(e) = self.result_sink.save_result(&result).await {
            warn!(key = %result.key(), error = %e, "Result sink rejected record; continuing");
        }

        if let Err(e) = self.observer.process_execution(&result).await {
            warn!(key = %result.key(), error = %e, "Execution observer failed; continuing");
        }

        let key = result.key();
        {
            let mut guard = self.tiers.lock().await;
            let t = &mut *guard;
            // The job lives in exactly one tier; clearing all three is idempotent.
            for q in [&mut t.express, &mut t.standard, &mut t.regression] {
                q.clear_execution(&key);
            }
        }
        info!(key = %key, score = ?result.score(), "Execution complete; slot freed");

        self.tick().await;
    }

    pub async fn snapshot(&self) -> DispatcherSnapshot {
        let t = self.tiers.lock().await;
        DispatcherSnapshot {
            express: QueueSnapshot::of(&t.express),
            standard: QueueSnapshot::of(&t.standard),
            regression: QueueSnapshot::of(&t.regression),
        }
    }
}

/// Drains job completions back into the dispatcher. Holds only a weak
/// reference so a dropped dispatcher shuts the loop down.
async fn completion_loop(
    dispatcher: std::sync::Weak<Dispatcher>,
    mut rx: mpsc::UnboundedReceiver<AutoTestResult>,
) {
    while let Some(result) = rx.recv().await {
        match dispatcher.upgrade() {
            Some(d) => d.handle_execution_complete(result).await,
            None => break,
        }
    }
    debug!("Completion loop stopped");
}
