//! End-to-end scheduler behavior over mock grading runs: tier filling,
//! cross-tier promotion, on-demand promotion, and failure isolation.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use autotest::{
    Dispatcher, DispatcherSnapshot, DockerRuntime, ExecutionObserver, GradeSink, NullObserver,
    ResultSink, SinkError,
};
use common::config::AutotestConfig;
use common::{
    AutoTestResult, CommitTarget, ContainerInput, DeliverableParams, ExecutionKey, GradePayload,
    PostbackTarget,
};

fn input(sha: &str) -> ContainerInput {
    ContainerInput {
        target: CommitTarget {
            commit_sha: sha.into(),
            commit_url: format!("https://git.example.edu/org/repo/commit/{sha}"),
            repo_id: "repo".into(),
            deliv_id: "d1".into(),
            postback: PostbackTarget::Suppressed,
            timestamp: Utc::now(),
        },
        params: DeliverableParams {
            image: "grader/d1".into(),
            timeout_secs: 60,
        },
    }
}

fn key(sha: &str) -> ExecutionKey {
    ExecutionKey::new(format!("https://git.example.edu/org/repo/commit/{sha}"), "d1")
}

/// Grade sink that can hold each job on a per-commit gate, so tests can
/// observe jobs in their running state and release them one by one.
#[derive(Default)]
struct TestGradeSink {
    hold: bool,
    fail_shas: HashSet<String>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    grades: Mutex<Vec<GradePayload>>,
}

impl TestGradeSink {
    fn holding() -> Self {
        Self {
            hold: true,
            ..Self::default()
        }
    }

    fn failing_for(sha: &str) -> Self {
        Self {
            fail_shas: HashSet::from([sha.to_string()]),
            ..Self::default()
        }
    }

    fn gate_for(&self, sha: &str) -> Arc<Semaphore> {
        Arc::clone(
            self.gates
                .lock()
                .unwrap()
                .entry(sha.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(0))),
        )
    }

    fn release(&self, sha: &str) {
        self.gate_for(sha).add_permits(1);
    }

    fn graded_shas(&self) -> Vec<String> {
        self.grades
            .lock()
            .unwrap()
            .iter()
            .map(|g| g.url_name.clone())
            .collect()
    }
}

#[async_trait]
impl GradeSink for TestGradeSink {
    async fn send_grade(&self, grade: &GradePayload) -> Result<(), SinkError> {
        if self.hold {
            let gate = self.gate_for(&grade.url_name);
            gate.acquire().await.expect("gate closed").forget();
        }
        self.grades.lock().unwrap().push(grade.clone());
        if self.fail_shas.contains(&grade.url_name) {
            return Err(SinkError::Transport("injected grade sink failure".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct TestResultSink {
    reject: bool,
    results: Mutex<Vec<AutoTestResult>>,
}

#[async_trait]
impl ResultSink for TestResultSink {
    async fn save_result(&self, result: &AutoTestResult) -> Result<(), SinkError> {
        self.results.lock().unwrap().push(result.clone());
        if self.reject {
            return Err(SinkError::Rejected("injected result sink rejection".into()));
        }
        Ok(())
    }
}

struct FailingObserver;

#[async_trait]
impl ExecutionObserver for FailingObserver {
    async fn process_execution(&self, _result: &AutoTestResult) -> anyhow::Result<()> {
        anyhow::bail!("injected observer failure")
    }
}

fn dispatcher(
    grade_sink: Arc<TestGradeSink>,
    result_sink: Arc<TestResultSink>,
    observer: Arc<dyn ExecutionObserver>,
) -> Arc<Dispatcher> {
    Dispatcher::new(
        &AutotestConfig::default(),
        Arc::new(DockerRuntime::default()),
        result_sink,
        grade_sink,
        observer,
        PathBuf::from("/tmp/autograde-test"),
    )
}

async fn wait_snapshot(
    d: &Dispatcher,
    what: &str,
    pred: impl Fn(&DispatcherSnapshot) -> bool,
) -> DispatcherSnapshot {
    for _ in 0..300 {
        let snap = d.snapshot().await;
        if pred(&snap) {
            return snap;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}: {:?}", d.snapshot().await);
}

#[tokio::test]
async fn test_tick_drains_standard_backlog_into_idle_tiers() {
    let grades = Arc::new(TestGradeSink::holding());
    let results = Arc::new(TestResultSink::default());
    let d = dispatcher(Arc::clone(&grades), Arc::clone(&results), Arc::new(NullObserver));

    for sha in ["j1", "j2", "j3", "j4"] {
        assert!(d.add_to_standard_queue(input(sha)).await);
    }
    d.tick().await;

    // One standard slot fills, and the standard backlog head is promoted
    // into the idle regression slot.
    let snap = wait_snapshot(&d, "two running after first tick", |s| s.total_running() == 2).await;
    assert_eq!(snap.standard.running, 1);
    assert_eq!(snap.regression.running, 1);
    assert_eq!(snap.standard.waiting, 2);

    d.tick().await;
    let snap = wait_snapshot(&d, "standard full after second tick", |s| s.total_running() == 3).await;
    assert_eq!(snap.standard.running, 2);
    assert_eq!(snap.standard.waiting, 1);

    // Saturated: a further tick must not overfill any tier.
    d.tick().await;
    sleep(Duration::from_millis(50)).await;
    let snap = d.snapshot().await;
    assert_eq!(snap.total_running(), 3);
    assert_eq!(snap.standard.running, 2);
    assert_eq!(snap.regression.running, 1);
    assert_eq!(snap.express.running, 0);

    for sha in ["j1", "j2", "j3", "j4"] {
        grades.release(sha);
    }
    let snap = wait_snapshot(&d, "all jobs drained", |s| {
        s.total_running() == 0 && s.total_waiting() == 0
    })
    .await;
    assert_eq!(snap.total_waiting(), 0);
    assert_eq!(results.results.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_duplicate_admission_rejected_until_completion() {
    let grades = Arc::new(TestGradeSink::holding());
    let d = dispatcher(
        Arc::clone(&grades),
        Arc::new(TestResultSink::default()),
        Arc::new(NullObserver),
    );

    assert!(d.add_to_standard_queue(input("j1")).await);
    assert!(!d.add_to_standard_queue(input("j1")).await);

    d.tick().await;
    wait_snapshot(&d, "j1 running", |s| s.total_running() == 1).await;

    // Still present (running), so still not re-admittable.
    assert!(!d.add_to_standard_queue(input("j1")).await);

    grades.release("j1");
    wait_snapshot(&d, "j1 done", |s| s.total_running() == 0).await;

    // Gone from every queue; a fresh grading run may now be requested.
    assert!(d.add_to_standard_queue(input("j1")).await);
}

#[tokio::test]
async fn test_feedback_request_promotes_to_express_and_runs_once() {
    let grades = Arc::new(TestGradeSink::holding());
    let results = Arc::new(TestResultSink::default());
    let d = dispatcher(Arc::clone(&grades), Arc::clone(&results), Arc::new(NullObserver));

    for sha in ["j1", "j2", "j3"] {
        d.add_to_standard_queue(input(sha)).await;
    }
    d.tick().await;

    // j1 and j2 occupy slots; j3 waits at the head of standard.
    let snap = wait_snapshot(&d, "two running", |s| s.total_running() == 2).await;
    assert_eq!(snap.standard.waiting, 1);
    assert_eq!(snap.express.running, 0);

    // Express is empty, so the feedback request moves j3 there and it starts.
    d.promote_if_needed(&key("j3")).await;
    let snap = wait_snapshot(&d, "j3 on express", |s| s.express.running == 1).await;
    assert_eq!(snap.standard.waiting, 0);
    assert_eq!(snap.total_running(), 3);

    // j3 completes: the express slot frees, the others stay busy.
    grades.release("j3");
    let snap = wait_snapshot(&d, "express slot freed", |s| s.express.running == 0).await;
    assert_eq!(snap.total_running(), 2);

    grades.release("j1");
    grades.release("j2");
    wait_snapshot(&d, "all drained", |s| s.total_running() == 0).await;

    // j3 ran exactly once.
    let graded = grades.graded_shas();
    assert_eq!(graded.iter().filter(|s| s.as_str() == "j3").count(), 1);
    assert_eq!(results.results.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_promotion_declined_when_express_backlog_no_shorter() {
    let grades = Arc::new(TestGradeSink::holding());
    let d = dispatcher(
        Arc::clone(&grades),
        Arc::new(TestResultSink::default()),
        Arc::new(NullObserver),
    );

    for sha in ["j1", "j2", "j3", "j4", "j5", "j6"] {
        d.add_to_standard_queue(input(sha)).await;
    }
    // Fill standard (2) and regression (1) slots across two ticks.
    d.tick().await;
    d.tick().await;
    wait_snapshot(&d, "three running", |s| s.total_running() == 3).await;

    // First feedback request: express is idle, j4 moves and starts.
    d.promote_if_needed(&key("j4")).await;
    wait_snapshot(&d, "j4 on express", |s| s.express.running == 1).await;

    // Second: express slot busy, backlog empty; j5 still moves (wait of 0
    // beats position 1 in standard) and queues on express.
    d.promote_if_needed(&key("j5")).await;
    let snap = wait_snapshot(&d, "j5 queued on express", |s| s.express.waiting == 1).await;
    assert_eq!(snap.standard.waiting, 1);

    // Third: express backlog is now as long as j6's position; it stays put.
    d.promote_if_needed(&key("j6")).await;
    sleep(Duration::from_millis(50)).await;
    let snap = d.snapshot().await;
    assert_eq!(snap.express.waiting, 1);
    assert_eq!(snap.standard.waiting, 1);

    for sha in ["j1", "j2", "j3", "j4", "j5", "j6"] {
        grades.release(sha);
    }
    wait_snapshot(&d, "all drained", |s| {
        s.total_running() == 0 && s.total_waiting() == 0
    })
    .await;
}

#[tokio::test]
async fn test_sink_and_observer_failures_do_not_wedge_the_queues() {
    // j1's grade postback fails, the result sink rejects everything, and
    // the observer always errors; slots must free and j3 must still run.
    let grades = Arc::new(TestGradeSink::failing_for("j1"));
    let results = Arc::new(TestResultSink {
        reject: true,
        ..TestResultSink::default()
    });
    let d = dispatcher(Arc::clone(&grades), Arc::clone(&results), Arc::new(FailingObserver));

    for sha in ["j1", "j2", "j3"] {
        d.add_to_standard_queue(input(sha)).await;
    }
    d.tick().await;

    wait_snapshot(&d, "everything drained despite failures", |s| {
        s.total_running() == 0 && s.total_waiting() == 0
    })
    .await;

    let graded = grades.graded_shas();
    assert!(graded.contains(&"j1".to_string()));
    assert!(graded.contains(&"j3".to_string()));
    assert_eq!(results.results.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_malformed_result_is_dropped_before_the_sink() {
    let results = Arc::new(TestResultSink::default());
    let d = dispatcher(
        Arc::new(TestGradeSink::default()),
        Arc::clone(&results),
        Arc::new(NullObserver),
    );

    let mut result = autotest::MockGradingJob::new(input("j1")).run();
    result.commit_url.clear();
    d.handle_execution_complete(result).await;

    assert!(results.results.lock().unwrap().is_empty());
}
