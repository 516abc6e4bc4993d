//! Job supervisor
//!
//! Launches one worker process per test request, feeds its output through
//! the log parser, and drives the task to a terminal state on exit, stop or
//! timeout. Exclusivity is delegated to the [`JobRegistry`].

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use shopguard_common::{
    Error, Report, Result, StopResponse, SubmitResponse, TaskSnapshot, TaskStatus, TaskSummary,
    TestRequest, TestScope,
};

use crate::config::DaemonConfig;
use crate::parser::LogParser;
use crate::registry::{JobRegistry, TaskHandle};
use crate::report::ReportStore;

/// Extra time `stop` waits beyond the grace period for the monitor to settle
const STOP_SETTLE: Duration = Duration::from_secs(5);

/// Worker exit codes
const EXIT_PASSED: i32 = 0;
const EXIT_FAILED: i32 = 1;

#[derive(Clone)]
pub struct Supervisor {
    registry: Arc<JobRegistry>,
    config: Arc<DaemonConfig>,
    reports: ReportStore,
}

/// Why the monitor loop stopped reading
enum Ending {
    Stopped,
    TimedOut,
    Exited(std::io::Result<ExitStatus>),
}

/// Line reader that keeps partial reads across `select!` cancellation
struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Next line without its terminator; `None` at end of stream
    async fn next_line(&mut self) -> Option<String> {
        match self.inner.read_until(b'\n', &mut self.buf).await {
            Ok(0) if self.buf.is_empty() => None,
            Ok(_) => {
                let line = String::from_utf8_lossy(&self.buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                self.buf.clear();
                Some(line)
            }
            Err(e) => {
                debug!("Worker stream closed: {}", e);
                None
            }
        }
    }
}

async fn next_line<R: AsyncBufRead + Unpin>(reader: &mut Option<LineReader<R>>) -> Option<String> {
    match reader {
        Some(reader) => reader.next_line().await,
        None => None,
    }
}

impl Supervisor {
    pub fn new(config: DaemonConfig) -> Self {
        let reports = ReportStore::new(config.reports_dir());
        Self {
            registry: Arc::new(JobRegistry::new()),
            config: Arc::new(config),
            reports,
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn reports(&self) -> &ReportStore {
        &self.reports
    }

    /// Admit a request and launch its worker.
    pub fn submit(&self, request: TestRequest) -> Result<SubmitResponse> {
        request.validate()?;
        let handle = self.registry.try_acquire(request.clone())?;
        let id = handle.id();

        let child = match self.worker_command(&request).spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("{}: {}", self.config.worker.program, e);
                error!("Task {} could not start its worker: {}", id, message);
                handle.update(|s| {
                    s.error = Some(message.clone());
                    s.finish(TaskStatus::Error);
                });
                self.registry.release(&id);
                handle.done_token().cancel();
                return Err(Error::WorkerSpawn(message));
            }
        };

        let timeout = self.config.supervisor.timeout_for(&request.scope);
        info!(
            "Task {} started: {} ({} mode, pid {:?})",
            id,
            request.scope.describe(),
            request.mode,
            child.id()
        );

        let supervisor = self.clone();
        let monitored = handle.clone();
        tokio::spawn(async move { supervisor.monitor(monitored, child, timeout).await });

        Ok(SubmitResponse {
            task_id: id,
            status: TaskStatus::Running,
        })
    }

    /// Request a stop and wait for the task to settle. Stopping a finished
    /// task changes nothing.
    pub async fn stop(&self, id: &str) -> Result<StopResponse> {
        let handle = self
            .registry
            .get(id)
            .ok_or_else(|| Error::not_found("task", id))?;

        let status = handle.status();
        if status.is_terminal() {
            return Ok(StopResponse {
                task_id: id.to_string(),
                status,
                stopped: false,
            });
        }

        info!("Stopping task {}", id);
        handle.cancel_token().cancel();
        let wait = self.config.supervisor.stop_grace() + STOP_SETTLE;
        if tokio::time::timeout(wait, handle.done_token().cancelled())
            .await
            .is_err()
        {
            warn!("Task {} did not settle within {:?}", id, wait);
        }

        let status = handle.status();
        Ok(StopResponse {
            task_id: id.to_string(),
            status,
            stopped: status == TaskStatus::Stopped,
        })
    }

    pub fn status(&self, id: &str) -> Result<TaskSnapshot> {
        self.registry
            .get(id)
            .map(|h| h.snapshot())
            .ok_or_else(|| Error::not_found("task", id))
    }

    pub fn list(&self) -> Vec<TaskSummary> {
        self.registry.list()
    }

    pub fn active(&self) -> Option<String> {
        self.registry.active()
    }

    /// Periodically evict expired terminal tasks
    pub async fn run_sweeper(&self) {
        let limits = &self.config.supervisor;
        info!(
            "Retention sweeper started (every {:?}, keep {:?})",
            limits.sweep_interval(),
            limits.retention()
        );

        loop {
            tokio::time::sleep(limits.sweep_interval()).await;
            let evicted = self.registry.sweep(limits.retention());
            if evicted > 0 {
                debug!("Evicted {} finished tasks", evicted);
            }
        }
    }

    /// Stop the active task, if any
    pub async fn shutdown(&self) {
        if let Some(id) = self.registry.active() {
            if let Err(e) = self.stop(&id).await {
                warn!("Failed to stop task {} on shutdown: {}", id, e);
            }
        }
    }

    fn worker_command(&self, request: &TestRequest) -> Command {
        let worker = &self.config.worker;
        let mut cmd = Command::new(&worker.program);
        cmd.args(&worker.args);
        cmd.arg("--catalog").arg(self.config.catalog_path());

        match &request.scope {
            TestScope::Product { product_id } => cmd.arg("--product-id").arg(product_id),
            TestScope::Products { product_ids } => {
                cmd.arg("--product-ids").arg(product_ids.join(","))
            }
            TestScope::Category { category } => cmd.arg("--category").arg(category),
            TestScope::All => cmd.arg("--all"),
        };
        if let Some(limit) = request.limit {
            cmd.arg("--limit").arg(limit.to_string());
        }
        cmd.arg("--mode").arg(request.mode.to_string());
        if !worker.headless {
            cmd.arg("--visible");
        }
        if let Some(url) = &worker.cart_url {
            cmd.arg("--cart-url").arg(url);
        }
        cmd.arg("--disabled-checkout")
            .arg(worker.disabled_checkout.to_string());

        // own process group so signals reach the browser processes too
        cmd.process_group(0)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn monitor(self, handle: Arc<TaskHandle>, mut child: Child, timeout: Duration) {
        let id = handle.id();
        let pgid = child.id();
        let max_lines = self.config.supervisor.max_log_lines;
        let mut parser = LogParser::new();
        let mut stdout = child.stdout.take().map(|s| LineReader::new(BufReader::new(s)));
        let mut stderr = child.stderr.take().map(|s| LineReader::new(BufReader::new(s)));
        let cancel = handle.cancel_token().clone();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let ending = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ending::Stopped,
                _ = &mut deadline => break Ending::TimedOut,
                line = next_line(&mut stdout), if stdout.is_some() => match line {
                    Some(line) => handle.update(|s| parser.feed(s, &line, max_lines)),
                    None => stdout = None,
                },
                line = next_line(&mut stderr), if stderr.is_some() => match line {
                    Some(line) => handle.update(|s| s.push_log(format!("[stderr] {}", line), max_lines)),
                    None => stderr = None,
                },
                status = child.wait(), if stdout.is_none() && stderr.is_none() => {
                    break Ending::Exited(status)
                }
            }
        };

        let (status, exit_code, error) = match ending {
            Ending::Stopped => {
                let code = self.terminate(&id, pgid, &mut child).await;
                (TaskStatus::Stopped, code, None)
            }
            Ending::TimedOut => {
                warn!("Task {} exceeded {:?}, killing worker", id, timeout);
                kill_worker(&id, pgid, &mut child).await;
                (
                    TaskStatus::Timeout,
                    None,
                    Some(format!("worker exceeded {}s", timeout.as_secs())),
                )
            }
            Ending::Exited(Ok(exit)) => match exit.code() {
                Some(EXIT_PASSED) => (TaskStatus::Completed, Some(EXIT_PASSED), None),
                Some(EXIT_FAILED) => (TaskStatus::Failed, Some(EXIT_FAILED), None),
                Some(code) => (
                    TaskStatus::Error,
                    Some(code),
                    Some(format!("worker exited with code {}", code)),
                ),
                None => (
                    TaskStatus::Error,
                    None,
                    Some(format!("worker terminated abnormally ({})", exit)),
                ),
            },
            Ending::Exited(Err(e)) => (
                TaskStatus::Error,
                None,
                Some(format!("lost track of worker: {}", e)),
            ),
        };

        let report = handle.update(|s| {
            s.exit_code = exit_code;
            if s.error.is_none() {
                s.error = error;
            }
            s.finish(status);
            matches!(s.status, TaskStatus::Completed | TaskStatus::Failed)
                .then(|| Report::from_snapshot(s))
        });

        if let Some(report) = report {
            match self.reports.save(&report) {
                Ok(path) => handle.update(|s| s.report_path = Some(path.display().to_string())),
                Err(e) => error!("Failed to save report for task {}: {}", id, e),
            }
        }

        info!("Task {} finished: {}", id, handle.status());
        self.registry.release(&id);
        handle.done_token().cancel();
    }

    /// SIGTERM, bounded wait, then SIGKILL. Returns the exit code if the
    /// worker exited on its own.
    async fn terminate(&self, id: &str, pgid: Option<u32>, child: &mut Child) -> Option<i32> {
        signal_group(id, pgid, Signal::SIGTERM);

        let grace = self.config.supervisor.stop_grace();
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(exit)) => exit.code(),
            Ok(Err(e)) => {
                warn!("Failed to reap worker of task {}: {}", id, e);
                None
            }
            Err(_) => {
                info!("Worker of task {} ignored SIGTERM, killing", id);
                kill_worker(id, pgid, child).await;
                None
            }
        }
    }
}

fn signal_group(id: &str, pgid: Option<u32>, signal: Signal) {
    let Some(pgid) = pgid else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pgid as i32), signal) {
        debug!("{:?} to worker group {} of task {} failed: {}", signal, pgid, id, e);
    }
}

/// SIGKILL the whole worker group, then reap the worker itself
async fn kill_worker(id: &str, pgid: Option<u32>, child: &mut Child) {
    signal_group(id, pgid, Signal::SIGKILL);
    if let Err(e) = child.kill().await {
        warn!("Failed to kill worker of task {}: {}", id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopguard_common::{StepStatus, TestMode};
    use tempfile::TempDir;

    fn supervisor(dir: &TempDir, script: &str) -> Supervisor {
        let mut config = DaemonConfig {
            data_dir: dir.path().to_path_buf(),
            ..DaemonConfig::default()
        };
        config.worker.program = "/bin/sh".to_string();
        config.worker.args = vec![
            "-c".to_string(),
            script.to_string(),
            "shopguard-worker".to_string(),
        ];
        config.supervisor.stop_grace_secs = 2;
        Supervisor::new(config)
    }

    fn single() -> TestRequest {
        TestRequest::new(
            TestScope::Product {
                product_id: "trail-bike".to_string(),
            },
            TestMode::Full,
        )
    }

    async fn wait_done(supervisor: &Supervisor, id: &str) -> TaskSnapshot {
        let handle = supervisor.registry.get(id).unwrap();
        tokio::time::timeout(Duration::from_secs(20), handle.done_token().cancelled())
            .await
            .unwrap();
        handle.snapshot()
    }

    #[tokio::test]
    async fn test_passing_worker_completes_and_saves_report() {
        let dir = TempDir::new().unwrap();
        let supervisor = supervisor(
            &dir,
            r#"
echo '[1/1] Testing product: Trail Bike'
echo 'Product ID: trail-bike'
echo '[Step 1] Page access'
echo '  ✓ Result: Page loaded (took 0.50s)'
echo 'Scenario finished: PASSED (took 0.50s)'
echo 'worker chatter' >&2
exit 0
"#,
        );

        let submitted = supervisor.submit(single()).unwrap();
        assert_eq!(submitted.status, TaskStatus::Running);

        let snapshot = wait_done(&supervisor, &submitted.task_id).await;
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.exit_code, Some(0));
        assert!(snapshot.completed_at.is_some());
        assert!(snapshot.logs.contains(&"[stderr] worker chatter".to_string()));
        assert_eq!(snapshot.product_results["trail-bike"].steps.len(), 1);

        let report = supervisor.reports().load(&submitted.task_id).unwrap();
        assert_eq!(report.summary.passed, 1);
        assert_eq!(report.summary.pass_rate, 1.0);
        assert!(snapshot.report_path.is_some());
        assert_eq!(supervisor.active(), None);
    }

    #[tokio::test]
    async fn test_failing_worker_is_failed() {
        let dir = TempDir::new().unwrap();
        let supervisor = supervisor(&dir, "echo '[Step 1] Page access'; echo '  ✗ Result: 404'; exit 1");
        let id = supervisor.submit(single()).unwrap().task_id;
        let snapshot = wait_done(&supervisor, &id).await;
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert_eq!(snapshot.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_crash_mid_step_keeps_partial_steps() {
        let dir = TempDir::new().unwrap();
        let supervisor = supervisor(
            &dir,
            r#"
echo '[1/1] Testing product: Trail Bike'
for k in 1 2 3 4 5 6; do
  echo "[Step $k] step $k"
  echo "  ✓ Result: ok (took 0.10s)"
done
echo '[Step 7] Variant selection'
echo '  Description: Switch between options'
exit 3
"#,
        );

        let id = supervisor.submit(single()).unwrap().task_id;
        let snapshot = wait_done(&supervisor, &id).await;
        assert_eq!(snapshot.status, TaskStatus::Error);
        assert_eq!(snapshot.exit_code, Some(3));
        assert!(snapshot.error.as_deref().unwrap().contains("code 3"));

        let steps = &snapshot.current_product.as_ref().unwrap().steps;
        assert_eq!(steps.len(), 7);
        assert!(steps[..6].iter().all(|s| s.status == StepStatus::Passed));
        assert_eq!(steps[6].status, StepStatus::Running);
        assert!(supervisor.reports().load(&id).is_err());
    }

    #[tokio::test]
    async fn test_second_submit_conflicts_then_stop_frees_slot() {
        let dir = TempDir::new().unwrap();
        let supervisor = supervisor(&dir, "echo '[Step 1] Page access'; sleep 30");
        let first = supervisor.submit(single()).unwrap().task_id;

        match supervisor.submit(single()) {
            Err(Error::Conflict { active_task_id }) => assert_eq!(active_task_id, first),
            other => panic!("expected conflict, got {:?}", other),
        }

        let stopped = supervisor.stop(&first).await.unwrap();
        assert!(stopped.stopped);
        assert_eq!(stopped.status, TaskStatus::Stopped);
        assert_eq!(supervisor.active(), None);

        let snapshot = supervisor.status(&first).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Stopped);
        assert!(supervisor.reports().load(&first).is_err());

        let second = supervisor.submit(single()).unwrap().task_id;
        assert_ne!(first, second);
        supervisor.stop(&second).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let supervisor = supervisor(&dir, "sleep 30");
        let id = supervisor.submit(single()).unwrap().task_id;

        supervisor.stop(&id).await.unwrap();
        let completed_at = supervisor.status(&id).unwrap().completed_at;

        let again = supervisor.stop(&id).await.unwrap();
        assert!(!again.stopped);
        assert_eq!(again.status, TaskStatus::Stopped);
        assert_eq!(supervisor.status(&id).unwrap().completed_at, completed_at);
    }

    #[tokio::test]
    async fn test_worker_ignoring_sigterm_is_killed() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = supervisor(&dir, "trap '' TERM; while true; do sleep 1; done");
        Arc::make_mut(&mut supervisor.config).supervisor.stop_grace_secs = 1;
        let id = supervisor.submit(single()).unwrap().task_id;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stopped = supervisor.stop(&id).await.unwrap();
        assert_eq!(stopped.status, TaskStatus::Stopped);
    }

    #[tokio::test]
    async fn test_timeout_kills_worker() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = supervisor(&dir, "echo '[Step 1] Page access'; sleep 30");
        Arc::make_mut(&mut supervisor.config).supervisor.single_timeout_secs = 1;
        let id = supervisor.submit(single()).unwrap().task_id;

        let snapshot = wait_done(&supervisor, &id).await;
        assert_eq!(snapshot.status, TaskStatus::Timeout);
        assert!(snapshot.error.as_deref().unwrap().contains("exceeded 1s"));
        assert_eq!(supervisor.active(), None);
    }

    /// Worker that leaves a background child behind, which writes `marker`
    /// unless it is killed first
    fn forking_script(marker: &std::path::Path) -> String {
        format!(
            "(sleep 2; echo survived > '{}') & echo '[Step 1] Page access'; sleep 30",
            marker.display()
        )
    }

    #[tokio::test]
    async fn test_timeout_kills_worker_process_group() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("grandchild");
        let mut supervisor = supervisor(&dir, &forking_script(&marker));
        Arc::make_mut(&mut supervisor.config).supervisor.single_timeout_secs = 1;
        let id = supervisor.submit(single()).unwrap().task_id;

        let snapshot = wait_done(&supervisor, &id).await;
        assert_eq!(snapshot.status, TaskStatus::Timeout);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_stop_signals_worker_process_group() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("grandchild");
        let supervisor = supervisor(&dir, &forking_script(&marker));
        let id = supervisor.submit(single()).unwrap().task_id;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stopped = supervisor.stop(&id).await.unwrap();
        assert_eq!(stopped.status, TaskStatus::Stopped);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_missing_worker_program_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = supervisor(&dir, "");
        Arc::make_mut(&mut supervisor.config).worker.program =
            dir.path().join("no-such-worker").display().to_string();

        assert!(matches!(
            supervisor.submit(single()),
            Err(Error::WorkerSpawn(_))
        ));
        assert_eq!(supervisor.active(), None);
        let tasks = supervisor.list();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Error);
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_before_spawn() {
        let dir = TempDir::new().unwrap();
        let supervisor = supervisor(&dir, "exit 0");
        let request = TestRequest::new(
            TestScope::Product {
                product_id: String::new(),
            },
            TestMode::Quick,
        );
        assert!(matches!(
            supervisor.submit(request),
            Err(Error::InvalidRequest(_))
        ));
        assert!(supervisor.list().is_empty());
    }
}
