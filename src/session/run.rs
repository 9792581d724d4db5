//! One execution attempt: build, launch in a PTY, forward output, report exit.
//!
//! The run's task owns everything it sends, so `exit` is always the last
//! message a run produces. Cancellation (kill, supersede, disconnect) goes
//! through [`RunControl`] and is observed by the task, never short-circuited
//! around it.

use crate::config::types::Language;
use crate::exec::pty::{PtyEvent, PtyProcess};
use crate::judge::adapter::{BuildPlan, LanguageAdapter};
use crate::judge::dispatch::{self, BuildOutcome};
use crate::observability::metrics::{get_metrics, RunOutcome};
use crate::safety::workspace::Workspace;
use crate::server::ServiceContext;
use crate::session::protocol::{RunStatus, ServerMessage};
use crate::utils::output::TerminalDecoder;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared between the session (which cancels) and the run task (which attaches the process)
#[derive(Debug, Default)]
pub struct RunControl {
    cancel: CancellationToken,
    process: Mutex<Option<PtyProcess>>,
}

impl RunControl {
    fn slot(&self) -> MutexGuard<'_, Option<PtyProcess>> {
        self.process.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel the run and kill its process group if one is attached.
    pub fn kill(&self) {
        self.cancel.cancel();
        if let Some(process) = self.slot().as_mut() {
            process.kill();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn write(&self, bytes: &[u8]) {
        if let Some(process) = self.slot().as_ref() {
            process.write(bytes);
        }
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        if let Some(process) = self.slot().as_ref() {
            process.resize(cols, rows);
        }
    }

    /// A cancelled run never reports a code, even when the process got to
    /// exit on its own before the signal landed.
    fn reported_code(&self, code: Option<i32>) -> Option<i32> {
        if self.is_cancelled() {
            None
        } else {
            code
        }
    }

    /// Attach a freshly spawned process, killing it at once if the run was
    /// cancelled while it was starting.
    fn attach(&self, process: PtyProcess) {
        let mut slot = self.slot();
        *slot = Some(process);
        if self.cancel.is_cancelled() {
            if let Some(process) = slot.as_mut() {
                process.kill();
            }
        }
    }
}

/// Records exactly one outcome per started run, even if the task is aborted.
struct OutcomeRecorder {
    recorded: bool,
}

impl OutcomeRecorder {
    fn new(language: Language) -> Self {
        get_metrics().record_run_started(language);
        Self { recorded: false }
    }

    fn finish(&mut self, outcome: RunOutcome, elapsed: Option<Duration>) {
        if !self.recorded {
            self.recorded = true;
            get_metrics().record_run_finished(outcome, elapsed);
        }
    }
}

impl Drop for OutcomeRecorder {
    fn drop(&mut self) {
        self.finish(RunOutcome::Killed, None);
    }
}

/// Everything the run task needs, moved into it at start
struct RunTask {
    ctx: Arc<ServiceContext>,
    run_id: String,
    session_id: String,
    language: Language,
    adapter: &'static dyn LanguageAdapter,
    plan: BuildPlan,
    cols: u16,
    rows: u16,
    control: Arc<RunControl>,
    outbound: mpsc::Sender<ServerMessage>,
}

/// The live run of a session
#[derive(Debug)]
pub struct ActiveRun {
    id: String,
    started_at: DateTime<Utc>,
    workspace: Workspace,
    control: Arc<RunControl>,
    task: Option<JoinHandle<()>>,
}

impl ActiveRun {
    /// Start the run task. The workspace already holds the materialized source.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        ctx: Arc<ServiceContext>,
        session_id: &str,
        language: Language,
        adapter: &'static dyn LanguageAdapter,
        workspace: Workspace,
        plan: BuildPlan,
        cols: u16,
        rows: u16,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Self {
        let id = workspace.run_id().to_string();
        let control = Arc::new(RunControl::default());

        log::info!(
            "[session {}] run {} started ({}, {}x{})",
            session_id,
            id,
            language,
            cols,
            rows
        );

        let task = RunTask {
            ctx,
            run_id: id.clone(),
            session_id: session_id.to_string(),
            language,
            adapter,
            plan,
            cols,
            rows,
            control: Arc::clone(&control),
            outbound,
        };

        Self {
            id,
            started_at: Utc::now(),
            workspace,
            control,
            task: Some(tokio::spawn(task.drive())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Still compiling or running (its `exit` has not been produced yet)
    pub fn is_live(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    pub fn write(&self, bytes: &[u8]) {
        self.control.write(bytes);
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        self.control.resize(cols, rows);
    }

    /// Kill the process, wait (bounded) for the task to report its exit, then
    /// remove the scratch directory. Never fails.
    pub async fn shutdown(mut self, grace: Duration) {
        self.control.kill();

        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(grace, task).await.is_err() {
                log::warn!(
                    "Run {} did not finish within {} ms of kill, aborting its task",
                    self.id,
                    grace.as_millis()
                );
                abort.abort();
            }
        }

        let removed = self.workspace.cleanup();
        get_metrics().record_cleanup(removed);
        log::debug!("Run {} released (ran for {})", self.id, Utc::now() - self.started_at);
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.control.kill();
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    elapsed.as_millis().min(u64::MAX as u128) as u64
}

impl RunTask {
    async fn send(&self, message: ServerMessage) {
        // A closed outbound channel means the connection is going away;
        // the run still drains so its process and threads are reaped.
        let _ = self.outbound.send(message).await;
    }

    async fn drive(self) {
        let mut recorder = OutcomeRecorder::new(self.language);
        let started = Instant::now();
        let tools = &self.ctx.capabilities;
        let env = self
            .ctx
            .env_policy
            .child_environment(&self.plan.run_dir, tools);

        if dispatch::needs_compile(self.adapter, tools, &self.plan) {
            self.send(ServerMessage::Status {
                status: RunStatus::Compiling,
            })
            .await;
        }

        let built = tokio::select! {
            biased;
            _ = self.control.cancel.cancelled() => None,
            result = dispatch::build(
                self.adapter,
                tools,
                &self.plan,
                &env,
                self.ctx.config.compile_timeout(),
            ) => Some(result),
        };

        let command = match built {
            None => {
                log::info!(
                    "[session {}] run {} killed during compile",
                    self.session_id,
                    self.run_id
                );
                self.send(ServerMessage::Exit {
                    code: None,
                    time_ms: elapsed_ms(started.elapsed()),
                })
                .await;
                recorder.finish(RunOutcome::Killed, None);
                return;
            }
            Some(Ok(BuildOutcome::Ready(command))) => command,
            Some(Ok(BuildOutcome::Rejected {
                diagnostics,
                elapsed,
            })) => {
                log::info!(
                    "[session {}] run {} rejected by the compiler",
                    self.session_id,
                    self.run_id
                );
                get_metrics().compile_duration.observe(elapsed);
                self.send(ServerMessage::Stderr { data: diagnostics }).await;
                self.send(ServerMessage::Exit {
                    code: Some(1),
                    time_ms: elapsed_ms(elapsed),
                })
                .await;
                recorder.finish(RunOutcome::CompileRejected, None);
                return;
            }
            Some(Err(e)) => {
                log::warn!(
                    "[session {}] run {} failed to build: {}",
                    self.session_id,
                    self.run_id,
                    e
                );
                self.send(ServerMessage::error(e.to_string())).await;
                recorder.finish(RunOutcome::CompileRejected, None);
                return;
            }
        };

        if self.control.is_cancelled() {
            self.send(ServerMessage::Exit {
                code: None,
                time_ms: elapsed_ms(started.elapsed()),
            })
            .await;
            recorder.finish(RunOutcome::Killed, None);
            return;
        }

        let spawned = PtyProcess::spawn(&command, &self.plan.run_dir, &env, self.cols, self.rows);
        let mut events = match spawned {
            Ok((process, events)) => {
                self.control.attach(process);
                events
            }
            Err(e) => {
                log::warn!(
                    "[session {}] run {} failed to spawn: {}",
                    self.session_id,
                    self.run_id,
                    e
                );
                self.send(ServerMessage::error(e.to_string())).await;
                recorder.finish(RunOutcome::SpawnFailed, None);
                return;
            }
        };

        self.send(ServerMessage::Status {
            status: RunStatus::Started,
        })
        .await;

        let mut decoder = TerminalDecoder::new();
        let mut exit = None;
        while let Some(event) = events.recv().await {
            match event {
                PtyEvent::Output(bytes) => {
                    if let Some(data) = decoder.push(&bytes) {
                        self.send(ServerMessage::Stdout { data }).await;
                    }
                }
                PtyEvent::Exited { code, elapsed } => {
                    exit = Some((code, elapsed));
                    break;
                }
            }
        }
        if let Some(data) = decoder.finish() {
            self.send(ServerMessage::Stdout { data }).await;
        }

        let (code, elapsed) = match exit {
            Some((code, elapsed)) => (Some(code), elapsed),
            None => (None, started.elapsed()),
        };
        let killed = self.control.is_cancelled();
        let code = self.control.reported_code(code);

        log::info!(
            "[session {}] run {} {} after {} ms",
            self.session_id,
            self.run_id,
            match code {
                Some(code) => format!("exited with {}", code),
                None => "was killed".to_string(),
            },
            elapsed_ms(elapsed)
        );
        self.send(ServerMessage::Exit {
            code,
            time_ms: elapsed_ms(elapsed),
        })
        .await;

        let outcome = if killed {
            RunOutcome::Killed
        } else {
            RunOutcome::Exited
        };
        recorder.finish(outcome, Some(elapsed));
    }
}
