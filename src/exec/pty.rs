//! Pseudo-terminal process controller.
//!
//! A spawned process gets its own session with the PTY as controlling
//! terminal, so its process id is also its process group id and a single
//! `killpg` reaches everything it forked.
//!
//! Three threads per process:
//! - reader: master side to a bounded tokio channel, in OS order
//! - waiter: reaps the child, then reaps stragglers holding the terminal
//! - writer: drains queued input so `write` never blocks the caller
//!
//! `Exited` is sent by the reader after end of stream, which makes it the
//! final event by construction.

use crate::config::types::{CommandLine, Result, SandboxError};
use crossbeam_channel::{bounded, unbounded, Sender as InputSender};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Pending output chunks before the reader thread applies backpressure
const EVENT_BUFFER: usize = 64;

const READ_CHUNK: usize = 4096;

/// How long descendants may keep the terminal open after the child exits
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Events emitted by a PTY process, `Exited` always last
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    Output(Vec<u8>),
    Exited { code: i32, elapsed: Duration },
}

/// Handle to a process attached to a pseudo-terminal
pub struct PtyProcess {
    pid: Option<u32>,
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    input: InputSender<Vec<u8>>,
    killed: AtomicBool,
    exited: Arc<AtomicBool>,
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("pid", &self.pid)
            .field("killed", &self.killed.load(Ordering::SeqCst))
            .field("exited", &self.exited.load(Ordering::SeqCst))
            .finish()
    }
}

fn terminal_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows: rows.max(1),
        cols: cols.max(1),
        pixel_width: 0,
        pixel_height: 0,
    }
}

impl PtyProcess {
    /// Start `cmd` in `cwd` with exactly `env` as its environment.
    pub fn spawn(
        cmd: &CommandLine,
        cwd: &Path,
        env: &BTreeMap<String, String>,
        cols: u16,
        rows: u16,
    ) -> Result<(Self, mpsc::Receiver<PtyEvent>)> {
        let pair = native_pty_system()
            .openpty(terminal_size(cols, rows))
            .map_err(|e| SandboxError::Spawn(format!("failed to open pty: {}", e)))?;

        let mut builder = CommandBuilder::new(&cmd.program);
        for arg in &cmd.args {
            builder.arg(arg);
        }
        builder.cwd(cwd);
        builder.env_clear();
        for (key, value) in env {
            builder.env(key, value);
        }

        let started = Instant::now();
        let mut child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| SandboxError::Spawn(format!("{}: {}", cmd.program.display(), e)))?;
        // Only the child may hold the slave side, or the reader never sees EOF.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();

        let reader = pair.master.try_clone_reader().map_err(|e| {
            let _ = child.kill();
            SandboxError::Spawn(format!("failed to clone pty reader: {}", e))
        })?;
        let writer = pair.master.take_writer().map_err(|e| {
            let _ = child.kill();
            SandboxError::Spawn(format!("failed to take pty writer: {}", e))
        })?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (exit_tx, exit_rx) = bounded::<(i32, Duration)>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let (input_tx, input_rx) = unbounded::<Vec<u8>>();
        let exited = Arc::new(AtomicBool::new(false));

        thread::Builder::new()
            .name("pty-reader".to_string())
            .spawn(move || {
                read_loop(reader, &event_tx);
                let _ = done_tx.send(());
                if let Ok((code, elapsed)) = exit_rx.recv() {
                    let _ = event_tx.blocking_send(PtyEvent::Exited { code, elapsed });
                }
            })?;

        let waiter_exited = Arc::clone(&exited);
        thread::Builder::new()
            .name("pty-waiter".to_string())
            .spawn(move || {
                let code = match child.wait() {
                    Ok(status) => status.exit_code() as i32,
                    Err(e) => {
                        log::warn!("Failed to wait for pty child: {}", e);
                        -1
                    }
                };
                let elapsed = started.elapsed();
                waiter_exited.store(true, Ordering::SeqCst);
                let _ = exit_tx.send((code, elapsed));

                if done_rx.recv_timeout(DRAIN_GRACE).is_err() {
                    if let Some(pid) = pid {
                        log::debug!("Reaping process group {} still holding the terminal", pid);
                        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
                    }
                }
            })?;

        thread::Builder::new()
            .name("pty-writer".to_string())
            .spawn(move || {
                let mut writer = writer;
                for bytes in input_rx {
                    if writer.write_all(&bytes).and_then(|_| writer.flush()).is_err() {
                        break;
                    }
                }
            })?;

        Ok((
            Self {
                pid,
                master: pair.master,
                killer,
                input: input_tx,
                killed: AtomicBool::new(false),
                exited,
            },
            event_rx,
        ))
    }

    /// Queue bytes for the terminal's input side.
    pub fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let _ = self.input.send(bytes.to_vec());
    }

    /// Best-effort live resize
    pub fn resize(&self, cols: u16, rows: u16) {
        if let Err(e) = self.master.resize(terminal_size(cols, rows)) {
            log::debug!("Ignoring failed pty resize: {}", e);
        }
    }

    /// SIGKILL the whole process group. Idempotent, no-op after exit.
    pub fn kill(&mut self) {
        if self.exited.load(Ordering::SeqCst) {
            return;
        }
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(pid) = self.pid {
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
        let _ = self.killer.kill();
    }

    /// Whether `kill` reached a live process
    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

fn read_loop(mut reader: Box<dyn Read + Send>, events: &mpsc::Sender<PtyEvent>) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            // EIO from the master once every slave fd is closed counts as EOF
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if events.blocking_send(PtyEvent::Output(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
        }
    }
}
