//! The worker supervisor
//!
//! Spawns one child process per configured worker slot, each invoked with
//! this executable and a worker role flag. Dead children have their
//! buffered output re-logged and are respawned with identical parameters.
//! On SIGINT/SIGTERM the supervisor stops respawning, sends SIGTERM to
//! every remaining child and reaps them; workers are expected to exit on
//! the signal, so nothing is force-killed.

use anyhow::{anyhow, Context, Result};
use espersist_core::config::Config;
use espersist_core::persist::PersisterKind;
use espersist_core::worker::Shutdown;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{error, info};

/// One configured worker: which queue it drains and with which persister
#[derive(Debug, Clone, PartialEq, Eq)]
struct WorkerSlot {
    qname: String,
    class: PersisterKind,
    index: usize,
    multi: bool,
}

/// Exit notice delivered by a child's monitor task
struct ChildExit {
    pid: u32,
    output: Option<std::process::Output>,
}

/// Expand the configured queues into worker slots, one per process
fn worker_slots(config: &Config) -> Vec<WorkerSlot> {
    let mut slots = Vec::new();
    for (qname, spec) in &config.persist_queues {
        for index in 1..=spec.workers {
            slots.push(WorkerSlot {
                qname: qname.clone(),
                class: spec.class,
                index,
                multi: spec.workers > 1,
            });
        }
    }
    slots.sort_by(|a, b| (&a.qname, a.index).cmp(&(&b.qname, b.index)));
    slots
}

/// Command-line arguments a worker child is spawned with
fn worker_args(slot: &WorkerSlot, config_file: &Path, debug: bool) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--role".into(),
        "worker".into(),
        "--queue".into(),
        slot.qname.clone().into(),
        "--config-file".into(),
        config_file.into(),
    ];
    if slot.multi {
        args.push("--number".into());
        args.push(slot.index.to_string().into());
    }
    if debug {
        args.push("--debug".into());
    }
    args
}

struct PersistManager {
    config_file: PathBuf,
    debug: bool,
    processes: HashMap<u32, WorkerSlot>,
    exit_tx: mpsc::UnboundedSender<ChildExit>,
}

impl PersistManager {
    fn start_child(&mut self, slot: WorkerSlot) -> Result<()> {
        let exe = std::env::current_exe().context("cannot locate own executable")?;
        let child = Command::new(exe)
            .args(worker_args(&slot, &self.config_file, self.debug))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn worker for queue '{}'", slot.qname))?;
        let pid = child
            .id()
            .ok_or_else(|| anyhow!("spawned worker has no pid"))?;

        info!(pid, queue = %slot.qname, index = slot.index, "started worker");
        self.processes.insert(pid, slot);

        let exit_tx = self.exit_tx.clone();
        tokio::spawn(async move {
            let output = child.wait_with_output().await.ok();
            let _ = exit_tx.send(ChildExit { pid, output });
        });

        Ok(())
    }

    fn log_child_output(pid: u32, output: &std::process::Output) {
        for line in String::from_utf8_lossy(&output.stdout)
            .lines()
            .chain(String::from_utf8_lossy(&output.stderr).lines())
        {
            error!(pid, "{line}");
        }
    }
}

async fn wait_for_shutdown(shutdown: &Shutdown) {
    while !shutdown.is_set() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Run the supervisor until signalled.
///
/// An unreachable relational store at startup is fatal; the process exits
/// non-zero.
pub async fn run(config: &Config, config_file: &Path, debug: bool) -> Result<()> {
    espersist_core::sql::setup_db(&config.db_uri)
        .await
        .context("Problem setting up database")?;

    let shutdown = Shutdown::install()?;
    let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
    let mut manager = PersistManager {
        config_file: config_file.to_path_buf(),
        debug,
        processes: HashMap::new(),
        exit_tx,
    };

    info!("starting");
    for slot in worker_slots(config) {
        manager.start_child(slot)?;
    }

    loop {
        tokio::select! {
            exit = exit_rx.recv() => {
                let Some(exit) = exit else { break };
                let Some(slot) = manager.processes.remove(&exit.pid) else {
                    continue;
                };

                error!(
                    pid = exit.pid,
                    queue = %slot.qname,
                    index = slot.index,
                    "child died"
                );
                if let Some(output) = &exit.output {
                    PersistManager::log_child_output(exit.pid, output);
                }

                manager.start_child(slot)?;
            }
            _ = wait_for_shutdown(&shutdown) => break,
        }
    }

    // shutdown phase: signal every remaining child and reap it
    for (pid, slot) in &manager.processes {
        info!(pid, queue = %slot.qname, index = slot.index, "killing worker");
        if let Err(e) = kill(Pid::from_raw(*pid as i32), Signal::SIGTERM) {
            error!(pid, error = %e, "failed to signal worker");
        }
    }
    while !manager.processes.is_empty() {
        match exit_rx.recv().await {
            Some(exit) => {
                if manager.processes.remove(&exit.pid).is_some() {
                    info!(pid = exit.pid, "worker exited");
                }
            }
            None => break,
        }
    }

    info!("exiting");
    Ok(())
}
