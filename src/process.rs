use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tokio::process::Child;
use tracing::{debug, warn};

/// Fallback window between a graceful signal and the forced kill.
const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Opaque handle to a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    /// SIGTERM where available, escalated to a forced kill after the grace
    /// window if the process is still registered.
    Graceful,
    Force,
}

#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub description: String,
    pub runtime: Duration,
}

struct TrackedEntry {
    description: String,
    started_at: Instant,
    kill_tx: flume::Sender<KillSignal>,
}

/// Owns every spawned extraction/decode process. Each tracked child gets a
/// reaper task that waits for natural exit, enforces the supervisory
/// timeout, and carries out kill requests. Every process ever tracked is
/// removed from the active set exactly once; removal disarms the timer, and
/// double-removal is a no-op.
pub struct ProcessSupervisor {
    active: DashMap<u64, TrackedEntry>,
    next_id: AtomicU64,
    grace: Duration,
}

/// Returned by [`ProcessSupervisor::track`]. Lets the spawner await the exit
/// status without owning the child.
pub struct SupervisedChild {
    pub id: ProcId,
    exit_rx: flume::Receiver<std::process::ExitStatus>,
}

impl SupervisedChild {
    /// Resolves when the process exits (naturally or killed). `None` if the
    /// entry was detached via [`ProcessSupervisor::remove`] before exit.
    pub async fn wait(&self) -> Option<std::process::ExitStatus> {
        self.exit_rx.recv_async().await.ok()
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::with_grace(GRACE_PERIOD)
    }

    pub fn with_grace(grace: Duration) -> Self {
        Self {
            active: DashMap::new(),
            next_id: AtomicU64::new(1),
            grace,
        }
    }

    /// Register a freshly spawned child. A `timeout` of zero disables the
    /// supervisory timer; otherwise the child is force-killed if it has not
    /// exited when the timer fires.
    pub fn track(
        self: &Arc<Self>,
        child: Child,
        description: impl Into<String>,
        timeout: Duration,
    ) -> SupervisedChild {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let description = description.into();
        let (kill_tx, kill_rx) = flume::bounded(4);
        let (exit_tx, exit_rx) = flume::bounded(1);

        self.active.insert(
            id,
            TrackedEntry {
                description: description.clone(),
                started_at: Instant::now(),
                kill_tx,
            },
        );

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            supervisor
                .supervise(id, child, description, timeout, kill_rx, exit_tx)
                .await;
        });

        SupervisedChild {
            id: ProcId(id),
            exit_rx,
        }
    }

    /// Send a kill request. Returns false if the process is no longer
    /// registered.
    pub fn kill(&self, id: ProcId, signal: KillSignal) -> bool {
        match self.active.get(&id.0) {
            Some(entry) => entry.kill_tx.send(signal).is_ok(),
            None => false,
        }
    }

    /// Deregister without killing. Idempotent; the reaper task detaches and
    /// the supervisory timer is disarmed.
    pub fn remove(&self, id: ProcId) {
        self.active.remove(&id.0);
    }

    pub fn is_tracked(&self, id: ProcId) -> bool {
        self.active.contains_key(&id.0)
    }

    /// Kill every tracked process. Called at shutdown.
    pub fn cleanup_all(&self, signal: KillSignal) {
        let count = self.active.len();
        if count > 0 {
            warn!("cleaning up {} tracked process(es)", count);
        }
        for entry in self.active.iter() {
            let _ = entry.kill_tx.send(signal);
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_processes(&self) -> Vec<ProcessInfo> {
        self.active
            .iter()
            .map(|entry| ProcessInfo {
                description: entry.description.clone(),
                runtime: entry.started_at.elapsed(),
            })
            .collect()
    }

    async fn supervise(
        &self,
        id: u64,
        mut child: Child,
        description: String,
        timeout: Duration,
        kill_rx: flume::Receiver<KillSignal>,
        exit_tx: flume::Sender<std::process::ExitStatus>,
    ) {
        let timer = async {
            if timeout.is_zero() {
                futures::future::pending::<()>().await;
            } else {
                tokio::time::sleep(timeout).await;
            }
        };
        tokio::pin!(timer);

        let status = loop {
            tokio::select! {
                status = child.wait() => break status.ok(),
                sig = kill_rx.recv_async() => match sig {
                    Ok(KillSignal::Force) => {
                        let _ = child.start_kill();
                        break child.wait().await.ok();
                    }
                    Ok(KillSignal::Graceful) => {
                        send_graceful(&mut child);
                        tokio::select! {
                            status = child.wait() => break status.ok(),
                            _ = tokio::time::sleep(self.grace) => {
                                warn!("{} ignored graceful signal, escalating", description);
                                let _ = child.start_kill();
                                break child.wait().await.ok();
                            }
                        }
                    }
                    // Entry dropped via remove(): detach without killing.
                    Err(_) => return,
                },
                _ = &mut timer => {
                    warn!("{} exceeded supervisory timeout, force-killing", description);
                    let _ = child.start_kill();
                    break child.wait().await.ok();
                }
            }
        };

        self.active.remove(&id);
        if let Some(status) = status {
            debug!("{} exited: {}", description, status);
            let _ = exit_tx.send(status);
        }
    }
}

#[cfg(unix)]
fn send_graceful(child: &mut Child) {
    match child.id() {
        Some(pid) => unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        },
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn send_graceful(child: &mut Child) {
    let _ = child.start_kill();
}
