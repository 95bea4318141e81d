//! Descriptor-application monitor
//!
//! A composed gadget that contains FunctionFS functions must not be pulled
//! up until the userspace daemons behind them (adbd, the media stack) have
//! written their descriptors. The kernel materializes `ep1..epN` entries in
//! an ffs mount only after descriptors land on `ep0`, so endpoint entries
//! appearing is the "descriptors applied" condition.
//!
//! One session runs per apply sequence. A background task polls the linked
//! ffs mounts with exponential backoff, pulls the gadget up once every
//! function is ready, and signals completion. If the descriptor set later
//! disappears (the userspace process died), the task pulls the gadget back
//! down and re-arms, pulling up again once descriptors are rewritten.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::configfs::{write_file, PULLUP_NONE};
use crate::config::MonitorConfig;

/// Completion handler bound to one session
pub type AppliedCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Monitoring,
    Signaled,
}

/// A running watch over the ffs mounts of one gadget composition
pub struct MonitorSession {
    state_rx: watch::Receiver<MonitorState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MonitorSession {
    /// Start monitoring the given ffs mounts. Once all of them carry a
    /// populated descriptor set, the UDC name is written to `pullup_path`
    /// and the session signals applied.
    pub fn start(
        cfg: &MonitorConfig,
        ffs_dirs: Vec<PathBuf>,
        pullup_path: PathBuf,
        udc: String,
        on_applied: AppliedCallback,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(MonitorState::Monitoring);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let cfg = cfg.clone();

        let task = tokio::spawn(async move {
            watch_loop(cfg, ffs_dirs, pullup_path, udc, on_applied, state_tx, token).await;
        });

        Self {
            state_rx,
            cancel,
            task: Some(task),
        }
    }

    pub fn state(&self) -> MonitorState {
        if self.task.is_none() {
            MonitorState::Idle
        } else {
            *self.state_rx.borrow()
        }
    }

    /// Block (bounded) until the session has signaled applied.
    ///
    /// On expiry the session keeps running; stopping it is the next apply
    /// sequence's teardown responsibility.
    pub async fn wait_applied(&self, timeout: Duration) -> bool {
        let mut rx = self.state_rx.clone();
        if *rx.borrow() == MonitorState::Signaled {
            return true;
        }
        tokio::time::timeout(timeout, async move {
            while rx.changed().await.is_ok() {
                if *rx.borrow() == MonitorState::Signaled {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }

    /// Stop the watch task and return the session to `Idle`
    pub async fn reset(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Monitor task join failed: {}", e);
            }
        }
        debug!("Monitor session reset");
    }
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn watch_loop(
    cfg: MonitorConfig,
    ffs_dirs: Vec<PathBuf>,
    pullup_path: PathBuf,
    udc: String,
    on_applied: AppliedCallback,
    state_tx: watch::Sender<MonitorState>,
    cancel: CancellationToken,
) {
    let poll_start = Duration::from_millis(cfg.poll_start_ms);
    let poll_cap = Duration::from_millis(cfg.poll_cap_ms);
    let settle = Duration::from_millis(cfg.settle_ms);

    let mut delay = poll_start;
    let mut pulled_up = false;

    loop {
        let ready = ffs_dirs.iter().all(|d| descriptors_ready(d));

        if ready && !pulled_up {
            match write_file(&pullup_path, &udc) {
                Ok(()) => {
                    info!("Descriptors applied, gadget pulled up");
                    pulled_up = true;
                    let _ = state_tx.send(MonitorState::Signaled);
                    on_applied(true);
                    delay = settle;
                }
                Err(e) => {
                    warn!("Gadget cannot be pulled up: {}", e);
                }
            }
        } else if !ready && pulled_up {
            warn!("Descriptor set lost, pulling gadget down and re-arming");
            if let Err(e) = write_file(&pullup_path, PULLUP_NONE) {
                warn!("Gadget cannot be pulled down: {}", e);
            }
            pulled_up = false;
            let _ = state_tx.send(MonitorState::Monitoring);
            on_applied(false);
            delay = poll_start;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        if !pulled_up {
            delay = (delay * 2).min(poll_cap);
        }
    }
}

/// An ffs mount is ready once ep0 exists and the kernel has materialized at
/// least one data endpoint entry next to it.
fn descriptors_ready(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };

    let mut has_ep0 = false;
    let mut data_eps = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        match name.to_str() {
            Some("ep0") => has_ep0 = true,
            Some(n) if n.starts_with("ep") => data_eps += 1,
            _ => {}
        }
    }
    has_ep0 && data_eps >= 1
}
