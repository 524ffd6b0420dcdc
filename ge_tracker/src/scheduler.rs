//! Periodic background refresh, independent of caller traffic

use crate::refresh::RefreshOrchestrator;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct Running {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Fires a forced refresh immediately on start and then on every interval
///
/// After a failure before any successful refresh the next tick comes after the
/// shorter cold-recovery delay. A failing tick never stops the schedule.
pub struct AutoRefreshScheduler {
    orchestrator: RefreshOrchestrator,
    running: Mutex<Option<Running>>,
}

impl AutoRefreshScheduler {
    pub fn new(orchestrator: RefreshOrchestrator) -> Self {
        Self {
            orchestrator,
            running: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start ticking. Returns `false` (and does nothing) if already running.
    pub fn start(&self) -> bool {
        let mut running = self.lock();
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            log::warn!("Auto refresh already running");
            return false;
        }

        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_schedule(self.orchestrator.clone(), stop_rx));
        *running = Some(Running { stop, task });

        log::info!(
            "Auto refresh started (every {}s)",
            self.orchestrator.interval().as_secs()
        );
        true
    }

    /// Prevent future ticks. A refresh that is already running completes.
    ///
    /// Returns `false` (and does nothing) if not running.
    pub fn stop(&self) -> bool {
        match self.lock().take() {
            Some(running) => {
                let _ = running.stop.send(true);
                log::info!("Auto refresh stopped");
                true
            }
            None => {
                log::warn!("Auto refresh is not running");
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }
}

impl Drop for AutoRefreshScheduler {
    fn drop(&mut self) {
        if let Some(running) = self.lock().take() {
            let _ = running.stop.send(true);
        }
    }
}

async fn run_schedule(orchestrator: RefreshOrchestrator, mut stop: watch::Receiver<bool>) {
    loop {
        if *stop.borrow() {
            break;
        }

        log::debug!("Scheduled refresh triggered");
        orchestrator.refresh(true).await;

        let delay = orchestrator.next_attempt_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.wait_for(|stopped| *stopped) => break,
        }
    }
    log::debug!("Auto refresh loop exited");
}
