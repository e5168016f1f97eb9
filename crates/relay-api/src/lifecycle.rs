//! ---
//! ra_section: "05-networking-external-interfaces"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Delayed, cancellable process termination for restarts."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use relay_common::LifecycleConfig;

/// Ends the process. The daemon shuts down gracefully and exits; tests record the call.
pub trait Terminator: Send + Sync {
    fn terminate(&self, exit_code: i32);
}

/// Owns the scheduled restart timer.
pub struct ProcessLifecycle {
    delay: Duration,
    exit_code: i32,
    terminator: Arc<dyn Terminator>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessLifecycle {
    pub fn new(config: &LifecycleConfig, terminator: Arc<dyn Terminator>) -> Self {
        Self {
            delay: config.restart_delay,
            exit_code: config.restart_exit_code,
            terminator,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Terminate after the configured delay. Returns `false` when a restart
    /// is already pending and nothing new was scheduled.
    pub fn schedule_restart(&self) -> bool {
        let mut pending = self.pending.lock();
        if pending.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        let delay = self.delay;
        let exit_code = self.exit_code;
        let terminator = self.terminator.clone();
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!(exit_code, "restart delay elapsed; terminating");
            terminator.terminate(exit_code);
        }));
        info!(delay_ms = delay.as_millis() as u64, "restart scheduled");
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Abort a pending restart. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        match self.pending.lock().take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                info!("pending restart cancelled");
                true
            }
            _ => false,
        }
    }
}

impl Drop for ProcessLifecycle {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().take() {
            handle.abort();
        }
    }
}
