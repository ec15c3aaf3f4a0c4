//! Wall-clock watchdog.
//!
//! A helper thread sleeps on a shutdown channel for the real-time budget and
//! sends SIGKILL to the child and its process group if the budget runs out
//! first. The launcher
//! disarms it only after observing termination with `WNOWAIT`, so the pid
//! still names a zombie and cannot have been reused when the kill lands.

use crossbeam_channel::{RecvTimeoutError, Sender};
use log::{debug, info};
use crate::kernel::process_group::kill_tree;
use nix::unistd::Pid;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug)]
struct WatchState {
    armed: Mutex<bool>,
    fired: AtomicBool,
}

/// Kills `pid` and its group once `limit` elapses unless disarmed first.
#[derive(Debug)]
pub struct Watchdog {
    state: Arc<WatchState>,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Start watching. Fails only if the helper thread cannot be created.
    pub fn spawn(pid: Pid, limit: Duration) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let state = Arc::new(WatchState {
            armed: Mutex::new(true),
            fired: AtomicBool::new(false),
        });
        let thread_state = Arc::clone(&state);

        let handle = thread::Builder::new()
            .name(format!("judgebox-watchdog-{pid}"))
            .spawn(move || match shutdown_rx.recv_timeout(limit) {
                Err(RecvTimeoutError::Timeout) => {
                    let armed = match thread_state.armed.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    if *armed {
                        info!("Real time limit of {}ms reached, killing {}", limit.as_millis(), pid);
                        if kill_tree(pid) {
                            thread_state.fired.store(true, Ordering::Release);
                        }
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    debug!("Watchdog for {} disarmed", pid);
                }
            })?;

        Ok(Self {
            state,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stop the timer and wait for the helper thread. Returns whether the
    /// watchdog killed the child.
    pub fn disarm(mut self) -> bool {
        self.stop();
        self.state.fired.load(Ordering::Acquire)
    }

    fn stop(&mut self) {
        match self.state.armed.lock() {
            Ok(mut armed) => *armed = false,
            Err(poisoned) => *poisoned.into_inner() = false,
        }
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
