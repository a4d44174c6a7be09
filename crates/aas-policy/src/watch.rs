// watch.rs - Filesystem-driven policy watch loop.
//
// The notify callback only pushes `WatchSignal::Changed` into a channel;
// one loop on the calling thread drains it, so evaluations are serialized
// without locks. Debounce: after the first signal, keep draining until the
// channel stays quiet for `debounce_ms`, then evaluate once. A burst of
// editor save events therefore costs a single evaluation.
//
// Phases: Initializing → Watching ⇄ Evaluating → Stopped.
//
// Shutdown is cooperative. `WatchControl::stop` sends `Shutdown`, the loop
// returns, and the notify watcher is dropped with it.

use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};

use notify::{Event, EventKind, RecursiveMode, Watcher};

use crate::config::WatchConfig;
use crate::error::PolicyError;
use crate::reconcile::{PolicyHandle, PolicyReconciler, WatchOutcome};
use crate::resolver::PolicyEffectiveResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Initializing,
    Watching,
    Evaluating,
    Stopped,
}

impl fmt::Display for WatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchPhase::Initializing => write!(f, "initializing"),
            WatchPhase::Watching => write!(f, "watching"),
            WatchPhase::Evaluating => write!(f, "evaluating"),
            WatchPhase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Messages consumed by the watch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchSignal {
    /// The policy file may have changed.
    Changed,
    Shutdown,
}

/// Cloneable remote control for a running watch loop.
#[derive(Debug, Clone)]
pub struct WatchControl {
    tx: Sender<WatchSignal>,
    phase: Arc<Mutex<WatchPhase>>,
}

impl WatchControl {
    /// Ask the loop to exit. Safe to call more than once.
    pub fn stop(&self) {
        let _ = self.tx.send(WatchSignal::Shutdown);
    }

    /// Mark the policy file dirty, as a filesystem event would.
    pub fn notify_changed(&self) {
        let _ = self.tx.send(WatchSignal::Changed);
    }

    pub fn phase(&self) -> WatchPhase {
        read_phase(&self.phase)
    }
}

/// Watches the policy file and feeds changes to a PolicyReconciler.
#[derive(Debug)]
pub struct PolicyWatchRunner {
    reconciler: PolicyReconciler,
    tx: Sender<WatchSignal>,
    rx: Receiver<WatchSignal>,
    phase: Arc<Mutex<WatchPhase>>,
}

impl PolicyWatchRunner {
    /// Resolve and persist the initial policy, ready to `run`.
    pub fn new(
        config: WatchConfig,
        resolver: PolicyEffectiveResolver,
    ) -> Result<(Self, WatchControl), PolicyError> {
        let phase = Arc::new(Mutex::new(WatchPhase::Initializing));
        let reconciler = PolicyReconciler::initialize(config, resolver)?;
        let (tx, rx) = mpsc::channel();
        let control = WatchControl {
            tx: tx.clone(),
            phase: Arc::clone(&phase),
        };
        Ok((
            Self {
                reconciler,
                tx,
                rx,
                phase,
            },
            control,
        ))
    }

    pub fn handle(&self) -> PolicyHandle {
        self.reconciler.handle()
    }

    pub fn init_line(&self) -> String {
        self.reconciler.init_line()
    }

    /// Run until `WatchControl::stop`. Each evaluation's outcome is passed
    /// to `on_outcome`.
    pub fn run<F>(self, mut on_outcome: F) -> Result<(), PolicyError>
    where
        F: FnMut(&WatchOutcome),
    {
        let config = self.reconciler.config().clone();
        let dir = match config.policy_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => Path::new(".").to_path_buf(),
        };
        let file_name: OsString = config
            .policy_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();

        let events = self.tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_policy_event(&event, &file_name) => {
                let _ = events.send(WatchSignal::Changed);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "file watcher error"),
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(
            path = %config.policy_path.display(),
            debounce_ms = config.debounce_ms,
            "watching policy file"
        );
        set_phase(&self.phase, WatchPhase::Watching);

        let debounce = config.debounce();
        'outer: loop {
            match self.rx.recv() {
                Ok(WatchSignal::Changed) => {}
                Ok(WatchSignal::Shutdown) | Err(_) => break,
            }
            loop {
                match self.rx.recv_timeout(debounce) {
                    Ok(WatchSignal::Changed) => continue,
                    Err(RecvTimeoutError::Timeout) => break,
                    Ok(WatchSignal::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                        break 'outer
                    }
                }
            }

            set_phase(&self.phase, WatchPhase::Evaluating);
            let outcome = self.reconciler.evaluate_change();
            on_outcome(&outcome);
            set_phase(&self.phase, WatchPhase::Watching);
        }

        drop(watcher);
        set_phase(&self.phase, WatchPhase::Stopped);
        tracing::info!("policy watch stopped");
        Ok(())
    }
}

fn is_policy_event(event: &Event, file_name: &OsString) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    relevant_kind
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

fn set_phase(cell: &Mutex<WatchPhase>, phase: WatchPhase) {
    match cell.lock() {
        Ok(mut guard) => *guard = phase,
        Err(poisoned) => *poisoned.into_inner() = phase,
    }
}

fn read_phase(cell: &Mutex<WatchPhase>) -> WatchPhase {
    match cell.lock() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}
