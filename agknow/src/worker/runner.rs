use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::events::{TaskEvent, TaskOutcome, TaskOutput};
use super::progress::ProgressTracker;
use crate::commons::error::AgknowError;

/// A unit of background work.
///
/// `run` executes on the background thread. It reports through the context
/// and returns its output; it must never touch foreground state.
pub trait Task: Send + 'static {
    fn name(&self) -> &'static str;

    fn run(self: Box<Self>, ctx: &TaskContext) -> anyhow::Result<TaskOutput>;
}

/// Handle given to a running task for reporting and cancellation checks.
pub struct TaskContext {
    events: Sender<TaskEvent>,
    cancel: Arc<AtomicBool>,
}

impl TaskContext {
    pub fn status(&self, message: impl Into<String>) {
        // the foreground may already be gone; nothing to report to then
        let _ = self.events.send(TaskEvent::Status(message.into()));
    }

    pub fn progress(&self, percentage: u8) {
        let _ = self.events.send(TaskEvent::Progress(percentage.min(100)));
    }

    /// Advance a tracker and emit its percentage when it grew.
    pub fn advance(&self, tracker: &mut ProgressTracker) {
        if let Some(percentage) = tracker.advance() {
            self.progress(percentage);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Fail with [`AgknowError::Cancelled`] once cancellation was requested.
    pub fn check_cancelled(&self) -> Result<(), AgknowError> {
        if self.is_cancelled() {
            Err(AgknowError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// No background thread alive; a task may be started.
#[derive(Debug, Default)]
pub struct Idle;

/// Exactly one task running on its own thread.
pub struct Running {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
    events: Receiver<TaskEvent>,
    cancel: Arc<AtomicBool>,
    outcome: Option<TaskOutcome>,
}

/// Owner of at most one background task.
///
/// Only `TaskRunner<Idle>` can start a task, and the only way back to idle is
/// [`TaskRunner::finish`], which joins the background thread.
pub struct TaskRunner<S> {
    state: S,
}

impl Default for TaskRunner<Idle> {
    fn default() -> Self {
        TaskRunner::new()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("Task panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("Task panicked: {}", s)
    } else {
        "Task panicked".to_string()
    }
}

impl TaskRunner<Idle> {
    pub fn new() -> Self {
        TaskRunner { state: Idle }
    }

    /// Run `task` on a new background thread.
    pub fn start(self, task: Box<dyn Task>) -> TaskRunner<Running> {
        let (sender, receiver) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let name = task.name();
        let ctx = TaskContext {
            events: sender,
            cancel: cancel.clone(),
        };

        tracing::debug!(target: "agknow", "starting task {}", name);
        let handle = thread::Builder::new()
            .name(format!("agknow-{}", name))
            .spawn(move || {
                let terminal = match catch_unwind(AssertUnwindSafe(|| task.run(&ctx))) {
                    Ok(Ok(output)) => TaskEvent::Finished(output),
                    Ok(Err(e)) => {
                        tracing::warn!(target: "agknow", "task {} failed: {:#}", name, e);
                        TaskEvent::Error(format!("{:#}", e))
                    }
                    Err(payload) => {
                        let message = panic_message(payload);
                        tracing::error!(target: "agknow", "task {}: {}", name, message);
                        TaskEvent::Error(message)
                    }
                };
                let _ = ctx.events.send(terminal);
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                // no thread: deliver the failure through the same channel
                let (sender, receiver) = mpsc::channel();
                let _ = sender.send(TaskEvent::Error(format!("Failed to spawn task thread: {}", e)));
                return TaskRunner {
                    state: Running {
                        name,
                        handle: None,
                        events: receiver,
                        cancel,
                        outcome: None,
                    },
                };
            }
        };

        TaskRunner {
            state: Running {
                name,
                handle,
                events: receiver,
                cancel,
                outcome: None,
            },
        }
    }
}

impl TaskRunner<Running> {
    pub fn name(&self) -> &'static str {
        self.state.name
    }

    fn record(&mut self, event: &TaskEvent) {
        if self.state.outcome.is_none() {
            self.state.outcome = TaskOutcome::from_event(event);
        }
    }

    /// Drain every event available now, without blocking.
    pub fn poll(&mut self) -> Vec<TaskEvent> {
        let events: Vec<TaskEvent> = self.state.events.try_iter().collect();
        for event in &events {
            self.record(event);
        }
        events
    }

    /// Wait up to `timeout` for the next event.
    pub fn next_event(&mut self, timeout: Duration) -> Option<TaskEvent> {
        match self.state.events.recv_timeout(timeout) {
            Ok(event) => {
                self.record(&event);
                Some(event)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// `true` once the terminal event has been received.
    pub fn is_done(&self) -> bool {
        self.state.outcome.is_some()
    }

    /// Ask the task to stop at its next cancellation check.
    pub fn cancel(&self) {
        self.state.cancel.store(true, Ordering::SeqCst);
    }

    /// Join the background thread and return to idle with the terminal outcome.
    ///
    /// Blocks until the task has ended. Events not yet polled are discarded,
    /// except the terminal one.
    pub fn finish(mut self) -> (TaskRunner<Idle>, TaskOutcome) {
        if let Some(handle) = self.state.handle.take() {
            if handle.join().is_err() {
                tracing::error!(target: "agknow", "task {} thread panicked", self.state.name);
            }
        }
        while let Ok(event) = self.state.events.try_recv() {
            self.record(&event);
        }
        let outcome = self.state.outcome.take().unwrap_or_else(|| {
            TaskOutcome::Failed(format!("Task {} ended without a result", self.state.name))
        });
        tracing::debug!(target: "agknow", "task {} torn down", self.state.name);
        (TaskRunner::new(), outcome)
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.cancel.store(true, Ordering::SeqCst);
            let _ = handle.join();
        }
    }
}
