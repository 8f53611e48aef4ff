//! Ordered, single-consumer task queue
//!
//! Callers (local or across RPC connections) enqueue units of work and
//! receive a monotonically increasing task id. A single drain loop pops
//! work strictly FIFO, so commands with ordering dependencies ("load
//! model" before "run simulation") execute in submission order. Task
//! records are kept for the node's lifetime: a task transitions
//! QUEUED -> {SUCCESS, ERROR} exactly once, and its terminal fields are
//! never mutated afterwards, so readers that observe a terminal status
//! need no further synchronization.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::executor::CommandOutcome;

// ─────────────────────────────────────────────────────────────────
// Task Status
// ─────────────────────────────────────────────────────────────────

/// Lifecycle state of a task, as visible over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Waiting for the drain loop
    Queued,
    /// Finished; result is readable
    Success,
    /// Failed or skipped; error may be readable
    Error,
    /// The id was never assigned
    DoesNotExist,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Error => "ERROR",
            TaskStatus::DoesNotExist => "DOES_NOT_EXIST",
        }
    }

    /// Terminal states never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Error)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(TaskStatus::Queued),
            "SUCCESS" => Ok(TaskStatus::Success),
            "ERROR" => Ok(TaskStatus::Error),
            "DOES_NOT_EXIST" => Ok(TaskStatus::DoesNotExist),
            other => Err(format!("Unknown task status '{other}'")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Work Units
// ─────────────────────────────────────────────────────────────────

/// A unit of work: either a command string that arrived over RPC, or a
/// pre-bound callable enqueued in-process by the owning host
pub enum Work {
    Command(String),
    Call(Box<dyn FnOnce() -> CommandOutcome + Send>),
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Work::Command(cmd) => f.debug_tuple("Command").field(cmd).finish(),
            Work::Call(_) => f.debug_tuple("Call").field(&"<closure>").finish(),
        }
    }
}

/// A popped queue entry, owned by the drain loop until completion
#[derive(Debug)]
pub struct QueuedTask {
    pub id: u64,
    pub work: Work,
}

// ─────────────────────────────────────────────────────────────────
// Task Queue
// ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct TaskRecord {
    status: TaskStatus,
    result: Option<Value>,
    error: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    fifo: VecDeque<QueuedTask>,
    records: HashMap<u64, TaskRecord>,
}

/// Thread-safe FIFO of pending work plus the task record table.
///
/// Id allocation, enqueue and dequeue share one mutex; status/result/error
/// reads take the same mutex briefly but copy out, never holding it across
/// execution.
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<Inner>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a command string; returns the task id immediately
    pub fn enqueue_command(&self, command: impl Into<String>) -> u64 {
        self.enqueue(Work::Command(command.into()))
    }

    /// Enqueue a pre-bound callable; returns the task id immediately
    pub fn enqueue_call<F>(&self, call: F) -> u64
    where
        F: FnOnce() -> CommandOutcome + Send + 'static,
    {
        self.enqueue(Work::Call(Box::new(call)))
    }

    fn enqueue(&self, work: Work) -> u64 {
        let mut inner = self.inner.lock();

        let id = inner.next_id;
        inner.next_id += 1;

        inner.records.insert(
            id,
            TaskRecord {
                status: TaskStatus::Queued,
                result: None,
                error: None,
            },
        );
        inner.fifo.push_back(QueuedTask { id, work });

        id
    }

    /// Pop the next task in FIFO order (drain loop only)
    pub(crate) fn pop(&self) -> Option<QueuedTask> {
        self.inner.lock().fifo.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().fifo.is_empty()
    }

    /// Status lookup; unknown ids report DOES_NOT_EXIST rather than failing
    pub fn status(&self, id: u64) -> TaskStatus {
        self.inner
            .lock()
            .records
            .get(&id)
            .map(|r| r.status)
            .unwrap_or(TaskStatus::DoesNotExist)
    }

    /// Stored result; None until the task is terminal (or if it errored)
    pub fn result(&self, id: u64) -> Option<Value> {
        self.inner
            .lock()
            .records
            .get(&id)
            .and_then(|r| r.result.clone())
    }

    /// Stored error trace; None unless the task failed with a trace
    pub fn error(&self, id: u64) -> Option<String> {
        self.inner
            .lock()
            .records
            .get(&id)
            .and_then(|r| r.error.clone())
    }

    /// Record a successful outcome. Ignored (with a warning) if the task
    /// already reached a terminal state: terminal fields are write-once.
    pub(crate) fn complete_success(&self, id: u64, result: Value) {
        self.transition(id, TaskStatus::Success, Some(result), None);
    }

    /// Record a failure with its trace
    pub(crate) fn complete_error(&self, id: u64, trace: Option<String>) {
        self.transition(id, TaskStatus::Error, None, trace);
    }

    fn transition(&self, id: u64, status: TaskStatus, result: Option<Value>, error: Option<String>) {
        let mut inner = self.inner.lock();
        match inner.records.get_mut(&id) {
            Some(record) if record.status == TaskStatus::Queued => {
                record.status = status;
                record.result = result;
                record.error = error;
            }
            Some(record) => {
                warn!(
                    task_id = id,
                    status = %record.status,
                    "Ignoring duplicate terminal transition"
                );
            }
            None => {
                warn!(task_id = id, "Terminal transition for unknown task");
            }
        }
    }

    /// Drop all pending work and records (queue teardown on node stop)
    pub(crate) fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.fifo.clear();
        inner.records.clear();
        inner.next_id = 0;
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
