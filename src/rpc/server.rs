//! RPC server: accept loop, request dispatch, and the queue drain loop
//!
//! A serving node runs two long-lived tasks. The accept loop takes
//! inbound connections and services each on its own task, so a status
//! poll is answered while a command is still executing. The drain loop is
//! the queue's single consumer: it pops work strictly FIFO and brings
//! every task to a terminal state before touching the next.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::executor::{CommandExecutor, CommandOutcome};
use crate::node::PeerLink;
use crate::queue::{TaskQueue, TaskStatus, Work};
use crate::rpc::protocol::{self, Request, Response};

// ─────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────

/// Shared state behind every inbound call
pub(crate) struct Dispatcher {
    pub queue: Arc<TaskQueue>,
    pub link: Arc<PeerLink>,
    /// Signals the accept loop (and open connections) to wind down
    pub stop_tx: watch::Sender<bool>,
    /// Poll interval for the synchronous `run_command` wrapper
    pub poll_interval: Duration,
}

impl Dispatcher {
    /// Handle one request. Failures are logged with their trace and
    /// returned to the caller, never swallowed at the transport boundary.
    pub async fn dispatch(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::ok(json!(1)),
            // The connection handler signals shutdown after the reply
            // has been written, so the caller always gets its response.
            Request::Stop => Response::ok(Value::Null),
            Request::TrySetupClient { warn } => {
                self.link.try_setup_client(warn).await;
                Response::ok(Value::Null)
            }
            Request::RunCommand { command } => self.run_command(command).await,
            Request::EnqueueCommand { command } => {
                let task_id = self.queue.enqueue_command(command);
                Response::ok(json!(task_id))
            }
            Request::GetTaskStatus { task_id } => {
                Response::ok(json!(self.queue.status(task_id).as_str()))
            }
            Request::GetTaskError { task_id } => {
                Response::ok(self.queue.error(task_id).map(Value::from).unwrap_or(Value::Null))
            }
            Request::GetTaskResult { task_id } => {
                Response::ok(self.queue.result(task_id).unwrap_or(Value::Null))
            }
        }
    }

    /// The synchronous surface rides the same queue as the asynchronous
    /// one, so both calling conventions observe a single global order.
    /// Blocks only the calling connection's task; polls with no deadline.
    async fn run_command(&self, command: String) -> Response {
        let task_id = self.queue.enqueue_command(command);

        loop {
            match self.queue.status(task_id) {
                TaskStatus::Queued => tokio::time::sleep(self.poll_interval).await,
                TaskStatus::Success => {
                    return Response::ok(self.queue.result(task_id).unwrap_or(Value::Null));
                }
                TaskStatus::Error => {
                    let trace = self
                        .queue
                        .error(task_id)
                        .unwrap_or_else(|| "Command failed without a trace".to_string());
                    error!(task_id, "run_command failed:\n{trace}");
                    return Response::err(trace);
                }
                TaskStatus::DoesNotExist => {
                    // The queue was torn down underneath us (node stop)
                    return Response::err("Task queue was torn down before the command finished");
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Accept loop
// ─────────────────────────────────────────────────────────────────

/// Bound server plus its accept-loop task
pub(crate) struct ServerParts {
    pub addr: SocketAddr,
    pub accept_task: JoinHandle<()>,
}

/// Bind and start serving. Port 0 auto-assigns a free port; the actual
/// bound address is returned.
pub(crate) async fn start(bind: SocketAddr, dispatcher: Arc<Dispatcher>) -> Result<ServerParts> {
    let listener = TcpListener::bind(bind).await?;
    let addr = listener.local_addr()?;

    let stop_rx = dispatcher.stop_tx.subscribe();
    let accept_task = tokio::spawn(accept_loop(listener, dispatcher, stop_rx));

    Ok(ServerParts { addr, accept_task })
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    debug!(peer_addr = %peer_addr, "Inbound RPC connection");
                    let dispatcher = Arc::clone(&dispatcher);
                    tokio::spawn(handle_connection(stream, dispatcher, stop_rx.clone()));
                }
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
    debug!("Accept loop exited");
}

/// Service one connection: read a request frame, dispatch, write the
/// response, repeat until the peer hangs up or the server stops
async fn handle_connection(
    mut stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        if *stop_rx.borrow() {
            break;
        }

        let request: Request = tokio::select! {
            _ = stop_rx.changed() => break,
            read = protocol::read_frame(&mut stream) => match read {
                Ok(request) => request,
                // Normal hangup after the peer's call completed
                Err(e) => {
                    debug!(error = %e, "Connection closed");
                    break;
                }
            }
        };

        let method = request.method();
        let is_stop = matches!(request, Request::Stop);
        let response = dispatcher.dispatch(request).await;

        if let Err(e) = protocol::write_frame(&mut stream, &response).await {
            warn!(method, error = %e, "Failed to write RPC response");
            break;
        }

        if is_stop {
            // Reply is flushed; now wind down the accept loop
            let _ = dispatcher.stop_tx.send(true);
            break;
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Drain loop
// ─────────────────────────────────────────────────────────────────

/// Spawn the queue's single consumer
pub(crate) fn spawn_drain_loop(
    queue: Arc<TaskQueue>,
    executor: Arc<dyn CommandExecutor>,
    idle: Duration,
    exit_on_shutdown: bool,
    mut stop_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if *stop_rx.borrow() {
                break;
            }

            if queue.is_empty() {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(idle) => {}
                }
            } else {
                drain_pass(&queue, executor.as_ref(), exit_on_shutdown).await;
            }
        }
        debug!("Drain loop exited");
    })
}

/// Execute everything currently queued, strictly FIFO.
///
/// Fail-fast: after the first failure in a pass, the remaining tasks of
/// the same pass are marked ERROR without executing, so a dependent chain
/// never sees partial, order-violating side effects. The poison flag is
/// scoped to the pass; a batch enqueued after the queue empties starts
/// clean.
pub(crate) async fn drain_pass(
    queue: &TaskQueue,
    executor: &dyn CommandExecutor,
    exit_on_shutdown: bool,
) {
    let mut poisoned = false;

    while let Some(task) = queue.pop() {
        if poisoned {
            queue.complete_error(
                task.id,
                Some("Skipped: an earlier task in the same batch failed".to_string()),
            );
            continue;
        }

        let outcome = match task.work {
            Work::Command(command) => executor.execute(&command).await,
            Work::Call(call) => call(),
        };

        match outcome {
            CommandOutcome::Success(value) => {
                queue.complete_success(task.id, value);
            }
            CommandOutcome::Failure(trace) => {
                poisoned = true;
                queue.complete_error(task.id, Some(trace));
            }
            CommandOutcome::ShutdownRequested => {
                // Not an error: the task reads as SUCCESS with a null
                // result so the submitting caller is not shown a spurious
                // failure while the process exits.
                poisoned = true;
                queue.complete_success(task.id, Value::Null);
                schedule_process_exit(exit_on_shutdown);
            }
        }
    }
}

/// Defer self-termination so pending RPC responses can be flushed first
fn schedule_process_exit(exit_on_shutdown: bool) {
    if exit_on_shutdown {
        info!("Intentional shutdown requested; process exits in 500ms");
        tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            std::process::exit(0);
        });
    } else {
        info!("Intentional shutdown requested (process exit disabled)");
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ScriptExecutor;
    use crate::queue::TaskQueue;
    use crate::role::Role;
    use serde_json::json;

    fn test_executor() -> ScriptExecutor {
        ScriptExecutor::new(Role::Neuron, "")
    }

    #[tokio::test]
    async fn test_drain_executes_in_enqueue_order() {
        let queue = TaskQueue::new();
        let executor = test_executor();

        queue.enqueue_command("n = 0");
        queue.enqueue_command("n = n + 1");
        queue.enqueue_command("n = n * 10");
        let last = queue.enqueue_command("return_value = n");

        drain_pass(&queue, &executor, false).await;

        // (0 + 1) * 10, not any other interleaving
        assert_eq!(queue.result(last), Some(json!(10)));
    }

    #[tokio::test]
    async fn test_fail_fast_poisons_rest_of_pass() {
        let queue = TaskQueue::new();
        let executor = test_executor();

        let t1 = queue.enqueue_command("a = 1");
        let t2 = queue.enqueue_command("b = 0");
        let t3 = queue.enqueue_command("c = a/b");
        let t4 = queue.enqueue_command("d = 'never'");

        drain_pass(&queue, &executor, false).await;

        assert_eq!(queue.status(t1), TaskStatus::Success);
        assert_eq!(queue.status(t2), TaskStatus::Success);
        assert_eq!(queue.status(t3), TaskStatus::Error);
        assert_eq!(queue.status(t4), TaskStatus::Error);

        assert!(queue.error(t3).unwrap().contains("division by zero"));
        assert!(queue.error(t4).unwrap().contains("Skipped"));

        // The poisoned task must not have run
        match executor.execute("return_value = d").await {
            CommandOutcome::Failure(trace) => assert!(trace.contains("undefined variable 'd'")),
            other => panic!("Expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_overflowing_command_records_error() {
        let queue = TaskQueue::new();
        let executor = test_executor();

        let id = queue.enqueue_command("x = 9223372036854775807 + 1");
        drain_pass(&queue, &executor, false).await;

        assert_eq!(queue.status(id), TaskStatus::Error);
        assert!(queue.error(id).unwrap().contains("integer overflow"));

        // The consumer is still alive; later work executes normally
        let next = queue.enqueue_command("return_value = 1");
        drain_pass(&queue, &executor, false).await;
        assert_eq!(queue.status(next), TaskStatus::Success);
    }

    #[tokio::test]
    async fn test_poison_resets_between_passes() {
        let queue = TaskQueue::new();
        let executor = test_executor();

        queue.enqueue_command("x = 1/0");
        drain_pass(&queue, &executor, false).await;

        // A fresh batch after the failed pass starts clean
        let id = queue.enqueue_command("return_value = 7");
        drain_pass(&queue, &executor, false).await;

        assert_eq!(queue.status(id), TaskStatus::Success);
        assert_eq!(queue.result(id), Some(json!(7)));
    }

    #[tokio::test]
    async fn test_shutdown_reads_as_success() {
        let queue = TaskQueue::new();
        let executor = test_executor();

        let id = queue.enqueue_command("quit()");
        let after = queue.enqueue_command("x = 1");

        drain_pass(&queue, &executor, false).await;

        assert_eq!(queue.status(id), TaskStatus::Success);
        assert_eq!(queue.result(id), None);
        assert!(queue.error(id).is_none());

        // Shutdown still short-circuits the rest of the pass
        assert_eq!(queue.status(after), TaskStatus::Error);
    }

    #[tokio::test]
    async fn test_drain_handles_local_callables() {
        let queue = TaskQueue::new();
        let executor = test_executor();

        let id = queue.enqueue_call(|| CommandOutcome::Success(json!("done")));
        drain_pass(&queue, &executor, false).await;

        assert_eq!(queue.result(id), Some(json!("done")));
    }
}
