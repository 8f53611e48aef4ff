//! Command execution seam
//!
//! The queue and RPC layers treat a command as an opaque unit of work that
//! yields exactly one of three outcomes. Hosts embed their own executor
//! bound to their native object model; the built-in [`ScriptExecutor`]
//! backs the text-command wire surface with the sandboxed language from
//! [`crate::script`].

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::error;

use crate::role::Role;
use crate::script::{self, Env, ExecOutcome};

/// The reserved variable a command binds to return a value
pub const RETURN_VARIABLE: &str = "return_value";

/// Outcome of executing one command
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    /// The command ran; `Value::Null` when it bound no return value
    Success(Value),
    /// The command failed; carries the formatted trace
    Failure(String),
    /// The command requested intentional process shutdown. Distinguished
    /// from failure at every layer: the owning task records SUCCESS with
    /// a null result.
    ShutdownRequested,
}

/// Executes a single opaque command within the host process
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &str) -> CommandOutcome;
}

// ─────────────────────────────────────────────────────────────────
// Script Executor
// ─────────────────────────────────────────────────────────────────

/// Built-in executor: evaluates commands in the sandboxed statement
/// language against a persistent per-node environment.
///
/// The configured prelude runs before every command (mirroring per-end
/// import lines); if the command binds [`RETURN_VARIABLE`], that value is
/// taken as the result and removed from the environment.
pub struct ScriptExecutor {
    end: Role,
    prelude: String,
    env: Mutex<Env>,
}

impl ScriptExecutor {
    pub fn new(end: Role, prelude: impl Into<String>) -> Self {
        Self {
            end,
            prelude: prelude.into(),
            env: Mutex::new(Env::new()),
        }
    }
}

#[async_trait]
impl CommandExecutor for ScriptExecutor {
    async fn execute(&self, command: &str) -> CommandOutcome {
        let mut env = self.env.lock();

        if !self.prelude.is_empty() {
            if let Err(e) = script::run(&mut env, &self.prelude) {
                let trace = format_trace(self.end, &self.prelude, &e.message);
                error!(end = %self.end, "Prelude failed: {}", e.message);
                return CommandOutcome::Failure(trace);
            }
        }

        match script::run(&mut env, command) {
            Ok(ExecOutcome::Shutdown) => {
                env.remove(RETURN_VARIABLE);
                CommandOutcome::ShutdownRequested
            }
            Ok(ExecOutcome::Done) => {
                let result = env
                    .remove(RETURN_VARIABLE)
                    .map(|v| v.to_json())
                    .unwrap_or(Value::Null);
                CommandOutcome::Success(result)
            }
            Err(e) => {
                let trace = format_trace(self.end, command, &e.message);
                error!(end = %self.end, "{trace}");
                CommandOutcome::Failure(trace)
            }
        }
    }
}

/// Format a failure trace that carries the offending command text
fn format_trace(end: Role, command: &str, message: &str) -> String {
    format!(
        "Error while running command(s) within {end}:\n\
         ------------ Command ------------\n\
         {}\n\
         ---------------------------------\n\
         {message}",
        command.replace(';', "\n").trim()
    )
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_return_value_convention() {
        let executor = ScriptExecutor::new(Role::Neuron, "");

        match executor.execute("return_value = 1+3").await {
            CommandOutcome::Success(value) => assert_eq!(value, json!(4)),
            other => panic!("Expected success, got {other:?}"),
        }

        // No binding means null result
        match executor.execute("print('x')").await {
            CommandOutcome::Success(value) => assert_eq!(value, Value::Null),
            other => panic!("Expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_return_variable_is_consumed() {
        let executor = ScriptExecutor::new(Role::Neuron, "");
        executor.execute("return_value = 1").await;

        // The reserved variable must not leak into the next command
        match executor.execute("x = 2").await {
            CommandOutcome::Success(value) => assert_eq!(value, Value::Null),
            other => panic!("Expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_environment_persists_between_commands() {
        let executor = ScriptExecutor::new(Role::Neuron, "");
        executor.execute("a = 2").await;

        match executor.execute("return_value = a * 3").await {
            CommandOutcome::Success(value) => assert_eq!(value, json!(6)),
            other => panic!("Expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failure_trace_includes_command() {
        let executor = ScriptExecutor::new(Role::Blender, "");

        match executor.execute("c = 1/0").await {
            CommandOutcome::Failure(trace) => {
                assert!(trace.contains("Blender"));
                assert!(trace.contains("c = 1/0"));
                assert!(trace.contains("division by zero"));
            }
            other => panic!("Expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_quit_is_not_a_failure() {
        let executor = ScriptExecutor::new(Role::Neuron, "");
        assert!(matches!(
            executor.execute("quit()").await,
            CommandOutcome::ShutdownRequested
        ));
    }

    #[tokio::test]
    async fn test_prelude_runs_before_command() {
        let executor = ScriptExecutor::new(Role::Neuron, "dt = 25");

        match executor.execute("return_value = dt + 1").await {
            CommandOutcome::Success(value) => assert_eq!(value, json!(26)),
            other => panic!("Expected success, got {other:?}"),
        }
    }
}
