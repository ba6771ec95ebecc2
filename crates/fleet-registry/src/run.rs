//! The runner-completion task: awaits one subprocess to exit, classifies the result, and
//! hands the outcome to the registry for teardown and publication.

use std::sync::Arc;

use fleet_events::Event;
use fleet_proto::{CompletedTask, FailedTask, WorkerId};
use fleet_runner::{RunnerError, SpawnSpec};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::RegistryInner;
use crate::state::Outcome;

/// Recover the `session_id` string from a completed worker's persisted stdout, per
/// spec.md §3's `CompletedTask` and §7's `InvalidSession`.
fn extract_session_id(stdout: &[u8]) -> Result<String, ()> {
	let value: Value = serde_json::from_slice(stdout).map_err(|_| ())?;
	value.get("session_id").and_then(Value::as_str).map(str::to_string).ok_or(())
}

/// Drive one subprocess execution to completion and classify the result into an
/// `Outcome`, then tear the worker down through the registry. Spawned once per
/// `spawn`/`resume` call; never returns early except on cancellation, which leaves
/// teardown to whichever caller initiated the cancellation.
pub(crate) async fn run_worker(inner: Arc<RegistryInner>, worker_id: WorkerId, spec: SpawnSpec, cancel: CancellationToken) {
	let result = inner.runner.run(spec, cancel).await;

	let outcome = match result {
		Ok(record) if record.exit_code == 0 => match extract_session_id(&record.stdout) {
			Ok(session_id) => Outcome::Completed(CompletedTask {
				worker_id,
				session_id,
				conversation_history_file_path: record.output_file_path,
			}),
			Err(()) => Outcome::Failed(FailedTask {
				worker_id,
				returncode: record.exit_code,
				conversation_history_file_path: Some(record.output_file_path),
				error_hint: "recovered output lacks a string session_id".to_string(),
			}),
		},
		Ok(record) => Outcome::Failed(FailedTask {
			worker_id,
			returncode: record.exit_code,
			conversation_history_file_path: Some(record.output_file_path),
			error_hint: fleet_runner::classify_error_hint(&record.stderr, record.exit_code),
		}),
		Err(RunnerError::Cancelled) => {
			tracing::debug!(%worker_id, "runner cancelled, skipping transition");
			return;
		}
		Err(RunnerError::NotInstalled(executable)) => {
			tracing::warn!(%worker_id, %executable, "worker executable not installed");
			Outcome::Failed(FailedTask {
				worker_id,
				returncode: -1,
				conversation_history_file_path: None,
				error_hint: "Executable missing.".to_string(),
			})
		}
		Err(RunnerError::Io(error)) => Outcome::Failed(FailedTask {
			worker_id,
			returncode: -1,
			conversation_history_file_path: None,
			error_hint: format!("I/O error: {error}"),
		}),
	};

	inner.finish_worker(worker_id, outcome).await;
}

/// The event a finished `Outcome` publishes once the worker's state transition lands.
pub(crate) fn outcome_event(worker_id: WorkerId, outcome: &Outcome) -> Event {
	match outcome {
		Outcome::Completed(task) => Event::Completion(worker_id, task.clone()),
		Outcome::Failed(task) => Event::Failure(worker_id, task.clone()),
	}
}
