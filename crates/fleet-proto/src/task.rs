use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ids::WorkerId;
use crate::permission::PermissionRequest;

/// Raw outcome of one subprocess run, before the registry classifies it as
/// completed or failed.
#[derive(Debug, Clone)]
pub struct CompletionRecord {
	pub worker_id: WorkerId,
	pub exit_code: i32,
	pub stdout: Vec<u8>,
	pub stderr: Vec<u8>,
	/// Absolute path to the persisted copy of `stdout`.
	pub output_file_path: PathBuf,
}

/// A `CompletionRecord` with exit code zero and a recovered session identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedTask {
	pub worker_id: WorkerId,
	/// The string value of the `session_id` key in the worker's output JSON.
	pub session_id: String,
	pub conversation_history_file_path: PathBuf,
}

/// A `CompletionRecord` with a non-zero exit code, or a completion that failed
/// to parse as a success record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedTask {
	pub worker_id: WorkerId,
	pub returncode: i32,
	/// Present iff a partial output file was written before failure.
	pub conversation_history_file_path: Option<PathBuf>,
	/// Short, heuristically derived hint, at most `ERROR_HINT_MAX_LEN` characters.
	pub error_hint: String,
}

/// Snapshot returned by `wait()`: everything that became observable during the call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStateSnapshot {
	pub completed: Vec<CompletedTask>,
	pub failed: Vec<FailedTask>,
	pub pending_permissions: Vec<PermissionRequest>,
}
