//! The subprocess runner (component S).
//!
//! Spawns one worker subprocess per call, streams its stdio to completion, persists
//! standard output to a per-worker file, and returns a [`fleet_proto::CompletionRecord`].
//! Imposes no wall-clock timeout of its own — liveness is the broker's job (spec.md §5).

mod command;
mod hint;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use fleet_proto::{CompletionRecord, WorkerId, WorkerOptions};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

pub use hint::classify as classify_error_hint;

/// Errors local to one runner invocation. Distinct from `fleet_proto::ManagerError`: the
/// registry maps these onto a `FailedTask` rather than surfacing them to the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
	#[error("executable {0:?} not found on host")]
	NotInstalled(String),
	#[error("subprocess cancelled")]
	Cancelled,
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// Everything the runner needs to launch one worker execution.
pub struct SpawnSpec {
	pub worker_id: WorkerId,
	pub prompt: String,
	pub agent_type: Option<String>,
	/// Present when this spec resumes a prior session.
	pub session_id: Option<String>,
	pub options: WorkerOptions,
	/// Filesystem path of the broker endpoint this worker should connect to.
	pub socket_path: PathBuf,
	/// Directory persisted worker output files are written under.
	pub logs_dir: PathBuf,
}

/// Spawns and supervises the worker subprocess named by `executable`.
pub struct Runner {
	executable: String,
}

impl Runner {
	#[must_use]
	pub fn new(executable: impl Into<String>) -> Self {
		Self {
			executable: executable.into(),
		}
	}

	/// Fails fast with `RunnerError::NotInstalled` if the executable is not on `PATH`.
	pub async fn verify_installed(&self) -> Result<PathBuf, RunnerError> {
		let executable = self.executable.clone();
		tokio::task::spawn_blocking(move || which::which(&executable))
			.await
			.expect("verify_installed task panicked")
			.map_err(|_| RunnerError::NotInstalled(self.executable.clone()))
	}

	/// Run one worker execution to completion, or until `cancel` fires.
	pub async fn run(&self, spec: SpawnSpec, cancel: CancellationToken) -> Result<CompletionRecord, RunnerError> {
		let exe = self.verify_installed().await?;

		let args = command::build_args(
			&spec.prompt,
			spec.agent_type.as_deref(),
			spec.session_id.as_deref(),
			&spec.options,
		);

		let mut child = Command::new(&exe)
			.args(&args)
			.env(command::ENV_SOCKET_PATH, &spec.socket_path)
			.env(command::ENV_WORKER_ID, spec.worker_id.to_string())
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.spawn()?;

		// Workers are non-interactive; stdin must exist as a live pipe for child-side I/O
		// but is never written to.
		drop(child.stdin.take());

		let mut stdout = child.stdout.take().expect("stdout was piped");
		let mut stderr = child.stderr.take().expect("stderr was piped");

		let stdout_task = tokio::spawn(async move {
			let mut buf = Vec::new();
			let _ = stdout.read_to_end(&mut buf).await;
			buf
		});
		let stderr_task = tokio::spawn(async move {
			let mut buf = Vec::new();
			let _ = stderr.read_to_end(&mut buf).await;
			buf
		});

		let status = tokio::select! {
			status = child.wait() => status?,
			() = cancel.cancelled() => {
				tracing::info!(worker_id = %spec.worker_id, "cancelling runner, killing child");
				let _ = child.kill().await;
				let _ = child.wait().await;
				return Err(RunnerError::Cancelled);
			}
		};

		let stdout_bytes = stdout_task.await.unwrap_or_default();
		let stderr_bytes = stderr_task.await.unwrap_or_default();

		let output_file_path = output_file_path(&spec.logs_dir, spec.worker_id);
		tokio::fs::write(&output_file_path, &stdout_bytes).await?;

		Ok(CompletionRecord {
			worker_id: spec.worker_id,
			exit_code: status.code().unwrap_or(-1),
			stdout: stdout_bytes,
			stderr: stderr_bytes,
			output_file_path,
		})
	}
}

/// Deterministic per-worker output file path, as required by spec.md §6.
#[must_use]
pub fn output_file_path(logs_dir: &Path, worker_id: WorkerId) -> PathBuf {
	logs_dir.join(format!("worker-{worker_id}.json"))
}

#[cfg(test)]
mod tests {
	use tempfile::tempdir;

	use super::*;

	#[tokio::test]
	async fn missing_executable_is_not_installed() {
		let runner = Runner::new("definitely-not-a-real-binary-xyz");
		let err = runner.verify_installed().await.unwrap_err();
		assert!(matches!(err, RunnerError::NotInstalled(_)));
	}

	#[tokio::test]
	async fn run_persists_stdout_and_reports_exit_code() {
		let dir = tempdir().unwrap();
		let worker_id = WorkerId::new();

		// `sh` is assumed present on the host test runner, matching the teacher's own
		// reliance on host utilities (`which`, `sh`) in process-spawning tests.
		let runner = Runner::new("sh");
		let spec = SpawnSpec {
			worker_id,
			prompt: "ignored".into(),
			agent_type: None,
			session_id: None,
			options: WorkerOptions::default(),
			socket_path: dir.path().join("perm.sock"),
			logs_dir: dir.path().to_path_buf(),
		};

		// `build_args` output is irrelevant to `sh`; we only assert the plumbing (stdout
		// capture, exit code, output file) because the real worker binary is an external
		// collaborator outside this crate's scope.
		let cancel = CancellationToken::new();
		let result = runner.run(spec, cancel).await;
		assert!(result.is_ok());
		let record = result.unwrap();
		assert_eq!(record.worker_id, worker_id);
		assert!(record.output_file_path.exists());
	}

	#[tokio::test]
	async fn cancellation_kills_child_and_returns_cancelled() {
		let dir = tempdir().unwrap();
		let runner = Runner::new("sleep");
		let spec = SpawnSpec {
			worker_id: WorkerId::new(),
			prompt: "60".into(),
			agent_type: None,
			session_id: None,
			options: WorkerOptions::default(),
			socket_path: dir.path().join("perm.sock"),
			logs_dir: dir.path().to_path_buf(),
		};

		let cancel = CancellationToken::new();
		let cancel_clone = cancel.clone();
		tokio::spawn(async move {
			tokio::time::sleep(std::time::Duration::from_millis(50)).await;
			cancel_clone.cancel();
		});

		let result = runner.run(spec, cancel).await;
		assert!(matches!(result, Err(RunnerError::Cancelled)));
	}
}
