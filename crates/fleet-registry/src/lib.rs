//! The worker registry (component R): bounded fleet, admission control, and the
//! spawn/resume/wait/approve operations spec.md §4.1 describes.
//!
//! # Mental model
//!
//! - One [`Registry`] per running manager, cheaply `Clone`-able (it is an `Arc` handle over
//!   [`RegistryInner`]). `RegistryInner::workers` is the single authoritative map; every
//!   mutation goes through it under `tokio::sync::Mutex`, matching the teacher's pattern of
//!   one mutex guarding one in-memory map (`xeno_broker::core::BrokerCore::state`), generalized
//!   from a `std::sync::Mutex` to an async one since registry operations may themselves await
//!   (binding a broker, joining a teardown task).
//! - A worker's lifecycle is driven by a spawned `run.rs` task that owns the runner
//!   invocation; it calls back into [`RegistryInner::finish_worker`] once the subprocess
//!   exits, which tears the broker down, mutates the worker's state, and only then publishes
//!   the `Completion`/`Failure` event (spec.md §3's teardown-before-publish invariant).
//! - `wait()` never mutates worker state itself; it only drains and aggregates events already
//!   published by brokers and runner-completion tasks into one snapshot.
//!
//! # Invariants
//!
//! 1. At most [`fleet_proto::MAX_ACTIVE_WORKERS`] workers may be `Active` simultaneously.
//!    - Enforced in: `RegistryInner::spawn`
//! 2. A worker's broker is torn down (cancelled, socket unlinked) before its `Completed`/
//!    `Failed` transition is published as an event.
//!    - Enforced in: `RegistryInner::finish_worker`

mod run;
mod state;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fleet_broker::Broker;
use fleet_events::{Event, EventBus, EventReceiver, EventSender};
use fleet_proto::{
	CompletedTask, FailedTask, MAX_ACTIVE_WORKERS, ManagerError, PermissionRequest, RequestId, WAIT_POLL_HORIZON_SECS,
	WorkerId, WorkerOptions, WorkerStateSnapshot,
};
use fleet_runner::{Runner, SpawnSpec};
use state::{Outcome, WorkerState};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// The supervisor-facing return shape of a successful `approve`, per spec.md §6.
pub use fleet_broker::ApproveOutcome;

/// Static configuration the registry needs to spawn and resume workers.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
	/// The worker executable, resolved against `PATH` by the runner.
	pub executable: String,
	/// Directory `PERM_SOCKET_PATH` endpoints are created under.
	pub socket_dir: PathBuf,
	/// Directory per-worker output files are persisted under.
	pub logs_dir: PathBuf,
	/// Concurrency cap enforced by `spawn`. Defaults to `MAX_ACTIVE_WORKERS`; `fleetd`
	/// exposes this as a `--max-active` flag (ambient configuration surface, spec.md
	/// itself fixes N_max = 10 as the default).
	pub max_active: usize,
}

impl Default for RegistryConfig {
	fn default() -> Self {
		Self {
			executable: "claude".to_string(),
			socket_dir: PathBuf::from("/tmp/fleetd/sockets"),
			logs_dir: PathBuf::from("/tmp/fleetd/logs"),
			max_active: MAX_ACTIVE_WORKERS,
		}
	}
}

struct RegistryInner {
	workers: Mutex<std::collections::HashMap<WorkerId, WorkerState>>,
	events_tx: EventSender,
	events_rx: Mutex<EventReceiver>,
	runner: Runner,
	config: RegistryConfig,
}

/// The worker-fleet manager's registry. Cheap to clone; every clone shares the same
/// underlying worker table and event channel.
#[derive(Clone)]
pub struct Registry {
	inner: Arc<RegistryInner>,
}

impl Registry {
	/// Construct a fresh, empty registry. Creates `config.socket_dir` and `config.logs_dir`
	/// if they do not already exist.
	pub async fn new(config: RegistryConfig) -> std::io::Result<Self> {
		tokio::fs::create_dir_all(&config.socket_dir).await?;
		tokio::fs::create_dir_all(&config.logs_dir).await?;

		let (events_tx, events_rx) = EventBus::channel();
		Ok(Self {
			inner: Arc::new(RegistryInner {
				workers: Mutex::new(std::collections::HashMap::new()),
				events_tx,
				events_rx: Mutex::new(events_rx),
				runner: Runner::new(config.executable.clone()),
				config,
			}),
		})
	}

	/// `spawn(prompt, agent_type?, options?) → worker_id`, per spec.md §4.1.
	///
	/// Mints a fresh identity, binds a broker at a deterministic socket path, and launches a
	/// runner task. Returns as soon as the subprocess has been launched; does not block on
	/// its completion.
	pub async fn spawn(
		&self,
		prompt: String,
		agent_type: Option<String>,
		options: Option<WorkerOptions>,
	) -> Result<WorkerId, ManagerError> {
		let mut workers = self.inner.workers.lock().await;
		let active_count = workers.values().filter(|w| w.is_active()).count();
		if active_count >= self.inner.config.max_active {
			return Err(ManagerError::CapacityExceeded(active_count));
		}

		let worker_id = WorkerId::new();
		let entry = self
			.inner
			.launch(worker_id, prompt, agent_type, None, options.unwrap_or_default())
			.await?;
		workers.insert(worker_id, entry);
		Ok(worker_id)
	}

	/// `resume(worker_id, prompt, options?) → ()`, per spec.md §4.1.
	///
	/// Requires the worker to be `Completed`; recovers its session identifier from the prior
	/// `CompletedTask`, launches a new runner carrying that session, and transitions the
	/// worker back to `Active`.
	pub async fn resume(&self, worker_id: WorkerId, prompt: String, options: Option<WorkerOptions>) -> Result<(), ManagerError> {
		let mut workers = self.inner.workers.lock().await;
		let current = workers.get(&worker_id).ok_or(ManagerError::WorkerNotFound(worker_id))?;

		let (session_id, agent_type) = match current {
			WorkerState::Completed { task, agent_type } => (task.session_id.clone(), agent_type.clone()),
			other => {
				return Err(ManagerError::WrongState {
					worker_id,
					expected: "Completed",
					found: other.name(),
				});
			}
		};

		let entry = self
			.inner
			.launch(worker_id, prompt, agent_type, Some(session_id), options.unwrap_or_default())
			.await?;
		workers.insert(worker_id, entry);
		Ok(())
	}

	/// `approve(worker_id, request_id, allow, message?) → ApproveOutcome`, per spec.md §4.1
	/// and §4.2.4.
	///
	/// Delegates to the owning worker's broker, then checks that the resolved request
	/// actually belonged to `worker_id` — the broker itself only distinguishes "no such
	/// request" because it does not know which caller owns which other broker.
	pub async fn approve(
		&self,
		worker_id: WorkerId,
		request_id: RequestId,
		allow: bool,
		message: Option<String>,
	) -> Result<ApproveOutcome, ManagerError> {
		let workers = self.inner.workers.lock().await;
		let broker = match workers.get(&worker_id) {
			Some(WorkerState::Active { broker, .. }) => Arc::clone(broker),
			Some(_) | None => return Err(ManagerError::WorkerNotFound(worker_id)),
		};
		drop(workers);

		let outcome = broker.approve(&request_id, allow, message)?;
		if outcome.worker_id != worker_id {
			return Err(ManagerError::WorkerMismatch {
				request_id,
				owner: outcome.worker_id,
				caller: worker_id,
			});
		}
		Ok(outcome)
	}

	/// `wait() → WorkerStateSnapshot`, per spec.md §4.4.
	///
	/// Blocks until every tracked worker has left `Active`, or at least one permission
	/// request is pending, or the 5-second poll horizon lets the loop re-examine registry
	/// state. Fails with `NoActiveWorkers` if no worker is `Active` at entry and draining the
	/// event channel surfaces nothing either — a worker that finished just before this call
	/// was made still has its `Completion`/`Failure` event sitting in the channel, and that
	/// result must not be stranded there (spec.md §4.4's `_flush_completed_tasks` behavior).
	pub async fn wait(&self) -> Result<WorkerStateSnapshot, ManagerError> {
		let mut receiver = self.inner.events_rx.lock().await;

		let mut snapshot = WorkerStateSnapshot::default();
		loop {
			for event in receiver.drain_ready() {
				apply(&mut snapshot, event);
			}

			let active = self.active_count().await;
			let snapshot_is_empty =
				snapshot.completed.is_empty() && snapshot.failed.is_empty() && snapshot.pending_permissions.is_empty();
			if active == 0 && snapshot_is_empty {
				return Err(ManagerError::NoActiveWorkers);
			}

			// Permission-first return: a pending approval must be visible even while other
			// workers remain Active, or an approver blocked on `wait` would deadlock a worker
			// that cannot progress without a decision (spec.md §4.4).
			if !snapshot.pending_permissions.is_empty() {
				return Ok(snapshot);
			}

			if active == 0 {
				return Ok(snapshot);
			}

			if let Some(event) = receiver.recv_before_deadline(Duration::from_secs(WAIT_POLL_HORIZON_SECS)).await {
				apply(&mut snapshot, event);
			}
			// On a bare deadline elapse the loop simply re-checks registry state; this is the
			// lost-wakeup guard spec.md §9 mandates, not an optimization.
		}
	}

	/// Cancel every `Active` worker's runner, await their teardown, and leave the registry
	/// in whatever terminal state each worker settles into. Intended for process shutdown.
	pub async fn shutdown(&self) {
		let tasks: Vec<_> = {
			let workers = self.inner.workers.lock().await;
			workers
				.values()
				.filter_map(|w| match w {
					WorkerState::Active { broker_cancel, .. } => Some(broker_cancel.clone()),
					_ => None,
				})
				.collect()
		};
		for cancel in tasks {
			cancel.cancel();
		}
	}

	async fn active_count(&self) -> usize {
		self.inner.workers.lock().await.values().filter(|w| w.is_active()).count()
	}
}

impl RegistryInner {
	/// Bind a broker at a fresh socket path and launch a runner task for `worker_id`,
	/// returning the `Active` state entry. Shared by `spawn` and `resume`, which differ only
	/// in whether a prior session identifier carries forward.
	async fn launch(
		self: &Arc<Self>,
		worker_id: WorkerId,
		prompt: String,
		agent_type: Option<String>,
		session_id: Option<String>,
		options: WorkerOptions,
	) -> Result<WorkerState, ManagerError> {
		let socket_path = self.config.socket_dir.join(format!("claude_worker_{worker_id}.sock"));
		let broker = Broker::bind(worker_id, socket_path.clone(), self.events_tx.clone()).await?;

		let broker_cancel = CancellationToken::new();
		let serve_cancel = broker_cancel.clone();
		let serve_broker = Arc::clone(&broker);
		let broker_task = tokio::spawn(async move { serve_broker.serve(serve_cancel).await });

		let spec = SpawnSpec {
			worker_id,
			prompt,
			agent_type: agent_type.clone(),
			session_id,
			options,
			socket_path,
			logs_dir: self.config.logs_dir.clone(),
		};

		let runner_cancel = broker_cancel.clone();
		let inner = Arc::clone(self);
		let runner_task = tokio::spawn(async move { run::run_worker(inner, worker_id, spec, runner_cancel).await });

		Ok(WorkerState::Active {
			broker,
			broker_cancel,
			broker_task,
			runner_task,
			agent_type,
		})
	}

	/// Tear the broker down, transition the worker to its terminal state, and only then
	/// publish the corresponding event — spec.md §3's ordering invariant.
	async fn finish_worker(self: &Arc<Self>, worker_id: WorkerId, outcome: Outcome) {
		let removed = self.workers.lock().await.remove(&worker_id);
		let Some(WorkerState::Active {
			broker_cancel,
			broker_task,
			runner_task: _,
			agent_type,
			..
		}) = removed
		else {
			tracing::warn!(%worker_id, "runner completion for a worker that was not Active, dropping");
			return;
		};

		broker_cancel.cancel();
		if let Err(error) = broker_task.await {
			tracing::warn!(%worker_id, %error, "broker task panicked during teardown");
		}

		let event = run::outcome_event(worker_id, &outcome);
		let new_state = match outcome {
			Outcome::Completed(task) => WorkerState::Completed { task, agent_type },
			Outcome::Failed(task) => WorkerState::Failed { task, agent_type },
		};
		self.workers.lock().await.insert(worker_id, new_state);

		self.events_tx.publish(event);
	}
}

fn apply(snapshot: &mut WorkerStateSnapshot, event: Event) {
	match event {
		Event::Completion(_, task) => snapshot.completed.push(task),
		Event::Failure(_, task) => snapshot.failed.push(task),
		Event::PermissionRequested(_, request) => snapshot.pending_permissions.push(request),
	}
}

#[cfg(test)]
mod tests {
	use std::os::unix::fs::PermissionsExt;

	use tempfile::tempdir;

	use super::*;

	/// Write an executable shell script standing in for the worker binary, which is an
	/// external collaborator outside this crate's scope (spec.md §1). The real binary reads
	/// its prompt from `-p`/`--output-format json`; these scripts ignore their argument
	/// vector entirely and just produce a deterministic stdout/stderr/exit-code, which is all
	/// the registry's classification logic inspects.
	async fn write_script(dir: &std::path::Path, name: &str, body: &str) -> String {
		let path = dir.join(name);
		tokio::fs::write(&path, format!("#!/bin/sh\n{body}\n")).await.unwrap();
		tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700)).await.unwrap();
		path.to_string_lossy().into_owned()
	}

	async fn registry_with_executable(executable: String) -> (Registry, tempfile::TempDir) {
		let dir = tempdir().unwrap();
		let config = RegistryConfig {
			executable,
			socket_dir: dir.path().join("sockets"),
			logs_dir: dir.path().join("logs"),
			max_active: MAX_ACTIVE_WORKERS,
		};
		(Registry::new(config).await.unwrap(), dir)
	}

	async fn registry() -> (Registry, tempfile::TempDir) {
		let dir = tempdir().unwrap();
		let executable = write_script(dir.path(), "sleepy.sh", "sleep 5").await;
		let config = RegistryConfig {
			executable,
			socket_dir: dir.path().join("sockets"),
			logs_dir: dir.path().join("logs"),
			max_active: MAX_ACTIVE_WORKERS,
		};
		(Registry::new(config).await.unwrap(), dir)
	}

	#[tokio::test]
	async fn wait_with_no_active_workers_is_an_error() {
		let (registry, _dir) = registry().await;
		let err = registry.wait().await.unwrap_err();
		assert!(matches!(err, ManagerError::NoActiveWorkers));
	}

	#[tokio::test]
	async fn spawn_past_capacity_fails() {
		let (registry, _dir) = registry().await;
		for _ in 0..MAX_ACTIVE_WORKERS {
			registry.spawn("ignored".to_string(), None, None).await.unwrap();
		}
		let err = registry.spawn("ignored".to_string(), None, None).await.unwrap_err();
		assert!(matches!(err, ManagerError::CapacityExceeded(n) if n == MAX_ACTIVE_WORKERS));
		registry.shutdown().await;
	}

	#[tokio::test]
	async fn resume_on_active_worker_fails_wrong_state() {
		let (registry, _dir) = registry().await;
		let worker_id = registry.spawn("ignored".to_string(), None, None).await.unwrap();
		let err = registry.resume(worker_id, "next".to_string(), None).await.unwrap_err();
		assert!(matches!(err, ManagerError::WrongState { expected: "Completed", .. }));
		registry.shutdown().await;
	}

	#[tokio::test]
	async fn resume_on_unknown_worker_fails_not_found() {
		let (registry, _dir) = registry().await;
		let err = registry.resume(WorkerId::new(), "next".to_string(), None).await.unwrap_err();
		assert!(matches!(err, ManagerError::WorkerNotFound(_)));
	}

	#[tokio::test]
	async fn approve_on_unknown_worker_fails_not_found() {
		let (registry, _dir) = registry().await;
		let err = registry
			.approve(WorkerId::new(), RequestId("r1".to_string()), true, None)
			.await
			.unwrap_err();
		assert!(matches!(err, ManagerError::WorkerNotFound(_)));
	}

	#[tokio::test]
	async fn happy_path_single_worker_completes() {
		let dir = tempdir().unwrap();
		// The stand-in executable ignores its argument vector entirely (the real worker
		// binary's `-p`/`--output-format json` flags are outside this crate's scope) and
		// just emits a deterministic success record to stdout.
		let executable = write_script(dir.path(), "worker.sh", r#"printf '{"session_id":"s1","result":"ok"}'"#).await;
		let (registry, _config_dir) = registry_with_executable(executable).await;

		let worker_id = registry.spawn("ignored".to_string(), None, None).await.unwrap();

		let snapshot = registry.wait().await.unwrap();
		assert_eq!(snapshot.completed.len(), 1);
		assert_eq!(snapshot.completed[0].worker_id, worker_id);
		assert_eq!(snapshot.completed[0].session_id, "s1");
	}

	#[tokio::test]
	async fn failure_classification_surfaces_hint() {
		let dir = tempdir().unwrap();
		let executable =
			write_script(dir.path(), "worker.sh", "echo 'Connection refused to broker' 1>&2\nexit 2").await;
		let (registry, _config_dir) = registry_with_executable(executable).await;

		let worker_id = registry.spawn("ignored".to_string(), None, None).await.unwrap();

		let snapshot = registry.wait().await.unwrap();
		assert_eq!(snapshot.failed.len(), 1);
		assert_eq!(snapshot.failed[0].worker_id, worker_id);
		assert_eq!(snapshot.failed[0].returncode, 2);
		assert_eq!(snapshot.failed[0].error_hint, "Connection failed.");
	}

	#[tokio::test]
	async fn resume_after_completion_carries_session_and_returns_to_active() {
		let dir = tempdir().unwrap();
		let executable = write_script(dir.path(), "worker.sh", r#"printf '{"session_id":"s1","result":"ok"}'"#).await;
		let (registry, _config_dir) = registry_with_executable(executable).await;

		let worker_id = registry.spawn("ignored".to_string(), None, None).await.unwrap();
		registry.wait().await.unwrap();

		registry.resume(worker_id, "next".to_string(), None).await.unwrap();
		assert_eq!(registry.active_count().await, 1);
		registry.shutdown().await;
	}
}
