//! The per-worker IPC broker (component B).
//!
//! # Mental model
//!
//! - One [`Broker`] is bound per `Active` worker, to a deterministic socket path derived
//!   from the worker's identity. It owns the listener, the pending-permission map, and a
//!   running count of served requests.
//! - A connection may carry many requests sequentially; each line is handled to completion
//!   (including the blocking wait on the supervisor's decision) before the next is read.
//!   This mirrors the teacher's `handle_connection` shape in
//!   `crates/broker/broker/src/ipc.rs`, generalized from a length-prefixed `postcard` frame
//!   to newline-delimited JSON.
//! - `approve` never touches the socket directly — it resolves the pending entry's oneshot
//!   sender, and whichever task is blocked reading that receiver performs the write. This
//!   keeps `approve` non-blocking on wire I/O, per spec.md §5.
//!
//! # Invariants
//!
//! 1. The endpoint file must exist with mode `0o600` while the broker is live, and must not
//!    exist after teardown.
//!    - Enforced in: `Broker::bind`, `Broker::shutdown`
//! 2. The 30-second I/O timeout applies to socket reads and writes, never to the time spent
//!    waiting for a supervisor decision.
//!    - Enforced in: `Broker::handle_connection`

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use fleet_events::{Event, EventSender};
use fleet_proto::{
	BROKER_IO_TIMEOUT_SECS, MAX_REQUESTS_PER_BROKER, ManagerError, PermissionDecision, PermissionRequest, RequestId,
	WorkerId,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

const IO_TIMEOUT: Duration = Duration::from_secs(BROKER_IO_TIMEOUT_SECS);

/// A parked permission request, awaiting the supervisor's decision.
struct PendingEntry {
	worker_id: WorkerId,
	tool: String,
	input: Value,
	tx: oneshot::Sender<PermissionDecision>,
}

/// Outcome of a successful `approve`, shaped for the supervisor-facing return value
/// (`{status, worker_id, request_id, tool}`, spec.md §6).
#[derive(Debug, Clone)]
pub struct ApproveOutcome {
	pub status: &'static str,
	pub worker_id: WorkerId,
	pub request_id: RequestId,
	pub tool: String,
}

/// One per `Active` worker. Binds a Unix socket at construction; `serve` runs the accept
/// loop until cancelled.
pub struct Broker {
	worker_id: WorkerId,
	socket_path: PathBuf,
	listener: UnixListener,
	pending: Mutex<HashMap<RequestId, PendingEntry>>,
	events: EventSender,
	served: AtomicU64,
}

impl Broker {
	/// Bind a fresh endpoint at `socket_path`, removing any stale file left by a prior run.
	pub async fn bind(worker_id: WorkerId, socket_path: PathBuf, events: EventSender) -> std::io::Result<Arc<Self>> {
		if socket_path.exists() {
			tokio::fs::remove_file(&socket_path).await?;
		}
		let listener = UnixListener::bind(&socket_path)?;
		tokio::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600)).await?;

		Ok(Arc::new(Self {
			worker_id,
			socket_path,
			listener,
			pending: Mutex::new(HashMap::new()),
			events,
			served: AtomicU64::new(0),
		}))
	}

	#[must_use]
	pub fn socket_path(&self) -> &Path {
		&self.socket_path
	}

	/// Run the accept loop until `cancel` fires, then unlink the endpoint file.
	///
	/// Any requests still pending at shutdown are simply dropped; their oneshot senders go
	/// out of scope and the parked handlers observe a closed channel (spec.md §4.2 point 5).
	pub async fn serve(self: Arc<Self>, cancel: CancellationToken) {
		tracing::info!(path = %self.socket_path.display(), worker_id = %self.worker_id, "broker listening");
		loop {
			tokio::select! {
				accepted = self.listener.accept() => {
					match accepted {
						Ok((stream, _addr)) => {
							let broker = Arc::clone(&self);
							tokio::spawn(async move { broker.handle_connection(stream).await; });
						}
						Err(error) => tracing::error!(%error, "broker accept failed"),
					}
				}
				() = cancel.cancelled() => break,
			}
		}
		self.shutdown().await;
	}

	async fn shutdown(&self) {
		if let Err(error) = tokio::fs::remove_file(&self.socket_path).await {
			if error.kind() != std::io::ErrorKind::NotFound {
				tracing::warn!(%error, path = %self.socket_path.display(), "failed to unlink broker socket");
			}
		}
		tracing::info!(worker_id = %self.worker_id, "broker torn down");
	}

	/// Resolve a pending request with the supervisor's decision.
	///
	/// `WorkerMismatch` is the registry's job (it is the only place that knows which caller
	/// owns which broker); this method only distinguishes "no such request".
	pub fn approve(
		&self,
		request_id: &RequestId,
		allow: bool,
		message: Option<String>,
	) -> Result<ApproveOutcome, ManagerError> {
		let entry = self
			.pending
			.lock()
			.remove(request_id)
			.ok_or_else(|| ManagerError::RequestNotFound(request_id.clone()))?;

		let decision = if allow {
			PermissionDecision::allow(request_id.clone(), entry.input)
		} else {
			PermissionDecision::deny(request_id.clone(), message)
		};

		let outcome = ApproveOutcome {
			status: if allow { "approved" } else { "denied" },
			worker_id: entry.worker_id,
			request_id: request_id.clone(),
			tool: entry.tool,
		};

		// The receiver may already be gone if the connection dropped mid-wait; that is not
		// this call's problem, the parked handler (if any) has already exited.
		let _ = entry.tx.send(decision);
		Ok(outcome)
	}

	async fn handle_connection(self: Arc<Self>, stream: UnixStream) {
		let (reader, mut writer) = stream.into_split();
		let mut lines = BufReader::new(reader).lines();

		loop {
			let line = match tokio::time::timeout(IO_TIMEOUT, lines.next_line()).await {
				Ok(Ok(Some(line))) => line,
				Ok(Ok(None)) => break,
				Ok(Err(error)) => {
					tracing::warn!(%error, "broker connection read error");
					break;
				}
				Err(_) => {
					tracing::warn!("broker connection read_timeout, tearing down");
					break;
				}
			};

			let decision = self.handle_line(&line).await;
			if let Err(error) = self.write_decision(&mut writer, &decision).await {
				tracing::warn!(%error, "broker connection write error, tearing down");
				break;
			}
		}
	}

	/// Parse, rate-limit, park, and (eventually) resolve one request line into a decision.
	async fn handle_line(&self, line: &str) -> PermissionDecision {
		let value: Value = match serde_json::from_str(line) {
			Ok(value) => value,
			Err(error) => return PermissionDecision::deny(RequestId(String::new()), format!("invalid_request: {error}")),
		};

		let request_id = value
			.get("request_id")
			.and_then(Value::as_str)
			.map(|s| RequestId(s.to_string()))
			.unwrap_or_else(|| RequestId(String::new()));

		let request: PermissionRequest = match serde_json::from_value(value) {
			Ok(request) => request,
			Err(error) => return PermissionDecision::deny(request_id, format!("invalid_request: {error}")),
		};

		if self.served.fetch_add(1, Ordering::Relaxed) >= MAX_REQUESTS_PER_BROKER {
			return PermissionDecision::deny(request.request_id, "rate_limit_exceeded".to_string());
		}

		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(
			request.request_id.clone(),
			PendingEntry {
				worker_id: request.worker_id,
				tool: request.tool.clone(),
				input: request.input.clone(),
				tx,
			},
		);

		self.events.publish(Event::PermissionRequested(self.worker_id, request.clone()));

		match rx.await {
			Ok(decision) => decision,
			Err(_) => PermissionDecision::deny(request.request_id, "broker shut down before a decision arrived".to_string()),
		}
	}

	async fn write_decision(
		&self,
		writer: &mut (impl AsyncWrite + Unpin),
		decision: &PermissionDecision,
	) -> std::io::Result<()> {
		let mut line = serde_json::to_string(decision).expect("PermissionDecision always serializes");
		line.push('\n');

		tokio::time::timeout(IO_TIMEOUT, async {
			writer.write_all(line.as_bytes()).await?;
			writer.flush().await
		})
		.await
		.map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "write_timeout"))?
	}
}

#[cfg(test)]
mod tests {
	use fleet_events::EventBus;
	use tempfile::tempdir;
	use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
	use tokio::net::UnixStream;

	use super::*;

	async fn spawn_broker() -> (Arc<Broker>, CancellationToken, fleet_events::EventReceiver, PathBuf, tempfile::TempDir)
	{
		let dir = tempdir().unwrap();
		let socket_path = dir.path().join("worker.sock");
		let (tx, rx) = EventBus::channel();
		let broker = Broker::bind(WorkerId::new(), socket_path.clone(), tx).await.unwrap();
		let cancel = CancellationToken::new();
		let serve_cancel = cancel.clone();
		let serve_broker = Arc::clone(&broker);
		tokio::spawn(async move { serve_broker.serve(serve_cancel).await });
		(broker, cancel, rx, socket_path, dir)
	}

	#[tokio::test]
	async fn socket_has_owner_only_permissions() {
		let (_broker, _cancel, _rx, socket_path, _dir) = spawn_broker().await;
		let meta = tokio::fs::metadata(&socket_path).await.unwrap();
		assert_eq!(meta.permissions().mode() & 0o777, 0o600);
	}

	#[tokio::test]
	async fn request_parks_and_approve_unblocks_it() {
		let (broker, cancel, mut events, socket_path, _dir) = spawn_broker().await;

		let mut client = UnixStream::connect(&socket_path).await.unwrap();
		client
			.write_all(b"{\"request_id\":\"r1\",\"worker_id\":\"00000000-0000-0000-0000-000000000000\",\"tool\":\"Bash\",\"input\":{\"command\":\"ls\"}}\n")
			.await
			.unwrap();

		let event = events.recv_before_deadline(Duration::from_secs(1)).await;
		assert!(matches!(event, Some(Event::PermissionRequested(_, _))));

		let outcome = broker.approve(&RequestId("r1".to_string()), true, None).unwrap();
		assert_eq!(outcome.status, "approved");
		assert_eq!(outcome.tool, "Bash");

		let mut reader = BufReader::new(&mut client);
		let mut line = String::new();
		reader.read_line(&mut line).await.unwrap();
		let decision: PermissionDecision = serde_json::from_str(line.trim()).unwrap();
		assert!(decision.allow);
		assert_eq!(decision.updated_input.unwrap()["command"], "ls");

		cancel.cancel();
	}

	#[tokio::test]
	async fn malformed_line_gets_deny_and_connection_stays_usable() {
		let (_broker, cancel, _rx, socket_path, _dir) = spawn_broker().await;

		let mut client = UnixStream::connect(&socket_path).await.unwrap();
		client.write_all(b"not json\n").await.unwrap();

		let mut reader = BufReader::new(&mut client);
		let mut line = String::new();
		reader.read_line(&mut line).await.unwrap();
		let decision: PermissionDecision = serde_json::from_str(line.trim()).unwrap();
		assert!(!decision.allow);
		assert!(decision.message.unwrap().contains("invalid_request"));

		cancel.cancel();
	}

	#[tokio::test]
	async fn approve_unknown_request_fails_not_found() {
		let (broker, cancel, _rx, _socket_path, _dir) = spawn_broker().await;
		let err = broker.approve(&RequestId("missing".to_string()), true, None).unwrap_err();
		assert!(matches!(err, ManagerError::RequestNotFound(_)));
		cancel.cancel();
	}

	#[tokio::test]
	async fn teardown_unlinks_socket_file() {
		let (_broker, cancel, _rx, socket_path, _dir) = spawn_broker().await;
		cancel.cancel();
		// allow the serve task to observe cancellation
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert!(!socket_path.exists());
	}
}
