use crate::ids::{RequestId, WorkerId};

/// Every error kind the manager's public operations can surface.
///
/// Nothing here is retried by the core; retry policy is a supervisor concern. Errors that
/// the broker can recover from locally (`ProtocolError`, `IoTimeout`, `RateLimitExceeded`)
/// never reach this type — they become a deny-decision on the wire instead.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
	#[error("capacity exceeded: {0} workers already active")]
	CapacityExceeded(usize),

	#[error("worker {0} not found")]
	WorkerNotFound(WorkerId),

	#[error("permission request {0} not found")]
	RequestNotFound(RequestId),

	#[error("worker {worker_id} is not in the required state (expected {expected}, found {found})")]
	WrongState {
		worker_id: WorkerId,
		expected: &'static str,
		found: &'static str,
	},

	#[error("executable {0:?} not found on host")]
	NotInstalled(String),

	#[error("recovered output for worker {0} lacks a string session_id")]
	InvalidSession(WorkerId),

	#[error("permission request {request_id} belongs to worker {owner}, not {caller}")]
	WorkerMismatch {
		request_id: RequestId,
		owner: WorkerId,
		caller: WorkerId,
	},

	#[error("wait() called with no active workers")]
	NoActiveWorkers,

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}
