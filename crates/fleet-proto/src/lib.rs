//! Domain and wire types shared by every crate in the worker-fleet manager.
//!
//! - `ids`: opaque identity newtypes (`WorkerId`, `RequestId`).
//! - `options`: the fixed option set accepted by `spawn`/`resume`.
//! - `task`: completion/failure records produced by a runner and consumed by the registry.
//! - `permission`: the IPC wire payloads exchanged between broker and worker.
//! - `error`: `ManagerError`, the single error enum surfaced by every public operation.

mod error;
mod ids;
mod options;
mod permission;
mod task;

pub use error::ManagerError;
pub use ids::{RequestId, WorkerId};
pub use options::{THINKING_BUDGET_TOKENS, WorkerOptions};
pub use permission::{PermissionDecision, PermissionRequest};
pub use task::{CompletedTask, CompletionRecord, FailedTask, WorkerStateSnapshot};

/// Hard concurrency cap: at most this many workers may be `Active` at once.
pub const MAX_ACTIVE_WORKERS: usize = 10;

/// Per-broker cap on served permission requests before every further request is denied.
pub const MAX_REQUESTS_PER_BROKER: u64 = 100;

/// I/O timeout enforced on every broker read and write, in seconds.
pub const BROKER_IO_TIMEOUT_SECS: u64 = 30;

/// Upper bound on how long `wait()` may sleep without re-examining registry state.
pub const WAIT_POLL_HORIZON_SECS: u64 = 5;

/// Maximum length of a `FailedTask::error_hint` string.
pub const ERROR_HINT_MAX_LEN: usize = 150;
