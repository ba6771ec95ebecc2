//! Per-worker state held by the registry.

use std::sync::Arc;

use fleet_broker::Broker;
use fleet_proto::{CompletedTask, FailedTask};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The registry's view of one worker. Mirrors spec.md §3's `Worker` entity: the optional
/// fields spec.md describes (task handle, completion record, broker reference) are modeled
/// here as the payload of whichever variant currently applies, so "no completion record
/// while `Active`" is a type-level guarantee rather than a runtime check.
pub(crate) enum WorkerState {
	Active {
		broker: Arc<Broker>,
		broker_cancel: CancellationToken,
		broker_task: JoinHandle<()>,
		runner_task: JoinHandle<()>,
		agent_type: Option<String>,
	},
	Completed {
		task: CompletedTask,
		agent_type: Option<String>,
	},
	Failed {
		task: FailedTask,
		agent_type: Option<String>,
	},
}

impl WorkerState {
	/// The state name as spec.md §7's `WrongState` wants it reported.
	pub(crate) fn name(&self) -> &'static str {
		match self {
			WorkerState::Active { .. } => "Active",
			WorkerState::Completed { .. } => "Completed",
			WorkerState::Failed { .. } => "Failed",
		}
	}

	pub(crate) fn is_active(&self) -> bool {
		matches!(self, WorkerState::Active { .. })
	}
}

/// The outcome a runner task hands back to the registry once a subprocess has exited.
pub(crate) enum Outcome {
	Completed(CompletedTask),
	Failed(FailedTask),
}
