//! The process-wide event channel.
//!
//! # Mental model
//!
//! - There is exactly one [`EventBus`] per running manager. Every broker and every
//!   registry-driven runner-completion task holds a clone of its [`EventSender`] half;
//!   there is at most one [`EventReceiver`], held by whichever task currently executes
//!   `wait()`.
//! - The channel is unbounded FIFO: publishers never block on a full channel, which keeps
//!   `approve()` (a publisher-adjacent path) from ever stalling on registry-side backpressure.
//! - [`EventReceiver::recv_before_deadline`] is the sole read primitive; it races the
//!   channel against a poll-horizon sleep so a receiver that is not yet bound at publish
//!   time (or a notification lost to a scheduling race) cannot hang `wait()` forever.
//!
//! # Invariants
//!
//! 1. The event channel MUST have at most one live receiver at a time.
//!    - Enforced in: `EventBus::channel` (receiver is not `Clone`)
//! 2. A publish MUST never block the publisher.
//!    - Enforced in: `mpsc::unbounded_channel` (unbounded by construction)

use std::time::Duration;

use fleet_proto::{CompletedTask, FailedTask, PermissionRequest, WorkerId};
use tokio::sync::mpsc;

/// A tagged notification carried on the event bus.
#[derive(Debug, Clone)]
pub enum Event {
	/// A worker completed successfully.
	Completion(WorkerId, CompletedTask),
	/// A worker failed.
	Failure(WorkerId, FailedTask),
	/// A worker is blocked on a permission decision.
	PermissionRequested(WorkerId, PermissionRequest),
}

impl Event {
	/// The worker this event concerns.
	#[must_use]
	pub fn worker_id(&self) -> WorkerId {
		match self {
			Event::Completion(id, _) | Event::Failure(id, _) | Event::PermissionRequested(id, _) => *id,
		}
	}
}

/// The writer half. Cheap to clone; every broker and runner-completion task owns one.
#[derive(Clone)]
pub struct EventSender(mpsc::UnboundedSender<Event>);

impl EventSender {
	/// Publish an event. Never blocks; fails only if the receiver has been dropped, which
	/// happens solely at process shutdown and is not an error worth surfacing.
	pub fn publish(&self, event: Event) {
		if self.0.send(event).is_err() {
			tracing::debug!("event published after receiver shutdown, dropping");
		}
	}
}

/// The single-consumer read half, held by whichever call is currently inside `wait()`.
pub struct EventReceiver(mpsc::UnboundedReceiver<Event>);

impl EventReceiver {
	/// Wait for the next event, or `None` if `horizon` elapses first.
	///
	/// This is the poll-horizon primitive: a bare `recv().await` would hang forever if a
	/// notification was published before this receiver was polled for the first time in a
	/// lost-wakeup window. Re-checking registry state every `horizon` bounds that window.
	pub async fn recv_before_deadline(&mut self, horizon: Duration) -> Option<Event> {
		tokio::time::timeout(horizon, self.0.recv()).await.ok().flatten()
	}

	/// Drain every event currently queued without blocking.
	pub fn drain_ready(&mut self) -> Vec<Event> {
		let mut events = Vec::new();
		while let Ok(event) = self.0.try_recv() {
			events.push(event);
		}
		events
	}
}

/// Owns the single process-wide channel; construct once per manager.
pub struct EventBus;

impl EventBus {
	/// Create a fresh sender/receiver pair.
	#[must_use]
	pub fn channel() -> (EventSender, EventReceiver) {
		let (tx, rx) = mpsc::unbounded_channel();
		(EventSender(tx), EventReceiver(rx))
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use fleet_proto::{FailedTask, RequestId};

	use super::*;

	fn worker_id() -> WorkerId {
		WorkerId::new()
	}

	#[tokio::test]
	async fn publish_then_receive() {
		let (tx, mut rx) = EventBus::channel();
		let id = worker_id();
		tx.publish(Event::Failure(
			id,
			FailedTask {
				worker_id: id,
				returncode: 1,
				conversation_history_file_path: None,
				error_hint: "boom".into(),
			},
		));

		let event = rx.recv_before_deadline(Duration::from_secs(1)).await;
		assert!(matches!(event, Some(Event::Failure(wid, _)) if wid == id));
	}

	#[tokio::test]
	async fn deadline_elapses_without_event() {
		let (_tx, mut rx) = EventBus::channel();
		let event = rx.recv_before_deadline(Duration::from_millis(20)).await;
		assert!(event.is_none());
	}

	#[tokio::test]
	async fn drain_ready_collects_all_queued_events() {
		let (tx, mut rx) = EventBus::channel();
		let id = worker_id();
		for i in 0..3 {
			tx.publish(Event::PermissionRequested(
				id,
				PermissionRequest {
					request_id: RequestId(format!("r{i}")),
					worker_id: id,
					tool: "Bash".into(),
					input: serde_json::json!({}),
				},
			));
		}
		let drained = rx.drain_ready();
		assert_eq!(drained.len(), 3);
	}
}
