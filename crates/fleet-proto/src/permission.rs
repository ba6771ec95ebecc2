use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{RequestId, WorkerId};

/// Worker → broker wire request: `{"request_id", "worker_id", "tool", "input"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
	pub request_id: RequestId,
	pub worker_id: WorkerId,
	pub tool: String,
	pub input: Value,
}

/// Broker → worker wire decision: `{"request_id", "allow", "updatedInput"?, "message"?}`.
///
/// Field names are preserved literally on the wire: `updatedInput` is camelCase because
/// the worker side expects it verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionDecision {
	pub request_id: RequestId,
	pub allow: bool,
	#[serde(skip_serializing_if = "Option::is_none", rename = "updatedInput")]
	pub updated_input: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

impl PermissionDecision {
	/// Build an allow decision. `updatedInput` is the original input blob, passed through
	/// verbatim — the broker never alters it.
	#[must_use]
	pub fn allow(request_id: RequestId, input: Value) -> Self {
		Self {
			request_id,
			allow: true,
			updated_input: Some(input),
			message: None,
		}
	}

	/// Build a deny decision with the given message, or the default denial text.
	#[must_use]
	pub fn deny(request_id: RequestId, message: impl Into<Option<String>>) -> Self {
		Self {
			request_id,
			allow: false,
			updated_input: None,
			message: Some(message.into().unwrap_or_else(|| "Permission denied by user".to_string())),
		}
	}
}
