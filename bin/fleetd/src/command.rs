//! A line-oriented command surface over stdin/stdout.
//!
//! This is explicitly NOT the supervisor RPC surface spec.md §1 places out of scope — that
//! surface is a transport-agnostic request/response contract the core assumes exists. This
//! module is the smallest possible stand-in that lets `fleetd` be run and driven directly,
//! reusing the broker's own newline-delimited JSON framing discipline (spec.md §4.2) at the
//! daemon's outer boundary instead of inventing a second wire format.

use fleet_proto::{ManagerError, RequestId, WorkerId, WorkerOptions};
use fleet_registry::Registry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Command {
	Spawn {
		prompt: String,
		agent_type: Option<String>,
		options: Option<WorkerOptions>,
	},
	Resume {
		worker_id: WorkerId,
		prompt: String,
		options: Option<WorkerOptions>,
	},
	Wait,
	Approve {
		worker_id: WorkerId,
		request_id: RequestId,
		allow: bool,
		message: Option<String>,
	},
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Reply {
	Ok(Value),
	Err { error: String },
}

/// Read commands from `reader` one line at a time, dispatch each against `registry`, and
/// write one JSON reply line per command to `writer`. Returns when the reader reaches EOF.
pub async fn run(
	registry: &Registry,
	reader: impl tokio::io::AsyncRead + Unpin,
	mut writer: impl AsyncWrite + Unpin,
) -> std::io::Result<()> {
	let mut lines = BufReader::new(reader).lines();
	while let Some(line) = lines.next_line().await? {
		if line.trim().is_empty() {
			continue;
		}
		let reply = dispatch(registry, &line).await;
		let mut encoded = serde_json::to_string(&reply).expect("Reply always serializes");
		encoded.push('\n');
		writer.write_all(encoded.as_bytes()).await?;
		writer.flush().await?;
	}
	Ok(())
}

async fn dispatch(registry: &Registry, line: &str) -> Reply {
	let command: Command = match serde_json::from_str(line) {
		Ok(command) => command,
		Err(error) => return Reply::Err { error: format!("invalid command: {error}") },
	};

	let result = handle(registry, command).await;
	match result {
		Ok(value) => Reply::Ok(value),
		Err(error) => Reply::Err { error: error.to_string() },
	}
}

async fn handle(registry: &Registry, command: Command) -> Result<Value, ManagerError> {
	match command {
		Command::Spawn { prompt, agent_type, options } => {
			let worker_id = registry.spawn(prompt, agent_type, options).await?;
			Ok(serde_json::json!({ "worker_id": worker_id }))
		}
		Command::Resume { worker_id, prompt, options } => {
			registry.resume(worker_id, prompt, options).await?;
			Ok(serde_json::json!({ "worker_id": worker_id }))
		}
		Command::Wait => {
			let snapshot = registry.wait().await?;
			Ok(serde_json::to_value(snapshot).expect("WorkerStateSnapshot always serializes"))
		}
		Command::Approve { worker_id, request_id, allow, message } => {
			let outcome = registry.approve(worker_id, request_id, allow, message).await?;
			Ok(serde_json::json!({
				"status": outcome.status,
				"worker_id": outcome.worker_id,
				"request_id": outcome.request_id,
				"tool": outcome.tool,
			}))
		}
	}
}

#[cfg(test)]
mod tests {
	use fleet_registry::RegistryConfig;
	use tempfile::tempdir;

	use super::*;

	#[tokio::test]
	async fn wait_with_no_active_workers_reports_error_reply() {
		let dir = tempdir().unwrap();
		let config = RegistryConfig {
			executable: "claude".to_string(),
			socket_dir: dir.path().join("sockets"),
			logs_dir: dir.path().join("logs"),
			max_active: fleet_proto::MAX_ACTIVE_WORKERS,
		};
		let registry = Registry::new(config).await.unwrap();

		let input = b"{\"op\":\"wait\"}\n".as_slice();
		let mut output = Vec::new();
		run(&registry, input, &mut output).await.unwrap();

		let reply: Value = serde_json::from_slice(&output[..output.len() - 1]).unwrap();
		assert!(reply.get("error").unwrap().as_str().unwrap().contains("no active workers"));
	}

	#[tokio::test]
	async fn malformed_command_reports_error_and_keeps_reading() {
		let dir = tempdir().unwrap();
		let config = RegistryConfig {
			executable: "claude".to_string(),
			socket_dir: dir.path().join("sockets"),
			logs_dir: dir.path().join("logs"),
			max_active: fleet_proto::MAX_ACTIVE_WORKERS,
		};
		let registry = Registry::new(config).await.unwrap();

		let input = b"not json\n{\"op\":\"wait\"}\n".as_slice();
		let mut output = Vec::new();
		run(&registry, input, &mut output).await.unwrap();

		let text = String::from_utf8(output).unwrap();
		assert_eq!(text.lines().count(), 2);
		assert!(text.lines().next().unwrap().contains("invalid command"));
	}
}
