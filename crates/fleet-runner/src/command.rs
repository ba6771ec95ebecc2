//! Argument-vector and environment assembly for the worker subprocess.

use fleet_proto::{THINKING_BUDGET_TOKENS, WorkerOptions};

/// Environment variable carrying the broker's endpoint path into the worker's environment.
pub const ENV_SOCKET_PATH: &str = "PERM_SOCKET_PATH";
/// Environment variable carrying the worker's identity into the worker's environment.
pub const ENV_WORKER_ID: &str = "WORKER_ID";

/// Build the fixed argument vector described in spec.md §4.3's option table.
///
/// Order: `--resume <session_id>`, `--model`, `--system-prompt` (from `agent_type`),
/// `--settings` (sampling/thinking knobs), then `-p <prompt> --output-format json`.
pub fn build_args(
	prompt: &str,
	agent_type: Option<&str>,
	session_id: Option<&str>,
	options: &WorkerOptions,
) -> Vec<String> {
	let mut args = Vec::new();

	if let Some(session_id) = session_id {
		args.push("--resume".to_string());
		args.push(session_id.to_string());
	}

	if let Some(model) = &options.model {
		args.push("--model".to_string());
		args.push(model.clone());
	}

	if let Some(agent_type) = agent_type {
		args.push("--system-prompt".to_string());
		args.push(format!("You are an agent. this is your description:\n{agent_type}"));
	}

	if let Some(settings) = build_settings_json(options) {
		args.push("--settings".to_string());
		args.push(settings);
	}

	args.push("-p".to_string());
	args.push(prompt.to_string());
	args.push("--output-format".to_string());
	args.push("json".to_string());

	args
}

/// Build the `--settings` JSON blob carrying sampling and thinking knobs, or `None` if no
/// relevant option was set.
fn build_settings_json(options: &WorkerOptions) -> Option<String> {
	let mut map = serde_json::Map::new();

	if let Some(temperature) = options.temperature {
		map.insert("temperature".to_string(), serde_json::json!(temperature));
	}
	if let Some(max_tokens) = options.max_tokens {
		map.insert("maxTokens".to_string(), serde_json::json!(max_tokens));
	}
	if options.thinking == Some(true) {
		map.insert(
			"thinking".to_string(),
			serde_json::json!({ "type": "enabled", "budget_tokens": THINKING_BUDGET_TOKENS }),
		);
	}
	if let Some(top_p) = options.top_p {
		map.insert("topP".to_string(), serde_json::json!(top_p));
	}
	if let Some(top_k) = options.top_k {
		map.insert("topK".to_string(), serde_json::json!(top_k));
	}

	if map.is_empty() {
		None
	} else {
		Some(serde_json::Value::Object(map).to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn args_include_resume_when_session_present() {
		let args = build_args("hello", None, Some("s1"), &WorkerOptions::default());
		assert_eq!(&args[..2], &["--resume".to_string(), "s1".to_string()]);
	}

	#[test]
	fn args_omit_settings_when_nothing_set() {
		let args = build_args("hello", None, None, &WorkerOptions::default());
		assert!(!args.contains(&"--settings".to_string()));
	}

	#[test]
	fn thinking_budget_is_injected() {
		let mut options = WorkerOptions::default();
		options.thinking = Some(true);
		let args = build_args("hello", None, None, &options);
		let idx = args.iter().position(|a| a == "--settings").unwrap();
		assert!(args[idx + 1].contains("10000"));
	}

	#[test]
	fn agent_type_becomes_system_prompt() {
		let args = build_args("hello", Some("reviewer"), None, &WorkerOptions::default());
		let idx = args.iter().position(|a| a == "--system-prompt").unwrap();
		assert!(args[idx + 1].contains("reviewer"));
	}
}
