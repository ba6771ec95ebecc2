//! Heuristic mapping from captured stderr to a short, actionable `FailedTask::error_hint`.

use fleet_proto::ERROR_HINT_MAX_LEN;

/// Classify stderr into a short human-readable hint, per spec.md §4.3.
///
/// Matches the first substring that applies, case-insensitively; falls back to a truncated
/// copy of stderr, and then to `"Exit code <n>"` if stderr is empty.
pub fn classify(stderr: &[u8], exit_code: i32) -> String {
	let text = String::from_utf8_lossy(stderr);
	let lower = text.to_lowercase();

	const RULES: &[(&str, &str)] = &[
		("timeout", "Timed out."),
		("permission", "Permission denied."),
		("command not found", "Executable missing."),
		("connection", "Connection failed."),
		("failed to connect", "Connection failed."),
	];

	for (pattern, hint) in RULES {
		if lower.contains(pattern) {
			return (*hint).to_string();
		}
	}

	if text.trim().is_empty() {
		return format!("Exit code {exit_code}");
	}

	text.chars()
		.map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
		.take(ERROR_HINT_MAX_LEN)
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn matches_connection_refused() {
		assert_eq!(classify(b"Connection refused to broker", 2), "Connection failed.");
	}

	#[test]
	fn falls_back_to_exit_code_when_stderr_empty() {
		assert_eq!(classify(b"", 7), "Exit code 7");
	}

	#[test]
	fn truncates_and_elides_newlines() {
		let stderr = format!("{}\nsecond line", "x".repeat(200));
		let hint = classify(stderr.as_bytes(), 1);
		assert_eq!(hint.len(), ERROR_HINT_MAX_LEN);
		assert!(!hint.contains('\n'));
	}

	#[test]
	fn matches_permission_case_insensitively() {
		assert_eq!(classify(b"PERMISSION denied for /etc", 1), "Permission denied.");
	}

	#[test]
	fn truncates_multibyte_stderr_without_panicking() {
		let stderr = "é".repeat(200);
		let hint = classify(stderr.as_bytes(), 1);
		assert_eq!(hint.chars().count(), ERROR_HINT_MAX_LEN);
	}
}
