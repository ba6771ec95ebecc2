use serde::{Deserialize, Serialize};

/// The fixed option set recognized by the subprocess runner when assembling a worker's
/// argument vector. Every field is optional; absent fields are simply omitted from the
/// command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerOptions {
	/// Inference model name.
	pub model: Option<String>,
	/// Sampling temperature in `[0.0, 1.0]`.
	pub temperature: Option<f64>,
	/// Upper bound on generated tokens.
	pub max_tokens: Option<u32>,
	/// Enables extended reasoning, emitting a structured thinking-budget block.
	pub thinking: Option<bool>,
	/// Nucleus sampling cutoff.
	pub top_p: Option<f64>,
	/// Top-k sampling cutoff.
	pub top_k: Option<u32>,
}

/// Token budget assigned to the thinking block when `WorkerOptions::thinking` is set.
///
/// Not specified in the distilled spec; carried over from the original implementation's
/// `{"type": "enabled", "budget_tokens": 10000}` settings block.
pub const THINKING_BUDGET_TOKENS: u32 = 10_000;
