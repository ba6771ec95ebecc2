use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque unique identity for one worker, stable for the lifetime of the registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(Uuid);

impl WorkerId {
	/// Mint a fresh identity.
	#[must_use]
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for WorkerId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for WorkerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::str::FromStr for WorkerId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// Opaque request identity minted by the worker; the broker treats it only as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}
