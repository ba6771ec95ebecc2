use std::path::PathBuf;

use clap::Parser;
use fleet_proto::MAX_ACTIVE_WORKERS;

/// `fleetd` command line arguments.
///
/// Mirrors `crates/broker/broker-bin/src/main.rs`'s flags-only configuration surface: no
/// on-disk config file, because spec.md names none.
#[derive(Parser, Debug)]
#[command(name = "fleetd")]
#[command(about = "Worker-fleet manager daemon")]
pub struct Args {
	/// Directory the per-worker IPC endpoints are created under.
	#[arg(long, value_name = "DIR")]
	pub socket_dir: Option<PathBuf>,

	/// Directory per-worker output files are persisted under.
	#[arg(long, value_name = "DIR")]
	pub logs_dir: Option<PathBuf>,

	/// Worker executable resolved against `PATH`.
	#[arg(long, default_value = "claude")]
	pub executable: String,

	/// Maximum number of simultaneously `Active` workers.
	#[arg(long, default_value_t = MAX_ACTIVE_WORKERS)]
	pub max_active: usize,

	/// Raise the tracing max level from INFO to DEBUG.
	#[arg(short, long)]
	pub verbose: bool,
}

impl Args {
	/// Resolve unset directories to `$XDG_STATE_HOME/fleetd` (or `~/.local/state/fleetd`)
	/// subdirectories, matching the teacher's `xeno_broker_proto::paths::default_socket_path`
	/// fallback-to-state-dir convention.
	pub fn resolved_socket_dir(&self) -> PathBuf {
		self.socket_dir.clone().unwrap_or_else(|| default_state_dir().join("sockets"))
	}

	pub fn resolved_logs_dir(&self) -> PathBuf {
		self.logs_dir.clone().unwrap_or_else(|| default_state_dir().join("logs"))
	}
}

fn default_state_dir() -> PathBuf {
	std::env::var_os("XDG_STATE_HOME")
		.map(PathBuf::from)
		.or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/state")))
		.unwrap_or_else(|| PathBuf::from("/tmp"))
		.join("fleetd")
}
