//! `fleetd` — the worker-fleet manager daemon binary.
//!
//! Wires `fleet-registry`'s `Registry` behind a minimal line-oriented command surface on
//! stdin/stdout and shuts it down cleanly on `SIGINT`. See `command.rs` for why this is not
//! the supervisor RPC surface spec.md §1 places out of scope.

mod cli;
mod command;

use clap::Parser;
use fleet_registry::{Registry, RegistryConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = cli::Args::parse();

	tracing_subscriber::fmt()
		.with_max_level(if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
		.init();

	let config = RegistryConfig {
		executable: args.executable.clone(),
		socket_dir: args.resolved_socket_dir(),
		logs_dir: args.resolved_logs_dir(),
		max_active: args.max_active,
	};

	tracing::info!(
		executable = %config.executable,
		socket_dir = %config.socket_dir.display(),
		logs_dir = %config.logs_dir.display(),
		max_active = config.max_active,
		"starting fleetd"
	);

	let registry = Registry::new(config).await?;
	let stdin = tokio::io::stdin();
	let stdout = tokio::io::stdout();

	tokio::select! {
		result = command::run(&registry, stdin, stdout) => {
			result?;
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("received interrupt, shutting down");
		}
	}

	registry.shutdown().await;
	Ok(())
}
