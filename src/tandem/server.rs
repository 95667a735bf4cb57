//! The `server` command: serve negotiation peers until interrupted

use std::sync::Arc;

use tandem_rpc::server::{run_rpc_server, spawn_idle_sweeper, Registry};
use tandem_util::error::Error;

use crate::backend::build_backend;
use crate::ServerOpt;

pub async fn run_server(opt: ServerOpt) -> Result<(), Error> {
	let registry = Arc::new(Registry::new(build_backend(&opt.backend)));
	spawn_idle_sweeper(registry.clone());

	let shutdown = async {
		if let Err(e) = tokio::signal::ctrl_c().await {
			error!("Could not wait for the interrupt signal: {}", e);
		}
		info!("Interrupt received, shutting down");
	};
	run_rpc_server(registry.clone(), opt.bind_addr, shutdown).await?;

	// whatever is still registered belongs to abandoned negotiations
	registry.shutdown_all().await;
	Ok(())
}
