//! In-memory stand-in for the kernel driver.
//!
//! The simulator keeps the set of started mirrors and refuses a new one
//! whose local side would collide with an already-started local side on the
//! same host — the same contract the real driver enforces, surfaced through
//! the same transient error kinds. The negotiation test suites are built on
//! these failure predicates.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use tandem_util::error::Error;

use crate::control::RbdControl;
use crate::mirror::MirrorConfig;

pub const SIM_VERSION: &str = "8.0.14";

pub struct RbdSim {
	version: String,
	state: Mutex<SimState>,
}

#[derive(Default)]
struct SimState {
	configs: BTreeMap<String, MirrorConfig>,
}

impl RbdSim {
	pub fn new() -> Self {
		Self::with_version(SIM_VERSION)
	}

	pub fn with_version(version: &str) -> Self {
		Self {
			version: version.to_string(),
			state: Mutex::new(SimState::default()),
		}
	}

	/// Snapshot of the started mirrors, for inspection by tests
	pub fn mirrors(&self) -> Vec<MirrorConfig> {
		self.state.lock().unwrap().configs.values().cloned().collect()
	}
}

impl Default for RbdSim {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl RbdControl for RbdSim {
	async fn version(&self) -> Result<String, Error> {
		Ok(self.version.clone())
	}

	async fn free_minor(&self) -> Result<u32, Error> {
		let state = self.state.lock().unwrap();
		let used = state
			.configs
			.values()
			.filter_map(|c| c.local().minor())
			.collect::<Vec<_>>();
		let mut minor = 1;
		while used.contains(&minor) {
			minor += 1;
		}
		Ok(minor)
	}

	async fn start(&self, config: &MirrorConfig) -> Result<(), Error> {
		let mut state = self.state.lock().unwrap();
		let new = config.local();
		for existing in state.configs.values() {
			let old = existing.local();
			if old.name != new.name {
				continue;
			}
			if old.minor() == new.minor() {
				return Err(Error::MinorInUse(new.minor().unwrap_or(0)));
			}
			if old.port() == new.port() {
				return Err(Error::PortInUse(new.port()));
			}
		}
		debug!(
			"Simulated mirror {} up: {} on {}",
			config.uuid, new.device, new.address
		);
		state.configs.insert(config.uuid.clone(), config.clone());
		Ok(())
	}

	async fn stop(&self, config: &MirrorConfig) -> Result<(), Error> {
		let mut state = self.state.lock().unwrap();
		if state.configs.remove(&config.uuid).is_some() {
			debug!("Simulated mirror {} down", config.uuid);
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mirror::tests::host_config;

	fn mirror(uuid: &str, minor: u32, port: u16) -> MirrorConfig {
		MirrorConfig {
			uuid: uuid.to_string(),
			hosts: [
				host_config("alpha", minor, port),
				host_config("bravo", minor, port),
			],
		}
	}

	#[tokio::test]
	async fn test_minor_conflict() {
		let sim = RbdSim::new();
		sim.start(&mirror("m1", 1, 8080)).await.unwrap();
		match sim.start(&mirror("m2", 1, 8081)).await {
			Err(Error::MinorInUse(1)) => (),
			other => panic!("expected MinorInUse, got {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_port_conflict() {
		let sim = RbdSim::new();
		sim.start(&mirror("m1", 1, 8080)).await.unwrap();
		match sim.start(&mirror("m2", 2, 8080)).await {
			Err(Error::PortInUse(8080)) => (),
			other => panic!("expected PortInUse, got {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_no_conflict_across_hosts() {
		let sim = RbdSim::new();
		sim.start(&mirror("m1", 1, 8080)).await.unwrap();

		let mut other_host = mirror("m2", 1, 8080);
		other_host.hosts[0].name = "charlie".to_string();
		sim.start(&other_host).await.unwrap();
		assert_eq!(sim.mirrors().len(), 2);
	}

	#[tokio::test]
	async fn test_stop_is_idempotent() {
		let sim = RbdSim::new();
		let m = mirror("m1", 1, 8080);
		sim.stop(&m).await.unwrap();
		sim.start(&m).await.unwrap();
		sim.stop(&m).await.unwrap();
		sim.stop(&m).await.unwrap();
		assert!(sim.mirrors().is_empty());
	}

	#[tokio::test]
	async fn test_free_minor_tracks_started_mirrors() {
		let sim = RbdSim::new();
		assert_eq!(sim.free_minor().await.unwrap(), 1);
		sim.start(&mirror("m1", 1, 8080)).await.unwrap();
		assert_eq!(sim.free_minor().await.unwrap(), 2);
		sim.stop(&mirror("m1", 1, 8080)).await.unwrap();
		assert_eq!(sim.free_minor().await.unwrap(), 1);
	}
}
