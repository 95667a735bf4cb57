//! The stateful negotiation endpoint owning this host's side of a mirror

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use tandem_host::loopdev::LoopControl;
use tandem_host::probe::Host;
use tandem_rbd::control::RbdControl;
use tandem_rbd::mirror::{HostConfig, MirrorConfig};
use tandem_util::error::*;

use crate::device::LocalDevice;
use crate::endpoint::PeerEndpoint;

/// A peer is created per negotiation client. It owns at most one
/// `LocalDevice` (the resources it currently advertises) and remembers which
/// mirrors it has brought up, so they can be taken down when the peer goes
/// away. All operations are serialized by the peer's own mutex.
pub struct Peer {
	rbd: Arc<dyn RbdControl>,
	host: Arc<dyn Host>,
	loops: Arc<dyn LoopControl>,
	disk: PathBuf,
	uuid: String,
	device_prefix: String,
	state: Mutex<PeerState>,
}

#[derive(Default)]
struct PeerState {
	current_local: Option<LocalDevice>,
	active_mirrors: HashMap<String, MirrorConfig>,
}

impl Peer {
	pub fn new(
		rbd: Arc<dyn RbdControl>,
		host: Arc<dyn Host>,
		loops: Arc<dyn LoopControl>,
		disk: &Path,
		uuid: &str,
		device_prefix: &str,
	) -> Self {
		Self {
			rbd,
			host,
			loops,
			disk: disk.to_path_buf(),
			uuid: uuid.to_string(),
			device_prefix: device_prefix.to_string(),
			state: Mutex::new(PeerState::default()),
		}
	}

	pub fn uuid(&self) -> &str {
		&self.uuid
	}

	pub fn disk(&self) -> &Path {
		&self.disk
	}

	/// Walk away leaving everything in place: the mirrors this peer brought
	/// up keep running and the resources backing them stay with the kernel.
	/// Used when the broker process exits after a successful negotiation.
	pub async fn forget(&self) {
		let mut state = self.state.lock().await;
		state.active_mirrors.clear();
		if let Some(device) = state.current_local.take() {
			device.hand_over();
		}
	}

	/// Take down everything this peer is responsible for: mirrors it
	/// started, and the resources it currently advertises. Used when the
	/// client disposes the peer or its registration times out.
	pub async fn shutdown(&self) {
		let mut state = self.state.lock().await;
		for (uuid, config) in state.active_mirrors.drain() {
			if let Err(e) = self.rbd.stop(&config).await {
				warn!("Could not stop mirror {} during shutdown: {}", uuid, e);
			}
		}
		if let Some(device) = state.current_local.take() {
			if let Err(e) = device.release().await {
				warn!("Could not release local device during shutdown: {}", e);
			}
		}
	}
}

#[async_trait]
impl PeerEndpoint for Peer {
	async fn version_exchange(&self, theirs: &str) -> Result<String, Error> {
		let mine = self.rbd.version().await?;
		debug!("Version exchange: ours {}, theirs {}", mine, theirs);
		Ok(mine)
	}

	async fn soft_allocate(&self) -> Result<HostConfig, Error> {
		let mut state = self.state.lock().await;
		if let Some(previous) = state.current_local.take() {
			previous.release().await?;
		}
		let device = LocalDevice::allocate(
			&*self.rbd,
			self.host.clone(),
			self.loops.clone(),
			&self.disk,
			&self.device_prefix,
		)
		.await?;
		let config = device.host_config().clone();
		state.current_local = Some(device);
		Ok(config)
	}

	async fn start(&self, mine: &HostConfig, theirs: &HostConfig) -> Result<(), Error> {
		let mut state = self.state.lock().await;
		let config = MirrorConfig {
			uuid: self.uuid.clone(),
			hosts: [mine.clone(), theirs.clone()],
		};
		self.rbd.start(&config).await?;
		state.active_mirrors.insert(config.uuid.clone(), config);
		Ok(())
	}

	async fn stop(&self, mine: &HostConfig, theirs: &HostConfig) -> Result<(), Error> {
		let mut state = self.state.lock().await;
		let config = MirrorConfig {
			uuid: self.uuid.clone(),
			hosts: [mine.clone(), theirs.clone()],
		};
		self.rbd.stop(&config).await?;
		state.active_mirrors.remove(&config.uuid);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tandem_host::sim::SimHost;
	use tandem_rbd::sim::RbdSim;

	fn sim_peer(uuid: &str) -> (Arc<RbdSim>, Arc<SimHost>, Peer) {
		let rbd = Arc::new(RbdSim::new());
		let host = Arc::new(SimHost::new("alpha"));
		let peer = Peer::new(
			rbd.clone(),
			host.clone(),
			host.clone(),
			Path::new("/dev/xvda"),
			uuid,
			"/dev/drbd",
		);
		(rbd, host, peer)
	}

	#[tokio::test]
	async fn test_soft_allocate_replaces_previous_device() {
		let (_rbd, host, peer) = sim_peer("m1");

		let first = peer.soft_allocate().await.unwrap();
		let second = peer.soft_allocate().await.unwrap();

		// the replacement must be usable alongside the first one
		assert_ne!(first.port(), second.port());
		// and the first one's resources must be gone
		assert_eq!(host.list().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_shutdown_stops_mirrors_and_frees_resources() {
		let (rbd, host, peer) = sim_peer("m1");

		let mine = peer.soft_allocate().await.unwrap();
		let mut theirs = mine.clone();
		theirs.name = "bravo".to_string();
		peer.start(&mine, &theirs).await.unwrap();
		assert_eq!(rbd.mirrors().len(), 1);

		peer.shutdown().await;
		assert!(rbd.mirrors().is_empty());
		assert!(host.list().await.unwrap().is_empty());
	}
}
