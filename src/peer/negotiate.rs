//! The protocol run that drives two peers to a conflict-free, running mirror

use tandem_rbd::mirror::HostConfig;
use tandem_util::error::*;

use crate::endpoint::PeerEndpoint;

/// Allocation attempts before a negotiation is declared stuck. Every retry
/// consumes a fresh minor or port from its host, so hitting this ceiling
/// means the conflicts are not races but a misconfigured environment.
const MAX_ALLOCATION_ATTEMPTS: usize = 64;

enum Step {
	/// Allocate local resources and bring the local side up
	NeedLocal,
	/// The local side is up under these configs; ask the peer to join
	NeedRemote {
		mine: HostConfig,
		theirs: HostConfig,
	},
}

/// Negotiate a mirror between `local` and `remote` and bring it up on both
/// sides. `remote` may be the same endpoint as `local` (both sides of the
/// mirror on one host) — that case is what the outer retry level exists for.
///
/// The run is a two-level retry loop. The inner level (`NeedLocal`) handles
/// the local side losing minor/port races against other activity on its
/// host: reallocate and try again. The outer level handles the remote side
/// failing *because of* the freshly started local side (or a symmetric
/// choice of resources): the remote reallocates, the local side comes down,
/// and both try again. `stop` is identified by uuid, so tearing the local
/// side down with an already-stale remote config is fine.
///
/// Transient errors never escape this loop. Fatal errors abort it, and any
/// mirror started locally along the way is stopped before they propagate.
pub async fn negotiate(local: &dyn PeerEndpoint, remote: &dyn PeerEndpoint) -> Result<(), Error> {
	let ours = local.version_exchange("").await?;
	let theirs = remote.version_exchange(&ours).await?;
	if ours != theirs {
		return Err(Error::VersionMismatch(ours, theirs));
	}

	let mut remote_config: Option<HostConfig> = None;
	let mut attempts = 0;
	let mut step = Step::NeedLocal;

	loop {
		step = match step {
			Step::NeedLocal => {
				attempts += 1;
				if attempts > MAX_ALLOCATION_ATTEMPTS {
					return Err(Error::Message(format!(
						"Negotiation did not converge after {} allocation attempts",
						MAX_ALLOCATION_ATTEMPTS
					)));
				}

				let mine = local.soft_allocate().await?;
				let theirs = match remote_config.clone() {
					Some(config) => config,
					None => {
						let config = remote.soft_allocate().await?;
						remote_config = Some(config.clone());
						config
					}
				};

				match local.start(&mine, &theirs).await {
					Ok(()) => Step::NeedRemote { mine, theirs },
					Err(e) if e.is_transient() => {
						info!("Local start lost a resource race, reallocating: {}", e);
						Step::NeedLocal
					}
					Err(e) => return Err(e),
				}
			}

			Step::NeedRemote { mine, theirs } => {
				match remote.start(&theirs, &mine).await {
					Ok(()) => return Ok(()),
					Err(e) if e.is_transient() => {
						info!("Peer start collided with our side, renegotiating: {}", e);
						remote_config = Some(remote.soft_allocate().await?);
						local.stop(&mine, &theirs).await?;
						Step::NeedLocal
					}
					Err(e) => {
						// fatal: leave nothing running behind us
						if let Err(stop_err) = local.stop(&mine, &theirs).await {
							warn!("Could not stop local side while aborting: {}", stop_err);
						}
						return Err(e);
					}
				}
			}
		};
	}
}

#[cfg(test)]
mod tests {
	use std::path::Path;
	use std::sync::atomic::{AtomicBool, Ordering};
	use std::sync::Arc;

	use async_trait::async_trait;

	use tandem_host::loopdev::LoopControl;
	use tandem_host::sim::SimHost;
	use tandem_rbd::control::RbdControl;
	use tandem_rbd::mirror::MirrorConfig;
	use tandem_rbd::sim::RbdSim;

	use crate::peer::Peer;

	use super::*;

	const UUID: &str = "e93256e2";

	fn sim_peer(name: &str) -> (Arc<RbdSim>, Arc<SimHost>, Peer) {
		let rbd = Arc::new(RbdSim::new());
		let host = Arc::new(SimHost::new(name));
		let peer = Peer::new(
			rbd.clone(),
			host.clone(),
			host.clone(),
			Path::new("/dev/xvda"),
			UUID,
			"/dev/drbd",
		);
		(rbd, host, peer)
	}

	#[tokio::test]
	async fn test_two_fresh_peers_converge_without_retries() {
		let (rbd_l, _, peer_l) = sim_peer("alpha");
		let (rbd_r, _, peer_r) = sim_peer("bravo");

		negotiate(&peer_l, &peer_r).await.unwrap();

		for rbd in [&rbd_l, &rbd_r] {
			let mirrors = rbd.mirrors();
			assert_eq!(mirrors.len(), 1);
			assert_eq!(mirrors[0].uuid, UUID);
		}

		// nothing conflicted, so both sides kept their first allocation
		let mirrors = rbd_l.mirrors();
		assert_eq!(mirrors[0].local().minor(), Some(1));
		assert_eq!(mirrors[0].local().port(), 7789);
		assert_eq!(mirrors[0].peer().minor(), Some(1));
	}

	#[tokio::test]
	async fn test_single_host_negotiation_goes_around_the_outer_loop() {
		let (rbd, _, peer) = sim_peer("alpha");

		negotiate(&peer, &peer).await.unwrap();

		let mirrors = rbd.mirrors();
		assert_eq!(mirrors.len(), 1);
		assert_eq!(mirrors[0].uuid, UUID);

		// both sides share the host, so the negotiated minors and ports
		// must differ; the stored view is the last writer's (the remote's)
		let (remote_side, local_side) = (mirrors[0].local(), mirrors[0].peer());
		assert_eq!(remote_side.minor(), Some(2));
		assert_eq!(local_side.minor(), Some(1));
		assert_ne!(remote_side.port(), local_side.port());

		// the first remote start must have collided and forced both sides
		// to be redone with later ports
		assert_eq!(remote_side.port(), 7791);
		assert_eq!(local_side.port(), 7792);
	}

	#[tokio::test]
	async fn test_version_mismatch_aborts_before_allocating() {
		let rbd_l = Arc::new(RbdSim::with_version("a"));
		let rbd_r = Arc::new(RbdSim::with_version("b"));
		let host_l = Arc::new(SimHost::new("alpha"));
		let host_r = Arc::new(SimHost::new("bravo"));
		let peer_l = Peer::new(
			rbd_l.clone(),
			host_l.clone(),
			host_l.clone(),
			Path::new("/dev/xvda"),
			UUID,
			"/dev/drbd",
		);
		let peer_r = Peer::new(
			rbd_r.clone(),
			host_r.clone(),
			host_r.clone(),
			Path::new("/dev/xvda"),
			UUID,
			"/dev/drbd",
		);

		match negotiate(&peer_l, &peer_r).await {
			Err(Error::VersionMismatch(ours, theirs)) => {
				assert_eq!(ours, "a");
				assert_eq!(theirs, "b");
			}
			other => panic!("expected VersionMismatch, got {:?}", other.map(|_| ())),
		}

		assert!(rbd_l.mirrors().is_empty());
		assert!(rbd_r.mirrors().is_empty());
		// no local devices were allocated, so no loops linger
		assert!(host_l.list().await.unwrap().is_empty());
		assert!(host_r.list().await.unwrap().is_empty());
	}

	/// Endpoint wrapper that grabs the minor its inner peer just allocated,
	/// reproducing another actor winning the race between allocation and
	/// start
	struct MinorThief<'a> {
		inner: &'a Peer,
		rbd: Arc<RbdSim>,
		fired: AtomicBool,
	}

	#[async_trait]
	impl<'a> PeerEndpoint for MinorThief<'a> {
		async fn version_exchange(&self, theirs: &str) -> Result<String, Error> {
			self.inner.version_exchange(theirs).await
		}

		async fn soft_allocate(&self) -> Result<HostConfig, Error> {
			let config = self.inner.soft_allocate().await?;
			if !self.fired.swap(true, Ordering::SeqCst) {
				let mut stolen = config.clone();
				stolen.address.set_port(9999);
				self.rbd
					.start(&MirrorConfig {
						uuid: "squatter".to_string(),
						hosts: [stolen.clone(), stolen],
					})
					.await?;
			}
			Ok(config)
		}

		async fn start(&self, mine: &HostConfig, theirs: &HostConfig) -> Result<(), Error> {
			self.inner.start(mine, theirs).await
		}

		async fn stop(&self, mine: &HostConfig, theirs: &HostConfig) -> Result<(), Error> {
			self.inner.stop(mine, theirs).await
		}
	}

	#[tokio::test]
	async fn test_lost_minor_race_is_retried_with_the_next_minor() {
		let (rbd_l, _, peer_l) = sim_peer("alpha");
		let (rbd_r, _, peer_r) = sim_peer("bravo");
		let local = MinorThief {
			inner: &peer_l,
			rbd: rbd_l.clone(),
			fired: AtomicBool::new(false),
		};

		negotiate(&local, &peer_r).await.unwrap();

		// the squatter kept minor 1, the negotiation moved on to minor 2
		let mirrors = rbd_l.mirrors();
		assert_eq!(mirrors.len(), 2);
		let ours = mirrors.iter().find(|m| m.uuid == UUID).unwrap();
		assert_eq!(ours.local().minor(), Some(2));
		assert_eq!(rbd_r.mirrors().len(), 1);
	}
}
