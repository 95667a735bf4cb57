//! The operations a negotiation partner exposes, whether it lives in this
//! process or behind the HTTP shim

use async_trait::async_trait;

use tandem_rbd::mirror::HostConfig;
use tandem_util::error::Error;

/// One end of a mirror negotiation.
///
/// The negotiator only ever talks through this trait, so the same protocol
/// run works against an in-process peer, a remote proxy, or both sides being
/// one and the same endpoint (the single-host case).
#[async_trait]
pub trait PeerEndpoint: Send + Sync {
	/// Report our driver version; `theirs` is informational
	async fn version_exchange(&self, theirs: &str) -> Result<String, Error>;

	/// Allocate a fresh set of local resources, replacing (and releasing)
	/// whatever the previous call allocated. Calling this again means "that
	/// config did not work out, give me a different one".
	async fn soft_allocate(&self) -> Result<HostConfig, Error>;

	/// Hand the assembled mirror config to the local driver
	async fn start(&self, mine: &HostConfig, theirs: &HostConfig) -> Result<(), Error>;

	/// Take the mirror identified by our uuid down again
	async fn stop(&self, mine: &HostConfig, theirs: &HostConfig) -> Result<(), Error>;
}
