//! The capability surface shared by the real driver and the simulator

use async_trait::async_trait;

use tandem_util::error::Error;

use crate::mirror::MirrorConfig;

/// Driving the replicated block driver.
///
/// `start` either brings the mirror fully up (configured, attached and
/// connected) or leaves no partial state behind. Its transient failures —
/// `Error::MinorInUse`, `Error::PortInUse` — mean the config lost a race for
/// a host-local resource and a reallocation should be attempted; anything
/// else is fatal. `stop` is idempotent and takes a partially-up mirror down
/// cleanly.
#[async_trait]
pub trait RbdControl: Send + Sync {
	/// The driver version, compared across peers before negotiating
	async fn version(&self) -> Result<String, Error>;

	/// Advisory: the lowest minor number currently free to host a mirror
	async fn free_minor(&self) -> Result<u32, Error>;

	async fn start(&self, config: &MirrorConfig) -> Result<(), Error>;

	async fn stop(&self, config: &MirrorConfig) -> Result<(), Error>;
}
