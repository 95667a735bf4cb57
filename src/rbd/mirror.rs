//! Describing one mirror: the agreed-upon resources of both of its sides

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One side of a mirror, as advertised by the peer that allocated it.
/// Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
	/// Host name the driver uses to recognize its own side
	pub name: String,
	/// Replicated device node, `<prefix>/<minor>`
	pub device: String,
	/// The backing disk being mirrored
	pub disk: PathBuf,
	/// Endpoint replication traffic binds to
	pub address: SocketAddr,
	/// Loop device exposing the meta-data sidecar file
	pub meta_disk: PathBuf,
}

impl HostConfig {
	/// The device minor encoded in the device path
	pub fn minor(&self) -> Option<u32> {
		let digits = self
			.device
			.rfind(|c: char| !c.is_ascii_digit())
			.map(|i| &self.device[i + 1..])
			.unwrap_or(&self.device);
		digits.parse().ok()
	}

	pub fn port(&self) -> u16 {
		self.address.port()
	}
}

/// A full mirror description. `hosts[0]` is the local side from the point of
/// view of whoever hands the config to their driver; two configs that differ
/// only in host order denote the same mirror seen from opposite ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConfig {
	/// Shared opaque identifier; the identity of the mirror
	pub uuid: String,
	pub hosts: [HostConfig; 2],
}

impl MirrorConfig {
	pub fn local(&self) -> &HostConfig {
		&self.hosts[0]
	}

	pub fn peer(&self) -> &HostConfig {
		&self.hosts[1]
	}
}
