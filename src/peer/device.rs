//! The bundle of host-local resources backing one side of a mirror

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tandem_host::loopdev::LoopControl;
use tandem_host::probe::Host;
use tandem_rbd::control::RbdControl;
use tandem_rbd::mirror::HostConfig;
use tandem_rbd::status::meta_size;
use tandem_util::error::*;

pub const DEFAULT_DEVICE_PREFIX: &str = "/dev/drbd";

/// Exclusive owner of everything one side of a mirror needs from its host: a
/// reserved device minor, a sparse meta-data file, the loop device exposing
/// it, and a reserved replication endpoint.
///
/// All of it is acquired together in `allocate` and given back together in
/// `release`; if allocation fails partway, the completed steps are reversed
/// before the failure propagates. The reservations are advisory (see the
/// host probe), so the driver may still report a conflict when the config is
/// used — the owner then releases this device and allocates another.
pub struct LocalDevice {
	host: Arc<dyn Host>,
	loops: Arc<dyn LoopControl>,
	config: HostConfig,
	meta_file: PathBuf,
	loop_dev: PathBuf,
	released: bool,
}

impl LocalDevice {
	pub async fn allocate(
		rbd: &dyn RbdControl,
		host: Arc<dyn Host>,
		loops: Arc<dyn LoopControl>,
		disk: &Path,
		device_prefix: &str,
	) -> Result<LocalDevice, Error> {
		let minor = rbd.free_minor().await?;

		let bytes_per_sector = host.sector_size(disk).await?;
		let sectors = host.sector_count(disk).await?;
		let meta_file = host
			.make_sparse_file(meta_size(bytes_per_sector, sectors))
			.await?;

		let loop_dev = match loops.add(&meta_file).await {
			Ok(l) => l,
			Err(e) => {
				best_effort_remove_file(&*host, &meta_file).await;
				return Err(e);
			}
		};

		let endpoint: Result<(String, IpAddr, u16), Error> = async {
			let name = host.hostname().await?;
			let ip = host.replication_ip().await?;
			let port = host.free_port(ip).await?;
			Ok((name, ip, port))
		}
		.await;
		let (name, ip, port) = match endpoint {
			Ok(x) => x,
			Err(e) => {
				best_effort_loop_remove(&*loops, &loop_dev).await;
				best_effort_remove_file(&*host, &meta_file).await;
				return Err(e);
			}
		};

		let config = HostConfig {
			name,
			device: format!("{}/{}", device_prefix, minor),
			disk: disk.to_path_buf(),
			address: (ip, port).into(),
			meta_disk: loop_dev.clone(),
		};
		debug!(
			"Allocated local device {} ({} via {})",
			config.device,
			config.address,
			loop_dev.display()
		);

		Ok(LocalDevice {
			host,
			loops,
			config,
			meta_file,
			loop_dev,
			released: false,
		})
	}

	/// The view of this device a peer advertises during negotiation
	pub fn host_config(&self) -> &HostConfig {
		&self.config
	}

	/// Give the loop device, meta-data file and port reservation back
	pub async fn release(mut self) -> Result<(), Error> {
		self.released = true;
		debug!("Releasing local device {}", self.config.device);
		self.loops.remove(&self.loop_dev).await?;
		self.host.remove_file(&self.meta_file).await?;
		Ok(())
	}

	/// Ownership of the loop device and file passes to the running mirror;
	/// nothing is released. Used when the broker goes away but the mirror it
	/// negotiated must keep running.
	pub fn hand_over(mut self) {
		debug!("Handing local device {} over to its mirror", self.config.device);
		self.released = true;
	}
}

impl Drop for LocalDevice {
	fn drop(&mut self) {
		if !self.released {
			error!(
				"Local device {} dropped without release, leaking {} and {}",
				self.config.device,
				self.loop_dev.display(),
				self.meta_file.display()
			);
		}
	}
}

async fn best_effort_remove_file(host: &dyn Host, path: &Path) {
	if let Err(e) = host.remove_file(path).await {
		warn!("Could not remove meta-data file {}: {}", path.display(), e);
	}
}

async fn best_effort_loop_remove(loops: &dyn LoopControl, loop_dev: &Path) {
	if let Err(e) = loops.remove(loop_dev).await {
		warn!("Could not unbind loop device {}: {}", loop_dev.display(), e);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tandem_host::sim::{SimHost, SIM_SECTOR_COUNT, SIM_SECTOR_SIZE};
	use tandem_rbd::sim::RbdSim;

	#[tokio::test]
	async fn test_allocate_release_leaves_no_loops_behind() {
		let rbd = RbdSim::new();
		let host = Arc::new(SimHost::new("alpha"));
		let loops_before = host.list().await.unwrap().len();

		let dev = LocalDevice::allocate(
			&rbd,
			host.clone(),
			host.clone(),
			Path::new("/dev/xvda"),
			DEFAULT_DEVICE_PREFIX,
		)
		.await
		.unwrap();

		let config = dev.host_config().clone();
		assert_eq!(config.name, "alpha");
		assert_eq!(config.device, "/dev/drbd/1");
		assert_eq!(config.minor(), Some(1));
		assert_eq!(config.port(), 7789);
		assert_eq!(host.list().await.unwrap().len(), loops_before + 1);

		dev.release().await.unwrap();
		assert_eq!(host.list().await.unwrap().len(), loops_before);
	}

	#[tokio::test]
	async fn test_meta_file_sized_from_disk_geometry() {
		let rbd = RbdSim::new();
		let host = Arc::new(SimHost::new("alpha"));

		let dev = LocalDevice::allocate(
			&rbd,
			host.clone(),
			host.clone(),
			Path::new("/dev/xvda"),
			DEFAULT_DEVICE_PREFIX,
		)
		.await
		.unwrap();

		let backing = host
			.list()
			.await
			.unwrap()
			.remove(&dev.loop_dev)
			.expect("loop device has a backing file");
		assert_eq!(backing, dev.meta_file);
		assert_eq!(dev.config.meta_disk, dev.loop_dev);

		// the sidecar is sized for the simulated geometry
		let expected = meta_size(SIM_SECTOR_SIZE, SIM_SECTOR_COUNT);
		assert_eq!(expected, 299008);

		dev.release().await.unwrap();
	}
}
