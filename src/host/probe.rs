//! Probing the OS for the resources one side of a mirror needs

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use tandem_util::error::*;
use tandem_util::process::run;

/// Lowest port considered for replication traffic
pub const FIRST_REPLICATION_PORT: u16 = 7789;

/// What a mirror needs to know about the host it runs on.
///
/// Every answer is advisory: the pools behind `free_port` and the geometry
/// queries are OS-global and raced with arbitrary other actors, so callers
/// must be prepared for the subsequent driver command to fail with a
/// transient error and re-probe.
#[async_trait]
pub trait Host: Send + Sync {
	async fn hostname(&self) -> Result<String, Error>;

	/// The address replication traffic should bind to
	async fn replication_ip(&self) -> Result<IpAddr, Error>;

	/// A TCP port on `ip` not currently bound by anyone
	async fn free_port(&self, ip: IpAddr) -> Result<u16, Error>;

	async fn sector_size(&self, disk: &Path) -> Result<u64, Error>;

	async fn sector_count(&self, disk: &Path) -> Result<u64, Error>;

	/// Create a sparse file of `size` bytes and return its path
	async fn make_sparse_file(&self, size: u64) -> Result<PathBuf, Error>;

	/// Delete a file previously returned by `make_sparse_file`
	async fn remove_file(&self, path: &Path) -> Result<(), Error>;
}

/// The real host, probed through syscalls and the standard admin tools
pub struct SystemHost {
	scratch_dir: PathBuf,
}

impl SystemHost {
	/// `scratch_dir` is where meta-data sidecar files are created
	pub fn new(scratch_dir: PathBuf) -> Self {
		Self { scratch_dir }
	}
}

#[async_trait]
impl Host for SystemHost {
	async fn hostname(&self) -> Result<String, Error> {
		gethostname::gethostname()
			.into_string()
			.map_err(|_| Error::Message("Host name is not valid UTF-8".to_string()))
	}

	async fn replication_ip(&self) -> Result<IpAddr, Error> {
		pnet_datalink::interfaces()
			.iter()
			.filter(|e| e.is_up() && !e.is_loopback())
			.flat_map(|e| e.ips.iter())
			.map(|n| n.ip())
			.find(|ip| ip.is_ipv4())
			.ok_or_message("No non-loopback IPv4 address found on any interface")
	}

	async fn free_port(&self, ip: IpAddr) -> Result<u16, Error> {
		let out = run("netstat", &["-an"]).await?;
		let used = used_ports(&out.stdout, ip);
		first_free_port(&used).ok_or_message(format!("No free TCP port left on {}", ip))
	}

	async fn sector_size(&self, disk: &Path) -> Result<u64, Error> {
		blockdev_query("--getss", disk).await
	}

	async fn sector_count(&self, disk: &Path) -> Result<u64, Error> {
		blockdev_query("--getsize", disk).await
	}

	async fn make_sparse_file(&self, size: u64) -> Result<PathBuf, Error> {
		tokio::fs::create_dir_all(&self.scratch_dir).await?;
		let name = format!("meta-{}.md", hex::encode(rand::random::<[u8; 8]>()));
		let path = self.scratch_dir.join(name);
		let file = tokio::fs::File::create(&path).await?;
		file.set_len(size).await?;
		debug!("Created {} byte sparse file {}", size, path.display());
		Ok(path)
	}

	async fn remove_file(&self, path: &Path) -> Result<(), Error> {
		tokio::fs::remove_file(path).await?;
		Ok(())
	}
}

async fn blockdev_query(query: &str, disk: &Path) -> Result<u64, Error> {
	let out = run("blockdev", &[query, &disk.to_string_lossy()]).await?;
	out.stdout
		.trim()
		.parse::<u64>()
		.map_err(|e| Error::Message(format!("Unparseable blockdev {} output: {}", query, e)))
}

/// Ports with a TCP endpoint bound on `ip`, per `netstat -an` output
fn used_ports(netstat: &str, ip: IpAddr) -> BTreeSet<u16> {
	let ip = ip.to_string();
	let mut used = BTreeSet::new();
	for line in netstat.lines() {
		let mut fields = line.split_whitespace();
		match fields.next() {
			Some(proto) if proto.starts_with("tcp") => (),
			_ => continue,
		}
		// proto, recv-q, send-q, local endpoint
		let local = match fields.nth(2) {
			Some(l) => l,
			None => continue,
		};
		if let Some((addr, port)) = local.rsplit_once(':') {
			if addr == ip {
				if let Ok(port) = port.parse::<u16>() {
					used.insert(port);
				}
			}
		}
	}
	used
}

fn first_free_port(used: &BTreeSet<u16>) -> Option<u16> {
	(FIRST_REPLICATION_PORT..=u16::MAX).find(|p| !used.contains(p))
}
