//! In-memory host used by the test suites and the simulator backend.
//!
//! The simulated allocators are deterministic: ports are handed out in
//! increasing order starting from the first replication port, so two
//! colliding allocations can never be handed the same port twice. The
//! negotiation retry loop relies on this to converge.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use tandem_util::error::*;

use crate::loopdev::LoopControl;
use crate::probe::{Host, FIRST_REPLICATION_PORT};

pub const SIM_SECTOR_SIZE: u64 = 512;
pub const SIM_SECTOR_COUNT: u64 = 16 << 20;

pub struct SimHost {
	name: String,
	ip: IpAddr,
	state: Mutex<SimHostState>,
}

#[derive(Default)]
struct SimHostState {
	ports_handed_out: u16,
	files_created: u64,
	loops_bound: u64,
	files: BTreeMap<PathBuf, u64>,
	loops: BTreeMap<PathBuf, PathBuf>,
}

impl SimHost {
	pub fn new(name: &str) -> Self {
		Self {
			name: name.to_string(),
			ip: "10.0.0.1".parse().expect("valid literal address"),
			state: Mutex::new(SimHostState::default()),
		}
	}
}

#[async_trait]
impl Host for SimHost {
	async fn hostname(&self) -> Result<String, Error> {
		Ok(self.name.clone())
	}

	async fn replication_ip(&self) -> Result<IpAddr, Error> {
		Ok(self.ip)
	}

	async fn free_port(&self, _ip: IpAddr) -> Result<u16, Error> {
		let mut state = self.state.lock().unwrap();
		let port = FIRST_REPLICATION_PORT + state.ports_handed_out;
		state.ports_handed_out += 1;
		Ok(port)
	}

	async fn sector_size(&self, _disk: &Path) -> Result<u64, Error> {
		Ok(SIM_SECTOR_SIZE)
	}

	async fn sector_count(&self, _disk: &Path) -> Result<u64, Error> {
		Ok(SIM_SECTOR_COUNT)
	}

	async fn make_sparse_file(&self, size: u64) -> Result<PathBuf, Error> {
		let mut state = self.state.lock().unwrap();
		let path = PathBuf::from(format!("/sim/{}/meta-{}.md", self.name, state.files_created));
		state.files_created += 1;
		state.files.insert(path.clone(), size);
		Ok(path)
	}

	async fn remove_file(&self, path: &Path) -> Result<(), Error> {
		let mut state = self.state.lock().unwrap();
		state
			.files
			.remove(path)
			.map(|_| ())
			.ok_or_message(format!("Simulated file {} does not exist", path.display()))
	}
}

#[async_trait]
impl LoopControl for SimHost {
	async fn list(&self) -> Result<BTreeMap<PathBuf, PathBuf>, Error> {
		Ok(self.state.lock().unwrap().loops.clone())
	}

	async fn add(&self, file: &Path) -> Result<PathBuf, Error> {
		let mut state = self.state.lock().unwrap();
		if !state.files.contains_key(file) {
			return Err(Error::Message(format!(
				"Cannot bind a loop device to missing file {}",
				file.display()
			)));
		}
		let loop_dev = PathBuf::from(format!("/sim/{}/loop{}", self.name, state.loops_bound));
		state.loops_bound += 1;
		state.loops.insert(loop_dev.clone(), file.to_path_buf());
		Ok(loop_dev)
	}

	async fn remove(&self, loop_dev: &Path) -> Result<(), Error> {
		let mut state = self.state.lock().unwrap();
		state
			.loops
			.remove(loop_dev)
			.map(|_| ())
			.ok_or_message(format!("Loop device {} is not bound", loop_dev.display()))
	}
}
