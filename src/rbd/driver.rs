//! The real driver, spoken to through its userspace control tool

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;

use tandem_util::error::*;
use tandem_util::process::run;

use crate::conf;
use crate::control::RbdControl;
use crate::mirror::MirrorConfig;
use crate::status::{free_minor, parse_status, StatusView};

pub const DEFAULT_TOOL: &str = "drbdadm";
pub const DEFAULT_CONF_DIR: &str = "/var/run/sm/rbd";
pub const DEFAULT_STATUS_FILE: &str = "/proc/drbd";

/// Wrapper around the kernel driver's control tool.
///
/// One instance per host; commands against it are serialized so that two
/// peers sharing the host cannot interleave their bring-up sequences.
pub struct RbdAdm {
	tool: String,
	conf_dir: PathBuf,
	status_file: PathBuf,
	state: Mutex<AdmState>,
}

#[derive(Default)]
struct AdmState {
	configs: HashSet<String>,
	attached: HashSet<String>,
	connected: HashSet<String>,
}

impl RbdAdm {
	pub fn new(tool: String, conf_dir: PathBuf, status_file: PathBuf) -> Self {
		Self {
			tool,
			conf_dir,
			status_file,
			state: Mutex::new(AdmState::default()),
		}
	}

	async fn read_status(&self) -> Result<StatusView, Error> {
		let text = fs::read_to_string(&self.status_file).await?;
		Ok(parse_status(&text))
	}

	async fn adm(&self, conf_file: &Path, verb: &str, uuid: &str) -> Result<(), Error> {
		run(
			&self.tool,
			&["-c", &conf_file.to_string_lossy(), verb, uuid],
		)
		.await?;
		Ok(())
	}

	/// The exact sequence that brings a mirror up. The composite `up` verb is
	/// deliberately not used: its failure path falls back to a `down` that
	/// can tear down an unrelated mirror on the same minor.
	async fn bring_up(
		&self,
		conf_file: &Path,
		uuid: &str,
		state: &mut AdmState,
	) -> Result<(), Error> {
		self.adm(conf_file, "create-md", uuid).await?;
		self.adm(conf_file, "attach", uuid).await?;
		state.attached.insert(uuid.to_string());
		self.adm(conf_file, "syncer", uuid).await?;
		self.adm(conf_file, "connect", uuid).await?;
		state.connected.insert(uuid.to_string());
		Ok(())
	}

	/// Undo whatever `bring_up` achieved, without going through `stop`
	async fn unwind(&self, conf_file: &Path, uuid: &str, state: &mut AdmState) {
		if state.connected.remove(uuid) {
			if let Err(e) = self.adm(conf_file, "disconnect", uuid).await {
				warn!("Could not disconnect half-started mirror {}: {}", uuid, e);
			}
		}
		if state.attached.remove(uuid) {
			if let Err(e) = self.adm(conf_file, "detach", uuid).await {
				warn!("Could not detach half-started mirror {}: {}", uuid, e);
			}
		}
		state.configs.remove(uuid);
		if let Err(e) = fs::remove_file(conf_file).await {
			if e.kind() != std::io::ErrorKind::NotFound {
				warn!(
					"Could not remove configuration file {}: {}",
					conf_file.display(),
					e
				);
			}
		}
	}
}

/// Map a control-tool failure onto the transient error kinds the negotiation
/// loop retries on, going by the tail of the tool's stderr
fn classify(err: Error, config: &MirrorConfig) -> Error {
	if let Error::CommandFailure { ref stderr, .. } = err {
		if stderr.ends_with("is configured!\n") {
			if let Some(minor) = config.local().minor() {
				return Error::MinorInUse(minor);
			}
		}
		if stderr.ends_with("Local address(port) already in use.\n") {
			return Error::PortInUse(config.local().port());
		}
	}
	err
}

#[async_trait]
impl RbdControl for RbdAdm {
	async fn version(&self) -> Result<String, Error> {
		Ok(self.read_status().await?.version)
	}

	async fn free_minor(&self) -> Result<u32, Error> {
		Ok(free_minor(&self.read_status().await?))
	}

	async fn start(&self, config: &MirrorConfig) -> Result<(), Error> {
		let mut state = self.state.lock().await;

		fs::create_dir_all(&self.conf_dir).await?;
		let conf_file = conf::conf_path(&self.conf_dir, &config.uuid);
		fs::write(&conf_file, conf::render(config)).await?;
		state.configs.insert(config.uuid.clone());

		match self.bring_up(&conf_file, &config.uuid, &mut state).await {
			Ok(()) => {
				info!(
					"Mirror {} up: {} on {}",
					config.uuid,
					config.local().device,
					config.local().address
				);
				Ok(())
			}
			Err(e) => {
				self.unwind(&conf_file, &config.uuid, &mut state).await;
				Err(classify(e, config))
			}
		}
	}

	async fn stop(&self, config: &MirrorConfig) -> Result<(), Error> {
		let mut state = self.state.lock().await;
		let uuid = &config.uuid;
		let conf_file = conf::conf_path(&self.conf_dir, uuid);

		if state.connected.remove(uuid) {
			self.adm(&conf_file, "disconnect", uuid).await?;
		}
		if state.attached.remove(uuid) {
			self.adm(&conf_file, "detach", uuid).await?;
		}
		if state.configs.remove(uuid) {
			info!("Mirror {} down", uuid);
		}
		match fs::remove_file(&conf_file).await {
			Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
			_ => Ok(()),
		}
	}
}
