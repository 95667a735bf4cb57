//! Binding regular files to loop block devices with `losetup`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use tandem_util::error::*;
use tandem_util::process::run;

/// Control over the host's pool of loop devices
#[async_trait]
pub trait LoopControl: Send + Sync {
	/// Currently bound loop devices, as loop path → backing file
	async fn list(&self) -> Result<BTreeMap<PathBuf, PathBuf>, Error>;

	/// Bind the next free loop device to `file` and return its path
	async fn add(&self, file: &Path) -> Result<PathBuf, Error>;

	/// Unbind a loop device
	async fn remove(&self, loop_dev: &Path) -> Result<(), Error>;
}

/// The real pool, driven through `losetup`
pub struct SystemLoop;

#[async_trait]
impl LoopControl for SystemLoop {
	async fn list(&self) -> Result<BTreeMap<PathBuf, PathBuf>, Error> {
		let out = run("losetup", &["-a"]).await?;
		Ok(parse_losetup_list(&out.stdout))
	}

	async fn add(&self, file: &Path) -> Result<PathBuf, Error> {
		run("losetup", &["-f", &file.to_string_lossy()]).await?;
		// losetup -f does not say which device it picked
		self.list()
			.await?
			.into_iter()
			.find(|(_, backing)| backing.as_path() == file)
			.map(|(loop_dev, _)| loop_dev)
			.ok_or_message(format!(
				"Loop device bound to {} not found in losetup listing",
				file.display()
			))
	}

	async fn remove(&self, loop_dev: &Path) -> Result<(), Error> {
		run("losetup", &["-d", &loop_dev.to_string_lossy()]).await?;
		Ok(())
	}
}

/// Parse `losetup -a` output, lines of the form
/// `/dev/loop0: [0805]:131090 (/path/to/backing.md)`
fn parse_losetup_list(out: &str) -> BTreeMap<PathBuf, PathBuf> {
	let mut results = BTreeMap::new();
	for line in out.lines() {
		let (loop_dev, rest) = match line.split_once(':') {
			Some(x) => x,
			None => continue,
		};
		let backing = match rest.rfind('(').and_then(|open| {
			rest[open + 1..]
				.find(')')
				.map(|close| &rest[open + 1..open + 1 + close])
		}) {
			Some(b) if !b.is_empty() => b,
			_ => continue,
		};
		results.insert(PathBuf::from(loop_dev), PathBuf::from(backing));
	}
	results
}
