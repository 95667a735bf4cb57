//! Parsing the kernel driver's status file and the pure allocation helpers
//! defined over the parsed view

use std::collections::BTreeMap;

/// Sectors of backing disk covered by one 8-sector bitmap slot of meta-data
const CHUNK_SECTORS: u64 = 1 << 18;
const META_SECTORS_PER_CHUNK: u64 = 8;
const META_FIXED_SECTORS: u64 = 72;

/// Parsed view of the kernel status file, read-only once produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusView {
	pub version: String,
	pub devices: BTreeMap<u32, DeviceStatus>,
}

/// State of one device minor as reported by the kernel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceStatus {
	/// The `key:value` attributes of the device header line (`cs`, `st`, ...)
	pub fields: BTreeMap<String, String>,
	/// Synchronisation progress in percent, when a sync is running
	pub progress: Option<f64>,
	/// Estimated time to sync completion, verbatim (`H:MM:SS`)
	pub finish: Option<String>,
}

impl DeviceStatus {
	pub fn connection_state(&self) -> Option<&str> {
		self.fields.get("cs").map(String::as_str)
	}
}

/// Parse the status file.
///
/// The format is line oriented: a version line, a build banner, then one
/// block per device minor. A block opens with an indented `<minor>: k:v ...`
/// header and may be followed by progress lines. Anything unrecognized is
/// skipped, so the parse always produces a view.
pub fn parse_status(input: &str) -> StatusView {
	let mut lines = input.lines();

	let version = lines
		.next()
		.and_then(|l| l.split_whitespace().nth(1).map(str::to_string))
		.filter(|_| input.starts_with("version:"))
		.unwrap_or_default();
	// second line is the GIT-hash / build banner
	lines.next();

	let mut devices = BTreeMap::new();
	let mut current: Option<(u32, DeviceStatus)> = None;

	for line in lines {
		let line = line.trim_start_matches(|c| c == ' ' || c == '\t');
		if let Some((minor, attrs)) = parse_device_header(line) {
			if let Some((m, d)) = current.take() {
				devices.insert(m, d);
			}
			let mut device = DeviceStatus::default();
			for token in attrs.split_whitespace() {
				if let Some((key, value)) = token.split_once(':') {
					device.fields.insert(key.to_string(), value.to_string());
				}
			}
			current = Some((minor, device));
		} else if let Some((_, device)) = current.as_mut() {
			if let Some(progress) = parse_progress(line) {
				device.progress = Some(progress);
			}
			if let Some(finish) = line.strip_prefix("finish: ") {
				if let Some(token) = finish.split_whitespace().next() {
					device.finish = Some(token.to_string());
				}
			}
		}
	}
	if let Some((m, d)) = current {
		devices.insert(m, d);
	}

	StatusView { version, devices }
}

/// `<digits>:<whitespace><rest>` opens a device block
fn parse_device_header(line: &str) -> Option<(u32, &str)> {
	let colon = line.find(':')?;
	let minor = line[..colon].parse::<u32>().ok()?;
	let rest = &line[colon + 1..];
	if rest.starts_with(|c: char| c.is_whitespace()) {
		Some((minor, rest))
	} else {
		None
	}
}

/// `... sync'ed:  0.1% ...` → 0.1
fn parse_progress(line: &str) -> Option<f64> {
	let (_, tail) = line.split_once("sync'ed:")?;
	let token = tail.split_whitespace().next()?;
	token.strip_suffix('%')?.parse::<f64>().ok()
}

/// Bytes of meta-data sidecar needed to mirror a disk of the given geometry
pub fn meta_size(bytes_per_sector: u64, sectors: u64) -> u64 {
	let chunks = (sectors + CHUNK_SECTORS - 1) / CHUNK_SECTORS;
	(chunks * META_SECTORS_PER_CHUNK + META_FIXED_SECTORS) * bytes_per_sector
}

/// The smallest minor number that is free to host a new mirror: either the
/// kernel does not know it at all, or it sits in the `Unconfigured` state.
///
/// The answer is advisory — another actor may claim the same minor before it
/// is attached, in which case the driver reports `MinorInUse` and the caller
/// re-queries.
pub fn free_minor(status: &StatusView) -> u32 {
	let mut minor = 1;
	loop {
		match status.devices.get(&minor) {
			None => return minor,
			Some(d) if d.connection_state() == Some("Unconfigured") => return minor,
			Some(_) => minor += 1,
		}
	}
}
