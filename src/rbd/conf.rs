//! Rendering a mirror description into the driver's configuration file

use std::path::{Path, PathBuf};

use crate::mirror::MirrorConfig;

/// Render the brace-nested configuration stanzas the control tool expects
pub fn render(config: &MirrorConfig) -> String {
	let mut out = String::new();
	out.push_str("global { usage-count no; }\n");
	out.push_str("common { protocol C; }\n");
	out.push_str(&format!("resource {} {{\n", config.uuid));
	for host in config.hosts.iter() {
		out.push_str(&format!("  on {} {{\n", host.name));
		out.push_str(&format!("    device {};\n", host.device));
		out.push_str(&format!("    disk {};\n", host.disk.display()));
		out.push_str(&format!("    address {};\n", host.address));
		out.push_str(&format!(
			"    flexible-meta-disk {};\n",
			host.meta_disk.display()
		));
		out.push_str("  }\n");
	}
	out.push_str("}\n");
	out
}

/// Path of the configuration file for a mirror, `<conf_dir>/<uuid>`
pub fn conf_path(conf_dir: &Path, uuid: &str) -> PathBuf {
	conf_dir.join(uuid)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mirror::tests::host_config;

	#[test]
	fn test_render() {
		let config = MirrorConfig {
			uuid: "e93256e2".to_string(),
			hosts: [host_config("alpha", 1, 7789), host_config("bravo", 2, 7790)],
		};
		let mut expected = String::new();
		expected.push_str("global { usage-count no; }\n");
		expected.push_str("common { protocol C; }\n");
		expected.push_str("resource e93256e2 {\n");
		expected.push_str("  on alpha {\n");
		expected.push_str("    device /dev/drbd/1;\n");
		expected.push_str("    disk /dev/xvda;\n");
		expected.push_str("    address 10.0.0.1:7789;\n");
		expected.push_str("    flexible-meta-disk /dev/loop0;\n");
		expected.push_str("  }\n");
		expected.push_str("  on bravo {\n");
		expected.push_str("    device /dev/drbd/2;\n");
		expected.push_str("    disk /dev/xvda;\n");
		expected.push_str("    address 10.0.0.1:7790;\n");
		expected.push_str("    flexible-meta-disk /dev/loop0;\n");
		expected.push_str("  }\n");
		expected.push_str("}\n");
		assert_eq!(render(&config), expected);
	}

	#[test]
	fn test_conf_path() {
		assert_eq!(
			conf_path(Path::new("/var/run/sm/rbd"), "e93256e2"),
			PathBuf::from("/var/run/sm/rbd/e93256e2")
		);
	}
}
