//! The client-side commands: negotiating a mirror and inspecting the driver

use tandem_peer::negotiate::negotiate;
use tandem_peer::peer::Peer;
use tandem_rbd::status::parse_status;
use tandem_rpc::client::RemotePeer;
use tandem_util::error::*;

use crate::backend::build_backend;
use crate::{NegotiateOpt, StatusOpt};

pub async fn negotiate_command(opt: NegotiateOpt) -> Result<(), Error> {
	let backend = build_backend(&opt.backend);
	let local = Peer::new(
		backend.rbd,
		backend.host,
		backend.loops,
		&opt.disk,
		&opt.uuid,
		&backend.device_prefix,
	);

	let peer_disk = opt.peer_disk.as_deref().unwrap_or(&opt.disk);
	let remote = RemotePeer::make(&opt.peer, peer_disk, &opt.uuid).await?;
	info!("Negotiating mirror {} against {}", opt.uuid, remote.url());

	match negotiate(&local, &remote).await {
		Ok(()) => {
			// the mirror now owns the negotiated resources
			local.forget().await;
			println!("Mirror {} is up", opt.uuid);
			Ok(())
		}
		Err(e) => {
			local.shutdown().await;
			Err(e)
		}
	}
}

pub async fn status_command(opt: StatusOpt) -> Result<(), Error> {
	let text = tokio::fs::read_to_string(&opt.status_file)
		.await
		.err_context(format!(
			"Unable to read driver status from {}",
			opt.status_file.display()
		))?;
	let view = parse_status(&text);

	println!("version: {}", view.version);
	for (minor, device) in view.devices.iter() {
		let mut line = format!(" {}:", minor);
		for (key, value) in device.fields.iter() {
			line.push_str(&format!(" {}:{}", key, value));
		}
		if let Some(progress) = device.progress {
			line.push_str(&format!(" sync'ed:{}%", progress));
		}
		if let Some(finish) = device.finish.as_ref() {
			line.push_str(&format!(" finish:{}", finish));
		}
		println!("{}", line);
	}
	Ok(())
}
