//! Building the peer backend the selected flags describe

use std::sync::Arc;

use tandem_host::loopdev::SystemLoop;
use tandem_host::probe::SystemHost;
use tandem_host::sim::SimHost;
use tandem_rbd::driver::RbdAdm;
use tandem_rbd::sim::RbdSim;
use tandem_rpc::server::PeerBackend;

use crate::BackendOpt;

pub fn build_backend(opt: &BackendOpt) -> PeerBackend {
	if opt.simulator {
		info!("Using the in-memory simulator backend");
		let host = Arc::new(SimHost::new("localhost"));
		PeerBackend {
			rbd: Arc::new(RbdSim::new()),
			host: host.clone(),
			loops: host,
			device_prefix: opt.device_prefix.clone(),
		}
	} else {
		let scratch_dir = opt
			.scratch_dir
			.clone()
			.unwrap_or_else(|| opt.conf_dir.clone());
		PeerBackend {
			rbd: Arc::new(RbdAdm::new(
				opt.tool.clone(),
				opt.conf_dir.clone(),
				opt.status_file.clone(),
			)),
			host: Arc::new(SystemHost::new(scratch_dir)),
			loops: Arc::new(SystemLoop),
			device_prefix: opt.device_prefix.clone(),
		}
	}
}
