//! Tandem CLI, used to serve negotiation peers to remote brokers and to
//! negotiate mirrors against them

#[macro_use]
extern crate tracing;

mod backend;
mod cli;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;

use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
	name = "tandem",
	about = "Broker for two-host replicated block-device mirrors"
)]
struct Opt {
	#[structopt(subcommand)]
	cmd: Command,
}

#[derive(StructOpt, Debug)]
enum Command {
	/// Serve negotiation peers over HTTP for remote brokers
	Server(ServerOpt),
	/// Negotiate a mirror between this host and a remote broker
	Negotiate(NegotiateOpt),
	/// Parse and display the kernel driver status
	Status(StatusOpt),
}

/// How the driver and the host are reached; shared by all commands
#[derive(StructOpt, Debug)]
pub struct BackendOpt {
	/// Use the in-memory simulator instead of the kernel driver
	#[structopt(long = "simulator")]
	pub simulator: bool,

	/// The kernel driver's status file
	#[structopt(long = "status-file", default_value = "/proc/drbd")]
	pub status_file: PathBuf,

	/// Directory the generated driver configuration files go to
	#[structopt(long = "conf-dir", default_value = "/var/run/sm/rbd")]
	pub conf_dir: PathBuf,

	/// The driver's userspace control tool
	#[structopt(long = "tool", default_value = "drbdadm")]
	pub tool: String,

	/// Where meta-data sidecar files are created (defaults to the conf dir)
	#[structopt(long = "scratch-dir")]
	pub scratch_dir: Option<PathBuf>,

	/// Prefix of the replicated device nodes
	#[structopt(long = "device-prefix", default_value = "/dev/drbd")]
	pub device_prefix: String,
}

#[derive(StructOpt, Debug)]
pub struct ServerOpt {
	/// Address to serve the RPC endpoint on
	#[structopt(long = "bind", default_value = "0.0.0.0:8081")]
	pub bind_addr: SocketAddr,

	#[structopt(flatten)]
	pub backend: BackendOpt,
}

#[derive(StructOpt, Debug)]
pub struct NegotiateOpt {
	/// The local disk to mirror
	#[structopt(long = "disk")]
	pub disk: PathBuf,

	/// Shared identifier of the mirror
	#[structopt(long = "uuid")]
	pub uuid: String,

	/// Base URL of the remote broker, e.g. http://peer:8081
	#[structopt(long = "peer")]
	pub peer: String,

	/// The disk to mirror on the remote host (defaults to --disk)
	#[structopt(long = "peer-disk")]
	pub peer_disk: Option<PathBuf>,

	#[structopt(flatten)]
	pub backend: BackendOpt,
}

#[derive(StructOpt, Debug)]
pub struct StatusOpt {
	#[structopt(long = "status-file", default_value = "/proc/drbd")]
	pub status_file: PathBuf,
}

#[tokio::main]
async fn main() {
	let opt = Opt::from_args();

	if std::env::var("RUST_LOG").is_err() {
		let default_log = match &opt.cmd {
			Command::Server(_) => "info",
			_ => "warn",
		};
		std::env::set_var("RUST_LOG", default_log)
	}
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
		.init();

	let res = match opt.cmd {
		Command::Server(server_opt) => server::run_server(server_opt).await,
		Command::Negotiate(negotiate_opt) => cli::negotiate_command(negotiate_opt).await,
		Command::Status(status_opt) => cli::status_command(status_opt).await,
	};

	if let Err(e) = res {
		eprintln!("Error: {}", e);
		std::process::exit(1);
	}
}
