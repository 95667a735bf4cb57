//! The request/response encoding spoken between brokers.
//!
//! A request is the `(operation, arguments)` pair, JSON-encoded as
//! `{"method": ..., "params": ...}`. A response is either
//! `{"result": ...}` or `{"fault": {"code": 1, "message": "<kind>:<detail>"}}`.
//! The transient error kinds survive the fault encoding in both directions,
//! so a negotiator behind the shim retries exactly like a local one.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use tandem_rbd::mirror::HostConfig;
use tandem_util::error::Error;

/// RPC operations accepted by a broker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum PeerRequest {
	/// Factory operation: register a fresh peer, answered with its path
	Make { disk: PathBuf, uuid: String },
	VersionExchange { version: String },
	SoftAllocate,
	Start {
		mine: HostConfig,
		theirs: HostConfig,
	},
	Stop {
		mine: HostConfig,
		theirs: HostConfig,
	},
}

impl PeerRequest {
	pub fn method(&self) -> &'static str {
		match self {
			PeerRequest::Make { .. } => "make",
			PeerRequest::VersionExchange { .. } => "version_exchange",
			PeerRequest::SoftAllocate => "soft_allocate",
			PeerRequest::Start { .. } => "start",
			PeerRequest::Stop { .. } => "stop",
		}
	}
}

/// Successful outcomes, one variant per operation result shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerReply {
	Ok,
	Version(String),
	Allocated(HostConfig),
	Registered(String),
}

/// The response envelope
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcResponse {
	Result(PeerReply),
	Fault { code: u32, message: String },
}

impl RpcResponse {
	pub fn from_result(result: Result<PeerReply, Error>) -> Self {
		match result {
			Ok(reply) => RpcResponse::Result(reply),
			Err(e) => RpcResponse::Fault {
				code: 1,
				message: fault_message(&e),
			},
		}
	}
}

/// Render an error as `<kind>:<detail>`, keeping the transient kinds and the
/// version check machine-readable
pub fn fault_message(err: &Error) -> String {
	match err {
		Error::MinorInUse(minor) => format!("MinorInUse:{}", minor),
		Error::PortInUse(port) => format!("PortInUse:{}", port),
		Error::VersionMismatch(ours, theirs) => format!("VersionMismatch:{} {}", ours, theirs),
		Error::CommandFailure { .. } => format!("CommandFailure:{}", err),
		Error::Transport(_) => format!("TransportFailure:{}", err),
		e => format!("Error:{}", e),
	}
}

/// Reverse of `fault_message`: recover the typed error on the caller's side
pub fn fault_to_error(code: u32, message: &str) -> Error {
	let (kind, detail) = message.split_once(':').unwrap_or(("", message));
	match kind {
		"MinorInUse" => match detail.trim().parse() {
			Ok(minor) => Error::MinorInUse(minor),
			Err(_) => opaque_fault(code, message),
		},
		"PortInUse" => match detail.trim().parse() {
			Ok(port) => Error::PortInUse(port),
			Err(_) => opaque_fault(code, message),
		},
		"VersionMismatch" => {
			let mut versions = detail.split_whitespace();
			match (versions.next(), versions.next()) {
				(Some(ours), Some(theirs)) => {
					Error::VersionMismatch(ours.to_string(), theirs.to_string())
				}
				_ => opaque_fault(code, message),
			}
		}
		_ => opaque_fault(code, message),
	}
}

fn opaque_fault(code: u32, message: &str) -> Error {
	Error::Message(format!("Peer fault {}: {}", code, message))
}

pub fn unexpected_reply(request: &PeerRequest, reply: &PeerReply) -> Error {
	Error::Message(format!(
		"Unexpected reply to {} RPC: {:?}",
		request.method(),
		reply
	))
}
