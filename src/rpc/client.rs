//! The client side of the shim: a proxy that makes a remote peer look like
//! any other negotiation endpoint

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode};

use tandem_peer::endpoint::PeerEndpoint;
use tandem_rbd::mirror::HostConfig;
use tandem_util::error::*;

use crate::proto::*;

/// Per-call deadline. A peer that does not answer within this window is
/// treated as gone, which aborts the negotiation.
pub const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// A peer living behind another broker's HTTP shim
pub struct RemotePeer {
	client: Client<HttpConnector>,
	base: String,
	path: String,
}

impl RemotePeer {
	/// Address an already-registered peer
	pub fn new(base: &str, path: &str) -> Self {
		Self {
			client: Client::new(),
			base: base.trim_end_matches('/').to_string(),
			path: path.to_string(),
		}
	}

	/// Drive the remote factory: register a fresh peer for `disk`/`uuid`
	/// over there and return a proxy to it
	pub async fn make(base: &str, disk: &Path, uuid: &str) -> Result<RemotePeer, Error> {
		let proxy = Self::new(base, "/");
		let request = PeerRequest::Make {
			disk: disk.to_path_buf(),
			uuid: uuid.to_string(),
		};
		match proxy.call(&request).await? {
			PeerReply::Registered(path) => {
				debug!("Peer registered at {}{}", proxy.base, path);
				Ok(Self::new(base, &path))
			}
			reply => Err(unexpected_reply(&request, &reply)),
		}
	}

	pub fn url(&self) -> String {
		format!("{}{}", self.base, self.path)
	}

	async fn call(&self, request: &PeerRequest) -> Result<PeerReply, Error> {
		let url = self.url();
		let req = Request::builder()
			.method(Method::POST)
			.uri(&url)
			.header(http::header::CONTENT_TYPE, "application/json")
			.body(Body::from(serde_json::to_vec(request)?))
			.map_err(|e| Error::Transport(format!("Invalid request for {}: {}", url, e)))?;

		let response = tokio::time::timeout(RPC_CALL_TIMEOUT, self.client.request(req))
			.await
			.map_err(|_| {
				Error::Transport(format!(
					"No answer from {} within {:?}",
					url, RPC_CALL_TIMEOUT
				))
			})??;

		let status = response.status();
		if status == StatusCode::NOT_FOUND {
			return Err(Error::Transport(format!(
				"Peer {} is not registered on the remote broker",
				url
			)));
		}
		if status != StatusCode::OK {
			return Err(Error::Transport(format!(
				"Peer {} answered HTTP {}",
				url, status
			)));
		}

		let body = hyper::body::to_bytes(response.into_body()).await?;
		match serde_json::from_slice::<RpcResponse>(&body)? {
			RpcResponse::Result(reply) => Ok(reply),
			RpcResponse::Fault { code, message } => Err(fault_to_error(code, &message)),
		}
	}
}

#[async_trait]
impl PeerEndpoint for RemotePeer {
	async fn version_exchange(&self, theirs: &str) -> Result<String, Error> {
		let request = PeerRequest::VersionExchange {
			version: theirs.to_string(),
		};
		match self.call(&request).await? {
			PeerReply::Version(version) => Ok(version),
			reply => Err(unexpected_reply(&request, &reply)),
		}
	}

	async fn soft_allocate(&self) -> Result<HostConfig, Error> {
		let request = PeerRequest::SoftAllocate;
		match self.call(&request).await? {
			PeerReply::Allocated(config) => Ok(config),
			reply => Err(unexpected_reply(&request, &reply)),
		}
	}

	async fn start(&self, mine: &HostConfig, theirs: &HostConfig) -> Result<(), Error> {
		let request = PeerRequest::Start {
			mine: mine.clone(),
			theirs: theirs.clone(),
		};
		match self.call(&request).await? {
			PeerReply::Ok => Ok(()),
			reply => Err(unexpected_reply(&request, &reply)),
		}
	}

	async fn stop(&self, mine: &HostConfig, theirs: &HostConfig) -> Result<(), Error> {
		let request = PeerRequest::Stop {
			mine: mine.clone(),
			theirs: theirs.clone(),
		};
		match self.call(&request).await? {
			PeerReply::Ok => Ok(()),
			reply => Err(unexpected_reply(&request, &reply)),
		}
	}
}
