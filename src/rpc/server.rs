//! The serving side of the shim: a registry of peers addressed by URL path,
//! exposed over HTTP

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use futures::future::FutureExt;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};

use tandem_host::loopdev::LoopControl;
use tandem_host::probe::Host;
use tandem_peer::endpoint::PeerEndpoint;
use tandem_peer::peer::Peer;
use tandem_rbd::control::RbdControl;
use tandem_util::error::*;

use crate::proto::*;

/// How long an untouched peer registration lives before its resources are
/// reclaimed. There is no dispose operation in the protocol; a client that
/// crashes mid-negotiation relies on this timeout for cleanup.
pub const PEER_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Everything needed to build a peer on this host
pub struct PeerBackend {
	pub rbd: Arc<dyn RbdControl>,
	pub host: Arc<dyn Host>,
	pub loops: Arc<dyn LoopControl>,
	pub device_prefix: String,
}

struct RegisteredPeer {
	peer: Arc<Peer>,
	last_used: Mutex<Instant>,
}

/// The process-wide table of peers this broker serves, plus the factory
/// that populates it
pub struct Registry {
	backend: PeerBackend,
	entries: RwLock<HashMap<String, RegisteredPeer>>,
	counter: AtomicU64,
}

impl Registry {
	pub fn new(backend: PeerBackend) -> Self {
		Self {
			backend,
			entries: RwLock::new(HashMap::new()),
			counter: AtomicU64::new(0),
		}
	}

	/// The factory operation: build a peer for `disk`/`uuid`, register it
	/// under a fresh path, and return that path
	pub fn make(&self, disk: &Path, uuid: &str) -> String {
		let peer = Arc::new(Peer::new(
			self.backend.rbd.clone(),
			self.backend.host.clone(),
			self.backend.loops.clone(),
			disk,
			uuid,
			&self.backend.device_prefix,
		));
		let path = format!("/{}", self.counter.fetch_add(1, Ordering::SeqCst));
		self.entries.write().unwrap().insert(
			path.clone(),
			RegisteredPeer {
				peer,
				last_used: Mutex::new(Instant::now()),
			},
		);
		info!("Registered peer {} for mirror {} on {}", path, uuid, disk.display());
		path
	}

	/// Look a peer up by path, refreshing its idle clock
	fn get(&self, path: &str) -> Option<Arc<Peer>> {
		let entries = self.entries.read().unwrap();
		let entry = entries.get(path)?;
		*entry.last_used.lock().unwrap() = Instant::now();
		Some(entry.peer.clone())
	}

	/// Human-readable listing, answered to a GET on the factory path
	fn listing(&self) -> String {
		let entries = self.entries.read().unwrap();
		let mut lines = vec![format!("{} registered peer(s)", entries.len())];
		let mut paths = entries.keys().collect::<Vec<_>>();
		paths.sort();
		for path in paths {
			let entry = &entries[path];
			lines.push(format!(
				"{}\tuuid {}\tdisk {}\tidle {}s",
				path,
				entry.peer.uuid(),
				entry.peer.disk().display(),
				entry.last_used.lock().unwrap().elapsed().as_secs()
			));
		}
		lines.join("\n") + "\n"
	}

	/// Drop registrations idle for longer than `PEER_IDLE_TIMEOUT` and
	/// release everything they own
	pub async fn sweep_idle(&self) {
		let expired = {
			let mut entries = self.entries.write().unwrap();
			let paths = entries
				.iter()
				.filter(|(_, e)| e.last_used.lock().unwrap().elapsed() > PEER_IDLE_TIMEOUT)
				.map(|(path, _)| path.clone())
				.collect::<Vec<_>>();
			paths
				.into_iter()
				.filter_map(|path| entries.remove(&path).map(|e| (path, e.peer)))
				.collect::<Vec<_>>()
		};
		for (path, peer) in expired {
			info!("Reclaiming idle peer {} (mirror {})", path, peer.uuid());
			peer.shutdown().await;
		}
	}

	/// Tear down every registered peer; used on server exit
	pub async fn shutdown_all(&self) {
		let drained = {
			let mut entries = self.entries.write().unwrap();
			entries.drain().collect::<Vec<_>>()
		};
		for (path, entry) in drained {
			debug!("Shutting down peer {}", path);
			entry.peer.shutdown().await;
		}
	}
}

/// Spawn the background task that reclaims idle peers
pub fn spawn_idle_sweeper(registry: Arc<Registry>) {
	tokio::spawn(async move {
		loop {
			tokio::time::sleep(IDLE_SWEEP_INTERVAL).await;
			registry.sweep_idle().await;
		}
	});
}

/// Serve the registry on `bind_addr` until `shutdown_signal` resolves
pub async fn run_rpc_server(
	registry: Arc<Registry>,
	bind_addr: SocketAddr,
	shutdown_signal: impl Future<Output = ()>,
) -> Result<(), Error> {
	let service = make_service_fn(move |_conn| {
		let registry = registry.clone();
		async move {
			Ok::<_, hyper::Error>(service_fn(move |req| {
				handle_request(registry.clone(), req).map(Ok::<_, hyper::Error>)
			}))
		}
	});

	let server = Server::try_bind(&bind_addr)?.serve(service);
	info!("RPC server listening on http://{}", bind_addr);
	server.with_graceful_shutdown(shutdown_signal).await?;
	Ok(())
}

async fn handle_request(registry: Arc<Registry>, req: Request<Body>) -> Response<Body> {
	let path = req.uri().path().to_string();
	match (req.method(), path.as_str()) {
		(&Method::GET, "/") => text_response(StatusCode::OK, registry.listing()),
		(&Method::POST, _) => match handle_rpc(registry, &path, req).await {
			Some(response) => match serde_json::to_vec(&response) {
				Ok(body) => json_response(StatusCode::OK, body),
				Err(e) => text_response(
					StatusCode::INTERNAL_SERVER_ERROR,
					format!("Could not encode response: {}\n", e),
				),
			},
			None => text_response(StatusCode::NOT_FOUND, "No such peer\n".to_string()),
		},
		_ => text_response(
			StatusCode::METHOD_NOT_ALLOWED,
			"Only GET / and POST are supported\n".to_string(),
		),
	}
}

/// Decode and dispatch one RPC. `None` means the path names no peer.
async fn handle_rpc(
	registry: Arc<Registry>,
	path: &str,
	req: Request<Body>,
) -> Option<RpcResponse> {
	let body = match hyper::body::to_bytes(req.into_body()).await {
		Ok(body) => body,
		Err(e) => {
			return Some(RpcResponse::from_result(Err(Error::Transport(format!(
				"Could not read request body: {}",
				e
			)))));
		}
	};
	let request: PeerRequest = match serde_json::from_slice(&body) {
		Ok(request) => request,
		Err(e) => return Some(RpcResponse::from_result(Err(e.into()))),
	};
	trace!("{} {}", path, request.method());

	if path == "/" {
		let result = match request {
			PeerRequest::Make { disk, uuid } => {
				Ok(PeerReply::Registered(registry.make(&disk, &uuid)))
			}
			other => Err(Error::Message(format!(
				"Only make is valid on the factory path, not {}",
				other.method()
			))),
		};
		return Some(RpcResponse::from_result(result));
	}

	let peer = registry.get(path)?;
	Some(RpcResponse::from_result(dispatch(&peer, request).await))
}

async fn dispatch(peer: &Peer, request: PeerRequest) -> Result<PeerReply, Error> {
	match request {
		PeerRequest::VersionExchange { version } => {
			Ok(PeerReply::Version(peer.version_exchange(&version).await?))
		}
		PeerRequest::SoftAllocate => Ok(PeerReply::Allocated(peer.soft_allocate().await?)),
		PeerRequest::Start { mine, theirs } => {
			peer.start(&mine, &theirs).await?;
			Ok(PeerReply::Ok)
		}
		PeerRequest::Stop { mine, theirs } => {
			peer.stop(&mine, &theirs).await?;
			Ok(PeerReply::Ok)
		}
		PeerRequest::Make { .. } => {
			Err(Error::Message("make is only valid on the factory path".to_string()))
		}
	}
}

fn text_response(status: StatusCode, body: String) -> Response<Body> {
	Response::builder()
		.status(status)
		.header(http::header::CONTENT_TYPE, "text/plain")
		.body(Body::from(body))
		.expect("response builder with static headers")
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response<Body> {
	Response::builder()
		.status(status)
		.header(http::header::CONTENT_TYPE, "application/json")
		.body(Body::from(body))
		.expect("response builder with static headers")
}
