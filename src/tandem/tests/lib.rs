use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tandem_host::loopdev::LoopControl;
use tandem_host::sim::SimHost;
use tandem_peer::endpoint::PeerEndpoint;
use tandem_peer::negotiate::negotiate;
use tandem_peer::peer::Peer;
use tandem_rbd::sim::RbdSim;
use tandem_rpc::client::RemotePeer;
use tandem_rpc::server::{run_rpc_server, PeerBackend, Registry};
use tandem_util::error::Error;

const UUID: &str = "e93256e2";

struct TestBroker {
	rbd: Arc<RbdSim>,
	host: Arc<SimHost>,
	base: String,
	stop: tokio::sync::oneshot::Sender<()>,
	served: tokio::task::JoinHandle<Result<(), Error>>,
}

/// Spin up a broker backed by a fresh simulator and wait for it to serve
async fn spawn_broker(version: &str) -> TestBroker {
	let rbd = Arc::new(RbdSim::with_version(version));
	let host = Arc::new(SimHost::new("localhost"));
	let registry = Arc::new(Registry::new(PeerBackend {
		rbd: rbd.clone(),
		host: host.clone(),
		loops: host.clone(),
		device_prefix: "/dev/drbd".to_string(),
	}));

	let addr = free_listen_addr();
	let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
	let served = tokio::spawn(run_rpc_server(registry, addr, async move {
		let _ = stopped.await;
	}));

	let base = format!("http://{}", addr);
	for _ in 0..100u32 {
		if RemotePeer::make(&base, Path::new("/dev/probe"), "readiness-probe")
			.await
			.is_ok()
		{
			return TestBroker {
				rbd,
				host,
				base,
				stop,
				served,
			};
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("broker on {} did not come up", base);
}

impl TestBroker {
	async fn shutdown(self) {
		let _ = self.stop.send(());
		self.served.await.unwrap().unwrap();
	}
}

fn free_listen_addr() -> SocketAddr {
	let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
	listener.local_addr().unwrap()
}

#[tokio::test]
async fn test_single_host_negotiation_through_the_shim() {
	let broker = spawn_broker("8.0.14").await;

	// both sides of the negotiation are the same remote peer, which is the
	// single-host case that forces the outer retry level
	let remote = RemotePeer::make(&broker.base, Path::new("/dev/xvda"), UUID)
		.await
		.unwrap();
	negotiate(&remote, &remote).await.unwrap();

	let mirrors = broker.rbd.mirrors();
	assert_eq!(mirrors.len(), 1);
	assert_eq!(mirrors[0].uuid, UUID);
	// same outcome as the in-process run: distinct minors, distinct ports
	assert_eq!(mirrors[0].local().minor(), Some(2));
	assert_eq!(mirrors[0].peer().minor(), Some(1));
	assert_ne!(mirrors[0].local().port(), mirrors[0].peer().port());

	broker.shutdown().await;
}

#[tokio::test]
async fn test_version_mismatch_is_typed_across_the_shim() {
	let broker = spawn_broker("8.2.6").await;

	let rbd = Arc::new(RbdSim::with_version("8.0.14"));
	let host = Arc::new(SimHost::new("alpha"));
	let local = Peer::new(
		rbd.clone(),
		host.clone(),
		host.clone(),
		Path::new("/dev/xvda"),
		UUID,
		"/dev/drbd",
	);

	let remote = RemotePeer::make(&broker.base, Path::new("/dev/xvda"), UUID)
		.await
		.unwrap();
	match negotiate(&local, &remote).await {
		Err(Error::VersionMismatch(ours, theirs)) => {
			assert_eq!(ours, "8.0.14");
			assert_eq!(theirs, "8.2.6");
		}
		other => panic!("expected VersionMismatch, got {:?}", other.map(|_| ())),
	}

	assert!(rbd.mirrors().is_empty());
	assert!(broker.rbd.mirrors().is_empty());
	assert!(host.list().await.unwrap().is_empty());
	assert!(broker.host.list().await.unwrap().is_empty());

	broker.shutdown().await;
}

#[tokio::test]
async fn test_transient_conflicts_are_typed_across_the_shim() {
	let broker = spawn_broker("8.0.14").await;

	// two peers on the same remote broker share its simulated host, so the
	// second start must lose the minor race and come back as a transient
	// error on our side of the wire
	let first = RemotePeer::make(&broker.base, Path::new("/dev/xvda"), "m-first")
		.await
		.unwrap();
	let second = RemotePeer::make(&broker.base, Path::new("/dev/xvda"), "m-second")
		.await
		.unwrap();

	let config_a = first.soft_allocate().await.unwrap();
	let config_b = second.soft_allocate().await.unwrap();
	assert_eq!(config_a.minor(), config_b.minor());

	first.start(&config_a, &config_b).await.unwrap();
	match second.start(&config_b, &config_a).await {
		Err(e) => assert!(e.is_transient()),
		Ok(()) => panic!("expected a transient conflict"),
	}

	broker.shutdown().await;
}

#[tokio::test]
async fn test_unknown_peer_path_is_a_transport_error() {
	let broker = spawn_broker("8.0.14").await;

	let stranger = RemotePeer::new(&broker.base, "/1234567");
	match stranger.soft_allocate().await {
		Err(Error::Transport(_)) => (),
		other => panic!("expected a transport error, got {:?}", other.map(|_| ())),
	}

	broker.shutdown().await;
}

#[tokio::test]
async fn test_factory_listing_shows_registered_peers() {
	let broker = spawn_broker("8.0.14").await;

	let _remote = RemotePeer::make(&broker.base, Path::new("/dev/xvda"), UUID)
		.await
		.unwrap();

	let client = hyper::Client::new();
	let response = client
		.get(broker.base.parse().unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), hyper::StatusCode::OK);
	let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
	let listing = String::from_utf8(body.to_vec()).unwrap();
	assert!(listing.contains(UUID));
	assert!(listing.contains("/dev/xvda"));

	broker.shutdown().await;
}
