//! Agent node: resolves tags, leeches blobs it doesn't have yet through the
//! origin cluster and the swarm, and serves cached blobs back out.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;

use blobmesh::agent::{self, tags::TagStore, AgentState};
use blobmesh::conf::{AgentConf, Cli};
use blobmesh::observability::{Event, Observability, ObservabilityConf};
use blobmesh::origin::{ClusterClient, Ring};
use blobmesh::scheduler::{self, SchedulerConf};
use blobmesh::store::LocalStore;
use blobmesh::tracker::{Client as TrackerClient, ClientConf as TrackerClientConf};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let conf = AgentConf::load(&cli)?;

    let store = Arc::new(LocalStore::open(&conf.node.store_root)?);
    let tags = TagStore::open(&conf.node.store_root)?;

    let (obs, mut events) = Observability::channel(ObservabilityConf::default());
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    let scheduler_conf = SchedulerConf {
        client_id: conf.node.client_id,
        ..Default::default()
    };
    let (scheduler_tx, _scheduler_handle) =
        scheduler::spawn(scheduler_conf, store.clone(), obs.clone());

    let peer_addr = SocketAddr::new(conf.node.peer_ip, conf.node.peer_port);
    tokio::spawn(accept_peers(peer_addr, scheduler_tx.clone()));

    let tracker_client = Arc::new(TrackerClient::new(TrackerClientConf {
        tracker_url: conf.tracker_url.parse()?,
        peer_count: 50,
        zone: conf.node.zone.clone(),
    }));

    let ring = Ring::new(conf.origin_hosts.clone());
    let origin_client = Arc::new(ClusterClient::new(
        ring,
        conf.origin_owners_per_digest,
        Default::default(),
    ));

    let state = Arc::new(AgentState::new(
        store,
        tags,
        tracker_client,
        origin_client,
        scheduler_tx,
        conf.node.client_id,
        conf.node.peer_port,
        obs,
    ));

    let addr = SocketAddr::new(conf.node.peer_ip, conf.node.port);
    log::info!("agent listening on {addr}, origins={:?}", conf.origin_hosts);
    axum::Server::bind(&addr)
        .serve(agent::router(state).into_make_service())
        .await?;

    Ok(())
}

async fn accept_peers(addr: SocketAddr, scheduler_tx: scheduler::Sender) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            log::error!("failed to bind peer listener on {addr}: {e}");
            return;
        }
    };
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let _ = scheduler_tx.send(scheduler::Command::Inbound {
                    stream,
                    addr: peer_addr,
                });
            }
            Err(e) => log::warn!("failed to accept peer connection: {e}"),
        }
    }
}

fn log_event(event: &Event) {
    match event {
        Event::Error(e) => log::error!("{e}"),
        Event::PeerBlacklisted { addr } => log::warn!("blacklisted peer {addr}"),
        Event::OriginFetchFailed { digest, status } => {
            log::warn!("remote fetch failed for {}: {status}", digest.to_hex())
        }
        other => log::info!("{other:?}"),
    }
}
