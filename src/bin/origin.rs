//! Origin cluster node: serves cached blobs over HTTP, refreshes missing
//! ones from a remote backend, and seeds them into the peer swarm once
//! cached.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;

use blobmesh::conf::{Cli, OriginConf};
use blobmesh::observability::{Event, Observability, ObservabilityConf};
use blobmesh::origin::{OriginState, Ring};
use blobmesh::scheduler::{self, SchedulerConf};
use blobmesh::store::LocalStore;
use blobmesh::tracker::{Client as TrackerClient, ClientConf as TrackerClientConf, PeerContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let conf = OriginConf::load(&cli)?;

    let store = Arc::new(LocalStore::open(&conf.node.store_root)?);
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

    let tracker_client = conf.tracker_url.as_ref().map(|url| {
        Arc::new(TrackerClient::new(TrackerClientConf {
            tracker_url: url.parse().expect("valid tracker url"),
            peer_count: 50,
            zone: conf.node.zone.clone(),
        }))
    });

    let peer_context = PeerContext {
        peer_id: conf.node.client_id,
        addr: peer_addr,
        zone: conf.node.zone.clone(),
        cluster: conf.node.cluster.clone(),
        origin: true,
    };

    let state = Arc::new(OriginState::new(
        store,
        conf.node.piece_length_policy.clone(),
        Ring::new(conf.ring_hosts.clone()),
        format!("{}:{}", conf.node.peer_ip, conf.node.port),
        conf.backend.clone(),
        Arc::new(blobmesh::origin::Refresher::new()),
        scheduler_tx,
        conf.node.client_id,
        conf.node.peer_port,
        peer_context,
        conf.tracker_url.clone(),
        tracker_client,
        obs,
    ));

    let addr = SocketAddr::new(conf.node.peer_ip, conf.node.port);
    log::info!("origin listening on {addr}, ring={:?}", conf.ring_hosts);
    axum::Server::bind(&addr)
        .serve(blobmesh::origin::router(state).into_make_service())
        .await?;

    Ok(())
}

/// Accepts inbound wire-protocol connections and hands each to the
/// scheduler, mirroring the teacher's listener task.
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
