//! Tracker node: the peer-set rendezvous service for every swarm (spec.md
//! §4.4). Holds no durable state -- a restart recovers as peers re-announce.

use std::net::SocketAddr;

use clap::Parser;

use blobmesh::conf::{Cli, TrackerConf};
use blobmesh::observability::{Event, Observability, ObservabilityConf};
use blobmesh::tracker::Tracker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let conf = TrackerConf::load(&cli)?;

    let (obs, mut events) = Observability::channel(ObservabilityConf::default());
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    let tracker = Tracker::new(conf.server, obs);
    let _sweep_handle = tracker.spawn_eviction_sweep();

    let addr = SocketAddr::new(conf.node.peer_ip, conf.node.port);
    log::info!("tracker listening on {addr}");
    axum::Server::bind(&addr)
        .serve(tracker.router().into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    Ok(())
}

fn log_event(event: &Event) {
    match event {
        Event::Error(e) => log::error!("{e}"),
        Event::TrackerAnnounceRejected { info_hash } => {
            log::warn!("rejected announce for {}", hex::encode(info_hash))
        }
        other => log::info!("{other:?}"),
    }
}
