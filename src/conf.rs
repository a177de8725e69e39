//! Configuration for the three binaries (`origin`, `agent`, `tracker`):
//! `Default`-driven, programmatic structs in the teacher's `conf.rs` shape,
//! plus a file (`toml`) + CLI (`clap`) layer on top. File values override
//! built-in defaults; CLI flags override file values.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::metainfo::PieceLengthPolicy;
use crate::PeerId;

pub const CLIENT_ID: &PeerId = b"blobmesh-00000000000";

/// Flags common to all three binaries (spec.md §6's CLI surface).
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Path to a TOML config file. Its values override the built-in
    /// defaults; any flag below overrides the file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub peer_ip: Option<IpAddr>,

    #[arg(long)]
    pub peer_port: Option<u16>,

    #[arg(long)]
    pub zone: Option<String>,

    #[arg(long)]
    pub cluster: Option<String>,
}

/// The on-disk shape `--config` points at. Every field is optional so a
/// file can override as little or as much of the defaults as it wants.
#[derive(Debug, Default, Deserialize)]
struct FileConf {
    port: Option<u16>,
    peer_ip: Option<IpAddr>,
    peer_port: Option<u16>,
    zone: Option<String>,
    cluster: Option<String>,
    store_root: Option<PathBuf>,
    tracker_url: Option<String>,
    origin_hosts: Option<Vec<String>>,
    origin_owners_per_digest: Option<usize>,
    piece_length_policy: Option<PieceLengthPolicy>,
    remote_backend_url: Option<String>,
}

fn load_file_conf(path: Option<&Path>) -> anyhow::Result<FileConf> {
    match path {
        Some(p) => {
            let raw = std::fs::read_to_string(p)?;
            Ok(toml::from_str(&raw)?)
        }
        None => Ok(FileConf::default()),
    }
}

/// Identity and placement shared by every binary: who we are on the
/// network (`peer_ip`/`peer_port`/`zone`/`cluster`), which port we serve
/// our own HTTP surface on, and where our blobs live on disk.
#[derive(Debug, Clone)]
pub struct NodeConf {
    pub client_id: PeerId,
    pub port: u16,
    pub peer_ip: IpAddr,
    pub peer_port: u16,
    pub zone: String,
    pub cluster: String,
    pub store_root: PathBuf,
    pub piece_length_policy: PieceLengthPolicy,
}

impl NodeConf {
    fn from_layers(file: &FileConf, cli: &Cli, default_port: u16) -> Self {
        NodeConf {
            client_id: *CLIENT_ID,
            port: cli.port.or(file.port).unwrap_or(default_port),
            peer_ip: cli
                .peer_ip
                .or(file.peer_ip)
                .unwrap_or(IpAddr::from([127, 0, 0, 1])),
            peer_port: cli.peer_port.or(file.peer_port).unwrap_or(6881),
            zone: cli
                .zone
                .clone()
                .or_else(|| file.zone.clone())
                .unwrap_or_else(|| "default".to_string()),
            cluster: cli
                .cluster
                .clone()
                .or_else(|| file.cluster.clone())
                .unwrap_or_else(|| "default".to_string()),
            store_root: file
                .store_root
                .clone()
                .unwrap_or_else(|| PathBuf::from("./blobmesh-data")),
            piece_length_policy: file
                .piece_length_policy
                .clone()
                .unwrap_or_default(),
        }
    }
}

/// Resolved configuration for the `blobmesh-origin` binary.
#[derive(Debug, Clone)]
pub struct OriginConf {
    pub node: NodeConf,
    pub ring_hosts: Vec<String>,
    pub owners_per_digest: usize,
    pub tracker_url: Option<String>,
    pub backend: crate::origin::RemoteBackend,
}

impl OriginConf {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let file = load_file_conf(cli.config.as_deref())?;
        let node = NodeConf::from_layers(&file, cli, 7001);
        let self_addr = format!("{}:{}", node.peer_ip, node.port);
        let mut ring_hosts = file.origin_hosts.clone().unwrap_or_default();
        if !ring_hosts.contains(&self_addr) {
            ring_hosts.push(self_addr);
        }
        let backend = match &file.remote_backend_url {
            Some(url) => crate::origin::RemoteBackend::Http {
                base_url: url.parse()?,
            },
            None => {
                let mut root = node.store_root.clone();
                root.set_file_name(format!(
                    "{}-remote-mirror",
                    root.file_name().and_then(|n| n.to_str()).unwrap_or("blobmesh")
                ));
                crate::origin::RemoteBackend::LocalFs { root }
            }
        };
        Ok(OriginConf {
            node,
            ring_hosts,
            owners_per_digest: file.origin_owners_per_digest.unwrap_or(3),
            tracker_url: file.tracker_url.clone(),
            backend,
        })
    }
}

/// Resolved configuration for the `blobmesh-agent` binary.
#[derive(Debug, Clone)]
pub struct AgentConf {
    pub node: NodeConf,
    pub tracker_url: String,
    pub origin_hosts: Vec<String>,
    pub origin_owners_per_digest: usize,
    pub scheduler: crate::scheduler::SchedulerConf,
}

impl AgentConf {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let file = load_file_conf(cli.config.as_deref())?;
        let node = NodeConf::from_layers(&file, cli, 7002);
        let tracker_url = file
            .tracker_url
            .clone()
            .unwrap_or_else(|| "http://127.0.0.1:7003".to_string());
        let scheduler = crate::scheduler::SchedulerConf {
            client_id: node.client_id,
            ..Default::default()
        };
        Ok(AgentConf {
            node,
            tracker_url,
            origin_hosts: file.origin_hosts.clone().unwrap_or_default(),
            origin_owners_per_digest: file.origin_owners_per_digest.unwrap_or(3),
            scheduler,
        })
    }
}

/// Resolved configuration for the `blobmesh-tracker` binary.
#[derive(Debug, Clone)]
pub struct TrackerConf {
    pub node: NodeConf,
    pub server: crate::tracker::ServerConf,
}

impl TrackerConf {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let file = load_file_conf(cli.config.as_deref())?;
        let node = NodeConf::from_layers(&file, cli, 7003);
        Ok(TrackerConf {
            node,
            server: crate::tracker::ServerConf::default(),
        })
    }
}

/// Legacy programmatic defaults, kept for the parts of the store/scheduler
/// that still take a plain `Duration`-bearing conf rather than the
/// per-binary structs above (e.g. test setup that never touches a CLI or
/// file layer at all).
#[derive(Debug, Clone)]
pub struct TorrentConf {
    pub min_requested_peer_count: usize,
    pub max_connected_peer_count: usize,
    pub announce_interval: Duration,
    pub tracker_error_threshold: usize,
}

impl Default for TorrentConf {
    fn default() -> Self {
        TorrentConf {
            min_requested_peer_count: 10,
            max_connected_peer_count: 50,
            announce_interval: Duration::from_secs(60),
            tracker_error_threshold: 15,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_file_values_which_override_defaults() {
        let file = FileConf {
            port: Some(9000),
            zone: Some("file-zone".to_string()),
            ..Default::default()
        };
        let cli = Cli {
            config: None,
            port: None,
            peer_ip: None,
            peer_port: None,
            zone: Some("cli-zone".to_string()),
            cluster: None,
        };
        let node = NodeConf::from_layers(&file, &cli, 1234);
        assert_eq!(node.port, 9000, "file overrides built-in default");
        assert_eq!(node.zone, "cli-zone", "cli overrides file");
        assert_eq!(node.cluster, "default", "falls back to built-in default");
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let cli = Cli {
            config: None,
            port: None,
            peer_ip: None,
            peer_port: None,
            zone: None,
            cluster: None,
        };
        let conf = TrackerConf::load(&cli).unwrap();
        assert_eq!(conf.node.port, 7003);
    }
}
