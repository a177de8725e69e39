//! The peer scheduler: a single-owner event loop that holds every active
//! torrent and connection for this agent. No state here is behind a lock;
//! everything is owned by [`Scheduler::run`] and mutated only in response
//! to a [`Command`], following the teacher's engine/torrent actor split
//! but collapsing it into one task, since a torrent's piece picker and its
//! connections' capacity accounting are too tightly coupled to split
//! across tasks without re-introducing the coordination the actor model
//! was meant to avoid.

pub mod capacity;
pub mod connection;
pub mod events;
pub mod piece_picker;
pub mod preemption;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{self, JoinHandle};
use tokio_util::codec::Framed;

use crate::error::peer::PeerError;
use crate::metainfo::MetaInfo;
use crate::observability::{Event, Observability};
use crate::store::LocalStore;
use crate::wire::{Handshake, HandshakeCodec, Message, MessageCodec};
use crate::{Bitfield, InfoHash, PeerId, PieceIndex};

use capacity::{CapacityLimits, CapacityTracker};
use connection::Connection;
use piece_picker::PiecePicker;
use preemption::PreemptionTracker;
use torrent::{Torrent, TorrentState};

pub mod torrent;

pub type Sender = UnboundedSender<Command>;
type Receiver = UnboundedReceiver<Command>;

#[derive(Debug, Clone)]
pub struct SchedulerConf {
    pub client_id: PeerId,
    pub capacity: CapacityLimits,
    pub blacklist_window: Duration,
    pub tti: Duration,
    pub tick_interval: Duration,
    /// Outstanding piece requests allowed on a single connection at once.
    pub max_pending_pieces: usize,
    /// How long a request may sit unresolved before preemption re-issues
    /// it on another connection.
    pub request_deadline: Duration,
    /// Download rate below which a connection is considered too slow to
    /// keep its pending requests, triggering preemption before the
    /// deadline lapses.
    pub min_throughput_bytes_per_sec: u64,
}

impl Default for SchedulerConf {
    fn default() -> Self {
        SchedulerConf {
            client_id: *b"blobmesh-agent-00000",
            capacity: CapacityLimits::default(),
            blacklist_window: Duration::from_secs(15 * 60),
            tti: Duration::from_secs(5 * 60),
            tick_interval: Duration::from_secs(5),
            max_pending_pieces: 5,
            request_deadline: Duration::from_secs(30),
            min_throughput_bytes_per_sec: 1024,
        }
    }
}

/// Commands the scheduler accepts, sent either by its own connection tasks
/// or by an owning binary (e.g. in response to a tracker announce).
pub enum Command {
    /// Begin leeching or seeding a blob.
    StartTorrent {
        metainfo: Arc<MetaInfo>,
        own_pieces: Bitfield,
    },
    /// Fresh peers for a torrent arrived from the tracker client.
    PeersDiscovered {
        info_hash: InfoHash,
        peers: Vec<SocketAddr>,
    },
    /// The tracker hard-rejected this torrent's info hash.
    TrackerRejected { info_hash: InfoHash },
    /// An inbound TCP connection arrived, not yet handshaken.
    Inbound { stream: TcpStream, addr: SocketAddr },
    /// A connection task reports something happened.
    ConnectionEvent {
        addr: SocketAddr,
        event: ConnectionEvent,
    },
    /// Periodic housekeeping: TTI expiry, blacklist eviction.
    Tick,
    Shutdown,
}

pub enum ConnectionEvent {
    Handshaken { info_hash: InfoHash, peer_id: PeerId },
    HandshakeFailed(PeerError),
    Message(Message),
    PieceVerified {
        index: PieceIndex,
        ok: bool,
    },
    Closed,
}

struct TorrentEntry {
    torrent: Torrent,
    metainfo: Arc<MetaInfo>,
    picker: PiecePicker,
    connections: Vec<SocketAddr>,
}

struct ConnectionTask {
    tx: UnboundedSender<OutboundMessage>,
}

pub enum OutboundMessage {
    Send(Message),
    Close,
}

pub struct Scheduler {
    conf: SchedulerConf,
    store: Arc<LocalStore>,
    obs: Observability,
    cmd_rx: Receiver,
    /// A clone of the scheduler's own command sender, handed to each
    /// connection task so it can report back without the scheduler
    /// needing to plumb a channel through every call site.
    self_tx: Sender,
    torrents: HashMap<InfoHash, TorrentEntry>,
    connections: HashMap<SocketAddr, Connection>,
    outbound: HashMap<SocketAddr, ConnectionTask>,
    capacity: CapacityTracker,
    preemption: PreemptionTracker,
}

pub fn spawn(
    conf: SchedulerConf,
    store: Arc<LocalStore>,
    obs: Observability,
) -> (Sender, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let capacity = CapacityTracker::new(conf.capacity);
    let preemption = PreemptionTracker::new(conf.blacklist_window);
    let self_tx = cmd_tx.clone();

    let mut scheduler = Scheduler {
        conf,
        store,
        obs,
        cmd_rx,
        self_tx,
        torrents: HashMap::new(),
        connections: HashMap::new(),
        outbound: HashMap::new(),
        capacity,
        preemption,
    };

    let handle = task::spawn(async move { scheduler.run().await });
    (cmd_tx, handle)
}

impl Scheduler {
    async fn run(&mut self) {
        let mut ticker = tokio::time::interval(self.conf.tick_interval);
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Shutdown) | None => break,
                        Some(cmd) => self.handle_command(cmd),
                    }
                }
                _ = ticker.tick() => self.handle_command(Command::Tick),
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::StartTorrent { metainfo, own_pieces } => {
                self.start_torrent(metainfo, own_pieces)
            }
            Command::PeersDiscovered { info_hash, peers } => {
                self.connect_to_peers(info_hash, peers)
            }
            Command::TrackerRejected { info_hash } => {
                if let Some(entry) = self.torrents.get_mut(&info_hash) {
                    entry.torrent.on_tracker_rejected();
                    self.obs
                        .emit(Event::TrackerAnnounceRejected { info_hash });
                }
            }
            Command::Inbound { stream, addr } => self.accept_inbound(stream, addr),
            Command::ConnectionEvent { addr, event } => self.handle_connection_event(addr, event),
            Command::Tick => self.tick(),
            Command::Shutdown => {}
        }
    }

    fn start_torrent(&mut self, metainfo: Arc<MetaInfo>, own_pieces: Bitfield) {
        let info_hash = metainfo.info_hash;
        let piece_count = metainfo.piece_count();
        let now = Instant::now();

        let mut torrent = Torrent::new(info_hash, piece_count, self.conf.tti, now);
        let clean = own_pieces.count_ones();
        torrent.pieces_clean = clean;
        torrent.on_announced(now);

        let picker = PiecePicker::new(piece_count, own_pieces);

        self.torrents.insert(
            info_hash,
            TorrentEntry {
                torrent,
                metainfo,
                picker,
                connections: Vec::new(),
            },
        );
        self.obs.emit(Event::TorrentAnnounced(info_hash));
    }

    fn connect_to_peers(&mut self, info_hash: InfoHash, peers: Vec<SocketAddr>) {
        let Some(entry) = self.torrents.get(&info_hash) else {
            return;
        };
        if !entry.torrent.is_active() {
            return;
        }

        let piece_count = entry.metainfo.piece_count();
        let mut connected = Vec::new();

        for addr in peers {
            if self.connections.contains_key(&addr) {
                continue;
            }
            if self.preemption.is_blacklisted(addr.ip(), Instant::now()) {
                continue;
            }
            if !self.make_room(info_hash) {
                break;
            }

            let conn = Connection::new(addr, info_hash, piece_count, Instant::now());
            self.connections.insert(addr, conn);
            self.capacity.record_open(info_hash);
            connected.push(addr);

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            self.outbound.insert(addr, ConnectionTask { tx: out_tx });

            let cmd_tx = self.self_sender();
            let client_id = self.conf.client_id;
            task::spawn(async move {
                connect_and_run(addr, info_hash, client_id, cmd_tx, out_rx).await;
            });
        }

        if let Some(entry) = self.torrents.get_mut(&info_hash) {
            entry.connections.extend(connected);
        }
    }

    fn self_sender(&self) -> Sender {
        self.self_tx.clone()
    }

    /// Ensures a slot is free for `info_hash`, evicting the lowest-scoring
    /// connection if the relevant cap (global or per-torrent) is already
    /// full. Never evicts a connection that's the sole source of a piece
    /// still missing in its torrent. Returns whether a slot is now free.
    fn make_room(&mut self, info_hash: InfoHash) -> bool {
        if self.capacity.has_room(info_hash) {
            return true;
        }

        let scope: Vec<SocketAddr> = if self.capacity.is_globally_full() {
            self.connections.keys().copied().collect()
        } else {
            match self.torrents.get(&info_hash) {
                Some(entry) => entry.connections.clone(),
                None => return false,
            }
        };

        let mut candidates = Vec::new();
        for addr in scope {
            let Some(conn) = self.connections.get(&addr) else {
                continue;
            };
            if !conn.is_open() {
                continue;
            }
            let sole_source = self
                .torrents
                .get(&conn.info_hash)
                .map(|e| e.picker.is_sole_source(&conn.peer_pieces))
                .unwrap_or(false);
            if sole_source {
                continue;
            }
            let score = CapacityTracker::score(&conn.counters, conn.peer_pieces.count_ones());
            candidates.push((addr, score));
        }

        let victim = CapacityTracker::pick_eviction(candidates.iter().map(|(a, s)| (a, *s)));
        let Some(victim) = victim else {
            return false;
        };

        self.close_connection(victim);
        self.capacity.has_room(info_hash)
    }

    /// Wires up an accepted TCP connection's outbound channel and hands the
    /// stream to a task that performs the server side of the handshake; the
    /// connection isn't added to `self.connections` until that handshake
    /// resolves, since the info hash it's for isn't known before then.
    fn accept_inbound(&mut self, stream: TcpStream, addr: SocketAddr) {
        if self.connections.contains_key(&addr) || self.outbound.contains_key(&addr) {
            return;
        }
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.outbound.insert(addr, ConnectionTask { tx: out_tx });

        let cmd_tx = self.self_sender();
        let client_id = self.conf.client_id;
        task::spawn(async move {
            accept_and_run(stream, addr, client_id, cmd_tx, out_rx).await;
        });
    }

    fn handle_connection_event(&mut self, addr: SocketAddr, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Handshaken { info_hash, peer_id } => {
                self.on_handshaken(addr, info_hash, peer_id)
            }
            ConnectionEvent::HandshakeFailed(_) => {
                self.demerit(addr);
                self.close_connection(addr);
            }
            ConnectionEvent::Message(msg) => self.handle_message(addr, msg),
            ConnectionEvent::PieceVerified { index, ok } => {
                if !ok {
                    self.demerit(addr);
                }
                self.on_piece_resolved(addr, index, ok);
            }
            ConnectionEvent::Closed => self.close_connection(addr),
        }
    }

    /// Resolves a completed handshake for either side. For an outbound
    /// connection this just validates; for an inbound one (no entry in
    /// `self.connections` yet) it first decides whether to admit the peer
    /// at all, based on whether the claimed torrent is active and has room.
    fn on_handshaken(&mut self, addr: SocketAddr, info_hash: InfoHash, peer_id: PeerId) {
        let client_id = self.conf.client_id;

        if !self.connections.contains_key(&addr) {
            let admitted = self
                .torrents
                .get(&info_hash)
                .map(|e| (e.torrent.is_active(), e.metainfo.piece_count()));

            let Some((active, piece_count)) = admitted else {
                self.close_connection(addr);
                return;
            };
            if !active || !self.make_room(info_hash) {
                self.close_connection(addr);
                return;
            }

            let conn = Connection::new(addr, info_hash, piece_count, Instant::now());
            self.connections.insert(addr, conn);
            self.capacity.record_open(info_hash);
            if let Some(entry) = self.torrents.get_mut(&info_hash) {
                entry.connections.push(addr);
            }
        }

        let result = {
            let Some(conn) = self.connections.get_mut(&addr) else {
                return;
            };
            conn.on_handshake(info_hash, peer_id, client_id, Instant::now())
        };

        if result.is_err() {
            self.close_connection(addr);
            return;
        }

        if let Some(have) = self.torrents.get(&info_hash).map(|e| e.picker.have().clone()) {
            self.send(addr, Message::Bitfield(have));
        }
    }

    fn handle_message(&mut self, addr: SocketAddr, msg: Message) {
        let info_hash = {
            let Some(conn) = self.connections.get_mut(&addr) else {
                return;
            };
            if !conn.is_open() {
                return;
            }
            conn.note_activity(Instant::now());
            conn.info_hash
        };

        match msg {
            Message::Bitfield(bitfield) => {
                if let Some(conn) = self.connections.get_mut(&addr) {
                    conn.on_bitfield(bitfield.clone());
                }
                if let Some(entry) = self.torrents.get_mut(&info_hash) {
                    entry.picker.add_peer_bitfield(&bitfield);
                }
                self.request_next_piece(addr, info_hash);
            }
            Message::Have { piece_index } => {
                if let Some(conn) = self.connections.get_mut(&addr) {
                    conn.on_have(piece_index);
                }
                if let Some(entry) = self.torrents.get_mut(&info_hash) {
                    entry.picker.on_have(piece_index);
                }
            }
            Message::Request { piece_index } => {
                self.serve_piece_request(addr, info_hash, piece_index);
            }
            Message::Piece { piece_index, data } => {
                self.on_piece_received(addr, info_hash, piece_index, data);
            }
            Message::Cancel { piece_index } => {
                if let Some(entry) = self.torrents.get_mut(&info_hash) {
                    entry.picker.cancel_request(piece_index);
                }
            }
        }
    }

    /// Tops up this connection's outstanding requests up to
    /// `max_pending_pieces`, the budget backpressuring how far ahead of
    /// the peer we let ourselves get.
    fn request_next_piece(&mut self, addr: SocketAddr, info_hash: InfoHash) {
        let Some(peer_pieces) = self.connections.get(&addr).map(|c| c.peer_pieces.clone()) else {
            return;
        };

        loop {
            let pending = match self.connections.get(&addr) {
                Some(conn) => conn.pending_count(),
                None => return,
            };
            if pending >= self.conf.max_pending_pieces {
                break;
            }

            let index = {
                let Some(entry) = self.torrents.get_mut(&info_hash) else {
                    return;
                };
                entry.picker.pick_for_peer(&peer_pieces)
            };

            let Some(index) = index else {
                break;
            };

            if let Some(conn) = self.connections.get_mut(&addr) {
                conn.request_started(index, Instant::now());
            }
            self.send(addr, Message::Request { piece_index: index });
        }
    }

    fn serve_piece_request(&mut self, addr: SocketAddr, info_hash: InfoHash, index: PieceIndex) {
        let Some(entry) = self.torrents.get(&info_hash) else {
            return;
        };
        let piece_len = entry.metainfo.piece_len(index);
        match self
            .store
            .read_piece(entry.metainfo.digest, index, entry.metainfo.piece_length, piece_len)
        {
            Ok(data) => {
                let len = data.len() as u64;
                self.send(
                    addr,
                    Message::Piece {
                        piece_index: index,
                        data: data.into(),
                    },
                );
                if let Some(conn) = self.connections.get_mut(&addr) {
                    conn.counters.record_upload(len);
                }
            }
            Err(err) => log::warn!("failed to read piece {index} for {info_hash:?}: {err}"),
        }
    }

    fn on_piece_received(
        &mut self,
        addr: SocketAddr,
        info_hash: InfoHash,
        index: PieceIndex,
        data: bytes::Bytes,
    ) {
        let Some(entry) = self.torrents.get(&info_hash) else {
            return;
        };
        let metainfo = entry.metainfo.clone();
        let expected_hash = metainfo.piece_hashes[index];
        let piece_count = metainfo.piece_count();
        let digest = metainfo.digest;
        let piece_length = metainfo.piece_length;
        let store = self.store.clone();

        if let Some(conn) = self.connections.get_mut(&addr) {
            conn.counters.record_download(data.len() as u64);
        }

        match store.write_piece(digest, piece_count, index, piece_length, expected_hash, &data) {
            Ok(()) => self.on_piece_resolved(addr, index, true),
            Err(err) => {
                log::warn!("piece {index} for {info_hash:?} failed verification: {err}");
                self.on_piece_resolved(addr, index, false);
            }
        }
    }

    fn on_piece_resolved(&mut self, addr: SocketAddr, index: PieceIndex, ok: bool) {
        let Some(info_hash) = self.connections.get(&addr).map(|c| c.info_hash) else {
            return;
        };

        self.clear_pending(addr, index);

        let became_complete = {
            let Some(entry) = self.torrents.get_mut(&info_hash) else {
                return;
            };
            entry.picker.cancel_request(index);
            if !ok {
                return;
            }
            entry.picker.on_piece_clean(index);
            entry.torrent.on_piece_clean(Instant::now());
            entry.torrent.is_complete()
        };

        // A duplicate preemption request elsewhere no longer needs to wait
        // for this piece once it resolves cleanly.
        self.clear_pending_everywhere(info_hash, index);

        self.obs.emit(Event::PieceClean { info_hash, index });

        if became_complete {
            let (digest, piece_count) = {
                let entry = self.torrents.get(&info_hash).expect("torrent still present");
                (entry.metainfo.digest, entry.metainfo.piece_count())
            };
            match self.store.move_download_to_cache(digest, piece_count) {
                Ok(()) => self.obs.emit(Event::TorrentComplete(info_hash)),
                Err(e) => log::error!("failed to promote {info_hash:?} to cache: {e}"),
            }
        } else {
            self.request_next_piece(addr, info_hash);
        }
    }

    fn clear_pending(&mut self, addr: SocketAddr, index: PieceIndex) {
        if let Some(conn) = self.connections.get_mut(&addr) {
            conn.request_resolved(index);
        }
    }

    fn clear_pending_everywhere(&mut self, info_hash: InfoHash, index: PieceIndex) {
        let Some(entry) = self.torrents.get(&info_hash) else {
            return;
        };
        let addrs = entry.connections.clone();
        for addr in addrs {
            self.clear_pending(addr, index);
        }
    }

    fn demerit(&mut self, addr: SocketAddr) {
        if self.preemption.demerit(addr.ip(), Instant::now()) {
            self.obs.emit(Event::PeerBlacklisted { addr: addr.ip() });
        }
    }

    fn send(&self, addr: SocketAddr, msg: Message) {
        if let Some(task) = self.outbound.get(&addr) {
            let _ = task.tx.send(OutboundMessage::Send(msg));
        }
    }

    fn close_connection(&mut self, addr: SocketAddr) {
        if let Some(mut conn) = self.connections.remove(&addr) {
            conn.close();
            self.capacity.record_close(conn.info_hash);
            if let Some(entry) = self.torrents.get_mut(&conn.info_hash) {
                entry.connections.retain(|a| *a != addr);
                entry.picker.remove_peer_bitfield(&conn.peer_pieces);
            }
        }
        if let Some(task) = self.outbound.remove(&addr) {
            let _ = task.tx.send(OutboundMessage::Close);
        }
    }

    /// Scans every connection's pending requests for ones that have aged
    /// past `request_deadline` or sit on a connection whose download rate
    /// has fallen under the floor, and re-issues each on a different
    /// connection that has the piece and room in its own budget. The slow
    /// connection earns a demerit but is left open.
    fn preemption_tick(&mut self, now: Instant) {
        let info_hashes: Vec<InfoHash> = self.torrents.keys().copied().collect();
        for info_hash in info_hashes {
            self.preempt_torrent(info_hash, now);
        }
    }

    fn preempt_torrent(&mut self, info_hash: InfoHash, now: Instant) {
        let Some(entry) = self.torrents.get(&info_hash) else {
            return;
        };
        let addrs = entry.connections.clone();

        let mut stale = Vec::new();
        for &addr in &addrs {
            let Some(conn) = self.connections.get(&addr) else {
                continue;
            };
            if !conn.is_open() {
                continue;
            }
            let starved = (conn.counters.download_rate().max(0) as u64)
                < self.conf.min_throughput_bytes_per_sec;
            for &(index, started) in &conn.in_flight {
                if starved || now.duration_since(started) > self.conf.request_deadline {
                    stale.push((addr, index));
                }
            }
        }

        for (slow_addr, index) in stale {
            let target = addrs.iter().copied().find(|&candidate| {
                if candidate == slow_addr {
                    return false;
                }
                let Some(conn) = self.connections.get(&candidate) else {
                    return false;
                };
                conn.is_open()
                    && conn.peer_pieces.get(index).map(|b| *b).unwrap_or(false)
                    && conn.pending_count() < self.conf.max_pending_pieces
                    && !conn.has_pending(index)
            });

            let Some(target) = target else {
                continue;
            };

            if let Some(entry) = self.torrents.get_mut(&info_hash) {
                entry.picker.note_duplicate_request(index);
            }
            if let Some(conn) = self.connections.get_mut(&slow_addr) {
                conn.refresh_pending(index, now);
            }
            if let Some(conn) = self.connections.get_mut(&target) {
                conn.request_started(index, now);
            }
            self.send(target, Message::Request { piece_index: index });
            self.demerit(slow_addr);
        }
    }

    fn tick(&mut self) {
        let now = Instant::now();
        self.preemption.evict_expired(now);
        self.preemption_tick(now);

        let mut expired = Vec::new();
        for (info_hash, entry) in self.torrents.iter_mut() {
            entry.torrent.tick(now);
            if entry.torrent.state == TorrentState::Expired {
                expired.push(*info_hash);
            }
        }
        for info_hash in expired {
            self.obs.emit(Event::TorrentExpired(info_hash));
            if let Some(entry) = self.torrents.remove(&info_hash) {
                for addr in entry.connections {
                    self.close_connection(addr);
                }
            }
        }
    }
}

/// Dials `addr`, performs the client side of the handshake (send ours
/// first), then relays wire messages until the connection closes.
async fn connect_and_run(
    addr: SocketAddr,
    info_hash: InfoHash,
    client_id: PeerId,
    cmd_tx: Sender,
    out_rx: UnboundedReceiver<OutboundMessage>,
) {
    use futures::{SinkExt, StreamExt};

    let stream = match TcpStream::connect(addr).await {
        Ok(s) => s,
        Err(e) => {
            log::debug!("failed to connect to {addr}: {e}");
            let _ = cmd_tx.send(Command::ConnectionEvent {
                addr,
                event: ConnectionEvent::Closed,
            });
            return;
        }
    };

    let mut handshake_io = Framed::new(stream, HandshakeCodec);
    if handshake_io
        .send(Handshake::new(info_hash, client_id))
        .await
        .is_err()
    {
        let _ = cmd_tx.send(Command::ConnectionEvent {
            addr,
            event: ConnectionEvent::Closed,
        });
        return;
    }

    let remote_handshake = match handshake_io.next().await {
        Some(Ok(h)) => h,
        _ => {
            let _ = cmd_tx.send(Command::ConnectionEvent {
                addr,
                event: ConnectionEvent::Closed,
            });
            return;
        }
    };

    report_handshaken_and_run(handshake_io, addr, remote_handshake, cmd_tx, out_rx).await;
}

/// Accepts a connection already dialed by a remote peer: reads their
/// handshake first, then answers with ours.
async fn accept_and_run(
    stream: TcpStream,
    addr: SocketAddr,
    client_id: PeerId,
    cmd_tx: Sender,
    out_rx: UnboundedReceiver<OutboundMessage>,
) {
    use futures::{SinkExt, StreamExt};

    let mut handshake_io = Framed::new(stream, HandshakeCodec);
    let remote_handshake = match handshake_io.next().await {
        Some(Ok(h)) => h,
        _ => {
            let _ = cmd_tx.send(Command::ConnectionEvent {
                addr,
                event: ConnectionEvent::Closed,
            });
            return;
        }
    };

    if handshake_io
        .send(Handshake::new(remote_handshake.info_hash, client_id))
        .await
        .is_err()
    {
        let _ = cmd_tx.send(Command::ConnectionEvent {
            addr,
            event: ConnectionEvent::Closed,
        });
        return;
    }

    report_handshaken_and_run(handshake_io, addr, remote_handshake, cmd_tx, out_rx).await;
}

/// Reports the remote side's identity once both handshake messages have
/// crossed the wire, then falls into the steady-state message loop.
async fn report_handshaken_and_run(
    handshake_io: Framed<TcpStream, HandshakeCodec>,
    addr: SocketAddr,
    remote_handshake: Handshake,
    cmd_tx: Sender,
    out_rx: UnboundedReceiver<OutboundMessage>,
) {
    let _ = cmd_tx.send(Command::ConnectionEvent {
        addr,
        event: ConnectionEvent::Handshaken {
            info_hash: remote_handshake.info_hash,
            peer_id: remote_handshake.peer_id,
        },
    });

    let stream = handshake_io.into_inner();
    run_message_loop(stream, addr, cmd_tx, out_rx).await;
}

async fn run_message_loop(
    stream: TcpStream,
    addr: SocketAddr,
    cmd_tx: Sender,
    mut out_rx: UnboundedReceiver<OutboundMessage>,
) {
    use futures::{SinkExt, StreamExt};

    let mut framed = Framed::new(stream, MessageCodec);

    loop {
        tokio::select! {
            msg = framed.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        let _ = cmd_tx.send(Command::ConnectionEvent {
                            addr,
                            event: ConnectionEvent::Message(msg),
                        });
                    }
                    _ => break,
                }
            }
            out = out_rx.recv() => {
                match out {
                    Some(OutboundMessage::Send(msg)) => {
                        if framed.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Some(OutboundMessage::Close) | None => break,
                }
            }
        }
    }

    let _ = cmd_tx.send(Command::ConnectionEvent {
        addr,
        event: ConnectionEvent::Closed,
    });
}
