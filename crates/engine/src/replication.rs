//! Replication wiring
//!
//! [`ReplicationRuntime`] turns the replication state machines into live
//! cluster behavior: it binds the cluster port, drives elections and
//! heartbeats from background tasks, ships the WAL tail after local
//! mutations, and applies inbound committed/shipped entries through
//! `GraphStore::apply_entry`. `GraphDb` consults it before every
//! mutation (`check_writable`) and notifies it after (`after_local_write`).
//!
//! Mode behavior:
//!
//! - **Standalone**: no listener, every check passes.
//! - **Hot standby**: the primary ships WAL batches over request/reply
//!   (the ack *is* the reply) and honors the configured ack semantics;
//!   the standby applies batches, persists them to its own WAL, and
//!   watches heartbeats and replication lag for failover.
//! - **Raft**: the node participates in elections; the leader replicates
//!   its locally-durable WAL entries through the log, and followers
//!   apply committed entries (or an installed snapshot) to storage.
//!   Writes surface `QuorumLost` when no leader is known or the leader
//!   cannot hear a majority.
//! - **Multi-region**: local writes ship asynchronously to the peer
//!   regional leaders; inbound batches resolve per-record with
//!   last-write-wins (or are recorded for manual resolution).
//!
//! Cluster nodes bootstrap from empty data directories: the replicated
//! log starts at the first entry written after the cluster forms.

use nornic_core::{now_millis, NornicError, Result};
use nornic_durability::{Wal, WalEntry, WalOp};
use nornic_replication::{
    transport::{self, ClusterListener},
    AckMode, ApplyOutcome, FailoverDecision, LogPayload, Message, PrimaryState, RaftConfig,
    RaftNode, RegionShipper, ReplicationConfig, ReplicationMode, StandbyRole, StandbyState,
};
use nornic_storage::GraphStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How long a synchronous ship waits for the standby's ack.
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Cadence of the raft driver (tick, apply committed, send).
const DRIVER_INTERVAL: Duration = Duration::from_millis(25);

/// Cadence of the standby failover check.
const FAILOVER_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Tokio runtime plus the bound cluster listener and its tasks.
struct NetRuntime {
    rt: tokio::runtime::Runtime,
    local_addr: SocketAddr,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl NetRuntime {
    fn start<H>(bind_addr: &str, handler: H) -> Result<Self>
    where
        H: Fn(Message) -> Option<Message> + Send + Sync + 'static,
    {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("nornic-cluster")
            .enable_all()
            .build()?;
        let listener = rt.block_on(ClusterListener::bind(bind_addr))?;
        let local_addr = listener.local_addr()?;
        let serve = rt.spawn(listener.serve(Arc::new(handler)));
        info!(addr = %local_addr, "cluster port bound");
        Ok(NetRuntime {
            rt,
            local_addr,
            tasks: Mutex::new(vec![serve]),
        })
    }

    fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().push(self.rt.spawn(future));
    }

    fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

struct HotStandby {
    net: NetRuntime,
    role: StandbyRole,
    ack_mode: AckMode,
    peer_addr: Option<String>,
    primary: Option<Arc<Mutex<PrimaryState>>>,
    standby: Option<Arc<Mutex<StandbyState>>>,
    wal: Arc<Wal>,
}

struct RaftRuntime {
    net: NetRuntime,
    node: Arc<Mutex<RaftNode>>,
    wal: Arc<Wal>,
    /// Highest WAL sequence already handed to the raft log.
    last_proposed: AtomicU64,
}

struct MultiRegion {
    net: NetRuntime,
    shipper: Arc<RegionShipper>,
    node_id: String,
    region: String,
    peer_addrs: Vec<String>,
    wal: Arc<Wal>,
    /// Highest WAL sequence already shipped cross-region.
    last_shipped: AtomicU64,
}

enum Inner {
    Standalone,
    HotStandby(Box<HotStandby>),
    Raft(Box<RaftRuntime>),
    MultiRegion(Box<MultiRegion>),
}

/// The live replication personality of one database instance.
pub struct ReplicationRuntime {
    mode: ReplicationMode,
    inner: Inner,
}

impl ReplicationRuntime {
    /// Start replication per the resolved config. Standalone mode binds
    /// nothing; the other modes bind the cluster port and spawn their
    /// background drivers.
    pub fn start(
        config: ReplicationConfig,
        store: Arc<GraphStore>,
        wal: Arc<Wal>,
    ) -> Result<Self> {
        let mode = config.mode;
        let inner = match mode {
            ReplicationMode::Standalone => Inner::Standalone,
            ReplicationMode::HotStandby => {
                Inner::HotStandby(Box::new(Self::start_hot_standby(config, store, wal)?))
            }
            ReplicationMode::Raft => {
                Inner::Raft(Box::new(Self::start_raft(config, store, wal)?))
            }
            ReplicationMode::MultiRegion => {
                Inner::MultiRegion(Box::new(Self::start_multi_region(config, store, wal)?))
            }
        };
        Ok(ReplicationRuntime { mode, inner })
    }

    // =========================================================================
    // Mode constructors
    // =========================================================================

    fn start_hot_standby(
        config: ReplicationConfig,
        store: Arc<GraphStore>,
        wal: Arc<Wal>,
    ) -> Result<HotStandby> {
        let peer_addr = config.peers.first().map(|(_, addr)| addr.clone());

        match config.role {
            StandbyRole::Primary => {
                let mut state = PrimaryState::new(
                    config.node_id.clone(),
                    config.ack_mode,
                    config.heartbeat_interval,
                );
                if config.max_lag_entries > 0 {
                    state = state.with_max_lag(config.max_lag_entries);
                }
                let primary = Arc::new(Mutex::new(state));

                let net = {
                    let primary = Arc::clone(&primary);
                    NetRuntime::start(&config.bind_addr, move |message: Message| {
                        match &message {
                            Message::Fence { from, reason } => {
                                primary.lock().on_fence(from, reason);
                            }
                            Message::AppendResponse { .. } => {
                                primary.lock().on_ack(&message);
                            }
                            _ => {}
                        }
                        None
                    })?
                };

                // Heartbeats carry the shipped high watermark so the
                // standby can observe replication lag.
                if let Some(peer) = peer_addr.clone() {
                    let primary = Arc::clone(&primary);
                    let heartbeat_interval = config.heartbeat_interval;
                    net.spawn(async move {
                        let mut interval = tokio::time::interval(heartbeat_interval);
                        loop {
                            interval.tick().await;
                            let beat = primary.lock().tick(Instant::now());
                            if let Some(beat) = beat {
                                let _ = transport::send_oneway(&peer, &beat).await;
                            }
                        }
                    });
                }

                Ok(HotStandby {
                    net,
                    role: StandbyRole::Primary,
                    ack_mode: config.ack_mode,
                    peer_addr,
                    primary: Some(primary),
                    standby: None,
                    wal,
                })
            }
            StandbyRole::Standby => {
                let mut state = StandbyState::new(
                    config.node_id.clone(),
                    config.failover_timeout,
                    config.allow_unarbitrated_failover,
                    Instant::now(),
                );
                if config.max_lag_entries > 0 {
                    state = state.with_lag_threshold(config.max_lag_entries);
                }
                let standby = Arc::new(Mutex::new(state));

                let net = {
                    let standby = Arc::clone(&standby);
                    let store = Arc::clone(&store);
                    let wal = Arc::clone(&wal);
                    NetRuntime::start(&config.bind_addr, move |message: Message| {
                        match message {
                            Message::WalBatch { entries, .. } => {
                                // Primary→standby application order is
                                // the arrival order; persist to the
                                // local WAL before acking "persisted".
                                let ops: Vec<WalOp> =
                                    entries.iter().map(|e| e.op.clone()).collect();
                                let persisted =
                                    wal.append_batch(ops).and_then(|_| wal.sync()).is_ok();
                                for entry in &entries {
                                    let _ = store.apply_entry(entry);
                                }
                                standby.lock().on_wal_batch(
                                    &entries,
                                    persisted,
                                    Instant::now(),
                                )
                            }
                            Message::Heartbeat { commit_index, .. } => {
                                standby.lock().on_heartbeat(Instant::now(), commit_index);
                                None
                            }
                            _ => None,
                        }
                    })?
                };

                // Failover watchdog: fence the old primary (best effort)
                // before this node starts taking writes.
                {
                    let standby = Arc::clone(&standby);
                    let peer = peer_addr.clone();
                    net.spawn(async move {
                        let mut interval = tokio::time::interval(FAILOVER_CHECK_INTERVAL);
                        loop {
                            interval.tick().await;
                            let decision = standby.lock().check_failover(Instant::now());
                            if let FailoverDecision::Promote(messages) = decision {
                                if let Some(peer) = &peer {
                                    for message in &messages {
                                        let _ = transport::send_oneway(peer, message).await;
                                    }
                                }
                            }
                        }
                    });
                }

                Ok(HotStandby {
                    net,
                    role: StandbyRole::Standby,
                    ack_mode: config.ack_mode,
                    peer_addr,
                    primary: None,
                    standby: Some(standby),
                    wal,
                })
            }
        }
    }

    fn start_raft(
        config: ReplicationConfig,
        store: Arc<GraphStore>,
        wal: Arc<Wal>,
    ) -> Result<RaftRuntime> {
        let mut voters: Vec<String> = config.peers.iter().map(|(id, _)| id.clone()).collect();
        voters.push(config.node_id.clone());
        voters.sort();

        let raft_config = RaftConfig {
            node_id: config.node_id.clone(),
            voters,
            election_timeout_min: config.election_timeout_min,
            election_timeout_max: config.election_timeout_max,
            heartbeat_interval: config.heartbeat_interval,
            snapshot_threshold: config.snapshot_threshold,
        };
        let node = Arc::new(Mutex::new(RaftNode::new(raft_config, Instant::now())));
        let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel::<(String, Message)>();

        let net = {
            let node = Arc::clone(&node);
            let out_tx = out_tx.clone();
            NetRuntime::start(&config.bind_addr, move |message: Message| {
                let sender = message.sender().to_string();
                let replies = node.lock().handle_message(&sender, message, Instant::now());
                for reply in replies {
                    let _ = out_tx.send(reply);
                }
                None
            })?
        };

        // Outbound delivery, keyed by node id.
        let peer_addrs: Arc<HashMap<String, String>> =
            Arc::new(config.peers.iter().cloned().collect());
        {
            let peer_addrs = Arc::clone(&peer_addrs);
            net.spawn(async move {
                while let Some((target, message)) = out_rx.recv().await {
                    match peer_addrs.get(&target) {
                        Some(addr) => {
                            let _ = transport::send_oneway(addr, &message).await;
                        }
                        None => warn!(target, "no address for raft peer"),
                    }
                }
            });
        }

        // Driver: elections and heartbeats, plus applying whatever the
        // cluster committed since the last pass.
        {
            let node = Arc::clone(&node);
            let out_tx = out_tx.clone();
            let store = Arc::clone(&store);
            net.spawn(async move {
                let mut interval = tokio::time::interval(DRIVER_INTERVAL);
                loop {
                    interval.tick().await;
                    let (outbound, committed, snapshot) = {
                        let mut node = node.lock();
                        let outbound = node.tick(Instant::now());
                        (outbound, node.take_committed(), node.take_snapshot_to_install())
                    };
                    for message in outbound {
                        let _ = out_tx.send(message);
                    }
                    if let Some(blob) = snapshot {
                        if let Err(e) = store.load_snapshot(&blob) {
                            warn!(error = %e, "leader snapshot failed to restore");
                        }
                    }
                    for log_entry in committed {
                        if let LogPayload::Op { entry } = log_entry.payload {
                            // Idempotent: the leader already applied its
                            // own entries at mutation time.
                            let _ = store.apply_entry(&entry);
                        }
                    }
                }
            });
        }

        let last_proposed = AtomicU64::new(wal_head(&wal));
        Ok(RaftRuntime {
            net,
            node,
            last_proposed,
            wal,
        })
    }

    fn start_multi_region(
        config: ReplicationConfig,
        store: Arc<GraphStore>,
        wal: Arc<Wal>,
    ) -> Result<MultiRegion> {
        if config.region.is_empty() {
            return Err(NornicError::invalid_input(
                "multi_region mode requires a region id",
            ));
        }
        let shipper = Arc::new(RegionShipper::new(config.region.clone(), config.conflict));

        let net = {
            let shipper = Arc::clone(&shipper);
            let store = Arc::clone(&store);
            let region = config.region.clone();
            let node_id = config.node_id.clone();
            NetRuntime::start(&config.bind_addr, move |message: Message| match message {
                Message::WalBatch {
                    entries,
                    region: from_region,
                    sent_at_millis,
                    ..
                } if from_region != region => {
                    let last = entries.last().map(|e| e.seq).unwrap_or(0);
                    let batch: Vec<(WalEntry, i64)> = entries
                        .into_iter()
                        .map(|entry| (entry, sent_at_millis))
                        .collect();
                    for outcome in shipper.apply_remote_batch(batch, &from_region) {
                        if let ApplyOutcome::Apply(mut entry) = outcome {
                            // Remote regions have their own sequence
                            // space; apply outside the local seq guard.
                            entry.seq = 0;
                            let _ = store.apply_entry(&entry);
                        }
                    }
                    Some(Message::AppendResponse {
                        term: 0,
                        success: true,
                        node_id: node_id.clone(),
                        match_index: last,
                        persisted: true,
                    })
                }
                _ => None,
            })?
        };

        let last_shipped = AtomicU64::new(wal_head(&wal));
        Ok(MultiRegion {
            net,
            shipper,
            node_id: config.node_id.clone(),
            region: config.region,
            peer_addrs: config.peers.iter().map(|(_, addr)| addr.clone()).collect(),
            wal,
            last_shipped,
        })
    }

    // =========================================================================
    // The surface GraphDb consumes
    // =========================================================================

    /// Active replication mode.
    pub fn mode(&self) -> ReplicationMode {
        self.mode
    }

    /// The bound cluster address (None in standalone mode). With a
    /// `:0` bind this is where peers should actually dial.
    pub fn cluster_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            Inner::Standalone => None,
            Inner::HotStandby(hs) => Some(hs.net.local_addr),
            Inner::Raft(raft) => Some(raft.net.local_addr),
            Inner::MultiRegion(mr) => Some(mr.net.local_addr),
        }
    }

    /// The raft leader this node believes in, if any.
    pub fn leader_id(&self) -> Option<String> {
        match &self.inner {
            Inner::Raft(raft) => raft.node.lock().leader_id().map(str::to_string),
            _ => None,
        }
    }

    /// The cross-region shipper (multi-region mode), for draining
    /// recorded conflicts.
    pub fn region_shipper(&self) -> Option<Arc<RegionShipper>> {
        match &self.inner {
            Inner::MultiRegion(mr) => Some(Arc::clone(&mr.shipper)),
            _ => None,
        }
    }

    /// Gate a local mutation.
    ///
    /// - Standalone / multi-region: always writable.
    /// - Hot-standby primary: refuses when fenced; surfaces
    ///   `ReplicaLagExceeded` past the configured backlog cap.
    /// - Hot-standby standby: read-only until promoted.
    /// - Raft: `QuorumLost` without a leader or a reachable majority;
    ///   non-leaders redirect.
    pub fn check_writable(&self) -> Result<()> {
        match &self.inner {
            Inner::Standalone | Inner::MultiRegion(_) => Ok(()),
            Inner::HotStandby(hs) => match hs.role {
                StandbyRole::Primary => {
                    let primary = hs.primary.as_ref().expect("primary state");
                    let state = primary.lock();
                    if !state.accepts_writes() {
                        return Err(NornicError::invalid_input(
                            "primary is fenced; writes refused until an operator intervenes",
                        ));
                    }
                    state.check_lag()
                }
                StandbyRole::Standby => {
                    let standby = hs.standby.as_ref().expect("standby state");
                    if standby.lock().is_promoted() {
                        Ok(())
                    } else {
                        Err(NornicError::invalid_input(
                            "standby is read-only until promoted",
                        ))
                    }
                }
            },
            Inner::Raft(raft) => {
                let node = raft.node.lock();
                node.check_quorum(Instant::now())?;
                if !node.is_leader() {
                    return Err(NornicError::invalid_input(format!(
                        "not the raft leader (leader: {})",
                        node.leader_id().unwrap_or("unknown")
                    )));
                }
                Ok(())
            }
        }
    }

    /// Propagate freshly-logged local mutations: the hot-standby primary
    /// ships the WAL tail (honoring its ack semantics), the raft leader
    /// proposes it into the replicated log, multi-region ships it to the
    /// peer regions.
    pub(crate) fn after_local_write(&self) -> Result<()> {
        match &self.inner {
            Inner::Standalone => Ok(()),
            Inner::HotStandby(hs) => Self::ship_standby_tail(hs),
            Inner::Raft(raft) => Self::propose_tail(raft),
            Inner::MultiRegion(mr) => Self::ship_region_tail(mr),
        }
    }

    fn ship_standby_tail(hs: &HotStandby) -> Result<()> {
        let (Some(primary), Some(peer)) = (hs.primary.as_ref(), hs.peer_addr.as_ref()) else {
            return Ok(());
        };
        let entries = hs.wal.read_after(primary.lock().shipped_seq())?;
        let Some(batch) = primary.lock().ship(entries) else {
            return Ok(());
        };
        let target_seq = primary.lock().shipped_seq();

        match hs.ack_mode {
            AckMode::Async => {
                // Accepted locally; the ack lands whenever it lands.
                let primary = Arc::clone(primary);
                let peer = peer.clone();
                hs.net.spawn(async move {
                    if let Ok(Some(ack)) = transport::request(&peer, &batch).await {
                        primary.lock().on_ack(&ack);
                    }
                });
                Ok(())
            }
            AckMode::SemiSync | AckMode::Sync => {
                let response = hs.net.rt.block_on(async {
                    tokio::time::timeout(ACK_TIMEOUT, transport::request(peer, &batch)).await
                });
                if let Ok(Ok(Some(ack))) = response {
                    primary.lock().on_ack(&ack);
                }
                let state = primary.lock();
                if state.client_ackable(target_seq) {
                    Ok(())
                } else {
                    Err(NornicError::ReplicaLagExceeded {
                        lag_entries: state.lag(),
                    })
                }
            }
        }
    }

    fn propose_tail(raft: &RaftRuntime) -> Result<()> {
        let mut node = raft.node.lock();
        if !node.is_leader() {
            return Ok(());
        }
        let from = raft.last_proposed.load(Ordering::SeqCst);
        let entries = raft.wal.read_after(from)?;
        let now = Instant::now();
        for entry in entries {
            let seq = entry.seq;
            node.propose_entry(entry, now)?;
            raft.last_proposed.store(seq, Ordering::SeqCst);
        }
        // The driver's next tick (≤ 25 ms away) carries the new entries
        // in its append round.
        Ok(())
    }

    fn ship_region_tail(mr: &MultiRegion) -> Result<()> {
        let from = mr.last_shipped.load(Ordering::SeqCst);
        let entries = mr.wal.read_after(from)?;
        let Some(last) = entries.last().map(|e| e.seq) else {
            return Ok(());
        };
        let sent_at = now_millis();
        for entry in &entries {
            mr.shipper.note_local_write(&entry.op, sent_at);
        }
        mr.last_shipped.store(last, Ordering::SeqCst);

        let batch = Message::WalBatch {
            from: mr.node_id.clone(),
            entries,
            region: mr.region.clone(),
            sent_at_millis: sent_at,
        };
        for peer in &mr.peer_addrs {
            let peer = peer.clone();
            let batch = batch.clone();
            mr.net.spawn(async move {
                let _ = transport::request(&peer, &batch).await;
            });
        }
        Ok(())
    }

    /// Stop background tasks. Idempotent; called on database close.
    pub fn shutdown(&self) {
        match &self.inner {
            Inner::Standalone => {}
            Inner::HotStandby(hs) => hs.net.shutdown(),
            Inner::Raft(raft) => raft.net.shutdown(),
            Inner::MultiRegion(mr) => mr.net.shutdown(),
        }
    }
}

fn wal_head(wal: &Wal) -> u64 {
    wal.next_seq().saturating_sub(1)
}
