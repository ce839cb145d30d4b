//! Three-node Raft cluster driven over an in-process transport:
//! election, replication, leader failure, and catch-up.

use nornicdb::{GraphStore, LogPayload, Message, NodeId, PropertyMap, RaftConfig, RaftNode, WalOp};
use std::collections::HashMap;
use std::time::{Duration, Instant};

fn voters() -> Vec<String> {
    vec!["a".to_string(), "b".to_string(), "c".to_string()]
}

fn cluster(now: Instant) -> HashMap<String, RaftNode> {
    voters()
        .into_iter()
        .map(|id| {
            let node = RaftNode::new(RaftConfig::new(id.clone(), voters()), now);
            (id, node)
        })
        .collect()
}

/// Deliver queued messages until quiescent, dropping traffic to and
/// from `down` nodes.
fn pump(
    nodes: &mut HashMap<String, RaftNode>,
    mut outbox: Vec<(String, String, Message)>,
    down: &[&str],
    now: Instant,
) {
    let mut rounds = 0;
    while !outbox.is_empty() {
        rounds += 1;
        assert!(rounds < 200, "message storm");
        let mut next = Vec::new();
        for (from, to, message) in outbox.drain(..) {
            if down.contains(&from.as_str()) || down.contains(&to.as_str()) {
                continue;
            }
            if let Some(node) = nodes.get_mut(&to) {
                for (target, reply) in node.handle_message(&from, message, now) {
                    next.push((to.clone(), target, reply));
                }
            }
        }
        outbox = next;
    }
}

/// Tick every live node, shuttling whatever traffic results.
fn tick_all(nodes: &mut HashMap<String, RaftNode>, down: &[&str], now: Instant) {
    let ids: Vec<String> = nodes.keys().cloned().collect();
    let mut outbox = Vec::new();
    for id in ids {
        if down.contains(&id.as_str()) {
            continue;
        }
        for (to, message) in nodes.get_mut(&id).unwrap().tick(now) {
            outbox.push((id.clone(), to, message));
        }
    }
    pump(nodes, outbox, down, now);
}

/// Advance simulated time until some live node leads.
fn run_until_leader(
    nodes: &mut HashMap<String, RaftNode>,
    down: &[&str],
    mut now: Instant,
) -> (String, Instant) {
    for _ in 0..200 {
        now += Duration::from_millis(25);
        tick_all(nodes, down, now);
        // Transient dual leadership is possible while a deposed leader
        // has not yet seen the higher term; the highest term wins.
        if let Some(leader) = nodes
            .iter()
            .filter(|(id, n)| n.is_leader() && !down.contains(&id.as_str()))
            .max_by_key(|(_, n)| n.term())
            .map(|(id, _)| id.clone())
        {
            return (leader, now);
        }
    }
    panic!("no leader elected");
}

fn create_node_op(i: u64) -> WalOp {
    WalOp::CreateNode {
        id: NodeId::new(i),
        labels: vec!["Replicated".to_string()],
        properties: PropertyMap::new(),
    }
}

#[test]
fn election_replication_failover_and_catchup() {
    let start = Instant::now();
    let mut nodes = cluster(start);

    // Phase 1: a leader emerges from election timeouts alone.
    let (leader1, now) = run_until_leader(&mut nodes, &[], start);
    let term1 = nodes[&leader1].term();
    assert!(term1 >= 1);

    // Phase 2: the leader accepts writes; a majority commits them.
    for i in 1..=5 {
        nodes.get_mut(&leader1).unwrap().propose(create_node_op(i), now).unwrap();
    }
    let mut now = now;
    for _ in 0..4 {
        now += Duration::from_millis(60);
        tick_all(&mut nodes, &[], now);
    }
    for (id, node) in &nodes {
        assert_eq!(node.commit_index(), 5, "node {} behind", id);
    }

    // Committed entries apply in leader-append order on every node.
    let follower = nodes
        .keys()
        .find(|id| **id != leader1)
        .cloned()
        .unwrap();
    let committed = nodes.get_mut(&follower).unwrap().take_committed();
    let indexes: Vec<u64> = committed.iter().map(|e| e.index).collect();
    assert_eq!(indexes, vec![1, 2, 3, 4, 5]);

    // Phase 3: kill the leader. Within election timeout + heartbeat, a
    // follower takes over and accepts writes.
    let dead = leader1.clone();
    let (leader2, now) = run_until_leader(&mut nodes, &[dead.as_str()], now);
    assert_ne!(leader2, dead);
    assert!(nodes[&leader2].term() > term1);

    nodes.get_mut(&leader2).unwrap().propose(create_node_op(6), now).unwrap();
    let mut now = now;
    for _ in 0..4 {
        now += Duration::from_millis(60);
        tick_all(&mut nodes, &[dead.as_str()], now);
    }
    assert_eq!(nodes[&leader2].commit_index(), 6);

    // Phase 4: the killed node rejoins. Its first election attempt uses
    // a stale log, so it cannot win; once a leader's appends reach it,
    // it settles as a follower and catches up via log replication.
    let (leader3, now) = run_until_leader(&mut nodes, &[], now);
    let mut now = now;
    for _ in 0..6 {
        now += Duration::from_millis(60);
        tick_all(&mut nodes, &[], now);
    }
    assert_ne!(nodes.values().filter(|n| n.is_leader()).count(), 0);
    assert_eq!(nodes[&dead].commit_index(), 6);
    assert_eq!(nodes[&dead].leader_id(), Some(leader3.as_str()));
}

#[test]
fn committed_log_replays_into_storage() {
    let start = Instant::now();
    let mut nodes = cluster(start);
    let (leader, now) = run_until_leader(&mut nodes, &[], start);

    for i in 1..=3 {
        nodes.get_mut(&leader).unwrap().propose(create_node_op(i), now).unwrap();
    }
    let mut now = now;
    for _ in 0..4 {
        now += Duration::from_millis(60);
        tick_all(&mut nodes, &[], now);
    }

    // A follower applies its committed entries to a local store. The
    // entries carry Raft's term/index in their logical clock.
    let follower = nodes.keys().find(|id| **id != leader).cloned().unwrap();
    let store = GraphStore::in_memory();
    for log_entry in nodes.get_mut(&follower).unwrap().take_committed() {
        if let LogPayload::Op { entry } = log_entry.payload {
            assert_eq!(entry.clock.index, log_entry.index);
            assert!(entry.clock.term >= 1);
            store.apply_entry(&entry).unwrap();
        }
    }
    let stats = store.stats();
    assert_eq!(stats.node_count, 3);
    assert!(store.get_node(NodeId::new(2)).unwrap().has_label("Replicated"));
}

#[test]
fn snapshot_catchup_for_lagging_follower() {
    let start = Instant::now();
    let mut config_nodes = cluster(start);
    // Rebuild with a tiny snapshot threshold on every node.
    for id in voters() {
        let mut config = RaftConfig::new(id.clone(), voters());
        config.snapshot_threshold = 4;
        *config_nodes.get_mut(&id).unwrap() = RaftNode::new(config, start);
    }
    let mut nodes = config_nodes;
    let (leader, now) = run_until_leader(&mut nodes, &[], start);
    let lagging = nodes.keys().find(|id| **id != leader).cloned().unwrap();

    // Commit 10 entries while one follower is down.
    for i in 1..=10 {
        nodes.get_mut(&leader).unwrap().propose(create_node_op(i), now).unwrap();
    }
    let mut now = now;
    for _ in 0..4 {
        now += Duration::from_millis(60);
        tick_all(&mut nodes, &[lagging.as_str()], now);
    }
    assert_eq!(nodes[&leader].commit_index(), 10);

    // Compact the leader's log, then let the lagging follower return.
    assert!(nodes
        .get_mut(&leader)
        .unwrap()
        .maybe_compact(b"compacted-state".to_vec()));
    for _ in 0..4 {
        now += Duration::from_millis(60);
        tick_all(&mut nodes, &[], now);
    }
    assert_eq!(nodes[&lagging].commit_index(), 10);
    assert_eq!(
        nodes
            .get_mut(&lagging)
            .unwrap()
            .take_snapshot_to_install()
            .as_deref(),
        Some(&b"compacted-state"[..])
    );
}
