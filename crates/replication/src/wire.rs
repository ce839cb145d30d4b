//! Cluster wire protocol
//!
//! Per message: a 4-byte big-endian length, then a JSON payload whose
//! `type` field tags the variant. JSON keeps the protocol inspectable on
//! the wire; the fixed tag set below is the whole vocabulary, and
//! decoding dispatches on the tag (no class hierarchy).
//!
//! TLS on the cluster port is a deployment concern layered underneath
//! this codec; the framing is transport-agnostic bytes.

use nornic_core::{NornicError, Result};
use nornic_durability::WalEntry;
use serde::{Deserialize, Serialize};

/// Maximum accepted frame body; anything larger is treated as corruption.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// A compacted prefix shipped to followers too far behind the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBlob {
    /// Index of the last entry the snapshot covers.
    pub last_index: u64,
    /// Term of that entry.
    pub last_term: u64,
    /// Serialized storage state, hex-encoded on the wire.
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// Hex codec for byte payloads inside JSON frames. Hex keeps the codec
/// dependency-local and the frames greppable on the wire.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&bytes.iter().map(|b| format!("{:02x}", b)).collect::<String>())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        if s.len() % 2 != 0 {
            return Err(serde::de::Error::custom("odd hex length"));
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// What a replicated log entry carries: a storage operation or a
/// cluster-membership change (membership rides the log like any other
/// entry, per Raft's configuration-change rule).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogPayload {
    /// A storage mutation.
    Op {
        /// The WAL entry to apply.
        entry: WalEntry,
    },
    /// Add a voting member.
    AddVoter {
        /// Node id to add.
        node_id: String,
    },
    /// Remove a voting member.
    RemoveVoter {
        /// Node id to remove.
        node_id: String,
    },
    /// Leader no-op used to anchor commitment in a fresh term.
    Noop,
}

/// One replicated log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Term the entry was appended under.
    pub term: u64,
    /// Global log index (1-based).
    pub index: u64,
    /// The payload.
    pub payload: LogPayload,
}

/// The tagged message set shared by every replication mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Candidate solicits a vote.
    VoteRequest {
        /// Candidate's term.
        term: u64,
        /// Candidate node id.
        candidate_id: String,
        /// Index of the candidate's last log entry.
        last_log_index: u64,
        /// Term of the candidate's last log entry.
        last_log_term: u64,
    },
    /// Voter answers a vote request.
    VoteResponse {
        /// Voter's current term.
        term: u64,
        /// Whether the vote was granted.
        granted: bool,
        /// Voter node id.
        voter_id: String,
    },
    /// Leader replicates entries (empty = heartbeat-with-commit in Raft).
    AppendEntries {
        /// Leader's term.
        term: u64,
        /// Leader node id.
        leader_id: String,
        /// Index of the entry preceding `entries`.
        prev_log_index: u64,
        /// Term of that entry.
        prev_log_term: u64,
        /// Entries to append.
        entries: Vec<LogEntry>,
        /// Leader's commit index.
        leader_commit: u64,
        /// Compacted prefix for followers behind the log's start.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<SnapshotBlob>,
    },
    /// Follower answers an append.
    AppendResponse {
        /// Follower's current term.
        term: u64,
        /// Whether the entries were accepted.
        success: bool,
        /// Follower node id.
        node_id: String,
        /// Highest index known replicated on the follower.
        match_index: u64,
        /// Hot-standby ack semantics: entries are fsynced, not merely
        /// buffered.
        #[serde(default)]
        persisted: bool,
    },
    /// Hot-standby / cross-region WAL shipment.
    WalBatch {
        /// Shipping node id.
        from: String,
        /// Entries in sequence order.
        entries: Vec<WalEntry>,
        /// Region of origin (multi-region shipping), empty otherwise.
        #[serde(default)]
        region: String,
        /// Wall-clock send time (ms epoch); the receiver's last-write-wins
        /// conflict resolution keys on it.
        #[serde(default)]
        sent_at_millis: i64,
    },
    /// Liveness signal.
    Heartbeat {
        /// Sender's term (0 outside Raft).
        term: u64,
        /// Sender node id.
        from: String,
        /// Sender's commit index.
        commit_index: u64,
    },
    /// Best-effort order to a deposed primary: stop accepting writes.
    Fence {
        /// Node issuing the fence.
        from: String,
        /// Why the fence was issued.
        reason: String,
    },
    /// Announcement that the sender has become primary/leader.
    Promote {
        /// The newly writable node.
        from: String,
        /// Term under which it leads (0 for hot-standby).
        term: u64,
    },
}

impl Message {
    /// The wire tag, as it appears in the JSON `type` field.
    pub fn tag(&self) -> &'static str {
        match self {
            Message::VoteRequest { .. } => "vote_request",
            Message::VoteResponse { .. } => "vote_response",
            Message::AppendEntries { .. } => "append_entries",
            Message::AppendResponse { .. } => "append_response",
            Message::WalBatch { .. } => "wal_batch",
            Message::Heartbeat { .. } => "heartbeat",
            Message::Fence { .. } => "fence",
            Message::Promote { .. } => "promote",
        }
    }

    /// The node id of the sender, carried in every variant. Listeners
    /// dispatch on it instead of trusting transport addresses.
    pub fn sender(&self) -> &str {
        match self {
            Message::VoteRequest { candidate_id, .. } => candidate_id,
            Message::VoteResponse { voter_id, .. } => voter_id,
            Message::AppendEntries { leader_id, .. } => leader_id,
            Message::AppendResponse { node_id, .. } => node_id,
            Message::WalBatch { from, .. }
            | Message::Heartbeat { from, .. }
            | Message::Fence { from, .. }
            | Message::Promote { from, .. } => from,
        }
    }
}

/// Encode one frame: `[len: u32 BE][json body]`.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(NornicError::invalid_input("frame exceeds size limit"));
    }
    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Decode one frame from the front of `buf`.
///
/// `Ok(Some((message, consumed)))` on success, `Ok(None)` when more
/// bytes are needed, `Err(Corruption)` on an oversized or undecodable
/// frame.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(Message, usize)>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(NornicError::corruption(format!(
            "frame length {} exceeds limit",
            len
        )));
    }
    if buf.len() < 4 + len {
        return Ok(None);
    }
    let message: Message = serde_json::from_slice(&buf[4..4 + len])
        .map_err(|e| NornicError::corruption(format!("frame decode failed: {}", e)))?;
    Ok(Some((message, 4 + len)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nornic_core::{NodeId, PropertyMap};
    use nornic_durability::WalOp;

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::VoteRequest {
                term: 3,
                candidate_id: "node-b".to_string(),
                last_log_index: 10,
                last_log_term: 2,
            },
            Message::VoteResponse {
                term: 3,
                granted: true,
                voter_id: "node-c".to_string(),
            },
            Message::AppendEntries {
                term: 3,
                leader_id: "node-b".to_string(),
                prev_log_index: 10,
                prev_log_term: 2,
                entries: vec![LogEntry {
                    term: 3,
                    index: 11,
                    payload: LogPayload::Op {
                        entry: WalEntry::new(
                            11,
                            WalOp::CreateNode {
                                id: NodeId::new(1),
                                labels: vec![],
                                properties: PropertyMap::new(),
                            },
                        ),
                    },
                }],
                leader_commit: 10,
                snapshot: None,
            },
            Message::AppendResponse {
                term: 3,
                success: true,
                node_id: "node-c".to_string(),
                match_index: 11,
                persisted: true,
            },
            Message::WalBatch {
                from: "node-a".to_string(),
                entries: vec![],
                region: "eu-west".to_string(),
                sent_at_millis: 1_700_000_000_000,
            },
            Message::Heartbeat {
                term: 3,
                from: "node-b".to_string(),
                commit_index: 11,
            },
            Message::Fence {
                from: "node-c".to_string(),
                reason: "failover".to_string(),
            },
            Message::Promote {
                from: "node-c".to_string(),
                term: 4,
            },
        ]
    }

    #[test]
    fn test_frame_round_trip_all_tags() {
        for message in sample_messages() {
            let frame = encode_frame(&message).unwrap();
            let (decoded, consumed) = decode_frame(&frame).unwrap().unwrap();
            assert_eq!(decoded, message);
            assert_eq!(consumed, frame.len());
        }
    }

    #[test]
    fn test_wire_tags_are_snake_case() {
        for message in sample_messages() {
            let frame = encode_frame(&message).unwrap();
            let json: serde_json::Value = serde_json::from_slice(&frame[4..]).unwrap();
            assert_eq!(json["type"], message.tag());
        }
    }

    #[test]
    fn test_partial_frame_needs_more() {
        let frame = encode_frame(&Message::Heartbeat {
            term: 1,
            from: "a".to_string(),
            commit_index: 0,
        })
        .unwrap();
        for cut in 0..frame.len() {
            assert!(decode_frame(&frame[..cut]).unwrap().is_none());
        }
    }

    #[test]
    fn test_garbage_body_is_corruption() {
        let mut frame = vec![0, 0, 0, 4];
        frame.extend_from_slice(b"????");
        assert!(decode_frame(&frame).is_err());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let frame = [(MAX_FRAME_LEN as u32 + 1).to_be_bytes().to_vec(), vec![0; 8]].concat();
        assert!(decode_frame(&frame).is_err());
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let a = encode_frame(&Message::Promote {
            from: "x".to_string(),
            term: 1,
        })
        .unwrap();
        let b = encode_frame(&Message::Fence {
            from: "y".to_string(),
            reason: "test".to_string(),
        })
        .unwrap();
        let mut stream = a.clone();
        stream.extend_from_slice(&b);

        let (first, consumed) = decode_frame(&stream).unwrap().unwrap();
        assert_eq!(first.tag(), "promote");
        let (second, _) = decode_frame(&stream[consumed..]).unwrap().unwrap();
        assert_eq!(second.tag(), "fence");
    }

    #[test]
    fn test_sender_for_every_tag() {
        for message in sample_messages() {
            assert!(!message.sender().is_empty(), "{} has no sender", message.tag());
        }
        assert_eq!(
            Message::Heartbeat {
                term: 1,
                from: "node-x".to_string(),
                commit_index: 0,
            }
            .sender(),
            "node-x"
        );
    }

    #[test]
    fn test_snapshot_blob_hex_on_the_wire() {
        let message = Message::AppendEntries {
            term: 1,
            leader_id: "l".to_string(),
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![],
            leader_commit: 0,
            snapshot: Some(SnapshotBlob {
                last_index: 1,
                last_term: 1,
                data: vec![0xde, 0xad],
            }),
        };
        let frame = encode_frame(&message).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&frame[4..]).unwrap();
        assert_eq!(json["snapshot"]["data"], "dead");
    }

    #[test]
    fn test_snapshot_blob_round_trip() {
        let message = Message::AppendEntries {
            term: 5,
            leader_id: "l".to_string(),
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![],
            leader_commit: 42,
            snapshot: Some(SnapshotBlob {
                last_index: 42,
                last_term: 5,
                data: vec![0xde, 0xad, 0xbe, 0xef],
            }),
        };
        let frame = encode_frame(&message).unwrap();
        let (decoded, _) = decode_frame(&frame).unwrap().unwrap();
        assert_eq!(decoded, message);
    }
}
