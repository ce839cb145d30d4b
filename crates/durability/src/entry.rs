//! WAL entry types and the on-disk entry codec
//!
//! Each entry is a tagged operation variant; decoding dispatches on the
//! tag, so no trait hierarchy is needed.
//!
//! ## Entry Format
//!
//! ```text
//! [length: u32 BE][crc32: u32 BE][payload: bincode(WalEntry)]
//! ```
//!
//! - **length**: payload size only (not including length or crc)
//! - **crc32**: checksum over the payload
//! - **payload**: bincode-serialized `WalEntry`
//!
//! The length prefix enables variable-sized entries, the CRC detects bit
//! flips and partial writes, and bincode keeps encoding deterministic and
//! compact.

use nornic_core::{EdgeId, NodeId, NornicError, PropertyMap, Result, SignalType, Value};
use serde::{Deserialize, Serialize};

/// Raft-style logical clock attached to every entry.
///
/// In standalone and hot-standby modes both fields stay zero; under Raft
/// they carry the leader term and log index so replicas can validate
/// append order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogicalClock {
    /// Leader term (Raft mode).
    pub term: u64,
    /// Log index within the term (Raft mode).
    pub index: u64,
}

/// The mutation operations recorded in the WAL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalOp {
    /// Create a node with the given id, labels, and properties.
    CreateNode {
        /// Assigned node id.
        id: NodeId,
        /// Node labels.
        labels: Vec<String>,
        /// Node properties.
        properties: PropertyMap,
    },
    /// Delete a node. Incident edges are cascaded by the apply path, not
    /// recorded separately.
    DeleteNode {
        /// Node to delete.
        id: NodeId,
    },
    /// Set (or overwrite) a single property on a node.
    SetProperty {
        /// Target node.
        id: NodeId,
        /// Property key.
        key: String,
        /// New value.
        value: Value,
    },
    /// Create an edge between two existing nodes.
    CreateEdge {
        /// Assigned edge id.
        id: EdgeId,
        /// Relationship label.
        label: String,
        /// Source node.
        src: NodeId,
        /// Target node.
        dst: NodeId,
        /// Edge properties.
        properties: PropertyMap,
        /// Importance score in `[0, 1]`.
        score: f64,
        /// Signal classification.
        signal: SignalType,
    },
    /// Delete an edge.
    DeleteEdge {
        /// Edge to delete.
        id: EdgeId,
    },
}

impl WalOp {
    /// Short operation name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            WalOp::CreateNode { .. } => "create-node",
            WalOp::DeleteNode { .. } => "delete-node",
            WalOp::SetProperty { .. } => "set-property",
            WalOp::CreateEdge { .. } => "create-edge",
            WalOp::DeleteEdge { .. } => "delete-edge",
        }
    }
}

/// A single WAL record: monotonic sequence number, logical clock, and the
/// operation payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonic sequence number, assigned at append time.
    pub seq: u64,
    /// Term/index pair for Raft mode; zeroed otherwise.
    pub clock: LogicalClock,
    /// The recorded operation.
    pub op: WalOp,
}

impl WalEntry {
    /// Construct an entry with a zeroed logical clock.
    pub fn new(seq: u64, op: WalOp) -> Self {
        WalEntry {
            seq,
            clock: LogicalClock::default(),
            op,
        }
    }
}

/// Frame header size: length (4) + crc (4).
pub const FRAME_HEADER_LEN: usize = 8;

/// Encode an entry into its framed on-disk representation.
pub fn encode_entry(entry: &WalEntry) -> Result<Vec<u8>> {
    let payload = bincode::serialize(entry)?;
    if payload.len() > u32::MAX as usize {
        return Err(NornicError::invalid_input("wal entry exceeds frame limit"));
    }
    let crc = crc32fast::hash(&payload);

    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&crc.to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Attempt to decode one entry from the front of `buf`.
///
/// Returns `Ok(Some((entry, consumed)))` on success, `Ok(None)` when the
/// buffer holds an incomplete frame (caller should read more or treat as
/// a torn tail at EOF), and `Err(Corruption)` on a CRC mismatch.
pub fn decode_entry(buf: &[u8]) -> Result<Option<(WalEntry, usize)>> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let expected_crc = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

    let total = FRAME_HEADER_LEN + len;
    if buf.len() < total {
        return Ok(None);
    }

    let payload = &buf[FRAME_HEADER_LEN..total];
    let actual_crc = crc32fast::hash(payload);
    if actual_crc != expected_crc {
        return Err(NornicError::corruption(format!(
            "wal entry crc mismatch: expected {:#010x}, got {:#010x}",
            expected_crc, actual_crc
        )));
    }

    let entry: WalEntry = bincode::deserialize(payload)
        .map_err(|e| NornicError::corruption(format!("wal entry decode failed: {}", e)))?;
    Ok(Some((entry, total)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nornic_core::Value;

    fn sample_entry(seq: u64) -> WalEntry {
        WalEntry::new(
            seq,
            WalOp::CreateNode {
                id: NodeId::new(seq),
                labels: vec!["Person".to_string()],
                properties: PropertyMap::new(),
            },
        )
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let entry = sample_entry(7);
        let encoded = encode_entry(&entry).unwrap();
        let (decoded, consumed) = decode_entry(&encoded).unwrap().unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_decode_incomplete_frame_returns_none() {
        let entry = sample_entry(1);
        let encoded = encode_entry(&entry).unwrap();

        // Every proper prefix is "incomplete", never an error.
        for cut in 0..encoded.len() {
            let result = decode_entry(&encoded[..cut]).unwrap();
            assert!(result.is_none(), "prefix of {} bytes decoded", cut);
        }
    }

    #[test]
    fn test_decode_corrupt_payload_fails() {
        let entry = sample_entry(2);
        let mut encoded = encode_entry(&entry).unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;

        let err = decode_entry(&encoded).unwrap_err();
        assert!(matches!(err, NornicError::Corruption { .. }));
    }

    #[test]
    fn test_decode_consumes_exactly_one_frame() {
        let a = encode_entry(&sample_entry(1)).unwrap();
        let b = encode_entry(&sample_entry(2)).unwrap();
        let mut stream = a.clone();
        stream.extend_from_slice(&b);

        let (first, consumed) = decode_entry(&stream).unwrap().unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(consumed, a.len());

        let (second, _) = decode_entry(&stream[consumed..]).unwrap().unwrap();
        assert_eq!(second.seq, 2);
    }

    #[test]
    fn test_all_op_variants_round_trip() {
        let ops = vec![
            WalOp::CreateNode {
                id: NodeId::new(1),
                labels: vec!["A".into(), "B".into()],
                properties: PropertyMap::new(),
            },
            WalOp::DeleteNode { id: NodeId::new(1) },
            WalOp::SetProperty {
                id: NodeId::new(2),
                key: "name".into(),
                value: Value::String("x".into()),
            },
            WalOp::CreateEdge {
                id: EdgeId::new(1),
                label: "knows".into(),
                src: NodeId::new(1),
                dst: NodeId::new(2),
                properties: PropertyMap::new(),
                score: 0.5,
                signal: SignalType::Coaccess,
            },
            WalOp::DeleteEdge { id: EdgeId::new(1) },
        ];
        for (i, op) in ops.into_iter().enumerate() {
            let entry = WalEntry::new(i as u64, op);
            let encoded = encode_entry(&entry).unwrap();
            let (decoded, _) = decode_entry(&encoded).unwrap().unwrap();
            assert_eq!(decoded, entry);
        }
    }

    #[test]
    fn test_op_names() {
        assert_eq!(WalOp::DeleteNode { id: NodeId::new(1) }.name(), "delete-node");
        assert_eq!(WalOp::DeleteEdge { id: EdgeId::new(1) }.name(), "delete-edge");
    }
}
