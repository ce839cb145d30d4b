//! Restartable label scans
//!
//! Lazy iteration over all nodes carrying a label. The scan's state is an
//! explicit cursor (the last node id yielded), so a scan can be dropped
//! and resumed, and it observes a live view: nodes created behind the
//! cursor are skipped, nodes ahead of it appear.

use crate::graph::GraphStore;
use nornic_core::{Node, NodeId};
use std::sync::Arc;

const SCAN_PAGE_SIZE: usize = 256;

/// A lazy, finite, restartable scan over one label.
pub struct LabelScan {
    store: Arc<GraphStore>,
    label: String,
    cursor: Option<NodeId>,
    page: std::vec::IntoIter<NodeId>,
    exhausted: bool,
}

impl LabelScan {
    /// Start a scan over `label`.
    pub fn new(store: Arc<GraphStore>, label: impl Into<String>) -> Self {
        LabelScan {
            store,
            label: label.into(),
            cursor: None,
            page: Vec::new().into_iter(),
            exhausted: false,
        }
    }

    /// The label being scanned.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The resume cursor: last node id yielded, if any.
    pub fn cursor(&self) -> Option<NodeId> {
        self.cursor
    }

    /// Restart from the beginning.
    pub fn reset(&mut self) {
        self.cursor = None;
        self.page = Vec::new().into_iter();
        self.exhausted = false;
    }

    /// Resume a scan from a saved cursor.
    pub fn resume(store: Arc<GraphStore>, label: impl Into<String>, cursor: NodeId) -> Self {
        LabelScan {
            store,
            label: label.into(),
            cursor: Some(cursor),
            page: Vec::new().into_iter(),
            exhausted: false,
        }
    }

    fn refill(&mut self) {
        let ids = self.store.scan_page(&self.label, self.cursor, SCAN_PAGE_SIZE);
        if ids.is_empty() {
            self.exhausted = true;
        }
        self.page = ids.into_iter();
    }
}

impl Iterator for LabelScan {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        loop {
            if let Some(id) = self.page.next() {
                self.cursor = Some(id);
                // A node deleted between page fetch and now is skipped.
                if let Ok(node) = self.store.get_node(id) {
                    return Some(node);
                }
                continue;
            }
            if self.exhausted {
                return None;
            }
            self.refill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nornic_core::PropertyMap;

    fn store_with_people(n: usize) -> Arc<GraphStore> {
        let store = GraphStore::in_memory();
        for _ in 0..n {
            store
                .put_node(vec!["Person".into()], PropertyMap::new())
                .unwrap();
        }
        store
    }

    #[test]
    fn test_scan_yields_all_in_order() {
        let store = store_with_people(10);
        let scan = LabelScan::new(Arc::clone(&store), "Person");
        let ids: Vec<u64> = scan.map(|n| n.id.as_u64()).collect();
        assert_eq!(ids.len(), 10);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_scan_unknown_label_empty() {
        let store = store_with_people(3);
        let mut scan = LabelScan::new(store, "Ghost");
        assert!(scan.next().is_none());
    }

    #[test]
    fn test_scan_restartable_via_cursor() {
        let store = store_with_people(6);
        let mut scan = LabelScan::new(Arc::clone(&store), "Person");
        let first: Vec<_> = scan.by_ref().take(3).map(|n| n.id).collect();
        let cursor = scan.cursor().unwrap();
        drop(scan);

        let resumed = LabelScan::resume(store, "Person", cursor);
        let rest: Vec<_> = resumed.map(|n| n.id).collect();
        assert_eq!(first.len(), 3);
        assert_eq!(rest.len(), 3);
        assert!(first.last().unwrap() < rest.first().unwrap());
    }

    #[test]
    fn test_scan_reset() {
        let store = store_with_people(4);
        let mut scan = LabelScan::new(store, "Person");
        let _ = scan.by_ref().take(2).count();
        scan.reset();
        assert_eq!(scan.count(), 4);
    }

    #[test]
    fn test_scan_spans_pages() {
        let store = store_with_people(SCAN_PAGE_SIZE + 50);
        let scan = LabelScan::new(store, "Person");
        assert_eq!(scan.count(), SCAN_PAGE_SIZE + 50);
    }

    #[test]
    fn test_scan_skips_multi_label_correctly() {
        let store = GraphStore::in_memory();
        store
            .put_node(vec!["Person".into(), "Admin".into()], PropertyMap::new())
            .unwrap();
        store.put_node(vec!["Admin".into()], PropertyMap::new()).unwrap();

        let people = LabelScan::new(Arc::clone(&store), "Person").count();
        let admins = LabelScan::new(store, "Admin").count();
        assert_eq!(people, 1);
        assert_eq!(admins, 2);
    }
}
