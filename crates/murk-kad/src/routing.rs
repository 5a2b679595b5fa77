//! The routing table: an ordered list of k-buckets partitioning the
//! id space.

use tracing::debug;

use crate::bucket::KBucket;
use crate::node::{Node, NodeId};

/// Buckets deeper than this split only when they cover the local id,
/// unless their shared prefix depth is off this modulus (the classic
/// Kademlia relaxation that keeps sibling buckets fresh).
const DEPTH_MODULO: usize = 5;

pub struct RoutingTable {
    local: Node,
    ksize: usize,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    /// A table with a single bucket covering the whole space. The
    /// local node is recorded only to exclude itself; it is never
    /// inserted.
    pub fn new(local: Node, ksize: usize) -> Self {
        Self { local, ksize, buckets: vec![KBucket::full_range(ksize)] }
    }

    pub fn local(&self) -> &Node {
        &self.local
    }

    pub fn ksize(&self) -> usize {
        self.ksize
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// True iff the node is not currently held in any bucket.
    pub fn is_new(&self, node: &Node) -> bool {
        !self.buckets[self.index_for(&node.id)].contains(&node.id)
    }

    /// Insert or refresh a contact. Full buckets covering the local id
    /// (or at a permissive depth) split and retry; otherwise the
    /// candidate stays in the bucket's replacement queue.
    pub fn add_contact(&mut self, node: Node) {
        if node.id == self.local.id {
            return;
        }
        loop {
            let index = self.index_for(&node.id);
            let bucket = &mut self.buckets[index];
            if bucket.add(node.clone()) {
                return;
            }
            let splittable =
                bucket.covers(&self.local.id) || bucket.depth() % DEPTH_MODULO != 0;
            if !splittable {
                debug!(node = %node, "bucket full, contact queued as replacement");
                return;
            }
            self.split_bucket(index);
        }
    }

    pub fn remove_contact(&mut self, node: &Node) {
        let index = self.index_for(&node.id);
        self.buckets[index].remove(&node.id);
    }

    /// Up to `k` nodes nearest to `target` in XOR distance, ascending.
    ///
    /// Buckets are visited in order of their midpoint's distance to
    /// the target; the collected nodes are then stably sorted by their
    /// own distance, so equal distances keep traversal order. The
    /// local node and any node with the target's exact id are
    /// excluded.
    pub fn find_neighbors(&self, target: &NodeId, k: usize) -> Vec<Node> {
        let mut order: Vec<usize> = (0..self.buckets.len()).collect();
        order.sort_by_key(|&i| self.buckets[i].midpoint().distance_to(target));

        let mut found: Vec<Node> = Vec::new();
        for i in order {
            for node in self.buckets[i].nodes() {
                if node.id == *target || node.id == self.local.id {
                    continue;
                }
                found.push(node.clone());
            }
            if found.len() >= k {
                // Enough candidates; later buckets are farther on the
                // bucket metric but individual nodes still need the
                // final sort below.
                break;
            }
        }
        found.sort_by_key(|n| n.id.distance_to(target));
        found.truncate(k);
        found
    }

    /// All nodes currently held, in bucket order.
    pub fn nodes(&self) -> Vec<Node> {
        self.buckets.iter().flat_map(|b| b.nodes().iter().cloned()).collect()
    }

    fn index_for(&self, id: &NodeId) -> usize {
        self.buckets
            .iter()
            .position(|b| b.covers(id))
            .expect("buckets tile the id space")
    }

    fn split_bucket(&mut self, index: usize) {
        let bucket = self.buckets.remove(index);
        let (left, right) = bucket.split();
        self.buckets.insert(index, right);
        self.buckets.insert(index, left);
    }
}
