//! Node pool and queue implementations for pathfinding
//!
//! Both structures take all of their storage from the allocator facade at
//! construction and never grow afterwards. Between searches they are
//! reset with `clear`; a larger capacity requires building a new instance.

use super::{PolyRef, Status};
use nav_common::{AllocHint, Error, NavBuffer, Result, SharedAllocator};

/// Node flags for pathfinding state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeFlags(u8);

impl NodeFlags {
    pub const OPEN: NodeFlags = NodeFlags(0x01);
    pub const CLOSED: NodeFlags = NodeFlags(0x02);
    pub const PARENT_DETACHED: NodeFlags = NodeFlags(0x04);

    pub fn contains(&self, flag: NodeFlags) -> bool {
        self.0 & flag.0 != 0
    }

    pub fn insert(&mut self, flag: NodeFlags) {
        self.0 |= flag.0;
    }

    pub fn remove(&mut self, flag: NodeFlags) {
        self.0 &= !flag.0;
    }
}

/// Node index type
pub type NodeIndex = u16;

/// Null node index constant
pub const DT_NULL_IDX: NodeIndex = NodeIndex::MAX;

/// Maximum states per node
pub const DT_MAX_STATES_PER_NODE: usize = 4;

/// Node in the pathfinding graph
#[derive(Debug, Clone)]
pub struct DtNode {
    /// Position of the node
    pub pos: [f32; 3],
    /// Cost from previous node to current node
    pub cost: f32,
    /// Total cost up to the node
    pub total: f32,
    /// Index to parent node
    pub pidx: NodeIndex,
    /// Extra state information (0-3)
    pub state: u8,
    /// Node flags
    pub flags: NodeFlags,
    /// Polygon ref the node corresponds to
    pub id: PolyRef,
}

impl DtNode {
    /// Creates a new node
    pub fn new(id: PolyRef) -> Self {
        Self {
            pos: [0.0; 3],
            cost: 0.0,
            total: 0.0,
            pidx: DT_NULL_IDX,
            state: 0,
            flags: NodeFlags::default(),
            id,
        }
    }
}

/// Node pool for efficient node management during pathfinding
pub struct DtNodePool {
    /// Node storage
    nodes: NavBuffer<DtNode>,
    /// First node index for each hash bucket
    first: NavBuffer<NodeIndex>,
    /// Next node index in hash chain
    next: NavBuffer<NodeIndex>,
    /// Maximum number of nodes
    max_nodes: usize,
    /// Hash table size
    hash_size: usize,
    /// Current node count
    node_count: usize,
}

impl DtNodePool {
    /// Creates a new node pool.
    ///
    /// `hash_size` must be a power of two and `max_nodes` must leave room
    /// for [`DT_NULL_IDX`].
    pub fn new(allocator: &SharedAllocator, max_nodes: usize, hash_size: usize) -> Result<Self> {
        if max_nodes == 0 || max_nodes >= DT_NULL_IDX as usize {
            return Err(Error::Detour(Status::InvalidParam.to_string()));
        }
        if !hash_size.is_power_of_two() {
            return Err(Error::Detour(Status::InvalidParam.to_string()));
        }

        let nodes = NavBuffer::from_fn(allocator, max_nodes, AllocHint::Perm, |_| {
            DtNode::new(PolyRef::new(0))
        })?;
        let first = NavBuffer::from_fn(allocator, hash_size, AllocHint::Perm, |_| DT_NULL_IDX)?;
        let next = NavBuffer::from_fn(allocator, max_nodes, AllocHint::Perm, |_| DT_NULL_IDX)?;

        Ok(Self {
            nodes,
            first,
            next,
            max_nodes,
            hash_size,
            node_count: 0,
        })
    }

    /// Clears the node pool
    pub fn clear(&mut self) {
        self.first.fill(DT_NULL_IDX);
        self.next.fill(DT_NULL_IDX);
        self.node_count = 0;
    }

    /// Gets or allocates a node for the given polygon ref and state
    pub fn get_node(&mut self, id: PolyRef, state: u8) -> Option<&mut DtNode> {
        let idx = self.get_node_index(id, state)?;
        self.get_node_at_idx_mut(idx)
    }

    /// Gets or allocates a node, returning its 1-based index
    pub fn get_node_index(&mut self, id: PolyRef, state: u8) -> Option<NodeIndex> {
        if let Some(idx) = self.find_slot(id, state) {
            return Some((idx + 1) as NodeIndex);
        }

        if self.node_count >= self.max_nodes {
            return None;
        }

        let idx = self.node_count;
        self.node_count += 1;

        let node = &mut self.nodes[idx];
        node.pos = [0.0; 3];
        node.pidx = DT_NULL_IDX;
        node.cost = 0.0;
        node.total = 0.0;
        node.id = id;
        node.state = state;
        node.flags = NodeFlags::default();

        let bucket = self.bucket(id);
        self.next[idx] = self.first[bucket];
        self.first[bucket] = idx as NodeIndex;

        Some((idx + 1) as NodeIndex)
    }

    /// Finds a node with the given polygon ref and state
    pub fn find_node(&self, id: PolyRef, state: u8) -> Option<&DtNode> {
        self.find_slot(id, state).map(|idx| &self.nodes[idx])
    }

    /// Finds all nodes with the given polygon ref
    pub fn find_nodes(&self, id: PolyRef, max_nodes: usize) -> Vec<&DtNode> {
        let mut result = Vec::new();
        let mut idx = self.first[self.bucket(id)];

        while idx != DT_NULL_IDX && result.len() < max_nodes {
            let node = &self.nodes[idx as usize];
            if node.id == id {
                result.push(node);
            }
            idx = self.next[idx as usize];
        }

        result
    }

    /// Gets the 1-based index of a node owned by this pool, or 0
    pub fn get_node_idx(&self, node: &DtNode) -> NodeIndex {
        let base = self.nodes.as_ptr() as usize;
        let addr = node as *const DtNode as usize;
        let size = std::mem::size_of::<DtNode>();

        match addr.checked_sub(base) {
            Some(offset) if offset % size == 0 && offset / size < self.node_count => {
                (offset / size + 1) as NodeIndex
            }
            _ => 0,
        }
    }

    /// Gets a node at the given index
    pub fn get_node_at_idx(&self, idx: NodeIndex) -> Option<&DtNode> {
        if idx == 0 || idx as usize > self.node_count {
            return None;
        }
        self.nodes.get((idx - 1) as usize)
    }

    /// Gets a mutable node at the given index
    pub fn get_node_at_idx_mut(&mut self, idx: NodeIndex) -> Option<&mut DtNode> {
        if idx == 0 || idx as usize > self.node_count {
            return None;
        }
        self.nodes.get_mut((idx - 1) as usize)
    }

    /// Gets memory used by the pool
    pub fn get_mem_used(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.nodes.block_size()
            + self.next.block_size()
            + self.first.block_size()
    }

    /// Gets the maximum number of nodes
    pub fn get_max_nodes(&self) -> usize {
        self.max_nodes
    }

    /// Gets the hash size
    pub fn get_hash_size(&self) -> usize {
        self.hash_size
    }

    /// Gets the current node count
    pub fn get_node_count(&self) -> usize {
        self.node_count
    }

    fn find_slot(&self, id: PolyRef, state: u8) -> Option<usize> {
        let mut idx = self.first[self.bucket(id)];

        while idx != DT_NULL_IDX {
            let node = &self.nodes[idx as usize];
            if node.id == id && node.state == state {
                return Some(idx as usize);
            }
            idx = self.next[idx as usize];
        }

        None
    }

    fn bucket(&self, id: PolyRef) -> usize {
        Self::hash_ref(id) & (self.hash_size - 1)
    }

    /// Hashes a polygon ref
    fn hash_ref(id: PolyRef) -> usize {
        let a = id.id() as usize;
        a ^ (a >> 16)
    }
}

impl std::fmt::Debug for DtNodePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtNodePool")
            .field("max_nodes", &self.max_nodes)
            .field("hash_size", &self.hash_size)
            .field("node_count", &self.node_count)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    total: f32,
    idx: NodeIndex,
}

const EMPTY_ENTRY: QueueEntry = QueueEntry {
    total: 0.0,
    idx: DT_NULL_IDX,
};

/// Priority queue (open list) of pool node indices ordered by total cost
pub struct DtNodeQueue {
    /// Heap storage
    heap: NavBuffer<QueueEntry>,
    /// Capacity
    capacity: usize,
    /// Current size
    size: usize,
}

impl DtNodeQueue {
    /// Creates a new node queue
    pub fn new(allocator: &SharedAllocator, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Detour(Status::InvalidParam.to_string()));
        }

        let heap = NavBuffer::from_fn(allocator, capacity + 1, AllocHint::Perm, |_| EMPTY_ENTRY)?;

        Ok(Self {
            heap,
            capacity,
            size: 0,
        })
    }

    /// Clears the queue
    pub fn clear(&mut self) {
        self.size = 0;
    }

    /// Gets the index of the top node (minimum total cost)
    pub fn top(&self) -> Option<NodeIndex> {
        (self.size > 0).then(|| self.heap[0].idx)
    }

    /// Pops the index of the top node
    pub fn pop(&mut self) -> Option<NodeIndex> {
        if self.size == 0 {
            return None;
        }

        let result = self.heap[0].idx;
        self.size -= 1;

        if self.size > 0 {
            let last = self.heap[self.size];
            self.trickle_down(0, last);
        }

        Some(result)
    }

    /// Pushes a node index with its total cost
    pub fn push(&mut self, idx: NodeIndex, total: f32) -> crate::status::Result<()> {
        if self.size >= self.capacity {
            return Err(Status::BufferTooSmall);
        }

        self.size += 1;
        self.bubble_up(self.size - 1, QueueEntry { total, idx });
        Ok(())
    }

    /// Updates a queued node's total cost after it was lowered
    pub fn modify(&mut self, idx: NodeIndex, total: f32) {
        if let Some(i) = self.heap[..self.size].iter().position(|e| e.idx == idx) {
            self.bubble_up(i, QueueEntry { total, idx });
        }
    }

    /// Checks if the queue is empty
    pub fn empty(&self) -> bool {
        self.size == 0
    }

    pub fn len(&self) -> usize {
        self.size
    }

    /// Gets memory used by the queue
    pub fn get_mem_used(&self) -> usize {
        std::mem::size_of::<Self>() + self.heap.block_size()
    }

    /// Gets the capacity
    pub fn get_capacity(&self) -> usize {
        self.capacity
    }

    /// Bubbles an entry up the heap
    fn bubble_up(&mut self, mut i: usize, entry: QueueEntry) {
        while i > 0 {
            let parent = (i - 1) / 2;

            if entry.total >= self.heap[parent].total {
                break;
            }

            self.heap[i] = self.heap[parent];
            i = parent;
        }

        self.heap[i] = entry;
    }

    /// Trickles an entry down the heap
    fn trickle_down(&mut self, mut i: usize, entry: QueueEntry) {
        loop {
            let child1 = 2 * i + 1;
            if child1 >= self.size {
                break;
            }

            let child2 = child1 + 1;
            let min_child = if child2 < self.size && self.heap[child2].total < self.heap[child1].total
            {
                child2
            } else {
                child1
            };

            if entry.total <= self.heap[min_child].total {
                break;
            }

            self.heap[i] = self.heap[min_child];
            i = min_child;
        }

        self.heap[i] = entry;
    }
}

impl std::fmt::Debug for DtNodeQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtNodeQueue")
            .field("capacity", &self.capacity)
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nav_common::{FailingAllocator, TrackingAllocator, default_allocator};
    use std::sync::Arc;

    #[test]
    fn test_node_pool() {
        let allocator = default_allocator();
        let mut pool = DtNodePool::new(&allocator, 16, 8).unwrap();

        // Test allocation
        let poly1 = PolyRef::new(1);
        let node1 = pool.get_node(poly1, 0).unwrap();
        assert_eq!(node1.id, poly1);
        assert_eq!(node1.state, 0);

        // Test finding
        let found = pool.find_node(poly1, 0);
        assert!(found.is_some());
        assert_eq!(found.unwrap().id, poly1);

        // Test multiple states
        let node2 = pool.get_node(poly1, 1).unwrap();
        assert_eq!(node2.id, poly1);
        assert_eq!(node2.state, 1);

        // Test find_nodes
        let nodes = pool.find_nodes(poly1, 10);
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn test_node_pool_index_round_trip() {
        let allocator = default_allocator();
        let mut pool = DtNodePool::new(&allocator, 4, 1).unwrap();

        let idx = pool.get_node_index(PolyRef::new(9), 0).unwrap();
        assert_eq!(idx, 1);
        let node = pool.get_node_at_idx(idx).unwrap();
        assert_eq!(pool.get_node_idx(node), idx);
        assert!(pool.get_node_at_idx(0).is_none());
        assert!(pool.get_node_at_idx(2).is_none());

        let foreign = DtNode::new(PolyRef::new(9));
        assert_eq!(pool.get_node_idx(&foreign), 0);
    }

    #[test]
    fn test_node_pool_exhaustion_and_clear() {
        let allocator = default_allocator();
        let mut pool = DtNodePool::new(&allocator, 2, 2).unwrap();

        assert!(pool.get_node(PolyRef::new(1), 0).is_some());
        assert!(pool.get_node(PolyRef::new(2), 0).is_some());
        assert!(pool.get_node(PolyRef::new(3), 0).is_none());
        // Existing nodes are still found when the pool is full
        assert!(pool.get_node(PolyRef::new(1), 0).is_some());

        pool.clear();
        assert_eq!(pool.get_node_count(), 0);
        assert!(pool.find_node(PolyRef::new(1), 0).is_none());
        assert!(pool.get_node(PolyRef::new(3), 0).is_some());
    }

    #[test]
    fn test_node_pool_rejects_bad_sizes() {
        let allocator = default_allocator();
        assert!(DtNodePool::new(&allocator, 0, 1).is_err());
        assert!(DtNodePool::new(&allocator, 8, 3).is_err());
        assert!(DtNodePool::new(&allocator, 8, 0).is_err());
        assert!(DtNodePool::new(&allocator, DT_NULL_IDX as usize, 1).is_err());
    }

    #[test]
    fn test_node_pool_storage_comes_from_allocator() {
        let tracker = Arc::new(TrackingAllocator::new());
        let allocator: SharedAllocator = tracker.clone();

        let pool = DtNodePool::new(&allocator, 32, 8).unwrap();
        assert_eq!(tracker.stats().live_blocks, 3);
        assert!(pool.get_mem_used() >= tracker.stats().live_bytes);

        drop(pool);
        let stats = tracker.stats();
        assert_eq!(stats.live_blocks, 0);
        assert_eq!(stats.releases, 3);
    }

    #[test]
    fn test_partial_pool_construction_releases_blocks() {
        let tracker = Arc::new(TrackingAllocator::new());
        let inner: SharedAllocator = tracker.clone();
        let allocator: SharedAllocator = Arc::new(FailingAllocator::fail_after(inner, 2));

        let err = DtNodePool::new(&allocator, 32, 8).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { .. }));
        assert_eq!(tracker.stats().live_blocks, 0);
        assert_eq!(tracker.stats().releases, 2);
    }

    #[test]
    fn test_node_queue() {
        let allocator = default_allocator();
        let mut pool = DtNodePool::new(&allocator, 16, 8).unwrap();
        let mut queue = DtNodeQueue::new(&allocator, 16).unwrap();

        let poly1 = PolyRef::new(1);
        let poly2 = PolyRef::new(2);
        let poly3 = PolyRef::new(3);

        for (poly, total) in [(poly1, 5.0), (poly2, 3.0), (poly3, 7.0)] {
            let idx = pool.get_node_index(poly, 0).unwrap();
            let node = pool.get_node_at_idx_mut(idx).unwrap();
            node.total = total;
            node.flags.insert(NodeFlags::OPEN);
            queue.push(idx, total).unwrap();
        }
        assert_eq!(queue.len(), 3);

        // Pop in order of total cost
        let ids: Vec<PolyRef> = std::iter::from_fn(|| queue.pop())
            .map(|idx| pool.get_node_at_idx(idx).unwrap().id)
            .collect();
        assert_eq!(ids, vec![poly2, poly1, poly3]);

        assert!(queue.empty());
    }

    #[test]
    fn test_node_queue_modify_reorders() {
        let allocator = default_allocator();
        let mut queue = DtNodeQueue::new(&allocator, 4).unwrap();

        queue.push(1, 4.0).unwrap();
        queue.push(2, 6.0).unwrap();
        queue.push(3, 8.0).unwrap();
        assert_eq!(queue.top(), Some(1));

        queue.modify(3, 1.0);
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_node_queue_capacity() {
        let allocator = default_allocator();
        let mut queue = DtNodeQueue::new(&allocator, 2).unwrap();

        queue.push(1, 1.0).unwrap();
        queue.push(2, 2.0).unwrap();
        assert_eq!(queue.push(3, 0.5), Err(Status::BufferTooSmall));

        queue.clear();
        assert!(queue.empty());
        assert_eq!(queue.get_capacity(), 2);
        queue.push(3, 0.5).unwrap();
        assert_eq!(queue.top(), Some(3));
    }
}
