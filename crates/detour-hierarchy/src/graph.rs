//! Connectivity graph for one hierarchy level
//!
//! A graph owns a fixed-capacity node array plus the two edge arenas its
//! nodes point into. Teardown order is fixed: intra-node entries, then
//! inter-node edges, then the node array.

use glam::Vec3;
use nav_common::{AllocHint, Error, NavBuffer, Result, SharedAllocator};

use crate::edge_store::{Edge, EdgeArena, EdgeSpan, IntraEdge};

/// Node of a hierarchy-level graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Node {
    /// Slot index of the node in its graph
    pub index: u32,
    /// Set by [`Graph::add_node`]
    pub active: bool,
    edges: Option<EdgeSpan>,
    intra_edges: Option<EdgeSpan>,
    /// Side length of the square portal table
    portals: u32,
}

impl Node {
    fn empty(index: usize) -> Self {
        Self {
            index: index as u32,
            ..Self::default()
        }
    }

    /// Reserved inter-node edge span, if any
    pub fn edge_span(&self) -> Option<EdgeSpan> {
        self.edges
    }

    /// Reserved intra-node portal table span, if any
    pub fn intra_edge_span(&self) -> Option<EdgeSpan> {
        self.intra_edges
    }

    /// Number of portals indexed by the intra-node table
    pub fn portal_count(&self) -> usize {
        self.portals as usize
    }
}

/// Graph of one hierarchy level
pub struct Graph {
    allocator: SharedAllocator,
    nodes: Option<NavBuffer<Node>>,
    node_count: usize,
    edges: EdgeArena<Edge>,
    intra_edges: EdgeArena<IntraEdge>,
}

impl Graph {
    /// Creates a graph in the destroyed state (no node array)
    pub fn new(allocator: &SharedAllocator) -> Self {
        Self {
            allocator: allocator.clone(),
            nodes: None,
            node_count: 0,
            edges: EdgeArena::new(allocator),
            intra_edges: EdgeArena::new(allocator),
        }
    }

    /// Allocates a zeroed node array for `capacity` nodes.
    ///
    /// Any previous contents are destroyed first.
    pub fn init(&mut self, capacity: usize) -> Result<()> {
        self.destroy();

        let nodes = NavBuffer::from_fn(&self.allocator, capacity, AllocHint::Perm, Node::empty)?;
        self.nodes = Some(nodes);

        log::trace!("graph initialized with capacity {capacity}");
        Ok(())
    }

    /// Activates the node at slot `index`
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the capacity given to [`init`](Self::init).
    pub fn add_node(&mut self, index: usize) {
        let node = self.slot_mut(index);
        if !node.active {
            node.active = true;
            self.node_count += 1;
        }
    }

    /// Reserves room for `count` outgoing edges of `node`.
    ///
    /// A previously reserved span is released first.
    pub fn init_edge(&mut self, node: usize, count: usize) -> Result<()> {
        self.check_slot(node);
        self.destroy_edge(node);

        let span = self.edges.reserve(count)?;
        self.slot_mut(node).edges = Some(span);
        Ok(())
    }

    /// Appends an edge from `node` to `target`.
    ///
    /// # Panics
    ///
    /// Panics if `node` has no edge span, if the span is full, or if either
    /// index is outside the graph.
    pub fn add_edge(&mut self, node: usize, target: usize, pos: Vec3, tag_a: i32, tag_b: i32) {
        let capacity = self.capacity();
        assert!(
            target < capacity,
            "edge target {target} outside graph of {capacity} nodes"
        );

        let slot = self.slot_mut(node);
        let Some(mut span) = slot.edges else {
            panic!("node {node} has no edge storage; call init_edge first");
        };
        assert!(
            !span.is_full(),
            "node {node} already holds its {} reserved edges",
            span.cap
        );

        span.len += 1;
        slot.edges = Some(span);

        let entry = &mut self.edges.reserved_mut(&span)[(span.len - 1) as usize];
        *entry = Edge {
            target: target as u32,
            pos,
            tags: [tag_a, tag_b],
        };
    }

    /// Reserves the portal table of `node`, one entry per ordered portal pair.
    ///
    /// The portal count is the node's reserved edge count (at least one).
    /// A previously reserved table is released first. A table too large to
    /// index fails with [`Error::OutOfMemory`] and leaves the node without one.
    pub fn init_intra_edge(&mut self, node: usize) -> Result<()> {
        self.check_slot(node);
        self.destroy_intra_edge(node);

        let slot = self.slot_mut(node);
        let portals = slot.edges.map_or(0, |s| s.cap).max(1);

        let entries = (portals as usize)
            .checked_mul(portals as usize)
            .ok_or(Error::OutOfMemory {
                size: usize::MAX,
                hint: AllocHint::Perm,
            })?;
        let mut span = self.intra_edges.reserve(entries)?;
        span.len = span.cap;

        let slot = self.slot_mut(node);
        slot.portals = portals;
        slot.intra_edges = Some(span);
        Ok(())
    }

    /// Records the cost of moving between two portals of `node`
    ///
    /// # Panics
    ///
    /// Panics if `node` has no portal table or a portal is out of range.
    pub fn set_intra_edge(&mut self, node: usize, from: usize, to: usize, cost: f32) {
        let slot = *self.slot_mut(node);
        let Some(span) = slot.intra_edges else {
            panic!("node {node} has no portal table; call init_intra_edge first");
        };
        let portals = slot.portals as usize;
        assert!(
            from < portals && to < portals,
            "portal pair ({from}, {to}) outside node {node} with {portals} portals"
        );

        self.intra_edges.reserved_mut(&span)[from * portals + to] = IntraEdge {
            cost,
            connected: true,
        };
    }

    /// Portal table entry of `node`, if the table exists
    pub fn intra_edge(&self, node: usize, from: usize, to: usize) -> Option<&IntraEdge> {
        let slot = self.node(node)?;
        let portals = slot.portals as usize;
        if from >= portals || to >= portals {
            return None;
        }
        self.intra_edges(node).get(from * portals + to)
    }

    /// Releases the inter-node edges of `node`; no-op when absent
    pub fn destroy_edge(&mut self, node: usize) {
        let Some(nodes) = self.nodes.as_mut() else {
            return;
        };
        let Some(span) = nodes.get_mut(node).and_then(|slot| slot.edges.take()) else {
            return;
        };

        if self.edges.release(&span) {
            for other in nodes.iter_mut() {
                if let Some(s) = other.edges.as_mut() {
                    s.close_gap(&span);
                }
            }
        }
    }

    /// Releases the portal table of `node`; no-op when absent
    pub fn destroy_intra_edge(&mut self, node: usize) {
        let Some(nodes) = self.nodes.as_mut() else {
            return;
        };
        let Some(slot) = nodes.get_mut(node) else {
            return;
        };
        slot.portals = 0;
        let Some(span) = slot.intra_edges.take() else {
            return;
        };

        if self.intra_edges.release(&span) {
            for other in nodes.iter_mut() {
                if let Some(s) = other.intra_edges.as_mut() {
                    s.close_gap(&span);
                }
            }
        }
    }

    /// Releases edge arenas and then the node array; no-op when destroyed
    pub fn destroy(&mut self) {
        if self.nodes.is_none() {
            return;
        }

        log::trace!(
            "destroying graph: {} nodes, {} edge slots, {} portal slots",
            self.node_count,
            self.edges.slots_in_use(),
            self.intra_edges.slots_in_use()
        );

        self.intra_edges.reset();
        self.edges.reset();
        self.nodes = None;
        self.node_count = 0;
    }

    /// Outgoing edges of `node`; empty when absent
    pub fn edges(&self, node: usize) -> &[Edge] {
        match self.node(node).and_then(|n| n.edges) {
            Some(span) => self.edges.get(&span),
            None => &[],
        }
    }

    /// Portal table of `node` in row-major order; empty when absent
    pub fn intra_edges(&self, node: usize) -> &[IntraEdge] {
        match self.node(node).and_then(|n| n.intra_edges) {
            Some(span) => self.intra_edges.get(&span),
            None => &[],
        }
    }

    pub fn node(&self, index: usize) -> Option<&Node> {
        self.nodes.as_ref().and_then(|n| n.get(index))
    }

    /// Iterates over activated nodes
    pub fn active_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().flat_map(|n| n.iter()).filter(|n| n.active)
    }

    /// Node slots allocated by [`init`](Self::init); zero when destroyed
    pub fn capacity(&self) -> usize {
        self.nodes.as_ref().map_or(0, |n| n.len())
    }

    /// Number of activated nodes
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn is_destroyed(&self) -> bool {
        self.nodes.is_none()
    }

    /// Bytes of facade memory held by the graph
    pub fn mem_used(&self) -> usize {
        self.nodes.as_ref().map_or(0, |n| n.block_size())
            + self.edges.mem_used()
            + self.intra_edges.mem_used()
    }

    /// Address of the node array block
    pub fn node_block_addr(&self) -> Option<usize> {
        self.nodes.as_ref().and_then(|n| n.block_addr())
    }

    /// Address of the inter-node edge arena block
    pub fn edge_block_addr(&self) -> Option<usize> {
        self.edges.block_addr()
    }

    /// Address of the portal table arena block
    pub fn intra_edge_block_addr(&self) -> Option<usize> {
        self.intra_edges.block_addr()
    }

    fn check_slot(&self, index: usize) {
        let capacity = self.capacity();
        assert!(
            index < capacity,
            "node {index} outside graph of {capacity} nodes"
        );
    }

    fn slot_mut(&mut self, index: usize) -> &mut Node {
        let capacity = self.capacity();
        match self.nodes.as_mut().and_then(|n| n.get_mut(index)) {
            Some(slot) => slot,
            None => panic!("node {index} outside graph of {capacity} nodes"),
        }
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("capacity", &self.capacity())
            .field("node_count", &self.node_count)
            .field("edge_slots", &self.edges.slots_in_use())
            .field("portal_slots", &self.intra_edges.slots_in_use())
            .finish()
    }
}
