//! Hierarchical navigation manager
//!
//! [`Navigation`] owns one graph per hierarchy level together with the node
//! pool and open list shared by every search, and drives their
//! reinitialization. [`Navigation::init`] runs, in order:
//!
//! 1. Teardown of every populated graph: portal tables, then inter-node
//!    edges, then the node array. The old graph array is released last.
//! 2. Allocation of a fresh array of `levels` empty graphs.
//! 3. Node pool reuse: cleared in place when it already holds `max_nodes`
//!    nodes, otherwise destroyed and rebuilt at the new size.
//! 4. The same policy for the open list.
//! 5. Resolution of the bound tile's polygon reference base.

use detour::{
    DtNodePool, DtNodeQueue, MeshTile, NavMesh, PolyRef, decode_poly_ref, dt_node_pool_hash_size,
};
use nav_common::{AllocHint, Error, NavBox, NavBuffer, Result, SharedAllocator};

use crate::config::NavigationConfig;
use crate::graph::Graph;

/// Source of polygon reference bases for tiles
///
/// The lookup must be free of side effects; it runs once per
/// reinitialization.
pub trait TileRefSource {
    type Tile: ?Sized;

    /// Base polygon reference of `tile`
    fn poly_ref_base(&self, tile: &Self::Tile) -> u32;
}

impl TileRefSource for NavMesh {
    type Tile = MeshTile;

    fn poly_ref_base(&self, tile: &MeshTile) -> u32 {
        self.get_poly_ref_base(tile)
    }
}

/// Lifecycle state of a [`Navigation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationState {
    /// Never initialized, or the last `init` failed
    Uninitialized,
    /// Graph array and search pools are allocated
    Ready,
}

/// Borrowed search-state bundle handed out by [`Navigation::search_state`]
///
/// Holding it keeps the manager mutably borrowed, so the graphs and pools
/// cannot be reinitialized while a search is running.
pub struct SearchState<'s> {
    pub node_pool: &'s mut DtNodePool,
    pub open_list: &'s mut DtNodeQueue,
    /// Populated graphs, level 0 first
    pub graphs: &'s [Graph],
    /// Base polygon reference of the bound tile
    pub ref_base: u32,
}

/// Hierarchical navigation manager
pub struct Navigation<'a, M: TileRefSource + ?Sized = NavMesh> {
    allocator: SharedAllocator,
    config: NavigationConfig,
    nav_mesh: &'a M,
    tile: &'a M::Tile,
    graphs: Option<NavBuffer<Graph>>,
    num_graphs: usize,
    num_level: usize,
    node_pool: Option<NavBox<DtNodePool>>,
    open_list: Option<NavBox<DtNodeQueue>>,
    ref_base: u32,
    state: NavigationState,
}

impl<'a, M: TileRefSource + ?Sized> Navigation<'a, M> {
    /// Creates an uninitialized manager bound to `tile` of `nav_mesh`.
    ///
    /// Nothing is allocated until [`init`](Self::init).
    pub fn new(
        allocator: &SharedAllocator,
        config: NavigationConfig,
        nav_mesh: &'a M,
        tile: &'a M::Tile,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            allocator: allocator.clone(),
            config,
            nav_mesh,
            tile,
            graphs: None,
            num_graphs: 0,
            num_level: 0,
            node_pool: None,
            open_list: None,
            ref_base: 0,
            state: NavigationState::Uninitialized,
        })
    }

    /// Tears down and rebuilds graphs and search state.
    ///
    /// On error the manager is left [`Uninitialized`](NavigationState::Uninitialized):
    /// every structure torn down so far stays released, and searches are
    /// refused until a later `init` succeeds.
    pub fn init(&mut self) -> Result<()> {
        self.state = NavigationState::Uninitialized;

        log::debug!(
            "reinitializing navigation: {} populated graphs, {} levels, {} max nodes",
            self.num_graphs,
            self.config.levels,
            self.config.max_nodes
        );

        self.destroy_graphs();

        let graphs = NavBuffer::from_fn(
            &self.allocator,
            self.config.levels,
            AllocHint::Perm,
            |_| Graph::new(&self.allocator),
        )?;
        self.graphs = Some(graphs);
        self.num_level = 0;

        self.prepare_node_pool()?;
        self.prepare_open_list()?;

        self.ref_base = self.nav_mesh.poly_ref_base(self.tile);
        if self.ref_base == 0 {
            log::warn!("bound tile resolved to a null polygon reference base");
        }

        self.state = NavigationState::Ready;
        log::debug!("navigation ready, ref base {:#x}", self.ref_base);
        Ok(())
    }

    /// Releases every populated graph and then the graph array
    fn destroy_graphs(&mut self) {
        if let Some(graphs) = self.graphs.as_mut() {
            let populated = self.num_graphs.min(graphs.len());
            for graph in graphs[..populated].iter_mut() {
                // Highest nodes first, so each release trims the arena tail
                for node in (0..graph.capacity()).rev() {
                    graph.destroy_intra_edge(node);
                    graph.destroy_edge(node);
                }
                graph.destroy();
            }
            log::trace!("destroyed {populated} graphs");
        }

        self.num_graphs = 0;
        self.graphs = None;
    }

    fn prepare_node_pool(&mut self) -> Result<()> {
        let max_nodes = self.config.max_nodes;

        match self.node_pool.as_mut() {
            Some(pool) if pool.get_max_nodes() >= max_nodes => {
                log::trace!(
                    "reusing node pool ({} >= {max_nodes} nodes)",
                    pool.get_max_nodes()
                );
                pool.clear();
            }
            _ => {
                // Old pool is destroyed and released before the new one is allocated
                self.node_pool = None;

                let hash_size = dt_node_pool_hash_size(max_nodes);
                let pool = DtNodePool::new(&self.allocator, max_nodes, hash_size)?;
                self.node_pool = Some(NavBox::new(&self.allocator, pool, AllocHint::Perm)?);
                log::debug!("allocated node pool: {max_nodes} nodes, {hash_size} buckets");
            }
        }

        Ok(())
    }

    fn prepare_open_list(&mut self) -> Result<()> {
        let max_nodes = self.config.max_nodes;

        match self.open_list.as_mut() {
            Some(list) if list.get_capacity() >= max_nodes => {
                log::trace!(
                    "reusing open list ({} >= {max_nodes} nodes)",
                    list.get_capacity()
                );
                list.clear();
            }
            _ => {
                self.open_list = None;

                let list = DtNodeQueue::new(&self.allocator, max_nodes)?;
                self.open_list = Some(NavBox::new(&self.allocator, list, AllocHint::Perm)?);
                log::debug!("allocated open list: {max_nodes} nodes");
            }
        }

        Ok(())
    }

    /// Stages a new configuration, applied by the next [`init`](Self::init)
    pub fn set_config(&mut self, config: NavigationConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Binds another tile; its base is resolved by the next [`init`](Self::init)
    pub fn bind_tile(&mut self, tile: &'a M::Tile) {
        self.tile = tile;
    }

    /// Initializes the next graph slot with room for `node_capacity` nodes
    pub fn add_graph(&mut self, node_capacity: usize) -> Result<&mut Graph> {
        let levels = self.config.levels;
        let num_graphs = self.num_graphs;

        let graphs = self
            .graphs
            .as_mut()
            .ok_or_else(|| Error::NotReady("init has not completed".to_string()))?;

        let graph = graphs.get_mut(num_graphs).ok_or_else(|| {
            Error::Graph(format!("all {levels} hierarchy levels are populated"))
        })?;
        graph.init(node_capacity)?;

        self.num_graphs += 1;
        Ok(graph)
    }

    /// Marks the next populated level as fully built
    pub fn complete_level(&mut self) -> Result<usize> {
        if self.num_level >= self.num_graphs {
            return Err(Error::Graph(format!(
                "level {} has no populated graph",
                self.num_level
            )));
        }
        self.num_level += 1;
        Ok(self.num_level)
    }

    /// Borrows the search pools and populated graphs
    pub fn search_state(&mut self) -> Result<SearchState<'_>> {
        if self.state != NavigationState::Ready {
            return Err(Error::NotReady("init has not completed".to_string()));
        }

        let (Some(node_pool), Some(open_list)) =
            (self.node_pool.as_deref_mut(), self.open_list.as_deref_mut())
        else {
            return Err(Error::NotReady("search pools are missing".to_string()));
        };

        let graphs = match self.graphs.as_ref() {
            Some(graphs) => &graphs[..self.num_graphs],
            None => &[],
        };

        Ok(SearchState {
            node_pool,
            open_list,
            graphs,
            ref_base: self.ref_base,
        })
    }

    /// Mesh-global reference of local polygon `local_index` in the bound tile
    pub fn poly_ref(&self, local_index: u32) -> PolyRef {
        PolyRef::new(self.ref_base | local_index)
    }

    /// Local polygon index of `reference`, if it belongs to the bound tile
    pub fn local_index(&self, reference: PolyRef) -> Option<u32> {
        let (_, poly) = decode_poly_ref(reference);
        (self.ref_base != 0 && reference.id() - poly == self.ref_base).then_some(poly)
    }

    /// Populated graph of `level`
    pub fn graph(&self, level: usize) -> Option<&Graph> {
        self.graphs().get(level)
    }

    /// Mutable populated graph of `level`
    pub fn graph_mut(&mut self, level: usize) -> Option<&mut Graph> {
        let num_graphs = self.num_graphs;
        self.graphs
            .as_mut()
            .and_then(|g| g[..num_graphs].get_mut(level))
    }

    /// Populated graphs, level 0 first
    pub fn graphs(&self) -> &[Graph] {
        match self.graphs.as_ref() {
            Some(graphs) => &graphs[..self.num_graphs],
            None => &[],
        }
    }

    /// Graph slots allocated by the last `init`, populated or not
    pub fn graph_slots(&self) -> usize {
        self.graphs.as_ref().map_or(0, |g| g.len())
    }

    pub fn num_graphs(&self) -> usize {
        self.num_graphs
    }

    pub fn num_level(&self) -> usize {
        self.num_level
    }

    pub fn levels(&self) -> usize {
        self.config.levels
    }

    pub fn max_nodes(&self) -> usize {
        self.config.max_nodes
    }

    pub fn config(&self) -> &NavigationConfig {
        &self.config
    }

    pub fn ref_base(&self) -> u32 {
        self.ref_base
    }

    pub fn state(&self) -> NavigationState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == NavigationState::Ready
    }

    pub fn node_pool(&self) -> Option<&DtNodePool> {
        self.node_pool.as_deref()
    }

    pub fn open_list(&self) -> Option<&DtNodeQueue> {
        self.open_list.as_deref()
    }

    /// Bytes of facade memory held by graphs and search pools
    pub fn mem_used(&self) -> usize {
        let graph_array = self.graphs.as_ref().map_or(0, |g| g.block_size());
        let graphs: usize = self.graphs().iter().map(Graph::mem_used).sum();
        let pool = self.node_pool().map_or(0, DtNodePool::get_mem_used);
        let list = self.open_list().map_or(0, DtNodeQueue::get_mem_used);
        graph_array + graphs + pool + list
    }
}

impl<M: TileRefSource + ?Sized> Drop for Navigation<'_, M> {
    fn drop(&mut self) {
        self.destroy_graphs();
    }
}

impl<M: TileRefSource + ?Sized> std::fmt::Debug for Navigation<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Navigation")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("num_graphs", &self.num_graphs)
            .field("num_level", &self.num_level)
            .field("ref_base", &self.ref_base)
            .field("node_pool", &self.node_pool)
            .field("open_list", &self.open_list)
            .finish()
    }
}
