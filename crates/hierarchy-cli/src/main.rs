//! CLI utility for exercising hierarchical navigation memory management

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use glam::Vec3;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use detour::{NavMesh, NavMeshParams, dt_node_pool_hash_size};
use detour_hierarchy::{Navigation, NavigationConfig};
use nav_common::{AllocStats, SharedAllocator, TrackingAllocator};

/// A CLI utility for hierarchical pathfinding graph lifecycles
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build synthetic hierarchies and reinitialize them repeatedly
    Reinit {
        /// Number of hierarchy levels
        #[clap(long, default_value = "3")]
        levels: usize,

        /// Search node capacity for the first round
        #[clap(long, default_value = "256")]
        max_nodes: usize,

        /// Added to the search node capacity after every round
        #[clap(long, default_value = "0")]
        grow_nodes: usize,

        /// Nodes in the level 0 graph; each level above holds half as many
        #[clap(long, default_value = "64")]
        nodes_per_graph: usize,

        /// Outgoing edges reserved per node
        #[clap(long, default_value = "4")]
        edges_per_node: usize,

        /// Number of build and reinitialize rounds
        #[clap(long, default_value = "4")]
        rounds: usize,
    },

    /// Print search pool sizing for a node capacity
    Sizing {
        /// Search node capacity
        #[clap(long)]
        max_nodes: usize,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    match args.command {
        Commands::Reinit {
            levels,
            max_nodes,
            grow_nodes,
            nodes_per_graph,
            edges_per_node,
            rounds,
        } => reinit(
            NavigationConfig::new(levels, max_nodes),
            grow_nodes,
            nodes_per_graph,
            edges_per_node,
            rounds,
        ),
        Commands::Sizing { max_nodes } => sizing(max_nodes),
    }
}

/// Build hierarchies, reinitialize them, and check the allocator balance
fn reinit(
    config: NavigationConfig,
    grow_nodes: usize,
    nodes_per_graph: usize,
    edges_per_node: usize,
    rounds: usize,
) -> Result<()> {
    if nodes_per_graph == 0 {
        bail!("--nodes-per-graph must be at least 1");
    }

    let mut nav_mesh = NavMesh::new(NavMeshParams {
        max_tiles: 1,
        max_polys_per_tile: nodes_per_graph as i32,
        ..NavMeshParams::default()
    })
    .context("Failed to create navigation mesh")?;
    nav_mesh
        .add_tile(0, 0, 0, nodes_per_graph as i32)
        .context("Failed to add navigation mesh tile")?;
    let tile = nav_mesh
        .get_tile_at(0, 0, 0)
        .context("Tile missing after insertion")?;

    let tracker = Arc::new(TrackingAllocator::new());
    let allocator: SharedAllocator = tracker.clone();

    println!(
        "Running {} rounds: {} levels, {} nodes at level 0, {} edges per node",
        rounds, config.levels, nodes_per_graph, edges_per_node
    );

    {
        let mut config = config;
        let mut nav = Navigation::new(&allocator, config.clone(), &nav_mesh, tile)
            .context("Invalid navigation configuration")?;

        for round in 0..rounds {
            nav.init()
                .with_context(|| format!("Reinitialization failed in round {round}"))?;

            build_levels(&mut nav, nodes_per_graph, edges_per_node)
                .with_context(|| format!("Failed to build graphs in round {round}"))?;
            let expanded = search_level_zero(&mut nav)?;

            let stats = tracker.stats();
            println!(
                "Round {}: {} graphs, {} bytes in use, {} live blocks, {} nodes expanded",
                round,
                nav.num_graphs(),
                nav.mem_used(),
                stats.live_blocks,
                expanded
            );

            if grow_nodes > 0 {
                config.max_nodes += grow_nodes;
                nav.set_config(config.clone())
                    .context("Grown node capacity is out of range")?;
            }
        }

        nav.init().context("Final reinitialization failed")?;
    }

    let stats = tracker.stats();
    print_stats(&stats);

    if stats.double_releases > 0 {
        bail!("{} blocks were released more than once", stats.double_releases);
    }
    if stats.live_blocks > 0 {
        bail!(
            "{} blocks ({} bytes) were never released",
            stats.live_blocks,
            stats.live_bytes
        );
    }

    println!("Every block was released exactly once");
    Ok(())
}

/// Populate every level with a ring graph, halving the node count per level
fn build_levels(
    nav: &mut Navigation<'_>,
    nodes_per_graph: usize,
    edges_per_node: usize,
) -> Result<()> {
    for level in 0..nav.levels() {
        let capacity = nodes_per_graph.checked_shr(level as u32).unwrap_or(0).max(1);
        let graph = nav.add_graph(capacity)?;

        for node in 0..capacity {
            graph.add_node(node);
            graph.init_edge(node, edges_per_node)?;
            for i in 0..edges_per_node {
                let target = (node + i + 1) % capacity;
                let pos = Vec3::new(target as f32, level as f32, 0.0);
                graph.add_edge(node, target, pos, level as i32, i as i32);
            }
            graph.init_intra_edge(node)?;
            let portals = graph.node(node).map_or(0, |n| n.portal_count());
            for from in 0..portals {
                for to in 0..portals {
                    graph.set_intra_edge(node, from, to, from.abs_diff(to) as f32);
                }
            }
        }

        nav.complete_level()?;
        log::debug!("level {level} built with {capacity} nodes");
    }

    Ok(())
}

/// Breadth-limited expansion over level 0 using the shared search pools
fn search_level_zero(nav: &mut Navigation<'_>) -> Result<usize> {
    let start = nav.poly_ref(0);
    let base = nav.ref_base();
    let search = nav.search_state()?;

    let Some(graph) = search.graphs.first() else {
        return Ok(0);
    };

    let start_idx = search
        .node_pool
        .get_node_index(start, 0)
        .context("Node pool exhausted")?;
    search.open_list.push(start_idx, 0.0)?;

    let mut expanded = 0;
    while let Some(idx) = search.open_list.pop() {
        let Some(node) = search.node_pool.get_node_at_idx(idx) else {
            break;
        };
        let local = (node.id.id() ^ base) as usize;
        let total = node.total;
        expanded += 1;

        for edge in graph.edges(local) {
            let neighbour = detour::PolyRef::new(base | edge.target);
            if search.node_pool.find_node(neighbour, 0).is_some() {
                continue;
            }
            let Some(next_idx) = search.node_pool.get_node_index(neighbour, 0) else {
                return Ok(expanded);
            };
            if let Some(next) = search.node_pool.get_node_at_idx_mut(next_idx) {
                next.total = total + 1.0;
                next.pidx = idx;
            }
            if search.open_list.push(next_idx, total + 1.0).is_err() {
                return Ok(expanded);
            }
        }
    }

    Ok(expanded)
}

/// Print search pool sizing for a node capacity
fn sizing(max_nodes: usize) -> Result<()> {
    let config = NavigationConfig::new(0, max_nodes);
    config.validate().context("Invalid node capacity")?;

    let tracker = Arc::new(TrackingAllocator::new());
    let allocator: SharedAllocator = tracker.clone();
    let pool = detour::DtNodePool::new(&allocator, max_nodes, dt_node_pool_hash_size(max_nodes))?;
    let queue = detour::DtNodeQueue::new(&allocator, max_nodes)?;

    println!("Node capacity: {max_nodes}");
    println!("Hash buckets: {}", pool.get_hash_size());
    println!("Node pool memory: {} bytes", pool.get_mem_used());
    println!("Open list memory: {} bytes", queue.get_mem_used());
    println!("Blocks allocated: {}", tracker.stats().allocations);

    Ok(())
}

fn print_stats(stats: &AllocStats) {
    println!("Allocations: {}", stats.allocations);
    println!("Releases: {}", stats.releases);
    println!("Peak memory: {} bytes", stats.peak_bytes);
    println!("Permanent allocations: {}", stats.perm_allocations);
    println!("Temporary allocations: {}", stats.temp_allocations);
}
