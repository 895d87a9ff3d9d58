//! Hierarchical pathfinding resources for Detour navigation meshes
//!
//! A [`Navigation`] manager owns one [`Graph`] per abstraction level plus the
//! node pool and open list shared by searches over those graphs. All of it
//! is allocated through the [`nav_common::NavAllocator`] facade, and
//! [`Navigation::init`] can be called any number of times to rebuild the
//! hierarchy without leaking the previous one.
//!
//! # Example
//!
//! ```rust
//! use detour::{NavMesh, NavMeshParams};
//! use detour_hierarchy::{Navigation, NavigationConfig};
//! use glam::Vec3;
//!
//! let mut nav_mesh = NavMesh::new(NavMeshParams::default()).unwrap();
//! nav_mesh.add_tile(0, 0, 0, 32).unwrap();
//! let tile = nav_mesh.get_tile_at(0, 0, 0).unwrap();
//!
//! let allocator = nav_common::default_allocator();
//! let config = NavigationConfig::new(1, 256);
//! let mut nav = Navigation::new(&allocator, config, &nav_mesh, tile).unwrap();
//! nav.init().unwrap();
//!
//! let graph = nav.add_graph(2).unwrap();
//! graph.add_node(0);
//! graph.add_node(1);
//! graph.init_edge(0, 1).unwrap();
//! graph.add_edge(0, 1, Vec3::new(1.0, 0.0, 0.0), 0, 0);
//! assert_eq!(nav.graph(0).unwrap().edges(0).len(), 1);
//!
//! // Rebuilding releases the old graphs and reuses the search pools
//! nav.init().unwrap();
//! assert_eq!(nav.num_graphs(), 0);
//! ```

pub mod config;
pub mod edge_store;
pub mod graph;
pub mod navigation;

pub use config::{MAX_SEARCH_NODES, NavigationConfig};
pub use edge_store::{Edge, EdgeSpan, IntraEdge};
pub use graph::{Graph, Node};
pub use navigation::{Navigation, NavigationState, SearchState, TileRefSource};
