//! Detour runtime structures used by hierarchical navigation
//!
//! This crate provides the tiled navigation mesh bookkeeping needed to
//! resolve polygon references, plus the node pool and open list that back
//! graph searches.
//!
//! # Example
//!
//! ```rust
//! use detour::{NavMesh, NavMeshParams};
//!
//! let params = NavMeshParams {
//!     origin: [0.0, 0.0, 0.0],
//!     tile_width: 32.0,
//!     tile_height: 32.0,
//!     max_tiles: 4,
//!     max_polys_per_tile: 64,
//! };
//! let mut nav_mesh = NavMesh::new(params).unwrap();
//! let tile_ref = nav_mesh.add_tile(0, 0, 0, 16).unwrap();
//! let tile = nav_mesh.get_tile_by_ref(tile_ref).unwrap();
//! assert_eq!(nav_mesh.get_poly_ref_base(tile), tile_ref.id());
//! ```

pub mod detour_common;
pub mod nav_mesh;
pub mod node_pool;
pub mod status;

pub use detour_common::{dt_next_pow2, dt_node_pool_hash_size};
pub use nav_mesh::{
    MeshTile, NavMesh, TileHeader, decode_poly_ref, decode_poly_ref_full, encode_poly_ref,
    encode_poly_ref_with_salt,
};
pub use node_pool::{DT_NULL_IDX, DtNode, DtNodePool, DtNodeQueue, NodeFlags, NodeIndex};
pub use status::Status;

/// Reference to a polygon in the navigation mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PolyRef(u32);

impl PolyRef {
    /// Creates a reference from its raw value
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw reference value
    pub const fn id(&self) -> u32 {
        self.0
    }

    /// Zero is the null reference
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl From<u32> for PolyRef {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Parameters used to initialize a navigation mesh
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct NavMeshParams {
    /// World-space origin of the tile grid
    pub origin: [f32; 3],
    /// Width of each tile along the x-axis
    pub tile_width: f32,
    /// Height of each tile along the z-axis
    pub tile_height: f32,
    /// Maximum number of tiles the mesh can hold
    pub max_tiles: i32,
    /// Maximum number of polygons per tile
    pub max_polys_per_tile: i32,
}

impl Default for NavMeshParams {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            tile_width: 32.0,
            tile_height: 32.0,
            max_tiles: 128,
            max_polys_per_tile: 1024,
        }
    }
}
