//! Navigation mesh tile table for Detour
//!
//! The navigation mesh is a grid of tiles, each holding a range of
//! polygons. Polygons are addressed by [`PolyRef`] values that pack a salt,
//! a 1-based tile id and a polygon id, so the base reference of a tile is
//! enough to translate tile-local polygon indices into mesh-global ones.

use std::collections::HashMap;

use super::{NavMeshParams, PolyRef, Status};
use nav_common::{Error, Result};

/// Number of bits for polygon id
const DT_POLY_BITS: u32 = 16;
/// Number of bits for tile id
const DT_TILE_BITS: u32 = 10;
/// Number of bits for salt
const DT_SALT_BITS: u32 = 6;

/// Maximum polygon id value (16 bits)
const DT_POLY_MASK: u32 = (1 << DT_POLY_BITS) - 1;
/// Maximum tile id value (10 bits)
const DT_TILE_MASK: u32 = (1 << DT_TILE_BITS) - 1;
/// Maximum salt value (6 bits)
const DT_SALT_MASK: u32 = (1 << DT_SALT_BITS) - 1;

/// Extracts the polygon id from a PolyRef
#[inline]
pub(crate) fn decode_poly_id(reference: PolyRef) -> u32 {
    reference.id() & DT_POLY_MASK
}

/// Extracts the tile id from a PolyRef
#[inline]
pub(crate) fn decode_tile_id(reference: PolyRef) -> u32 {
    (reference.id() >> DT_POLY_BITS) & DT_TILE_MASK
}

/// Extracts the salt value from a PolyRef
#[inline]
fn decode_poly_id_salt(reference: PolyRef) -> u32 {
    (reference.id() >> (DT_POLY_BITS + DT_TILE_BITS)) & DT_SALT_MASK
}

/// Creates a PolyRef from tile and polygon ids
#[inline]
pub fn encode_poly_ref(tile_id: u32, poly_id: u32) -> PolyRef {
    PolyRef::new(((tile_id & DT_TILE_MASK) << DT_POLY_BITS) | (poly_id & DT_POLY_MASK))
}

/// Creates a PolyRef from salt, tile and polygon ids
#[inline]
pub fn encode_poly_ref_with_salt(salt: u32, tile_id: u32, poly_id: u32) -> PolyRef {
    PolyRef::new(
        ((salt & DT_SALT_MASK) << (DT_POLY_BITS + DT_TILE_BITS))
            | ((tile_id & DT_TILE_MASK) << DT_POLY_BITS)
            | (poly_id & DT_POLY_MASK),
    )
}

/// Decodes a PolyRef into tile and polygon ids
/// Note: The returned tile_id is 1-based to avoid PolyRef(0)
#[inline]
pub fn decode_poly_ref(reference: PolyRef) -> (u32, u32) {
    (decode_tile_id(reference), decode_poly_id(reference))
}

/// Decodes a PolyRef into salt, tile and polygon ids
#[inline]
pub fn decode_poly_ref_full(reference: PolyRef) -> (u32, u32, u32) {
    (
        decode_poly_id_salt(reference),
        decode_tile_id(reference),
        decode_poly_id(reference),
    )
}

/// Converts a 1-based tile ID to a 0-based tile index
#[inline]
pub(crate) fn tile_id_to_index(tile_id: u32) -> Option<usize> {
    if tile_id == 0 {
        None
    } else {
        Some((tile_id - 1) as usize)
    }
}

/// Mesh tile in the navigation mesh
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct MeshTile {
    /// Salt value for the tile
    pub salt: u32,
    /// Tile location and polygon count; `None` while the slot is free
    pub header: Option<TileHeader>,
    /// Next free tile in the linked list
    pub next: Option<usize>,
}

impl Default for MeshTile {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshTile {
    /// Creates a new empty mesh tile
    pub fn new() -> Self {
        Self {
            salt: 1,
            header: None,
            next: None,
        }
    }

    /// Number of polygons in the tile
    pub fn poly_count(&self) -> usize {
        self.header.as_ref().map_or(0, |h| h.poly_count as usize)
    }
}

/// Tile header information
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileHeader {
    /// Tile position (x, y, layer)
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    /// Number of polys in the tile
    pub poly_count: i32,
}

impl TileHeader {
    /// Creates a new tile header
    pub fn new(x: i32, y: i32, layer: i32) -> Self {
        Self {
            x,
            y,
            layer,
            poly_count: 0,
        }
    }
}

/// Navigation mesh structure
#[derive(Debug)]
pub struct NavMesh {
    /// Navigation mesh parameters
    params: NavMeshParams,
    /// Tiles in the navigation mesh
    tiles: Vec<MeshTile>,
    /// Head of the free tile list
    next_free: Option<usize>,
    /// Tile position lookup
    pos_lookup: HashMap<(i32, i32, i32), usize>,
}

impl NavMesh {
    /// Creates a new navigation mesh
    pub fn new(params: NavMeshParams) -> Result<Self> {
        if params.origin.iter().any(|v| !v.is_finite()) {
            return Err(Error::Detour(Status::InvalidParam.to_string()));
        }

        if params.tile_width <= 0.0 || params.tile_height <= 0.0 {
            return Err(Error::Detour(Status::InvalidParam.to_string()));
        }

        if params.max_tiles <= 0 || params.max_polys_per_tile <= 0 {
            return Err(Error::Detour(Status::InvalidParam.to_string()));
        }

        if params.max_tiles >= (1 << DT_TILE_BITS) {
            return Err(Error::Detour(Status::InvalidParam.to_string()));
        }

        if params.max_polys_per_tile >= (1 << DT_POLY_BITS) {
            return Err(Error::Detour(Status::InvalidParam.to_string()));
        }

        // Free list runs in index order
        let max_tiles = params.max_tiles as usize;
        let tiles = (0..max_tiles)
            .map(|i| MeshTile {
                next: (i + 1 < max_tiles).then_some(i + 1),
                ..MeshTile::new()
            })
            .collect();

        Ok(Self {
            params,
            tiles,
            next_free: Some(0),
            pos_lookup: HashMap::new(),
        })
    }

    /// Adds a tile at grid location `(x, y, layer)` holding `poly_count` polygons.
    ///
    /// Returns the base reference of the new tile.
    pub fn add_tile(&mut self, x: i32, y: i32, layer: i32, poly_count: i32) -> Result<PolyRef> {
        if poly_count < 0 || poly_count > self.params.max_polys_per_tile {
            return Err(Error::Detour(Status::InvalidParam.to_string()));
        }

        if self.pos_lookup.contains_key(&(x, y, layer)) {
            return Err(Error::Detour(Status::AlreadyExists.to_string()));
        }

        let tile_idx = self.allocate_tile()?;

        let mut header = TileHeader::new(x, y, layer);
        header.poly_count = poly_count;

        let tile = &mut self.tiles[tile_idx];
        tile.header = Some(header);
        tile.next = None;
        let salt = tile.salt;

        self.pos_lookup.insert((x, y, layer), tile_idx);

        log::debug!("added tile ({x}, {y}, {layer}) at index {tile_idx} with {poly_count} polys");

        Ok(encode_poly_ref_with_salt(salt, (tile_idx + 1) as u32, 0))
    }

    /// Removes a tile from the navigation mesh
    ///
    /// The slot's salt is bumped so references into the removed tile stop
    /// resolving.
    pub fn remove_tile(&mut self, reference: PolyRef) -> Result<()> {
        let (salt, tile_id, _) = decode_poly_ref_full(reference);

        let tile_idx =
            tile_id_to_index(tile_id).ok_or(Error::Detour(Status::InvalidParam.to_string()))?;

        let tile = self
            .tiles
            .get_mut(tile_idx)
            .ok_or(Error::Detour(Status::InvalidParam.to_string()))?;

        if salt != (tile.salt & DT_SALT_MASK) {
            return Err(Error::Detour(Status::InvalidParam.to_string()));
        }

        let header = tile
            .header
            .take()
            .ok_or(Error::Detour(Status::NotFound.to_string()))?;
        self.pos_lookup.remove(&(header.x, header.y, header.layer));

        // Zero salt would let a stale reference decode as valid tile 0
        tile.salt = (tile.salt + 1) & DT_SALT_MASK;
        if tile.salt == 0 {
            tile.salt = 1;
        }

        tile.next = self.next_free;
        self.next_free = Some(tile_idx);

        Ok(())
    }

    /// Allocates a tile from the free list
    fn allocate_tile(&mut self) -> Result<usize> {
        let tile_idx = self
            .next_free
            .ok_or(Error::Detour(Status::OutOfMemory.to_string()))?;
        self.next_free = self.tiles[tile_idx].next;
        Ok(tile_idx)
    }

    /// Gets the tile index from tile coordinates
    fn get_tile_index(&self, tile_x: i32, tile_y: i32, tile_layer: i32) -> Option<usize> {
        self.pos_lookup.get(&(tile_x, tile_y, tile_layer)).copied()
    }

    /// Gets the tile at the specified grid location
    pub fn get_tile_at(&self, x: i32, y: i32, layer: i32) -> Option<&MeshTile> {
        self.get_tile_index(x, y, layer)
            .and_then(|idx| self.tiles.get(idx))
    }

    /// Gets an occupied tile by index
    pub fn get_tile(&self, index: usize) -> Option<&MeshTile> {
        self.tiles.get(index).filter(|t| t.header.is_some())
    }

    /// Gets the base polygon reference for a tile
    ///
    /// Returns 0 when `tile` is not one of this mesh's tiles.
    pub fn get_poly_ref_base(&self, tile: &MeshTile) -> u32 {
        self.tile_index_of(tile)
            .map(|idx| encode_poly_ref_with_salt(tile.salt, (idx + 1) as u32, 0).id())
            .unwrap_or(0)
    }

    /// Gets the reference for a tile
    pub fn get_tile_ref(&self, tile: &MeshTile) -> Option<PolyRef> {
        self.tile_index_of(tile)
            .map(|idx| encode_poly_ref_with_salt(tile.salt, (idx + 1) as u32, 0))
    }

    /// Gets a tile by its reference
    pub fn get_tile_by_ref(&self, reference: PolyRef) -> Option<&MeshTile> {
        if !reference.is_valid() {
            return None;
        }

        let (salt, tile_id, _) = decode_poly_ref_full(reference);
        let tile_idx = tile_id_to_index(tile_id)?;

        self.tiles
            .get(tile_idx)
            .filter(|tile| tile.header.is_some() && salt == (tile.salt & DT_SALT_MASK))
    }

    /// Checks if a polygon reference is valid
    pub fn is_valid_poly_ref(&self, reference: PolyRef) -> bool {
        let poly_id = decode_poly_id(reference) as usize;
        self.get_tile_by_ref(reference)
            .is_some_and(|tile| poly_id < tile.poly_count())
    }

    /// Finds a tile's slot by comparing addresses
    fn tile_index_of(&self, tile: &MeshTile) -> Option<usize> {
        self.tiles
            .iter()
            .position(|t| std::ptr::eq(t, tile) && t.header.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(max_tiles: i32) -> NavMeshParams {
        NavMeshParams {
            origin: [0.0, 0.0, 0.0],
            tile_width: 1.0,
            tile_height: 1.0,
            max_tiles,
            max_polys_per_tile: 8,
        }
    }

    #[test]
    fn test_invalid_params_rejected() {
        assert!(NavMesh::new(params(0)).is_err());
        assert!(NavMesh::new(params(1 << DT_TILE_BITS)).is_err());

        let mut bad_origin = params(1);
        bad_origin.origin[1] = f32::NAN;
        assert!(NavMesh::new(bad_origin).is_err());

        let mut bad_size = params(1);
        bad_size.tile_width = 0.0;
        assert!(NavMesh::new(bad_size).is_err());
    }

    #[test]
    fn test_poly_ref_encoding() {
        let reference = encode_poly_ref_with_salt(3, 5, 42);
        assert_eq!(decode_poly_ref_full(reference), (3, 5, 42));
        assert_eq!(decode_poly_ref(reference), (5, 42));
        assert_eq!(encode_poly_ref(5, 42).id(), reference.id() & !(DT_SALT_MASK << 26));
    }

    #[test]
    fn test_poly_ref_base_matches_tile_ref() {
        let mut nav_mesh = NavMesh::new(params(2)).unwrap();
        let first = nav_mesh.add_tile(0, 0, 0, 4).unwrap();
        let second = nav_mesh.add_tile(1, 0, 0, 4).unwrap();
        assert_ne!(first, second);

        let tile = nav_mesh.get_tile_at(1, 0, 0).unwrap();
        assert_eq!(nav_mesh.get_poly_ref_base(tile), second.id());
        assert_eq!(nav_mesh.get_tile_ref(tile), Some(second));
        assert_eq!(decode_poly_ref(second), (2, 0));
    }

    #[test]
    fn test_foreign_tile_has_zero_base() {
        let nav_mesh = NavMesh::new(params(1)).unwrap();
        let detached = MeshTile::new();
        assert_eq!(nav_mesh.get_poly_ref_base(&detached), 0);
    }

    #[test]
    fn test_remove_tile_invalidates_references() {
        let mut nav_mesh = NavMesh::new(params(1)).unwrap();
        let old_ref = nav_mesh.add_tile(0, 0, 0, 4).unwrap();
        assert!(nav_mesh.is_valid_poly_ref(PolyRef::new(old_ref.id() | 3)));
        assert!(!nav_mesh.is_valid_poly_ref(PolyRef::new(old_ref.id() | 4)));

        nav_mesh.remove_tile(old_ref).unwrap();
        assert!(nav_mesh.get_tile_by_ref(old_ref).is_none());
        assert!(nav_mesh.remove_tile(old_ref).is_err());

        let new_ref = nav_mesh.add_tile(0, 0, 0, 4).unwrap();
        assert_ne!(old_ref, new_ref);
        let (new_salt, new_tile, _) = decode_poly_ref_full(new_ref);
        let (old_salt, _, _) = decode_poly_ref_full(old_ref);
        assert_eq!(new_tile, 1);
        assert_ne!(new_salt, old_salt);
    }

    #[test]
    fn test_tile_header_records_location_and_polys() {
        let mut nav_mesh = NavMesh::new(params(2)).unwrap();
        nav_mesh.add_tile(2, -3, 1, 5).unwrap();

        let header = nav_mesh.get_tile_at(2, -3, 1).unwrap().header.as_ref().unwrap();
        assert_eq!((header.x, header.y, header.layer), (2, -3, 1));
        assert_eq!(header.poly_count, 5);
        assert_eq!(nav_mesh.get_tile(0).unwrap().poly_count(), 5);
        assert!(nav_mesh.get_tile(1).is_none());
        assert!(nav_mesh.get_tile_at(0, 0, 0).is_none());
    }

    #[test]
    fn test_tile_table_full() {
        let mut nav_mesh = NavMesh::new(params(1)).unwrap();
        nav_mesh.add_tile(0, 0, 0, 1).unwrap();
        assert!(nav_mesh.add_tile(1, 0, 0, 1).is_err());
        assert!(nav_mesh.add_tile(0, 0, 0, 1).is_err());
    }
}
