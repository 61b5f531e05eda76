//! Z-order sort keys.
//!
//! Classic mode maps positions onto a bounded `2^bits` grid per axis centered
//! on the bounds and interleaves the clamped cell coordinates. Hybrid mode keys
//! an unbounded grid: coarse tiles of 64^3 cells are folded into a 3-bit hash
//! prefix and the cell inside the tile supplies 18 bits of local Morton code.
//! Distinct tiles sharing a hash land in the same key range, so neighbor
//! consumers must always distance-check what they visit.

use glam::{IVec3, Vec3};

use crate::params::{SortConfig, SortMode};

pub const HYBRID_TILE_HASH_BITS: u32 = 3;
pub const HYBRID_LOCAL_BITS_PER_AXIS: u32 = 6;
/// Cells per tile edge in hybrid mode.
pub const HYBRID_TILE_CELLS: i32 = 1 << HYBRID_LOCAL_BITS_PER_AXIS;

/// Cell coordinates are clamped to this magnitude before any integer math so
/// far outliers (or NaN, which casts to 0) never overflow.
const MAX_CELL_COORD: i32 = 1 << 24;

/// Spread the low 10 bits of `v` so there are two zero bits between each.
#[inline]
pub fn spread_bits(v: u32) -> u32 {
    let mut x = v & 0x3ff;
    x = (x | (x << 16)) & 0x0300_00ff;
    x = (x | (x << 8)) & 0x0300_f00f;
    x = (x | (x << 4)) & 0x030c_30c3;
    x = (x | (x << 2)) & 0x0924_9249;
    x
}

/// Interleave three coordinates (x in bit 0, y in bit 1, z in bit 2).
#[inline]
pub fn morton_encode(x: u32, y: u32, z: u32) -> u32 {
    spread_bits(x) | (spread_bits(y) << 1) | (spread_bits(z) << 2)
}

/// Hash coarse tile coordinates down to the hybrid key prefix.
#[inline]
pub fn tile_hash(tile: IVec3) -> u32 {
    let mut h = (tile.x as u32).wrapping_mul(73_856_093)
        ^ (tile.y as u32).wrapping_mul(19_349_663)
        ^ (tile.z as u32).wrapping_mul(83_492_791);
    h ^= h >> 15;
    h = h.wrapping_mul(0x2c1b_3c6d);
    h ^= h >> 12;
    h & ((1 << HYBRID_TILE_HASH_BITS) - 1)
}

/// Mapping from world position to sort key, shared by sorting and neighbor search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KeySpace {
    mode: SortMode,
    bits_per_axis: u32,
    cell_size: f32,
    inv_cell_size: f32,
    origin: Vec3,
}

impl KeySpace {
    /// `cell_size` in cm (normally the smoothing radius), `center` is the
    /// world point the classic grid is centered on.
    pub fn new(config: &SortConfig, cell_size: f32, center: Vec3) -> Self {
        let bits_per_axis = match config.mode {
            SortMode::Classic => config.resolution.bits_per_axis(),
            SortMode::HybridTiled => HYBRID_LOCAL_BITS_PER_AXIS,
        };
        let half_cells = (1u32 << bits_per_axis) as f32 * 0.5;
        Self {
            mode: config.mode,
            bits_per_axis,
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            origin: center - Vec3::splat(half_cells * cell_size),
        }
    }

    pub fn mode(&self) -> SortMode {
        self.mode
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Width of a key in bits.
    pub fn key_bits(&self) -> u32 {
        match self.mode {
            SortMode::Classic => 3 * self.bits_per_axis,
            SortMode::HybridTiled => HYBRID_TILE_HASH_BITS + 3 * HYBRID_LOCAL_BITS_PER_AXIS,
        }
    }

    /// Number of addressable keys (size of the cell range table).
    pub fn table_size(&self) -> usize {
        1usize << self.key_bits()
    }

    /// Unclamped grid cell of a world position.
    #[inline]
    pub fn cell_of(&self, pos: Vec3) -> IVec3 {
        let rel = (pos - self.origin) * self.inv_cell_size;
        IVec3::new(
            (rel.x.floor() as i32).clamp(-MAX_CELL_COORD, MAX_CELL_COORD),
            (rel.y.floor() as i32).clamp(-MAX_CELL_COORD, MAX_CELL_COORD),
            (rel.z.floor() as i32).clamp(-MAX_CELL_COORD, MAX_CELL_COORD),
        )
    }

    /// Clamp a cell into the representable grid.
    ///
    /// Classic mode pins outliers to the boundary cells instead of letting
    /// their coordinates spill into neighboring key bits; such particles are
    /// mispositioned for neighbor search but the key space stays intact.
    #[inline]
    pub fn clamp_cell(&self, cell: IVec3) -> IVec3 {
        match self.mode {
            SortMode::Classic => {
                let max = (1i32 << self.bits_per_axis) - 1;
                cell.clamp(IVec3::ZERO, IVec3::splat(max))
            }
            SortMode::HybridTiled => cell,
        }
    }

    /// Key of a cell, or `None` when a classic cell lies outside the grid.
    #[inline]
    pub fn cell_key(&self, cell: IVec3) -> Option<u32> {
        match self.mode {
            SortMode::Classic => {
                let max = (1i32 << self.bits_per_axis) - 1;
                if cell.min_element() < 0 || cell.max_element() > max {
                    return None;
                }
                Some(morton_encode(cell.x as u32, cell.y as u32, cell.z as u32))
            }
            SortMode::HybridTiled => {
                let tile = IVec3::new(
                    cell.x.div_euclid(HYBRID_TILE_CELLS),
                    cell.y.div_euclid(HYBRID_TILE_CELLS),
                    cell.z.div_euclid(HYBRID_TILE_CELLS),
                );
                let local = IVec3::new(
                    cell.x.rem_euclid(HYBRID_TILE_CELLS),
                    cell.y.rem_euclid(HYBRID_TILE_CELLS),
                    cell.z.rem_euclid(HYBRID_TILE_CELLS),
                );
                let local_key = morton_encode(local.x as u32, local.y as u32, local.z as u32);
                Some((tile_hash(tile) << (3 * HYBRID_LOCAL_BITS_PER_AXIS)) | local_key)
            }
        }
    }

    /// Sort key of a world position.
    #[inline]
    pub fn key(&self, pos: Vec3) -> u32 {
        self.cell_key(self.clamp_cell(self.cell_of(pos)))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::GridResolution;

    #[test]
    fn test_morton_interleaves_axes() {
        assert_eq!(morton_encode(1, 0, 0), 0b001);
        assert_eq!(morton_encode(0, 1, 0), 0b010);
        assert_eq!(morton_encode(0, 0, 1), 0b100);
        assert_eq!(morton_encode(3, 0, 0), 0b001_001);
    }

    #[test]
    fn test_classic_clamps_outliers_into_boundary_cells() {
        let config = SortConfig {
            mode: SortMode::Classic,
            resolution: GridResolution::Small,
        };
        let space = KeySpace::new(&config, 10.0, Vec3::ZERO);
        let far = space.key(Vec3::splat(1.0e9));
        let max = (1u32 << 6) - 1;
        assert_eq!(far, morton_encode(max, max, max));
        assert!((far as usize) < space.table_size());
        assert_eq!(space.key(Vec3::splat(-1.0e9)), 0);
    }

    #[test]
    fn test_hybrid_key_fits_21_bits() {
        let config = SortConfig {
            mode: SortMode::HybridTiled,
            resolution: GridResolution::Large,
        };
        let space = KeySpace::new(&config, 10.0, Vec3::ZERO);
        assert_eq!(space.key_bits(), 21);
        for p in [Vec3::splat(1.0e7), Vec3::splat(-1.0e7), Vec3::new(123.0, -456.0, 789.0)] {
            assert!(space.key(p) < (1 << 21));
        }
    }

    #[test]
    fn test_nan_position_keys_safely() {
        let space = KeySpace::new(&SortConfig::default(), 20.0, Vec3::ZERO);
        let key = space.key(Vec3::new(f32::NAN, 0.0, 0.0));
        assert!((key as usize) < space.table_size());
    }
}
