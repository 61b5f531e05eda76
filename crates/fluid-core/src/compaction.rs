//! Mark -> prefix sum -> scatter stream compaction.
//!
//! The prefix sum is a two-level Blelloch scan: each block of
//! [`SCAN_BLOCK_SIZE`] elements is scanned on its own (one thread group on a
//! GPU), the block totals are scanned recursively, and the block offsets are
//! added back. Compaction is stable.

use glam::Vec3;

use crate::adhesion::AttachmentBuffer;
use crate::particle::ParticleStore;

pub const SCAN_BLOCK_SIZE: usize = 256;

/// In-place exclusive scan of one block (up-sweep + down-sweep).
///
/// Returns the block total. `block.len()` must not exceed [`SCAN_BLOCK_SIZE`].
pub fn blelloch_scan_block(block: &mut [u32]) -> u32 {
    let len = block.len();
    debug_assert!(len <= SCAN_BLOCK_SIZE);
    if len == 0 {
        return 0;
    }
    let n = len.next_power_of_two();
    let mut tree = [0u32; SCAN_BLOCK_SIZE];
    tree[..len].copy_from_slice(block);

    // Up-sweep (reduce)
    let mut stride = 1;
    while stride < n {
        let mut i = 2 * stride - 1;
        while i < n {
            tree[i] = tree[i].wrapping_add(tree[i - stride]);
            i += 2 * stride;
        }
        stride *= 2;
    }

    let total = tree[n - 1];
    tree[n - 1] = 0;

    // Down-sweep
    let mut stride = n / 2;
    while stride > 0 {
        let mut i = 2 * stride - 1;
        while i < n {
            let left = tree[i - stride];
            tree[i - stride] = tree[i];
            tree[i] = tree[i].wrapping_add(left);
            i += 2 * stride;
        }
        stride /= 2;
    }

    block.copy_from_slice(&tree[..len]);
    total
}

/// Exclusive prefix sum of `values` into `out`. Returns the grand total.
pub fn exclusive_scan(values: &[u32], out: &mut Vec<u32>) -> u32 {
    out.clear();
    out.extend_from_slice(values);
    if values.is_empty() {
        return 0;
    }

    #[cfg(feature = "parallel")]
    let block_sums: Vec<u32> = {
        use rayon::prelude::*;
        out.par_chunks_mut(SCAN_BLOCK_SIZE)
            .map(blelloch_scan_block)
            .collect()
    };
    #[cfg(not(feature = "parallel"))]
    let block_sums: Vec<u32> = out
        .chunks_mut(SCAN_BLOCK_SIZE)
        .map(blelloch_scan_block)
        .collect();

    if block_sums.len() == 1 {
        return block_sums[0];
    }

    let mut block_offsets = Vec::with_capacity(block_sums.len());
    let total = exclusive_scan(&block_sums, &mut block_offsets);
    for (chunk, offset) in out.chunks_mut(SCAN_BLOCK_SIZE).zip(&block_offsets) {
        for v in chunk {
            *v = v.wrapping_add(*offset);
        }
    }
    total
}

/// Reusable compaction buffers.
#[derive(Default)]
pub struct StreamCompactionManager {
    marks: Vec<u32>,
    offsets: Vec<u32>,
    indices: Vec<u32>,
}

impl StreamCompactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ascending indices of the elements whose mark is set.
    pub fn compact_indices(&mut self, mask: &[bool]) -> &[u32] {
        self.marks.clear();
        self.marks.extend(mask.iter().map(|&keep| keep as u32));
        let total = exclusive_scan(&self.marks, &mut self.offsets) as usize;

        self.indices.clear();
        self.indices.resize(total, 0);
        for (i, (&mark, &offset)) in self.marks.iter().zip(&self.offsets).enumerate() {
            if mark != 0 {
                self.indices[offset as usize] = i as u32;
            }
        }
        &self.indices
    }

    /// Candidates whose position lies in the `[min, max]` box, for CPU-side
    /// per-polygon collision.
    pub fn filter_aabb(&mut self, positions: &[Vec3], min: Vec3, max: Vec3) -> &[u32] {
        let mask: Vec<bool> = positions
            .iter()
            .map(|p| p.cmpge(min).all() && p.cmple(max).all())
            .collect();
        self.compact_indices(&mask)
    }

    /// Remove every particle whose `alive` entry is false, closing the gaps
    /// and keeping survivors in their relative order. Attachment records move
    /// with their particles. Returns the number removed.
    pub fn compact_particles(
        &mut self,
        particles: &mut ParticleStore,
        attachments: Option<&mut AttachmentBuffer>,
        alive: &[bool],
    ) -> usize {
        let count = particles.count;
        debug_assert_eq!(alive.len(), count);
        if alive.iter().all(|&a| a) {
            return 0;
        }
        self.compact_indices(&alive[..count]);
        let removed = count - self.indices.len();
        particles.gather(&self.indices);
        if let Some(attachments) = attachments {
            attachments.gather(&self.indices);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_scan_matches_serial() {
        let mut block: Vec<u32> = (1..=10).collect();
        let total = blelloch_scan_block(&mut block);
        assert_eq!(total, 55);
        assert_eq!(block, vec![0, 1, 3, 6, 10, 15, 21, 28, 36, 45]);
    }

    #[test]
    fn test_two_level_scan_across_blocks() {
        let values = vec![1u32; SCAN_BLOCK_SIZE * 3 + 17];
        let mut out = Vec::new();
        let total = exclusive_scan(&values, &mut out);
        assert_eq!(total as usize, values.len());
        assert!(out.iter().enumerate().all(|(i, &v)| v as usize == i));
    }

    #[test]
    fn test_compact_indices_keeps_order() {
        let mut manager = StreamCompactionManager::new();
        let mask = [true, false, true, true, false];
        assert_eq!(manager.compact_indices(&mask), &[0, 2, 3]);
    }
}
