/// Bits consumed per radix pass.
pub const RADIX_DIGIT_BITS: u32 = 4;
pub const RADIX_BUCKETS: usize = 1 << RADIX_DIGIT_BITS;
/// Six 4-bit passes cover 24-bit keys, the widest preset (Large classic).
pub const RADIX_PASSES: u32 = 6;

/// Stable LSD radix sort of `(key, value)` pairs.
///
/// Each pass is histogram -> exclusive prefix sum -> stable scatter, ping-ponging
/// between the caller's buffers and internal scratch. The pass count is even,
/// so the sorted result ends up back in the caller's vectors.
#[derive(Default)]
pub struct RadixSorter {
    keys_alt: Vec<u32>,
    values_alt: Vec<u32>,
}

impl RadixSorter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort_pairs(&mut self, keys: &mut Vec<u32>, values: &mut Vec<u32>) {
        let n = keys.len();
        assert_eq!(n, values.len(), "key/value length mismatch");
        self.keys_alt.resize(n, 0);
        self.values_alt.resize(n, 0);

        for pass in 0..RADIX_PASSES {
            let shift = pass * RADIX_DIGIT_BITS;

            // 1. Digit histogram
            let mut offsets = [0u32; RADIX_BUCKETS];
            for &k in keys.iter() {
                offsets[digit(k, shift)] += 1;
            }

            // 2. Exclusive prefix sum -> bucket start offsets
            let mut running = 0u32;
            for slot in offsets.iter_mut() {
                let c = *slot;
                *slot = running;
                running += c;
            }

            // 3. Stable scatter
            for i in 0..n {
                let d = digit(keys[i], shift);
                let dst = offsets[d] as usize;
                offsets[d] += 1;
                self.keys_alt[dst] = keys[i];
                self.values_alt[dst] = values[i];
            }

            std::mem::swap(keys, &mut self.keys_alt);
            std::mem::swap(values, &mut self.values_alt);
        }
    }
}

#[inline]
fn digit(key: u32, shift: u32) -> usize {
    ((key >> shift) as usize) & (RADIX_BUCKETS - 1)
}
