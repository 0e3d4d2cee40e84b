//! Immediate constant pool.
//!
//! Literal constants live in vec4 entries appended after the shader's uniforms.
//! A new constant reuses an existing entry when each of its values either matches
//! a lane already there or fits in one of the entry's free lanes.

use super::swizzle::Swizzle;

/// One vec4 constant register worth of immediates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Immediate {
    pub values: [u32; 4],
    pub ncomp: u8,
}

impl Immediate {
    pub fn as_f32(&self) -> [f32; 4] {
        self.values.map(f32::from_bits)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImmediatePool {
    entries: Vec<Immediate>,
}

impl ImmediatePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Immediate] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Intern up to four 32-bit values and return the entry index plus the
    /// swizzle reading value `i` at position `i`.
    pub fn intern(&mut self, values: &[u32]) -> (usize, Swizzle) {
        debug_assert!(!values.is_empty() && values.len() <= 4);

        for (idx, entry) in self.entries.iter_mut().enumerate() {
            if let Some((merged, swizzle)) = Self::try_merge(entry, values) {
                *entry = merged;
                return (idx, Self::finish(swizzle, values.len()));
            }
        }

        // an empty entry always has room for four values
        let (entry, swizzle) =
            Self::try_merge(&Immediate::default(), values).unwrap_or_default();
        self.entries.push(entry);
        (self.entries.len() - 1, Self::finish(swizzle, values.len()))
    }

    /// Interned location of a single value, splatted.
    pub fn intern_scalar(&mut self, value: f32) -> (usize, Swizzle) {
        self.intern(&[value.to_bits()])
    }

    fn try_merge(entry: &Immediate, values: &[u32]) -> Option<(Immediate, Swizzle)> {
        let mut merged = *entry;
        let mut swizzle = Swizzle::IDENTITY;
        for (i, value) in values.iter().enumerate() {
            let lanes = merged.ncomp as usize;
            let lane = match merged.values[..lanes].iter().position(|v| v == value) {
                Some(lane) => lane,
                None if lanes < 4 => {
                    merged.values[lanes] = *value;
                    merged.ncomp += 1;
                    lanes
                }
                None => return None,
            };
            swizzle.set(i, lane as u8);
        }
        Some((merged, swizzle))
    }

    fn finish(swizzle: Swizzle, ncomp: usize) -> Swizzle {
        if ncomp == 1 {
            swizzle.select(Swizzle::X)
        } else {
            swizzle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(values: &[f32]) -> Vec<u32> {
        values.iter().map(|v| v.to_bits()).collect()
    }

    #[test]
    fn test_single_values_share_one_entry() {
        let mut pool = ImmediatePool::new();
        let (a, swz_a) = pool.intern(&bits(&[1.0]));
        let (b, swz_b) = pool.intern(&bits(&[2.0]));
        let (c, swz_c) = pool.intern(&bits(&[1.0]));
        assert_eq!((a, b, c), (0, 0, 0));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.entries()[0].ncomp, 2);
        assert_eq!(swz_a.components(), [0, 0, 0, 0]);
        assert_eq!(swz_b.components(), [1, 1, 1, 1]);
        assert_eq!(swz_c, swz_a);
    }

    #[test]
    fn test_vec4_fills_entry() {
        let mut pool = ImmediatePool::new();
        let (idx, swz) = pool.intern(&bits(&[0.0, 1.0, 2.0, 3.0]));
        assert_eq!(idx, 0);
        assert_eq!(swz, Swizzle::IDENTITY);
        assert_eq!(pool.entries()[0].ncomp, 4);

        // no free lane and no match
        let (idx, _) = pool.intern(&bits(&[5.0]));
        assert_eq!(idx, 1);
        // fully matching lanes reuse the first entry
        let (idx, swz) = pool.intern(&bits(&[3.0, 0.0]));
        assert_eq!(idx, 0);
        assert_eq!(&swz.components()[..2], &[3, 0]);
    }

    #[test]
    fn test_partial_match_appends_lanes() {
        let mut pool = ImmediatePool::new();
        pool.intern(&bits(&[1.0, 2.0]));
        let (idx, swz) = pool.intern(&bits(&[2.0, 4.0]));
        assert_eq!(idx, 0);
        assert_eq!(&swz.components()[..2], &[1, 2]);
        assert_eq!(pool.entries()[0].as_f32()[..3], [1.0, 2.0, 4.0]);
    }

    #[test]
    fn test_failed_merge_leaves_entry_untouched() {
        let mut pool = ImmediatePool::new();
        pool.intern(&bits(&[1.0, 2.0, 3.0]));
        let (idx, _) = pool.intern(&bits(&[7.0, 8.0]));
        assert_eq!(idx, 1);
        assert_eq!(pool.entries()[0].ncomp, 3);
        assert_eq!(pool.entries()[1].ncomp, 2);
    }

    #[test]
    fn test_four_literals_fold_into_one_entry() {
        let mut pool = ImmediatePool::new();
        let (idx, swz) = pool.intern(&bits(&[0.5, 0.5, 0.5, 0.5]));
        assert_eq!(idx, 0);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.entries()[0].ncomp, 1);
        assert_eq!(swz.components(), [0, 0, 0, 0]);

        let mut pool = ImmediatePool::new();
        let (idx, swz) = pool.intern(&bits(&[1.0, 2.0, 3.0, 4.0]));
        assert_eq!(idx, 0);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.entries()[0].ncomp, 4);
        assert_eq!(swz.components(), [0, 1, 2, 3]);
        assert_eq!(pool.entries()[0].as_f32(), [1.0, 2.0, 3.0, 4.0]);
    }
}
