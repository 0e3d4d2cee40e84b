//! Relative swizzles.
//!
//! The ALU source swizzle field stores, for each output position `i`, the
//! component to read as `(component - i) & 3` in two bits. The all-zero value is
//! therefore the identity, and positions never set explicitly read "their own"
//! component. The compiler keeps swizzles in this encoding throughout.

use std::fmt;

const COMPONENT_NAMES: [char; 4] = ['x', 'y', 'z', 'w'];

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Swizzle(u8);

impl Swizzle {
    pub const IDENTITY: Swizzle = Swizzle(0);
    pub const X: Swizzle = Swizzle::splat(0);
    pub const Y: Swizzle = Swizzle::splat(1);
    pub const Z: Swizzle = Swizzle::splat(2);
    pub const W: Swizzle = Swizzle::splat(3);

    pub const fn from_raw(bits: u8) -> Self {
        Swizzle(bits)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Swizzle reading `comps[i]` at position `i`.
    pub const fn from_components(comps: [u8; 4]) -> Self {
        let mut bits = 0u8;
        let mut i = 0;
        while i < 4 {
            bits |= (comps[i].wrapping_sub(i as u8) & 3) << (2 * i);
            i += 1;
        }
        Swizzle(bits)
    }

    /// Every position reads component `comp`.
    pub const fn splat(comp: u8) -> Self {
        Self::from_components([comp, comp, comp, comp])
    }

    /// Component read at position `i`.
    pub const fn get(self, i: usize) -> u8 {
        ((self.0 >> (2 * i)) + i as u8) & 3
    }

    /// Replace the component read at position `i`.
    pub fn set(&mut self, i: usize, comp: u8) {
        let shift = 2 * i;
        self.0 = (self.0 & !(3 << shift)) | ((comp.wrapping_sub(i as u8) & 3) << shift);
    }

    pub fn with(mut self, i: usize, comp: u8) -> Self {
        self.set(i, comp);
        self
    }

    pub fn components(self) -> [u8; 4] {
        [self.get(0), self.get(1), self.get(2), self.get(3)]
    }

    /// Apply `sel` on top of `self`: position `i` reads `self[sel[i]]`.
    pub fn select(self, sel: Swizzle) -> Swizzle {
        let mut out = Swizzle::IDENTITY;
        for i in 0..4 {
            out.set(i, self.get(sel.get(i) as usize));
        }
        out
    }

    /// Absolute two-bit-per-position encoding used by fetch sources.
    pub fn to_absolute(self, ncomp: usize) -> u8 {
        (0..ncomp).fold(0, |acc, i| acc | (self.get(i) << (2 * i)))
    }

    /// Text form over the first `ncomp` positions.
    pub fn display(self, ncomp: usize) -> String {
        (0..ncomp.min(4))
            .map(|i| COMPONENT_NAMES[self.get(i) as usize])
            .collect()
    }
}

impl fmt::Debug for Swizzle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Swizzle({})", self.display(4))
    }
}

impl fmt::Display for Swizzle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display(4))
    }
}

/// Parse a swizzle such as `xy` or `zwzw`, padding with the last component.
pub fn parse_components(text: &str) -> Option<[u8; 4]> {
    if text.is_empty() || text.len() > 4 {
        return None;
    }
    let mut comps = [0u8; 4];
    let mut last = 0;
    for (i, c) in text.chars().enumerate() {
        last = match c {
            'x' | 'r' => 0,
            'y' | 'g' => 1,
            'z' | 'b' => 2,
            'w' | 'a' => 3,
            _ => return None,
        };
        comps[i] = last;
    }
    for comp in comps.iter_mut().skip(text.len()) {
        *comp = last;
    }
    Some(comps)
}
