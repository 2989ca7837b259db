use std::fmt;

/// Canonical, orientation independent identifier of a cell facet.
///
/// Holds the three smallest vertex indices of the facet in ascending order. For
/// quadrilaterals of a non-degenerate mesh, three corners are enough to tell two facets
/// apart: two distinct quads sharing three corners would have to be folded onto each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FaceKey([usize; 3]);

impl FaceKey {
    /// Build the key of a facet from its corner vertices (3 or 4 of them)
    pub fn from_corners(corners: &[usize]) -> Self {
        match *corners {
            [a, b, c, d] => {
                let [v0, v1, v2, _] = sort4([a, b, c, d]);
                Self([v0, v1, v2])
            }
            [a, b, c] => {
                let mut v = [a, b, c];
                v.sort_unstable();
                Self(v)
            }
            _ => panic!(
                "Facets must have 3 or 4 corners (got {}); cannot build FaceKey!",
                corners.len()
            ),
        }
    }

    pub fn vertices(&self) -> [usize; 3] {
        self.0
    }
}

impl fmt::Display for FaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.0[0], self.0[1], self.0[2])
    }
}

/// Sort four values with a fixed 5-compare network
#[inline]
pub fn sort4(mut v: [usize; 4]) -> [usize; 4] {
    if v[0] > v[1] {
        v.swap(0, 1);
    }
    if v[2] > v[3] {
        v.swap(2, 3);
    }
    if v[0] > v[2] {
        v.swap(0, 2);
    }
    if v[1] > v[3] {
        v.swap(1, 3);
    }
    if v[1] > v[2] {
        v.swap(1, 2);
    }
    v
}

/// Canonical identifier of an unordered vertex pair: `min * num_vertices + max`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeKey(usize);

impl EdgeKey {
    pub fn new(v0: usize, v1: usize, num_vertices: usize) -> Self {
        let (lo, hi) = if v0 <= v1 { (v0, v1) } else { (v1, v0) };
        debug_assert!(hi < num_vertices);
        Self(lo * num_vertices + hi)
    }

    pub fn vertices(&self, num_vertices: usize) -> [usize; 2] {
        [self.0 / num_vertices, self.0 % num_vertices]
    }
}
