use std::fmt;

/// Static incidence tables of a reference cell shape.
///
/// The connectivity builder is generic over this trait so that the per-cell loops are
/// monomorphized for each supported shape instead of dispatching through a vtable.
pub trait CellTopology: Send + Sync + 'static {
    /// Element tag carried by the [`CellBlock`](super::cell_block::CellBlock)s of this shape
    const ELEMENT_TYPE: ElementType;
    /// Number of vertices per cell
    const NUM_VERTICES: usize;
    /// Number of facets (faces) per cell
    const NUM_FACETS: usize;
    /// Number of edges per cell
    const NUM_EDGES: usize;
    /// Number of vertices on each facet
    const VERTICES_PER_FACET: usize;
    /// Number of edges bounding each facet
    const EDGES_PER_FACET: usize;

    /// Local vertex indices of a facet, ordered around its boundary
    fn facet_vertices(facet: usize) -> &'static [usize];

    /// Local vertex indices of an edge
    fn edge_vertices(edge: usize) -> [usize; 2];

    /// Local facet indices of the two facets sharing an edge
    fn edge_facets(edge: usize) -> [usize; 2];
}

/// Cell shapes known to the mesh layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementType {
    Hexahedron,
}

impl ElementType {
    pub fn num_vertices(&self) -> usize {
        match self {
            Self::Hexahedron => Hexahedron::NUM_VERTICES,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "hexahedron" | "hex" | "c3d8" => Some(Self::Hexahedron),
            _ => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hexahedron => write!(f, "hexahedron"),
        }
    }
}

/// Vertices of each hexahedral facet
///
/// Local vertex numbering of the reference hexahedron:
/// ```text
///        6 *-----------* 7
///         /|          /|
///        / |         / |
///     4 *-----------* 5|
///       |  |        |  |
///       |2 *--------|--* 3
///       | /         | /
///       |/          |/
///     0 *-----------* 1
/// ```
/// Facets: 0 (-z), 1 (+z), 2 (-y), 3 (+x), 4 (+y), 5 (-x)
pub const HEX_FACET_VERTICES: [[usize; 4]; 6] = [
    [0, 1, 3, 2],
    [4, 5, 7, 6],
    [0, 1, 5, 4],
    [1, 3, 7, 5],
    [2, 3, 7, 6],
    [0, 2, 6, 4],
];

/// Vertices of each hexahedral edge
pub const HEX_EDGE_VERTICES: [[usize; 2]; 12] = [
    [0, 1],
    [0, 2],
    [0, 4],
    [1, 3],
    [1, 5],
    [2, 3],
    [2, 6],
    [3, 7],
    [4, 5],
    [4, 6],
    [5, 7],
    [6, 7],
];

/// The two facets adjacent to each hexahedral edge
pub const HEX_EDGE_FACETS: [[usize; 2]; 12] = [
    [0, 2],
    [0, 5],
    [2, 5],
    [0, 3],
    [2, 3],
    [0, 4],
    [5, 4],
    [3, 4],
    [2, 1],
    [1, 5],
    [1, 3],
    [1, 4],
];

/// 8-node hexahedron
#[derive(Clone, Copy, Debug)]
pub struct Hexahedron;

impl CellTopology for Hexahedron {
    const ELEMENT_TYPE: ElementType = ElementType::Hexahedron;
    const NUM_VERTICES: usize = 8;
    const NUM_FACETS: usize = 6;
    const NUM_EDGES: usize = 12;
    const VERTICES_PER_FACET: usize = 4;
    const EDGES_PER_FACET: usize = 4;

    fn facet_vertices(facet: usize) -> &'static [usize] {
        &HEX_FACET_VERTICES[facet]
    }

    fn edge_vertices(edge: usize) -> [usize; 2] {
        HEX_EDGE_VERTICES[edge]
    }

    fn edge_facets(edge: usize) -> [usize; 2] {
        HEX_EDGE_FACETS[edge]
    }
}
