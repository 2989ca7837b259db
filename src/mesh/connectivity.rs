use super::cell_block::CellBlock;
use super::indexed_mapping::IndexedMapping;
use super::keys::{EdgeKey, FaceKey};
use super::topology::{CellTopology, ElementType, Hexahedron};
use super::NO_ID;
use crate::util::{has_duplicates, Timed};

#[cfg(feature = "json_export")]
use json::{object, JsonValue};
use rayon::prelude::*;
use smallvec::SmallVec;
use std::marker::PhantomData;
use thiserror::Error;

#[cfg(feature = "json_export")]
use std::fs::File;
#[cfg(feature = "json_export")]
use std::io::BufWriter;

/// Expected number of distinct faces around one edge. Sizes the stack buffers of the edge→face lookup.
pub const EXPECTED_FACES_PER_EDGE: usize = 8;

/// Reasons a set of cell blocks cannot be turned into a valid connectivity
#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("cell block '{block}' holds {num_values} vertex indices, which is not a multiple of {expected} vertices per cell")]
    InconsistentArity {
        block: String,
        expected: usize,
        num_values: usize,
    },
    #[error("cell {cell} of block '{block}' references vertex {vertex}, but the mesh only has {num_nodes} vertices")]
    VertexOutOfRange {
        block: String,
        cell: usize,
        vertex: usize,
        num_nodes: usize,
    },
    #[error("cell {cell} of block '{block}' uses the same vertex more than once: {vertices:?}")]
    DegenerateCell {
        block: String,
        cell: usize,
        vertices: Vec<usize>,
    },
    #[error("cells {cells:?} have facets with the key {key} but different corner vertices")]
    FaceCornerMismatch { key: FaceKey, cells: [usize; 2] },
    #[error("face {key} is shared by {count} cells ({cells:?}); a face belongs to at most 2 cells")]
    NonManifoldFace {
        key: FaceKey,
        count: usize,
        cells: Vec<usize>,
    },
    #[error("cell {cell} does not share a face with any other cell")]
    IsolatedCell { cell: usize },
    #[error("cell block '{block}' holds {found} cells, but this builder handles {expected} cells")]
    MixedElementTypes {
        block: String,
        found: ElementType,
        expected: ElementType,
    },
    #[error("the cell blocks do not contain any cells")]
    EmptyMesh,
}

/// Derives the face and edge entities of a cell mesh, along with all adjacency maps between
/// nodes, edges, faces, and elements.
///
/// Cells are numbered globally by concatenating the cell blocks in order. Every facet of every
/// cell is identified by `cell * T::NUM_FACETS + local_facet` (a "cell-facet"), and every edge
/// instance by `cell * T::NUM_EDGES + local_edge` (a "cell-edge").
///
/// Faces are found by sorting the [`FaceKey`] of each cell-facet; equal keys in the sorted list
/// are the two sides of an interior face, lone keys are boundary faces. Edges are found the same
/// way using [`EdgeKey`]s, except that any number of cells may share an edge.
///
/// Everything is computed once on construction. The cell blocks' element→face and element→edge
/// tables are filled in before `new` returns.
pub struct ConnectivityBuilder<T: CellTopology = Hexahedron> {
    cell_blocks: Vec<CellBlock>,
    num_nodes: usize,
    num_elements: usize,
    /// start of each block in the global cell numbering, followed by the total number of cells
    block_offsets: Vec<usize>,
    /// neighboring cell-facet of each cell-facet (NO_ID on the boundary)
    facet_neighbors: Vec<usize>,
    /// representative cell-facet of each unique face (the lower of the two cell-facets)
    unique_faces: Vec<usize>,
    facets_to_unique_face: Vec<usize>,
    /// sorted (key, cell-edge) records
    edge_records: Vec<(EdgeKey, usize)>,
    /// start of each unique edge's run in `edge_records`, followed by `edge_records.len()`
    edge_runs: Vec<usize>,
    cell_edges_to_unique_edge: Vec<usize>,
    _topology: PhantomData<T>,
}

impl ConnectivityBuilder<Hexahedron> {
    /// Build the connectivity of a mesh, selecting the cell topology from the blocks' element type
    pub fn new(cell_blocks: Vec<CellBlock>, num_nodes: usize) -> Result<Self, ConnectivityError> {
        match cell_blocks.first().map(|b| b.element_type()) {
            Some(ElementType::Hexahedron) => Self::with_topology(cell_blocks, num_nodes),
            None => Err(ConnectivityError::EmptyMesh),
        }
    }
}

impl<T: CellTopology> ConnectivityBuilder<T> {
    pub fn with_topology(
        cell_blocks: Vec<CellBlock>,
        num_nodes: usize,
    ) -> Result<Self, ConnectivityError> {
        let _t = Timed::new(log::Level::Info, "Connectivity construction");

        validate_cell_blocks::<T>(&cell_blocks, num_nodes)?;

        let mut block_offsets = Vec::with_capacity(cell_blocks.len() + 1);
        block_offsets.push(0);
        for block in cell_blocks.iter() {
            block_offsets.push(block_offsets[block_offsets.len() - 1] + block.num_elements());
        }
        let num_elements = block_offsets[cell_blocks.len()];

        let mut builder = Self {
            cell_blocks,
            num_nodes,
            num_elements,
            block_offsets,
            facet_neighbors: Vec::new(),
            unique_faces: Vec::new(),
            facets_to_unique_face: Vec::new(),
            edge_records: Vec::new(),
            edge_runs: Vec::new(),
            cell_edges_to_unique_edge: Vec::new(),
            _topology: PhantomData,
        };

        builder.compute_faces()?;
        builder.compute_edges();
        builder.fill_element_maps();

        log::info!(
            "Built connectivity of {} cells in {} blocks: {} faces ({} on the boundary), {} edges",
            builder.num_elements,
            builder.cell_blocks.len(),
            builder.num_faces(),
            builder.num_boundary_faces(),
            builder.num_edges(),
        );

        Ok(builder)
    }

    // ----------------------------------------------------------------------------------------------------
    // Construction
    // ----------------------------------------------------------------------------------------------------

    fn compute_faces(&mut self) -> Result<(), ConnectivityError> {
        let _t = Timed::new(log::Level::Debug, "Face extraction");

        let num_facets = self.num_elements * T::NUM_FACETS;
        let mut records: Vec<(FaceKey, usize)> = Vec::with_capacity(num_facets);
        for (block, &offset) in self.cell_blocks.iter().zip(self.block_offsets.iter()) {
            records.par_extend((0..block.num_elements()).into_par_iter().flat_map_iter(
                move |local| {
                    let cell = offset + local;
                    (0..T::NUM_FACETS).map(move |facet| {
                        let corners = facet_corners::<T>(block, local, facet);
                        (FaceKey::from_corners(&corners), T::NUM_FACETS * cell + facet)
                    })
                },
            ));
        }

        records.par_sort_unstable();

        let mut facet_neighbors = vec![NO_ID; num_facets];
        let mut unique_faces = Vec::with_capacity(num_facets / 2 + 1);

        let mut start = 0;
        while start < records.len() {
            let (key, facet_id) = records[start];
            let mut end = start + 1;
            while end < records.len() && records[end].0 == key {
                end += 1;
            }

            match end - start {
                1 => {}
                2 => {
                    let other_id = records[start + 1].1;
                    if self.sorted_facet_corners(facet_id) != self.sorted_facet_corners(other_id) {
                        return Err(ConnectivityError::FaceCornerMismatch {
                            key,
                            cells: [facet_id / T::NUM_FACETS, other_id / T::NUM_FACETS],
                        });
                    }
                    facet_neighbors[facet_id] = other_id;
                    facet_neighbors[other_id] = facet_id;
                }
                count => {
                    return Err(ConnectivityError::NonManifoldFace {
                        key,
                        count,
                        cells: records[start..end]
                            .iter()
                            .map(|(_, id)| id / T::NUM_FACETS)
                            .collect(),
                    })
                }
            }

            unique_faces.push(facet_id);
            start = end;
        }

        // checked per cell: a mesh made of several face-connected components is accepted
        if self.num_elements > 1 {
            if let Some(cell) = (0..self.num_elements).into_par_iter().find_first(|cell| {
                (0..T::NUM_FACETS).all(|f| facet_neighbors[cell * T::NUM_FACETS + f] == NO_ID)
            }) {
                return Err(ConnectivityError::IsolatedCell { cell });
            }
        }

        let mut facets_to_unique_face = vec![NO_ID; num_facets];
        for (face, &facet_id) in unique_faces.iter().enumerate() {
            facets_to_unique_face[facet_id] = face;
            if facet_neighbors[facet_id] != NO_ID {
                facets_to_unique_face[facet_neighbors[facet_id]] = face;
            }
        }

        log::debug!(
            "Found {} unique faces among {} cell facets",
            unique_faces.len(),
            num_facets
        );

        self.facet_neighbors = facet_neighbors;
        self.unique_faces = unique_faces;
        self.facets_to_unique_face = facets_to_unique_face;

        Ok(())
    }

    fn compute_edges(&mut self) {
        let _t = Timed::new(log::Level::Debug, "Edge extraction");

        let num_nodes = self.num_nodes;
        let mut records: Vec<(EdgeKey, usize)> =
            Vec::with_capacity(self.num_elements * T::NUM_EDGES);
        for (block, &offset) in self.cell_blocks.iter().zip(self.block_offsets.iter()) {
            records.par_extend((0..block.num_elements()).into_par_iter().flat_map_iter(
                move |local| {
                    let cell = offset + local;
                    (0..T::NUM_EDGES).map(move |edge| {
                        let [v0, v1] = T::edge_vertices(edge);
                        (
                            EdgeKey::new(
                                block.element_node(local, v0),
                                block.element_node(local, v1),
                                num_nodes,
                            ),
                            T::NUM_EDGES * cell + edge,
                        )
                    })
                },
            ));
        }

        records.par_sort_unstable();

        let mut edge_runs: Vec<usize> = (0..records.len())
            .into_par_iter()
            .filter(|&i| i == 0 || records[i].0 != records[i - 1].0)
            .collect();
        edge_runs.push(records.len());

        let mut cell_edges_to_unique_edge = vec![NO_ID; records.len()];
        for (edge, run) in edge_runs.windows(2).enumerate() {
            for (_, cell_edge) in records[run[0]..run[1]].iter() {
                cell_edges_to_unique_edge[*cell_edge] = edge;
            }
        }

        log::debug!(
            "Found {} unique edges among {} cell edges",
            edge_runs.len() - 1,
            records.len()
        );

        self.edge_records = records;
        self.edge_runs = edge_runs;
        self.cell_edges_to_unique_edge = cell_edges_to_unique_edge;
    }

    /// Fill each cell block's element→face and element→edge tables
    fn fill_element_maps(&mut self) {
        let _t = Timed::new(log::Level::Debug, "Element map backfill");

        let facets_to_unique_face = &self.facets_to_unique_face;
        let cell_edges_to_unique_edge = &self.cell_edges_to_unique_edge;

        self.cell_blocks
            .par_iter_mut()
            .zip(self.block_offsets.par_iter())
            .for_each(|(block, &offset)| {
                block.resize_connectivity(T::NUM_FACETS, T::NUM_EDGES);
                for local in 0..block.num_elements() {
                    let cell = offset + local;
                    for facet in 0..T::NUM_FACETS {
                        block.set_element_face(
                            local,
                            facet,
                            facets_to_unique_face[cell * T::NUM_FACETS + facet],
                        );
                    }
                    for edge in 0..T::NUM_EDGES {
                        block.set_element_edge(
                            local,
                            edge,
                            cell_edges_to_unique_edge[cell * T::NUM_EDGES + edge],
                        );
                    }
                }
            });
    }

    fn sorted_facet_corners(&self, facet_id: usize) -> SmallVec<[usize; 4]> {
        let (block, local) = self.block_cell_from_global(facet_id / T::NUM_FACETS);
        let mut corners =
            facet_corners::<T>(&self.cell_blocks[block], local, facet_id % T::NUM_FACETS);
        corners.sort_unstable();
        corners
    }

    // ----------------------------------------------------------------------------------------------------
    // General Data Retrieval
    // ----------------------------------------------------------------------------------------------------

    pub fn cell_blocks(&self) -> &[CellBlock] {
        &self.cell_blocks
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    pub fn num_faces(&self) -> usize {
        self.unique_faces.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edge_runs.len() - 1
    }

    pub fn num_boundary_faces(&self) -> usize {
        self.unique_faces
            .iter()
            .filter(|&&facet_id| self.facet_neighbors[facet_id] == NO_ID)
            .count()
    }

    pub fn num_interior_faces(&self) -> usize {
        self.num_faces() - self.num_boundary_faces()
    }

    pub fn is_boundary_face(&self, face: usize) -> bool {
        self.facet_neighbors[self.unique_faces[face]] == NO_ID
    }

    /// Start of each cell block in the global cell numbering (one trailing entry holds the total)
    pub fn block_offsets(&self) -> &[usize] {
        &self.block_offsets
    }

    /// Map a global cell index to `(block index, cell index within the block)`
    pub fn block_cell_from_global(&self, cell: usize) -> (usize, usize) {
        assert!(
            cell < self.num_elements,
            "Cell {} is out of range; cannot locate its cell block!",
            cell
        );
        let block = self.block_offsets.partition_point(|&start| start <= cell) - 1;
        (block, cell - self.block_offsets[block])
    }

    /// The unique face each cell-facet maps to
    pub fn all_facets_to_unique_face(&self) -> &[usize] {
        &self.facets_to_unique_face
    }

    /// Number of cells sharing an edge
    pub fn edge_multiplicity(&self, edge: usize) -> usize {
        self.edge_runs[edge + 1] - self.edge_runs[edge]
    }

    /// The cell on the far side of a face, seen from its first cell
    pub fn face_neighbor(&self, face: usize) -> Option<usize> {
        match self.facet_neighbors[self.unique_faces[face]] {
            NO_ID => None,
            facet_id => Some(facet_id / T::NUM_FACETS),
        }
    }

    // ----------------------------------------------------------------------------------------------------
    // Adjacency Maps
    // ----------------------------------------------------------------------------------------------------

    /// The two (sorted) vertices of each edge
    pub fn edges_to_nodes(&self) -> Vec<[usize; 2]> {
        self.edge_runs[..self.num_edges()]
            .par_iter()
            .map(|&start| self.edge_records[start].0.vertices(self.num_nodes))
            .collect()
    }

    /// Sorted set of edges touching each node
    pub fn nodes_to_edges(&self) -> IndexedMapping {
        let edges_to_nodes = self.edges_to_nodes();

        let mut counts = vec![0; self.num_nodes];
        for [v0, v1] in edges_to_nodes.iter() {
            counts[*v0] += 1;
            counts[*v1] += 1;
        }

        let mut filler = IndexedMapping::from_counts(&counts);
        for (edge, [v0, v1]) in edges_to_nodes.iter().enumerate() {
            filler.push(*v0, edge);
            filler.push(*v1, edge);
        }
        filler.finish()
    }

    /// Global indices of the cells touching each node
    pub fn nodes_to_elements(&self) -> IndexedMapping {
        let mut counts = vec![0; self.num_nodes];
        for block in self.cell_blocks.iter() {
            for local in 0..block.num_elements() {
                for &node in block.element_nodes(local) {
                    counts[node] += 1;
                }
            }
        }

        let mut filler = IndexedMapping::from_counts(&counts);
        for (block, offset) in self.cell_blocks.iter().zip(self.block_offsets.iter()) {
            for local in 0..block.num_elements() {
                for &node in block.element_nodes(local) {
                    filler.push(node, offset + local);
                }
            }
        }
        filler.finish()
    }

    /// Vertices of each face, ordered around the face as seen from its first cell
    pub fn faces_to_nodes(&self) -> IndexedMapping {
        let counts = vec![T::VERTICES_PER_FACET; self.num_faces()];
        IndexedMapping::par_from_fn(&counts, |face, bin| {
            let facet_id = self.unique_faces[face];
            let (block, local) = self.block_cell_from_global(facet_id / T::NUM_FACETS);
            let corners =
                facet_corners::<T>(&self.cell_blocks[block], local, facet_id % T::NUM_FACETS);
            bin.copy_from_slice(&corners);
        })
    }

    /// Sorted set of faces touching each node
    pub fn nodes_to_faces(&self) -> IndexedMapping {
        let faces_to_nodes = self.faces_to_nodes();

        let mut counts = vec![0; self.num_nodes];
        for face_nodes in faces_to_nodes.iter() {
            for &node in face_nodes {
                counts[node] += 1;
            }
        }

        let mut filler = IndexedMapping::from_counts(&counts);
        for (face, face_nodes) in faces_to_nodes.iter().enumerate() {
            for &node in face_nodes {
                filler.push(node, face);
            }
        }
        filler.finish()
    }

    /// The two cells on either side of each face; the second slot is NO_ID on the boundary
    pub fn faces_to_elements(&self) -> Vec<[usize; 2]> {
        self.unique_faces
            .par_iter()
            .map(|&facet_id| {
                let neighbor = self.facet_neighbors[facet_id];
                [
                    facet_id / T::NUM_FACETS,
                    if neighbor == NO_ID {
                        NO_ID
                    } else {
                        neighbor / T::NUM_FACETS
                    },
                ]
            })
            .collect()
    }

    /// Sorted set of faces touching each edge
    pub fn edges_to_faces(&self) -> IndexedMapping {
        let counts: Vec<usize> = (0..self.num_edges())
            .into_par_iter()
            .map(|edge| self.faces_around_edge(edge).len())
            .collect();

        IndexedMapping::par_from_fn(&counts, |edge, bin| {
            bin.copy_from_slice(&self.faces_around_edge(edge))
        })
    }

    /// Edges bounding each face, in increasing order
    pub fn faces_to_edges(&self) -> IndexedMapping {
        let edges_to_faces = self.edges_to_faces();

        let mut filler =
            IndexedMapping::from_counts(&vec![T::EDGES_PER_FACET; self.num_faces()]);
        for (edge, faces) in edges_to_faces.iter().enumerate() {
            for &face in faces {
                filler.push(face, edge);
            }
        }
        filler.finish()
    }

    fn faces_around_edge(&self, edge: usize) -> SmallVec<[usize; EXPECTED_FACES_PER_EDGE]> {
        let mut faces: SmallVec<[usize; EXPECTED_FACES_PER_EDGE]> = self.edge_records
            [self.edge_runs[edge]..self.edge_runs[edge + 1]]
            .iter()
            .flat_map(|(_, cell_edge)| {
                let cell = cell_edge / T::NUM_EDGES;
                T::edge_facets(cell_edge % T::NUM_EDGES)
                    .map(|facet| self.facets_to_unique_face[cell * T::NUM_FACETS + facet])
            })
            .collect();
        faces.sort_unstable();
        faces.dedup();
        faces
    }

    /// Dump the intermediate face and edge records at debug level
    pub fn log_debug_information(&self) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }

        for (face, &facet_id) in self.unique_faces.iter().enumerate() {
            log::debug!(
                "face {}: cell {} facet {} | neighbor {:?}",
                face,
                facet_id / T::NUM_FACETS,
                facet_id % T::NUM_FACETS,
                self.face_neighbor(face)
            );
        }
        for (edge, run) in self.edge_runs.windows(2).enumerate() {
            log::debug!(
                "edge {}: nodes {:?} | cell-edges {:?}",
                edge,
                self.edge_records[run[0]].0.vertices(self.num_nodes),
                self.edge_records[run[0]..run[1]]
                    .iter()
                    .map(|(_, id)| *id)
                    .collect::<Vec<_>>()
            );
        }
    }

    /// Print the connectivity to a JSON file specified by path.
    #[cfg(feature = "json_export")]
    pub fn export_to_json(&self, path: impl AsRef<str>) -> std::io::Result<()> {
        let f = File::create(path.as_ref())?;
        let mut w = BufWriter::new(&f);

        let no_id_to_null = |id: usize| {
            if id == NO_ID {
                JsonValue::Null
            } else {
                JsonValue::from(id)
            }
        };

        let connectivity_object = object! {
            "CellBlocks": JsonValue::from(self.cell_blocks.iter().map(|block| block.to_json()).collect::<Vec<_>>()),
            "FacesToNodes": self.faces_to_nodes().to_json(),
            "FacesToEdges": self.faces_to_edges().to_json(),
            "FacesToElements": JsonValue::from(
                self.faces_to_elements()
                    .iter()
                    .map(|[e0, e1]| JsonValue::from(vec![no_id_to_null(*e0), no_id_to_null(*e1)]))
                    .collect::<Vec<_>>()
            ),
            "EdgesToNodes": JsonValue::from(
                self.edges_to_nodes().iter().map(|nodes| JsonValue::from(nodes.to_vec())).collect::<Vec<_>>()
            ),
            "EdgesToFaces": self.edges_to_faces().to_json(),
            "NodesToEdges": self.nodes_to_edges().to_json(),
            "NodesToFaces": self.nodes_to_faces().to_json(),
            "NodesToElements": self.nodes_to_elements().to_json(),
        };

        connectivity_object.write_pretty(&mut w, 4)?;

        Ok(())
    }
}

fn facet_corners<T: CellTopology>(
    block: &CellBlock,
    local: usize,
    facet: usize,
) -> SmallVec<[usize; 4]> {
    T::facet_vertices(facet)
        .iter()
        .map(|&v| block.element_node(local, v))
        .collect()
}

fn validate_cell_blocks<T: CellTopology>(
    cell_blocks: &[CellBlock],
    num_nodes: usize,
) -> Result<(), ConnectivityError> {
    if cell_blocks.iter().all(|block| block.num_elements() == 0) {
        return Err(ConnectivityError::EmptyMesh);
    }

    for block in cell_blocks.iter() {
        if block.element_type() != T::ELEMENT_TYPE {
            return Err(ConnectivityError::MixedElementTypes {
                block: block.name.clone(),
                found: block.element_type(),
                expected: T::ELEMENT_TYPE,
            });
        }

        if let Some(err) = (0..block.num_elements())
            .into_par_iter()
            .find_map_first(|cell| {
                let vertices = block.element_nodes(cell);
                if let Some(&vertex) = vertices.iter().find(|&&v| v >= num_nodes) {
                    Some(ConnectivityError::VertexOutOfRange {
                        block: block.name.clone(),
                        cell,
                        vertex,
                        num_nodes,
                    })
                } else if has_duplicates(vertices) {
                    Some(ConnectivityError::DegenerateCell {
                        block: block.name.clone(),
                        cell,
                        vertices: vertices.to_vec(),
                    })
                } else {
                    None
                }
            })
        {
            return Err(err);
        }
    }

    Ok(())
}
