/// Groups of cells of one element type
pub mod cell_block;
/// Unique faces and edges, and every adjacency map derived from them
pub mod connectivity;
/// Face and cell centroids, areas, and normals
pub mod geometry;
/// Compressed array-of-arrays adjacency storage
pub mod indexed_mapping;
/// Canonical keys identifying shared facets and edges
pub mod keys;
/// Reference cell incidence tables
pub mod topology;

pub use cell_block::CellBlock;
pub use connectivity::{ConnectivityBuilder, ConnectivityError};
pub use indexed_mapping::IndexedMapping;
pub use keys::{EdgeKey, FaceKey};
pub use topology::{CellTopology, ElementType, Hexahedron};

use nalgebra::Point3;
use std::fs::read_to_string;
use thiserror::Error;

use json::JsonValue;

/// Sentinel for a missing entity (for example the second cell of a boundary face)
pub const NO_ID: usize = usize::MAX;

#[derive(Debug, Error)]
pub enum MeshFileError {
    #[error("unable to read mesh file: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse mesh file as JSON: {0}")]
    Json(#[from] json::Error),
    #[error("malformed mesh file: {0}")]
    Format(String),
    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),
}

/// Vertex coordinates and cell blocks of a hexahedral mesh, prior to connectivity construction
#[derive(Debug, Clone)]
pub struct HexMesh {
    pub nodes: Vec<Point3<f64>>,
    pub cell_blocks: Vec<CellBlock>,
}

impl HexMesh {
    /// Construct a mesh from a JSON file with the following format
    ///
    /// Two unit cubes stacked along z, sharing vertices 4 through 7:
    /// ```text
    ///        10 *-----------* 11
    ///          /|          /|
    ///       8 *-----------* 9
    ///         | |  upper  | |
    ///       6 *-|---------|-* 7
    ///         |/          |/
    ///       4 *-----------* 5
    ///         |  lower    |
    ///       0 *-----------* 1     (2 and 3 behind 0 and 1)
    /// ```
    ///
    /// mesh.json
    /// ```JSON
    /// {
    ///     "Nodes": [
    ///         [0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0],
    ///         [0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [0.0, 1.0, 1.0], [1.0, 1.0, 1.0],
    ///         [0.0, 0.0, 2.0], [1.0, 0.0, 2.0], [0.0, 1.0, 2.0], [1.0, 1.0, 2.0]
    ///     ],
    ///     "CellBlocks": [
    ///         {
    ///             "name": "lower",
    ///             "element_type": "hexahedron",
    ///             "node_ids": [[0, 1, 2, 3, 4, 5, 6, 7]]
    ///         },
    ///         {
    ///             "name": "upper",
    ///             "element_type": "hexahedron",
    ///             "node_ids": [[4, 5, 6, 7, 8, 9, 10, 11]]
    ///         }
    ///     ]
    /// }
    /// ```
    pub fn from_file(path: impl AsRef<str>) -> Result<Self, MeshFileError> {
        let mesh_file_contents = read_to_string(path.as_ref())?;
        let mesh_file_json = json::parse(&mesh_file_contents)?;

        let nodes = parse_node_information(&mesh_file_json)?;
        let cell_blocks = parse_cell_block_information(&mesh_file_json)?;

        log::debug!(
            "Read mesh '{}': {} nodes, {} cell blocks",
            path.as_ref(),
            nodes.len(),
            cell_blocks.len()
        );

        Ok(Self { nodes, cell_blocks })
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Build the connectivity, handing the vertex coordinates back alongside it
    pub fn into_connectivity(
        self,
    ) -> Result<(Vec<Point3<f64>>, ConnectivityBuilder), ConnectivityError> {
        let num_nodes = self.nodes.len();
        let connectivity = ConnectivityBuilder::new(self.cell_blocks, num_nodes)?;
        Ok((self.nodes, connectivity))
    }
}

fn parse_node_information(mesh_file_json: &JsonValue) -> Result<Vec<Point3<f64>>, MeshFileError> {
    if !mesh_file_json["Nodes"].is_array() {
        return Err(MeshFileError::Format("Nodes must be an Array".into()));
    }

    mesh_file_json["Nodes"]
        .members()
        .enumerate()
        .map(|(node_id, json_node)| {
            if !json_node.is_array() || json_node.members().count() != 3 {
                return Err(MeshFileError::Format(format!(
                    "node {} must be an Array of 3 coordinates",
                    node_id
                )));
            }

            let mut coords = [0.0; 3];
            for (c, json_coord) in coords.iter_mut().zip(json_node.members()) {
                *c = json_coord.as_f64().ok_or_else(|| {
                    MeshFileError::Format(format!("node {} has a non-numerical coordinate", node_id))
                })?;
            }

            Ok(Point3::new(coords[0], coords[1], coords[2]))
        })
        .collect()
}

fn parse_cell_block_information(mesh_file_json: &JsonValue) -> Result<Vec<CellBlock>, MeshFileError> {
    if !mesh_file_json["CellBlocks"].is_array() {
        return Err(MeshFileError::Format("CellBlocks must be an Array".into()));
    }

    mesh_file_json["CellBlocks"]
        .members()
        .enumerate()
        .map(|(block_id, json_block)| {
            let name = json_block["name"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("cellBlock{}", block_id));

            let element_type = json_block["element_type"]
                .as_str()
                .and_then(ElementType::from_name)
                .ok_or_else(|| {
                    MeshFileError::Format(format!(
                        "cell block '{}' has a missing or unsupported element_type",
                        name
                    ))
                })?;

            if !json_block["node_ids"].is_array() {
                return Err(MeshFileError::Format(format!(
                    "cell block '{}' must have an Array of node_ids",
                    name
                )));
            }

            let mut element_to_nodes = Vec::new();
            for (cell, json_cell) in json_block["node_ids"].members().enumerate() {
                if json_cell.members().count() != element_type.num_vertices() {
                    return Err(MeshFileError::Connectivity(
                        ConnectivityError::InconsistentArity {
                            block: name,
                            expected: element_type.num_vertices(),
                            num_values: json_cell.members().count(),
                        },
                    ));
                }
                for json_id in json_cell.members() {
                    element_to_nodes.push(json_id.as_usize().ok_or_else(|| {
                        MeshFileError::Format(format!(
                            "cell {} of block '{}' has a node_id that is not a positive integer",
                            cell, name
                        ))
                    })?);
                }
            }

            Ok(CellBlock::new(name, element_type, element_to_nodes)?)
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Structured block of `nx * ny * nz` unit hexahedra; node (i, j, k) is `i + (nx + 1) * (j + (ny + 1) * k)`
    pub(crate) fn cartesian_block(name: &str, [nx, ny, nz]: [usize; 3]) -> CellBlock {
        let node = |i: usize, j: usize, k: usize| i + (nx + 1) * (j + (ny + 1) * k);

        let mut rows = Vec::with_capacity(nx * ny * nz);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    rows.push([
                        node(i, j, k),
                        node(i + 1, j, k),
                        node(i, j + 1, k),
                        node(i + 1, j + 1, k),
                        node(i, j, k + 1),
                        node(i + 1, j, k + 1),
                        node(i, j + 1, k + 1),
                        node(i + 1, j + 1, k + 1),
                    ]);
                }
            }
        }

        CellBlock::hexahedra(name, &rows)
    }

    /// Vertex coordinates matching [`cartesian_block`] for cells of size `h`
    pub(crate) fn cartesian_nodes([nx, ny, nz]: [usize; 3], h: [f64; 3]) -> Vec<Point3<f64>> {
        let mut nodes = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    nodes.push(Point3::new(
                        i as f64 * h[0],
                        j as f64 * h[1],
                        k as f64 * h[2],
                    ));
                }
            }
        }
        nodes
    }

    #[test]
    fn mesh_from_file() {
        let mesh = HexMesh::from_file("./test_input/two_hex_mesh.json").unwrap();

        assert_eq!(mesh.num_nodes(), 12);
        assert_eq!(mesh.cell_blocks.len(), 2);
        assert_eq!(mesh.cell_blocks[1].name, "upper");
        assert!((mesh.nodes[11].z - 2.0).abs() < 1e-14);

        let (_, conn) = mesh.into_connectivity().unwrap();
        assert_eq!(conn.num_faces(), 11);
        assert_eq!(conn.num_interior_faces(), 1);
        assert_eq!(conn.face_neighbor(conn.cell_blocks()[0].element_faces(0)[1]), Some(1));
    }

    #[test]
    fn bad_mesh_files() {
        assert!(matches!(
            HexMesh::from_file("./test_input/bad_arity_mesh.json"),
            Err(MeshFileError::Connectivity(ConnectivityError::InconsistentArity { .. }))
        ));
        assert!(matches!(
            HexMesh::from_file("./test_input/does_not_exist.json"),
            Err(MeshFileError::Io(_))
        ));
    }

    #[test]
    fn cartesian_helpers_agree() {
        let block = cartesian_block("grid", [2, 3, 4]);
        let nodes = cartesian_nodes([2, 3, 4], [1.0, 1.0, 1.0]);
        assert_eq!(block.num_elements(), 24);
        assert_eq!(nodes.len(), 60);

        let last = block.element_nodes(23);
        assert_eq!(nodes[last[0]], Point3::new(1.0, 2.0, 3.0));
        assert_eq!(nodes[last[7]], Point3::new(2.0, 3.0, 4.0));
    }
}
