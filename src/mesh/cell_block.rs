use super::connectivity::ConnectivityError;
use super::topology::ElementType;
use super::NO_ID;

#[cfg(feature = "json_export")]
use json::{object, JsonValue};

/// A homogeneous group of cells sharing one element type.
///
/// Owns the cell→vertex table, and (once a [`ConnectivityBuilder`](super::ConnectivityBuilder)
/// has run) the cell→face and cell→edge tables. All tables are dense row-major arrays with a
/// fixed number of entries per cell.
#[derive(Debug, Clone)]
pub struct CellBlock {
    pub name: String,
    element_type: ElementType,
    nodes_per_element: usize,
    element_to_nodes: Vec<usize>,
    faces_per_element: usize,
    element_to_faces: Vec<usize>,
    edges_per_element: usize,
    element_to_edges: Vec<usize>,
}

impl CellBlock {
    /// Construct a block from a flat row-major cell→vertex table
    pub fn new(
        name: impl Into<String>,
        element_type: ElementType,
        element_to_nodes: Vec<usize>,
    ) -> Result<Self, ConnectivityError> {
        let name = name.into();
        let nodes_per_element = element_type.num_vertices();

        if element_to_nodes.len() % nodes_per_element != 0 {
            return Err(ConnectivityError::InconsistentArity {
                block: name,
                expected: nodes_per_element,
                num_values: element_to_nodes.len(),
            });
        }

        Ok(Self {
            name,
            element_type,
            nodes_per_element,
            element_to_nodes,
            faces_per_element: 0,
            element_to_faces: Vec::new(),
            edges_per_element: 0,
            element_to_edges: Vec::new(),
        })
    }

    /// Construct a hexahedral block from one row of 8 vertices per cell
    pub fn hexahedra(name: impl Into<String>, rows: &[[usize; 8]]) -> Self {
        Self {
            name: name.into(),
            element_type: ElementType::Hexahedron,
            nodes_per_element: 8,
            element_to_nodes: rows.iter().flatten().copied().collect(),
            faces_per_element: 0,
            element_to_faces: Vec::new(),
            edges_per_element: 0,
            element_to_edges: Vec::new(),
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn num_elements(&self) -> usize {
        self.element_to_nodes.len() / self.nodes_per_element
    }

    pub fn num_nodes_per_element(&self) -> usize {
        self.nodes_per_element
    }

    pub fn element_nodes(&self, element: usize) -> &[usize] {
        let start = element * self.nodes_per_element;
        &self.element_to_nodes[start..start + self.nodes_per_element]
    }

    pub fn element_node(&self, element: usize, local_node: usize) -> usize {
        self.element_to_nodes[element * self.nodes_per_element + local_node]
    }

    /// Unique faces of an element, in local facet order (empty before connectivity is built)
    pub fn element_faces(&self, element: usize) -> &[usize] {
        let start = element * self.faces_per_element;
        &self.element_to_faces[start..start + self.faces_per_element]
    }

    /// Unique edges of an element, in local edge order (empty before connectivity is built)
    pub fn element_edges(&self, element: usize) -> &[usize] {
        let start = element * self.edges_per_element;
        &self.element_to_edges[start..start + self.edges_per_element]
    }

    pub(crate) fn resize_connectivity(&mut self, faces_per_element: usize, edges_per_element: usize) {
        let n = self.num_elements();
        self.faces_per_element = faces_per_element;
        self.element_to_faces = vec![NO_ID; n * faces_per_element];
        self.edges_per_element = edges_per_element;
        self.element_to_edges = vec![NO_ID; n * edges_per_element];
    }

    pub(crate) fn set_element_face(&mut self, element: usize, local_face: usize, face: usize) {
        assert!(
            local_face < self.faces_per_element,
            "Local face index out of range; cannot set element face!"
        );
        self.element_to_faces[element * self.faces_per_element + local_face] = face;
    }

    pub(crate) fn set_element_edge(&mut self, element: usize, local_edge: usize, edge: usize) {
        assert!(
            local_edge < self.edges_per_element,
            "Local edge index out of range; cannot set element edge!"
        );
        self.element_to_edges[element * self.edges_per_element + local_edge] = edge;
    }

    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        let rows = |table: &[usize], arity: usize| {
            JsonValue::from(
                table
                    .chunks(arity.max(1))
                    .map(|row| JsonValue::from(row.to_vec()))
                    .collect::<Vec<_>>(),
            )
        };

        object! {
            "name": self.name.clone(),
            "element_type": self.element_type.to_string(),
            "node_ids": rows(&self.element_to_nodes, self.nodes_per_element),
            "face_ids": rows(&self.element_to_faces, self.faces_per_element),
            "edge_ids": rows(&self.element_to_edges, self.edges_per_element),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_accessors() {
        let block = CellBlock::hexahedra("cb", &[[0, 1, 2, 3, 4, 5, 6, 7], [4, 5, 6, 7, 8, 9, 10, 11]]);
        assert_eq!(block.num_elements(), 2);
        assert_eq!(block.num_nodes_per_element(), 8);
        assert_eq!(block.element_nodes(1), &[4, 5, 6, 7, 8, 9, 10, 11]);
        assert_eq!(block.element_node(1, 7), 11);
        assert!(block.element_faces(0).is_empty());
    }

    #[test]
    fn inconsistent_arity() {
        let result = CellBlock::new("bad", ElementType::Hexahedron, (0..12).collect());
        assert!(matches!(
            result,
            Err(ConnectivityError::InconsistentArity { expected: 8, num_values: 12, .. })
        ));
    }
}
