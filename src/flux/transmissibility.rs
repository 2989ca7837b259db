use super::{check_len, FluxError};
use crate::mesh::geometry::{cell_centers, face_geometries, FaceGeometry};
use crate::mesh::{CellTopology, ConnectivityBuilder, IndexedMapping, NO_ID};

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

/// One-sided transmissibility of a cell through one of its faces:
///
/// ```text
/// T = A |d · (K n)| / |d|²
/// ```
///
/// with `d` the vector from the cell center to the face center, `n` the unit face normal and
/// `K` a diagonal permeability
pub fn half_transmissibility(
    cell_center: &Point3<f64>,
    face: &FaceGeometry,
    permeability: &Vector3<f64>,
) -> f64 {
    let d = face.center - cell_center;
    let d2 = d.norm_squared();
    if d2 == 0.0 {
        return 0.0;
    }
    face.area * d.dot(&permeability.component_mul(&face.normal)).abs() / d2
}

/// Series combination of the two half transmissibilities of a face
pub fn harmonic_transmissibility(t_k: f64, t_l: f64) -> f64 {
    if t_k + t_l > 0.0 {
        t_k * t_l / (t_k + t_l)
    } else {
        0.0
    }
}

/// Two cells exchanging flux through a face
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Connection {
    pub face: usize,
    pub elements: [usize; 2],
    pub transmissibility: f64,
}

/// Cell-to-cell connections of every interior face
#[derive(Clone, Debug)]
pub struct TwoPointStencil {
    num_elements: usize,
    connections: Vec<Connection>,
}

impl TwoPointStencil {
    pub fn new<T: CellTopology>(
        nodes: &[Point3<f64>],
        connectivity: &ConnectivityBuilder<T>,
        permeability: &[Vector3<f64>],
    ) -> Result<Self, FluxError> {
        check_len("permeability", connectivity.num_elements(), permeability.len())?;

        let faces = face_geometries(nodes, connectivity);
        let centers = cell_centers(nodes, connectivity);

        let connections = connectivity
            .faces_to_elements()
            .into_par_iter()
            .enumerate()
            .filter(|&(_, [_, l])| l != NO_ID)
            .map(|(face, elements)| {
                let [t_k, t_l] = elements.map(|e| {
                    half_transmissibility(&centers[e], &faces[face], &permeability[e])
                });
                Connection {
                    face,
                    elements,
                    transmissibility: harmonic_transmissibility(t_k, t_l),
                }
            })
            .collect();

        Self::from_connections(connectivity.num_elements(), connections)
    }

    /// Stencil over explicitly given connections
    pub fn from_connections(
        num_elements: usize,
        connections: Vec<Connection>,
    ) -> Result<Self, FluxError> {
        for c in connections.iter() {
            if let Some(&element) = c.elements.iter().find(|&&e| e >= num_elements) {
                return Err(FluxError::MissingElement {
                    face: c.face,
                    element,
                });
            }
            if !(c.transmissibility >= 0.0) {
                return Err(FluxError::NonPositiveTransmissibility {
                    face: c.face,
                    value: c.transmissibility,
                });
            }
        }

        log::debug!(
            "Two-point stencil: {} connections between {} elements",
            connections.len(),
            num_elements
        );

        Ok(Self {
            num_elements,
            connections,
        })
    }

    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Scale each connection by the multiplier of its face; a zero multiplier seals the face
    pub fn apply_multipliers(&mut self, face_multipliers: &[f64]) -> Result<(), FluxError> {
        for c in self.connections.iter_mut() {
            let m = face_multipliers.get(c.face).copied().ok_or(FluxError::DimensionMismatch {
                what: "transmissibility multipliers",
                expected: c.face + 1,
                found: face_multipliers.len(),
            })?;
            if !(m >= 0.0) {
                return Err(FluxError::NonPositiveTransmissibility {
                    face: c.face,
                    value: m,
                });
            }
            c.transmissibility *= m;
        }
        Ok(())
    }
}

/// One-sided transmissibilities of every (element, face) pair, for the hybrid discretization
#[derive(Clone, Debug)]
pub struct HalfFaceStencil {
    num_faces: usize,
    /// faces of each element
    element_faces: IndexedMapping,
    /// aligned with the values of `element_faces`
    transmissibility: Vec<f64>,
    faces_to_elements: Vec<[usize; 2]>,
    /// gravity vector dotted with each face center
    face_gravity_coefficient: Vec<f64>,
}

impl HalfFaceStencil {
    pub fn new<T: CellTopology>(
        nodes: &[Point3<f64>],
        connectivity: &ConnectivityBuilder<T>,
        permeability: &[Vector3<f64>],
        gravity: &Vector3<f64>,
    ) -> Result<Self, FluxError> {
        check_len("permeability", connectivity.num_elements(), permeability.len())?;

        let faces = face_geometries(nodes, connectivity);
        let centers = cell_centers(nodes, connectivity);

        let mut element_face_ids = Vec::with_capacity(connectivity.num_elements() * T::NUM_FACETS);
        for block in connectivity.cell_blocks() {
            for cell in 0..block.num_elements() {
                element_face_ids.extend_from_slice(block.element_faces(cell));
            }
        }
        let element_faces = IndexedMapping::uniform(T::NUM_FACETS, element_face_ids);

        let transmissibility = (0..connectivity.num_elements())
            .into_par_iter()
            .flat_map_iter(|e| {
                let (centers, faces) = (&centers, &faces);
                element_faces[e]
                    .iter()
                    .map(move |&f| half_transmissibility(&centers[e], &faces[f], &permeability[e]))
            })
            .collect();

        let face_gravity_coefficient = faces.iter().map(|f| gravity.dot(&f.center.coords)).collect();

        Self::from_parts(
            element_faces,
            transmissibility,
            connectivity.faces_to_elements(),
            face_gravity_coefficient,
        )
    }

    /// Stencil from explicit element→face lists, one transmissibility per listed face
    pub fn from_parts(
        element_faces: IndexedMapping,
        transmissibility: Vec<f64>,
        faces_to_elements: Vec<[usize; 2]>,
        face_gravity_coefficient: Vec<f64>,
    ) -> Result<Self, FluxError> {
        let num_faces = faces_to_elements.len();
        check_len("half transmissibilities", element_faces.num_values(), transmissibility.len())?;
        check_len("face gravity coefficients", num_faces, face_gravity_coefficient.len())?;

        for (e, faces) in element_faces.iter().enumerate() {
            if let Some(&face) = faces.iter().find(|&&f| f >= num_faces) {
                return Err(FluxError::DimensionMismatch {
                    what: "element faces",
                    expected: num_faces,
                    found: face + 1,
                });
            }
            if let Some(&face) = faces.iter().find(|&&f| !faces_to_elements[f].contains(&e)) {
                return Err(FluxError::MissingElement { face, element: e });
            }
        }

        Ok(Self {
            num_faces,
            element_faces,
            transmissibility,
            faces_to_elements,
            face_gravity_coefficient,
        })
    }

    pub fn num_elements(&self) -> usize {
        self.element_faces.len()
    }

    pub fn num_faces(&self) -> usize {
        self.num_faces
    }

    pub fn element_faces(&self, element: usize) -> &[usize] {
        &self.element_faces[element]
    }

    /// Half transmissibilities of an element, aligned with [`element_faces`](Self::element_faces)
    pub fn element_transmissibility(&self, element: usize) -> &[f64] {
        &self.transmissibility[self.element_faces.range(element)]
    }

    /// The element on the other side of `face`, if any
    pub fn neighbor(&self, element: usize, face: usize) -> Option<usize> {
        let [k, l] = self.faces_to_elements[face];
        let other = if k == element { l } else { k };
        (other != NO_ID).then(|| other)
    }

    pub fn face_gravity_coefficient(&self) -> &[f64] {
        &self.face_gravity_coefficient
    }

    /// Scale the half transmissibilities of each face by its multiplier; multipliers must be positive
    pub fn apply_multipliers(&mut self, face_multipliers: &[f64]) -> Result<(), FluxError> {
        check_len("transmissibility multipliers", self.num_faces, face_multipliers.len())?;
        if let Some((face, &value)) = face_multipliers.iter().enumerate().find(|&(_, &m)| !(m > 0.0)) {
            return Err(FluxError::NonPositiveTransmissibility { face, value });
        }

        for (t, &f) in self.transmissibility.iter_mut().zip(self.element_faces.iter().flatten()) {
            *t *= face_multipliers[f];
        }
        Ok(())
    }
}
