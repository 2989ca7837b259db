use super::connectivity::ConnectivityBuilder;
use super::topology::CellTopology;

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

/// Area, centroid, and unit normal of a planar (or nearly planar) polygonal face.
///
/// The normal follows the right-hand rule around the face's vertex ordering.
#[derive(Clone, Copy, Debug)]
pub struct FaceGeometry {
    pub area: f64,
    pub center: Point3<f64>,
    pub normal: Vector3<f64>,
}

/// Geometry of the polygon through `corners`, triangulated as a fan around the vertex average
pub fn polygon_geometry(nodes: &[Point3<f64>], corners: &[usize]) -> FaceGeometry {
    let center = vertex_average(nodes, corners);

    let mut area_vector = Vector3::zeros();
    for (i, &v) in corners.iter().enumerate() {
        let w = corners[(i + 1) % corners.len()];
        area_vector += (nodes[v] - center).cross(&(nodes[w] - center));
    }
    area_vector *= 0.5;

    let area = area_vector.norm();
    FaceGeometry {
        area,
        center,
        normal: if area > 0.0 {
            area_vector / area
        } else {
            Vector3::zeros()
        },
    }
}

pub fn vertex_average(nodes: &[Point3<f64>], vertices: &[usize]) -> Point3<f64> {
    let sum = vertices
        .iter()
        .fold(Vector3::zeros(), |acc, &v| acc + nodes[v].coords);
    Point3::from(sum / vertices.len() as f64)
}

/// Geometry of every unique face, in face order
pub fn face_geometries<T: CellTopology>(
    nodes: &[Point3<f64>],
    connectivity: &ConnectivityBuilder<T>,
) -> Vec<FaceGeometry> {
    let faces_to_nodes = connectivity.faces_to_nodes();
    (0..connectivity.num_faces())
        .into_par_iter()
        .map(|face| polygon_geometry(nodes, &faces_to_nodes[face]))
        .collect()
}

/// Vertex-average center of every cell, in global cell order
pub fn cell_centers<T: CellTopology>(
    nodes: &[Point3<f64>],
    connectivity: &ConnectivityBuilder<T>,
) -> Vec<Point3<f64>> {
    let mut centers = Vec::with_capacity(connectivity.num_elements());
    for block in connectivity.cell_blocks() {
        centers.par_extend(
            (0..block.num_elements())
                .into_par_iter()
                .map(|cell| vertex_average(nodes, block.element_nodes(cell))),
        );
    }
    centers
}
