/// Hybrid finite-volume flux kernel (cell and face pressure unknowns)
pub mod hybrid;
/// Sparsely Packed Matrix
pub mod sparse_matrix;
/// Two-point upwind flux kernel
pub mod tpfa;
/// Half and harmonic transmissibilities, and the stencils built from them
pub mod transmissibility;

pub use hybrid::HybridFluxKernel;
pub use sparse_matrix::SparseMatrix;
pub use tpfa::TwoPointFluxKernel;
pub use transmissibility::{Connection, HalfFaceStencil, TwoPointStencil};

use nalgebra::DVector;
use rayon::prelude::*;
use smallvec::SmallVec;
use std::sync::mpsc::channel;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FluxError {
    #[error("transmissibility {value} of face {face} must be positive")]
    NonPositiveTransmissibility { face: usize, value: f64 },
    #[error("{what}: expected {expected} values, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("face {face} refers to element {element}, which does not exist")]
    MissingElement { face: usize, element: usize },
}

/// Cell-centered quantities read by the flux kernels, one entry per element
#[derive(Clone, Copy, Debug)]
pub struct FlowState<'a> {
    pub pressure: &'a [f64],
    pub density: &'a [f64],
    /// gravity vector dotted with the cell center
    pub gravity_coefficient: &'a [f64],
    pub mobility: &'a [f64],
    pub d_mobility_d_pressure: &'a [f64],
}

impl<'a> FlowState<'a> {
    pub fn num_elements(&self) -> usize {
        self.pressure.len()
    }

    pub(crate) fn check(&self, num_elements: usize) -> Result<(), FluxError> {
        for (what, found) in [
            ("pressure", self.pressure.len()),
            ("density", self.density.len()),
            ("gravity coefficient", self.gravity_coefficient.len()),
            ("mobility", self.mobility.len()),
            ("mobility derivative", self.d_mobility_d_pressure.len()),
        ] {
            check_len(what, num_elements, found)?;
        }
        Ok(())
    }
}

pub(crate) fn check_len(what: &'static str, expected: usize, found: usize) -> Result<(), FluxError> {
    if expected == found {
        Ok(())
    } else {
        Err(FluxError::DimensionMismatch {
            what,
            expected,
            found,
        })
    }
}

/// Residual and Jacobian contributions of one connection (or one element)
#[derive(Clone, Debug, Default)]
pub struct LocalSystem {
    pub residual: SmallVec<[(usize, f64); 4]>,
    pub jacobian: SmallVec<[([usize; 2], f64); 8]>,
}

/// Newton system `J dx = -r` of a flux assembly
#[derive(Clone, Debug)]
pub struct LinearSystem {
    pub jacobian: SparseMatrix,
    pub residual: DVector<f64>,
}

impl LinearSystem {
    pub fn new(num_dofs: usize) -> Self {
        Self {
            jacobian: SparseMatrix::new(num_dofs),
            residual: DVector::zeros(num_dofs),
        }
    }

    pub fn num_dofs(&self) -> usize {
        self.residual.len()
    }

    pub fn add_local(&mut self, local: LocalSystem) {
        for (row, value) in local.residual {
            self.residual[row] += value;
        }
        self.jacobian.insert_group(local.jacobian);
    }
}

impl ParallelExtend<LocalSystem> for LinearSystem {
    fn par_extend<I>(&mut self, local_systems_iter: I)
    where
        I: IntoParallelIterator<Item = LocalSystem>,
    {
        let (sender, receiver) = channel();

        local_systems_iter
            .into_par_iter()
            .for_each_with(sender, |s, local| {
                s.send(local).expect(
                    "Failed to send local systems over MSPC channel; cannot assemble fluxes!",
                )
            });

        receiver.iter().for_each(|local| self.add_local(local));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Mobility that depends on pressure, so upwinded derivatives show up in the Jacobian
    pub(crate) fn mobility(p: f64) -> (f64, f64) {
        (0.5 + 0.1 * p + 0.02 * p * p, 0.1 + 0.04 * p)
    }

    pub(crate) struct OwnedFlowState {
        pub pressure: Vec<f64>,
        pub density: Vec<f64>,
        pub gravity_coefficient: Vec<f64>,
        pub mobility: Vec<f64>,
        pub d_mobility_d_pressure: Vec<f64>,
    }

    impl OwnedFlowState {
        pub(crate) fn new(pressure: &[f64], density: &[f64], gravity_coefficient: &[f64]) -> Self {
            let (mobility, d_mobility_d_pressure) = pressure.iter().map(|&p| mobility(p)).unzip();
            Self {
                pressure: pressure.to_vec(),
                density: density.to_vec(),
                gravity_coefficient: gravity_coefficient.to_vec(),
                mobility,
                d_mobility_d_pressure,
            }
        }

        pub(crate) fn view(&self) -> FlowState<'_> {
            FlowState {
                pressure: &self.pressure,
                density: &self.density,
                gravity_coefficient: &self.gravity_coefficient,
                mobility: &self.mobility,
                d_mobility_d_pressure: &self.d_mobility_d_pressure,
            }
        }
    }

    #[test]
    fn parallel_assembly_matches_sequential() {
        let locals: Vec<LocalSystem> = (0..50)
            .map(|i| LocalSystem {
                residual: SmallVec::from_vec(vec![(i % 5, 1.0), ((i + 1) % 5, -1.0)]),
                jacobian: SmallVec::from_vec(vec![([i % 5, (i + 1) % 5], 0.5), ([i % 5, i % 5], 1.0)]),
            })
            .collect();

        let mut sequential = LinearSystem::new(5);
        locals.iter().cloned().for_each(|l| sequential.add_local(l));

        let mut parallel = LinearSystem::new(5);
        parallel.par_extend(locals);

        assert_eq!(parallel.num_dofs(), 5);
        assert!((parallel.residual.clone() - sequential.residual.clone()).norm() < 1e-14);
        assert_eq!(parallel.jacobian.num_entries(), sequential.jacobian.num_entries());
        for (rc, v) in sequential.jacobian.iter() {
            assert!((parallel.jacobian.get(rc) - v).abs() < 1e-14);
        }
    }

    #[test]
    fn mismatched_state() {
        let state = OwnedFlowState::new(&[1.0, 2.0], &[1.0], &[0.0, 0.0]);
        assert!(matches!(
            state.view().check(2),
            Err(FluxError::DimensionMismatch { what: "density", expected: 2, found: 1 })
        ));
    }
}
