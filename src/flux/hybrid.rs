use super::transmissibility::HalfFaceStencil;
use super::{check_len, FlowState, FluxError, LinearSystem, LocalSystem};

use rayon::prelude::*;

/// One-sided flux of an element through one of its faces
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HalfFaceFlux {
    pub flux: f64,
    pub upstream: usize,
    pub d_flux_d_element_pressure: f64,
    pub d_flux_d_face_pressure: f64,
    /// derivative with respect to the pressure of the neighbor, when the neighbor is upstream
    pub d_flux_d_upstream_pressure: f64,
}

/// Hybrid finite-volume assembly over cell and face pressures.
///
/// Unknowns are the element pressures followed by one pressure per face (`num_elements + face`).
/// Each element exchanges flux with its own faces only:
/// ```text
/// q_Kf = T_Kf lambda_up (p_K - pi_f - rho_K (g_K - g_f))
/// ```
/// upwinded between `K` and the element across `f`. Element rows collect the net outflow; face
/// rows collect the sum of the one-sided fluxes into the face (continuity), which closes
/// boundary faces to flow.
#[derive(Clone, Copy)]
pub struct HybridFluxKernel<'a> {
    stencil: &'a HalfFaceStencil,
}

impl<'a> HybridFluxKernel<'a> {
    pub fn new(stencil: &'a HalfFaceStencil) -> Self {
        Self { stencil }
    }

    pub fn num_dofs(&self) -> usize {
        self.stencil.num_elements() + self.stencil.num_faces()
    }

    pub fn face_dof(&self, face: usize) -> usize {
        self.stencil.num_elements() + face
    }

    pub fn half_face_flux(
        &self,
        element: usize,
        face: usize,
        transmissibility: f64,
        state: &FlowState<'_>,
        face_pressure: &[f64],
    ) -> Result<HalfFaceFlux, FluxError> {
        if !(transmissibility > 0.0) {
            return Err(FluxError::NonPositiveTransmissibility {
                face,
                value: transmissibility,
            });
        }

        let d_phi = state.pressure[element]
            - face_pressure[face]
            - state.density[element]
                * (state.gravity_coefficient[element] - self.stencil.face_gravity_coefficient()[face]);

        let upstream = if d_phi >= 0.0 {
            element
        } else {
            self.stencil.neighbor(element, face).unwrap_or(element)
        };

        let mobility = state.mobility[upstream];
        let d_mobility = transmissibility * state.d_mobility_d_pressure[upstream] * d_phi;

        let (d_element, d_upstream) = if upstream == element {
            (transmissibility * mobility + d_mobility, 0.0)
        } else {
            (transmissibility * mobility, d_mobility)
        };

        Ok(HalfFaceFlux {
            flux: transmissibility * mobility * d_phi,
            upstream,
            d_flux_d_element_pressure: d_element,
            d_flux_d_face_pressure: -transmissibility * mobility,
            d_flux_d_upstream_pressure: d_upstream,
        })
    }

    fn element_system(
        &self,
        element: usize,
        state: &FlowState<'_>,
        face_pressure: &[f64],
    ) -> Result<LocalSystem, FluxError> {
        let mut local = LocalSystem::default();

        for (&face, &t) in self
            .stencil
            .element_faces(element)
            .iter()
            .zip(self.stencil.element_transmissibility(element))
        {
            let q = self.half_face_flux(element, face, t, state, face_pressure)?;
            let face_dof = self.face_dof(face);

            for row in [element, face_dof] {
                local.residual.push((row, q.flux));
                local.jacobian.push(([row, element], q.d_flux_d_element_pressure));
                local.jacobian.push(([row, face_dof], q.d_flux_d_face_pressure));
                if q.upstream != element {
                    local.jacobian.push(([row, q.upstream], q.d_flux_d_upstream_pressure));
                }
            }
        }

        Ok(local)
    }

    /// Residual and Jacobian over all element and face pressures
    pub fn assemble(
        &self,
        state: &FlowState<'_>,
        face_pressure: &[f64],
    ) -> Result<LinearSystem, FluxError> {
        state.check(self.stencil.num_elements())?;
        check_len("face pressure", self.stencil.num_faces(), face_pressure.len())?;

        let locals = (0..self.stencil.num_elements())
            .into_par_iter()
            .map(|element| self.element_system(element, state, face_pressure))
            .collect::<Result<Vec<_>, _>>()?;

        let mut system = LinearSystem::new(self.num_dofs());
        system.par_extend(locals);

        log::trace!(
            "Assembled hybrid fluxes: {} elements, {} faces",
            self.stencil.num_elements(),
            self.stencil.num_faces()
        );

        Ok(system)
    }
}
