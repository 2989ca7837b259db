use super::transmissibility::{Connection, TwoPointStencil};
use super::{FlowState, FluxError, LinearSystem, LocalSystem};

use rayon::prelude::*;
use smallvec::smallvec;

/// Flux through one connection, from its first element to its second, with single-point
/// upstream weighting of the mobility
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpwindFlux {
    pub flux: f64,
    pub upstream: usize,
    /// derivatives with respect to the pressures of the two elements, in connection order
    pub d_flux_d_pressure: [f64; 2],
}

/// Cell-centered two-point flux assembly.
///
/// For a connection `(K, L)` with transmissibility `T`:
/// ```text
/// dPhi = (p_K - p_L) - (rho_K + rho_L) / 2 (g_K - g_L)
/// f    = T lambda_up dPhi,   up = K if dPhi >= 0 else L
/// ```
/// `f` is added to the residual row of `K` and subtracted from that of `L`.
#[derive(Clone, Copy)]
pub struct TwoPointFluxKernel<'a> {
    stencil: &'a TwoPointStencil,
}

impl<'a> TwoPointFluxKernel<'a> {
    pub fn new(stencil: &'a TwoPointStencil) -> Self {
        Self { stencil }
    }

    pub fn num_dofs(&self) -> usize {
        self.stencil.num_elements()
    }

    pub fn connection_flux(&self, connection: &Connection, state: &FlowState<'_>) -> UpwindFlux {
        let [k, l] = connection.elements;
        let t = connection.transmissibility;

        let avg_density = 0.5 * (state.density[k] + state.density[l]);
        let d_phi = (state.pressure[k] - state.pressure[l])
            - avg_density * (state.gravity_coefficient[k] - state.gravity_coefficient[l]);

        let upstream = if d_phi >= 0.0 { k } else { l };
        let mobility = state.mobility[upstream];
        let d_mobility = t * state.d_mobility_d_pressure[upstream] * d_phi;

        // only the upstream mobility varies with pressure
        let mut d_flux_d_pressure = [t * mobility, -t * mobility];
        d_flux_d_pressure[if upstream == k { 0 } else { 1 }] += d_mobility;

        UpwindFlux {
            flux: t * mobility * d_phi,
            upstream,
            d_flux_d_pressure,
        }
    }

    fn local_system(&self, connection: &Connection, state: &FlowState<'_>) -> LocalSystem {
        let [k, l] = connection.elements;
        let UpwindFlux {
            flux,
            d_flux_d_pressure: [d_k, d_l],
            ..
        } = self.connection_flux(connection, state);

        LocalSystem {
            residual: smallvec![(k, flux), (l, -flux)],
            jacobian: smallvec![
                ([k, k], d_k),
                ([k, l], d_l),
                ([l, k], -d_k),
                ([l, l], -d_l),
            ],
        }
    }

    /// Residual and Jacobian of the net outflow of every element
    pub fn assemble(&self, state: &FlowState<'_>) -> Result<LinearSystem, FluxError> {
        state.check(self.stencil.num_elements())?;

        let mut system = LinearSystem::new(self.num_dofs());
        system.par_extend(
            self.stencil
                .connections()
                .par_iter()
                .map(|connection| self.local_system(connection, state)),
        );

        log::trace!(
            "Assembled two-point fluxes: {} connections, {} Jacobian entries",
            self.stencil.connections().len(),
            system.jacobian.num_entries()
        );

        Ok(system)
    }
}
