//! Building blocks of a porous-media flow simulator on hexahedral meshes:
//! mesh connectivity, hysteretic capillary pressure, and two-point / hybrid flux assembly.

/// Capillary pressure tables and Killough hysteresis
pub mod constitutive;
/// Upwinded flux assembly into sparse Newton systems
pub mod flux;
/// Hexahedral mesh input and connectivity
pub mod mesh;

mod util;

pub use constitutive::{CapillaryPressureHysteresis, HysteresisConfig, HysteresisMode, PhaseType};
pub use flux::{HybridFluxKernel, LinearSystem, TwoPointFluxKernel};
pub use mesh::{ConnectivityBuilder, HexMesh, IndexedMapping, NO_ID};
