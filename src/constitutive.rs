/// Hysteretic capillary pressure model and its per-element kernel
pub mod cap_pressure;
/// JSON configuration of the capillary pressure model
pub mod config;
/// Bounding curves and the Land/Killough formulas
pub mod hysteresis_curve;
/// Checkpointing of the per-element hysteresis state
pub mod restart;
/// Tabulated functions of one variable
pub mod table;

pub use cap_pressure::{
    CapillaryPressureHysteresis, CapillaryPressureKernel, HysteresisError, HysteresisMode,
    HysteresisParameters, HysteresisState, HysteresisTables, PhasePairTables,
};
pub use config::{ConfigError, HysteresisConfig};
pub use hysteresis_curve::{CurvePoint, HysteresisCurve, KilloughHysteresis};
pub use table::{TableError, TableFunction};

use std::fmt;

/// Maximum number of fluid phases handled by the constitutive kernels
pub const MAX_NUM_PHASES: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseType {
    Water,
    Oil,
    Gas,
}

impl PhaseType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "water" | "brine" => Some(Self::Water),
            "oil" => Some(Self::Oil),
            "gas" | "co2" => Some(Self::Gas),
            _ => None,
        }
    }
}

impl fmt::Display for PhaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Water => write!(f, "water"),
            Self::Oil => write!(f, "oil"),
            Self::Gas => write!(f, "gas"),
        }
    }
}
