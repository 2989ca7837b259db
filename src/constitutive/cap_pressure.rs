use super::hysteresis_curve::{CurvePoint, HysteresisCurve, KilloughHysteresis};
use super::table::{validate_capillary_pressure_table, CapillaryPressureEndpoints, TableError, TableFunction};
use super::{PhaseType, MAX_NUM_PHASES};

#[cfg(feature = "json_export")]
use json::{object, JsonValue};
use rayon::prelude::*;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Absolute tolerance of the sum-to-one checks on the bounding volume fractions
pub const SATURATION_SUM_TOLERANCE: f64 = 1e-15;

/// Default width of the band around a historical extremum inside which no flow reversal is detected
pub const DEFAULT_FLOW_REVERSAL_BUFFER: f64 = 1e-10;

/// Mode slots stored per element: one per hysteretic phase pair
pub const MODES_PER_ELEMENT: usize = 2;

#[derive(Debug, Error)]
pub enum HysteresisError {
    #[error("{model}: the {table} table is required but was not given")]
    MissingTable { model: String, table: &'static str },
    #[error("{model}: {details}")]
    InvalidPhases { model: String, details: String },
    #[error("{model}: the {curve} imbibition end point ({imbibition}) crosses the drainage end point ({drainage})")]
    CrossingCurves {
        model: String,
        curve: &'static str,
        drainage: f64,
        imbibition: f64,
    },
    #[error("{model}: the {budget} volume fractions sum to {sum} instead of 1")]
    SaturationBudget {
        model: String,
        budget: &'static str,
        sum: f64,
    },
    #[error("{model}: {parameter} is {value}, but must be {requirement}")]
    InvalidParameter {
        model: String,
        parameter: &'static str,
        value: f64,
        requirement: &'static str,
    },
    #[error("{model}: no phase pair has an imbibition table, so there is no hysteresis to model")]
    NoHysteresis { model: String },
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("{evaluation} curve evaluation reached in {mode} mode")]
    ModeMismatch {
        mode: HysteresisMode,
        evaluation: &'static str,
    },
    #[error("unknown hysteresis mode {0}")]
    UnknownMode(i32),
    #[error("expected {expected} values, found {found}")]
    InputSize { expected: usize, found: usize },
}

/// Position of a phase pair on its capillary pressure curves
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum HysteresisMode {
    /// bounding drainage curve (wetting phase decreasing)
    Drainage = 0,
    /// bounding imbibition curve (wetting phase increasing)
    Imbibition = 1,
    /// scanning curve after a reversal from drainage
    DrainageToImbibition = 2,
    /// scanning curve after a reversal from imbibition
    ImbibitionToDrainage = 3,
}

impl HysteresisMode {
    pub fn is_scanning(&self) -> bool {
        matches!(self, Self::DrainageToImbibition | Self::ImbibitionToDrainage)
    }
}

impl Default for HysteresisMode {
    fn default() -> Self {
        Self::Drainage
    }
}

impl TryFrom<i32> for HysteresisMode {
    type Error = HysteresisError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Drainage),
            1 => Ok(Self::Imbibition),
            2 => Ok(Self::DrainageToImbibition),
            3 => Ok(Self::ImbibitionToDrainage),
            _ => Err(HysteresisError::UnknownMode(value)),
        }
    }
}

impl fmt::Display for HysteresisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drainage => write!(f, "drainage"),
            Self::Imbibition => write!(f, "imbibition"),
            Self::DrainageToImbibition => write!(f, "drainage-to-imbibition"),
            Self::ImbibitionToDrainage => write!(f, "imbibition-to-drainage"),
        }
    }
}

/// Bounding capillary pressure tables of one phase pair.
///
/// A pair without an imbibition table follows its drainage table and has no hysteresis.
#[derive(Clone, Debug)]
pub struct PhasePairTables {
    pub drainage: Arc<TableFunction>,
    pub imbibition: Option<Arc<TableFunction>>,
}

/// Tables of a two-phase model (`wetting_non_wetting`) or a three-phase model (the other two)
#[derive(Clone, Debug, Default)]
pub struct HysteresisTables {
    pub wetting_non_wetting: Option<PhasePairTables>,
    pub wetting_intermediate: Option<PhasePairTables>,
    pub non_wetting_intermediate: Option<PhasePairTables>,
}

#[derive(Clone, Copy, Debug)]
pub struct HysteresisParameters {
    pub killough: KilloughHysteresis,
    pub flow_reversal_buffer: f64,
    /// Derived from the other end points when absent (three-phase only)
    pub intermediate_min_vol_fraction: Option<f64>,
    pub initial_mode: HysteresisMode,
}

impl Default for HysteresisParameters {
    fn default() -> Self {
        Self {
            killough: KilloughHysteresis::default(),
            flow_reversal_buffer: DEFAULT_FLOW_REVERSAL_BUFFER,
            intermediate_min_vol_fraction: None,
            initial_mode: HysteresisMode::Drainage,
        }
    }
}

#[derive(Clone, Debug)]
struct HysteresisPair {
    drainage: Arc<TableFunction>,
    imbibition: Arc<TableFunction>,
    has_hysteresis: bool,
    /// phase whose capillary pressure the pair provides
    pc_phase: usize,
    /// capillary pressure carried on the non-wetting phase: tables increase, stored values are negated
    on_non_wetting: bool,
}

/// Validated, immutable description of the bounding curves
#[derive(Clone, Debug)]
pub struct HysteresisSetup {
    num_phases: usize,
    wetting_phase: usize,
    non_wetting_phase: usize,
    intermediate_phase: Option<usize>,
    pairs: SmallVec<[HysteresisPair; MODES_PER_ELEMENT]>,
    wetting_curve: HysteresisCurve,
    non_wetting_curve: HysteresisCurve,
    /// Land coefficients of the wetting and non-wetting curves
    land: [f64; 2],
    killough: KilloughHysteresis,
    flow_reversal_buffer: f64,
    intermediate_min_vol_fraction: f64,
}

impl HysteresisSetup {
    fn new(
        model: &str,
        phases: &[PhaseType],
        tables: &HysteresisTables,
        parameters: &HysteresisParameters,
    ) -> Result<Self, HysteresisError> {
        let invalid_phases = |details: String| HysteresisError::InvalidPhases {
            model: model.to_string(),
            details,
        };
        let missing = |table: &'static str| HysteresisError::MissingTable {
            model: model.to_string(),
            table,
        };
        let position = |phase: PhaseType| phases.iter().position(|&p| p == phase);

        let invalid_parameter = |parameter: &'static str, value: f64, requirement: &'static str| {
            HysteresisError::InvalidParameter {
                model: model.to_string(),
                parameter,
                value,
                requirement,
            }
        };
        if !(parameters.killough.curvature > 0.0) {
            return Err(invalid_parameter(
                "the Killough curvature parameter",
                parameters.killough.curvature,
                "positive",
            ));
        }
        if !(parameters.flow_reversal_buffer >= 0.0) {
            return Err(invalid_parameter(
                "the flow reversal buffer",
                parameters.flow_reversal_buffer,
                "non-negative",
            ));
        }

        if phases.len() < 2 || phases.len() > MAX_NUM_PHASES {
            return Err(invalid_phases(format!(
                "capillary pressure hysteresis needs 2 to {} phases, found {}",
                MAX_NUM_PHASES,
                phases.len()
            )));
        }
        if crate::util::has_duplicates(phases) {
            return Err(invalid_phases(format!("phases must be unique: {:?}", phases)));
        }

        let (wetting_phase, non_wetting_phase, intermediate_phase, pairs, wetting_curve, non_wetting_curve) =
            if phases.len() == 2 {
                let (w, nw, on_non_wetting) = match (position(PhaseType::Water), position(PhaseType::Gas)) {
                    (Some(w), _) => (w, 1 - w, false),
                    (None, Some(g)) => (1 - g, g, true),
                    (None, None) => {
                        return Err(invalid_phases(
                            "a two-phase model needs a water or a gas phase".to_string(),
                        ))
                    }
                };

                let pair_tables = tables
                    .wetting_non_wetting
                    .as_ref()
                    .ok_or_else(|| missing("drainage wetting/non-wetting capillary pressure"))?;
                let (pair, drainage, imbibition) =
                    build_pair(pair_tables, if on_non_wetting { nw } else { w }, on_non_wetting)?;

                let (wetting_curve, non_wetting_curve) = if on_non_wetting {
                    let nw_curve = non_wetting_curve_from(&drainage, &imbibition);
                    (nw_curve.complement(), nw_curve)
                } else {
                    let w_curve = wetting_curve_from(&drainage, &imbibition);
                    (w_curve, w_curve.complement())
                };

                (
                    w,
                    nw,
                    None,
                    SmallVec::<[HysteresisPair; MODES_PER_ELEMENT]>::from_iter([pair]),
                    wetting_curve,
                    non_wetting_curve,
                )
            } else {
                let (w, o, g) = match (
                    position(PhaseType::Water),
                    position(PhaseType::Oil),
                    position(PhaseType::Gas),
                ) {
                    (Some(w), Some(o), Some(g)) => (w, o, g),
                    _ => {
                        return Err(invalid_phases(format!(
                            "a three-phase model needs water, oil, and gas phases, found {:?}",
                            phases
                        )))
                    }
                };

                let wi_tables = tables
                    .wetting_intermediate
                    .as_ref()
                    .ok_or_else(|| missing("drainage wetting/intermediate capillary pressure"))?;
                let nwi_tables = tables
                    .non_wetting_intermediate
                    .as_ref()
                    .ok_or_else(|| missing("drainage non-wetting/intermediate capillary pressure"))?;

                let (wi_pair, wi_drainage, wi_imbibition) = build_pair(wi_tables, w, false)?;
                let (nwi_pair, nwi_drainage, nwi_imbibition) = build_pair(nwi_tables, g, true)?;

                (
                    w,
                    g,
                    Some(o),
                    SmallVec::<[HysteresisPair; MODES_PER_ELEMENT]>::from_iter([wi_pair, nwi_pair]),
                    wetting_curve_from(&wi_drainage, &wi_imbibition),
                    non_wetting_curve_from(&nwi_drainage, &nwi_imbibition),
                )
            };

        if !pairs.iter().any(|pair| pair.has_hysteresis) {
            return Err(HysteresisError::NoHysteresis {
                model: model.to_string(),
            });
        }
        for (i, pair) in pairs.iter().enumerate().filter(|(_, p)| !p.has_hysteresis) {
            log::warn!(
                "{}: phase pair {} has no imbibition table and follows its drainage curve",
                model,
                i
            );
        }

        let intermediate_min_vol_fraction = match intermediate_phase {
            None => 0.0,
            Some(_) => parameters.intermediate_min_vol_fraction.unwrap_or(
                1.0 - wetting_curve.opposite_bound.vol_fraction
                    - non_wetting_curve.opposite_bound.vol_fraction,
            ),
        };

        let check_budget = |budget: &'static str, sum: f64| {
            if (sum - 1.0).abs() > SATURATION_SUM_TOLERANCE || intermediate_min_vol_fraction < 0.0 {
                Err(HysteresisError::SaturationBudget {
                    model: model.to_string(),
                    budget,
                    sum,
                })
            } else {
                Ok(())
            }
        };

        check_budget(
            "minimum wetting, maximum non-wetting, and minimum intermediate",
            wetting_curve.opposite_bound.vol_fraction
                + non_wetting_curve.opposite_bound.vol_fraction
                + intermediate_min_vol_fraction,
        )?;
        if intermediate_phase.is_none() {
            check_budget(
                "drainage end point",
                wetting_curve.drainage_extremum.vol_fraction
                    + non_wetting_curve.drainage_extremum.vol_fraction,
            )?;
            check_budget(
                "imbibition end point",
                wetting_curve.imbibition_extremum.vol_fraction
                    + non_wetting_curve.imbibition_extremum.vol_fraction,
            )?;
        }

        let land_of = |curve: &HysteresisCurve, name: &'static str| {
            KilloughHysteresis::land_coefficient(curve).ok_or_else(|| HysteresisError::CrossingCurves {
                model: model.to_string(),
                curve: name,
                drainage: curve.drainage_extremum.vol_fraction,
                imbibition: curve.imbibition_extremum.vol_fraction,
            })
        };
        let land = [
            land_of(&wetting_curve, "wetting")?,
            land_of(&non_wetting_curve, "non-wetting")?,
        ];

        Ok(Self {
            num_phases: phases.len(),
            wetting_phase,
            non_wetting_phase,
            intermediate_phase,
            pairs,
            wetting_curve,
            non_wetting_curve,
            land,
            killough: parameters.killough,
            flow_reversal_buffer: parameters.flow_reversal_buffer,
            intermediate_min_vol_fraction,
        })
    }
}

fn build_pair(
    tables: &PhasePairTables,
    pc_phase: usize,
    on_non_wetting: bool,
) -> Result<(HysteresisPair, CapillaryPressureEndpoints, CapillaryPressureEndpoints), HysteresisError> {
    let drainage = validate_capillary_pressure_table(&tables.drainage, on_non_wetting)?;
    let imbibition = match &tables.imbibition {
        Some(table) => validate_capillary_pressure_table(table, on_non_wetting)?,
        None => drainage,
    };

    Ok((
        HysteresisPair {
            drainage: Arc::clone(&tables.drainage),
            imbibition: Arc::clone(tables.imbibition.as_ref().unwrap_or(&tables.drainage)),
            has_hysteresis: tables.imbibition.is_some(),
            pc_phase,
            on_non_wetting,
        },
        drainage,
        imbibition,
    ))
}

/// Wetting curve of tables tabulated against the wetting volume fraction (decreasing capillary pressure)
fn wetting_curve_from(
    drainage: &CapillaryPressureEndpoints,
    imbibition: &CapillaryPressureEndpoints,
) -> HysteresisCurve {
    HysteresisCurve::new(
        CurvePoint::new(drainage.phase_min_vol_fraction, drainage.max_cap_pressure),
        CurvePoint::new(imbibition.phase_max_vol_fraction, imbibition.min_cap_pressure),
        CurvePoint::new(drainage.phase_max_vol_fraction, drainage.min_cap_pressure),
    )
}

/// Non-wetting curve of tables tabulated against the non-wetting volume fraction (increasing capillary pressure)
fn non_wetting_curve_from(
    drainage: &CapillaryPressureEndpoints,
    imbibition: &CapillaryPressureEndpoints,
) -> HysteresisCurve {
    HysteresisCurve::new(
        CurvePoint::new(drainage.phase_max_vol_fraction, drainage.max_cap_pressure),
        CurvePoint::new(imbibition.phase_min_vol_fraction, imbibition.min_cap_pressure),
        CurvePoint::new(drainage.phase_min_vol_fraction, drainage.min_cap_pressure),
    )
}

/// Mode after observing volume fraction `s` of the phase carrying a pair's capillary pressure.
///
/// Scanning modes fall back onto their bounding curve once `s` returns within `buffer` of the
/// historical extremum the reversal started from; bounding modes switch to scanning once `s`
/// leaves that band in the reversing direction.
pub fn next_mode(
    mode: HysteresisMode,
    on_non_wetting: bool,
    s: f64,
    min_historical: f64,
    max_historical: f64,
    buffer: f64,
) -> HysteresisMode {
    use HysteresisMode::*;

    // on drainage the wetting phase decreases and the non-wetting phase increases
    if !on_non_wetting {
        match mode {
            Drainage if s > min_historical + buffer => DrainageToImbibition,
            DrainageToImbibition if s <= min_historical + buffer => Drainage,
            Imbibition if s < max_historical - buffer => ImbibitionToDrainage,
            ImbibitionToDrainage if s >= max_historical - buffer => Imbibition,
            unchanged => unchanged,
        }
    } else {
        match mode {
            Drainage if s < max_historical - buffer => DrainageToImbibition,
            DrainageToImbibition if s >= max_historical - buffer => Drainage,
            Imbibition if s > min_historical + buffer => ImbibitionToDrainage,
            ImbibitionToDrainage if s <= min_historical + buffer => Imbibition,
            unchanged => unchanged,
        }
    }
}

/// Per-phase inputs of one element
#[derive(Clone, Copy, Debug)]
pub struct PhaseHistory<'a> {
    pub vol_fraction: &'a [f64],
    pub min_historical: &'a [f64],
    pub max_historical: &'a [f64],
}

/// Per-phase outputs of one element; `d_cap_pressure` is row-major `[phase][phase]`
#[derive(Debug)]
pub struct PhaseOutput<'a> {
    pub cap_pressure: &'a mut [f64],
    pub d_cap_pressure: &'a mut [f64],
    pub trapped: &'a mut [f64],
}

/// Read-only evaluator of the hysteretic capillary pressure of one element at a time.
///
/// Borrowed from a [`CapillaryPressureHysteresis`] by
/// [`create_kernel_wrapper`](CapillaryPressureHysteresis::create_kernel_wrapper); it cannot
/// outlive a change of the model's tables.
#[derive(Clone, Copy)]
pub struct CapillaryPressureKernel<'a> {
    setup: &'a HysteresisSetup,
}

impl<'a> CapillaryPressureKernel<'a> {
    pub fn num_phases(&self) -> usize {
        self.setup.num_phases
    }

    /// Update the modes of an element and evaluate its capillary pressures, their derivatives
    /// with respect to the phase volume fractions, and the trapped volume fractions
    pub fn compute(
        &self,
        history: &PhaseHistory<'_>,
        modes: &mut [HysteresisMode],
        out: PhaseOutput<'_>,
    ) -> Result<(), HysteresisError> {
        let np = self.setup.num_phases;

        out.cap_pressure.fill(0.0);
        out.d_cap_pressure.fill(0.0);

        for (pair, mode) in self.setup.pairs.iter().zip(modes.iter_mut()) {
            let (pc, dpc) = self.pair_cap_pressure(pair, history, mode)?;
            out.cap_pressure[pair.pc_phase] = pc;
            out.d_cap_pressure[pair.pc_phase * np + pair.pc_phase] = dpc;
        }

        self.trapped_vol_fractions(history, out.trapped);

        Ok(())
    }

    fn pair_cap_pressure(
        &self,
        pair: &HysteresisPair,
        history: &PhaseHistory<'_>,
        mode: &mut HysteresisMode,
    ) -> Result<(f64, f64), HysteresisError> {
        let ip = pair.pc_phase;
        let s = history.vol_fraction[ip];

        let (pc, dpc) = if pair.has_hysteresis {
            *mode = next_mode(
                *mode,
                pair.on_non_wetting,
                s,
                history.min_historical[ip],
                history.max_historical[ip],
                self.setup.flow_reversal_buffer,
            );

            if mode.is_scanning() {
                self.scanning_cap_pressure(pair, history, *mode)?
            } else {
                self.bounding_cap_pressure(pair, *mode, s)?
            }
        } else {
            *mode = HysteresisMode::Drainage;
            pair.drainage.compute(s)
        };

        if pair.on_non_wetting {
            Ok((-pc, -dpc))
        } else {
            Ok((pc, dpc))
        }
    }

    fn bounding_cap_pressure(
        &self,
        pair: &HysteresisPair,
        mode: HysteresisMode,
        s: f64,
    ) -> Result<(f64, f64), HysteresisError> {
        match mode {
            HysteresisMode::Drainage => Ok(pair.drainage.compute(s)),
            HysteresisMode::Imbibition => Ok(pair.imbibition.compute(s)),
            scanning => Err(HysteresisError::ModeMismatch {
                mode: scanning,
                evaluation: "bounding",
            }),
        }
    }

    fn scanning_cap_pressure(
        &self,
        pair: &HysteresisPair,
        history: &PhaseHistory<'_>,
        mode: HysteresisMode,
    ) -> Result<(f64, f64), HysteresisError> {
        let setup = self.setup;
        let killough = &setup.killough;
        let ip = pair.pc_phase;
        let s = history.vol_fraction[ip];

        let drainage = pair.drainage.compute(s);
        let imbibition = pair.imbibition.compute(s);

        let w_curve = &setup.wetting_curve;
        let nw_curve = &setup.non_wetting_curve;

        match (pair.on_non_wetting, mode) {
            (false, HysteresisMode::DrainageToImbibition) => {
                let shy = history.min_historical[ip].max(w_curve.opposite_bound.vol_fraction);
                let s_end = self.wetting_imbibition_end(shy);
                let (f, df) = killough.scanning_weight(s, shy, s_end);
                Ok(blend(drainage, imbibition, f, df))
            }
            (false, HysteresisMode::ImbibitionToDrainage) => {
                let shy = history.max_historical[ip].min(w_curve.drainage_extremum.vol_fraction);
                let s_end = w_curve.opposite_bound.vol_fraction;
                let (f, df) = killough.scanning_weight(s, shy, s_end);
                Ok(blend(imbibition, drainage, f, df))
            }
            (true, HysteresisMode::DrainageToImbibition) => {
                let shy = history.max_historical[ip].min(nw_curve.opposite_bound.vol_fraction);
                let s_end = killough.trapped_critical_vol_fraction(nw_curve, shy, setup.land[1]);
                let (f, df) = killough.scanning_weight(s, shy, s_end);
                Ok(blend(drainage, imbibition, f, df))
            }
            (true, HysteresisMode::ImbibitionToDrainage) => {
                let shy = history.min_historical[ip].max(nw_curve.drainage_extremum.vol_fraction);
                let s_end = nw_curve.opposite_bound.vol_fraction;
                let (f, df) = killough.scanning_weight(s, shy, s_end);
                Ok(blend(imbibition, drainage, f, df))
            }
            (_, bounding) => Err(HysteresisError::ModeMismatch {
                mode: bounding,
                evaluation: "scanning",
            }),
        }
    }

    /// Largest wetting volume fraction an imbibition starting from `shy` reaches: whatever is
    /// left once the non-wetting phase trapped by the preceding drainage and the intermediate
    /// budget are taken out
    fn wetting_imbibition_end(&self, shy: f64) -> f64 {
        let setup = self.setup;
        let s_o_min = setup.intermediate_min_vol_fraction;

        let s_nw_hy = 1.0 - shy - s_o_min;
        let s_nw_trapped = setup.killough.trapped_critical_vol_fraction(
            &setup.non_wetting_curve,
            s_nw_hy,
            setup.land[1],
        );

        (1.0 - s_nw_trapped - s_o_min)
            .min(setup.wetting_curve.drainage_extremum.vol_fraction)
            .max(shy)
    }

    fn trapped_vol_fractions(&self, history: &PhaseHistory<'_>, trapped: &mut [f64]) {
        let setup = self.setup;
        let s = history.vol_fraction;
        let (iw, inw) = (setup.wetting_phase, setup.non_wetting_phase);

        trapped.fill(0.0);

        let nw_curve = &setup.non_wetting_curve;
        let shy = nw_curve.clamp(history.max_historical[inw].max(s[inw]));
        trapped[inw] = setup
            .killough
            .trapped_critical_vol_fraction(nw_curve, shy, setup.land[1])
            .min(s[inw]);

        trapped[iw] = setup.wetting_curve.opposite_bound.vol_fraction.min(s[iw]);

        if let Some(io) = setup.intermediate_phase {
            trapped[io] = setup.intermediate_min_vol_fraction.min(s[io]);
        }
    }
}

/// `p0 + F (p1 - p0)` and its derivative by the product rule
#[inline]
fn blend((p0, dp0): (f64, f64), (p1, dp1): (f64, f64), f: f64, df: f64) -> (f64, f64) {
    (p0 + f * (p1 - p0), dp0 + f * (dp1 - dp0) + df * (p1 - p0))
}

/// History of every element: modes and the extreme volume fractions of the converged steps
#[derive(Clone, Debug, PartialEq)]
pub struct HysteresisState {
    num_phases: usize,
    pub(crate) modes: Vec<HysteresisMode>,
    pub(crate) min_historical_vol_fraction: Vec<f64>,
    pub(crate) max_historical_vol_fraction: Vec<f64>,
}

impl HysteresisState {
    pub fn new(num_elements: usize, num_phases: usize, initial_mode: HysteresisMode) -> Self {
        Self {
            num_phases,
            modes: vec![initial_mode; num_elements * MODES_PER_ELEMENT],
            min_historical_vol_fraction: vec![1.0; num_elements * num_phases],
            max_historical_vol_fraction: vec![0.0; num_elements * num_phases],
        }
    }

    pub(crate) fn from_parts(
        num_phases: usize,
        modes: Vec<HysteresisMode>,
        min_historical_vol_fraction: Vec<f64>,
        max_historical_vol_fraction: Vec<f64>,
    ) -> Result<Self, HysteresisError> {
        let num_elements = modes.len() / MODES_PER_ELEMENT;
        for found in [
            min_historical_vol_fraction.len(),
            max_historical_vol_fraction.len(),
        ] {
            if found != num_elements * num_phases {
                return Err(HysteresisError::InputSize {
                    expected: num_elements * num_phases,
                    found,
                });
            }
        }

        Ok(Self {
            num_phases,
            modes,
            min_historical_vol_fraction,
            max_historical_vol_fraction,
        })
    }

    pub fn num_elements(&self) -> usize {
        self.modes.len() / MODES_PER_ELEMENT
    }

    pub fn num_phases(&self) -> usize {
        self.num_phases
    }

    pub fn modes(&self, element: usize) -> &[HysteresisMode] {
        &self.modes[element * MODES_PER_ELEMENT..(element + 1) * MODES_PER_ELEMENT]
    }

    pub fn min_historical_vol_fraction(&self, element: usize) -> &[f64] {
        &self.min_historical_vol_fraction[element * self.num_phases..(element + 1) * self.num_phases]
    }

    pub fn max_historical_vol_fraction(&self, element: usize) -> &[f64] {
        &self.max_historical_vol_fraction[element * self.num_phases..(element + 1) * self.num_phases]
    }

    /// Fold the volume fractions of a converged step into the historical extrema
    pub fn save_converged_state(&mut self, phase_vol_fraction: &[f64]) -> Result<(), HysteresisError> {
        check_size(self.min_historical_vol_fraction.len(), phase_vol_fraction.len())?;

        self.max_historical_vol_fraction
            .par_iter_mut()
            .zip(self.min_historical_vol_fraction.par_iter_mut())
            .zip(phase_vol_fraction.par_iter())
            .for_each(|((max, min), &s)| {
                *max = max.max(s);
                *min = min.min(s);
            });

        Ok(())
    }

    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "num_phases": self.num_phases,
            "modes": JsonValue::from(self.modes.iter().map(|m| *m as i32).collect::<Vec<_>>()),
            "min_historical_vol_fraction": JsonValue::from(self.min_historical_vol_fraction.clone()),
            "max_historical_vol_fraction": JsonValue::from(self.max_historical_vol_fraction.clone()),
        }
    }
}

fn check_size(expected: usize, found: usize) -> Result<(), HysteresisError> {
    if expected == found {
        Ok(())
    } else {
        Err(HysteresisError::InputSize { expected, found })
    }
}

/// Table-based capillary pressure with Killough hysteresis, for every element of a region.
///
/// Owns the per-element hysteresis state and the latest outputs. Each nonlinear iteration
/// calls [`update`](Self::update); each converged time step calls
/// [`save_converged_state`](Self::save_converged_state).
#[derive(Clone, Debug)]
pub struct CapillaryPressureHysteresis {
    name: String,
    phases: Vec<PhaseType>,
    parameters: HysteresisParameters,
    setup: HysteresisSetup,
    state: HysteresisState,
    phase_cap_pressure: Vec<f64>,
    d_phase_cap_pressure_d_phase_vol_frac: Vec<f64>,
    phase_trapped_vol_frac: Vec<f64>,
}

impl CapillaryPressureHysteresis {
    pub fn new(
        name: impl Into<String>,
        phases: &[PhaseType],
        tables: &HysteresisTables,
        parameters: HysteresisParameters,
        num_elements: usize,
    ) -> Result<Self, HysteresisError> {
        let name = name.into();
        let setup = HysteresisSetup::new(&name, phases, tables, &parameters)?;
        let np = phases.len();

        log::info!(
            "{}: {}-phase capillary pressure hysteresis on {} elements (Land coefficients {:.4} / {:.4})",
            name,
            np,
            num_elements,
            setup.land[0],
            setup.land[1]
        );

        Ok(Self {
            name,
            phases: phases.to_vec(),
            parameters,
            setup,
            state: HysteresisState::new(num_elements, np, parameters.initial_mode),
            phase_cap_pressure: vec![0.0; num_elements * np],
            d_phase_cap_pressure_d_phase_vol_frac: vec![0.0; num_elements * np * np],
            phase_trapped_vol_frac: vec![0.0; num_elements * np],
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phases(&self) -> &[PhaseType] {
        &self.phases
    }

    pub fn num_phases(&self) -> usize {
        self.phases.len()
    }

    pub fn num_elements(&self) -> usize {
        self.state.num_elements()
    }

    /// A fresh view of the current tables and parameters
    pub fn create_kernel_wrapper(&self) -> CapillaryPressureKernel<'_> {
        CapillaryPressureKernel { setup: &self.setup }
    }

    /// Replace the bounding tables, revalidating everything derived from them
    pub fn replace_tables(&mut self, tables: &HysteresisTables) -> Result<(), HysteresisError> {
        self.setup = HysteresisSetup::new(&self.name, &self.phases, tables, &self.parameters)?;
        log::debug!("{}: capillary pressure tables replaced", self.name);
        Ok(())
    }

    /// Evaluate every element at the given row-major `[element][phase]` volume fractions
    pub fn update(&mut self, phase_vol_fraction: &[f64]) -> Result<(), HysteresisError> {
        let np = self.num_phases();
        check_size(self.num_elements() * np, phase_vol_fraction.len())?;

        let kernel = CapillaryPressureKernel { setup: &self.setup };
        let state = &mut self.state;

        self.phase_cap_pressure
            .par_chunks_mut(np)
            .zip(self.d_phase_cap_pressure_d_phase_vol_frac.par_chunks_mut(np * np))
            .zip(self.phase_trapped_vol_frac.par_chunks_mut(np))
            .zip(state.modes.par_chunks_mut(MODES_PER_ELEMENT))
            .zip(phase_vol_fraction.par_chunks(np))
            .zip(
                state
                    .min_historical_vol_fraction
                    .par_chunks(np)
                    .zip(state.max_historical_vol_fraction.par_chunks(np)),
            )
            .try_for_each(|(((((pc, dpc), trapped), modes), s), (min, max))| {
                kernel.compute(
                    &PhaseHistory {
                        vol_fraction: s,
                        min_historical: min,
                        max_historical: max,
                    },
                    modes,
                    PhaseOutput {
                        cap_pressure: pc,
                        d_cap_pressure: dpc,
                        trapped,
                    },
                )
            })
    }

    pub fn save_converged_state(&mut self, phase_vol_fraction: &[f64]) -> Result<(), HysteresisError> {
        self.state.save_converged_state(phase_vol_fraction)
    }

    pub fn state(&self) -> &HysteresisState {
        &self.state
    }

    /// Resume from a checkpointed state
    pub fn restore_state(&mut self, state: HysteresisState) -> Result<(), HysteresisError> {
        check_size(self.num_elements(), state.num_elements())?;
        check_size(self.num_phases(), state.num_phases())?;
        self.state = state;
        Ok(())
    }

    pub fn phase_cap_pressure(&self, element: usize) -> &[f64] {
        let np = self.num_phases();
        &self.phase_cap_pressure[element * np..(element + 1) * np]
    }

    /// Row-major `[phase][phase]` derivatives of the capillary pressures of an element
    pub fn d_phase_cap_pressure_d_phase_vol_fraction(&self, element: usize) -> &[f64] {
        let nn = self.num_phases() * self.num_phases();
        &self.d_phase_cap_pressure_d_phase_vol_frac[element * nn..(element + 1) * nn]
    }

    pub fn phase_trapped_vol_fraction(&self, element: usize) -> &[f64] {
        let np = self.num_phases();
        &self.phase_trapped_vol_frac[element * np..(element + 1) * np]
    }

    pub fn wetting_curve(&self) -> &HysteresisCurve {
        &self.setup.wetting_curve
    }

    pub fn non_wetting_curve(&self) -> &HysteresisCurve {
        &self.setup.non_wetting_curve
    }

    /// Land coefficients of the wetting and non-wetting curves
    pub fn land_parameters(&self) -> [f64; 2] {
        self.setup.land
    }

    pub fn intermediate_min_vol_fraction(&self) -> f64 {
        self.setup.intermediate_min_vol_fraction
    }

    pub fn phase_has_hysteresis(&self) -> Vec<bool> {
        self.setup.pairs.iter().map(|p| p.has_hysteresis).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    pub(crate) fn table(name: &str, coordinates: &[f64], values: &[f64]) -> Arc<TableFunction> {
        Arc::new(TableFunction::new(name, coordinates.to_vec(), values.to_vec()).unwrap())
    }

    pub(crate) fn water_oil_tables() -> HysteresisTables {
        HysteresisTables {
            wetting_non_wetting: Some(PhasePairTables {
                drainage: table("pcd", &[0.2, 0.3, 0.5, 0.7, 0.9], &[5.0, 3.0, 1.5, 0.6, 0.0]),
                imbibition: Some(table("pci", &[0.2, 0.3, 0.5, 0.7], &[3.0, 1.2, 0.4, 0.0])),
            }),
            ..Default::default()
        }
    }

    fn oil_gas_tables() -> HysteresisTables {
        HysteresisTables {
            wetting_non_wetting: Some(PhasePairTables {
                drainage: table("pcd_g", &[0.05, 0.4, 0.65], &[0.0, 0.8, 2.0]),
                imbibition: Some(table("pci_g", &[0.2, 0.45, 0.65], &[0.0, 0.4, 1.5])),
            }),
            ..Default::default()
        }
    }

    fn three_phase_tables() -> HysteresisTables {
        HysteresisTables {
            wetting_intermediate: Some(PhasePairTables {
                drainage: table("pcd_wo", &[0.15, 0.4, 0.7], &[4.0, 1.0, 0.0]),
                imbibition: Some(table("pci_wo", &[0.15, 0.4, 0.6], &[2.0, 0.5, 0.0])),
            }),
            non_wetting_intermediate: Some(PhasePairTables {
                drainage: table("pcd_go", &[0.05, 0.4, 0.65], &[0.0, 0.8, 2.0]),
                imbibition: Some(table("pci_go", &[0.2, 0.45, 0.65], &[0.0, 0.4, 1.5])),
            }),
            ..Default::default()
        }
    }

    const WATER_OIL: [PhaseType; 2] = [PhaseType::Water, PhaseType::Oil];
    const OIL_GAS: [PhaseType; 2] = [PhaseType::Oil, PhaseType::Gas];
    const THREE_PHASE: [PhaseType; 3] = [PhaseType::Water, PhaseType::Oil, PhaseType::Gas];

    fn model(phases: &[PhaseType], tables: &HysteresisTables, n: usize) -> CapillaryPressureHysteresis {
        CapillaryPressureHysteresis::new("pc", phases, tables, HysteresisParameters::default(), n)
            .unwrap()
    }

    struct Evaluation {
        pc: Vec<f64>,
        dpc: Vec<f64>,
        trapped: Vec<f64>,
        modes: [HysteresisMode; 2],
    }

    fn evaluate(
        kernel: &CapillaryPressureKernel,
        s: &[f64],
        min: &[f64],
        max: &[f64],
        mut modes: [HysteresisMode; 2],
    ) -> Evaluation {
        let np = kernel.num_phases();
        let mut pc = vec![0.0; np];
        let mut dpc = vec![0.0; np * np];
        let mut trapped = vec![0.0; np];

        kernel
            .compute(
                &PhaseHistory {
                    vol_fraction: s,
                    min_historical: min,
                    max_historical: max,
                },
                &mut modes,
                PhaseOutput {
                    cap_pressure: &mut pc,
                    d_cap_pressure: &mut dpc,
                    trapped: &mut trapped,
                },
            )
            .unwrap();

        Evaluation {
            pc,
            dpc,
            trapped,
            modes,
        }
    }

    #[test]
    fn two_phase_curves() {
        let pc = model(&WATER_OIL, &water_oil_tables(), 1);

        let w = pc.wetting_curve();
        assert_eq!(w.opposite_bound, CurvePoint::new(0.2, 5.0));
        assert_eq!(w.imbibition_extremum.vol_fraction, 0.7);
        assert_eq!(w.drainage_extremum.vol_fraction, 0.9);

        let nw = pc.non_wetting_curve();
        assert_relative_eq!(nw.opposite_bound.vol_fraction, 0.8, epsilon = 1e-14);
        assert_relative_eq!(nw.imbibition_extremum.vol_fraction, 0.3, epsilon = 1e-14);
        assert_relative_eq!(nw.drainage_extremum.vol_fraction, 0.1, epsilon = 1e-14);

        let [c_w, c_nw] = pc.land_parameters();
        assert_relative_eq!(c_w, 2.5, epsilon = 1e-12);
        assert_relative_eq!(c_nw, 2.5, epsilon = 1e-12);
        assert_eq!(pc.phase_has_hysteresis(), vec![true]);
        assert_eq!(pc.intermediate_min_vol_fraction(), 0.0);
    }

    #[test]
    fn primary_drainage_follows_the_drainage_table() {
        let mut pc = model(&WATER_OIL, &water_oil_tables(), 2);
        pc.update(&[0.4, 0.6, 0.8, 0.2]).unwrap();

        assert_relative_eq!(pc.phase_cap_pressure(0)[0], 2.25, epsilon = 1e-12);
        assert_relative_eq!(pc.d_phase_cap_pressure_d_phase_vol_fraction(0)[0], -7.5, epsilon = 1e-12);
        assert_eq!(pc.phase_cap_pressure(0)[1], 0.0);
        assert_relative_eq!(pc.phase_cap_pressure(1)[0], 0.3, epsilon = 1e-12);
        assert_eq!(pc.state().modes(0), &[HysteresisMode::Drainage; 2]);
        assert_eq!(pc.state().modes(1), &[HysteresisMode::Drainage; 2]);
    }

    #[test]
    fn reversal_starts_and_ends_a_scanning_curve() {
        let mut pc = model(&WATER_OIL, &water_oil_tables(), 1);

        pc.update(&[0.4, 0.6]).unwrap();
        pc.save_converged_state(&[0.4, 0.6]).unwrap();
        assert_eq!(pc.state().min_historical_vol_fraction(0), &[0.4, 0.6]);
        assert_eq!(pc.state().max_historical_vol_fraction(0), &[0.4, 0.6]);

        // water comes back: imbibition scanning curve between the bounding curves
        pc.update(&[0.5, 0.5]).unwrap();
        assert_eq!(pc.state().modes(0)[0], HysteresisMode::DrainageToImbibition);
        let scanning = pc.phase_cap_pressure(0)[0];
        assert!(scanning < 1.5 && scanning > 0.4);

        // back to the historical minimum: onto the drainage curve again
        pc.update(&[0.4, 0.6]).unwrap();
        assert_eq!(pc.state().modes(0)[0], HysteresisMode::Drainage);
        assert_relative_eq!(pc.phase_cap_pressure(0)[0], 2.25, epsilon = 1e-12);
    }

    #[test]
    fn scanning_curve_starts_on_the_drainage_curve() {
        let pc = model(&WATER_OIL, &water_oil_tables(), 1);
        let kernel = pc.create_kernel_wrapper();

        let eval = evaluate(
            &kernel,
            &[0.4 + 1e-9, 0.6 - 1e-9],
            &[0.4, 0.6],
            &[0.4, 0.6],
            [HysteresisMode::DrainageToImbibition; 2],
        );
        assert_eq!(eval.modes[0], HysteresisMode::DrainageToImbibition);
        assert_relative_eq!(eval.pc[0], 2.25, epsilon = 1e-6);
    }

    #[test]
    fn evaluation_is_idempotent() {
        let pc = model(&WATER_OIL, &water_oil_tables(), 1);
        let kernel = pc.create_kernel_wrapper();

        let args = ([0.55, 0.45], [0.35, 0.2], [0.8, 0.65]);
        for mode in [
            HysteresisMode::Drainage,
            HysteresisMode::Imbibition,
            HysteresisMode::DrainageToImbibition,
            HysteresisMode::ImbibitionToDrainage,
        ] {
            let a = evaluate(&kernel, &args.0, &args.1, &args.2, [mode; 2]);
            let b = evaluate(&kernel, &args.0, &args.1, &args.2, [mode; 2]);
            assert_eq!(a.pc, b.pc);
            assert_eq!(a.dpc, b.dpc);
            assert_eq!(a.trapped, b.trapped);
            assert_eq!(a.modes, b.modes);

            let c = evaluate(&kernel, &args.0, &args.1, &args.2, a.modes);
            assert_eq!(a.pc, c.pc);
        }
    }

    #[test]
    fn scanning_curves_stay_between_the_bounding_curves() {
        let tables = water_oil_tables();
        let pairs = tables.wetting_non_wetting.as_ref().unwrap();

        for imbibition_end in [0.5, 0.6, 0.7, 0.85] {
            let tables = HysteresisTables {
                wetting_non_wetting: Some(PhasePairTables {
                    drainage: Arc::clone(&pairs.drainage),
                    imbibition: Some(table(
                        "pci",
                        &[0.2, 0.3, imbibition_end],
                        &[3.0, 1.2, 0.0],
                    )),
                }),
                ..Default::default()
            };

            for curvature in [0.05, 0.3, 1.0] {
                let parameters = HysteresisParameters {
                    killough: KilloughHysteresis {
                        curvature,
                        ..Default::default()
                    },
                    ..Default::default()
                };
                let pc = CapillaryPressureHysteresis::new("pc", &WATER_OIL, &tables, parameters, 1)
                    .unwrap();
                let kernel = pc.create_kernel_wrapper();
                let pcd = &pairs.drainage;
                let pci = tables.wetting_non_wetting.as_ref().unwrap().imbibition.as_ref().unwrap();

                for i in 0..=14 {
                    let shy = 0.2 + 0.05 * i as f64;
                    for j in 0..=40 {
                        let s = 0.18 + 0.018 * j as f64;
                        let (lo, hi) = {
                            let (d, m) = (pcd.value(s), pci.value(s));
                            (d.min(m) - 1e-12, d.max(m) + 1e-12)
                        };

                        let up = evaluate(
                            &kernel,
                            &[s, 1.0 - s],
                            &[shy, 1.0 - shy],
                            &[shy, 1.0 - shy],
                            [HysteresisMode::DrainageToImbibition; 2],
                        );
                        assert!(up.pc[0] >= lo && up.pc[0] <= hi);

                        let down = evaluate(
                            &kernel,
                            &[s, 1.0 - s],
                            &[shy, 1.0 - shy],
                            &[shy, 1.0 - shy],
                            [HysteresisMode::ImbibitionToDrainage; 2],
                        );
                        assert!(down.pc[0] >= lo && down.pc[0] <= hi);
                    }
                }
            }
        }
    }

    #[test]
    fn analytic_derivatives_match_finite_differences() {
        let pc = model(&WATER_OIL, &water_oil_tables(), 1);
        let kernel = pc.create_kernel_wrapper();
        let h = 1e-7;

        for (mode, s, min, max) in [
            (HysteresisMode::DrainageToImbibition, 0.55, 0.35, 0.6),
            (HysteresisMode::DrainageToImbibition, 0.42, 0.32, 0.6),
            (HysteresisMode::ImbibitionToDrainage, 0.45, 0.2, 0.62),
            (HysteresisMode::ImbibitionToDrainage, 0.25, 0.2, 0.45),
        ] {
            let at = |s: f64| evaluate(&kernel, &[s, 1.0 - s], &[min, 1.0 - max], &[max, 1.0 - min], [mode; 2]);

            let center = at(s);
            assert_eq!(center.modes[0], mode);
            let fd = (at(s + h).pc[0] - at(s - h).pc[0]) / (2.0 * h);
            assert_relative_eq!(center.dpc[0], fd, max_relative = 1e-5);
        }
    }

    /// Compare the diagonal derivative of `phase` against central differences, moving `balance` to keep the sum
    fn assert_derivative_matches(
        kernel: &CapillaryPressureKernel,
        (phase, balance, slot): (usize, usize, usize),
        mode: HysteresisMode,
        s: &[f64],
        min: &[f64],
        max: &[f64],
    ) {
        let np = kernel.num_phases();
        let h = 1e-7;
        let at = |ds: f64| {
            let mut shifted = s.to_vec();
            shifted[phase] += ds;
            shifted[balance] -= ds;
            evaluate(kernel, &shifted, min, max, [mode; 2])
        };

        let center = at(0.0);
        assert_eq!(center.modes[slot], mode);
        assert!(center.pc[phase] != 0.0);

        let fd = (at(h).pc[phase] - at(-h).pc[phase]) / (2.0 * h);
        assert_relative_eq!(center.dpc[phase * np + phase], fd, max_relative = 1e-5);
    }

    #[test]
    fn non_wetting_derivatives_match_finite_differences() {
        use HysteresisMode::*;
        let pc = model(&OIL_GAS, &oil_gas_tables(), 1);
        let kernel = pc.create_kernel_wrapper();

        // (gas volume fraction, historical minimum, historical maximum)
        for (mode, sg, min, max) in [
            (DrainageToImbibition, 0.5, 0.1, 0.6),
            (DrainageToImbibition, 0.3, 0.1, 0.6),
            (ImbibitionToDrainage, 0.42, 0.25, 0.6),
            (ImbibitionToDrainage, 0.55, 0.3, 0.6),
        ] {
            assert_derivative_matches(
                &kernel,
                (1, 0, 0),
                mode,
                &[1.0 - sg, sg],
                &[1.0 - max, min],
                &[1.0 - min, max],
            );
        }
    }

    #[test]
    fn three_phase_derivatives_match_finite_differences() {
        use HysteresisMode::*;
        let pc = model(&THREE_PHASE, &three_phase_tables(), 1);
        let kernel = pc.create_kernel_wrapper();

        // water pair, gas held at 0.2
        for (mode, sw, min, max) in [
            (DrainageToImbibition, 0.33, 0.25, 0.6),
            (DrainageToImbibition, 0.5, 0.25, 0.6),
            (ImbibitionToDrainage, 0.45, 0.2, 0.55),
            (ImbibitionToDrainage, 0.3, 0.2, 0.55),
        ] {
            assert_derivative_matches(
                &kernel,
                (0, 1, 0),
                mode,
                &[sw, 0.8 - sw, 0.2],
                &[min, 0.2, 0.2],
                &[max, 0.6, 0.2],
            );
        }

        // gas pair, water held at 0.3
        for (mode, sg, min, max) in [
            (DrainageToImbibition, 0.35, 0.1, 0.55),
            (DrainageToImbibition, 0.5, 0.1, 0.55),
            (ImbibitionToDrainage, 0.42, 0.25, 0.55),
            (ImbibitionToDrainage, 0.3, 0.25, 0.55),
        ] {
            assert_derivative_matches(
                &kernel,
                (2, 1, 1),
                mode,
                &[0.3, 0.7 - sg, sg],
                &[0.3, 0.1, min],
                &[0.3, 0.5, max],
            );
        }
    }

    /// Sweep reversal points and volume fractions of `phase` in both scanning modes, checking that
    /// the (un-negated) capillary pressure stays between the pair's bounding tables
    fn assert_scanning_bounded(
        kernel: &CapillaryPressureKernel,
        pair_tables: &PhasePairTables,
        (phase, balance): (usize, usize),
        sign: f64,
        base: &[f64],
        (lo_s, hi_s): (f64, f64),
    ) {
        let pcd = &pair_tables.drainage;
        let pci = pair_tables.imbibition.as_ref().unwrap();
        let step = (hi_s - lo_s) / 30.0;

        for i in 1..30 {
            let shy = lo_s + step * i as f64;
            let (mut min, mut max) = (base.to_vec(), base.to_vec());
            min[phase] = shy;
            max[phase] = shy;

            for j in 0..=60 {
                let x = lo_s + 0.5 * step * j as f64;
                let mut s = base.to_vec();
                s[balance] -= x - s[phase];
                s[phase] = x;

                let (d, m) = (pcd.value(x), pci.value(x));
                let (lo, hi) = (d.min(m) - 1e-12, d.max(m) + 1e-12);

                for mode in [
                    HysteresisMode::DrainageToImbibition,
                    HysteresisMode::ImbibitionToDrainage,
                ] {
                    let value = sign * evaluate(kernel, &s, &min, &max, [mode; 2]).pc[phase];
                    assert!(value >= lo && value <= hi);
                }
            }
        }
    }

    #[test]
    fn non_wetting_scanning_curves_stay_between_the_bounding_curves() {
        let tables = oil_gas_tables();
        let pc = model(&OIL_GAS, &tables, 1);
        assert_scanning_bounded(
            &pc.create_kernel_wrapper(),
            tables.wetting_non_wetting.as_ref().unwrap(),
            (1, 0),
            -1.0,
            &[0.5, 0.5],
            (0.05, 0.65),
        );
    }

    #[test]
    fn three_phase_scanning_curves_stay_between_the_bounding_curves() {
        let tables = three_phase_tables();
        let pc = model(&THREE_PHASE, &tables, 1);
        let kernel = pc.create_kernel_wrapper();

        assert_scanning_bounded(
            &kernel,
            tables.wetting_intermediate.as_ref().unwrap(),
            (0, 1),
            1.0,
            &[0.4, 0.5, 0.1],
            (0.15, 0.7),
        );
        assert_scanning_bounded(
            &kernel,
            tables.non_wetting_intermediate.as_ref().unwrap(),
            (2, 1),
            -1.0,
            &[0.2, 0.4, 0.4],
            (0.05, 0.65),
        );
    }

    #[test]
    fn gas_capillary_pressure_is_negated() {
        let mut pc = model(&OIL_GAS, &oil_gas_tables(), 1);

        // gas drains in up to 0.6, then retreats
        pc.update(&[0.4, 0.6]).unwrap();
        assert_relative_eq!(pc.phase_cap_pressure(0)[1], -(0.8 + 1.2 * 0.2 / 0.25), epsilon = 1e-12);
        assert_relative_eq!(pc.d_phase_cap_pressure_d_phase_vol_fraction(0)[3], -4.8, epsilon = 1e-12);
        assert_eq!(pc.phase_cap_pressure(0)[0], 0.0);

        pc.save_converged_state(&[0.4, 0.6]).unwrap();
        pc.update(&[0.5, 0.5]).unwrap();
        assert_eq!(pc.state().modes(0)[0], HysteresisMode::DrainageToImbibition);

        let scanning = -pc.phase_cap_pressure(0)[1];
        let pcd = 0.8 + 1.2 * 0.1 / 0.25;
        let pci = 0.4 + 1.1 * 0.05 / 0.2;
        assert!(scanning <= pcd && scanning >= pci);

        let [c_w, c_nw] = pc.land_parameters();
        assert_relative_eq!(c_nw, 3.0, epsilon = 1e-9);
        assert_relative_eq!(c_w, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn trapped_vol_fractions() {
        let mut pc = model(&WATER_OIL, &water_oil_tables(), 1);
        pc.update(&[0.2, 0.8]).unwrap();

        // from the maximum oil volume fraction, Land traps the imbibition end point (up to Jerauld's correction)
        let killough = KilloughHysteresis::default();
        let expected = killough.trapped_critical_vol_fraction(pc.non_wetting_curve(), 0.8, 2.5);
        assert_relative_eq!(pc.phase_trapped_vol_fraction(0)[1], expected, epsilon = 1e-12);
        assert!(expected > 0.1 && expected < 0.3);
        assert_relative_eq!(pc.phase_trapped_vol_fraction(0)[0], 0.2, epsilon = 1e-14);

        // never more than is there
        pc.update(&[0.95, 0.05]).unwrap();
        assert_relative_eq!(pc.phase_trapped_vol_fraction(0)[1], 0.05, epsilon = 1e-14);
    }

    #[test]
    fn three_phase_setup() {
        let mut pc = model(&THREE_PHASE, &three_phase_tables(), 1);

        let sum = pc.wetting_curve().opposite_bound.vol_fraction
            + pc.non_wetting_curve().opposite_bound.vol_fraction
            + pc.intermediate_min_vol_fraction();
        assert!((sum - 1.0).abs() <= 1e-15);
        assert_relative_eq!(pc.intermediate_min_vol_fraction(), 0.2, epsilon = 1e-14);
        assert_eq!(pc.phase_has_hysteresis(), vec![true, true]);

        pc.update(&[0.3, 0.35, 0.35]).unwrap();
        let values = pc.phase_cap_pressure(0);
        assert_relative_eq!(values[0], 2.2, epsilon = 1e-12);
        assert_eq!(values[1], 0.0);
        assert_relative_eq!(values[2], -0.8 * 0.3 / 0.35, epsilon = 1e-12);

        let d = pc.d_phase_cap_pressure_d_phase_vol_fraction(0);
        assert_relative_eq!(d[0], -12.0, epsilon = 1e-9);
        assert_relative_eq!(d[8], -0.8 / 0.35, epsilon = 1e-9);
        assert!(d.iter().enumerate().all(|(k, v)| k == 0 || k == 8 || *v == 0.0));

        assert_relative_eq!(pc.phase_trapped_vol_fraction(0)[1], 0.2, epsilon = 1e-14);
    }

    #[test]
    fn three_phase_pairs_reverse_independently() {
        let mut pc = model(&THREE_PHASE, &three_phase_tables(), 1);
        pc.save_converged_state(&[0.3, 0.3, 0.4]).unwrap();

        // water rises, gas keeps draining in
        pc.update(&[0.35, 0.2, 0.45]).unwrap();
        assert_eq!(
            pc.state().modes(0),
            &[HysteresisMode::DrainageToImbibition, HysteresisMode::Drainage]
        );
    }

    #[test]
    fn inconsistent_intermediate_budget() {
        let parameters = HysteresisParameters {
            intermediate_min_vol_fraction: Some(0.25),
            ..Default::default()
        };
        let result =
            CapillaryPressureHysteresis::new("pc", &THREE_PHASE, &three_phase_tables(), parameters, 1);
        assert!(matches!(result, Err(HysteresisError::SaturationBudget { .. })));
    }

    #[test]
    fn crossing_curves_are_rejected() {
        let mut tables = water_oil_tables();
        tables.wetting_non_wetting.as_mut().unwrap().imbibition =
            Some(table("pci", &[0.2, 0.5, 0.95], &[3.0, 0.4, 0.0]));

        let result = CapillaryPressureHysteresis::new("pc", &WATER_OIL, &tables, HysteresisParameters::default(), 1);
        assert!(matches!(
            result,
            Err(HysteresisError::CrossingCurves { curve: "wetting", .. })
        ));
    }

    #[test]
    fn setup_errors() {
        let no_imbibition = HysteresisTables {
            wetting_non_wetting: Some(PhasePairTables {
                drainage: table("pcd", &[0.2, 0.9], &[5.0, 0.0]),
                imbibition: None,
            }),
            ..Default::default()
        };
        assert!(matches!(
            CapillaryPressureHysteresis::new("pc", &WATER_OIL, &no_imbibition, HysteresisParameters::default(), 1),
            Err(HysteresisError::NoHysteresis { .. })
        ));

        assert!(matches!(
            CapillaryPressureHysteresis::new("pc", &THREE_PHASE, &water_oil_tables(), HysteresisParameters::default(), 1),
            Err(HysteresisError::MissingTable { .. })
        ));

        assert!(matches!(
            CapillaryPressureHysteresis::new("pc", &[PhaseType::Water], &water_oil_tables(), HysteresisParameters::default(), 1),
            Err(HysteresisError::InvalidPhases { .. })
        ));

        let four_phases = [PhaseType::Water, PhaseType::Oil, PhaseType::Gas, PhaseType::Oil];
        assert!(matches!(
            CapillaryPressureHysteresis::new("pc", &four_phases, &three_phase_tables(), HysteresisParameters::default(), 1),
            Err(HysteresisError::InvalidPhases { details, .. }) if details.contains("2 to 3 phases")
        ));

        // gas capillary pressure must increase with the gas volume fraction
        assert!(matches!(
            CapillaryPressureHysteresis::new("pc", &OIL_GAS, &water_oil_tables(), HysteresisParameters::default(), 1),
            Err(HysteresisError::Table(TableError::WrongMonotonicity { .. }))
        ));
    }

    #[test]
    fn invalid_scanning_parameters_are_rejected() {
        for curvature in [0.0, -1.0, f64::NAN] {
            let parameters = HysteresisParameters {
                killough: KilloughHysteresis {
                    curvature,
                    ..Default::default()
                },
                ..Default::default()
            };
            assert!(matches!(
                CapillaryPressureHysteresis::new("pc", &WATER_OIL, &water_oil_tables(), parameters, 1),
                Err(HysteresisError::InvalidParameter { requirement: "positive", .. })
            ));
        }

        let parameters = HysteresisParameters {
            flow_reversal_buffer: -1e-6,
            ..Default::default()
        };
        assert!(matches!(
            CapillaryPressureHysteresis::new("pc", &WATER_OIL, &water_oil_tables(), parameters, 1),
            Err(HysteresisError::InvalidParameter { requirement: "non-negative", .. })
        ));

        let zero_buffer = HysteresisParameters {
            flow_reversal_buffer: 0.0,
            ..Default::default()
        };
        assert!(CapillaryPressureHysteresis::new("pc", &WATER_OIL, &water_oil_tables(), zero_buffer, 1).is_ok());
    }

    #[test]
    fn pure_branch_evaluation_in_scanning_mode() {
        let pc = model(&WATER_OIL, &water_oil_tables(), 1);
        let kernel = pc.create_kernel_wrapper();
        let pair = &pc.setup.pairs[0];

        assert!(matches!(
            kernel.bounding_cap_pressure(pair, HysteresisMode::DrainageToImbibition, 0.5),
            Err(HysteresisError::ModeMismatch { evaluation: "bounding", .. })
        ));

        let history = PhaseHistory {
            vol_fraction: &[0.5, 0.5],
            min_historical: &[0.4, 0.5],
            max_historical: &[0.5, 0.6],
        };
        assert!(matches!(
            kernel.scanning_cap_pressure(pair, &history, HysteresisMode::Imbibition),
            Err(HysteresisError::ModeMismatch { evaluation: "scanning", .. })
        ));
    }

    #[test]
    fn mode_transitions() {
        use HysteresisMode::*;
        let eps = 1e-3;

        // wetting phase
        assert_eq!(next_mode(Drainage, false, 0.4, 0.4, 0.6, eps), Drainage);
        assert_eq!(next_mode(Drainage, false, 0.402, 0.4, 0.6, eps), DrainageToImbibition);
        assert_eq!(next_mode(DrainageToImbibition, false, 0.4005, 0.4, 0.6, eps), Drainage);
        assert_eq!(next_mode(Imbibition, false, 0.5995, 0.4, 0.6, eps), Imbibition);
        assert_eq!(next_mode(Imbibition, false, 0.55, 0.4, 0.6, eps), ImbibitionToDrainage);
        assert_eq!(next_mode(ImbibitionToDrainage, false, 0.6, 0.4, 0.6, eps), Imbibition);

        // non-wetting phase
        assert_eq!(next_mode(Drainage, true, 0.55, 0.4, 0.6, eps), DrainageToImbibition);
        assert_eq!(next_mode(DrainageToImbibition, true, 0.5999, 0.4, 0.6, eps), Drainage);
        assert_eq!(next_mode(Imbibition, true, 0.45, 0.4, 0.6, eps), ImbibitionToDrainage);
        assert_eq!(next_mode(ImbibitionToDrainage, true, 0.4, 0.4, 0.6, eps), Imbibition);

        // an untouched state stays on its bounding curve
        assert_eq!(next_mode(Drainage, false, 0.7, 1.0, 0.0, eps), Drainage);
        assert_eq!(next_mode(Drainage, true, 0.7, 1.0, 0.0, eps), Drainage);
    }

    #[test]
    fn mode_codes() {
        assert_eq!(HysteresisMode::try_from(3).unwrap(), HysteresisMode::ImbibitionToDrainage);
        assert!(matches!(HysteresisMode::try_from(4), Err(HysteresisError::UnknownMode(4))));
        assert_eq!(HysteresisMode::DrainageToImbibition as i32, 2);
    }

    #[test]
    fn input_sizes_are_checked() {
        let mut pc = model(&WATER_OIL, &water_oil_tables(), 2);
        assert!(matches!(
            pc.update(&[0.5, 0.5]),
            Err(HysteresisError::InputSize { expected: 4, found: 2 })
        ));
        assert!(pc.save_converged_state(&[0.5; 3]).is_err());
        assert!(pc.restore_state(HysteresisState::new(3, 2, HysteresisMode::Drainage)).is_err());
    }

    #[test]
    fn table_replacement_rebuilds_the_curves() {
        let mut pc = model(&WATER_OIL, &water_oil_tables(), 1);

        let mut tables = water_oil_tables();
        tables.wetting_non_wetting.as_mut().unwrap().imbibition =
            Some(table("pci", &[0.2, 0.5, 0.8], &[3.0, 0.4, 0.0]));
        pc.replace_tables(&tables).unwrap();

        assert_eq!(pc.wetting_curve().imbibition_extremum.vol_fraction, 0.8);
        assert_relative_eq!(pc.land_parameters()[0], 6.0, epsilon = 1e-9);
    }
}
