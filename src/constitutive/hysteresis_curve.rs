#[cfg(feature = "json_export")]
use json::{object, JsonValue};

/// Lower bound on the spread between imbibition and drainage end points in the Land coefficient
pub const MIN_SCRI_MINUS_SCRD: f64 = 1e-9;

/// Default Jerauld `a` parameter
pub const DEFAULT_JERAULD_A: f64 = 0.1;

/// Default Jerauld `b` parameter
pub const DEFAULT_JERAULD_B: f64 = 0.0;

/// Default Killough curvature parameter of the capillary pressure scanning curves
pub const DEFAULT_KILLOUGH_CURVATURE: f64 = 1.0;

/// A volume fraction on a bounding curve, and the capillary pressure there
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CurvePoint {
    pub vol_fraction: f64,
    pub cap_pressure: f64,
}

impl CurvePoint {
    pub const fn new(vol_fraction: f64, cap_pressure: f64) -> Self {
        Self {
            vol_fraction,
            cap_pressure,
        }
    }
}

/// End points of the drainage and imbibition bounding curves of one phase.
///
/// For the wetting phase:
/// * `opposite_bound` is the connate (minimum) volume fraction
/// * `drainage_extremum` is the maximum volume fraction of the drainage curve
/// * `imbibition_extremum` is the maximum volume fraction of the imbibition curve
///
/// For the non-wetting phase:
/// * `opposite_bound` is the maximum volume fraction
/// * `drainage_extremum` is the critical volume fraction of the drainage curve
/// * `imbibition_extremum` is the trapped (critical) volume fraction of the imbibition curve
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HysteresisCurve {
    pub opposite_bound: CurvePoint,
    pub imbibition_extremum: CurvePoint,
    pub drainage_extremum: CurvePoint,
}

impl HysteresisCurve {
    pub fn new(
        opposite_bound: CurvePoint,
        imbibition_extremum: CurvePoint,
        drainage_extremum: CurvePoint,
    ) -> Self {
        Self {
            opposite_bound,
            imbibition_extremum,
            drainage_extremum,
        }
    }

    pub fn is_wetting(&self) -> bool {
        self.opposite_bound.vol_fraction < self.drainage_extremum.vol_fraction
    }

    /// The same end points seen from the complementary phase of a two-phase system
    pub fn complement(&self) -> Self {
        let flip = |p: CurvePoint| CurvePoint::new(1.0 - p.vol_fraction, p.cap_pressure);
        Self {
            opposite_bound: flip(self.opposite_bound),
            imbibition_extremum: flip(self.imbibition_extremum),
            drainage_extremum: flip(self.drainage_extremum),
        }
    }

    /// Clamp a volume fraction into the range spanned by the opposite bound and the drainage extremum
    pub fn clamp(&self, vol_fraction: f64) -> f64 {
        let a = self.opposite_bound.vol_fraction;
        let b = self.drainage_extremum.vol_fraction;
        vol_fraction.clamp(a.min(b), a.max(b))
    }

    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        let point = |p: &CurvePoint| {
            object! {
                "vol_fraction": p.vol_fraction,
                "cap_pressure": p.cap_pressure,
            }
        };

        object! {
            "opposite_bound": point(&self.opposite_bound),
            "imbibition_extremum": point(&self.imbibition_extremum),
            "drainage_extremum": point(&self.drainage_extremum),
        }
    }
}

/// Land trapping model with Jerauld's correction, and Killough's scanning curve weights.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KilloughHysteresis {
    pub jerauld_a: f64,
    pub jerauld_b: f64,
    /// `E` in the scanning curve weight; larger values flatten the scanning curves
    pub curvature: f64,
}

impl Default for KilloughHysteresis {
    fn default() -> Self {
        Self {
            jerauld_a: DEFAULT_JERAULD_A,
            jerauld_b: DEFAULT_JERAULD_B,
            curvature: DEFAULT_KILLOUGH_CURVATURE,
        }
    }
}

impl KilloughHysteresis {
    /// Land coefficient of a bounding curve pair, or `None` if the imbibition curve crosses the drainage curve
    pub fn land_coefficient(curve: &HysteresisCurve) -> Option<f64> {
        let s_opp = curve.opposite_bound.vol_fraction;
        let s_d = curve.drainage_extremum.vol_fraction;
        let s_i = curve.imbibition_extremum.vol_fraction;

        if curve.is_wetting() {
            if s_i > s_d {
                return None;
            }
            Some((s_d - s_opp) / MIN_SCRI_MINUS_SCRD.max(s_d - s_i) - 1.0)
        } else {
            if s_d > s_i {
                return None;
            }
            Some((s_opp - s_d) / MIN_SCRI_MINUS_SCRD.max(s_i - s_d) - 1.0)
        }
    }

    /// Critical volume fraction reached when reversing from the historical extremum `shy`.
    ///
    /// ```text
    /// Scrt = Sd + (Shy - Sd) / (A + C ((So - Sd) / (Shy - Sd))^(1 + b/C))
    /// A    = 1 + a |Shy - Sd|
    /// ```
    /// with `So` the opposite bound, `Sd` the drainage extremum, and `C` the Land coefficient.
    /// For the non-wetting phase this is Land's trapped saturation (`Shy = So` yields the
    /// imbibition extremum when `a = 0`); for the wetting phase it is the largest volume fraction
    /// an imbibition from `Shy` can reach.
    pub fn trapped_critical_vol_fraction(&self, curve: &HysteresisCurve, shy: f64, land: f64) -> f64 {
        let s_opp = curve.opposite_bound.vol_fraction;
        let s_d = curve.drainage_extremum.vol_fraction;
        let shy = curve.clamp(shy);

        let delta = shy - s_d;
        if delta.abs() <= f64::EPSILON {
            return s_d.max(0.0);
        }

        let a = 1.0 + self.jerauld_a * delta.abs();
        let trapping = if land > 0.0 {
            land * ((s_opp - s_d) / delta).powf(1.0 + self.jerauld_b / land)
        } else {
            0.0
        };

        (s_d + delta / (a + trapping)).max(0.0)
    }

    /// Weight `F` of the imbibition curve along a scanning curve leaving `shy` toward `s_end`, and `dF/dS`.
    ///
    /// ```text
    /// F = (1/(d + E) - 1/E) / (1/(d_end + E) - 1/E),   d = |S - Shy|, d_end = |S_end - Shy|
    /// ```
    /// clamped to [0, 1]; the derivative is zero wherever the clamp is active.
    pub fn scanning_weight(&self, s: f64, shy: f64, s_end: f64) -> (f64, f64) {
        let e = self.curvature;
        let dir = if s_end >= shy { 1.0 } else { -1.0 };

        let d = dir * (s - shy);
        let d_end = dir * (s_end - shy);

        if d <= 0.0 {
            return (0.0, 0.0);
        }
        if d >= d_end {
            return (1.0, 0.0);
        }

        let denom = 1.0 / (d_end + e) - 1.0 / e;
        let f = (1.0 / (d + e) - 1.0 / e) / denom;
        let df_ds = dir * (-1.0 / ((d + e) * (d + e))) / denom;

        if f >= 1.0 {
            (1.0, 0.0)
        } else {
            (f, df_ds)
        }
    }
}
