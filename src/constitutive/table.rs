use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("table '{name}' needs at least 2 points (found {found})")]
    TooFewPoints { name: String, found: usize },
    #[error("table '{name}' has {coordinates} coordinates but {values} values")]
    LengthMismatch {
        name: String,
        coordinates: usize,
        values: usize,
    },
    #[error("table '{name}': coordinates must be strictly increasing ({previous} is followed by {current})")]
    NonIncreasingCoordinates {
        name: String,
        previous: f64,
        current: f64,
    },
    #[error("table '{name}': phase volume fraction {value} lies outside of [0, 1]")]
    VolumeFractionOutOfRange { name: String, value: f64 },
    #[error("table '{name}': capillary pressure must be {expected} ({previous} is followed by {current} at a volume fraction of {at})")]
    WrongMonotonicity {
        name: String,
        expected: &'static str,
        previous: f64,
        current: f64,
        at: f64,
    },
}

/// Piecewise-linear function of one variable.
///
/// Outside of its coordinate range the function is extended with its end values (and a zero
/// derivative).
#[derive(Clone, Debug, PartialEq)]
pub struct TableFunction {
    name: String,
    coordinates: Vec<f64>,
    values: Vec<f64>,
}

impl TableFunction {
    pub fn new(
        name: impl Into<String>,
        coordinates: Vec<f64>,
        values: Vec<f64>,
    ) -> Result<Self, TableError> {
        let name = name.into();

        if coordinates.len() != values.len() {
            return Err(TableError::LengthMismatch {
                name,
                coordinates: coordinates.len(),
                values: values.len(),
            });
        }
        if coordinates.len() < 2 {
            return Err(TableError::TooFewPoints {
                name,
                found: coordinates.len(),
            });
        }
        if let Some(w) = coordinates.windows(2).find(|w| w[1] <= w[0]) {
            return Err(TableError::NonIncreasingCoordinates {
                name,
                previous: w[0],
                current: w[1],
            });
        }

        Ok(Self {
            name,
            coordinates,
            values,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coordinates(&self) -> &[f64] {
        &self.coordinates
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Value and derivative at `x`
    pub fn compute(&self, x: f64) -> (f64, f64) {
        let n = self.coordinates.len();

        if x < self.coordinates[0] {
            return (self.values[0], 0.0);
        }
        if x > self.coordinates[n - 1] {
            return (self.values[n - 1], 0.0);
        }

        let i = (self.coordinates.partition_point(|&c| c <= x) - 1).min(n - 2);
        let slope = (self.values[i + 1] - self.values[i])
            / (self.coordinates[i + 1] - self.coordinates[i]);

        (self.values[i] + slope * (x - self.coordinates[i]), slope)
    }

    pub fn value(&self, x: f64) -> f64 {
        self.compute(x).0
    }
}

/// End points of a capillary pressure table
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CapillaryPressureEndpoints {
    pub phase_min_vol_fraction: f64,
    pub phase_max_vol_fraction: f64,
    pub min_cap_pressure: f64,
    pub max_cap_pressure: f64,
}

/// Check that a table maps phase volume fractions to a monotone capillary pressure, and report its end points.
///
/// Tables of the gas phase must be increasing, tables of the water phase decreasing.
pub fn validate_capillary_pressure_table(
    table: &TableFunction,
    cap_pressure_must_be_increasing: bool,
) -> Result<CapillaryPressureEndpoints, TableError> {
    let coords = table.coordinates();
    let values = table.values();

    if let Some(&value) = coords.iter().find(|&&c| !(0.0..=1.0).contains(&c)) {
        return Err(TableError::VolumeFractionOutOfRange {
            name: table.name().to_string(),
            value,
        });
    }

    for i in 1..values.len() {
        let wrong_way = if cap_pressure_must_be_increasing {
            values[i] < values[i - 1]
        } else {
            values[i] > values[i - 1]
        };

        if wrong_way {
            return Err(TableError::WrongMonotonicity {
                name: table.name().to_string(),
                expected: if cap_pressure_must_be_increasing {
                    "increasing"
                } else {
                    "decreasing"
                },
                previous: values[i - 1],
                current: values[i],
                at: coords[i],
            });
        }
    }

    let n = values.len();
    let (min_cap_pressure, max_cap_pressure) = if cap_pressure_must_be_increasing {
        (values[0], values[n - 1])
    } else {
        (values[n - 1], values[0])
    };

    Ok(CapillaryPressureEndpoints {
        phase_min_vol_fraction: coords[0],
        phase_max_vol_fraction: coords[n - 1],
        min_cap_pressure,
        max_cap_pressure,
    })
}
