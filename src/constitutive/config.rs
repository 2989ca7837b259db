use super::cap_pressure::{
    CapillaryPressureHysteresis, HysteresisError, HysteresisMode, HysteresisParameters,
    HysteresisTables, PhasePairTables, DEFAULT_FLOW_REVERSAL_BUFFER,
};
use super::hysteresis_curve::{
    KilloughHysteresis, DEFAULT_JERAULD_A, DEFAULT_JERAULD_B, DEFAULT_KILLOUGH_CURVATURE,
};
use super::table::{TableError, TableFunction};
use super::PhaseType;

use json::JsonValue;
use std::collections::HashMap;
use std::fs::read_to_string;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read hysteresis configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse hysteresis configuration as JSON: {0}")]
    Json(#[from] json::Error),
    #[error("malformed hysteresis configuration: {0}")]
    Format(String),
    #[error("{key} refers to table '{table}', which is not defined under Tables")]
    UnknownTable { key: &'static str, table: String },
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Hysteresis(#[from] HysteresisError),
}

const TWO_PHASE_KEYS: [&str; 2] = [
    "drainageWettingNonWettingCapPresTableName",
    "imbibitionWettingNonWettingCapPresTableName",
];
const WETTING_INTERMEDIATE_KEYS: [&str; 2] = [
    "drainageWettingIntermediateCapPresTableName",
    "imbibitionWettingIntermediateCapPresTableName",
];
const NON_WETTING_INTERMEDIATE_KEYS: [&str; 2] = [
    "drainageNonWettingIntermediateCapPresTableName",
    "imbibitionNonWettingIntermediateCapPresTableName",
];

/// Everything needed to build a [`CapillaryPressureHysteresis`], with table names already
/// resolved to table handles
#[derive(Clone, Debug)]
pub struct HysteresisConfig {
    pub name: String,
    pub phases: Vec<PhaseType>,
    pub tables: HysteresisTables,
    pub parameters: HysteresisParameters,
}

impl HysteresisConfig {
    /// Read a configuration from a JSON file with the following format
    ///
    /// pc.json
    /// ```JSON
    /// {
    ///     "name": "waterOilPc",
    ///     "phaseNames": ["water", "oil"],
    ///     "Tables": {
    ///         "drainagePc": { "coordinates": [0.2, 0.5, 0.9], "values": [5.0, 1.5, 0.0] },
    ///         "imbibitionPc": { "coordinates": [0.2, 0.5, 0.7], "values": [3.0, 0.4, 0.0] }
    ///     },
    ///     "drainageWettingNonWettingCapPresTableName": "drainagePc",
    ///     "imbibitionWettingNonWettingCapPresTableName": "imbibitionPc",
    ///     "jerauldParameterA": 0.1,
    ///     "jerauldParameterB": 0.0,
    ///     "killoughCurvatureParameterPc": 1.0,
    ///     "flowReversalBuffer": 1e-10
    /// }
    /// ```
    ///
    /// Three-phase models use the `...WettingIntermediate...` and `...NonWettingIntermediate...`
    /// table names instead, and may set `intermediateMinVolFraction`. The scalar parameters and
    /// `initialMode` (`"drainage"` or `"imbibition"`) are optional.
    pub fn from_file(path: impl AsRef<str>) -> Result<Self, ConfigError> {
        let contents = read_to_string(path.as_ref())?;
        let config = Self::from_json(&json::parse(&contents)?)?;

        log::debug!(
            "Read hysteresis configuration '{}' from '{}'",
            config.name,
            path.as_ref()
        );

        Ok(config)
    }

    pub fn from_json(config_json: &JsonValue) -> Result<Self, ConfigError> {
        let name = config_json["name"]
            .as_str()
            .unwrap_or("capPressureHysteresis")
            .to_string();

        let phases = parse_phases(config_json)?;
        let table_functions = parse_tables(config_json)?;

        let tables = HysteresisTables {
            wetting_non_wetting: resolve_pair(config_json, &table_functions, TWO_PHASE_KEYS)?,
            wetting_intermediate: resolve_pair(
                config_json,
                &table_functions,
                WETTING_INTERMEDIATE_KEYS,
            )?,
            non_wetting_intermediate: resolve_pair(
                config_json,
                &table_functions,
                NON_WETTING_INTERMEDIATE_KEYS,
            )?,
        };

        let parameters = HysteresisParameters {
            killough: KilloughHysteresis {
                jerauld_a: optional_f64(config_json, "jerauldParameterA", DEFAULT_JERAULD_A)?,
                jerauld_b: optional_f64(config_json, "jerauldParameterB", DEFAULT_JERAULD_B)?,
                curvature: optional_f64(
                    config_json,
                    "killoughCurvatureParameterPc",
                    DEFAULT_KILLOUGH_CURVATURE,
                )?,
            },
            flow_reversal_buffer: optional_f64(
                config_json,
                "flowReversalBuffer",
                DEFAULT_FLOW_REVERSAL_BUFFER,
            )?,
            intermediate_min_vol_fraction: if config_json["intermediateMinVolFraction"].is_null() {
                None
            } else {
                Some(optional_f64(config_json, "intermediateMinVolFraction", 0.0)?)
            },
            initial_mode: parse_initial_mode(config_json)?,
        };

        Ok(Self {
            name,
            phases,
            tables,
            parameters,
        })
    }

    pub fn into_model(self, num_elements: usize) -> Result<CapillaryPressureHysteresis, ConfigError> {
        Ok(CapillaryPressureHysteresis::new(
            self.name,
            &self.phases,
            &self.tables,
            self.parameters,
            num_elements,
        )?)
    }
}

fn parse_phases(config_json: &JsonValue) -> Result<Vec<PhaseType>, ConfigError> {
    if !config_json["phaseNames"].is_array() {
        return Err(ConfigError::Format("phaseNames must be an Array".into()));
    }

    config_json["phaseNames"]
        .members()
        .map(|json_phase| {
            json_phase
                .as_str()
                .and_then(PhaseType::from_name)
                .ok_or_else(|| ConfigError::Format(format!("unknown phase name {}", json_phase)))
        })
        .collect()
}

fn parse_tables(config_json: &JsonValue) -> Result<HashMap<String, Arc<TableFunction>>, ConfigError> {
    if !config_json["Tables"].is_object() {
        return Err(ConfigError::Format("Tables must be an Object".into()));
    }

    config_json["Tables"]
        .entries()
        .map(|(name, json_table)| -> Result<_, ConfigError> {
            let coordinates = parse_f64_array(&json_table["coordinates"], name, "coordinates")?;
            let values = parse_f64_array(&json_table["values"], name, "values")?;
            Ok((
                name.to_string(),
                Arc::new(TableFunction::new(name, coordinates, values)?),
            ))
        })
        .collect()
}

fn parse_f64_array(json_array: &JsonValue, table: &str, field: &str) -> Result<Vec<f64>, ConfigError> {
    if !json_array.is_array() {
        return Err(ConfigError::Format(format!(
            "table '{}' must have an Array of {}",
            table, field
        )));
    }

    json_array
        .members()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                ConfigError::Format(format!("table '{}' has non-numerical {}", table, field))
            })
        })
        .collect()
}

fn resolve_pair(
    config_json: &JsonValue,
    table_functions: &HashMap<String, Arc<TableFunction>>,
    [drainage_key, imbibition_key]: [&'static str; 2],
) -> Result<Option<PhasePairTables>, ConfigError> {
    let lookup = |key: &'static str| -> Result<Option<Arc<TableFunction>>, ConfigError> {
        match config_json[key].as_str() {
            None | Some("") => Ok(None),
            Some(name) => table_functions
                .get(name)
                .map(|table| Some(Arc::clone(table)))
                .ok_or_else(|| ConfigError::UnknownTable {
                    key,
                    table: name.to_string(),
                }),
        }
    };

    match (lookup(drainage_key)?, lookup(imbibition_key)?) {
        (Some(drainage), imbibition) => Ok(Some(PhasePairTables {
            drainage,
            imbibition,
        })),
        (None, None) => Ok(None),
        (None, Some(_)) => Err(ConfigError::Format(format!(
            "{} is given without {}",
            imbibition_key, drainage_key
        ))),
    }
}

fn optional_f64(config_json: &JsonValue, key: &str, default: f64) -> Result<f64, ConfigError> {
    let value = &config_json[key];
    if value.is_null() {
        Ok(default)
    } else {
        value
            .as_f64()
            .ok_or_else(|| ConfigError::Format(format!("{} must be a number", key)))
    }
}

fn parse_initial_mode(config_json: &JsonValue) -> Result<HysteresisMode, ConfigError> {
    match config_json["initialMode"].as_str() {
        None => Ok(HysteresisMode::Drainage),
        Some("drainage") => Ok(HysteresisMode::Drainage),
        Some("imbibition") => Ok(HysteresisMode::Imbibition),
        Some(other) => Err(ConfigError::Format(format!(
            "initialMode must be 'drainage' or 'imbibition', found '{}'",
            other
        ))),
    }
}
