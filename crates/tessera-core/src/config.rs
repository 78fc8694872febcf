//! Configuration types for the simulation.

use crate::{Error, Position, Result, StateMatrix};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Channel count used when `n_var` is not given
pub const DEFAULT_N_VAR: usize = 4;

/// How the initial position set is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum LatticeMode {
    /// Row-offset lattice, odd rows shifted by half a spacing, jittered
    Honeycomb,
    /// Uniform draws in a box of `grid_shape * spacing`
    Random,
    /// Axis-aligned lattice without jitter
    Regular,
    /// Caller-provided positions, used verbatim
    Custom,
    /// Positions parsed from a table by an external importer
    Import,
}

impl FromStr for LatticeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "honeycomb" => Ok(LatticeMode::Honeycomb),
            "random" => Ok(LatticeMode::Random),
            "regular" => Ok(LatticeMode::Regular),
            "custom" => Ok(LatticeMode::Custom),
            "import" => Ok(LatticeMode::Import),
            other => Err(Error::InvalidMode(format!("unknown lattice mode '{}'", other))),
        }
    }
}

impl TryFrom<String> for LatticeMode {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for LatticeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LatticeMode::Honeycomb => "honeycomb",
            LatticeMode::Random => "random",
            LatticeMode::Regular => "regular",
            LatticeMode::Custom => "custom",
            LatticeMode::Import => "import",
        };
        f.write_str(name)
    }
}

/// Target selection for division and death
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum SelectionMode {
    /// Largest polygon divides, smallest polygons die
    Area,
    /// Uniformly random inner cells
    Random,
}

impl FromStr for SelectionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "area" => Ok(SelectionMode::Area),
            "random" => Ok(SelectionMode::Random),
            other => Err(Error::InvalidMode(format!(
                "selection mode must be 'area' or 'random', got '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for SelectionMode {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionMode::Area => write!(f, "area"),
            SelectionMode::Random => write!(f, "random"),
        }
    }
}

/// Steps at which a topology event fires
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "ScheduleRepr", into = "ScheduleRepr")]
pub enum Schedule {
    #[default]
    Never,
    All,
    Steps(BTreeSet<usize>),
}

impl Schedule {
    pub fn steps<I: IntoIterator<Item = usize>>(steps: I) -> Self {
        Schedule::Steps(steps.into_iter().collect())
    }

    pub fn contains(&self, step: usize) -> bool {
        match self {
            Schedule::Never => false,
            Schedule::All => true,
            Schedule::Steps(steps) => steps.contains(&step),
        }
    }
}

/// Wire form: the literal `"all"` / `"never"`, or a list of step indices
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ScheduleRepr {
    Keyword(String),
    Steps(Vec<usize>),
}

impl TryFrom<ScheduleRepr> for Schedule {
    type Error = Error;

    fn try_from(repr: ScheduleRepr) -> Result<Self> {
        match repr {
            ScheduleRepr::Keyword(k) if k == "all" => Ok(Schedule::All),
            ScheduleRepr::Keyword(k) if k == "never" => Ok(Schedule::Never),
            ScheduleRepr::Keyword(k) => {
                Err(Error::InvalidMode(format!("unknown schedule '{}'", k)))
            }
            ScheduleRepr::Steps(steps) => Ok(Schedule::steps(steps)),
        }
    }
}

impl From<Schedule> for ScheduleRepr {
    fn from(schedule: Schedule) -> Self {
        match schedule {
            Schedule::Never => ScheduleRepr::Keyword("never".to_string()),
            Schedule::All => ScheduleRepr::Keyword("all".to_string()),
            Schedule::Steps(steps) => ScheduleRepr::Steps(steps.into_iter().collect()),
        }
    }
}

/// Parameter mapping handed to the derivative function.
///
/// `dT` is the only key the core itself consumes; everything else is a rate
/// constant read by the derivative implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Integration step size
    #[serde(rename = "dT")]
    pub dt: f64,
    /// Channel count for generated initial state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_var: Option<usize>,
    /// Channel display names, only used by export consumers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// Spread of the generated initial state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigma: Option<f64>,
    /// Named rate constants
    #[serde(flatten)]
    pub rates: BTreeMap<String, f64>,
}

impl Default for ModelParams {
    fn default() -> Self {
        let rates = [
            ("nu", 1.0),
            ("betaD", 50.0),
            ("betaR", 50.0),
            ("h", 3.0),
            ("m", 3.0),
            ("sDtv3_ratio", 0.0),
            ("sDtv4_ratio", 0.0),
            ("Ktv3_Dgr", 0.4),
            ("Ktv4_Dgr", 0.5),
            ("Ktv3_inhib", 0.15),
            ("Ktv4_inhib", 0.3),
            ("sigma_diff_sD3", 2.5),
            ("sigma_diff_sD4", 4.0),
            ("LI_off_Dgr", 1.0),
            ("Dgr_Noise", 0.01),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            dt: 1.0 / 20.0,
            n_var: Some(DEFAULT_N_VAR),
            labels: ["Delta", "Ractor", "sD_tv3", "sD_tv4"]
                .into_iter()
                .map(String::from)
                .collect(),
            sigma: None,
            rates,
        }
    }
}

impl ModelParams {
    /// Parameters with only a step size and no rate constants
    pub fn with_dt(dt: f64) -> Self {
        Self {
            dt,
            n_var: None,
            labels: Vec::new(),
            sigma: None,
            rates: BTreeMap::new(),
        }
    }

    pub fn n_var(&self) -> usize {
        self.n_var.unwrap_or(DEFAULT_N_VAR)
    }

    pub fn spread(&self) -> f64 {
        self.sigma.unwrap_or(0.0)
    }

    /// Required rate constant
    pub fn get(&self, name: &str) -> Result<f64> {
        self.rates
            .get(name)
            .copied()
            .ok_or_else(|| Error::MissingInput(format!("rate constant '{}'", name)))
    }

    pub fn get_or(&self, name: &str, default: f64) -> f64 {
        self.rates.get(name).copied().unwrap_or(default)
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.rates.insert(name.to_string(), value);
    }

    pub fn validate(&self) -> Result<()> {
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(Error::Config(format!("dT must be positive, got {}", self.dt)));
        }
        if self.n_var == Some(0) {
            return Err(Error::Config("n_var must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Initial population layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    pub mode: LatticeMode,
    /// Lattice columns and rows
    pub grid_shape: (usize, usize),
    /// Cell spacing, also the length unit for division offsets and noise
    pub spacing: f64,
    /// Honeycomb jitter as a fraction of spacing
    pub jitter: f64,
    /// Payload for custom and import modes
    pub positions: Option<Vec<Position>>,
    pub seed: u64,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            mode: LatticeMode::Honeycomb,
            grid_shape: (10, 10),
            spacing: 1.0,
            jitter: 0.0,
            positions: None,
            seed: 0,
        }
    }
}

impl PopulationConfig {
    pub fn regular(columns: usize, rows: usize, spacing: f64) -> Self {
        Self {
            mode: LatticeMode::Regular,
            grid_shape: (columns, rows),
            spacing,
            ..Default::default()
        }
    }

    pub fn honeycomb(columns: usize, rows: usize, jitter: f64, seed: u64) -> Self {
        Self {
            mode: LatticeMode::Honeycomb,
            grid_shape: (columns, rows),
            jitter,
            seed,
            ..Default::default()
        }
    }

    pub fn custom(positions: Vec<Position>) -> Self {
        Self {
            mode: LatticeMode::Custom,
            positions: Some(positions),
            ..Default::default()
        }
    }
}

/// One link of the movement chain: a registered rule and an optional
/// strength in place of the rule's default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
}

impl MovementSpec {
    pub fn new(name: &str, strength: Option<f64>) -> Self {
        Self {
            name: name.to_string(),
            strength,
        }
    }
}

/// One simulation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Simulated time span
    pub duration: f64,
    pub proliferation: Schedule,
    pub apoptosis: Schedule,
    pub proliferation_batch: usize,
    pub apoptosis_batch: usize,
    pub proliferation_mode: SelectionMode,
    pub apoptosis_mode: SelectionMode,
    /// Registered derivative function name
    pub derivative: String,
    /// Registered movement rules, applied in order after each recorded step
    pub movement: Vec<MovementSpec>,
    /// Movement noise as a fraction of spacing
    pub random_strength: f64,
    pub seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration: 10.0,
            proliferation: Schedule::Never,
            apoptosis: Schedule::Never,
            proliferation_batch: 5,
            apoptosis_batch: 3,
            proliferation_mode: SelectionMode::Area,
            apoptosis_mode: SelectionMode::Area,
            derivative: "lateral_inhibition".to_string(),
            movement: Vec::new(),
            random_strength: 0.0,
            seed: 0,
        }
    }
}

/// Grid of perturbed-parameter runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// (run axis, tuning axis)
    pub grid_shape: (usize, usize),
    pub duration: f64,
    /// Rate constants perturbed per grid cell
    pub perturbed: Vec<String>,
    pub population: PopulationConfig,
    /// Explicit starting state; generated from the params when absent
    pub initial_state: Option<StateMatrix>,
    pub derivative: String,
    pub seed: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            grid_shape: (10, 10),
            duration: 10.0,
            perturbed: ["betaDa", "betaDb", "betaAb", "betaAr", "betaBr"]
                .into_iter()
                .map(String::from)
                .collect(),
            population: PopulationConfig::default(),
            initial_state: None,
            derivative: "lateral_inhibition".to_string(),
            seed: 0,
        }
    }
}

/// Everything the headless runner reads from a run file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub params: ModelParams,
    pub population: PopulationConfig,
    pub run: RunConfig,
    pub sweep: SweepConfig,
    /// Explicit starting state for `run`
    pub initial_state: Option<StateMatrix>,
}

/// String-valued mode fields of a run file, as JSON pointers
const LATTICE_MODE_FIELDS: &[&str] = &["/population/mode", "/sweep/population/mode"];
const SELECTION_MODE_FIELDS: &[&str] = &["/run/proliferation_mode", "/run/apoptosis_mode"];
const SCHEDULE_FIELDS: &[&str] = &["/run/proliferation", "/run/apoptosis"];

impl ExperimentConfig {
    /// Parse and validate a run file. Unknown modes and schedule keywords
    /// fail with `InvalidMode`, not as a generic serialization error.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        check_modes(&value)?;
        let config: Self = serde_json::from_value(value)?;
        config.params.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        debug!(path = %path.display(), "Loaded experiment config");
        Ok(config)
    }
}

fn check_modes(value: &serde_json::Value) -> Result<()> {
    let strings = |fields: &'static [&'static str]| {
        fields
            .iter()
            .filter_map(|pointer| value.pointer(pointer).and_then(serde_json::Value::as_str))
    };
    for mode in strings(LATTICE_MODE_FIELDS) {
        mode.parse::<LatticeMode>()?;
    }
    for mode in strings(SELECTION_MODE_FIELDS) {
        mode.parse::<SelectionMode>()?;
    }
    for keyword in strings(SCHEDULE_FIELDS) {
        Schedule::try_from(ScheduleRepr::Keyword(keyword.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs() {
        let params = ModelParams::default();
        assert_eq!(params.dt, 0.05);
        assert_eq!(params.n_var(), 4);
        assert_eq!(params.get("betaD").unwrap(), 50.0);

        let population = PopulationConfig::default();
        assert_eq!(population.mode, LatticeMode::Honeycomb);
        assert_eq!(population.grid_shape, (10, 10));

        let run = RunConfig::default();
        assert_eq!(run.proliferation_batch, 5);
        assert_eq!(run.apoptosis_batch, 3);

        let sweep = SweepConfig::default();
        assert_eq!(sweep.perturbed.len(), 5);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("regular".parse::<LatticeMode>().unwrap(), LatticeMode::Regular);
        assert!(matches!(
            "hexagonal".parse::<LatticeMode>(),
            Err(Error::InvalidMode(_))
        ));
        assert_eq!("random".parse::<SelectionMode>().unwrap(), SelectionMode::Random);
        assert!("largest".parse::<SelectionMode>().is_err());
    }

    #[test]
    fn test_params_json_keys() {
        let json = r#"{"dT": 0.1, "n_var": 2, "labels": ["a", "b"], "k_on": 3.5}"#;
        let params: ModelParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.dt, 0.1);
        assert_eq!(params.n_var(), 2);
        assert_eq!(params.get("k_on").unwrap(), 3.5);
        assert!(matches!(params.get("k_off"), Err(Error::MissingInput(_))));

        let missing_dt = r#"{"k_on": 3.5}"#;
        assert!(serde_json::from_str::<ModelParams>(missing_dt).is_err());
    }

    #[test]
    fn test_schedule_serialization() {
        let all: Schedule = serde_json::from_str(r#""all""#).unwrap();
        assert!(all.contains(123));

        let some: Schedule = serde_json::from_str("[5, 9]").unwrap();
        assert!(some.contains(5));
        assert!(!some.contains(6));

        let json = serde_json::to_string(&Schedule::steps([3, 1])).unwrap();
        assert_eq!(json, "[1,3]");

        assert!(serde_json::from_str::<Schedule>(r#""sometimes""#).is_err());
    }

    #[test]
    fn test_experiment_rejects_bad_dt() {
        let json = r#"{"params": {"dT": 0.0}}"#;
        assert!(matches!(
            ExperimentConfig::from_json(json),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_unknown_modes_in_run_file_are_invalid_mode() {
        let lattice = r#"{"population": {"mode": "hexagonal"}}"#;
        assert!(matches!(
            ExperimentConfig::from_json(lattice),
            Err(Error::InvalidMode(_))
        ));

        let selection = r#"{"run": {"apoptosis_mode": "largest"}}"#;
        assert!(matches!(
            ExperimentConfig::from_json(selection),
            Err(Error::InvalidMode(_))
        ));

        let schedule = r#"{"run": {"proliferation": "sometimes"}}"#;
        assert!(matches!(
            ExperimentConfig::from_json(schedule),
            Err(Error::InvalidMode(_))
        ));

        let nested = r#"{"sweep": {"population": {"mode": "grid"}}}"#;
        assert!(matches!(
            ExperimentConfig::from_json(nested),
            Err(Error::InvalidMode(_))
        ));
    }

    #[test]
    fn test_modes_deserialize_through_from_str() {
        let mode: LatticeMode = serde_json::from_str(r#""regular""#).unwrap();
        assert_eq!(mode, LatticeMode::Regular);
        assert_eq!(serde_json::to_string(&mode).unwrap(), r#""regular""#);
        assert_eq!(LatticeMode::Honeycomb.to_string(), "honeycomb");

        let err = serde_json::from_str::<SelectionMode>(r#""largest""#).unwrap_err();
        assert!(err.to_string().contains("selection mode must be"));
    }

    #[test]
    fn test_movement_chain_in_run_file() {
        let json = r#"{"run": {"movement": [
            {"name": "move_away_from_center", "strength": 0.3},
            {"name": "repulsion"}
        ]}}"#;
        let config = ExperimentConfig::from_json(json).unwrap();
        assert_eq!(
            config.run.movement,
            vec![
                MovementSpec::new("move_away_from_center", Some(0.3)),
                MovementSpec::new("repulsion", None),
            ]
        );
        assert!(RunConfig::default().movement.is_empty());
    }
}
