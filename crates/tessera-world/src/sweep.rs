//! Grid of independent perturbed-parameter runs reduced to scalar scores.

use crate::events::NullSink;
use crate::population::CellPopulation;
use crate::rules::{self, Derivative};
use crate::simulation::ReactionDiffusionStepper;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tessera_core::{
    channel_ratio_score, History, ModelParams, Result, RunConfig, ScoreGrid, SweepConfig,
};
use tracing::{debug, info, instrument};

/// Largest relative perturbation scale, reached at the end of the tuning axis
pub const TUNING_SPAN: f64 = 1.25;

/// Seed for grid cell (`run`, `tuning`); independent of evaluation order
pub fn cell_seed(seed: u64, run: usize, tuning: usize) -> u64 {
    let mut z = seed
        .wrapping_add((run as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add((tuning as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9));
    z = (z ^ (z >> 30)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Shift each named rate by `(u - 0.5) * value * fraction`, `u` uniform in [0, 1)
pub fn perturb<R: Rng + ?Sized>(
    base: &ModelParams,
    names: &[String],
    fraction: f64,
    rng: &mut R,
) -> Result<ModelParams> {
    let mut params = base.clone();
    for name in names {
        let value = params.get(name)?;
        let u: f64 = rng.gen();
        params.set(name, value + (u - 0.5) * value * fraction);
    }
    Ok(params)
}

/// Score of the last snapshot, NaN when there is none or it holds no cells
pub fn final_score(history: &History) -> Result<f64> {
    history.last().map_or(Ok(f64::NAN), channel_ratio_score)
}

#[derive(Debug, Clone)]
pub struct ParameterSweep {
    config: SweepConfig,
}

impl ParameterSweep {
    pub fn new(config: SweepConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Evaluate every grid cell in parallel. `make_derivative` builds a fresh
    /// derivative per cell from that cell's seed.
    #[instrument(skip_all, fields(grid = ?self.config.grid_shape))]
    pub fn run<F>(&self, base: &ModelParams, make_derivative: F) -> Result<ScoreGrid>
    where
        F: Fn(u64) -> Result<Box<dyn Derivative>> + Sync,
    {
        base.validate()?;
        let (runs, tunings) = self.config.grid_shape;
        info!(
            event = "sweep_started",
            runs = runs,
            tunings = tunings,
            "Starting sweep of {} runs",
            runs * tunings
        );

        let values = (0..runs * tunings)
            .into_par_iter()
            .map(|cell| self.run_cell(base, cell / tunings, cell % tunings, &make_derivative))
            .collect::<Result<Vec<f64>>>()?;

        info!(event = "sweep_finished", cells = values.len(), "Sweep finished");
        Ok(ScoreGrid::new(self.config.grid_shape, values))
    }

    /// Sweep with the derivative registered under the configured name
    pub fn run_registered(&self, base: &ModelParams) -> Result<ScoreGrid> {
        let name = self.config.derivative.clone();
        self.run(base, move |seed| rules::derivative(&name, seed))
    }

    /// One full simulation from a fresh population and state
    pub fn run_cell<F>(
        &self,
        base: &ModelParams,
        run: usize,
        tuning: usize,
        make_derivative: &F,
    ) -> Result<f64>
    where
        F: Fn(u64) -> Result<Box<dyn Derivative>>,
    {
        let (_, tunings) = self.config.grid_shape;
        let seed = cell_seed(self.config.seed, run, tuning);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let fraction = TUNING_SPAN * tuning as f64 / tunings as f64;
        let params = perturb(base, &self.config.perturbed, fraction, &mut rng)?;

        let mut population_config = self.config.population.clone();
        population_config.seed = seed;
        let population = CellPopulation::initialize(&population_config)?;

        let mut stepper = ReactionDiffusionStepper::new(population, params, make_derivative(seed)?)?;
        if let Some(state) = &self.config.initial_state {
            stepper = stepper.with_state(state.clone())?;
        }

        let run_config = RunConfig {
            duration: self.config.duration,
            ..Default::default()
        };
        let history = stepper.run_with_sink(&run_config, &mut NullSink)?;
        let score = final_score(&history)?;
        debug!(
            event = "sweep_cell",
            run = run,
            tuning = tuning,
            score = score,
            "Grid cell finished"
        );
        Ok(score)
    }
}
