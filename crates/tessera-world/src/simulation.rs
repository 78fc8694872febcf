//! Fixed-step explicit Euler integration over a changing population.

use crate::events::{EventSink, SimEvent, TracingSink};
use crate::population::CellPopulation;
use crate::rules::{self, Derivative, MovementRule};
use tessera_core::{
    Error, ExperimentConfig, History, ModelParams, Result, RunConfig, Snapshot, StateMatrix,
};
use tracing::{info, instrument};

/// Slack added before flooring `duration / dT`
const STEP_ROUNDING: f64 = 1.0e-9;

/// Snapshots recorded for a run of `duration` at step size `dt` (at least the initial one is always kept)
pub fn step_count(duration: f64, dt: f64) -> usize {
    let steps = (duration / dt + STEP_ROUNDING).floor();
    if steps.is_finite() && steps > 0.0 {
        steps as usize
    } else {
        0
    }
}

pub struct ReactionDiffusionStepper {
    population: CellPopulation,
    params: ModelParams,
    state: StateMatrix,
    derivative: Box<dyn Derivative>,
    movement: Option<Box<dyn MovementRule>>,
    random_strength: f64,
}

impl ReactionDiffusionStepper {
    /// Start from `population` with a generated state: `n_var` channels of
    /// normal draws scaled by the params' spread, all zero when no spread is set.
    pub fn new(
        mut population: CellPopulation,
        params: ModelParams,
        derivative: Box<dyn Derivative>,
    ) -> Result<Self> {
        params.validate()?;
        let state = StateMatrix::random_normal(
            population.len(),
            params.n_var(),
            params.spread(),
            population.rng_mut(),
        );
        Ok(Self {
            population,
            params,
            state,
            derivative,
            movement: None,
            random_strength: 0.0,
        })
    }

    /// Replace the generated state. Rows must match the cell count.
    pub fn with_state(mut self, state: StateMatrix) -> Result<Self> {
        if state.rows() != self.population.len() {
            return Err(Error::ShapeMismatch {
                expected: (self.population.len(), state.cols()),
                actual: state.shape(),
            });
        }
        self.state = state;
        Ok(self)
    }

    pub fn with_movement(mut self, rule: Box<dyn MovementRule>, random_strength: f64) -> Self {
        self.movement = Some(rule);
        self.random_strength = random_strength;
        self
    }

    /// Wire up population, registered derivative and movement chain from a run file
    pub fn from_config(config: &ExperimentConfig) -> Result<Self> {
        let population = CellPopulation::initialize(&config.population)?;
        let derivative = rules::derivative(&config.run.derivative, config.run.seed)?;
        let mut stepper = Self::new(population, config.params.clone(), derivative)?;
        if let Some(state) = &config.initial_state {
            stepper = stepper.with_state(state.clone())?;
        }
        if let Some(rule) = rules::movement_chain(&config.run.movement)? {
            stepper = stepper.with_movement(rule, config.run.random_strength);
        }
        Ok(stepper)
    }

    pub fn cell_count(&self) -> usize {
        self.population.len()
    }

    pub fn state(&self) -> &StateMatrix {
        &self.state
    }

    pub fn population(&self) -> &CellPopulation {
        &self.population
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    fn snapshot(&self, step: usize, time: f64) -> Snapshot {
        Snapshot {
            step,
            time,
            positions: self.population.positions().to_vec(),
            state: self.state.clone(),
        }
    }

    /// Run with events forwarded to `tracing`
    pub fn run(&mut self, run: &RunConfig) -> Result<History> {
        self.run_with_sink(run, &mut TracingSink::default())
    }

    /// Integrate for `run.duration`, firing scheduled division and death.
    ///
    /// Snapshot 0 is the state on entry. Each later step evaluates the
    /// derivative, applies the Euler update, then divisions, then deaths, and
    /// records the result before moving cells for the next step. A derivative
    /// of the wrong shape aborts the run with `ShapeMismatch`.
    #[instrument(skip_all, fields(duration = run.duration, cells = self.population.len()))]
    pub fn run_with_sink(&mut self, run: &RunConfig, sink: &mut dyn EventSink) -> Result<History> {
        let dt = self.params.dt;
        let steps = step_count(run.duration, dt);
        info!(
            event = "run_started",
            steps = steps,
            dt = dt,
            "Starting run of {} steps",
            steps
        );

        let mut history = History::new();
        history.push(self.snapshot(0, 0.0));

        for i in 1..steps {
            let t = i as f64 * dt;
            let derivative =
                self.derivative
                    .derivative(&self.state, t, &self.params, self.population.positions())?;
            self.state.add_scaled(&derivative, dt)?;

            if run.proliferation.contains(i) {
                let division = self.population.proliferate(
                    run.proliferation_batch,
                    run.proliferation_mode,
                    Some(&mut self.state),
                    sink,
                )?;
                sink.record(&SimEvent::Proliferated {
                    step: i,
                    parents: division.parents,
                    created: division.created,
                });
            }

            if run.apoptosis.contains(i) {
                let removed = self.population.apoptose(
                    run.apoptosis_batch,
                    run.apoptosis_mode,
                    Some(&mut self.state),
                )?;
                sink.record(&SimEvent::Apoptosis { step: i, removed });
            }

            history.push(self.snapshot(i, t));
            sink.record(&SimEvent::StepCompleted {
                step: i,
                time: t,
                cells: self.population.len(),
            });

            if let Some(rule) = self.movement.as_mut() {
                self.population
                    .move_cells(Some(rule.as_mut()), self.random_strength)?;
                sink.record(&SimEvent::Moved {
                    step: i,
                    cells: self.population.len(),
                });
            }
        }

        info!(
            event = "run_finished",
            snapshots = history.len(),
            final_cells = self.population.len(),
            "Run finished with {} cells",
            self.population.len()
        );
        Ok(history)
    }
}
