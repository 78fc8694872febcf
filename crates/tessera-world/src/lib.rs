//! Cell population, reaction-diffusion stepper and parameter sweep.

pub mod events;
pub mod population;
pub mod rules;
pub mod simulation;
pub mod sweep;

pub use events::{EventSink, NullSink, SimEvent, TracingSink};
pub use population::{CellPopulation, Division};
pub use rules::{Derivative, MovementRule};
pub use simulation::ReactionDiffusionStepper;
pub use sweep::ParameterSweep;
