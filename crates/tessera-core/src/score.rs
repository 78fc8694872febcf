//! Scalar reduction of a final snapshot, consumed by sweep heatmaps.

use crate::{Error, Result, Snapshot};

/// Guard added to denominators in [`channel_ratio_score`]
pub const SCORE_EPSILON: f64 = 1e-7;

/// Channels compared by the score (0-indexed)
pub const SCORE_CHANNELS: (usize, usize) = (2, 3);

/// Compare channels 2 and 3 of the first cell.
///
/// `c3 / (c2 + eps)` when channel 2 dominates, otherwise `-c2 / (c3 + eps)`.
/// An empty snapshot scores NaN. Fails with `ShapeMismatch` when the state
/// has no channel 3.
pub fn channel_ratio_score(snapshot: &Snapshot) -> Result<f64> {
    let state = &snapshot.state;
    if state.cols() <= SCORE_CHANNELS.1 {
        return Err(Error::ShapeMismatch {
            expected: (state.rows(), SCORE_CHANNELS.1 + 1),
            actual: state.shape(),
        });
    }
    if state.is_empty() {
        return Ok(f64::NAN);
    }
    let (a, b) = (state.get(0, SCORE_CHANNELS.0), state.get(0, SCORE_CHANNELS.1));
    Ok(if a > b {
        b / (a + SCORE_EPSILON)
    } else {
        -a / (b + SCORE_EPSILON)
    })
}

/// Row-major grid of sweep scores
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ScoreGrid {
    pub shape: (usize, usize),
    values: Vec<f64>,
}

impl ScoreGrid {
    pub fn new(shape: (usize, usize), values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), shape.0 * shape.1);
        Self { shape, values }
    }

    pub fn get(&self, run: usize, tuning: usize) -> f64 {
        self.values[run * self.shape.1 + tuning]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.values.chunks(self.shape.1.max(1))
    }
}
