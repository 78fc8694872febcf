//! Core type definitions for the simulation.

use crate::{Error, Result};
use nalgebra::{DMatrix, Point2};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::ops::Index;

/// Planar cell position. Index into a position set identifies a cell for the
/// current step only; division and death reassign indices.
pub type Position = Point2<f64>;

/// Dense `rows x cols` matrix of per-cell channel values.
///
/// Row `i` always belongs to the cell at index `i` of the position set it was
/// produced alongside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StateRepr", into = "StateRepr")]
pub struct StateMatrix {
    values: DMatrix<f64>,
}

impl StateMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            values: DMatrix::zeros(rows, cols),
        }
    }

    /// Build from explicit rows; every row must have the same width
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if let Some(row) = rows.iter().find(|r| r.len() != cols) {
            return Err(Error::ShapeMismatch {
                expected: (rows.len(), cols),
                actual: (rows.len(), row.len()),
            });
        }
        let data: Vec<f64> = rows.iter().flatten().copied().collect();
        Ok(Self {
            values: DMatrix::from_row_slice(rows.len(), cols, &data),
        })
    }

    /// Independent zero-mean normal draws scaled by `spread`, drawn row by row.
    ///
    /// A non-positive spread yields an all-zero matrix without touching `rng`.
    pub fn random_normal<R: Rng + ?Sized>(
        rows: usize,
        cols: usize,
        spread: f64,
        rng: &mut R,
    ) -> Self {
        if spread <= 0.0 {
            return Self::zeros(rows, cols);
        }
        let draws: Vec<f64> = (0..rows * cols)
            .map(|_| rng.sample::<f64, _>(StandardNormal) * spread)
            .collect();
        Self {
            values: DMatrix::from_row_slice(rows, cols, &draws),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.shape()
    }

    pub fn rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn cols(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    pub fn as_matrix(&self) -> &DMatrix<f64> {
        &self.values
    }

    /// Copy of cell `i`'s channels
    pub fn row(&self, i: usize) -> Vec<f64> {
        self.values.row(i).iter().copied().collect()
    }

    /// Overwrite cell `i`'s channels. Width must match.
    pub fn set_row(&mut self, i: usize, row: &[f64]) -> Result<()> {
        if row.len() != self.cols() {
            return Err(Error::ShapeMismatch {
                expected: (1, self.cols()),
                actual: (1, row.len()),
            });
        }
        for (j, v) in row.iter().enumerate() {
            self.values[(i, j)] = *v;
        }
        Ok(())
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[(row, col)]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.values[(row, col)] = value;
    }

    /// Copy of channel `col` across all cells
    pub fn column(&self, col: usize) -> Vec<f64> {
        self.values.column(col).iter().copied().collect()
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = Vec<f64>> + '_ {
        (0..self.rows()).map(move |i| self.row(i))
    }

    pub fn push_row(&mut self, row: &[f64]) -> Result<()> {
        if row.len() != self.cols() {
            return Err(Error::ShapeMismatch {
                expected: (1, self.cols()),
                actual: (1, row.len()),
            });
        }
        let last = self.rows();
        self.grow();
        self.set_row(last, row)
    }

    /// Append an exact copy of row `i`
    pub fn duplicate_row(&mut self, i: usize) {
        let last = self.rows();
        self.grow();
        for j in 0..self.cols() {
            self.values[(last, j)] = self.values[(i, j)];
        }
    }

    fn grow(&mut self) {
        let last = self.rows();
        let values = std::mem::replace(&mut self.values, DMatrix::zeros(0, 0));
        self.values = values.insert_row(last, 0.0);
    }

    /// Rows whose `keep` flag is set, in their original relative order
    pub fn filter_rows(&self, keep: &[bool]) -> Self {
        let kept: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter_map(|(i, k)| k.then_some(i))
            .collect();
        Self {
            values: self.values.select_rows(&kept),
        }
    }

    /// `self += other * factor`, element-wise. Shapes must agree.
    pub fn add_scaled(&mut self, other: &StateMatrix, factor: f64) -> Result<()> {
        if other.shape() != self.shape() {
            return Err(Error::ShapeMismatch {
                expected: self.shape(),
                actual: other.shape(),
            });
        }
        self.values += &other.values * factor;
        Ok(())
    }
}

impl From<DMatrix<f64>> for StateMatrix {
    fn from(values: DMatrix<f64>) -> Self {
        Self { values }
    }
}

/// Wire form: shape plus row-major values
#[derive(Serialize, Deserialize)]
struct StateRepr {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl TryFrom<StateRepr> for StateMatrix {
    type Error = Error;

    fn try_from(repr: StateRepr) -> Result<Self> {
        if repr.data.len() != repr.rows * repr.cols {
            return Err(Error::ShapeMismatch {
                expected: (repr.rows, repr.cols),
                actual: (repr.data.len() / repr.cols.max(1), repr.cols),
            });
        }
        Ok(Self {
            values: DMatrix::from_row_slice(repr.rows, repr.cols, &repr.data),
        })
    }
}

impl From<StateMatrix> for StateRepr {
    fn from(state: StateMatrix) -> Self {
        let (rows, cols) = state.shape();
        Self {
            rows,
            cols,
            data: state.values.transpose().as_slice().to_vec(),
        }
    }
}

/// One recorded step: positions and state are index-aligned within the snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub step: usize,
    pub time: f64,
    pub positions: Vec<Position>,
    pub state: StateMatrix,
}

impl Snapshot {
    pub fn cell_count(&self) -> usize {
        self.positions.len()
    }
}

/// Append-only, step-indexed sequence of independently shaped snapshots
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    snapshots: Vec<Snapshot>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn get(&self, step: usize) -> Option<&Snapshot> {
        self.snapshots.get(step)
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> + '_ {
        self.snapshots.iter()
    }

    pub fn into_snapshots(self) -> Vec<Snapshot> {
        self.snapshots
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl Index<usize> for History {
    type Output = Snapshot;

    fn index(&self, step: usize) -> &Snapshot {
        &self.snapshots[step]
    }
}
