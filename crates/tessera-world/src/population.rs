//! The live position set and its tessellation.
//!
//! Cell identity is the index into the position set and only holds for the
//! current step. Division appends, death compacts through a keep-mask, and
//! both renumber cells. Any state matrix passed in stays row-aligned.

use crate::events::{EventSink, SimEvent};
use crate::rules::MovementRule;
use nalgebra::Vector2;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tessera_core::{Error, LatticeMode, PopulationConfig, Position, Result, SelectionMode, StateMatrix};
use tessera_geometry::{principal_axis, TessellationGraph};
use tracing::{debug, trace};

/// Daughter cells are placed this many spacings from the parent site
pub const DIVISION_OFFSET: f64 = 0.75;

/// Area given to cells whose polygon hull is degenerate when choosing who dies
pub const DEGENERATE_AREA: f64 = 1.0e9;

/// Outcome of a proliferation batch, in split order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Division {
    /// Index of the cell that split, valid at the time of its split
    pub parents: Vec<usize>,
    /// Index of each appended daughter
    pub created: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct CellPopulation {
    positions: Vec<Position>,
    tessellation: TessellationGraph,
    spacing: f64,
    rng: ChaCha8Rng,
}

impl CellPopulation {
    /// Lay out the initial position set described by `config`
    pub fn initialize(config: &PopulationConfig) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let (columns, rows) = config.grid_shape;
        let s = config.spacing;

        let positions = match config.mode {
            LatticeMode::Honeycomb => {
                let mut positions = Vec::with_capacity(columns * rows);
                for x in 0..columns {
                    for y in 0..rows {
                        let shift = if y % 2 == 1 { 0.5 } else { 0.0 };
                        let jx = (rng.gen::<f64>() - 0.5) * config.jitter;
                        let jy = (rng.gen::<f64>() - 0.5) * config.jitter;
                        positions.push(Position::new(
                            (x as f64 + 1.0 + jx + shift) * s,
                            (y as f64 + 1.0 + jy) * s,
                        ));
                    }
                }
                positions
            }
            LatticeMode::Random => (0..columns * rows)
                .map(|_| {
                    let x = rng.gen::<f64>() * columns as f64 * s;
                    let y = rng.gen::<f64>() * rows as f64 * s;
                    Position::new(x, y)
                })
                .collect(),
            LatticeMode::Regular => {
                let mut positions = Vec::with_capacity(columns * rows);
                for x in 0..columns {
                    for y in 0..rows {
                        positions.push(Position::new(x as f64 * s, y as f64 * s));
                    }
                }
                positions
            }
            LatticeMode::Custom | LatticeMode::Import => config
                .positions
                .clone()
                .ok_or_else(|| {
                    Error::MissingInput(format!("{:?} mode requires positions", config.mode))
                })?,
        };

        debug!(
            event = "population_initialized",
            mode = ?config.mode,
            cells = positions.len(),
            "Initialized {} cells",
            positions.len()
        );

        Self::with_rng(positions, s, rng)
    }

    /// Wrap an existing position set
    pub fn from_positions(positions: Vec<Position>, spacing: f64, seed: u64) -> Result<Self> {
        Self::with_rng(positions, spacing, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(positions: Vec<Position>, spacing: f64, rng: ChaCha8Rng) -> Result<Self> {
        let tessellation = TessellationGraph::compute(&positions)?;
        Ok(Self {
            positions,
            tessellation,
            spacing,
            rng,
        })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn tessellation(&self) -> &TessellationGraph {
        &self.tessellation
    }

    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    /// Generator shared by everything that draws on behalf of this population
    pub fn rng_mut(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    pub fn inner_indices(&self) -> Vec<usize> {
        self.tessellation.inner_indices()
    }

    pub fn outer_indices(&self) -> Vec<usize> {
        self.tessellation.outer_indices()
    }

    fn rebuild(&mut self) -> Result<()> {
        self.tessellation = TessellationGraph::compute(&self.positions)?;
        Ok(())
    }

    fn check_alignment(&self, state: Option<&StateMatrix>) -> Result<()> {
        match state {
            Some(state) if state.rows() != self.positions.len() => Err(Error::ShapeMismatch {
                expected: (self.positions.len(), state.cols()),
                actual: state.shape(),
            }),
            _ => Ok(()),
        }
    }

    /// Apply `rule`, then uniform noise of up to `random_strength * spacing`
    /// per axis. With no rule and no noise nothing changes, not even the
    /// tessellation.
    pub fn move_cells(
        &mut self,
        rule: Option<&mut dyn MovementRule>,
        random_strength: f64,
    ) -> Result<()> {
        if rule.is_none() && random_strength <= 0.0 {
            return Ok(());
        }

        let mut moved = match rule {
            Some(rule) => rule.apply(&self.positions)?,
            None => self.positions.clone(),
        };
        if moved.len() != self.positions.len() {
            return Err(Error::ShapeMismatch {
                expected: (self.positions.len(), 2),
                actual: (moved.len(), 2),
            });
        }

        if random_strength > 0.0 {
            let scale = self.spacing * random_strength;
            for p in moved.iter_mut() {
                let dx = (self.rng.gen::<f64>() - 0.5) * 2.0 * scale;
                let dy = (self.rng.gen::<f64>() - 0.5) * 2.0 * scale;
                *p += Vector2::new(dx, dy);
            }
        }

        self.positions = moved;
        self.rebuild()?;
        trace!(cells = self.positions.len(), "Cells moved");
        Ok(())
    }

    /// Split up to `n` inner cells one after another. When no inner cell is
    /// left the batch stops early and `sink` gets `ProliferationExhausted`.
    /// A supplied state gains a copy of each parent row.
    pub fn proliferate(
        &mut self,
        n: usize,
        mode: SelectionMode,
        mut state: Option<&mut StateMatrix>,
        sink: &mut dyn EventSink,
    ) -> Result<Division> {
        self.check_alignment(state.as_deref())?;
        let mut division = Division::default();

        for _ in 0..n {
            let inner = self.inner_indices();
            if inner.is_empty() {
                sink.record(&SimEvent::ProliferationExhausted {
                    requested: n,
                    completed: division.created.len(),
                });
                break;
            }

            let target = match mode {
                SelectionMode::Area => {
                    let mut best = inner[0];
                    let mut best_area = f64::NEG_INFINITY;
                    for &i in &inner {
                        let area = self.tessellation.polygon_area(i).unwrap_or(0.0);
                        if area > best_area {
                            best = i;
                            best_area = area;
                        }
                    }
                    best
                }
                SelectionMode::Random => inner[self.rng.gen_range(0..inner.len())],
            };

            let axis = principal_axis(&self.tessellation.polygon(target))
                .unwrap_or_else(Vector2::x);
            let offset = axis * DIVISION_OFFSET * self.spacing;
            let site = self.positions[target];
            self.positions[target] = site - offset;
            self.positions.push(site + offset);
            if let Some(state) = state.as_deref_mut() {
                state.duplicate_row(target);
            }
            self.rebuild()?;

            division.parents.push(target);
            division.created.push(self.positions.len() - 1);
        }

        Ok(division)
    }

    /// Remove `n` inner cells chosen once from the current tessellation.
    /// Returns the removed indices as they were before removal.
    pub fn apoptose(
        &mut self,
        n: usize,
        mode: SelectionMode,
        state: Option<&mut StateMatrix>,
    ) -> Result<Vec<usize>> {
        self.check_alignment(state.as_deref())?;
        let inner = self.inner_indices();
        if n > inner.len() {
            return Err(Error::InsufficientPopulation {
                requested: n,
                available: inner.len(),
            });
        }
        if n == 0 {
            return Ok(Vec::new());
        }

        let removed: Vec<usize> = match mode {
            SelectionMode::Area => {
                let mut ranked: Vec<(f64, usize)> = inner
                    .iter()
                    .map(|&i| {
                        let area = self.tessellation.polygon_area(i).unwrap_or(DEGENERATE_AREA);
                        (area, i)
                    })
                    .collect();
                ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                ranked.into_iter().take(n).map(|(_, i)| i).collect()
            }
            SelectionMode::Random => index::sample(&mut self.rng, inner.len(), n)
                .into_iter()
                .map(|k| inner[k])
                .collect(),
        };

        let mut keep = vec![true; self.positions.len()];
        for &i in &removed {
            keep[i] = false;
        }
        self.positions = self
            .positions
            .iter()
            .zip(&keep)
            .filter_map(|(p, &k)| k.then_some(*p))
            .collect();
        if let Some(state) = state {
            *state = state.filter_rows(&keep);
        }
        self.rebuild()?;

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use crate::rules::movement_fn;

    fn regular(columns: usize, rows: usize) -> CellPopulation {
        CellPopulation::initialize(&PopulationConfig::regular(columns, rows, 1.0)).unwrap()
    }

    #[test]
    fn test_regular_lattice_positions() {
        let population = regular(3, 3);
        assert_eq!(population.len(), 9);
        assert_eq!(population.positions()[0], Position::new(0.0, 0.0));
        assert_eq!(population.positions()[1], Position::new(0.0, 1.0));
        assert_eq!(population.positions()[8], Position::new(2.0, 2.0));
    }

    #[test]
    fn test_honeycomb_without_jitter() {
        let config = PopulationConfig::honeycomb(3, 3, 0.0, 1);
        let population = CellPopulation::initialize(&config).unwrap();
        assert_eq!(population.positions()[0], Position::new(1.0, 1.0));
        assert_eq!(population.positions()[1], Position::new(1.5, 2.0));
        assert_eq!(population.positions()[2], Position::new(1.0, 3.0));
    }

    #[test]
    fn test_honeycomb_jitter_is_bounded_and_seeded() {
        let config = PopulationConfig::honeycomb(6, 6, 0.4, 11);
        let a = CellPopulation::initialize(&config).unwrap();
        let b = CellPopulation::initialize(&config).unwrap();
        assert_eq!(a.positions(), b.positions());
        for (k, p) in a.positions().iter().enumerate() {
            let (x, y) = ((k / 6) as f64, (k % 6) as f64);
            let shift = if k % 6 % 2 == 1 { 0.5 } else { 0.0 };
            assert!((p.x - (x + 1.0 + shift)).abs() <= 0.2);
            assert!((p.y - (y + 1.0)).abs() <= 0.2);
        }
    }

    #[test]
    fn test_random_mode_stays_in_box() {
        let config = PopulationConfig {
            mode: LatticeMode::Random,
            grid_shape: (4, 3),
            spacing: 2.0,
            seed: 5,
            ..Default::default()
        };
        let population = CellPopulation::initialize(&config).unwrap();
        assert_eq!(population.len(), 12);
        assert!(population
            .positions()
            .iter()
            .all(|p| (0.0..8.0).contains(&p.x) && (0.0..6.0).contains(&p.y)));
    }

    #[test]
    fn test_custom_mode_requires_positions() {
        for mode in [LatticeMode::Custom, LatticeMode::Import] {
            let config = PopulationConfig {
                mode,
                ..Default::default()
            };
            assert!(matches!(
                CellPopulation::initialize(&config),
                Err(Error::MissingInput(_))
            ));
        }
    }

    #[test]
    fn test_degenerate_positions_fail() {
        let line = vec![
            Position::new(0.0, 0.0),
            Position::new(1.0, 0.0),
            Position::new(2.0, 0.0),
        ];
        let result = CellPopulation::initialize(&PopulationConfig::custom(line));
        assert!(matches!(result, Err(Error::Geometry(_))));
    }

    #[test]
    fn test_move_without_rule_or_noise_is_identity() {
        let mut population = regular(5, 5);
        let before = population.positions().to_vec();
        let regions = population.tessellation().regions().to_vec();
        population.move_cells(None, 0.0).unwrap();
        assert_eq!(population.positions(), before.as_slice());
        assert_eq!(population.tessellation().regions(), regions.as_slice());
    }

    #[test]
    fn test_move_noise_is_bounded() {
        let mut population = regular(5, 5);
        let before = population.positions().to_vec();
        population.move_cells(None, 0.1).unwrap();
        for (a, b) in before.iter().zip(population.positions()) {
            assert!((a.x - b.x).abs() <= 0.1);
            assert!((a.y - b.y).abs() <= 0.1);
        }
        assert_ne!(population.positions(), before.as_slice());
    }

    #[test]
    fn test_move_rejects_resizing_rule() {
        let mut population = regular(4, 4);
        let mut rule = movement_fn(|p| Ok(p[1..].to_vec()));
        let result = population.move_cells(Some(rule.as_mut()), 0.0);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_proliferate_splits_along_axis() {
        let mut population = regular(5, 5);
        let mut state = StateMatrix::zeros(25, 2);
        state.set_row(12, &[3.0, 4.0]).unwrap();

        let division = population
            .proliferate(1, SelectionMode::Area, Some(&mut state), &mut NullSink)
            .unwrap();
        assert_eq!(division.parents, vec![12]);
        assert_eq!(division.created, vec![25]);
        assert_eq!(population.len(), 26);
        assert_eq!(state.rows(), 26);
        assert_eq!(state.row(25), vec![3.0, 4.0]);

        let gap = population.positions()[25] - population.positions()[12];
        assert!((gap.norm() - 2.0 * DIVISION_OFFSET).abs() < 1e-9);
        let midpoint = population.positions()[12] + gap / 2.0;
        assert!((midpoint - Position::new(2.0, 2.0)).norm() < 1e-9);
    }

    #[test]
    fn test_proliferate_stops_when_no_inner_cells() {
        let mut population = regular(3, 3);
        let mut events: Vec<SimEvent> = Vec::new();
        let division = population
            .proliferate(3, SelectionMode::Area, None, &mut events)
            .unwrap();
        assert!(division.created.is_empty());
        assert_eq!(population.len(), 9);
        assert_eq!(
            events,
            vec![SimEvent::ProliferationExhausted {
                requested: 3,
                completed: 0
            }]
        );
    }

    #[test]
    fn test_random_proliferation_duplicates_parent_row() {
        let mut population =
            CellPopulation::from_positions(regular(7, 7).positions().to_vec(), 1.0, 21).unwrap();
        let inner = population.inner_indices();
        let mut state = StateMatrix::zeros(49, 2);
        for i in 0..49 {
            state.set_row(i, &[i as f64, -(i as f64)]).unwrap();
        }

        let mut events: Vec<SimEvent> = Vec::new();
        let division = population
            .proliferate(1, SelectionMode::Random, Some(&mut state), &mut events)
            .unwrap();
        let parent = division.parents[0];
        assert!(inner.contains(&parent));
        assert_eq!(division.created, vec![49]);
        assert_eq!(state.rows(), 50);
        assert_eq!(state.row(49), vec![parent as f64, -(parent as f64)]);
        assert_eq!(state.row(parent), vec![parent as f64, -(parent as f64)]);
        assert!(events.is_empty());
    }

    #[test]
    fn test_proliferate_rejects_misaligned_state() {
        let mut population = regular(5, 5);
        let mut state = StateMatrix::zeros(24, 2);
        let result =
            population.proliferate(1, SelectionMode::Random, Some(&mut state), &mut NullSink);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_apoptose_needs_enough_inner_cells() {
        let mut population = regular(3, 3);
        let result = population.apoptose(1, SelectionMode::Area, None);
        assert!(matches!(
            result,
            Err(Error::InsufficientPopulation {
                requested: 1,
                available: 0
            })
        ));
    }

    #[test]
    fn test_apoptose_area_ties_go_to_lowest_index() {
        // Every inner cell of a uniform lattice has unit area
        let mut population = regular(7, 7);
        assert_eq!(population.inner_indices().len(), 9);
        let removed = population.apoptose(1, SelectionMode::Area, None).unwrap();
        assert_eq!(removed, vec![16]);
        assert_eq!(population.len(), 48);
    }

    #[test]
    fn test_apoptose_area_removes_smallest() {
        // Tensor lattice with a narrow third row and column
        let coords = [0.0, 1.0, 2.0, 3.0, 3.8, 5.0, 6.0];
        let mut positions = Vec::new();
        for &x in &coords {
            for &y in &coords {
                positions.push(Position::new(x, y));
            }
        }
        let mut population = CellPopulation::from_positions(positions, 1.0, 0).unwrap();
        let mut state = StateMatrix::zeros(49, 1);
        for i in 0..49 {
            state.set(i, 0, i as f64);
        }

        let removed = population
            .apoptose(1, SelectionMode::Area, Some(&mut state))
            .unwrap();
        assert_eq!(removed, vec![24]);
        assert_eq!(population.len(), 48);
        assert_eq!(state.rows(), 48);
        // Survivors keep their relative order
        assert_eq!(state.get(23, 0), 23.0);
        assert_eq!(state.get(24, 0), 25.0);
    }

    #[test]
    fn test_apoptose_random_is_distinct_and_seeded() {
        let run = |seed| {
            let mut population =
                CellPopulation::from_positions(regular(7, 7).positions().to_vec(), 1.0, seed)
                    .unwrap();
            let inner = population.inner_indices();
            let removed = population.apoptose(4, SelectionMode::Random, None).unwrap();
            assert!(removed.iter().all(|i| inner.contains(i)));
            let mut unique = removed.clone();
            unique.sort_unstable();
            unique.dedup();
            assert_eq!(unique.len(), 4);
            removed
        };
        assert_eq!(run(3), run(3));
    }
}
