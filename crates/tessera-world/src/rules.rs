//! Pluggable derivative functions and movement rules.
//!
//! Both are opaque to the stepper: it only relies on the call contract.
//! Implementations are registered by name so run files can select them
//! without shipping executable code.

use nalgebra::Vector2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use tessera_core::{Error, ModelParams, MovementSpec, Position, Result, StateMatrix};
use tessera_geometry::TessellationGraph;

/// Right-hand side of the reaction-diffusion system.
///
/// Must return a matrix with the same shape as `state`.
pub trait Derivative {
    fn derivative(
        &mut self,
        state: &StateMatrix,
        t: f64,
        params: &ModelParams,
        positions: &[Position],
    ) -> Result<StateMatrix>;
}

/// Position update applied between steps. Must preserve the cell count.
pub trait MovementRule {
    fn apply(&mut self, positions: &[Position]) -> Result<Vec<Position>>;
}

/// Adapter for closures used as derivatives
pub struct FnDerivative<F>(pub F);

impl<F> Derivative for FnDerivative<F>
where
    F: FnMut(&StateMatrix, f64, &ModelParams, &[Position]) -> Result<StateMatrix>,
{
    fn derivative(
        &mut self,
        state: &StateMatrix,
        t: f64,
        params: &ModelParams,
        positions: &[Position],
    ) -> Result<StateMatrix> {
        (self.0)(state, t, params, positions)
    }
}

/// Box a closure as a derivative
pub fn derivative_fn<F>(f: F) -> Box<dyn Derivative>
where
    F: FnMut(&StateMatrix, f64, &ModelParams, &[Position]) -> Result<StateMatrix> + 'static,
{
    Box::new(FnDerivative(f))
}

/// Adapter for closures used as movement rules
pub struct FnMovement<F>(pub F);

impl<F> MovementRule for FnMovement<F>
where
    F: FnMut(&[Position]) -> Result<Vec<Position>>,
{
    fn apply(&mut self, positions: &[Position]) -> Result<Vec<Position>> {
        (self.0)(positions)
    }
}

/// Box a closure as a movement rule
pub fn movement_fn<F>(f: F) -> Box<dyn MovementRule>
where
    F: FnMut(&[Position]) -> Result<Vec<Position>> + 'static,
{
    Box::new(FnMovement(f))
}

/// Names accepted by [`derivative`]
pub const DERIVATIVES: &[&str] = &["zero", "lateral_inhibition"];

/// Names accepted by [`movement`]
pub const MOVEMENT_RULES: &[&str] = &[
    "random_walk",
    "move_away_from_center",
    "convergent_extension",
    "repulsion",
];

/// Look up a registered derivative; `seed` feeds implementations with noise terms
pub fn derivative(name: &str, seed: u64) -> Result<Box<dyn Derivative>> {
    match name {
        "zero" => Ok(Box::new(ZeroDerivative)),
        "lateral_inhibition" => Ok(Box::new(LateralInhibition::new(seed))),
        other => Err(Error::InvalidMode(format!(
            "unknown derivative '{}', expected one of {:?}",
            other, DERIVATIVES
        ))),
    }
}

/// Look up a registered movement rule with its default strengths
pub fn movement(name: &str) -> Result<Box<dyn MovementRule>> {
    movement_with_strength(name, None)
}

/// Look up a registered movement rule, overriding its strength when given.
/// `random_walk` has no strength and ignores the override.
pub fn movement_with_strength(name: &str, strength: Option<f64>) -> Result<Box<dyn MovementRule>> {
    match name {
        "random_walk" => Ok(Box::new(RandomWalk)),
        "move_away_from_center" => {
            let mut rule = MoveAwayFromCenter::default();
            rule.strength = strength.unwrap_or(rule.strength);
            Ok(Box::new(rule))
        }
        "convergent_extension" => {
            let mut rule = ConvergentExtension::default();
            rule.strength = strength.unwrap_or(rule.strength);
            Ok(Box::new(rule))
        }
        "repulsion" => {
            let mut rule = Repulsion::default();
            rule.strength = strength.unwrap_or(rule.strength);
            Ok(Box::new(rule))
        }
        other => Err(Error::InvalidMode(format!(
            "unknown movement rule '{}', expected one of {:?}",
            other, MOVEMENT_RULES
        ))),
    }
}

/// Build the rule chain a run file asks for; `None` when it names no rules
pub fn movement_chain(specs: &[MovementSpec]) -> Result<Option<Box<dyn MovementRule>>> {
    let mut rules = specs
        .iter()
        .map(|spec| movement_with_strength(&spec.name, spec.strength))
        .collect::<Result<Vec<_>>>()?;
    Ok(match rules.len() {
        0 => None,
        1 => rules.pop(),
        _ => Some(Box::new(ChainedMovement::new(rules))),
    })
}

/// Feeds each rule the positions produced by the one before it
pub struct ChainedMovement {
    rules: Vec<Box<dyn MovementRule>>,
}

impl ChainedMovement {
    pub fn new(rules: Vec<Box<dyn MovementRule>>) -> Self {
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl MovementRule for ChainedMovement {
    fn apply(&mut self, positions: &[Position]) -> Result<Vec<Position>> {
        let mut current = positions.to_vec();
        for rule in self.rules.iter_mut() {
            let next = rule.apply(&current)?;
            if next.len() != current.len() {
                return Err(Error::ShapeMismatch {
                    expected: (current.len(), 2),
                    actual: (next.len(), 2),
                });
            }
            current = next;
        }
        Ok(current)
    }
}

/// Constant state
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroDerivative;

impl Derivative for ZeroDerivative {
    fn derivative(
        &mut self,
        state: &StateMatrix,
        _t: f64,
        _params: &ModelParams,
        _positions: &[Position],
    ) -> Result<StateMatrix> {
        Ok(StateMatrix::zeros(state.rows(), state.cols()))
    }
}

/// Gaussian-distance-weighted mean of `values` as seen from cell `i`
pub fn gaussian_weighted_mean(values: &[f64], positions: &[Position], i: usize, sigma: f64) -> f64 {
    let origin = positions[i];
    let (mut num, mut den) = (0.0, 0.0);
    for (v, p) in values.iter().zip(positions) {
        let d2 = (p - origin).norm_squared();
        let w = (-d2 / (2.0 * sigma * sigma)).exp();
        num += w * v;
        den += w;
    }
    num / den
}

/// `avg^m` for the reporter activation. Integral exponents use `powi`, so a
/// negative averaged signal gives a finite signed activation; fractional
/// exponents clamp the base at zero.
pub fn hill_activation(avg: f64, m: f64) -> f64 {
    if m.fract() == 0.0 && m.abs() <= i32::MAX as f64 {
        avg.powi(m as i32)
    } else {
        avg.max(0.0).powf(m)
    }
}

/// Delta / Notch-reporter lateral inhibition with two secreted Delta variants.
///
/// Channels: 0 Delta, 1 reporter, 2 and 3 secreted Delta. Delta is read from
/// edge-length-weighted tessellation neighbors; the secreted variants act
/// through a Gaussian kernel over all cells and inhibit the averaged signal.
/// The returned derivative keeps `state + derivative * dT` non-negative.
#[derive(Debug, Clone)]
pub struct LateralInhibition {
    rng: ChaCha8Rng,
}

impl LateralInhibition {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Derivative for LateralInhibition {
    fn derivative(
        &mut self,
        state: &StateMatrix,
        _t: f64,
        params: &ModelParams,
        positions: &[Position],
    ) -> Result<StateMatrix> {
        if state.cols() < 4 || positions.len() != state.rows() {
            return Err(Error::ShapeMismatch {
                expected: (positions.len(), state.cols().max(4)),
                actual: state.shape(),
            });
        }

        let nu = params.get("nu")?;
        let beta_d = params.get("betaD")?;
        let beta_r = params.get("betaR")?;
        let h = params.get("h")?;
        let m = params.get("m")?;
        let ratio3 = params.get("sDtv3_ratio")?;
        let ratio4 = params.get("sDtv4_ratio")?;
        let decay3 = params.get("Ktv3_Dgr")?;
        let decay4 = params.get("Ktv4_Dgr")?;
        let inhib3 = params.get("Ktv3_inhib")?;
        let inhib4 = params.get("Ktv4_inhib")?;
        let noise = params.get("Dgr_Noise")?;
        let sigma3 = params.get_or("sigma_diff_sD3", 2.0);
        let sigma4 = params.get_or("sigma_diff_sD4", 2.0);

        let weights = TessellationGraph::compute(positions)?.neighbor_weights();
        let delta = state.column(0);
        let sd3 = state.column(2);
        let sd4 = state.column(3);

        let mut d = StateMatrix::zeros(state.rows(), state.cols());
        for (i, neighbors) in weights.iter().enumerate().take(state.rows()) {
            if neighbors.is_empty() {
                continue;
            }
            let total: f64 = neighbors.values().sum();
            let mean_delta: f64 =
                neighbors.iter().map(|(&j, &w)| w * delta[j]).sum::<f64>() / total;
            let avg = mean_delta
                - inhib3 * gaussian_weighted_mean(&sd3, positions, i, sigma3)
                - inhib4 * gaussian_weighted_mean(&sd4, positions, i, sigma4);

            let reporter = state.get(i, 1);
            let production = beta_d / (1.0 + reporter.powf(h));
            let xi: f64 = self.rng.sample(StandardNormal);
            let activation = hill_activation(avg, m);

            d.set(
                i,
                0,
                nu * (1.0 - ratio3 - ratio4) * production - (1.0 + noise * (xi - 0.5)) * delta[i],
            );
            d.set(i, 1, beta_r * activation / (1.0 + activation) - reporter);
            d.set(i, 2, nu * ratio3 * production - decay3 * sd3[i]);
            d.set(i, 3, nu * ratio4 * production - decay4 * sd4[i]);
        }

        // Clip the Euler update at zero and express it back as a rate
        let dt = params.dt;
        for i in 0..state.rows() {
            for j in 0..state.cols() {
                let y = state.get(i, j);
                let next = (y + d.get(i, j) * dt).max(0.0);
                d.set(i, j, (next - y) / dt);
            }
        }
        Ok(d)
    }
}

/// Leaves positions alone; pair with movement noise for a pure random walk
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomWalk;

impl MovementRule for RandomWalk {
    fn apply(&mut self, positions: &[Position]) -> Result<Vec<Position>> {
        Ok(positions.to_vec())
    }
}

/// Radial push away from a center point (the centroid when unset)
#[derive(Debug, Clone)]
pub struct MoveAwayFromCenter {
    pub strength: f64,
    pub center: Option<Position>,
}

impl Default for MoveAwayFromCenter {
    fn default() -> Self {
        Self {
            strength: 0.1,
            center: None,
        }
    }
}

impl MovementRule for MoveAwayFromCenter {
    fn apply(&mut self, positions: &[Position]) -> Result<Vec<Position>> {
        let center = self.center.unwrap_or_else(|| centroid(positions));
        Ok(positions
            .iter()
            .map(|p| {
                let v = p - center;
                p + v / (v.norm() + 1e-8) * self.strength
            })
            .collect())
    }
}

/// Tissue narrowing along y and lengthening along x. Outer cells stay put.
#[derive(Debug, Clone)]
pub struct ConvergentExtension {
    pub strength: f64,
    pub max_force: f64,
}

impl Default for ConvergentExtension {
    fn default() -> Self {
        Self {
            strength: 0.02,
            max_force: 1.0,
        }
    }
}

impl MovementRule for ConvergentExtension {
    fn apply(&mut self, positions: &[Position]) -> Result<Vec<Position>> {
        let outer = TessellationGraph::compute(positions)?.classify_outer();
        let center = centroid(positions);
        Ok(positions
            .iter()
            .zip(&outer)
            .map(|(p, &is_outer)| {
                if is_outer {
                    return *p;
                }
                let force = Vector2::new(
                    self.strength * sign(p.x - center.x) / 4.0,
                    self.strength * sign(center.y - p.y),
                );
                p + clamp_norm(force, self.max_force)
            })
            .collect())
    }
}

/// Pushes non-outer cells apart from tessellation neighbors closer than `min_dist`
#[derive(Debug, Clone)]
pub struct Repulsion {
    pub strength: f64,
    pub min_dist: f64,
    pub max_force: f64,
}

impl Default for Repulsion {
    fn default() -> Self {
        Self {
            strength: 0.08,
            min_dist: 1.5,
            max_force: 1.0,
        }
    }
}

impl MovementRule for Repulsion {
    fn apply(&mut self, positions: &[Position]) -> Result<Vec<Position>> {
        let graph = TessellationGraph::compute(positions)?;
        let outer = graph.classify_outer();
        let neighbors = graph.neighbors();
        Ok(positions
            .iter()
            .enumerate()
            .map(|(i, p)| {
                if outer[i] {
                    return *p;
                }
                let mut force = Vector2::zeros();
                for &j in neighbors[i].iter().filter(|&&j| j != i) {
                    let v = p - positions[j];
                    let dist = v.norm();
                    if dist < 1e-8 || dist >= self.min_dist {
                        continue;
                    }
                    force += v / dist * (self.strength * (self.min_dist - dist));
                }
                p + clamp_norm(force, self.max_force)
            })
            .collect())
    }
}

fn centroid(positions: &[Position]) -> Position {
    if positions.is_empty() {
        return Position::origin();
    }
    let sum = positions
        .iter()
        .fold(Vector2::zeros(), |acc: Vector2<f64>, p| acc + p.coords);
    Position::from(sum / positions.len() as f64)
}

/// Sign that maps zero to zero
fn sign(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        v.signum()
    }
}

fn clamp_norm(v: Vector2<f64>, max: f64) -> Vector2<f64> {
    let norm = v.norm();
    if norm > max {
        v / norm * max
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lattice(columns: usize, rows: usize) -> Vec<Position> {
        let mut points = Vec::new();
        for x in 0..columns {
            for y in 0..rows {
                points.push(Position::new(x as f64, y as f64));
            }
        }
        points
    }

    #[test]
    fn test_registry_lookup() {
        for name in DERIVATIVES {
            assert!(derivative(name, 0).is_ok());
        }
        for name in MOVEMENT_RULES {
            assert!(movement(name).is_ok());
        }
        assert!(matches!(derivative("ode.py", 0), Err(Error::InvalidMode(_))));
        assert!(matches!(movement("teleport"), Err(Error::InvalidMode(_))));
    }

    #[test]
    fn test_closure_adapters() {
        let mut d = derivative_fn(|state, _, _, _| Ok(StateMatrix::zeros(state.rows(), 1)));
        let state = StateMatrix::zeros(3, 2);
        let out = d
            .derivative(&state, 0.0, &ModelParams::with_dt(0.1), &[])
            .unwrap();
        assert_eq!(out.shape(), (3, 1));

        let mut m = movement_fn(|p| Ok(p.iter().map(|q| *q + Vector2::new(1.0, 0.0)).collect()));
        let moved = m.apply(&[Position::new(0.0, 0.0)]).unwrap();
        assert_eq!(moved[0], Position::new(1.0, 0.0));
    }

    #[test]
    fn test_gaussian_weighted_mean() {
        let positions = vec![Position::new(0.0, 0.0), Position::new(1.0, 0.0)];
        let values = vec![0.0, 1.0];
        let w = (-1.0_f64 / 2.0).exp();
        let expected = w / (1.0 + w);
        assert!((gaussian_weighted_mean(&values, &positions, 0, 1.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_lateral_inhibition_shape_and_clipping() {
        let positions = lattice(5, 5);
        let state = StateMatrix::zeros(positions.len(), 4);
        let params = ModelParams::default();
        let mut model = LateralInhibition::new(1);
        let d = model.derivative(&state, 0.0, &params, &positions).unwrap();
        assert_eq!(d.shape(), state.shape());
        for i in 0..d.rows() {
            for j in 0..d.cols() {
                assert!(state.get(i, j) + d.get(i, j) * params.dt >= 0.0);
            }
        }
        // Delta production with no reporter is nu * betaD for cells with neighbors
        assert!((d.get(12, 0) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_lateral_inhibition_needs_four_channels() {
        let positions = lattice(3, 3);
        let state = StateMatrix::zeros(positions.len(), 2);
        let mut model = LateralInhibition::new(1);
        let result = model.derivative(&state, 0.0, &ModelParams::default(), &positions);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_move_away_from_center() {
        let positions = vec![Position::new(-1.0, 0.0), Position::new(1.0, 0.0)];
        let moved = MoveAwayFromCenter::default().apply(&positions).unwrap();
        assert!(moved[0].x < -1.0);
        assert!(moved[1].x > 1.0);
    }

    #[test]
    fn test_convergent_extension_keeps_outer_cells() {
        let positions = lattice(5, 5);
        let moved = ConvergentExtension::default().apply(&positions).unwrap();
        // Corner is outer
        assert_eq!(moved[0], positions[0]);
        // (1,1) moves up toward the mid-line and left away from it
        assert!(moved[6].y > positions[6].y);
        assert!(moved[6].x < positions[6].x);
        // The centroid cell has no direction to move in
        assert_eq!(moved[12], positions[12]);
    }

    #[test]
    fn test_repulsion_pushes_close_neighbors_apart() {
        let mut positions = lattice(5, 5);
        positions[12] = Position::new(2.0, 1.6);
        let moved = Repulsion::default().apply(&positions).unwrap();
        // Squeezed toward (2,1), the middle cell is pushed back up
        assert!(moved[12].y > positions[12].y);
        assert_eq!(moved[0], positions[0]);
    }

    #[test]
    fn test_hill_activation_keeps_sign_for_integral_exponent() {
        assert_eq!(hill_activation(-2.0, 3.0), -8.0);
        assert_eq!(hill_activation(-2.0, 2.0), 4.0);
        assert_eq!(hill_activation(-2.0, 2.5), 0.0);
        assert!((hill_activation(4.0, 0.5) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_lateral_inhibition_negative_signal_stays_finite() {
        // Secreted Delta everywhere pushes the averaged signal to -Ktv3_inhib
        let positions = lattice(3, 3);
        let mut state = StateMatrix::zeros(positions.len(), 4);
        for i in 0..positions.len() {
            state.set_row(i, &[0.0, 1.0, 1.0, 0.0]).unwrap();
        }
        let params = ModelParams::default();
        let mut model = LateralInhibition::new(3);
        let d = model.derivative(&state, 0.0, &params, &positions).unwrap();

        let activation = (-0.15_f64).powi(3);
        let expected = 50.0 * activation / (1.0 + activation) - 1.0;
        assert!(d.get(4, 1).is_finite());
        assert!((d.get(4, 1) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_strength_override() {
        let positions = vec![Position::new(-1.0, 0.0), Position::new(1.0, 0.0)];
        let moved = movement_with_strength("move_away_from_center", Some(0.5))
            .unwrap()
            .apply(&positions)
            .unwrap();
        assert!((moved[1].x - 1.5).abs() < 1e-6);

        let default = movement("move_away_from_center").unwrap().apply(&positions).unwrap();
        assert!((default[1].x - 1.1).abs() < 1e-6);
    }

    #[test]
    fn test_chained_movement_applies_rules_in_order() {
        let shift = movement_fn(|p| Ok(p.iter().map(|q| *q + Vector2::new(1.0, 0.0)).collect()));
        let double = movement_fn(|p| Ok(p.iter().map(|q| Position::from(q.coords * 2.0)).collect()));
        let mut chain = ChainedMovement::new(vec![shift, double]);
        assert_eq!(chain.len(), 2);
        let moved = chain.apply(&[Position::new(0.0, 0.0)]).unwrap();
        assert_eq!(moved[0], Position::new(2.0, 0.0));

        let drop_one = movement_fn(|p| Ok(p[1..].to_vec()));
        let mut chain = ChainedMovement::new(vec![drop_one, movement("random_walk").unwrap()]);
        let result = chain.apply(&[Position::origin(), Position::origin()]);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_movement_chain_from_specs() {
        assert!(movement_chain(&[]).unwrap().is_none());

        let specs = vec![
            MovementSpec::new("move_away_from_center", Some(0.5)),
            MovementSpec::new("move_away_from_center", Some(0.5)),
        ];
        let mut chain = movement_chain(&specs).unwrap().unwrap();
        let positions = vec![Position::new(-1.0, 0.0), Position::new(1.0, 0.0)];
        let moved = chain.apply(&positions).unwrap();
        assert!((moved[1].x - 2.0).abs() < 1e-6);
        assert!((moved[0].x + 2.0).abs() < 1e-6);

        let unknown = vec![MovementSpec::new("teleport", None)];
        assert!(matches!(movement_chain(&unknown), Err(Error::InvalidMode(_))));
    }
}
