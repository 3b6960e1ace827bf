//! trilateration.rs — Levenberg–Marquardt three-anchor 2D solver
//!
//! Minimizes the sum of squared range residuals
//!   J(p) = Σ_i (‖p − a_i‖ − d_i)²,  i = 1..3
//! over the tag position p = (x, y). Two unknowns, three equations: under
//! measurement noise there is no exact solution, so the solver returns the
//! least-squares fit.
//!
//! The iteration starts at the anchor centroid and damps the Gauss–Newton step
//! with μI (Nielsen's update rule for μ). The 2×2 normal equations are solved
//! in closed form.
//!
//! Outward contract is binary: a converged [`TrilaterationSolution`] or a
//! [`SolveError`]. Each call is stateless; there is no smoothing between calls.
//! Collinear anchors make the normal matrix rank deficient. A stop at a
//! rank-deficient point that does not fit the ranges exactly is a saddle or a
//! ridge, not a least-squares fit, and is reported as
//! [`SolveError::Degenerate`]. There is no geometric fallback.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uwb_types::{AnchorPosition, ResolvedPosition};

// ── Types ─────────────────────────────────────────────────────────────────────

/// Iteration budget and stopping tolerances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Maximum number of damped steps (accepted or rejected)
    pub max_iterations: u32,
    /// Stop when ‖step‖ ≤ x_tolerance · (‖p‖ + x_tolerance)
    pub x_tolerance: f64,
    /// Stop when an accepted step lowers the cost by ≤ f_tolerance · cost
    pub f_tolerance: f64,
    /// Stop when ‖Jᵀr‖∞ ≤ g_tolerance
    pub g_tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            x_tolerance: 1e-10,
            f_tolerance: 1e-12,
            g_tolerance: 1e-10,
        }
    }
}

/// Converged least-squares fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrilaterationSolution {
    pub position: ResolvedPosition,
    /// RMS of the three range residuals at the solution, cm
    pub rms_residual_cm: f64,
    /// Damped steps taken (0 when the initial guess already satisfies a stop criterion)
    pub iterations: u32,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("no convergence within {iterations} iterations")]
    NotConverged { iterations: u32 },
    #[error("non-finite {0} during solve")]
    NonFinite(&'static str),
    #[error("rank-deficient geometry at stop point (rms residual {rms_residual_cm:.2} cm)")]
    Degenerate { rms_residual_cm: f64 },
}

// ── Solver ────────────────────────────────────────────────────────────────────

/// Points closer than this to an anchor get a zero Jacobian row for it.
const MIN_RANGE_CM: f64 = 1e-12;
/// Initial damping relative to the largest diagonal entry of JᵀJ.
const TAU: f64 = 1e-3;
/// det(JᵀJ) ≤ RANK_EPS · trace² counts as rank deficient.
const RANK_EPS: f64 = 1e-9;
/// Residual below which a rank-deficient stop is still an exact fit.
const EXACT_FIT_RMS_CM: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct Trilaterator {
    anchors: [AnchorPosition; 3],
    config: SolverConfig,
}

/// Residuals and Jacobian at one point.
struct Linearization {
    residuals: [f64; 3],
    jacobian: [[f64; 2]; 3],
}

impl Linearization {
    fn cost(&self) -> f64 {
        0.5 * self.residuals.iter().map(|r| r * r).sum::<f64>()
    }

    /// (JᵀJ as [a00, a01, a11], Jᵀr)
    fn normal_equations(&self) -> ([f64; 3], [f64; 2]) {
        let mut a = [0.0; 3];
        let mut g = [0.0; 2];
        for (row, r) in self.jacobian.iter().zip(self.residuals) {
            a[0] += row[0] * row[0];
            a[1] += row[0] * row[1];
            a[2] += row[1] * row[1];
            g[0] += row[0] * r;
            g[1] += row[1] * r;
        }
        (a, g)
    }
}

impl Trilaterator {
    pub fn new(anchors: [AnchorPosition; 3], config: SolverConfig) -> Self {
        Self { anchors, config }
    }

    pub fn anchors(&self) -> &[AnchorPosition; 3] {
        &self.anchors
    }

    /// Starting point for every solve: the centroid of the three anchors.
    pub fn initial_guess(&self) -> ResolvedPosition {
        let (sx, sy) = self
            .anchors
            .iter()
            .fold((0.0, 0.0), |(sx, sy), a| (sx + a.x, sy + a.y));
        ResolvedPosition::new(sx / 3.0, sy / 3.0)
    }

    /// ‖p − a_i‖ − d_i for each anchor.
    pub fn residuals(&self, position: ResolvedPosition, distances: [f64; 3]) -> [f64; 3] {
        self.linearize([position.x, position.y], distances).residuals
    }

    fn linearize(&self, p: [f64; 2], distances: [f64; 3]) -> Linearization {
        let mut residuals = [0.0; 3];
        let mut jacobian = [[0.0; 2]; 3];
        for (i, anchor) in self.anchors.iter().enumerate() {
            let dx = p[0] - anchor.x;
            let dy = p[1] - anchor.y;
            let range = dx.hypot(dy);
            residuals[i] = range - distances[i];
            if range > MIN_RANGE_CM {
                jacobian[i] = [dx / range, dy / range];
            }
        }
        Linearization { residuals, jacobian }
    }

    /// Resolve a position from the three measured distances (cm, A1..A3 order).
    pub fn solve(&self, distances: [f64; 3]) -> Result<TrilaterationSolution, SolveError> {
        if distances.iter().any(|d| !d.is_finite()) {
            return Err(SolveError::NonFinite("distance"));
        }
        let cfg = &self.config;

        let guess = self.initial_guess();
        let mut p = [guess.x, guess.y];
        let mut lin = self.linearize(p, distances);
        let mut cost = lin.cost();
        let (mut a, mut g) = lin.normal_equations();

        if !cost.is_finite() {
            return Err(SolveError::NonFinite("cost"));
        }
        if cost == 0.0 || inf_norm(g) <= cfg.g_tolerance {
            return converged(p, &lin, 0);
        }

        let mut mu = TAU * a[0].max(a[2]);
        if mu <= 0.0 {
            mu = TAU;
        }
        let mut nu = 2.0;

        for iter in 1..=cfg.max_iterations {
            // (JᵀJ + μI) h = −Jᵀr, Cramer's rule
            let m00 = a[0] + mu;
            let m11 = a[2] + mu;
            let m01 = a[1];
            let det = m00 * m11 - m01 * m01;
            if !(det.is_finite() && det > 0.0) {
                mu *= nu;
                nu *= 2.0;
                continue;
            }
            let h = [
                (-g[0] * m11 + g[1] * m01) / det,
                (-g[1] * m00 + g[0] * m01) / det,
            ];

            let step = h[0].hypot(h[1]);
            if step <= cfg.x_tolerance * (p[0].hypot(p[1]) + cfg.x_tolerance) {
                return converged(p, &lin, iter);
            }

            let candidate = [p[0] + h[0], p[1] + h[1]];
            let next = self.linearize(candidate, distances);
            let next_cost = next.cost();
            if !next_cost.is_finite() {
                return Err(SolveError::NonFinite("cost"));
            }

            // Gain ratio: actual reduction over the reduction predicted by the linear model
            let predicted = 0.5 * (h[0] * (mu * h[0] - g[0]) + h[1] * (mu * h[1] - g[1]));
            let rho = (cost - next_cost) / predicted;

            if rho > 0.0 {
                let reduction = cost - next_cost;
                let previous = cost;
                p = candidate;
                lin = next;
                cost = next_cost;
                (a, g) = lin.normal_equations();

                if cost == 0.0
                    || inf_norm(g) <= cfg.g_tolerance
                    || reduction <= cfg.f_tolerance * previous
                {
                    return converged(p, &lin, iter);
                }
                mu *= (1.0 - (2.0 * rho - 1.0).powi(3)).max(1.0 / 3.0);
                nu = 2.0;
            } else {
                mu *= nu;
                nu *= 2.0;
            }
        }

        Err(SolveError::NotConverged { iterations: cfg.max_iterations })
    }
}

fn converged(
    p: [f64; 2],
    lin: &Linearization,
    iterations: u32,
) -> Result<TrilaterationSolution, SolveError> {
    let rms = (lin.residuals.iter().map(|r| r * r).sum::<f64>() / 3.0).sqrt();
    let (a, _) = lin.normal_equations();
    let trace = a[0] + a[2];
    let det = a[0] * a[2] - a[1] * a[1];
    if det <= RANK_EPS * trace * trace && rms > EXACT_FIT_RMS_CM {
        return Err(SolveError::Degenerate { rms_residual_cm: rms });
    }
    Ok(TrilaterationSolution {
        position: ResolvedPosition::new(p[0], p[1]),
        rms_residual_cm: rms,
        iterations,
    })
}

fn inf_norm(v: [f64; 2]) -> f64 {
    v[0].abs().max(v[1].abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uwb_types::AnchorId;

    fn anchors(points: [(f64, f64); 3]) -> [AnchorPosition; 3] {
        let [a1, a2, a3] = points;
        [
            AnchorPosition::new(AnchorId::A1, a1.0, a1.1),
            AnchorPosition::new(AnchorId::A2, a2.0, a2.1),
            AnchorPosition::new(AnchorId::A3, a3.0, a3.1),
        ]
    }

    fn room_anchors() -> [AnchorPosition; 3] {
        anchors([(15.0, 5.0), (290.0, 5.0), (165.0, 625.0)])
    }

    fn exact_distances(anchors: &[AnchorPosition; 3], x: f64, y: f64) -> [f64; 3] {
        anchors.map(|a| a.distance_to(x, y))
    }

    #[test]
    fn starts_from_anchor_centroid() {
        let solver = Trilaterator::new(room_anchors(), SolverConfig::default());
        let c = solver.initial_guess();
        assert!((c.x - 470.0 / 3.0).abs() < 1e-12);
        assert!((c.y - 635.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn recovers_reference_point() {
        let solver = Trilaterator::new(room_anchors(), SolverConfig::default());
        let d = exact_distances(solver.anchors(), 150.0, 300.0);
        let sol = solver.solve(d).unwrap();
        assert!(sol.position.distance_to(&ResolvedPosition::new(150.0, 300.0)) <= 0.01);
        assert!(sol.rms_residual_cm < 1e-6);
        assert!(sol.iterations > 0);
    }

    #[test]
    fn converges_to_truth_across_the_room() {
        let solver = Trilaterator::new(room_anchors(), SolverConfig::default());
        for x in (0..=480).step_by(40) {
            for y in (0..=650).step_by(50) {
                let truth = ResolvedPosition::new(f64::from(x), f64::from(y));
                let d = exact_distances(solver.anchors(), truth.x, truth.y);
                let sol = solver.solve(d).unwrap_or_else(|e| panic!("({x},{y}): {e}"));
                assert!(
                    sol.position.distance_to(&truth) <= 0.01,
                    "({x},{y}) resolved to {:?}",
                    sol.position
                );
            }
        }
    }

    #[test]
    fn other_geometry_inside_hull() {
        let solver = Trilaterator::new(
            anchors([(0.0, 0.0), (1000.0, 0.0), (0.0, 800.0)]),
            SolverConfig::default(),
        );
        for &(x, y) in &[(100.0, 100.0), (500.0, 200.0), (250.0, 600.0), (10.0, 10.0)] {
            let d = exact_distances(solver.anchors(), x, y);
            let sol = solver.solve(d).unwrap();
            assert!(sol.position.distance_to(&ResolvedPosition::new(x, y)) <= 0.01);
        }
    }

    #[test]
    fn noisy_ranges_give_least_squares_fit() {
        let solver = Trilaterator::new(room_anchors(), SolverConfig::default());
        let sol = solver.solve([295.17, 296.72, 325.02]).unwrap();
        assert!(sol.rms_residual_cm > 1.0);

        // Stationary point: gradient of the cost vanishes at the fit
        let r = solver.residuals(sol.position, [295.17, 296.72, 325.02]);
        let (mut gx, mut gy) = (0.0, 0.0);
        for (a, r) in solver.anchors().iter().zip(r) {
            let range = a.distance_to(sol.position.x, sol.position.y);
            gx += (sol.position.x - a.x) / range * r;
            gy += (sol.position.y - a.y) / range * r;
        }
        assert!(gx.abs() < 1e-4 && gy.abs() < 1e-4, "gradient ({gx}, {gy})");
    }

    #[test]
    fn zero_and_equal_distances_are_solved() {
        let solver = Trilaterator::new(room_anchors(), SolverConfig::default());
        assert!(solver.solve([0.0, 0.0, 0.0]).is_ok());
        let sol = solver.solve([200.0, 200.0, 200.0]).unwrap();
        assert!(sol.position.is_finite());

        // Tag sitting on anchor A1
        let d = exact_distances(solver.anchors(), 15.0, 5.0);
        let sol = solver.solve(d).unwrap();
        assert!(sol.position.distance_to(&ResolvedPosition::new(15.0, 5.0)) <= 0.01);
    }

    /// det(JᵀJ) relative to trace², from unit vectors toward each anchor.
    fn normal_rank_ratio(anchors: &[AnchorPosition; 3], p: ResolvedPosition) -> f64 {
        let (mut a00, mut a01, mut a11) = (0.0, 0.0, 0.0);
        for a in anchors {
            let range = a.distance_to(p.x, p.y);
            if range > 1e-12 {
                let (ux, uy) = ((p.x - a.x) / range, (p.y - a.y) / range);
                a00 += ux * ux;
                a01 += ux * uy;
                a11 += uy * uy;
            }
        }
        let trace = a00 + a11;
        (a00 * a11 - a01 * a01) / (trace * trace)
    }

    #[test]
    fn collinear_anchors_never_fault() {
        let solver = Trilaterator::new(
            anchors([(0.0, 0.0), (100.0, 0.0), (200.0, 0.0)]),
            SolverConfig::default(),
        );
        let cases = [
            exact_distances(solver.anchors(), 100.0, 50.0),
            exact_distances(solver.anchors(), 50.0, 80.0),
            [10.0, 500.0, 3.0],
        ];
        for d in cases {
            match solver.solve(d) {
                // Any fix must be an exact fit or a well-posed stationary point
                Ok(sol) => {
                    assert!(sol.position.is_finite());
                    assert!(
                        sol.rms_residual_cm <= 1e-6
                            || normal_rank_ratio(solver.anchors(), sol.position) > 1e-9,
                        "saddle reported as a fix: {sol:?}"
                    );
                }
                Err(SolveError::NotConverged { .. }) | Err(SolveError::Degenerate { .. }) => {}
                Err(e) => panic!("unexpected failure: {e}"),
            }
        }

        // On the anchor line the problem is well posed along it
        let d = exact_distances(solver.anchors(), 150.0, 0.0);
        let sol = solver.solve(d).unwrap();
        assert!(sol.position.distance_to(&ResolvedPosition::new(150.0, 0.0)) <= 0.01);
    }

    #[test]
    fn off_line_tag_with_collinear_anchors_is_unresolved() {
        let solver = Trilaterator::new(
            anchors([(0.0, 0.0), (100.0, 0.0), (200.0, 0.0)]),
            SolverConfig::default(),
        );

        // The centroid is a stationary point of the cost but fits nothing
        let d = exact_distances(solver.anchors(), 100.0, 50.0);
        match solver.solve(d) {
            Err(SolveError::Degenerate { rms_residual_cm }) => assert!(rms_residual_cm > 1.0),
            other => panic!("expected a degenerate stop, got {other:?}"),
        }

        let d = exact_distances(solver.anchors(), 50.0, 80.0);
        assert!(solver.solve(d).is_err());
    }

    #[test]
    fn iteration_cap_is_reported() {
        let config = SolverConfig {
            max_iterations: 1,
            x_tolerance: 0.0,
            f_tolerance: 0.0,
            g_tolerance: 0.0,
        };
        let solver = Trilaterator::new(room_anchors(), config);
        let d = exact_distances(solver.anchors(), 400.0, 600.0);
        assert_eq!(solver.solve(d), Err(SolveError::NotConverged { iterations: 1 }));
    }

    #[test]
    fn non_finite_distance_is_rejected() {
        let solver = Trilaterator::new(room_anchors(), SolverConfig::default());
        assert_eq!(
            solver.solve([f64::NAN, 1.0, 2.0]),
            Err(SolveError::NonFinite("distance"))
        );
    }
}
