//! Minimizer adapter.
//!
//! Wraps argmin behind a small interface: an [`Objective`], a starting point
//! and a box per parameter in, an [`OptimizationResult`] out.
//!
//! - Primary method: L-BFGS with a More-Thuente line search, run in rounds
//!   over an active set. Coordinates sitting on a bound with the gradient
//!   pushing outward are held fixed in the next round, so the curvature model
//!   only ever sees interior coordinates. Free coordinates are still clamped
//!   into their box with the gradient projected at the bound.
//! - Fallback: a Nelder-Mead polish from the best point, used once when
//!   L-BFGS rounds stop making progress.
//!
//! Convergence is decided by a first-order check at the final point: the
//! largest gradient component not blocked by an active bound must be at most
//! `OptimizerConfig::kkt_tol`. A solver's own termination message is never
//! taken as proof of a minimum.
//!
//! A domain error inside the objective never propagates as a numerical fault:
//! the cost seen by the solver becomes [`DOMAIN_PENALTY`] and the gradient
//! there is zero.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use argmin::core::{CostFunction, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{InferenceError, Result};
use crate::fit::likelihood::Objective;

/// Finite cost returned for points where the objective is undefined.
pub const DOMAIN_PENALTY: f64 = 1e10;

/// A coordinate within this fraction of its box width from a bound is on it.
const ACTIVE_BOUND_FRACTION: f64 = 1e-10;

/// Relative decrease below which a round counts as no progress.
const STALL_TOL: f64 = 1e-12;

/// Minimizer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Maximum L-BFGS iterations per round.
    pub max_iter: u64,
    /// L-BFGS gradient-norm tolerance (cost tolerance is derived from it).
    pub tol: f64,
    /// Largest projected-gradient component accepted as a minimum.
    pub kkt_tol: f64,
    /// Additional L-BFGS rounds after the first one.
    pub max_restarts: usize,
    /// L-BFGS history size.
    pub lbfgs_memory: usize,
    /// Polish with Nelder-Mead when L-BFGS rounds stall.
    pub nelder_mead_fallback: bool,
    pub nelder_mead_max_iter: u64,
    /// Standard-deviation tolerance of the simplex costs.
    pub nelder_mead_tol: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol: 1e-6,
            kkt_tol: 1e-5,
            max_restarts: 5,
            lbfgs_memory: 10,
            nelder_mead_fallback: true,
            nelder_mead_max_iter: 5000,
            nelder_mead_tol: 1e-8,
        }
    }
}

/// Which algorithm produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    Lbfgs,
    NelderMead,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Lbfgs => write!(f, "L-BFGS"),
            Method::NelderMead => write!(f, "Nelder-Mead"),
        }
    }
}

/// Raw minimizer output over a flat parameter vector.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub parameters: Vec<f64>,
    pub fval: f64,
    pub n_iter: u64,
    pub n_fev: usize,
    pub n_gev: usize,
    pub converged: bool,
    pub message: String,
    pub method: Method,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(method={}, fval={:.6}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.method, self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params
        .iter()
        .zip(bounds)
        .map(|(&v, &(lo, hi))| v.clamp(lo, hi))
        .collect()
}

fn at_lower(x: f64, (lo, hi): (f64, f64)) -> bool {
    x - lo <= ACTIVE_BOUND_FRACTION * (hi - lo)
}

fn at_upper(x: f64, (lo, hi): (f64, f64)) -> bool {
    hi - x <= ACTIVE_BOUND_FRACTION * (hi - lo)
}

/// Whether the gradient component `g` at `x` points out of the box.
fn blocked(x: f64, g: f64, bound: (f64, f64)) -> bool {
    (at_lower(x, bound) && g > 0.0) || (at_upper(x, bound) && g < 0.0)
}

/// Largest gradient component not blocked by an active bound.
pub fn projected_gradient_norm(grad: &[f64], x: &[f64], bounds: &[(f64, f64)]) -> f64 {
    grad.iter()
        .zip(x)
        .zip(bounds)
        .filter(|((g, x), b)| !blocked(**x, **g, **b))
        .map(|((g, _), _)| g.abs())
        .fold(0.0, f64::max)
}

/// Objective value with domain errors and non-finite values replaced by the
/// penalty.
fn penalized(objective: &dyn Objective, params: &[f64]) -> Result<f64> {
    match objective.eval(params) {
        Ok(v) if v.is_finite() => Ok(v),
        Ok(_) | Err(InferenceError::Domain(_)) => Ok(DOMAIN_PENALTY),
        Err(e) => Err(e),
    }
}

#[derive(Default)]
struct FuncCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

/// argmin view of an objective over the `free` coordinates of `base`.
struct ArgminProblem<'a> {
    objective: &'a dyn Objective,
    bounds: &'a [(f64, f64)],
    base: &'a [f64],
    free: &'a [usize],
    counts: Arc<FuncCounts>,
}

impl ArgminProblem<'_> {
    /// Full clamped parameter vector for a point of the reduced problem.
    fn expand(&self, reduced: &[f64]) -> Vec<f64> {
        let mut full = self.base.to_vec();
        for (&i, &v) in self.free.iter().zip(reduced) {
            full[i] = v;
        }
        clamp_params(&full, self.bounds)
    }

    fn reduce(&self, full: &[f64]) -> Vec<f64> {
        self.free.iter().map(|&i| full[i]).collect()
    }
}

impl CostFunction for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        penalized(self.objective, &self.expand(params))
            .map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl Gradient for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        let full = self.expand(params);
        let grad = match self.objective.gradient(&full) {
            Ok(g) if g.iter().all(|v| v.is_finite()) => g,
            // The penalty plateau is flat.
            Ok(_) | Err(InferenceError::Domain(_)) => return Ok(vec![0.0; self.free.len()]),
            Err(e) => return Err(argmin::core::Error::msg(e.to_string())),
        };

        Ok(self
            .free
            .iter()
            .map(|&i| {
                if blocked(full[i], grad[i], self.bounds[i]) {
                    0.0
                } else {
                    grad[i]
                }
            })
            .collect())
    }
}

/// Running totals and best point across rounds.
struct Progress {
    x: Vec<f64>,
    fval: f64,
    method: Method,
    message: String,
    n_iter: u64,
    n_fev: usize,
    n_gev: usize,
}

impl Progress {
    /// Fold a solver run in; returns whether it improved the best point.
    fn absorb(&mut self, run: OptimizationResult) -> bool {
        self.n_iter += run.n_iter;
        self.n_fev += run.n_fev;
        self.n_gev += run.n_gev;
        self.message = run.message;
        if run.fval < self.fval {
            self.x = run.parameters;
            self.fval = run.fval;
            self.method = run.method;
            true
        } else {
            false
        }
    }

    fn finish(self, converged: bool) -> OptimizationResult {
        OptimizationResult {
            parameters: self.x,
            fval: self.fval,
            n_iter: self.n_iter,
            n_fev: self.n_fev,
            n_gev: self.n_gev,
            converged,
            message: self.message,
            method: self.method,
        }
    }
}

/// Bounded minimizer (active-set L-BFGS with optional Nelder-Mead fallback).
#[derive(Debug, Clone, Default)]
pub struct Minimizer {
    config: OptimizerConfig,
}

impl Minimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Minimize `objective` from `init` inside `bounds`.
    ///
    /// A non-converged run is still `Ok`: the result carries the best point
    /// found and `converged = false`.
    pub fn minimize(
        &self,
        objective: &dyn Objective,
        init: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init.len() != bounds.len() || init.len() != objective.dim() {
            return Err(InferenceError::Config(format!(
                "parameter/bounds/objective dimension mismatch: {} / {} / {}",
                init.len(),
                bounds.len(),
                objective.dim()
            )));
        }
        if init.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::Config(format!(
                "non-finite initial guess {init:?}"
            )));
        }

        let start = clamp_params(init, bounds);
        let n = start.len();
        let mut progress = Progress {
            fval: penalized(objective, &start)?,
            x: start,
            method: Method::Lbfgs,
            message: String::new(),
            n_iter: 0,
            n_fev: 1,
            n_gev: 0,
        };
        let mut fixed = vec![false; n];
        let mut polished = !self.config.nelder_mead_fallback;
        let mut last_norm = f64::INFINITY;

        for round in 0..=self.config.max_restarts {
            let free: Vec<usize> = (0..n).filter(|&i| !fixed[i]).collect();
            let before = progress.fval;
            if !free.is_empty() {
                match self.run_lbfgs(objective, &progress.x, bounds, &free) {
                    Ok(run) => {
                        progress.absorb(run);
                    }
                    Err(e) => {
                        warn!("L-BFGS round {round} failed: {e}");
                        progress.message = e.to_string();
                    }
                }
            }

            let next_fixed = match self.stationarity(objective, &progress.x, bounds) {
                Some((norm, _)) if norm <= self.config.kkt_tol => {
                    debug!("round {round}: projected gradient {norm:.3e}, converged");
                    return Ok(progress.finish(true));
                }
                Some((norm, grad)) => {
                    last_norm = norm;
                    active_set(&progress.x, &grad, bounds)
                }
                None => vec![false; n],
            };
            debug!(
                "round {round}: fval={:.9}, projected gradient {last_norm:.3e}",
                progress.fval
            );

            let stalled = before - progress.fval <= STALL_TOL * (1.0 + progress.fval.abs());
            if stalled && next_fixed == fixed {
                if polished {
                    break;
                }
                polished = true;
                match self.run_nelder_mead(objective, &progress.x, bounds) {
                    Ok(run) => {
                        progress.absorb(run);
                    }
                    Err(e) => {
                        warn!("Nelder-Mead failed: {e}");
                        progress.message = e.to_string();
                    }
                }
                match self.stationarity(objective, &progress.x, bounds) {
                    Some((norm, _)) if norm <= self.config.kkt_tol => {
                        return Ok(progress.finish(true));
                    }
                    Some((norm, grad)) => {
                        last_norm = norm;
                        fixed = active_set(&progress.x, &grad, bounds);
                    }
                    None => fixed = vec![false; n],
                }
            } else {
                fixed = next_fixed;
            }
        }

        progress.message = format!(
            "{}; projected gradient {last_norm:.3e} above {:.1e}",
            progress.message, self.config.kkt_tol
        );
        warn!("minimizer stopped without a verified minimum: {}", progress.message);
        Ok(progress.finish(false))
    }

    /// Projected-gradient norm and raw gradient at `x`, when the gradient is
    /// defined there.
    fn stationarity(
        &self,
        objective: &dyn Objective,
        x: &[f64],
        bounds: &[(f64, f64)],
    ) -> Option<(f64, Vec<f64>)> {
        match objective.gradient(x) {
            Ok(grad) if grad.iter().all(|g| g.is_finite()) => {
                Some((projected_gradient_norm(&grad, x, bounds), grad))
            }
            _ => None,
        }
    }

    fn run_lbfgs(
        &self,
        objective: &dyn Objective,
        start: &[f64],
        bounds: &[(f64, f64)],
        free: &[usize],
    ) -> Result<OptimizationResult> {
        let counts = Arc::new(FuncCounts::default());
        let problem = ArgminProblem {
            objective,
            bounds,
            base: start,
            free,
            counts: counts.clone(),
        };
        let reduced_start = problem.reduce(start);

        let tol_cost = if self.config.tol == 0.0 {
            0.0
        } else {
            (self.config.tol * self.config.tol).max(f64::EPSILON)
        };
        let solver = LBFGS::new(MoreThuenteLineSearch::new(), self.config.lbfgs_memory)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| InferenceError::Config(format!("optimizer tolerance (grad): {e}")))?
            .with_tolerance_cost(tol_cost)
            .map_err(|e| InferenceError::Config(format!("optimizer tolerance (cost): {e}")))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(reduced_start).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| InferenceError::Optimizer(format!("L-BFGS: {e}")))?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| InferenceError::Optimizer("L-BFGS returned no parameters".into()))?;
        let parameters = res.problem.problem.as_ref().map_or_else(
            || clamp_params(start, bounds),
            |p| p.expand(best),
        );

        Ok(OptimizationResult {
            parameters,
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: counts.cost.load(Ordering::Relaxed),
            n_gev: counts.grad.load(Ordering::Relaxed),
            converged: false,
            message: state.get_termination_status().to_string(),
            method: Method::Lbfgs,
        })
    }

    fn run_nelder_mead(
        &self,
        objective: &dyn Objective,
        start: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        let counts = Arc::new(FuncCounts::default());
        let free: Vec<usize> = (0..start.len()).collect();
        let problem = ArgminProblem {
            objective,
            bounds,
            base: start,
            free: &free,
            counts: counts.clone(),
        };

        let solver = NelderMead::new(initial_simplex(start, bounds))
            .with_sd_tolerance(self.config.nelder_mead_tol)
            .map_err(|e| InferenceError::Config(format!("simplex tolerance: {e}")))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.max_iters(self.config.nelder_mead_max_iter))
            .run()
            .map_err(|e| InferenceError::Optimizer(format!("Nelder-Mead: {e}")))?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| InferenceError::Optimizer("Nelder-Mead returned no parameters".into()))?;

        Ok(OptimizationResult {
            parameters: clamp_params(best, bounds),
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: counts.cost.load(Ordering::Relaxed),
            n_gev: 0,
            converged: false,
            message: state.get_termination_status().to_string(),
            method: Method::NelderMead,
        })
    }
}

/// Coordinates on a bound whose gradient points out of the box.
fn active_set(x: &[f64], grad: &[f64], bounds: &[(f64, f64)]) -> Vec<bool> {
    x.iter()
        .zip(grad)
        .zip(bounds)
        .map(|((&x, &g), &b)| blocked(x, g, b))
        .collect()
}

/// Start point plus one vertex per axis, stepping inward from any bound.
fn initial_simplex(start: &[f64], bounds: &[(f64, f64)]) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(start.len() + 1);
    simplex.push(start.to_vec());
    for (i, &(lo, hi)) in bounds.iter().enumerate() {
        let step = 0.05 * start[i].abs().max(1.0);
        let mut vertex = start.to_vec();
        vertex[i] = if start[i] + step <= hi {
            start[i] + step
        } else {
            (start[i] - step).max(lo)
        };
        simplex.push(vertex);
    }
    simplex
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // f(x, y) = (x - 2)^2 + (y - 3)^2, minimum at (2, 3).
    struct Quadratic;

    impl Objective for Quadratic {
        fn dim(&self) -> usize {
            2
        }

        fn eval(&self, p: &[f64]) -> Result<f64> {
            Ok((p[0] - 2.0).powi(2) + (p[1] - 3.0).powi(2))
        }

        fn gradient(&self, p: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![2.0 * (p[0] - 2.0), 2.0 * (p[1] - 3.0)])
        }
    }

    #[test]
    fn lbfgs_finds_unconstrained_minimum() {
        let res = Minimizer::default()
            .minimize(&Quadratic, &[0.0, 0.0], &[(-10.0, 10.0), (-10.0, 10.0)])
            .unwrap();
        assert!(res.converged, "status: {}", res.message);
        assert_eq!(res.method, Method::Lbfgs);
        assert_relative_eq!(res.parameters[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(res.parameters[1], 3.0, epsilon = 1e-4);
        assert!(res.n_fev > 0 && res.n_gev > 0);
    }

    #[test]
    fn bounds_are_respected() {
        let res = Minimizer::default()
            .minimize(&Quadratic, &[4.0, 1.5], &[(3.0, 5.0), (1.0, 2.0)])
            .unwrap();
        assert_relative_eq!(res.parameters[0], 3.0, epsilon = 1e-4);
        assert_relative_eq!(res.parameters[1], 2.0, epsilon = 1e-4);
        assert_relative_eq!(res.fval, 2.0, epsilon = 1e-6);
        assert!(res.converged, "status: {}", res.message);
    }

    // Correlated bowl with its free minimum at (2, 3).
    struct Tilted;

    impl Objective for Tilted {
        fn dim(&self) -> usize {
            2
        }

        fn eval(&self, p: &[f64]) -> Result<f64> {
            let (u, v) = (p[0] - 2.0, p[1] - 3.0);
            Ok(u * u + v * v + 1.5 * u * v)
        }

        fn gradient(&self, p: &[f64]) -> Result<Vec<f64>> {
            let (u, v) = (p[0] - 2.0, p[1] - 3.0);
            Ok(vec![2.0 * u + 1.5 * v, 2.0 * v + 1.5 * u])
        }
    }

    #[test]
    fn active_bound_does_not_stop_the_free_coordinates() {
        // x is pinned at 3; the constrained optimum then has y = 3 - 0.75.
        let bounds = [(3.0, 5.0), (-10.0, 10.0)];
        let minimizer = Minimizer::default();
        let res = minimizer.minimize(&Tilted, &[4.5, 8.0], &bounds).unwrap();
        assert!(res.converged, "status: {}", res.message);
        assert_relative_eq!(res.parameters[0], 3.0, epsilon = 1e-9);
        assert_relative_eq!(res.parameters[1], 2.25, epsilon = 1e-4);

        let again = minimizer.minimize(&Tilted, &res.parameters, &bounds).unwrap();
        assert!(again.fval >= res.fval - 1e-9);
    }

    #[test]
    fn projected_gradient_skips_components_pushing_outward() {
        let bounds = [(0.0, 1.0), (0.0, 1.0), (0.0, 1.0)];
        // Lower bound pushing out, upper bound pushing out, interior.
        let norm = projected_gradient_norm(&[2.0, -3.0, 0.5], &[0.0, 1.0, 0.5], &bounds);
        assert_relative_eq!(norm, 0.5);
        // Pointing back into the box still counts.
        let norm = projected_gradient_norm(&[-2.0, 0.0, 0.0], &[0.0, 0.5, 0.5], &bounds);
        assert_relative_eq!(norm, 2.0);
    }

    struct Unreachable;

    impl Objective for Unreachable {
        fn dim(&self) -> usize {
            1
        }

        fn eval(&self, p: &[f64]) -> Result<f64> {
            Ok(p[0])
        }

        fn gradient(&self, _p: &[f64]) -> Result<Vec<f64>> {
            Err(InferenceError::Domain("no derivative".into()))
        }
    }

    #[test]
    fn missing_gradient_is_never_reported_as_converged() {
        let res = Minimizer::new(OptimizerConfig {
            nelder_mead_fallback: false,
            ..OptimizerConfig::default()
        })
        .minimize(&Unreachable, &[0.5], &[(0.0, 1.0)])
        .unwrap();
        assert!(!res.converged);
        assert!(res.fval.is_finite());
    }

    // Undefined (domain error) for x < 1; true minimum at x = 1.5.
    struct Walled;

    impl Objective for Walled {
        fn dim(&self) -> usize {
            1
        }

        fn eval(&self, p: &[f64]) -> Result<f64> {
            if p[0] < 1.0 {
                return Err(InferenceError::Domain("x < 1".into()));
            }
            Ok((p[0] - 1.5).powi(2))
        }
    }

    #[test]
    fn domain_errors_become_finite_penalties() {
        let res = Minimizer::default()
            .minimize(&Walled, &[4.0], &[(-10.0, 10.0)])
            .unwrap();
        assert!(res.converged, "status: {}", res.message);
        assert!(res.fval.is_finite());
        assert_relative_eq!(res.parameters[0], 1.5, epsilon = 1e-3);
    }

    #[test]
    fn iteration_budget_marks_result_unconverged() {
        let config = OptimizerConfig {
            max_iter: 1,
            tol: 1e-14,
            max_restarts: 0,
            nelder_mead_fallback: false,
            ..OptimizerConfig::default()
        };
        // Rosenbrock needs far more than one iteration.
        struct Rosenbrock;
        impl Objective for Rosenbrock {
            fn dim(&self) -> usize {
                2
            }
            fn eval(&self, p: &[f64]) -> Result<f64> {
                Ok((1.0 - p[0]).powi(2) + 100.0 * (p[1] - p[0] * p[0]).powi(2))
            }
        }
        let res = Minimizer::new(config)
            .minimize(&Rosenbrock, &[-1.2, 1.0], &[(-5.0, 5.0), (-5.0, 5.0)])
            .unwrap();
        assert!(!res.converged);
        assert!(res.fval.is_finite());
        assert_eq!(res.parameters.len(), 2);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let err = Minimizer::default()
            .minimize(&Quadratic, &[0.0], &[(-1.0, 1.0)])
            .unwrap_err();
        assert!(matches!(err, InferenceError::Config(_)));
    }

    #[test]
    fn simplex_steps_inward_at_upper_bound() {
        let s = initial_simplex(&[1.0, 0.0], &[(0.0, 1.0), (-1.0, 1.0)]);
        assert_eq!(s.len(), 3);
        assert!(s[1][0] < 1.0);
        assert!(s[2][1] > 0.0);
    }
}
