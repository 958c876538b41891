//! Model-predictive level controller.
//!
//! The internal model is two cascaded first-order lags (pump -> h1 -> h2),
//! discretized exactly (zero-order hold) for every horizon interval. Each
//! solve builds a small QP over one command move per interval:
//!
//! - objective: squared error of predicted h2 (plus measurement bias) against
//!   a first-order reference trajectory, plus `move_cost * (du)^2`
//! - constraints: `0 <= u <= 1` and `|u_k - u_{k-1}| <= max_rate`
//!
//! and returns the first move. The QP goes to OSQP in its native form
//! `min 0.5 x'Px + q'x  s.t.  l <= Ax <= u`.

use nalgebra::{DMatrix, DVector, Matrix2, Matrix3, Vector2};
use osqp::{CscMatrix, Problem, Settings, Status};

use crate::config::{LagModel, MpcCfg, SolverCfg};
use crate::error::TankError;
use crate::plant::Levels;

/// Controller computing the next pump command.
pub trait Controller {
    /// Seed the internal state from levels observed one control interval
    /// before the first `solve`.
    fn prime(&mut self, levels: Levels);

    /// Next command in `[0, 1]` for `setpoint` given the latest measured h2
    /// and the command applied during the previous interval.
    fn solve(
        &mut self,
        setpoint: f64,
        measured_h2: f64,
        previous_command: f64,
    ) -> Result<f64, TankError>;
}

impl<T: Controller + ?Sized> Controller for Box<T> {
    fn prime(&mut self, levels: Levels) {
        (**self).prime(levels);
    }

    fn solve(&mut self, setpoint: f64, measured_h2: f64, previous_command: f64) -> Result<f64, TankError> {
        (**self).solve(setpoint, measured_h2, previous_command)
    }
}

/// Zero-order-hold discretization `x+ = phi x + gamma u` of a [`LagModel`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Discrete {
    pub phi: Matrix2<f64>,
    pub gamma: Vector2<f64>,
}

impl Discrete {
    /// Exact discretization over `dt` seconds via the matrix exponential of
    /// the augmented system `[[A, B], [0, 0]]`.
    pub fn new(model: &LagModel, dt: f64) -> Self {
        let a1 = 1.0 / model.tau_h1;
        let a2 = 1.0 / model.tau_h2;
        #[rustfmt::skip]
        let m = Matrix3::new(
            -a1,                 0.0, model.gain_h1 * a1,
            model.gain_h2 * a2,  -a2, 0.0,
            0.0,                 0.0, 0.0,
        ) * dt;
        let e = m.exp();
        Self {
            phi: e.fixed_view::<2, 2>(0, 0).into_owned(),
            gamma: e.fixed_view::<2, 1>(0, 2).into_owned(),
        }
    }

    #[inline]
    pub fn step(&self, x: &Vector2<f64>, u: f64) -> Vector2<f64> {
        self.phi * x + self.gamma * u
    }
}

/// Dense QP over the command moves.
#[derive(Debug, Clone)]
pub struct QpProblem {
    pub h: DMatrix<f64>,
    pub f: DVector<f64>,
    pub a: DMatrix<f64>,
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
}

/// Dense matrix to CSC, keeping only the upper triangle when `upper` is set
/// (OSQP reads P from its upper triangle).
fn to_csc(m: &DMatrix<f64>, upper: bool) -> CscMatrix<'static> {
    let mut indptr = Vec::with_capacity(m.ncols() + 1);
    let mut indices = Vec::new();
    let mut data = Vec::new();
    indptr.push(0);
    for j in 0..m.ncols() {
        let rows = if upper { (j + 1).min(m.nrows()) } else { m.nrows() };
        for i in 0..rows {
            let v = m[(i, j)];
            if v != 0.0 {
                indices.push(i);
                data.push(v);
            }
        }
        indptr.push(indices.len());
    }
    CscMatrix {
        nrows: m.nrows(),
        ncols: m.ncols(),
        indptr: indptr.into(),
        indices: indices.into(),
        data: data.into(),
    }
}

fn osqp_settings(cfg: &SolverCfg) -> Settings {
    Settings::default()
        .verbose(false)
        .rho(cfg.rho)
        .sigma(cfg.sigma)
        .eps_abs(cfg.eps)
        .eps_rel(cfg.eps)
        .max_iter(u32::try_from(cfg.max_iter).unwrap_or(u32::MAX))
        .polish(true)
}

impl QpProblem {
    /// Solve with OSQP and return the optimal moves.
    pub fn solve(&self, cfg: &SolverCfg) -> Result<Vec<f64>, TankError> {
        let non_convergence = |msg: String| TankError::SolverNonConvergence(msg);
        let mut problem = Problem::new(
            to_csc(&self.h, true),
            self.f.as_slice(),
            to_csc(&self.a, false),
            self.lower.as_slice(),
            self.upper.as_slice(),
            &osqp_settings(cfg),
        )
        .map_err(|e| non_convergence(format!("osqp setup failed: {e:?}")))?;

        let status = problem.solve();
        let reason = match status {
            Status::Solved(_) => None,
            Status::SolvedInaccurate(_) => Some("solved inaccurately"),
            Status::MaxIterationsReached(_) => Some("iteration limit reached"),
            _ => Some("no solution"),
        };
        if let Some(reason) = reason {
            return Err(non_convergence(format!(
                "osqp: {reason} (max_iter {})",
                cfg.max_iter
            )));
        }
        let x = status
            .x()
            .ok_or_else(|| non_convergence("osqp returned no primal solution".into()))?;
        if x.iter().any(|v| !v.is_finite()) {
            return Err(non_convergence("osqp returned non-finite moves".into()));
        }
        Ok(x.to_vec())
    }
}

#[derive(Debug, Clone)]
pub struct MpcController {
    cfg: MpcCfg,
    /// One discretization per horizon interval.
    steps: Vec<Discrete>,
    /// Discretization over one control interval, for state propagation.
    cycle: Discrete,
    state: Option<Vector2<f64>>,
    bias: f64,
}

impl MpcController {
    /// `interval_s` is the control period the loop calls `solve` at.
    pub fn new(cfg: MpcCfg, interval_s: f64) -> Result<Self, TankError> {
        validate(&cfg, interval_s)?;
        let steps = cfg
            .horizon
            .windows(2)
            .map(|w| Discrete::new(&cfg.model, w[1] - w[0]))
            .collect();
        let cycle = Discrete::new(&cfg.model, interval_s);
        Ok(Self {
            cfg,
            steps,
            cycle,
            state: None,
            bias: 0.0,
        })
    }

    /// Current additive correction applied to predicted h2.
    pub fn bias(&self) -> f64 {
        self.bias
    }

    /// Reference value at horizon time `t` seconds.
    fn reference(&self, setpoint: f64, measured: f64, t: f64) -> f64 {
        if self.cfg.tau_ref > 0.0 {
            setpoint + (measured - setpoint) * (-t / self.cfg.tau_ref).exp()
        } else {
            setpoint
        }
    }

    pub fn build_problem(&self, x0: Vector2<f64>, setpoint: f64, measured: f64, prev: f64) -> QpProblem {
        let n = self.steps.len();

        // Free response c and step-response matrix S for predicted h2.
        let mut s = DMatrix::<f64>::zeros(n, n);
        let mut c = DVector::<f64>::zeros(n);
        let mut r = DVector::<f64>::zeros(n);
        let mut sens = vec![Vector2::<f64>::zeros(); n];
        let mut x = x0;
        for (k, d) in self.steps.iter().enumerate() {
            x = d.phi * x;
            for (j, v) in sens.iter_mut().enumerate().take(k + 1) {
                let mut next = d.phi * *v;
                if j == k {
                    next += d.gamma;
                }
                *v = next;
                s[(k, j)] = next[1];
            }
            c[k] = x[1] + self.bias;
            r[k] = self.reference(setpoint, measured, self.cfg.horizon[k + 1]);
        }

        // Moves: D u - d, with d = [prev, 0, ...].
        let mut dm = DMatrix::<f64>::identity(n, n);
        for i in 1..n {
            dm[(i, i - 1)] = -1.0;
        }
        let mut d = DVector::<f64>::zeros(n);
        d[0] = prev;

        let st = s.transpose();
        let dt = dm.transpose();
        let lambda = self.cfg.move_cost;
        let h = (&st * &s + (&dt * &dm) * lambda) * 2.0;
        let f = (&st * (&c - &r) - (&dt * &d) * lambda) * 2.0;

        let mut a = DMatrix::<f64>::zeros(2 * n, n);
        a.view_mut((0, 0), (n, n)).copy_from(&DMatrix::<f64>::identity(n, n));
        a.view_mut((n, 0), (n, n)).copy_from(&dm);

        let rate = self.cfg.max_rate;
        let mut lower = DVector::<f64>::zeros(2 * n);
        let mut upper = DVector::<f64>::from_element(2 * n, 1.0);
        for i in 0..n {
            lower[n + i] = d[i] - rate;
            upper[n + i] = d[i] + rate;
        }

        QpProblem {
            h,
            f,
            a,
            lower,
            upper,
        }
    }
}

fn validate(cfg: &MpcCfg, interval_s: f64) -> Result<(), TankError> {
    let bad = |m: &str| Err(TankError::Config(m.to_string()));
    if cfg.horizon.len() < 2 || cfg.horizon[0] != 0.0 {
        return bad("horizon must start at 0 and have at least two points");
    }
    if cfg.horizon.windows(2).any(|w| !(w[1] > w[0])) {
        return bad("horizon must be strictly increasing");
    }
    let m = &cfg.model;
    if !(m.tau_h1 > 0.0 && m.tau_h2 > 0.0) || !m.gain_h1.is_finite() || !m.gain_h2.is_finite() {
        return bad("model time constants must be > 0 and gains finite");
    }
    if !(cfg.max_rate > 0.0 && cfg.max_rate <= 1.0) {
        return bad("max_rate must be in (0, 1]");
    }
    if !(cfg.move_cost >= 0.0) || !(cfg.tau_ref >= 0.0) {
        return bad("move_cost and tau_ref must be >= 0");
    }
    if !(0.0..=1.0).contains(&cfg.feedback) {
        return bad("feedback must be in [0, 1]");
    }
    if !(interval_s > 0.0 && interval_s.is_finite()) {
        return bad("control interval must be > 0");
    }
    Ok(())
}

impl Controller for MpcController {
    fn prime(&mut self, levels: Levels) {
        let l = levels.clamped();
        self.state = Some(Vector2::new(l.h1, l.h2));
        self.bias = 0.0;
        tracing::debug!(h1 = l.h1, h2 = l.h2, "mpc primed");
    }

    fn solve(
        &mut self,
        setpoint: f64,
        measured_h2: f64,
        previous_command: f64,
    ) -> Result<f64, TankError> {
        let state = self
            .state
            .ok_or_else(|| TankError::State("controller solved before prime".into()))?;
        let prev = if previous_command.is_finite() {
            previous_command.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let x = self.cycle.step(&state, prev);
        self.state = Some(x);
        let mismatch = measured_h2 - x[1];
        self.bias += self.cfg.feedback * (mismatch - self.bias);

        let moves = self
            .build_problem(x, setpoint, measured_h2, prev)
            .solve(&self.cfg.solver)?;

        let rate = self.cfg.max_rate;
        let u = moves[0]
            .clamp(0.0, 1.0)
            .clamp(prev - rate, prev + rate)
            .clamp(0.0, 1.0);
        tracing::trace!(
            setpoint,
            measured_h2,
            model_h2 = x[1],
            bias = self.bias,
            command = u,
            "mpc solve"
        );
        Ok(u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> MpcCfg {
        MpcCfg {
            model: LagModel::from_linear(
                0.02,
                tanklab_config::DEFAULT_K1,
                tanklab_config::DEFAULT_K2,
                0.87,
            ),
            ..MpcCfg::default()
        }
    }

    fn scalar(target: f64, lo: f64, hi: f64) -> QpProblem {
        // (x - target)^2 up to a constant
        QpProblem {
            h: DMatrix::from_element(1, 1, 2.0),
            f: DVector::from_element(1, -2.0 * target),
            a: DMatrix::identity(1, 1),
            lower: DVector::from_element(1, lo),
            upper: DVector::from_element(1, hi),
        }
    }

    #[test]
    fn qp_interior_optimum_is_found() {
        let x = scalar(0.3, 0.0, 1.0).solve(&SolverCfg::default()).unwrap();
        assert!((x[0] - 0.3).abs() < 1e-5, "{}", x[0]);
    }

    #[test]
    fn qp_active_bound_is_respected() {
        let x = scalar(2.0, 0.0, 1.0).solve(&SolverCfg::default()).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-5, "{}", x[0]);
    }

    #[test]
    fn upper_triangle_only_for_hessian() {
        let m = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0]);
        let csc = to_csc(&m, true);
        assert_eq!(&*csc.indptr, &[0, 1, 3]);
        assert_eq!(&*csc.indices, &[0, 0, 1]);
        assert_eq!(&*csc.data, &[2.0, 1.0, 3.0]);
        assert_eq!(to_csc(&m, false).data.len(), 4);
    }

    #[test]
    fn first_move_is_locally_optimal() {
        let c = MpcController::new(cfg(), 1.0).unwrap();
        let p = c.build_problem(Vector2::new(0.1, 0.1), 0.5, 0.1, 0.3);
        let moves = p.solve(&SolverCfg::default()).unwrap();
        assert!(moves.iter().all(|u| (-1e-4..=1.0 + 1e-4).contains(u)));
        // Cost never improves on the solver's answer along the first move.
        let cost = |u: &DVector<f64>| 0.5 * (u.transpose() * &p.h * u)[0] + p.f.dot(u);
        let best = DVector::from_vec(moves.clone());
        for step in [-0.01, 0.01] {
            let mut nudged = best.clone();
            nudged[0] += step;
            let feasible = (0..p.a.nrows()).all(|i| {
                let v = (p.a.row(i) * &nudged)[0];
                v >= p.lower[i] - 1e-9 && v <= p.upper[i] + 1e-9
            });
            if feasible {
                assert!(cost(&nudged) >= cost(&best) - 1e-7);
            }
        }
    }

    #[test]
    fn long_interval_reaches_dc_gain() {
        let m = cfg().model;
        let d = Discrete::new(&m, 5000.0);
        assert!((d.gamma[0] - m.gain_h1).abs() < 1e-6);
        assert!((d.gamma[1] - m.dc_gain()).abs() < 1e-6);
        assert!(d.phi.amax() < 1e-9);
    }

    #[test]
    fn short_interval_matches_first_order_h1() {
        let m = cfg().model;
        let d = Discrete::new(&m, 1.0);
        let decay = (-1.0 / m.tau_h1).exp();
        assert!((d.phi[(0, 0)] - decay).abs() < 1e-12);
        assert!((d.gamma[0] - m.gain_h1 * (1.0 - decay)).abs() < 1e-12);
    }

    #[test]
    fn solve_before_prime_is_a_state_error() {
        let mut c = MpcController::new(cfg(), 1.0).unwrap();
        assert!(matches!(c.solve(0.5, 0.0, 0.0), Err(TankError::State(_))));
    }

    #[test]
    fn first_move_is_rate_limited() {
        let mut c = MpcController::new(cfg(), 1.0).unwrap();
        c.prime(Levels::EMPTY);
        let u = c.solve(0.5, 0.0, 0.0).unwrap();
        assert!((u - 0.1).abs() < 1e-4, "u = {u}");
    }

    #[test]
    fn setpoint_below_level_drives_command_down() {
        let mut c = MpcController::new(cfg(), 1.0).unwrap();
        c.prime(Levels::new(0.5, 0.5));
        let u = c.solve(0.1, 0.5, 0.0).unwrap();
        assert!(u.abs() < 1e-4, "u = {u}");
    }

    #[test]
    fn equilibrium_holds_its_command() {
        let cfg = cfg();
        let u_eq = 0.5;
        let h1 = cfg.model.gain_h1 * u_eq;
        let h2 = cfg.model.gain_h2 * h1;
        let mut c = MpcController::new(cfg, 1.0).unwrap();
        c.prime(Levels::new(h1, h2));
        for _ in 0..3 {
            let u = c.solve(h2, h2, u_eq).unwrap();
            assert!((u - u_eq).abs() < 1e-3, "u = {u}");
        }
        assert!(c.bias().abs() < 1e-9);
    }

    #[test]
    fn starved_solver_reports_non_convergence() {
        let mut cfg = cfg();
        cfg.solver = SolverCfg {
            max_iter: 1,
            ..SolverCfg::default()
        };
        let mut c = MpcController::new(cfg, 1.0).unwrap();
        c.prime(Levels::EMPTY);
        assert!(matches!(
            c.solve(0.5, 0.0, 0.0),
            Err(TankError::SolverNonConvergence(_))
        ));
    }

    #[test]
    fn rejects_horizon_not_starting_at_zero() {
        let mut cfg = cfg();
        cfg.horizon = vec![1.0, 2.0];
        assert!(matches!(
            MpcController::new(cfg, 1.0),
            Err(TankError::Config(_))
        ));
    }
}
