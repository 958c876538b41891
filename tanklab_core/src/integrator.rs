//! Adaptive Dormand-Prince 5(4) integration for the two-state plant.

use thiserror::Error;

/// The right-hand side produced non-finite values even at the minimum step.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
#[error("integration diverged at t = {t} s (step {step} s)")]
pub struct Diverged {
    pub t: f64,
    pub step: f64,
}

/// Error-controlled RK45 stepper.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dopri5 {
    pub rtol: f64,
    pub atol: f64,
    /// Steps below this size are accepted regardless of the error estimate.
    pub min_step: f64,
}

impl Default for Dopri5 {
    fn default() -> Self {
        Self {
            rtol: 1e-6,
            atol: 1e-9,
            min_step: 1e-6,
        }
    }
}

const C: [f64; 6] = [1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];
const A2: [f64; 1] = [1.0 / 5.0];
const A3: [f64; 2] = [3.0 / 40.0, 9.0 / 40.0];
const A4: [f64; 3] = [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0];
const A5: [f64; 4] = [
    19372.0 / 6561.0,
    -25360.0 / 2187.0,
    64448.0 / 6561.0,
    -212.0 / 729.0,
];
const A6: [f64; 5] = [
    9017.0 / 3168.0,
    -355.0 / 33.0,
    46732.0 / 5247.0,
    49.0 / 176.0,
    -5103.0 / 18656.0,
];
// Fifth-order weights; also the last stage (FSAL).
const B: [f64; 6] = [
    35.0 / 384.0,
    0.0,
    500.0 / 1113.0,
    125.0 / 192.0,
    -2187.0 / 6784.0,
    11.0 / 84.0,
];
// Fifth minus fourth order weights.
const E: [f64; 7] = [
    71.0 / 57600.0,
    0.0,
    -71.0 / 16695.0,
    71.0 / 1920.0,
    -17253.0 / 339200.0,
    22.0 / 525.0,
    -1.0 / 40.0,
];

type State = [f64; 2];

#[inline]
fn is_finite(y: State) -> bool {
    y[0].is_finite() && y[1].is_finite()
}

#[inline]
fn axpy(y: State, h: f64, ks: &[State], w: &[f64]) -> State {
    let mut out = y;
    for (k, &wi) in ks.iter().zip(w) {
        out[0] += h * wi * k[0];
        out[1] += h * wi * k[1];
    }
    out
}

impl Dopri5 {
    /// Integrate `f(t, y)` from `t = 0` to `t = span`, returning the end state.
    ///
    /// A non-positive span returns `y0` unchanged. A step with non-finite
    /// values is retried smaller; at `min_step` it is an error.
    pub fn integrate<F>(&self, f: F, y0: State, span: f64) -> Result<State, Diverged>
    where
        F: Fn(f64, State) -> State,
    {
        if !is_finite(y0) {
            return Err(Diverged { t: 0.0, step: 0.0 });
        }
        if span <= 0.0 || !span.is_finite() {
            return Ok(y0);
        }
        let mut t = 0.0;
        let mut y = y0;
        let mut h = (span / 10.0).max(self.min_step);
        let mut k1 = f(t, y);

        while t < span {
            if t + h > span {
                h = span - t;
            }
            let k2 = f(t + C[0] * h, axpy(y, h, &[k1], &A2));
            let k3 = f(t + C[1] * h, axpy(y, h, &[k1, k2], &A3));
            let k4 = f(t + C[2] * h, axpy(y, h, &[k1, k2, k3], &A4));
            let k5 = f(t + C[3] * h, axpy(y, h, &[k1, k2, k3, k4], &A5));
            let k6 = f(t + C[4] * h, axpy(y, h, &[k1, k2, k3, k4, k5], &A6));
            let y_new = axpy(y, h, &[k1, k2, k3, k4, k5, k6], &B);
            let k7 = f(t + h, y_new);

            let err_vec = axpy([0.0, 0.0], h, &[k1, k2, k3, k4, k5, k6, k7], &E);
            let mut acc = 0.0;
            for i in 0..2 {
                let scale = self.atol + self.rtol * y[i].abs().max(y_new[i].abs());
                acc += (err_vec[i] / scale).powi(2);
            }
            let err = (acc / 2.0).sqrt();

            if !err.is_finite() || !is_finite(y_new) || !is_finite(k7) {
                if h <= self.min_step {
                    return Err(Diverged { t, step: h });
                }
                h = (h * 0.2).max(self.min_step);
                continue;
            }
            if err <= 1.0 || h <= self.min_step {
                t += h;
                y = y_new;
                k1 = k7;
            }
            let factor = if err == 0.0 {
                5.0
            } else {
                (0.9 * err.powf(-0.2)).clamp(0.2, 5.0)
            };
            h = (h * factor).max(self.min_step);
        }
        Ok(y)
    }
}
