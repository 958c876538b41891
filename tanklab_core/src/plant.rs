//! Two-tank plant dynamics.
//!
//! The pump fills the upper tank (h1), which drains into the lower tank (h2).
//! A tank at or above `capacity` cannot rise any further: its derivative is
//! forced to 0 when positive. Levels below 0 are treated as empty.

/// Tank levels `(h1, h2)` in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Levels {
    pub h1: f64,
    pub h2: f64,
}

impl Levels {
    pub const EMPTY: Levels = Levels { h1: 0.0, h2: 0.0 };

    pub fn new(h1: f64, h2: f64) -> Self {
        Self { h1, h2 }
    }

    /// Both levels with negatives (and NaN) pulled up to 0.
    pub fn clamped(self) -> Self {
        Self {
            h1: non_negative(self.h1),
            h2: non_negative(self.h2),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.h1.is_finite() && self.h2.is_finite()
    }

    pub(crate) fn to_array(self) -> [f64; 2] {
        [self.h1, self.h2]
    }

    pub(crate) fn from_array(y: [f64; 2]) -> Self {
        Self { h1: y[0], h2: y[1] }
    }
}

impl From<(f64, f64)> for Levels {
    fn from((h1, h2): (f64, f64)) -> Self {
        Self { h1, h2 }
    }
}

#[inline]
fn non_negative(x: f64) -> f64 {
    if x > 0.0 { x } else { 0.0 }
}

/// Linear tank: `dh1 = Kp*u - K1*h1`, `dh2 = K1*Kc*h1 - K2*h2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearTank {
    pub k1: f64,
    pub k2: f64,
    pub kc: f64,
    pub kp: f64,
}

/// Gravity-drained tank with a valve splitting the pump flow between tanks:
/// `dh1 = c1*(1-valve)*u - c2*sqrt(h1)`,
/// `dh2 = c1*valve*u + c2*sqrt(h1) - c2*sqrt(h2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GravityTank {
    pub c1: f64,
    pub c2: f64,
    pub valve: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlantModel {
    Linear(LinearTank),
    Gravity(GravityTank),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlantParams {
    pub model: PlantModel,
    /// Level at which a tank is full.
    pub capacity: f64,
}

impl Default for PlantParams {
    fn default() -> Self {
        Self {
            model: PlantModel::Linear(LinearTank {
                k1: tanklab_config::DEFAULT_K1,
                k2: tanklab_config::DEFAULT_K2,
                kc: 0.87,
                kp: 0.004,
            }),
            capacity: 0.6,
        }
    }
}

impl PlantParams {
    /// Time derivative of the levels at `y` under pump duty `u`.
    pub fn derivatives(&self, y: [f64; 2], u: f64) -> [f64; 2] {
        let h1 = non_negative(y[0]);
        let h2 = non_negative(y[1]);
        let raw = match self.model {
            PlantModel::Linear(p) => [p.kp * u - p.k1 * h1, p.k1 * p.kc * h1 - p.k2 * h2],
            PlantModel::Gravity(p) => {
                let out1 = p.c2 * h1.sqrt();
                [
                    p.c1 * (1.0 - p.valve) * u - out1,
                    p.c1 * p.valve * u + out1 - p.c2 * h2.sqrt(),
                ]
            }
        };
        [
            saturate(h1, raw[0], self.capacity),
            saturate(h2, raw[1], self.capacity),
        ]
    }
}

/// Full tank: no further rise. Draining is always allowed.
#[inline]
pub fn saturate(level: f64, derivative: f64, capacity: f64) -> f64 {
    if level >= capacity && derivative > 0.0 {
        0.0
    } else {
        derivative
    }
}
