//! Value simulation for device readings.
//!
//! [`next_value`] is a pure function of the bounds, the previous value, the
//! mode and a random source. Callers own the state and write the result back
//! into their [`DeviceReading`](crate::models::DeviceReading).

use rand::Rng;
use tracing::warn;

use crate::models::SimulationMode;

// ---

/// Steps a random walk may take in one cycle.
const WALK_STEPS: [f64; 5] = [-0.1, -0.05, 0.0, 0.05, 0.1];

/// Nudge applied when a walk leaves its bounds. Soft bound, not a clamp.
const BOUND_CORRECTION: f64 = 0.1;

/// Compute the next simulated value for a device.
///
/// - `Fixed` returns `current` unchanged.
/// - `UniformRange` draws uniformly from `[min, max]`.
/// - `RandomWalk` starts with a uniform draw when `current` is 0, otherwise
///   moves by one of [`WALK_STEPS`] and is nudged back by
///   [`BOUND_CORRECTION`] when it crosses a bound.
///
/// Values are rounded to two decimal places. A uniform draw is then pulled
/// back into `[min, max]`, which rounding alone can leave.
pub fn next_value<R: Rng + ?Sized>(
    min: f64,
    max: f64,
    current: f64,
    mode: SimulationMode,
    rng: &mut R,
) -> f64 {
    // ---
    match mode {
        SimulationMode::Fixed => current,
        SimulationMode::UniformRange => draw(min, max, rng),
        SimulationMode::RandomWalk => {
            if current == 0.0 {
                return draw(min, max, rng);
            }

            let step = WALK_STEPS[rng.gen_range(0..WALK_STEPS.len())];
            let mut next = current + step;
            if next > max {
                next -= BOUND_CORRECTION;
            } else if next < min {
                next += BOUND_CORRECTION;
            }
            round2(next)
        }
    }
}

/// Parse a numeric topology cell, degrading to 0 when it is not a finite
/// number.
pub fn parse_or_zero(raw: &str, column: &str) -> f64 {
    // ---
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        Ok(v) => {
            warn!(column, value = %v, "non-finite value, using 0");
            0.0
        }
        Err(e) => {
            warn!(column, raw, error = %e, "unparsable value, using 0");
            0.0
        }
    }
}

/// Rounded uniform draw, kept inside the bounds.
fn draw<R: Rng + ?Sized>(min: f64, max: f64, rng: &mut R) -> f64 {
    // ---
    // Degraded bounds may be inverted; `f64::clamp` panics on lo > hi.
    let (lo, hi) = (min.min(max), min.max(max));
    round2(uniform(min, max, rng)).clamp(lo, hi)
}

// Works for min > max too, which only happens with degraded bounds.
fn uniform<R: Rng + ?Sized>(min: f64, max: f64, rng: &mut R) -> f64 {
    min + rng.gen::<f64>() * (max - min)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
