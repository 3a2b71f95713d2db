//! Utility functions for canopy and its dependents.

/// Slot and value of the largest distance. Ties keep the earliest slot,
/// which is what gives the builder its lowest-index election tiebreak.
/// Sentinel `NEG_INFINITY` entries never win.
pub fn arg_max(values: &[f32]) -> (usize, f32) {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best_slot, best), (slot, &v)| {
            if v > best {
                (slot, v)
            } else {
                (best_slot, best)
            }
        })
}

pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance.
pub fn variance(values: &[f64], mean: f64) -> f64 {
    values
        .iter()
        .map(|v| (v - mean) * (v - mean))
        .sum::<f64>()
        / values.len() as f64
}

/// Natural log of the gamma function.
pub fn ln_gamma(x: f64) -> f64 {
    libm::lgamma(x)
}

/// The digamma function, d/dx ln Gamma(x).
///
/// Uses the recurrence `psi(x) = psi(x + 1) - 1/x` to shift the argument
/// above 6, then the standard asymptotic series. Accurate to ~1e-12 for
/// x > 0, which is all the trackers need.
pub fn digamma(x: f64) -> f64 {
    let mut x = x;
    let mut result = 0.0;
    while x < 6.0 {
        result -= 1.0 / x;
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    result += libm::log(x) - 0.5 * inv;
    // Bernoulli-number coefficients of the asymptotic expansion.
    result
        - inv2
            * (1.0 / 12.0
                - inv2 * (1.0 / 120.0 - inv2 * (1.0 / 252.0 - inv2 * (1.0 / 240.0))))
}

/// One draw from N(mean, std^2) by the Box-Muller transform.
pub fn normal_draw<R: rand::Rng>(rng: &mut R, mean: f64, std: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let z = libm::sqrt(-2.0 * libm::log(u1)) * libm::cos(2.0 * std::f64::consts::PI * u2);
    mean + std * z
}
