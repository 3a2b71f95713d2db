//! Hard-coded constants for canopy and its dependents.

/// Dirichlet concentrations are clamped to this (2^-20) before evaluating
/// `lnGamma` or digamma.
pub const ALPHA_CLAMP: f64 = 9.536_743_164_062_5e-7;

/// Evidence totals at or below this are treated as empty by the trackers.
pub const EVIDENCE_FLOOR: f64 = 1e-9;

/// Bounded-size cap on distinct values tracked per discrete label column.
/// Values beyond the cap are folded into an `other` bucket.
pub const DISCRETE_CAP: usize = 32;

/// Seed used wherever the crate needs internal reproducible randomness.
pub const DEFAULT_SEED: u64 = 42;

/// Iteration budget for the power-iteration eigensolver.
pub const POWER_ITERATION_LIMIT: usize = 100;

/// Convergence tolerance for the power-iteration eigensolver.
pub const POWER_ITERATION_TOL: f64 = 1e-9;
