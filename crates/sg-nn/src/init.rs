// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::{PureResult, Tensor};
use sg_config::determinism;

/// Resolves the seed used to initialise the parameter called `name`.
///
/// An explicit base seed always wins. Without one the process-wide
/// deterministic settings decide, and outside deterministic mode entropy is
/// used.
pub fn parameter_seed(base_seed: Option<u64>, name: &str) -> Option<u64> {
    match base_seed {
        Some(seed) => Some(determinism::derive_seed(seed, name)),
        None => {
            let cfg = determinism::config();
            cfg.enabled.then(|| cfg.seed_for(name))
        }
    }
}

/// Glorot uniform initialisation for a `(rows, cols)` weight matrix.
pub fn xavier_uniform(
    rows: usize,
    cols: usize,
    fan_in: usize,
    fan_out: usize,
    seed: Option<u64>,
) -> PureResult<Tensor> {
    let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
    Tensor::random_uniform(rows, cols, -limit, limit, seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_seeds_differ_per_name() {
        let a = parameter_seed(Some(3), "scope/a/weights");
        let b = parameter_seed(Some(3), "scope/b/weights");
        assert!(a.is_some());
        assert_ne!(a, b);
        assert_eq!(a, parameter_seed(Some(3), "scope/a/weights"));
    }

    #[test]
    fn xavier_values_stay_within_limit() {
        let weights = xavier_uniform(4, 9, 9, 36, Some(1)).unwrap();
        let limit = (6.0f32 / 45.0).sqrt();
        assert!(weights.data().iter().all(|v| v.abs() <= limit));
    }
}
