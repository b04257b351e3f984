// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Encoder configuration.
//!
//! ```toml
//! num_classes = 20
//! num_groups = 3
//! pretrained_path = "pretrained_weights/shufflenet_weights.bin"
//! train_flag = false
//! on_missing_pretrained = "skip"
//! ```

use crate::error::{VisionError, VisionResult};
use crate::models::channels::GroupCount;
use serde::{Deserialize, Serialize};
use sg_nn::{AmbiguityPolicy, MissingStorePolicy};
use std::path::{Path, PathBuf};

/// Default L2 coefficient attached to convolution weights.
pub const DEFAULT_WEIGHT_DECAY: f32 = 4e-5;

fn default_weight_decay() -> f32 {
    DEFAULT_WEIGHT_DECAY
}

fn default_true() -> bool {
    true
}

/// Immutable settings consumed by [`crate::models::ShuffleNetEncoder::build`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShuffleNetConfig {
    pub num_classes: usize,
    #[serde(default)]
    pub num_groups: GroupCount,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f32,
    /// Initial value of every convolution bias.
    #[serde(default)]
    pub bias: f32,
    #[serde(default = "default_true")]
    pub batchnorm_enabled: bool,
    /// Normalise with batch statistics instead of the moving averages.
    #[serde(default)]
    pub train_flag: bool,
    /// Parameter store location, relative to the working directory unless absolute.
    pub pretrained_path: PathBuf,
    #[serde(default)]
    pub on_missing_pretrained: MissingStorePolicy,
    #[serde(default)]
    pub on_ambiguous_match: AmbiguityPolicy,
    /// Base seed for parameter initialisation.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl ShuffleNetConfig {
    pub fn new(num_classes: usize, pretrained_path: impl Into<PathBuf>) -> Self {
        Self {
            num_classes,
            num_groups: GroupCount::default(),
            weight_decay: DEFAULT_WEIGHT_DECAY,
            bias: 0.0,
            batchnorm_enabled: true,
            train_flag: false,
            pretrained_path: pretrained_path.into(),
            on_missing_pretrained: MissingStorePolicy::default(),
            on_ambiguous_match: AmbiguityPolicy::default(),
            seed: None,
        }
    }

    pub fn with_groups(mut self, groups: GroupCount) -> Self {
        self.num_groups = groups;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Checks the values serde cannot.
    pub fn validate(&self) -> VisionResult<()> {
        if self.num_classes == 0 {
            return Err(VisionError::InvalidConfig(
                "num_classes must be positive".to_string(),
            ));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(VisionError::InvalidConfig(format!(
                "weight_decay must be a finite non-negative number, got {}",
                self.weight_decay
            )));
        }
        if !self.bias.is_finite() {
            return Err(VisionError::InvalidConfig(format!(
                "bias must be finite, got {}",
                self.bias
            )));
        }
        Ok(())
    }

    pub fn from_toml_str(raw: &str) -> VisionResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_path(path: impl AsRef<Path>) -> VisionResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| VisionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }
}
