// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use sg_nn::{RestoreError, TensorError};
use std::path::PathBuf;

/// Errors raised while configuring, building or restoring the encoder.
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("stage should be from 2 to 4, got {stage}")]
    InvalidStage { stage: usize },
    #[error("unsupported group count {groups}; expected one of 1, 2, 3, 4 or 8")]
    UnsupportedGroupCount { groups: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Restore(#[from] RestoreError),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

pub type VisionResult<T> = Result<T, VisionError>;
