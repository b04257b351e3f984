// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Dense `f32` tensors for the ShuffleGraph stack.
//!
//! Every tensor is a row-major `(rows, cols)` matrix. Feature maps use one row
//! per batch element with the channels laid out as contiguous `height * width`
//! planes, so channel slicing and concatenation reduce to copying row spans.

pub mod feature;
pub mod pure;

pub use feature::{channel_slice, concat_channels, pad_spatial, FeatureShape, Padding2d};
pub use pure::{PureResult, Tensor, TensorError};
