// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! ShuffleNet grouped-convolution encoder for semantic segmentation.
//!
//! [`ShuffleNetEncoder::build`] materialises the network for a fixed input
//! shape, [`ShuffleNetEncoder::load_pretrained_weights`] fills it from a
//! parameter store and [`ShuffleNetEncoder::forward_all`] returns the class
//! scores together with the two decoder taps.

pub mod config;
pub mod error;
pub mod models;

pub use config::ShuffleNetConfig;
pub use error::{VisionError, VisionResult};
pub use models::{
    EncoderOutputs, EncoderTaps, GroupCount, Preprocessor, ShuffleNetEncoder, Stage, StageBuilder,
    StageId,
};
