// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Vision models implemented on top of the ShuffleGraph neural module stack.
//!
//! Each model implements [`sg_nn::module::Module`], so checkpoints written by
//! [`sg_nn::io`] and parameter stores handled by [`sg_nn::restore`] apply to
//! them directly.

pub mod channels;
pub mod preprocess;
pub mod shufflenet;

pub use self::channels::{widths, ChannelWidths, GroupCount, StageId, STEM_WIDTH};
pub use self::preprocess::{Preprocessor, MEAN};
pub use self::shufflenet::{
    EncoderOutputs, EncoderTaps, ShuffleNetEncoder, Stage, StageBuilder, ENCODER_SCOPE, HEAD_SCOPE,
};
