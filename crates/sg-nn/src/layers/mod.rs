// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

pub mod activation;
pub mod block;
pub mod conv;
pub mod normalization;
pub mod shuffle;
pub mod unit;

pub use activation::Relu;
pub use block::{Activation, ConvBlock, Normalization};
pub use conv::{AvgPool2d, Conv2d, ConvOptions, MaxPool2d, Padding};
pub use normalization::BatchNorm2d;
pub use shuffle::{ChannelShuffle, ZeroPad2d};
pub use unit::{Fusion, ShuffleUnit, ShuffleUnitConfig};
