// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Neural module surface for ShuffleGraph.
//!
//! Layers implement [`Module`] and expose their learnable tensors as named
//! [`Parameter`]s. [`io`] persists those tensors and [`restore`] maps an
//! external parameter store back onto a live network by name.

pub mod init;
pub mod io;
pub mod layers;
pub mod module;
pub mod restore;

pub use io::{load_bincode, load_json, save_bincode, save_json, SnapshotFormat};
pub use layers::{
    Activation, AvgPool2d, BatchNorm2d, ChannelShuffle, Conv2d, ConvBlock, ConvOptions, Fusion,
    MaxPool2d, Normalization, Padding, Relu, ShuffleUnit, ShuffleUnitConfig, ZeroPad2d,
};
pub use module::{Module, ParamKey, ParamRole, Parameter};
pub use restore::{
    AmbiguityPolicy, ExactMatcher, LegacySubstringMatcher, LiveVariable, LiveVariables,
    MissingStorePolicy, NameMatcher, ParameterStore, RestoreError, RestoreOutcome, RestorePlan,
    RestoreReport, StoreLoad, WeightRestorer,
};

pub use sg_tensor::{FeatureShape, Padding2d, PureResult, Tensor, TensorError};
