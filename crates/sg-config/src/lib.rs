// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Process-wide runtime configuration shared by every ShuffleGraph crate.
//!
//! [`tracing`] installs the global subscriber and [`determinism`] derives
//! reproducible random number generators from labels.

pub mod determinism;
pub mod tracing;

pub use self::determinism::{rng_from_label, rng_from_optional, DeterminismConfig};
pub use self::tracing::{init_tracing, InitError};
