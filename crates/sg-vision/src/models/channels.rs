// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Channel widths per group count.

use crate::error::{VisionError, VisionResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Output width of the stem convolution for every group count.
pub const STEM_WIDTH: usize = 24;

/// Supported numbers of convolution groups.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum GroupCount {
    One,
    Two,
    #[default]
    Three,
    Four,
    Eight,
}

impl GroupCount {
    pub const ALL: [GroupCount; 5] = [
        GroupCount::One,
        GroupCount::Two,
        GroupCount::Three,
        GroupCount::Four,
        GroupCount::Eight,
    ];

    pub fn get(self) -> usize {
        match self {
            GroupCount::One => 1,
            GroupCount::Two => 2,
            GroupCount::Three => 3,
            GroupCount::Four => 4,
            GroupCount::Eight => 8,
        }
    }

    pub fn widths(self) -> ChannelWidths {
        let (stage2, stage3, stage4) = match self {
            GroupCount::One => (144, 288, 576),
            GroupCount::Two => (200, 400, 800),
            GroupCount::Three => (240, 480, 960),
            GroupCount::Four => (272, 544, 1088),
            GroupCount::Eight => (384, 768, 1536),
        };
        ChannelWidths {
            stage2,
            stage3,
            stage4,
            stem: STEM_WIDTH,
        }
    }
}

impl TryFrom<usize> for GroupCount {
    type Error = VisionError;

    fn try_from(groups: usize) -> Result<Self, Self::Error> {
        match groups {
            1 => Ok(GroupCount::One),
            2 => Ok(GroupCount::Two),
            3 => Ok(GroupCount::Three),
            4 => Ok(GroupCount::Four),
            8 => Ok(GroupCount::Eight),
            _ => Err(VisionError::UnsupportedGroupCount { groups }),
        }
    }
}

impl From<GroupCount> for usize {
    fn from(groups: GroupCount) -> Self {
        groups.get()
    }
}

impl fmt::Display for GroupCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Per-stage output widths plus the stem width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelWidths {
    pub stage2: usize,
    pub stage3: usize,
    pub stage4: usize,
    pub stem: usize,
}

impl ChannelWidths {
    pub fn for_stage(&self, stage: StageId) -> usize {
        match stage {
            StageId::Two => self.stage2,
            StageId::Three => self.stage3,
            StageId::Four => self.stage4,
        }
    }

    pub fn as_tuple(&self) -> (usize, usize, usize, usize) {
        (self.stage2, self.stage3, self.stage4, self.stem)
    }
}

/// `(stage2, stage3, stage4, stem)` widths for a raw group count.
pub fn widths(num_groups: usize) -> VisionResult<(usize, usize, usize, usize)> {
    Ok(GroupCount::try_from(num_groups)?.widths().as_tuple())
}

/// Stages built from grouped units. Stage 1 is the stem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageId {
    Two,
    Three,
    Four,
}

impl StageId {
    pub const ALL: [StageId; 3] = [StageId::Two, StageId::Three, StageId::Four];

    pub fn number(self) -> usize {
        match self {
            StageId::Two => 2,
            StageId::Three => 3,
            StageId::Four => 4,
        }
    }

    /// Repeat units following the first unit in the standard encoder.
    pub fn default_repeat(self) -> usize {
        match self {
            StageId::Two | StageId::Four => 3,
            StageId::Three => 7,
        }
    }
}

impl TryFrom<usize> for StageId {
    type Error = VisionError;

    fn try_from(stage: usize) -> Result<Self, Self::Error> {
        match stage {
            2 => Ok(StageId::Two),
            3 => Ok(StageId::Three),
            4 => Ok(StageId::Four),
            _ => Err(VisionError::InvalidStage { stage }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_known_widths() {
        assert_eq!(widths(3).unwrap(), (240, 480, 960, 24));
        assert_eq!(widths(1).unwrap(), (144, 288, 576, 24));
        assert_eq!(widths(8).unwrap(), (384, 768, 1536, 24));
        assert_eq!(GroupCount::Four.widths().for_stage(StageId::Four), 1088);
        assert_eq!(GroupCount::Two.widths().for_stage(StageId::Three), 400);
    }

    #[test]
    fn unsupported_group_counts_fail() {
        for groups in [0, 5, 6, 7, 16] {
            assert!(matches!(
                widths(groups),
                Err(VisionError::UnsupportedGroupCount { groups: g }) if g == groups
            ));
        }
    }

    #[test]
    fn every_group_count_has_a_stem_of_24() {
        for groups in GroupCount::ALL {
            assert_eq!(groups.widths().stem, STEM_WIDTH);
            assert_eq!(GroupCount::try_from(groups.get()).unwrap(), groups);
        }
    }

    #[test]
    fn stage_ids_are_two_to_four() {
        assert!(matches!(
            StageId::try_from(1),
            Err(VisionError::InvalidStage { stage: 1 })
        ));
        assert!(matches!(
            StageId::try_from(5),
            Err(VisionError::InvalidStage { stage: 5 })
        ));
        let repeats: usize = StageId::ALL.iter().map(|s| s.default_repeat() + 1).sum();
        assert_eq!(repeats, 16);
    }
}
