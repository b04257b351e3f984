// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Module, Parameter};
use crate::{PureResult, Tensor, TensorError};
use sg_tensor::{pad_spatial, FeatureShape, Padding2d};

/// Interleaves channels across groups.
///
/// Channels are viewed as a `(groups, channels / groups)` grid and transposed,
/// so output channel `j * groups + g` reads input channel `g * (channels / groups) + j`.
#[derive(Clone, Copy, Debug)]
pub struct ChannelShuffle {
    shape: FeatureShape,
    groups: usize,
}

impl ChannelShuffle {
    pub fn new(shape: FeatureShape, groups: usize) -> PureResult<Self> {
        if groups == 0 || shape.channels % groups != 0 {
            return Err(TensorError::InvalidValue {
                label: "channel_shuffle_groups",
            });
        }
        Ok(Self { shape, groups })
    }

    pub fn shape(&self) -> FeatureShape {
        self.shape
    }

    fn source_channel(&self, output_channel: usize) -> usize {
        let per_group = self.shape.channels / self.groups;
        let j = output_channel / self.groups;
        let g = output_channel % self.groups;
        g * per_group + j
    }
}

impl Module for ChannelShuffle {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let batch = self.shape.check(input)?;
        let plane = self.shape.plane();
        let cols = self.shape.volume();
        let mut data = Vec::with_capacity(batch * cols);
        for b in 0..batch {
            let row = &input.data()[b * cols..(b + 1) * cols];
            for c in 0..self.shape.channels {
                let source = self.source_channel(c);
                data.extend_from_slice(&row[source * plane..(source + 1) * plane]);
            }
        }
        Tensor::from_vec(batch, cols, data)
    }

    fn visit_parameters(
        &self,
        _visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        _visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }
}

/// Constant zero padding around every channel plane.
#[derive(Clone, Copy, Debug)]
pub struct ZeroPad2d {
    input: FeatureShape,
    padding: Padding2d,
}

impl ZeroPad2d {
    pub fn new(input: FeatureShape, padding: Padding2d) -> Self {
        Self { input, padding }
    }

    pub fn output_shape(&self) -> FeatureShape {
        self.padding.apply(self.input)
    }
}

impl Module for ZeroPad2d {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        pad_spatial(input, self.input, self.padding)
    }

    fn visit_parameters(
        &self,
        _visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        _visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shuffle_transposes_group_grid() {
        let shape = FeatureShape::new(6, 1, 1).unwrap();
        let shuffle = ChannelShuffle::new(shape, 3).unwrap();
        let input = Tensor::from_vec(1, 6, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let output = shuffle.forward(&input).unwrap();
        assert_eq!(output.data(), &[0.0, 2.0, 4.0, 1.0, 3.0, 5.0]);
    }

    #[test]
    fn shuffle_requires_divisible_channels() {
        let shape = FeatureShape::new(5, 2, 2).unwrap();
        assert!(ChannelShuffle::new(shape, 3).is_err());
    }

    #[test]
    fn zero_pad_grows_bottom_right() {
        let shape = FeatureShape::new(24, 111, 111).unwrap();
        let pad = ZeroPad2d::new(
            shape,
            Padding2d {
                bottom: 1,
                right: 1,
                ..Padding2d::default()
            },
        );
        assert_eq!(pad.output_shape(), FeatureShape::new(24, 112, 112).unwrap());
    }
}
