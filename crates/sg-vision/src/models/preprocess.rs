// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use sg_nn::module::{Module, Parameter};
use sg_nn::{FeatureShape, PureResult, Tensor, TensorError};

/// Per-channel means subtracted before scaling, indexed by output channel.
pub const MEAN: [f32; 3] = [73.291_32, 83.044_426, 72.523_896];

/// Divisor applied after mean subtraction.
pub const PIXEL_SCALE: f32 = 255.0;

/// Output channel `i` is computed from input channel `CHANNEL_ORDER[i]`.
pub const CHANNEL_ORDER: [usize; 3] = [2, 1, 0];

/// Reverses the channel order, subtracts [`MEAN`] and scales into roughly `[-0.3, 0.7]`.
#[derive(Clone, Copy, Debug)]
pub struct Preprocessor {
    shape: FeatureShape,
}

impl Preprocessor {
    pub fn new(shape: FeatureShape) -> PureResult<Self> {
        if shape.channels != 3 {
            return Err(TensorError::ShapeMismatch {
                left: (shape.channels, shape.plane()),
                right: (3, shape.plane()),
            });
        }
        Ok(Self { shape })
    }

    pub fn shape(&self) -> FeatureShape {
        self.shape
    }

    /// Output has the same shape as `input`.
    pub fn preprocess(&self, input: &Tensor) -> PureResult<Tensor> {
        let batch = self.shape.check(input)?;
        let plane = self.shape.plane();
        let cols = self.shape.volume();
        let mut out = Tensor::zeros(batch, cols)?;
        let data = out.data_mut();
        for b in 0..batch {
            let row = &input.data()[b * cols..(b + 1) * cols];
            for (channel, (&source, mean)) in CHANNEL_ORDER.iter().zip(MEAN).enumerate() {
                let src = &row[source * plane..(source + 1) * plane];
                let start = b * cols + channel * plane;
                for (dst, value) in data[start..start + plane].iter_mut().zip(src) {
                    *dst = (value - mean) / PIXEL_SCALE;
                }
            }
        }
        Ok(out)
    }
}

impl Module for Preprocessor {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        self.preprocess(input)
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
    fn constant_fields_are_swapped_and_centred() {
        let shape = FeatureShape::new(3, 2, 2).unwrap();
        let pre = Preprocessor::new(shape).unwrap();
        let (a, b, c) = (10.0f32, 20.0f32, 30.0f32);
        let input = Tensor::from_fn(1, 12, |_, i| [a, b, c][i / 4]).unwrap();
        let output = pre.forward(&input).unwrap();
        assert_eq!(output.shape(), input.shape());
        let expected = [(c - MEAN[0]) / 255.0, (b - MEAN[1]) / 255.0, (a - MEAN[2]) / 255.0];
        for (i, value) in output.data().iter().enumerate() {
            assert!((value - expected[i / 4]).abs() < 1e-6);
        }
    }

    #[test]
    fn batches_are_processed_independently() {
        let shape = FeatureShape::new(3, 1, 1).unwrap();
        let pre = Preprocessor::new(shape).unwrap();
        let input = Tensor::from_vec(2, 3, vec![0.0, 0.0, 255.0, 255.0, 0.0, 0.0]).unwrap();
        let output = pre.forward(&input).unwrap();
        let data = output.data();
        assert!((data[0] - (255.0 - MEAN[0]) / 255.0).abs() < 1e-6);
        assert!((data[5] - (255.0 - MEAN[2]) / 255.0).abs() < 1e-6);
    }

    #[test]
    fn non_rgb_inputs_are_rejected() {
        let shape = FeatureShape::new(4, 8, 8).unwrap();
        assert!(matches!(
            Preprocessor::new(shape),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }
}
