// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Channel-major feature-map helpers.
//!
//! A feature map with shape `(C, H, W)` is stored as one tensor row of
//! `C * H * W` values per batch element, channel planes back to back.

use crate::pure::{PureResult, Tensor, TensorError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Static shape of a feature map. The batch dimension stays dynamic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl FeatureShape {
    pub fn new(channels: usize, height: usize, width: usize) -> PureResult<Self> {
        if channels == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: 1,
                cols: channels,
            });
        }
        if height == 0 || width == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: height,
                cols: width,
            });
        }
        Ok(Self {
            channels,
            height,
            width,
        })
    }

    /// Spatial extent as `(height, width)`.
    pub fn hw(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Number of values in one spatial plane.
    pub fn plane(&self) -> usize {
        self.height * self.width
    }

    /// Number of values per batch row.
    pub fn volume(&self) -> usize {
        self.channels * self.plane()
    }

    /// Same spatial extent with a different channel count.
    pub fn with_channels(&self, channels: usize) -> Self {
        Self { channels, ..*self }
    }

    /// Verifies that `tensor` holds feature maps of this shape and returns the batch size.
    pub fn check(&self, tensor: &Tensor) -> PureResult<usize> {
        let (batch, cols) = tensor.shape();
        if cols != self.volume() {
            return Err(TensorError::ShapeMismatch {
                left: (batch, cols),
                right: (batch, self.volume()),
            });
        }
        Ok(batch)
    }
}

impl fmt::Display for FeatureShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// Zero padding applied independently to every spatial edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Padding2d {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

impl Padding2d {
    /// Same amount on all four edges.
    pub fn uniform(amount: usize) -> Self {
        Self {
            top: amount,
            bottom: amount,
            left: amount,
            right: amount,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Output shape after padding `shape`.
    pub fn apply(&self, shape: FeatureShape) -> FeatureShape {
        FeatureShape {
            channels: shape.channels,
            height: shape.height + self.top + self.bottom,
            width: shape.width + self.left + self.right,
        }
    }
}

/// Copies channels `start..start + count` out of every row.
pub fn channel_slice(
    input: &Tensor,
    shape: FeatureShape,
    start: usize,
    count: usize,
) -> PureResult<Tensor> {
    let batch = shape.check(input)?;
    if count == 0 || start + count > shape.channels {
        return Err(TensorError::ShapeMismatch {
            left: (start, count),
            right: (0, shape.channels),
        });
    }
    let plane = shape.plane();
    let cols = shape.volume();
    let out_cols = count * plane;
    let mut data = Vec::with_capacity(batch * out_cols);
    for b in 0..batch {
        let row = &input.data()[b * cols..(b + 1) * cols];
        data.extend_from_slice(&row[start * plane..(start + count) * plane]);
    }
    Tensor::from_vec(batch, out_cols, data)
}

/// Stacks `first` and `second` along the channel axis, `first` leading.
pub fn concat_channels(
    first: &Tensor,
    first_shape: FeatureShape,
    second: &Tensor,
    second_shape: FeatureShape,
) -> PureResult<Tensor> {
    if first_shape.hw() != second_shape.hw() {
        return Err(TensorError::ShapeMismatch {
            left: first_shape.hw(),
            right: second_shape.hw(),
        });
    }
    let batch = first_shape.check(first)?;
    let other_batch = second_shape.check(second)?;
    if batch != other_batch {
        return Err(TensorError::ShapeMismatch {
            left: first.shape(),
            right: second.shape(),
        });
    }
    let left_cols = first_shape.volume();
    let right_cols = second_shape.volume();
    let mut data = Vec::with_capacity(batch * (left_cols + right_cols));
    for b in 0..batch {
        data.extend_from_slice(&first.data()[b * left_cols..(b + 1) * left_cols]);
        data.extend_from_slice(&second.data()[b * right_cols..(b + 1) * right_cols]);
    }
    Tensor::from_vec(batch, left_cols + right_cols, data)
}

/// Surrounds every channel plane with zeros.
pub fn pad_spatial(input: &Tensor, shape: FeatureShape, padding: Padding2d) -> PureResult<Tensor> {
    let batch = shape.check(input)?;
    if padding.is_zero() {
        return Ok(input.clone());
    }
    let out_shape = padding.apply(shape);
    let mut out = Tensor::zeros(batch, out_shape.volume())?;
    let (h, w) = shape.hw();
    let (oh, ow) = out_shape.hw();
    let cols = shape.volume();
    let out_cols = out_shape.volume();
    let src = input.data();
    let dst = out.data_mut();
    for b in 0..batch {
        for c in 0..shape.channels {
            for y in 0..h {
                let src_start = b * cols + c * h * w + y * w;
                let dst_start =
                    b * out_cols + c * oh * ow + (y + padding.top) * ow + padding.left;
                dst[dst_start..dst_start + w].copy_from_slice(&src[src_start..src_start + w]);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(batch: usize, shape: FeatureShape) -> Tensor {
        Tensor::from_fn(batch, shape.volume(), |r, c| (r * 1000 + c) as f32).unwrap()
    }

    #[test]
    fn slice_and_concat_are_inverse() {
        let shape = FeatureShape::new(4, 2, 3).unwrap();
        let input = ramp(2, shape);
        let head = channel_slice(&input, shape, 0, 1).unwrap();
        let tail = channel_slice(&input, shape, 1, 3).unwrap();
        let rebuilt =
            concat_channels(&head, shape.with_channels(1), &tail, shape.with_channels(3)).unwrap();
        assert_eq!(rebuilt, input);
    }

    #[test]
    fn slice_out_of_range_is_rejected() {
        let shape = FeatureShape::new(2, 2, 2).unwrap();
        let input = ramp(1, shape);
        assert!(channel_slice(&input, shape, 1, 2).is_err());
    }

    #[test]
    fn concat_rejects_spatial_mismatch() {
        let a = FeatureShape::new(1, 2, 2).unwrap();
        let b = FeatureShape::new(1, 3, 3).unwrap();
        let err = concat_channels(&ramp(1, a), a, &ramp(1, b), b).unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { .. }));
    }

    #[test]
    fn bottom_right_padding_keeps_origin() {
        let shape = FeatureShape::new(1, 2, 2).unwrap();
        let input = Tensor::from_vec(1, 4, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let padding = Padding2d {
            bottom: 1,
            right: 1,
            ..Padding2d::default()
        };
        let out = pad_spatial(&input, shape, padding).unwrap();
        assert_eq!(padding.apply(shape), FeatureShape::new(1, 3, 3).unwrap());
        assert_eq!(
            out.data(),
            &[1.0, 2.0, 0.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0]
        );
    }
}
