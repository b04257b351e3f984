// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::init::{parameter_seed, xavier_uniform};
use crate::module::{Module, ParamKey, ParamRole, Parameter};
use crate::{PureResult, Tensor, TensorError};
use rayon::prelude::*;
use sg_tensor::{FeatureShape, Padding2d};

fn validate_positive(value: usize, label: &'static str) -> PureResult<()> {
    if value == 0 {
        return Err(TensorError::InvalidValue { label });
    }
    Ok(())
}

fn dilated_extent(size: usize, dilation: usize) -> PureResult<usize> {
    size.checked_sub(1)
        .and_then(|value| value.checked_mul(dilation))
        .and_then(|value| value.checked_add(1))
        .ok_or(TensorError::InvalidDimensions {
            rows: size,
            cols: dilation,
        })
}

fn valid_extent(size: usize, extent: usize, stride: usize) -> PureResult<usize> {
    if size < extent {
        return Err(TensorError::InvalidDimensions {
            rows: size,
            cols: extent,
        });
    }
    Ok((size - extent) / stride + 1)
}

/// Spatial padding policy for sliding-window operators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Padding {
    /// No padding; windows must fit entirely inside the input.
    #[default]
    Valid,
    /// Pads so the output extent is `ceil(input / stride)`, extra padding on
    /// the bottom and right edges.
    Same,
    /// Caller-specified zero padding on every edge.
    Explicit(Padding2d),
}

impl Padding {
    /// Resolves the concrete edge padding and output extent for a window of
    /// `extent` (already dilated) sliding with `stride` over `input_hw`.
    pub fn resolve(
        &self,
        input_hw: (usize, usize),
        extent: (usize, usize),
        stride: (usize, usize),
    ) -> PureResult<(Padding2d, (usize, usize))> {
        let (h, w) = input_hw;
        match self {
            Padding::Valid => {
                let oh = valid_extent(h, extent.0, stride.0)?;
                let ow = valid_extent(w, extent.1, stride.1)?;
                Ok((Padding2d::default(), (oh, ow)))
            }
            Padding::Same => {
                let oh = h.div_ceil(stride.0);
                let ow = w.div_ceil(stride.1);
                let total_h = ((oh - 1) * stride.0 + extent.0).saturating_sub(h);
                let total_w = ((ow - 1) * stride.1 + extent.1).saturating_sub(w);
                let padding = Padding2d {
                    top: total_h / 2,
                    bottom: total_h - total_h / 2,
                    left: total_w / 2,
                    right: total_w - total_w / 2,
                };
                Ok((padding, (oh, ow)))
            }
            Padding::Explicit(padding) => {
                let oh = valid_extent(h + padding.top + padding.bottom, extent.0, stride.0)?;
                let ow = valid_extent(w + padding.left + padding.right, extent.1, stride.1)?;
                Ok((*padding, (oh, ow)))
            }
        }
    }
}

/// Construction options for [`Conv2d`].
#[derive(Clone, Copy, Debug)]
pub struct ConvOptions {
    pub stride: (usize, usize),
    pub padding: Padding,
    pub dilation: usize,
    /// Number of channel groups. Equal to the input channel count for a
    /// depthwise convolution.
    pub groups: usize,
    /// Constant the biases are initialised with.
    pub bias_init: f32,
    pub weight_decay: f32,
    /// Base seed for the weight initialiser.
    pub seed: Option<u64>,
}

impl Default for ConvOptions {
    fn default() -> Self {
        Self {
            stride: (1, 1),
            padding: Padding::Valid,
            dilation: 1,
            groups: 1,
            bias_init: 0.0,
            weight_decay: 0.0,
            seed: None,
        }
    }
}

/// Grouped two-dimensional convolution over `(batch, channels * height * width)` tensors.
///
/// Input channels are split into `groups` contiguous blocks of
/// `in_channels / groups` channels; channels left over by the floor division
/// are ignored. Each block feeds `out_channels / groups` outputs.
#[derive(Debug)]
pub struct Conv2d {
    weight: Parameter,
    bias: Parameter,
    input: FeatureShape,
    output: FeatureShape,
    kernel: (usize, usize),
    stride: (usize, usize),
    dilation: (usize, usize),
    padding: Padding2d,
    groups: usize,
    in_per_group: usize,
    out_per_group: usize,
}

impl Conv2d {
    pub fn new(
        scope: impl Into<String>,
        input: FeatureShape,
        out_channels: usize,
        kernel: (usize, usize),
        options: ConvOptions,
    ) -> PureResult<Self> {
        validate_positive(out_channels, "out_channels")?;
        validate_positive(kernel.0, "kernel_h")?;
        validate_positive(kernel.1, "kernel_w")?;
        validate_positive(options.stride.0, "stride_h")?;
        validate_positive(options.stride.1, "stride_w")?;
        validate_positive(options.dilation, "dilation")?;
        validate_positive(options.groups, "groups")?;
        if options.groups > input.channels {
            return Err(TensorError::InvalidValue {
                label: "conv_groups_exceed_input_channels",
            });
        }
        if out_channels % options.groups != 0 {
            return Err(TensorError::InvalidValue {
                label: "conv_output_channels_not_divisible_by_groups",
            });
        }
        let dilation = (options.dilation, options.dilation);
        let extent = (
            dilated_extent(kernel.0, dilation.0)?,
            dilated_extent(kernel.1, dilation.1)?,
        );
        let (padding, (oh, ow)) = options.padding.resolve(input.hw(), extent, options.stride)?;
        let in_per_group = input.channels / options.groups;
        let out_per_group = out_channels / options.groups;

        let scope = scope.into();
        let weight_key = ParamKey::new(scope.as_str(), ParamRole::Weights);
        let bias_key = ParamKey::new(scope.as_str(), ParamRole::Biases);
        let receptive = kernel.0 * kernel.1;
        let weight = xavier_uniform(
            out_channels,
            in_per_group * receptive,
            in_per_group * receptive,
            out_per_group * receptive,
            parameter_seed(options.seed, &weight_key.to_string()),
        )?;
        let bias = Tensor::full(1, out_channels, options.bias_init)?;
        Ok(Self {
            weight: Parameter::keyed(&weight_key, weight).with_weight_decay(options.weight_decay),
            bias: Parameter::keyed(&bias_key, bias),
            input,
            output: FeatureShape::new(out_channels, oh, ow)?,
            kernel,
            stride: options.stride,
            dilation,
            padding,
            groups: options.groups,
            in_per_group,
            out_per_group,
        })
    }

    pub fn input_shape(&self) -> FeatureShape {
        self.input
    }

    pub fn output_shape(&self) -> FeatureShape {
        self.output
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    pub fn bias(&self) -> &Parameter {
        &self.bias
    }

    fn convolve_row(&self, row: &[f32], out_row: &mut [f32]) {
        let (h, w) = self.input.hw();
        let (oh, ow) = self.output.hw();
        let (kh, kw) = self.kernel;
        let span = self.in_per_group * kh * kw;
        let weights = self.weight.value().data();
        let biases = self.bias.value().data();
        let top = self.padding.top as isize;
        let left = self.padding.left as isize;
        for oc in 0..self.output.channels {
            let group = oc / self.out_per_group;
            let channel_base = group * self.in_per_group;
            let kernel_row = &weights[oc * span..(oc + 1) * span];
            let plane = &mut out_row[oc * oh * ow..(oc + 1) * oh * ow];
            plane.fill(biases[oc]);
            for local in 0..self.in_per_group {
                let channel = &row[(channel_base + local) * h * w..(channel_base + local + 1) * h * w];
                for ky in 0..kh {
                    for kx in 0..kw {
                        let weight = kernel_row[(local * kh + ky) * kw + kx];
                        for oy in 0..oh {
                            let iy = (oy * self.stride.0 + ky * self.dilation.0) as isize - top;
                            if iy < 0 || iy >= h as isize {
                                continue;
                            }
                            let src = &channel[iy as usize * w..(iy as usize + 1) * w];
                            let dst = &mut plane[oy * ow..(oy + 1) * ow];
                            for (ox, out) in dst.iter_mut().enumerate() {
                                let ix =
                                    (ox * self.stride.1 + kx * self.dilation.1) as isize - left;
                                if ix < 0 || ix >= w as isize {
                                    continue;
                                }
                                *out += weight * src[ix as usize];
                            }
                        }
                    }
                }
            }
        }
    }
}

impl Module for Conv2d {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let batch = self.input.check(input)?;
        let in_cols = self.input.volume();
        let out_cols = self.output.volume();
        let mut out = Tensor::zeros(batch, out_cols)?;
        out.data_mut()
            .par_chunks_mut(out_cols)
            .zip(input.data().par_chunks(in_cols))
            .for_each(|(out_row, row)| self.convolve_row(row, out_row));
        Ok(out)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.weight)?;
        visitor(&self.bias)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&mut self.weight)?;
        visitor(&mut self.bias)
    }
}

/// Visits every in-bounds element of a pooling window.
#[derive(Clone, Copy, Debug)]
struct PoolWindow {
    input: FeatureShape,
    output: FeatureShape,
    kernel: (usize, usize),
    stride: (usize, usize),
    padding: Padding2d,
}

impl PoolWindow {
    fn new(
        input: FeatureShape,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: Padding,
    ) -> PureResult<Self> {
        validate_positive(kernel.0, "kernel_h")?;
        validate_positive(kernel.1, "kernel_w")?;
        validate_positive(stride.0, "stride_h")?;
        validate_positive(stride.1, "stride_w")?;
        let (padding, (oh, ow)) = padding.resolve(input.hw(), kernel, stride)?;
        Ok(Self {
            input,
            output: FeatureShape {
                height: oh,
                width: ow,
                ..input
            },
            kernel,
            stride,
            padding,
        })
    }

    fn reduce<F>(&self, input: &Tensor, mut reducer: F) -> PureResult<Tensor>
    where
        F: FnMut(&mut dyn Iterator<Item = f32>) -> f32,
    {
        let batch = self.input.check(input)?;
        let (h, w) = self.input.hw();
        let (oh, ow) = self.output.hw();
        let cols = self.input.volume();
        let out_cols = self.output.volume();
        let mut out = Tensor::zeros(batch, out_cols)?;
        let out_data = out.data_mut();
        for b in 0..batch {
            let row = &input.data()[b * cols..(b + 1) * cols];
            let out_row = &mut out_data[b * out_cols..(b + 1) * out_cols];
            for c in 0..self.input.channels {
                let channel = &row[c * h * w..(c + 1) * h * w];
                for oy in 0..oh {
                    for ox in 0..ow {
                        let y0 = (oy * self.stride.0) as isize - self.padding.top as isize;
                        let x0 = (ox * self.stride.1) as isize - self.padding.left as isize;
                        let mut window = (0..self.kernel.0)
                            .flat_map(|ky| (0..self.kernel.1).map(move |kx| (ky, kx)))
                            .filter_map(|(ky, kx)| {
                                let y = y0 + ky as isize;
                                let x = x0 + kx as isize;
                                if y < 0 || x < 0 || y >= h as isize || x >= w as isize {
                                    None
                                } else {
                                    Some(channel[y as usize * w + x as usize])
                                }
                            });
                        out_row[c * oh * ow + oy * ow + ox] = reducer(&mut window);
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Max pooling over 2D feature maps. Padded positions never win.
#[derive(Clone, Copy, Debug)]
pub struct MaxPool2d {
    window: PoolWindow,
}

impl MaxPool2d {
    pub fn new(
        input: FeatureShape,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: Padding,
    ) -> PureResult<Self> {
        Ok(Self {
            window: PoolWindow::new(input, kernel, stride, padding)?,
        })
    }

    pub fn output_shape(&self) -> FeatureShape {
        self.window.output
    }
}

impl Module for MaxPool2d {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        self.window
            .reduce(input, |values| values.fold(f32::MIN, f32::max))
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

/// Average pooling over 2D feature maps. Padded positions are excluded from
/// the divisor.
#[derive(Clone, Copy, Debug)]
pub struct AvgPool2d {
    window: PoolWindow,
}

impl AvgPool2d {
    pub fn new(
        input: FeatureShape,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: Padding,
    ) -> PureResult<Self> {
        Ok(Self {
            window: PoolWindow::new(input, kernel, stride, padding)?,
        })
    }

    pub fn output_shape(&self) -> FeatureShape {
        self.window.output
    }
}

impl Module for AvgPool2d {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        self.window.reduce(input, |values| {
            let (sum, count) = values.fold((0.0f32, 0usize), |(sum, count), v| (sum + v, count + 1));
            if count == 0 {
                0.0
            } else {
                sum / count as f32
            }
        })
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
