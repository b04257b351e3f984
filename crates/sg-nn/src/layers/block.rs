// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::layers::conv::{Conv2d, ConvOptions};
use crate::layers::normalization::BatchNorm2d;
use crate::module::{Module, Parameter};
use crate::{PureResult, Tensor};
use sg_tensor::FeatureShape;

/// Activation applied at the end of a [`ConvBlock`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Activation {
    #[default]
    Identity,
    Relu,
}

/// Whether a block normalises its convolution output, and in which mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Normalization {
    Disabled,
    BatchNorm { training: bool },
}

impl Normalization {
    pub fn from_flags(enabled: bool, training: bool) -> Self {
        if enabled {
            Normalization::BatchNorm { training }
        } else {
            Normalization::Disabled
        }
    }
}

/// Convolution followed by optional batch normalisation and activation, all
/// sharing one parameter scope.
#[derive(Debug)]
pub struct ConvBlock {
    scope: String,
    conv: Conv2d,
    norm: Option<BatchNorm2d>,
    activation: Activation,
}

impl ConvBlock {
    pub fn new(
        scope: impl Into<String>,
        input: FeatureShape,
        out_channels: usize,
        kernel: (usize, usize),
        options: ConvOptions,
        normalization: Normalization,
        activation: Activation,
    ) -> PureResult<Self> {
        let scope = scope.into();
        let conv = Conv2d::new(scope.as_str(), input, out_channels, kernel, options)?;
        let norm = match normalization {
            Normalization::Disabled => None,
            Normalization::BatchNorm { training } => Some(BatchNorm2d::new(
                scope.as_str(),
                conv.output_shape(),
                training,
            )?),
        };
        Ok(Self {
            scope,
            conv,
            norm,
            activation,
        })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn conv(&self) -> &Conv2d {
        &self.conv
    }

    pub fn input_shape(&self) -> FeatureShape {
        self.conv.input_shape()
    }

    pub fn output_shape(&self) -> FeatureShape {
        self.conv.output_shape()
    }

    pub fn has_batch_norm(&self) -> bool {
        self.norm.is_some()
    }
}

impl Module for ConvBlock {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let mut out = self.conv.forward(input)?;
        if let Some(norm) = &self.norm {
            out = norm.forward(&out)?;
        }
        if self.activation == Activation::Relu {
            out.relu_inplace();
        }
        Ok(out)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.conv.visit_parameters(visitor)?;
        if let Some(norm) = &self.norm {
            norm.visit_parameters(visitor)?;
        }
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.conv.visit_parameters_mut(visitor)?;
        if let Some(norm) = &mut self.norm {
            norm.visit_parameters_mut(visitor)?;
        }
        Ok(())
    }
}
