// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! ShuffleNet grouped unit.
//!
//! ```text
//!  input ──┬── 1x1 (grouped?) conv ─ BN ─ ReLU ─ [shuffle] ─ 3x3 depthwise ─ BN ─ 1x1 grouped conv ─ BN ──┐
//!          └── [3x3 avg pool, stride 2] ─ [1x1 residual_match] ───────────────────────── concat | add ─ ReLU
//! ```

use crate::layers::block::{Activation, ConvBlock, Normalization};
use crate::layers::conv::{AvgPool2d, ConvOptions, Padding};
use crate::layers::shuffle::ChannelShuffle;
use crate::module::{Module, Parameter};
use crate::{PureResult, Tensor, TensorError};
use sg_tensor::{concat_channels, FeatureShape, Padding2d};

/// How the branch output is merged with the shortcut.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fusion {
    /// Channel concatenation `[shortcut, branch]`; the branch produces
    /// `num_filters - in_channels` channels.
    Concat,
    /// Element-wise sum; the branch produces `num_filters` channels.
    Add,
}

/// Hyper-parameters of one [`ShuffleUnit`].
#[derive(Clone, Copy, Debug)]
pub struct ShuffleUnitConfig {
    pub num_groups: usize,
    pub group_conv_bottleneck: bool,
    pub num_filters: usize,
    pub stride: (usize, usize),
    pub dilation: usize,
    pub fusion: Fusion,
    pub weight_decay: f32,
    pub bias: f32,
    pub batchnorm: bool,
    pub training: bool,
    pub seed: Option<u64>,
}

impl ShuffleUnitConfig {
    fn conv_options(&self) -> ConvOptions {
        ConvOptions {
            bias_init: self.bias,
            weight_decay: self.weight_decay,
            seed: self.seed,
            ..ConvOptions::default()
        }
    }

    fn normalization(&self) -> Normalization {
        Normalization::from_flags(self.batchnorm, self.training)
    }
}

/// Residual unit built from grouped pointwise convolutions, a channel shuffle
/// and a depthwise convolution.
#[derive(Debug)]
pub struct ShuffleUnit {
    scope: String,
    input: FeatureShape,
    output: FeatureShape,
    fusion: Fusion,
    bottleneck: ConvBlock,
    shuffle: Option<ChannelShuffle>,
    depthwise: ConvBlock,
    expand: ConvBlock,
    shortcut_pool: Option<AvgPool2d>,
    residual_match: Option<ConvBlock>,
}

impl ShuffleUnit {
    pub fn new(
        scope: impl Into<String>,
        input: FeatureShape,
        config: ShuffleUnitConfig,
    ) -> PureResult<Self> {
        let scope = scope.into();
        let in_channels = input.channels;
        let (bottleneck_width, branch_width) = match config.fusion {
            Fusion::Concat => {
                if config.num_filters <= in_channels {
                    return Err(TensorError::InvalidValue {
                        label: "concat_fusion_requires_wider_output",
                    });
                }
                let branch = config.num_filters - in_channels;
                (branch / 4, branch)
            }
            Fusion::Add => (config.num_filters / 4, config.num_filters),
        };
        if bottleneck_width == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: config.num_filters,
                cols: bottleneck_width,
            });
        }
        let base = config.conv_options();
        let norm = config.normalization();

        let (bottleneck_name, bottleneck_groups) = if config.group_conv_bottleneck {
            ("Gbottleneck", config.num_groups)
        } else {
            ("bottleneck", 1)
        };
        let bottleneck = ConvBlock::new(
            format!("{scope}/{bottleneck_name}"),
            input,
            bottleneck_width,
            (1, 1),
            ConvOptions {
                groups: bottleneck_groups,
                ..base
            },
            norm,
            Activation::Relu,
        )?;
        let shuffle = if config.group_conv_bottleneck {
            Some(ChannelShuffle::new(
                bottleneck.output_shape(),
                config.num_groups,
            )?)
        } else {
            None
        };

        let depthwise = ConvBlock::new(
            format!("{scope}/depthwise"),
            bottleneck.output_shape(),
            bottleneck_width,
            (3, 3),
            ConvOptions {
                stride: config.stride,
                dilation: config.dilation,
                groups: bottleneck_width,
                padding: Padding::Explicit(Padding2d::uniform(config.dilation)),
                ..base
            },
            norm,
            Activation::Identity,
        )?;

        let expand = ConvBlock::new(
            format!("{scope}/Gconv1x1"),
            depthwise.output_shape(),
            branch_width,
            (1, 1),
            ConvOptions {
                groups: config.num_groups,
                ..base
            },
            norm,
            Activation::Identity,
        )?;

        let (shortcut_pool, shortcut_shape) = if config.stride == (2, 2) {
            let pool = AvgPool2d::new(input, (3, 3), config.stride, Padding::Same)?;
            let shape = pool.output_shape();
            (Some(pool), shape)
        } else {
            (None, input)
        };
        if shortcut_shape.hw() != expand.output_shape().hw() {
            return Err(TensorError::ShapeMismatch {
                left: shortcut_shape.hw(),
                right: expand.output_shape().hw(),
            });
        }

        let (residual_match, output) = match config.fusion {
            Fusion::Concat => (None, shortcut_shape.with_channels(config.num_filters)),
            Fusion::Add => {
                let residual_match = if shortcut_shape.channels != config.num_filters {
                    Some(ConvBlock::new(
                        format!("{scope}/residual_match"),
                        shortcut_shape,
                        config.num_filters,
                        (1, 1),
                        base,
                        norm,
                        Activation::Identity,
                    )?)
                } else {
                    None
                };
                (residual_match, expand.output_shape())
            }
        };

        Ok(Self {
            scope,
            input,
            output,
            fusion: config.fusion,
            bottleneck,
            shuffle,
            depthwise,
            expand,
            shortcut_pool,
            residual_match,
        })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn fusion(&self) -> Fusion {
        self.fusion
    }

    pub fn input_shape(&self) -> FeatureShape {
        self.input
    }

    pub fn output_shape(&self) -> FeatureShape {
        self.output
    }

    pub fn bottleneck(&self) -> &ConvBlock {
        &self.bottleneck
    }

    pub fn depthwise(&self) -> &ConvBlock {
        &self.depthwise
    }

    pub fn expand(&self) -> &ConvBlock {
        &self.expand
    }

    pub fn has_residual_match(&self) -> bool {
        self.residual_match.is_some()
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle.is_some()
    }
}

impl Module for ShuffleUnit {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        self.input.check(input)?;
        let mut branch = self.bottleneck.forward(input)?;
        if let Some(shuffle) = &self.shuffle {
            branch = shuffle.forward(&branch)?;
        }
        let branch = self.depthwise.forward(&branch)?;
        let branch = self.expand.forward(&branch)?;
        let shortcut = match &self.shortcut_pool {
            Some(pool) => pool.forward(input)?,
            None => input.clone(),
        };
        let mut fused = match self.fusion {
            Fusion::Concat => {
                let shortcut_shape = self.output.with_channels(self.input.channels);
                concat_channels(
                    &shortcut,
                    shortcut_shape,
                    &branch,
                    self.expand.output_shape(),
                )?
            }
            Fusion::Add => {
                let shortcut = match &self.residual_match {
                    Some(block) => block.forward(&shortcut)?,
                    None => shortcut,
                };
                branch.add(&shortcut)?
            }
        };
        fused.relu_inplace();
        Ok(fused)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.bottleneck.visit_parameters(visitor)?;
        self.depthwise.visit_parameters(visitor)?;
        self.expand.visit_parameters(visitor)?;
        if let Some(block) = &self.residual_match {
            block.visit_parameters(visitor)?;
        }
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.bottleneck.visit_parameters_mut(visitor)?;
        self.depthwise.visit_parameters_mut(visitor)?;
        self.expand.visit_parameters_mut(visitor)?;
        if let Some(block) = &mut self.residual_match {
            block.visit_parameters_mut(visitor)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(fusion: Fusion, num_filters: usize, stride: (usize, usize)) -> ShuffleUnitConfig {
        ShuffleUnitConfig {
            num_groups: 3,
            group_conv_bottleneck: true,
            num_filters,
            stride,
            dilation: 1,
            fusion,
            weight_decay: 4e-5,
            bias: 0.0,
            batchnorm: true,
            training: false,
            seed: Some(17),
        }
    }

    #[test]
    fn concat_unit_downsamples_and_widens() {
        let input = FeatureShape::new(24, 9, 9).unwrap();
        let unit = ShuffleUnit::new(
            "enc/stage2_0",
            input,
            ShuffleUnitConfig {
                group_conv_bottleneck: false,
                ..config(Fusion::Concat, 240, (2, 2))
            },
        )
        .unwrap();
        assert_eq!(unit.output_shape(), FeatureShape::new(240, 5, 5).unwrap());
        assert_eq!(unit.bottleneck().scope(), "enc/stage2_0/bottleneck");
        assert_eq!(unit.bottleneck().output_shape().channels, 54);
        assert_eq!(unit.expand().output_shape().channels, 216);
        assert!(!unit.is_shuffled());

        let x = Tensor::random_normal(2, input.volume(), 0.0, 1.0, Some(2)).unwrap();
        let y = unit.forward(&x).unwrap();
        assert_eq!(y.shape(), (2, 240 * 25));
        assert!(y.data().iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn add_unit_keeps_shape_without_residual_match() {
        let input = FeatureShape::new(240, 4, 4).unwrap();
        let unit = ShuffleUnit::new("enc/stage2_1", input, config(Fusion::Add, 240, (1, 1)))
            .unwrap();
        assert_eq!(unit.output_shape(), input);
        assert!(unit.is_shuffled());
        assert!(!unit.has_residual_match());
        assert_eq!(unit.bottleneck().scope(), "enc/stage2_1/Gbottleneck");
        assert_eq!(unit.bottleneck().conv().groups(), 3);
        assert_eq!(unit.depthwise().conv().groups(), 60);
    }

    #[test]
    fn add_unit_with_depth_change_matches_residual() {
        let input = FeatureShape::new(12, 4, 4).unwrap();
        let unit =
            ShuffleUnit::new("enc/widen", input, config(Fusion::Add, 24, (1, 1))).unwrap();
        assert!(unit.has_residual_match());
        let state = unit.state_dict().unwrap();
        assert!(state.contains_key("enc/widen/residual_match/weights"));
        let x = Tensor::random_normal(1, input.volume(), 0.0, 1.0, Some(5)).unwrap();
        assert_eq!(unit.forward(&x).unwrap().shape(), (1, 24 * 16));
    }

    #[test]
    fn concat_unit_rejects_narrowing() {
        let input = FeatureShape::new(48, 4, 4).unwrap();
        let err = ShuffleUnit::new("enc/bad", input, config(Fusion::Concat, 48, (2, 2)))
            .unwrap_err();
        assert!(matches!(err, TensorError::InvalidValue { .. }));
    }

    #[test]
    fn dilated_unit_keeps_resolution() {
        let input = FeatureShape::new(240, 6, 6).unwrap();
        let unit = ShuffleUnit::new(
            "enc/dilated",
            input,
            ShuffleUnitConfig {
                dilation: 2,
                ..config(Fusion::Concat, 480, (1, 1))
            },
        )
        .unwrap();
        assert_eq!(unit.output_shape(), FeatureShape::new(480, 6, 6).unwrap());
    }
}
