// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! ShuffleNet encoder.
//!
//! ```text
//! input ─ preprocess ─ conv1 (3x3/2) ─ pad ─ max pool (3x3/2) ─ stage2 ─ stage3 ─ stage4 ─ conv_1c_1x1
//!                                                                  │        │
//!                                                              feed_low  feed_high
//! ```

use crate::config::ShuffleNetConfig;
use crate::error::{VisionError, VisionResult};
use crate::models::channels::{ChannelWidths, StageId};
use crate::models::preprocess::Preprocessor;
use sg_nn::module::{Module, Parameter};
use sg_nn::{
    Activation, ConvBlock, ConvOptions, FeatureShape, Fusion, MaxPool2d, Normalization, Padding,
    Padding2d, ParameterStore, PureResult, RestoreOutcome, RestoreReport, ShuffleUnit,
    ShuffleUnitConfig, Tensor, WeightRestorer, ZeroPad2d,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Scope every encoder parameter lives under.
pub const ENCODER_SCOPE: &str = "shufflenet_encoder";

/// Sub-scope of the classification head.
pub const HEAD_SCOPE: &str = "conv_1c_1x1";

const STEM_SCOPE: &str = "conv1";

/// Consecutive grouped units sharing one output width.
#[derive(Debug)]
pub struct Stage {
    id: StageId,
    units: Vec<ShuffleUnit>,
    input: FeatureShape,
    output: FeatureShape,
}

impl Stage {
    pub fn id(&self) -> StageId {
        self.id
    }

    pub fn units(&self) -> &[ShuffleUnit] {
        &self.units
    }

    pub fn input_shape(&self) -> FeatureShape {
        self.input
    }

    pub fn output_shape(&self) -> FeatureShape {
        self.output
    }
}

impl Module for Stage {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let mut units = self.units.iter();
        let Some(first) = units.next() else {
            return Ok(input.clone());
        };
        let mut out = first.forward(input)?;
        for unit in units {
            out = unit.forward(&out)?;
        }
        Ok(out)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for unit in &self.units {
            unit.visit_parameters(visitor)?;
        }
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for unit in &mut self.units {
            unit.visit_parameters_mut(visitor)?;
        }
        Ok(())
    }
}

/// Builds stages from the settings shared by every unit of the encoder.
#[derive(Clone, Copy, Debug)]
pub struct StageBuilder {
    widths: ChannelWidths,
    num_groups: usize,
    weight_decay: f32,
    bias: f32,
    batchnorm: bool,
    training: bool,
    seed: Option<u64>,
}

impl StageBuilder {
    pub fn new(config: &ShuffleNetConfig) -> Self {
        Self {
            widths: config.num_groups.widths(),
            num_groups: config.num_groups.get(),
            weight_decay: config.weight_decay,
            bias: config.bias,
            batchnorm: config.batchnorm_enabled,
            training: config.train_flag,
            seed: config.seed,
        }
    }

    /// Builds stage `stage` (2, 3 or 4) with one downsampling unit followed by
    /// `repeat` residual units. A `dilation` above one keeps the resolution
    /// and dilates the first depthwise convolution instead.
    pub fn build_stage(
        &self,
        input: FeatureShape,
        stage: usize,
        repeat: usize,
        dilation: usize,
    ) -> VisionResult<Stage> {
        let id = StageId::try_from(stage)?;
        if dilation == 0 {
            return Err(VisionError::InvalidConfig(
                "dilation must be at least 1".to_string(),
            ));
        }
        let num_filters = self.widths.for_stage(id);
        let (stride, dilation) = if dilation > 1 {
            ((1, 1), dilation)
        } else {
            ((2, 2), 1)
        };

        let mut units = Vec::with_capacity(repeat + 1);
        let first = ShuffleUnit::new(
            unit_scope(id, 0),
            input,
            ShuffleUnitConfig {
                group_conv_bottleneck: id != StageId::Two,
                stride,
                dilation,
                fusion: Fusion::Concat,
                ..self.unit_config(num_filters)
            },
        )?;
        let mut shape = first.output_shape();
        units.push(first);
        for index in 1..=repeat {
            let unit = ShuffleUnit::new(
                unit_scope(id, index),
                shape,
                self.unit_config(num_filters),
            )?;
            shape = unit.output_shape();
            units.push(unit);
        }
        debug!(stage = id.number(), units = units.len(), output = %shape, "built stage");
        Ok(Stage {
            id,
            units,
            input,
            output: shape,
        })
    }

    fn unit_config(&self, num_filters: usize) -> ShuffleUnitConfig {
        ShuffleUnitConfig {
            num_groups: self.num_groups,
            group_conv_bottleneck: true,
            num_filters,
            stride: (1, 1),
            dilation: 1,
            fusion: Fusion::Add,
            weight_decay: self.weight_decay,
            bias: self.bias,
            batchnorm: self.batchnorm,
            training: self.training,
            seed: self.seed,
        }
    }
}

fn unit_scope(stage: StageId, index: usize) -> String {
    format!("{ENCODER_SCOPE}/stage{}_{index}", stage.number())
}

/// Shapes of the three encoder outputs, fixed at build time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncoderTaps {
    /// Class scores produced by the head.
    pub score: FeatureShape,
    /// Stage 3 output.
    pub feed_high: FeatureShape,
    /// Stage 2 output.
    pub feed_low: FeatureShape,
}

/// Values of the three encoder outputs for one input batch.
#[derive(Clone, Debug)]
pub struct EncoderOutputs {
    pub score: Tensor,
    pub feed_high: Tensor,
    pub feed_low: Tensor,
}

/// ShuffleNet feature extractor with a 1x1 classification head.
#[derive(Debug)]
pub struct ShuffleNetEncoder {
    config: ShuffleNetConfig,
    input: FeatureShape,
    pretrained_path: PathBuf,
    preprocess: Preprocessor,
    stem: ConvBlock,
    stem_pad: ZeroPad2d,
    pool: MaxPool2d,
    stages: Vec<Stage>,
    head: ConvBlock,
    taps: EncoderTaps,
}

impl ShuffleNetEncoder {
    /// Materialises the encoder for `input` shaped images. No data flows
    /// through the network here; shapes are checked and parameters allocated.
    pub fn build(input: FeatureShape, config: ShuffleNetConfig) -> VisionResult<Self> {
        config.validate()?;
        let pretrained_path = resolve_pretrained_path(&config.pretrained_path)?;
        info!(
            input = %input,
            groups = %config.num_groups,
            classes = config.num_classes,
            "building shufflenet encoder"
        );

        let preprocess = Preprocessor::new(input)?;
        let options = ConvOptions {
            bias_init: config.bias,
            weight_decay: config.weight_decay,
            seed: config.seed,
            ..ConvOptions::default()
        };
        let stem = ConvBlock::new(
            format!("{ENCODER_SCOPE}/{STEM_SCOPE}"),
            input,
            config.num_groups.widths().stem,
            (3, 3),
            ConvOptions {
                stride: (2, 2),
                padding: Padding::Valid,
                ..options
            },
            Normalization::from_flags(config.batchnorm_enabled, config.train_flag),
            Activation::Relu,
        )?;
        debug!(output = %stem.output_shape(), "built stem");
        let stem_pad = ZeroPad2d::new(
            stem.output_shape(),
            Padding2d {
                bottom: 1,
                right: 1,
                ..Padding2d::default()
            },
        );
        let pool = MaxPool2d::new(stem_pad.output_shape(), (3, 3), (2, 2), Padding::Valid)?;
        debug!(output = %pool.output_shape(), "built stem pooling");

        let builder = StageBuilder::new(&config);
        let mut stages = Vec::with_capacity(StageId::ALL.len());
        let mut shape = pool.output_shape();
        for id in StageId::ALL {
            let stage = builder.build_stage(shape, id.number(), id.default_repeat(), 1)?;
            shape = stage.output_shape();
            stages.push(stage);
        }

        let head = ConvBlock::new(
            format!("{ENCODER_SCOPE}/{HEAD_SCOPE}"),
            shape,
            config.num_classes,
            (1, 1),
            ConvOptions {
                bias_init: 0.0,
                ..options
            },
            Normalization::Disabled,
            Activation::Identity,
        )?;
        let taps = EncoderTaps {
            score: head.output_shape(),
            feed_high: stages[1].output_shape(),
            feed_low: stages[0].output_shape(),
        };
        let encoder = Self {
            config,
            input,
            pretrained_path,
            preprocess,
            stem,
            stem_pad,
            pool,
            stages,
            head,
            taps,
        };
        info!(
            score = %taps.score,
            feed_high = %taps.feed_high,
            feed_low = %taps.feed_low,
            units = encoder.unit_count(),
            parameters = encoder.parameter_count().unwrap_or_default(),
            "built shufflenet encoder"
        );
        Ok(encoder)
    }

    pub fn config(&self) -> &ShuffleNetConfig {
        &self.config
    }

    pub fn input_shape(&self) -> FeatureShape {
        self.input
    }

    pub fn taps(&self) -> EncoderTaps {
        self.taps
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.id() == id)
    }

    pub fn stem(&self) -> &ConvBlock {
        &self.stem
    }

    pub fn head(&self) -> &ConvBlock {
        &self.head
    }

    /// Total number of grouped units across all stages.
    pub fn unit_count(&self) -> usize {
        self.stages.iter().map(|stage| stage.units().len()).sum()
    }

    /// Parameter store location resolved against the working directory at build time.
    pub fn pretrained_path(&self) -> &Path {
        &self.pretrained_path
    }

    /// Runs the encoder and returns the scores together with both taps.
    pub fn forward_all(&self, input: &Tensor) -> PureResult<EncoderOutputs> {
        let x = self.preprocess.preprocess(input)?;
        let x = self.stem.forward(&x)?;
        let x = self.stem_pad.forward(&x)?;
        let mut x = self.pool.forward(&x)?;
        let mut taps = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            x = stage.forward(&x)?;
            taps.push(x.clone());
        }
        let score = self.head.forward(&x)?;
        let mut taps = taps.into_iter();
        let feed_low = taps.next().unwrap_or_else(|| x.clone());
        let feed_high = taps.next().unwrap_or_else(|| x.clone());
        Ok(EncoderOutputs {
            score,
            feed_high,
            feed_low,
        })
    }

    fn restorer(&self) -> WeightRestorer {
        WeightRestorer::new()
            .with_ambiguity_policy(self.config.on_ambiguous_match)
            .with_missing_store_policy(self.config.on_missing_pretrained)
    }

    /// Restores parameters from the configured store. A missing store is
    /// skipped or rejected according to `on_missing_pretrained`.
    pub fn load_pretrained_weights(&mut self) -> VisionResult<RestoreOutcome> {
        let path = self.pretrained_path.clone();
        info!(path = %path.display(), "loading pretrained weights");
        Ok(self.restorer().restore_from_path(&path, self)?)
    }

    /// Restores parameters from an already loaded store.
    pub fn load_weights_from(&mut self, store: &ParameterStore) -> VisionResult<RestoreReport> {
        Ok(self.restorer().restore(store, self)?)
    }

    /// Writes the current values of every variable addressed by a key of
    /// `source` to `path`, keyed the same way.
    pub fn export_pretrained(
        &self,
        source: &ParameterStore,
        path: impl AsRef<Path>,
    ) -> VisionResult<ParameterStore> {
        Ok(self.restorer().export_to_path(self, source, path)?)
    }
}

fn resolve_pretrained_path(path: &Path) -> VisionResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|source| VisionError::Io {
        path: PathBuf::from("."),
        source,
    })?;
    Ok(cwd.join(path))
}

impl Module for ShuffleNetEncoder {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        Ok(self.forward_all(input)?.score)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.stem.visit_parameters(visitor)?;
        for stage in &self.stages {
            stage.visit_parameters(visitor)?;
        }
        self.head.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.stem.visit_parameters_mut(visitor)?;
        for stage in &mut self.stages {
            stage.visit_parameters_mut(visitor)?;
        }
        self.head.visit_parameters_mut(visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::channels::GroupCount;

    fn config() -> ShuffleNetConfig {
        ShuffleNetConfig::new(4, "/nonexistent/shufflenet.bin").with_seed(5)
    }

    #[test]
    fn stage_units_follow_the_naming_scheme() {
        let builder = StageBuilder::new(&config());
        let input = FeatureShape::new(24, 7, 7).unwrap();
        let stage = builder.build_stage(input, 2, 2, 1).unwrap();
        let scopes: Vec<&str> = stage.units().iter().map(|unit| unit.scope()).collect();
        assert_eq!(
            scopes,
            [
                "shufflenet_encoder/stage2_0",
                "shufflenet_encoder/stage2_1",
                "shufflenet_encoder/stage2_2"
            ]
        );
        assert!(!stage.units()[0].is_shuffled());
        assert_eq!(stage.units()[0].fusion(), Fusion::Concat);
        assert!(stage.units()[1].is_shuffled());
        assert_eq!(stage.units()[1].fusion(), Fusion::Add);
        assert_eq!(stage.output_shape(), FeatureShape::new(240, 4, 4).unwrap());
    }

    #[test]
    fn dilated_stage_keeps_resolution() {
        let builder = StageBuilder::new(&config().with_groups(GroupCount::Two));
        let input = FeatureShape::new(200, 6, 6).unwrap();
        let stage = builder.build_stage(input, 3, 1, 2).unwrap();
        assert_eq!(stage.output_shape(), FeatureShape::new(400, 6, 6).unwrap());
        assert!(stage.units()[0].is_shuffled());
    }

    #[test]
    fn stage_ids_outside_two_to_four_are_rejected() {
        let builder = StageBuilder::new(&config());
        let input = FeatureShape::new(24, 7, 7).unwrap();
        for stage in [0, 1, 5] {
            assert!(matches!(
                builder.build_stage(input, stage, 3, 1),
                Err(VisionError::InvalidStage { stage: s }) if s == stage
            ));
        }
    }

    #[test]
    fn relative_paths_are_anchored_at_the_working_directory() {
        let resolved = resolve_pretrained_path(Path::new("weights/w.bin")).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("weights/w.bin"));
        let absolute = resolve_pretrained_path(Path::new("/srv/w.bin")).unwrap();
        assert_eq!(absolute, PathBuf::from("/srv/w.bin"));
    }
}
