// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Module, ParamKey, ParamRole, Parameter};
use crate::{PureResult, Tensor};
use sg_tensor::FeatureShape;

/// Default numerical floor added to the variance.
pub const BATCH_NORM_EPSILON: f32 = 1.0e-3;

/// Per-channel batch normalisation over feature maps.
///
/// In inference mode the stored moving statistics are used. In training mode
/// the statistics of the current batch (over batch and both spatial axes)
/// normalise the input; the moving statistics are left untouched.
#[derive(Debug)]
pub struct BatchNorm2d {
    shape: FeatureShape,
    epsilon: f32,
    training: bool,
    gamma: Parameter,
    beta: Parameter,
    moving_mean: Parameter,
    moving_variance: Parameter,
}

impl BatchNorm2d {
    pub fn new(scope: impl Into<String>, shape: FeatureShape, training: bool) -> PureResult<Self> {
        let scope = scope.into();
        let channels = shape.channels;
        let param = |role: ParamRole, fill: f32| -> PureResult<Parameter> {
            let key = ParamKey::new(scope.as_str(), role);
            Ok(Parameter::keyed(&key, Tensor::full(1, channels, fill)?))
        };
        Ok(Self {
            shape,
            epsilon: BATCH_NORM_EPSILON,
            training,
            gamma: param(ParamRole::Gamma, 1.0)?,
            beta: param(ParamRole::Beta, 0.0)?,
            moving_mean: param(ParamRole::MovingMean, 0.0)?,
            moving_variance: param(ParamRole::MovingVariance, 1.0)?,
        })
    }

    pub fn shape(&self) -> FeatureShape {
        self.shape
    }

    fn batch_statistics(&self, input: &Tensor, batch: usize) -> (Vec<f32>, Vec<f32>) {
        let plane = self.shape.plane();
        let cols = self.shape.volume();
        let count = (batch * plane) as f32;
        let mut mean = vec![0.0f32; self.shape.channels];
        let mut variance = vec![0.0f32; self.shape.channels];
        for (c, (mean, variance)) in mean.iter_mut().zip(variance.iter_mut()).enumerate() {
            let values = (0..batch).flat_map(|b| {
                let start = b * cols + c * plane;
                input.data()[start..start + plane].iter().copied()
            });
            let sum: f32 = values.clone().sum();
            *mean = sum / count;
            let centred: f32 = values.map(|v| (v - *mean) * (v - *mean)).sum();
            *variance = centred / count;
        }
        (mean, variance)
    }
}

impl Module for BatchNorm2d {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let batch = self.shape.check(input)?;
        let (mean, variance) = if self.training {
            self.batch_statistics(input, batch)
        } else {
            (
                self.moving_mean.value().data().to_vec(),
                self.moving_variance.value().data().to_vec(),
            )
        };
        let gamma = self.gamma.value().data();
        let beta = self.beta.value().data();
        let plane = self.shape.plane();
        let mut out = input.clone();
        for (index, value) in out.data_mut().iter_mut().enumerate() {
            let c = (index % self.shape.volume()) / plane;
            let inv_std = 1.0 / (variance[c] + self.epsilon).sqrt();
            *value = (*value - mean[c]) * inv_std * gamma[c] + beta[c];
        }
        Ok(out)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.gamma)?;
        visitor(&self.beta)?;
        visitor(&self.moving_mean)?;
        visitor(&self.moving_variance)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&mut self.gamma)?;
        visitor(&mut self.beta)?;
        visitor(&mut self.moving_mean)?;
        visitor(&mut self.moving_variance)
    }
}
