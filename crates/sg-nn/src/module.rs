// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::{PureResult, Tensor, TensorError};
use std::collections::HashMap;
use std::fmt;

/// Suffix appended to a parameter name to form its live variable name.
pub const LIVE_SUFFIX: &str = ":0";

/// Role a tensor plays inside its layer scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamRole {
    Weights,
    Biases,
    Gamma,
    Beta,
    MovingMean,
    MovingVariance,
}

impl ParamRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamRole::Weights => "weights",
            ParamRole::Biases => "biases",
            ParamRole::Gamma => "batch_normalization/gamma",
            ParamRole::Beta => "batch_normalization/beta",
            ParamRole::MovingMean => "batch_normalization/moving_mean",
            ParamRole::MovingVariance => "batch_normalization/moving_variance",
        }
    }

    /// Moving statistics are restored and exported but never decayed or trained.
    pub fn is_trainable(&self) -> bool {
        !matches!(self, ParamRole::MovingMean | ParamRole::MovingVariance)
    }
}

impl fmt::Display for ParamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured identity of a parameter: the layer scope plus its role.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamKey {
    scope: String,
    role: ParamRole,
}

impl ParamKey {
    pub fn new(scope: impl Into<String>, role: ParamRole) -> Self {
        Self {
            scope: scope.into(),
            role,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn role(&self) -> ParamRole {
        self.role
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.role)
    }
}

/// Named tensor owned by a layer.
pub struct Parameter {
    name: String,
    value: Tensor,
    role: Option<ParamRole>,
    weight_decay: f32,
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (rows, cols) = self.value.shape();
        write!(
            f,
            "Parameter(name={},shape=({},{}),weight_decay={})",
            self.name, rows, cols, self.weight_decay
        )
    }
}

impl Parameter {
    /// Creates a new parameter with the provided tensor value.
    pub fn new(name: impl Into<String>, value: Tensor) -> Self {
        Self {
            name: name.into(),
            value,
            role: None,
            weight_decay: 0.0,
        }
    }

    /// Creates a parameter named after a structured key.
    pub fn keyed(key: &ParamKey, value: Tensor) -> Self {
        Self {
            name: key.to_string(),
            value,
            role: Some(key.role()),
            weight_decay: 0.0,
        }
    }

    /// Attaches an L2 weight-decay coefficient.
    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Returns the identifier assigned to the parameter.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name under which the value is exposed to restore and export.
    pub fn live_name(&self) -> String {
        format!("{}{LIVE_SUFFIX}", self.name)
    }

    pub fn role(&self) -> Option<ParamRole> {
        self.role
    }

    pub fn weight_decay(&self) -> f32 {
        self.weight_decay
    }

    /// Provides an immutable view into the underlying tensor value.
    pub fn value(&self) -> &Tensor {
        &self.value
    }

    /// Checks that `tensor` could replace the current value.
    pub fn check_shape(&self, tensor: &Tensor) -> PureResult<()> {
        if self.value.shape() != tensor.shape() {
            return Err(TensorError::ShapeMismatch {
                left: self.value.shape(),
                right: tensor.shape(),
            });
        }
        Ok(())
    }

    /// Replaces the value after verifying the shape.
    pub fn load_value(&mut self, value: &Tensor) -> PureResult<()> {
        self.check_shape(value)?;
        self.value = value.clone();
        Ok(())
    }
}

/// Forward-only module surface shared by every layer.
pub trait Module {
    /// Runs a forward pass.
    fn forward(&self, input: &Tensor) -> PureResult<Tensor>;

    /// Visits immutable parameters.
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()>;

    /// Visits mutable parameters.
    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()>;

    /// Number of scalar values held by every parameter.
    fn parameter_count(&self) -> PureResult<usize> {
        let mut total = 0usize;
        self.visit_parameters(&mut |param| {
            total += param.value().len();
            Ok(())
        })?;
        Ok(total)
    }

    /// Captures a copy of every parameter tensor keyed by its canonical name.
    fn state_dict(&self) -> PureResult<HashMap<String, Tensor>> {
        let mut state = HashMap::new();
        self.visit_parameters(&mut |param| {
            state.insert(param.name().to_string(), param.value().clone());
            Ok(())
        })?;
        Ok(state)
    }

    /// Restores parameters from a state dictionary produced by [`Module::state_dict`].
    fn load_state_dict(&mut self, state: &HashMap<String, Tensor>) -> PureResult<()> {
        self.visit_parameters_mut(&mut |param| {
            let Some(value) = state.get(param.name()) else {
                return Err(TensorError::MissingParameter {
                    name: param.name().to_string(),
                });
            };
            param.load_value(value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_parameters_follow_scope_layout() {
        let key = ParamKey::new("shufflenet_encoder/conv1", ParamRole::Gamma);
        let param = Parameter::keyed(&key, Tensor::zeros(1, 4).unwrap());
        assert_eq!(
            param.name(),
            "shufflenet_encoder/conv1/batch_normalization/gamma"
        );
        assert_eq!(
            param.live_name(),
            "shufflenet_encoder/conv1/batch_normalization/gamma:0"
        );
        assert_eq!(param.role(), Some(ParamRole::Gamma));
        assert!(!ParamRole::MovingMean.is_trainable());
    }

    #[test]
    fn load_value_rejects_shape_changes() {
        let mut param = Parameter::new("w", Tensor::zeros(2, 2).unwrap());
        let wrong = Tensor::zeros(1, 4).unwrap();
        assert!(matches!(
            param.load_value(&wrong),
            Err(TensorError::ShapeMismatch { .. })
        ));
        let right = Tensor::full(2, 2, 3.0).unwrap();
        param.load_value(&right).unwrap();
        assert_eq!(param.value(), &right);
    }
}
