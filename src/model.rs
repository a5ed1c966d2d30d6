//! Model records: float model source, quantized model and the weight export format.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ModelkitError, Result};
use crate::io;
use crate::quantize::{QuantizedTensor, Shape};

/// Layer sizes of the fixed two-layer perceptron.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Architecture {
    pub input_size: usize,
    pub hidden_size: usize,
    pub output_size: usize,
}

impl Architecture {
    pub const fn new(input_size: usize, hidden_size: usize, output_size: usize) -> Self {
        Self {
            input_size,
            hidden_size,
            output_size,
        }
    }

    pub fn input_hidden_shape(&self) -> Shape {
        Shape::Matrix {
            rows: self.input_size,
            cols: self.hidden_size,
        }
    }

    pub fn bias_hidden_shape(&self) -> Shape {
        Shape::Vector(self.hidden_size)
    }

    pub fn hidden_output_shape(&self) -> Shape {
        Shape::Matrix {
            rows: self.hidden_size,
            cols: self.output_size,
        }
    }

    pub fn bias_output_shape(&self) -> Shape {
        Shape::Vector(self.output_size)
    }

    /// Total number of weights and biases.
    pub fn parameter_count(&self) -> usize {
        self.input_size * self.hidden_size
            + self.hidden_size
            + self.hidden_size * self.output_size
            + self.output_size
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 || self.hidden_size == 0 || self.output_size == 0 {
            return Err(ModelkitError::InvalidConfig(format!(
                "architecture {} has a zero-sized layer",
                self
            )));
        }
        Ok(())
    }
}

impl Default for Architecture {
    fn default() -> Self {
        Self::new(784, 10, 10)
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} -> {}",
            self.input_size, self.hidden_size, self.output_size
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Relu,
}

/// Train/test accuracy fractions in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Accuracy {
    pub train: f64,
    pub test: f64,
}

impl Accuracy {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("train", self.train), ("test", self.test)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ModelkitError::InvalidTensor {
                    tensor: format!("accuracy.{}", name),
                    reason: format!("{} is outside [0, 1]", value),
                });
            }
        }
        Ok(())
    }
}

/// Float weights handed over by the training step.
///
/// `weights[0]` is input→hidden (rows = fan-in), `weights[1]` is hidden→output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatModel {
    pub architecture: Architecture,
    #[serde(default)]
    pub activation: Activation,
    pub weights: Vec<Vec<Vec<f64>>>,
    pub biases: Vec<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<Accuracy>,
}

impl FloatModel {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        io::read_json(path)
    }

    /// Weight matrix and bias vector of layer `index` (0 or 1).
    pub fn layer(&self, index: usize) -> Result<(&[Vec<f64>], &[f64])> {
        let weights = self.weights.get(index).ok_or_else(|| ModelkitError::InvalidTensor {
            tensor: format!("weights[{}]", index),
            reason: format!("model has {} weight matrices, expected 2", self.weights.len()),
        })?;
        let biases = self.biases.get(index).ok_or_else(|| ModelkitError::InvalidTensor {
            tensor: format!("biases[{}]", index),
            reason: format!("model has {} bias vectors, expected 2", self.biases.len()),
        })?;
        Ok((weights, biases))
    }
}

/// Quantized weights of one export. Shapes always agree with `architecture`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedModel {
    architecture: Architecture,
    scale: u32,
    input_hidden: QuantizedTensor,
    bias_hidden: QuantizedTensor,
    hidden_output: QuantizedTensor,
    bias_output: QuantizedTensor,
}

impl QuantizedModel {
    pub fn new(
        architecture: Architecture,
        scale: u32,
        input_hidden: QuantizedTensor,
        bias_hidden: QuantizedTensor,
        hidden_output: QuantizedTensor,
        bias_output: QuantizedTensor,
    ) -> Result<Self> {
        architecture.validate()?;
        if scale == 0 {
            return Err(ModelkitError::InvalidConfig("scale must be positive".into()));
        }
        check_shape("input_hidden", architecture.input_hidden_shape(), &input_hidden)?;
        check_shape("bias_hidden", architecture.bias_hidden_shape(), &bias_hidden)?;
        check_shape("hidden_output", architecture.hidden_output_shape(), &hidden_output)?;
        check_shape("bias_output", architecture.bias_output_shape(), &bias_output)?;
        Ok(Self {
            architecture,
            scale,
            input_hidden,
            bias_hidden,
            hidden_output,
            bias_output,
        })
    }

    pub fn from_export(export: &QuantizedExport) -> Result<Self> {
        Self::new(
            export.architecture,
            export.scale,
            QuantizedTensor::from_rows("input_hidden", &export.input_hidden)?,
            QuantizedTensor::vector(export.bias_hidden.clone()),
            QuantizedTensor::from_rows("hidden_output", &export.hidden_output)?,
            QuantizedTensor::vector(export.bias_output.clone()),
        )
    }

    pub fn to_export(&self, accuracy: Option<Accuracy>) -> QuantizedExport {
        QuantizedExport {
            input_hidden: self.input_hidden.to_rows(),
            bias_hidden: self.bias_hidden.values().to_vec(),
            hidden_output: self.hidden_output.to_rows(),
            bias_output: self.bias_output.values().to_vec(),
            scale: self.scale,
            architecture: self.architecture,
            accuracy,
        }
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn input_hidden(&self) -> &QuantizedTensor {
        &self.input_hidden
    }

    pub fn bias_hidden(&self) -> &QuantizedTensor {
        &self.bias_hidden
    }

    pub fn hidden_output(&self) -> &QuantizedTensor {
        &self.hidden_output
    }

    pub fn bias_output(&self) -> &QuantizedTensor {
        &self.bias_output
    }
}

fn check_shape(tensor: &str, expected: Shape, actual: &QuantizedTensor) -> Result<()> {
    if actual.shape() != expected {
        return Err(ModelkitError::ShapeMismatch {
            tensor: tensor.to_string(),
            expected,
            actual: actual.shape(),
        });
    }
    Ok(())
}

/// On-disk weight export (`model_weights.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedExport {
    pub input_hidden: Vec<Vec<i32>>,
    pub bias_hidden: Vec<i32>,
    pub hidden_output: Vec<Vec<i32>>,
    pub bias_output: Vec<i32>,
    pub scale: u32,
    pub architecture: Architecture,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<Accuracy>,
}

impl QuantizedExport {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        io::read_json(path)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        io::write_json_atomic(path, self)
    }
}
